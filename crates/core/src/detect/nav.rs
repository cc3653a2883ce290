use serde::Serialize;
use url::Url;

use super::ContentBlock;
use crate::parse::{Document, Element};
use crate::urls::{self, Scope};

/// One link in a navigation region.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NavigationNode {
    pub label: String,
    /// Normalized absolute url when resolvable, the raw href otherwise
    pub target: String,
    /// List nesting depth, 0 for top-level entries
    pub depth: usize,
    /// Position among siblings under the same parent entry
    pub order: usize,
    /// Points outside the crawl scope; kept for diagnostics only
    pub external: bool,
}

/// Navigation entries of one page, in pre-order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct NavigationTree {
    pub nodes: Vec<NavigationNode>,
}

impl NavigationTree {
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &NavigationNode> {
        self.nodes.iter()
    }

    /// Number of entries flagged external.
    pub fn external_count(&self) -> usize {
        self.nodes.iter().filter(|n| n.external).count()
    }

    /// Targets of in-scope entries, pre-order, duplicates removed.
    pub fn internal_targets(&self) -> Vec<&str> {
        let mut seen = std::collections::HashSet::new();
        self.nodes
            .iter()
            .filter(|n| !n.external)
            .map(|n| n.target.as_str())
            .filter(|t| seen.insert(*t))
            .collect()
    }
}

/// Navigation region plus its extracted tree.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NavDetection {
    pub block: ContentBlock,
    pub tree: NavigationTree,
}

impl NavDetection {
    /// The no-candidate result: body region, confidence 0, empty tree.
    pub fn empty(doc: &Document) -> Self {
        Self { block: ContentBlock::fallback(doc), tree: NavigationTree::default() }
    }

    pub fn confidence(&self) -> f64 {
        self.block.confidence
    }
}

/// Walks a navigation region and collects its links.
///
/// Each enclosing `<ul>`/`<ol>` inside the region adds one level of nesting;
/// entries in the outermost list have depth 0. Sibling order restarts under
/// every new parent entry.
pub fn extract_tree(region: &Element<'_>, base: Option<&Url>, scope: Option<&Scope>) -> NavigationTree {
    let owned_scope;
    let scope = match (scope, base) {
        (Some(scope), _) => Some(scope),
        (None, Some(base)) => {
            owned_scope = Scope::new(base);
            Some(&owned_scope)
        }
        (None, None) => None,
    };

    let mut walker = TreeWalker { base, scope, counters: Vec::new(), nodes: Vec::new() };
    let start_depth = usize::from(is_list(region));
    walker.walk(region, start_depth);

    NavigationTree { nodes: walker.nodes }
}

fn is_list(element: &Element<'_>) -> bool {
    matches!(element.tag_name().as_str(), "ul" | "ol" | "menu")
}

struct TreeWalker<'s> {
    base: Option<&'s Url>,
    scope: Option<&'s Scope>,
    counters: Vec<usize>,
    nodes: Vec<NavigationNode>,
}

impl TreeWalker<'_> {
    fn walk(&mut self, element: &Element<'_>, list_depth: usize) {
        for child in element.children() {
            if child.tag_name() == "a" {
                self.push_link(&child, list_depth.saturating_sub(1));
            } else if is_list(&child) {
                self.walk(&child, list_depth + 1);
            } else {
                self.walk(&child, list_depth);
            }
        }
    }

    fn push_link(&mut self, anchor: &Element<'_>, depth: usize) {
        let Some(href) = anchor.attr("href").map(str::trim) else { return };
        if href.is_empty() || href.starts_with('#') {
            return;
        }

        let resolved = match self.base {
            Some(base) => base.join(href).ok(),
            None => Url::parse(href).ok(),
        };

        let (target, external) = match &resolved {
            Some(url) if matches!(url.scheme(), "http" | "https") => {
                let external = match self.scope {
                    Some(scope) => !scope.contains(url),
                    None => true,
                };
                (urls::normalize(url), external)
            }
            Some(url) => (url.to_string(), true),
            None => (href.to_string(), false),
        };

        let label = Some(anchor.visible_text())
            .filter(|t| !t.is_empty())
            .or_else(|| anchor.attr("aria-label").or(anchor.attr("title")).map(str::to_string))
            .unwrap_or_else(|| target.clone());

        self.counters.truncate(depth + 1);
        self.counters.resize(depth + 1, 0);
        let order = self.counters[depth];
        self.counters[depth] += 1;

        self.nodes.push(NavigationNode { label, target, depth, order, external });
    }
}
