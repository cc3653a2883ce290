//! Global reading order across a crawled site.
//!
//! Every resolver returns a [`DocumentOrder`] that is a permutation of the
//! input page set. [`resolve_order`] checks that before handing the order
//! out, so a strategy with a bug surfaces as
//! [`SiteweaveError::InternalInvariant`] instead of a silently broken book.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::detect::NavDetection;
use crate::{Result, SiteweaveError};

/// How a [`DocumentOrder`] was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderMethod {
    /// A navigation tree ordered at least one page beyond the root
    Navigation,
    /// Root first, then crawl depth, then url
    Fallback,
}

impl fmt::Display for OrderMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Navigation => write!(f, "navigation"),
            Self::Fallback => write!(f, "fallback"),
        }
    }
}

/// One reading order over all pages of a site.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DocumentOrder {
    pub urls: Vec<String>,
    pub method: OrderMethod,
    /// Confidence of the navigation detection used, 0 for fallback orders
    pub confidence: f64,
}

/// A page taking part in ordering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderPage {
    /// Normalized url
    pub url: String,
    /// Crawl depth at which the page was reached
    pub depth: usize,
}

/// Everything a resolver may look at.
#[derive(Debug, Clone, Default)]
pub struct OrderInput {
    /// Normalized root url
    pub root: String,
    pub pages: Vec<OrderPage>,
    /// Navigation detections keyed by page url
    pub navigation: BTreeMap<String, NavDetection>,
}

impl OrderInput {
    /// Builds an input, keeping the shallowest depth for repeated urls.
    pub fn new(
        root: impl Into<String>, pages: impl IntoIterator<Item = OrderPage>, navigation: BTreeMap<String, NavDetection>,
    ) -> Self {
        let mut by_url: BTreeMap<String, usize> = BTreeMap::new();
        for page in pages {
            by_url.entry(page.url).and_modify(|d| *d = (*d).min(page.depth)).or_insert(page.depth);
        }
        let pages = by_url.into_iter().map(|(url, depth)| OrderPage { url, depth }).collect();
        Self { root: root.into(), pages, navigation }
    }

    fn page_set(&self) -> HashSet<&str> {
        self.pages.iter().map(|p| p.url.as_str()).collect()
    }

    /// Pages sorted root first, then by depth, then by url.
    fn fallback_sequence(&self) -> Vec<&OrderPage> {
        let mut pages: Vec<&OrderPage> = self.pages.iter().collect();
        pages.sort_by(|a, b| {
            let a_root = a.url == self.root;
            let b_root = b.url == self.root;
            b_root.cmp(&a_root).then(a.depth.cmp(&b.depth)).then_with(|| a.url.cmp(&b.url))
        });
        pages
    }
}

/// An ordering strategy.
///
/// Strategies are free in how they rank pages, but [`resolve_order`]
/// rejects any output that is not a permutation of `input.pages`.
pub trait OrderResolver: Send + Sync {
    fn name(&self) -> &'static str;

    fn resolve(&self, input: &OrderInput) -> Result<DocumentOrder>;
}

/// Orders pages by the most trustworthy navigation tree on the site.
///
/// 1. The root page goes first.
/// 2. The tree with the highest navigation confidence is walked in
///    pre-order (ties: fewer external links, then smaller page url).
/// 3. Pages the tree never mentions are appended by depth, then url.
/// 4. Tree targets that were never fetched are dropped.
#[derive(Debug, Clone, Copy, Default)]
pub struct NavigationResolver;

/// Ignores navigation entirely: root first, then depth, then url.
#[derive(Debug, Clone, Copy, Default)]
pub struct UrlOrderResolver;

fn compare_detections(a: (&String, &NavDetection), b: (&String, &NavDetection)) -> Ordering {
    b.1.confidence()
        .total_cmp(&a.1.confidence())
        .then(a.1.tree.external_count().cmp(&b.1.tree.external_count()))
        .then_with(|| a.0.cmp(b.0))
}

impl OrderResolver for NavigationResolver {
    fn name(&self) -> &'static str {
        "navigation"
    }

    fn resolve(&self, input: &OrderInput) -> Result<DocumentOrder> {
        let pages = input.page_set();
        let mut placed: HashSet<&str> = HashSet::new();
        let mut urls: Vec<String> = Vec::with_capacity(input.pages.len());

        if pages.contains(input.root.as_str()) {
            placed.insert(input.root.as_str());
            urls.push(input.root.clone());
        }

        let primary = input
            .navigation
            .iter()
            .filter(|(url, nav)| pages.contains(url.as_str()) && !nav.tree.is_empty() && nav.confidence() > 0.0)
            .min_by(|a, b| compare_detections(*a, *b));

        let mut confidence = 0.0;
        let mut from_navigation = 0;
        if let Some((source, nav)) = primary {
            for target in nav.tree.internal_targets() {
                if pages.contains(target) && placed.insert(target) {
                    urls.push(target.to_string());
                    from_navigation += 1;
                }
            }
            confidence = nav.confidence().clamp(0.0, 1.0);
            debug!("Navigation from {} ordered {} pages ({:.2})", source, from_navigation, confidence);
        }

        for page in input.fallback_sequence() {
            if placed.insert(page.url.as_str()) {
                urls.push(page.url.clone());
            }
        }

        if from_navigation == 0 {
            return Ok(DocumentOrder { urls, method: OrderMethod::Fallback, confidence: 0.0 });
        }

        Ok(DocumentOrder { urls, method: OrderMethod::Navigation, confidence })
    }
}

impl OrderResolver for UrlOrderResolver {
    fn name(&self) -> &'static str {
        "url"
    }

    fn resolve(&self, input: &OrderInput) -> Result<DocumentOrder> {
        let urls = input.fallback_sequence().into_iter().map(|p| p.url.clone()).collect();
        Ok(DocumentOrder { urls, method: OrderMethod::Fallback, confidence: 0.0 })
    }
}

/// Selects the ordering strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStrategy {
    #[default]
    Navigation,
    Url,
}

impl fmt::Display for OrderStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Navigation => write!(f, "navigation"),
            Self::Url => write!(f, "url"),
        }
    }
}

impl FromStr for OrderStrategy {
    type Err = SiteweaveError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "navigation" | "nav" => Ok(Self::Navigation),
            "url" => Ok(Self::Url),
            other => Err(SiteweaveError::Config(format!("unknown order '{}' (expected navigation or url)", other))),
        }
    }
}

/// Builds the resolver for a strategy.
pub fn resolver_for(strategy: OrderStrategy) -> Box<dyn OrderResolver> {
    match strategy {
        OrderStrategy::Navigation => Box::new(NavigationResolver),
        OrderStrategy::Url => Box::new(UrlOrderResolver),
    }
}

/// Runs `resolver` and verifies the permutation invariant on its output.
pub fn resolve_order(resolver: &dyn OrderResolver, input: &OrderInput) -> Result<DocumentOrder> {
    let order = resolver.resolve(input)?;
    verify_permutation(input, &order)?;
    Ok(order)
}

/// Fails with [`SiteweaveError::InternalInvariant`] unless `order.urls` holds
/// every input page exactly once and nothing else.
pub fn verify_permutation(input: &OrderInput, order: &DocumentOrder) -> Result<()> {
    let expected = input.page_set();
    let mut seen: HashSet<&str> = HashSet::with_capacity(order.urls.len());

    for url in &order.urls {
        if !expected.contains(url.as_str()) {
            return Err(SiteweaveError::InternalInvariant(format!("order contains unknown page {}", url)));
        }
        if !seen.insert(url.as_str()) {
            return Err(SiteweaveError::InternalInvariant(format!("order contains {} twice", url)));
        }
    }

    if seen.len() != expected.len() {
        let missing: Vec<&str> = expected.difference(&seen).copied().collect();
        return Err(SiteweaveError::InternalInvariant(format!("order drops {} page(s): {:?}", missing.len(), missing)));
    }

    if !(0.0..=1.0).contains(&order.confidence) {
        return Err(SiteweaveError::InternalInvariant(format!("order confidence {} outside [0, 1]", order.confidence)));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::{ContentBlock, NavigationNode, NavigationTree};

    const ROOT: &str = "https://example.com/";

    fn page(path: &str, depth: usize) -> OrderPage {
        OrderPage { url: format!("{}{}", ROOT, path), depth }
    }

    fn nav(confidence: f64, entries: &[(&str, bool)]) -> NavDetection {
        let nodes = entries
            .iter()
            .enumerate()
            .map(|(i, (target, external))| NavigationNode {
                label: target.to_string(),
                target: if target.starts_with("http") { target.to_string() } else { format!("{}{}", ROOT, target) },
                depth: 0,
                order: i,
                external: *external,
            })
            .collect();
        NavDetection {
            block: ContentBlock {
                source_url: String::new(),
                locator: "nav".into(),
                confidence,
                text: String::new(),
                html: String::new(),
            },
            tree: NavigationTree { nodes },
        }
    }

    fn site() -> Vec<OrderPage> {
        vec![page("", 0), page("about.html", 1), page("guide/", 1), page("guide/setup.html", 2)]
    }

    #[test]
    fn test_navigation_order() {
        let mut navigation = BTreeMap::new();
        navigation.insert(ROOT.to_string(), nav(0.8, &[("guide/", false), ("guide/setup.html", false), ("about.html", false)]));
        let input = OrderInput::new(ROOT, site(), navigation);

        let order = resolve_order(&NavigationResolver, &input).unwrap();
        assert_eq!(order.method, OrderMethod::Navigation);
        assert_eq!(order.confidence, 0.8);
        assert_eq!(
            order.urls,
            vec![
                "https://example.com/",
                "https://example.com/guide/",
                "https://example.com/guide/setup.html",
                "https://example.com/about.html"
            ]
        );
    }

    #[test]
    fn test_pages_missing_from_navigation_are_appended() {
        let mut navigation = BTreeMap::new();
        navigation.insert(ROOT.to_string(), nav(0.6, &[("guide/", false), ("about.html", false)]));
        let input = OrderInput::new(ROOT, site(), navigation);

        let order = resolve_order(&NavigationResolver, &input).unwrap();
        assert_eq!(order.method, OrderMethod::Navigation);
        assert_eq!(order.urls.last().unwrap(), "https://example.com/guide/setup.html");
    }

    #[test]
    fn test_dangling_and_external_targets_dropped() {
        let mut navigation = BTreeMap::new();
        navigation.insert(
            ROOT.to_string(),
            nav(0.7, &[("missing.html", false), ("https://github.com/x", true), ("about.html", false)]),
        );
        let input = OrderInput::new(ROOT, site(), navigation);

        let order = resolve_order(&NavigationResolver, &input).unwrap();
        assert_eq!(order.urls[1], "https://example.com/about.html");
        assert!(!order.urls.iter().any(|u| u.contains("missing") || u.contains("github")));
    }

    #[test]
    fn test_fallback_without_navigation() {
        let input = OrderInput::new(ROOT, site(), BTreeMap::new());
        let order = resolve_order(&NavigationResolver, &input).unwrap();

        assert_eq!(order.method, OrderMethod::Fallback);
        assert_eq!(order.confidence, 0.0);
        assert_eq!(
            order.urls,
            vec![
                "https://example.com/",
                "https://example.com/about.html",
                "https://example.com/guide/",
                "https://example.com/guide/setup.html"
            ]
        );
    }

    #[test]
    fn test_navigation_with_only_root_is_fallback() {
        let mut navigation = BTreeMap::new();
        navigation.insert(ROOT.to_string(), nav(0.9, &[("", false)]));
        let input = OrderInput::new(ROOT, site(), navigation);
        assert_eq!(resolve_order(&NavigationResolver, &input).unwrap().method, OrderMethod::Fallback);
    }

    #[test]
    fn test_highest_confidence_tree_wins_and_ties_prefer_fewer_external() {
        let mut navigation = BTreeMap::new();
        navigation.insert(format!("{}about.html", ROOT), nav(0.5, &[("about.html", false), ("guide/", false)]));
        navigation.insert(format!("{}guide/", ROOT), nav(0.9, &[("guide/setup.html", false), ("https://x.org/", true)]));
        navigation.insert(format!("{}guide/setup.html", ROOT), nav(0.9, &[("guide/", false)]));
        let input = OrderInput::new(ROOT, site(), navigation);

        let order = resolve_order(&NavigationResolver, &input).unwrap();
        assert_eq!(order.urls[1], "https://example.com/guide/");
        assert_eq!(order.confidence, 0.9);
    }

    #[test]
    fn test_url_resolver_is_permutation() {
        let mut navigation = BTreeMap::new();
        navigation.insert(ROOT.to_string(), nav(1.0, &[("about.html", false)]));
        let input = OrderInput::new(ROOT, site(), navigation);
        let order = resolve_order(&UrlOrderResolver, &input).unwrap();
        assert_eq!(order.method, OrderMethod::Fallback);
        assert_eq!(order.urls.len(), 4);
    }

    #[test]
    fn test_contradictory_navigation_still_permutation() {
        let mut navigation = BTreeMap::new();
        navigation.insert(ROOT.to_string(), nav(0.5, &[("about.html", false), ("guide/", false), ("about.html", false)]));
        navigation.insert(format!("{}about.html", ROOT), nav(0.5, &[("guide/", false), ("about.html", false)]));
        let input = OrderInput::new(ROOT, site(), navigation);
        let order = resolve_order(&NavigationResolver, &input).unwrap();
        assert!(verify_permutation(&input, &order).is_ok());
    }

    #[test]
    fn test_root_missing_from_pages() {
        let input = OrderInput::new(ROOT, vec![page("b.html", 1), page("a.html", 1)], BTreeMap::new());
        let order = resolve_order(&NavigationResolver, &input).unwrap();
        assert_eq!(order.urls, vec!["https://example.com/a.html", "https://example.com/b.html"]);
    }

    #[test]
    fn test_duplicate_input_pages_keep_shallowest_depth() {
        let input = OrderInput::new(ROOT, vec![page("", 0), page("a.html", 3), page("a.html", 1)], BTreeMap::new());
        assert_eq!(input.pages.len(), 2);
        assert_eq!(input.pages.iter().find(|p| p.url.ends_with("a.html")).unwrap().depth, 1);
    }

    struct Broken(Vec<&'static str>);

    impl OrderResolver for Broken {
        fn name(&self) -> &'static str {
            "broken"
        }

        fn resolve(&self, _input: &OrderInput) -> Result<DocumentOrder> {
            Ok(DocumentOrder {
                urls: self.0.iter().map(|s| s.to_string()).collect(),
                method: OrderMethod::Fallback,
                confidence: 0.0,
            })
        }
    }

    #[test]
    fn test_invariant_violations_are_fatal() {
        let input = OrderInput::new(ROOT, vec![page("", 0), page("a.html", 1)], BTreeMap::new());

        let dropped = Broken(vec!["https://example.com/"]);
        let duplicated = Broken(vec!["https://example.com/", "https://example.com/", "https://example.com/a.html"]);
        let invented = Broken(vec!["https://example.com/", "https://example.com/a.html", "https://example.com/x"]);

        for resolver in [dropped, duplicated, invented] {
            assert!(matches!(resolve_order(&resolver, &input), Err(SiteweaveError::InternalInvariant(_))));
        }
    }

    #[test]
    fn test_order_strategy_parse() {
        assert_eq!("url".parse::<OrderStrategy>().unwrap(), OrderStrategy::Url);
        assert_eq!(OrderStrategy::default().to_string(), "navigation");
        assert!("ai".parse::<OrderStrategy>().is_err());
    }
}
