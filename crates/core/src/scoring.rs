use std::sync::LazyLock;

use regex::Regex;

use crate::parse::Element;

/// Class/id tokens that suggest an element holds the main content
static POSITIVE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(article|body|content|entry|hentry|h-entry|main|page|post|text|blog|story|markdown|prose|doc)")
        .expect("positive pattern is valid")
});

/// Class/id tokens that suggest an element is chrome around the content
static NEGATIVE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(banner|breadcrumbs?|combx|comment|community|disqus|extra|foot|header|menu|nav|toc|related|remark|rss|shoutbox|sidebar|sponsor|ad-break|agegate|pagination|pager|popup|share|social)")
        .expect("negative pattern is valid")
});

/// Class/id tokens that suggest a navigation region
static NAV_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(nav|menu|toc|sidebar|sitemap|breadcrumb|table-of-contents|summary|chapters?)")
        .expect("nav pattern is valid")
});

/// Class/id tokens for link-heavy regions that are not site navigation
static NAV_NEGATIVE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(foot|comment|share|social|sponsor|ad-|related|pagination|pager|tags?)")
        .expect("nav negative pattern is valid")
});

/// Configuration for the scoring functions
#[derive(Debug, Clone)]
pub struct ScoreConfig {
    /// Weight for positive class/ID patterns
    pub positive_weight: f64,
    /// Weight for negative class/ID patterns
    pub negative_weight: f64,
    /// Maximum content density score from character count
    pub max_char_density_score: f64,
    /// Characters per point for content density scoring
    pub chars_per_point: usize,
    /// Multiplier for the visible text to markup ratio
    pub text_density_weight: f64,
    /// Points per descendant paragraph
    pub paragraph_weight: f64,
    /// Maximum paragraph score
    pub max_paragraph_score: f64,
    /// Elements at or above this depth are considered whole-page wrappers
    pub shallow_depth: usize,
    /// Penalty applied to whole-page wrappers
    pub shallow_penalty: f64,
    /// Elements deeper than this are penalized per extra level
    pub deep_depth: usize,
    /// Penalty per level beyond `deep_depth`
    pub deep_penalty_per_level: f64,
    /// Lowest content score a candidate needs to be considered at all
    pub min_content_score: f64,
    /// Weight for navigation class/ID patterns
    pub nav_pattern_weight: f64,
    /// Multiplier for link density in navigation scoring
    pub link_density_weight: f64,
    /// Points per link in navigation scoring
    pub link_count_weight: f64,
    /// Maximum link count score
    pub max_link_count_score: f64,
    /// Fewest links a navigation candidate must hold
    pub min_nav_links: usize,
    /// Lowest navigation score a candidate needs to be considered at all
    pub min_nav_score: f64,
}

impl Default for ScoreConfig {
    fn default() -> Self {
        Self {
            positive_weight: 25.0,
            negative_weight: -25.0,
            max_char_density_score: 3.0,
            chars_per_point: 100,
            text_density_weight: 5.0,
            paragraph_weight: 1.0,
            max_paragraph_score: 5.0,
            shallow_depth: 2,
            shallow_penalty: 3.0,
            deep_depth: 12,
            deep_penalty_per_level: 1.0,
            min_content_score: 5.0,
            nav_pattern_weight: 10.0,
            link_density_weight: 10.0,
            link_count_weight: 0.5,
            max_link_count_score: 10.0,
            min_nav_links: 2,
            min_nav_score: 10.0,
        }
    }
}

/// Result of scoring an element
#[derive(Debug, Clone)]
pub struct ScoreResult {
    /// The element's tag name
    pub tag_name: String,
    /// Score from tag and landmark role
    pub base_score: f64,
    /// Weight adjustment from class/ID patterns
    pub class_weight: f64,
    /// Text or link volume term
    pub density: f64,
    /// Structural term (paragraphs for content, list shape for navigation)
    pub structure: f64,
    /// Depth penalty (already subtracted from the final score)
    pub depth_penalty: f64,
    /// Link density (0.0 to 1.0)
    pub link_density: f64,
    /// Final calculated score
    pub final_score: f64,
}

/// Calculate the base content score for an element from its tag and role
///
/// - MAIN or role=main: +12
/// - ARTICLE: +10
/// - SECTION: +8
/// - DIV: +5
/// - TD, BLOCKQUOTE: +3
/// - FORM, list elements: -3
/// - headings, HEADER, FOOTER, NAV, ASIDE: -5
pub fn base_tag_score(element: &Element<'_>) -> f64 {
    if element.attr("role").is_some_and(|r| r.eq_ignore_ascii_case("main")) {
        return 12.0;
    }

    match element.tag_name().as_str() {
        "main" => 12.0,
        "article" => 10.0,
        "section" => 8.0,
        "div" => 5.0,
        "td" | "blockquote" => 3.0,
        "form" | "address" | "ol" | "ul" | "dl" | "dd" | "dt" | "li" => -3.0,
        "h1" | "h2" | "h3" | "h4" | "h5" | "h6" | "th" | "header" | "footer" | "nav" | "aside" => -5.0,
        _ => 0.0,
    }
}

/// Calculate the base navigation score for an element from its tag and role
pub fn nav_tag_score(element: &Element<'_>) -> f64 {
    if element.attr("role").is_some_and(|r| r.eq_ignore_ascii_case("navigation")) {
        return 15.0;
    }

    match element.tag_name().as_str() {
        "nav" => 15.0,
        "aside" => 5.0,
        "ul" | "ol" => 3.0,
        "header" => 1.0,
        "footer" => -5.0,
        "main" | "article" | "p" => -10.0,
        _ => 0.0,
    }
}

fn pattern_weight(element: &Element<'_>, positive: &Regex, negative: &Regex, pos: f64, neg: f64) -> f64 {
    if let Some(id) = element.attr("id") {
        if positive.is_match(id) {
            return pos;
        }
        if negative.is_match(id) {
            return neg;
        }
    }

    for class_name in element.classes() {
        if positive.is_match(class_name) {
            return pos;
        }
        if negative.is_match(class_name) {
            return neg;
        }
    }

    0.0
}

/// Calculate the class/ID weight adjustment for content scoring
///
/// Returns +positive_weight if the element's class or ID matches positive patterns,
/// or negative_weight if it matches negative patterns (but not positive).
pub fn class_id_weight(element: &Element<'_>, config: &ScoreConfig) -> f64 {
    pattern_weight(element, &POSITIVE_PATTERN, &NEGATIVE_PATTERN, config.positive_weight, config.negative_weight)
}

/// Calculate the class/ID weight adjustment for navigation scoring
pub fn nav_class_weight(element: &Element<'_>, config: &ScoreConfig) -> f64 {
    pattern_weight(element, &NAV_PATTERN, &NAV_NEGATIVE_PATTERN, config.nav_pattern_weight, -config.nav_pattern_weight)
}

/// Score from visible text volume and the text to markup ratio
pub fn content_density_score(element: &Element<'_>, config: &ScoreConfig) -> f64 {
    let text_length = element.visible_text().chars().count();
    let char_score = ((text_length / config.chars_per_point) as f64).min(config.max_char_density_score);

    char_score + text_density(element) * config.text_density_weight
}

/// Ratio of visible text characters to markup characters, from 0.0 to 1.0
pub fn text_density(element: &Element<'_>) -> f64 {
    let html_length = element.outer_html().chars().count();
    if html_length == 0 {
        return 0.0;
    }
    (element.visible_text().chars().count() as f64 / html_length as f64).min(1.0)
}

/// Calculate the link density of an element
///
/// Link density is the ratio of link text characters to total text characters.
/// Returns a value from 0.0 (no links) to 1.0 (all text is in links).
pub fn link_density(element: &Element<'_>) -> f64 {
    let text_length = element.visible_text().chars().count();

    if text_length == 0 {
        return 0.0;
    }

    let link_text_length = element
        .select("a")
        .unwrap_or_default()
        .iter()
        .map(|link| link.visible_text().chars().count())
        .sum::<usize>();

    (link_text_length as f64 / text_length as f64).min(1.0)
}

/// Penalty for whole-page wrappers and single-sentence leaves
pub fn depth_penalty(element: &Element<'_>, config: &ScoreConfig) -> f64 {
    let depth = element.depth();
    if depth <= config.shallow_depth {
        config.shallow_penalty
    } else if depth > config.deep_depth {
        (depth - config.deep_depth) as f64 * config.deep_penalty_per_level
    } else {
        0.0
    }
}

/// Calculate the main content score for an element
///
/// `(base + class weight + density + paragraphs - depth penalty) * link penalty`,
/// where the link penalty is `1 - link density`, halved for elements whose
/// class or id already says they are content. Negative raw scores are left
/// as they are so link-heavy chrome never climbs towards zero.
pub fn content_score(element: &Element<'_>, config: &ScoreConfig) -> ScoreResult {
    let tag_name = element.tag_name();
    let base_score = base_tag_score(element);
    let class_weight = class_id_weight(element, config);
    let density = content_density_score(element, config);
    let paragraphs = element.select("p").map(|p| p.len()).unwrap_or_default();
    let structure = (paragraphs as f64 * config.paragraph_weight).min(config.max_paragraph_score);
    let depth_penalty = depth_penalty(element, config);
    let ld = link_density(element);

    let raw_score = base_score + class_weight + density + structure - depth_penalty;
    let link_penalty = if class_weight > 0.0 { 1.0 - (ld * 0.5) } else { 1.0 - ld };

    ScoreResult {
        tag_name,
        base_score,
        class_weight,
        density,
        structure,
        depth_penalty,
        link_density: ld,
        final_score: if raw_score > 0.0 { raw_score * link_penalty } else { raw_score },
    }
}

/// Calculate the navigation score for an element
///
/// `base + class weight + link density term + link count term + list shape - depth penalty`.
/// Elements with fewer than `min_nav_links` links score `f64::NEG_INFINITY`.
pub fn nav_score(element: &Element<'_>, config: &ScoreConfig) -> ScoreResult {
    let tag_name = element.tag_name();
    let link_count = element.select("a[href]").map(|links| links.len()).unwrap_or_default();
    let ld = link_density(element);

    if link_count < config.min_nav_links {
        return ScoreResult {
            tag_name,
            base_score: 0.0,
            class_weight: 0.0,
            density: 0.0,
            structure: 0.0,
            depth_penalty: 0.0,
            link_density: ld,
            final_score: f64::NEG_INFINITY,
        };
    }

    let base_score = nav_tag_score(element);
    let class_weight = nav_class_weight(element, config);
    let density = ld * config.link_density_weight
        + (link_count as f64 * config.link_count_weight).min(config.max_link_count_score);

    let items = element.select("li").map(|items| items.len()).unwrap_or_default();
    let nested = element.select("li ul, li ol").map(|lists| !lists.is_empty()).unwrap_or_default();
    let structure = if items >= 2 { 3.0 } else { 0.0 } + if nested { 2.0 } else { 0.0 };

    let depth_penalty = depth_penalty(element, config);
    let final_score = base_score + class_weight + density + structure - depth_penalty;

    ScoreResult { tag_name, base_score, class_weight, density, structure, depth_penalty, link_density: ld, final_score }
}

/// Normalize the winning score against its rivals into a confidence in [0, 1].
///
/// `rivals` should only hold scores of candidates that do not overlap the
/// winner (neither ancestors nor descendants), otherwise a wrapper around
/// the winner would look like real competition.
///
/// The result is the mean of two terms:
/// - margin: `(best - runner_up) / best`, with a negative runner-up treated as 0
/// - share: `best / (best + sum of positive rival scores)`
///
/// A non-positive or non-finite best score has confidence 0.
pub fn confidence(best: f64, rivals: &[f64]) -> f64 {
    if !best.is_finite() || best <= 0.0 {
        return 0.0;
    }

    let positive: Vec<f64> = rivals.iter().copied().filter(|s| s.is_finite() && *s > 0.0).collect();
    let runner_up = positive.iter().copied().fold(0.0_f64, f64::max).min(best);
    let margin = (best - runner_up) / best;
    let share = best / (best + positive.iter().sum::<f64>());

    ((margin + share) / 2.0).clamp(0.0, 1.0)
}
