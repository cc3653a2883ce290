use owo_colors::OwoColorize;
use siteweave_core::crawl::{CrawlResult, PageOutcome};
use siteweave_core::store::CacheSummary;
use siteweave_core::{ContentBlock, DocumentOrder, NavDetection, PipelineWarning};

use crate::VERSION;

/// Print a styled banner for verbose mode
pub fn print_banner() {
    eprintln!("\n{} {} {}", "siteweave".bold().bright_blue(), "v".dimmed(), VERSION.dimmed());
    eprintln!("{}", "Turn a documentation website into one ordered document\n".dimmed());
}

/// Print a styled step message
pub fn print_step(step: usize, total: usize, message: &str) {
    eprintln!("{} {}", format!("[{}/{}]", step, total).dimmed(), message.bright_cyan());
}

/// Print a success message
pub fn print_success(message: &str) {
    eprintln!("{} {}", "✓".green(), message.bright_green());
}

/// Print an info message
pub fn print_info(message: &str) {
    eprintln!("{} {}", "ℹ".blue(), message.bright_blue());
}

/// Print a warning message
pub fn print_warning(message: &str) {
    eprintln!("{} {}", "⚠".yellow(), message.bright_yellow());
}

/// Format file size for display
pub fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = 1024 * KB;

    if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

/// Print per-outcome counts and every failed url
pub fn print_crawl_summary(result: &CrawlResult) {
    let summary = result.summary();
    eprintln!(
        "  {} {}  {} {}  {} {}  {} {}  {} {}",
        "fetched".dimmed(),
        summary.fetched.to_string().bright_white(),
        "updated".dimmed(),
        summary.updated.to_string().bright_white(),
        "unchanged".dimmed(),
        summary.unchanged.to_string().bright_white(),
        "failed".dimmed(),
        summary.failed.to_string().bright_red(),
        "assets".dimmed(),
        summary.assets.to_string().bright_white(),
    );

    for entry in result.failed() {
        if let PageOutcome::Failed { reason, .. } = &entry.outcome {
            eprintln!("  {} {} {}", "✗".red(), entry.url, reason.dimmed());
        }
    }

    if result.cancelled {
        print_warning("Crawl deadline reached; remaining urls were cancelled");
    }
}

/// Print cached sites as an aligned table
pub fn print_caches(caches: &[CacheSummary]) {
    if caches.is_empty() {
        print_info("No cached sites");
        return;
    }

    let width = caches.iter().map(|c| c.root_url.len()).max().unwrap_or_default();
    for cache in caches {
        println!(
            "{:<width$}  {:>5} pages  {:>9}  {}",
            cache.root_url,
            cache.page_count,
            format_size(cache.total_size),
            cache.last_updated.date(),
            width = width
        );
    }
}

fn confidence_label(confidence: f64) -> String {
    let text = format!("{:.2}", confidence);
    if confidence == 0.0 {
        text.bright_red().to_string()
    } else if confidence < 0.5 {
        text.bright_yellow().to_string()
    } else {
        text.bright_green().to_string()
    }
}

/// Print a detected region with a short text preview
pub fn print_block(block: &ContentBlock) {
    println!("{} {}", "locator:".dimmed(), block.locator);
    println!("{} {}", "confidence:".dimmed(), confidence_label(block.confidence));
    if block.is_fallback() {
        print_warning("No strong candidate; fell back to the page body");
    }

    let preview: String = block.text.chars().take(240).collect();
    if !preview.is_empty() {
        let ellipsis = if block.text.chars().count() > 240 { "…" } else { "" };
        println!("\n{}{}", preview, ellipsis);
    }
}

/// Print a navigation region and its indented link tree
pub fn print_navigation(nav: &NavDetection) {
    println!("{} {}", "locator:".dimmed(), nav.block.locator);
    println!("{} {}", "confidence:".dimmed(), confidence_label(nav.confidence()));
    println!();

    for node in nav.tree.iter() {
        let indent = "  ".repeat(node.depth);
        if node.external {
            println!("{}- {} {} {}", indent, node.label, node.target.dimmed(), "(external)".yellow());
        } else {
            println!("{}- {} {}", indent, node.label, node.target.dimmed());
        }
    }
}

/// Print a reading order, one numbered url per line
pub fn print_order(order: &DocumentOrder) {
    eprintln!(
        "  {} {}  {} {}",
        "method".dimmed(),
        order.method.to_string().bright_white(),
        "confidence".dimmed(),
        confidence_label(order.confidence)
    );
    let width = order.urls.len().to_string().len();
    for (i, url) in order.urls.iter().enumerate() {
        println!("{:>width$}. {}", i + 1, url, width = width);
    }
}

/// Print pipeline warnings, ambiguous detections only with verbose output
pub fn print_warnings(warnings: &[PipelineWarning], verbose: bool) {
    let mut ambiguous = 0;
    for warning in warnings {
        match warning {
            PipelineWarning::AmbiguousDetection { .. } if !verbose => ambiguous += 1,
            _ => print_warning(&warning.to_string()),
        }
    }
    if ambiguous > 0 {
        print_info(&format!("{} ambiguous detections (use -v to list them)", ambiguous));
    }
}
