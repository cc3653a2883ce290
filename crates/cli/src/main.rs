use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use owo_colors::OwoColorize;
use siteweave_core::crawl::Crawler;
use siteweave_core::store::{PageStore, list_caches};
use siteweave_core::{
    DetectStrategy, Document, HttpTransport, OrderStrategy, Pipeline, PipelineOptions, PipelineResult, RenderConfig,
    Scope, Settings, detector_for, render_result, urls,
};

mod echo;
mod logging;

use echo::{
    print_banner, print_block, print_caches, print_crawl_summary, print_info, print_navigation, print_order,
    print_step, print_success, print_warnings,
};

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Crawl a documentation site, find each page's content and navigation,
/// and stitch the pages into one document in reading order
#[derive(Parser, Debug)]
#[command(name = "siteweave")]
#[command(version)]
#[command(about = "Turn a documentation website into one ordered markdown document", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Base directory holding one cache per site
    #[arg(long, global = true, value_name = "DIR")]
    cache_dir: Option<PathBuf>,

    /// Settings file (default: <config dir>/siteweave/config.toml)
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Maximum fetches in flight
    #[arg(long, global = true, value_name = "NUM")]
    concurrency: Option<usize>,

    /// Per-fetch timeout in seconds
    #[arg(long, global = true, value_name = "SECS")]
    timeout: Option<u64>,

    /// Detections at or below this confidence fall back to the page body
    #[arg(long, global = true, value_name = "SCORE")]
    min_confidence: Option<f64>,

    /// Detection strategy (heuristic, landmark)
    #[arg(long, global = true, value_name = "NAME")]
    detector: Option<DetectStrategy>,

    /// Ordering strategy (navigation, url)
    #[arg(long, global = true, value_name = "NAME")]
    order: Option<OrderStrategy>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Only log errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Crawl a site into the cache, re-fetching only what changed
    Fetch {
        /// Root url of the site
        url: String,

        /// Link-following depth (default: from settings)
        #[arg(short, long, value_name = "N")]
        depth: Option<usize>,

        /// Re-request every page regardless of age
        #[arg(long)]
        force: bool,

        /// Print the crawl result as JSON
        #[arg(long)]
        json: bool,
    },

    /// List cached sites
    List {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Run a detector on a local file, or resolve the order of a cached site
    Detect {
        #[command(subcommand)]
        target: DetectTarget,
    },

    /// Render a cached site as one markdown document
    Build {
        /// Root url of a cached site
        url: String,

        #[command(flatten)]
        output: OutputArgs,
    },

    /// Fetch, detect, order and build in one go
    Auto {
        /// Root url of the site
        url: String,

        /// Link-following depth (default: from settings)
        #[arg(short, long, value_name = "N")]
        depth: Option<usize>,

        /// Re-request every page regardless of age
        #[arg(long)]
        force: bool,

        #[command(flatten)]
        output: OutputArgs,
    },
}

#[derive(Subcommand, Debug)]
enum DetectTarget {
    /// Locate the main content region of an HTML file
    Main {
        file: PathBuf,

        /// Url the file was fetched from, for resolving links
        #[arg(long, value_name = "URL")]
        url: Option<String>,

        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Locate the navigation region of an HTML file and print its tree
    Nav {
        file: PathBuf,

        /// Url the file was fetched from, for resolving links
        #[arg(long, value_name = "URL")]
        url: Option<String>,

        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Resolve the reading order of a cached site
    Order {
        /// Root url of a cached site
        url: String,

        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(clap::Args, Debug)]
struct OutputArgs {
    /// Output file (default: stdout)
    #[arg(short, long, value_name = "FILE")]
    output: Option<PathBuf>,

    /// Include TOML frontmatter
    #[arg(long)]
    frontmatter: bool,

    /// Emit a comment with the source url before each page
    #[arg(long)]
    source_comments: bool,

    /// Strip images from output
    #[arg(long)]
    no_images: bool,
}

impl OutputArgs {
    fn render_config(&self) -> RenderConfig {
        RenderConfig {
            include_frontmatter: self.frontmatter,
            source_comments: self.source_comments,
            title_headings: true,
            strip_images: self.no_images,
        }
    }
}

/// Settings from file and environment, with command-line flags applied last
fn load_settings(cli: &Cli) -> anyhow::Result<Settings> {
    let mut settings = Settings::load(cli.config.as_deref()).context("Failed to load settings")?;

    if let Some(dir) = &cli.cache_dir {
        settings.cache_dir = dir.clone();
    }
    if let Some(concurrency) = cli.concurrency {
        settings.concurrency = concurrency;
    }
    if let Some(timeout) = cli.timeout {
        settings.fetch_timeout_secs = timeout;
    }
    if let Some(min_confidence) = cli.min_confidence {
        settings.min_confidence = min_confidence;
    }
    if let Some(detector) = cli.detector {
        settings.detector = detector;
    }
    if let Some(order) = cli.order {
        settings.order = order;
    }

    settings.validate().context("Invalid settings")?;
    Ok(settings)
}

fn http_pipeline(settings: Settings) -> anyhow::Result<Pipeline> {
    let transport = HttpTransport::new(&settings.fetch_config()).context("Failed to create HTTP client")?;
    Ok(Pipeline::new(settings, Arc::new(transport)))
}

fn write_output(path: Option<&Path>, content: &str) -> anyhow::Result<()> {
    match path {
        Some(path) => {
            fs::write(path, content).with_context(|| format!("Failed to write to file: {}", path.display()))?;
            print_success(&format!("Output written to {}", path.display().bright_white()));
        }
        None => print!("{}", content),
    }
    Ok(())
}

fn read_document(file: &Path, url: Option<&str>) -> anyhow::Result<Document> {
    let bytes = fs::read(file).with_context(|| format!("Failed to read file: {}", file.display()))?;
    let url = url.map(urls::parse_root).transpose().context("Invalid --url")?;
    Document::from_bytes(&bytes, None, url).with_context(|| format!("Failed to parse {}", file.display()))
}

async fn fetch(settings: Settings, url: &str, depth: Option<usize>, force: bool, json: bool) -> anyhow::Result<()> {
    let root = urls::parse_root(url)?;
    let store = Arc::new(PageStore::open_in(&settings.cache_dir, &root).context("Failed to open cache")?);
    let transport = HttpTransport::new(&settings.fetch_config()).context("Failed to create HTTP client")?;
    let crawler = Crawler::new(Arc::clone(&store), Arc::new(transport), settings.crawl_config());

    print_step(1, 1, &format!("Crawling {}", root.as_str().bright_white().underline()));
    let result = crawler.crawl(root.as_str(), depth.unwrap_or(settings.max_depth), force).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        print_crawl_summary(&result);
        print_success(&format!("Cache at {}", store.dir().display()));
    }
    Ok(())
}

fn list(settings: &Settings, json: bool) -> anyhow::Result<()> {
    let caches = list_caches(&settings.cache_dir).context("Failed to list caches")?;
    if json {
        println!("{}", serde_json::to_string_pretty(&caches)?);
    } else {
        print_caches(&caches);
    }
    Ok(())
}

async fn detect(settings: Settings, target: DetectTarget, verbose: bool) -> anyhow::Result<()> {
    match target {
        DetectTarget::Main { file, url, json } => {
            let doc = read_document(&file, url.as_deref())?;
            let block = detector_for(&settings.detect_config()).detect_main(&doc);
            if json {
                println!("{}", serde_json::to_string_pretty(&block)?);
            } else {
                print_block(&block);
            }
        }
        DetectTarget::Nav { file, url, json } => {
            let doc = read_document(&file, url.as_deref())?;
            let scope = doc.url().map(Scope::new);
            let nav = detector_for(&settings.detect_config()).detect_nav(&doc, scope.as_ref());
            if json {
                println!("{}", serde_json::to_string_pretty(&nav)?);
            } else {
                print_navigation(&nav);
            }
        }
        DetectTarget::Order { url, json } => {
            let result = http_pipeline(settings)?.run_cached(&url).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&result.order)?);
            } else {
                print_order(&result.order);
                print_warnings(&result.warnings, verbose);
            }
        }
    }
    Ok(())
}

fn build(result: &PipelineResult, output: &OutputArgs, verbose: bool) -> anyhow::Result<()> {
    print_warnings(&result.warnings, verbose);
    let markdown = render_result(result, &output.render_config()).context("Failed to render markdown")?;
    write_output(output.output.as_deref(), &markdown)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::initialize_logging(cli.verbose, cli.quiet)?;

    if cli.verbose {
        print_banner();
        print_info("Debug logging enabled");
    }

    let settings = load_settings(&cli)?;
    let verbose = cli.verbose;

    match cli.command {
        Command::Fetch { url, depth, force, json } => fetch(settings, &url, depth, force, json).await,
        Command::List { json } => list(&settings, json),
        Command::Detect { target } => detect(settings, target, verbose).await,
        Command::Build { url, output } => {
            let result = http_pipeline(settings)?.run_cached(&url).await?;
            build(&result, &output, verbose)
        }
        Command::Auto { url, depth, force, output } => {
            let pipeline = http_pipeline(settings)?;
            print_step(1, 2, &format!("Crawling and analyzing {}", url.bright_white().underline()));
            let result = pipeline.run(&url, PipelineOptions { max_depth: depth, force_refresh: force }).await?;
            print_crawl_summary(&result.crawl);
            print_info(&format!(
                "{} pages ordered by {} (confidence {:.2})",
                result.order.urls.len(),
                result.order.method,
                result.order.confidence
            ));

            print_step(2, 2, "Rendering markdown");
            build(&result, &output, verbose)
        }
    }
}
