use std::{env, fs, path::PathBuf};

fn output_args(cmd: clap::Command) -> clap::Command {
    cmd.arg(
        clap::arg!(-o --output <FILE> "Output file (default: stdout)")
            .value_name("FILE")
            .value_parser(clap::value_parser!(std::path::PathBuf)),
    )
    .arg(clap::arg!(--frontmatter "Include TOML frontmatter"))
    .arg(clap::arg!(--source_comments "Emit a comment with the source url before each page"))
    .arg(clap::arg!(--no_images "Strip images from output"))
}

fn crawl_args(cmd: clap::Command) -> clap::Command {
    cmd.arg(clap::arg!(-d --depth <N> "Link-following depth (default: from settings)"))
        .arg(clap::arg!(--force "Re-request every page regardless of age"))
}

fn file_detect(name: &'static str, about: &'static str) -> clap::Command {
    clap::Command::new(name)
        .about(about)
        .arg(clap::arg!(<FILE> "HTML file").value_parser(clap::value_parser!(std::path::PathBuf)))
        .arg(clap::arg!(--url <URL> "Url the file was fetched from, for resolving links"))
        .arg(clap::arg!(--json "Print as JSON"))
}

fn main() {
    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rerun-if-env-changed=OUT_DIR");

    let out_dir = PathBuf::from(env::var("OUT_DIR").unwrap());
    let completions_dir = out_dir.join("completions");

    fs::create_dir_all(&completions_dir).unwrap();

    let mut cmd = clap::Command::new("siteweave")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Turn a documentation website into one ordered markdown document")
        .arg(
            clap::arg!(--cache_dir <DIR> "Base directory holding one cache per site")
                .global(true)
                .value_parser(clap::value_parser!(std::path::PathBuf)),
        )
        .arg(
            clap::arg!(--config <FILE> "Settings file")
                .global(true)
                .value_parser(clap::value_parser!(std::path::PathBuf)),
        )
        .arg(clap::arg!(--concurrency <NUM> "Maximum fetches in flight").global(true))
        .arg(clap::arg!(--timeout <SECS> "Per-fetch timeout in seconds").global(true))
        .arg(clap::arg!(--min_confidence <SCORE> "Confidence floor for detections").global(true))
        .arg(
            clap::arg!(--detector <NAME> "Detection strategy")
                .global(true)
                .value_parser(["heuristic", "landmark"]),
        )
        .arg(
            clap::arg!(--order <NAME> "Ordering strategy")
                .global(true)
                .value_parser(["navigation", "url"]),
        )
        .arg(clap::arg!(-v --verbose "Enable debug logging").global(true))
        .arg(clap::arg!(-q --quiet "Only log errors").global(true))
        .subcommand(crawl_args(
            clap::Command::new("fetch")
                .about("Crawl a site into the cache, re-fetching only what changed")
                .arg(clap::arg!(<URL> "Root url of the site"))
                .arg(clap::arg!(--json "Print the crawl result as JSON")),
        ))
        .subcommand(clap::Command::new("list").about("List cached sites").arg(clap::arg!(--json "Print as JSON")))
        .subcommand(
            clap::Command::new("detect")
                .about("Run a detector on a local file, or resolve the order of a cached site")
                .subcommand(file_detect("main", "Locate the main content region of an HTML file"))
                .subcommand(file_detect("nav", "Locate the navigation region of an HTML file and print its tree"))
                .subcommand(
                    clap::Command::new("order")
                        .about("Resolve the reading order of a cached site")
                        .arg(clap::arg!(<URL> "Root url of a cached site"))
                        .arg(clap::arg!(--json "Print as JSON")),
                ),
        )
        .subcommand(output_args(
            clap::Command::new("build")
                .about("Render a cached site as one markdown document")
                .arg(clap::arg!(<URL> "Root url of a cached site")),
        ))
        .subcommand(output_args(crawl_args(
            clap::Command::new("auto")
                .about("Fetch, detect, order and build in one go")
                .arg(clap::arg!(<URL> "Root url of the site")),
        )));

    clap_complete::generate_to(clap_complete::shells::Bash, &mut cmd, "siteweave", &completions_dir).unwrap();
    clap_complete::generate_to(clap_complete::shells::Zsh, &mut cmd, "siteweave", &completions_dir).unwrap();
    clap_complete::generate_to(clap_complete::shells::Fish, &mut cmd, "siteweave", &completions_dir).unwrap();
    clap_complete::generate_to(clap_complete::shells::PowerShell, &mut cmd, "siteweave", &completions_dir).unwrap();

    println!(
        "cargo:warning=Shell completions generated in: {}",
        completions_dir.display()
    );
}
