//! CLI binary for validating sitemaps and processing requests against them.

use std::io::Write;
use std::path::Path;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use sitemap_engine::{
    Environment, NodeConfig, RequestEnvironment, Severity, SitemapConfig, TreeProcessor,
};

#[derive(Parser)]
#[command(name = "sitemap", version, about = "Routing tree interpreter for pipeline sitemaps")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a sitemap descriptor
    Validate {
        /// Path to the sitemap .json file
        sitemap: PathBuf,
    },

    /// Show information about a sitemap
    Info {
        /// Path to the sitemap .json file
        sitemap: PathBuf,
    },

    /// Process one request and write the response body to stdout
    Process {
        /// Path to the sitemap .json file
        sitemap: PathBuf,

        /// Request URI, relative to the sitemap (e.g. "hello.html")
        uri: String,

        /// Requested view
        #[arg(long)]
        view: Option<String>,

        /// Request parameter as name=value (repeatable)
        #[arg(short, long = "param", value_parser = parse_param)]
        params: Vec<(String, String)>,
    },
}

fn parse_param(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .ok_or_else(|| format!("expected name=value, got '{raw}'"))
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr; stdout carries the response body.
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Validate { sitemap } => {
            cmd_validate(&sitemap)?;
        }
        Commands::Info { sitemap } => {
            cmd_info(&sitemap)?;
        }
        Commands::Process {
            sitemap,
            uri,
            view,
            params,
        } => {
            cmd_process(&sitemap, &uri, view, params)?;
        }
    }

    Ok(())
}

fn load_sitemap(path: &Path) -> anyhow::Result<SitemapConfig> {
    Ok(SitemapConfig::from_file(path)?)
}

fn cmd_validate(path: &Path) -> anyhow::Result<()> {
    let config = load_sitemap(path)?;
    let diagnostics = sitemap_engine::validate(&config);

    if diagnostics.is_empty() {
        println!("Sitemap is valid");
        return Ok(());
    }

    let mut has_error = false;
    for diag in &diagnostics {
        let severity = match diag.severity {
            Severity::Error => {
                has_error = true;
                "ERROR"
            }
            Severity::Warning => "WARN",
            Severity::Info => "INFO",
        };
        match &diag.location {
            Some(location) => println!("[{}] {} at {}: {}", severity, diag.rule, location, diag.message),
            None => println!("[{}] {}: {}", severity, diag.rule, diag.message),
        }
        if let Some(fix) = &diag.fix {
            println!("        fix: {}", fix);
        }
    }

    if has_error {
        std::process::exit(1);
    }
    Ok(())
}

fn count_nodes(nodes: &[NodeConfig]) -> usize {
    nodes
        .iter()
        .map(|n| 1 + n.child_sequences().into_iter().map(count_nodes).sum::<usize>())
        .sum()
}

fn cmd_info(path: &Path) -> anyhow::Result<()> {
    let config = load_sitemap(path)?;

    println!("Sitemap: {}", path.display());
    println!("Pipelines: {}", config.pipelines.len());
    println!("Resources: {}", config.resources.len());
    println!("Views: {}", config.views.len());

    println!("\nPipelines:");
    for (i, p) in config.pipelines.iter().enumerate() {
        let handlers: Vec<&str> = p
            .handle_errors
            .iter()
            .map(|h| match h.kind {
                Some(sitemap_engine::config::ErrorHandlerType::NotFound) => "404",
                Some(sitemap_engine::config::ErrorHandlerType::ServerError) => "500",
                None => "generic",
            })
            .collect();
        println!(
            "  [{}] type={} internal_only={} nodes={} handlers=[{}]",
            i,
            p.kind,
            p.internal_only,
            count_nodes(&p.children),
            handlers.join(", ")
        );
    }

    if !config.resources.is_empty() {
        println!("\nResources:");
        for r in &config.resources {
            println!("  {} nodes={}", r.name, count_nodes(&r.children));
        }
    }

    if !config.views.is_empty() {
        println!("\nViews:");
        for v in &config.views {
            let from = match (&v.from_label, v.from_position) {
                (Some(label), _) => format!("label={label}"),
                (None, Some(position)) => format!("position={position:?}").to_lowercase(),
                (None, None) => "(none)".to_string(),
            };
            println!("  {} {}", v.name, from);
        }
    }

    Ok(())
}

fn cmd_process(
    path: &Path,
    uri: &str,
    view: Option<String>,
    params: Vec<(String, String)>,
) -> anyhow::Result<()> {
    let processor = TreeProcessor::from_file(path)?;
    tracing::debug!(sitemap = %path.display(), uri = %uri, "Sitemap loaded");

    let mut env = RequestEnvironment::new(uri);
    if let Some(view) = view {
        env = env.with_view(view);
    }
    for (name, value) in params {
        env = env.with_parameter(name, value);
    }

    let handled = processor.process(&mut env)?;
    if !handled {
        anyhow::bail!("No pipeline handled '{}'", uri);
    }

    std::io::stdout().write_all(env.body())?;
    if let Some(status) = env.status() {
        eprintln!("Status: {}", status);
    }
    if let Some(content_type) = env.content_type() {
        eprintln!("Content-Type: {}", content_type);
    }
    for redirect in env.redirects() {
        eprintln!("Redirect ({:?}): {}", redirect.kind, redirect.uri);
    }
    if let Some(record) = env.object_model().notifying() {
        eprintln!("Error handled: {} ({})", record.title, record.message);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_param_splits_on_first_equals() {
        assert_eq!(parse_param("a=b=c").unwrap(), ("a".to_string(), "b=c".to_string()));
        assert!(parse_param("novalue").is_err());
    }

    #[test]
    fn count_nodes_includes_nested() {
        let config = SitemapConfig::from_json(
            r#"{ "pipelines": [{ "children": [
                { "node": "match", "pattern": "a", "children": [
                    { "node": "generate", "src": "a.xml" },
                    { "node": "serialize" }
                ]}
            ]}]}"#,
        )
        .unwrap();
        assert_eq!(count_nodes(&config.pipelines[0].children), 3);
    }
}
