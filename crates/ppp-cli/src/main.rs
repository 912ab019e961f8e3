use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use ppp_pipeline::{PipelineConfig, ProfilePipeline, RunReport};
use ppp_web::{report_line, ProfileView};
use tracing::warn;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Debug, Parser)]
#[command(name = "ppp")]
#[command(about = "Personal Prospect Profiler: build a profile of a person from public sources")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Build a profile for a name, profile URL or short description.
    Profile {
        query: String,
        /// Print the run as JSON instead of text.
        #[arg(long)]
        json: bool,
        /// Local text file to use as an extra source; repeatable.
        #[arg(long = "manual", value_name = "PATH")]
        manual: Vec<PathBuf>,
    },
    /// Serve the web UI and JSON API.
    Serve {
        #[arg(long)]
        port: Option<u16>,
    },
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("ppp=info,warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().compact().with_writer(std::io::stderr))
        .init();
}

fn render_text(view: &ProfileView, report: &RunReport) -> String {
    let mut lines = vec![view.name.clone()];
    if !view.headline.is_empty() {
        lines.push(view.headline.clone());
    }
    lines.extend(view.facts.iter().map(|f| format!("{}: {}", f.label, f.value)));

    for group in &view.entries {
        lines.push(String::new());
        lines.push(group.title.clone());
        for entry in &group.entries {
            lines.push(format!("  - {}", entry.heading));
            if !entry.detail.is_empty() {
                lines.push(format!("    {}", entry.detail));
            }
        }
    }

    if !view.lists.is_empty() {
        lines.push(String::new());
        lines.extend(
            view.lists
                .iter()
                .map(|list| format!("{}: {}", list.title, list.items.join(", "))),
        );
    }

    if !view.links.is_empty() {
        lines.push(String::new());
        lines.push("Online presence".to_string());
        lines.extend(view.links.iter().map(|l| format!("  {}: {}", l.label, l.url)));
    }

    for timeline in &view.timelines {
        lines.push(String::new());
        lines.push(timeline.title.clone());
        for event in &timeline.events {
            let mut line = format!("  {}  {}", event.date, event.title);
            if !event.description.is_empty() {
                line.push_str(": ");
                line.push_str(&event.description);
            }
            lines.push(line);
        }
    }

    lines.push(String::new());
    lines.push("Sources".to_string());
    lines.extend(view.sources.iter().map(|s| format!("  - {s}")));
    lines.push(report_line(report));
    lines.join("\n")
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let _ = dotenvy::dotenv();
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Commands::Profile { query, json, manual } => {
            let config = PipelineConfig {
                manual_sources: manual,
                ..PipelineConfig::from_env()
            };
            let outcome = match ProfilePipeline::from_config(&config) {
                Ok(pipeline) => pipeline.run(&query).await,
                Err(err) => Err(err),
            };
            match outcome {
                Ok(run) if json => {
                    println!(
                        "{}",
                        serde_json::to_string_pretty(&run).context("serializing profile run")?
                    );
                }
                Ok(run) => {
                    let view = ProfileView::from_profile(&run.profile, &run.query);
                    println!("{}", render_text(&view, &run.report));
                }
                Err(err) => {
                    warn!(error = %err, "profile run failed");
                    eprintln!("{}", err.user_message());
                    return Ok(ExitCode::FAILURE);
                }
            }
        }
        Commands::Serve { port } => {
            let pipeline = ProfilePipeline::from_env().context("configuring profile pipeline")?;
            let port = port.unwrap_or_else(ppp_web::port_from_env);
            ppp_web::serve(Arc::new(pipeline), port).await?;
        }
    }

    Ok(ExitCode::SUCCESS)
}
