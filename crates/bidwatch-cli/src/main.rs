use std::path::PathBuf;

use anyhow::{Context, Result};
use bidwatch_core::PortalId;
use bidwatch_pipeline::{Pipeline, PipelineConfig, PortalRegistry, PortalRunState, RunSummary};
use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "bidwatch")]
#[command(about = "State procurement opportunity finder")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Scrape the configured portals and write the snapshot.
    Run {
        /// Only the fast-subset portals.
        #[arg(long)]
        quick: bool,
        /// Restrict the run to specific portals (repeatable), e.g. --portal NJ.
        #[arg(long = "portal", value_name = "ABBREV")]
        portals: Vec<PortalId>,
        /// Override the snapshot path.
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// List the portal registry.
    Portals,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();

    match cli.command.unwrap_or(Commands::Run {
        quick: false,
        portals: Vec::new(),
        output: None,
    }) {
        Commands::Run {
            quick,
            portals,
            output,
        } => run(quick, portals, output).await,
        Commands::Portals => list_portals().await,
    }
}

async fn run(quick: bool, portals: Vec<PortalId>, output: Option<PathBuf>) -> Result<()> {
    let mut config = PipelineConfig::from_env();
    if let Some(output) = output {
        config.output_path = output;
    }

    let registry = PortalRegistry::load(&config.registry_path)
        .await
        .context("loading portal registry")?;
    let selected = registry.select(quick, &portals);
    if selected.is_empty() {
        anyhow::bail!("no portals selected; check portals.yaml or --portal arguments");
    }

    // Startup faults (renderer session, registry, sink) are fatal;
    // individual portal failures below are not.
    let pipeline = Pipeline::new(&config)?;
    let summary = pipeline.run(&selected).await?;
    print_summary(&summary);
    Ok(())
}

fn print_summary(summary: &RunSummary) {
    println!("{}", "=".repeat(60));
    for outcome in &summary.outcomes {
        let label = format!(
            "{} {}",
            outcome.portal.abbrev(),
            outcome.portal.display_name()
        );
        match outcome.state {
            PortalRunState::Failed => {
                let error = outcome.error.as_deref().unwrap_or("unknown error");
                println!("{label}: FAILED ({error})");
            }
            _ => println!("{label}: {} opportunities", outcome.accepted),
        }
    }
    println!("{}", "-".repeat(60));
    println!("TOTAL: {} IT opportunities", summary.total);
    println!("Saved to: {}", summary.output_path);
    println!("{}", "=".repeat(60));
}

async fn list_portals() -> Result<()> {
    let config = PipelineConfig::from_env();
    let registry = PortalRegistry::load(&config.registry_path)
        .await
        .context("loading portal registry")?;
    for portal in &registry.portals {
        let mut flags = Vec::new();
        if !portal.enabled {
            flags.push("disabled");
        }
        if portal.quick {
            flags.push("quick");
        }
        let flags = if flags.is_empty() {
            String::new()
        } else {
            format!(" [{}]", flags.join(", "))
        };
        println!(
            "{:2} {:15}{} {}",
            portal.portal.abbrev(),
            portal.portal.display_name(),
            flags,
            portal.url
        );
    }
    Ok(())
}
