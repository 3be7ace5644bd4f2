use std::path::Path;

use anyhow::{bail, Context};
use colored::Colorize;

use ota_entity::{Graph, IntegrityReport};

use crate::cli::*;
use crate::config::ServiceConfig;

pub fn run_command(cli: Cli) -> anyhow::Result<()> {
    let format = cli.format;
    match cli.command {
        Command::Inspect(args) => cmd_inspect(&args.snapshot, format),
        Command::Fsck(args) => cmd_fsck(&args.snapshot, format),
        Command::Config(args) => cmd_config(args.file.as_deref(), format),
    }
}

fn load_snapshot(path: &Path) -> anyhow::Result<Graph> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading snapshot {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("decoding snapshot {}", path.display()))
}

fn cmd_inspect(path: &Path, format: OutputFormat) -> anyhow::Result<()> {
    let summary = load_snapshot(path)?.summary();
    if format == OutputFormat::Json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    println!("Snapshot {}", path.display().to_string().bold());
    println!("  Next id:      {}", format!("id_{}", summary.next_id_number).cyan());
    println!("  Accounts:     {}", summary.accounts);
    println!("  Apps:         {}", summary.apps);
    println!("  Deployments:  {}", summary.deployments);
    println!("  Packages:     {}", summary.packages);
    println!("  Access keys:  {}", summary.access_keys);
    println!("  Blobs:        {}", summary.blobs);
    Ok(())
}

pub(crate) fn check_snapshot(path: &Path) -> anyhow::Result<IntegrityReport> {
    let graph = load_snapshot(path)?;
    Ok(graph.verify())
}

fn cmd_fsck(path: &Path, format: OutputFormat) -> anyhow::Result<()> {
    let report = check_snapshot(path)?;
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        OutputFormat::Text if report.is_valid() => {
            println!("{} No integrity violations.", "✓".green().bold());
        }
        OutputFormat::Text => {
            for v in &report.violations {
                println!(
                    "  {} {} {}: {}",
                    "✗".red(),
                    v.kind.to_string().yellow(),
                    v.subject.bold(),
                    v.description
                );
            }
        }
    }
    if !report.is_valid() {
        bail!("{} integrity violation(s) in {}", report.violations.len(), path.display());
    }
    Ok(())
}

fn cmd_config(file: Option<&Path>, format: OutputFormat) -> anyhow::Result<()> {
    let config = ServiceConfig::load(file)?;
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&config)?),
        OutputFormat::Text => print!("{}", toml::to_string_pretty(&config)?),
    }
    Ok(())
}
