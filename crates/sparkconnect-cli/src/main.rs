//! sparkconnect CLI entry point.
//!
//! Developer tooling for the panel core: replay host event traces through
//! the lifecycle controller, compute merged option sets and inspect settings.

use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use log::info;
use serde_json::Value;
use sparkconnect::bundles::{merge_options, BundleCatalog};
use sparkconnect::metadata::SparkOpt;
use sparkconnect::settings::{load_settings, settings_schema, Settings};
use tabled::{settings::Style, Table, Tabled};

mod script;

#[derive(Parser, Debug)]
#[command(name = "sparkconnect")]
#[command(about = "Developer tools for the SparkConnect notebook panel")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Settings file (default: <config dir>/sparkconnect/settings.json)
    #[arg(long, global = true)]
    settings: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Replay a scripted event trace through the controller
    Replay {
        /// Path to the JSON script
        script: PathBuf,
        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Merge explicit options with chosen bundles
    Merge {
        /// Bundle catalog: a JSON file holding `{"bundled_options": {...}}`
        #[arg(long)]
        bundles: Option<PathBuf>,
        /// Explicit option as NAME=VALUE (repeatable)
        #[arg(long = "option", short = 'o')]
        options: Vec<String>,
        /// Chosen bundle name, in order (repeatable)
        #[arg(long = "bundle", short = 'b')]
        chosen: Vec<String>,
    },

    /// Print the effective settings
    Settings,

    /// Print the JSON schema of the settings file
    Schema,
}

#[derive(Tabled)]
struct StepRow {
    #[tabled(rename = "#")]
    index: usize,
    #[tabled(rename = "STEP")]
    step: String,
    #[tabled(rename = "PHASE")]
    phase: String,
    #[tabled(rename = "SESSIONS")]
    sessions: usize,
    #[tabled(rename = "HOST CALLS")]
    calls: String,
}

#[derive(Tabled)]
struct OptionRow {
    #[tabled(rename = "NAME")]
    name: String,
    #[tabled(rename = "VALUE")]
    value: String,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&cli.log_level))
        .init();

    match cli.command {
        Commands::Replay { script, json } => {
            let settings = settings(cli.settings)?;
            let steps = script::load_script(&script)?;
            info!("[cli] Replaying {} steps from {}", steps.len(), script.display());
            let replay = script::replay(steps, settings)?;

            if json {
                println!("{}", serde_json::to_string_pretty(&replay)?);
                return Ok(());
            }

            let rows: Vec<StepRow> = replay
                .steps
                .iter()
                .map(|record| StepRow {
                    index: record.index,
                    step: record.step.clone(),
                    phase: record.phase.to_string(),
                    sessions: record.sessions,
                    calls: summarize_calls(&record.calls),
                })
                .collect();
            println!("{}", Table::new(rows).with(Style::rounded()));
            println!("{}", serde_json::to_string_pretty(&replay.view)?);
        }
        Commands::Merge {
            bundles,
            options,
            chosen,
        } => {
            let catalog = match bundles {
                Some(path) => {
                    let json = std::fs::read_to_string(&path)
                        .with_context(|| format!("Failed to read {}", path.display()))?;
                    let value: Value = serde_json::from_str(&json)
                        .with_context(|| format!("Invalid JSON in {}", path.display()))?;
                    BundleCatalog::from_value(Some(&value))?
                }
                None => BundleCatalog::default(),
            };
            let options = options
                .iter()
                .map(|arg| parse_option(arg))
                .collect::<Result<Vec<_>>>()?;

            let merged = merge_options(&options, &chosen, &catalog);
            print_options(&merged);
        }
        Commands::Settings => {
            let settings = settings(cli.settings)?;
            println!("{}", serde_json::to_string_pretty(&settings)?);
        }
        Commands::Schema => {
            println!("{}", serde_json::to_string_pretty(&settings_schema())?);
        }
    }

    Ok(())
}

fn settings(path: Option<PathBuf>) -> Result<Settings> {
    let path = path.unwrap_or_else(sparkconnect::default_settings_path);
    Ok(load_settings(&path)?)
}

fn parse_option(arg: &str) -> Result<SparkOpt> {
    let Some((name, value)) = arg.split_once('=') else {
        bail!("Expected NAME=VALUE, got {arg:?}");
    };
    let name = name.trim();
    if name.is_empty() {
        bail!("Option name is empty in {arg:?}");
    }
    Ok(SparkOpt::new(name, value))
}

fn print_options(merged: &BTreeMap<String, String>) {
    if merged.is_empty() {
        println!("No options");
        return;
    }
    let rows: Vec<OptionRow> = merged
        .iter()
        .map(|(name, value)| OptionRow {
            name: name.clone(),
            value: value.clone(),
        })
        .collect();
    println!("{}", Table::new(rows).with(Style::rounded()));
}

fn summarize_calls(calls: &[sparkconnect::recording::HostCall]) -> String {
    if calls.is_empty() {
        return "-".to_string();
    }
    calls
        .iter()
        .map(|call| {
            serde_json::to_value(call)
                .ok()
                .and_then(|v| v.get("call").and_then(Value::as_str).map(str::to_string))
                .unwrap_or_default()
        })
        .collect::<Vec<_>>()
        .join(", ")
}
