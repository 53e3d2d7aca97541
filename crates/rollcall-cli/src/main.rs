use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use rollcall_core::{
    load_roster, Config, DailyLedger, DailyReport, Matcher, PrecomputedEmbedder, ReferenceEmbedder,
};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "rollcall", about = "Rollcall attendance CLI")]
struct Cli {
    /// Print machine-readable JSON instead of text
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the roster and validate every reference embedding
    Roster,
    /// Show one day's attendance, one line per student
    Report {
        /// Day to report (YYYY-MM-DD, default today)
        #[arg(short, long)]
        date: Option<NaiveDate>,
        /// Print raw ledger records without collapsing repeats
        #[arg(long)]
        raw: bool,
    },
    /// Match precomputed face embeddings against the roster
    Match {
        /// JSON file of the form {"faces": [[f32, ...], ...]}
        faces: PathBuf,
    },
    /// Print the effective configuration
    Config,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = Config::from_env()?;
    tracing::debug!(?config, "configuration loaded");

    match cli.command {
        Commands::Roster => {
            let roster = load_roster(&config.info_dir, &PrecomputedEmbedder)
                .with_context(|| format!("loading roster from {}", config.info_dir.display()))?;
            if cli.json {
                let entries: Vec<_> = roster
                    .iter()
                    .map(|s| {
                        serde_json::json!({
                            "name": s.identity,
                            "roll": s.roll,
                            "dim": s.embedding.dim(),
                        })
                    })
                    .collect();
                println!("{}", serde_json::to_string_pretty(&entries)?);
            } else {
                for s in &roster {
                    println!("{:<8} {} ({}-d)", s.roll, s.identity, s.embedding.dim());
                }
                println!("{} students", roster.len());
            }
        }
        Commands::Report { date, raw } => {
            let date = date.unwrap_or_else(|| chrono::Local::now().date_naive());
            let ledger = DailyLedger::new(&config.record_dir);
            let records = ledger.read_day(date)?;

            if raw {
                if cli.json {
                    println!("{}", serde_json::to_string_pretty(&records)?);
                } else {
                    for r in &records {
                        print!("{}", rollcall_core::ledger::format_record(r));
                    }
                }
                return Ok(());
            }

            let report = DailyReport::from_records(date, &records);
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else if report.entries.is_empty() {
                println!("No attendance recorded for {date}");
            } else {
                for e in &report.entries {
                    let mark = if e.present { "present" } else { "absent" };
                    let repeats = if e.records > 1 {
                        format!("  ({} records)", e.records)
                    } else {
                        String::new()
                    };
                    println!("{:<8} {:<24} {:<8} {}{}", e.roll, e.identity, mark, e.at.time(), repeats);
                }
                println!(
                    "{date}: {} present, {} absent",
                    report.present_count(),
                    report.absent_count()
                );
            }
        }
        Commands::Match { faces } => {
            let roster = load_roster(&config.info_dir, &PrecomputedEmbedder)
                .with_context(|| format!("loading roster from {}", config.info_dir.display()))?;
            let matcher = config.matcher();
            let probes = PrecomputedEmbedder.embed_reference(&faces)?;

            let mut results = Vec::with_capacity(probes.len());
            for (i, probe) in probes.iter().enumerate() {
                let found = matcher.find(probe, &roster)?;
                results.push(serde_json::json!({
                    "face": i,
                    "name": found.as_ref().map(|m| m.identity.clone()),
                    "distance": found.as_ref().map(|m| m.distance),
                }));
                if !cli.json {
                    match found {
                        Some(m) => println!("face {i}: {} (distance {:.3})", m.identity, m.distance),
                        None => println!("face {i}: no match within {}", config.tolerance),
                    }
                }
            }
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&results)?);
            }
        }
        Commands::Config => {
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
    }

    Ok(())
}
