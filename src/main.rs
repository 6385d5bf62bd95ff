use std::io::{self, BufRead};
use std::path::PathBuf;

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;

use ppe_monitor::analyzer::types::ResponseFormat;
use ppe_monitor::commands::{self, analyze, gallery, keys, migrate, monitor};
use ppe_monitor::config::AppConfig;
use ppe_monitor::credentials::KeyService;

#[derive(Parser)]
#[command(name = "ppe-monitor")]
#[command(about = "Protective equipment monitoring with a hosted vision model", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (defaults to <config_dir>/ppe-monitor/config.toml)
    #[arg(long, short, global = true, env = "PPE_MONITOR_CONFIG")]
    config: Option<PathBuf>,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Analyze the newest frame in a directory every few seconds
    Monitor {
        /// Directory the camera writes frames into
        #[arg(long)]
        frames: PathBuf,
    },

    /// Analyze image files once
    Analyze {
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Ask for per-item confidence
        #[arg(long)]
        detailed: bool,

        /// Do not store the analyzed images
        #[arg(long)]
        no_save: bool,
    },

    /// Captured image gallery
    #[command(subcommand)]
    Gallery(GalleryCommands),

    /// Upload captures that only exist locally
    Migrate,

    /// Manage API keys in the OS keychain
    #[command(subcommand)]
    Key(KeyCommands),
}

#[derive(Subcommand)]
enum GalleryCommands {
    List,
    Delete {
        #[arg(required = true)]
        ids: Vec<String>,
    },
    Export {
        id: String,
        #[arg(long, default_value = ".")]
        out: PathBuf,
    },
}

#[derive(Subcommand)]
enum KeyCommands {
    /// Store a key (read from stdin when --value is omitted)
    Set {
        service: KeyService,
        #[arg(long)]
        value: Option<String>,
    },
    Get {
        service: KeyService,
    },
    Delete {
        service: KeyService,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    ppe_monitor::init_tracing();
    let cli = Cli::parse();

    let config = AppConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;

    match cli.command {
        Commands::Monitor { frames } => {
            let stats = monitor::run_monitor(&config, &frames)
                .await
                .map_err(|e| anyhow!(e))?;
            if cli.json {
                print_json(&serde_json::json!({
                    "analyzed": stats.started,
                    "skipped": stats.skipped,
                    "idle": stats.idle,
                }))?;
            } else {
                println!(
                    "Analyzed {} frames ({} ticks skipped, {} without a new frame)",
                    stats.started, stats.skipped, stats.idle
                );
            }
        }

        Commands::Analyze {
            files,
            detailed,
            no_save,
        } => {
            let format = if detailed {
                ResponseFormat::Detailed
            } else {
                config.vision.format
            };
            let client = commands::vision_client(&config).map_err(|e| anyhow!(e))?;
            let persister = if no_save {
                None
            } else {
                Some(commands::open_persister(&config).map_err(|e| anyhow!(e))?)
            };

            let (reports, failures) =
                analyze::analyze_files(&client, persister.as_ref(), &config, &files, format).await;

            if cli.json {
                print_json(&reports)?;
            } else {
                for report in &reports {
                    print_analysis(report);
                }
            }
            for failure in &failures {
                eprintln!("error: {}", failure);
            }
            if reports.is_empty() {
                bail!("No image could be analyzed");
            }
        }

        Commands::Gallery(cmd) => {
            let persister = commands::open_persister(&config).map_err(|e| anyhow!(e))?;
            match cmd {
                GalleryCommands::List => {
                    let entries = gallery::list_captures(&persister)
                        .await
                        .map_err(|e| anyhow!(e))?;
                    if cli.json {
                        print_json(&entries)?;
                    } else if entries.is_empty() {
                        println!("No captures yet");
                    } else {
                        for entry in &entries {
                            let items: Vec<&str> =
                                entry.detections.iter().map(|d| d.token()).collect();
                            println!(
                                "{}  {}  {:>3.0}%  {:<10}  {}",
                                entry.id,
                                entry.timestamp.format("%Y-%m-%d %H:%M:%S"),
                                entry.confidence * 100.0,
                                format!("{:?}", entry.sync_state),
                                items.join(", ")
                            );
                        }
                    }
                }
                GalleryCommands::Delete { ids } => {
                    let report = gallery::delete_captures(&persister, &ids)
                        .await
                        .map_err(|e| anyhow!(e))?;
                    if cli.json {
                        print_json(&report)?;
                    } else {
                        println!(
                            "Removed {} local records{}",
                            report.removed_local,
                            if report.removed_remote {
                                " and remote copies"
                            } else {
                                ""
                            }
                        );
                        if let Some(err) = &report.remote_error {
                            eprintln!("warning: remote delete failed: {}", err);
                        }
                    }
                }
                GalleryCommands::Export { id, out } => {
                    let path = gallery::export_capture(&persister, &id, &out)
                        .await
                        .map_err(|e| anyhow!(e))?;
                    println!("Saved {}", path.display());
                }
            }
        }

        Commands::Migrate => {
            let persister = commands::open_persister(&config).map_err(|e| anyhow!(e))?;
            let report = migrate::migrate_local_captures(&persister)
                .await
                .map_err(|e| anyhow!(e))?;
            if cli.json {
                print_json(&report)?;
            } else {
                println!(
                    "Examined {}: {} migrated, {} already remote, {} failed",
                    report.examined, report.migrated, report.skipped, report.failed
                );
            }
        }

        Commands::Key(cmd) => match cmd {
            KeyCommands::Set { service, value } => {
                let value = match value {
                    Some(v) => v,
                    None => {
                        eprintln!("Enter the {} key:", service.service_name());
                        let mut line = String::new();
                        io::stdin()
                            .lock()
                            .read_line(&mut line)
                            .context("Failed to read key from stdin")?;
                        line
                    }
                };
                keys::set_key(service, &value).map_err(|e| anyhow!(e))?;
                println!("Stored key for {}", service.service_name());
            }
            KeyCommands::Get { service } => {
                match keys::get_key_masked(service).map_err(|e| anyhow!(e))? {
                    Some(masked) => println!("{}: {}", service.service_name(), masked),
                    None => println!("{}: not set", service.service_name()),
                }
            }
            KeyCommands::Delete { service } => {
                keys::delete_key(service).map_err(|e| anyhow!(e))?;
                println!("Deleted key for {}", service.service_name());
            }
        },
    }

    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_analysis(report: &analyze::AnalyzeResponse) {
    println!("{}", report.file);
    println!(
        "  persons: {}  model confidence: {:.0}%",
        report.result.person_count,
        report.result.overall_confidence * 100.0
    );
    let labels = |items: &[ppe_monitor::EquipmentId]| {
        if items.is_empty() {
            "none".to_string()
        } else {
            items.iter().map(|i| i.label()).collect::<Vec<_>>().join(", ")
        }
    };
    println!("  detected: {}", labels(&report.detected));
    println!("  missing:  {}", labels(&report.missing));
    println!(
        "  coverage confidence: {:.0}%",
        report.coverage_confidence * 100.0
    );
    if !report.result.description.is_empty() {
        println!("  notes: {}", report.result.description);
    }
    if let Some(saved) = &report.saved {
        println!("  saved as {} ({:?})", saved.id, saved.state);
    }
}
