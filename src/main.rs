//! Activity Sensor Agent CLI
//!
//! Host-activity telemetry collector.

use activity_sensor_agent::{
    aggregator::{FlushMode, JsonFileSink},
    config::{Config, ProbeConfig},
    core::Record,
    init_tracing, System, TransparencyLog, VERSION,
};
use chrono::Local;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

#[derive(Parser)]
#[command(name = "activity-sensor")]
#[command(version = VERSION)]
#[command(about = "Host-activity telemetry collector", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start collecting activity
    Start {
        /// Probes to run (process, window, mouse, keyboard, clipboard, or all)
        #[arg(long, default_value = "all")]
        sources: String,

        /// Flush protocol (simple or quorum)
        #[arg(long)]
        mode: Option<FlushMode>,

        /// Activity log file
        #[arg(long)]
        log_path: Option<PathBuf>,

        /// Identifier stamped on every record
        #[arg(long)]
        source_id: Option<String>,

        /// Stop after this many seconds
        #[arg(long)]
        duration: Option<u64>,
    },

    /// Pause data collection
    Pause,

    /// Resume data collection
    Resume,

    /// Show current collection status
    Status,

    /// Export the activity log
    Export {
        /// Output file
        #[arg(long, short)]
        output: Option<PathBuf>,

        /// Activity log to read (defaults to the configured log file)
        #[arg(long)]
        log_path: Option<PathBuf>,

        /// Export format (json or jsonl)
        #[arg(long, default_value = "json")]
        format: String,
    },

    /// Show configuration
    Config,
}

fn main() {
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Commands::Start {
            sources,
            mode,
            log_path,
            source_id,
            duration,
        } => {
            cmd_start(&sources, mode, log_path, source_id, duration);
        }
        Commands::Pause => {
            cmd_pause();
        }
        Commands::Resume => {
            cmd_resume();
        }
        Commands::Status => {
            cmd_status();
        }
        Commands::Export {
            output,
            log_path,
            format,
        } => {
            cmd_export(output, log_path, &format);
        }
        Commands::Config => {
            cmd_config();
        }
    }
}

fn cmd_start(
    sources: &str,
    mode: Option<FlushMode>,
    log_path: Option<PathBuf>,
    source_id: Option<String>,
    duration: Option<u64>,
) {
    println!("Activity Sensor Agent v{VERSION}");
    println!();

    // Load or create configuration, then apply command-line overrides
    let mut config = Config::load().unwrap_or_else(|e| {
        eprintln!("Warning: Could not load config, using defaults: {e}");
        Config::default()
    });
    config.probes = ProbeConfig::from_csv(sources, &config.probes);
    if let Some(mode) = mode {
        config.flush_mode = mode;
    }
    if let Some(log_path) = log_path {
        config.log_path = log_path;
    }
    if let Some(source_id) = source_id {
        config.source_id = source_id;
    }

    if let Err(e) = config.validate() {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
    if let Err(e) = config.ensure_directories() {
        eprintln!("Warning: Could not create directories: {e}");
    }

    println!("Starting collection...");
    for (name, settings) in config.probes.iter() {
        if settings.enabled {
            println!("  {name}: every {:.1}s", settings.interval.as_secs_f64());
        } else {
            println!("  {name}: disabled");
        }
    }
    println!(
        "  Logger: every {:.1}s ({} mode)",
        config.logger_interval.as_secs_f64(),
        config.flush_mode
    );
    println!("  Log file: {:?}", config.log_path);
    println!("  Source id: {}", config.source_id);

    let system = match System::from_config(&config) {
        Ok(system) => system,
        Err(e) => {
            eprintln!("Error building collector: {e}");
            std::process::exit(1);
        }
    };
    println!("Instance ID: {}", system.instance_id());
    println!();
    println!("Press Ctrl+C to stop");
    println!();

    // Set up Ctrl+C handler
    let running = Arc::new(AtomicBool::new(true));
    ctrlc_handler(running.clone());

    if let Err(e) = system.start() {
        eprintln!("Error starting collector: {e}");
        std::process::exit(1);
    }

    // Support pause/resume from another process by polling the config file.
    let mut paused = config.paused;
    if paused {
        println!("Collection is currently paused.");
        println!("Run `activity-sensor resume` to start collecting.");
        println!();
    }

    let deadline = duration.map(|secs| Instant::now() + Duration::from_secs(secs));
    let mut last_config_check = Instant::now();

    while running.load(Ordering::SeqCst) {
        if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            println!("Collection duration reached.");
            break;
        }

        if last_config_check.elapsed() >= Duration::from_secs(1) {
            if let Ok(cfg) = Config::load() {
                if cfg.paused != paused {
                    paused = cfg.paused;
                    println!();
                    if paused {
                        println!("Pausing collection...");
                        system.pause();
                    } else {
                        println!("Resuming collection...");
                        system.resume();
                    }
                }
            }
            last_config_check = Instant::now();
        }

        thread::sleep(Duration::from_millis(100));
    }

    println!();
    println!("Stopping collection...");
    let report = system.shutdown();

    match &report.final_round {
        Ok(round) => println!("Final round: {round:?}"),
        Err(e) => eprintln!("Error persisting final round: {e}"),
    }
    if !report.timed_out.is_empty() {
        eprintln!("Warning: tasks did not stop in time: {:?}", report.timed_out);
    }
    println!(
        "Active collection time: {:.1}s",
        system.elapsed().as_secs_f64()
    );

    // Final stats
    println!();
    println!("{}", system.stats().summary());
}

fn cmd_pause() {
    let mut config = Config::load().unwrap_or_default();
    config.paused = true;
    if let Err(e) = config.save() {
        eprintln!("Error saving config: {e}");
        std::process::exit(1);
    }
    println!("Collection paused. Use 'activity-sensor resume' to continue.");
}

fn cmd_resume() {
    let mut config = Config::load().unwrap_or_default();
    config.paused = false;
    if let Err(e) = config.save() {
        eprintln!("Error saving config: {e}");
        std::process::exit(1);
    }
    println!("Collection resumed.");
}

fn cmd_status() {
    let config = Config::load().unwrap_or_default();

    println!("Activity Sensor Agent Status");
    println!("============================");
    println!();

    // Show config
    println!("Configuration:");
    for (name, settings) in config.probes.iter() {
        println!(
            "  {name}: {}",
            if settings.enabled {
                "enabled"
            } else {
                "disabled"
            }
        );
    }
    println!("  Flush mode: {}", config.flush_mode);
    println!("  Log file: {:?}", config.log_path);
    println!("  Paused: {}", config.paused);
    println!();

    // Load and show transparency stats if available
    let stats_path = config.stats_path();
    if stats_path.exists() {
        let log = TransparencyLog::with_persistence(stats_path);
        let stats = log.stats();
        println!("Cumulative Statistics:");
        println!("  Records persisted: {}", stats.records_persisted);
        println!("  Rounds persisted: {}", stats.rounds_persisted);
        println!("  Rounds vetoed: {}", stats.rounds_vetoed);
        println!("  Work unit failures: {}", stats.work_failures);
        println!("  Persistence failures: {}", stats.persist_failures);
        for (task_type, count) in &stats.records_by_type {
            println!("    {task_type}: {count}");
        }
    } else {
        println!("No previous session data found.");
    }
}

fn cmd_export(output: Option<PathBuf>, log_path: Option<PathBuf>, format: &str) {
    let config = Config::load().unwrap_or_default();
    let log_path = log_path.unwrap_or_else(|| config.log_path.clone());

    if !log_path.exists() {
        println!("No activity log found at {log_path:?}");
        println!("Run 'activity-sensor start' to begin collecting data.");
        return;
    }

    let jsonl = format == "jsonl";
    let output_path = output.unwrap_or_else(|| {
        config.data_path.join(format!(
            "export_{}.{}",
            Local::now().format("%Y%m%d_%H%M%S"),
            if jsonl { "jsonl" } else { "json" }
        ))
    });

    match export_records(&log_path, &output_path, jsonl) {
        Ok(count) => {
            println!("Total records: {count}");
            println!("Exported to {output_path:?}");
        }
        Err(e) => {
            eprintln!("Error exporting activity log: {e}");
            std::process::exit(1);
        }
    }
}

/// Flatten every batch in `log_path` into `output_path`.
///
/// Returns the number of records written.
fn export_records(log_path: &Path, output_path: &Path, jsonl: bool) -> Result<usize, String> {
    let batches = JsonFileSink::read_batches(log_path).map_err(|e| e.to_string())?;
    let records: Vec<Record> = batches.into_iter().flatten().collect();

    let content = if jsonl {
        // JSON Lines format
        let lines = records
            .iter()
            .map(serde_json::to_string)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| format!("Error serializing: {e}"))?;
        lines.join("\n")
    } else {
        // Pretty JSON format
        serde_json::to_string_pretty(&records).map_err(|e| format!("Error serializing: {e}"))?
    };

    std::fs::write(output_path, content).map_err(|e| format!("Error writing export: {e}"))?;
    Ok(records.len())
}

fn cmd_config() {
    let config = Config::load().unwrap_or_default();

    println!("Configuration");
    println!("=============");
    println!();
    println!("Config file: {:?}", Config::config_path());
    println!();
    println!(
        "{}",
        serde_json::to_string_pretty(&config).unwrap_or_else(|_| "Error".to_string())
    );
}

/// Set up Ctrl+C handler.
fn ctrlc_handler(running: Arc<AtomicBool>) {
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    })
    .expect("Error setting Ctrl+C handler");
}

#[cfg(test)]
mod tests {
    use super::*;
    use activity_sensor_agent::aggregator::{BatchSink, WriteMode};
    use serde_json::Map;

    #[test]
    fn test_export_reads_a_custom_log_path() {
        let dir = std::env::temp_dir().join(format!("activity-export-{}", uuid::Uuid::new_v4()));
        let log_path = dir.join("custom").join("activity.json");

        let sink = JsonFileSink::new(&log_path, WriteMode::Append);
        sink.persist(&[Record::new("1000", "mouse", Map::new())])
            .unwrap();
        sink.persist(&[
            Record::new("1000", "window", Map::new()),
            Record::new("1000", "process", Map::new()),
        ])
        .unwrap();

        let output = dir.join("export.jsonl");
        assert_eq!(export_records(&log_path, &output, true).unwrap(), 3);
        let content = std::fs::read_to_string(&output).unwrap();
        assert_eq!(content.lines().count(), 3);

        let output = dir.join("export.json");
        assert_eq!(export_records(&log_path, &output, false).unwrap(), 3);
        let exported: Vec<Record> =
            serde_json::from_str(&std::fs::read_to_string(&output).unwrap()).unwrap();
        assert_eq!(exported[0].task_type, "mouse");

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_export_of_missing_log_fails() {
        let dir = std::env::temp_dir().join(format!("activity-export-{}", uuid::Uuid::new_v4()));
        assert!(export_records(&dir.join("missing.json"), &dir.join("out.json"), false).is_err());
    }

    #[test]
    fn test_export_accepts_log_path() {
        let cli = Cli::try_parse_from([
            "activity-sensor",
            "export",
            "--log-path",
            "/tmp/activity.json",
            "--format",
            "jsonl",
        ])
        .unwrap();
        match cli.command {
            Commands::Export { log_path, .. } => {
                assert_eq!(log_path, Some(PathBuf::from("/tmp/activity.json")));
            }
            _ => panic!("expected export command"),
        }
    }
}
