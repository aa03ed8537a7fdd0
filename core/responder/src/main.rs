//! guardian-responder: CLI harness for Guardian fall-response sessions.
//!
//! Runs scripted session timelines on a virtual clock and answers quick
//! phrase-classification questions. Useful for exercising the escalation
//! flow end to end without a device.
//!
//! ## Subcommands
//!
//! - `simulate`: Run a scenario (reads JSON from stdin, prints a report)
//! - `classify`: Classify a transcript against the confirmation phrase sets

mod simulate;

use std::io::Read;
use std::io::Write as _;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use guardian_escalation::{classify, SessionConfig, TranscriptClass};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "guardian-responder")]
#[command(about = "Guardian fall-response session harness")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a scripted session scenario (reads JSON from stdin)
    Simulate {
        /// Append the escalation record, if any, to this file as a JSON line
        #[arg(long, value_name = "PATH")]
        audit: Option<PathBuf>,
    },

    /// Classify a transcript against the cancel and escalate phrase sets
    Classify {
        /// Transcript words (joined with spaces before matching)
        #[arg(value_name = "WORD", required = true)]
        words: Vec<String>,
    },
}

fn main() {
    init_logging();
    let cli = Cli::parse();

    match cli.command {
        Commands::Simulate { audit } => {
            if let Err(e) = run_simulate(audit.as_deref()) {
                tracing::error!(error = %e, "simulate failed");
                std::process::exit(1);
            }
        }
        Commands::Classify { words } => run_classify(&words),
    }
}

fn init_logging() {
    let debug_enabled = std::env::var("GUARDIAN_DEBUG_LOG")
        .map(|value| matches!(value.as_str(), "1" | "true" | "TRUE" | "yes" | "YES"))
        .unwrap_or(false);
    let filter = if debug_enabled {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn run_simulate(audit: Option<&std::path::Path>) -> Result<(), String> {
    let mut input = String::new();
    std::io::stdin()
        .read_to_string(&mut input)
        .map_err(|e| format!("failed to read stdin: {e}"))?;
    let scenario: simulate::Scenario =
        serde_json::from_str(&input).map_err(|e| format!("invalid scenario: {e}"))?;

    let report = simulate::run(scenario)?;

    if let (Some(path), Some(record)) = (audit, report.record.as_ref()) {
        append_audit_line(path, record)?;
    }

    let rendered =
        serde_json::to_string_pretty(&report).map_err(|e| format!("report serialization: {e}"))?;
    println!("{rendered}");
    Ok(())
}

fn append_audit_line(
    path: &std::path::Path,
    record: &guardian_escalation::EscalationRecord,
) -> Result<(), String> {
    let line =
        serde_json::to_string(record).map_err(|e| format!("record serialization: {e}"))?;
    let mut file = fs_err::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| e.to_string())?;
    writeln!(file, "{line}").map_err(|e| format!("audit append: {e}"))?;
    Ok(())
}

fn run_classify(words: &[String]) {
    let transcript = words.join(" ");
    let config = SessionConfig::default();
    let class = classify(&transcript, &config.cancel_phrases, &config.escalate_phrases);
    let label = match class {
        TranscriptClass::Cancel => "cancel",
        TranscriptClass::Escalate => "escalate",
        TranscriptClass::Unrecognized => "unrecognized",
    };
    println!("{label}");
}
