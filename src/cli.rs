use crate::engine::{self, CollectEngine};
use crate::model::{CollectConfig, CollectEvent, CollectSummary, RelayConfig};
use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::io::Write;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{info, warn};

const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36";

/// Spawn a blocking stdout writer so report lines don't block async tasks.
fn spawn_output_writer() -> (mpsc::UnboundedSender<String>, tokio::task::JoinHandle<()>) {
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    let handle = tokio::task::spawn_blocking(move || {
        let stdout = std::io::stdout();
        let mut out = std::io::LineWriter::new(stdout.lock());
        while let Some(line) = rx.blocking_recv() {
            let _ = writeln!(out, "{}", line);
        }
        let _ = out.flush();
    });
    (tx, handle)
}

#[derive(Debug, Parser, Clone)]
#[command(
    name = "sscasn-collector",
    version,
    about = "Collect SSCASN formation records per study program through a local relay"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run the forwarding relay (POST /proxy)
    Relay(RelayArgs),
    /// Paginate every program in the list and write the spreadsheet
    Collect(CollectArgs),
}

#[derive(Debug, Args, Clone)]
pub struct RelayArgs {
    /// Address to listen on
    #[arg(long, default_value = "127.0.0.1:5000")]
    pub listen: SocketAddr,

    /// Upstream request timeout (none by default)
    #[arg(long)]
    pub timeout: Option<humantime::Duration>,
}

#[derive(Debug, Args, Clone)]
pub struct CollectArgs {
    /// Program list produced by the portal crawl
    #[arg(long, default_value = "collectedData.json")]
    pub programs: PathBuf,

    /// Spreadsheet rewritten after every program; also the resume source
    #[arg(long, default_value = "output_all_programs.xlsx")]
    pub output: PathBuf,

    /// Relay endpoint
    #[arg(long, default_value = "http://127.0.0.1:5000/proxy")]
    pub relay_url: String,

    /// Base URL of the portal API
    #[arg(long, default_value = "https://api-sscasn.bkn.go.id")]
    pub api_base: String,

    /// Origin sent in Origin/Referer headers
    #[arg(long, default_value = "https://sscasn.bkn.go.id")]
    pub portal_origin: String,

    /// `pengadaan_kd` query value
    #[arg(long, default_value_t = 3)]
    pub procurement_code: u32,

    /// Offset of the first page requested for each program
    #[arg(long, default_value_t = 10)]
    pub start_offset: u64,

    /// Records per page
    #[arg(long, default_value_t = 10)]
    pub page_size: u64,

    /// Pause after a transport fault before moving on to the next program
    #[arg(long, default_value = "30s")]
    pub fault_delay: humantime::Duration,

    /// Fixed pause between successful pages
    #[arg(long, default_value = "0s")]
    pub page_delay: humantime::Duration,

    /// Random extra pause between successful pages, up to this much
    #[arg(long, default_value = "0s")]
    pub page_jitter: humantime::Duration,

    /// User-Agent forwarded to the portal
    #[arg(long, default_value = DEFAULT_USER_AGENT)]
    pub user_agent: String,

    /// Print the run summary as JSON instead of text
    #[arg(long)]
    pub json: bool,
}

pub async fn run(args: Cli) -> Result<()> {
    match args.command {
        Command::Relay(a) => crate::relay::serve(build_relay_config(&a)).await,
        Command::Collect(a) => run_collect(a).await,
    }
}

pub fn build_relay_config(args: &RelayArgs) -> RelayConfig {
    RelayConfig {
        listen: args.listen,
        timeout: args.timeout.map(Duration::from),
    }
}

/// Build a `CollectConfig` from CLI arguments.
pub fn build_config(args: &CollectArgs) -> CollectConfig {
    CollectConfig {
        programs_path: args.programs.clone(),
        output_path: args.output.clone(),
        relay_url: args.relay_url.clone(),
        api_base: args.api_base.clone(),
        portal_origin: args.portal_origin.clone(),
        procurement_code: args.procurement_code,
        start_offset: args.start_offset,
        page_size: args.page_size,
        fault_delay: Duration::from(args.fault_delay),
        page_delay: Duration::from(args.page_delay),
        page_jitter: Duration::from(args.page_jitter),
        user_agent: args.user_agent.clone(),
    }
}

async fn run_collect(args: CollectArgs) -> Result<()> {
    let cfg = build_config(&args);
    engine::validate_config(&cfg)?;

    let (out_tx, out_handle) = spawn_output_writer();
    let (evt_tx, mut evt_rx) = mpsc::unbounded_channel::<CollectEvent>();

    let engine = CollectEngine::new(cfg)?;
    let handle = tokio::spawn(async move { engine.run(evt_tx).await });

    while let Some(ev) = evt_rx.recv().await {
        log_event(&ev);
    }

    let summary = handle
        .await
        .context("collector task failed")?
        .context("collection failed")?;

    for line in report_lines(&summary, args.json)? {
        let _ = out_tx.send(line);
    }
    drop(out_tx);
    let _ = out_handle.await;
    Ok(())
}

fn report_lines(summary: &CollectSummary, json: bool) -> Result<Vec<String>> {
    if json {
        return Ok(vec![serde_json::to_string_pretty(summary)?]);
    }
    Ok(crate::text_summary::build_text_summary(summary).lines)
}

fn log_event(ev: &CollectEvent) {
    match ev {
        CollectEvent::SeedLoaded { path, records } => {
            info!("Loaded {} existing records from {}", records, path.display());
        }
        CollectEvent::SeedFailed { path, error } => {
            warn!("Error loading existing file {}: {}", path.display(), error);
        }
        CollectEvent::ProgramStarted {
            index,
            total,
            program,
        } => {
            info!(
                "Processing {} (ID: {}, Total Data: {}) - progress {}/{}",
                program.program_name,
                program.id_label(),
                program.expected_count,
                index,
                total
            );
        }
        CollectEvent::ProgramSkipped { program, reason } => {
            info!(
                "Skipping {} (ID: {}) - {}",
                program.program_name,
                program.id_label(),
                reason.to_message()
            );
        }
        CollectEvent::PageFetched {
            call,
            offset,
            records,
            program,
        } => {
            info!(
                "Call {}: {} records fetched for {} (ID: {}), offset {}",
                call,
                records,
                program.program_name,
                program.id_label(),
                offset
            );
        }
        CollectEvent::PageStopped {
            call,
            offset,
            reason,
            program,
        } => {
            warn!(
                "Call {}: {} for {} (ID: {}), offset {}",
                call,
                reason.to_message(),
                program.program_name,
                program.id_label(),
                offset
            );
        }
        CollectEvent::ProgramFinished { program, records } => {
            info!("Fetched {} records for {}", records, program.program_name);
        }
        CollectEvent::Saved { path, total } => {
            info!("Data saved to {} (Total records: {})", path.display(), total);
        }
        CollectEvent::Info(info) => {
            info!("{}", info.to_message());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collect_defaults_match_fixed_paths_and_constants() {
        let cli = Cli::parse_from(["sscasn-collector", "collect"]);
        let Command::Collect(args) = cli.command else {
            panic!("expected collect");
        };
        let cfg = build_config(&args);
        assert_eq!(cfg.programs_path, PathBuf::from("collectedData.json"));
        assert_eq!(cfg.output_path, PathBuf::from("output_all_programs.xlsx"));
        assert_eq!(cfg.relay_url, "http://127.0.0.1:5000/proxy");
        assert_eq!(cfg.start_offset, 10);
        assert_eq!(cfg.page_size, 10);
        assert_eq!(cfg.procurement_code, 3);
        assert_eq!(cfg.fault_delay, Duration::from_secs(30));
        assert_eq!(cfg.page_delay, Duration::ZERO);
        assert!(!args.json);
    }

    #[test]
    fn relay_defaults_to_loopback_5000_without_timeout() {
        let cli = Cli::parse_from(["sscasn-collector", "relay"]);
        let Command::Relay(args) = cli.command else {
            panic!("expected relay");
        };
        let cfg = build_relay_config(&args);
        assert_eq!(cfg.listen, "127.0.0.1:5000".parse::<SocketAddr>().unwrap());
        assert!(cfg.timeout.is_none());
    }

    #[test]
    fn durations_parse_human_format() {
        let cli = Cli::parse_from([
            "sscasn-collector",
            "collect",
            "--fault-delay",
            "5s",
            "--page-delay",
            "2s",
            "--page-jitter",
            "1500ms",
        ]);
        let Command::Collect(args) = cli.command else {
            panic!("expected collect");
        };
        let cfg = build_config(&args);
        assert_eq!(cfg.fault_delay, Duration::from_secs(5));
        assert_eq!(cfg.page_delay, Duration::from_secs(2));
        assert_eq!(cfg.page_jitter, Duration::from_millis(1500));
    }

    #[test]
    fn json_report_is_a_single_document() {
        let summary = CollectSummary {
            started_utc: "2026-10-18T00:00:00Z".into(),
            finished_utc: "2026-10-18T00:05:00Z".into(),
            programs_path: PathBuf::from("collectedData.json"),
            output_path: PathBuf::from("output_all_programs.xlsx"),
            programs_total: 1,
            programs_skipped: 0,
            programs_fetched: 1,
            pages_requested: 2,
            records_seeded: 0,
            records_fetched: 20,
            records_total: 20,
            truncated: Vec::new(),
        };
        let lines = report_lines(&summary, true).unwrap();
        assert_eq!(lines.len(), 1);
        let v: serde_json::Value = serde_json::from_str(&lines[0]).unwrap();
        assert_eq!(v["records_total"], 20);
    }
}
