mod paginate;
mod relay_client;

use crate::model::{
    CollectConfig, CollectEvent, CollectSummary, InfoEvent, Record, SkipReason, TruncatedProgram,
};
use crate::{programs, spreadsheet};
use anyhow::{Context, Result};
use paginate::{CourtesyDelay, FaultPolicy, PageSettings};
pub use relay_client::{PageFetcher, RelayClient};
use std::path::Path;
use tokio::sync::mpsc;

/// Sequential collector: one program after another, one page at a time.
pub struct CollectEngine<F = RelayClient> {
    cfg: CollectConfig,
    fetcher: F,
}

impl CollectEngine<RelayClient> {
    pub fn new(cfg: CollectConfig) -> Result<Self> {
        let fetcher = RelayClient::new(&cfg)?;
        Ok(Self { cfg, fetcher })
    }
}

impl<F: PageFetcher> CollectEngine<F> {
    #[cfg(test)]
    pub(crate) fn with_fetcher(cfg: CollectConfig, fetcher: F) -> Self {
        Self { cfg, fetcher }
    }

    fn page_settings(&self) -> PageSettings {
        PageSettings {
            start_offset: self.cfg.start_offset,
            page_size: self.cfg.page_size,
            fault: FaultPolicy {
                delay: self.cfg.fault_delay,
            },
            courtesy: CourtesyDelay {
                base: self.cfg.page_delay,
                jitter: self.cfg.page_jitter,
            },
        }
    }

    pub async fn run(
        self,
        event_tx: mpsc::UnboundedSender<CollectEvent>,
    ) -> Result<CollectSummary> {
        let started_utc = now_rfc3339();
        let programs = programs::load_programs(&self.cfg.programs_path)?;
        let settings = self.page_settings();

        let mut dataset = seed_dataset(&self.cfg.output_path, &event_tx);
        let records_seeded = dataset.len();

        let mut summary = CollectSummary {
            started_utc,
            finished_utc: String::new(),
            programs_path: self.cfg.programs_path.clone(),
            output_path: self.cfg.output_path.clone(),
            programs_total: programs.len(),
            programs_skipped: 0,
            programs_fetched: 0,
            pages_requested: 0,
            records_seeded,
            records_fetched: 0,
            records_total: records_seeded,
            truncated: Vec::new(),
        };

        let total = programs.len();
        for (i, program) in programs.into_iter().enumerate() {
            if program.expected() == 0 {
                summary.programs_skipped += 1;
                let _ = event_tx.send(CollectEvent::ProgramSkipped {
                    program,
                    reason: SkipReason::NoData,
                });
                continue;
            }
            let Some(id) = program.id.clone() else {
                summary.programs_skipped += 1;
                let _ = event_tx.send(CollectEvent::ProgramSkipped {
                    program,
                    reason: SkipReason::MissingId,
                });
                continue;
            };

            let _ = event_tx.send(CollectEvent::ProgramStarted {
                index: i + 1,
                total,
                program: program.clone(),
            });

            let pages =
                paginate::paginate_program(&self.fetcher, &id, &program, &settings, &event_tx)
                    .await;
            summary.pages_requested += pages.calls;
            if let Some((offset, reason)) = pages.stopped {
                summary.truncated.push(TruncatedProgram {
                    id,
                    program_name: program.program_name.clone(),
                    offset,
                    reason,
                });
            }

            let fetched = pages.records.len();
            let _ = event_tx.send(CollectEvent::ProgramFinished {
                program,
                records: fetched,
            });
            if fetched == 0 {
                continue;
            }

            summary.programs_fetched += 1;
            summary.records_fetched += fetched;
            dataset.extend(pages.records);

            spreadsheet::save_dataset(&self.cfg.output_path, &dataset)?;
            let _ = event_tx.send(CollectEvent::Saved {
                path: self.cfg.output_path.clone(),
                total: dataset.len(),
            });
        }

        summary.records_total = dataset.len();
        summary.finished_utc = now_rfc3339();
        let _ = event_tx.send(CollectEvent::Info(InfoEvent::Message(format!(
            "Completed! Total records: {}",
            dataset.len()
        ))));
        Ok(summary)
    }
}

/// Start from the previous run's output when it is readable; otherwise start empty.
fn seed_dataset(path: &Path, event_tx: &mpsc::UnboundedSender<CollectEvent>) -> Vec<Record> {
    if !path.exists() {
        return Vec::new();
    }
    match spreadsheet::load_dataset(path) {
        Ok(records) => {
            let _ = event_tx.send(CollectEvent::SeedLoaded {
                path: path.to_path_buf(),
                records: records.len(),
            });
            records
        }
        Err(e) => {
            let _ = event_tx.send(CollectEvent::SeedFailed {
                path: path.to_path_buf(),
                error: format!("{e:#}"),
            });
            Vec::new()
        }
    }
}

fn now_rfc3339() -> String {
    time::OffsetDateTime::now_utc()
        .format(&time::format_description::well_known::Rfc3339)
        .unwrap_or_else(|_| "now".into())
}

/// Fail fast on settings that would make pagination meaningless.
pub fn validate_config(cfg: &CollectConfig) -> Result<()> {
    if cfg.page_size == 0 {
        anyhow::bail!("page size must be at least 1");
    }
    reqwest::Url::parse(&cfg.relay_url)
        .with_context(|| format!("invalid relay url {}", cfg.relay_url))?;
    Ok(())
}
