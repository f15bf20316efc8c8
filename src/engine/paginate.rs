use crate::engine::relay_client::PageFetcher;
use crate::model::{CollectEvent, InfoEvent, PageReply, Record, StopReason, PROGRAM_NAME_FIELD};
use crate::programs::ProgramDescriptor;
use rand::Rng;
use serde_json::Value;
use std::time::Duration;
use tokio::sync::mpsc;

/// Result of one page request.
#[derive(Debug)]
pub(crate) enum PageOutcome {
    Success(Vec<Record>),
    /// Give up on the program now.
    HardStop(StopReason),
    /// Give up on the program after the fault delay.
    SoftStopAfterDelay(StopReason),
}

/// Pause applied before abandoning a program on a transport/parse fault.
#[derive(Debug, Clone, Copy)]
pub(crate) struct FaultPolicy {
    pub delay: Duration,
}

impl FaultPolicy {
    async fn pause(&self) {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
    }
}

/// Optional pause between successful pages: `base` plus up to `jitter` extra.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct CourtesyDelay {
    pub base: Duration,
    pub jitter: Duration,
}

impl CourtesyDelay {
    fn next(&self) -> Duration {
        if self.jitter.is_zero() {
            return self.base;
        }
        let extra_ms = rand::thread_rng().gen_range(0..=self.jitter.as_millis() as u64);
        self.base + Duration::from_millis(extra_ms)
    }

    async fn pause(&self) {
        let d = self.next();
        if !d.is_zero() {
            tokio::time::sleep(d).await;
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct PageSettings {
    pub start_offset: u64,
    pub page_size: u64,
    pub fault: FaultPolicy,
    pub courtesy: CourtesyDelay,
}

/// Everything gathered for one program.
#[derive(Debug, Default)]
pub(crate) struct ProgramPages {
    pub records: Vec<Record>,
    pub calls: u64,
    /// Offset and reason when pagination ended before covering the expected count.
    pub stopped: Option<(u64, StopReason)>,
}

/// Classify a relay reply. Status is checked before the body is parsed.
/// A body without `data.data` is a hard stop; a `data.data` that is not a
/// list of objects is treated like a parse fault and waits before stopping.
pub(crate) fn classify(reply: &PageReply) -> PageOutcome {
    if reply.status != 200 {
        return PageOutcome::HardStop(StopReason::Status(reply.status));
    }
    let body: Value = match serde_json::from_str(&reply.body) {
        Ok(v) => v,
        Err(e) => {
            return PageOutcome::SoftStopAfterDelay(StopReason::Transport(format!(
                "response is not valid JSON: {e}"
            )))
        }
    };
    let Some(inner) = body.get("data").and_then(|d| d.get("data")) else {
        return PageOutcome::HardStop(StopReason::UnexpectedShape { body });
    };
    match extract_records(inner) {
        Some(records) => PageOutcome::Success(records),
        None => PageOutcome::SoftStopAfterDelay(StopReason::UnexpectedShape { body }),
    }
}

/// The inner `data.data` list → its objects.
fn extract_records(inner: &Value) -> Option<Vec<Record>> {
    inner
        .as_array()?
        .iter()
        .map(|item| item.as_object().cloned())
        .collect()
}

pub(crate) fn tag_records(records: &mut [Record], program_name: &str) {
    for r in records {
        r.insert(
            PROGRAM_NAME_FIELD.to_string(),
            Value::String(program_name.to_string()),
        );
    }
}

/// Walk a program's pages from `start_offset` until the expected count is
/// covered or a page stops the walk.
pub(crate) async fn paginate_program<F: PageFetcher>(
    fetcher: &F,
    program_id: &str,
    program: &ProgramDescriptor,
    settings: &PageSettings,
    event_tx: &mpsc::UnboundedSender<CollectEvent>,
) -> ProgramPages {
    let expected = program.expected();
    let mut pages = ProgramPages::default();
    let mut offset = settings.start_offset;
    let mut call = 1u64;

    loop {
        pages.calls = call;
        let outcome = match fetcher.fetch_page(program_id, offset).await {
            Ok(reply) => classify(&reply),
            Err(e) => PageOutcome::SoftStopAfterDelay(StopReason::Transport(format!("{e:#}"))),
        };

        match outcome {
            PageOutcome::Success(mut records) => {
                tag_records(&mut records, &program.program_name);
                let _ = event_tx.send(CollectEvent::PageFetched {
                    call,
                    offset,
                    records: records.len(),
                    program: program.clone(),
                });
                pages.records.append(&mut records);

                // An offset past u64::MAX is past any expected count.
                match offset.checked_add(settings.page_size) {
                    Some(next) if next < expected => offset = next,
                    _ => return pages,
                }
                call += 1;
                settings.courtesy.pause().await;
            }
            PageOutcome::HardStop(reason) => {
                let _ = event_tx.send(CollectEvent::PageStopped {
                    call,
                    offset,
                    reason: reason.clone(),
                    program: program.clone(),
                });
                pages.stopped = Some((offset, reason));
                return pages;
            }
            PageOutcome::SoftStopAfterDelay(reason) => {
                let _ = event_tx.send(CollectEvent::PageStopped {
                    call,
                    offset,
                    reason: reason.clone(),
                    program: program.clone(),
                });
                let _ = event_tx.send(CollectEvent::Info(InfoEvent::FaultPause {
                    delay: settings.fault.delay,
                }));
                settings.fault.pause().await;
                pages.stopped = Some((offset, reason));
                return pages;
            }
        }
    }
}
