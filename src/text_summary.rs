//! Text summary builder for CLI output.

use crate::model::CollectSummary;

/// Pre-formatted lines for text output.
pub(crate) struct TextSummary {
    pub lines: Vec<String>,
}

pub(crate) fn build_text_summary(summary: &CollectSummary) -> TextSummary {
    let mut lines = Vec::new();

    lines.push(format!(
        "Programs: {} total, {} fetched, {} skipped",
        summary.programs_total, summary.programs_fetched, summary.programs_skipped
    ));
    lines.push(format!("Pages requested: {}", summary.pages_requested));
    lines.push(format!(
        "Records: {} seeded + {} fetched = {}",
        summary.records_seeded, summary.records_fetched, summary.records_total
    ));
    lines.push(format!("Output: {}", summary.output_path.display()));

    if !summary.truncated.is_empty() {
        lines.push(format!("Stopped early: {}", summary.truncated.len()));
        for t in &summary.truncated {
            lines.push(format!(
                "  {} (ID: {}) at offset {}: {}",
                t.program_name,
                t.id,
                t.offset,
                t.reason.to_message()
            ));
        }
    }

    if !summary.started_utc.is_empty() {
        lines.push(format!(
            "Started {} / finished {}",
            summary.started_utc, summary.finished_utc
        ));
    }

    TextSummary { lines }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{StopReason, TruncatedProgram};
    use std::path::PathBuf;

    fn summary() -> CollectSummary {
        CollectSummary {
            started_utc: String::new(),
            finished_utc: String::new(),
            programs_path: PathBuf::from("collectedData.json"),
            output_path: PathBuf::from("output_all_programs.xlsx"),
            programs_total: 4,
            programs_skipped: 1,
            programs_fetched: 3,
            pages_requested: 9,
            records_seeded: 12,
            records_fetched: 80,
            records_total: 92,
            truncated: Vec::new(),
        }
    }

    #[test]
    fn lists_counts_and_output() {
        let lines = build_text_summary(&summary()).lines;
        assert_eq!(lines[0], "Programs: 4 total, 3 fetched, 1 skipped");
        assert_eq!(lines[2], "Records: 12 seeded + 80 fetched = 92");
        assert_eq!(lines[3], "Output: output_all_programs.xlsx");
        assert_eq!(lines.len(), 4);
    }

    #[test]
    fn truncated_programs_get_one_line_each() {
        let mut s = summary();
        s.truncated.push(TruncatedProgram {
            id: "5101087".into(),
            program_name: "S-1 KEPERAWATAN".into(),
            offset: 40,
            reason: StopReason::Status(500),
        });
        let lines = build_text_summary(&s).lines;
        assert_eq!(lines[4], "Stopped early: 1");
        assert!(lines[5].contains("S-1 KEPERAWATAN (ID: 5101087) at offset 40"));
        assert!(lines[5].contains("status code 500"));
    }
}
