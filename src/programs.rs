//! Program list loading.
//!
//! The list is produced by a separate browser-driven step and looks like
//! `[{ "id": "5101087", "programStudi": "S-1 KEPERAWATAN", "jumlahData": 42, ... }]`.
//! Only the three fields below are read; anything else is ignored. The crawl
//! writes `"id": null` for a program whose listing request was never captured.

use anyhow::{Context, Result};
use serde::{Deserialize, Deserializer, Serialize};
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgramDescriptor {
    /// Upstream `kode_ref_pend`. Numeric ids are kept as their decimal text.
    #[serde(default, deserialize_with = "id_from_string_or_number")]
    pub id: Option<String>,
    #[serde(rename = "programStudi")]
    pub program_name: String,
    #[serde(rename = "jumlahData")]
    pub expected_count: i64,
}

impl ProgramDescriptor {
    /// Expected record count, with negative values treated as empty.
    pub fn expected(&self) -> u64 {
        u64::try_from(self.expected_count).unwrap_or(0)
    }

    /// Id for log lines; `-` when the crawl recorded none.
    pub fn id_label(&self) -> &str {
        self.id.as_deref().unwrap_or("-")
    }
}

fn id_from_string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::Null => Ok(None),
        serde_json::Value::String(s) => Ok(Some(s)),
        serde_json::Value::Number(n) => Ok(Some(n.to_string())),
        other => Err(serde::de::Error::custom(format!(
            "program id must be a string, a number or null, got {other}"
        ))),
    }
}

/// Read the program list once at startup.
pub fn load_programs(path: &Path) -> Result<Vec<ProgramDescriptor>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("read program list {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("parse program list {}", path.display()))
}
