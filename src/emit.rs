//! Emission policy and document rendering for completed transactions.

use crate::store::TransactionRecord;
use chrono::{Datelike, Local, NaiveDate};
use serde::Deserialize;
use serde_json::Value;
use std::str::FromStr;

/// Deployment-mode emission policy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmitMode {
    /// Emit on every terminal event, regardless of which fields are filled.
    #[default]
    Permissive,
    /// Emit only when both envelope addresses are known.
    Strict,
}

impl FromStr for EmitMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "permissive" => Ok(EmitMode::Permissive),
            "strict" => Ok(EmitMode::Strict),
            other => Err(format!(
                "unknown emission mode {other:?} (expected \"permissive\" or \"strict\")"
            )),
        }
    }
}

/// Decides whether a record that reached a terminal event is complete
/// enough to emit, and renders it as one flat JSON document.
pub struct EmissionGate {
    mode: EmitMode,
}

impl EmissionGate {
    pub fn new(mode: EmitMode) -> Self {
        Self { mode }
    }

    /// Completeness check, invoked only on terminal events.
    pub fn should_emit(&self, record: &TransactionRecord) -> bool {
        match self.mode {
            EmitMode::Permissive => true,
            EmitMode::Strict => {
                !record.sender_address.is_empty() && !record.recipient_address.is_empty()
            }
        }
    }

    /// Render the record as a single-line flat JSON document, deriving the
    /// calendar date from `initiated_at` and the current year.
    pub fn render(&self, record: &TransactionRecord) -> String {
        render_with_year(record, Local::now().year())
    }
}

/// The source timestamp has no year component, so the caller supplies one.
fn render_with_year(record: &TransactionRecord, year: i32) -> String {
    let mut map = serde_json::Map::new();
    map.insert(
        "transaction_id".to_string(),
        Value::String(record.transaction_id.clone()),
    );
    map.insert(
        "sender_address".to_string(),
        Value::String(record.sender_address.clone()),
    );
    map.insert(
        "recipient_address".to_string(),
        Value::String(record.recipient_address.clone()),
    );
    map.insert(
        "correlation_tag".to_string(),
        Value::String(record.correlation_tag.clone()),
    );
    map.insert("status".to_string(), Value::String(record.status.clone()));
    map.insert(
        "initiated_at".to_string(),
        Value::String(record.initiated_at.clone()),
    );
    map.insert(
        "completed_at".to_string(),
        Value::String(record.completed_at.clone()),
    );
    map.insert(
        "derived_date".to_string(),
        Value::String(derived_date(&record.initiated_at, year)),
    );
    Value::Object(map).to_string()
}

/// Normalize `initiated_at` (`Jan 02 10:00:00`) into `YYYYMMDD`.
/// Empty or unparsable input yields an empty string.
fn derived_date(initiated_at: &str, year: i32) -> String {
    if initiated_at.is_empty() {
        return String::new();
    }
    let date_part: String = initiated_at
        .split_whitespace()
        .take(2)
        .collect::<Vec<_>>()
        .join(" ");
    match NaiveDate::parse_from_str(&format!("{year} {date_part}"), "%Y %b %d") {
        Ok(date) => date.format("%Y%m%d").to_string(),
        Err(_) => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> TransactionRecord {
        TransactionRecord {
            transaction_id: "ABC123".to_string(),
            sender_address: "a@x.com".to_string(),
            recipient_address: "b@y.com".to_string(),
            correlation_tag: "CAMP1".to_string(),
            status: "sent".to_string(),
            initiated_at: "Jan 02 10:00:00".to_string(),
            completed_at: "Jan 02 10:00:10".to_string(),
        }
    }

    #[test]
    fn permissive_emits_empty_records() {
        let gate = EmissionGate::new(EmitMode::Permissive);
        let empty = TransactionRecord::default();
        assert!(gate.should_emit(&empty));
        assert!(gate.should_emit(&record()));
    }

    #[test]
    fn strict_requires_both_addresses() {
        let gate = EmissionGate::new(EmitMode::Strict);
        assert!(gate.should_emit(&record()));

        let mut missing_sender = record();
        missing_sender.sender_address.clear();
        assert!(!gate.should_emit(&missing_sender));

        let mut missing_recipient = record();
        missing_recipient.recipient_address.clear();
        assert!(!gate.should_emit(&missing_recipient));
    }

    #[test]
    fn rendered_document_has_all_keys() {
        let doc = render_with_year(&record(), 2026);
        let v: Value = serde_json::from_str(&doc).unwrap();
        assert_eq!(v["transaction_id"], "ABC123");
        assert_eq!(v["sender_address"], "a@x.com");
        assert_eq!(v["recipient_address"], "b@y.com");
        assert_eq!(v["correlation_tag"], "CAMP1");
        assert_eq!(v["status"], "sent");
        assert_eq!(v["initiated_at"], "Jan 02 10:00:00");
        assert_eq!(v["completed_at"], "Jan 02 10:00:10");
        assert_eq!(v["derived_date"], "20260102");
        assert_eq!(v.as_object().unwrap().len(), 8);
    }

    #[test]
    fn rendered_document_is_one_line() {
        let doc = render_with_year(&record(), 2026);
        assert!(!doc.contains('\n'));
    }

    #[test]
    fn derived_date_uses_current_year_in_render() {
        let gate = EmissionGate::new(EmitMode::Permissive);
        let doc = gate.render(&record());
        let v: Value = serde_json::from_str(&doc).unwrap();
        let expected = format!("{}0102", Local::now().year());
        assert_eq!(v["derived_date"], expected.as_str());
    }

    #[test]
    fn derived_date_empty_when_initiated_at_missing() {
        let mut r = record();
        r.initiated_at.clear();
        let doc = render_with_year(&r, 2026);
        let v: Value = serde_json::from_str(&doc).unwrap();
        assert_eq!(v["derived_date"], "");
    }

    #[test]
    fn derived_date_empty_when_unparsable() {
        assert_eq!(derived_date("garbage timestamp", 2026), "");
        assert_eq!(derived_date("Xxx 99 10:00:00", 2026), "");
    }

    #[test]
    fn derived_date_handles_space_padded_day() {
        assert_eq!(derived_date("Jan  2 10:00:00", 2026), "20260102");
    }

    #[test]
    fn derived_date_december() {
        assert_eq!(derived_date("Dec 31 23:59:59", 2025), "20251231");
    }

    #[test]
    fn mode_parses_from_str() {
        assert_eq!("permissive".parse::<EmitMode>().unwrap(), EmitMode::Permissive);
        assert_eq!("strict".parse::<EmitMode>().unwrap(), EmitMode::Strict);
        assert!("lenient".parse::<EmitMode>().is_err());
    }
}
