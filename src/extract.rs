//! Field extraction from raw mail log lines.
//!
//! A line must first match the overall syslog shape
//! (`<month> <day> <HH:MM:SS> <host> <process>/<subprocess>[<pid>]: <queue-id> <payload>`)
//! before the payload is classified into one of the known sub-shapes.
//! Lines outside the overall shape are ignored; a recognized sub-shape
//! with a malformed payload is a per-line error the caller skips.

use regex::Regex;
use std::sync::LazyLock;

/// Overall line shape. Captures: timestamp, host, queue id, payload.
static LINE_SHAPE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\w{3}\s+\d{1,2}\s+\d{2}:\d{2}:\d{2})\s+(\S+)\s+\w+/\w+\[\d+\]:\s+(\w+)(?:\s+(.*))?$")
        .unwrap()
});

static TAG_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"X-MailerTag:\s*(\w+)").unwrap());

static FROM_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"from=<([\w@.+-]+)").unwrap());

static TO_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"to=<([\w@.+-]+)").unwrap());

static STATUS_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"status=(\w+)").unwrap());

/// Marker meaning the transaction left the queue.
const REMOVAL_MARKER: &str = "removed";

/// Marker for a policy denial by the relay.
const DENIAL_MARKER: &str = "Relay access denied";

/// One classified payload, tagged by sub-shape.
///
/// `Status`, `Removal`, and `Denial` are terminal: the transaction has
/// reached its final outcome once one of them is seen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineEvent {
    /// `client=` payload: the line that establishes the transaction.
    Origin { initiated_at: String },
    /// Custom header payload carrying the campaign tag plus envelope addresses.
    Tag {
        tag: String,
        sender: String,
        recipient: String,
    },
    /// `status=` payload: final delivery outcome.
    Status {
        status: String,
        completed_at: String,
    },
    /// Queue removal: terminal, no new fields.
    Removal,
    /// Relay denial: terminal, forces status `denied`.
    Denial,
}

impl LineEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            LineEvent::Status { .. } | LineEvent::Removal | LineEvent::Denial
        )
    }
}

/// Result of extracting a line that matched the overall shape.
///
/// `event` is `None` when the payload matched no sub-shape; the line still
/// registers the transaction id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedLine {
    pub transaction_id: String,
    pub event: Option<LineEvent>,
}

/// A recognized sub-shape whose inner pattern did not parse.
#[derive(Debug)]
pub enum ExtractError {
    MissingField {
        transaction_id: String,
        field: &'static str,
    },
}

impl std::fmt::Display for ExtractError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExtractError::MissingField {
                transaction_id,
                field,
            } => {
                write!(
                    f,
                    "line for transaction {transaction_id}: recognized payload missing {field}"
                )
            }
        }
    }
}

impl std::error::Error for ExtractError {}

/// Extract structured fields from one raw log line.
///
/// Returns `Ok(None)` when the line does not match the overall shape,
/// `Ok(Some(_))` with an optional [`LineEvent`] when it does, and
/// `Err(_)` when a recognized sub-shape fails to parse fully.
pub fn extract(line: &str) -> Result<Option<ParsedLine>, ExtractError> {
    let caps = match LINE_SHAPE.captures(line) {
        Some(c) => c,
        None => return Ok(None),
    };

    let timestamp = caps[1].to_string();
    let transaction_id = caps[3].to_string();
    let payload = caps.get(4).map(|m| m.as_str()).unwrap_or("");

    let event = classify(&transaction_id, &timestamp, payload)?;
    Ok(Some(ParsedLine {
        transaction_id,
        event,
    }))
}

/// Classify a payload into a sub-shape. First match wins.
fn classify(
    transaction_id: &str,
    timestamp: &str,
    payload: &str,
) -> Result<Option<LineEvent>, ExtractError> {
    if payload.contains("client=") {
        return Ok(Some(LineEvent::Origin {
            initiated_at: timestamp.to_string(),
        }));
    }

    if payload.contains("X-MailerTag") {
        let tag = capture(&TAG_PATTERN, payload)
            .ok_or_else(|| missing(transaction_id, "X-MailerTag value"))?;
        let sender =
            capture(&FROM_PATTERN, payload).ok_or_else(|| missing(transaction_id, "from=<>"))?;
        let recipient =
            capture(&TO_PATTERN, payload).ok_or_else(|| missing(transaction_id, "to=<>"))?;
        return Ok(Some(LineEvent::Tag {
            tag,
            sender,
            recipient,
        }));
    }

    if payload.contains("status=") {
        let status = capture(&STATUS_PATTERN, payload)
            .ok_or_else(|| missing(transaction_id, "status value"))?;
        return Ok(Some(LineEvent::Status {
            status,
            completed_at: timestamp.to_string(),
        }));
    }

    if payload.trim_end().ends_with(REMOVAL_MARKER) {
        return Ok(Some(LineEvent::Removal));
    }

    if payload.contains(DENIAL_MARKER) {
        return Ok(Some(LineEvent::Denial));
    }

    Ok(None)
}

fn capture(pattern: &Regex, payload: &str) -> Option<String> {
    pattern
        .captures(payload)
        .map(|caps| caps[1].to_string())
}

fn missing(transaction_id: &str, field: &'static str) -> ExtractError {
    ExtractError::MissingField {
        transaction_id: transaction_id.to_string(),
        field,
    }
}
