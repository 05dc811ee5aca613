//! Wire codec for upstream comments and issue bodies.
//!
//! Two concerns live here: the trailing metadata block a managed issue
//! body carries, and the event comment format. Both are durability
//! contracts -- comments already in the wild must keep parsing, so version
//! bumps add to the parser and never break it.
//!
//! Event comment forms:
//! - v2 (emitted): human-readable preface, then `<!-- [boxofrocks:v2] {JSON} -->`
//! - v1 (accepted): a bare `[boxofrocks:v1] {JSON}` line
//! - unversioned legacy (accepted): a bare `[boxofrocks] {JSON}` line

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::enums::{EventAction, IssueType, Status};
use crate::event::Event;
use crate::model::{Comment, DEFAULT_PRIORITY};

/// Highest event-comment schema version this binary understands and the
/// version it emits.
pub const WIRE_SCHEMA_VERSION: u32 = 2;

const META_PREFIX: &str = "<!-- boxofrocks ";
const META_SUFFIX: &str = " -->";
const EVENT_TAG: &str = "[boxofrocks";

/// Errors from encoding or decoding wire forms.
#[derive(Debug, thiserror::Error)]
pub enum WireError {
    /// The comment declares a schema version newer than this binary.
    /// Operators must upgrade; silently ignoring would lose events.
    #[error("unsupported schema version {found} (this binary supports up to {supported})")]
    UnsupportedSchemaVersion {
        /// Version found in the comment.
        found: u32,
        /// Highest version this binary supports.
        supported: u32,
    },

    /// A recognized marker whose contents could not be decoded.
    #[error("malformed event comment: {0}")]
    Malformed(String),

    /// The event's action has no wire rendering.
    #[error("cannot format unknown action: {0}")]
    UnknownAction(String),

    /// JSON encode/decode failure inside a marker.
    #[error("event comment json: {0}")]
    Json(#[from] serde_json::Error),
}

// ===========================================================================
// Issue body metadata block
// ===========================================================================

/// Structured state carried in the trailing metadata line of a managed
/// upstream issue body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IssueMeta {
    #[serde(default)]
    pub status: Status,

    #[serde(default = "default_priority")]
    pub priority: i32,

    #[serde(default)]
    pub issue_type: IssueType,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub owner: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub labels: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comments: Option<Vec<Comment>>,
}

fn default_priority() -> i32 {
    DEFAULT_PRIORITY
}

impl Default for IssueMeta {
    fn default() -> Self {
        Self {
            status: Status::default(),
            priority: DEFAULT_PRIORITY,
            issue_type: IssueType::default(),
            owner: String::new(),
            labels: Vec::new(),
            comments: None,
        }
    }
}

/// Splits an upstream issue body into its metadata block (if any) and the
/// human text with the metadata line stripped and trailing whitespace
/// trimmed. Bodies without a parseable block return `(None, body)`.
pub fn parse_metadata(body: &str) -> (Option<IssueMeta>, String) {
    let trimmed = body.trim_end();
    let (head, last_line) = match trimmed.rfind('\n') {
        Some(idx) => (&trimmed[..idx], &trimmed[idx + 1..]),
        None => ("", trimmed),
    };

    let Some(json) = last_line
        .trim()
        .strip_prefix(META_PREFIX)
        .and_then(|rest| rest.strip_suffix(META_SUFFIX))
    else {
        return (None, trimmed.to_owned());
    };

    match serde_json::from_str::<IssueMeta>(json) {
        Ok(meta) => (Some(meta), head.trim_end().to_owned()),
        Err(_) => (None, trimmed.to_owned()),
    }
}

/// Renders an issue body: human text, a blank separator line, then the
/// metadata line. Empty human text yields just the metadata line.
pub fn render_body(text: &str, meta: &IssueMeta) -> Result<String, WireError> {
    let line = format!("{META_PREFIX}{}{META_SUFFIX}", serde_json::to_string(meta)?);
    if text.is_empty() {
        Ok(line)
    } else {
        Ok(format!("{text}\n\n{line}"))
    }
}

// ===========================================================================
// Event comments
// ===========================================================================

/// An event decoded from an upstream comment body. The caller fills in the
/// local ids and provenance before persisting.
#[derive(Debug, Clone, PartialEq)]
pub struct WireEvent {
    pub timestamp: DateTime<Utc>,
    pub action: EventAction,
    /// Opaque JSON-string of the event payload, carried verbatim.
    pub payload: String,
    pub agent: String,
}

/// JSON shape inside the event marker.
#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EventCommentBody {
    timestamp: String,
    action: EventAction,
    #[serde(default)]
    payload: String,
    #[serde(default)]
    agent: String,
}

/// Formats an event as an upstream comment body in the current (v2) form:
/// human preface, optional quoted comment, attribution footer, marker.
pub fn format_event_comment(event: &Event) -> Result<String, WireError> {
    let payload = event.decode_payload()?;

    let preface = match &event.action {
        EventAction::Create => {
            format!("**Created**: {}", payload.title.as_deref().unwrap_or(""))
        }
        EventAction::Update => {
            format!("**Updated**: {}", payload.changed_field_names().join(", "))
        }
        EventAction::StatusChange => {
            let to = payload
                .status
                .as_ref()
                .map(|s| s.as_str())
                .unwrap_or_default();
            match &payload.from_status {
                Some(from) => format!("**Status changed**: {from} → {to}"),
                None => format!("**Status changed**: → {to}"),
            }
        }
        EventAction::Close => "**Closed**".to_owned(),
        EventAction::Reopen => "**Reopened**".to_owned(),
        EventAction::Assign => match payload.owner.as_deref() {
            Some("") | None => "**Unassigned**".to_owned(),
            Some(owner) => format!("**Assigned** to {owner}"),
        },
        EventAction::Comment => {
            format!("**Comment**: {}", payload.comment.as_deref().unwrap_or(""))
        }
        EventAction::Delete => "**Deleted**".to_owned(),
        EventAction::Custom(other) => {
            return Err(WireError::UnknownAction(other.clone()));
        }
    };

    let mut out = preface;

    // Comments riding along on a non-comment event get quoted below the
    // preface so the human rendering never drops text.
    if event.action != EventAction::Comment {
        if let Some(comment) = payload.comment.as_deref() {
            if !comment.is_empty() {
                out.push_str(&format!("\n> {comment}"));
            }
        }
    }

    let stamp = event.timestamp.format("%Y-%m-%d %H:%M");
    if event.agent.is_empty() {
        out.push_str(&format!("\n*at {stamp} UTC*"));
    } else {
        out.push_str(&format!("\n*by {} at {stamp} UTC*", event.agent));
    }

    let body = EventCommentBody {
        timestamp: event
            .timestamp
            .to_rfc3339_opts(SecondsFormat::Secs, true),
        action: event.action.clone(),
        payload: event.payload.clone(),
        agent: event.agent.clone(),
    };
    out.push_str(&format!(
        "\n\n<!-- {EVENT_TAG}:v{WIRE_SCHEMA_VERSION}] {} -->",
        serde_json::to_string(&body)?
    ));

    Ok(out)
}

/// Parses an upstream comment body. Returns `Ok(None)` for comments that
/// carry no event marker, an error for markers this binary cannot decode.
pub fn parse_event_comment(body: &str) -> Result<Option<WireEvent>, WireError> {
    for line in body.lines() {
        let line = line.trim();

        // v2+ form wraps the tag in an HTML comment.
        let tagged = if let Some(inner) = line
            .strip_prefix("<!--")
            .and_then(|rest| rest.strip_suffix("-->"))
        {
            let inner = inner.trim();
            if inner.starts_with(EVENT_TAG) {
                Some(inner)
            } else {
                None
            }
        } else if line.starts_with(EVENT_TAG) {
            Some(line)
        } else {
            None
        };

        let Some(tagged) = tagged else { continue };
        return parse_tagged_line(tagged).map(Some);
    }
    Ok(None)
}

/// Decodes one `[boxofrocks...] {JSON}` line, in any accepted form.
fn parse_tagged_line(line: &str) -> Result<WireEvent, WireError> {
    let rest = line
        .strip_prefix(EVENT_TAG)
        .ok_or_else(|| WireError::Malformed(line.to_owned()))?;

    let json = if let Some(rest) = rest.strip_prefix(":v") {
        // Versioned form: `[boxofrocks:vN] {...}`.
        let (version_str, json) = rest
            .split_once(']')
            .ok_or_else(|| WireError::Malformed(line.to_owned()))?;
        let found: u32 = version_str
            .parse()
            .map_err(|_| WireError::Malformed(line.to_owned()))?;
        if found > WIRE_SCHEMA_VERSION {
            return Err(WireError::UnsupportedSchemaVersion {
                found,
                supported: WIRE_SCHEMA_VERSION,
            });
        }
        json
    } else if let Some(json) = rest.strip_prefix(']') {
        // Unversioned legacy form: `[boxofrocks] {...}`.
        json
    } else {
        return Err(WireError::Malformed(line.to_owned()));
    };

    let decoded: EventCommentBody = serde_json::from_str(json.trim())?;
    let timestamp = DateTime::parse_from_rfc3339(&decoded.timestamp)
        .map_err(|e| WireError::Malformed(format!("timestamp: {e}")))?
        .with_timezone(&Utc);

    Ok(WireEvent {
        timestamp,
        action: decoded.action,
        payload: decoded.payload,
        agent: decoded.agent,
    })
}
