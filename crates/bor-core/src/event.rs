//! The event log entry and its payload shape.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::enums::{EventAction, IssueType, Status};

/// One append-only log entry. Events are never mutated after insertion
/// except to flip `synced` and record the upstream comment id once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    #[serde(default)]
    pub id: i64,

    #[serde(default)]
    pub repo_id: i64,

    #[serde(default)]
    pub issue_id: i64,

    /// Id of the upstream comment this event was pushed as (or pulled
    /// from). Unique per repo when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upstream_comment_id: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upstream_issue_number: Option<i64>,

    pub timestamp: DateTime<Utc>,

    pub action: EventAction,

    /// Opaque JSON-string encoding of [`EventPayload`].
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub payload: String,

    /// Free-form actor string.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub agent: String,

    /// True once persisted upstream or ingested from upstream.
    #[serde(default)]
    pub synced: bool,
}

impl Event {
    /// Builds an unsynced event for the given issue with an encoded payload.
    pub fn new(
        repo_id: i64,
        issue_id: i64,
        action: EventAction,
        payload: &EventPayload,
        agent: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self {
            id: 0,
            repo_id,
            issue_id,
            upstream_comment_id: None,
            upstream_issue_number: None,
            timestamp,
            action,
            payload: payload.encode()?,
            agent: agent.into(),
            synced: false,
        })
    }

    /// Decodes the payload JSON-string. An empty payload decodes to the
    /// all-`None` payload.
    pub fn decode_payload(&self) -> Result<EventPayload, serde_json::Error> {
        if self.payload.is_empty() {
            return Ok(EventPayload::default());
        }
        serde_json::from_str(&self.payload)
    }
}

/// Union of field changes carried by an event. Missing fields mean
/// "no change". This shape crosses the wire inside event comments, so the
/// field names are a durability contract.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<i32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issue_type: Option<IssueType>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub labels: Option<Vec<String>>,

    /// `Some("")` means unassign.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<Status>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_status: Option<Status>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

impl EventPayload {
    /// Encodes to the JSON-string carried in [`Event::payload`].
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Returns `true` when no field is set.
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Names of the changed update fields, in the canonical order used by
    /// the human-readable comment preface.
    pub fn changed_field_names(&self) -> Vec<&'static str> {
        let mut names = Vec::new();
        if self.title.is_some() {
            names.push("title");
        }
        if self.description.is_some() {
            names.push("description");
        }
        if self.priority.is_some() {
            names.push("priority");
        }
        if self.issue_type.is_some() {
            names.push("type");
        }
        if self.labels.is_some() {
            names.push("labels");
        }
        names
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn payload_encode_skips_missing_fields() {
        let payload = EventPayload {
            title: Some("New title".into()),
            ..Default::default()
        };
        assert_eq!(payload.encode().unwrap(), r#"{"title":"New title"}"#);
    }

    #[test]
    fn payload_wire_names_are_camel_case() {
        let payload = EventPayload {
            issue_type: Some(IssueType::Bug),
            from_status: Some(Status::Open),
            ..Default::default()
        };
        let json = payload.encode().unwrap();
        assert!(json.contains(r#""issueType":"bug""#), "{json}");
        assert!(json.contains(r#""fromStatus":"open""#), "{json}");
    }

    #[test]
    fn empty_payload_decodes_from_empty_string() {
        let event = Event {
            id: 1,
            repo_id: 1,
            issue_id: 1,
            upstream_comment_id: None,
            upstream_issue_number: None,
            timestamp: Utc::now(),
            action: EventAction::Reopen,
            payload: String::new(),
            agent: "alice".into(),
            synced: false,
        };
        assert!(event.decode_payload().unwrap().is_empty());
    }

    #[test]
    fn changed_field_names_order() {
        let payload = EventPayload {
            labels: Some(vec!["a".into()]),
            priority: Some(0),
            title: Some("t".into()),
            ..Default::default()
        };
        assert_eq!(
            payload.changed_field_names(),
            vec!["title", "priority", "labels"]
        );
    }
}
