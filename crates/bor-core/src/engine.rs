//! Pure event engine: fold events into issue state.
//!
//! No I/O and no clock. `updated_at` always comes from the event's own
//! timestamp, which the caller fills.

use std::collections::BTreeMap;

use crate::enums::{EventAction, Status};
use crate::event::Event;
use crate::model::{Comment, Issue};

/// Errors from applying or replaying events.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The event carries an action this binary does not know.
    #[error("unknown event action: {0}")]
    UnknownAction(String),

    /// The first event for an issue must be `create`.
    #[error("first event for issue {issue_id} is '{action}', expected 'create'")]
    MissingCreate {
        /// The offending issue.
        issue_id: i64,
        /// The action that appeared first instead.
        action: String,
    },

    /// The payload JSON-string could not be decoded.
    #[error("invalid event payload: {0}")]
    Payload(#[from] serde_json::Error),
}

/// Folds one event into `issue` and returns the new value.
pub fn apply(mut issue: Issue, event: &Event) -> Result<Issue, EngineError> {
    let payload = event.decode_payload()?;

    match &event.action {
        EventAction::Create => {
            if let Some(title) = payload.title {
                issue.title = title;
            }
            if let Some(description) = payload.description {
                issue.description = description;
            }
            if let Some(priority) = payload.priority {
                issue.priority = priority;
            }
            if let Some(issue_type) = payload.issue_type {
                issue.issue_type = issue_type;
            }
            if let Some(labels) = payload.labels {
                issue.set_labels(labels);
            }
            if let Some(owner) = payload.owner {
                issue.owner = owner;
            }
            issue.status = payload.status.unwrap_or(Status::Open);
            issue.created_at = event.timestamp;
        }
        EventAction::Update => {
            if let Some(title) = payload.title {
                issue.title = title;
            }
            if let Some(description) = payload.description {
                issue.description = description;
            }
            if let Some(priority) = payload.priority {
                issue.priority = priority;
            }
            if let Some(issue_type) = payload.issue_type {
                issue.issue_type = issue_type;
            }
            if let Some(labels) = payload.labels {
                issue.set_labels(labels);
            }
            if let Some(comment) = payload.comment {
                push_comment(&mut issue, comment, event);
            }
        }
        EventAction::StatusChange => {
            if let Some(status) = payload.status {
                set_status(&mut issue, status, event);
            }
            if let Some(comment) = payload.comment {
                push_comment(&mut issue, comment, event);
            }
        }
        EventAction::Close => {
            issue.status = Status::Closed;
            issue.closed_at = Some(event.timestamp);
            if let Some(comment) = payload.comment {
                push_comment(&mut issue, comment, event);
            }
        }
        EventAction::Reopen => {
            issue.status = Status::Open;
            issue.closed_at = None;
        }
        EventAction::Assign => {
            issue.owner = payload.owner.unwrap_or_default();
        }
        EventAction::Comment => {
            push_comment(&mut issue, payload.comment.unwrap_or_default(), event);
        }
        EventAction::Delete => {
            issue.status = Status::Deleted;
        }
        EventAction::Custom(other) => {
            return Err(EngineError::UnknownAction(other.clone()));
        }
    }

    issue.updated_at = event.timestamp;
    Ok(issue)
}

/// Groups `events` by issue, sorts each group by event id ascending, and
/// folds each group from a zero-valued issue. The first event of every
/// group must be `create`.
pub fn replay(events: &[Event]) -> Result<BTreeMap<i64, Issue>, EngineError> {
    let mut groups: BTreeMap<i64, Vec<&Event>> = BTreeMap::new();
    for event in events {
        groups.entry(event.issue_id).or_default().push(event);
    }

    let mut issues = BTreeMap::new();
    for (issue_id, mut group) in groups {
        group.sort_by_key(|e| e.id);

        let first = group[0];
        if first.action != EventAction::Create {
            return Err(EngineError::MissingCreate {
                issue_id,
                action: first.action.to_string(),
            });
        }

        let mut issue = Issue {
            id: issue_id,
            repo_id: first.repo_id,
            ..Issue::default()
        };
        for event in group {
            issue = apply(issue, event)?;
        }
        issues.insert(issue_id, issue);
    }

    Ok(issues)
}

fn push_comment(issue: &mut Issue, text: String, event: &Event) {
    if text.is_empty() {
        return;
    }
    issue.comments.push(Comment {
        text,
        author: event.agent.clone(),
        timestamp: event.timestamp,
    });
}

/// Applies a status transition while keeping `closed_at` consistent with
/// the closed-iff-set invariant for streams that move through `closed`
/// via plain status changes.
fn set_status(issue: &mut Issue, status: Status, event: &Event) {
    if status == Status::Closed {
        issue.closed_at = Some(event.timestamp);
    } else if issue.status == Status::Closed {
        issue.closed_at = None;
    }
    issue.status = status;
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::event::EventPayload;

    fn ts(secs: i64) -> chrono::DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn event(id: i64, action: EventAction, payload: EventPayload) -> Event {
        let mut e = Event::new(1, 10, action, &payload, "tester", ts(id)).unwrap();
        e.id = id;
        e
    }

    #[test]
    fn create_sets_fields_and_defaults_status() {
        let create = event(
            1,
            EventAction::Create,
            EventPayload {
                title: Some("Broken build".into()),
                priority: Some(0),
                labels: Some(vec!["ci".into(), "ci".into()]),
                ..Default::default()
            },
        );
        let issue = apply(Issue::default(), &create).unwrap();
        assert_eq!(issue.title, "Broken build");
        assert_eq!(issue.status, Status::Open);
        assert_eq!(issue.priority, 0);
        assert_eq!(issue.labels, vec!["ci".to_string()]);
        assert_eq!(issue.created_at, ts(1));
        assert_eq!(issue.updated_at, ts(1));
    }

    #[test]
    fn update_appends_comment_when_present() {
        let issue = apply(
            Issue::default(),
            &event(
                1,
                EventAction::Update,
                EventPayload {
                    description: Some("new text".into()),
                    comment: Some("rewrote the description".into()),
                    ..Default::default()
                },
            ),
        )
        .unwrap();
        assert_eq!(issue.description, "new text");
        assert_eq!(issue.comments.len(), 1);
        assert_eq!(issue.comments[0].author, "tester");
    }

    #[test]
    fn close_then_reopen_toggles_closed_at() {
        let closed = apply(
            Issue::default(),
            &event(2, EventAction::Close, EventPayload::default()),
        )
        .unwrap();
        assert_eq!(closed.status, Status::Closed);
        assert_eq!(closed.closed_at, Some(ts(2)));

        let reopened = apply(closed, &event(3, EventAction::Reopen, EventPayload::default()))
            .unwrap();
        assert_eq!(reopened.status, Status::Open);
        assert_eq!(reopened.closed_at, None);
    }

    #[test]
    fn assign_empty_owner_unassigns() {
        let mut issue = Issue::default();
        issue.owner = "bob".into();
        let issue = apply(
            issue,
            &event(
                4,
                EventAction::Assign,
                EventPayload {
                    owner: Some(String::new()),
                    ..Default::default()
                },
            ),
        )
        .unwrap();
        assert_eq!(issue.owner, "");
    }

    #[test]
    fn unknown_action_is_an_error() {
        let mut e = event(5, EventAction::Create, EventPayload::default());
        e.action = EventAction::Custom("merge".into());
        let err = apply(Issue::default(), &e).unwrap_err();
        assert!(matches!(err, EngineError::UnknownAction(a) if a == "merge"));
    }

    #[test]
    fn replay_requires_create_first() {
        let events = vec![event(1, EventAction::Close, EventPayload::default())];
        let err = replay(&events).unwrap_err();
        assert!(matches!(err, EngineError::MissingCreate { issue_id: 10, .. }));
    }

    #[test]
    fn replay_full_convergence() {
        // create(title "X") -> in_progress -> open -> close
        let events = vec![
            event(
                1,
                EventAction::Create,
                EventPayload {
                    title: Some("X".into()),
                    ..Default::default()
                },
            ),
            event(
                2,
                EventAction::StatusChange,
                EventPayload {
                    status: Some(Status::InProgress),
                    ..Default::default()
                },
            ),
            event(
                3,
                EventAction::StatusChange,
                EventPayload {
                    status: Some(Status::Open),
                    ..Default::default()
                },
            ),
            event(4, EventAction::Close, EventPayload::default()),
        ];

        let issues = replay(&events).unwrap();
        let issue = &issues[&10];
        assert_eq!(issue.title, "X");
        assert_eq!(issue.status, Status::Closed);
        assert_eq!(issue.closed_at, Some(ts(4)));
    }

    #[test]
    fn replay_sorts_by_event_id() {
        let mut create = event(
            1,
            EventAction::Create,
            EventPayload {
                title: Some("ordered".into()),
                ..Default::default()
            },
        );
        create.id = 1;
        let mut close = event(2, EventAction::Close, EventPayload::default());
        close.id = 9;

        // Deliver out of order; replay must sort by id.
        let issues = replay(&[close, create]).unwrap();
        assert_eq!(issues[&10].status, Status::Closed);
    }
}
