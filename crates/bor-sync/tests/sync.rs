//! Sync manager integration tests against a scriptable mock upstream.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};

use bor_core::enums::{EventAction, Status};
use bor_core::event::{Event, EventPayload};
use bor_core::model::{Issue, Repo};
use bor_core::wire;
use bor_core::TRACKER_LABEL;
use bor_storage::{SqliteStore, SyncCursor};
use bor_sync::{
    IssuePage, RateGate, RateLimit, SyncError, SyncManager, Upstream, UpstreamComment,
    UpstreamError, UpstreamIssue, Visibility, SYNC_AGENT,
};

// ---------------------------------------------------------------------------
// Mock upstream
// ---------------------------------------------------------------------------

struct MockState {
    issues: Vec<UpstreamIssue>,
    comments: HashMap<i64, Vec<UpstreamComment>>,
    next_number: i64,
    next_comment_id: i64,
    fail_list_issues: bool,
    visibility: Visibility,
}

impl Default for MockState {
    fn default() -> Self {
        Self {
            issues: Vec::new(),
            comments: HashMap::new(),
            next_number: 1,
            next_comment_id: 1000,
            fail_list_issues: false,
            visibility: Visibility::Private,
        }
    }
}

#[derive(Default)]
struct MockUpstream {
    state: StdMutex<MockState>,
    list_issues_calls: AtomicUsize,
    /// Held by tests to park pulls mid-cycle.
    pull_gate: tokio::sync::Mutex<()>,
}

impl MockUpstream {
    fn with_state(f: impl FnOnce(&mut MockState)) -> Arc<Self> {
        let mock = Self::default();
        {
            let mut state = mock.state.lock().unwrap();
            f(&mut state);
        }
        Arc::new(mock)
    }

    fn comments_for(&self, number: i64) -> Vec<UpstreamComment> {
        self.state
            .lock()
            .unwrap()
            .comments
            .get(&number)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl Upstream for MockUpstream {
    async fn list_issues(
        &self,
        _repo: &Repo,
        label: &str,
        etag: Option<&str>,
    ) -> Result<IssuePage, UpstreamError> {
        self.list_issues_calls.fetch_add(1, Ordering::SeqCst);
        let _parked = self.pull_gate.lock().await;

        assert_eq!(label, TRACKER_LABEL);
        let state = self.state.lock().unwrap();
        if state.fail_list_issues {
            return Err(UpstreamError::Status {
                status: 502,
                message: "bad gateway".into(),
            });
        }
        Ok(IssuePage {
            issues: state.issues.clone(),
            etag: etag.map(str::to_owned),
            not_modified: false,
        })
    }

    async fn list_comments(
        &self,
        _repo: &Repo,
        number: i64,
        _since: Option<DateTime<Utc>>,
    ) -> Result<Vec<UpstreamComment>, UpstreamError> {
        Ok(self.comments_for(number))
    }

    async fn create_issue(
        &self,
        _repo: &Repo,
        title: &str,
        body: &str,
        labels: &[String],
    ) -> Result<UpstreamIssue, UpstreamError> {
        let mut state = self.state.lock().unwrap();
        let number = state.next_number;
        state.next_number += 1;
        let issue = UpstreamIssue {
            number,
            title: title.to_owned(),
            body: body.to_owned(),
            labels: labels.to_vec(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        state.issues.push(issue.clone());
        Ok(issue)
    }

    async fn create_comment(
        &self,
        _repo: &Repo,
        number: i64,
        body: &str,
    ) -> Result<UpstreamComment, UpstreamError> {
        let mut state = self.state.lock().unwrap();
        let id = state.next_comment_id;
        state.next_comment_id += 1;
        let comment = UpstreamComment {
            id,
            body: body.to_owned(),
            author: "boxofrocks[bot]".into(),
            author_trusted: true,
            created_at: Utc::now(),
        };
        state.comments.entry(number).or_default().push(comment.clone());
        Ok(comment)
    }

    async fn rate_limit(&self) -> Result<RateLimit, UpstreamError> {
        Ok(RateLimit {
            remaining: 5000,
            reset: Utc::now() + ChronoDuration::hours(1),
        })
    }

    async fn repo_visibility(&self, _repo: &Repo) -> Result<Visibility, UpstreamError> {
        Ok(self.state.lock().unwrap().visibility)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn setup_repo(store: &SqliteStore) -> Repo {
    store.add_repo(&Repo::new("octo", "rocks")).unwrap()
}

fn local_issue(store: &SqliteStore, repo: &Repo, title: &str) -> Issue {
    let issue = store
        .create_issue(&Issue {
            repo_id: repo.id,
            title: title.into(),
            description: "something broke".into(),
            ..Issue::default()
        })
        .unwrap();

    let payload = EventPayload {
        title: Some(issue.title.clone()),
        description: Some(issue.description.clone()),
        priority: Some(issue.priority),
        ..Default::default()
    };
    let event = Event::new(
        repo.id,
        issue.id,
        EventAction::Create,
        &payload,
        "tester",
        Utc::now(),
    )
    .unwrap();
    store.append_event(&event).unwrap();
    issue
}

fn event_comment(id: i64, action: EventAction, payload: &EventPayload) -> UpstreamComment {
    let event = Event::new(0, 0, action, payload, "remote-agent", Utc::now()).unwrap();
    UpstreamComment {
        id,
        body: wire::format_event_comment(&event).unwrap(),
        author: "remote-agent".into(),
        author_trusted: true,
        created_at: Utc::now(),
    }
}

fn manager(store: Arc<SqliteStore>, mock: Arc<MockUpstream>) -> SyncManager {
    SyncManager::new(store, mock, Arc::new(RateGate::new()))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn push_creates_upstream_issue_and_marks_synced() {
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    let repo = setup_repo(&store);
    let issue = local_issue(&store, &repo, "Broken login");

    let mock = MockUpstream::with_state(|_| {});
    let sync = manager(store.clone(), mock.clone());
    sync.start().unwrap();
    sync.force_sync(repo.id, false).await.unwrap();

    // The upstream issue exists with the tracker label and the create
    // event rode along as its first comment.
    let state_issue = mock.state.lock().unwrap().issues[0].clone();
    assert_eq!(state_issue.title, "Broken login");
    assert!(state_issue.labels.contains(&TRACKER_LABEL.to_owned()));
    let comments = mock.comments_for(state_issue.number);
    assert_eq!(comments.len(), 1);
    assert!(comments[0].body.contains("**Created**: Broken login"));

    // Local bookkeeping: number recorded, nothing pending, repo synced.
    let local = store.get_issue(issue.id).unwrap();
    assert_eq!(local.upstream_number, Some(state_issue.number));
    assert_eq!(store.count_pending_events(repo.id).unwrap(), 0);
    assert!(store.get_repo(repo.id).unwrap().last_sync_at.is_some());

    sync.stop().await;
}

#[tokio::test]
async fn incremental_pull_skips_comments_behind_cursor() {
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    let repo = setup_repo(&store);

    // Local mirror of upstream issue #7, cursor already at comment 100.
    let mirrored = store
        .create_issue(&Issue {
            repo_id: repo.id,
            upstream_number: Some(7),
            title: "Mirrored".into(),
            ..Issue::default()
        })
        .unwrap();
    let create = Event::new(
        repo.id,
        mirrored.id,
        EventAction::Create,
        &EventPayload {
            title: Some("Mirrored".into()),
            ..Default::default()
        },
        SYNC_AGENT,
        Utc::now(),
    )
    .unwrap();
    let create = store.append_event(&create).unwrap();
    store.mark_event_synced(create.id, 50).unwrap();
    store
        .set_cursor(
            repo.id,
            7,
            SyncCursor {
                last_comment_id: 100,
                last_comment_at: Some(Utc::now() - ChronoDuration::hours(1)),
            },
        )
        .unwrap();

    let mock = MockUpstream::with_state(|state| {
        state.issues.push(UpstreamIssue {
            number: 7,
            title: "Mirrored".into(),
            body: String::new(),
            labels: vec![TRACKER_LABEL.into()],
            created_at: Utc::now() - ChronoDuration::hours(2),
            updated_at: Utc::now(),
        });
        state.comments.insert(
            7,
            vec![
                event_comment(100, EventAction::Close, &EventPayload::default()),
                event_comment(
                    200,
                    EventAction::Comment,
                    &EventPayload {
                        comment: Some("still seeing this".into()),
                        ..Default::default()
                    },
                ),
            ],
        );
    });

    let sync = manager(store.clone(), mock.clone());
    sync.start().unwrap();
    sync.force_sync(repo.id, false).await.unwrap();

    // Only comment 200 produced an event; the close behind the cursor
    // never applied.
    let local = store.get_issue(mirrored.id).unwrap();
    assert_eq!(local.status, Status::Open);
    assert_eq!(local.comments.len(), 1);
    assert_eq!(local.comments[0].text, "still seeing this");

    assert!(store.has_upstream_comment(repo.id, 200).unwrap());
    assert!(!store.has_upstream_comment(repo.id, 100).unwrap());
    assert_eq!(store.get_cursor(repo.id, 7).unwrap().last_comment_id, 200);

    // A second forced cycle ingests nothing new.
    sync.force_sync(repo.id, false).await.unwrap();
    assert_eq!(store.list_events(mirrored.id).unwrap().len(), 2);

    sync.stop().await;
}

#[tokio::test]
async fn pull_synthesizes_upstream_born_issue() {
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    let repo = setup_repo(&store);

    let meta = wire::IssueMeta {
        status: Status::InProgress,
        priority: 1,
        issue_type: bor_core::enums::IssueType::Bug,
        owner: "carol".into(),
        labels: vec!["backend".into()],
        comments: None,
    };
    let body = wire::render_body("Seen on the big tenant.", &meta).unwrap();

    let mock = MockUpstream::with_state(|state| {
        state.issues.push(UpstreamIssue {
            number: 31,
            title: "Timeout on import".into(),
            body,
            labels: vec![TRACKER_LABEL.into(), "backend".into()],
            created_at: Utc::now() - ChronoDuration::days(1),
            updated_at: Utc::now(),
        });
    });

    let sync = manager(store.clone(), mock.clone());
    sync.start().unwrap();
    sync.force_sync(repo.id, false).await.unwrap();

    let local = store
        .find_issue_by_upstream(repo.id, 31)
        .unwrap()
        .expect("issue should be synthesized");
    assert_eq!(local.title, "Timeout on import");
    assert_eq!(local.description, "Seen on the big tenant.");
    assert_eq!(local.status, Status::InProgress);
    assert_eq!(local.priority, 1);
    assert_eq!(local.owner, "carol");
    assert_eq!(local.labels, vec!["backend".to_string()]);

    // The synthetic create event is synced and was posted upstream.
    let events = store.list_events(local.id).unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].action, EventAction::Create);
    assert_eq!(events[0].agent, SYNC_AGENT);
    assert!(events[0].synced);
    let posted = mock.comments_for(31);
    assert_eq!(posted.len(), 1);
    assert!(posted[0].body.contains("**Created**: Timeout on import"));

    // Cursor sits past the posted comment, so the echo never re-ingests.
    let cursor = store.get_cursor(repo.id, 31).unwrap();
    assert_eq!(cursor.last_comment_id, posted[0].id);

    sync.stop().await;
}

#[tokio::test]
async fn synthesized_issue_without_metadata_strips_tracker_label() {
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    let repo = setup_repo(&store);

    let mock = MockUpstream::with_state(|state| {
        state.issues.push(UpstreamIssue {
            number: 8,
            title: "Raw upstream issue".into(),
            body: "filed by a human".into(),
            labels: vec![TRACKER_LABEL.into(), "docs".into()],
            created_at: Utc::now(),
            updated_at: Utc::now(),
        });
    });

    let sync = manager(store.clone(), mock.clone());
    sync.start().unwrap();
    sync.force_sync(repo.id, false).await.unwrap();

    let local = store.find_issue_by_upstream(repo.id, 8).unwrap().unwrap();
    assert_eq!(local.labels, vec!["docs".to_string()]);
    assert_eq!(local.description, "filed by a human");

    sync.stop().await;
}

#[tokio::test]
async fn failed_pull_still_advances_last_sync() {
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    let repo = setup_repo(&store);

    let mock = MockUpstream::with_state(|state| {
        state.fail_list_issues = true;
    });

    let sync = manager(store.clone(), mock.clone());
    sync.start().unwrap();

    let err = sync.force_sync(repo.id, false).await.unwrap_err();
    assert!(matches!(err, SyncError::Cycle(_)), "{err}");

    // Push succeeded (nothing to push), so last_sync_at advanced even
    // though the pull failed; the error is recorded in status.
    let repo_row = store.get_repo(repo.id).unwrap();
    assert!(repo_row.last_sync_at.is_some());

    let status = sync.status();
    let repo_status = &status["octo/rocks"];
    assert!(repo_status.last_error.as_deref().unwrap_or("").contains("502"));

    sync.stop().await;
}

#[tokio::test]
async fn untrusted_authors_skipped_on_guarded_repo() {
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    let mut repo = setup_repo(&store);
    repo.trusted_authors_only = true;
    store.update_repo(&repo).unwrap();

    let mirrored = store
        .create_issue(&Issue {
            repo_id: repo.id,
            upstream_number: Some(4),
            title: "Guarded".into(),
            ..Issue::default()
        })
        .unwrap();
    let create = Event::new(
        repo.id,
        mirrored.id,
        EventAction::Create,
        &EventPayload::default(),
        SYNC_AGENT,
        Utc::now(),
    )
    .unwrap();
    let create = store.append_event(&create).unwrap();
    store.mark_event_synced(create.id, 1).unwrap();

    let mut untrusted = event_comment(
        300,
        EventAction::Close,
        &EventPayload::default(),
    );
    untrusted.author_trusted = false;

    let mock = MockUpstream::with_state(|state| {
        state.issues.push(UpstreamIssue {
            number: 4,
            title: "Guarded".into(),
            body: String::new(),
            labels: vec![TRACKER_LABEL.into()],
            created_at: Utc::now(),
            updated_at: Utc::now(),
        });
    });
    mock.state.lock().unwrap().comments.insert(4, vec![untrusted]);

    let sync = manager(store.clone(), mock.clone());
    sync.start().unwrap();
    sync.force_sync(repo.id, false).await.unwrap();

    // The untrusted close never applied.
    let local = store.get_issue(mirrored.id).unwrap();
    assert_eq!(local.status, Status::Open);

    sync.stop().await;
}

#[tokio::test]
async fn force_requests_coalesce_while_one_is_queued() {
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    let repo = setup_repo(&store);

    let mock = MockUpstream::with_state(|_| {});
    let sync = Arc::new(manager(store.clone(), mock.clone()));

    // Park the startup cycle inside its pull so force requests pile up
    // behind a busy syncer.
    let parked = mock.pull_gate.lock().await;
    sync.start().unwrap();

    let mut waiters = Vec::new();
    for _ in 0..3 {
        let sync = sync.clone();
        let repo_id = repo.id;
        waiters.push(tokio::spawn(async move {
            sync.force_sync(repo_id, false).await
        }));
    }
    // Give the waiters a chance to enqueue; the single-slot mailbox keeps
    // at most one of them.
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    drop(parked);

    for waiter in waiters {
        waiter.await.unwrap().unwrap();
    }
    // Let the one queued force drain.
    tokio::time::sleep(std::time::Duration::from_millis(200)).await;

    // Startup cycle + exactly one coalesced forced cycle.
    assert_eq!(mock.list_issues_calls.load(Ordering::SeqCst), 2);

    sync.stop().await;
}

#[tokio::test]
async fn full_replay_overwrites_local_state() {
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    let repo = setup_repo(&store);

    let mirrored = store
        .create_issue(&Issue {
            repo_id: repo.id,
            upstream_number: Some(12),
            title: "Drifted".into(),
            ..Issue::default()
        })
        .unwrap();
    let create = Event::new(
        repo.id,
        mirrored.id,
        EventAction::Create,
        &EventPayload {
            title: Some("Drifted".into()),
            ..Default::default()
        },
        SYNC_AGENT,
        Utc::now() - ChronoDuration::hours(2),
    )
    .unwrap();
    let create = store.append_event(&create).unwrap();
    store.mark_event_synced(create.id, 10).unwrap();

    // Simulate local drift: the stored row says closed but the log has
    // no close event. Full replay must restore the log's truth.
    let mut drifted = store.get_issue(mirrored.id).unwrap();
    drifted.status = Status::Closed;
    drifted.closed_at = Some(Utc::now());
    store.update_issue(&drifted).unwrap();

    let mock = MockUpstream::with_state(|state| {
        state.issues.push(UpstreamIssue {
            number: 12,
            title: "Drifted".into(),
            body: String::new(),
            labels: vec![TRACKER_LABEL.into()],
            created_at: Utc::now(),
            updated_at: Utc::now(),
        });
        state.comments.insert(
            12,
            vec![event_comment(
                700,
                EventAction::StatusChange,
                &EventPayload {
                    status: Some(Status::InProgress),
                    ..Default::default()
                },
            )],
        );
    });

    let sync = manager(store.clone(), mock.clone());
    sync.start().unwrap();
    sync.force_sync(repo.id, true).await.unwrap();

    let local = store.get_issue(mirrored.id).unwrap();
    assert_eq!(local.status, Status::InProgress);
    assert_eq!(local.closed_at, None);
    assert_eq!(local.title, "Drifted");
    assert_eq!(store.get_cursor(repo.id, 12).unwrap().last_comment_id, 700);

    sync.stop().await;
}
