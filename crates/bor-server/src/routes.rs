//! The handler set shared by every transport.

use std::collections::HashMap;

use axum::extract::{FromRequest, Path, Query, Request, State};
use axum::http::StatusCode;
use axum::response::Html;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde::{Deserialize, Serialize};

use bor_core::engine;
use bor_core::enums::{EventAction, IssueType, Status};
use bor_core::event::{Event, EventPayload};
use bor_core::filter::IssueFilter;
use bor_core::model::{DEFAULT_PRIORITY, Issue, Repo, Worktree};
use bor_sync::RepoSyncStatus;

use crate::affinity::ResolvedRepo;
use crate::error::ApiError;
use crate::state::SharedState;
use crate::ui;

/// Builds the dispatcher's router. The same router instance serves TCP,
/// worktree sockets and file queues.
pub fn router(state: SharedState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/health", get(health))
        .route("/sync", post(force_sync))
        .route("/repos", post(register_repo).get(list_repos).patch(update_repo))
        .route("/repos/paths", post(add_worktree).delete(remove_worktree))
        .route("/issues", get(list_issues).post(create_issue))
        .route("/issues/next", get(next_issue))
        .route(
            "/issues/{id}",
            get(get_issue).patch(update_issue).delete(delete_issue),
        )
        .route("/issues/{id}/assign", post(assign_issue))
        .route("/issues/{id}/comment", post(comment_issue))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// JSON extraction with the canonical error shape
// ---------------------------------------------------------------------------

/// Like [`axum::Json`], but rejections render as `{"error": ...}` with
/// status 400 instead of axum's default bodies.
pub struct ApiJson<T>(pub T);

impl<S, T> FromRequest<S> for ApiJson<T>
where
    T: serde::de::DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state)
            .await
            .map_err(|e| ApiError::BadRequest(e.body_text()))?;
        Ok(Self(value))
    }
}

// ---------------------------------------------------------------------------
// Request / response bodies
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct RegisterRepoRequest {
    owner: String,
    name: String,
    #[serde(default)]
    local_path: Option<String>,
    #[serde(default)]
    socket: bool,
    #[serde(default)]
    queue: bool,
}

#[derive(Deserialize)]
struct UpdateRepoRequest {
    #[serde(default)]
    trusted_authors_only: Option<bool>,
    #[serde(default)]
    local_path: Option<String>,
    #[serde(default)]
    socket_enabled: Option<bool>,
    #[serde(default)]
    queue_enabled: Option<bool>,
}

#[derive(Deserialize)]
struct WorktreeRequest {
    local_path: String,
    #[serde(default)]
    socket: bool,
    #[serde(default)]
    queue: bool,
}

#[derive(Deserialize)]
struct RemoveWorktreeRequest {
    local_path: String,
}

#[derive(Deserialize)]
struct CreateIssueRequest {
    title: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    priority: Option<i32>,
    #[serde(default, rename = "type", alias = "issue_type")]
    issue_type: Option<String>,
    #[serde(default)]
    labels: Vec<String>,
    #[serde(default)]
    owner: String,
    #[serde(default)]
    agent: String,
}

#[derive(Deserialize)]
struct UpdateIssueRequest {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    priority: Option<i32>,
    #[serde(default, rename = "type", alias = "issue_type")]
    issue_type: Option<String>,
    #[serde(default)]
    labels: Option<Vec<String>>,
    #[serde(default)]
    comment: Option<String>,
    #[serde(default)]
    agent: String,
}

#[derive(Deserialize)]
struct AssignRequest {
    owner: String,
    #[serde(default)]
    agent: String,
}

#[derive(Deserialize)]
struct CommentRequest {
    comment: String,
    #[serde(default)]
    agent: String,
}

#[derive(Deserialize)]
struct IssuesQuery {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    priority: Option<i32>,
    #[serde(default, rename = "type")]
    issue_type: Option<String>,
    #[serde(default)]
    owner: Option<String>,
    #[serde(default)]
    all: bool,
}

#[derive(Deserialize)]
struct SyncQuery {
    #[serde(default)]
    full: bool,
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    repos: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    uptime: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    sync_status: Option<HashMap<String, RepoSyncStatus>>,
}

#[derive(Serialize)]
struct StatusResponse {
    status: &'static str,
}

// ---------------------------------------------------------------------------
// Misc handlers
// ---------------------------------------------------------------------------

async fn index() -> Html<&'static str> {
    Html(ui::INDEX_HTML)
}

async fn health(State(state): State<SharedState>) -> Result<Json<HealthResponse>, ApiError> {
    let repos = state
        .store
        .list_repos()?
        .into_iter()
        .map(|r| r.full_name())
        .collect();
    Ok(Json(HealthResponse {
        status: "ok",
        repos,
        uptime: state.started_at.map(|t| fmt_duration(t.elapsed())),
        sync_status: state.sync.as_ref().map(|sync| sync.status()),
    }))
}

async fn force_sync(
    State(state): State<SharedState>,
    ResolvedRepo(repo): ResolvedRepo,
    Query(query): Query<SyncQuery>,
) -> Result<Json<StatusResponse>, ApiError> {
    let sync = state
        .sync
        .as_ref()
        .ok_or_else(|| ApiError::BadRequest("sync manager not attached".into()))?;
    sync.force_sync(repo.id, query.full)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    Ok(Json(StatusResponse { status: "ok" }))
}

// ---------------------------------------------------------------------------
// Repo handlers
// ---------------------------------------------------------------------------

async fn register_repo(
    State(state): State<SharedState>,
    ApiJson(body): ApiJson<RegisterRepoRequest>,
) -> Result<(StatusCode, Json<Repo>), ApiError> {
    let full_name = format!("{}/{}", body.owner, body.name);
    if Repo::parse_full_name(&full_name).is_none() {
        return Err(ApiError::BadRequest(format!(
            "invalid repo format: {full_name} (want owner/name)"
        )));
    }

    let repo = state.store.add_repo(&Repo::new(body.owner, body.name))?;

    if let Some(local_path) = &body.local_path {
        let worktree = state
            .store
            .add_worktree(repo.id, local_path, body.socket, body.queue)?;
        state.transports.start_for_worktree(&worktree);
    }
    if let Some(sync) = &state.sync {
        sync.add_repo(&repo);
    }

    Ok((StatusCode::CREATED, Json(repo)))
}

async fn list_repos(State(state): State<SharedState>) -> Result<Json<Vec<Repo>>, ApiError> {
    Ok(Json(state.store.list_repos()?))
}

async fn update_repo(
    State(state): State<SharedState>,
    ResolvedRepo(mut repo): ResolvedRepo,
    ApiJson(body): ApiJson<UpdateRepoRequest>,
) -> Result<Json<Repo>, ApiError> {
    if let Some(trusted) = body.trusted_authors_only {
        repo.trusted_authors_only = trusted;
        state.store.update_repo(&repo)?;
    }

    if let Some(local_path) = &body.local_path {
        let worktree = state.store.add_worktree(
            repo.id,
            local_path,
            body.socket_enabled.unwrap_or(false),
            body.queue_enabled.unwrap_or(false),
        )?;
        state.transports.start_for_worktree(&worktree);
    }

    Ok(Json(state.store.get_repo(repo.id)?))
}

async fn add_worktree(
    State(state): State<SharedState>,
    ResolvedRepo(repo): ResolvedRepo,
    ApiJson(body): ApiJson<WorktreeRequest>,
) -> Result<(StatusCode, Json<Worktree>), ApiError> {
    let worktree = state
        .store
        .add_worktree(repo.id, &body.local_path, body.socket, body.queue)?;
    state.transports.start_for_worktree(&worktree);
    Ok((StatusCode::CREATED, Json(worktree)))
}

async fn remove_worktree(
    State(state): State<SharedState>,
    ResolvedRepo(repo): ResolvedRepo,
    ApiJson(body): ApiJson<RemoveWorktreeRequest>,
) -> Result<Json<StatusResponse>, ApiError> {
    state.transports.stop_for_worktree(&body.local_path).await;
    state.store.remove_worktree(repo.id, &body.local_path)?;
    Ok(Json(StatusResponse { status: "removed" }))
}

// ---------------------------------------------------------------------------
// Issue handlers
// ---------------------------------------------------------------------------

async fn list_issues(
    State(state): State<SharedState>,
    ResolvedRepo(repo): ResolvedRepo,
    Query(query): Query<IssuesQuery>,
) -> Result<Json<Vec<Issue>>, ApiError> {
    let filter = IssueFilter {
        repo_id: Some(repo.id),
        status: query.status.as_deref().map(parse_status).transpose()?,
        priority: query.priority,
        issue_type: query.issue_type.as_deref().map(parse_issue_type).transpose()?,
        owner: query.owner,
        include_deleted: query.all,
    };
    Ok(Json(state.store.list_issues(&filter)?))
}

async fn create_issue(
    State(state): State<SharedState>,
    ResolvedRepo(repo): ResolvedRepo,
    ApiJson(body): ApiJson<CreateIssueRequest>,
) -> Result<(StatusCode, Json<Issue>), ApiError> {
    if body.title.trim().is_empty() {
        return Err(ApiError::BadRequest("title is required".into()));
    }
    let issue_type = body
        .issue_type
        .as_deref()
        .map(parse_issue_type)
        .transpose()?
        .unwrap_or_default();

    let now = Utc::now();
    let mut issue = Issue {
        repo_id: repo.id,
        title: body.title.clone(),
        description: body.description.clone(),
        priority: body.priority.unwrap_or(DEFAULT_PRIORITY),
        issue_type: issue_type.clone(),
        owner: body.owner.clone(),
        created_at: now,
        updated_at: now,
        ..Issue::default()
    };
    issue.set_labels(body.labels.clone());
    let issue = state.store.create_issue(&issue)?;

    let payload = EventPayload {
        title: Some(body.title),
        description: none_if_empty(body.description),
        priority: Some(issue.priority),
        issue_type: Some(issue_type),
        labels: if issue.labels.is_empty() {
            None
        } else {
            Some(issue.labels.clone())
        },
        owner: none_if_empty(body.owner),
        ..Default::default()
    };
    let event = Event::new(
        repo.id,
        issue.id,
        EventAction::Create,
        &payload,
        body.agent,
        now,
    )?;
    state.store.append_event(&event)?;

    Ok((StatusCode::CREATED, Json(issue)))
}

async fn next_issue(
    State(state): State<SharedState>,
    ResolvedRepo(repo): ResolvedRepo,
) -> Result<Json<Issue>, ApiError> {
    state
        .store
        .next_issue(repo.id)?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound("no actionable issues".into()))
}

async fn get_issue(
    State(state): State<SharedState>,
    Path(id): Path<i64>,
) -> Result<Json<Issue>, ApiError> {
    Ok(Json(state.store.get_issue(id)?))
}

/// The update handler emits at most one status event, at most one update
/// event and at most one comment event per request; a comment only ever
/// rides on a single event.
async fn update_issue(
    State(state): State<SharedState>,
    Path(id): Path<i64>,
    ApiJson(body): ApiJson<UpdateIssueRequest>,
) -> Result<Json<Issue>, ApiError> {
    let mut issue = state.store.get_issue(id)?;
    let now = Utc::now();
    let comment = body.comment.filter(|c| !c.is_empty());

    let mut planned: Vec<(EventAction, EventPayload)> = Vec::new();
    let mut comment_attached = false;

    if let Some(status_str) = &body.status {
        let status = parse_status(status_str)?;
        if status != issue.status {
            let action = if status == Status::Closed {
                EventAction::Close
            } else {
                EventAction::StatusChange
            };
            planned.push((
                action,
                EventPayload {
                    status: Some(status),
                    from_status: Some(issue.status.clone()),
                    comment: comment.clone(),
                    ..Default::default()
                },
            ));
            comment_attached = comment.is_some();
        }
    }

    let has_field_change = body.title.is_some()
        || body.description.is_some()
        || body.priority.is_some()
        || body.issue_type.is_some()
        || body.labels.is_some();
    if has_field_change {
        let issue_type = body
            .issue_type
            .as_deref()
            .map(parse_issue_type)
            .transpose()?;
        planned.push((
            EventAction::Update,
            EventPayload {
                title: body.title,
                description: body.description,
                priority: body.priority,
                issue_type,
                labels: body.labels,
                comment: if comment_attached {
                    None
                } else {
                    comment.clone()
                },
                ..Default::default()
            },
        ));
        comment_attached = comment_attached || comment.is_some();
    }

    if !comment_attached {
        if let Some(text) = comment {
            planned.push((
                EventAction::Comment,
                EventPayload {
                    comment: Some(text),
                    ..Default::default()
                },
            ));
        }
    }

    for (action, payload) in planned {
        let event = Event::new(issue.repo_id, issue.id, action, &payload, &body.agent, now)?;
        let event = state.store.append_event(&event)?;
        issue = engine::apply(issue, &event)?;
    }
    state.store.update_issue(&issue)?;

    Ok(Json(state.store.get_issue(id)?))
}

async fn delete_issue(
    State(state): State<SharedState>,
    Path(id): Path<i64>,
) -> Result<Json<Issue>, ApiError> {
    let issue = state.store.get_issue(id)?;
    let event = Event::new(
        issue.repo_id,
        issue.id,
        EventAction::Delete,
        &EventPayload::default(),
        "",
        Utc::now(),
    )?;
    let event = state.store.append_event(&event)?;
    let issue = engine::apply(issue, &event)?;
    state.store.update_issue(&issue)?;
    Ok(Json(issue))
}

async fn assign_issue(
    State(state): State<SharedState>,
    Path(id): Path<i64>,
    ApiJson(body): ApiJson<AssignRequest>,
) -> Result<Json<Issue>, ApiError> {
    let issue = state.store.get_issue(id)?;
    let event = Event::new(
        issue.repo_id,
        issue.id,
        EventAction::Assign,
        &EventPayload {
            owner: Some(body.owner),
            ..Default::default()
        },
        body.agent,
        Utc::now(),
    )?;
    let event = state.store.append_event(&event)?;
    let issue = engine::apply(issue, &event)?;
    state.store.update_issue(&issue)?;
    Ok(Json(issue))
}

async fn comment_issue(
    State(state): State<SharedState>,
    Path(id): Path<i64>,
    ApiJson(body): ApiJson<CommentRequest>,
) -> Result<Json<Issue>, ApiError> {
    if body.comment.trim().is_empty() {
        return Err(ApiError::BadRequest("comment must not be empty".into()));
    }
    let issue = state.store.get_issue(id)?;
    let event = Event::new(
        issue.repo_id,
        issue.id,
        EventAction::Comment,
        &EventPayload {
            comment: Some(body.comment),
            ..Default::default()
        },
        body.agent,
        Utc::now(),
    )?;
    let event = state.store.append_event(&event)?;
    let issue = engine::apply(issue, &event)?;
    state.store.update_issue(&issue)?;
    Ok(Json(issue))
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn parse_status(s: &str) -> Result<Status, ApiError> {
    let status = Status::from(s);
    if !status.is_builtin() {
        return Err(ApiError::BadRequest(format!("invalid status value: {s}")));
    }
    Ok(status)
}

fn parse_issue_type(s: &str) -> Result<IssueType, ApiError> {
    let issue_type = IssueType::from(s);
    if !issue_type.is_builtin() {
        return Err(ApiError::BadRequest(format!("invalid issue type: {s}")));
    }
    Ok(issue_type)
}

fn none_if_empty(s: String) -> Option<String> {
    if s.is_empty() { None } else { Some(s) }
}

/// Human-readable uptime: `2h3m17s`, `45s`, ...
fn fmt_duration(d: std::time::Duration) -> String {
    let total = d.as_secs();
    let (hours, minutes, seconds) = (total / 3600, (total % 3600) / 60, total % 60);
    if hours > 0 {
        format!("{hours}h{minutes}m{seconds}s")
    } else if minutes > 0 {
        format!("{minutes}m{seconds}s")
    } else {
        format!("{seconds}s")
    }
}
