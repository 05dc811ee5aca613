//! GitHub implementation of the [`Upstream`] contract.
//!
//! Speaks the REST v3 issue/comment endpoints. Every response feeds the
//! shared rate gate from the `x-ratelimit-*` headers, and issue listings
//! carry `If-None-Match` so unchanged pages cost no quota.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use reqwest::header::{ACCEPT, AUTHORIZATION, IF_NONE_MATCH, USER_AGENT};
use reqwest::{Response, StatusCode};
use serde::Deserialize;
use tracing::debug;

use bor_core::model::Repo;

use crate::ratelimit::RateGate;
use crate::upstream::{
    IssuePage, RateLimit, Upstream, UpstreamComment, UpstreamError, UpstreamIssue, Visibility,
};

const LOG_TARGET: &str = "bor::github";
const DEFAULT_API_BASE: &str = "https://api.github.com";
const ACCEPT_JSON: &str = "application/vnd.github+json";
const AGENT: &str = "boxofrocks";

/// GitHub REST client.
pub struct GithubUpstream {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
    gate: Arc<RateGate>,
}

impl GithubUpstream {
    pub fn new(token: Option<String>, gate: Arc<RateGate>) -> Self {
        Self::with_base_url(DEFAULT_API_BASE, token, gate)
    }

    /// Overridable base URL, used by tests pointing at a local stub.
    pub fn with_base_url(
        base_url: impl Into<String>,
        token: Option<String>,
        gate: Arc<RateGate>,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            token,
            gate,
        }
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let mut builder = self
            .client
            .request(method, format!("{}{path}", self.base_url))
            .header(ACCEPT, ACCEPT_JSON)
            .header(USER_AGENT, AGENT);
        if let Some(token) = &self.token {
            builder = builder.header(AUTHORIZATION, format!("Bearer {token}"));
        }
        builder
    }

    /// Records the rate-limit headers riding on `response`.
    fn observe_rate_limit(&self, response: &Response) {
        let header = |name: &str| {
            response
                .headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<i64>().ok())
        };
        if let (Some(remaining), Some(reset)) =
            (header("x-ratelimit-remaining"), header("x-ratelimit-reset"))
        {
            if let Some(reset) = Utc.timestamp_opt(reset, 0).single() {
                self.gate.observe(RateLimit { remaining, reset });
            }
        }
    }

    /// Maps a non-success response into an error, consuming the body for
    /// the message.
    async fn error_for(&self, response: Response) -> UpstreamError {
        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            return UpstreamError::Unauthorized;
        }
        let message = response.text().await.unwrap_or_default();
        UpstreamError::Status {
            status: status.as_u16(),
            message: truncate(&message, 200),
        }
    }

    async fn send(&self, builder: reqwest::RequestBuilder) -> Result<Response, UpstreamError> {
        let response = builder
            .send()
            .await
            .map_err(|e| UpstreamError::Transport(e.to_string()))?;
        self.observe_rate_limit(&response);
        Ok(response)
    }
}

// ---------------------------------------------------------------------------
// Response DTOs
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct IssueDto {
    number: i64,
    title: String,
    #[serde(default)]
    body: Option<String>,
    #[serde(default)]
    labels: Vec<LabelDto>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    /// Present when the "issue" is actually a pull request.
    #[serde(default)]
    pull_request: Option<serde_json::Value>,
}

#[derive(Deserialize)]
struct LabelDto {
    name: String,
}

#[derive(Deserialize)]
struct CommentDto {
    id: i64,
    #[serde(default)]
    body: Option<String>,
    #[serde(default)]
    user: Option<UserDto>,
    #[serde(default)]
    author_association: Option<String>,
    created_at: DateTime<Utc>,
}

#[derive(Deserialize)]
struct UserDto {
    login: String,
}

#[derive(Deserialize)]
struct RepoDto {
    private: bool,
}

#[derive(Deserialize)]
struct RateLimitDto {
    resources: RateLimitResources,
}

#[derive(Deserialize)]
struct RateLimitResources {
    core: RateLimitCore,
}

#[derive(Deserialize)]
struct RateLimitCore {
    remaining: i64,
    reset: i64,
}

impl From<IssueDto> for UpstreamIssue {
    fn from(dto: IssueDto) -> Self {
        Self {
            number: dto.number,
            title: dto.title,
            body: dto.body.unwrap_or_default(),
            labels: dto.labels.into_iter().map(|l| l.name).collect(),
            created_at: dto.created_at,
            updated_at: dto.updated_at,
        }
    }
}

impl From<CommentDto> for UpstreamComment {
    fn from(dto: CommentDto) -> Self {
        let author_trusted = matches!(
            dto.author_association.as_deref(),
            Some("OWNER") | Some("MEMBER") | Some("COLLABORATOR")
        );
        Self {
            id: dto.id,
            body: dto.body.unwrap_or_default(),
            author: dto.user.map(|u| u.login).unwrap_or_default(),
            author_trusted,
            created_at: dto.created_at,
        }
    }
}

#[async_trait]
impl Upstream for GithubUpstream {
    async fn list_issues(
        &self,
        repo: &Repo,
        label: &str,
        etag: Option<&str>,
    ) -> Result<IssuePage, UpstreamError> {
        let path = format!(
            "/repos/{}/{}/issues?state=all&per_page=100&labels={label}",
            repo.owner, repo.name
        );
        let mut builder = self.request(reqwest::Method::GET, &path);
        if let Some(etag) = etag {
            builder = builder.header(IF_NONE_MATCH, etag);
        }

        let response = self.send(builder).await?;
        if response.status() == StatusCode::NOT_MODIFIED {
            debug!(target: LOG_TARGET, repo = %repo.full_name(), "issue listing not modified");
            return Ok(IssuePage {
                issues: Vec::new(),
                etag: etag.map(str::to_owned),
                not_modified: true,
            });
        }
        if !response.status().is_success() {
            return Err(self.error_for(response).await);
        }

        let new_etag = response
            .headers()
            .get("etag")
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);
        let dtos: Vec<IssueDto> = response
            .json()
            .await
            .map_err(|e| UpstreamError::Decode(e.to_string()))?;

        Ok(IssuePage {
            issues: dtos
                .into_iter()
                .filter(|dto| dto.pull_request.is_none())
                .map(Into::into)
                .collect(),
            etag: new_etag,
            not_modified: false,
        })
    }

    async fn list_comments(
        &self,
        repo: &Repo,
        number: i64,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<UpstreamComment>, UpstreamError> {
        let mut path = format!(
            "/repos/{}/{}/issues/{number}/comments?per_page=100",
            repo.owner, repo.name
        );
        if let Some(since) = since {
            path.push_str(&format!(
                "&since={}",
                since.to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
            ));
        }

        let response = self.send(self.request(reqwest::Method::GET, &path)).await?;
        if !response.status().is_success() {
            return Err(self.error_for(response).await);
        }
        let dtos: Vec<CommentDto> = response
            .json()
            .await
            .map_err(|e| UpstreamError::Decode(e.to_string()))?;
        Ok(dtos.into_iter().map(Into::into).collect())
    }

    async fn create_issue(
        &self,
        repo: &Repo,
        title: &str,
        body: &str,
        labels: &[String],
    ) -> Result<UpstreamIssue, UpstreamError> {
        let path = format!("/repos/{}/{}/issues", repo.owner, repo.name);
        let response = self
            .send(self.request(reqwest::Method::POST, &path).json(&serde_json::json!({
                "title": title,
                "body": body,
                "labels": labels,
            })))
            .await?;
        if !response.status().is_success() {
            return Err(self.error_for(response).await);
        }
        let dto: IssueDto = response
            .json()
            .await
            .map_err(|e| UpstreamError::Decode(e.to_string()))?;
        Ok(dto.into())
    }

    async fn create_comment(
        &self,
        repo: &Repo,
        number: i64,
        body: &str,
    ) -> Result<UpstreamComment, UpstreamError> {
        let path = format!(
            "/repos/{}/{}/issues/{number}/comments",
            repo.owner, repo.name
        );
        let response = self
            .send(
                self.request(reqwest::Method::POST, &path)
                    .json(&serde_json::json!({ "body": body })),
            )
            .await?;
        if !response.status().is_success() {
            return Err(self.error_for(response).await);
        }
        let dto: CommentDto = response
            .json()
            .await
            .map_err(|e| UpstreamError::Decode(e.to_string()))?;
        Ok(dto.into())
    }

    async fn rate_limit(&self) -> Result<RateLimit, UpstreamError> {
        let response = self
            .send(self.request(reqwest::Method::GET, "/rate_limit"))
            .await?;
        if !response.status().is_success() {
            return Err(self.error_for(response).await);
        }
        let dto: RateLimitDto = response
            .json()
            .await
            .map_err(|e| UpstreamError::Decode(e.to_string()))?;
        let reset = Utc
            .timestamp_opt(dto.resources.core.reset, 0)
            .single()
            .unwrap_or_else(Utc::now);
        Ok(RateLimit {
            remaining: dto.resources.core.remaining,
            reset,
        })
    }

    async fn repo_visibility(&self, repo: &Repo) -> Result<Visibility, UpstreamError> {
        let path = format!("/repos/{}/{}", repo.owner, repo.name);
        let response = self.send(self.request(reqwest::Method::GET, &path)).await?;
        if !response.status().is_success() {
            return Err(self.error_for(response).await);
        }
        let dto: RepoDto = response
            .json()
            .await
            .map_err(|e| UpstreamError::Decode(e.to_string()))?;
        Ok(if dto.private {
            Visibility::Private
        } else {
            Visibility::Public
        })
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() > max {
        format!("{}...", &s[..max])
    } else {
        s.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn comment_dto_trust_mapping() {
        let dto = CommentDto {
            id: 1,
            body: Some("hi".into()),
            user: Some(UserDto {
                login: "alice".into(),
            }),
            author_association: Some("COLLABORATOR".into()),
            created_at: Utc::now(),
        };
        let comment: UpstreamComment = dto.into();
        assert!(comment.author_trusted);
        assert_eq!(comment.author, "alice");

        let dto = CommentDto {
            id: 2,
            body: None,
            user: None,
            author_association: Some("NONE".into()),
            created_at: Utc::now(),
        };
        let comment: UpstreamComment = dto.into();
        assert!(!comment.author_trusted);
        assert_eq!(comment.body, "");
    }
}
