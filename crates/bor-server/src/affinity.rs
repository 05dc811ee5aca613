//! Repo-affinity resolution.
//!
//! Every issue-scoped request must land on exactly one repo. Resolution
//! order: explicit `?repo=` query param, `X-Repo` header, the repo
//! stamped by a per-worktree transport, longest-prefix match of
//! `X-Working-Dir` against registered worktrees, and finally the single
//! registered repo when only one exists.

use std::collections::HashMap;

use axum::extract::{FromRequestParts, Query};
use axum::http::request::Parts;

use bor_core::model::Repo;

use crate::error::ApiError;
use crate::state::{SharedState, SocketRepo};

/// Header naming a repo explicitly.
pub const REPO_HEADER: &str = "x-repo";

/// Header carrying the caller's working directory.
pub const WORKING_DIR_HEADER: &str = "x-working-dir";

/// Extractor resolving the target repo for a request.
pub struct ResolvedRepo(pub Repo);

impl FromRequestParts<SharedState> for ResolvedRepo {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &SharedState,
    ) -> Result<Self, Self::Rejection> {
        // 1. ?repo=owner/name
        let Query(params): Query<HashMap<String, String>> =
            Query::from_request_parts(parts, state)
                .await
                .map_err(|e| ApiError::BadRequest(e.to_string()))?;
        if let Some(full_name) = params.get("repo") {
            return lookup(state, full_name).map(ResolvedRepo);
        }

        // 2. X-Repo header.
        if let Some(value) = parts.headers.get(REPO_HEADER) {
            let full_name = value
                .to_str()
                .map_err(|_| ApiError::BadRequest("invalid X-Repo header".into()))?;
            return lookup(state, full_name).map(ResolvedRepo);
        }

        // 3. Repo stamped by the accepting worktree transport.
        if let Some(SocketRepo(repo_id)) = parts.extensions.get::<SocketRepo>() {
            return Ok(ResolvedRepo(state.store.get_repo(*repo_id)?));
        }

        // 4. X-Working-Dir longest-prefix match against worktrees.
        if let Some(value) = parts.headers.get(WORKING_DIR_HEADER) {
            let work_dir = value
                .to_str()
                .map_err(|_| ApiError::BadRequest("invalid X-Working-Dir header".into()))?;
            if let Some(repo_id) = match_working_dir(state, work_dir)? {
                return Ok(ResolvedRepo(state.store.get_repo(repo_id)?));
            }
        }

        // 5. A lone registered repo wins by default.
        let mut repos = state.store.list_repos()?;
        match repos.len() {
            1 => Ok(ResolvedRepo(repos.remove(0))),
            0 => Err(ApiError::BadRequest("no repos registered".into())),
            _ => Err(ApiError::BadRequest(
                "multiple repos registered; specify one with ?repo= or X-Repo".into(),
            )),
        }
    }
}

/// Resolves `owner/name` to a registered repo.
fn lookup(state: &SharedState, full_name: &str) -> Result<Repo, ApiError> {
    let (owner, name) = Repo::parse_full_name(full_name).ok_or_else(|| {
        ApiError::BadRequest(format!("invalid repo format: {full_name} (want owner/name)"))
    })?;
    state
        .store
        .find_repo(owner, name)?
        .ok_or_else(|| ApiError::NotFound(format!("repo not registered: {full_name}")))
}

/// Longest-prefix worktree match. A worktree matches when the working
/// dir equals its path or lives beneath it; the longest path wins.
fn match_working_dir(state: &SharedState, work_dir: &str) -> Result<Option<i64>, ApiError> {
    let mut best: Option<(usize, i64)> = None;
    for worktree in state.store.list_all_worktrees()? {
        let path = worktree.local_path.as_str();
        let matches = work_dir == path || work_dir.starts_with(&format!("{path}/"));
        if !matches {
            continue;
        }
        if best.map_or(true, |(len, _)| path.len() > len) {
            best = Some((path.len(), worktree.repo_id));
        }
    }
    Ok(best.map(|(_, repo_id)| repo_id))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use bor_storage::SqliteStore;
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::state::AppState;

    fn state_with_worktrees() -> (SharedState, i64, i64) {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let a = store.add_repo(&Repo::new("octo", "alpha")).unwrap();
        let b = store.add_repo(&Repo::new("octo", "beta")).unwrap();
        store.add_worktree(a.id, "/home/dev/alpha", false, false).unwrap();
        store
            .add_worktree(b.id, "/home/dev/alpha/vendor/beta", false, false)
            .unwrap();
        (Arc::new(AppState::new(store, None)), a.id, b.id)
    }

    #[test]
    fn working_dir_longest_prefix_wins() {
        let (state, a, b) = state_with_worktrees();

        // Deep inside the nested worktree: the longer path wins.
        let hit = match_working_dir(&state, "/home/dev/alpha/vendor/beta/src")
            .unwrap()
            .unwrap();
        assert_eq!(hit, b);

        // Inside only the outer worktree.
        let hit = match_working_dir(&state, "/home/dev/alpha/src").unwrap().unwrap();
        assert_eq!(hit, a);

        // Exact match counts.
        let hit = match_working_dir(&state, "/home/dev/alpha").unwrap().unwrap();
        assert_eq!(hit, a);
    }

    #[test]
    fn sibling_prefix_does_not_match() {
        let (state, ..) = state_with_worktrees();
        // "/home/dev/alphabet" shares a string prefix but is not inside
        // the worktree.
        assert_eq!(match_working_dir(&state, "/home/dev/alphabet").unwrap(), None);
    }
}
