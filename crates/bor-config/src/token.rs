//! Upstream API token discovery.
//!
//! The token comes from the `GITHUB_TOKEN` environment variable, falling
//! back to the `token` file in the data directory. The file is written
//! with mode `0600`.

use std::os::unix::fs::PermissionsExt;
use std::path::Path;

/// Environment variable holding the upstream API token.
pub const TOKEN_ENV: &str = "GITHUB_TOKEN";

/// Resolves the token: environment first, then the token file. Returns
/// `None` when neither is set.
pub fn discover(token_path: &Path) -> Option<String> {
    if let Ok(token) = std::env::var(TOKEN_ENV) {
        if !token.trim().is_empty() {
            return Some(token.trim().to_owned());
        }
    }
    let contents = std::fs::read_to_string(token_path).ok()?;
    let token = contents.trim();
    if token.is_empty() {
        None
    } else {
        Some(token.to_owned())
    }
}

/// Writes the token file with owner-only permissions.
pub fn write(token_path: &Path, token: &str) -> std::io::Result<()> {
    std::fs::write(token_path, format!("{token}\n"))?;
    std::fs::set_permissions(token_path, std::fs::Permissions::from_mode(0o600))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_roundtrip_with_restrictive_mode() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("token");

        write(&path, "ghp_example").unwrap();

        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
        assert_eq!(discover(&path).as_deref(), Some("ghp_example"));
    }

    #[test]
    fn missing_everything_is_none() {
        let dir = tempfile::tempdir().unwrap();
        // Only meaningful when GITHUB_TOKEN is unset in the environment;
        // skip quietly otherwise.
        if std::env::var(TOKEN_ENV).is_ok() {
            return;
        }
        assert_eq!(discover(&dir.path().join("token")), None);
    }
}
