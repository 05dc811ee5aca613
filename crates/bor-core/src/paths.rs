//! Derived per-worktree filesystem paths.
//!
//! Every registered worktree owns a `.boxofrocks/` directory holding its
//! Unix-domain socket, its file queue and the helper script.

use std::path::{Path, PathBuf};

/// Name of the per-worktree control directory.
pub const DOT_DIR: &str = ".boxofrocks";

/// Socket file name inside [`DOT_DIR`].
pub const SOCKET_NAME: &str = "bor.sock";

/// Queue directory name inside [`DOT_DIR`].
pub const QUEUE_DIR_NAME: &str = "queue";

/// Helper script name inside [`DOT_DIR`].
pub const API_SCRIPT_NAME: &str = "bor_api.sh";

/// `<local_path>/.boxofrocks`
pub fn dot_dir(local_path: impl AsRef<Path>) -> PathBuf {
    local_path.as_ref().join(DOT_DIR)
}

/// `<local_path>/.boxofrocks/bor.sock`
pub fn socket_path(local_path: impl AsRef<Path>) -> PathBuf {
    dot_dir(local_path).join(SOCKET_NAME)
}

/// `<local_path>/.boxofrocks/queue`
pub fn queue_dir(local_path: impl AsRef<Path>) -> PathBuf {
    dot_dir(local_path).join(QUEUE_DIR_NAME)
}

/// `<local_path>/.boxofrocks/bor_api.sh`
pub fn api_script_path(local_path: impl AsRef<Path>) -> PathBuf {
    dot_dir(local_path).join(API_SCRIPT_NAME)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derived_paths() {
        assert_eq!(
            socket_path("/tmp/w"),
            PathBuf::from("/tmp/w/.boxofrocks/bor.sock")
        );
        assert_eq!(queue_dir("/tmp/w"), PathBuf::from("/tmp/w/.boxofrocks/queue"));
        assert_eq!(
            api_script_path("/tmp/w"),
            PathBuf::from("/tmp/w/.boxofrocks/bor_api.sh")
        );
    }
}
