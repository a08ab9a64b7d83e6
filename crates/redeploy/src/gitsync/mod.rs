//! Git synchronisation: bare mirrors, clean worktrees, tags and deploy pushes.

pub mod auth;
pub mod error;
pub mod parse;
pub mod repository;

pub use auth::GitCredentials;
pub use error::{classify_git_error, GitError};
pub use parse::FileStatus;
pub use repository::{mirror_path, CommitSummary, GitSync};
