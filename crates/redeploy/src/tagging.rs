//! Image tag resolution.

use std::path::Path;

use crate::config::TagMode;
use crate::gitsync::{GitError, GitSync};

/// Tags resolved for one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageTags {
    /// Tag of the source branch tip (`GIT_TAG`).
    pub source: String,
    /// Tag of the overlay branch tip (`OVERLAY_TAG`).
    pub overlay: Option<String>,
    /// Final image tag (`IMAGE_TAG`).
    pub image: String,
}

impl ImageTags {
    /// `source` + `_overlay.<overlay>` + `suffix`.
    pub fn compose(source: String, overlay: Option<String>, suffix: &str) -> Self {
        let mut image = source.clone();
        if let Some(overlay) = &overlay {
            image.push_str("_overlay.");
            image.push_str(overlay);
        }
        image.push_str(suffix);

        Self {
            source,
            overlay,
            image,
        }
    }
}

/// Derives tags from synced branches according to the global tag mode.
#[derive(Debug, Clone)]
pub struct TagResolver {
    git: GitSync,
    mode: TagMode,
}

impl TagResolver {
    pub fn new(git: GitSync, mode: TagMode) -> Self {
        Self { git, mode }
    }

    /// Tag of one branch synced into `dir`.
    pub async fn branch_tag(&self, dir: &Path, branch: &str) -> Result<String, GitError> {
        match self.mode {
            TagMode::Commit => self.git.tag(dir, branch).await,
            TagMode::Describe => self.git.describe(dir, branch).await,
        }
    }

    /// Resolves the source tag, the optional overlay tag and the composed image tag.
    pub async fn resolve(
        &self,
        source: (&Path, &str),
        overlay: Option<(&Path, &str)>,
        suffix: &str,
    ) -> Result<ImageTags, GitError> {
        let source_tag = self.branch_tag(source.0, source.1).await?;

        let overlay_tag = match overlay {
            Some((dir, branch)) => Some(self.branch_tag(dir, branch).await?),
            None => None,
        };

        Ok(ImageTags::compose(source_tag, overlay_tag, suffix))
    }
}
