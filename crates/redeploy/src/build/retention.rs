//! Local image retention.

use crate::engine::{select_expired, ContainerEngine};
use crate::runlog::RunLog;

/// Removes all but the `keep` newest local images of `repository`.
/// Failures are logged, never returned. Returns the number removed.
pub async fn prune_images(
    engine: &dyn ContainerEngine,
    repository: &str,
    keep: usize,
    log: &RunLog,
) -> usize {
    let images = match engine.list_images(repository).await {
        Ok(images) => images,
        Err(e) => {
            log.line(format!("- image cleanup skipped: {}", e));
            return 0;
        }
    };

    let mut removed = 0;
    for image in select_expired(images, keep) {
        match engine.remove_image(&image.reference).await {
            Ok(()) => {
                log.line(format!("- removed old image {}", image.reference));
                removed += 1;
            }
            Err(e) => log.line(format!(
                "- failed to remove old image {}: {}",
                image.reference, e
            )),
        }
    }
    removed
}
