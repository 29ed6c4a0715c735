//! Orphan reclamation
//!
//! Containers created by a runner carry the owner label. A runner that died
//! mid-job leaves them behind, so every runner sweeps labeled containers on
//! startup and again on shutdown. The sweep is best-effort: failures are
//! logged and never stop the runner.

use splice_engine::container::discard;
use splice_engine::{ContainerRuntime, OWNER_LABEL};
use tracing::{info, warn};

/// Kills and removes every container carrying the owner label
///
/// # Returns
/// How many containers were found
pub async fn reclaim_orphans(runtime: &dyn ContainerRuntime) -> usize {
    let ids = match runtime.list_labeled(OWNER_LABEL).await {
        Ok(ids) => ids,
        Err(e) => {
            warn!("Failed to list orphaned containers: {}", e);
            return 0;
        }
    };

    if ids.is_empty() {
        return 0;
    }

    info!("Reclaiming {} orphaned container(s)", ids.len());
    for id in &ids {
        discard(runtime, id).await;
    }
    ids.len()
}
