use std::time::SystemTime;

use tracing::{error, warn};

use super::Dispatcher;

impl Dispatcher {
    /// Return claims older than `stale_after` to `pending`.
    ///
    /// Such records belong to a cycle that died between claim and update.
    /// Failures are logged and reported as zero recovered records.
    pub(super) async fn recover_stale(&self, now: SystemTime) -> usize {
        let Some(cutoff) = now.checked_sub(self.config.stale_after()) else {
            return 0;
        };

        match self.store.requeue_stale(cutoff).await {
            Ok(released) => {
                for id in &released {
                    warn!(record_id = %id, "Re-queued stale claim");
                }
                released.len()
            }
            Err(e) => {
                error!(error = %e, "Failed to re-queue stale claims");
                0
            }
        }
    }
}
