//! Startup maintenance use case

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{info, warn};

use super::ports::{BlobStore, Clock, RecoveryStore, SessionStore};

/// What the startup pass cleaned up.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct StartupReport {
    pub purged_blobs: usize,
    pub purged_stale_checkpoint: bool,
}

/// Remove blobs no session references and checkpoints too old to
/// offer. Runs once before the engine is handed to the host; failures
/// are logged rather than fatal.
pub async fn run_startup_maintenance(
    sessions: &Arc<dyn SessionStore>,
    blobs: &Arc<dyn BlobStore>,
    recovery: &Arc<dyn RecoveryStore>,
    clock: &Arc<dyn Clock>,
) -> StartupReport {
    let mut report = StartupReport::default();

    match sessions.get_all_sessions().await {
        Ok(all) => {
            let known: HashSet<_> = all
                .iter()
                .flat_map(|s| s.segments.iter().map(|seg| seg.id))
                .collect();
            match blobs.list_orphans(&known).await {
                Ok(orphans) => {
                    for id in orphans {
                        match blobs.delete(id).await {
                            Ok(()) => {
                                info!(segment = %id, "purged orphan blob");
                                report.purged_blobs += 1;
                            }
                            Err(err) => {
                                warn!(segment = %id, error = %err, "failed to purge orphan blob")
                            }
                        }
                    }
                }
                Err(err) => warn!(error = %err, "orphan scan failed"),
            }
        }
        Err(err) => warn!(error = %err, "could not list sessions for orphan scan"),
    }

    if let Ok(Some(checkpoint)) = recovery.get().await {
        if checkpoint.is_stale(clock.now_utc()) {
            match recovery.clear().await {
                Ok(()) => {
                    info!(
                        session = %checkpoint.session_name,
                        "purged stale recovery checkpoint"
                    );
                    report.purged_stale_checkpoint = true;
                }
                Err(err) => warn!(error = %err, "failed to purge stale checkpoint"),
            }
        }
    }

    report
}
