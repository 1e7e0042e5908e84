//! Per-case tracker resolution.
//!
//! The registry hands out exactly one `CaseTracker` per case id so every
//! writer for a case shares the same serialized command path. Trackers that
//! are idle and no longer held anywhere are dropped from the cache and
//! reloaded from the database on next access.

use std::collections::HashMap;
use std::sync::Arc;

use log::debug;
use tokio::sync::Mutex;

use crate::broadcast::CaseProgressBroadcaster;
use crate::db::{tracker_repo, Database};

use super::case_tracker::CaseTracker;
use super::error::Result;
use super::types::{CaseStatus, TrackerSnapshot};

#[derive(Clone)]
pub struct TrackerRegistry {
    db: Database,
    broadcaster: CaseProgressBroadcaster,
    trackers: Arc<Mutex<HashMap<String, Arc<CaseTracker>>>>,
}

impl TrackerRegistry {
    pub fn open(db: Database) -> Self {
        Self::with_broadcaster(db, CaseProgressBroadcaster::default())
    }

    pub fn with_broadcaster(db: Database, broadcaster: CaseProgressBroadcaster) -> Self {
        Self {
            db,
            broadcaster,
            trackers: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Resolves the tracker for a case, loading persisted state on first
    /// access. Cases never seen before get a fresh `NotStarted` tracker.
    pub async fn tracker(&self, case_id: &str) -> Result<Arc<CaseTracker>> {
        let mut trackers = self.trackers.lock().await;
        if let Some(tracker) = trackers.get(case_id) {
            return Ok(Arc::clone(tracker));
        }

        evict_idle(&mut trackers);

        let snapshot = match tracker_repo::load(&self.db, case_id)? {
            Some(snapshot) => {
                debug!(
                    "Loaded persisted tracker for case '{}' (run {}, {})",
                    case_id, snapshot.run_id, snapshot.status
                );
                snapshot
            }
            None => TrackerSnapshot::new(case_id),
        };

        let tracker = Arc::new(CaseTracker::new(
            snapshot,
            self.db.clone(),
            self.broadcaster.clone(),
        ));
        trackers.insert(case_id.to_string(), Arc::clone(&tracker));
        Ok(tracker)
    }

    /// Current state of a case, or `None` if no run was ever started for it.
    pub async fn status(&self, case_id: &str) -> Result<Option<TrackerSnapshot>> {
        let cached = self.trackers.lock().await.get(case_id).cloned();
        if let Some(tracker) = cached {
            let snapshot = tracker.snapshot().await;
            if snapshot.status == CaseStatus::NotStarted {
                return Ok(None);
            }
            return Ok(Some(snapshot));
        }
        Ok(tracker_repo::load(&self.db, case_id)?)
    }

    /// Persisted cases whose last run never finished.
    pub fn interrupted_cases(&self) -> Result<Vec<String>> {
        Ok(tracker_repo::case_ids_with_status(
            &self.db,
            CaseStatus::Running,
        )?)
    }

    pub fn broadcaster(&self) -> &CaseProgressBroadcaster {
        &self.broadcaster
    }

    #[cfg(test)]
    async fn cached(&self) -> usize {
        self.trackers.lock().await.len()
    }
}

/// Drops trackers with no run in flight and no holder besides the cache.
/// New handles are only cloned out under the map lock, so an entry with a
/// strong count of one cannot gain a second writer while it is evicted.
fn evict_idle(trackers: &mut HashMap<String, Arc<CaseTracker>>) {
    let before = trackers.len();
    trackers.retain(|_, tracker| Arc::strong_count(tracker) > 1 || !tracker.is_idle());
    let evicted = before - trackers.len();
    if evicted > 0 {
        debug!("Evicted {} idle case tracker(s)", evicted);
    }
}
