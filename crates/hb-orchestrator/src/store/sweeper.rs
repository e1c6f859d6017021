//! Retention sweeper
//!
//! Tracked jobs are never removed by the lifecycle itself; once a job has
//! gone quiet it stays queryable for a retention period, after which this
//! task evicts it.
//!
//! A job is quiescent when its state is `UNKNOWN` and no tunnel is held for
//! it. Jobs whose record is locked by an in-flight call are skipped and
//! looked at again on the next tick.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use hb_core::time::is_older_than;
use hb_core::LifecycleState;

use super::JobRepository;

/// Interval between sweeps
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Run the sweeper until `cancel` fires. A zero retention disables it.
pub async fn run_sweeper(
    store: Arc<dyn JobRepository>,
    retention: Duration,
    interval: Duration,
    cancel: CancellationToken,
) {
    if retention.is_zero() {
        tracing::info!("Job retention disabled, sweeper not started");
        return;
    }

    let mut ticker = tokio::time::interval(interval);
    tracing::info!(?retention, ?interval, "Starting retention sweeper");

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                sweep_expired(store.as_ref(), retention).await;
            }
            _ = cancel.cancelled() => {
                tracing::info!("Retention sweeper shutting down");
                break;
            }
        }
    }
}

/// Evict quiescent jobs idle for longer than `retention`
pub async fn sweep_expired(store: &dyn JobRepository, retention: Duration) -> usize {
    let mut evicted = 0;

    for slot in store.list() {
        let expired = match slot.try_lock() {
            Some(job) => {
                job.state == LifecycleState::Unknown
                    && !slot.tunnel_active().await
                    && is_older_than(job.updated_at, retention)
            }
            None => false,
        };

        if expired {
            slot.close_tunnel().await;
            store.remove(&slot.id);
            tracing::info!(job_id = %slot.id, "Evicted quiescent job");
            evicted += 1;
        }
    }

    if evicted > 0 {
        tracing::info!("Evicted {} quiescent jobs", evicted);
    }
    evicted
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{InMemoryJobStore, JobSlot};
    use hb_core::config::ClusterTarget;
    use hb_core::{ConnectionDescriptor, Job, JobId};

    fn job(id: &str, state: LifecycleState, updated_at: u64) -> Arc<JobSlot> {
        let mut job = Job::new(
            JobId::new(id),
            ClusterTarget::new("login", "alice"),
            ConnectionDescriptor::new(),
        );
        job.state = state;
        job.updated_at = updated_at;
        Arc::new(JobSlot::new(job))
    }

    #[tokio::test]
    async fn test_sweep_evicts_only_old_quiescent_jobs() {
        let store = InMemoryJobStore::new();
        let now = hb_core::time::current_time_millis();
        let hour_ago = now - 3_600_000;

        store.insert(job("1", LifecycleState::Unknown, hour_ago));
        store.insert(job("2", LifecycleState::Running, hour_ago));
        store.insert(job("3", LifecycleState::Unknown, now));

        let evicted = sweep_expired(&store, Duration::from_secs(60)).await;
        assert_eq!(evicted, 1);
        assert!(store.get(&JobId::new("1")).is_none());
        assert!(store.get(&JobId::new("2")).is_some());
        assert!(store.get(&JobId::new("3")).is_some());
    }

    #[tokio::test]
    async fn test_sweep_skips_locked_jobs() {
        let store = InMemoryJobStore::new();
        let slot = job("1", LifecycleState::Unknown, 0);
        store.insert(slot.clone());

        let guard = slot.lock().await;
        assert_eq!(sweep_expired(&store, Duration::from_secs(1)).await, 0);
        drop(guard);
        assert_eq!(sweep_expired(&store, Duration::from_secs(1)).await, 1);
    }

    #[tokio::test]
    async fn test_sweeper_stops_on_cancel() {
        let store: Arc<dyn JobRepository> = Arc::new(InMemoryJobStore::new());
        let cancel = CancellationToken::new();
        let task = tokio::spawn(run_sweeper(
            store,
            Duration::from_secs(60),
            Duration::from_millis(10),
            cancel.clone(),
        ));
        cancel.cancel();
        task.await.unwrap();
    }
}
