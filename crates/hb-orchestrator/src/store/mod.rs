//! In-memory registry of tracked jobs
//!
//! Each job lives in a [`JobSlot`]: the record itself behind a per-job async
//! mutex, the live tunnel behind its own mutex, and a forwarding flag that
//! exactly one caller can claim.

pub mod sweeper;

use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard};

use hb_core::{Job, JobId};

use crate::tunnel::TunnelHandle;

/// One tracked job and the live resources held for it
pub struct JobSlot {
    pub id: JobId,
    job: Mutex<Job>,
    tunnel: Mutex<Option<TunnelHandle>>,
    forwarding: AtomicBool,
}

impl JobSlot {
    pub fn new(job: Job) -> Self {
        Self {
            id: job.id.clone(),
            job: Mutex::new(job),
            tunnel: Mutex::new(None),
            forwarding: AtomicBool::new(false),
        }
    }

    /// Lock the job record
    pub async fn lock(&self) -> MutexGuard<'_, Job> {
        self.job.lock().await
    }

    /// Lock the job record if nobody else holds it
    pub fn try_lock(&self) -> Option<MutexGuard<'_, Job>> {
        self.job.try_lock().ok()
    }

    /// Claim the right to open this job's tunnel
    ///
    /// Returns `true` for exactly one caller until the claim is released.
    pub fn try_claim_forwarding(&self) -> bool {
        self.forwarding
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Give up a claim, e.g. after the tunnel failed to open
    pub fn release_forwarding(&self) {
        self.forwarding.store(false, Ordering::Release);
    }

    pub fn is_forwarding(&self) -> bool {
        self.forwarding.load(Ordering::Acquire)
    }

    /// Store the tunnel opened under a successful claim
    pub async fn set_tunnel(&self, handle: TunnelHandle) {
        *self.tunnel.lock().await = Some(handle);
    }

    /// Whether a tunnel is held and its process is alive
    pub async fn tunnel_active(&self) -> bool {
        match self.tunnel.lock().await.as_mut() {
            Some(handle) => handle.is_active(),
            None => false,
        }
    }

    /// Close and drop the tunnel, if any
    ///
    /// The forwarding claim stays set so a closed job is never re-forwarded.
    pub async fn close_tunnel(&self) -> bool {
        let handle = self.tunnel.lock().await.take();
        match handle {
            Some(mut handle) => {
                handle.close().await;
                true
            }
            None => false,
        }
    }
}

impl std::fmt::Debug for JobSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobSlot")
            .field("id", &self.id)
            .field("forwarding", &self.is_forwarding())
            .finish()
    }
}

/// Storage for tracked jobs
pub trait JobRepository: Send + Sync {
    /// Track a job, replacing any slot with the same id
    fn insert(&self, slot: Arc<JobSlot>);

    fn get(&self, id: &JobId) -> Option<Arc<JobSlot>>;

    fn list(&self) -> Vec<Arc<JobSlot>>;

    fn remove(&self, id: &JobId) -> Option<Arc<JobSlot>>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// `JobRepository` over a concurrent map; nothing survives a restart
#[derive(Default)]
pub struct InMemoryJobStore {
    jobs: DashMap<JobId, Arc<JobSlot>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self {
            jobs: DashMap::new(),
        }
    }
}

impl JobRepository for InMemoryJobStore {
    fn insert(&self, slot: Arc<JobSlot>) {
        self.jobs.insert(slot.id.clone(), slot);
    }

    fn get(&self, id: &JobId) -> Option<Arc<JobSlot>> {
        self.jobs.get(id).map(|r| Arc::clone(&r))
    }

    fn list(&self) -> Vec<Arc<JobSlot>> {
        self.jobs.iter().map(|r| Arc::clone(&r)).collect()
    }

    fn remove(&self, id: &JobId) -> Option<Arc<JobSlot>> {
        self.jobs.remove(id).map(|(_, slot)| slot)
    }

    fn len(&self) -> usize {
        self.jobs.len()
    }
}
