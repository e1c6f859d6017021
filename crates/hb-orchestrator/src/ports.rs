//! Local port allocation

use std::collections::{HashMap, HashSet};
use std::net::TcpListener;
use std::sync::Mutex;

use rand::seq::SliceRandom;

use hb_core::config::PortPoolConfig;
use hb_core::error::ResourceExhausted;
use hb_core::JobId;

/// Candidate local ports
#[derive(Debug, Clone)]
pub struct PortPool {
    config: PortPoolConfig,
}

impl PortPool {
    pub fn new(config: PortPoolConfig) -> Self {
        Self { config }
    }

    pub fn bind_address(&self) -> &str {
        &self.config.bind_address
    }

    /// The configured range minus reserved ports and `held`
    pub fn candidates(&self, held: &HashSet<u16>) -> Vec<u16> {
        let reserved: HashSet<u16> = self.config.reserved.iter().copied().collect();
        let mut ports: Vec<u16> = (self.config.start..=self.config.end)
            .filter(|p| !reserved.contains(p) && !held.contains(p))
            .collect();
        if self.config.shuffle {
            ports.shuffle(&mut rand::thread_rng());
        }
        ports
    }

    /// Pick `count` free ports, skipping `held`
    pub fn allocate(
        &self,
        count: usize,
        held: &HashSet<u16>,
    ) -> Result<Vec<u16>, ResourceExhausted> {
        allocate(&self.candidates(held), count, &self.config.bind_address)
    }
}

/// Local ports held by tracked jobs
///
/// ssh binds its forwards only after it connects, so a port handed to one
/// job still probes free for a while. Allocation happens under the lease
/// lock with every held port excluded.
#[derive(Debug, Default)]
pub struct PortLeases {
    held: Mutex<HashMap<JobId, Vec<u16>>>,
}

impl PortLeases {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate `count` ports from `pool` and record them against `job`
    pub fn lease(
        &self,
        job: &JobId,
        pool: &PortPool,
        count: usize,
    ) -> Result<Vec<u16>, ResourceExhausted> {
        let mut held = self.held.lock().unwrap_or_else(|e| e.into_inner());
        let taken: HashSet<u16> = held
            .iter()
            .filter(|(id, _)| *id != job)
            .flat_map(|(_, ports)| ports.iter().copied())
            .collect();
        let ports = pool.allocate(count, &taken)?;
        held.insert(job.clone(), ports.clone());
        Ok(ports)
    }

    /// Forget the ports held by `job`
    pub fn release(&self, job: &JobId) -> Vec<u16> {
        self.held
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(job)
            .unwrap_or_default()
    }

    /// Ports currently held by `job`
    pub fn held_by(&self, job: &JobId) -> Vec<u16> {
        self.held
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(job)
            .cloned()
            .unwrap_or_default()
    }
}

/// Whether `port` can be bound on `bind_address` right now
pub fn is_free(bind_address: &str, port: u16) -> bool {
    TcpListener::bind((bind_address, port)).is_ok()
}

/// First `count` candidates that pass a bind-and-release probe, in order
pub fn allocate(
    candidates: &[u16],
    count: usize,
    bind_address: &str,
) -> Result<Vec<u16>, ResourceExhausted> {
    let mut found = Vec::with_capacity(count);
    if count == 0 {
        return Ok(found);
    }

    for &port in candidates {
        if is_free(bind_address, port) {
            found.push(port);
            if found.len() == count {
                tracing::debug!(?found, "Allocated local ports");
                return Ok(found);
            }
        } else {
            tracing::trace!(port, "Port in use");
        }
    }

    Err(ResourceExhausted {
        requested: count,
        found: found.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ephemeral() -> (TcpListener, u16) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        (listener, port)
    }

    #[test]
    fn test_allocate_skips_occupied() {
        // Three ports the OS just handed out, then released except the first
        let (held, first) = ephemeral();
        let (a, second) = ephemeral();
        let (b, third) = ephemeral();
        drop(a);
        drop(b);

        let ports = allocate(&[first, second, third], 2, "127.0.0.1").unwrap();
        assert_eq!(ports, vec![second, third]);
        drop(held);
    }

    #[test]
    fn test_allocate_exhausted() {
        let (held, port) = ephemeral();
        let err = allocate(&[port], 1, "127.0.0.1").unwrap_err();
        assert_eq!(
            err,
            ResourceExhausted {
                requested: 1,
                found: 0
            }
        );
        drop(held);
    }

    #[test]
    fn test_allocate_zero() {
        assert_eq!(allocate(&[], 0, "127.0.0.1").unwrap(), Vec::<u16>::new());
    }

    #[test]
    fn test_candidates_exclude_reserved_and_held() {
        let pool = PortPool::new(PortPoolConfig {
            start: 9000,
            end: 9005,
            reserved: vec![9001],
            ..PortPoolConfig::default()
        });
        let held: HashSet<u16> = [9003].into_iter().collect();
        assert_eq!(pool.candidates(&held), vec![9000, 9002, 9004, 9005]);
    }

    #[test]
    fn test_leases_do_not_overlap() {
        let (probe, base) = ephemeral();
        drop(probe);
        let pool = PortPool::new(PortPoolConfig {
            start: base,
            end: base.saturating_add(50),
            ..PortPoolConfig::default()
        });
        let leases = PortLeases::new();
        let a = leases.lease(&JobId::new("1"), &pool, 2).unwrap();
        let b = leases.lease(&JobId::new("2"), &pool, 2).unwrap();
        assert!(a.iter().all(|p| !b.contains(p)));

        assert_eq!(leases.held_by(&JobId::new("1")), a);
        assert_eq!(leases.release(&JobId::new("1")), a);
        assert!(leases.held_by(&JobId::new("1")).is_empty());
        assert!(leases.release(&JobId::new("1")).is_empty());
    }

    #[test]
    fn test_shuffled_candidates_keep_membership() {
        let pool = PortPool::new(PortPoolConfig {
            start: 9000,
            end: 9009,
            shuffle: true,
            ..PortPoolConfig::default()
        });
        let mut ports = pool.candidates(&HashSet::new());
        ports.sort_unstable();
        assert_eq!(ports, (9000..=9009).collect::<Vec<_>>());
    }
}
