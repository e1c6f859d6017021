//! Job orchestration
//!
//! The [`Orchestrator`] ties the pieces together: it renders and submits a
//! job, polls the scheduler on every status call, feeds the observation
//! through the lifecycle state machine, and on the first `RUNNING`
//! observation allocates local ports and opens the job's tunnel.
//!
//! # Locking
//!
//! The remote status query runs without any lock held. The transition, the
//! forwarding claim and port allocation happen while holding the job's own
//! lock. The tunnel itself starts after that lock is released; the claim
//! alone guarantees two concurrent polls of a job that just started running
//! open exactly one tunnel, and readers of the job never wait on a tunnel
//! startup. Different jobs never contend.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use hb_core::config::{ClusterTarget, OrchestratorConfig};
use hb_core::error::{ConfigError, OrchestratorError, PreconditionFailure};
use hb_core::ipc::ClusterSelector;
use hb_core::signal::{self, SIGKILL, SIGTERM};
use hb_core::traits::{JobLifecycle, PollOutcome};
use hb_core::types::{JobSpec, JobStatusReport, JobSummary};
use hb_core::{ConnectionDescriptor, Job, JobId, LifecycleState, PortMapEntry};

use crate::lifecycle::{transition, SchedulerState, TransitionContext};
use crate::ports::{PortLeases, PortPool};
use crate::remote::{CommandRunner, ProxyChain, RemoteChannel};
use crate::scheduler::{JobControl, SchedulerTimeouts};
use crate::script;
use crate::store::{JobRepository, JobSlot};
use crate::tunnel::TunnelManager;

/// Ports and route for a tunnel about to be opened
struct ForwardingPlan {
    job_id: JobId,
    node: String,
    user: String,
    chain: ProxyChain,
    names: Vec<String>,
    local: Vec<u16>,
    port_map: Vec<PortMapEntry>,
}

/// Submits, tracks and forwards remote batch jobs
pub struct Orchestrator {
    config: OrchestratorConfig,
    runner: Arc<dyn CommandRunner>,
    store: Arc<dyn JobRepository>,
    pool: PortPool,
    leases: PortLeases,
    tunnels: TunnelManager,
}

impl Orchestrator {
    pub fn new(
        config: OrchestratorConfig,
        runner: Arc<dyn CommandRunner>,
        store: Arc<dyn JobRepository>,
    ) -> Self {
        let pool = PortPool::new(config.ports.clone());
        let tunnels = TunnelManager::new(
            runner.clone(),
            config.ssh.clone(),
            config.ports.bind_address.clone(),
            config.tunnel_startup_timeout,
        );
        Self {
            config,
            runner,
            store,
            pool,
            leases: PortLeases::new(),
            tunnels,
        }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn JobRepository> {
        &self.store
    }

    /// Resolve a cluster named in a request
    pub fn resolve_cluster(
        &self,
        selector: ClusterSelector,
    ) -> Result<ClusterTarget, OrchestratorError> {
        match selector {
            ClusterSelector::Named(name) => self
                .config
                .cluster(&name)
                .cloned()
                .ok_or_else(|| ConfigError::UnknownCluster(name).into()),
            ClusterSelector::Inline(target) => Ok(target),
        }
    }

    fn job_control(&self, cluster: &ClusterTarget) -> Result<JobControl, PreconditionFailure> {
        let channel = RemoteChannel::for_cluster(&self.config.ssh, cluster, self.runner.clone())?;
        Ok(JobControl::new(
            channel,
            SchedulerTimeouts {
                submit: self.config.submit_timeout,
                poll: self.config.poll_timeout,
                signal: self.config.signal_timeout,
            },
        ))
    }

    fn slot(&self, job_id: &JobId) -> Result<Arc<JobSlot>, OrchestratorError> {
        self.store
            .get(job_id)
            .ok_or_else(|| OrchestratorError::JobNotFound(job_id.to_string()))
    }

    /// Submit a job and start tracking it
    pub async fn submit(
        &self,
        spec: JobSpec,
        cluster: ClusterTarget,
        connection: ConnectionDescriptor,
    ) -> Result<JobId, OrchestratorError> {
        let control = self.job_control(&cluster)?;
        let script = script::render(&spec, &cluster, &connection)?;
        tracing::debug!(login_node = %cluster.login_node, "Rendered job script:\n{}", script);

        let job_id = control.submit(&script).await?;
        self.store
            .insert(Arc::new(JobSlot::new(Job::new(job_id.clone(), cluster, connection))));

        tracing::info!(job_id = %job_id, "Tracking job");
        Ok(job_id)
    }

    /// Poll once and advance the job's lifecycle
    pub async fn status(&self, job_id: &JobId) -> Result<JobStatusReport, OrchestratorError> {
        self.observe(job_id).await.map(|(report, _)| report)
    }

    async fn observe(
        &self,
        job_id: &JobId,
    ) -> Result<(JobStatusReport, PollOutcome), OrchestratorError> {
        let slot = self.slot(job_id)?;
        let cluster = slot.lock().await.cluster.clone();
        let control = self.job_control(&cluster)?;

        let observed = control.poll(job_id).await;

        let (t, plan) = {
            let mut job = slot.lock().await;
            let t = transition(
                job.state,
                &SchedulerState::parse(&observed.state),
                TransitionContext {
                    awaiting_shutdown: job.awaiting_shutdown,
                    retry_count: job.retry_count,
                    max_retries: self.config.max_retries,
                },
            );

            if t.state != job.state {
                tracing::info!(
                    job_id = %job_id,
                    from = %job.state,
                    to = %t.state,
                    scheduler_state = %observed.state,
                    "Job state changed"
                );
            }
            job.state = t.state;
            job.retry_count = t.retry_count;
            if !observed.eta.is_empty() {
                job.eta = observed.eta.clone();
            }
            if t.is_running() && !observed.node.is_empty() {
                job.node = Some(observed.node.clone());
            }
            job.touch();

            let mut plan = None;
            if t.is_running() && slot.try_claim_forwarding() {
                match self.plan_forwarding(&job) {
                    Ok(p) => plan = p,
                    Err(e) => {
                        slot.release_forwarding();
                        tracing::warn!(job_id = %job_id, "Failed to start forwarding: {}", e);
                        return Err(e);
                    }
                }
            }

            if t.state == LifecycleState::Unknown && !t.outcome.is_alive() {
                self.release_resources(&slot, &mut job).await;
            }
            (t, plan)
        };

        if let Some(plan) = plan {
            if let Err(e) = self.start_forwarding(&slot, plan).await {
                slot.release_forwarding();
                tracing::warn!(job_id = %job_id, "Failed to start forwarding: {}", e);
                return Err(e);
            }
        }

        let job = slot.lock().await;
        let report = JobStatusReport {
            state: job.state,
            scheduler_state: observed.state,
            node: observed.node,
            eta: observed.eta,
            port_map: job.port_map.clone(),
        };
        Ok((report, t.outcome))
    }

    /// Pick the ports to forward and lease local ones for them
    ///
    /// Runs under the job lock with the forwarding claim held. `None` means
    /// the descriptor names no forwardable ports.
    fn plan_forwarding(&self, job: &Job) -> Result<Option<ForwardingPlan>, OrchestratorError> {
        let remote: Vec<(String, u16)> = self
            .config
            .forward_ports
            .iter()
            .filter_map(|name| job.connection.port(name).map(|p| (name.clone(), p)))
            .collect();
        if remote.is_empty() {
            tracing::info!(job_id = %job.id, "No forwardable ports in connection descriptor");
            return Ok(None);
        }

        let local = self.leases.lease(&job.id, &self.pool, remote.len())?;
        let port_map = remote
            .iter()
            .zip(&local)
            .map(|(&(_, remote_port), &local_port)| PortMapEntry::new(remote_port, local_port))
            .collect();

        Ok(Some(ForwardingPlan {
            job_id: job.id.clone(),
            node: job.node.clone().unwrap_or_default(),
            user: job.cluster.compute_user().to_string(),
            chain: ProxyChain::from_parts(&job.cluster.proxy_jump, &job.cluster.login_node),
            names: remote.into_iter().map(|(name, _)| name).collect(),
            local,
            port_map,
        }))
    }

    /// Open the planned tunnel and record it on the job
    ///
    /// The tunnel starts without the job lock held; the forwarding claim
    /// keeps other polls from opening a second one meanwhile.
    async fn start_forwarding(
        &self,
        slot: &JobSlot,
        plan: ForwardingPlan,
    ) -> Result<(), OrchestratorError> {
        let opened = self
            .tunnels
            .open(&plan.node, &plan.user, &plan.port_map, &plan.chain)
            .await;
        let mut handle = match opened {
            Ok(handle) => handle,
            Err(e) => {
                self.leases.release(&plan.job_id);
                return Err(e.into());
            }
        };

        let mut job = slot.lock().await;

        // Signalled, cleaned up or gone while the tunnel was starting
        let superseded = job.state != LifecycleState::Running
            || self.leases.held_by(&plan.job_id) != plan.local;
        if superseded {
            drop(job);
            handle.close().await;
            self.leases.release(&plan.job_id);
            tracing::info!(job_id = %plan.job_id, "Discarded tunnel of a job that stopped running");
            return Ok(());
        }

        for (name, port) in plan.names.iter().zip(&plan.local) {
            job.connection.set_port(name, *port);
        }
        job.port_map = plan.port_map;
        job.forwarding = true;
        job.touch();
        slot.set_tunnel(handle).await;

        tracing::info!(
            job_id = %plan.job_id,
            node = %plan.node,
            ports = ?plan.local,
            "Forwarding active"
        );
        Ok(())
    }

    async fn release_resources(&self, slot: &JobSlot, job: &mut Job) {
        if slot.close_tunnel().await {
            tracing::info!(job_id = %job.id, "Tunnel closed");
        }
        let released = self.leases.release(&job.id);
        if !released.is_empty() {
            tracing::debug!(job_id = %job.id, ports = ?released, "Released local ports");
        }
        job.forwarding = false;
        job.touch();
    }

    /// Deliver `signum` to the job; signal 0 only polls
    pub async fn signal(&self, job_id: &JobId, signum: i32) -> Result<bool, OrchestratorError> {
        if signum == 0 {
            let (_, outcome) = self.observe(job_id).await?;
            return Ok(outcome.is_alive());
        }

        let slot = self.slot(job_id)?;
        let cluster = slot.lock().await.cluster.clone();
        let control = self.job_control(&cluster)?;

        let success = control.signal(job_id, signum).await;
        if success && signal::is_terminating(signum) {
            let mut job = slot.lock().await;
            job.awaiting_shutdown = true;
            self.release_resources(&slot, &mut job).await;
        }
        Ok(success)
    }

    /// Send `signum` only if the job was last seen running
    async fn signal_if_running(
        &self,
        job_id: &JobId,
        signum: i32,
    ) -> Result<bool, OrchestratorError> {
        let running = self.slot(job_id)?.lock().await.state == LifecycleState::Running;
        if !running {
            tracing::debug!(job_id = %job_id, signum, "Job not running, signal skipped");
            return Ok(false);
        }
        self.signal(job_id, signum).await
    }

    /// Poll until a job marked for shutdown stops, then release its resources
    pub async fn wait(
        &self,
        job_id: &JobId,
        interval: Duration,
    ) -> Result<PollOutcome, OrchestratorError> {
        let slot = self.slot(job_id)?;
        let mut outcome = PollOutcome::COMPLETED;

        if slot.lock().await.awaiting_shutdown {
            loop {
                let (_, observed) = self.observe(job_id).await?;
                if !observed.is_alive() {
                    outcome = observed;
                    break;
                }
                tokio::time::sleep(interval).await;
            }
        }

        let mut job = slot.lock().await;
        self.release_resources(&slot, &mut job).await;
        Ok(outcome)
    }

    /// Snapshot of the job record
    pub async fn info(&self, job_id: &JobId) -> Result<Job, OrchestratorError> {
        let slot = self.slot(job_id)?;
        let job = slot.lock().await;
        Ok(job.clone())
    }

    /// Summaries of all tracked jobs, oldest first
    pub async fn list(&self) -> Vec<JobSummary> {
        let mut jobs = Vec::new();
        for slot in self.store.list() {
            jobs.push(slot.lock().await.summary());
        }
        jobs.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        jobs
    }

    /// Mark the job as shutting down
    pub async fn request_shutdown(&self, job_id: &JobId) -> Result<(), OrchestratorError> {
        let slot = self.slot(job_id)?;
        let mut job = slot.lock().await;
        job.awaiting_shutdown = true;
        job.touch();
        tracing::info!(job_id = %job_id, "Shutdown requested");
        Ok(())
    }

    /// Close the job's tunnel and release its local ports
    pub async fn cleanup(&self, job_id: &JobId) -> Result<(), OrchestratorError> {
        let slot = self.slot(job_id)?;
        let mut job = slot.lock().await;
        self.release_resources(&slot, &mut job).await;
        Ok(())
    }

    /// Number of jobs whose tunnel is up
    pub async fn forwarding_count(&self) -> usize {
        let mut count = 0;
        for slot in self.store.list() {
            if slot.tunnel_active().await {
                count += 1;
            }
        }
        count
    }

    /// Close every tunnel, for daemon shutdown
    pub async fn close_all(&self) {
        for slot in self.store.list() {
            slot.close_tunnel().await;
            self.leases.release(&slot.id);
        }
    }
}

#[async_trait]
impl JobLifecycle for Orchestrator {
    async fn start(
        &self,
        spec: JobSpec,
        cluster: ClusterTarget,
        connection: ConnectionDescriptor,
    ) -> Result<JobId, OrchestratorError> {
        self.submit(spec, cluster, connection).await
    }

    async fn poll(&self, job_id: &JobId) -> Result<PollOutcome, OrchestratorError> {
        self.observe(job_id).await.map(|(_, outcome)| outcome)
    }

    async fn send_signal(&self, job_id: &JobId, signum: i32) -> Result<bool, OrchestratorError> {
        self.signal(job_id, signum).await
    }

    async fn kill(&self, job_id: &JobId) -> Result<bool, OrchestratorError> {
        self.signal_if_running(job_id, SIGKILL).await
    }

    async fn terminate(&self, job_id: &JobId) -> Result<bool, OrchestratorError> {
        self.signal_if_running(job_id, SIGTERM).await
    }

    async fn request_shutdown(&self, job_id: &JobId) -> Result<(), OrchestratorError> {
        Orchestrator::request_shutdown(self, job_id).await
    }

    async fn wait(
        &self,
        job_id: &JobId,
        interval: Duration,
    ) -> Result<PollOutcome, OrchestratorError> {
        Orchestrator::wait(self, job_id, interval).await
    }

    async fn cleanup(&self, job_id: &JobId) -> Result<(), OrchestratorError> {
        Orchestrator::cleanup(self, job_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::ProcessRunner;
    use crate::store::InMemoryJobStore;

    fn orchestrator(config: OrchestratorConfig) -> Orchestrator {
        Orchestrator::new(
            config,
            Arc::new(ProcessRunner::new()),
            Arc::new(InMemoryJobStore::new()),
        )
    }

    #[test]
    fn test_resolve_named_cluster() {
        let mut config = OrchestratorConfig::default();
        config.clusters.insert(
            "expanse".to_string(),
            ClusterTarget::new("login.expanse.org", "alice"),
        );
        let orch = orchestrator(config);

        let target = orch
            .resolve_cluster(ClusterSelector::Named("expanse".to_string()))
            .unwrap();
        assert_eq!(target.login_node, "login.expanse.org");

        let err = orch
            .resolve_cluster(ClusterSelector::Named("anvil".to_string()))
            .unwrap_err();
        assert!(matches!(
            err,
            OrchestratorError::Config(ConfigError::UnknownCluster(_))
        ));
    }

    #[tokio::test]
    async fn test_unknown_job() {
        let orch = orchestrator(OrchestratorConfig::default());
        let id = JobId::new("1");
        assert!(matches!(
            orch.status(&id).await,
            Err(OrchestratorError::JobNotFound(_))
        ));
        assert!(matches!(
            orch.info(&id).await,
            Err(OrchestratorError::JobNotFound(_))
        ));
        assert!(orch.cleanup(&id).await.is_err());
        assert!(orch.list().await.is_empty());
    }

    #[tokio::test]
    async fn test_submit_rejects_incomplete_cluster() {
        let orch = orchestrator(OrchestratorConfig::default());
        let err = orch
            .submit(
                JobSpec::default(),
                ClusterTarget::new("", "alice"),
                ConnectionDescriptor::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::Precondition(_)));
    }
}
