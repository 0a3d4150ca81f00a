//! Background jobs — the queue adapter and the worker that consumes it.
//!
//! Delivery is at-least-once: a failed job goes back on the queue after
//! an exponential backoff until `max_attempts` is reached, then it is
//! dead-lettered (logged at `error` and dropped). Handlers must tolerate
//! running the same job more than once.

use std::time::Duration;

use bastion_core::error::{BastionError, BastionResult};
use bastion_core::repository::{SystemUserRepository, TenantRepository};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::JobConfig;
use crate::credential::SystemUserService;
use crate::lifecycle::{TenantInitializer, TenantLifecycleController};

/// Payload of a tenant initialization job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantInitJob {
    pub tenant_id: Uuid,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum Job {
    TenantInitialize(TenantInitJob),
    SystemUserExpirySweep,
}

impl Job {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::TenantInitialize(_) => "tenant:initialize",
            Self::SystemUserExpirySweep => "system_user:expiry_sweep",
        }
    }
}

pub trait JobQueue: Send + Sync {
    fn enqueue(&self, job: Job) -> impl Future<Output = BastionResult<()>> + Send;
}

/// Executes one job. An `Err` schedules a retry.
pub trait JobHandler: Send + Sync {
    fn handle(&self, job: &Job) -> impl Future<Output = BastionResult<()>> + Send;
}

#[derive(Debug)]
struct Envelope {
    job: Job,
    attempt: u32,
}

/// In-process queue backed by an unbounded tokio channel.
#[derive(Clone)]
pub struct ChannelJobQueue {
    tx: mpsc::UnboundedSender<Envelope>,
}

/// Receiving half of a [`ChannelJobQueue`], consumed by a [`JobWorker`].
pub struct JobReceiver {
    rx: mpsc::UnboundedReceiver<Envelope>,
    retry_tx: mpsc::WeakUnboundedSender<Envelope>,
}

impl ChannelJobQueue {
    pub fn new() -> (Self, JobReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        let retry_tx = tx.downgrade();
        (Self { tx }, JobReceiver { rx, retry_tx })
    }
}

impl JobQueue for ChannelJobQueue {
    async fn enqueue(&self, job: Job) -> BastionResult<()> {
        debug!(kind = job.kind(), "job enqueued");
        self.tx
            .send(Envelope { job, attempt: 1 })
            .map_err(|_| BastionError::Internal("job queue is closed".into()))
    }
}

/// Exponential backoff between attempts.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl RetryPolicy {
    /// Delay before the attempt that follows failed attempt `attempt`
    /// (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.initial_backoff
            .saturating_mul(1u32 << exponent)
            .min(self.max_backoff)
    }
}

impl From<&JobConfig> for RetryPolicy {
    fn from(config: &JobConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            initial_backoff: Duration::from_millis(config.initial_backoff_ms),
            max_backoff: Duration::from_millis(config.max_backoff_ms),
        }
    }
}

pub struct JobWorker<H: JobHandler> {
    receiver: JobReceiver,
    handler: H,
    retry: RetryPolicy,
}

impl<H: JobHandler> JobWorker<H> {
    pub fn new(receiver: JobReceiver, handler: H, config: &JobConfig) -> Self {
        Self {
            receiver,
            handler,
            retry: RetryPolicy::from(config),
        }
    }

    /// Process jobs until every [`ChannelJobQueue`] handle is dropped.
    pub async fn run(mut self) {
        info!("job worker started");
        while let Some(envelope) = self.receiver.rx.recv().await {
            let kind = envelope.job.kind();
            match self.handler.handle(&envelope.job).await {
                Ok(()) => debug!(kind, attempt = envelope.attempt, "job completed"),
                Err(e) if envelope.attempt >= self.retry.max_attempts => {
                    error!(
                        kind,
                        attempts = envelope.attempt,
                        error = %e,
                        job = ?envelope.job,
                        "job dead-lettered"
                    );
                }
                Err(e) => {
                    let delay = self.retry.backoff(envelope.attempt);
                    warn!(
                        kind,
                        attempt = envelope.attempt,
                        retry_in_ms = delay.as_millis() as u64,
                        error = %e,
                        "job failed, retrying"
                    );
                    self.schedule_retry(envelope, delay);
                }
            }
        }
        info!("job worker stopped");
    }

    fn schedule_retry(&self, envelope: Envelope, delay: Duration) {
        let retry_tx = self.receiver.retry_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let next = Envelope {
                job: envelope.job,
                attempt: envelope.attempt + 1,
            };
            match retry_tx.upgrade() {
                Some(tx) if tx.send(next).is_ok() => {}
                _ => warn!("job queue closed, retry dropped"),
            }
        });
    }
}

/// Routes jobs to the tenant lifecycle controller and the credential
/// sweep.
pub struct LifecycleJobHandler<T, I, S>
where
    T: TenantRepository,
    I: TenantInitializer,
    S: SystemUserRepository,
{
    controller: TenantLifecycleController<T, I>,
    system_users: SystemUserService<S>,
}

impl<T, I, S> LifecycleJobHandler<T, I, S>
where
    T: TenantRepository,
    I: TenantInitializer,
    S: SystemUserRepository,
{
    pub fn new(
        controller: TenantLifecycleController<T, I>,
        system_users: SystemUserService<S>,
    ) -> Self {
        Self {
            controller,
            system_users,
        }
    }
}

impl<T, I, S> JobHandler for LifecycleJobHandler<T, I, S>
where
    T: TenantRepository,
    I: TenantInitializer,
    S: SystemUserRepository,
{
    async fn handle(&self, job: &Job) -> BastionResult<()> {
        match job {
            Job::TenantInitialize(init) => {
                let outcome = self.controller.run(init).await?;
                debug!(tenant_id = %init.tenant_id, ?outcome, "tenant initialization job done");
            }
            Job::SystemUserExpirySweep => {
                self.system_users.deactivate_expired().await?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(1_000),
        }
    }

    #[test]
    fn backoff_doubles_then_caps() {
        let retry = policy();
        assert_eq!(retry.backoff(1), Duration::from_millis(100));
        assert_eq!(retry.backoff(2), Duration::from_millis(200));
        assert_eq!(retry.backoff(3), Duration::from_millis(400));
        assert_eq!(retry.backoff(5), Duration::from_millis(1_000));
        assert_eq!(retry.backoff(40), Duration::from_millis(1_000));
    }

    #[test]
    fn job_wire_format_is_tagged() {
        let id = Uuid::new_v4();
        let job = Job::TenantInitialize(TenantInitJob { tenant_id: id });
        let value = serde_json::to_value(&job).unwrap();
        assert_eq!(value["type"], "tenant_initialize");
        assert_eq!(value["payload"]["tenant_id"], id.to_string());

        let sweep = serde_json::to_value(Job::SystemUserExpirySweep).unwrap();
        assert_eq!(sweep["type"], "system_user_expiry_sweep");
    }

    #[tokio::test]
    async fn enqueue_fails_once_worker_side_is_gone() {
        let (queue, receiver) = ChannelJobQueue::new();
        drop(receiver);
        assert!(queue.enqueue(Job::SystemUserExpirySweep).await.is_err());
    }
}
