//! Background job queue.
//!
//! Work that must not delay a decision (durable account writes, ladder
//! steps) is queued here and run by a single worker task. A full queue drops
//! the job with a warning; failures are logged and never reach the caller
//! whose decision produced the job.

use std::sync::Arc;

use bulwark_core::error::BulwarkError;
use bulwark_core::traits::PasswordPopularity;
use bulwark_core::types::{AccountId, Hash256};
use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::metrics::JobMetrics;
use crate::store::AccountStore;

#[derive(Debug)]
pub enum Job {
    RecordDeviceCookie { account: AccountId, cookie: Hash256 },
    AddIncorrectPasswordHash { account: AccountId, hash: Hash256 },
    ConsumeCredit { account: AccountId, amount: f64, at: DateTime<Utc> },
    StepPassword { key: Hash256 },
    /// Completes once every job queued before it has run.
    Flush(oneshot::Sender<()>),
}

impl Job {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::RecordDeviceCookie { .. } => "record_device_cookie",
            Self::AddIncorrectPasswordHash { .. } => "add_incorrect_password_hash",
            Self::ConsumeCredit { .. } => "consume_credit",
            Self::StepPassword { .. } => "step_password",
            Self::Flush(_) => "flush",
        }
    }
}

pub struct BackgroundJobs {
    sender: mpsc::Sender<Job>,
    metrics: JobMetrics,
}

impl BackgroundJobs {
    /// Spawn the worker on the current tokio runtime.
    pub fn start(
        store: Arc<dyn AccountStore>,
        popularity: Arc<dyn PasswordPopularity>,
        capacity: usize,
    ) -> Self {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let metrics = JobMetrics::default();
        tokio::spawn(run_worker(receiver, store, popularity, metrics.clone()));
        Self { sender, metrics }
    }

    /// Queue `job` without waiting.
    pub fn submit(&self, job: Job) {
        if let Err(e) = self.sender.try_send(job) {
            self.metrics.dropped_total.increment(1);
            match e {
                mpsc::error::TrySendError::Full(job) => {
                    warn!(job = job.kind(), "jobs: queue full, dropping job")
                }
                mpsc::error::TrySendError::Closed(job) => {
                    warn!(job = job.kind(), "jobs: worker gone, dropping job")
                }
            }
        }
    }

    /// Wait until every job queued so far has run.
    pub async fn flush(&self) -> Result<(), BulwarkError> {
        let (done, wait) = oneshot::channel();
        self.sender
            .send(Job::Flush(done))
            .await
            .map_err(|_| BulwarkError::QueueClosed)?;
        wait.await.map_err(|_| BulwarkError::QueueClosed)
    }
}

async fn run_worker(
    mut receiver: mpsc::Receiver<Job>,
    store: Arc<dyn AccountStore>,
    popularity: Arc<dyn PasswordPopularity>,
    metrics: JobMetrics,
) {
    while let Some(job) = receiver.recv().await {
        let kind = job.kind();
        let result = match job {
            Job::RecordDeviceCookie { account, cookie } => {
                store.record_device_cookie(&account, cookie).await
            }
            Job::AddIncorrectPasswordHash { account, hash } => store
                .add_incorrect_password_hash(&account, hash)
                .await
                .map(|_| ()),
            Job::ConsumeCredit { account, amount, at } => store
                .try_consume_credit(&account, amount, at)
                .await
                .map(|granted| {
                    if granted < amount {
                        debug!(%account, amount, granted, "jobs: durable credit below in-memory grant");
                    }
                }),
            Job::StepPassword { key } => {
                popularity.step(&key).await;
                Ok(())
            }
            Job::Flush(done) => {
                let _ = done.send(());
                Ok(())
            }
        };
        if let Err(e) = result {
            metrics.failed_total.increment(1);
            warn!(job = kind, "jobs: background job failed: {e}");
        }
    }
    debug!("jobs: queue closed, worker exiting");
}
