use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;

use learnvault_common::AppError;

use crate::config::BillingServiceConfig;
use crate::referrals::AttributionService;
use crate::store::Store;

const DRAIN_BATCH: usize = 20;

/// Drains the durable attribution queue. Jobs that keep failing back off
/// exponentially and finally park as failed for out-of-band reconciliation;
/// nothing is retried blindly and nothing is silently lost.
pub struct OutboxWorker {
    store: Arc<dyn Store>,
    attribution: AttributionService,
    poll_interval: Duration,
    max_attempts: i32,
    backoff_seconds: i64,
}

impl OutboxWorker {
    pub fn new(
        store: Arc<dyn Store>,
        attribution: AttributionService,
        settings: &BillingServiceConfig,
    ) -> Self {
        Self {
            store,
            attribution,
            poll_interval: Duration::from_secs(settings.outbox_poll_seconds),
            max_attempts: settings.outbox_max_attempts,
            backoff_seconds: settings.outbox_backoff_seconds,
        }
    }

    pub async fn run(self, mut shutdown_rx: watch::Receiver<bool>) {
        tracing::info!("Attribution outbox worker started");

        let mut interval = tokio::time::interval(self.poll_interval);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.run_once().await {
                        tracing::error!(error = %e, "outbox cycle failed");
                    }
                }
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        break;
                    }
                }
            }
        }

        tracing::info!("Attribution outbox worker stopped");
    }

    /// One drain cycle; exposed separately so tests can pump the queue
    /// deterministically.
    pub async fn run_once(&self) -> Result<usize, AppError> {
        let jobs = self
            .store
            .due_attribution_jobs(Utc::now(), DRAIN_BATCH)
            .await?;
        let drained = jobs.len();

        for job in jobs {
            let payment = match self.store.payment_by_id(job.payment_id).await? {
                Some(payment) => payment,
                None => {
                    self.store
                        .fail_attribution_job(job.id, "payment row missing")
                        .await?;
                    continue;
                }
            };

            let result = self
                .attribution
                .attribute(
                    job.referred_user_id,
                    &job.referral_code,
                    job.link_type_hint.as_deref(),
                    &payment,
                )
                .await;

            match result {
                Ok(()) => self.store.complete_attribution_job(job.id).await?,
                Err(e) => {
                    let attempt = job.attempts + 1;
                    if attempt >= self.max_attempts {
                        tracing::error!(
                            event = "outbox.park",
                            job_id = %job.id,
                            payment_id = %job.payment_id,
                            attempts = attempt,
                            error = %e,
                            "attribution exhausted retries; parked for manual reconciliation"
                        );
                        self.store
                            .fail_attribution_job(job.id, &e.to_string())
                            .await?;
                    } else {
                        let delay = self.backoff_seconds * 2_i64.pow(job.attempts.max(0) as u32);
                        tracing::warn!(
                            event = "outbox.retry",
                            job_id = %job.id,
                            attempts = attempt,
                            delay_seconds = delay,
                            error = %e,
                            "attribution failed; scheduling retry"
                        );
                        self.store
                            .retry_attribution_job(
                                job.id,
                                &e.to_string(),
                                Utc::now() + chrono::Duration::seconds(delay),
                            )
                            .await?;
                    }
                }
            }
        }

        Ok(drained)
    }
}
