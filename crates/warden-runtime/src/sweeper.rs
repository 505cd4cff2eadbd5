use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use warden_approval::ApprovalWorkflow;
use warden_core::{Result, TxId};
use warden_store::Store;

use crate::kill_switch::KillSwitch;
use crate::pipeline::{Pipeline, StageOutcome};

/// What one sweep did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub resumed: usize,
    pub expired: usize,
    pub evicted: usize,
    pub recovered: bool,
}

/// Periodic maintenance: expire approvals, evict dead sign requests,
/// optionally recover an auto-stopped switch, and resume whatever is due.
pub struct Sweeper {
    store: Store,
    pipeline: Arc<Pipeline>,
    approvals: Arc<ApprovalWorkflow>,
    kill_switch: Arc<KillSwitch>,
    interval: Duration,
    auto_recover: bool,
}

impl Sweeper {
    pub fn new(
        store: Store,
        pipeline: Arc<Pipeline>,
        approvals: Arc<ApprovalWorkflow>,
        kill_switch: Arc<KillSwitch>,
        interval: Duration,
        auto_recover: bool,
    ) -> Self {
        Self {
            store,
            pipeline,
            approvals,
            kill_switch,
            interval: interval.max(Duration::from_secs(1)),
            auto_recover,
        }
    }

    pub async fn tick(&self, now: DateTime<Utc>) -> Result<SweepReport> {
        let mut report = SweepReport {
            expired: self.approvals.process_expired(now)?.len(),
            evicted: self.approvals.evict_expired(now),
            ..Default::default()
        };

        if self.auto_recover {
            report.recovered = self.kill_switch.try_auto_recover(now).await?;
        }

        if !self.kill_switch.is_active()? {
            debug!("kill switch engaged, resumption skipped");
            return Ok(report);
        }

        let due = self.due(now)?;
        let runs = due.iter().map(|tx_id| self.pipeline.resume(*tx_id, now));
        for (tx_id, result) in due.iter().zip(futures::future::join_all(runs).await) {
            match result {
                Ok(StageOutcome::Continue) => report.resumed += 1,
                Ok(StageOutcome::Halted(reason)) => debug!(%tx_id, ?reason, "resume halted"),
                Err(e) => debug!(%tx_id, error = %e, "resumed transaction failed"),
            }
        }
        Ok(report)
    }

    /// Released delays and approved transactions, each once.
    fn due(&self, now: DateTime<Utc>) -> Result<Vec<TxId>> {
        let mut seen = HashSet::new();
        let mut due = self.pipeline.delay_queue().due(now)?;
        due.extend(self.store.approved_awaiting_execution()?);
        due.retain(|id| seen.insert(*id));
        Ok(due)
    }

    pub async fn run(self, shutdown: CancellationToken) {
        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        info!(interval_secs = self.interval.as_secs(), "sweeper started");
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => {
                    match self.tick(Utc::now()).await {
                        Ok(report) if report != SweepReport::default() => {
                            info!(
                                resumed = report.resumed,
                                expired = report.expired,
                                evicted = report.evicted,
                                recovered = report.recovered,
                                "sweep finished"
                            );
                        }
                        Ok(_) => {}
                        Err(e) => warn!(error = %e, "sweep failed"),
                    }
                }
            }
        }
        info!("sweeper stopped");
    }
}
