//! Fans engine run reports out to the history database and the webhook.

use cadence_scheduler::RunReport;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::history::RunHistory;
use crate::notify::WebhookNotifier;

/// Channel capacity between the engine and the router.
pub const REPORT_BUFFER: usize = 64;

pub struct ReportRouter {
    history: Option<RunHistory>,
    notifier: Option<WebhookNotifier>,
}

impl ReportRouter {
    pub fn new(history: Option<RunHistory>, notifier: Option<WebhookNotifier>) -> Self {
        Self { history, notifier }
    }

    /// Drain `rx` until every sender is gone.
    pub fn spawn(self, mut rx: mpsc::Receiver<RunReport>) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(report) = rx.recv().await {
                self.handle(&report).await;
            }
            info!("report channel closed; router exiting");
        })
    }

    /// Record and notify one report. Errors are logged, never propagated.
    pub async fn handle(&self, report: &RunReport) {
        if let Some(history) = &self.history {
            if let Err(e) = history.record(report) {
                warn!(trigger = %report.trigger, error = %e, "failed to record run");
            }
        }
        if let Some(notifier) = &self.notifier {
            if let Err(e) = notifier.notify(report).await {
                warn!(trigger = %report.trigger, error = %e, "run notification failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cadence_scheduler::{RunOutcome, RunTrigger};
    use chrono::Utc;
    use rusqlite::Connection;

    fn report(outcome: RunOutcome) -> RunReport {
        RunReport {
            trigger: RunTrigger::Scheduled,
            started_at: Utc::now(),
            finished_at: Utc::now(),
            outcome,
        }
    }

    #[tokio::test]
    async fn drains_channel_into_history() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("runs.db");
        let path = path.to_str().unwrap();

        let router = ReportRouter::new(Some(RunHistory::open(path).unwrap()), None);
        let (tx, rx) = mpsc::channel(REPORT_BUFFER);
        let handle = router.spawn(rx);

        tx.send(report(RunOutcome::Succeeded { attempts: 1 }))
            .await
            .unwrap();
        tx.send(report(RunOutcome::Failed {
            attempts: 2,
            last_error: "boom".into(),
        }))
        .await
        .unwrap();
        drop(tx);
        handle.await.unwrap();

        let history = RunHistory::new(Connection::open(path).unwrap()).unwrap();
        assert_eq!(history.recent(10).unwrap().len(), 2);
    }

    #[tokio::test]
    async fn router_without_sinks_is_a_no_op() {
        let router = ReportRouter::new(None, None);
        router.handle(&report(RunOutcome::Skipped)).await;
    }
}
