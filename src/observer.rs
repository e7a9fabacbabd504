//! Run-summary events pushed to external observers (dashboards, notifiers).
//!
//! The orchestrator emits one immutable summary per finished run; observers
//! never see or mutate in-flight state.

use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::decision::Verdict;

#[derive(Debug, Clone, Serialize)]
pub struct ExecutionBrief {
    pub action: String,
    pub success: bool,
    pub message: String,
    pub test_mode: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: String,
    pub symbol: String,
    pub trade_date: NaiveDate,
    pub finished_at: DateTime<Utc>,
    #[serde(with = "duration_ms")]
    pub elapsed: Duration,
    /// Stage steps executed, tool rounds included
    pub steps: u32,
    pub verdict: Verdict,
    pub confidence: Option<f64>,
    pub executions: Vec<ExecutionBrief>,
}

#[derive(Debug, Clone, Serialize)]
pub enum RunEvent {
    Completed(RunSummary),
    Failed {
        run_id: String,
        symbol: String,
        error: String,
    },
}

pub trait RunObserver: Send + Sync {
    fn on_event(&self, event: &RunEvent);
}

/// Logs each event through `tracing`
#[derive(Debug, Default)]
pub struct LoggingObserver;

impl RunObserver for LoggingObserver {
    fn on_event(&self, event: &RunEvent) {
        match event {
            RunEvent::Completed(s) => {
                info!(
                    run_id = %s.run_id,
                    symbol = %s.symbol,
                    verdict = %s.verdict,
                    steps = s.steps,
                    elapsed_ms = s.elapsed.as_millis() as u64,
                    "Run complete"
                );
                for e in &s.executions {
                    info!(
                        action = %e.action,
                        success = e.success,
                        test_mode = e.test_mode,
                        "Execution: {}",
                        e.message
                    );
                }
            }
            RunEvent::Failed { run_id, symbol, error } => {
                warn!(run_id = %run_id, symbol = %symbol, "Run failed: {}", error)
            }
        }
    }
}

/// Fans events out to any number of async subscribers
pub struct ChannelObserver {
    tx: broadcast::Sender<RunEvent>,
}

impl ChannelObserver {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RunEvent> {
        self.tx.subscribe()
    }
}

impl RunObserver for ChannelObserver {
    fn on_event(&self, event: &RunEvent) {
        if self.tx.send(event.clone()).is_err() {
            debug!("No run-event subscribers");
        }
    }
}

mod duration_ms {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn channel_observer_delivers_events() {
        let observer = ChannelObserver::new(4);
        let mut rx = observer.subscribe();
        observer.on_event(&RunEvent::Failed {
            run_id: "r1".into(),
            symbol: "BTC/USDT".into(),
            error: "boom".into(),
        });
        match rx.recv().await.unwrap() {
            RunEvent::Failed { run_id, .. } => assert_eq!(run_id, "r1"),
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn send_without_subscribers_is_quiet() {
        let observer = ChannelObserver::new(1);
        observer.on_event(&RunEvent::Failed {
            run_id: "r".into(),
            symbol: "s".into(),
            error: "e".into(),
        });
    }
}
