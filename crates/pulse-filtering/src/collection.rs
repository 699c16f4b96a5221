//! Periodic metric collection.
//!
//! [`CollectionLoop`] closes one window per interval on a background tokio
//! task and hands each [`CollectionReport`] to a [`CollectionReporter`].

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::debug;

use crate::engine::{CollectionReport, LiveMetricsEngine};

/// Destination for per-window reports, typically the control-plane client.
pub trait CollectionReporter: Send + Sync + 'static {
    fn report(&self, report: CollectionReport);
}

/// Sends reports down an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelReporter {
    tx: mpsc::UnboundedSender<CollectionReport>,
}

impl ChannelReporter {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<CollectionReport>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl CollectionReporter for ChannelReporter {
    fn report(&self, report: CollectionReport) {
        if self.tx.send(report).is_err() {
            debug!("collection report receiver closed");
        }
    }
}

pub struct CollectionLoop;

impl CollectionLoop {
    /// Start collecting at the engine's configured interval.
    pub fn start<R: CollectionReporter>(
        engine: Arc<LiveMetricsEngine>,
        reporter: R,
    ) -> CollectionHandle {
        let interval = engine.collection_interval();
        Self::spawn(engine, interval, reporter)
    }

    /// Start collecting from `engine` every `interval`.
    ///
    /// The first report is produced one full interval after the call.
    pub fn spawn<R: CollectionReporter>(
        engine: Arc<LiveMetricsEngine>,
        interval: Duration,
        reporter: R,
    ) -> CollectionHandle {
        let (stop_tx, mut stop_rx) = mpsc::channel::<()>(1);
        let period = interval.max(Duration::from_millis(1));

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // the first tick completes immediately
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        for report in engine.collect() {
                            debug!(
                                etag = %report.etag,
                                metrics = report.metrics.len(),
                                forwarded = report.documents_forwarded,
                                "collection window closed"
                            );
                            reporter.report(report);
                        }
                    }
                    _ = stop_rx.recv() => {
                        debug!("collection loop stopped");
                        break;
                    }
                }
            }
        });

        CollectionHandle {
            task,
            stop: stop_tx,
        }
    }
}

/// Handle for a running collection loop.
pub struct CollectionHandle {
    task: tokio::task::JoinHandle<()>,
    stop: mpsc::Sender<()>,
}

impl CollectionHandle {
    /// Stop the loop and wait for the task to finish.
    pub async fn stop(self) {
        let _ = self.stop.send(()).await;
        let _ = self.task.await;
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}
