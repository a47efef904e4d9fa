use crate::domain::model::ProgressEvent;
use crate::domain::ports::ProgressSink;
use tokio::sync::mpsc::UnboundedSender;

/// Writes each event to the log, errors at `error` level.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl ProgressSink for TracingSink {
    fn emit(&self, event: ProgressEvent) {
        if event.is_error() {
            tracing::error!("❌ {}", event);
        } else {
            tracing::info!("{}", event);
        }
    }
}

/// Forwards events to another task, e.g. a UI. Events sent after the
/// receiver is gone are dropped.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: UnboundedSender<ProgressEvent>,
}

impl ChannelSink {
    pub fn new(tx: UnboundedSender<ProgressEvent>) -> Self {
        Self { tx }
    }
}

impl ProgressSink for ChannelSink {
    fn emit(&self, event: ProgressEvent) {
        let _ = self.tx.send(event);
    }
}
