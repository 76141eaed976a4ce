//! Tracing layer that forwards log lines to control clients

use relaygate_runtime::ThreadDirectory;
use std::fmt::{self, Write as _};
use tokio::sync::mpsc;
use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::layer::{Context, Layer};

/// Tag used for events not raised on a plugin worker thread
pub const CORE_TAG: &str = "CORE";

/// Lines buffered while the control service is busy; newer lines are
/// discarded once full
pub const LOG_BACKLOG: usize = 1024;

/// Receiving end of a [`MonitorLogLayer`]
pub type LogReceiver = mpsc::Receiver<String>;

/// Formats each event as `LEVEL (target) <plugin>: message` and sends it to
/// the control service
#[derive(Debug, Clone)]
pub struct MonitorLogLayer {
    threads: ThreadDirectory,
    tx: mpsc::Sender<String>,
}

/// Create a layer and the receiver the control service drains
pub fn log_channel(threads: ThreadDirectory) -> (MonitorLogLayer, LogReceiver) {
    let (tx, rx) = mpsc::channel(LOG_BACKLOG);
    (MonitorLogLayer { threads, tx }, rx)
}

impl<S: Subscriber> Layer<S> for MonitorLogLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        if self.tx.is_closed() {
            return;
        }

        let mut visitor = LineVisitor::default();
        event.record(&mut visitor);

        let meta = event.metadata();
        let plugin = self
            .threads
            .current_plugin()
            .unwrap_or_else(|| CORE_TAG.to_string());

        let line = format!(
            "{} ({}) {}: {}{}",
            meta.level(),
            meta.target(),
            plugin,
            visitor.message,
            visitor.fields
        );
        let _ = self.tx.try_send(line);
    }
}

#[derive(Default)]
struct LineVisitor {
    message: String,
    fields: String,
}

impl Visit for LineVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message.push_str(value);
        } else {
            let _ = write!(self.fields, " {}={}", field.name(), value);
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            let _ = write!(self.message, "{value:?}");
        } else {
            let _ = write!(self.fields, " {}={:?}", field.name(), value);
        }
    }
}
