//! Outbound Notifications
//!
//! Best-effort delivery of macro lifecycle events (started, completed, error)
//! to pluggable [`Notifier`] sinks. Delivery runs on a dedicated worker thread
//! so a slow or failing sink never stalls playback; failures are only logged.

use crossbeam_channel::{unbounded, Sender};
use parking_lot::Mutex;
use serde::Serialize;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, warn};

/// A macro lifecycle event
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Notification {
    Started { recipe: String, duration_secs: u64 },
    Completed { recipe: String, duration_secs: u64 },
    Error { recipe: String, message: String },
}

impl Notification {
    pub fn started(recipe: &str, duration: Duration) -> Self {
        Notification::Started {
            recipe: recipe.to_string(),
            duration_secs: duration.as_secs(),
        }
    }

    pub fn completed(recipe: &str, duration: Duration) -> Self {
        Notification::Completed {
            recipe: recipe.to_string(),
            duration_secs: duration.as_secs(),
        }
    }

    pub fn error(recipe: &str, message: impl Into<String>) -> Self {
        Notification::Error {
            recipe: recipe.to_string(),
            message: message.into(),
        }
    }

    /// Human-readable one-liner
    pub fn message(&self) -> String {
        match self {
            Notification::Started {
                recipe,
                duration_secs,
            } if *duration_secs > 0 => format!(
                "Macro '{}' started, auto-stop in {}",
                recipe,
                format_duration(*duration_secs)
            ),
            Notification::Started { recipe, .. } => {
                format!("Macro '{}' started, runs until stopped", recipe)
            }
            Notification::Completed {
                recipe,
                duration_secs,
            } => format!(
                "Macro '{}' completed after {}",
                recipe,
                format_duration(*duration_secs)
            ),
            Notification::Error { recipe, message } => {
                format!("Macro '{}' failed: {}", recipe, message)
            }
        }
    }
}

fn format_duration(secs: u64) -> String {
    let (hours, minutes, seconds) = (secs / 3600, (secs % 3600) / 60, secs % 60);
    match (hours, minutes) {
        (0, 0) => format!("{}s", seconds),
        (0, _) => format!("{}m {}s", minutes, seconds),
        _ => format!("{}h {}m", hours, minutes),
    }
}

/// A notification sink
pub trait Notifier: Send + Sync {
    fn name(&self) -> &str;

    fn notify(&self, notification: &Notification) -> anyhow::Result<()>;
}

/// Writes notifications to the log
#[derive(Debug, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn name(&self) -> &str {
        "log"
    }

    fn notify(&self, notification: &Notification) -> anyhow::Result<()> {
        info!("[notify] {}", notification.message());
        Ok(())
    }
}

/// Fan-out of notifications to every registered sink, off the caller's thread
pub struct NotificationHub {
    tx: Mutex<Option<Sender<Notification>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl NotificationHub {
    pub fn new(notifiers: Vec<Box<dyn Notifier>>) -> Self {
        let (tx, rx) = unbounded::<Notification>();
        let worker = thread::spawn(move || {
            for notification in rx.iter() {
                for notifier in &notifiers {
                    if let Err(e) = notifier.notify(&notification) {
                        warn!("Notifier '{}' failed: {:#}", notifier.name(), e);
                    }
                }
            }
            debug!("Notification worker exiting");
        });

        Self {
            tx: Mutex::new(Some(tx)),
            worker: Mutex::new(Some(worker)),
        }
    }

    /// Hub that discards everything
    pub fn disabled() -> Self {
        Self {
            tx: Mutex::new(None),
            worker: Mutex::new(None),
        }
    }

    /// Queue a notification; never blocks
    pub fn notify(&self, notification: Notification) {
        match self.tx.lock().as_ref() {
            Some(tx) => {
                if tx.send(notification).is_err() {
                    warn!("Notification worker is gone, dropping notification");
                }
            }
            None => debug!("Notifications disabled, dropping {:?}", notification),
        }
    }

    /// Deliver everything already queued, then stop the worker
    pub fn shutdown(&self) {
        drop(self.tx.lock().take());
        if let Some(worker) = self.worker.lock().take() {
            if worker.join().is_err() {
                warn!("Notification worker panicked");
            }
        }
    }
}

impl Drop for NotificationHub {
    fn drop(&mut self) {
        self.shutdown();
    }
}
