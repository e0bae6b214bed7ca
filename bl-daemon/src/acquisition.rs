//! Probe Acquisition
//!
//! Refreshes a probe on its own schedule. Control loops only read the cached
//! value, so a slow 1-Wire conversion never delays a control tick. A probe
//! shared by several controllers gets one refresher.
//!
//! The probe's cache is only locked to store a finished reading; the
//! conversion itself runs unlocked on the blocking pool.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use bl_core::constants::timing;
use bl_core::SharedProbe;

/// Log only the first failure and then every Nth in a run of failures
const MAX_CONSECUTIVE_ERRORS: u32 = 10;

pub struct ProbeRefresher {
    name: String,
    probe: SharedProbe,
    interval: Duration,
    running: AtomicBool,
    stop: Notify,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ProbeRefresher {
    pub fn new(probe: SharedProbe) -> Self {
        let name = probe.name().to_string();
        Self {
            name,
            probe,
            interval: timing::PROBE_REFRESH_INTERVAL,
            running: AtomicBool::new(false),
            stop: Notify::new(),
            task: Mutex::new(None),
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn start(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        let this = Arc::clone(self);
        *self.task.lock() = Some(tokio::spawn(async move { this.run().await }));
        debug!(probe = %self.name, "Probe refresher started");
    }

    async fn run(&self) {
        let mut consecutive_errors: u32 = 0;

        while self.is_running() {
            // File reads block; keep them off the executor threads
            let probe = Arc::clone(&self.probe);
            let result = tokio::task::spawn_blocking(move || probe.refresh()).await;

            match result {
                Ok(Ok(_)) => {
                    if consecutive_errors > 0 {
                        info!(probe = %self.name, "Probe recovered after {} errors", consecutive_errors);
                        consecutive_errors = 0;
                    }
                }
                Ok(Err(e)) => {
                    consecutive_errors += 1;
                    if consecutive_errors == 1 || consecutive_errors % MAX_CONSECUTIVE_ERRORS == 0 {
                        warn!(probe = %self.name, "Probe read failed (count: {}): {}", consecutive_errors, e);
                    }
                }
                Err(e) => error!(probe = %self.name, "Probe refresh task panicked: {}", e),
            }

            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                _ = self.stop.notified() => {}
            }
        }

        debug!(probe = %self.name, "Probe refresher stopped");
    }

    /// Stop refreshing; returns once the task has exited
    pub async fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.stop.notify_one();

        let task = self.task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                error!(probe = %self.name, "Probe refresher task failed: {}", e);
            }
        }
    }
}
