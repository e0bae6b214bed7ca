//! Control Loop Scheduler
//!
//! One loop per controller. Each poll it takes the probe's cached value, hands
//! the reading to the controller, and sleeps until the next poll. The sleep is interruptible: `stop()` uses that to exit
//! at once, and `wake()` to run the next tick early after a setting changed.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use bl_core::constants::timing;
use bl_core::{Controller, Decision, Result, SharedProbe};

/// Log only the first failure and then every Nth in a run of failures
const MAX_CONSECUTIVE_ERRORS: u32 = 10;

/// Periodic driver for one controller
pub struct ControlLoop {
    controller: Arc<Controller>,
    probe: SharedProbe,
    poll_interval: Duration,
    running: AtomicBool,
    wake: Notify,
    read_errors: AtomicU32,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ControlLoop {
    pub fn new(controller: Arc<Controller>, probe: SharedProbe) -> Self {
        Self {
            controller,
            probe,
            poll_interval: timing::POLL_INTERVAL,
            running: AtomicBool::new(false),
            wake: Notify::new(),
            read_errors: AtomicU32::new(0),
            task: Mutex::new(None),
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn controller(&self) -> &Arc<Controller> {
        &self.controller
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Attach the controller's outputs and start polling
    ///
    /// A controller without a heat pin is disabled: this returns
    /// `OutputNotConfigured` and no task is started.
    pub fn start(self: &Arc<Self>) -> Result<()> {
        if self.is_running() {
            return Ok(());
        }

        self.controller.attach_outputs()?;
        self.running.store(true, Ordering::SeqCst);

        let this = Arc::clone(self);
        *self.task.lock() = Some(tokio::spawn(async move { this.run().await }));

        info!(
            controller = %self.controller.name(),
            interval_ms = self.poll_interval.as_millis() as u64,
            "Control loop started"
        );
        Ok(())
    }

    async fn run(&self) {
        while self.is_running() {
            self.tick();

            // Sleep for the poll interval, but wake up immediately if signaled
            tokio::select! {
                _ = tokio::time::sleep(self.poll_interval) => {}
                _ = self.wake.notified() => {
                    debug!(controller = %self.controller.name(), "Control loop woken");
                }
            }
        }

        info!(controller = %self.controller.name(), "Control loop stopped");
    }

    /// One poll: read the probe and run the controller
    ///
    /// Returns `None` when the probe has no reading to offer.
    pub fn tick(&self) -> Option<Decision> {
        let reading = self.probe.read();

        match reading {
            Ok(reading) => {
                let errors = self.read_errors.swap(0, Ordering::SeqCst);
                if errors > 0 {
                    debug!(controller = %self.controller.name(), "Probe readable again after {} errors", errors);
                }
                Some(self.controller.tick(reading))
            }
            Err(e) => {
                let errors = self.read_errors.fetch_add(1, Ordering::SeqCst) + 1;
                if errors == 1 || errors % MAX_CONSECUTIVE_ERRORS == 0 {
                    warn!(
                        controller = %self.controller.name(),
                        "No temperature reading (count: {}): {}",
                        errors,
                        e
                    );
                }
                None
            }
        }
    }

    /// Run the next tick now instead of at the end of the poll interval
    pub fn wake(&self) {
        self.wake.notify_one();
    }

    /// Clear the running flag and interrupt the sleep; returns once the loop has exited
    pub async fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.wake.notify_one();

        let task = self.task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                error!(controller = %self.controller.name(), "Control loop task failed: {}", e);
            }
        }
    }

    /// Stop the loop, release the outputs and save the settings
    pub async fn shutdown(&self) -> Result<()> {
        self.stop().await;
        self.controller.shutdown()
    }
}
