//! Dedicated acquisition thread.
//!
//! The only thread allowed to block on the stream. It pulls from the inlet and
//! pushes into the [`StreamBuffer`] until asked to stop, then hands the inlet
//! back so acquisition can be restarted on the same connection.

use crate::acquisition::buffer::StreamBuffer;
use crate::acquisition::source::StreamInlet;
use crate::error::{AppResult, ExperimentError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Owns the inlet while idle and the acquisition thread while running.
pub struct Acquisition {
    buffer: Arc<StreamBuffer>,
    pull_timeout: Duration,
    inlet: Option<Box<dyn StreamInlet>>,
    worker: Option<JoinHandle<Box<dyn StreamInlet>>>,
    running: Arc<AtomicBool>,
}

impl Acquisition {
    /// Wrap an inlet; nothing is pulled until `start`.
    pub fn new(inlet: Box<dyn StreamInlet>, buffer: Arc<StreamBuffer>, pull_timeout: Duration) -> Self {
        Self {
            buffer,
            pull_timeout,
            inlet: Some(inlet),
            worker: None,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Buffer the pull thread fills.
    pub fn buffer(&self) -> &Arc<StreamBuffer> {
        &self.buffer
    }

    /// Whether the pull thread is alive.
    pub fn is_running(&self) -> bool {
        self.worker.is_some()
    }

    /// Clear the buffer and start pulling on a new thread.
    ///
    /// A no-op when already running.
    pub fn start(&mut self) -> AppResult<()> {
        if self.worker.is_some() {
            return Ok(());
        }
        let mut inlet = self.inlet.take().ok_or(ExperimentError::NotConnected)?;
        self.buffer.clear();
        self.running.store(true, Ordering::SeqCst);

        let running = Arc::clone(&self.running);
        let buffer = Arc::clone(&self.buffer);
        let timeout = self.pull_timeout;
        let name = inlet.info().name.clone();

        let worker = thread::Builder::new()
            .name(format!("acquisition-{name}"))
            .spawn(move || {
                debug!("Acquisition loop started");
                while running.load(Ordering::SeqCst) {
                    match inlet.pull(timeout) {
                        Ok(Some(chunk)) => {
                            if let Err(e) = buffer.enqueue(chunk) {
                                warn!("Discarding chunk: {}", e);
                            }
                        }
                        Ok(None) => thread::sleep(Duration::from_millis(1)),
                        Err(e) => {
                            warn!("Stream pull failed: {}", e);
                            thread::sleep(Duration::from_millis(10));
                        }
                    }
                }
                debug!("Acquisition loop finished");
                inlet
            })?;

        self.worker = Some(worker);
        info!("Acquisition started");
        Ok(())
    }

    /// Signal the thread to stop and wait for it to return the inlet.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(worker) = self.worker.take() {
            match worker.join() {
                Ok(inlet) => self.inlet = Some(inlet),
                Err(_) => warn!("Acquisition thread panicked; stream must be reconnected"),
            }
            info!("Acquisition stopped");
        }
    }
}

impl Drop for Acquisition {
    fn drop(&mut self) {
        self.stop();
    }
}
