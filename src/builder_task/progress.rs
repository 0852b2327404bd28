use std::io::Write;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Heartbeat printed to the pusher's terminal while the build sits in a
/// long external wait. One sender signals completion through a
/// single-element handoff; the monitor thread drains before the guarded
/// operation returns.
pub struct ProgressTicker {
    quit_tx: mpsc::SyncSender<()>,
    monitor: Option<JoinHandle<()>>,
}

impl ProgressTicker {
    pub fn start(interval: Duration, out: Arc<Mutex<Box<dyn Write + Send>>>) -> ProgressTicker {
        let (quit_tx, quit_rx) = mpsc::sync_channel::<()>(1);

        let monitor = thread::Builder::new()
            .name("build-progress".to_string())
            .spawn(move || loop {
                match quit_rx.recv_timeout(interval) {
                    // operation finished, or the other side is gone
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    Err(RecvTimeoutError::Timeout) => {
                        let mut out = out.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
                        let _ = write!(out, ".");
                        let _ = out.flush();
                    }
                }
            });

        ProgressTicker {
            quit_tx,
            monitor: match monitor {
                Ok(handle) => Some(handle),
                Err(err) => {
                    error!("cannot spawn progress monitor thread: {}", err);
                    None
                }
            },
        }
    }

    pub fn stop(self) {}
}

impl Drop for ProgressTicker {
    fn drop(&mut self) {
        let _ = self.quit_tx.try_send(());
        if let Some(monitor) = self.monitor.take() {
            let _ = monitor.join();
        }
    }
}
