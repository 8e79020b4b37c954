//! Background rotation daemon.
//!
//! One thread per storage instance. Each tick it rotates if the current
//! rotation window has expired, then waits one rotation interval. The wait
//! doubles as the shutdown signal, so stopping never has to sit out a full
//! interval.

use crate::engine::KvEngine;
use crate::metadata::unix_now;
use crate::storage::Shared;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread;
use tracing::{debug, info, warn};

pub(crate) struct RotationDaemon {
    stop_tx: Sender<()>,
    handle: thread::JoinHandle<()>,
}

impl RotationDaemon {
    pub(crate) fn spawn<E: KvEngine>(shared: Arc<Shared<E>>) -> std::io::Result<Self> {
        let (stop_tx, stop_rx) = crossbeam_channel::bounded(1);
        let handle = thread::Builder::new()
            .name(format!("rotate-{}", shared.name))
            .spawn(move || {
                let log = shared.log.clone();
                log.in_scope(|| run(&shared, &stop_rx));
            })?;
        Ok(Self { stop_tx, handle })
    }

    /// Signal the daemon and wait for it to exit
    pub(crate) fn stop(self) {
        // A full or disconnected channel means the daemon is already leaving
        let _ = self.stop_tx.try_send(());
        if self.handle.join().is_err() {
            warn!("Rotation daemon panicked");
        }
    }
}

fn run<E: KvEngine>(shared: &Shared<E>, stop_rx: &Receiver<()>) {
    info!(storage = %shared.name, "Rotation daemon started");

    loop {
        if shared.is_poisoned() {
            warn!(storage = %shared.name, "Storage unavailable, rotation daemon exiting");
            break;
        }

        let (due, interval) = {
            let live = shared.live.read();
            (
                live.meta.is_rotation_due(unix_now()),
                live.meta.rotation_interval(),
            )
        };

        if due {
            match shared.rotate() {
                Ok(report) if !report.metadata_persisted => {
                    warn!(storage = %shared.name, "Scheduled rotation left metadata unsaved");
                }
                Ok(_) => {}
                Err(e) => warn!(storage = %shared.name, "Scheduled rotation failed: {}", e),
            }
        } else {
            debug!(storage = %shared.name, "Rotation not due yet");
        }

        match stop_rx.recv_timeout(interval) {
            Err(RecvTimeoutError::Timeout) => {}
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    info!(storage = %shared.name, "Rotation daemon stopped");
}
