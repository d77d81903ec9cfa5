use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use futures::StreamExt;
use mavrelay_proto::{codec, Envelope};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::state::{PortConfig, PortStatus};
use crate::upstream::{RecordStream, Upstream};
use crate::IngestError;

/// Owns the single upstream listener and the port status shown to operators.
///
/// Every `configure` call takes a new attempt number. When its bind
/// completes, the result is applied only if no newer attempt started in the
/// meantime; otherwise it is dropped (and a stale listener closed). The
/// status therefore always describes the most recently initiated attempt,
/// whatever order the binds finish in.
#[derive(Clone)]
pub struct IngestManager {
    inner: Arc<Inner>,
}

struct Inner {
    upstream: Arc<dyn Upstream>,
    attempt: AtomicU64,
    slot: Mutex<Slot>,
    sink: mpsc::Sender<Envelope>,
}

struct Slot {
    config: PortConfig,
    reader: Option<JoinHandle<()>>,
}

impl IngestManager {
    /// `sink` feeds the broadcast hub. `port` is reported until the first
    /// `configure` completes.
    pub fn new(upstream: Arc<dyn Upstream>, sink: mpsc::Sender<Envelope>, port: u16) -> Self {
        Self {
            inner: Arc::new(Inner {
                upstream,
                attempt: AtomicU64::new(0),
                slot: Mutex::new(Slot { config: PortConfig::new(port), reader: None }),
                sink,
            }),
        }
    }

    pub fn status(&self) -> PortConfig {
        self.slot().config.clone()
    }

    pub async fn configure(&self, port: u16) -> Result<PortConfig, IngestError> {
        if port == 0 {
            return Err(IngestError::InvalidPort(port));
        }
        let attempt = self.inner.attempt.fetch_add(1, Ordering::SeqCst) + 1;

        let previous = {
            let mut slot = self.slot();
            if !self.is_latest(attempt) {
                return Err(IngestError::Superseded);
            }
            slot.config = PortConfig::new(port);
            slot.reader.take()
        };
        if let Some(reader) = previous {
            reader.abort();
            // the listener's socket is released once the task is gone
            let _ = reader.await;
            debug!("mavlink: previous listener torn down");
        }

        let opened = self.inner.upstream.open(port).await;

        let mut slot = self.slot();
        if !self.is_latest(attempt) {
            debug!(port, attempt, "mavlink: stale connection attempt discarded");
            return Err(IngestError::Superseded);
        }
        match opened {
            Ok(records) => {
                slot.config.status = PortStatus::Ok;
                slot.config.error = None;
                slot.reader = Some(tokio::spawn(forward(records, self.inner.sink.clone(), port)));
                info!("mavlink: receiving on port {}", port);
                Ok(slot.config.clone())
            }
            Err(e) => {
                slot.config.status = PortStatus::Error;
                slot.config.error = Some(e.to_string());
                warn!("mavlink: unable to receive messages on port {}: {}", port, e);
                Err(e)
            }
        }
    }

    /// Stops the current listener. Status is left as it was.
    pub fn shutdown(&self) {
        if let Some(reader) = self.slot().reader.take() {
            reader.abort();
        }
    }

    fn is_latest(&self, attempt: u64) -> bool {
        self.inner.attempt.load(Ordering::SeqCst) == attempt
    }

    fn slot(&self) -> MutexGuard<'_, Slot> {
        // a panic while holding the lock leaves the slot consistent; keep going
        self.inner.slot.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Pushes codec-accepted records to the hub. Never waits on the hub: when
/// its queue is full the envelope is dropped.
async fn forward(mut records: RecordStream, sink: mpsc::Sender<Envelope>, port: u16) {
    let mut dropped = 0u64;
    while let Some(rec) = records.next().await {
        let Some(envelope) = codec::encode(rec.msg_id, rec.payload) else { continue };
        match sink.try_send(envelope) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                dropped += 1;
                if dropped.is_power_of_two() {
                    debug!(port, dropped, "mavlink: hub queue full, envelope dropped");
                }
            }
            Err(TrySendError::Closed(_)) => {
                info!("mavlink: hub closed, listener on port {} stopping", port);
                break;
            }
        }
    }
}
