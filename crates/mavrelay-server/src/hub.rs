//! Fan-out of telemetry envelopes to connected viewers.
//!
//! The hub is an actor: one task owns the open-viewer set and is the only
//! place it changes. Envelopes arrive from ingest on a bounded channel;
//! viewers join and leave through a second channel. Delivery is
//! best-effort: a viewer whose outbound slot is still occupied is skipped
//! for that envelope, never waited on.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use mavrelay_proto::{codec, Envelope};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tracing::{debug, info};

pub type ViewerId = u64;

/// Frames a viewer can have pending: the one its writer is working on.
const VIEWER_SLOTS: usize = 1;
const COMMAND_QUEUE: usize = 64;

/// Outcome of one `publish`.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PublishReport {
    pub delivered: usize,
    /// Viewers not writable at the time; the envelope is not retried for them.
    pub skipped: usize,
    /// Viewers found closed and removed from the open set.
    pub removed: usize,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct HubStats {
    pub published: u64,
    pub delivered: u64,
    pub skipped: u64,
}

/// The open-viewer set.
#[derive(Default)]
pub struct Hub {
    viewers: HashMap<ViewerId, mpsc::Sender<Arc<str>>>,
    stats: HubStats,
}

impl Hub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn accept(&mut self, id: ViewerId, tx: mpsc::Sender<Arc<str>>) {
        self.viewers.insert(id, tx);
    }

    pub fn remove(&mut self, id: ViewerId) -> bool {
        self.viewers.remove(&id).is_some()
    }

    /// Serializes once and offers the text to every open viewer.
    pub fn publish(&mut self, envelope: &Envelope) -> PublishReport {
        let text: Arc<str> = codec::serialize(envelope).into();
        let mut report = PublishReport::default();

        self.viewers.retain(|id, tx| match tx.try_send(text.clone()) {
            Ok(()) => {
                report.delivered += 1;
                true
            }
            Err(TrySendError::Full(_)) => {
                report.skipped += 1;
                true
            }
            Err(TrySendError::Closed(_)) => {
                debug!("[viewer {}] closed, removed from hub", id);
                report.removed += 1;
                false
            }
        });

        self.stats.published += 1;
        self.stats.delivered += report.delivered as u64;
        self.stats.skipped += report.skipped as u64;
        report
    }

    pub fn viewer_count(&self) -> usize {
        self.viewers.len()
    }

    pub fn stats(&self) -> HubStats {
        self.stats
    }
}

#[derive(Debug)]
pub enum HubCommand {
    Join { id: ViewerId, tx: mpsc::Sender<Arc<str>> },
    Leave { id: ViewerId },
}

/// Cloneable front door to a running hub.
#[derive(Clone)]
pub struct HubHandle {
    commands: mpsc::Sender<HubCommand>,
    next_id: Arc<AtomicU64>,
    viewers: Arc<AtomicUsize>,
}

impl HubHandle {
    /// Registers a new viewer. `None` once the hub has stopped.
    pub async fn accept(&self) -> Option<ViewerConnection> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let (tx, rx) = mpsc::channel(VIEWER_SLOTS);
        self.commands.send(HubCommand::Join { id, tx }).await.ok()?;
        Some(ViewerConnection { id, rx, commands: self.commands.clone() })
    }

    /// Open viewers as of the hub's last step.
    pub fn viewer_count(&self) -> usize {
        self.viewers.load(Ordering::Relaxed)
    }
}

/// One accepted viewer. Dropping it leaves the hub.
pub struct ViewerConnection {
    id: ViewerId,
    rx: mpsc::Receiver<Arc<str>>,
    commands: mpsc::Sender<HubCommand>,
}

impl ViewerConnection {
    pub fn id(&self) -> ViewerId {
        self.id
    }

    /// Next serialized envelope; `None` once the hub is gone.
    pub async fn next(&mut self) -> Option<Arc<str>> {
        self.rx.recv().await
    }
}

impl Drop for ViewerConnection {
    fn drop(&mut self) {
        // if the queue is full the next publish finds the closed receiver instead
        let _ = self.commands.try_send(HubCommand::Leave { id: self.id });
    }
}

/// Starts the hub task. It runs until the envelope channel closes.
pub fn spawn_hub(envelopes: mpsc::Receiver<Envelope>) -> (HubHandle, JoinHandle<HubStats>) {
    let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_QUEUE);
    let viewers = Arc::new(AtomicUsize::new(0));
    let handle = HubHandle {
        commands: cmd_tx,
        next_id: Arc::new(AtomicU64::new(0)),
        viewers: viewers.clone(),
    };
    let task = tokio::spawn(run_hub(envelopes, cmd_rx, viewers));
    (handle, task)
}

async fn run_hub(
    mut envelopes: mpsc::Receiver<Envelope>,
    mut commands: mpsc::Receiver<HubCommand>,
    viewers: Arc<AtomicUsize>,
) -> HubStats {
    let mut hub = Hub::new();
    let mut commands_open = true;

    loop {
        tokio::select! {
            // joins before envelopes, so a viewer sees everything published after accept() returns
            biased;
            cmd = commands.recv(), if commands_open => match cmd {
                Some(HubCommand::Join { id, tx }) => {
                    hub.accept(id, tx);
                    info!("[viewer {}] joined ({} open)", id, hub.viewer_count());
                }
                Some(HubCommand::Leave { id }) => {
                    if hub.remove(id) {
                        info!("[viewer {}] left ({} open)", id, hub.viewer_count());
                    }
                }
                None => commands_open = false,
            },
            env = envelopes.recv() => match env {
                Some(env) => {
                    let report = hub.publish(&env);
                    if report.skipped > 0 {
                        debug!("{} {} viewer(s) not writable, skipped", env.kind, report.skipped);
                    }
                }
                None => break,
            },
        }
        viewers.store(hub.viewer_count(), Ordering::Relaxed);
    }

    let stats = hub.stats();
    info!(
        "hub stopped: published={} delivered={} skipped={}",
        stats.published, stats.delivered, stats.skipped
    );
    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use mavrelay_proto::{MessageType, Payload};
    use std::time::Duration;

    fn env(lat: i32) -> Envelope {
        Envelope::new(MessageType::SimState, Payload::new().with("lat", lat).with("lng", 0i32))
    }

    #[test]
    fn publish_reaches_every_open_viewer() {
        let mut hub = Hub::new();
        let (tx1, mut rx1) = mpsc::channel(4);
        let (tx2, mut rx2) = mpsc::channel(4);
        hub.accept(1, tx1);
        hub.accept(2, tx2);

        let report = hub.publish(&env(5));
        assert_eq!(report, PublishReport { delivered: 2, skipped: 0, removed: 0 });
        let expected = r#"{"type":"SIMSTATE","payload":{"lat":5,"lng":0}}"#;
        assert_eq!(&*rx1.try_recv().unwrap(), expected);
        assert_eq!(&*rx2.try_recv().unwrap(), expected);
    }

    #[test]
    fn stalled_viewer_does_not_affect_others() {
        let mut hub = Hub::new();
        let (stalled_tx, _stalled_rx) = mpsc::channel(1);
        let (live_tx, mut live_rx) = mpsc::channel(1);
        hub.accept(1, stalled_tx);
        hub.accept(2, live_tx);

        for i in 0..10 {
            let report = hub.publish(&env(i));
            assert_eq!(report.delivered, if i == 0 { 2 } else { 1 });
            assert_eq!(report.skipped, if i == 0 { 0 } else { 1 });
            let got = live_rx.try_recv().unwrap();
            assert!(got.contains(&format!("\"lat\":{}", i)));
        }
        assert_eq!(hub.viewer_count(), 2);
        assert_eq!(hub.stats().skipped, 9);
    }

    #[test]
    fn closed_viewer_is_removed_on_publish() {
        let mut hub = Hub::new();
        let (tx, rx) = mpsc::channel(1);
        hub.accept(7, tx);
        drop(rx);
        let report = hub.publish(&env(1));
        assert_eq!(report.removed, 1);
        assert_eq!(hub.viewer_count(), 0);
    }

    #[tokio::test]
    async fn actor_delivers_in_publish_order() {
        let (env_tx, env_rx) = mpsc::channel(16);
        let (hub, _task) = spawn_hub(env_rx);
        let mut viewer = hub.accept().await.unwrap();

        for i in 0..5 {
            env_tx.send(env(i)).await.unwrap();
            let text = tokio::time::timeout(Duration::from_secs(1), viewer.next())
                .await
                .unwrap()
                .unwrap();
            assert!(text.contains(&format!("\"lat\":{}", i)));
        }
    }

    #[tokio::test]
    async fn late_joiner_sees_only_later_envelopes() {
        let (env_tx, env_rx) = mpsc::channel(16);
        let (hub, _task) = spawn_hub(env_rx);
        let mut early = hub.accept().await.unwrap();

        env_tx.send(env(1)).await.unwrap();
        early.next().await.unwrap();

        let mut late = hub.accept().await.unwrap();
        env_tx.send(env(2)).await.unwrap();
        let text = tokio::time::timeout(Duration::from_secs(1), late.next())
            .await
            .unwrap()
            .unwrap();
        assert!(text.contains("\"lat\":2"));
    }

    #[tokio::test]
    async fn dropped_viewer_leaves_the_open_set() {
        let (env_tx, env_rx) = mpsc::channel(16);
        let (hub, task) = spawn_hub(env_rx);
        let a = hub.accept().await.unwrap();
        let _b = hub.accept().await.unwrap();
        drop(a);

        // one more envelope makes the hub step past the Leave
        env_tx.send(env(1)).await.unwrap();
        for _ in 0..100 {
            if hub.viewer_count() == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(hub.viewer_count(), 1);

        drop(env_tx);
        let stats = task.await.unwrap();
        assert_eq!(stats.published, 1);
    }
}
