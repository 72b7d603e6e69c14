use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use tokio::sync::{mpsc, oneshot, Notify};

/// Events delivered to a channel's owner as they arrive off the wire.
#[derive(Debug)]
pub enum ChannelEvent {
    Data(Vec<u8>),
    Closed,
}

/// Routes inbound session messages to the right waiter: per-channel data
/// queues, pending channel-open confirmations, and forwarded-port
/// notifications. This is the client-side half of the SSH-style
/// multiplexing described in spec.md §4.2 — one registry shared by the
/// background reader task and every `connect_to_forwarded_port` pump.
#[derive(Default)]
pub struct ChannelRouter {
    next_channel_id: AtomicU32,
    channels: Mutex<HashMap<u32, mpsc::Sender<ChannelEvent>>>,
    open_waiters: Mutex<HashMap<u32, oneshot::Sender<Result<(), String>>>>,
    refresh_waiters: Mutex<Vec<oneshot::Sender<()>>>,
    forwarded_ports: Mutex<HashSet<u16>>,
    forwarded_notify: Notify,
}

impl ChannelRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allocate_channel_id(&self) -> u32 {
        self.next_channel_id.fetch_add(1, Ordering::Relaxed)
    }

    pub fn register_channel(&self, channel_id: u32) -> mpsc::Receiver<ChannelEvent> {
        let (tx, rx) = mpsc::channel(64);
        self.channels.lock().unwrap().insert(channel_id, tx);
        rx
    }

    pub fn deregister_channel(&self, channel_id: u32) {
        self.channels.lock().unwrap().remove(&channel_id);
    }

    pub fn register_open_waiter(&self, channel_id: u32) -> oneshot::Receiver<Result<(), String>> {
        let (tx, rx) = oneshot::channel();
        self.open_waiters.lock().unwrap().insert(channel_id, tx);
        rx
    }

    pub fn complete_open(&self, channel_id: u32, result: Result<(), String>) {
        if let Some(tx) = self.open_waiters.lock().unwrap().remove(&channel_id) {
            let _ = tx.send(result);
        }
    }

    pub fn dispatch_data(&self, channel_id: u32, data: Vec<u8>) {
        let sender = self.channels.lock().unwrap().get(&channel_id).cloned();
        if let Some(sender) = sender {
            let _ = sender.try_send(ChannelEvent::Data(data));
        }
    }

    pub fn dispatch_close(&self, channel_id: u32) {
        let sender = self.channels.lock().unwrap().remove(&channel_id);
        if let Some(sender) = sender {
            let _ = sender.try_send(ChannelEvent::Closed);
        }
    }

    pub fn register_refresh_waiter(&self, tx: oneshot::Sender<()>) {
        self.refresh_waiters.lock().unwrap().push(tx);
    }

    pub fn complete_refresh(&self) {
        for tx in self.refresh_waiters.lock().unwrap().drain(..) {
            let _ = tx.send(());
        }
    }

    pub fn mark_port_forwarded(&self, remote_port: u16) {
        self.forwarded_ports.lock().unwrap().insert(remote_port);
        self.forwarded_notify.notify_waiters();
    }

    pub fn is_port_forwarded(&self, remote_port: u16) -> bool {
        self.forwarded_ports.lock().unwrap().contains(&remote_port)
    }

    /// Resolves once `is_port_forwarded` would return true; callers race
    /// this against their own timeout/cancellation.
    pub async fn wait_port_forwarded(&self, remote_port: u16) {
        loop {
            if self.is_port_forwarded(remote_port) {
                return;
            }
            let notified = self.forwarded_notify.notified();
            if self.is_port_forwarded(remote_port) {
                return;
            }
            notified.await;
        }
    }
}
