//! Fan-out of encoded frames to any number of viewers.
//!
//! Each subscriber owns a bounded queue. The producer never blocks: when a
//! queue is full its oldest frame is evicted to admit the new one.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};

use crate::frame::EncodedFrame;

struct Slot {
    id: u64,
    tx: Sender<EncodedFrame>,
    // Producer-side handle on the same queue, used only to evict the oldest frame.
    evict: Receiver<EncodedFrame>,
}

struct Registry {
    depth: usize,
    slots: Mutex<Vec<Slot>>,
    next_id: AtomicU64,
    closed: AtomicBool,
    published: AtomicU64,
    dropped: AtomicU64,
}

impl Registry {
    fn slots(&self) -> MutexGuard<'_, Vec<Slot>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn remove(&self, id: u64) {
        self.slots().retain(|slot| slot.id != id);
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BroadcastStats {
    pub subscribers: usize,
    pub published: u64,
    /// Frames evicted from full subscriber queues.
    pub dropped: u64,
}

/// Registry of subscriber queues. Clones share the registry.
#[derive(Clone)]
pub struct Broadcaster {
    registry: Arc<Registry>,
}

impl Broadcaster {
    /// `depth` is the per-subscriber queue capacity (at least 1).
    pub fn new(depth: usize) -> Self {
        Self {
            registry: Arc::new(Registry {
                depth: depth.max(1),
                slots: Mutex::new(Vec::new()),
                next_id: AtomicU64::new(0),
                closed: AtomicBool::new(false),
                published: AtomicU64::new(0),
                dropped: AtomicU64::new(0),
            }),
        }
    }

    /// Register a new viewer. After `close` the returned subscription is
    /// already terminated.
    pub fn subscribe(&self) -> Subscription {
        let id = self.registry.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = bounded(self.registry.depth);
        {
            let mut slots = self.registry.slots();
            if !self.registry.closed.load(Ordering::SeqCst) {
                slots.push(Slot {
                    id,
                    tx,
                    evict: rx.clone(),
                });
            }
        }
        log::debug!("subscriber {} registered", id);
        Subscription {
            id,
            rx,
            registry: self.registry.clone(),
        }
    }

    /// Push `frame` to every registered queue, evicting the oldest entry of
    /// any full queue. Never blocks on a consumer.
    pub fn publish(&self, frame: &EncodedFrame) {
        if self.is_closed() {
            return;
        }
        let slots = self.registry.slots();
        for slot in slots.iter() {
            let mut pending = frame.clone();
            loop {
                match slot.tx.try_send(pending) {
                    Ok(()) => break,
                    Err(TrySendError::Full(back)) => {
                        if slot.evict.try_recv().is_ok() {
                            self.registry.dropped.fetch_add(1, Ordering::Relaxed);
                        }
                        pending = back;
                    }
                    Err(TrySendError::Disconnected(_)) => break,
                }
            }
        }
        self.registry.published.fetch_add(1, Ordering::Relaxed);
    }

    /// Disconnect every queue. Viewers drain what is buffered, then observe
    /// the end of the stream.
    pub fn close(&self) {
        let mut slots = self.registry.slots();
        self.registry.closed.store(true, Ordering::SeqCst);
        slots.clear();
    }

    pub fn is_closed(&self) -> bool {
        self.registry.closed.load(Ordering::SeqCst)
    }

    pub fn subscriber_count(&self) -> usize {
        self.registry.slots().len()
    }

    pub fn stats(&self) -> BroadcastStats {
        BroadcastStats {
            subscribers: self.subscriber_count(),
            published: self.registry.published.load(Ordering::Relaxed),
            dropped: self.registry.dropped.load(Ordering::Relaxed),
        }
    }
}

/// One viewer's queue. Dropping it deregisters the viewer.
pub struct Subscription {
    id: u64,
    rx: Receiver<EncodedFrame>,
    registry: Arc<Registry>,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Block until the next frame. `None` once the broadcaster is closed and
    /// the queue is drained.
    pub fn recv(&self) -> Option<EncodedFrame> {
        self.rx.recv().ok()
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Result<EncodedFrame, RecvTimeoutError> {
        self.rx.recv_timeout(timeout)
    }

    pub fn try_recv(&self) -> Option<EncodedFrame> {
        self.rx.try_recv().ok()
    }

    /// Number of frames waiting in this viewer's queue.
    pub fn pending(&self) -> usize {
        self.rx.len()
    }
}

impl Iterator for Subscription {
    type Item = EncodedFrame;

    fn next(&mut self) -> Option<EncodedFrame> {
        self.recv()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.registry.remove(self.id);
        log::debug!("subscriber {} deregistered", self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn frame(seq: u64) -> EncodedFrame {
        EncodedFrame {
            seq,
            jpeg: vec![seq as u8].into(),
        }
    }

    #[test]
    fn every_subscriber_gets_the_same_bytes() {
        let hub = Broadcaster::new(4);
        let a = hub.subscribe();
        let b = hub.subscribe();
        hub.publish(&frame(1));
        let fa = a.try_recv().unwrap();
        let fb = b.try_recv().unwrap();
        assert!(Arc::ptr_eq(&fa.jpeg, &fb.jpeg));
    }

    #[test]
    fn full_queue_drops_oldest() {
        let hub = Broadcaster::new(2);
        let sub = hub.subscribe();
        for seq in 1..=5 {
            hub.publish(&frame(seq));
        }
        assert_eq!(sub.pending(), 2);
        assert_eq!(sub.try_recv().unwrap().seq, 4);
        assert_eq!(sub.try_recv().unwrap().seq, 5);
        assert_eq!(hub.stats().dropped, 3);
    }

    #[test]
    fn drop_deregisters() {
        let hub = Broadcaster::new(1);
        let sub = hub.subscribe();
        assert_eq!(hub.subscriber_count(), 1);
        drop(sub);
        assert_eq!(hub.subscriber_count(), 0);
        hub.publish(&frame(1));
    }

    #[test]
    fn close_wakes_blocked_viewer() {
        let hub = Broadcaster::new(1);
        let sub = hub.subscribe();
        let waiter = thread::spawn(move || sub.recv());
        thread::sleep(Duration::from_millis(20));
        hub.close();
        assert!(waiter.join().unwrap().is_none());
    }

    #[test]
    fn buffered_frames_survive_close() {
        let hub = Broadcaster::new(2);
        let sub = hub.subscribe();
        hub.publish(&frame(7));
        hub.close();
        assert_eq!(sub.recv().map(|f| f.seq), Some(7));
        assert!(sub.recv().is_none());
        assert!(hub.subscribe().recv().is_none());
    }

    #[test]
    fn concurrent_unsubscribe_during_publish() {
        let hub = Broadcaster::new(1);
        let publisher = {
            let hub = hub.clone();
            thread::spawn(move || {
                for seq in 0..500 {
                    hub.publish(&frame(seq));
                }
            })
        };
        for _ in 0..200 {
            let sub = hub.subscribe();
            let _ = sub.try_recv();
        }
        publisher.join().unwrap();
        assert_eq!(hub.subscriber_count(), 0);
    }
}
