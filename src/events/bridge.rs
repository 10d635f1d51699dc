// Thu Jan 15 2026 - Alex

use crate::controller::CacheUpdateHooks;
use crate::error::{panic_message, CacheError, CacheResult};
use crate::events::bus::{CacheEvent, EventBus, EventKinds, SubscriptionId};
use parking_lot::Mutex;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

const BRIDGE_THREAD_NAME: &str = "cache-event-bridge";

enum BridgeMessage {
    Event(CacheEvent),
    Shutdown,
}

#[derive(Default)]
struct BridgeStats {
    received: AtomicU64,
    rebuilds: AtomicU64,
    failures: AtomicU64,
}

/// Turns committed mutation events into out-of-band cache rebuilds.
///
/// Publishing only enqueues; rebuilds run on the bridge's own thread, and
/// events that pile up while one is running are folded into the next one.
/// Rebuild errors stop here and are only logged.
pub struct ChangeEventBridge {
    bus: Arc<EventBus>,
    subscription: Mutex<Option<SubscriptionId>>,
    sender: Mutex<Option<Sender<BridgeMessage>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    stats: Arc<BridgeStats>,
}

impl ChangeEventBridge {
    pub fn new(bus: Arc<EventBus>, hooks: Arc<dyn CacheUpdateHooks>) -> CacheResult<Self> {
        let (tx, rx) = mpsc::channel();
        let stats = Arc::new(BridgeStats::default());

        let worker_stats = stats.clone();
        let worker = thread::Builder::new()
            .name(BRIDGE_THREAD_NAME.to_string())
            .spawn(move || bridge_loop(rx, hooks, worker_stats))
            .map_err(|e| CacheError::PipelineFailed(format!("could not start event bridge: {}", e)))?;

        let handler_tx = Mutex::new(tx.clone());
        let handler_stats = stats.clone();
        let subscription = bus.subscribe(
            EventKinds::CACHE_MUTATIONS,
            Arc::new(move |event: &CacheEvent| {
                handler_stats.received.fetch_add(1, Ordering::SeqCst);
                if handler_tx.lock().send(BridgeMessage::Event(event.clone())).is_err() {
                    log::debug!("Event bridge stopped, dropping {}", event.name());
                }
            }),
        );
        log::debug!("Cache event bridge subscribed ({:?})", subscription);

        Ok(Self {
            bus,
            subscription: Mutex::new(Some(subscription)),
            sender: Mutex::new(Some(tx)),
            worker: Mutex::new(Some(worker)),
            stats,
        })
    }

    pub fn events_received(&self) -> u64 {
        self.stats.received.load(Ordering::SeqCst)
    }

    pub fn rebuilds_triggered(&self) -> u64 {
        self.stats.rebuilds.load(Ordering::SeqCst)
    }

    pub fn failures(&self) -> u64 {
        self.stats.failures.load(Ordering::SeqCst)
    }

    pub fn is_running(&self) -> bool {
        self.worker.lock().is_some()
    }

    /// Unsubscribes and stops the bridge thread. Idempotent.
    pub fn shutdown(&self) {
        if let Some(id) = self.subscription.lock().take() {
            self.bus.unsubscribe(id);
        }
        if let Some(tx) = self.sender.lock().take() {
            let _ = tx.send(BridgeMessage::Shutdown);
        }

        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            if worker.thread().id() == thread::current().id() {
                return;
            }
            if worker.join().is_err() {
                log::error!("Cache event bridge terminated abnormally");
            }
            log::debug!("Cache event bridge stopped");
        }
    }
}

impl Drop for ChangeEventBridge {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn bridge_loop(rx: Receiver<BridgeMessage>, hooks: Arc<dyn CacheUpdateHooks>, stats: Arc<BridgeStats>) {
    while let Ok(message) = rx.recv() {
        let mut latest = match message {
            BridgeMessage::Event(event) => event,
            BridgeMessage::Shutdown => break,
        };

        let mut folded = 0usize;
        let mut stop = false;
        while let Ok(message) = rx.try_recv() {
            match message {
                BridgeMessage::Event(event) => {
                    latest = event;
                    folded += 1;
                }
                BridgeMessage::Shutdown => {
                    stop = true;
                    break;
                }
            }
        }
        if stop {
            break;
        }
        if folded > 0 {
            log::debug!("Folded {} queued event(s) into one cache rebuild", folded);
        }

        log::info!("Cache rebuild requested by {}", latest.name());
        match panic::catch_unwind(AssertUnwindSafe(|| hooks.update_after(&latest))) {
            Ok(Ok(())) => {
                stats.rebuilds.fetch_add(1, Ordering::SeqCst);
            }
            Ok(Err(CacheError::ShuttingDown)) => {
                log::debug!("Cache rebuild after {} skipped during shutdown", latest.name());
            }
            Ok(Err(e)) => {
                stats.failures.fetch_add(1, Ordering::SeqCst);
                log::warn!("Cache rebuild after {} failed: {}", latest.name(), e);
            }
            Err(payload) => {
                stats.failures.fetch_add(1, Ordering::SeqCst);
                log::error!("Cache rebuild after {} panicked: {}", latest.name(), panic_message(payload));
            }
        }
    }
}
