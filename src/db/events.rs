//! Publish/subscribe channel for status notifications.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use tokio::sync::mpsc::{self, error::TryRecvError, UnboundedReceiver, UnboundedSender};

type Subscribers<E> = Mutex<Vec<(u64, UnboundedSender<E>)>>;

struct BusInner<E> {
    subscribers: Subscribers<E>,
    next_id: AtomicU64,
}

/// Fans events out to every live subscriber in publish order.
pub struct EventBus<E> {
    inner: Arc<BusInner<E>>,
}

impl<E> Clone for EventBus<E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<E: Clone + Send + 'static> Default for EventBus<E> {
    fn default() -> Self {
        Self::new()
    }
}

fn lock_subscribers<E>(subscribers: &Subscribers<E>) -> MutexGuard<'_, Vec<(u64, UnboundedSender<E>)>> {
    match subscribers.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            eprintln!("Warning: event subscriber lock was poisoned; recovering.");
            poisoned.into_inner()
        }
    }
}

impl<E: Clone + Send + 'static> EventBus<E> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(BusInner {
                subscribers: Mutex::new(Vec::new()),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    pub fn subscribe(&self) -> Subscription<E> {
        let (sender, receiver) = mpsc::unbounded_channel();
        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        lock_subscribers(&self.inner.subscribers).push((id, sender));
        Subscription {
            id,
            receiver,
            bus: Arc::downgrade(&self.inner),
        }
    }

    pub fn publish(&self, event: E) {
        let mut subscribers = lock_subscribers(&self.inner.subscribers);
        subscribers.retain(|(id, sender)| {
            if sender.send(event.clone()).is_ok() {
                return true;
            }
            eprintln!("Warning: dropping event subscriber {id}; its receiver is gone.");
            false
        });
    }

    pub fn subscriber_count(&self) -> usize {
        lock_subscribers(&self.inner.subscribers).len()
    }
}

/// Receiving end of a subscription. Dropping it, or calling
/// [`Subscription::unsubscribe`], stops delivery.
pub struct Subscription<E> {
    id: u64,
    receiver: UnboundedReceiver<E>,
    bus: Weak<BusInner<E>>,
}

impl<E> Subscription<E> {
    pub async fn recv(&mut self) -> Option<E> {
        self.receiver.recv().await
    }

    /// Next event if one is already queued.
    pub fn try_recv(&mut self) -> Option<E> {
        match self.receiver.try_recv() {
            Ok(event) => Some(event),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }

    /// Everything queued so far.
    pub fn drain(&mut self) -> Vec<E> {
        std::iter::from_fn(|| self.try_recv()).collect()
    }

    pub fn unsubscribe(self) {}
}

impl<E> Drop for Subscription<E> {
    fn drop(&mut self) {
        if let Some(bus) = self.bus.upgrade() {
            lock_subscribers(&bus.subscribers).retain(|(id, _)| *id != self.id);
        }
    }
}
