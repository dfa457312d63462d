use fnv::FnvHashMap;
use futures::stream::{FusedStream, Stream};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};

/// A multicast bus delivering every published item, in publish order, to
/// every subscriber.
///
/// Each subscriber owns a FIFO queue, so a slow consumer never loses or
/// reorders items; a subscription can be seeded with a replay item that is
/// delivered before anything published later. Dropping a [`Receiver`]
/// cancels its subscription; dropping the bus ends all receivers once their
/// queues drain.
pub(crate) struct Bus<T> {
    inner: Arc<Mutex<BusInner<T>>>,
}

impl<T> Default for Bus<T> {
    fn default() -> Self {
        Self {
            inner: Arc::new(Mutex::new(BusInner {
                next_id: 0,
                subscribers: Default::default(),
                closed: false,
            })),
        }
    }
}

impl<T: Clone> Bus<T> {
    /// Publishes an item to all current subscribers.
    pub fn publish(&self, item: T) {
        let mut inner = self.inner.lock();
        for slot in inner.subscribers.values_mut() {
            slot.queue.push_back(item.clone());
            if let Some(waker) = slot.waker.take() {
                waker.wake();
            }
        }
    }
}

impl<T> Bus<T> {
    /// Creates a new subscription, optionally seeded with a replay item.
    pub fn subscribe(&self, seed: Option<T>) -> Receiver<T> {
        let mut inner = self.inner.lock();
        let id = inner.next_id;
        inner.next_id += 1;
        let mut queue = VecDeque::new();
        queue.extend(seed);
        inner.subscribers.insert(id, Slot { queue, waker: None });
        Receiver {
            id,
            inner: self.inner.clone(),
        }
    }

    /// Number of current subscribers.
    #[cfg(test)]
    pub fn subscriber_count(&self) -> usize {
        self.inner.lock().subscribers.len()
    }
}

impl<T> Drop for Bus<T> {
    fn drop(&mut self) {
        let mut inner = self.inner.lock();
        inner.closed = true;
        for slot in inner.subscribers.values_mut() {
            if let Some(waker) = slot.waker.take() {
                waker.wake();
            }
        }
    }
}

struct BusInner<T> {
    next_id: usize,
    subscribers: FnvHashMap<usize, Slot<T>>,
    closed: bool,
}

struct Slot<T> {
    queue: VecDeque<T>,
    waker: Option<Waker>,
}

/// A subscription to a [`Bus`]. Dropping it cancels the subscription.
pub(crate) struct Receiver<T> {
    id: usize,
    inner: Arc<Mutex<BusInner<T>>>,
}

impl<T> Stream for Receiver<T> {
    type Item = T;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let mut inner = self.inner.lock();
        let closed = inner.closed;
        match inner.subscribers.get_mut(&self.id) {
            Some(slot) => match slot.queue.pop_front() {
                Some(item) => Poll::Ready(Some(item)),
                None if closed => Poll::Ready(None),
                None => {
                    slot.waker = Some(cx.waker().clone());
                    Poll::Pending
                }
            },
            None => Poll::Ready(None),
        }
    }
}

impl<T> FusedStream for Receiver<T> {
    fn is_terminated(&self) -> bool {
        let inner = self.inner.lock();
        match inner.subscribers.get(&self.id) {
            Some(slot) => inner.closed && slot.queue.is_empty(),
            None => true,
        }
    }
}

/// we are just an arc, so we can be moved around
impl<T> Unpin for Receiver<T> {}

impl<T> Drop for Receiver<T> {
    fn drop(&mut self) {
        self.inner.lock().subscribers.remove(&self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::prelude::*;

    fn next<T>(rx: &mut Receiver<T>) -> Option<Option<T>> {
        rx.next().now_or_never()
    }

    #[test]
    fn delivers_in_order() {
        let bus = Bus::default();
        let mut rx = bus.subscribe(None);
        bus.publish(1);
        bus.publish(2);
        bus.publish(3);
        assert_eq!(next(&mut rx), Some(Some(1)));
        assert_eq!(next(&mut rx), Some(Some(2)));
        assert_eq!(next(&mut rx), Some(Some(3)));
        assert_eq!(next(&mut rx), None);
    }

    #[test]
    fn seed_replays_before_later_items() {
        let bus = Bus::default();
        let mut rx = bus.subscribe(Some(0));
        bus.publish(1);
        assert_eq!(next(&mut rx), Some(Some(0)));
        assert_eq!(next(&mut rx), Some(Some(1)));
    }

    #[test]
    fn drop_cancels() {
        let bus = Bus::default();
        let rx = bus.subscribe(None);
        let mut rx2 = bus.subscribe(None);
        assert_eq!(bus.subscriber_count(), 2);
        drop(rx);
        assert_eq!(bus.subscriber_count(), 1);
        bus.publish(7);
        assert_eq!(next(&mut rx2), Some(Some(7)));
    }

    #[test]
    fn close_drains_then_ends() {
        let bus = Bus::default();
        let mut rx = bus.subscribe(None);
        bus.publish(1);
        drop(bus);
        assert_eq!(next(&mut rx), Some(Some(1)));
        assert_eq!(next(&mut rx), Some(None));
        assert!(rx.is_terminated());
    }
}
