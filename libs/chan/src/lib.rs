//! Thread-safe bounded/unbounded FIFO channels.
//!
//! A [`Chan<T>`] is the synchronization primitive every other layer in this
//! workspace is built on: the task engine does not use it, but the process
//! layer's mailbox is a `Chan<MailboxEntry>` with a fixed capacity, and
//! application code can create its own channels for request/response
//! patterns between processes.
//!
//! The implementation is the textbook monitor pattern: one [`Mutex`] guarding
//! an intrusive FIFO (built on the `linked-list` crate) plus a pair of
//! [`Condvar`]s, `not_empty` and `not_full`. Items are boxed into an
//! intrusive node on send and unboxed back into an owned `T` on recv; a
//! dropped, un-received item runs `T`'s own `Drop` impl, which is the natural
//! Rust expression of an explicit item-destructor callback.

use deadline::Deadline;
use linked_list::{Linked, List, Links};
use std::mem::offset_of;
use std::pin::Pin;
use std::ptr::NonNull;
use std::sync::{Condvar, Mutex};
use thiserror::Error;

struct Node<T> {
    links: Links<Node<T>>,
    item: T,
}

impl<T> Node<T> {
    fn new(item: T) -> Pin<Box<Self>> {
        Box::pin(Self {
            links: Links::new(),
            item,
        })
    }
}

// Safety: `links` is only ever accessed through the owning `List`, which is
// itself guarded by `Chan`'s mutex.
unsafe impl<T> Linked for Node<T> {
    type Handle = Pin<Box<Self>>;

    fn into_ptr(handle: Self::Handle) -> NonNull<Self> {
        // Safety: the pinned box is immediately converted back into a pinned
        // box in `from_ptr`, so the pinning invariant is upheld.
        unsafe { NonNull::from(Box::leak(Pin::into_inner_unchecked(handle))) }
    }

    unsafe fn from_ptr(ptr: NonNull<Self>) -> Self::Handle {
        // Safety: caller must pass a pointer obtained from `into_ptr`.
        unsafe { Pin::new_unchecked(Box::from_raw(ptr.as_ptr())) }
    }

    unsafe fn links(ptr: NonNull<Self>) -> NonNull<Links<Self>> {
        ptr.map_addr(|addr| {
            let offset = offset_of!(Self, links);
            addr.checked_add(offset).unwrap()
        })
        .cast()
    }
}

struct Inner<T> {
    items: List<Node<T>>,
    closed: bool,
}

/// A bounded (`capacity > 0`) or unbounded (`capacity == 0`) FIFO channel.
pub struct Chan<T> {
    inner: Mutex<Inner<T>>,
    not_empty: Condvar,
    not_full: Condvar,
    capacity: usize,
}

/// The channel has been closed; the item the caller tried to send is handed
/// back so it is not silently dropped.
#[derive(Debug, Error)]
#[error("channel is closed")]
pub struct Closed<T>(pub T);

/// Outcome of a deadline-bounded send.
pub enum SendOutcome<T> {
    /// The item was enqueued.
    Sent,
    /// The channel was already closed; the item was not enqueued.
    Closed(T),
    /// The deadline elapsed before space became available.
    TimedOut(T),
}

/// Outcome of a non-blocking send attempt.
pub enum TrySendOutcome<T> {
    /// The item was enqueued.
    Sent,
    /// The channel is full; the item was not enqueued.
    WouldBlock(T),
    /// The channel was already closed; the item was not enqueued.
    Closed(T),
}

/// Outcome of a deadline-bounded receive.
pub enum RecvOutcome<T> {
    /// An item was dequeued.
    Item(T),
    /// The channel was closed and drained.
    Closed,
    /// The deadline elapsed before an item became available.
    TimedOut,
}

/// Outcome of a forced, drop-oldest send.
pub enum ForceSendOutcome<T> {
    /// The item was enqueued without evicting anything.
    Sent,
    /// The channel was full; the oldest item was evicted to make room.
    SentEvicting(T),
    /// The channel was already closed; the item was not enqueued.
    Closed(T),
}

/// Outcome of a non-blocking receive attempt.
pub enum TryRecvOutcome<T> {
    /// An item was dequeued.
    Item(T),
    /// The channel is empty but still open.
    Empty,
    /// The channel was closed and drained.
    Closed,
}

impl<T> Chan<T> {
    /// Creates a new channel. `capacity == 0` means unbounded.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Chan {
            inner: Mutex::new(Inner {
                items: List::new(),
                closed: false,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            capacity,
        }
    }

    /// Whether this channel is unbounded.
    #[must_use]
    pub fn is_unbounded(&self) -> bool {
        self.capacity == 0
    }

    /// Number of items currently queued.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().items.len()
    }

    /// Whether the channel currently holds no items.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether `close` has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.lock().unwrap().closed
    }

    /// Closes the channel. Idempotent. Wakes every waiter; senders observe
    /// `Closed`, receivers drain remaining items then observe `Closed`.
    pub fn close(&self) {
        let mut inner = self.inner.lock().unwrap();
        if inner.closed {
            return;
        }
        inner.closed = true;
        drop(inner);
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }

    /// Blocking send; waits until there is space or the channel closes.
    pub fn send(&self, item: T) -> Result<(), Closed<T>> {
        match self.send_deadline(item, Deadline::NONE) {
            SendOutcome::Sent => Ok(()),
            SendOutcome::Closed(item) => Err(Closed(item)),
            SendOutcome::TimedOut(_) => unreachable!("Deadline::NONE never expires"),
        }
    }

    /// Blocking send with a deadline.
    pub fn send_deadline(&self, item: T, deadline: Deadline) -> SendOutcome<T> {
        let mut inner = self.inner.lock().unwrap();
        loop {
            if inner.closed {
                return SendOutcome::Closed(item);
            }
            if self.capacity == 0 || inner.items.len() < self.capacity {
                break;
            }
            if deadline.expired() {
                return SendOutcome::TimedOut(item);
            }
            let remaining_ms = deadline.remaining_ms();
            if deadline.is_none() || remaining_ms == i64::MAX {
                inner = self.not_full.wait(inner).unwrap();
            } else {
                let wait = std::time::Duration::from_millis(
                    u64::try_from(remaining_ms.max(1)).unwrap_or(u64::MAX),
                );
                let (guard, _timeout) = self.not_full.wait_timeout(inner, wait).unwrap();
                inner = guard;
            }
        }
        inner.items.push_back(Node::new(item));
        drop(inner);
        self.not_empty.notify_one();
        SendOutcome::Sent
    }

    /// Non-blocking send attempt.
    pub fn try_send(&self, item: T) -> TrySendOutcome<T> {
        let mut inner = self.inner.lock().unwrap();
        if inner.closed {
            return TrySendOutcome::Closed(item);
        }
        if self.capacity != 0 && inner.items.len() >= self.capacity {
            return TrySendOutcome::WouldBlock(item);
        }
        inner.items.push_back(Node::new(item));
        drop(inner);
        self.not_empty.notify_one();
        TrySendOutcome::Sent
    }

    /// Blocking receive; waits until an item arrives or the channel closes.
    pub fn recv(&self) -> Result<T, Closed<()>> {
        match self.recv_deadline(Deadline::NONE) {
            RecvOutcome::Item(item) => Ok(item),
            RecvOutcome::Closed => Err(Closed(())),
            RecvOutcome::TimedOut => unreachable!("Deadline::NONE never expires"),
        }
    }

    /// Blocking receive with a deadline.
    pub fn recv_deadline(&self, deadline: Deadline) -> RecvOutcome<T> {
        let mut inner = self.inner.lock().unwrap();
        loop {
            if let Some(node) = inner.items.pop_front() {
                if self.capacity != 0 {
                    drop(inner);
                    self.not_full.notify_one();
                }
                let node = Pin::into_inner(node);
                return RecvOutcome::Item(node.item);
            }
            if inner.closed {
                return RecvOutcome::Closed;
            }
            if deadline.expired() {
                return RecvOutcome::TimedOut;
            }
            let remaining_ms = deadline.remaining_ms();
            if deadline.is_none() || remaining_ms == i64::MAX {
                inner = self.not_empty.wait(inner).unwrap();
            } else {
                let wait = std::time::Duration::from_millis(
                    u64::try_from(remaining_ms.max(1)).unwrap_or(u64::MAX),
                );
                let (guard, _timeout) = self.not_empty.wait_timeout(inner, wait).unwrap();
                inner = guard;
            }
        }
    }

    /// Sends unconditionally, discarding the oldest queued item first if the
    /// channel is already at capacity. Used by mailboxes that would rather
    /// bound their memory footprint than block a sender or reject the
    /// message; unbounded channels (`capacity == 0`) never evict.
    pub fn send_force(&self, item: T) -> ForceSendOutcome<T> {
        let mut inner = self.inner.lock().unwrap();
        if inner.closed {
            return ForceSendOutcome::Closed(item);
        }
        let evicted = if self.capacity != 0 && inner.items.len() >= self.capacity {
            inner.items.pop_front().map(|node| Pin::into_inner(node).item)
        } else {
            None
        };
        inner.items.push_back(Node::new(item));
        drop(inner);
        self.not_empty.notify_one();
        match evicted {
            Some(evicted) => ForceSendOutcome::SentEvicting(evicted),
            None => ForceSendOutcome::Sent,
        }
    }

    /// Non-blocking receive attempt.
    pub fn try_recv(&self) -> TryRecvOutcome<T> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(node) = inner.items.pop_front() {
            let had_capacity = self.capacity != 0;
            drop(inner);
            if had_capacity {
                self.not_full.notify_one();
            }
            let node = Pin::into_inner(node);
            return TryRecvOutcome::Item(node.item);
        }
        if inner.closed {
            TryRecvOutcome::Closed
        } else {
            TryRecvOutcome::Empty
        }
    }
}

// Safety: all access to the intrusive list goes through `inner`'s mutex.
unsafe impl<T: Send> Send for Chan<T> {}
// Safety: all access to the intrusive list goes through `inner`'s mutex.
unsafe impl<T: Send> Sync for Chan<T> {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn fifo_order_preserved() {
        let ch = Chan::new(0);
        ch.send(1).unwrap();
        ch.send(2).unwrap();
        ch.send(3).unwrap();
        assert_eq!(ch.recv().unwrap(), 1);
        assert_eq!(ch.recv().unwrap(), 2);
        assert_eq!(ch.recv().unwrap(), 3);
    }

    #[test]
    fn close_drains_then_reports_closed() {
        let ch: Chan<i32> = Chan::new(0);
        ch.send(1).unwrap();
        ch.close();
        assert_eq!(ch.recv().unwrap(), 1);
        assert!(matches!(ch.recv(), Err(Closed(()))));
        assert!(matches!(ch.send(2), Err(Closed(2))));
    }

    #[test]
    fn try_send_reports_would_block_when_full() {
        let ch = Chan::new(1);
        assert!(matches!(ch.try_send(1), TrySendOutcome::Sent));
        match ch.try_send(2) {
            TrySendOutcome::WouldBlock(item) => assert_eq!(item, 2),
            _ => panic!("expected WouldBlock"),
        }
    }

    #[test]
    fn send_deadline_times_out_on_full_bounded_channel() {
        let ch = Chan::new(1);
        ch.send(1).unwrap();
        let started = std::time::Instant::now();
        match ch.send_deadline(2, Deadline::from_ms(50)) {
            SendOutcome::TimedOut(item) => assert_eq!(item, 2),
            _ => panic!("expected TimedOut"),
        }
        assert!(started.elapsed() >= Duration::from_millis(45));
        assert_eq!(ch.len(), 1);
    }

    #[test]
    fn send_force_evicts_oldest_when_full() {
        let ch = Chan::new(2);
        assert!(matches!(ch.send_force(1), ForceSendOutcome::Sent));
        assert!(matches!(ch.send_force(2), ForceSendOutcome::Sent));
        match ch.send_force(3) {
            ForceSendOutcome::SentEvicting(evicted) => assert_eq!(evicted, 1),
            _ => panic!("expected SentEvicting"),
        }
        assert_eq!(ch.recv().unwrap(), 2);
        assert_eq!(ch.recv().unwrap(), 3);
    }

    #[test]
    fn drop_without_receive_drops_items() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        struct Counted(Arc<AtomicUsize>);
        impl Drop for Counted {
            fn drop(&mut self) {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }
        let count = Arc::new(AtomicUsize::new(0));
        let ch = Chan::new(0);
        ch.send(Counted(count.clone())).unwrap();
        ch.send(Counted(count.clone())).unwrap();
        drop(ch);
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn concurrent_producer_consumer() {
        let ch = Arc::new(Chan::new(4));
        let producer = {
            let ch = ch.clone();
            thread::spawn(move || {
                for i in 0..1000 {
                    ch.send(i).unwrap();
                }
                ch.close();
            })
        };
        let mut received = Vec::new();
        loop {
            match ch.recv_deadline(Deadline::from_ms(1000)) {
                RecvOutcome::Item(item) => received.push(item),
                RecvOutcome::Closed => break,
                RecvOutcome::TimedOut => panic!("timed out waiting for producer"),
            }
        }
        producer.join().unwrap();
        assert_eq!(received, (0..1000).collect::<Vec<_>>());
    }
}
