//! Notification fabric (spec.md §4.7): consistent and eventually-consistent
//! append listeners, bookmark listeners, coalescing, and the per-storage
//! dispatcher.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, RwLock};
use std::thread;

use dcb_core::{EventReference, EventStreamId};

use crate::storage::StoredEvent;

const LOG_TARGET: &str = "dcb::notify";

/// Carries the events just written, delivered synchronously within the
/// append call to listeners registered on the *same* facade only.
pub struct AppendBatch<'a> {
    pub stream: &'a EventStreamId,
    pub events: &'a [StoredEvent],
}

/// Invoked synchronously within `Storage::append`. Exceptions propagate and
/// fail the caller — the events are already committed, that is the design
/// contract (spec.md §4.7).
pub trait ConsistentListener: Send + Sync {
    fn appended(&self, batch: AppendBatch<'_>) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
}

/// Carries only the last `EventReference` of a write batch on a given
/// stream; delivered asynchronously to any listener whose `EventStreamId`
/// can read the writing stream.
#[derive(Debug, Clone)]
pub struct AppendNotification {
    pub stream: EventStreamId,
    pub last_ref: EventReference,
}

/// Invoked asynchronously by the dispatcher. The listener returns the
/// `EventReference` it has now actually processed, which the fabric uses as
/// the coalescing high-water mark — later notifications whose `last_ref` is
/// no newer than the reported one are skipped (spec.md §4.7).
pub trait EventualListener: Send + Sync {
    fn appended(
        &self,
        notification: &AppendNotification,
    ) -> Result<EventReference, Box<dyn std::error::Error + Send + Sync>>;
}

/// Fires once per bookmark put/update, coalesced per reader.
#[derive(Debug, Clone)]
pub struct BookmarkNotification {
    pub reader: String,
    pub reference: EventReference,
}

pub trait BookmarkListener: Send + Sync {
    fn bookmark_updated(&self, notification: &BookmarkNotification);
}

struct RegisteredConsistent {
    id: u64,
    stream_id: EventStreamId,
    listener: Arc<dyn ConsistentListener>,
}

struct RegisteredEventual {
    id: u64,
    stream_id: EventStreamId,
    listener: Arc<dyn EventualListener>,
    high_water: Mutex<Option<EventReference>>,
}

struct RegisteredBookmark {
    id: u64,
    listener: Arc<dyn BookmarkListener>,
}

#[derive(Default)]
struct Queues {
    append: HashMap<EventStreamId, AppendNotification>,
    bookmark: HashMap<String, BookmarkNotification>,
}

/// A single-threaded cooperative dispatcher processing queued
/// eventually-consistent notifications (spec.md §4.7, §5). Ordering within
/// one stream is preserved because exactly one worker thread drains the
/// queue. Coalescing: while the worker is busy, a second notification for
/// the same stream (or reader) replaces the first rather than queuing
/// alongside it — only the last is ever delivered.
pub struct Dispatcher {
    inner: Arc<Inner>,
    worker: Mutex<Option<thread::JoinHandle<()>>>,
}

struct Inner {
    queues: Mutex<Queues>,
    cv: Condvar,
    stopped: AtomicBool,
    next_id: AtomicU64,
    consistent: RwLock<Vec<RegisteredConsistent>>,
    eventual: RwLock<Vec<RegisteredEventual>>,
    bookmark: RwLock<Vec<RegisteredBookmark>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        let inner = Arc::new(Inner {
            queues: Mutex::new(Queues::default()),
            cv: Condvar::new(),
            stopped: AtomicBool::new(false),
            next_id: AtomicU64::new(1),
            consistent: RwLock::new(Vec::new()),
            eventual: RwLock::new(Vec::new()),
            bookmark: RwLock::new(Vec::new()),
        });
        let worker_inner = inner.clone();
        let worker = thread::Builder::new()
            .name("dcb-notify-dispatcher".into())
            .spawn(move || worker_loop(worker_inner))
            .expect("failed to spawn notification dispatcher thread");
        Self { inner, worker: Mutex::new(Some(worker)) }
    }

    pub fn subscribe_consistent(&self, stream_id: EventStreamId, listener: Arc<dyn ConsistentListener>) -> u64 {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner.consistent.write().unwrap().push(RegisteredConsistent { id, stream_id, listener });
        id
    }

    pub fn subscribe_eventual(&self, stream_id: EventStreamId, listener: Arc<dyn EventualListener>) -> u64 {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner.eventual.write().unwrap().push(RegisteredEventual {
            id,
            stream_id,
            listener,
            high_water: Mutex::new(None),
        });
        id
    }

    pub fn subscribe_bookmark(&self, listener: Arc<dyn BookmarkListener>) -> u64 {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner.bookmark.write().unwrap().push(RegisteredBookmark { id, listener });
        id
    }

    pub fn unsubscribe(&self, id: u64) {
        self.inner.consistent.write().unwrap().retain(|r| r.id != id);
        self.inner.eventual.write().unwrap().retain(|r| r.id != id);
        self.inner.bookmark.write().unwrap().retain(|r| r.id != id);
    }

    /// Invoke all consistent listeners registered on exactly `stream` with
    /// the just-written batch. Called inline by the backend within
    /// `append`; errors propagate to the caller.
    pub fn notify_consistent(
        &self,
        stream: &EventStreamId,
        events: &[StoredEvent],
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        for registered in self.inner.consistent.read().unwrap().iter() {
            if &registered.stream_id == stream {
                registered.listener.appended(AppendBatch { stream, events })?;
            }
        }
        Ok(())
    }

    /// Enqueue an eventually-consistent append notification. Coalesces with
    /// any not-yet-dispatched notification for the same stream.
    pub fn notify_append(&self, notification: AppendNotification) {
        if self.inner.stopped.load(Ordering::SeqCst) {
            return;
        }
        let mut queues = self.inner.queues.lock().unwrap();
        queues.append.insert(notification.stream.clone(), notification);
        self.inner.cv.notify_one();
    }

    /// Enqueue a bookmark-update notification. Coalesces per reader.
    pub fn notify_bookmark(&self, notification: BookmarkNotification) {
        if self.inner.stopped.load(Ordering::SeqCst) {
            return;
        }
        let mut queues = self.inner.queues.lock().unwrap();
        queues.bookmark.insert(notification.reader.clone(), notification);
        self.inner.cv.notify_one();
    }

    /// Signals the worker to exit after draining whatever is already queued,
    /// then joins it. Listeners registered afterward receive nothing further.
    pub fn stop(&self) {
        self.inner.stopped.store(true, Ordering::SeqCst);
        self.inner.cv.notify_all();
        if let Some(handle) = self.worker.lock().unwrap().take() {
            let _ = handle.join();
        }
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        self.inner.stopped.store(true, Ordering::SeqCst);
        self.inner.cv.notify_all();
    }
}

fn worker_loop(inner: Arc<Inner>) {
    loop {
        let (append_batch, bookmark_batch) = {
            let mut queues = inner.queues.lock().unwrap();
            while queues.append.is_empty() && queues.bookmark.is_empty() {
                if inner.stopped.load(Ordering::SeqCst) {
                    return;
                }
                queues = inner.cv.wait(queues).unwrap();
            }
            (std::mem::take(&mut queues.append), std::mem::take(&mut queues.bookmark))
        };

        for notification in append_batch.into_values() {
            dispatch_append(&inner, &notification);
        }
        for notification in bookmark_batch.into_values() {
            dispatch_bookmark(&inner, &notification);
        }

        if inner.stopped.load(Ordering::SeqCst) {
            let queues = inner.queues.lock().unwrap();
            if queues.append.is_empty() && queues.bookmark.is_empty() {
                return;
            }
        }
    }
}

fn dispatch_append(inner: &Inner, notification: &AppendNotification) {
    for registered in inner.eventual.read().unwrap().iter() {
        if !registered.stream_id.can_read(&notification.stream) {
            continue;
        }
        {
            let high_water = registered.high_water.lock().unwrap();
            if let Some(seen) = high_water.as_ref() {
                if !seen.happened_before(&notification.last_ref) {
                    continue;
                }
            }
        }
        match registered.listener.appended(notification) {
            Ok(processed) => {
                *registered.high_water.lock().unwrap() = Some(processed);
            }
            Err(error) => {
                tracing::error!(target: LOG_TARGET, %error, "eventually-consistent listener failed");
            }
        }
    }
}

fn dispatch_bookmark(inner: &Inner, notification: &BookmarkNotification) {
    for registered in inner.bookmark.read().unwrap().iter() {
        registered.listener.bookmark_updated(notification);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dcb_core::EventId;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    struct CountingEventual {
        calls: AtomicUsize,
    }

    impl EventualListener for CountingEventual {
        fn appended(
            &self,
            notification: &AppendNotification,
        ) -> Result<EventReference, Box<dyn std::error::Error + Send + Sync>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(notification.last_ref.clone())
        }
    }

    fn wait_until(mut check: impl FnMut() -> bool) {
        for _ in 0..200 {
            if check() {
                return;
            }
            thread::sleep(Duration::from_millis(5));
        }
        panic!("condition never became true");
    }

    #[test]
    fn eventual_listener_receives_readable_stream_notifications() {
        let dispatcher = Dispatcher::new();
        let listener = Arc::new(CountingEventual { calls: AtomicUsize::new(0) });
        dispatcher.subscribe_eventual(EventStreamId::wildcard(), listener.clone());

        dispatcher.notify_append(AppendNotification {
            stream: EventStreamId::concrete("app", "domain"),
            last_ref: EventReference::new(EventId::new(), 1, 1),
        });

        wait_until(|| listener.calls.load(Ordering::SeqCst) == 1);
        dispatcher.stop();
    }

    #[test]
    fn consistent_listener_invoked_inline_for_matching_stream_only() {
        let dispatcher = Dispatcher::new();
        struct Recording {
            calls: AtomicUsize,
        }
        impl ConsistentListener for Recording {
            fn appended(&self, _batch: AppendBatch<'_>) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
                self.calls.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        }
        let listener = Arc::new(Recording { calls: AtomicUsize::new(0) });
        let target = EventStreamId::concrete("app", "domain");
        dispatcher.subscribe_consistent(target.clone(), listener.clone());

        dispatcher.notify_consistent(&target, &[]).unwrap();
        assert_eq!(listener.calls.load(Ordering::SeqCst), 1);

        dispatcher.notify_consistent(&EventStreamId::concrete("app", "other"), &[]).unwrap();
        assert_eq!(listener.calls.load(Ordering::SeqCst), 1);
        dispatcher.stop();
    }
}
