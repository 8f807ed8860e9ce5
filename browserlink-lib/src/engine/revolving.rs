use std::collections::VecDeque;
use std::future::Future;
use std::ops::Deref;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::sync::oneshot;

/// FIFO byte queue between one producer and one consumer with buffer reuse.
///
/// The producer appends with [`write`](Self::write). The consumer takes whole
/// buffers out with [`read`](Self::read) or [`read_async`](Self::read_async);
/// each returned [`Segment`] owns its backing buffer until dropped, at which
/// point the buffer goes back to the free list for the producer to refill.
/// New buffers start at the default size and double until the write fits.
///
/// All state lives behind one lock. Completion handles are always taken out
/// of the state before they are fired, so a continuation that re-arms a new
/// waiter can never be resolved by the old completion.
pub struct RevolvingBuffers {
    inner: Arc<Mutex<Inner>>,
}

struct Inner {
    default_size: usize,
    /// Filled buffers waiting for the reader, oldest first.
    ready: VecDeque<Vec<u8>>,
    /// Buffer currently being filled; may be empty with no capacity.
    input: Vec<u8>,
    free: Vec<Vec<u8>>,
    /// A segment has been handed out and no empty read has happened since.
    checked_out: bool,
    reader: Option<oneshot::Sender<Option<Segment>>>,
    empty_waiter: Option<oneshot::Sender<()>>,
    disposed: bool,
    this: Weak<Mutex<Inner>>,
}

/// Data handed to the reader. Dereferences to the bytes written.
pub struct Segment {
    data: Option<Vec<u8>>,
    pool: Weak<Mutex<Inner>>,
}

enum PendingRead {
    Ready(Option<Segment>),
    Waiting(oneshot::Receiver<Option<Segment>>),
}

impl RevolvingBuffers {
    pub fn new(default_size: usize) -> Self {
        let inner = Arc::new_cyclic(|this| {
            Mutex::new(Inner {
                default_size: default_size.max(1),
                ready: VecDeque::new(),
                input: Vec::new(),
                free: Vec::new(),
                checked_out: false,
                reader: None,
                empty_waiter: None,
                disposed: false,
                this: this.clone(),
            })
        });
        Self { inner }
    }

    /// Append `data`. A waiting async reader is handed the next buffer.
    /// Empty writes and writes after disposal are ignored.
    pub fn write(&self, data: &[u8]) {
        if data.is_empty() {
            return;
        }

        let mut inner = self.inner.lock();
        if inner.disposed {
            return;
        }

        inner.ensure_room(data.len());
        inner.input.extend_from_slice(data);

        if let Some(reader) = inner.reader.take() {
            let segment = inner.next_segment();
            inner.hand_to_reader(reader, segment);
        }
    }

    /// Take the next buffer of data, or `None` if nothing is buffered.
    /// A `None` result also releases anyone waiting in [`wait_until_empty`](Self::wait_until_empty).
    pub fn read(&self) -> Option<Segment> {
        let mut inner = self.inner.lock();
        let segment = inner.next_segment();
        if segment.is_none() {
            inner.signal_empty();
        }
        segment
    }

    /// Resolve with the next buffer of data as soon as one is written.
    ///
    /// Resolves to `None` once the queue is disposed, which is the
    /// end-of-stream signal. Only one read may be pending at a time; a new
    /// call replaces the previous waiter, which then resolves to `None`.
    pub fn read_async(&self) -> impl Future<Output = Option<Segment>> + Send + 'static {
        let pending = {
            let mut inner = self.inner.lock();
            if inner.disposed {
                PendingRead::Ready(None)
            } else {
                match inner.next_segment() {
                    Some(segment) => PendingRead::Ready(Some(segment)),
                    None => {
                        // Arm the reader before releasing empty waiters: one of them
                        // may dispose the queue and must find this read pending.
                        let (tx, rx) = oneshot::channel();
                        inner.reader = Some(tx);
                        inner.signal_empty();
                        PendingRead::Waiting(rx)
                    }
                }
            }
        };

        async move {
            match pending {
                PendingRead::Ready(segment) => segment,
                PendingRead::Waiting(rx) => rx.await.ok().flatten(),
            }
        }
    }

    /// Resolve once everything written has been taken by the reader and the
    /// reader has come back for more.
    pub fn wait_until_empty(&self) -> impl Future<Output = ()> + Send + 'static {
        let rx = {
            let mut inner = self.inner.lock();
            if inner.disposed || inner.is_drained() {
                None
            } else {
                let (tx, rx) = oneshot::channel();
                inner.empty_waiter = Some(tx);
                Some(rx)
            }
        };

        async move {
            if let Some(rx) = rx {
                let _ = rx.await;
            }
        }
    }

    /// Drop all buffered data and resolve a pending async read with `None`.
    pub fn dispose(&self) {
        let (reader, waiter) = {
            let mut inner = self.inner.lock();
            if inner.disposed {
                return;
            }
            inner.disposed = true;
            inner.ready.clear();
            inner.free.clear();
            inner.input = Vec::new();
            inner.checked_out = false;
            (inner.reader.take(), inner.empty_waiter.take())
        };

        if let Some(reader) = reader {
            let _ = reader.send(None);
        }
        if let Some(waiter) = waiter {
            let _ = waiter.send(());
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.lock().disposed
    }
}

impl Drop for RevolvingBuffers {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl Inner {
    fn ensure_room(&mut self, count: usize) {
        if self.input.capacity() - self.input.len() >= count {
            return;
        }

        let filled = std::mem::take(&mut self.input);
        if !filled.is_empty() {
            self.ready.push_back(filled);
        } else if filled.capacity() > 0 {
            self.free.push(filled);
        }

        self.input = self.take_free(count);
    }

    fn take_free(&mut self, count: usize) -> Vec<u8> {
        if let Some(idx) = self.free.iter().position(|b| b.capacity() >= count) {
            return self.free.swap_remove(idx);
        }

        let mut size = self.default_size;
        while size < count {
            size *= 2;
        }
        Vec::with_capacity(size)
    }

    fn next_segment(&mut self) -> Option<Segment> {
        let data = match self.ready.pop_front() {
            Some(buf) => buf,
            None if !self.input.is_empty() => std::mem::take(&mut self.input),
            None => {
                self.checked_out = false;
                return None;
            }
        };

        self.checked_out = true;
        Some(Segment {
            data: Some(data),
            pool: self.this.clone(),
        })
    }

    fn hand_to_reader(&mut self, reader: oneshot::Sender<Option<Segment>>, segment: Option<Segment>) {
        if let Err(Some(mut returned)) = reader.send(segment) {
            // Reader went away. Put the data back without re-entering the lock.
            if let Some(buf) = returned.data.take() {
                self.ready.push_front(buf);
            }
            self.checked_out = false;
        }
    }

    fn signal_empty(&mut self) {
        if let Some(waiter) = self.empty_waiter.take() {
            let _ = waiter.send(());
        }
    }

    fn is_drained(&self) -> bool {
        !self.checked_out && self.ready.is_empty() && self.input.is_empty()
    }

    fn recycle(&mut self, mut buf: Vec<u8>) {
        if self.disposed {
            return;
        }
        buf.clear();
        self.free.push(buf);
    }
}

impl Segment {
    pub fn as_slice(&self) -> &[u8] {
        self.data.as_deref().unwrap_or(&[])
    }
}

impl Deref for Segment {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.as_slice()
    }
}

impl std::fmt::Debug for Segment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Segment").field("len", &self.len()).finish()
    }
}

impl Drop for Segment {
    fn drop(&mut self) {
        if let Some(buf) = self.data.take() {
            if let Some(pool) = self.pool.upgrade() {
                pool.lock().recycle(buf);
            }
        }
    }
}
