//! Photo Manager
//!
//! Coordinator for the loading pipeline: two bounded worker pools
//! (fetch and decode), the byte cache, the task free pool, and the
//! dispatch thread that turns worker-side state reports into
//! consumer-side callbacks.
//!
//! One manager per process by contract. It is constructed explicitly
//! and passed by reference to callers; there is no hidden global and no
//! teardown requirement beyond process exit (dropping it joins all of
//! its threads, which the test suites rely on).

use std::sync::mpsc;
use std::sync::{Arc, Weak};
use std::thread::JoinHandle;
use std::time::Duration;

use lumen_net::{HttpTransport, NetError, Transport};
use parking_lot::Mutex;

use crate::cache::{PhotoCache, DEFAULT_CACHE_CAPACITY};
use crate::consumer::PhotoConsumer;
use crate::decode::{self, ImageCodec, ImageCrateCodec};
use crate::fetch;
use crate::key::PhotoKey;
use crate::pool::TaskPool;
use crate::task::PhotoTask;
use crate::worker::WorkerPool;
use crate::PhotoState;

/// Pipeline configuration
#[derive(Debug, Clone)]
pub struct PhotoConfig {
    /// Fetch pool thread count. Fetches are I/O-bound and benefit from
    /// more parallelism than cores.
    pub fetch_threads: usize,
    /// Decode pool thread count. Decodes are CPU-bound and should not
    /// oversubscribe cores.
    pub decode_threads: usize,
    /// Byte cache capacity.
    pub cache_capacity: usize,
    /// Total decode attempts per task before reporting failure.
    pub decode_attempts: u32,
    /// Backoff between decode attempts.
    pub decode_backoff: Duration,
    /// Chunk size for reads without a declared content length.
    pub read_chunk_size: usize,
    /// Worker idle wakeup interval.
    pub keep_alive: Duration,
}

impl Default for PhotoConfig {
    fn default() -> Self {
        Self {
            fetch_threads: 8,
            decode_threads: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            decode_attempts: 2,
            decode_backoff: Duration::from_millis(250),
            read_chunk_size: 2 * 1024,
            keep_alive: Duration::from_secs(1),
        }
    }
}

struct DispatchMessage {
    task: Arc<PhotoTask>,
    /// Generation the state belongs to; stale messages from a previous
    /// generation of a recycled task are dropped at delivery.
    generation: u64,
    state: PhotoState,
}

pub(crate) struct ManagerInner {
    cache: Mutex<PhotoCache>,
    task_pool: TaskPool,
    fetch_pool: WorkerPool,
    decode_pool: WorkerPool,
    dispatch_tx: Mutex<Option<mpsc::Sender<DispatchMessage>>>,
}

impl ManagerInner {
    /// Entry point for state reports from worker threads (and for the
    /// synthetic cache-hit transition).
    pub(crate) fn handle_state(&self, task: &Arc<PhotoTask>, state: PhotoState) {
        match state {
            PhotoState::Complete => {
                if task.cache_enabled() {
                    if let (Some(key), Some(buffer)) = (task.key(), task.buffer()) {
                        self.cache.lock().put(key, buffer.as_ref().clone());
                    }
                }
            }
            PhotoState::DownloadComplete => {
                self.decode_pool.execute(task.clone());
            }
            _ => {}
        }

        self.forward(task, state);
    }

    fn forward(&self, task: &Arc<PhotoTask>, state: PhotoState) {
        let message = DispatchMessage {
            task: task.clone(),
            generation: task.generation(),
            state,
        };
        if let Some(tx) = self.dispatch_tx.lock().as_ref() {
            if tx.send(message).is_err() {
                tracing::debug!("dispatch channel closed; dropping {state:?}");
            }
        }
    }
}

/// Coordinator for asynchronous photo loads.
pub struct PhotoManager {
    inner: Arc<ManagerInner>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

impl PhotoManager {
    /// Create a manager with the default HTTP transport and codec.
    pub fn new() -> Result<Self, NetError> {
        Self::with_config(PhotoConfig::default())
    }

    /// Create a manager with custom sizing over the default transport
    /// and codec.
    pub fn with_config(config: PhotoConfig) -> Result<Self, NetError> {
        Ok(Self::with_parts(
            config,
            Arc::new(HttpTransport::new()?),
            Arc::new(ImageCrateCodec),
        ))
    }

    /// Create a manager over explicit transport and codec
    /// implementations. This is the seam embedders and tests use to run
    /// the pipeline without sockets or pixel data.
    pub fn with_parts(
        config: PhotoConfig,
        transport: Arc<dyn Transport>,
        codec: Arc<dyn ImageCodec>,
    ) -> Self {
        let (tx, rx) = mpsc::channel();

        let fetch_pool = {
            let transport = transport.clone();
            let chunk_size = config.read_chunk_size;
            WorkerPool::new(
                "lumen-fetch",
                config.fetch_threads,
                config.keep_alive,
                move |task| fetch::run(&*task, &*transport, chunk_size),
            )
        };

        let decode_pool = {
            let codec = codec.clone();
            let attempts = config.decode_attempts;
            let backoff = config.decode_backoff;
            WorkerPool::new(
                "lumen-decode",
                config.decode_threads,
                config.keep_alive,
                move |task| decode::run(&*task, &*codec, attempts, backoff),
            )
        };

        let inner = Arc::new(ManagerInner {
            cache: Mutex::new(PhotoCache::new(config.cache_capacity)),
            task_pool: TaskPool::new(),
            fetch_pool,
            decode_pool,
            dispatch_tx: Mutex::new(Some(tx)),
        });

        let dispatch_inner = Arc::downgrade(&inner);
        let dispatcher = std::thread::Builder::new()
            .name("lumen-dispatch".into())
            .spawn(move || dispatch_loop(rx, dispatch_inner))
            .expect("failed to spawn dispatch thread");

        Self {
            inner,
            dispatcher: Mutex::new(Some(dispatcher)),
        }
    }

    /// Start loading `key` for `consumer`, decoding into a
    /// `target_width` x `target_height` bound.
    ///
    /// On a cache hit the fetch stage is skipped entirely and a
    /// synthetic `DownloadComplete` transition drives the decode. On a
    /// miss the fetch is queued and `Queued` is delivered to the
    /// consumer synchronously on the calling thread.
    ///
    /// The returned task handle identifies this request for `cancel`.
    pub fn start_load(
        &self,
        consumer: &Arc<dyn PhotoConsumer>,
        key: PhotoKey,
        target_width: u32,
        target_height: u32,
        cache_enabled: bool,
    ) -> Arc<PhotoTask> {
        let task = self.inner.task_pool.acquire().unwrap_or_else(PhotoTask::new);
        task.initialize(
            Arc::downgrade(&self.inner),
            consumer,
            key.clone(),
            target_width,
            target_height,
            cache_enabled,
        );

        let cached = self.inner.cache.lock().get(&key);
        match cached {
            Some(bytes) => {
                tracing::debug!("cache hit for {key}; skipping fetch");
                task.prefill_buffer(bytes);
                self.inner.handle_state(&task, PhotoState::DownloadComplete);
            }
            None => {
                tracing::debug!("cache miss for {key}; queueing fetch");
                consumer.on_state_changed(&task, PhotoState::Queued, None);
                self.inner.fetch_pool.execute(task.clone());
            }
        }

        task
    }

    /// Cancel one in-flight request, if `task` still carries `key`.
    ///
    /// Signals the generation's cancel token and best-effort removes
    /// the fetch from the pending queue when it has not started yet.
    /// Cancellation is advisory; a running stage stops at its next
    /// checkpoint and reports nothing further.
    pub fn cancel(&self, task: &Arc<PhotoTask>, key: &PhotoKey) {
        if task.key().as_ref() == Some(key) {
            task.cancel();
            self.inner.fetch_pool.remove(task);
        }
    }

    /// Cancel every fetch still waiting in the pending queue.
    ///
    /// Deliberately narrow: requests already running a fetch, or past
    /// it, are not reached. Use `cancel` for a specific request.
    pub fn cancel_all(&self) {
        let pending = self.inner.fetch_pool.pending();
        tracing::debug!("cancelling {} pending fetches", pending.len());
        for task in pending {
            task.cancel();
        }
    }
}

impl Drop for PhotoManager {
    fn drop(&mut self) {
        self.inner.fetch_pool.shutdown();
        self.inner.decode_pool.shutdown();
        self.inner.dispatch_tx.lock().take();
        if let Some(handle) = self.dispatcher.lock().take() {
            let _ = handle.join();
        }
    }
}

/// Consumer-thread delivery loop.
///
/// Resolves the live consumer through the task's weak reference and
/// drops messages for dead consumers, rebound consumers, and stale
/// generations, all silently. Terminal states recycle the task into
/// the free pool after the callback returns.
fn dispatch_loop(rx: mpsc::Receiver<DispatchMessage>, inner: Weak<ManagerInner>) {
    while let Ok(DispatchMessage {
        task,
        generation,
        state,
    }) = rx.recv()
    {
        if task.generation() != generation {
            tracing::debug!("dropping {state:?} from a stale generation");
            continue;
        }

        let Some(consumer) = task.consumer() else {
            tracing::debug!("dropping {state:?} for a dead consumer");
            continue;
        };

        let Some(key) = task.key() else {
            continue;
        };
        if consumer.current_locator().as_ref() != Some(&key) {
            tracing::debug!("dropping {state:?}: consumer rebound away from {key}");
            continue;
        }

        let photo = if state == PhotoState::Complete {
            task.take_photo()
        } else {
            None
        };
        consumer.on_state_changed(&task, state, photo);

        if state.is_terminal() {
            if let Some(inner) = inner.upgrade() {
                task.recycle();
                inner.task_pool.release(task);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = PhotoConfig::default();
        assert_eq!(config.fetch_threads, 8);
        assert!(config.decode_threads >= 1);
        assert_eq!(config.cache_capacity, 4 * 1024 * 1024);
        assert_eq!(config.decode_attempts, 2);
        assert_eq!(config.decode_backoff, Duration::from_millis(250));
        assert_eq!(config.read_chunk_size, 2048);
    }
}
