//! Photo Tasks
//!
//! Pooled per-request state container driving one fetch-then-decode
//! sequence. A task is either free (in the pool, fields cleared) or
//! owned by exactly one in-flight request; its identity persists across
//! many requests. The span between `initialize` and `recycle` is one
//! generation.
//!
//! The task implements the narrow capability traits consumed by the
//! fetch and decode stages, so neither stage ever sees the full record.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread::Thread;

use parking_lot::Mutex;
use url::Url;

use crate::consumer::PhotoConsumer;
use crate::decode::{DecodeState, DecodeTask, Photo};
use crate::fetch::{FetchState, FetchTask};
use crate::key::PhotoKey;
use crate::manager::ManagerInner;
use crate::PhotoState;

#[derive(Default)]
struct Fields {
    key: Option<PhotoKey>,
    target_width: u32,
    target_height: u32,
    cache_enabled: bool,
    buffer: Option<Arc<Vec<u8>>>,
    photo: Option<Photo>,
    consumer: Option<Weak<dyn PhotoConsumer>>,
    manager: Weak<ManagerInner>,
}

/// Reusable per-request state for one photo load.
pub struct PhotoTask {
    fields: Mutex<Fields>,
    // Cooperative cancel token for the current generation; checked by
    // the stages at their checkpoints, never preemptive.
    cancelled: AtomicBool,
    generation: AtomicU64,
    // Thread currently running a stage for this task, if any.
    worker: Mutex<Option<Thread>>,
    self_ref: Weak<PhotoTask>,
}

impl PhotoTask {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new_cyclic(|self_ref| Self {
            fields: Mutex::new(Fields::default()),
            cancelled: AtomicBool::new(false),
            generation: AtomicU64::new(0),
            worker: Mutex::new(None),
            self_ref: self_ref.clone(),
        })
    }

    /// Begin a new generation for one request.
    pub(crate) fn initialize(
        &self,
        manager: Weak<ManagerInner>,
        consumer: &Arc<dyn PhotoConsumer>,
        key: PhotoKey,
        target_width: u32,
        target_height: u32,
        cache_enabled: bool,
    ) {
        let mut fields = self.fields.lock();
        fields.key = Some(key);
        fields.target_width = target_width;
        fields.target_height = target_height;
        fields.cache_enabled = cache_enabled;
        fields.buffer = None;
        fields.photo = None;
        fields.consumer = Some(Arc::downgrade(consumer));
        fields.manager = manager;
        drop(fields);

        self.cancelled.store(false, Ordering::SeqCst);
        self.generation.fetch_add(1, Ordering::SeqCst);
    }

    /// Clear all per-request state, ending the generation. The task is
    /// then eligible for the free pool.
    pub(crate) fn recycle(&self) {
        let mut fields = self.fields.lock();
        fields.key = None;
        fields.buffer = None;
        fields.photo = None;
        fields.consumer = None;
        drop(fields);

        *self.worker.lock() = None;
    }

    /// The locator this generation was initialized with.
    pub fn key(&self) -> Option<PhotoKey> {
        self.fields.lock().key.clone()
    }

    pub fn target_width(&self) -> u32 {
        self.fields.lock().target_width
    }

    pub fn target_height(&self) -> u32 {
        self.fields.lock().target_height
    }

    pub fn cache_enabled(&self) -> bool {
        self.fields.lock().cache_enabled
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Signal cooperative cancellation for the current generation.
    pub(crate) fn cancel(&self) {
        if let Some(worker) = self.worker.lock().as_ref() {
            tracing::debug!("cancelling work running on {:?}", worker.name());
        }
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Pre-fill the buffer from the cache, skipping the fetch stage.
    pub(crate) fn prefill_buffer(&self, bytes: Vec<u8>) {
        self.fields.lock().buffer = Some(Arc::new(bytes));
    }

    pub(crate) fn buffer(&self) -> Option<Arc<Vec<u8>>> {
        self.fields.lock().buffer.clone()
    }

    pub(crate) fn take_photo(&self) -> Option<Photo> {
        self.fields.lock().photo.take()
    }

    /// The live consumer, if it still exists.
    pub(crate) fn consumer(&self) -> Option<Arc<dyn PhotoConsumer>> {
        self.fields.lock().consumer.as_ref().and_then(Weak::upgrade)
    }

    fn attach_current_thread(&self) {
        *self.worker.lock() = Some(std::thread::current());
    }

    fn detach_thread(&self) {
        *self.worker.lock() = None;
    }

    fn report(&self, state: PhotoState) {
        let manager = self.fields.lock().manager.upgrade();
        let task = self.self_ref.upgrade();
        if let (Some(manager), Some(task)) = (manager, task) {
            manager.handle_state(&task, state);
        }
    }
}

impl FetchTask for PhotoTask {
    fn attach_worker(&self) {
        self.attach_current_thread();
    }

    fn detach_worker(&self) {
        self.detach_thread();
    }

    fn is_cancelled(&self) -> bool {
        PhotoTask::is_cancelled(self)
    }

    fn locator(&self) -> Option<Url> {
        self.fields.lock().key.as_ref().map(|k| k.url().clone())
    }

    fn buffer(&self) -> Option<Arc<Vec<u8>>> {
        PhotoTask::buffer(self)
    }

    fn set_buffer(&self, bytes: Vec<u8>) {
        self.fields.lock().buffer = Some(Arc::new(bytes));
    }

    fn report_fetch_state(&self, state: FetchState) {
        let mapped = match state {
            FetchState::Started => PhotoState::DownloadStarted,
            FetchState::Completed => PhotoState::DownloadComplete,
            FetchState::Failed => PhotoState::Failed,
        };
        self.report(mapped);
    }
}

impl DecodeTask for PhotoTask {
    fn attach_worker(&self) {
        self.attach_current_thread();
    }

    fn detach_worker(&self) {
        self.detach_thread();
    }

    fn is_cancelled(&self) -> bool {
        PhotoTask::is_cancelled(self)
    }

    fn buffer(&self) -> Option<Arc<Vec<u8>>> {
        PhotoTask::buffer(self)
    }

    fn target_width(&self) -> u32 {
        PhotoTask::target_width(self)
    }

    fn target_height(&self) -> u32 {
        PhotoTask::target_height(self)
    }

    fn set_photo(&self, photo: Photo) {
        self.fields.lock().photo = Some(photo);
    }

    fn report_decode_state(&self, state: DecodeState) {
        let mapped = match state {
            DecodeState::Started => PhotoState::DecodeStarted,
            DecodeState::Completed => PhotoState::Complete,
            DecodeState::Failed => PhotoState::Failed,
        };
        self.report(mapped);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NullConsumer;

    impl PhotoConsumer for NullConsumer {
        fn current_locator(&self) -> Option<PhotoKey> {
            None
        }

        fn on_state_changed(&self, _task: &Arc<PhotoTask>, _state: PhotoState, _photo: Option<Photo>) {}
    }

    fn init(task: &Arc<PhotoTask>) -> Arc<dyn PhotoConsumer> {
        let consumer: Arc<dyn PhotoConsumer> = Arc::new(NullConsumer);
        task.initialize(
            Weak::new(),
            &consumer,
            PhotoKey::parse("https://example.com/a.jpg").unwrap(),
            64,
            48,
            true,
        );
        consumer
    }

    #[test]
    fn test_initialize_starts_new_generation() {
        let task = PhotoTask::new();
        assert_eq!(task.generation(), 0);

        let _consumer = init(&task);
        assert_eq!(task.generation(), 1);
        assert_eq!(task.target_width(), 64);
        assert_eq!(task.target_height(), 48);
        assert!(task.cache_enabled());
        assert!(!task.is_cancelled());
    }

    #[test]
    fn test_initialize_resets_cancel_flag() {
        let task = PhotoTask::new();
        let _consumer = init(&task);
        task.cancel();
        assert!(task.is_cancelled());

        let _consumer = init(&task);
        assert!(!task.is_cancelled());
        assert_eq!(task.generation(), 2);
    }

    #[test]
    fn test_recycle_clears_fields() {
        let task = PhotoTask::new();
        let _consumer = init(&task);
        task.prefill_buffer(vec![1, 2, 3]);

        task.recycle();

        assert!(task.key().is_none());
        assert!(task.buffer().is_none());
        assert!(task.take_photo().is_none());
        assert!(task.consumer().is_none());
    }

    #[test]
    fn test_dead_consumer_upgrades_to_none() {
        let task = PhotoTask::new();
        let consumer = init(&task);
        assert!(task.consumer().is_some());

        drop(consumer);
        assert!(task.consumer().is_none());
    }
}
