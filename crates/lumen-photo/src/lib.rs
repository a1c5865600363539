//! lumen Photo Pipeline
//!
//! Asynchronous remote-photo loading for the lumen toolkit: given a
//! locator and a target decode size, the pipeline fetches raw bytes on
//! a fetch pool, decodes them into a size-bounded photo on a decode
//! pool, caches the raw bytes, and delivers state transitions to a
//! single consumer thread. Requests support cooperative cancellation
//! and the per-request task records are pooled for reuse.
//!
//! The UI layer participates only through [`PhotoManager::start_load`],
//! [`PhotoManager::cancel`] and the [`PhotoConsumer`] callback trait.

mod cache;
mod consumer;
mod decode;
mod fetch;
mod key;
mod manager;
mod pool;
mod task;
mod worker;

pub use cache::{PhotoCache, DEFAULT_CACHE_CAPACITY};
pub use consumer::PhotoConsumer;
pub use decode::{
    sample_factor, DecodeError, DecodeState, DecodeTask, ImageCodec, ImageCrateCodec, Photo,
};
pub use fetch::{FetchState, FetchTask};
pub use key::PhotoKey;
pub use manager::{PhotoConfig, PhotoManager};
pub use task::PhotoTask;

pub use lumen_net::{FetchStream, HttpTransport, NetError, Transport, TransportConfig};

/// Consumer-visible load states.
///
/// Per generation the sequence is `Queued → DownloadStarted →
/// DownloadComplete → DecodeStarted → Complete`, with `Failed`
/// reachable from either started state. A cache hit enters the
/// sequence at `DownloadComplete`. A cancelled generation simply stops
/// producing transitions; no terminal state arrives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhotoState {
    /// Fetch accepted into the pending queue (cache-miss path only).
    Queued,
    /// Fetch stage running.
    DownloadStarted,
    /// Raw bytes available; decode queued. Synthetic on a cache hit.
    DownloadComplete,
    /// Decode stage running.
    DecodeStarted,
    /// Terminal: photo decoded and delivered.
    Complete,
    /// Terminal: fetch or decode failed.
    Failed,
}

impl PhotoState {
    /// Terminal states end a task generation and make the task
    /// eligible for recycling.
    pub fn is_terminal(&self) -> bool {
        matches!(self, PhotoState::Complete | PhotoState::Failed)
    }
}
