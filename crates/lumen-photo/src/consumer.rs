//! Consumer Contract
//!
//! The UI layer that requested a photo. The pipeline only ever holds a
//! weak reference to a consumer: a destroyed consumer never keeps the
//! pipeline alive and silently stops receiving transitions.

use std::sync::Arc;

use crate::decode::Photo;
use crate::key::PhotoKey;
use crate::task::PhotoTask;
use crate::PhotoState;

/// Receiver of load-state transitions.
///
/// `on_state_changed` is invoked on the dispatch thread for every state
/// except [`PhotoState::Queued`], which is delivered synchronously on
/// the thread that called `start_load`. The decoded photo is attached
/// only to the [`PhotoState::Complete`] transition.
pub trait PhotoConsumer: Send + Sync {
    /// The locator this consumer is currently bound to.
    ///
    /// A consumer that has been rebound to a different locator while a
    /// task was in flight returns the new locator here, and the stale
    /// task's transitions are dropped before delivery.
    fn current_locator(&self) -> Option<PhotoKey>;

    /// Apply a state transition for `task`.
    fn on_state_changed(&self, task: &Arc<PhotoTask>, state: PhotoState, photo: Option<Photo>);
}
