//! Listener-callback handoff to the caller's execution context.
//!
//! The engine never invokes a listener on the worker thread directly.
//! Every delivery is wrapped in a [`DispatchTask`] and handed to the
//! [`DispatchContext`] registered together with the listener, so the
//! embedder decides which thread or loop runs its callbacks.

use crossbeam_channel::{Sender, TrySendError};
use tracing::trace;

/// A boxed delivery: one listener invocation, ready to run on the
/// embedder's chosen context.
pub type DispatchTask = Box<dyn FnOnce() + Send>;

/// The execution context listener callbacks run on.
pub trait DispatchContext: Send + Sync {
    /// Hands a delivery task to the target context. Must not block the
    /// calling thread.
    fn post(&self, task: DispatchTask);
}

/// Runs tasks immediately on the posting thread. Suitable for tests and
/// for headless embedders that tolerate callbacks on the worker thread.
#[derive(Clone, Copy, Debug, Default)]
pub struct InlineDispatch;

impl DispatchContext for InlineDispatch {
    fn post(&self, task: DispatchTask) {
        task();
    }
}

/// Queues deliveries onto a channel the embedder drains on its own loop,
/// for example once per frame.
impl DispatchContext for Sender<DispatchTask> {
    fn post(&self, task: DispatchTask) {
        match self.try_send(task) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                trace!("dispatch queue full, dropping delivery");
            }
            Err(TrySendError::Disconnected(_)) => {
                trace!("dispatch target gone, dropping delivery");
            }
        }
    }
}
