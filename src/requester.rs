//! Scroll observer that feeds the engine with minimal, correctly ordered
//! batches and keeps prefetching around the visible window.
//!
//! The phase machine advances on the engine's "all requests done" signal:
//! the visible window first, then the window of the same size after it,
//! then the window before it in descending order (closest to the visible
//! range first), then idle until the next scroll or dataset change.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::engine::ThumbnailEngine;
use crate::thumbnail::{MediaKey, ThumbnailRequest};

/// The list-side collaborator the requester queries.
///
/// Must be safe to call from whichever thread drives the scroll events;
/// the requester calls it while holding its own state lock.
pub trait ThumbnailAdapter: Send + Sync {
    /// True when the item at `position` still lacks a thumbnail.
    fn needs_thumbnail(&self, position: usize) -> bool;

    /// Content identity of the item at `position`, or `None` when the
    /// position is out of range.
    fn item_key(&self, position: usize) -> Option<MediaKey>;

    /// Registers a callback fired on every dataset change (items
    /// inserted, removed, or reordered).
    fn subscribe_dataset_changes(&self, callback: Box<dyn Fn() + Send + Sync>);
}

/// Which prefetch window is currently outstanding.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PrefetchPhase {
    /// The visible window itself.
    Center,
    /// The window immediately after the visible range.
    After,
    /// The window immediately before the visible range.
    Before,
    /// No automatic prefetch until the next scroll or dataset change.
    Idle,
}

struct WindowState {
    phase: PrefetchPhase,
    /// Last processed visible window; `None` forces the next scroll
    /// callback to be treated as fresh even with unchanged indices.
    first_visible: Option<usize>,
    visible_count: usize,
    total_count: usize,
}

/// Translates scroll and dataset events into cancelling request batches.
pub struct ThumbnailRequester {
    engine: Arc<ThumbnailEngine>,
    adapter: Arc<dyn ThumbnailAdapter>,
    state: Mutex<WindowState>,
}

impl ThumbnailRequester {
    /// Creates the requester and subscribes it to the adapter's dataset
    /// changes. The subscription holds a weak reference: once the last
    /// `Arc` is dropped, callbacks degrade to no-ops.
    pub fn new(engine: Arc<ThumbnailEngine>, adapter: Arc<dyn ThumbnailAdapter>) -> Arc<Self> {
        let requester = Arc::new(Self {
            engine,
            adapter: Arc::clone(&adapter),
            state: Mutex::new(WindowState {
                phase: PrefetchPhase::Idle,
                first_visible: None,
                visible_count: 0,
                total_count: 0,
            }),
        });

        let weak = Arc::downgrade(&requester);
        adapter.subscribe_dataset_changes(Box::new(move || {
            if let Some(requester) = weak.upgrade() {
                requester.on_dataset_changed();
            }
        }));

        requester
    }

    /// Handles a scroll event. Redundant calls (identical first-visible
    /// index and visible count to the last processed call) are ignored;
    /// otherwise the visible window is scanned and, when any position
    /// lacks a thumbnail, submitted as a cancelling batch.
    pub fn on_scroll(&self, first_visible: usize, visible_count: usize, total_count: usize) {
        let batch = {
            let mut state = self.state.lock();
            if state.first_visible == Some(first_visible) && state.visible_count == visible_count {
                trace!(first_visible, visible_count, "redundant scroll event ignored");
                return;
            }

            state.first_visible = Some(first_visible);
            state.visible_count = visible_count;
            state.total_count = total_count;
            state.phase = PrefetchPhase::Center;

            let end = (first_visible + visible_count).min(total_count);
            self.collect_batch(first_visible..end)
        };

        if !batch.is_empty() {
            debug!(first_visible, requests = batch.len(), "requesting visible window");
            self.engine.submit_batch_cancelling_previous(&batch);
        }
    }

    /// Handles the engine's end-of-batch signal by advancing the phase
    /// machine and submitting the next prefetch window. Empty windows
    /// fall straight through to the next phase.
    pub fn on_all_requests_done(&self) {
        let batch = {
            let mut state = self.state.lock();
            let Some(first) = state.first_visible else {
                state.phase = PrefetchPhase::Idle;
                return;
            };
            let count = state.visible_count;
            let total = state.total_count;

            loop {
                match state.phase {
                    PrefetchPhase::Center => {
                        state.phase = PrefetchPhase::After;
                        let start = (first + count).min(total);
                        let end = (first + 2 * count).min(total);
                        let batch = self.collect_batch(start..end);
                        if !batch.is_empty() {
                            trace!(start, end, requests = batch.len(), "prefetching window after visible range");
                            break Some(batch);
                        }
                    }
                    PrefetchPhase::After => {
                        state.phase = PrefetchPhase::Before;
                        let start = first.saturating_sub(count);
                        let batch = self.collect_batch((start..first).rev());
                        if !batch.is_empty() {
                            trace!(start, end = first, requests = batch.len(), "prefetching window before visible range");
                            break Some(batch);
                        }
                    }
                    PrefetchPhase::Before | PrefetchPhase::Idle => {
                        state.phase = PrefetchPhase::Idle;
                        break None;
                    }
                }
            }
        };

        if let Some(batch) = batch {
            self.engine.submit_batch_cancelling_previous(&batch);
        }
    }

    /// Handles a dataset change: back to `Center` with the remembered
    /// window forgotten, so the next scroll callback is processed even
    /// when its indices are numerically unchanged.
    pub fn on_dataset_changed(&self) {
        debug!("dataset changed, forgetting visible window");
        self.forget_window();
    }

    /// Explicit reset; same effect as a dataset change.
    pub fn reset(&self) {
        self.forget_window();
    }

    /// Current prefetch phase.
    pub fn phase(&self) -> PrefetchPhase {
        self.state.lock().phase
    }

    fn forget_window(&self) {
        let mut state = self.state.lock();
        state.phase = PrefetchPhase::Center;
        state.first_visible = None;
        state.visible_count = 0;
    }

    fn collect_batch<I>(&self, positions: I) -> Vec<ThumbnailRequest>
    where
        I: IntoIterator<Item = usize>,
    {
        positions
            .into_iter()
            .filter(|&position| self.adapter.needs_thumbnail(position))
            .filter_map(|position| {
                self.adapter.item_key(position).map(|key| ThumbnailRequest {
                    key,
                    list_position: position,
                })
            })
            .collect()
    }
}
