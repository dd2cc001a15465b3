//! Scroll-driven thumbnail computation pipeline.
//!
//! Turns "an item in a scrolling list needs a thumbnail" into "a cached,
//! decoded image delivered to a listener" while the list is scrolled at
//! arbitrary speed in either direction:
//!
//! - **Single background worker**: one dedicated thread drains a bounded
//!   request queue, computing one thumbnail at a time through the
//!   embedder's pluggable [`ThumbnailCompute`] implementation.
//!
//! - **Cancellable batches**: submitting a new batch supersedes the
//!   previous one entirely; no result of a superseded batch reaches the
//!   listener, even when its computation finishes later.
//!
//! - **Memory-bounded LRU cache**: every computed result, including a
//!   failed one, lands in an LRU cache whose capacity is derived from a
//!   target memory footprint, the display density, and the current
//!   thumbnail dimensions.
//!
//! - **Three-phase prefetch**: a [`ThumbnailRequester`] observes scroll
//!   events and warms the cache for the visible window, then the window
//!   after it, then the window before it, driven by the engine's
//!   completion signal.
//!
//! The pipeline performs no I/O of its own: decoding and scaling live in
//! the [`ThumbnailCompute`] collaborator, and listener callbacks run on a
//! caller-supplied [`DispatchContext`] rather than the worker thread.

pub mod cache;
pub mod dispatch;
pub mod engine;
pub mod requester;
pub mod thumbnail;

pub use cache::{capacity_for, CacheStats, ThumbnailCache};
pub use dispatch::{DispatchContext, DispatchTask, InlineDispatch};
pub use engine::{
    ComputeError, EngineConfig, ThumbnailCompute, ThumbnailEngine, ThumbnailListener,
    DEFAULT_CACHE_FOOTPRINT_BYTES, REQUEST_QUEUE_CAPACITY,
};
pub use requester::{PrefetchPhase, ThumbnailAdapter, ThumbnailRequester};
pub use thumbnail::{
    MediaKey, Thumbnail, ThumbnailRequest, ThumbnailResult, THUMBNAIL_BYTES_PER_PIXEL,
};
