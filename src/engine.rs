//! Worker state machine, request queue, cancellation, and the public
//! engine API.
//!
//! A single dedicated thread drains a bounded request queue. For every
//! request it either reuses the cached result or invokes the embedder's
//! [`ThumbnailCompute`], stores the outcome in the result cache, and
//! publishes it to the registered listener through the caller's
//! [`DispatchContext`]. Submitting a new batch cancels everything still
//! outstanding from the previous one, including the delivery of a
//! computation already in flight.

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender, TrySendError};
use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, trace, warn};

use crate::cache::{capacity_for, CacheStats, ThumbnailCache};
use crate::dispatch::DispatchContext;
use crate::thumbnail::{MediaKey, ThumbnailRequest, ThumbnailResult};

/// Capacity of the bounded request queue. Batches that overflow it are
/// truncated, never blocked on.
pub const REQUEST_QUEUE_CAPACITY: usize = 1024;

/// Baseline result-cache memory footprint at display density 1.0.
pub const DEFAULT_CACHE_FOOTPRINT_BYTES: usize = 5 * 1024 * 1024;

// Worker tri-state. `IncomingClear` is the cancellation gate: while the
// state holds it, no dequeued request can be claimed for processing.
const STATE_NO_TASK: u8 = 0;
const STATE_WORKING: u8 = 1;
const STATE_INCOMING_CLEAR: u8 = 2;

/// Tuning knobs for [`ThumbnailEngine`].
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Baseline memory footprint of the result cache in bytes; the
    /// effective target scales with the square of `display_density`.
    pub cache_footprint_bytes: usize,
    /// Display density factor of the target screen.
    pub display_density: f32,
    /// Initial thumbnail width in pixels.
    pub thumbnail_width: u32,
    /// Initial thumbnail height in pixels.
    pub thumbnail_height: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cache_footprint_bytes: DEFAULT_CACHE_FOOTPRINT_BYTES,
            display_density: 1.0,
            thumbnail_width: 96,
            thumbnail_height: 96,
        }
    }
}

impl EngineConfig {
    /// Cache memory target: the configured baseline scaled by the square
    /// of the display density.
    pub fn target_cache_bytes(&self) -> usize {
        let density = f64::from(self.display_density.max(0.0));
        (self.cache_footprint_bytes as f64 * density * density) as usize
    }
}

/// Failure reported by a [`ThumbnailCompute`] implementation.
///
/// Every variant is recovered locally by the worker: the error is logged,
/// no result is produced this cycle, and the key stays eligible for a
/// retry on its next request.
#[derive(Debug, Error)]
pub enum ComputeError {
    /// The computation ran out of memory.
    #[error("out of memory: {0}")]
    OutOfMemory(String),
    /// Any other computation failure.
    #[error("{0}")]
    Failed(String),
}

/// Produces the decoded thumbnail for a request.
///
/// Invoked only on the worker thread; may be slow. While it runs, no
/// other request makes progress (one thumbnail at a time by design).
pub trait ThumbnailCompute: Send + 'static {
    fn compute(&mut self, request: &ThumbnailRequest) -> Result<ThumbnailResult, ComputeError>;
}

impl<F> ThumbnailCompute for F
where
    F: FnMut(&ThumbnailRequest) -> Result<ThumbnailResult, ComputeError> + Send + 'static,
{
    fn compute(&mut self, request: &ThumbnailRequest) -> Result<ThumbnailResult, ComputeError> {
        self(request)
    }
}

/// Receives per-item results and the end-of-batch signal, on the
/// dispatch context registered alongside it.
pub trait ThumbnailListener: Send + Sync {
    fn on_thumbnail_ready(&self, request: ThumbnailRequest, result: Arc<ThumbnailResult>);
    fn on_all_requests_done(&self);
}

struct ListenerSlot {
    listener: Arc<dyn ThumbnailListener>,
    dispatch: Arc<dyn DispatchContext>,
}

/// A queued request, stamped with the batch generation current at submit
/// time so a cancel can invalidate entries it could not drain in time.
struct QueueEntry {
    generation: u64,
    request: ThumbnailRequest,
}

struct Shared {
    cache: ThumbnailCache,
    state: AtomicU8,
    generation: AtomicU64,
    listener: Mutex<Option<ListenerSlot>>,
}

/// The public face of the pipeline: owns the result cache and the worker
/// thread, accepts cancelling batches, and exposes the cache fast path.
///
/// The worker is a named background thread, best-effort by intent; it
/// blocks only while waiting for the queue to become non-empty.
///
/// Dropping the engine disconnects the request queue; the worker's
/// blocking wait returns an error and the thread exits cleanly.
pub struct ThumbnailEngine {
    shared: Arc<Shared>,
    queue_tx: Sender<QueueEntry>,
    queue_rx: Receiver<QueueEntry>,
    thumbnail_size: Mutex<(u32, u32)>,
    config: EngineConfig,
}

impl ThumbnailEngine {
    /// Creates the engine and spawns its worker thread with the given
    /// compute implementation moved in.
    pub fn new<C: ThumbnailCompute>(config: EngineConfig, compute: C) -> Self {
        let capacity = capacity_for(
            config.target_cache_bytes(),
            config.thumbnail_width,
            config.thumbnail_height,
        );
        let shared = Arc::new(Shared {
            cache: ThumbnailCache::new(capacity),
            state: AtomicU8::new(STATE_NO_TASK),
            generation: AtomicU64::new(0),
            listener: Mutex::new(None),
        });

        let (queue_tx, queue_rx) = crossbeam_channel::bounded(REQUEST_QUEUE_CAPACITY);

        let worker_shared = Arc::clone(&shared);
        let worker_rx = queue_rx.clone();
        std::thread::Builder::new()
            .name("thumbnail-worker".into())
            .spawn(move || worker_loop(worker_shared, worker_rx, Box::new(compute)))
            .expect("Failed to spawn thumbnail worker thread");

        debug!(
            capacity,
            width = config.thumbnail_width,
            height = config.thumbnail_height,
            "thumbnail engine started"
        );

        Self {
            shared,
            queue_tx,
            queue_rx,
            thumbnail_size: Mutex::new((config.thumbnail_width, config.thumbnail_height)),
            config,
        }
    }

    /// Updates the thumbnail dimensions, rebuilding the result cache at
    /// the capacity the new dimensions imply. Idempotent when called with
    /// the current dimensions: the cache is left untouched.
    pub fn set_thumbnail_size(&self, width: u32, height: u32) {
        let mut size = self.thumbnail_size.lock();
        if *size == (width, height) {
            return;
        }
        let capacity = capacity_for(self.config.target_cache_bytes(), width, height);
        debug!(width, height, capacity, "thumbnail size changed, rebuilding result cache");
        self.shared.cache.reset(capacity);
        *size = (width, height);
    }

    /// Current thumbnail dimensions.
    pub fn thumbnail_size(&self) -> (u32, u32) {
        *self.thumbnail_size.lock()
    }

    /// Cancels every outstanding request, then enqueues the batch in
    /// order. Never blocks: on queue overflow the rest of the batch is
    /// dropped and logged.
    pub fn submit_batch_cancelling_previous(&self, requests: &[ThumbnailRequest]) {
        self.cancel_all();

        let generation = self.shared.generation.load(Ordering::Acquire);
        let mut submitted = 0usize;
        for request in requests {
            match self.queue_tx.try_send(QueueEntry {
                generation,
                request: *request,
            }) {
                Ok(()) => submitted += 1,
                Err(TrySendError::Full(_)) => {
                    warn!(
                        dropped = requests.len() - submitted,
                        "request queue full, dropping the rest of the batch"
                    );
                    break;
                }
                Err(TrySendError::Disconnected(_)) => {
                    warn!("thumbnail worker is gone, dropping batch");
                    return;
                }
            }
        }
        debug!(submitted, requested = requests.len(), "submitted thumbnail batch");
    }

    /// Cancels all pending requests and the delivery of any computation
    /// currently in flight.
    ///
    /// The three steps must run in this order. Invalidating the state
    /// first guarantees that an entry dequeued concurrently can neither
    /// be claimed nor published; draining alone cannot, because clearing
    /// the queue and the state is not one atomic step.
    pub fn cancel_all(&self) {
        self.shared.state.store(STATE_INCOMING_CLEAR, Ordering::SeqCst);

        self.shared.generation.fetch_add(1, Ordering::AcqRel);
        let mut drained = 0usize;
        while self.queue_rx.try_recv().is_ok() {
            drained += 1;
        }

        self.shared.state.store(STATE_NO_TASK, Ordering::SeqCst);

        if drained > 0 {
            trace!(drained, "cancelled pending requests");
        }
    }

    /// Cache-hit fast path: a direct read with no queueing involved.
    pub fn get_cached(&self, key: MediaKey) -> Option<Arc<ThumbnailResult>> {
        self.shared.cache.get(key)
    }

    /// Invalidates a cached result so the key is recomputed on its next
    /// request.
    pub fn remove_cached(&self, key: MediaKey) {
        self.shared.cache.remove(key);
    }

    /// Flags the cached result for a key, if any, for recomputation on
    /// its next request. Returns whether a result was flagged.
    pub fn request_refresh(&self, key: MediaKey) -> bool {
        match self.shared.cache.get(key) {
            Some(result) => {
                trace!(%key, "refresh requested");
                result.set_refresh();
                true
            }
            None => false,
        }
    }

    /// Registers the listener and the context its callbacks run on,
    /// replacing any previous pair. Deliveries already queued re-read the
    /// slot at delivery time, so a replaced or cleared listener never
    /// receives them.
    pub fn set_listener(&self, listener: Arc<dyn ThumbnailListener>, dispatch: Arc<dyn DispatchContext>) {
        *self.shared.listener.lock() = Some(ListenerSlot { listener, dispatch });
    }

    /// Clears the listener. In-flight deliveries silently no-op.
    pub fn clear_listener(&self) {
        *self.shared.listener.lock() = None;
    }

    /// Number of results currently cached, absent markers included.
    pub fn cached_count(&self) -> usize {
        self.shared.cache.len()
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.shared.cache.stats()
    }

    /// Number of requests waiting in the queue.
    pub fn pending_requests(&self) -> usize {
        self.queue_rx.len()
    }
}

fn worker_loop(shared: Arc<Shared>, queue_rx: Receiver<QueueEntry>, mut compute: Box<dyn ThumbnailCompute>) {
    debug!("thumbnail worker started");
    loop {
        // Blocks until a request arrives. Disconnection of the
        // engine-held sender is the shutdown signal.
        let entry = match queue_rx.recv() {
            Ok(entry) => entry,
            Err(_) => break,
        };

        // Claim the request. A cancel in progress holds the state at
        // IncomingClear, so the claim fails and the entry is discarded.
        if shared
            .state
            .compare_exchange(STATE_NO_TASK, STATE_WORKING, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            trace!(key = %entry.request.key, "request dequeued during cancel, skipping");
            continue;
        }

        // An entry dequeued just before the cancel's drain carries a
        // stale generation even though the claim above succeeded.
        if entry.generation != shared.generation.load(Ordering::Acquire) {
            let _ = shared.state.compare_exchange(
                STATE_WORKING,
                STATE_NO_TASK,
                Ordering::SeqCst,
                Ordering::SeqCst,
            );
            trace!(key = %entry.request.key, "stale request from superseded batch, skipping");
            continue;
        }

        process_request(&shared, compute.as_mut(), entry.request, &queue_rx);
    }
    debug!("thumbnail worker exiting");
}

fn process_request(
    shared: &Arc<Shared>,
    compute: &mut dyn ThumbnailCompute,
    request: ThumbnailRequest,
    queue_rx: &Receiver<QueueEntry>,
) {
    let cached = shared.cache.get(request.key);
    let needs_compute = match &cached {
        Some(existing) => existing.needs_refresh(),
        None => true,
    };

    let result = if needs_compute {
        match compute.compute(&request) {
            Ok(fresh) => Some(Arc::new(fresh)),
            Err(ComputeError::OutOfMemory(reason)) => {
                warn!(
                    key = %request.key,
                    position = request.list_position,
                    %reason,
                    "out of memory computing thumbnail, no result this cycle"
                );
                cached
            }
            Err(err) => {
                warn!(
                    key = %request.key,
                    position = request.list_position,
                    error = %err,
                    "thumbnail computation failed, no result this cycle"
                );
                cached
            }
        }
    } else {
        cached
    };

    if let Some(result) = &result {
        shared.cache.put(request.key, Arc::clone(result));
    }

    // Publish only when the claim survives to completion. A cancel that
    // landed mid-compute moved the state away from Working, the exchange
    // fails, and the delivery is discarded; the cache write above stands
    // for future reuse.
    if shared
        .state
        .compare_exchange(STATE_WORKING, STATE_NO_TASK, Ordering::SeqCst, Ordering::SeqCst)
        .is_err()
    {
        trace!(key = %request.key, "cancelled mid-computation, result not delivered");
        return;
    }

    if let Some(result) = result {
        if result.is_valid() && result.mark_notified() {
            trace!(key = %request.key, position = request.list_position, "delivering thumbnail");
            publish_ready(shared, request, result);
        }
    }

    if queue_rx.is_empty() {
        publish_all_done(shared);
    }
}

fn publish_ready(shared: &Arc<Shared>, request: ThumbnailRequest, result: Arc<ThumbnailResult>) {
    let dispatch = {
        let slot = shared.listener.lock();
        match slot.as_ref() {
            Some(slot) => Arc::clone(&slot.dispatch),
            None => return,
        }
    };
    let shared = Arc::clone(shared);
    dispatch.post(Box::new(move || {
        // The listener may have been replaced or cleared while this task
        // waited in the dispatch queue; the slot is authoritative at
        // delivery time, not at enqueue time.
        let listener = shared
            .listener
            .lock()
            .as_ref()
            .map(|slot| Arc::clone(&slot.listener));
        if let Some(listener) = listener {
            listener.on_thumbnail_ready(request, result);
        }
    }));
}

fn publish_all_done(shared: &Arc<Shared>) {
    let dispatch = {
        let slot = shared.listener.lock();
        match slot.as_ref() {
            Some(slot) => Arc::clone(&slot.dispatch),
            None => return,
        }
    };
    let shared = Arc::clone(shared);
    dispatch.post(Box::new(move || {
        let listener = shared
            .listener
            .lock()
            .as_ref()
            .map(|slot| Arc::clone(&slot.listener));
        if let Some(listener) = listener {
            listener.on_all_requests_done();
        }
    }));
}
