//! Core data model: keys, requests, pixel payloads, and shared results.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

/// Bytes per pixel of a decoded thumbnail (tightly packed RGB8).
/// This is also the per-entry byte estimate behind the cache capacity math.
pub const THUMBNAIL_BYTES_PER_PIXEL: usize = 3;

/// Opaque content identity of a list item, stable across scroll events
/// (a database row id in a typical host application).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MediaKey(pub i64);

impl fmt::Display for MediaKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A single "this item needs a thumbnail" request.
#[derive(Clone, Copy, Debug)]
pub struct ThumbnailRequest {
    /// Identity of the content item.
    pub key: MediaKey,
    /// Position in the list at the time of the request. Advisory; used
    /// only for logging.
    pub list_position: usize,
}

/// Decoded thumbnail pixels, tightly packed RGB8.
#[derive(Clone)]
pub struct Thumbnail {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
}

impl Thumbnail {
    /// Builds a thumbnail from a packed RGB8 buffer. Returns `None` when
    /// the buffer length does not match `width * height * 3`.
    pub fn new(width: u32, height: u32, pixels: Vec<u8>) -> Option<Self> {
        if pixels.len() != width as usize * height as usize * THUMBNAIL_BYTES_PER_PIXEL {
            return None;
        }
        Some(Self {
            width,
            height,
            pixels,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    /// Size of the pixel buffer in bytes.
    pub fn byte_size(&self) -> usize {
        self.pixels.len()
    }
}

impl fmt::Debug for Thumbnail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Thumbnail")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("bytes", &self.pixels.len())
            .finish()
    }
}

/// Outcome of one compute pass for a key.
///
/// Always handled as `Arc<ThumbnailResult>`: the cache and any in-flight
/// delivery share the same object, so the `notified` flag is flipped
/// exactly once no matter which path wins. A result without a thumbnail
/// is *invalid*: it is cached (so the key is not recomputed every cycle)
/// but never delivered to a listener.
pub struct ThumbnailResult {
    thumbnail: Option<Thumbnail>,
    notified: AtomicBool,
    refresh: AtomicBool,
}

impl ThumbnailResult {
    pub fn new(thumbnail: Option<Thumbnail>) -> Self {
        Self {
            thumbnail,
            notified: AtomicBool::new(false),
            refresh: AtomicBool::new(false),
        }
    }

    /// A result carrying a decoded thumbnail.
    pub fn valid(thumbnail: Thumbnail) -> Self {
        Self::new(Some(thumbnail))
    }

    /// A result recording that no thumbnail could be produced.
    pub fn invalid() -> Self {
        Self::new(None)
    }

    pub fn thumbnail(&self) -> Option<&Thumbnail> {
        self.thumbnail.as_ref()
    }

    /// True when this result carries a thumbnail and may be delivered.
    pub fn is_valid(&self) -> bool {
        self.thumbnail.is_some()
    }

    pub fn is_notified(&self) -> bool {
        self.notified.load(Ordering::Acquire)
    }

    /// Flips `notified` from false to true. Returns true for the one
    /// caller that got there first; the flag never reverts.
    pub fn mark_notified(&self) -> bool {
        self.notified
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// True when the worker should recompute this key even though a
    /// result is cached.
    pub fn needs_refresh(&self) -> bool {
        self.refresh.load(Ordering::Acquire)
    }

    /// Flags this result for recomputation on the key's next request.
    pub fn set_refresh(&self) {
        self.refresh.store(true, Ordering::Release);
    }
}

impl fmt::Debug for ThumbnailResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThumbnailResult")
            .field("valid", &self.is_valid())
            .field("notified", &self.is_notified())
            .field("refresh", &self.needs_refresh())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pixel_buffer_must_match_dimensions() {
        assert!(Thumbnail::new(4, 4, vec![0; 4 * 4 * 3]).is_some());
        assert!(Thumbnail::new(4, 4, vec![0; 7]).is_none());
        assert!(Thumbnail::new(0, 0, Vec::new()).is_some());
    }

    #[test]
    fn byte_size_reports_packed_rgb8_layout() {
        let thumb = Thumbnail::new(10, 5, vec![0; 10 * 5 * 3]).unwrap();
        assert_eq!(thumb.byte_size(), 150);
    }

    #[test]
    fn mark_notified_flips_exactly_once() {
        let result = ThumbnailResult::valid(Thumbnail::new(1, 1, vec![0; 3]).unwrap());
        assert!(!result.is_notified());
        assert!(result.mark_notified());
        assert!(result.is_notified());
        assert!(!result.mark_notified());
        assert!(result.is_notified());
    }

    #[test]
    fn invalid_result_has_no_thumbnail() {
        let result = ThumbnailResult::invalid();
        assert!(!result.is_valid());
        assert!(result.thumbnail().is_none());
    }

    #[test]
    fn refresh_flag_round_trips() {
        let result = ThumbnailResult::invalid();
        assert!(!result.needs_refresh());
        result.set_refresh();
        assert!(result.needs_refresh());
    }
}
