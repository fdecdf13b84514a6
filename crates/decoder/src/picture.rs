//! Host-side planar pictures and the fixed pool that owns them.
//!
//! Each [`PictureBuffer`] holds separate Y, U, and V planes (4:2:0) with
//! their own strides. Buffers are reserved for the negotiated output size
//! once per geometry change and then reused for every displayed picture.

use std::sync::Arc;

use tracing::debug;

use nvb_common::{PacketTag, Resolution, WallClockMs};

/// A decoded picture in planar YUV 4:2:0.
#[derive(Clone, Default)]
pub struct PictureBuffer {
    y: Vec<u8>,
    u: Vec<u8>,
    v: Vec<u8>,
    /// Row stride of the Y plane in bytes.
    y_stride: usize,
    /// Row stride of the U and V planes in bytes.
    uv_stride: usize,
    size: Resolution,
    bytes_per_sample: usize,
    tag: PacketTag,
    timestamp: WallClockMs,
}

impl PictureBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate planes for `size`. Returns `false` when the buffer already
    /// had that geometry and nothing was reallocated.
    pub fn reserve(&mut self, size: Resolution, bytes_per_sample: usize) -> bool {
        if self.size == size && self.bytes_per_sample == bytes_per_sample {
            return false;
        }
        let chroma = chroma_size(size);
        self.y_stride = size.width as usize * bytes_per_sample;
        self.uv_stride = chroma.width as usize * bytes_per_sample;
        self.y = vec![0; self.y_stride * size.height as usize];
        self.u = vec![0; self.uv_stride * chroma.height as usize];
        self.v = vec![0; self.uv_stride * chroma.height as usize];
        self.size = size;
        self.bytes_per_sample = bytes_per_sample;
        true
    }

    pub fn size(&self) -> Resolution {
        self.size
    }

    pub fn width(&self) -> u32 {
        self.size.width
    }

    pub fn height(&self) -> u32 {
        self.size.height
    }

    /// Size of each chroma plane in samples.
    pub fn chroma_size(&self) -> Resolution {
        chroma_size(self.size)
    }

    /// 1 for 8-bit pictures, 2 for 16-bit sample containers.
    pub fn bytes_per_sample(&self) -> usize {
        self.bytes_per_sample
    }

    pub fn y(&self) -> &[u8] {
        &self.y
    }

    pub fn u(&self) -> &[u8] {
        &self.u
    }

    pub fn v(&self) -> &[u8] {
        &self.v
    }

    pub fn y_stride(&self) -> usize {
        self.y_stride
    }

    pub fn uv_stride(&self) -> usize {
        self.uv_stride
    }

    /// Identifiers of the packet this picture came from.
    pub fn tag(&self) -> PacketTag {
        self.tag
    }

    pub fn timestamp(&self) -> WallClockMs {
        self.timestamp
    }

    pub(crate) fn planes_mut(&mut self) -> PlanesMut<'_> {
        PlanesMut {
            y: &mut self.y,
            u: &mut self.u,
            v: &mut self.v,
            y_stride: self.y_stride,
            uv_stride: self.uv_stride,
        }
    }

    pub(crate) fn stamp(&mut self, tag: PacketTag, timestamp: WallClockMs) {
        self.tag = tag;
        self.timestamp = timestamp;
    }
}

impl std::fmt::Debug for PictureBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PictureBuffer")
            .field("size", &self.size)
            .field("bytes_per_sample", &self.bytes_per_sample)
            .field("y_stride", &self.y_stride)
            .field("uv_stride", &self.uv_stride)
            .field("tag", &self.tag)
            .field("timestamp", &self.timestamp)
            .finish()
    }
}

/// Mutable view of a picture's three planes.
pub(crate) struct PlanesMut<'a> {
    pub y: &'a mut [u8],
    pub u: &'a mut [u8],
    pub v: &'a mut [u8],
    pub y_stride: usize,
    pub uv_stride: usize,
}

/// Chroma plane size for a 4:2:0 picture (odd sizes round up).
pub fn chroma_size(size: Resolution) -> Resolution {
    Resolution::new(size.width.div_ceil(2), size.height.div_ceil(2))
}

// ---------------------------------------------------------------------------
// PicturePool
// ---------------------------------------------------------------------------

/// Fixed number of picture buffers, indexed by handoff-ring slot.
///
/// Buffers are shared with consumers through [`PicturePool::share`]. Writing
/// into a slot a consumer still holds clones the buffer first, so a fetched
/// picture never changes underneath its reader.
#[derive(Debug)]
pub struct PicturePool {
    buffers: Vec<Arc<PictureBuffer>>,
}

impl PicturePool {
    /// # Panics
    ///
    /// Panics if `depth` is 0.
    pub fn new(depth: usize) -> Self {
        assert!(depth > 0, "pool depth must be > 0");
        Self {
            buffers: (0..depth).map(|_| Arc::new(PictureBuffer::new())).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    /// Re-reserve every buffer. Returns `true` if the geometry changed.
    ///
    /// A buffer still held by a consumer is detached rather than resized.
    pub fn reserve(&mut self, size: Resolution, bytes_per_sample: usize) -> bool {
        let mut changed = false;
        for buffer in &mut self.buffers {
            if buffer.size == size && buffer.bytes_per_sample == bytes_per_sample {
                continue;
            }
            match Arc::get_mut(buffer) {
                Some(owned) => {
                    owned.reserve(size, bytes_per_sample);
                }
                None => {
                    let mut fresh = PictureBuffer::new();
                    fresh.reserve(size, bytes_per_sample);
                    *buffer = Arc::new(fresh);
                }
            }
            changed = true;
        }
        if changed {
            debug!(
                depth = self.buffers.len(),
                size = %size,
                bytes_per_sample,
                "Picture pool reserved"
            );
        }
        changed
    }

    /// Current geometry, or `None` before the first reservation.
    pub fn geometry(&self) -> Option<Resolution> {
        self.buffers
            .first()
            .map(|buffer| buffer.size())
            .filter(|size| !size.is_empty())
    }

    pub fn get(&self, slot: usize) -> Option<&PictureBuffer> {
        self.buffers.get(slot).map(|buffer| &**buffer)
    }

    /// Writable access to a slot, cloning it first if a consumer holds it.
    pub fn get_mut(&mut self, slot: usize) -> Option<&mut PictureBuffer> {
        self.buffers.get_mut(slot).map(Arc::make_mut)
    }

    /// A reference-counted handle to the picture in `slot`.
    pub fn share(&self, slot: usize) -> Option<Arc<PictureBuffer>> {
        self.buffers.get(slot).cloned()
    }
}

impl std::ops::Index<usize> for PicturePool {
    type Output = PictureBuffer;

    fn index(&self, slot: usize) -> &PictureBuffer {
        &self.buffers[slot]
    }
}

impl std::ops::IndexMut<usize> for PicturePool {
    fn index_mut(&mut self, slot: usize) -> &mut PictureBuffer {
        Arc::make_mut(&mut self.buffers[slot])
    }
}
