use std::mem::size_of;
use std::sync::{Arc, Weak};

use glam::Mat4;
use morrow_arena::{Region, SlotArena};
use parking_lot::Mutex;
use tracing::{debug, trace_span};

use crate::api::{BufferError, BufferHeap, SsboDevice};

/// Arena of bone matrices with one GPU buffer per in-flight frame.
///
/// Slot 0 of every heap is pinned to the identity matrix and never freed, so
/// a shader can always index it for unskinned geometry. Each skinned-mesh
/// instance allocates one contiguous region sized to its bone count at spawn
/// and writes it through its [`MatrixId`] every animation tick.
///
/// Frame commit is the only point that touches the GPU: [`commit`] rebuilds
/// the frame's buffer when the arena grew since that frame's last snapshot
/// and pushes only the dirty element range otherwise.
///
/// [`commit`]: Self::commit
pub struct MatrixStorage<D: SsboDevice> {
    heaps: [Arc<Heap>; BufferHeap::COUNT],
    // Per heap, per in-flight frame.
    gpu: [Vec<Option<D::Buffer>>; BufferHeap::COUNT],
}

impl<D: SsboDevice> MatrixStorage<D> {
    /// Creates storage committing to `frames_in_flight` parallel buffer
    /// copies per heap.
    ///
    /// # Panics
    ///
    /// Panics if `frames_in_flight` is zero.
    pub fn new(frames_in_flight: usize) -> Self {
        assert_ne!(frames_in_flight, 0);

        Self {
            heaps: [
                Arc::new(Heap::new(frames_in_flight)),
                Arc::new(Heap::new(frames_in_flight)),
            ],
            gpu: [
                (0..frames_in_flight).map(|_| None).collect(),
                (0..frames_in_flight).map(|_| None).collect(),
            ],
        }
    }

    /// Allocates a contiguous run of `bone_count` matrix slots in `heap`.
    ///
    /// The new slots are identity-initialized. `bone_count == 0` returns an
    /// empty id whose operations are all no-ops, used for meshes without a
    /// skeleton.
    pub fn alloc(&self, heap: BufferHeap, bone_count: usize) -> MatrixId {
        if bone_count == 0 {
            return MatrixId::default();
        }

        let heap = &self.heaps[heap.index()];
        let mut inner = heap.inner.lock();

        let region = inner.rgn.alloc(bone_count);
        let new_len = inner.rgn.len();
        if new_len > inner.data.len() {
            inner.data.resize(new_len, Mat4::IDENTITY);
        }

        // Recycled slots still hold the previous owner's transforms.
        inner.data[region.begin..region.end()].fill(Mat4::IDENTITY);
        inner.mark_dirty(region.begin, region.end());

        MatrixId {
            heap: Arc::downgrade(heap),
            region,
        }
    }

    /// Number of matrix slots in `heap`, including the pinned identity.
    pub fn len(&self, heap: BufferHeap) -> usize {
        self.heaps[heap.index()].inner.lock().data.len()
    }

    /// Uploads pending matrix writes in `heap` for the given in-flight
    /// frame.
    ///
    /// Returns `Ok(true)` if the frame's buffer was recreated at a new size
    /// and the caller must rebind it, `Ok(false)` if the existing buffer was
    /// updated in place.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails to allocate a replacement
    /// buffer. The previous buffer is kept in that case.
    pub fn commit(
        &mut self,
        device: &D,
        heap: BufferHeap,
        frame: usize,
    ) -> Result<bool, BufferError> {
        let _span = trace_span!("MatrixStorage::commit").entered();

        let slot = &mut self.gpu[heap.index()][frame];
        let mut inner = self.heaps[heap.index()].inner.lock();

        let HeapInner { data, rgn: _, frames } = &mut *inner;
        let dirty = &mut frames[frame];

        if dirty.committed_len != data.len() || slot.is_none() {
            let buffer = device.create_ssbo(heap, bytemuck::must_cast_slice(data))?;
            *slot = Some(buffer);

            debug!(
                "rebuilt matrix buffer: heap={:?} frame={} len={}",
                heap,
                frame,
                data.len()
            );

            dirty.committed_len = data.len();
            dirty.clear();
            return Ok(true);
        }

        if dirty.lo < dirty.hi {
            let bytes = bytemuck::must_cast_slice(&data[dirty.lo..dirty.hi]);
            let offset = (dirty.lo * size_of::<Mat4>()) as u64;
            device.write_ssbo(slot.as_ref().unwrap(), offset, bytes);
            dirty.clear();
        }

        Ok(false)
    }

    /// The GPU buffer last committed for `heap` and `frame`, if any.
    pub fn ssbo(&self, heap: BufferHeap, frame: usize) -> Option<&D::Buffer> {
        self.gpu[heap.index()][frame].as_ref()
    }
}

struct Heap {
    inner: Mutex<HeapInner>,
}

impl Heap {
    fn new(frames_in_flight: usize) -> Self {
        let mut rgn = SlotArena::new();
        let identity = rgn.alloc(1);
        debug_assert_eq!(identity.begin, 0);

        Self {
            inner: Mutex::new(HeapInner {
                data: vec![Mat4::IDENTITY],
                rgn,
                frames: (0..frames_in_flight).map(|_| FrameDirty::new()).collect(),
            }),
        }
    }
}

struct HeapInner {
    // Index 0 is the identity matrix, allocated at construction and never
    // freed.
    data: Vec<Mat4>,
    rgn: SlotArena,
    frames: Vec<FrameDirty>,
}

impl HeapInner {
    fn mark_dirty(&mut self, begin: usize, end: usize) {
        for frame in &mut self.frames {
            frame.lo = frame.lo.min(begin);
            frame.hi = frame.hi.max(end);
        }
    }
}

/// Pending upload state for one in-flight frame slot.
struct FrameDirty {
    // Arena length at this frame's last commit; a mismatch forces a buffer
    // rebuild.
    committed_len: usize,
    // Dirty element range `[lo, hi)`.
    lo: usize,
    hi: usize,
}

impl FrameDirty {
    fn new() -> Self {
        Self {
            committed_len: 0,
            lo: usize::MAX,
            hi: 0,
        }
    }

    fn clear(&mut self) {
        self.lo = usize::MAX;
        self.hi = 0;
    }
}

/// Exclusive handle to one matrix region.
///
/// The id owns its region: dropping it returns the slots to the arena. It
/// cannot be cloned, which is what makes the single-owner contract hold. A
/// default-constructed id is empty and all of its operations are no-ops.
#[derive(Debug, Default)]
pub struct MatrixId {
    heap: Weak<Heap>,
    region: Region,
}

impl MatrixId {
    /// Number of matrix slots owned by this id.
    pub fn size(&self) -> usize {
        self.region.size
    }

    pub fn is_empty(&self) -> bool {
        self.region.is_empty()
    }

    /// Index of the region's first slot, for shader-side indexing.
    pub fn offset(&self) -> usize {
        self.region.begin
    }

    /// Overwrites the whole region.
    ///
    /// `matrices` must contain exactly [`size`] elements; the animation
    /// system always supplies one matrix per bone.
    ///
    /// [`size`]: Self::size
    pub fn set(&self, matrices: &[Mat4]) {
        let Some(heap) = self.heap.upgrade() else {
            return;
        };
        if self.region.is_empty() {
            return;
        }

        debug_assert_eq!(matrices.len(), self.region.size);
        let count = matrices.len().min(self.region.size);

        let mut inner = heap.inner.lock();
        let begin = self.region.begin;
        inner.data[begin..begin + count].copy_from_slice(&matrices[..count]);
        inner.mark_dirty(begin, begin + count);
    }

    /// Overwrites the single slot at `offset` within the region.
    ///
    /// Used for anchoring a static sub-object's world matrix inside a
    /// skeleton's block.
    pub fn set_at(&self, offset: usize, matrix: Mat4) {
        let Some(heap) = self.heap.upgrade() else {
            return;
        };

        debug_assert!(offset < self.region.size || self.region.is_empty());
        if offset >= self.region.size {
            return;
        }

        let mut inner = heap.inner.lock();
        let index = self.region.begin + offset;
        inner.data[index] = matrix;
        inner.mark_dirty(index, index + 1);
    }
}

impl Drop for MatrixId {
    fn drop(&mut self) {
        if self.region.is_empty() {
            return;
        }

        // The storage may already be gone; the region dies with it.
        if let Some(heap) = self.heap.upgrade() {
            heap.inner.lock().rgn.free(self.region);
        }
    }
}
