use std::sync::atomic::Ordering;
use std::sync::Arc;

use crate::pool::PreMem;

/// Whether a block will be touched from more than one thread.
///
/// `Shared` blocks carry a mutex from the mutex-slot pool; `SingleThread` blocks are declared
/// single-threaded and have none.  Handing a `SingleThread` block to another thread is a caller
/// bug the pool cannot detect.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Sharing {
    SingleThread,
    Shared,
}

/// Destructor hook, run inside the final release with the payload bytes.
///
/// The chain lock is not held while the destructor runs.  Calling [Reviver::revive] from inside
/// the destructor re-refs the block and aborts reclamation.
pub type Destructor = fn(payload: &mut [u8], reviver: &Reviver<'_>);

/// A copyable, non-owning name for a block: class, slot, and the generation the slot had when
/// the block was allocated.
///
/// The generation makes stale names detectable: once the slot is reclaimed the generation
/// advances, and a release through an old `RawRef` is reported as a double free instead of
/// corrupting the chain.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct RawRef {
    pub(crate) class: usize,
    pub(crate) slot: u32,
    pub(crate) generation: u32,
    pub(crate) size: usize,
}

/// Owning handle to a pool block.
///
/// Dropping the handle releases one reference; the last release runs the destructor and returns
/// the block to its class free chain.
pub struct SlabRef {
    pub(crate) pool: Arc<PreMem>,
    pub(crate) raw: RawRef,
}

impl SlabRef {
    /// Requested payload size of this allocation.
    ///
    /// The backing block may be larger (the class block size); only `len` bytes are visible
    /// through [SlabRef::bytes].
    pub fn len(&self) -> usize {
        self.raw.size
    }

    pub fn is_empty(&self) -> bool {
        self.raw.size == 0
    }

    /// The copyable name of this block, for raw release paths and diagnostics.
    pub fn raw(&self) -> RawRef {
        self.raw
    }

    /// Shared view of the payload.
    pub fn bytes(&self) -> &[u8] {
        // The block is live while any handle exists, so the payload pointer is valid.  Aliasing
        // with writers through shared_ptr_mut is the caller's discipline, same as the C side.
        unsafe { std::slice::from_raw_parts(self.pool.payload_ptr(&self.raw), self.raw.size) }
    }

    /// Exclusive view of the payload; None when other handles exist.
    pub fn bytes_mut(&mut self) -> Option<&mut [u8]> {
        if self.nrefs() != 1 {
            return None;
        }
        Some(unsafe {
            std::slice::from_raw_parts_mut(self.pool.payload_ptr(&self.raw), self.raw.size)
        })
    }

    /// Raw payload pointer for storage that is shared between handles on one thread (MBuf views
    /// with independent cursors).
    ///
    /// # Safety
    ///
    /// The caller must keep reads and writes through the returned pointer on a single thread for
    /// SingleThread blocks, and must not let them overlap a `&[u8]` obtained from
    /// [SlabRef::bytes].
    pub unsafe fn shared_ptr_mut(&self) -> *mut u8 {
        self.pool.payload_ptr(&self.raw)
    }

    /// Take one more reference.  Fails when the count has already hit zero, which can only be
    /// observed through a revived or raw path.
    pub fn clone_ref(&self) -> Option<SlabRef> {
        self.pool.clone_ref_raw(&self.raw)
    }

    /// Current reference count.
    pub fn nrefs(&self) -> u32 {
        self.pool.slot(&self.raw).refs.load(Ordering::Acquire)
    }

    /// Whether this block carries a per-object mutex.
    pub fn is_shared(&self) -> bool {
        self.pool.is_shared_raw(&self.raw)
    }

    /// Release this reference.  Equivalent to dropping the handle; spelled out for call sites
    /// that want the release to read as an operation.
    pub fn release(self) {}
}

impl Drop for SlabRef {
    fn drop(&mut self) {
        self.pool.free_raw(self.raw);
    }
}

impl std::fmt::Debug for SlabRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlabRef")
            .field("class", &self.raw.class)
            .field("slot", &self.raw.slot)
            .field("generation", &self.raw.generation)
            .field("size", &self.raw.size)
            .finish()
    }
}

/// Handed to destructors so they can keep the dying block alive.
pub struct Reviver<'a> {
    pub(crate) pool: &'a Arc<PreMem>,
    pub(crate) raw: RawRef,
}

impl Reviver<'_> {
    /// Re-ref the block from inside its destructor.  The release that triggered the destructor
    /// observes the non-zero count afterwards and abandons reclamation.
    pub fn revive(&self) -> SlabRef {
        self.pool
            .slot(&self.raw)
            .refs
            .fetch_add(1, Ordering::AcqRel);
        SlabRef {
            pool: self.pool.clone(),
            raw: self.raw,
        }
    }
}
