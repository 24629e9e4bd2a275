//! Pre-allocated, size-classed slab memory with reference counting.
//!
//! A signaling node allocates and frees small control-plane objects at a very high rate, and it
//! must keep doing so for months.  Going to the system allocator for every transaction invites
//! fragmentation and unpredictable latency, so this crate carves every byte it will ever hand out
//! once, at pool construction, into a fixed table of size classes.  Allocation pops a block off a
//! class free chain; release pushes it back.  Both are O(1) and the pool never grows and never
//! returns memory to the OS.  Running a class dry is a hard allocation failure, not a fallback.
//!
//! Blocks are reference counted.  [SlabRef] is the owning handle: cloning a reference bumps the
//! count, dropping the last handle runs the block's destructor (if any) and reclaims the block.
//! A destructor may revive the block through the [Reviver] it is handed, in which case
//! reclamation is abandoned.
//!
//! Blocks allocated with [Sharing::Shared] draw a mutex from a dedicated mutex-slot pool; that
//! mutex serializes refcount observation and destructor dispatch across threads.  Blocks
//! allocated [Sharing::SingleThread] skip the mutex entirely and must not be shared.  The
//! mutex-slot pool can itself run dry, which fails the allocation that asked for it.
//!
//! Lock order is always object mutex first, class chain mutex second, never the reverse.
mod handle;
mod pool;

pub use handle::{Destructor, RawRef, Reviver, Sharing, SlabRef};
pub use pool::{PreMem, PreMemConfig};

/// Payload size of each class, in bytes.
///
/// The table is fixed at compile time; only the per-class block counts are configurable.  Sizes
/// above 8 KiB are sparse on purpose: big blocks exist for bulk buffers (whole XML documents,
/// file reads), not for churn.
pub const CLASS_SIZES: [usize; NUM_CLASSES] = [
    16, 32, 64, 128, 256, 512, 1024, 2048, 4096, 8192, 65536, 262144, 1048576,
];

/// Number of payload size classes, excluding the mutex-slot class.
pub const NUM_CLASSES: usize = 13;

/// Largest allocatable payload.
pub const MAX_ALLOC_SIZE: usize = CLASS_SIZES[NUM_CLASSES - 1];

/// Errors surfaced by the pool.
///
/// Exhaustion is terminal for the failing call: the pool does not degrade to the system
/// allocator.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("class {class} (block size {block_size}) has no free block")]
    NoMemory { class: usize, block_size: usize },

    #[error("requested size {size} exceeds the largest class ({MAX_ALLOC_SIZE})")]
    TooLarge { size: usize },

    #[error("mutex slot pool exhausted")]
    NoMutexSlot,
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Smallest class whose block size holds `size`, or None when nothing does.
pub(crate) fn class_for_size(size: usize) -> Option<usize> {
    CLASS_SIZES.iter().position(|&s| s >= size)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn class_selection() {
        assert_eq!(class_for_size(0), Some(0));
        assert_eq!(class_for_size(16), Some(0));
        assert_eq!(class_for_size(17), Some(1));
        assert_eq!(class_for_size(8192), Some(9));
        assert_eq!(class_for_size(8193), Some(10));
        assert_eq!(class_for_size(MAX_ALLOC_SIZE), Some(12));
        assert_eq!(class_for_size(MAX_ALLOC_SIZE + 1), None);
    }
}
