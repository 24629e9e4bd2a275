use std::alloc::Layout;
use std::cell::UnsafeCell;
use std::fmt::Write as _;
use std::panic::Location;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use arrayvec::ArrayString;

use crate::handle::{Destructor, RawRef, Reviver, Sharing, SlabRef};
use crate::{class_for_size, Error, Result, CLASS_SIZES, NUM_CLASSES};

/// Capacity of one provenance record, matching the fixed debug record of the class table design.
const PROVENANCE_CAP: usize = 80;

/// Per-class block counts and pool-wide options.
#[derive(Clone, Debug)]
pub struct PreMemConfig {
    /// Blocks carved for each class in [CLASS_SIZES] order.
    pub class_counts: [u32; NUM_CLASSES],

    /// Blocks in the mutex-slot class.
    pub mutex_count: u32,

    /// Record allocation provenance and maintain per-class used chains.
    pub debug: bool,
}

impl Default for PreMemConfig {
    fn default() -> Self {
        // The production profile: deep pools for the small control-plane classes, a handful of
        // bulk blocks.
        PreMemConfig {
            class_counts: [
                1010, 1010, 1010, 1010, 1010, 1010, 1010, 1010, 1010, 1010, 10, 2, 1,
            ],
            mutex_count: 1024,
            debug: false,
        }
    }
}

impl PreMemConfig {
    /// A small pool with debug tracking on, sized for tests.
    pub fn compact() -> Self {
        PreMemConfig {
            class_counts: [64, 64, 64, 64, 64, 64, 32, 32, 16, 16, 4, 2, 1],
            mutex_count: 16,
            debug: true,
        }
    }
}

/// One contiguous payload carve for a class.  Freed only when the pool itself drops.
struct Storage {
    layout: Layout,
    data: NonNull<u8>,
}

impl Storage {
    fn carve(block_size: usize, count: usize) -> Storage {
        let bytes = block_size.checked_mul(count).unwrap();
        let layout = Layout::from_size_align(bytes, 16).unwrap();
        if bytes == 0 {
            return Storage {
                layout,
                data: NonNull::dangling(),
            };
        }
        // Init-time allocation; an OOM here means the host cannot run this node at all.
        let data = unsafe { std::alloc::alloc(layout) };
        Storage {
            layout,
            data: NonNull::new(data).expect("pool carve failed at init"),
        }
    }
}

unsafe impl Send for Storage {}
unsafe impl Sync for Storage {}

impl Drop for Storage {
    fn drop(&mut self) {
        if self.layout.size() > 0 {
            unsafe { std::alloc::dealloc(self.data.as_ptr(), self.layout) };
        }
    }
}

struct Provenance {
    text: ArrayString<PROVENANCE_CAP>,
}

/// Mutable slot bookkeeping.
///
/// Every write happens either under the class chain mutex (chain fields, init, reclaim) or
/// before the block's handle is published (never both), so reads under the chain mutex or on a
/// live block's immutable-while-live fields (dtor, mutex_slot, live_size) are sound.
#[derive(Default)]
struct SlotState {
    dtor: Option<Destructor>,
    mutex_slot: Option<u32>,
    live_size: usize,
    next_free: Option<u32>,
    used_prev: Option<u32>,
    used_next: Option<u32>,
    provenance: Option<Provenance>,
}

pub(crate) struct Slot {
    /// Zero exactly while the block sits on the free chain.
    pub(crate) refs: AtomicU32,

    /// Bumped at each reclaim; stale handles are detected by comparing against it.
    pub(crate) generation: AtomicU32,

    state: UnsafeCell<SlotState>,
}

// Slot is shared across threads; state is guarded as documented on SlotState.
unsafe impl Sync for Slot {}

struct Chains {
    free_head: Option<u32>,
    free_tail: Option<u32>,
    used_head: Option<u32>,
    used_tail: Option<u32>,
    used: u32,
    peak: u32,
}

struct ClassPool {
    block_size: usize,
    total: u32,
    storage: Storage,
    slots: Box<[Slot]>,
    chains: Mutex<Chains>,
}

impl ClassPool {
    fn carve(block_size: usize, count: u32) -> ClassPool {
        let mut slots = Vec::with_capacity(count as usize);
        for i in 0..count {
            let next = if i + 1 < count { Some(i + 1) } else { None };
            slots.push(Slot {
                refs: AtomicU32::new(0),
                generation: AtomicU32::new(0),
                state: UnsafeCell::new(SlotState {
                    next_free: next,
                    ..Default::default()
                }),
            });
        }

        ClassPool {
            block_size,
            total: count,
            storage: Storage::carve(block_size, count as usize),
            slots: slots.into_boxed_slice(),
            chains: Mutex::new(Chains {
                free_head: if count > 0 { Some(0) } else { None },
                free_tail: count.checked_sub(1),
                used_head: None,
                used_tail: None,
                used: 0,
                peak: 0,
            }),
        }
    }

    /// The documented SlotState access rules make this the single mutation point; callers hold
    /// the chain mutex or exclusivity as described there.
    #[allow(clippy::mut_from_ref)]
    unsafe fn state_mut(&self, idx: u32) -> &mut SlotState {
        &mut *self.slots[idx as usize].state.get()
    }

    /// Pop the free head and publish the block with refcount one.
    fn allocate_slot(
        &self,
        dtor: Option<Destructor>,
        size: usize,
        provenance: Option<Provenance>,
        track_used: bool,
    ) -> Option<u32> {
        let mut chains = self.chains.lock().unwrap();
        let idx = chains.free_head?;

        unsafe {
            let st = self.state_mut(idx);
            chains.free_head = st.next_free.take();
            st.dtor = dtor;
            st.mutex_slot = None;
            st.live_size = size;
            st.provenance = provenance;
        }
        if chains.free_head.is_none() {
            chains.free_tail = None;
        }

        chains.used += 1;
        chains.peak = chains.peak.max(chains.used);

        if track_used {
            unsafe {
                let st = self.state_mut(idx);
                st.used_prev = chains.used_tail;
                st.used_next = None;
                if let Some(tail) = chains.used_tail {
                    self.state_mut(tail).used_next = Some(idx);
                } else {
                    chains.used_head = Some(idx);
                }
                chains.used_tail = Some(idx);
            }
        }

        self.slots[idx as usize].refs.store(1, Ordering::Release);
        Some(idx)
    }

    /// Store the mutex slot on a block this thread just allocated and still exclusively owns.
    fn set_mutex_slot(&self, idx: u32, mutex_slot: Option<u32>) {
        let _chains = self.chains.lock().unwrap();
        unsafe { self.state_mut(idx).mutex_slot = mutex_slot };
    }

    /// Return a block to the tail of the free chain.  FIFO by release keeps the most recently
    /// freed block circulating last, so the chain cycles through the whole carve.
    fn reclaim_slot(&self, idx: u32, track_used: bool) {
        let mut chains = self.chains.lock().unwrap();

        unsafe {
            let st = self.state_mut(idx);
            st.next_free = None;
            st.provenance = None;
        }
        if let Some(tail) = chains.free_tail {
            unsafe { self.state_mut(tail).next_free = Some(idx) };
        } else {
            chains.free_head = Some(idx);
        }
        chains.free_tail = Some(idx);
        chains.used -= 1;

        if track_used {
            unsafe {
                let st = self.state_mut(idx);
                let prev = st.used_prev.take();
                let next = st.used_next.take();
                match prev {
                    Some(p) => self.state_mut(p).used_next = next,
                    None => chains.used_head = next,
                }
                match next {
                    Some(n) => self.state_mut(n).used_prev = prev,
                    None => chains.used_tail = prev,
                }
            }
        }
    }

    fn counts(&self) -> (u32, u32, u32) {
        let chains = self.chains.lock().unwrap();
        (self.total - chains.used, chains.used, chains.peak)
    }
}

/// The mutex-slot class: a carve of plain mutexes handed to Shared-mode blocks.
struct MutexPool {
    slots: Box<[Mutex<()>]>,
    free: Mutex<Vec<u32>>,
    peak: AtomicU32,
}

impl MutexPool {
    fn carve(count: u32) -> MutexPool {
        let slots = (0..count).map(|_| Mutex::new(())).collect::<Vec<_>>();
        // Popping from the back keeps acquire O(1); the mutex class has no FIFO requirement.
        let free = (0..count).rev().collect::<Vec<_>>();
        MutexPool {
            slots: slots.into_boxed_slice(),
            free: Mutex::new(free),
            peak: AtomicU32::new(0),
        }
    }

    fn acquire(&self) -> Option<u32> {
        let mut free = self.free.lock().unwrap();
        let idx = free.pop()?;
        let used = self.slots.len() as u32 - free.len() as u32;
        self.peak.fetch_max(used, Ordering::Relaxed);
        Some(idx)
    }

    fn release(&self, idx: u32) {
        self.free.lock().unwrap().push(idx);
    }

    fn counts(&self) -> (u32, u32, u32) {
        let free = self.free.lock().unwrap().len() as u32;
        let total = self.slots.len() as u32;
        (free, total - free, self.peak.load(Ordering::Relaxed))
    }
}

/// The process slab pool.  Built once, shared by Arc, never torn down.
pub struct PreMem {
    classes: Vec<ClassPool>,
    mutexes: MutexPool,
    debug: bool,
    alloc_seq: AtomicU64,
}

impl PreMem {
    pub fn new(config: PreMemConfig) -> Arc<PreMem> {
        let classes = CLASS_SIZES
            .iter()
            .zip(config.class_counts.iter())
            .map(|(&size, &count)| ClassPool::carve(size, count))
            .collect();

        Arc::new(PreMem {
            classes,
            mutexes: MutexPool::carve(config.mutex_count),
            debug: config.debug,
            alloc_seq: AtomicU64::new(0),
        })
    }

    /// Allocate `size` bytes from the smallest class that fits.
    ///
    /// The payload is uninitialized from the caller's point of view (it holds whatever the
    /// previous occupant left).  Use [PreMem::zalloc] or [PreMem::dalloc] for defined contents.
    #[track_caller]
    pub fn alloc(
        self: &Arc<Self>,
        size: usize,
        dtor: Option<Destructor>,
        sharing: Sharing,
    ) -> Result<SlabRef> {
        self.alloc_located(size, dtor, sharing, Location::caller())
    }

    /// alloc + zero fill.
    #[track_caller]
    pub fn zalloc(
        self: &Arc<Self>,
        size: usize,
        dtor: Option<Destructor>,
        sharing: Sharing,
    ) -> Result<SlabRef> {
        let r = self.alloc_located(size, dtor, sharing, Location::caller())?;
        unsafe { std::ptr::write_bytes(self.payload_ptr(&r.raw), 0, size) };
        Ok(r)
    }

    /// alloc + copy of `src`.
    #[track_caller]
    pub fn dalloc(
        self: &Arc<Self>,
        src: &[u8],
        dtor: Option<Destructor>,
        sharing: Sharing,
    ) -> Result<SlabRef> {
        let r = self.alloc_located(src.len(), dtor, sharing, Location::caller())?;
        unsafe { std::ptr::copy_nonoverlapping(src.as_ptr(), self.payload_ptr(&r.raw), src.len()) };
        Ok(r)
    }

    /// dalloc of a larger (or smaller) block followed by a release of the old one.  Destructor
    /// and sharing mode carry over; the release of `old` goes down the normal free path,
    /// destructor included, exactly as if the caller had dropped it.
    #[track_caller]
    pub fn realloc(self: &Arc<Self>, old: SlabRef, new_size: usize) -> Result<SlabRef> {
        let (dtor, sharing) = {
            let st = unsafe { &*self.classes[old.raw.class].slots[old.raw.slot as usize].state.get() };
            let sharing = if st.mutex_slot.is_some() {
                Sharing::Shared
            } else {
                Sharing::SingleThread
            };
            (st.dtor, sharing)
        };

        let new = self.alloc_located(new_size, dtor, sharing, Location::caller())?;
        let copy = old.len().min(new_size);
        unsafe {
            std::ptr::copy_nonoverlapping(
                self.payload_ptr(&old.raw),
                self.payload_ptr(&new.raw),
                copy,
            );
        }
        drop(old);
        Ok(new)
    }

    fn alloc_located(
        self: &Arc<Self>,
        size: usize,
        dtor: Option<Destructor>,
        sharing: Sharing,
        caller: &'static Location<'static>,
    ) -> Result<SlabRef> {
        let class = class_for_size(size).ok_or(Error::TooLarge { size })?;

        let provenance = if self.debug {
            let seq = self.alloc_seq.fetch_add(1, Ordering::Relaxed);
            Some(format_provenance(caller, seq))
        } else {
            None
        };

        let pool = &self.classes[class];
        let slot = pool
            .allocate_slot(dtor, size, provenance, self.debug)
            .ok_or_else(|| {
                log::error!(
                    "class {class} (block size {}) has no free block for a {size} byte request",
                    pool.block_size
                );
                Error::NoMemory {
                    class,
                    block_size: pool.block_size,
                }
            })?;

        if sharing == Sharing::Shared {
            match self.mutexes.acquire() {
                Some(m) => pool.set_mutex_slot(slot, Some(m)),
                None => {
                    // The payload block goes back; the allocation as a whole fails.
                    log::error!("mutex slot pool is empty, failing a shared allocation");
                    self.classes[class].slots[slot as usize]
                        .refs
                        .store(0, Ordering::Release);
                    self.classes[class].slots[slot as usize]
                        .generation
                        .fetch_add(1, Ordering::AcqRel);
                    pool.reclaim_slot(slot, self.debug);
                    return Err(Error::NoMutexSlot);
                }
            }
        }

        let generation = self.classes[class].slots[slot as usize]
            .generation
            .load(Ordering::Acquire);
        Ok(SlabRef {
            pool: self.clone(),
            raw: RawRef {
                class,
                slot,
                generation,
                size,
            },
        })
    }

    /// Release one reference through a raw block name.
    ///
    /// The normal path is dropping a [SlabRef]; this entry point exists for stale-handle flows
    /// and is where double frees are detected: a zero refcount or a stale generation logs an
    /// error and touches nothing.
    pub fn release_raw(self: &Arc<Self>, raw: RawRef) {
        self.free_raw(raw)
    }

    pub(crate) fn free_raw(self: &Arc<Self>, raw: RawRef) {
        let slot = self.slot(&raw);
        if slot.generation.load(Ordering::Acquire) != raw.generation {
            log::error!(
                "release of class {} slot {} with stale generation, double free suspected",
                raw.class,
                raw.slot
            );
            return;
        }

        let mutex_idx = unsafe { (*slot.state.get()).mutex_slot };
        let guard = mutex_idx.map(|i| self.mutexes.slots[i as usize].lock().unwrap());

        if slot.refs.load(Ordering::Acquire) == 0 {
            log::error!(
                "release of class {} slot {} whose refcount is already zero",
                raw.class,
                raw.slot
            );
            return;
        }

        if slot.refs.fetch_sub(1, Ordering::AcqRel) - 1 > 0 {
            return;
        }

        // Final release: destructor first, with no chain lock held.
        let (dtor, live_size) = unsafe {
            let st = &*slot.state.get();
            (st.dtor, st.live_size)
        };
        if let Some(dtor) = dtor {
            let reviver = Reviver { pool: self, raw };
            let payload =
                unsafe { std::slice::from_raw_parts_mut(self.payload_ptr(&raw), live_size) };
            dtor(payload, &reviver);

            if slot.refs.load(Ordering::Acquire) > 0 {
                // The destructor revived the block; leave it allocated.
                return;
            }
        }

        slot.generation.fetch_add(1, Ordering::AcqRel);
        drop(guard);
        if let Some(i) = mutex_idx {
            self.mutexes.release(i);
        }
        self.classes[raw.class].reclaim_slot(raw.slot, self.debug);
    }

    pub(crate) fn clone_ref_raw(self: &Arc<Self>, raw: &RawRef) -> Option<SlabRef> {
        let slot = self.slot(raw);
        if slot.generation.load(Ordering::Acquire) != raw.generation {
            return None;
        }

        let mutex_idx = unsafe { (*slot.state.get()).mutex_slot };
        let _guard = mutex_idx.map(|i| self.mutexes.slots[i as usize].lock().unwrap());

        let mut refs = slot.refs.load(Ordering::Acquire);
        loop {
            if refs == 0 {
                log::error!("ref of class {} slot {} whose refcount is zero", raw.class, raw.slot);
                return None;
            }
            match slot
                .refs
                .compare_exchange(refs, refs + 1, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => break,
                Err(cur) => refs = cur,
            }
        }

        Some(SlabRef {
            pool: self.clone(),
            raw: *raw,
        })
    }

    pub(crate) fn slot(&self, raw: &RawRef) -> &Slot {
        &self.classes[raw.class].slots[raw.slot as usize]
    }

    pub(crate) fn payload_ptr(&self, raw: &RawRef) -> *mut u8 {
        let pool = &self.classes[raw.class];
        unsafe {
            pool.storage
                .data
                .as_ptr()
                .add(pool.block_size * raw.slot as usize)
        }
    }

    pub(crate) fn is_shared_raw(&self, raw: &RawRef) -> bool {
        unsafe { (*self.slot(raw).state.get()).mutex_slot.is_some() }
    }

    /// Free or used count of one class; `None` for an out-of-range class.
    pub fn get_count(&self, class: usize, unused: bool) -> Option<u32> {
        let (free, used, _) = self.classes.get(class)?.counts();
        Some(if unused { free } else { used })
    }

    /// Log a per-class usage table.
    pub fn stat(&self) {
        let mut table = String::new();
        let _ = writeln!(table, "  i     size  available  unavailable    peak");
        for (i, c) in self.classes.iter().enumerate() {
            let (free, used, peak) = c.counts();
            let _ = writeln!(table, "{i:3}  {:7}  {free:9}  {used:11}  {peak:6}", c.block_size);
        }
        let (free, used, peak) = self.mutexes.counts();
        let _ = writeln!(table, "mutex pool:  {free:9}  {used:11}  {peak:6}");
        log::info!("premem statistics:\n{table}");
    }

    /// Dump provenance of live blocks in one class, or in all classes for `None`.
    ///
    /// Requires a pool built with `debug: true`; otherwise a note is logged and nothing else
    /// happens.
    pub fn used_info(&self, class: Option<usize>) {
        if !self.debug {
            log::info!("used_info requires a pool built with debug tracking on");
            return;
        }

        let range = match class {
            Some(i) if i < self.classes.len() => i..i + 1,
            Some(i) => {
                log::error!("class {i} is out of range");
                return;
            }
            None => 0..self.classes.len(),
        };

        for i in range {
            let pool = &self.classes[i];
            let chains = pool.chains.lock().unwrap();
            if chains.used == 0 {
                log::info!("used blocks (size={}): none", pool.block_size);
                continue;
            }
            let mut dump = String::new();
            let mut cursor = chains.used_head;
            while let Some(idx) = cursor {
                let st = unsafe { &*pool.slots[idx as usize].state.get() };
                if let Some(p) = &st.provenance {
                    let _ = writeln!(dump, "{}", p.text);
                }
                cursor = st.used_next;
            }
            log::info!(
                "used blocks (size={}), count={}:\n{dump}",
                pool.block_size,
                chains.used
            );
        }
    }
}

fn format_provenance(caller: &Location<'_>, seq: u64) -> Provenance {
    let file = caller.file().rsplit('/').next().unwrap_or(caller.file());
    let mut text = ArrayString::new();
    let _ = write!(text, "{file}:{}:#{seq}", caller.line());
    Provenance { text }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::AtomicU32 as Counter;

    fn pool() -> Arc<PreMem> {
        PreMem::new(PreMemConfig::compact())
    }

    #[test]
    fn alloc_free_cycle() {
        let pm = pool();
        let r = pm.alloc(40, None, Sharing::SingleThread).unwrap();
        assert_eq!(r.len(), 40);
        assert_eq!(r.nrefs(), 1);
        assert_eq!(pm.get_count(2, false), Some(1)); // 40 bytes lands in the 64 byte class
        drop(r);
        assert_eq!(pm.get_count(2, false), Some(0));
    }

    #[test]
    fn refcount_and_destructor() {
        static CALLS: Counter = Counter::new(0);
        fn dtor(payload: &mut [u8], _r: &Reviver<'_>) {
            assert_eq!(payload.len(), 64);
            CALLS.fetch_add(1, Ordering::Relaxed);
        }

        let pm = pool();
        let r1 = pm.alloc(64, Some(dtor), Sharing::Shared).unwrap();
        assert!(r1.is_shared());
        let r2 = r1.clone_ref().unwrap();
        assert_eq!(r1.nrefs(), 2);

        drop(r1);
        assert_eq!(r2.nrefs(), 1);
        assert_eq!(CALLS.load(Ordering::Relaxed), 0);

        drop(r2);
        assert_eq!(CALLS.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn double_free_is_detected() {
        let pm = pool();
        let r = pm.alloc(16, None, Sharing::SingleThread).unwrap();
        let raw = r.raw();
        drop(r);

        // The block is already back on the free chain; a second release through the stale name
        // must not disturb the counts.
        let before = pm.get_count(0, true).unwrap();
        pm.release_raw(raw);
        assert_eq!(pm.get_count(0, true), Some(before));
    }

    #[test]
    fn freed_blocks_requeue_fifo() {
        let mut config = PreMemConfig::compact();
        config.class_counts[0] = 3;
        let pm = PreMem::new(config);

        let a = pm.alloc(8, None, Sharing::SingleThread).unwrap();
        let b = pm.alloc(8, None, Sharing::SingleThread).unwrap();
        let c = pm.alloc(8, None, Sharing::SingleThread).unwrap();
        let (sa, sb) = (a.raw().slot, b.raw().slot);
        assert!(pm.alloc(8, None, Sharing::SingleThread).is_err());

        // Release b then a: the free chain is now [b, a], and allocation pops in that order.
        drop(b);
        drop(a);
        let first = pm.alloc(8, None, Sharing::SingleThread).unwrap();
        let second = pm.alloc(8, None, Sharing::SingleThread).unwrap();
        assert_eq!(first.raw().slot, sb);
        assert_eq!(second.raw().slot, sa);
        drop(c);
    }

    #[test]
    fn exhaustion_is_terminal() {
        let pm = pool();
        // The compact profile has exactly one 1 MiB block.
        let big = pm.alloc(1 << 20, None, Sharing::SingleThread).unwrap();
        match pm.alloc(1 << 20, None, Sharing::SingleThread) {
            Err(Error::NoMemory { class: 12, .. }) => {}
            other => panic!("expected NoMemory, got {other:?}"),
        }
        drop(big);
        assert!(pm.alloc(1 << 20, None, Sharing::SingleThread).is_ok());
    }

    #[test]
    fn oversized_request_fails() {
        let pm = pool();
        assert!(matches!(
            pm.alloc((1 << 20) + 1, None, Sharing::SingleThread),
            Err(Error::TooLarge { .. })
        ));
    }

    #[test]
    fn mutex_exhaustion_returns_payload() {
        let mut config = PreMemConfig::compact();
        config.mutex_count = 1;
        let pm = PreMem::new(config);

        let held = pm.alloc(16, None, Sharing::Shared).unwrap();
        let free_before = pm.get_count(0, true).unwrap();
        match pm.alloc(16, None, Sharing::Shared) {
            Err(Error::NoMutexSlot) => {}
            other => panic!("expected NoMutexSlot, got {other:?}"),
        }
        // The payload block taken for the failed allocation went back.
        assert_eq!(pm.get_count(0, true), Some(free_before));
        drop(held);
        assert!(pm.alloc(16, None, Sharing::Shared).is_ok());
    }

    #[test]
    fn zalloc_and_dalloc_contents() {
        let pm = pool();
        let z = pm.zalloc(32, None, Sharing::SingleThread).unwrap();
        assert!(z.bytes().iter().all(|&b| b == 0));

        let d = pm.dalloc(b"signaling", None, Sharing::SingleThread).unwrap();
        assert_eq!(d.bytes(), b"signaling");
    }

    #[test]
    fn realloc_copies_and_inherits() {
        static CALLS: Counter = Counter::new(0);
        fn dtor(_p: &mut [u8], _r: &Reviver<'_>) {
            CALLS.fetch_add(1, Ordering::Relaxed);
        }

        let pm = pool();
        let old = pm.dalloc(b"abc", Some(dtor), Sharing::SingleThread).unwrap();
        let new = pm.realloc(old, 100).unwrap();
        // The release of the old block ran its destructor, same as any final free.
        assert_eq!(CALLS.load(Ordering::Relaxed), 1);
        assert_eq!(&new.bytes()[..3], b"abc");
        assert_eq!(new.len(), 100);

        drop(new);
        assert_eq!(CALLS.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn destructor_can_revive() {
        static REVIVED: Counter = Counter::new(0);
        fn dtor(_p: &mut [u8], r: &Reviver<'_>) {
            // Revive exactly once; the second final release lets the block die.
            if REVIVED.fetch_add(1, Ordering::Relaxed) == 0 {
                std::mem::forget(r.revive());
            }
        }

        let pm = pool();
        let r = pm.alloc(16, Some(dtor), Sharing::SingleThread).unwrap();
        let raw = r.raw();
        let used_class = raw.class;
        drop(r);
        // Revived: still accounted as used.
        assert_eq!(REVIVED.load(Ordering::Relaxed), 1);
        assert_eq!(pm.get_count(used_class, false), Some(1));

        // Release the reference the destructor kept; this time it dies for real.
        pm.release_raw(raw);
        assert_eq!(REVIVED.load(Ordering::Relaxed), 2);
        assert_eq!(pm.get_count(used_class, false), Some(0));
    }

    #[test]
    fn bytes_mut_requires_exclusivity() {
        let pm = pool();
        let mut r = pm.alloc(16, None, Sharing::SingleThread).unwrap();
        assert!(r.bytes_mut().is_some());
        let r2 = r.clone_ref().unwrap();
        assert!(r.bytes_mut().is_none());
        drop(r2);
        assert!(r.bytes_mut().is_some());
    }

    #[test]
    fn stat_and_used_info_smoke() {
        let _ = env_logger::builder().is_test(true).try_init();
        let pm = pool();
        let _a = pm.alloc(64, None, Sharing::SingleThread).unwrap();
        let _b = pm.alloc(128, None, Sharing::SingleThread).unwrap();
        pm.stat();
        pm.used_info(None);
        pm.used_info(Some(2));
    }
}
