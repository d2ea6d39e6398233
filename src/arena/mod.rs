// src/arena/mod.rs

//! Block arena for command storage.
//!
//! Commands are small and issued at very high rates, so instead of one heap
//! allocation per command they are packed into large blocks. Each block
//! carries an atomic reference count:
//!
//! - the arena holds one reference to its current block,
//! - every live allocation holds one reference to the block it came from.
//!
//! A block is freed when its count reaches zero, which may happen on any
//! thread (a worker retiring the last command of an old block frees memory the
//! producer allocated).
//!
//! ```text
//!  block base (64-aligned)
//!  ┌──────────────┬──────────────────────┬──────────────────────┬─────
//!  │ BlockHeader  │ slot 0               │ slot 1               │ ...
//!  │ refcount,    │ [pad][back][object]  │ [pad][back][object]  │
//!  │ capacity     │                      │                      │
//!  └──────────────┴──────────────────────┴──────────────────────┴─────
//! ```
//!
//! Every slot is padded to a whole number of cache lines so that commands
//! retired concurrently by different workers never share a line. The word
//! immediately before each object (`back`) holds the byte distance from the
//! object to its block header, which is how [`Arena::release`] finds the block
//! without any lookup structure.

use crate::error::PipelineError;
use std::alloc::{self, Layout};
use std::marker::PhantomData;
use std::mem::{self, ManuallyDrop};
use std::ops::{Deref, DerefMut};
use std::ptr::{self, NonNull};
use std::sync::atomic::{fence, AtomicUsize, Ordering};
use std::sync::Arc;


/// Cache line size. Slots and blocks are aligned to it.
pub const CACHE_LINE: usize = 64;

/// Size of the back-reference word stored before each object.
const BACK_REF: usize = mem::size_of::<usize>();

#[repr(C, align(64))]
struct BlockHeader {
    refcount: AtomicUsize,
    /// Usable bytes after the header.
    capacity: usize,
    counters: Arc<ArenaCounters>,
}

/// Offset of the first slot from the block base.
const DATA_OFFSET: usize = mem::size_of::<BlockHeader>();

#[derive(Debug, Default)]
struct ArenaCounters {
    blocks_allocated: AtomicUsize,
    blocks_freed: AtomicUsize,
    live_allocations: AtomicUsize,
}

/// Point-in-time arena counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize)]
pub struct ArenaStats {
    pub blocks_allocated: usize,
    pub blocks_freed: usize,
    pub live_allocations: usize,
}

#[inline]
fn round_up(value: usize, align: usize) -> Option<usize> {
    debug_assert!(align.is_power_of_two());
    Some(value.checked_add(align - 1)? & !(align - 1))
}

fn block_layout(capacity: usize) -> Layout {
    // Capacity was validated against isize::MAX when the block was created.
    Layout::from_size_align(DATA_OFFSET + capacity, CACHE_LINE)
        .unwrap_or_else(|_| unreachable!("block layout validated at creation"))
}

/// Drop one reference to `block`, freeing it on the last one.
///
/// # Safety
/// `block` must point to a live block and the caller must own one of its
/// references.
unsafe fn release_block(block: NonNull<BlockHeader>) {
    let header = block.as_ptr();
    if (*header).refcount.fetch_sub(1, Ordering::Release) != 1 {
        return;
    }
    // Pairs with the Release above on every other thread that dropped a
    // reference, so their last accesses to the block happen before the free.
    fence(Ordering::Acquire);
    let capacity = (*header).capacity;
    let counters = ptr::read(ptr::addr_of!((*header).counters));
    alloc::dealloc(header.cast::<u8>(), block_layout(capacity));
    counters.blocks_freed.fetch_add(1, Ordering::Relaxed);
}

/// Growable, reference-counted block allocator.
///
/// Allocation is single-threaded (the producer owns the arena); release is
/// thread-safe and does not need the arena at all.
pub struct Arena {
    current: Option<NonNull<BlockHeader>>,
    /// Next free byte in the current block's data area.
    cursor: usize,
    min_block_size: usize,
    counters: Arc<ArenaCounters>,
}

// Safety: the arena only touches its current block's cursor region, which no
// other thread writes; block headers are shared through atomics only.
unsafe impl Send for Arena {}

impl Arena {
    /// Arena whose blocks hold at least `min_block_size` bytes.
    pub fn new(min_block_size: usize) -> Self {
        Self {
            current: None,
            cursor: 0,
            min_block_size: min_block_size.max(CACHE_LINE),
            counters: Arc::new(ArenaCounters::default()),
        }
    }

    /// Storage for one object with `layout`, placed in its own cache-line-padded
    /// slot. Starts a new block when the current one is too full.
    ///
    /// The returned memory is uninitialized. Running out of memory aborts via
    /// [`std::alloc::handle_alloc_error`].
    pub fn allocate(&mut self, layout: Layout) -> Result<NonNull<u8>, PipelineError> {
        let unsupported = || PipelineError::UnsupportedLayout {
            size: layout.size(),
            align: layout.align(),
        };
        if layout.align() > CACHE_LINE {
            return Err(unsupported());
        }
        // The object sits after the back-reference word, at its own alignment.
        let object_offset = round_up(BACK_REF, layout.align()).ok_or_else(unsupported)?;
        let slot_size = object_offset
            .checked_add(layout.size())
            .and_then(|s| round_up(s, CACHE_LINE))
            .ok_or_else(unsupported)?;

        let block = match self.current {
            Some(block) if self.cursor + slot_size <= unsafe { (*block.as_ptr()).capacity } => {
                block
            }
            _ => self.start_block(slot_size).ok_or_else(unsupported)?,
        };

        // Safety: the slot lies inside the block's data area (checked above),
        // and the back-reference word is aligned because `object_offset` is a
        // multiple of both the object alignment and the word size.
        unsafe {
            let base = block.as_ptr().cast::<u8>();
            let object = base.add(DATA_OFFSET + self.cursor + object_offset);
            let distance = object as usize - base as usize;
            object.sub(BACK_REF).cast::<usize>().write(distance);

            (*block.as_ptr()).refcount.fetch_add(1, Ordering::Relaxed);
            self.cursor += slot_size;
            self.counters.live_allocations.fetch_add(1, Ordering::Relaxed);
            Ok(NonNull::new_unchecked(object))
        }
    }

    /// Give back storage returned by [`allocate`](Self::allocate).
    ///
    /// May be called from any thread, before or after the arena itself is
    /// dropped.
    ///
    /// # Safety
    /// `ptr` must come from `allocate` on some arena and must not have been
    /// released already. Any object stored there must already be dropped.
    pub unsafe fn release(ptr: NonNull<u8>) {
        let object = ptr.as_ptr();
        let distance = object.sub(BACK_REF).cast::<usize>().read();
        let block = NonNull::new_unchecked(object.sub(distance).cast::<BlockHeader>());
        let counters = &(*block.as_ptr()).counters;
        counters.live_allocations.fetch_sub(1, Ordering::Relaxed);
        release_block(block);
    }

    /// Move `value` into the arena.
    pub fn alloc<T>(&mut self, value: T) -> Result<ArenaBox<T>, PipelineError> {
        let ptr = self.allocate(Layout::new::<T>())?.cast::<T>();
        // Safety: freshly allocated, correctly sized and aligned for T.
        unsafe {
            ptr.as_ptr().write(value);
            Ok(ArenaBox::from_raw(ptr))
        }
    }

    pub fn stats(&self) -> ArenaStats {
        ArenaStats {
            blocks_allocated: self.counters.blocks_allocated.load(Ordering::Relaxed),
            blocks_freed: self.counters.blocks_freed.load(Ordering::Relaxed),
            live_allocations: self.counters.live_allocations.load(Ordering::Relaxed),
        }
    }

    /// Drop the arena's reference to the current block and open a new one
    /// with room for at least `slot_size` bytes. `None` if the size overflows.
    fn start_block(&mut self, slot_size: usize) -> Option<NonNull<BlockHeader>> {
        let capacity = round_up(slot_size.max(self.min_block_size), CACHE_LINE)?;
        let layout = Layout::from_size_align(DATA_OFFSET.checked_add(capacity)?, CACHE_LINE).ok()?;

        self.retire_current();

        // Safety: layout has non-zero size.
        let raw = unsafe { alloc::alloc(layout) };
        let Some(block) = NonNull::new(raw.cast::<BlockHeader>()) else {
            alloc::handle_alloc_error(layout);
        };
        // Safety: `raw` is a fresh allocation aligned for BlockHeader.
        unsafe {
            block.as_ptr().write(BlockHeader {
                refcount: AtomicUsize::new(1),
                capacity,
                counters: Arc::clone(&self.counters),
            });
        }
        self.counters.blocks_allocated.fetch_add(1, Ordering::Relaxed);
        self.current = Some(block);
        self.cursor = 0;
        Some(block)
    }

    fn retire_current(&mut self) {
        if let Some(block) = self.current.take() {
            // Safety: the arena owns one reference to its current block.
            unsafe { release_block(block) };
        }
    }
}

impl Drop for Arena {
    fn drop(&mut self) {
        self.retire_current();
    }
}

impl std::fmt::Debug for Arena {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Arena")
            .field("min_block_size", &self.min_block_size)
            .field("cursor", &self.cursor)
            .field("stats", &self.stats())
            .finish()
    }
}

/// Owning pointer to a value stored in an [`Arena`].
///
/// Dropping it drops the value and releases its slot, possibly freeing the
/// block. Works for unsized targets such as `dyn PixelCommand`.
pub struct ArenaBox<T: ?Sized> {
    ptr: NonNull<T>,
    _owns: PhantomData<T>,
}

// Safety: ArenaBox owns its value like Box does; releasing the slot is
// thread-safe.
unsafe impl<T: ?Sized + Send> Send for ArenaBox<T> {}
unsafe impl<T: ?Sized + Sync> Sync for ArenaBox<T> {}

impl<T: ?Sized> ArenaBox<T> {
    /// # Safety
    /// `ptr` must point to an initialized value living in an arena slot, and
    /// ownership of that value and slot passes to the returned box.
    pub(crate) unsafe fn from_raw(ptr: NonNull<T>) -> Self {
        Self {
            ptr,
            _owns: PhantomData,
        }
    }

    /// Give up ownership without dropping. Pair with [`from_raw`](Self::from_raw).
    pub(crate) fn into_raw(this: Self) -> NonNull<T> {
        ManuallyDrop::new(this).ptr
    }
}

impl<T: ?Sized> Deref for ArenaBox<T> {
    type Target = T;

    fn deref(&self) -> &T {
        // Safety: the box owns an initialized value.
        unsafe { self.ptr.as_ref() }
    }
}

impl<T: ?Sized> DerefMut for ArenaBox<T> {
    fn deref_mut(&mut self) -> &mut T {
        // Safety: the box owns an initialized value uniquely.
        unsafe { self.ptr.as_mut() }
    }
}

impl<T: ?Sized> Drop for ArenaBox<T> {
    fn drop(&mut self) {
        // Safety: we own the value and its slot; both are released once.
        unsafe {
            ptr::drop_in_place(self.ptr.as_ptr());
            Arena::release(self.ptr.cast::<u8>());
        }
    }
}

impl<T: ?Sized + std::fmt::Debug> std::fmt::Debug for ArenaBox<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        (**self).fmt(f)
    }
}
