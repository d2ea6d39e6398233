// src/queue.rs

//! Shared command ring.
//!
//! One producer, `N` readers, and every reader consumes every slot.
//!
//! ```text
//!        slowest reader     fastest reader    writer_index   producer
//!              │                  │                │             │
//!   ┌──────────▼──────────────────▼────────────────▼─────────────▼────────┐
//!   │ retired  │ unread by some   │ unread by all  │ unpublished │ retired │
//!   └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! - The producer is the only thread that writes slots and `writer_index`.
//! - Reader `i` is the only thread that writes `readers[i].index`.
//! - A slot may be overwritten once every reader has published an index past
//!   it. One slot is always left empty so a full ring is distinguishable from
//!   an empty one.
//!
//! Indices are published in batches of `fragment_size` with Release stores and
//! read with Acquire loads, so the command stored in a slot happens before any
//! reader runs it, and a reader's last access to a slot happens before the
//! producer reuses it.

use crate::command::CommandBox;
use crate::error::PipelineError;
use crate::sync::{Doorbell, Event};
use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

/// Pad to cache line to prevent false sharing
#[repr(align(64))]
#[derive(Debug, Default)]
pub(crate) struct CachePadded<T>(pub T);

impl<T> std::ops::Deref for CachePadded<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.0
    }
}

/// Everything one reader (worker) shares with the producer.
#[derive(Debug, Default)]
pub(crate) struct ReaderSlot {
    /// Next slot this reader will run. Published every fragment.
    pub index: CachePadded<AtomicUsize>,
    /// Set while the reader is consuming; the producer skips waking active
    /// readers.
    pub active: AtomicBool,
    pub doorbell: Doorbell,
    pub retired: AtomicU64,
    pub wakeups: AtomicU64,
}

/// First fault reported by any worker.
#[derive(Debug, Clone)]
pub(crate) struct WorkerFault {
    pub core: usize,
    pub message: String,
}

pub(crate) struct QueueShared {
    slots: Box<[UnsafeCell<Option<CommandBox>>]>,
    capacity: usize,
    fragment_size: usize,
    writer_index: CachePadded<AtomicUsize>,
    readers: Box<[ReaderSlot]>,
    /// Set by readers whenever they publish progress or fault.
    pub reader_done: Event,
    faulted: AtomicBool,
    fault: Mutex<Option<WorkerFault>>,
}

// Safety: slot access follows the ownership protocol in the module docs;
// everything else is atomics or locks.
unsafe impl Sync for QueueShared {}

impl QueueShared {
    pub fn new(capacity: usize, fragment_size: usize, num_readers: usize) -> Self {
        debug_assert!(capacity > fragment_size && fragment_size >= 1);
        Self {
            slots: (0..capacity).map(|_| UnsafeCell::new(None)).collect(),
            capacity,
            fragment_size,
            writer_index: CachePadded(AtomicUsize::new(0)),
            readers: (0..num_readers).map(|_| ReaderSlot::default()).collect(),
            reader_done: Event::new(),
            faulted: AtomicBool::new(false),
            fault: Mutex::new(None),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn fragment_size(&self) -> usize {
        self.fragment_size
    }

    pub fn num_readers(&self) -> usize {
        self.readers.len()
    }

    pub fn reader(&self, core: usize) -> &ReaderSlot {
        &self.readers[core]
    }

    pub fn readers(&self) -> &[ReaderSlot] {
        &self.readers
    }

    #[inline]
    pub fn next_index(&self, index: usize) -> usize {
        let next = index + 1;
        if next == self.capacity {
            0
        } else {
            next
        }
    }

    // --- Producer side ---

    /// Make slots before `writer` visible to readers, then wake every reader
    /// that may be parked.
    ///
    /// Returns how many readers were rung.
    pub fn publish(&self, writer: usize) -> usize {
        // SeqCst pairs with the reader's `active` store and re-check in
        // `park`: either the reader sees this index, or we see it inactive.
        self.writer_index.store(writer, Ordering::SeqCst);
        let mut rung = 0;
        for reader in self.readers.iter() {
            if !reader.active.load(Ordering::SeqCst) {
                reader.doorbell.ring();
                rung += 1;
            }
        }
        rung
    }

    /// Index of the slowest reader, measured backwards from `writer`.
    ///
    /// Every slot in `floor..writer` is still unread by at least one reader.
    /// Equal to `writer` when all readers are caught up.
    pub fn reader_floor(&self, writer: usize) -> usize {
        let cap = self.capacity;
        let max_lag = self
            .readers
            .iter()
            .map(|r| (writer + cap - r.index.load(Ordering::Acquire)) % cap)
            .max()
            .unwrap_or(0);
        (writer + cap - max_lag) % cap
    }

    /// Store `command` in slot `index`, returning the retired command that
    /// previously lived there.
    ///
    /// # Safety
    /// Producer only. Every reader must have published an index past `index`
    /// (i.e. `index` is outside `reader_floor(writer)..writer`).
    pub unsafe fn replace(&self, index: usize, command: CommandBox) -> Option<CommandBox> {
        (*self.slots[index].get()).replace(command)
    }

    /// Remove the retired command in slot `index`.
    ///
    /// # Safety
    /// Same as [`replace`](Self::replace).
    pub unsafe fn take(&self, index: usize) -> Option<CommandBox> {
        (*self.slots[index].get()).take()
    }

    // --- Reader side ---

    #[inline]
    pub fn writer_index(&self) -> usize {
        self.writer_index.load(Ordering::Acquire)
    }

    /// The command in slot `index`.
    ///
    /// # Safety
    /// `index` must lie between this reader's index and the published writer
    /// index, so the producer will not touch it until the reader publishes
    /// past it.
    pub unsafe fn slot(&self, index: usize) -> Option<&CommandBox> {
        (*self.slots[index].get()).as_ref()
    }

    /// Publish reader progress and let the producer re-check for space.
    pub fn retire(&self, core: usize, index: usize) {
        self.readers[core].index.store(index, Ordering::Release);
        self.reader_done.set();
    }

    /// Mark `core` idle and decide whether it may sleep.
    ///
    /// Returns `false` if work was published in the meantime, in which case
    /// the reader is active again and should keep consuming.
    pub fn park(&self, core: usize, position: usize) -> bool {
        let reader = &self.readers[core];
        reader.active.store(false, Ordering::SeqCst);
        if self.writer_index.load(Ordering::SeqCst) != position {
            reader.active.store(true, Ordering::SeqCst);
            return false;
        }
        true
    }

    // --- Faults ---

    /// Record a worker failure. Only the first one is kept.
    pub fn record_fault(&self, core: usize, message: String) {
        {
            let mut fault = self.fault.lock().unwrap_or_else(PoisonError::into_inner);
            if fault.is_none() {
                *fault = Some(WorkerFault { core, message });
            }
        }
        self.faulted.store(true, Ordering::Release);
        self.reader_done.set();
    }

    pub fn is_faulted(&self) -> bool {
        self.faulted.load(Ordering::Acquire)
    }

    /// `Err(WorkerFaulted)` if any worker has failed.
    pub fn check_fault(&self) -> Result<(), PipelineError> {
        if !self.is_faulted() {
            return Ok(());
        }
        let fault = self.fault.lock().unwrap_or_else(PoisonError::into_inner);
        let WorkerFault { core, message } = fault.clone().unwrap_or(WorkerFault {
            core: 0,
            message: String::from("unknown fault"),
        });
        Err(PipelineError::WorkerFaulted { core, message })
    }
}

impl std::fmt::Debug for QueueShared {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueShared")
            .field("capacity", &self.capacity)
            .field("fragment_size", &self.fragment_size)
            .field("writer_index", &self.writer_index.load(Ordering::Relaxed))
            .field("readers", &self.readers.len())
            .field("faulted", &self.is_faulted())
            .finish_non_exhaustive()
    }
}
