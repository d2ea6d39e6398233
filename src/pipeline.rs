// src/pipeline.rs

//! The producer-side façade.
//!
//! ```text
//!   producer thread                          worker threads (one per core)
//!   ───────────────                          ─────────────────────────────
//!   alloc_command ──► Arena
//!   queue ──────────► ring slot ─┐
//!     every fragment:            │  publish writer_index  ┌─► worker 0 ─┐
//!       publish + ring idle ─────┴────────────────────────┼─► worker 1 ─┼─► rows y % N
//!                                                         └─► worker N ─┘
//!   wait_for_workers ◄──────── reader_done ◄──────── reader indices
//! ```
//!
//! The pipeline is driven from one thread at a time (`&mut self`); it is
//! `Send`, so ownership may move between threads.

use crate::arena::{Arena, ArenaStats};
use crate::command::{CommandBox, PixelCommand, SetDestination};
use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::queue::QueueShared;
use crate::stats::{PipelineStats, WorkerStats};
use crate::surface::Framebuffer;
use crate::worker::WorkerPool;
use log::{debug, info, trace, warn};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Source of pipeline ids for framebuffer claims. `0` means unbound.
static NEXT_PIPELINE_ID: AtomicU64 = AtomicU64::new(1);

/// Multi-core pixel command pipeline.
///
/// Commands run on every worker in queue order. Broadcast commands update each
/// worker's context; draw commands write the rows each worker owns.
///
/// Dropping the pipeline drains it (unless a worker has faulted), stops the
/// workers and frees every remaining command.
pub struct PixelPipeline {
    id: u64,
    config: PipelineConfig,
    shared: Arc<QueueShared>,
    workers: WorkerPool,
    arena: Arena,
    /// Framebuffer claimed by the latest `set_destination`.
    destination: Option<Arc<Framebuffer>>,
    /// Earlier destinations, still claimed until the next drain.
    stale_destinations: Vec<Arc<Framebuffer>>,
    /// Next slot the producer writes.
    local_writer: usize,
    /// Commands written since the last publish.
    unpublished: usize,
    /// Slots holding a command, contiguous and ending just before
    /// `local_writer`.
    occupied: usize,
    commands_queued: u64,
    fragments_published: u64,
    producer_stalls: u64,
    drains: u64,
}

impl PixelPipeline {
    /// Validate `config`, then start the workers.
    pub fn new(config: PipelineConfig) -> Result<Self, PipelineError> {
        config.validate()?;
        let num_workers = config.worker_count();
        let shared = Arc::new(QueueShared::new(
            config.queue_capacity,
            config.fragment_size,
            num_workers,
        ));
        let workers = WorkerPool::spawn(Arc::clone(&shared), &config.thread_name_prefix)?;
        info!(
            "pixel pipeline started: {} workers, queue capacity {}, fragment size {}",
            num_workers, config.queue_capacity, config.fragment_size
        );
        Ok(Self {
            id: NEXT_PIPELINE_ID.fetch_add(1, Ordering::Relaxed),
            arena: Arena::new(config.min_block_size),
            destination: None,
            stale_destinations: Vec::new(),
            config,
            shared,
            workers,
            local_writer: 0,
            unpublished: 0,
            occupied: 0,
            commands_queued: 0,
            fragments_published: 0,
            producer_stalls: 0,
            drains: 0,
        })
    }

    /// Pipeline with default settings.
    pub fn with_defaults() -> Result<Self, PipelineError> {
        Self::new(PipelineConfig::default())
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Fixed for the pipeline's lifetime.
    pub fn num_workers(&self) -> usize {
        self.shared.num_readers()
    }

    /// Move `command` into this pipeline's arena.
    pub fn alloc_command<C: PixelCommand + 'static>(
        &mut self,
        command: C,
    ) -> Result<CommandBox, PipelineError> {
        self.arena.alloc_command(command)
    }

    /// Release a command that was allocated but never queued.
    pub fn free_command(&mut self, command: CommandBox) {
        drop(command);
    }

    /// Take ownership of `command` and append it to the queue.
    ///
    /// Blocks while the ring is full. Workers see the command once its
    /// fragment is published, or at the next drain.
    pub fn queue(&mut self, command: CommandBox) -> Result<(), PipelineError> {
        self.shared.check_fault()?;
        let next = self.shared.next_index(self.local_writer);
        if next == self.shared.reader_floor(self.local_writer) {
            self.wait_for_space(next)?;
        }

        // Safety: the floor check keeps `local_writer` outside the unread
        // range of every reader.
        let retired = unsafe { self.shared.replace(self.local_writer, command) };
        if retired.is_none() {
            self.occupied += 1;
        }
        drop(retired);

        self.local_writer = next;
        self.unpublished += 1;
        self.commands_queued += 1;
        if self.unpublished == self.shared.fragment_size() {
            self.publish();
        }
        Ok(())
    }

    /// Allocate and queue `command` in one step.
    pub fn submit<C: PixelCommand + 'static>(&mut self, command: C) -> Result<(), PipelineError> {
        let command = self.alloc_command(command)?;
        self.queue(command)
    }

    /// Queue a destination change. Draw commands queued after it render into
    /// `destination`; `None` unbinds.
    ///
    /// The framebuffer is claimed for this pipeline until a later destination
    /// replaces it and the pipeline drains, or until the pipeline is dropped.
    /// Fails with [`PipelineError::FramebufferInUse`] if another pipeline
    /// holds it.
    pub fn set_destination(
        &mut self,
        destination: Option<Arc<Framebuffer>>,
    ) -> Result<(), PipelineError> {
        self.shared.check_fault()?;
        if let Some(framebuffer) = &destination {
            if !framebuffer.claim(self.id) {
                return Err(PipelineError::FramebufferInUse);
            }
        }
        let unchanged = match (&self.destination, &destination) {
            (Some(current), Some(next)) => Arc::ptr_eq(current, next),
            (None, None) => true,
            _ => false,
        };
        if !unchanged {
            let previous = std::mem::replace(&mut self.destination, destination.clone());
            self.stale_destinations.extend(previous);
        }
        self.submit(SetDestination::new(destination))
    }

    /// Block until every queued command has run on every worker.
    ///
    /// Afterwards the workers are idle and retired commands have been freed.
    pub fn wait_for_workers(&mut self) -> Result<(), PipelineError> {
        self.shared.check_fault()?;
        if self.unpublished > 0 {
            self.publish();
        }
        while self.shared.reader_floor(self.local_writer) != self.local_writer {
            self.shared.reader_done.wait();
            self.shared.check_fault()?;
        }
        self.drains += 1;
        self.release_stale_destinations();
        let reclaimed = self.reclaim();
        debug!(
            "pixel pipeline drained at slot {}, freed {} commands",
            self.local_writer, reclaimed
        );
        Ok(())
    }

    /// Drain, then copy out `framebuffer`.
    ///
    /// Fails with [`PipelineError::FramebufferInUse`] if another pipeline
    /// holds it.
    pub fn read_pixels(&mut self, framebuffer: &Framebuffer) -> Result<Vec<u32>, PipelineError> {
        self.wait_for_workers()?;
        let borrowed = framebuffer.owner() != self.id;
        if !framebuffer.claim(self.id) {
            return Err(PipelineError::FramebufferInUse);
        }
        // Safety: the buffer is claimed by this pipeline, which is drained,
        // so no worker anywhere is writing to it.
        let pixels = unsafe { framebuffer.snapshot() };
        if borrowed {
            framebuffer.release(self.id);
        }
        Ok(pixels)
    }

    pub fn arena_stats(&self) -> ArenaStats {
        self.arena.stats()
    }

    pub fn stats(&self) -> PipelineStats {
        PipelineStats {
            commands_queued: self.commands_queued,
            fragments_published: self.fragments_published,
            producer_stalls: self.producer_stalls,
            drains: self.drains,
            workers: self
                .shared
                .readers()
                .iter()
                .map(|r| WorkerStats {
                    retired: r.retired.load(Ordering::Relaxed),
                    wakeups: r.wakeups.load(Ordering::Relaxed),
                })
                .collect(),
            arena: self.arena.stats(),
        }
    }

    /// Drain, stop and join the workers, and report final statistics.
    ///
    /// Fails if any worker faulted during the pipeline's life.
    pub fn shutdown(mut self) -> Result<PipelineStats, PipelineError> {
        let drained = self.wait_for_workers();
        self.workers.stop();
        self.release_all_destinations();
        let stats = self.stats();
        info!(
            "pixel pipeline shut down: {} commands, {} stalls, {} drains",
            stats.commands_queued, stats.producer_stalls, stats.drains
        );
        drained?;
        self.shared.check_fault()?;
        Ok(stats)
    }

    fn publish(&mut self) {
        let rung = self.shared.publish(self.local_writer);
        self.unpublished = 0;
        self.fragments_published += 1;
        trace!(
            "published writer index {}, woke {} workers",
            self.local_writer,
            rung
        );
    }

    /// Wait until slot `next` is free. Publishes any partial fragment first so
    /// the workers have something to retire.
    fn wait_for_space(&mut self, next: usize) -> Result<(), PipelineError> {
        if self.unpublished > 0 {
            self.publish();
        }
        self.producer_stalls += 1;
        trace!("pixel queue full at slot {}, waiting for workers", self.local_writer);
        while next == self.shared.reader_floor(self.local_writer) {
            self.shared.reader_done.wait();
            self.shared.check_fault()?;
        }
        Ok(())
    }

    /// Release earlier destinations. Only valid while all readers are caught
    /// up, since their contexts have moved past them.
    fn release_stale_destinations(&mut self) {
        for framebuffer in self.stale_destinations.drain(..) {
            let rebound = self
                .destination
                .as_ref()
                .is_some_and(|current| Arc::ptr_eq(current, &framebuffer));
            if !rebound {
                framebuffer.release(self.id);
            }
        }
    }

    /// Release every claim. Only valid once the workers have stopped.
    fn release_all_destinations(&mut self) {
        for framebuffer in self.stale_destinations.drain(..).chain(self.destination.take()) {
            framebuffer.release(self.id);
        }
    }

    /// Free every retired command still parked in the ring. Only valid while
    /// all readers are caught up.
    fn reclaim(&mut self) -> usize {
        let capacity = self.shared.capacity();
        let mut index = self.local_writer;
        let reclaimed = self.occupied;
        for _ in 0..reclaimed {
            index = index.checked_sub(1).unwrap_or(capacity - 1);
            // Safety: every reader has retired every slot.
            drop(unsafe { self.shared.take(index) });
        }
        self.occupied = 0;
        reclaimed
    }
}

impl Drop for PixelPipeline {
    fn drop(&mut self) {
        if self.workers.is_running() && !self.shared.is_faulted() {
            if let Err(err) = self.wait_for_workers() {
                warn!("pixel pipeline drain on drop failed: {}", err);
            }
        }
        self.workers.stop();
        self.release_all_destinations();
    }
}

impl std::fmt::Debug for PixelPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PixelPipeline")
            .field("id", &self.id)
            .field("config", &self.config)
            .field("queue", &self.shared)
            .field("local_writer", &self.local_writer)
            .field("unpublished", &self.unpublished)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::color::Color;
    use crate::command::Clear;
    use test_log::test;

    fn small_config(workers: usize) -> PipelineConfig {
        PipelineConfig {
            queue_capacity: 16,
            fragment_size: 4,
            ..PipelineConfig::default()
        }
        .with_workers(workers)
    }

    #[test]
    fn pipeline_is_send() {
        fn assert_send<T: Send>() {}
        assert_send::<PixelPipeline>();
    }

    #[test]
    fn invalid_config_is_rejected() {
        let config = PipelineConfig {
            queue_capacity: 4,
            fragment_size: 4,
            ..PipelineConfig::default()
        };
        assert!(matches!(
            PixelPipeline::new(config),
            Err(PipelineError::InvalidConfig(_))
        ));
    }

    #[test]
    fn drain_reclaims_retired_commands() {
        let mut pipeline = PixelPipeline::new(small_config(3)).unwrap();
        let fb = Arc::new(Framebuffer::new(8, 8).unwrap());
        pipeline.set_destination(Some(Arc::clone(&fb))).unwrap();
        for _ in 0..40 {
            pipeline.submit(Clear::new(Color::GREEN)).unwrap();
        }
        pipeline.wait_for_workers().unwrap();

        let stats = pipeline.stats();
        assert_eq!(stats.commands_queued, 41);
        assert_eq!(stats.min_retired(), 41);
        assert_eq!(stats.arena.live_allocations, 0);
        assert!(stats.fragments_published >= 10);

        // The last SetDestination was reclaimed; only the workers' contexts
        // and the pipeline's claim still hold the framebuffer.
        assert_eq!(Arc::strong_count(&fb), 1 + 3 + 1);
    }

    #[test]
    fn double_drain_is_harmless() {
        let mut pipeline = PixelPipeline::new(small_config(2)).unwrap();
        pipeline.wait_for_workers().unwrap();
        pipeline.wait_for_workers().unwrap();
        assert_eq!(pipeline.stats().drains, 2);
    }

    #[test]
    fn unqueued_command_can_be_freed() {
        let mut pipeline = PixelPipeline::new(small_config(1)).unwrap();
        let command = pipeline.alloc_command(Clear::new(Color::RED)).unwrap();
        assert_eq!(pipeline.arena_stats().live_allocations, 1);
        pipeline.free_command(command);
        assert_eq!(pipeline.arena_stats().live_allocations, 0);
    }

    #[test]
    fn shutdown_reports_stats() {
        let mut pipeline = PixelPipeline::new(small_config(2)).unwrap();
        let fb = Arc::new(Framebuffer::new(2, 2).unwrap());
        pipeline.set_destination(Some(Arc::clone(&fb))).unwrap();
        pipeline.submit(Clear::new(Color::BLUE)).unwrap();
        let stats = pipeline.shutdown().unwrap();
        assert_eq!(stats.workers.len(), 2);
        assert!(stats.workers.iter().all(|w| w.retired == 2));
        assert!(!fb.is_bound());
    }

    #[test]
    fn framebuffer_binds_to_one_pipeline_at_a_time() {
        let fb = Arc::new(Framebuffer::new(4, 4).unwrap());
        let mut first = PixelPipeline::new(small_config(2)).unwrap();
        let mut second = PixelPipeline::new(small_config(2)).unwrap();

        first.set_destination(Some(Arc::clone(&fb))).unwrap();
        assert!(matches!(
            second.set_destination(Some(Arc::clone(&fb))),
            Err(PipelineError::FramebufferInUse)
        ));
        assert!(matches!(
            second.read_pixels(&fb),
            Err(PipelineError::FramebufferInUse)
        ));

        first.submit(Clear::new(Color::RED)).unwrap();
        assert_eq!(first.read_pixels(&fb).unwrap(), vec![Color::RED.to_argb(); 16]);
        drop(first);

        assert!(!fb.is_bound());
        second.set_destination(Some(Arc::clone(&fb))).unwrap();
        second.submit(Clear::new(Color::BLUE)).unwrap();
        assert_eq!(second.read_pixels(&fb).unwrap(), vec![Color::BLUE.to_argb(); 16]);
    }

    #[test]
    fn replaced_destination_is_released_at_the_next_drain() {
        let old = Arc::new(Framebuffer::new(2, 2).unwrap());
        let new = Arc::new(Framebuffer::new(2, 2).unwrap());
        let mut pipeline = PixelPipeline::new(small_config(2)).unwrap();

        pipeline.set_destination(Some(Arc::clone(&old))).unwrap();
        pipeline.submit(Clear::new(Color::GREEN)).unwrap();
        pipeline.set_destination(Some(Arc::clone(&new))).unwrap();
        assert!(old.is_bound());

        pipeline.wait_for_workers().unwrap();
        assert!(!old.is_bound());
        assert!(new.is_bound());

        // Reading an unbound buffer borrows it only for the copy.
        assert_eq!(pipeline.read_pixels(&old).unwrap(), vec![Color::GREEN.to_argb(); 4]);
        assert!(!old.is_bound());

        pipeline.set_destination(None).unwrap();
        pipeline.wait_for_workers().unwrap();
        assert!(!new.is_bound());
    }
}
