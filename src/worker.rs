// src/worker.rs

//! Worker threads.
//!
//! One thread per core. Each owns its [`PixelThreadContext`] and walks the
//! shared ring from its own reader index, running every published command
//! against that context.

use crate::command::{CommandKind, PixelCommand};
use crate::context::PixelThreadContext;
use crate::error::{CommandError, PipelineError};
use crate::queue::QueueShared;
use crate::sync::Wake;
use log::{debug, error, trace, warn};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// The running worker threads of one pipeline.
pub(crate) struct WorkerPool {
    shared: Arc<QueueShared>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn one worker per reader slot in `shared`, named `"{prefix}-{core}"`.
    ///
    /// If any spawn fails, the workers already started are stopped and joined.
    pub fn spawn(shared: Arc<QueueShared>, prefix: &str) -> Result<Self, PipelineError> {
        let mut pool = Self {
            workers: Vec::with_capacity(shared.num_readers()),
            shared,
        };
        for core in 0..pool.shared.num_readers() {
            let shared = Arc::clone(&pool.shared);
            let handle = thread::Builder::new()
                .name(format!("{}-{}", prefix, core))
                .spawn(move || worker_main(core, shared))
                .map_err(|source| PipelineError::WorkerSpawn { core, source })?;
            pool.workers.push(handle);
        }
        Ok(pool)
    }

    pub fn is_running(&self) -> bool {
        !self.workers.is_empty()
    }

    /// Tell every worker to exit and join them. Returns how many panicked.
    ///
    /// Workers finish the command they are running but do not consume
    /// anything else; drain first to run the whole queue.
    pub fn stop(&mut self) -> usize {
        for reader in self.shared.readers() {
            reader.doorbell.stop();
        }
        let mut panicked = 0;
        for (core, handle) in self.workers.drain(..).enumerate() {
            if handle.join().is_err() {
                warn!("pixel worker {} exited by panic", core);
                panicked += 1;
            }
        }
        panicked
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Records a fault if the worker unwinds, so the producer stops waiting on a
/// reader index that will never move.
struct FaultGuard<'a> {
    shared: &'a QueueShared,
    core: usize,
}

impl Drop for FaultGuard<'_> {
    fn drop(&mut self) {
        if thread::panicking() {
            self.shared
                .record_fault(self.core, String::from("worker panicked"));
        }
    }
}

fn worker_main(core: usize, shared: Arc<QueueShared>) {
    let _guard = FaultGuard {
        shared: &shared,
        core,
    };
    let mut context = PixelThreadContext::new(core, shared.num_readers());
    let reader = shared.reader(core);
    let mut position = reader.index.load(Ordering::Acquire);
    debug!("pixel worker {} started", core);

    while reader.doorbell.wait() == Wake::MoreCommands {
        reader.wakeups.fetch_add(1, Ordering::Relaxed);
        reader.active.store(true, Ordering::SeqCst);
        loop {
            position = process_commands(&shared, &mut context, position);
            if shared.park(core, position) {
                break;
            }
        }
    }

    debug!(
        "pixel worker {} stopped after {} commands",
        core,
        reader.retired.load(Ordering::Relaxed)
    );
}

/// Run everything published after `position`, publishing progress every
/// fragment and once more at the end. Returns the new position.
fn process_commands(
    shared: &QueueShared,
    context: &mut PixelThreadContext,
    mut position: usize,
) -> usize {
    let core = context.core();
    let reader = shared.reader(core);
    let fragment_size = shared.fragment_size();
    let mut retired = 0;

    loop {
        let writer = shared.writer_index();
        if position == writer {
            break;
        }
        while position != writer {
            // Safety: `position` lies between our published index and the
            // published writer index.
            let Some(command) = (unsafe { shared.slot(position) }) else {
                panic!("published slot {} is empty", position);
            };
            if let Err(err) = run_command(&**command, context) {
                fatal(shared, core, command.name(), &err);
            }
            position = shared.next_index(position);
            retired += 1;
            if retired == fragment_size {
                reader.retired.fetch_add(retired as u64, Ordering::Relaxed);
                shared.retire(core, position);
                retired = 0;
            }
        }
    }

    if retired > 0 {
        reader.retired.fetch_add(retired as u64, Ordering::Relaxed);
        shared.retire(core, position);
    }
    trace!("pixel worker {} caught up at slot {}", core, position);
    position
}

fn run_command(
    command: &dyn PixelCommand,
    context: &mut PixelThreadContext,
) -> Result<(), CommandError> {
    let generation = context.generation();
    command.run(context)?;
    debug_assert!(
        command.kind() == CommandKind::Broadcast || context.generation() == generation,
        "draw command {} changed per-core state",
        command.name()
    );
    Ok(())
}

/// A failed command leaves the shared framebuffer in an unknown state, so the
/// worker records the fault and dies.
fn fatal(shared: &QueueShared, core: usize, name: &str, err: &CommandError) -> ! {
    error!("pixel worker {} failed running {}: {}", core, name, err);
    shared.record_fault(core, format!("{}: {}", name, err));
    panic!("pixel worker {} faulted: {}", core, err);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arena::Arena;
    use crate::command::{Clear, FillRect, SetDestination};
    use crate::color::Color;
    use crate::geometry::Rect;
    use crate::surface::Framebuffer;
    use std::time::{Duration, Instant};

    fn wait_until(mut done: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !done() {
            assert!(Instant::now() < deadline, "timed out");
            thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn workers_consume_published_commands_and_stop() {
        let shared = Arc::new(QueueShared::new(16, 2, 2));
        let mut pool = WorkerPool::spawn(Arc::clone(&shared), "test-worker").unwrap();
        let mut arena = Arena::new(1024);
        let fb = Arc::new(Framebuffer::new(4, 4).unwrap());

        unsafe {
            shared.replace(0, arena.alloc_command(SetDestination::new(Some(Arc::clone(&fb)))).unwrap());
            shared.replace(1, arena.alloc_command(Clear::new(Color::RED)).unwrap());
            shared.replace(2, arena.alloc_command(FillRect::new(Rect::new(0, 0, 2, 2), Color::BLUE)).unwrap());
        }
        shared.publish(3);
        wait_until(|| shared.reader_floor(3) == 3);

        assert_eq!(pool.stop(), 0);
        assert!(!pool.is_running());
        for reader in shared.readers() {
            assert_eq!(reader.retired.load(Ordering::Relaxed), 3);
        }
        let pixels = unsafe { fb.snapshot() };
        assert_eq!(pixels[0], Color::BLUE.to_argb());
        assert_eq!(pixels[15], Color::RED.to_argb());
    }

    #[test]
    fn failing_command_records_fault() {
        let shared = Arc::new(QueueShared::new(8, 1, 2));
        let mut pool = WorkerPool::spawn(Arc::clone(&shared), "test-worker").unwrap();
        let mut arena = Arena::new(1024);
        // No destination bound.
        unsafe {
            shared.replace(0, arena.alloc_command(Clear::new(Color::RED)).unwrap());
        }
        shared.publish(1);
        wait_until(|| shared.is_faulted());

        match shared.check_fault() {
            Err(PipelineError::WorkerFaulted { message, .. }) => {
                assert!(message.contains("no destination"), "{}", message)
            }
            other => panic!("expected fault, got {:?}", other),
        }
        assert_eq!(pool.stop(), 2);
    }
}
