// tests/pipeline.rs

//! End-to-end tests for the pixel pipeline
//!
//! These drive real worker threads: ordering across workers, row partition
//! coverage, backpressure, drains, and fault reporting.

use pixel_pipeline::command::{
    Clear, DrawLine, DrawSprite, DrawTriangles, FillRect, ResetClipRect, SetBlendMode,
    SetClipRect, SetSampler,
};
use pixel_pipeline::{
    BlendMode, Color, CommandKind, CommandResult, ContextState, Framebuffer, PipelineConfig,
    PipelineError, PixelCommand, PixelPipeline, PixelThreadContext, Point, Rect, Texture,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::{Duration, Instant};

// ============================================================================
// Test Commands
// ============================================================================

/// Records each worker's context state at its queue position.
struct Witness {
    seen: Arc<Mutex<Vec<Option<ContextState>>>>,
}

impl PixelCommand for Witness {
    fn kind(&self) -> CommandKind {
        CommandKind::Draw
    }

    fn run(&self, context: &mut PixelThreadContext) -> CommandResult {
        self.seen.lock().unwrap()[context.core()] = Some(context.state());
        Ok(())
    }
}

/// Counts executions across all workers.
struct Tally(Arc<AtomicUsize>);

impl PixelCommand for Tally {
    fn kind(&self) -> CommandKind {
        CommandKind::Draw
    }

    fn run(&self, _context: &mut PixelThreadContext) -> CommandResult {
        self.0.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Holds every worker until the test opens it.
#[derive(Default)]
struct GateState {
    open: Mutex<bool>,
    cond: Condvar,
    entered: AtomicUsize,
}

struct Gate(Arc<GateState>);

impl PixelCommand for Gate {
    fn kind(&self) -> CommandKind {
        CommandKind::Draw
    }

    fn run(&self, _context: &mut PixelThreadContext) -> CommandResult {
        self.0.entered.fetch_add(1, Ordering::SeqCst);
        let mut open = self.0.open.lock().unwrap();
        while !*open {
            open = self.0.cond.wait(open).unwrap();
        }
        Ok(())
    }
}

struct Explode;

impl PixelCommand for Explode {
    fn kind(&self) -> CommandKind {
        CommandKind::Draw
    }

    fn run(&self, context: &mut PixelThreadContext) -> CommandResult {
        if context.core() == 0 {
            panic!("boom");
        }
        Ok(())
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn pipeline(workers: usize) -> PixelPipeline {
    PixelPipeline::new(PipelineConfig::default().with_workers(workers)).unwrap()
}

fn small_pipeline(workers: usize) -> PixelPipeline {
    let config = PipelineConfig {
        queue_capacity: 16,
        fragment_size: 4,
        ..PipelineConfig::default()
    };
    PixelPipeline::new(config.with_workers(workers)).unwrap()
}

fn wait_until(what: &str, mut done: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while !done() {
        assert!(Instant::now() < deadline, "timed out waiting for {}", what);
        thread::sleep(Duration::from_millis(1));
    }
}

/// Render `commands` into a fresh `width` x `height` buffer with `workers`.
fn render(
    workers: usize,
    width: usize,
    height: usize,
    commands: impl FnOnce(&mut PixelPipeline),
) -> Vec<u32> {
    let mut pipeline = pipeline(workers);
    let fb = Arc::new(Framebuffer::new(width, height).unwrap());
    pipeline.set_destination(Some(Arc::clone(&fb))).unwrap();
    commands(&mut pipeline);
    pipeline.read_pixels(&fb).unwrap()
}

// ============================================================================
// Ordering
// ============================================================================

#[test_log::test]
fn broadcast_state_converges_on_every_worker() {
    for workers in [1, 2, 4, 8] {
        let mut pipeline = pipeline(workers);
        let fb = Arc::new(Framebuffer::new(32, 32).unwrap());
        let tex = Arc::new(Texture::solid(4, 4, Color::RED).unwrap());
        let seen = Arc::new(Mutex::new(vec![None; workers]));

        pipeline.set_destination(Some(Arc::clone(&fb))).unwrap();
        for i in 0..100 {
            pipeline.submit(SetClipRect::new(Rect::new(i % 7, 0, 32, 32 - i % 5))).unwrap();
            pipeline.submit(SetBlendMode::new(if i % 3 == 0 { BlendMode::Add } else { BlendMode::Copy })).unwrap();
            if i % 10 == 0 {
                pipeline.submit(SetSampler::new((i / 10 % 4) as usize, Arc::clone(&tex))).unwrap();
                pipeline.submit(ResetClipRect).unwrap();
            }
        }
        pipeline.submit(SetClipRect::new(Rect::new(1, 2, 3, 4))).unwrap();
        pipeline.submit(Witness { seen: Arc::clone(&seen) }).unwrap();
        pipeline.wait_for_workers().unwrap();

        let seen = seen.lock().unwrap();
        let first = seen[0].expect("worker 0 ran the witness");
        assert!(seen.iter().all(|s| *s == Some(first)), "workers={}", workers);
        assert_eq!(first.clip_rect, Some(Rect::new(1, 2, 3, 4)));
        // The last iteration (i = 99) selects Add.
        assert_eq!(first.blend_mode, BlendMode::Add);
        assert_eq!(first.destination, Some(Arc::as_ptr(&fb) as usize));
        assert!(first.samplers.iter().all(|s| *s == Some(Arc::as_ptr(&tex) as usize)));
    }
}

#[test_log::test]
fn witness_sees_state_at_its_own_queue_position() {
    let mut pipeline = pipeline(4);
    let seen_before = Arc::new(Mutex::new(vec![None; 4]));
    let seen_after = Arc::new(Mutex::new(vec![None; 4]));

    pipeline.submit(SetBlendMode::new(BlendMode::Multiply)).unwrap();
    pipeline.submit(Witness { seen: Arc::clone(&seen_before) }).unwrap();
    pipeline.submit(SetBlendMode::new(BlendMode::Add)).unwrap();
    pipeline.submit(Witness { seen: Arc::clone(&seen_after) }).unwrap();
    pipeline.wait_for_workers().unwrap();

    for state in seen_before.lock().unwrap().iter() {
        assert_eq!(state.unwrap().blend_mode, BlendMode::Multiply);
    }
    for state in seen_after.lock().unwrap().iter() {
        assert_eq!(state.unwrap().blend_mode, BlendMode::Add);
    }
}

// ============================================================================
// Partition
// ============================================================================

#[test_log::test]
fn clipped_fills_are_byte_identical_across_worker_counts() {
    let scene = |p: &mut PixelPipeline| {
        p.submit(SetClipRect::new(Rect::new(0, 0, 100, 100))).unwrap();
        p.submit(FillRect::new(Rect::new(0, 0, 50, 50), Color::RED)).unwrap();
        p.submit(FillRect::new(Rect::new(50, 50, 100, 100), Color::BLUE)).unwrap();
    };
    let one = render(1, 128, 128, scene);
    assert_eq!(one[0], Color::RED.to_argb());
    assert_eq!(one[60 * 128 + 60], Color::BLUE.to_argb());
    assert_eq!(one[110 * 128 + 110], 0);
    assert_eq!(render(2, 128, 128, scene), one);
    assert_eq!(render(8, 128, 128, scene), one);
}

#[test_log::test]
fn mixed_scene_is_byte_identical_across_worker_counts() {
    let scene = |p: &mut PixelPipeline| {
        let tex = Arc::new(
            Texture::from_pixels(2, 2, vec![0xff00_00ff, 0x80ff_0000, 0x4000_ff00, 0xffff_ffff])
                .unwrap(),
        );
        p.submit(Clear::new(Color::rgb(10, 20, 30))).unwrap();
        p.submit(SetSampler::new(3, tex)).unwrap();
        for i in 0..50 {
            let f = i as f32;
            p.submit(DrawTriangles::new(
                vec![
                    Point::new(f * 1.3, f * 0.7),
                    Point::new(90.0 - f, 10.0 + f * 0.5),
                    Point::new(20.0 + f * 0.25, 95.5 - f * 0.3),
                ],
                Color::rgba(i * 5, 255 - i * 5, 128, 90),
            ))
            .unwrap();
            p.submit(DrawLine::new((i as i32, 0), (99 - i as i32, 99), Color::WHITE)).unwrap();
        }
        p.submit(SetBlendMode::new(BlendMode::Add)).unwrap();
        p.submit(DrawSprite::new(Rect::new(5, 7, 83, 61), 3).with_tint(Color::rgb(200, 100, 50)))
            .unwrap();
    };
    let one = render(1, 100, 100, scene);
    for workers in [2, 3, 8] {
        assert_eq!(render(workers, 100, 100, scene), one, "workers={}", workers);
    }
}

#[test_log::test]
fn additive_draws_touch_each_pixel_once() {
    let unit = Color::rgba(0, 0, 0, 1);
    let scene = |p: &mut PixelPipeline| {
        p.submit(SetBlendMode::new(BlendMode::Add)).unwrap();
        p.submit(FillRect::new(Rect::new(-5, 3, 20, 61), unit)).unwrap();
        p.submit(DrawLine::new((40, -3), (63, 70), unit)).unwrap();
        p.submit(DrawTriangles::new(
            vec![Point::new(25.0, 2.0), Point::new(60.0, 30.0), Point::new(30.0, 63.5)],
            unit,
        ))
        .unwrap();
    };
    for workers in [1, 2, 5, 8] {
        let pixels = render(workers, 64, 64, scene);
        // The three shapes overlap in places, but nothing is hit more than
        // once per shape, and the rect alone covers its area exactly once.
        assert!(pixels.iter().all(|&p| p >> 24 <= 3), "workers={}", workers);
        for y in 3..61 {
            for x in 0..20 {
                assert!(pixels[y * 64 + x] >> 24 >= 1);
            }
        }
        assert_eq!(pixels[2 * 64] >> 24, 0);
    }
    let reference = render(1, 64, 64, scene);
    assert_eq!(render(6, 64, 64, scene), reference);
}

// ============================================================================
// Backpressure
// ============================================================================

#[test_log::test]
fn full_queue_blocks_producer_until_workers_advance() {
    let gate = Arc::new(GateState::default());
    let queued = Arc::new(AtomicUsize::new(0));
    let mut pipeline = small_pipeline(2);
    let capacity = pipeline.config().queue_capacity;

    let producer = {
        let gate = Arc::clone(&gate);
        let queued = Arc::clone(&queued);
        thread::spawn(move || {
            let tally = Arc::new(AtomicUsize::new(0));
            pipeline.submit(Gate(gate)).unwrap();
            queued.fetch_add(1, Ordering::SeqCst);
            for _ in 0..capacity {
                pipeline.submit(Tally(Arc::clone(&tally))).unwrap();
                queued.fetch_add(1, Ordering::SeqCst);
            }
            pipeline.wait_for_workers().unwrap();
            (pipeline, tally)
        })
    };

    // Both workers are parked inside the gate at slot 0.
    wait_until("workers to enter the gate", || gate.entered.load(Ordering::SeqCst) == 2);
    // One slot always stays empty, so the producer stops one short of capacity.
    wait_until("producer to fill the ring", || {
        queued.load(Ordering::SeqCst) == capacity - 1
    });
    thread::sleep(Duration::from_millis(100));
    assert_eq!(queued.load(Ordering::SeqCst), capacity - 1);

    *gate.open.lock().unwrap() = true;
    gate.cond.notify_all();

    let (pipeline, tally) = producer.join().unwrap();
    assert_eq!(queued.load(Ordering::SeqCst), capacity + 1);
    assert_eq!(tally.load(Ordering::SeqCst), capacity * 2);
    assert!(pipeline.stats().producer_stalls >= 1);
}

#[test_log::test]
fn long_streams_wrap_the_ring_many_times() {
    let mut pipeline = small_pipeline(3);
    let tally = Arc::new(AtomicUsize::new(0));
    for _ in 0..10_000 {
        pipeline.submit(Tally(Arc::clone(&tally))).unwrap();
    }
    pipeline.wait_for_workers().unwrap();
    assert_eq!(tally.load(Ordering::SeqCst), 30_000);

    let stats = pipeline.stats();
    assert_eq!(stats.commands_queued, 10_000);
    assert!(stats.workers.iter().all(|w| w.retired == 10_000));
    assert_eq!(stats.arena.live_allocations, 0);
}

// ============================================================================
// Drain
// ============================================================================

#[test_log::test]
fn drain_reflects_every_queued_command() {
    let mut pipeline = pipeline(4);
    let fb = Arc::new(Framebuffer::new(16, 16).unwrap());
    pipeline.set_destination(Some(Arc::clone(&fb))).unwrap();
    pipeline.submit(SetBlendMode::new(BlendMode::Add)).unwrap();
    // Fewer than a fragment past the last boundary, so the drain must publish
    // the tail itself.
    for _ in 0..203 {
        pipeline.submit(FillRect::new(Rect::new(0, 0, 16, 16), Color::rgba(1, 0, 0, 0))).unwrap();
    }
    let pixels = pipeline.read_pixels(&fb).unwrap();
    assert!(pixels.iter().all(|&p| Color::from_argb(p).r == 203));

    // Workers are idle: nothing changes afterwards.
    thread::sleep(Duration::from_millis(20));
    assert_eq!(pipeline.read_pixels(&fb).unwrap(), pixels);
}

#[test_log::test]
fn dropping_pipeline_runs_pending_commands_and_frees_them() {
    let tally = Arc::new(AtomicUsize::new(0));
    let tex = Arc::new(Texture::solid(1, 1, Color::WHITE).unwrap());
    {
        let mut pipeline = pipeline(2);
        pipeline.submit(SetSampler::new(0, Arc::clone(&tex))).unwrap();
        for _ in 0..5 {
            pipeline.submit(Tally(Arc::clone(&tally))).unwrap();
        }
    }
    assert_eq!(tally.load(Ordering::SeqCst), 10);
    assert_eq!(Arc::strong_count(&tex), 1);
    assert_eq!(Arc::strong_count(&tally), 1);
}

#[test_log::test]
fn pipeline_can_move_between_threads() {
    let mut pipeline = pipeline(2);
    let tally = Arc::new(AtomicUsize::new(0));
    pipeline.submit(Tally(Arc::clone(&tally))).unwrap();
    let mut pipeline = thread::spawn(move || {
        pipeline.wait_for_workers().unwrap();
        pipeline
    })
    .join()
    .unwrap();
    pipeline.submit(Tally(Arc::clone(&tally))).unwrap();
    pipeline.wait_for_workers().unwrap();
    assert_eq!(tally.load(Ordering::SeqCst), 4);
}

// ============================================================================
// Destinations
// ============================================================================

#[test_log::test]
fn shared_framebuffer_is_rejected_by_a_second_pipeline() {
    let fb = Arc::new(Framebuffer::new(8, 8).unwrap());
    let mut owner = pipeline(2);
    let mut other = pipeline(2);
    owner.set_destination(Some(Arc::clone(&fb))).unwrap();

    assert!(matches!(
        other.set_destination(Some(Arc::clone(&fb))),
        Err(PipelineError::FramebufferInUse)
    ));
    owner.submit(FillRect::new(Rect::new(0, 0, 8, 8), Color::RED)).unwrap();
    assert!(matches!(other.read_pixels(&fb), Err(PipelineError::FramebufferInUse)));
    assert_eq!(owner.read_pixels(&fb).unwrap(), vec![Color::RED.to_argb(); 64]);

    owner.shutdown().unwrap();
    other.set_destination(Some(Arc::clone(&fb))).unwrap();
    other.submit(Clear::new(Color::BLUE)).unwrap();
    assert_eq!(other.read_pixels(&fb).unwrap(), vec![Color::BLUE.to_argb(); 64]);
}

#[test_log::test]
fn off_screen_geometry_does_not_fault() {
    let pixels = render(4, 16, 16, |p| {
        p.submit(SetBlendMode::new(BlendMode::Copy)).unwrap();
        p.submit(DrawLine::new((-2_000_000_000, 3), (2_000_000_000, 3), Color::WHITE))
            .unwrap();
        p.submit(DrawLine::new((i32::MAX, i32::MIN), (i32::MIN, i32::MAX), Color::RED))
            .unwrap();
        p.submit(FillRect::new(Rect::from_xywh(i32::MAX - 2, 0, 10, 10), Color::GREEN))
            .unwrap();
    });
    assert!(pixels[3 * 16..4 * 16].iter().all(|&p| p == Color::WHITE.to_argb()));
    assert!(!pixels.contains(&Color::GREEN.to_argb()));
}

// ============================================================================
// Faults
// ============================================================================

#[test_log::test]
fn invalid_command_faults_the_pipeline() {
    let mut pipeline = pipeline(3);
    let fb = Arc::new(Framebuffer::new(8, 8).unwrap());
    pipeline.set_destination(Some(fb)).unwrap();
    pipeline
        .submit(DrawTriangles::new(vec![Point::default(); 5], Color::RED))
        .unwrap();

    match pipeline.wait_for_workers() {
        Err(PipelineError::WorkerFaulted { message, .. }) => {
            assert!(message.contains("5 vertices"), "{}", message);
        }
        other => panic!("expected a worker fault, got {:?}", other),
    }
    assert!(matches!(
        pipeline.submit(Clear::new(Color::RED)),
        Err(PipelineError::WorkerFaulted { .. })
    ));
    assert!(pipeline.shutdown().is_err());
}

#[test_log::test]
fn panicking_command_faults_the_pipeline() {
    let mut pipeline = pipeline(2);
    pipeline.submit(Explode).unwrap();
    match pipeline.wait_for_workers() {
        Err(PipelineError::WorkerFaulted { core, message }) => {
            assert_eq!(core, 0);
            assert_eq!(message, "worker panicked");
        }
        other => panic!("expected a worker fault, got {:?}", other),
    }
    // Dropping a faulted pipeline must not hang.
    drop(pipeline);
}
