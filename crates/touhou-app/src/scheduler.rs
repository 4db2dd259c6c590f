//! Frames-in-flight state machine.
//!
//! [`FrameScheduler`] owns the slot cursor, the frame counter and the sticky
//! resize flag. Every GPU interaction goes through a [`FrameBackend`], so the
//! ordering rules can be exercised against fake fences.

use touhou_gpu::error::Result;
use touhou_gpu::swapchain::{AcquireOutcome, PresentOutcome, RebuildOutcome};

/// Number of frame slots the CPU may run ahead of the GPU.
pub const MAX_FRAMES_IN_FLIGHT: usize = 2;

/// GPU operations one tick is built from, all addressed by slot.
pub trait FrameBackend {
    /// Block until the slot's in-flight fence is signaled.
    fn wait_for_slot(&mut self, slot: usize) -> Result<()>;

    /// Acquire the next swapchain image, signaling the slot's image-available semaphore.
    fn acquire(&mut self, slot: usize) -> Result<AcquireOutcome>;

    /// Unsignal the slot's fence.
    fn reset_fence(&mut self, slot: usize) -> Result<()>;

    /// Write the slot's uniform buffer for the current time.
    fn update_uniforms(&mut self, slot: usize) -> Result<()>;

    /// Reset and re-record the slot's command buffer targeting `image_index`.
    fn record(&mut self, slot: usize, image_index: u32) -> Result<()>;

    /// Submit the slot's command buffer, signaling render-finished and the fence.
    fn submit(&mut self, slot: usize) -> Result<()>;

    /// Present `image_index` once the slot's render-finished semaphore fires.
    fn present(&mut self, slot: usize, image_index: u32) -> Result<PresentOutcome>;

    /// Rebuild the swapchain for the current framebuffer size.
    fn rebuild_swapchain(&mut self) -> Result<RebuildOutcome>;
}

/// Where the current tick has got to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FramePhase {
    Ready,
    Acquired,
    Submitted,
    Presented,
}

/// What one tick did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// A frame was submitted and presented. `rebuild` is set when the
    /// swapchain was rebuilt (or the rebuild deferred) after presenting.
    Presented {
        slot: usize,
        image_index: u32,
        rebuild: Option<RebuildOutcome>,
    },
    /// Acquire reported the swapchain out of date. Nothing was recorded or
    /// submitted and the slot did not advance.
    SwapchainRebuilt(RebuildOutcome),
}

/// Drives one acquire/record/submit/present iteration per tick.
#[derive(Debug)]
pub struct FrameScheduler {
    slots: usize,
    current: usize,
    frame_count: u64,
    resize_pending: bool,
    phase: FramePhase,
}

impl Default for FrameScheduler {
    fn default() -> Self {
        Self::new(MAX_FRAMES_IN_FLIGHT)
    }
}

impl FrameScheduler {
    /// Scheduler cycling over `slots` frame slots (at least one).
    pub fn new(slots: usize) -> Self {
        Self {
            slots: slots.max(1),
            current: 0,
            frame_count: 0,
            resize_pending: false,
            phase: FramePhase::Ready,
        }
    }

    /// Slot the next tick will use.
    pub fn current_slot(&self) -> usize {
        self.current
    }

    pub fn slots(&self) -> usize {
        self.slots
    }

    /// Frames presented so far.
    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    pub fn phase(&self) -> FramePhase {
        self.phase
    }

    /// A rebuild is owed from a resize or a stale swapchain.
    pub fn resize_pending(&self) -> bool {
        self.resize_pending
    }

    /// Record that the framebuffer changed size. Stays set until a rebuild succeeds.
    pub fn notify_resized(&mut self) {
        self.resize_pending = true;
    }

    /// Run one frame.
    pub fn tick<B: FrameBackend>(&mut self, backend: &mut B) -> Result<TickOutcome> {
        let slot = self.current;
        self.phase = FramePhase::Ready;

        backend.wait_for_slot(slot)?;

        let image_index = match backend.acquire(slot)? {
            AcquireOutcome::Acquired {
                image_index,
                suboptimal,
            } => {
                if suboptimal {
                    tracing::trace!("Acquired suboptimal image {}, rendering anyway", image_index);
                }
                image_index
            }
            AcquireOutcome::OutOfDate => {
                tracing::debug!("Swapchain out of date on acquire");
                let outcome = self.rebuild(backend)?;
                return Ok(TickOutcome::SwapchainRebuilt(outcome));
            }
        };
        self.phase = FramePhase::Acquired;

        // Only now is a submit guaranteed, so the fence may be unsignaled
        backend.reset_fence(slot)?;

        backend.update_uniforms(slot)?;
        backend.record(slot, image_index)?;
        backend.submit(slot)?;
        self.phase = FramePhase::Submitted;

        let present = backend.present(slot, image_index)?;
        self.phase = FramePhase::Presented;

        let rebuild = if present == PresentOutcome::Stale || self.resize_pending {
            Some(self.rebuild(backend)?)
        } else {
            None
        };

        self.current = (self.current + 1) % self.slots;
        self.frame_count += 1;
        self.phase = FramePhase::Ready;

        tracing::trace!(
            "Frame {} presented (slot {}, image {})",
            self.frame_count,
            slot,
            image_index
        );

        Ok(TickOutcome::Presented {
            slot,
            image_index,
            rebuild,
        })
    }

    fn rebuild<B: FrameBackend>(&mut self, backend: &mut B) -> Result<RebuildOutcome> {
        let outcome = backend.rebuild_swapchain()?;
        match outcome {
            RebuildOutcome::Rebuilt => {
                self.resize_pending = false;
                tracing::info!("Swapchain rebuilt at frame {}", self.frame_count);
            }
            RebuildOutcome::Deferred => {
                // Retry on a later tick
                self.resize_pending = true;
            }
        }
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use touhou_gpu::error::GpuError;

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Call {
        Wait(usize),
        Acquire(usize),
        Reset(usize),
        Uniforms(usize),
        Record(usize, u32),
        Submit(usize),
        Present(usize, u32),
        Rebuild,
    }

    /// Fake GPU: a submitted slot stays in flight until its fence is waited on.
    struct MockBackend {
        calls: Vec<Call>,
        fence_signaled: Vec<bool>,
        in_flight: Vec<bool>,
        max_in_flight: usize,
        images: u32,
        next_image: u32,
        acquire_script: Vec<AcquireOutcome>,
        present_script: Vec<PresentOutcome>,
        rebuild_script: Vec<RebuildOutcome>,
        device_lost: bool,
    }

    impl MockBackend {
        fn new(slots: usize) -> Self {
            Self {
                calls: Vec::new(),
                // Fences are created signaled
                fence_signaled: vec![true; slots],
                in_flight: vec![false; slots],
                max_in_flight: 0,
                images: 3,
                next_image: 0,
                acquire_script: Vec::new(),
                present_script: Vec::new(),
                rebuild_script: Vec::new(),
                device_lost: false,
            }
        }

        fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
            self.calls.iter().filter(|c| pred(c)).count()
        }
    }

    impl FrameBackend for MockBackend {
        fn wait_for_slot(&mut self, slot: usize) -> Result<()> {
            self.calls.push(Call::Wait(slot));
            if self.device_lost {
                return Err(GpuError::Vulkan(ash::vk::Result::ERROR_DEVICE_LOST));
            }
            // The GPU finishes the slot's work
            self.in_flight[slot] = false;
            self.fence_signaled[slot] = true;
            Ok(())
        }

        fn acquire(&mut self, slot: usize) -> Result<AcquireOutcome> {
            self.calls.push(Call::Acquire(slot));
            if !self.acquire_script.is_empty() {
                return Ok(self.acquire_script.remove(0));
            }
            let image_index = self.next_image;
            self.next_image = (self.next_image + 1) % self.images;
            Ok(AcquireOutcome::Acquired {
                image_index,
                suboptimal: false,
            })
        }

        fn reset_fence(&mut self, slot: usize) -> Result<()> {
            self.calls.push(Call::Reset(slot));
            assert!(self.fence_signaled[slot], "reset of a pending fence");
            self.fence_signaled[slot] = false;
            Ok(())
        }

        fn update_uniforms(&mut self, slot: usize) -> Result<()> {
            self.calls.push(Call::Uniforms(slot));
            assert!(!self.in_flight[slot], "uniform write while slot {slot} in flight");
            Ok(())
        }

        fn record(&mut self, slot: usize, image_index: u32) -> Result<()> {
            self.calls.push(Call::Record(slot, image_index));
            assert!(!self.in_flight[slot], "re-record while slot {slot} in flight");
            Ok(())
        }

        fn submit(&mut self, slot: usize) -> Result<()> {
            self.calls.push(Call::Submit(slot));
            assert!(!self.fence_signaled[slot], "submit with a signaled fence");
            self.in_flight[slot] = true;
            let in_flight = self.in_flight.iter().filter(|f| **f).count();
            self.max_in_flight = self.max_in_flight.max(in_flight);
            Ok(())
        }

        fn present(&mut self, slot: usize, image_index: u32) -> Result<PresentOutcome> {
            self.calls.push(Call::Present(slot, image_index));
            if !self.present_script.is_empty() {
                return Ok(self.present_script.remove(0));
            }
            Ok(PresentOutcome::Presented)
        }

        fn rebuild_swapchain(&mut self) -> Result<RebuildOutcome> {
            self.calls.push(Call::Rebuild);
            if !self.rebuild_script.is_empty() {
                return Ok(self.rebuild_script.remove(0));
            }
            Ok(RebuildOutcome::Rebuilt)
        }
    }

    #[test]
    fn one_tick_runs_steps_in_order() {
        let mut scheduler = FrameScheduler::new(2);
        let mut backend = MockBackend::new(2);

        let outcome = scheduler.tick(&mut backend).unwrap();

        assert_eq!(
            outcome,
            TickOutcome::Presented {
                slot: 0,
                image_index: 0,
                rebuild: None
            }
        );
        assert_eq!(
            backend.calls,
            vec![
                Call::Wait(0),
                Call::Acquire(0),
                Call::Reset(0),
                Call::Uniforms(0),
                Call::Record(0, 0),
                Call::Submit(0),
                Call::Present(0, 0),
            ]
        );
        assert_eq!(scheduler.current_slot(), 1);
        assert_eq!(scheduler.frame_count(), 1);
        assert_eq!(scheduler.phase(), FramePhase::Ready);
    }

    #[test]
    fn slots_alternate_and_never_overlap() {
        let mut scheduler = FrameScheduler::new(2);
        let mut backend = MockBackend::new(2);

        let mut used = Vec::new();
        for _ in 0..10 {
            match scheduler.tick(&mut backend).unwrap() {
                TickOutcome::Presented { slot, .. } => used.push(slot),
                other => panic!("unexpected {other:?}"),
            }
        }

        assert_eq!(used, vec![0, 1, 0, 1, 0, 1, 0, 1, 0, 1]);
        assert!(backend.max_in_flight <= 2);
        assert_eq!(scheduler.frame_count(), 10);
    }

    #[test]
    fn every_submit_follows_a_wait_on_the_same_slot() {
        let mut scheduler = FrameScheduler::new(2);
        let mut backend = MockBackend::new(2);
        for _ in 0..6 {
            scheduler.tick(&mut backend).unwrap();
        }

        let mut waited = [false; 2];
        for call in &backend.calls {
            match *call {
                Call::Wait(slot) => waited[slot] = true,
                Call::Submit(slot) => {
                    assert!(waited[slot]);
                    waited[slot] = false;
                }
                _ => {}
            }
        }
    }

    #[test]
    fn stale_acquire_rebuilds_without_submitting() {
        let mut scheduler = FrameScheduler::new(2);
        let mut backend = MockBackend::new(2);
        backend.acquire_script = vec![AcquireOutcome::OutOfDate];

        let outcome = scheduler.tick(&mut backend).unwrap();

        assert_eq!(outcome, TickOutcome::SwapchainRebuilt(RebuildOutcome::Rebuilt));
        assert_eq!(
            backend.calls,
            vec![Call::Wait(0), Call::Acquire(0), Call::Rebuild]
        );
        // Fence untouched, slot not advanced, nothing counted
        assert!(backend.fence_signaled[0]);
        assert_eq!(scheduler.current_slot(), 0);
        assert_eq!(scheduler.frame_count(), 0);

        // The next tick reuses slot 0 without deadlocking on its fence
        let outcome = scheduler.tick(&mut backend).unwrap();
        assert!(matches!(outcome, TickOutcome::Presented { slot: 0, .. }));
    }

    #[test]
    fn stale_present_rebuilds_after_presenting() {
        let mut scheduler = FrameScheduler::new(2);
        let mut backend = MockBackend::new(2);
        backend.present_script = vec![PresentOutcome::Stale];

        let outcome = scheduler.tick(&mut backend).unwrap();

        assert_eq!(
            outcome,
            TickOutcome::Presented {
                slot: 0,
                image_index: 0,
                rebuild: Some(RebuildOutcome::Rebuilt)
            }
        );
        assert_eq!(backend.calls.last(), Some(&Call::Rebuild));
        assert_eq!(scheduler.current_slot(), 1);
        assert_eq!(scheduler.frame_count(), 1);
    }

    #[test]
    fn suboptimal_acquire_still_renders() {
        let mut scheduler = FrameScheduler::new(2);
        let mut backend = MockBackend::new(2);
        backend.acquire_script = vec![AcquireOutcome::Acquired {
            image_index: 2,
            suboptimal: true,
        }];

        let outcome = scheduler.tick(&mut backend).unwrap();

        assert!(matches!(
            outcome,
            TickOutcome::Presented {
                image_index: 2,
                rebuild: None,
                ..
            }
        ));
        assert_eq!(backend.count(|c| matches!(c, Call::Submit(_))), 1);
    }

    #[test]
    fn resize_flag_is_sticky_until_rebuilt() {
        let mut scheduler = FrameScheduler::new(2);
        let mut backend = MockBackend::new(2);

        scheduler.notify_resized();
        assert!(scheduler.resize_pending());

        let outcome = scheduler.tick(&mut backend).unwrap();
        assert!(matches!(
            outcome,
            TickOutcome::Presented {
                rebuild: Some(RebuildOutcome::Rebuilt),
                ..
            }
        ));
        assert!(!scheduler.resize_pending());

        // No further rebuilds once cleared
        scheduler.tick(&mut backend).unwrap();
        assert_eq!(backend.count(|c| *c == Call::Rebuild), 1);
    }

    #[test]
    fn deferred_rebuild_keeps_flag() {
        let mut scheduler = FrameScheduler::new(2);
        let mut backend = MockBackend::new(2);
        backend.rebuild_script = vec![RebuildOutcome::Deferred];

        scheduler.notify_resized();
        let outcome = scheduler.tick(&mut backend).unwrap();
        assert!(matches!(
            outcome,
            TickOutcome::Presented {
                rebuild: Some(RebuildOutcome::Deferred),
                ..
            }
        ));
        assert!(scheduler.resize_pending());

        // Retried on the next tick, which succeeds
        scheduler.tick(&mut backend).unwrap();
        assert!(!scheduler.resize_pending());
        assert_eq!(backend.count(|c| *c == Call::Rebuild), 2);
    }

    #[test]
    fn deferred_rebuild_on_stale_acquire_sets_flag() {
        let mut scheduler = FrameScheduler::new(2);
        let mut backend = MockBackend::new(2);
        backend.acquire_script = vec![AcquireOutcome::OutOfDate];
        backend.rebuild_script = vec![RebuildOutcome::Deferred];

        let outcome = scheduler.tick(&mut backend).unwrap();
        assert_eq!(outcome, TickOutcome::SwapchainRebuilt(RebuildOutcome::Deferred));
        assert!(scheduler.resize_pending());
    }

    #[test]
    fn device_loss_is_fatal() {
        let mut scheduler = FrameScheduler::new(2);
        let mut backend = MockBackend::new(2);
        backend.device_lost = true;

        let err = scheduler.tick(&mut backend).unwrap_err();
        assert!(err.is_device_lost());
        assert_eq!(backend.calls, vec![Call::Wait(0)]);
        assert_eq!(scheduler.frame_count(), 0);
    }

    #[test]
    fn zero_slots_clamped_to_one() {
        let mut scheduler = FrameScheduler::new(0);
        let mut backend = MockBackend::new(1);
        scheduler.tick(&mut backend).unwrap();
        scheduler.tick(&mut backend).unwrap();
        assert_eq!(scheduler.slots(), 1);
        assert_eq!(scheduler.current_slot(), 0);
    }
}
