//! Synchronization primitives for frames in flight.

use crate::error::Result;
use ash::vk;

/// Fence wait that never times out.
pub const NO_TIMEOUT: u64 = u64::MAX;

/// Create a semaphore.
///
/// # Safety
/// The device must be valid.
pub unsafe fn create_semaphore(device: &ash::Device) -> Result<vk::Semaphore> {
    let create_info = vk::SemaphoreCreateInfo::default();
    let semaphore = device.create_semaphore(&create_info, None)?;
    Ok(semaphore)
}

/// Create a fence, optionally already signaled.
///
/// # Safety
/// The device must be valid.
pub unsafe fn create_fence(device: &ash::Device, signaled: bool) -> Result<vk::Fence> {
    let flags = if signaled {
        vk::FenceCreateFlags::SIGNALED
    } else {
        vk::FenceCreateFlags::empty()
    };

    let create_info = vk::FenceCreateInfo::default().flags(flags);
    let fence = device.create_fence(&create_info, None)?;
    Ok(fence)
}

/// Synchronization objects owned by one frame slot.
#[derive(Debug, Clone, Copy)]
pub struct FrameSync {
    /// Signaled by acquire when the swapchain image is ready
    pub image_available: vk::Semaphore,
    /// Signaled by the submit, waited on by present
    pub render_finished: vk::Semaphore,
    /// Signaled when the slot's submission completes
    pub in_flight: vk::Fence,
}

impl FrameSync {
    /// Create the slot's objects. The fence starts signaled so the first
    /// wait on a fresh slot returns immediately.
    ///
    /// # Safety
    /// The device must be valid.
    pub unsafe fn new(device: &ash::Device) -> Result<Self> {
        let image_available = create_semaphore(device)?;
        let render_finished = create_semaphore(device)
            .inspect_err(|_| device.destroy_semaphore(image_available, None))?;
        let in_flight = create_fence(device, true).inspect_err(|_| {
            device.destroy_semaphore(render_finished, None);
            device.destroy_semaphore(image_available, None);
        })?;

        Ok(Self {
            image_available,
            render_finished,
            in_flight,
        })
    }

    /// Create `count` independent slots. On failure none are left behind.
    ///
    /// # Safety
    /// The device must be valid.
    pub unsafe fn create_many(device: &ash::Device, count: usize) -> Result<Vec<Self>> {
        let mut slots = Vec::with_capacity(count);
        for _ in 0..count {
            match Self::new(device) {
                Ok(sync) => slots.push(sync),
                Err(e) => {
                    for sync in &slots {
                        sync.destroy(device);
                    }
                    return Err(e);
                }
            }
        }
        Ok(slots)
    }

    /// Block until the slot's previous submission has completed.
    ///
    /// # Safety
    /// The device must be valid.
    pub unsafe fn wait(&self, device: &ash::Device) -> Result<()> {
        if let Err(e) = device.wait_for_fences(&[self.in_flight], true, NO_TIMEOUT) {
            if e == vk::Result::ERROR_DEVICE_LOST {
                tracing::error!("Device lost while waiting for in-flight fence");
            }
            return Err(e.into());
        }
        Ok(())
    }

    /// Return the fence to the unsignaled state ahead of a submit.
    ///
    /// # Safety
    /// The fence must not be pending.
    pub unsafe fn reset(&self, device: &ash::Device) -> Result<()> {
        device.reset_fences(&[self.in_flight])?;
        Ok(())
    }

    /// Destroy synchronization resources.
    ///
    /// # Safety
    /// The device must be valid and resources must not be in use.
    pub unsafe fn destroy(&self, device: &ash::Device) {
        device.destroy_semaphore(self.image_available, None);
        device.destroy_semaphore(self.render_finished, None);
        device.destroy_fence(self.in_flight, None);
    }
}
