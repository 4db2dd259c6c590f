//! Command pool and submission helpers.

use crate::error::{GpuError, Result};
use ash::vk;

/// Command pool for allocating command buffers.
pub struct CommandPool {
    pool: vk::CommandPool,
    queue_family: u32,
}

impl CommandPool {
    /// Create a pool whose buffers can be reset individually.
    ///
    /// # Safety
    /// The device must be valid and the queue family must exist.
    pub unsafe fn new(device: &ash::Device, queue_family: u32) -> Result<Self> {
        let create_info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(queue_family)
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);

        let pool = device.create_command_pool(&create_info, None)?;

        tracing::debug!("Command pool created for queue family {}", queue_family);

        Ok(Self { pool, queue_family })
    }

    /// Get the raw pool handle.
    pub fn handle(&self) -> vk::CommandPool {
        self.pool
    }

    /// Get the queue family index.
    pub fn queue_family(&self) -> u32 {
        self.queue_family
    }

    /// Allocate `count` primary command buffers.
    ///
    /// # Safety
    /// The device must be valid.
    pub unsafe fn allocate_primary(
        &self,
        device: &ash::Device,
        count: u32,
    ) -> Result<Vec<vk::CommandBuffer>> {
        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(self.pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(count);

        let buffers = device.allocate_command_buffers(&alloc_info)?;
        Ok(buffers)
    }

    /// Destroy the command pool, freeing every buffer allocated from it.
    ///
    /// # Safety
    /// The device must be valid and the pool must not be in use.
    pub unsafe fn destroy(&self, device: &ash::Device) {
        device.destroy_command_pool(self.pool, None);
    }
}

/// Submit one command buffer with a single wait and a single signal semaphore.
///
/// # Safety
/// All handles must be valid; the fence must be unsignaled.
pub unsafe fn submit_frame(
    device: &ash::Device,
    queue: vk::Queue,
    command_buffer: vk::CommandBuffer,
    wait_semaphore: vk::Semaphore,
    wait_stage: vk::PipelineStageFlags,
    signal_semaphore: vk::Semaphore,
    fence: vk::Fence,
) -> Result<()> {
    let command_buffers = [command_buffer];
    let wait_semaphores = [wait_semaphore];
    let wait_stages = [wait_stage];
    let signal_semaphores = [signal_semaphore];

    let submit_info = vk::SubmitInfo::default()
        .command_buffers(&command_buffers)
        .wait_semaphores(&wait_semaphores)
        .wait_dst_stage_mask(&wait_stages)
        .signal_semaphores(&signal_semaphores);

    device.queue_submit(queue, &[submit_info], fence)?;
    Ok(())
}

/// Record, submit, and wait for a one-shot command buffer.
///
/// # Safety
/// All handles must be valid.
pub unsafe fn execute_single_time_commands<F>(
    device: &ash::Device,
    pool: &CommandPool,
    queue: vk::Queue,
    f: F,
) -> Result<()>
where
    F: FnOnce(vk::CommandBuffer),
{
    let cmd = pool
        .allocate_primary(device, 1)?
        .into_iter()
        .next()
        .ok_or_else(|| GpuError::InvalidState("Command buffer allocation returned none".into()))?;

    let begin_info =
        vk::CommandBufferBeginInfo::default().flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
    device.begin_command_buffer(cmd, &begin_info)?;
    f(cmd);
    device.end_command_buffer(cmd)?;

    let cmd_buffers = [cmd];
    let submit_info = vk::SubmitInfo::default().command_buffers(&cmd_buffers);
    device.queue_submit(queue, &[submit_info], vk::Fence::null())?;
    device.queue_wait_idle(queue)?;

    device.free_command_buffers(pool.handle(), &[cmd]);

    Ok(())
}
