//! Vulkan state behind the frame scheduler.

use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use ash::vk;
use touhou_gpu::command::{submit_frame, CommandPool};
use touhou_gpu::error::{GpuError, Result};
use touhou_gpu::render_pass::RenderPass;
use touhou_gpu::swapchain::{
    select_surface_format, AcquireOutcome, PresentOutcome, RebuildOutcome, SwapchainManager,
};
use touhou_gpu::sync::FrameSync;
use touhou_gpu::{GpuContext, GpuContextBuilder};
use touhou_render::{
    CommandRecorder, DrawParams, QuadPipeline, ResourcePool, ShaderSet, UniformBufferObject,
    QUAD_INDICES, QUAD_VERTICES,
};
use winit::window::Window;

use crate::config::AppConfig;
use crate::scheduler::{FrameBackend, MAX_FRAMES_IN_FLIGHT};

/// Objects owned by one frame slot.
struct FrameSlot {
    command_buffer: vk::CommandBuffer,
    sync: FrameSync,
}

/// Everything the renderer owns, in creation order.
///
/// `gpu` is declared before `window` so the surface goes before the window it
/// was made from.
pub struct AppContext {
    gpu: GpuContext,
    render_pass: RenderPass,
    swapchain: SwapchainManager,
    pipeline: QuadPipeline,
    command_pool: CommandPool,
    resources: ResourcePool,
    slots: Vec<FrameSlot>,
    recorder: CommandRecorder,
    clear_color: [f32; 4],
    start_time: Instant,
    window: Arc<Window>,
}

/// Framebuffer size of a window as a Vulkan extent.
fn framebuffer_extent(window: &Window) -> vk::Extent2D {
    let size = window.inner_size();
    vk::Extent2D {
        width: size.width,
        height: size.height,
    }
}

/// Renderer objects in the order [`AppContext::new`] creates them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SetupStage {
    RenderPass,
    Swapchain,
    Pipeline,
    CommandPool,
    Resources,
    FrameSync,
}

const SETUP_ORDER: [SetupStage; 6] = [
    SetupStage::RenderPass,
    SetupStage::Swapchain,
    SetupStage::Pipeline,
    SetupStage::CommandPool,
    SetupStage::Resources,
    SetupStage::FrameSync,
];

/// Stages to destroy, newest first, given which ones exist.
fn teardown_order(exists: impl Fn(SetupStage) -> bool) -> Vec<SetupStage> {
    SETUP_ORDER
        .iter()
        .rev()
        .copied()
        .filter(|&stage| exists(stage))
        .collect()
}

/// Objects created so far by [`AppContext::new`].
///
/// Dropped with anything still inside when setup fails partway, which
/// destroys those objects newest first while the device is still alive.
struct PartialSetup<'a> {
    gpu: &'a GpuContext,
    render_pass: Option<RenderPass>,
    swapchain: Option<SwapchainManager>,
    pipeline: Option<QuadPipeline>,
    command_pool: Option<CommandPool>,
    resources: Option<ResourcePool>,
    syncs: Vec<FrameSync>,
}

/// Everything [`PartialSetup::finish`] hands over.
struct SetupParts {
    render_pass: RenderPass,
    swapchain: SwapchainManager,
    pipeline: QuadPipeline,
    command_pool: CommandPool,
    resources: ResourcePool,
    syncs: Vec<FrameSync>,
}

impl<'a> PartialSetup<'a> {
    fn new(gpu: &'a GpuContext) -> Self {
        Self {
            gpu,
            render_pass: None,
            swapchain: None,
            pipeline: None,
            command_pool: None,
            resources: None,
            syncs: Vec::new(),
        }
    }

    fn holds(&self, stage: SetupStage) -> bool {
        match stage {
            SetupStage::RenderPass => self.render_pass.is_some(),
            SetupStage::Swapchain => self.swapchain.is_some(),
            SetupStage::Pipeline => self.pipeline.is_some(),
            SetupStage::CommandPool => self.command_pool.is_some(),
            SetupStage::Resources => self.resources.is_some(),
            SetupStage::FrameSync => !self.syncs.is_empty(),
        }
    }

    /// Hand over every object, or `None` if a stage is missing.
    fn finish(mut self) -> Option<SetupParts> {
        if !SETUP_ORDER.iter().all(|&stage| self.holds(stage)) {
            return None;
        }

        let (
            Some(render_pass),
            Some(swapchain),
            Some(pipeline),
            Some(command_pool),
            Some(resources),
        ) = (
            self.render_pass.take(),
            self.swapchain.take(),
            self.pipeline.take(),
            self.command_pool.take(),
            self.resources.take(),
        )
        else {
            return None;
        };

        Some(SetupParts {
            render_pass,
            swapchain,
            pipeline,
            command_pool,
            resources,
            syncs: std::mem::take(&mut self.syncs),
        })
    }
}

impl Drop for PartialSetup<'_> {
    fn drop(&mut self) {
        let stages = teardown_order(|stage| self.holds(stage));
        if stages.is_empty() {
            return;
        }

        tracing::warn!("Setup incomplete, destroying {} created stages", stages.len());
        if let Err(e) = self.gpu.wait_idle() {
            tracing::error!("Failed to wait idle: {e}");
        }

        let device = self.gpu.device();
        for stage in stages {
            tracing::debug!("Destroying {:?}", stage);
            // SAFETY: the device is idle and nothing outside this guard holds these objects
            unsafe {
                match stage {
                    SetupStage::FrameSync => {
                        for sync in self.syncs.drain(..) {
                            sync.destroy(device);
                        }
                    }
                    SetupStage::Resources => {
                        if let Some(mut resources) = self.resources.take() {
                            if let Err(e) = resources.destroy(self.gpu) {
                                tracing::error!("Failed to free buffers: {e}");
                            }
                        }
                    }
                    SetupStage::CommandPool => {
                        if let Some(pool) = self.command_pool.take() {
                            pool.destroy(device);
                        }
                    }
                    SetupStage::Pipeline => {
                        if let Some(pipeline) = self.pipeline.take() {
                            pipeline.destroy(device);
                        }
                    }
                    SetupStage::Swapchain => {
                        if let Some(mut swapchain) = self.swapchain.take() {
                            swapchain.destroy();
                        }
                    }
                    SetupStage::RenderPass => {
                        if let Some(render_pass) = self.render_pass.take() {
                            render_pass.destroy(device);
                        }
                    }
                }
            }
        }
    }
}

impl AppContext {
    /// Run the whole setup sequence for a window.
    ///
    /// On failure every object created so far is destroyed before the GPU
    /// context drops.
    pub fn new(window: Arc<Window>, config: &AppConfig) -> anyhow::Result<Self> {
        // Plain file reads, so a missing shader stops us before any Vulkan object exists
        let shaders = ShaderSet::load(&config.shader_dir).with_context(|| {
            format!("Failed to load shaders from {}", config.shader_dir.display())
        })?;

        let gpu = GpuContextBuilder::new()
            .app_name(&config.title)
            .validation(config.validation)
            .build(window.as_ref())
            .context("GPU setup failed")?;

        let (parts, command_buffers) = Self::create_renderer(&gpu, &window, &shaders)?;

        let slots = command_buffers
            .into_iter()
            .zip(parts.syncs)
            .map(|(command_buffer, sync)| FrameSlot {
                command_buffer,
                sync,
            })
            .collect::<Vec<_>>();
        tracing::info!("Created {} frame slots", slots.len());

        Ok(Self {
            gpu,
            render_pass: parts.render_pass,
            swapchain: parts.swapchain,
            pipeline: parts.pipeline,
            command_pool: parts.command_pool,
            resources: parts.resources,
            slots,
            recorder: CommandRecorder,
            clear_color: config.clear_color,
            start_time: Instant::now(),
            window,
        })
    }

    /// Create every object below the GPU context through a [`PartialSetup`].
    fn create_renderer(
        gpu: &GpuContext,
        window: &Window,
        shaders: &ShaderSet,
    ) -> anyhow::Result<(SetupParts, Vec<vk::CommandBuffer>)> {
        let device = gpu.device();
        let mut setup = PartialSetup::new(gpu);

        let surface_format = {
            let caps = gpu.surface().capabilities(gpu.physical_device())?;
            select_surface_format(&caps.formats)
                .ok_or_else(|| GpuError::SwapchainCreation("Surface reports no formats".into()))?
        };
        let render_pass = setup
            .render_pass
            .insert(unsafe { RenderPass::new(device, surface_format.format) }?);

        let swapchain = unsafe { SwapchainManager::new(gpu, render_pass, framebuffer_extent(window)) }
            .context("Swapchain creation failed")?;
        setup.swapchain = Some(swapchain);

        let pipeline = setup
            .pipeline
            .insert(unsafe { QuadPipeline::new(device, render_pass, shaders) }?);

        let command_pool = setup
            .command_pool
            .insert(unsafe { CommandPool::new(device, gpu.graphics_queue_family()) }?);

        let resources = unsafe {
            ResourcePool::new(
                gpu,
                command_pool,
                pipeline.descriptor_set_layout(),
                MAX_FRAMES_IN_FLIGHT,
                &QUAD_VERTICES,
                &QUAD_INDICES,
            )
        }?;
        setup.resources = Some(resources);

        // Freed with the pool if anything below fails
        let command_buffers =
            unsafe { command_pool.allocate_primary(device, MAX_FRAMES_IN_FLIGHT as u32) }?;
        setup.syncs = unsafe { FrameSync::create_many(device, MAX_FRAMES_IN_FLIGHT) }?;

        let parts = setup
            .finish()
            .ok_or_else(|| GpuError::InvalidState("Renderer setup left a stage empty".into()))?;

        Ok((parts, command_buffers))
    }

    pub fn window(&self) -> &Window {
        &self.window
    }

    pub fn gpu(&self) -> &GpuContext {
        &self.gpu
    }

    /// Current swapchain extent.
    pub fn extent(&self) -> vk::Extent2D {
        self.swapchain.extent()
    }

    /// Width over height of the swapchain, 1.0 for a degenerate extent.
    pub fn aspect_ratio(&self) -> f32 {
        let extent = self.extent();
        if extent.height == 0 {
            1.0
        } else {
            extent.width as f32 / extent.height as f32
        }
    }

    fn slot(&self, slot: usize) -> Result<&FrameSlot> {
        self.slots
            .get(slot)
            .ok_or_else(|| GpuError::InvalidState(format!("No frame slot {slot}")))
    }

    /// Destroy everything except the GPU context, newest first.
    ///
    /// # Safety
    /// Nothing may be pending on the device afterwards; the call waits for idle itself.
    pub(crate) unsafe fn cleanup(&mut self) {
        if let Err(e) = self.gpu.wait_idle() {
            tracing::error!("Failed to wait idle: {e}");
        }

        let device = self.gpu.device();

        // SAFETY: the device is idle, so nothing below is still referenced by the GPU
        unsafe {
            for slot in &self.slots {
                slot.sync.destroy(device);
            }
            self.slots.clear();

            if let Err(e) = self.resources.destroy(&self.gpu) {
                tracing::error!("Failed to free buffers: {e}");
            }

            // Frees the slot command buffers as well
            self.command_pool.destroy(device);

            self.pipeline.destroy(device);
            self.swapchain.destroy();
            self.render_pass.destroy(device);
        }

        tracing::info!("Renderer resources destroyed");
    }
}

impl FrameBackend for AppContext {
    fn wait_for_slot(&mut self, slot: usize) -> Result<()> {
        let sync = self.slot(slot)?.sync;
        unsafe { sync.wait(self.gpu.device()) }
    }

    fn acquire(&mut self, slot: usize) -> Result<AcquireOutcome> {
        let semaphore = self.slot(slot)?.sync.image_available;
        unsafe { self.swapchain.acquire_next_image(semaphore) }
    }

    fn reset_fence(&mut self, slot: usize) -> Result<()> {
        let sync = self.slot(slot)?.sync;
        unsafe { sync.reset(self.gpu.device()) }
    }

    fn update_uniforms(&mut self, slot: usize) -> Result<()> {
        let elapsed = self.start_time.elapsed().as_secs_f32();
        let ubo = UniformBufferObject::spinning(elapsed, self.aspect_ratio());
        self.resources.update_uniforms(slot, &ubo)
    }

    fn record(&mut self, slot: usize, image_index: u32) -> Result<()> {
        let command_buffer = self.slot(slot)?.command_buffer;
        let params = DrawParams {
            render_pass: self.render_pass.handle(),
            framebuffer: self.swapchain.framebuffer(image_index)?,
            extent: self.swapchain.extent(),
            pipeline: self.pipeline.pipeline(),
            layout: self.pipeline.layout(),
            vertex_buffer: self.resources.vertex_buffer(),
            index_buffer: self.resources.index_buffer(),
            index_count: self.resources.index_count(),
            descriptor_set: self.resources.descriptor_set(slot)?,
            clear_color: self.clear_color,
        };

        unsafe {
            self.recorder
                .record(self.gpu.device(), command_buffer, &params)
        }
    }

    fn submit(&mut self, slot: usize) -> Result<()> {
        let frame = self.slot(slot)?;
        unsafe {
            submit_frame(
                self.gpu.device(),
                self.gpu.graphics_queue(),
                frame.command_buffer,
                frame.sync.image_available,
                vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
                frame.sync.render_finished,
                frame.sync.in_flight,
            )
        }
    }

    fn present(&mut self, slot: usize, image_index: u32) -> Result<PresentOutcome> {
        let render_finished = self.slot(slot)?.sync.render_finished;
        unsafe {
            self.swapchain
                .present(self.gpu.present_queue(), image_index, &[render_finished])
        }
    }

    fn rebuild_swapchain(&mut self) -> Result<RebuildOutcome> {
        let size = framebuffer_extent(&self.window);
        unsafe { self.swapchain.rebuild(&self.gpu, size) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_teardown_reverses_creation() {
        let order = teardown_order(|_| true);
        let mut expected = SETUP_ORDER.to_vec();
        expected.reverse();
        assert_eq!(order, expected);
    }

    #[test]
    fn failed_pipeline_tears_down_swapchain_then_render_pass() {
        // Shader or pipeline failure: only the first two stages exist
        let created = [SetupStage::RenderPass, SetupStage::Swapchain];
        let order = teardown_order(|stage| created.contains(&stage));
        assert_eq!(order, vec![SetupStage::Swapchain, SetupStage::RenderPass]);
    }

    #[test]
    fn nothing_created_nothing_destroyed() {
        assert!(teardown_order(|_| false).is_empty());
    }

    #[test]
    fn swapchain_goes_before_render_pass_and_pool_after_its_users() {
        let order = teardown_order(|_| true);
        let position = |stage| order.iter().position(|&s| s == stage).unwrap();

        assert!(position(SetupStage::Swapchain) < position(SetupStage::RenderPass));
        assert!(position(SetupStage::Pipeline) < position(SetupStage::RenderPass));
        assert!(position(SetupStage::Resources) < position(SetupStage::CommandPool));
        assert!(position(SetupStage::FrameSync) < position(SetupStage::CommandPool));
    }
}
