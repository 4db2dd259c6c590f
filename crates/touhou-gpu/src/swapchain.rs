//! Swapchain management.
//!
//! The choice policy (format, present mode, extent, image count, sharing) is a
//! set of pure functions so it can be checked without a device.
//! [`SwapchainManager`] owns the image chain plus the per-image views and
//! framebuffers, and tears them down and rebuilds them as a unit.

use crate::context::GpuContext;
use crate::error::{GpuError, Result};
use crate::render_pass::RenderPass;
use crate::surface::SurfaceCapabilities;
use ash::vk;
use std::sync::Arc;

/// Select the best surface format.
///
/// Returns `None` only when the surface reports no formats at all.
pub fn select_surface_format(available: &[vk::SurfaceFormatKHR]) -> Option<vk::SurfaceFormatKHR> {
    available
        .iter()
        .copied()
        .find(|format| {
            format.format == vk::Format::B8G8R8A8_SRGB
                && format.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
        })
        .or_else(|| available.first().copied())
}

/// Select the best present mode: mailbox when offered, FIFO otherwise.
pub fn select_present_mode(available: &[vk::PresentModeKHR]) -> vk::PresentModeKHR {
    if available.contains(&vk::PresentModeKHR::MAILBOX) {
        vk::PresentModeKHR::MAILBOX
    } else {
        // FIFO is the only mode every surface must support
        vk::PresentModeKHR::FIFO
    }
}

/// Calculate swapchain extent.
///
/// A `current_extent` of `u32::MAX` means the surface follows the window, so
/// the framebuffer size is clamped into the allowed range per component.
pub fn calculate_extent(
    capabilities: &vk::SurfaceCapabilitiesKHR,
    framebuffer_width: u32,
    framebuffer_height: u32,
) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        capabilities.current_extent
    } else {
        vk::Extent2D {
            width: framebuffer_width.clamp(
                capabilities.min_image_extent.width,
                capabilities.max_image_extent.width,
            ),
            height: framebuffer_height.clamp(
                capabilities.min_image_extent.height,
                capabilities.max_image_extent.height,
            ),
        }
    }
}

/// Determine image count: one more than the minimum, capped by a nonzero maximum.
pub fn select_image_count(capabilities: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let image_count = capabilities.min_image_count + 1;
    if capabilities.max_image_count > 0 && image_count > capabilities.max_image_count {
        capabilities.max_image_count
    } else {
        image_count
    }
}

/// How swapchain images are shared between the graphics and present queues.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SharingPolicy {
    /// One queue family owns the images.
    Exclusive,
    /// Both families access the images; holds `[graphics, present]`.
    Concurrent([u32; 2]),
}

impl SharingPolicy {
    /// Exclusive when both queues come from the same family, concurrent otherwise.
    pub fn from_families(graphics: u32, present: u32) -> Self {
        if graphics == present {
            Self::Exclusive
        } else {
            Self::Concurrent([graphics, present])
        }
    }

    /// Vulkan sharing mode.
    pub fn mode(&self) -> vk::SharingMode {
        match self {
            Self::Exclusive => vk::SharingMode::EXCLUSIVE,
            Self::Concurrent(_) => vk::SharingMode::CONCURRENT,
        }
    }

    /// Queue family indices to declare on the swapchain.
    pub fn queue_family_indices(&self) -> &[u32] {
        match self {
            Self::Exclusive => &[],
            Self::Concurrent(indices) => indices,
        }
    }
}

/// Everything chosen for one swapchain build.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SwapchainPlan {
    pub surface_format: vk::SurfaceFormatKHR,
    pub present_mode: vk::PresentModeKHR,
    pub extent: vk::Extent2D,
    pub image_count: u32,
    pub sharing: SharingPolicy,
    pub pre_transform: vk::SurfaceTransformFlagsKHR,
}

impl SwapchainPlan {
    /// Apply the choice policy to a surface query.
    pub fn new(
        caps: &SurfaceCapabilities,
        framebuffer_size: vk::Extent2D,
        sharing: SharingPolicy,
    ) -> Result<Self> {
        let surface_format = select_surface_format(&caps.formats).ok_or_else(|| {
            GpuError::SwapchainCreation("Surface reports no formats".to_string())
        })?;

        Ok(Self {
            surface_format,
            present_mode: select_present_mode(&caps.present_modes),
            extent: calculate_extent(
                &caps.capabilities,
                framebuffer_size.width,
                framebuffer_size.height,
            ),
            image_count: select_image_count(&caps.capabilities),
            sharing,
            pre_transform: caps.capabilities.current_transform,
        })
    }
}

/// Swapchain images with their views and framebuffers, index for index.
///
/// The length is what the driver returned, which may exceed the requested
/// minimum image count.
#[derive(Debug, Default)]
pub struct SwapchainTargets {
    images: Vec<vk::Image>,
    views: Vec<vk::ImageView>,
    framebuffers: Vec<vk::Framebuffer>,
}

impl SwapchainTargets {
    /// Bundle the three sequences, rejecting any length mismatch.
    pub fn new(
        images: Vec<vk::Image>,
        views: Vec<vk::ImageView>,
        framebuffers: Vec<vk::Framebuffer>,
    ) -> Result<Self> {
        if images.len() != views.len() || views.len() != framebuffers.len() {
            return Err(GpuError::InvalidState(format!(
                "Swapchain targets out of step: {} images, {} views, {} framebuffers",
                images.len(),
                views.len(),
                framebuffers.len()
            )));
        }

        Ok(Self {
            images,
            views,
            framebuffers,
        })
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    pub fn images(&self) -> &[vk::Image] {
        &self.images
    }

    pub fn views(&self) -> &[vk::ImageView] {
        &self.views
    }

    pub fn framebuffers(&self) -> &[vk::Framebuffer] {
        &self.framebuffers
    }

    /// Destroy framebuffers, then views. Images belong to the swapchain.
    ///
    /// # Safety
    /// The device must be idle with respect to these objects.
    unsafe fn destroy(&mut self, device: &ash::Device) {
        for &framebuffer in &self.framebuffers {
            device.destroy_framebuffer(framebuffer, None);
        }
        for &view in &self.views {
            device.destroy_image_view(view, None);
        }
        self.framebuffers.clear();
        self.views.clear();
        self.images.clear();
    }
}

/// Result of asking the swapchain for the next image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireOutcome {
    /// An image was acquired; the semaphore will be signaled.
    Acquired { image_index: u32, suboptimal: bool },
    /// The swapchain no longer matches the surface. Nothing was signaled.
    OutOfDate,
}

/// Result of queueing an image for presentation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentOutcome {
    Presented,
    /// Out of date or suboptimal; the swapchain should be rebuilt.
    Stale,
}

/// Result of a rebuild request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RebuildOutcome {
    Rebuilt,
    /// The framebuffer has zero area; the old swapchain was left in place.
    Deferred,
}

/// Owns the presentable image chain and everything derived from it.
pub struct SwapchainManager {
    device: Arc<ash::Device>,
    loader: ash::khr::swapchain::Device,
    swapchain: vk::SwapchainKHR,
    targets: SwapchainTargets,
    plan: SwapchainPlan,
    render_pass: vk::RenderPass,
    render_pass_format: vk::Format,
    generation: u64,
}

impl SwapchainManager {
    /// Create the swapchain, its views, and one framebuffer per image.
    ///
    /// # Safety
    /// The GPU context and render pass must be valid and outlive the manager.
    pub unsafe fn new(
        gpu: &GpuContext,
        render_pass: &RenderPass,
        framebuffer_size: vk::Extent2D,
    ) -> Result<Self> {
        let loader = ash::khr::swapchain::Device::new(gpu.instance(), gpu.device());
        let sharing =
            SharingPolicy::from_families(gpu.graphics_queue_family(), gpu.present_queue_family());

        let mut manager = Self {
            device: gpu.device_arc(),
            loader,
            swapchain: vk::SwapchainKHR::null(),
            targets: SwapchainTargets::default(),
            plan: SwapchainPlan {
                surface_format: vk::SurfaceFormatKHR::default(),
                present_mode: vk::PresentModeKHR::FIFO,
                extent: framebuffer_size,
                image_count: 0,
                sharing,
                pre_transform: vk::SurfaceTransformFlagsKHR::IDENTITY,
            },
            render_pass: render_pass.handle(),
            render_pass_format: render_pass.format(),
            generation: 0,
        };
        if let Err(e) = manager.build(gpu, framebuffer_size) {
            manager.destroy_chain();
            return Err(e);
        }

        tracing::info!(
            "Swapchain created: {}x{} ({} images, {:?}, {:?})",
            manager.plan.extent.width,
            manager.plan.extent.height,
            manager.targets.len(),
            manager.plan.present_mode,
            manager.plan.sharing.mode(),
        );

        Ok(manager)
    }

    /// Tear down and rebuild the chain for the current framebuffer size.
    ///
    /// Waits for the device to go idle first. A zero-area framebuffer
    /// (minimized window) defers the rebuild and leaves the old chain intact.
    ///
    /// # Safety
    /// The GPU context must be the one this manager was created with.
    pub unsafe fn rebuild(
        &mut self,
        gpu: &GpuContext,
        framebuffer_size: vk::Extent2D,
    ) -> Result<RebuildOutcome> {
        self.device.device_wait_idle()?;

        if framebuffer_size.width == 0 || framebuffer_size.height == 0 {
            tracing::debug!("Swapchain rebuild deferred: framebuffer has zero area");
            return Ok(RebuildOutcome::Deferred);
        }

        self.destroy_chain();
        if let Err(e) = self.build(gpu, framebuffer_size) {
            self.destroy_chain();
            return Err(e);
        }
        self.generation += 1;

        tracing::info!(
            "Swapchain rebuilt: {}x{} ({} images, generation {})",
            self.plan.extent.width,
            self.plan.extent.height,
            self.targets.len(),
            self.generation,
        );

        Ok(RebuildOutcome::Rebuilt)
    }

    unsafe fn build(&mut self, gpu: &GpuContext, framebuffer_size: vk::Extent2D) -> Result<()> {
        let caps = gpu.surface().capabilities(gpu.physical_device())?;
        let plan = SwapchainPlan::new(&caps, framebuffer_size, self.plan.sharing)?;

        if plan.surface_format.format != self.render_pass_format {
            return Err(GpuError::InvalidState(format!(
                "Surface format changed from {:?} to {:?}; render pass is incompatible",
                self.render_pass_format, plan.surface_format.format
            )));
        }

        let create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(gpu.surface().surface)
            .min_image_count(plan.image_count)
            .image_format(plan.surface_format.format)
            .image_color_space(plan.surface_format.color_space)
            .image_extent(plan.extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .image_sharing_mode(plan.sharing.mode())
            .queue_family_indices(plan.sharing.queue_family_indices())
            .pre_transform(plan.pre_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(plan.present_mode)
            .clipped(true);

        let swapchain = self
            .loader
            .create_swapchain(&create_info, None)
            .map_err(|e| GpuError::SwapchainCreation(e.to_string()))?;
        // Owned from here on so destroy_chain reclaims it if a later step fails
        self.swapchain = swapchain;

        let images = self.loader.get_swapchain_images(swapchain)?;
        if images.len() != plan.image_count as usize {
            tracing::info!(
                "Requested {} swapchain images, driver returned {}",
                plan.image_count,
                images.len()
            );
        }

        let mut views = Vec::with_capacity(images.len());
        for &image in &images {
            let view_info = vk::ImageViewCreateInfo::default()
                .image(image)
                .view_type(vk::ImageViewType::TYPE_2D)
                .format(plan.surface_format.format)
                .components(vk::ComponentMapping::default())
                .subresource_range(
                    vk::ImageSubresourceRange::default()
                        .aspect_mask(vk::ImageAspectFlags::COLOR)
                        .base_mip_level(0)
                        .level_count(1)
                        .base_array_layer(0)
                        .layer_count(1),
                );

            match self.device.create_image_view(&view_info, None) {
                Ok(view) => views.push(view),
                Err(e) => {
                    for &view in &views {
                        self.device.destroy_image_view(view, None);
                    }
                    return Err(e.into());
                }
            }
        }

        let mut framebuffers = Vec::with_capacity(views.len());
        for view in &views {
            let framebuffer_info = vk::FramebufferCreateInfo::default()
                .render_pass(self.render_pass)
                .attachments(std::slice::from_ref(view))
                .width(plan.extent.width)
                .height(plan.extent.height)
                .layers(1);

            match self.device.create_framebuffer(&framebuffer_info, None) {
                Ok(framebuffer) => framebuffers.push(framebuffer),
                Err(e) => {
                    for &framebuffer in &framebuffers {
                        self.device.destroy_framebuffer(framebuffer, None);
                    }
                    for &view in &views {
                        self.device.destroy_image_view(view, None);
                    }
                    return Err(e.into());
                }
            }
        }

        self.targets = SwapchainTargets::new(images, views, framebuffers)?;
        self.plan = plan;

        Ok(())
    }

    /// Acquire the next image, signaling `semaphore` when it is ready.
    ///
    /// # Safety
    /// The semaphore must be valid and unsignaled.
    pub unsafe fn acquire_next_image(&self, semaphore: vk::Semaphore) -> Result<AcquireOutcome> {
        let result = self.loader.acquire_next_image(
            self.swapchain,
            u64::MAX,
            semaphore,
            vk::Fence::null(),
        );

        match result {
            Ok((image_index, suboptimal)) => Ok(AcquireOutcome::Acquired {
                image_index,
                suboptimal,
            }),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(AcquireOutcome::OutOfDate),
            Err(e) => Err(GpuError::from(e)),
        }
    }

    /// Present an image.
    ///
    /// # Safety
    /// The queue must support presentation to this surface.
    pub unsafe fn present(
        &self,
        queue: vk::Queue,
        image_index: u32,
        wait_semaphores: &[vk::Semaphore],
    ) -> Result<PresentOutcome> {
        let swapchains = [self.swapchain];
        let image_indices = [image_index];

        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        match self.loader.queue_present(queue, &present_info) {
            Ok(false) => Ok(PresentOutcome::Presented),
            Ok(true) | Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(PresentOutcome::Stale),
            Err(e) => Err(GpuError::from(e)),
        }
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.plan.extent
    }

    pub fn format(&self) -> vk::Format {
        self.plan.surface_format.format
    }

    pub fn plan(&self) -> &SwapchainPlan {
        &self.plan
    }

    pub fn targets(&self) -> &SwapchainTargets {
        &self.targets
    }

    pub fn image_count(&self) -> usize {
        self.targets.len()
    }

    /// Framebuffer for an acquired image index.
    pub fn framebuffer(&self, image_index: u32) -> Result<vk::Framebuffer> {
        self.targets
            .framebuffers
            .get(image_index as usize)
            .copied()
            .ok_or_else(|| {
                GpuError::InvalidState(format!("No framebuffer for image {image_index}"))
            })
    }

    /// Number of completed rebuilds.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    unsafe fn destroy_chain(&mut self) {
        self.targets.destroy(&self.device);
        if self.swapchain != vk::SwapchainKHR::null() {
            self.loader.destroy_swapchain(self.swapchain, None);
            self.swapchain = vk::SwapchainKHR::null();
        }
    }

    /// Destroy framebuffers, views, and the swapchain.
    ///
    /// # Safety
    /// The device must be idle.
    pub unsafe fn destroy(&mut self) {
        self.destroy_chain();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;

    fn caps(min: u32, max: u32) -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            min_image_count: min,
            max_image_count: max,
            current_extent: vk::Extent2D {
                width: u32::MAX,
                height: u32::MAX,
            },
            min_image_extent: vk::Extent2D {
                width: 100,
                height: 50,
            },
            max_image_extent: vk::Extent2D {
                width: 1920,
                height: 1080,
            },
            ..Default::default()
        }
    }

    fn format(format: vk::Format, color_space: vk::ColorSpaceKHR) -> vk::SurfaceFormatKHR {
        vk::SurfaceFormatKHR {
            format,
            color_space,
        }
    }

    #[test]
    fn image_count_unbounded_max() {
        assert_eq!(select_image_count(&caps(2, 0)), 3);
    }

    #[test]
    fn image_count_clamped_to_max() {
        assert_eq!(select_image_count(&caps(2, 2)), 2);
        assert_eq!(select_image_count(&caps(2, 8)), 3);
    }

    #[test]
    fn prefers_bgra_srgb_format() {
        let available = [
            format(vk::Format::R8G8B8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            format(vk::Format::B8G8R8A8_SRGB, vk::ColorSpaceKHR::SRGB_NONLINEAR),
        ];
        assert_eq!(
            select_surface_format(&available),
            Some(available[1])
        );
    }

    #[test]
    fn falls_back_to_first_format() {
        let available = [
            format(vk::Format::R8G8B8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            // Right format, wrong color space
            format(vk::Format::B8G8R8A8_SRGB, vk::ColorSpaceKHR::EXTENDED_SRGB_LINEAR_EXT),
        ];
        assert_eq!(select_surface_format(&available), Some(available[0]));
        assert_eq!(select_surface_format(&[]), None);
    }

    #[test]
    fn present_mode_policy() {
        assert_eq!(
            select_present_mode(&[vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX]),
            vk::PresentModeKHR::MAILBOX
        );
        assert_eq!(
            select_present_mode(&[vk::PresentModeKHR::IMMEDIATE, vk::PresentModeKHR::FIFO]),
            vk::PresentModeKHR::FIFO
        );
        assert_eq!(select_present_mode(&[]), vk::PresentModeKHR::FIFO);
    }

    #[test]
    fn fixed_extent_used_verbatim() {
        let mut c = caps(2, 0);
        c.current_extent = vk::Extent2D {
            width: 800,
            height: 600,
        };
        assert_eq!(calculate_extent(&c, 4000, 10), c.current_extent);
    }

    #[test]
    fn extent_clamped_per_component() {
        let c = caps(2, 0);
        let extent = calculate_extent(&c, 4000, 10);
        assert_eq!(extent.width, 1920);
        assert_eq!(extent.height, 50);

        // Height stays within its own bounds, not the width bounds
        let extent = calculate_extent(&c, 10, 1070);
        assert_eq!(extent.width, 100);
        assert_eq!(extent.height, 1070);
    }

    #[test]
    fn extent_clamping_law() {
        let c = caps(2, 0);
        for width in [0, 1, 99, 100, 101, 960, 1919, 1920, 1921, u32::MAX - 1] {
            for height in [0, 49, 50, 51, 540, 1079, 1080, 1081, u32::MAX - 1] {
                let extent = calculate_extent(&c, width, height);
                assert!(c.min_image_extent.width <= extent.width);
                assert!(extent.width <= c.max_image_extent.width);
                assert!(c.min_image_extent.height <= extent.height);
                assert!(extent.height <= c.max_image_extent.height);
            }
        }
    }

    #[test]
    fn same_family_is_exclusive() {
        let sharing = SharingPolicy::from_families(0, 0);
        assert_eq!(sharing, SharingPolicy::Exclusive);
        assert_eq!(sharing.mode(), vk::SharingMode::EXCLUSIVE);
        assert!(sharing.queue_family_indices().is_empty());
    }

    #[test]
    fn distinct_families_are_concurrent() {
        let sharing = SharingPolicy::from_families(0, 2);
        assert_eq!(sharing.mode(), vk::SharingMode::CONCURRENT);
        assert_eq!(sharing.queue_family_indices(), &[0, 2]);
    }

    #[test]
    fn plan_combines_policy() {
        let surface = SurfaceCapabilities {
            capabilities: caps(2, 0),
            formats: vec![format(
                vk::Format::B8G8R8A8_SRGB,
                vk::ColorSpaceKHR::SRGB_NONLINEAR,
            )],
            present_modes: vec![vk::PresentModeKHR::FIFO],
        };
        let plan = SwapchainPlan::new(
            &surface,
            vk::Extent2D {
                width: 800,
                height: 600,
            },
            SharingPolicy::Exclusive,
        )
        .unwrap();

        assert_eq!(plan.image_count, 3);
        assert_eq!(plan.present_mode, vk::PresentModeKHR::FIFO);
        assert_eq!(
            plan.extent,
            vk::Extent2D {
                width: 800,
                height: 600
            }
        );
    }

    #[test]
    fn plan_rejects_formatless_surface() {
        let surface = SurfaceCapabilities {
            capabilities: caps(2, 0),
            ..Default::default()
        };
        assert!(SwapchainPlan::new(&surface, vk::Extent2D::default(), SharingPolicy::Exclusive)
            .is_err());
    }

    #[test]
    fn targets_keep_cardinality() {
        let images: Vec<_> = (1..=3).map(vk::Image::from_raw).collect();
        let views: Vec<_> = (1..=3).map(vk::ImageView::from_raw).collect();
        let framebuffers: Vec<_> = (1..=3).map(vk::Framebuffer::from_raw).collect();

        let targets = SwapchainTargets::new(images, views, framebuffers).unwrap();
        assert_eq!(targets.len(), 3);
        assert_eq!(targets.images().len(), targets.views().len());
        assert_eq!(targets.views().len(), targets.framebuffers().len());
    }

    #[test]
    fn targets_reject_mismatch() {
        let images: Vec<_> = (1..=3).map(vk::Image::from_raw).collect();
        let views: Vec<_> = (1..=3).map(vk::ImageView::from_raw).collect();
        let framebuffers: Vec<_> = (1..=2).map(vk::Framebuffer::from_raw).collect();

        assert!(SwapchainTargets::new(images, views, framebuffers).is_err());
    }

    #[test]
    fn targets_follow_driver_count_above_request() {
        // min 2 asks for 3; a driver handing back 4 is still a consistent chain
        assert_eq!(select_image_count(&caps(2, 0)), 3);

        let images: Vec<_> = (1..=4).map(vk::Image::from_raw).collect();
        let views: Vec<_> = (1..=4).map(vk::ImageView::from_raw).collect();
        let framebuffers: Vec<_> = (1..=4).map(vk::Framebuffer::from_raw).collect();

        let targets = SwapchainTargets::new(images, views, framebuffers).unwrap();
        assert_eq!(targets.len(), 4);
    }
}
