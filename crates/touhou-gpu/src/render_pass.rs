//! Render pass for presenting to swapchain images.

use crate::error::{GpuError, Result};
use ash::vk;

/// Single-subpass render pass with one color attachment that ends in
/// `PRESENT_SRC_KHR`.
pub struct RenderPass {
    render_pass: vk::RenderPass,
    format: vk::Format,
}

impl RenderPass {
    /// Create the render pass for a swapchain color format.
    ///
    /// # Safety
    /// The device must be valid.
    pub unsafe fn new(device: &ash::Device, format: vk::Format) -> Result<Self> {
        let color_attachment = vk::AttachmentDescription::default()
            .format(format)
            .samples(vk::SampleCountFlags::TYPE_1)
            .load_op(vk::AttachmentLoadOp::CLEAR)
            .store_op(vk::AttachmentStoreOp::STORE)
            .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
            .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .final_layout(vk::ImageLayout::PRESENT_SRC_KHR);

        let color_ref = vk::AttachmentReference::default()
            .attachment(0)
            .layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL);

        let subpass = vk::SubpassDescription::default()
            .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
            .color_attachments(std::slice::from_ref(&color_ref));

        // The layout transition must wait for the acquire semaphore, which is
        // waited at COLOR_ATTACHMENT_OUTPUT
        let dependency = vk::SubpassDependency::default()
            .src_subpass(vk::SUBPASS_EXTERNAL)
            .dst_subpass(0)
            .src_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
            .src_access_mask(vk::AccessFlags::empty())
            .dst_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
            .dst_access_mask(vk::AccessFlags::COLOR_ATTACHMENT_WRITE);

        let create_info = vk::RenderPassCreateInfo::default()
            .attachments(std::slice::from_ref(&color_attachment))
            .subpasses(std::slice::from_ref(&subpass))
            .dependencies(std::slice::from_ref(&dependency));

        let render_pass = device
            .create_render_pass(&create_info, None)
            .map_err(|e| GpuError::PipelineCreation(format!("Render pass: {e}")))?;

        tracing::info!("Render pass created for {:?}", format);

        Ok(Self {
            render_pass,
            format,
        })
    }

    pub fn handle(&self) -> vk::RenderPass {
        self.render_pass
    }

    /// Color format the pass was built for.
    pub fn format(&self) -> vk::Format {
        self.format
    }

    /// Destroy the render pass.
    ///
    /// # Safety
    /// No framebuffer or pipeline created against it may still be in use.
    pub unsafe fn destroy(&self, device: &ash::Device) {
        device.destroy_render_pass(self.render_pass, None);
    }
}
