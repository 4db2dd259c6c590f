//! Per-frame command recording.

use ash::vk;
use touhou_gpu::error::Result;

/// Everything one frame's draw reads.
#[derive(Debug, Clone, Copy)]
pub struct DrawParams {
    pub render_pass: vk::RenderPass,
    pub framebuffer: vk::Framebuffer,
    pub extent: vk::Extent2D,
    pub pipeline: vk::Pipeline,
    pub layout: vk::PipelineLayout,
    pub vertex_buffer: vk::Buffer,
    pub index_buffer: vk::Buffer,
    pub index_count: u32,
    pub descriptor_set: vk::DescriptorSet,
    pub clear_color: [f32; 4],
}

/// Full-extent viewport with the standard depth range.
pub fn full_viewport(extent: vk::Extent2D) -> vk::Viewport {
    vk::Viewport {
        x: 0.0,
        y: 0.0,
        width: extent.width as f32,
        height: extent.height as f32,
        min_depth: 0.0,
        max_depth: 1.0,
    }
}

/// Scissor covering the whole extent.
pub fn full_scissor(extent: vk::Extent2D) -> vk::Rect2D {
    vk::Rect2D {
        offset: vk::Offset2D { x: 0, y: 0 },
        extent,
    }
}

/// Records the quad draw into a frame's command buffer.
#[derive(Debug, Default, Clone, Copy)]
pub struct CommandRecorder;

impl CommandRecorder {
    /// Reset `cmd` and record one full frame into it.
    ///
    /// # Safety
    /// `cmd` must come from a resettable pool and must not be pending.
    pub unsafe fn record(
        &self,
        device: &ash::Device,
        cmd: vk::CommandBuffer,
        params: &DrawParams,
    ) -> Result<()> {
        device.reset_command_buffer(cmd, vk::CommandBufferResetFlags::empty())?;

        let begin_info =
            vk::CommandBufferBeginInfo::default().flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        device.begin_command_buffer(cmd, &begin_info)?;

        let clear_values = [vk::ClearValue {
            color: vk::ClearColorValue {
                float32: params.clear_color,
            },
        }];

        let render_pass_info = vk::RenderPassBeginInfo::default()
            .render_pass(params.render_pass)
            .framebuffer(params.framebuffer)
            .render_area(full_scissor(params.extent))
            .clear_values(&clear_values);

        device.cmd_begin_render_pass(cmd, &render_pass_info, vk::SubpassContents::INLINE);
        device.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, params.pipeline);

        device.cmd_set_viewport(cmd, 0, &[full_viewport(params.extent)]);
        device.cmd_set_scissor(cmd, 0, &[full_scissor(params.extent)]);

        device.cmd_bind_vertex_buffers(cmd, 0, &[params.vertex_buffer], &[0]);
        device.cmd_bind_index_buffer(cmd, params.index_buffer, 0, vk::IndexType::UINT16);
        device.cmd_bind_descriptor_sets(
            cmd,
            vk::PipelineBindPoint::GRAPHICS,
            params.layout,
            0,
            &[params.descriptor_set],
            &[],
        );

        device.cmd_draw_indexed(cmd, params.index_count, 1, 0, 0, 0);
        device.cmd_end_render_pass(cmd);

        device.end_command_buffer(cmd)?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn viewport_covers_extent() {
        let extent = vk::Extent2D {
            width: 800,
            height: 600,
        };
        let viewport = full_viewport(extent);

        assert_eq!(viewport.width, 800.0);
        assert_eq!(viewport.height, 600.0);
        assert_eq!((viewport.min_depth, viewport.max_depth), (0.0, 1.0));
        assert_eq!(full_scissor(extent).extent, extent);
        assert_eq!(full_scissor(extent).offset, vk::Offset2D::default());
    }
}
