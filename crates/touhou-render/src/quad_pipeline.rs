//! Pipeline and descriptor layout for the spinning quad.

use crate::geometry::Vertex;
use crate::shader::ShaderSet;
use ash::vk;
use touhou_gpu::descriptors::DescriptorSetLayoutBuilder;
use touhou_gpu::error::Result;
use touhou_gpu::pipeline::{GraphicsPipeline, GraphicsPipelineConfig};
use touhou_gpu::render_pass::RenderPass;

/// Graphics pipeline drawing [`Vertex`] data with a uniform buffer at set 0, binding 0.
pub struct QuadPipeline {
    descriptor_set_layout: vk::DescriptorSetLayout,
    pipeline: GraphicsPipeline,
}

impl QuadPipeline {
    /// # Safety
    /// The device and render pass must be valid.
    pub unsafe fn new(
        device: &ash::Device,
        render_pass: &RenderPass,
        shaders: &ShaderSet,
    ) -> Result<Self> {
        let descriptor_set_layout = DescriptorSetLayoutBuilder::new()
            .uniform_buffer(0, vk::ShaderStageFlags::VERTEX)
            .build(device)?;

        let config = GraphicsPipelineConfig {
            vertex_shader: shaders.vertex.clone(),
            fragment_shader: shaders.fragment.clone(),
            vertex_bindings: vec![Vertex::binding_description()],
            vertex_attributes: Vertex::attribute_descriptions().to_vec(),
            render_pass: render_pass.handle(),
            ..Default::default()
        };

        let pipeline = match GraphicsPipeline::new(device, &config, &[descriptor_set_layout]) {
            Ok(pipeline) => pipeline,
            Err(e) => {
                device.destroy_descriptor_set_layout(descriptor_set_layout, None);
                return Err(e);
            }
        };

        Ok(Self {
            descriptor_set_layout,
            pipeline,
        })
    }

    pub fn descriptor_set_layout(&self) -> vk::DescriptorSetLayout {
        self.descriptor_set_layout
    }

    pub fn pipeline(&self) -> vk::Pipeline {
        self.pipeline.pipeline
    }

    pub fn layout(&self) -> vk::PipelineLayout {
        self.pipeline.layout
    }

    /// # Safety
    /// The pipeline must not be in use.
    pub unsafe fn destroy(&self, device: &ash::Device) {
        self.pipeline.destroy(device);
        device.destroy_descriptor_set_layout(self.descriptor_set_layout, None);
    }
}
