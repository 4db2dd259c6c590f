//! GPU buffers backing the quad draw.

use crate::geometry::Vertex;
use crate::uniforms::UniformBufferObject;
use ash::vk;
use gpu_allocator::MemoryLocation;
use touhou_gpu::command::CommandPool;
use touhou_gpu::context::GpuContext;
use touhou_gpu::descriptors::{write_uniform_buffer, DescriptorPool};
use touhou_gpu::error::{GpuError, Result};
use touhou_gpu::memory::{create_staged_buffer, GpuBuffer};

/// Geometry buffers plus one uniform buffer and descriptor set per frame slot.
///
/// Geometry is uploaded once through a staging buffer. Uniform buffers stay
/// mapped and are rewritten in place each frame.
pub struct ResourcePool {
    vertex_buffer: GpuBuffer,
    index_buffer: GpuBuffer,
    index_count: u32,
    uniform_buffers: Vec<GpuBuffer>,
    descriptor_pool: Option<DescriptorPool>,
    descriptor_sets: Vec<vk::DescriptorSet>,
}

impl ResourcePool {
    /// Upload geometry and create the per-slot uniform state.
    ///
    /// Anything created before a failure is freed before the error returns.
    ///
    /// # Safety
    /// `descriptor_set_layout` must declare a uniform buffer at binding 0.
    pub unsafe fn new(
        gpu: &GpuContext,
        command_pool: &CommandPool,
        descriptor_set_layout: vk::DescriptorSetLayout,
        slots: usize,
        vertices: &[Vertex],
        indices: &[u16],
    ) -> Result<Self> {
        let mut pool = Self {
            vertex_buffer: GpuBuffer::null(),
            index_buffer: GpuBuffer::null(),
            index_count: indices.len() as u32,
            uniform_buffers: Vec::with_capacity(slots),
            descriptor_pool: None,
            descriptor_sets: Vec::new(),
        };

        if let Err(e) = pool.populate(
            gpu,
            command_pool,
            descriptor_set_layout,
            slots,
            vertices,
            indices,
        ) {
            if let Err(free_err) = pool.destroy(gpu) {
                tracing::error!("Failed to free partial buffers: {free_err}");
            }
            return Err(e);
        }

        Ok(pool)
    }

    unsafe fn populate(
        &mut self,
        gpu: &GpuContext,
        command_pool: &CommandPool,
        descriptor_set_layout: vk::DescriptorSetLayout,
        slots: usize,
        vertices: &[Vertex],
        indices: &[u16],
    ) -> Result<()> {
        let device = gpu.device();

        self.vertex_buffer = create_staged_buffer(
            gpu,
            command_pool,
            vertices,
            vk::BufferUsageFlags::VERTEX_BUFFER,
            "quad_vertices",
        )?;
        self.index_buffer = create_staged_buffer(
            gpu,
            command_pool,
            indices,
            vk::BufferUsageFlags::INDEX_BUFFER,
            "quad_indices",
        )?;
        tracing::info!(
            "Geometry uploaded: {} vertices, {} indices",
            vertices.len(),
            indices.len()
        );

        {
            let mut allocator = gpu.allocator().lock();
            for i in 0..slots {
                self.uniform_buffers.push(allocator.create_buffer(
                    UniformBufferObject::SIZE,
                    vk::BufferUsageFlags::UNIFORM_BUFFER,
                    MemoryLocation::CpuToGpu,
                    &format!("uniforms_{i}"),
                )?);
            }
        }

        let descriptor_pool = self
            .descriptor_pool
            .insert(DescriptorPool::for_uniform_buffers(device, slots as u32)?);
        let layouts = vec![descriptor_set_layout; slots];
        self.descriptor_sets = descriptor_pool.allocate(device, &layouts)?;

        for (set, buffer) in self.descriptor_sets.iter().zip(&self.uniform_buffers) {
            write_uniform_buffer(device, *set, 0, buffer.buffer, 0, UniformBufferObject::SIZE);
        }

        tracing::info!("Uniform buffers and descriptor sets created for {} slots", slots);

        Ok(())
    }

    /// Write a slot's uniform buffer. The slot's fence must have been waited on.
    pub fn update_uniforms(&self, slot: usize, ubo: &UniformBufferObject) -> Result<()> {
        self.uniform_buffers
            .get(slot)
            .ok_or_else(|| GpuError::InvalidState(format!("No uniform buffer for slot {slot}")))?
            .write(std::slice::from_ref(ubo))
    }

    pub fn descriptor_set(&self, slot: usize) -> Result<vk::DescriptorSet> {
        self.descriptor_sets
            .get(slot)
            .copied()
            .ok_or_else(|| GpuError::InvalidState(format!("No descriptor set for slot {slot}")))
    }

    pub fn vertex_buffer(&self) -> vk::Buffer {
        self.vertex_buffer.buffer
    }

    pub fn index_buffer(&self) -> vk::Buffer {
        self.index_buffer.buffer
    }

    pub fn index_count(&self) -> u32 {
        self.index_count
    }

    pub fn slots(&self) -> usize {
        self.uniform_buffers.len()
    }

    /// Free every buffer and the descriptor pool.
    ///
    /// # Safety
    /// The device must be idle.
    pub unsafe fn destroy(&mut self, gpu: &GpuContext) -> Result<()> {
        if let Some(descriptor_pool) = self.descriptor_pool.take() {
            descriptor_pool.destroy(gpu.device());
        }
        self.descriptor_sets.clear();

        let mut allocator = gpu.allocator().lock();
        for buffer in &mut self.uniform_buffers {
            allocator.free_buffer(buffer)?;
        }
        self.uniform_buffers.clear();
        allocator.free_buffer(&mut self.index_buffer)?;
        allocator.free_buffer(&mut self.vertex_buffer)?;

        Ok(())
    }
}
