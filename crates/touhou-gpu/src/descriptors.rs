//! Descriptor set management.

use crate::error::Result;
use ash::vk;

/// Descriptor set layout builder.
pub struct DescriptorSetLayoutBuilder<'a> {
    bindings: Vec<vk::DescriptorSetLayoutBinding<'a>>,
}

impl<'a> DescriptorSetLayoutBuilder<'a> {
    /// Create a new builder.
    pub fn new() -> Self {
        Self {
            bindings: Vec::new(),
        }
    }

    /// Add a binding.
    pub fn binding(
        mut self,
        binding: u32,
        descriptor_type: vk::DescriptorType,
        count: u32,
        stage_flags: vk::ShaderStageFlags,
    ) -> Self {
        self.bindings.push(
            vk::DescriptorSetLayoutBinding::default()
                .binding(binding)
                .descriptor_type(descriptor_type)
                .descriptor_count(count)
                .stage_flags(stage_flags),
        );
        self
    }

    /// Add a uniform buffer binding.
    pub fn uniform_buffer(self, binding: u32, stage_flags: vk::ShaderStageFlags) -> Self {
        self.binding(binding, vk::DescriptorType::UNIFORM_BUFFER, 1, stage_flags)
    }

    /// Bindings added so far.
    pub fn bindings(&self) -> &[vk::DescriptorSetLayoutBinding<'a>] {
        &self.bindings
    }

    /// Build the descriptor set layout.
    ///
    /// # Safety
    /// The device must be valid.
    pub unsafe fn build(self, device: &ash::Device) -> Result<vk::DescriptorSetLayout> {
        let layout_info = vk::DescriptorSetLayoutCreateInfo::default().bindings(&self.bindings);

        let layout = device.create_descriptor_set_layout(&layout_info, None)?;
        Ok(layout)
    }
}

impl Default for DescriptorSetLayoutBuilder<'_> {
    fn default() -> Self {
        Self::new()
    }
}

/// Descriptor pool for allocating descriptor sets.
pub struct DescriptorPool {
    pool: vk::DescriptorPool,
}

impl DescriptorPool {
    /// Create a pool holding `sets` sets of one uniform buffer each.
    ///
    /// # Safety
    /// The device must be valid.
    pub unsafe fn for_uniform_buffers(device: &ash::Device, sets: u32) -> Result<Self> {
        let pool_sizes = [vk::DescriptorPoolSize::default()
            .ty(vk::DescriptorType::UNIFORM_BUFFER)
            .descriptor_count(sets)];

        let create_info = vk::DescriptorPoolCreateInfo::default()
            .max_sets(sets)
            .pool_sizes(&pool_sizes);

        let pool = device.create_descriptor_pool(&create_info, None)?;
        Ok(Self { pool })
    }

    /// Get the raw pool handle.
    pub fn handle(&self) -> vk::DescriptorPool {
        self.pool
    }

    /// Allocate one set per layout entry.
    ///
    /// # Safety
    /// The device must be valid.
    pub unsafe fn allocate(
        &self,
        device: &ash::Device,
        layouts: &[vk::DescriptorSetLayout],
    ) -> Result<Vec<vk::DescriptorSet>> {
        let alloc_info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(self.pool)
            .set_layouts(layouts);

        let sets = device.allocate_descriptor_sets(&alloc_info)?;
        Ok(sets)
    }

    /// Destroy the pool; its sets go with it.
    ///
    /// # Safety
    /// The device must be valid and the pool must not be in use.
    pub unsafe fn destroy(&self, device: &ash::Device) {
        device.destroy_descriptor_pool(self.pool, None);
    }
}

/// Point a uniform buffer binding at a buffer range.
///
/// # Safety
/// Device and buffer must be valid.
pub unsafe fn write_uniform_buffer(
    device: &ash::Device,
    dst_set: vk::DescriptorSet,
    binding: u32,
    buffer: vk::Buffer,
    offset: u64,
    range: u64,
) {
    let buffer_info = vk::DescriptorBufferInfo::default()
        .buffer(buffer)
        .offset(offset)
        .range(range);

    let write = vk::WriteDescriptorSet::default()
        .dst_set(dst_set)
        .dst_binding(binding)
        .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
        .buffer_info(std::slice::from_ref(&buffer_info));

    device.update_descriptor_sets(&[write], &[]);
}
