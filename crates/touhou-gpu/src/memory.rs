//! GPU memory management.

use crate::command::{execute_single_time_commands, CommandPool};
use crate::context::GpuContext;
use crate::error::{GpuError, Result};
use ash::vk;
use gpu_allocator::vulkan::{
    Allocation, AllocationCreateDesc, AllocationScheme, Allocator, AllocatorCreateDesc,
};
use gpu_allocator::MemoryLocation;
use std::sync::Arc;

/// GPU memory allocator wrapper.
pub struct GpuAllocator {
    allocator: Option<Allocator>,
    device: Arc<ash::Device>,
}

impl GpuAllocator {
    /// Create a new allocator.
    ///
    /// # Safety
    /// The instance, device, and physical device must be valid.
    pub unsafe fn new(
        instance: &ash::Instance,
        device: Arc<ash::Device>,
        physical_device: vk::PhysicalDevice,
    ) -> Result<Self> {
        let allocator = Allocator::new(&AllocatorCreateDesc {
            instance: instance.clone(),
            device: (*device).clone(),
            physical_device,
            debug_settings: gpu_allocator::AllocatorDebugSettings {
                log_memory_information: cfg!(debug_assertions),
                log_leaks_on_shutdown: true,
                store_stack_traces: false,
                log_allocations: false,
                log_frees: false,
                log_stack_traces: false,
            },
            // Vulkan 1.1 device; nothing here uses buffer addresses
            buffer_device_address: false,
            allocation_sizes: Default::default(),
        })
        .map_err(|e| GpuError::AllocationFailed(e.to_string()))?;

        Ok(Self {
            allocator: Some(allocator),
            device,
        })
    }

    /// Allocate a buffer and bind its memory.
    ///
    /// `CpuToGpu` buffers come back persistently mapped.
    pub fn create_buffer(
        &mut self,
        size: u64,
        usage: vk::BufferUsageFlags,
        location: MemoryLocation,
        name: &str,
    ) -> Result<GpuBuffer> {
        let buffer_info = vk::BufferCreateInfo::default()
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let buffer = unsafe {
            self.device
                .create_buffer(&buffer_info, None)
                .map_err(GpuError::from)?
        };

        let requirements = unsafe { self.device.get_buffer_memory_requirements(buffer) };

        let allocation = self
            .allocator
            .as_mut()
            .ok_or_else(|| GpuError::InvalidState("Allocator not initialized".to_string()))
            .and_then(|allocator| {
                allocator
                    .allocate(&AllocationCreateDesc {
                        name,
                        requirements,
                        location,
                        linear: true,
                        allocation_scheme: AllocationScheme::GpuAllocatorManaged,
                    })
                    .map_err(|e| GpuError::AllocationFailed(e.to_string()))
            });

        // From here the buffer is freed through the wrapper on any failure
        let mut gpu_buffer = GpuBuffer {
            buffer,
            allocation: None,
            size,
        };
        let allocation = match allocation {
            Ok(allocation) => allocation,
            Err(e) => {
                self.free_buffer(&mut gpu_buffer)?;
                return Err(e);
            }
        };

        let bound = unsafe {
            self.device
                .bind_buffer_memory(buffer, allocation.memory(), allocation.offset())
        };
        gpu_buffer.allocation = Some(allocation);
        if let Err(e) = bound {
            self.free_buffer(&mut gpu_buffer)?;
            return Err(e.into());
        }

        tracing::trace!("Allocated buffer '{}' ({} bytes, {:?})", name, size, location);

        Ok(gpu_buffer)
    }

    /// Free a buffer allocation and destroy the buffer.
    pub fn free_buffer(&mut self, buffer: &mut GpuBuffer) -> Result<()> {
        if let Some(allocation) = buffer.allocation.take() {
            self.allocator
                .as_mut()
                .ok_or_else(|| GpuError::InvalidState("Allocator not initialized".to_string()))?
                .free(allocation)
                .map_err(|e| GpuError::AllocationFailed(e.to_string()))?;
        }

        if buffer.buffer != vk::Buffer::null() {
            unsafe {
                self.device.destroy_buffer(buffer.buffer, None);
            }
            buffer.buffer = vk::Buffer::null();
        }

        Ok(())
    }

    /// Shutdown the allocator, freeing all GPU memory.
    ///
    /// This must be called before the Vulkan device is destroyed.
    /// Any remaining allocations will be freed (and logged as leaks).
    pub fn shutdown(&mut self) {
        if let Some(allocator) = self.allocator.take() {
            drop(allocator);
        }
    }
}

impl Drop for GpuAllocator {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Check that `len` bytes at `offset` fit in a buffer of `size` bytes.
pub fn check_write_range(size: u64, offset: u64, len: usize) -> Result<()> {
    let end = offset
        .checked_add(len as u64)
        .ok_or_else(|| GpuError::InvalidState("Offset overflow".to_string()))?;
    if end > size {
        return Err(GpuError::InvalidState(format!(
            "Write of {len} bytes at offset {offset} exceeds buffer of {size} bytes"
        )));
    }
    Ok(())
}

/// A GPU buffer with its allocation.
pub struct GpuBuffer {
    pub buffer: vk::Buffer,
    pub allocation: Option<Allocation>,
    pub size: u64,
}

impl GpuBuffer {
    /// A buffer with no handle and no memory. Freeing it does nothing.
    pub fn null() -> Self {
        Self {
            buffer: vk::Buffer::null(),
            allocation: None,
            size: 0,
        }
    }

    /// Pointer to the persistent mapping, if the buffer is host-visible.
    pub fn mapped_ptr(&self) -> Option<*mut u8> {
        self.allocation
            .as_ref()
            .and_then(|a| a.mapped_ptr())
            .map(|p| p.as_ptr().cast::<u8>())
    }

    /// Write raw bytes at the given offset (must be host-visible).
    pub fn write_bytes(&self, offset: u64, data: &[u8]) -> Result<()> {
        let ptr = self
            .mapped_ptr()
            .ok_or_else(|| GpuError::InvalidState("Buffer not mapped".to_string()))?;

        check_write_range(self.size, offset, data.len())?;

        unsafe {
            std::ptr::copy_nonoverlapping(data.as_ptr(), ptr.add(offset as usize), data.len());
        }

        Ok(())
    }

    /// Write plain-old-data values from the start of the buffer.
    pub fn write<T: bytemuck::Pod>(&self, data: &[T]) -> Result<()> {
        self.write_bytes(0, bytemuck::cast_slice(data))
    }
}

/// Create a device-local buffer filled with `data` through a staging copy.
///
/// The staging buffer is freed once the copy has completed on `queue`.
pub fn create_staged_buffer<T: bytemuck::Pod>(
    gpu: &GpuContext,
    pool: &CommandPool,
    data: &[T],
    usage: vk::BufferUsageFlags,
    name: &str,
) -> Result<GpuBuffer> {
    let bytes: &[u8] = bytemuck::cast_slice(data);
    let size = bytes.len() as u64;
    if size == 0 {
        return Err(GpuError::InvalidState(format!("Buffer '{name}' has no data")));
    }

    let mut allocator = gpu.allocator().lock();

    let mut staging = allocator.create_buffer(
        size,
        vk::BufferUsageFlags::TRANSFER_SRC,
        MemoryLocation::CpuToGpu,
        &format!("{name} staging"),
    )?;

    let uploaded = staging.write_bytes(0, bytes).and_then(|()| {
        let mut buffer = allocator.create_buffer(
            size,
            usage | vk::BufferUsageFlags::TRANSFER_DST,
            MemoryLocation::GpuOnly,
            name,
        )?;

        let device = gpu.device();
        let copy = unsafe {
            execute_single_time_commands(device, pool, gpu.graphics_queue(), |cmd| {
                let region = vk::BufferCopy::default().size(size);
                device.cmd_copy_buffer(cmd, staging.buffer, buffer.buffer, &[region]);
            })
        };
        match copy {
            Ok(()) => Ok(buffer),
            Err(e) => {
                allocator.free_buffer(&mut buffer)?;
                Err(e)
            }
        }
    });

    allocator.free_buffer(&mut staging)?;
    let buffer = uploaded?;

    tracing::debug!("Uploaded '{}' ({} bytes) via staging", name, size);

    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_range_fits() {
        assert!(check_write_range(64, 0, 64).is_ok());
        assert!(check_write_range(64, 32, 32).is_ok());
        assert!(check_write_range(64, 64, 0).is_ok());
    }

    #[test]
    fn null_buffer_is_unmapped() {
        let buffer = GpuBuffer::null();
        assert_eq!(buffer.buffer, vk::Buffer::null());
        assert!(buffer.mapped_ptr().is_none());
        assert!(buffer.write_bytes(0, &[1, 2, 3]).is_err());
    }

    #[test]
    fn write_range_overflows() {
        assert!(check_write_range(64, 1, 64).is_err());
        assert!(check_write_range(64, u64::MAX, 1).is_err());
    }
}
