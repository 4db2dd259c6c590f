//! GPU context management.

use crate::capabilities::{required_device_extensions, required_device_features, DeviceProfile};
use crate::debug::DebugMessenger;
use crate::error::{GpuError, Result};
use crate::instance::{create_instance, select_physical_device};
use crate::memory::GpuAllocator;
use crate::surface::SurfaceContext;
use ash::vk;
use parking_lot::Mutex;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use std::sync::Arc;

/// Graphics and present queue family mapping for one physical device.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueFamilyIndices {
    pub graphics: Option<u32>,
    pub present: Option<u32>,
}

impl QueueFamilyIndices {
    /// Both roles have a family.
    pub fn is_complete(&self) -> bool {
        self.graphics.is_some() && self.present.is_some()
    }

    /// Build the mapping from per-family `(graphics, present)` support flags.
    ///
    /// A family that does both wins; otherwise the first family of each kind.
    pub fn from_family_support(support: &[(bool, bool)]) -> Self {
        if let Some(both) = support
            .iter()
            .position(|&(graphics, present)| graphics && present)
        {
            let index = both as u32;
            return Self {
                graphics: Some(index),
                present: Some(index),
            };
        }

        Self {
            graphics: support.iter().position(|&(g, _)| g).map(|i| i as u32),
            present: support.iter().position(|&(_, p)| p).map(|i| i as u32),
        }
    }

    /// Query the families of a physical device against a surface.
    ///
    /// # Safety
    /// The instance, surface, and physical device must be valid.
    pub unsafe fn find(
        instance: &ash::Instance,
        surface: &SurfaceContext,
        physical_device: vk::PhysicalDevice,
    ) -> Self {
        let support: Vec<(bool, bool)> = instance
            .get_physical_device_queue_family_properties(physical_device)
            .iter()
            .enumerate()
            .map(|(i, family)| {
                (
                    family.queue_flags.contains(vk::QueueFlags::GRAPHICS),
                    surface.supports_present(physical_device, i as u32),
                )
            })
            .collect();

        Self::from_family_support(&support)
    }

    /// Distinct family indices, graphics first.
    pub fn unique(&self) -> Vec<u32> {
        let mut families: Vec<u32> = self.graphics.into_iter().collect();
        if let Some(present) = self.present {
            if !families.contains(&present) {
                families.push(present);
            }
        }
        families
    }
}

/// Main GPU context: instance, surface, device, allocator and queues.
pub struct GpuContext {
    // Entry must be kept alive for the lifetime of the context
    #[allow(dead_code)]
    pub(crate) entry: ash::Entry,
    pub(crate) instance: ash::Instance,
    pub(crate) debug_messenger: Option<DebugMessenger>,
    pub(crate) surface: SurfaceContext,
    pub(crate) physical_device: vk::PhysicalDevice,
    pub(crate) profile: DeviceProfile,
    pub(crate) device: Arc<ash::Device>,
    pub(crate) allocator: Mutex<GpuAllocator>,

    pub(crate) graphics_queue_family: u32,
    pub(crate) present_queue_family: u32,
    pub(crate) graphics_queue: vk::Queue,
    pub(crate) present_queue: vk::Queue,
}

impl GpuContext {
    /// Get the Vulkan device handle.
    pub fn device(&self) -> &ash::Device {
        &self.device
    }

    /// Shared handle to the device, for objects that destroy themselves.
    pub fn device_arc(&self) -> Arc<ash::Device> {
        Arc::clone(&self.device)
    }

    /// Get the physical device handle.
    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.physical_device
    }

    /// Profile of the selected device.
    pub fn profile(&self) -> &DeviceProfile {
        &self.profile
    }

    /// Get the window surface.
    pub fn surface(&self) -> &SurfaceContext {
        &self.surface
    }

    /// Get the graphics queue.
    pub fn graphics_queue(&self) -> vk::Queue {
        self.graphics_queue
    }

    /// Get the present queue. May alias the graphics queue.
    pub fn present_queue(&self) -> vk::Queue {
        self.present_queue
    }

    pub fn graphics_queue_family(&self) -> u32 {
        self.graphics_queue_family
    }

    pub fn present_queue_family(&self) -> u32 {
        self.present_queue_family
    }

    /// Get the Vulkan instance handle.
    pub fn instance(&self) -> &ash::Instance {
        &self.instance
    }

    /// Get access to the GPU allocator.
    pub fn allocator(&self) -> &Mutex<GpuAllocator> {
        &self.allocator
    }

    /// Wait for device to be idle.
    pub fn wait_idle(&self) -> Result<()> {
        unsafe {
            self.device.device_wait_idle()?;
        }
        Ok(())
    }
}

impl Drop for GpuContext {
    fn drop(&mut self) {
        unsafe {
            let _ = self.device.device_wait_idle();

            // Shutdown allocator BEFORE destroying device
            // This frees all VkDeviceMemory allocations
            self.allocator.lock().shutdown();

            self.device.destroy_device(None);
            self.surface.destroy();
            if let Some(messenger) = &self.debug_messenger {
                messenger.destroy();
            }
            self.instance.destroy_instance(None);
        }
        tracing::debug!("GPU context destroyed");
    }
}

/// Builder for creating a GPU context.
pub struct GpuContextBuilder {
    app_name: String,
    enable_validation: bool,
}

impl Default for GpuContextBuilder {
    fn default() -> Self {
        Self {
            app_name: "Touhou Engine".to_string(),
            enable_validation: cfg!(debug_assertions),
        }
    }
}

impl GpuContextBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the application name.
    pub fn app_name(mut self, name: impl Into<String>) -> Self {
        self.app_name = name.into();
        self
    }

    /// Enable or disable validation layers.
    pub fn validation(mut self, enable: bool) -> Self {
        self.enable_validation = enable;
        self
    }

    /// Build the GPU context for a window.
    ///
    /// Order: instance, debug messenger, surface, physical device, logical
    /// device and queues, allocator.
    pub fn build<W>(self, window: &W) -> Result<GpuContext>
    where
        W: HasDisplayHandle + HasWindowHandle,
    {
        let entry = unsafe { ash::Entry::load() }
            .map_err(|e| GpuError::Other(format!("Failed to load Vulkan: {e}")))?;

        let display = window
            .display_handle()
            .map_err(|e| GpuError::SurfaceCreation(format!("Failed to get display handle: {e}")))?
            .as_raw();

        let instance =
            unsafe { create_instance(&entry, &self.app_name, display, self.enable_validation) }?;

        let debug_messenger = if self.enable_validation {
            Some(unsafe { DebugMessenger::new(&entry, &instance) }?)
        } else {
            None
        };

        let surface = unsafe { SurfaceContext::from_window(&entry, &instance, window) }?;
        tracing::info!("Window surface created");

        let (physical_device, profile) = unsafe { select_physical_device(&instance, &surface) }?;

        let (graphics_queue_family, present_queue_family) =
            match (profile.queue_families.graphics, profile.queue_families.present) {
                (Some(graphics), Some(present)) => (graphics, present),
                _ => return Err(GpuError::NoSuitableDevice),
            };

        let (device, graphics_queue, present_queue) =
            unsafe { create_device(&instance, physical_device, &profile.queue_families)? };
        let device = Arc::new(device);

        tracing::info!(
            "Logical device created (graphics family {}, present family {})",
            graphics_queue_family,
            present_queue_family
        );

        let allocator = unsafe { GpuAllocator::new(&instance, device.clone(), physical_device) }?;

        Ok(GpuContext {
            entry,
            instance,
            debug_messenger,
            surface,
            physical_device,
            profile,
            device,
            allocator: Mutex::new(allocator),
            graphics_queue_family,
            present_queue_family,
            graphics_queue,
            present_queue,
        })
    }
}

/// Create the logical device and retrieve the graphics and present queues.
///
/// # Safety
/// The instance and physical device must be valid.
unsafe fn create_device(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
    queue_families: &QueueFamilyIndices,
) -> Result<(ash::Device, vk::Queue, vk::Queue)> {
    let (Some(graphics), Some(present)) = (queue_families.graphics, queue_families.present) else {
        return Err(GpuError::NoSuitableDevice);
    };

    let queue_priority = 1.0_f32;
    let queue_create_infos: Vec<vk::DeviceQueueCreateInfo> = queue_families
        .unique()
        .into_iter()
        .map(|family| {
            vk::DeviceQueueCreateInfo::default()
                .queue_family_index(family)
                .queue_priorities(std::slice::from_ref(&queue_priority))
        })
        .collect();

    let extensions = required_device_extensions();
    let extension_names: Vec<*const std::ffi::c_char> =
        extensions.iter().map(|ext| ext.as_ptr()).collect();

    let features = required_device_features();

    let device_create_info = vk::DeviceCreateInfo::default()
        .queue_create_infos(&queue_create_infos)
        .enabled_extension_names(&extension_names)
        .enabled_features(&features);

    let device = instance
        .create_device(physical_device, &device_create_info, None)
        .map_err(GpuError::from)?;

    let graphics_queue = device.get_device_queue(graphics, 0);
    let present_queue = device.get_device_queue(present, 0);

    Ok((device, graphics_queue, present_queue))
}
