//! Surface management for windowed rendering.
//!
//! Wraps the Vulkan surface created from a window's raw handles and answers
//! the per-device questions swapchain creation and device selection ask.

use crate::error::{GpuError, Result};
use ash::vk;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};

/// Surface context for windowed rendering.
pub struct SurfaceContext {
    /// The Vulkan surface handle.
    pub surface: vk::SurfaceKHR,
    /// Surface extension loader.
    pub surface_loader: ash::khr::surface::Instance,
}

impl SurfaceContext {
    /// Create a new surface context from a window.
    ///
    /// # Safety
    /// The entry and instance must be valid and the window must outlive the surface.
    pub unsafe fn from_window<W>(entry: &ash::Entry, instance: &ash::Instance, window: &W) -> Result<Self>
    where
        W: HasDisplayHandle + HasWindowHandle,
    {
        let display = window
            .display_handle()
            .map_err(|e| GpuError::SurfaceCreation(format!("Failed to get display handle: {e}")))?;
        let window_handle = window
            .window_handle()
            .map_err(|e| GpuError::SurfaceCreation(format!("Failed to get window handle: {e}")))?;

        let surface = ash_window::create_surface(
            entry,
            instance,
            display.as_raw(),
            window_handle.as_raw(),
            None,
        )
        .map_err(|e| GpuError::SurfaceCreation(e.to_string()))?;

        let surface_loader = ash::khr::surface::Instance::new(entry, instance);

        Ok(Self {
            surface,
            surface_loader,
        })
    }

    /// Query surface capabilities for a physical device.
    pub fn capabilities(&self, physical_device: vk::PhysicalDevice) -> Result<SurfaceCapabilities> {
        unsafe {
            let caps = self
                .surface_loader
                .get_physical_device_surface_capabilities(physical_device, self.surface)?;

            let formats = self
                .surface_loader
                .get_physical_device_surface_formats(physical_device, self.surface)?;

            let present_modes = self
                .surface_loader
                .get_physical_device_surface_present_modes(physical_device, self.surface)?;

            Ok(SurfaceCapabilities {
                capabilities: caps,
                formats,
                present_modes,
            })
        }
    }

    /// Whether a queue family of the device can present to this surface.
    ///
    /// Query failures count as "no".
    pub fn supports_present(&self, physical_device: vk::PhysicalDevice, queue_family: u32) -> bool {
        unsafe {
            self.surface_loader
                .get_physical_device_surface_support(physical_device, queue_family, self.surface)
                .unwrap_or(false)
        }
    }

    /// Destroy the surface.
    ///
    /// # Safety
    /// The surface must not be in use and every swapchain built on it must be destroyed.
    pub unsafe fn destroy(&self) {
        self.surface_loader.destroy_surface(self.surface, None);
    }
}

/// Surface capabilities query result.
#[derive(Debug, Clone, Default)]
pub struct SurfaceCapabilities {
    /// Raw surface capabilities.
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    /// Supported surface formats.
    pub formats: Vec<vk::SurfaceFormatKHR>,
    /// Supported present modes.
    pub present_modes: Vec<vk::PresentModeKHR>,
}
