//! Vulkan instance creation and physical device selection.

use crate::capabilities::{pick_usable_device, DeviceProfile};
use crate::error::{GpuError, Result};
use crate::surface::SurfaceContext;
use ash::vk;
use raw_window_handle::RawDisplayHandle;
use std::ffi::{CStr, CString};

/// Validation layer enabled when validation is requested.
pub const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

/// Instance extensions the engine needs for a given display.
///
/// # Errors
/// Fails when the platform has no Vulkan surface support.
pub fn required_instance_extensions(
    display: RawDisplayHandle,
    enable_validation: bool,
) -> Result<Vec<*const std::ffi::c_char>> {
    let mut extensions = ash_window::enumerate_required_extensions(display)
        .map_err(|e| GpuError::ExtensionNotSupported(format!("surface extensions: {e}")))?
        .to_vec();

    if enable_validation {
        extensions.push(ash::ext::debug_utils::NAME.as_ptr());
    }

    #[cfg(target_os = "macos")]
    {
        extensions.push(ash::khr::portability_enumeration::NAME.as_ptr());
        extensions.push(ash::khr::get_physical_device_properties2::NAME.as_ptr());
    }

    Ok(extensions)
}

/// Whether `wanted` appears among the layer names the loader reports.
pub fn layer_available(available: &[String], wanted: &str) -> bool {
    available.iter().any(|name| name == wanted)
}

/// Create a Vulkan instance.
///
/// Validation being requested but unavailable is an error rather than a warning.
///
/// # Safety
/// The entry must be a valid Vulkan entry point.
pub unsafe fn create_instance(
    entry: &ash::Entry,
    app_name: &str,
    display: RawDisplayHandle,
    enable_validation: bool,
) -> Result<ash::Instance> {
    let app_name = CString::new(app_name)
        .map_err(|e| GpuError::Other(format!("Invalid application name: {e}")))?;
    let engine_name = c"Touhou Engine";

    let app_info = vk::ApplicationInfo::default()
        .application_name(&app_name)
        .application_version(vk::make_api_version(0, 1, 0, 0))
        .engine_name(engine_name)
        .engine_version(vk::make_api_version(0, 1, 0, 0))
        .api_version(vk::API_VERSION_1_1);

    let extension_names = required_instance_extensions(display, enable_validation)?;

    let layers: Vec<&CStr> = if enable_validation {
        let available: Vec<String> = entry
            .enumerate_instance_layer_properties()?
            .iter()
            .map(|props| {
                CStr::from_ptr(props.layer_name.as_ptr())
                    .to_string_lossy()
                    .into_owned()
            })
            .collect();

        let wanted = VALIDATION_LAYER.to_string_lossy();
        if !layer_available(&available, &wanted) {
            return Err(GpuError::ValidationLayerMissing(wanted.into_owned()));
        }
        vec![VALIDATION_LAYER]
    } else {
        vec![]
    };

    let layer_names: Vec<*const std::ffi::c_char> = layers.iter().map(|l| l.as_ptr()).collect();

    // Required for MoltenVK on macOS
    #[cfg(target_os = "macos")]
    let create_flags = vk::InstanceCreateFlags::ENUMERATE_PORTABILITY_KHR;
    #[cfg(not(target_os = "macos"))]
    let create_flags = vk::InstanceCreateFlags::empty();

    // Covers instance creation/destruction, which the standalone messenger cannot see
    let mut debug_info = crate::debug::messenger_create_info();

    let mut create_info = vk::InstanceCreateInfo::default()
        .application_info(&app_info)
        .enabled_extension_names(&extension_names)
        .enabled_layer_names(&layer_names)
        .flags(create_flags);

    if enable_validation {
        create_info = create_info.push_next(&mut debug_info);
    }

    let instance = entry.create_instance(&create_info, None)?;

    tracing::info!(
        "Vulkan instance created ({} extensions, validation {})",
        extension_names.len(),
        if enable_validation { "on" } else { "off" }
    );

    Ok(instance)
}

/// Select the highest-scoring physical device for the surface.
///
/// The winner must also be usable: complete queue families, the swapchain
/// extension, and at least one surface format and present mode.
///
/// # Safety
/// The instance and surface must be valid.
pub unsafe fn select_physical_device(
    instance: &ash::Instance,
    surface: &SurfaceContext,
) -> Result<(vk::PhysicalDevice, DeviceProfile)> {
    let devices = instance.enumerate_physical_devices()?;

    if devices.is_empty() {
        return Err(GpuError::NoSuitableDevice);
    }

    let candidates: Vec<(vk::PhysicalDevice, DeviceProfile)> = devices
        .into_iter()
        .map(|device| {
            let profile = DeviceProfile::query(instance, surface, device);
            tracing::debug!(
                "Candidate GPU: {} (score {})",
                profile.summary(),
                profile.score()
            );
            if !profile.missing_extensions.is_empty() {
                tracing::debug!(
                    "  missing extensions: {}",
                    profile.missing_extensions.join(", ")
                );
            }
            (device, profile)
        })
        .collect();

    let Some((device, profile, score)) = pick_usable_device(candidates) else {
        tracing::error!("No GPU can drive a swapchain on this surface");
        return Err(GpuError::NoSuitableDevice);
    };

    tracing::info!("Selected GPU: {} (score {})", profile.summary(), score);

    Ok((device, profile))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_layer_lookup() {
        let available = vec![
            "VK_LAYER_MESA_device_select".to_string(),
            "VK_LAYER_KHRONOS_validation".to_string(),
        ];
        assert!(layer_available(&available, "VK_LAYER_KHRONOS_validation"));
        assert!(!layer_available(&available[..1], "VK_LAYER_KHRONOS_validation"));
        assert!(!layer_available(&[], "VK_LAYER_KHRONOS_validation"));
    }
}
