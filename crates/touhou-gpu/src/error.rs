//! GPU error types.

use ash::vk;
use thiserror::Error;

/// GPU-related errors.
#[derive(Error, Debug)]
pub enum GpuError {
    /// Vulkan error.
    #[error("Vulkan error: {0}")]
    Vulkan(#[from] vk::Result),

    /// No physical device scored above zero.
    #[error("No suitable GPU found")]
    NoSuitableDevice,

    /// Validation was requested but the layer is not installed.
    #[error("Validation layer not available: {0}")]
    ValidationLayerMissing(String),

    /// Required extension not supported.
    #[error("Required extension not supported: {0}")]
    ExtensionNotSupported(String),

    /// Memory allocation failed.
    #[error("Memory allocation failed: {0}")]
    AllocationFailed(String),

    /// Surface creation failed.
    #[error("Surface creation failed: {0}")]
    SurfaceCreation(String),

    /// Swapchain creation failed.
    #[error("Swapchain creation failed: {0}")]
    SwapchainCreation(String),

    /// Shader module creation failed.
    #[error("Shader compilation failed: {0}")]
    ShaderCompilation(String),

    /// Pipeline creation failed.
    #[error("Pipeline creation failed: {0}")]
    PipelineCreation(String),

    /// Resource not found.
    #[error("Resource not found: {0}")]
    ResourceNotFound(String),

    /// Invalid state.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Other error.
    #[error("{0}")]
    Other(String),
}

impl GpuError {
    /// Returns `true` if the error means the logical device was lost.
    pub fn is_device_lost(&self) -> bool {
        matches!(self, Self::Vulkan(vk::Result::ERROR_DEVICE_LOST))
    }
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, GpuError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_lost_detection() {
        assert!(GpuError::Vulkan(vk::Result::ERROR_DEVICE_LOST).is_device_lost());
        assert!(!GpuError::Vulkan(vk::Result::ERROR_OUT_OF_DATE_KHR).is_device_lost());
        assert!(!GpuError::NoSuitableDevice.is_device_lost());
    }
}
