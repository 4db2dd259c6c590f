//! Vulkan abstraction layer for the Touhou engine.
//!
//! This crate provides:
//! - Vulkan instance creation with validation routed to `tracing`
//! - Physical device scoring and queue family selection
//! - Memory allocation via gpu-allocator
//! - Command pools and one-shot submission
//! - Swapchain policy and lifecycle
//! - Render pass, graphics pipeline and descriptor helpers

pub mod capabilities;
pub mod command;
pub mod context;
pub mod debug;
pub mod descriptors;
pub mod error;
pub mod instance;
pub mod memory;
pub mod pipeline;
pub mod render_pass;
pub mod surface;
pub mod swapchain;
pub mod sync;

pub use capabilities::{DeviceProfile, GpuVendor};
pub use command::{execute_single_time_commands, submit_frame, CommandPool};
pub use context::{GpuContext, GpuContextBuilder, QueueFamilyIndices};
pub use descriptors::{write_uniform_buffer, DescriptorPool, DescriptorSetLayoutBuilder};
pub use error::{GpuError, Result};
pub use memory::{create_staged_buffer, GpuAllocator, GpuBuffer};
pub use pipeline::{GraphicsPipeline, GraphicsPipelineConfig};
pub use render_pass::RenderPass;
pub use surface::{SurfaceCapabilities, SurfaceContext};
pub use swapchain::{
    AcquireOutcome, PresentOutcome, RebuildOutcome, SharingPolicy, SwapchainManager,
    SwapchainPlan, SwapchainTargets,
};
pub use sync::{create_fence, create_semaphore, FrameSync};
