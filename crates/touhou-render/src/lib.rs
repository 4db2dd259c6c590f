//! Rendering for the Touhou engine.
//!
//! This crate provides:
//! - Vertex and uniform data types
//! - SPIR-V loading
//! - The quad pipeline and its GPU resources
//! - Per-frame command recording

pub mod camera;
pub mod geometry;
pub mod quad_pipeline;
pub mod recorder;
pub mod resources;
pub mod shader;
pub mod uniforms;

pub use camera::Camera;
pub use geometry::{Vertex, QUAD_INDICES, QUAD_VERTICES};
pub use quad_pipeline::QuadPipeline;
pub use recorder::{CommandRecorder, DrawParams};
pub use resources::ResourcePool;
pub use shader::{load_spirv, ShaderSet};
pub use uniforms::UniformBufferObject;
