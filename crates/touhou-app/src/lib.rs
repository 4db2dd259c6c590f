//! Application framework for the Touhou engine.
//!
//! This crate wires the GPU layer into a running window:
//! - Configuration from defaults or a TOML file
//! - Window creation and event handling
//! - The frames-in-flight scheduler and the Vulkan backend it drives
//! - Swapchain rebuilds on resize and staleness
//! - Frame rate statistics
//!
//! # Example
//!
//! ```no_run
//! use touhou_app::{run_app, AppConfig};
//!
//! fn main() -> anyhow::Result<()> {
//!     run_app(AppConfig::new("Spinning quad").with_size(800, 600))
//! }
//! ```

mod config;
mod context;
mod runner;
pub mod scheduler;
mod stats;

pub use config::{AppConfig, DEFAULT_CONFIG_FILE};
pub use context::AppContext;
pub use runner::{is_minimized, run_app};
pub use scheduler::{FrameBackend, FramePhase, FrameScheduler, TickOutcome, MAX_FRAMES_IN_FLIGHT};
pub use stats::FrameStats;

// Re-export commonly used types for convenience
pub use touhou_gpu::{GpuContext, GpuContextBuilder, GpuError};
