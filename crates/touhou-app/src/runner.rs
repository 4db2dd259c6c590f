//! Application runner and event loop.

use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use winit::application::ApplicationHandler;
use winit::dpi::PhysicalSize;
use winit::event::{ElementState, WindowEvent};
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::keyboard::{KeyCode, PhysicalKey};
use winit::window::{Window, WindowId};

use crate::config::AppConfig;
use crate::context::AppContext;
use crate::scheduler::{FrameScheduler, TickOutcome};
use crate::stats::FrameStats;

/// A zero-area window cannot back a swapchain; ticking pauses until it grows.
pub fn is_minimized(size: PhysicalSize<u32>) -> bool {
    size.width == 0 || size.height == 0
}

/// Run the renderer with the given configuration.
///
/// Initializes logging, creates the window and every GPU object, and runs the
/// event loop until the window closes. The first fatal error stops the loop
/// and is returned after teardown.
pub fn run_app(config: AppConfig) -> anyhow::Result<()> {
    // Ignore a second init from embedding code or tests
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .try_init();

    info!("{} starting...", config.title);

    let event_loop = EventLoop::new().context("Failed to create event loop")?;
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut runner = AppRunner {
        config,
        state: None,
        error: None,
    };

    event_loop
        .run_app(&mut runner)
        .context("Event loop error")?;

    match runner.error.take() {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

/// Internal application runner that implements winit's ApplicationHandler.
struct AppRunner {
    config: AppConfig,
    state: Option<AppState>,
    error: Option<anyhow::Error>,
}

/// Live renderer state.
struct AppState {
    ctx: AppContext,
    scheduler: FrameScheduler,
    stats: FrameStats,
    last_frame_time: Instant,
}

impl AppRunner {
    fn create_state(&self, event_loop: &ActiveEventLoop) -> anyhow::Result<AppState> {
        let window_attrs = Window::default_attributes()
            .with_title(&self.config.title)
            .with_inner_size(PhysicalSize::new(self.config.width, self.config.height))
            .with_resizable(true);

        let window = Arc::new(
            event_loop
                .create_window(window_attrs)
                .context("Failed to create window")?,
        );

        let ctx = AppContext::new(window, &self.config)?;
        info!("GPU: {}", ctx.gpu().profile().summary());

        Ok(AppState {
            ctx,
            scheduler: FrameScheduler::default(),
            stats: FrameStats::new(),
            last_frame_time: Instant::now(),
        })
    }

    /// Record the first fatal error and stop the loop.
    fn fail(&mut self, event_loop: &ActiveEventLoop, e: anyhow::Error) {
        error!("{e:#}");
        if self.error.is_none() {
            self.error = Some(e);
        }
        event_loop.exit();
    }
}

impl ApplicationHandler for AppRunner {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.state.is_some() || self.error.is_some() {
            return;
        }

        info!("Creating application state...");

        match self.create_state(event_loop) {
            Ok(state) => {
                self.state = Some(state);
                info!("Application ready!");
            }
            Err(e) => self.fail(event_loop, e.context("Failed to initialize application")),
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => {
                info!("Close requested");
                event_loop.exit();
            }
            WindowEvent::KeyboardInput { event, .. }
                if event.state == ElementState::Pressed
                    && event.physical_key == PhysicalKey::Code(KeyCode::Escape) =>
            {
                info!("Escape pressed");
                event_loop.exit();
            }
            WindowEvent::Resized(size) => {
                if let Some(state) = &mut self.state {
                    tracing::debug!("Resized to {}x{}", size.width, size.height);
                    state.scheduler.notify_resized();
                }
            }
            WindowEvent::RedrawRequested => {
                let Some(state) = &mut self.state else {
                    return;
                };
                if is_minimized(state.ctx.window().inner_size()) {
                    return;
                }
                if let Err(e) = state.render_frame() {
                    self.fail(event_loop, e);
                }
            }
            _ => {}
        }
    }

    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        if let Some(state) = &self.state {
            if is_minimized(state.ctx.window().inner_size()) {
                // Sleep until a resize or restore event arrives
                event_loop.set_control_flow(ControlFlow::Wait);
            } else {
                event_loop.set_control_flow(ControlFlow::Poll);
                state.ctx.window().request_redraw();
            }
        }
    }

    fn exiting(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(mut state) = self.state.take() {
            state.cleanup();
        }
    }
}

impl AppState {
    fn render_frame(&mut self) -> anyhow::Result<()> {
        let outcome = self
            .scheduler
            .tick(&mut self.ctx)
            .with_context(|| format!("Frame {} failed", self.scheduler.frame_count()))?;

        if let TickOutcome::Presented { .. } = outcome {
            let now = Instant::now();
            self.stats
                .record(now.duration_since(self.last_frame_time).as_secs_f64());
            self.last_frame_time = now;
        }

        Ok(())
    }

    fn cleanup(&mut self) {
        self.stats.log_summary(self.scheduler.frame_count());

        info!("Starting cleanup...");
        unsafe {
            self.ctx.cleanup();
        }
        info!("Cleanup complete");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_dimension_pauses() {
        assert!(is_minimized(PhysicalSize::new(0, 0)));
        assert!(is_minimized(PhysicalSize::new(800, 0)));
        assert!(is_minimized(PhysicalSize::new(0, 600)));
        assert!(!is_minimized(PhysicalSize::new(1, 1)));
    }
}
