//! GPU-composited bitmap layers with power-aware redraw scheduling.
//!
//! [`compositor::Compositor`] draws ordered [`layer::RenderLayer`]s through a
//! [`gpu::GpuBackend`]; [`scheduler::Scheduler`] decides when a frame is due
//! and keeps every GPU call on the thread that owns the context.

pub mod compositor;
pub mod config;
pub mod demo;
pub mod error;
pub mod gpu;
pub mod layer;
pub mod math;
pub mod program;
pub mod scheduler;
