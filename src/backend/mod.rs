//! Backend abstraction layer
//!
//! Provides common traits and types that the dummy and wgpu backends implement.
//!
//! # Available Backends
//!
//! - [`DummyBackend`]: records commands and tracks texture contents, for tests
//! - `WgpuBackend` (`wgpu-backend` feature): headless GPU execution through wgpu

pub mod dummy;
pub mod traits;
pub mod types;

#[cfg(feature = "wgpu-backend")]
pub mod wgpu_backend;

pub use dummy::{Command, DummyBackend};
pub use traits::*;
pub use types::*;

#[cfg(feature = "wgpu-backend")]
pub use wgpu_backend::WgpuBackend;
