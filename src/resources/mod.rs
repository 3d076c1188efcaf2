//! Resource management
//!
//! Loads weather and height density textures and uploads them to a backend.

mod texture;

pub use texture::*;
