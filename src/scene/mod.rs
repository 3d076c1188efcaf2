//! Scene collaborators: the camera being rendered and the sun light

mod camera;
mod light;

pub use camera::*;
pub use light::*;
