//! Crate error type

use crate::backend::BackendError;
use thiserror::Error;

/// Errors raised by the cloud pipeline
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CloudError {
    /// The hierarchical height map only supports 512x512 weather textures
    #[error("Weather texture must be 512x512 for hierarchical height mapping, got {width}x{height}")]
    InvalidWeatherTexture { width: u32, height: u32 },
    #[error("Shader program '{0}' is not available")]
    MissingProgram(&'static str),
    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Texture error: {0}")]
    Texture(String),
}

impl CloudError {
    /// Whether this error reflects a misconfigured input rather than a missing dependency
    pub fn is_invalid_input(&self) -> bool {
        matches!(self, CloudError::InvalidWeatherTexture { .. })
    }
}

pub type CloudResult<T> = Result<T, CloudError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_errors_convert() {
        let err: CloudError = BackendError::OutOfMemory.into();
        assert_eq!(err, CloudError::Backend(BackendError::OutOfMemory));
        assert!(!err.is_invalid_input());
    }

    #[test]
    fn weather_texture_error_names_size() {
        let err = CloudError::InvalidWeatherTexture {
            width: 256,
            height: 256,
        };
        assert!(err.is_invalid_input());
        assert!(err.to_string().contains("256x256"));
    }
}
