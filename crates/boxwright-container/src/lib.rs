pub mod archive;
pub mod auth;
pub mod docker;
pub mod error;
pub mod image_config;
pub mod runtime;

pub use docker::*;
pub use error::*;
pub use image_config::ImageConfig;
pub use runtime::*;
