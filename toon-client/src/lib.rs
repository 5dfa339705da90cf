pub mod config;
pub mod errors;
pub mod generation;
pub mod logging;

pub use config::Config;
pub use errors::{Result, ToonError};
