pub mod config;
pub mod errors;
pub mod jobs;
pub mod storage;
