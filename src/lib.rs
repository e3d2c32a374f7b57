//! Feed pipeline: dependency-aware cron scheduling for the content pipeline.

pub mod config;
pub mod error;
pub mod jobs;
pub mod scheduler;
