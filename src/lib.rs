pub mod average;
pub mod channel;
pub mod cli;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod extract;
pub mod geo;
pub mod pipeline;
pub mod record;
pub mod retry;
pub mod sink;
pub mod task_group;
pub mod twitter;
pub mod weather;
