#![recursion_limit = "256"]

pub mod config;
pub mod http;
pub mod metrics;
