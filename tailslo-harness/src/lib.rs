pub mod config;
pub mod metrics;
pub mod replay;
pub mod report;
pub mod service;
pub mod workload;
