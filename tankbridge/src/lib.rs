pub mod cache;
pub mod clock;
pub mod config;
pub mod dispatch;
pub mod errors;
pub mod fetcher;
pub mod metrics;
pub mod mock;
pub mod model;
pub mod rest;
pub mod transform;
