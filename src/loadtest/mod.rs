//! Load test plan model and execution engine.
//!
//! Provides a typed plan model with TOML/JSON persistence, an HTTP request
//! executor with extractors and assertions, a ramp-up scheduler, and a
//! single-writer result sink backed by HdrHistogram metrics.

pub mod engine;
pub mod error;
pub mod executor;
pub mod metrics;
pub mod plan;
pub mod postprocess;
pub mod report;
pub mod scheduler;
pub mod scope;
pub mod settings;
pub mod sink;
pub mod summary;
pub mod vu;
