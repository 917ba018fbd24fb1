//! Observability for the chat service.
//!
//! Provides metric definitions and the Prometheus recorder setup.

pub mod metrics;
