//! Background tasks.
//!
//! - `limiter_sweep` - drops expired windows from the in-process rate limiter

pub mod limiter_sweep;

pub use limiter_sweep::start_limiter_sweep;
