//! Story chat service library.
//!
//! Every story has exactly one chat room. Readers join with a nickname and a
//! device hash, hold a seat while they keep touching presence, and exchange
//! short messages. Rooms have a fixed capacity that concurrent joins can
//! never exceed, and every mutating call is rate limited.
//!
//! # Architecture
//!
//! Handler -> Service -> Repository:
//!
//! ```text
//! routes/mod.rs -> handlers/*.rs -> services/*.rs   -> repositories/*.rs
//!                                -> rate_limit/*.rs -> Redis | in-process
//! ```
//!
//! # Modules
//!
//! - `clock` - Injectable time source
//! - `config` - Service configuration from environment
//! - `errors` - Error taxonomy with HTTP status code mapping
//! - `handlers` - HTTP request handlers
//! - `middleware` - HTTP metrics middleware
//! - `models` - Stored rows, results and request bodies
//! - `observability` - Prometheus metrics
//! - `rate_limit` - Windowed counters with Redis or local backends
//! - `repositories` - `ChatStore` with PostgreSQL and in-memory backends
//! - `routes` - Axum router setup
//! - `services` - Room registry, membership manager, message channel
//! - `tasks` - Background tasks

pub mod clock;
pub mod config;
pub mod errors;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod observability;
pub mod rate_limit;
pub mod repositories;
pub mod routes;
pub mod services;
pub mod tasks;
