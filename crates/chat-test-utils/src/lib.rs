//! # Chat Test Utilities
//!
//! Shared test utilities for the chat service.
//!
//! This crate provides:
//! - Server test harness (`TestChatServer` for E2E tests)
//! - Request body fixtures
//!
//! ## Usage
//!
//! ```rust,ignore
//! use chat_test_utils::*;
//!
//! #[tokio::test]
//! async fn test_example() -> Result<(), anyhow::Error> {
//!     let server = TestChatServer::spawn().await?;
//!
//!     let response = server
//!         .client()
//!         .get(format!("{}/health", server.url()))
//!         .send()
//!         .await?;
//!
//!     assert_eq!(response.status(), 200);
//!     Ok(())
//! }
//! ```

pub mod fixtures;
pub mod server_harness;

// Re-export commonly used items
pub use fixtures::*;
pub use server_harness::*;
