//! tempdb: read-once ephemeral values on top of Redis
//!
//! A value is stored under a key with an optional time-to-live and can be
//! read back exactly once, after which it is gone. This is meant for
//! short-lived handoff of secrets or tokens between two parties that never
//! talk to each other directly.
//!
//! Keys are stored as `tempDB:<key>`, so the store can share a Redis
//! database with unrelated data.
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use tempdb::{Tempdb, TempdbOptions};
//!
//! # async fn example() -> Result<(), tempdb::TempdbError> {
//! let tempdb = Tempdb::connect(TempdbOptions::from_env()).await?;
//!
//! tempdb
//!     .insert("invite:42", "s3cr3t-token", Some(Duration::from_secs(300)))
//!     .await?;
//!
//! // The first find consumes the value
//! let token = tempdb.find("invite:42").await?;
//! assert_eq!(token, "s3cr3t-token");
//! assert!(tempdb.find("invite:42").await.unwrap_err().is_not_found());
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod config;
pub mod error;
pub mod store;

pub use backend::{Expiry, RedisBackend, StoreBackend};
pub use config::{Dialer, Network, TempdbOptions, TlsOptions};
pub use error::TempdbError;
pub use store::{EphemeralStore, ReadStrategy, Tempdb, NAMESPACE};
