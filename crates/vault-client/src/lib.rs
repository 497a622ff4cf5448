//! Vault REST API Client
//!
//! A small client for the two Vault system endpoints the unseal controller needs:
//! `GET /v1/sys/seal-status` and `PUT /v1/sys/unseal`.
//!
//! The client is not bound to a single server. Every call takes the target
//! address, because each Vault replica is addressed by its own pod IP.
//!
//! # Example
//!
//! ```no_run
//! use vault_client::{VaultClient, VaultClientTrait};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = VaultClient::new(std::time::Duration::from_secs(10))?;
//!
//! let status = client.seal_status("http://10.0.0.5:8200").await?;
//! if status.sealed {
//!     let status = client.unseal("http://10.0.0.5:8200", "key-share-1").await?;
//!     println!("progress {}", status.progress_display());
//! }
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod error;
pub mod models;
#[path = "trait.rs"]
pub mod vault_trait;
#[cfg(feature = "test-util")]
pub mod mock;

pub use client::VaultClient;
pub use error::VaultError;
pub use models::*;
pub use vault_trait::VaultClientTrait;
#[cfg(feature = "test-util")]
pub use mock::{MockCall, MockVaultClient};
