//! Landform local cloud provider
//!
//! Emulates a small cloud account (networks, security groups, instances,
//! buckets and tables) inside a JSON file, so declarations can be planned
//! and applied without credentials.
//!
//! # Example
//!
//! ```no_run
//! use landform_cloud::ProviderRegistry;
//! use landform_cloud_local::LocalProvider;
//! use std::sync::Arc;
//!
//! let registry = ProviderRegistry::new()
//!     .with_provider(Arc::new(LocalProvider::new(".landform/cloud")));
//! ```

pub mod error;
pub mod provider;

pub use error::{LocalError, Result};
pub use provider::{DEFAULT_ROOT, LocalProvider, PROVIDER_NAME};
