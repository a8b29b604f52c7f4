//! Cloud provider trait definition

use crate::error::{CloudError, ProviderError, Result};
use async_trait::async_trait;
use landform_core::{Address, Attributes};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

pub type ProviderResult<T> = std::result::Result<T, ProviderError>;

/// Cloud provider abstraction trait
///
/// A provider performs CRUD for the resource types it declares a schema
/// for. Implementations must be safe to call concurrently for different
/// resources.
#[async_trait]
pub trait CloudProvider: Send + Sync {
    /// Returns the provider name (e.g., "local")
    fn name(&self) -> &str;

    /// Static schema of a resource type, `None` if unsupported
    fn schema(&self, resource_type: &str) -> Option<&ResourceSchema>;

    /// Create a resource, returning its id and outputs
    async fn create(
        &self,
        resource_type: &str,
        attributes: &Attributes,
    ) -> ProviderResult<CreatedResource>;

    /// Update a resource in place, returning its new outputs
    async fn update(
        &self,
        resource_type: &str,
        id: &str,
        attributes: &Attributes,
    ) -> ProviderResult<Attributes>;

    async fn delete(&self, resource_type: &str, id: &str) -> ProviderResult<()>;

    /// Current attributes of a resource, `None` if it no longer exists
    async fn read(&self, resource_type: &str, id: &str) -> ProviderResult<Option<Attributes>>;
}

/// Result of a successful create
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreatedResource {
    /// Provider-assigned identifier
    pub id: String,

    /// Attributes visible to dependents (inputs plus computed values)
    pub outputs: Attributes,
}

/// Static description of a resource type
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceSchema {
    pub resource_type: String,

    /// Attributes that must be present on create
    pub required: BTreeSet<String>,

    /// Attributes whose change forces replacement
    pub force_new: BTreeSet<String>,
}

impl ResourceSchema {
    pub fn new(resource_type: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            ..Default::default()
        }
    }

    pub fn required<I, S>(mut self, attributes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.required.extend(attributes.into_iter().map(Into::into));
        self
    }

    pub fn force_new<I, S>(mut self, attributes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.force_new.extend(attributes.into_iter().map(Into::into));
        self
    }

    pub fn requires_replacement(&self, attribute: &str) -> bool {
        self.force_new.contains(attribute)
    }
}

/// Providers indexed by name
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: BTreeMap<String, Arc<dyn CloudProvider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, provider: Arc<dyn CloudProvider>) {
        tracing::debug!(provider = provider.name(), "Registered provider");
        self.providers.insert(provider.name().to_string(), provider);
    }

    pub fn with_provider(mut self, provider: Arc<dyn CloudProvider>) -> Self {
        self.register(provider);
        self
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn CloudProvider>> {
        self.providers.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.providers.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    /// Provider responsible for a resource
    ///
    /// A pinned provider name wins; otherwise the first provider (by name)
    /// whose schema covers the type is used.
    pub fn resolve(
        &self,
        address: &Address,
        pinned: Option<&str>,
    ) -> Result<&Arc<dyn CloudProvider>> {
        let resource_type = &address.resource_type;
        let unsupported = || CloudError::UnsupportedResource {
            address: address.clone(),
            resource_type: resource_type.clone(),
        };

        match pinned {
            Some(name) => {
                let provider = self
                    .providers
                    .get(name)
                    .ok_or_else(|| CloudError::ProviderNotFound(name.to_string()))?;
                if provider.schema(resource_type).is_none() {
                    return Err(unsupported());
                }
                Ok(provider)
            }
            None => self
                .providers
                .values()
                .find(|p| p.schema(resource_type).is_some())
                .ok_or_else(unsupported),
        }
    }
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("providers", &self.providers.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Retry configuration for provider operations
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts, the first call included
    pub max_attempts: u32,

    /// Initial delay between retries
    pub initial_delay: Duration,

    /// Maximum delay between retries
    pub max_delay: Duration,

    /// Backoff multiplier
    pub backoff_multiplier: f64,
}

impl RetryConfig {
    /// Delay before retry number `attempt` (0-based), capped at `max_delay`
    ///
    /// A multiplier that would produce a negative or non-finite delay
    /// yields zero or `max_delay` instead of panicking.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let max = self.max_delay.as_secs_f64();
        let delay =
            self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(attempt as i32);
        if delay.is_nan() {
            return self.max_delay;
        }
        Duration::from_secs_f64(delay.clamp(0.0, max))
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
        }
    }
}
