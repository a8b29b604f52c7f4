//! Local provider implementation
//!
//! Objects live in a single JSON file under the provider root. The file is
//! rewritten through a temporary file on every mutation, so a crash leaves
//! either the old or the new contents.

use crate::error::{LocalError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use landform_cloud::{CloudProvider, CreatedResource, ProviderResult, ResourceSchema};
use landform_core::{Attributes, ProviderConfig};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, info};

pub const PROVIDER_NAME: &str = "local";
pub const DEFAULT_ROOT: &str = ".landform/cloud";

const OBJECTS_FILE: &str = "objects.json";

/// Static description of a resource type
struct TypeSpec {
    resource_type: &'static str,
    id_prefix: &'static str,
    required: &'static [&'static str],
    force_new: &'static [&'static str],

    /// Attributes holding the id of another object, with that object's type
    references: &'static [(&'static str, &'static str)],
}

const TYPES: &[TypeSpec] = &[
    TypeSpec {
        resource_type: "vpc",
        id_prefix: "vpc",
        required: &["cidr_block"],
        force_new: &["cidr_block"],
        references: &[],
    },
    TypeSpec {
        resource_type: "subnet",
        id_prefix: "subnet",
        required: &["vpc_id", "cidr_block"],
        force_new: &["vpc_id", "cidr_block", "availability_zone"],
        references: &[("vpc_id", "vpc")],
    },
    TypeSpec {
        resource_type: "internet_gateway",
        id_prefix: "igw",
        required: &["vpc_id"],
        force_new: &["vpc_id"],
        references: &[("vpc_id", "vpc")],
    },
    TypeSpec {
        resource_type: "route_table",
        id_prefix: "rtb",
        required: &["vpc_id"],
        force_new: &["vpc_id"],
        references: &[("vpc_id", "vpc"), ("gateway_id", "internet_gateway")],
    },
    TypeSpec {
        resource_type: "route_table_association",
        id_prefix: "rtbassoc",
        required: &["subnet_id", "route_table_id"],
        force_new: &["subnet_id"],
        references: &[("subnet_id", "subnet"), ("route_table_id", "route_table")],
    },
    TypeSpec {
        resource_type: "security_group",
        id_prefix: "sg",
        required: &["name"],
        force_new: &["name", "vpc_id"],
        references: &[("vpc_id", "vpc")],
    },
    TypeSpec {
        resource_type: "key_pair",
        id_prefix: "key",
        required: &["key_name", "public_key"],
        force_new: &["key_name", "public_key"],
        references: &[],
    },
    TypeSpec {
        resource_type: "instance",
        id_prefix: "i",
        required: &["ami", "instance_type"],
        force_new: &["ami", "subnet_id", "key_name"],
        references: &[("subnet_id", "subnet")],
    },
    TypeSpec {
        resource_type: "s3_bucket",
        id_prefix: "bucket",
        required: &["bucket"],
        force_new: &["bucket"],
        references: &[],
    },
    TypeSpec {
        resource_type: "dynamodb_table",
        id_prefix: "table",
        required: &["name", "hash_key"],
        force_new: &["name", "hash_key"],
        references: &[],
    },
];

fn type_spec(resource_type: &str) -> Result<&'static TypeSpec> {
    TYPES
        .iter()
        .find(|t| t.resource_type == resource_type)
        .ok_or_else(|| LocalError::UnsupportedType(resource_type.to_string()))
}

/// One stored object
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredObject {
    resource_type: String,
    attributes: Attributes,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct ObjectStore {
    /// Monotonic counter feeding id generation
    #[serde(default)]
    sequence: u64,
    #[serde(default)]
    objects: BTreeMap<String, StoredObject>,
}

/// Provider that emulates a cloud account on the local filesystem
pub struct LocalProvider {
    root: PathBuf,
    schemas: BTreeMap<String, ResourceSchema>,
    store_guard: Mutex<()>,
}

impl LocalProvider {
    pub fn new(root: impl AsRef<Path>) -> Self {
        let schemas = TYPES
            .iter()
            .map(|t| {
                let schema = ResourceSchema::new(t.resource_type)
                    .required(t.required.iter().copied())
                    .force_new(t.force_new.iter().copied());
                (t.resource_type.to_string(), schema)
            })
            .collect();

        Self {
            root: root.as_ref().to_path_buf(),
            schemas,
            store_guard: Mutex::new(()),
        }
    }

    /// Build from a `provider "local" { root "..." }` block
    ///
    /// A relative root is resolved against `project_root`.
    pub fn from_config(config: &ProviderConfig, project_root: &Path) -> Self {
        let root = config.get("root").unwrap_or(DEFAULT_ROOT);
        let root = Path::new(root);
        if root.is_absolute() {
            Self::new(root)
        } else {
            Self::new(project_root.join(root))
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn objects_path(&self) -> PathBuf {
        self.root.join(OBJECTS_FILE)
    }

    async fn load(&self) -> Result<ObjectStore> {
        let path = self.objects_path();
        match tokio::fs::read_to_string(&path).await {
            Ok(content) => serde_json::from_str(&content).map_err(|e| LocalError::Corrupt {
                path: path.display().to_string(),
                reason: e.to_string(),
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ObjectStore::default()),
            Err(e) => Err(e.into()),
        }
    }

    async fn save(&self, store: &ObjectStore) -> Result<()> {
        tokio::fs::create_dir_all(&self.root).await?;
        let path = self.objects_path();
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, serde_json::to_string_pretty(store)?).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    /// Live object ids, grouped by type
    pub async fn list(&self) -> Result<BTreeMap<String, Vec<String>>> {
        let _guard = self.store_guard.lock().await;
        let store = self.load().await?;
        let mut by_type: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for (id, object) in store.objects {
            by_type.entry(object.resource_type).or_default().push(id);
        }
        Ok(by_type)
    }

    async fn create_object(&self, resource_type: &str, attributes: &Attributes) -> Result<CreatedResource> {
        let spec = type_spec(resource_type)?;
        let _guard = self.store_guard.lock().await;
        let mut store = self.load().await?;
        validate(spec, attributes, &store)?;

        store.sequence += 1;
        let id = generate_id(spec, store.sequence);
        let now = Utc::now();
        store.objects.insert(
            id.clone(),
            StoredObject {
                resource_type: resource_type.to_string(),
                attributes: attributes.clone(),
                created_at: now,
                updated_at: now,
            },
        );
        self.save(&store).await?;
        info!(%resource_type, %id, "Created object");

        let outputs = outputs(resource_type, &id, attributes);
        Ok(CreatedResource { id, outputs })
    }

    async fn update_object(
        &self,
        resource_type: &str,
        id: &str,
        attributes: &Attributes,
    ) -> Result<Attributes> {
        let spec = type_spec(resource_type)?;
        let _guard = self.store_guard.lock().await;
        let mut store = self.load().await?;
        validate(spec, attributes, &store)?;

        let object = store
            .objects
            .get_mut(id)
            .filter(|o| o.resource_type == resource_type)
            .ok_or_else(|| LocalError::ObjectNotFound(id.to_string()))?;
        object.attributes = attributes.clone();
        object.updated_at = Utc::now();
        self.save(&store).await?;
        info!(%resource_type, %id, "Updated object");

        Ok(outputs(resource_type, id, attributes))
    }

    async fn delete_object(&self, resource_type: &str, id: &str) -> Result<()> {
        type_spec(resource_type)?;
        let _guard = self.store_guard.lock().await;
        let mut store = self.load().await?;

        if !store
            .objects
            .get(id)
            .is_some_and(|o| o.resource_type == resource_type)
        {
            return Err(LocalError::ObjectNotFound(id.to_string()));
        }

        let dependents = referencing(&store, id);
        if !dependents.is_empty() {
            return Err(LocalError::DependencyViolation {
                id: id.to_string(),
                dependents: dependents.join(", "),
            });
        }

        store.objects.remove(id);
        self.save(&store).await?;
        info!(%resource_type, %id, "Deleted object");
        Ok(())
    }

    async fn read_object(&self, resource_type: &str, id: &str) -> Result<Option<Attributes>> {
        let _guard = self.store_guard.lock().await;
        let store = self.load().await?;
        Ok(store
            .objects
            .get(id)
            .filter(|o| o.resource_type == resource_type)
            .map(|o| outputs(resource_type, id, &o.attributes)))
    }
}

impl std::fmt::Debug for LocalProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalProvider")
            .field("root", &self.root)
            .finish()
    }
}

fn validate(spec: &TypeSpec, attributes: &Attributes, store: &ObjectStore) -> Result<()> {
    for attribute in spec.required {
        if attributes.get(*attribute).is_none_or(Value::is_null) {
            return Err(LocalError::MissingAttribute {
                resource_type: spec.resource_type.to_string(),
                attribute: attribute.to_string(),
            });
        }
    }

    for (attribute, expected) in spec.references {
        let Some(id) = attributes.get(*attribute).and_then(Value::as_str) else {
            continue;
        };
        let exists = store
            .objects
            .get(id)
            .is_some_and(|o| o.resource_type == *expected);
        if !exists {
            return Err(LocalError::MissingReference {
                attribute: attribute.to_string(),
                expected: expected.to_string(),
                id: id.to_string(),
            });
        }
    }

    debug!(resource_type = spec.resource_type, "Attributes valid");
    Ok(())
}

/// Ids of objects whose reference attributes point at `id`
fn referencing(store: &ObjectStore, id: &str) -> Vec<String> {
    store
        .objects
        .iter()
        .filter(|(_, object)| {
            type_spec(&object.resource_type).is_ok_and(|spec| {
                spec.references
                    .iter()
                    .any(|(attr, _)| object.attributes.get(*attr).and_then(Value::as_str) == Some(id))
            })
        })
        .map(|(other, _)| other.clone())
        .collect()
}

/// `<prefix>-<17 hex digits>`, unique per store sequence
fn generate_id(spec: &TypeSpec, sequence: u64) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(spec.resource_type.as_bytes());
    hasher.update(&sequence.to_le_bytes());
    hasher.update(Utc::now().to_rfc3339().as_bytes());
    let hex = hasher.finalize().to_hex();
    format!("{}-{}", spec.id_prefix, &hex[..17])
}

/// Attributes as reported back to the engine
fn outputs(resource_type: &str, id: &str, attributes: &Attributes) -> Attributes {
    let mut outputs = attributes.clone();
    outputs.insert("id".to_string(), Value::String(id.to_string()));
    outputs.insert(
        "arn".to_string(),
        Value::String(format!("arn:local:{resource_type}:{id}")),
    );
    if resource_type == "s3_bucket"
        && let Some(bucket) = attributes.get("bucket").and_then(Value::as_str)
    {
        outputs.insert(
            "bucket_domain_name".to_string(),
            Value::String(format!("{bucket}.s3.local")),
        );
    }
    outputs
}

#[async_trait]
impl CloudProvider for LocalProvider {
    fn name(&self) -> &str {
        PROVIDER_NAME
    }

    fn schema(&self, resource_type: &str) -> Option<&ResourceSchema> {
        self.schemas.get(resource_type)
    }

    async fn create(
        &self,
        resource_type: &str,
        attributes: &Attributes,
    ) -> ProviderResult<CreatedResource> {
        Ok(self.create_object(resource_type, attributes).await?)
    }

    async fn update(
        &self,
        resource_type: &str,
        id: &str,
        attributes: &Attributes,
    ) -> ProviderResult<Attributes> {
        Ok(self.update_object(resource_type, id, attributes).await?)
    }

    async fn delete(&self, resource_type: &str, id: &str) -> ProviderResult<()> {
        Ok(self.delete_object(resource_type, id).await?)
    }

    async fn read(&self, resource_type: &str, id: &str) -> ProviderResult<Option<Attributes>> {
        Ok(self.read_object(resource_type, id).await?)
    }
}
