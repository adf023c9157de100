//! Request bodies carried by jobs.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

use crate::identifier::{IdentifierError, ResourceId};

/// Key types accepted by [`CreateKeysData::check`].
pub const KEY_TYPES: &[&str] = &[
    "authorized_keys",
    "ssh-rsa",
    "ssh-dss",
    "ssh-ed25519",
    "ecdsa-sha2-nistp256",
];

/// Decode the first JSON value in `bytes`.
///
/// An empty or whitespace-only body yields `T::default()`. Bytes after the
/// first complete value are not inspected.
pub fn decode_first<T>(bytes: &[u8]) -> Result<T, serde_json::Error>
where
    T: DeserializeOwned + Default,
{
    let mut values = serde_json::Deserializer::from_slice(bytes).into_iter::<T>();
    match values.next() {
        Some(value) => value,
        None => Ok(T::default()),
    }
}

/// Treat an explicit `null` list the same as an absent one.
fn null_as_empty<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(Option::<Vec<T>>::deserialize(deserializer)?.unwrap_or_default())
}

// ── Containers ─────────────────────────────────────────────────

/// A port mapping from the container to the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortPair {
    #[serde(alias = "Internal")]
    pub internal: u16,
    #[serde(alias = "External")]
    pub external: u16,
}

/// Body of `PUT /token/:token/container`.
///
/// Fields the gateway does not interpret are kept in `extra` and travel
/// with the job untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CreateContainerData {
    #[serde(alias = "Ports", default, deserialize_with = "null_as_empty")]
    pub ports: Vec<PortPair>,

    #[serde(
        alias = "Environment",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub environment: Option<Vec<String>>,

    #[serde(alias = "Started", default, skip_serializing_if = "Option::is_none")]
    pub started: Option<bool>,

    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

// ── Keys ───────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyData {
    #[serde(rename = "type", alias = "Type")]
    pub kind: String,
    #[serde(alias = "Value")]
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerPermission {
    #[serde(alias = "Id")]
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryPermission {
    #[serde(alias = "Id")]
    pub id: String,
    #[serde(alias = "Write", default)]
    pub write: bool,
}

/// Body of `PUT /token/:token/keys`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateKeysData {
    #[serde(alias = "Keys", default, deserialize_with = "null_as_empty")]
    pub keys: Vec<KeyData>,
    #[serde(alias = "Containers", default, deserialize_with = "null_as_empty")]
    pub containers: Vec<ContainerPermission>,
    #[serde(alias = "Repositories", default, deserialize_with = "null_as_empty")]
    pub repositories: Vec<RepositoryPermission>,
}

/// Payload self-validation failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("one or more keys must be specified")]
    NoKeys,

    #[error("key {index} has unsupported type {kind:?}")]
    UnknownKeyType { index: usize, kind: String },

    #[error("key {index} has no value")]
    EmptyKey { index: usize },

    #[error("either containers or repositories must be specified")]
    NoTargets,

    #[error("{0}")]
    Target(#[from] IdentifierError),
}

impl CreateKeysData {
    /// Validate the payload before it is turned into a job.
    pub fn check(&self) -> Result<(), ValidationError> {
        if self.keys.is_empty() {
            return Err(ValidationError::NoKeys);
        }
        for (index, key) in self.keys.iter().enumerate() {
            if !KEY_TYPES.contains(&key.kind.as_str()) {
                return Err(ValidationError::UnknownKeyType {
                    index,
                    kind: key.kind.clone(),
                });
            }
            if key.value.trim().is_empty() {
                return Err(ValidationError::EmptyKey { index });
            }
        }
        if self.containers.is_empty() && self.repositories.is_empty() {
            return Err(ValidationError::NoTargets);
        }
        for container in &self.containers {
            ResourceId::new(&container.id)?;
        }
        for repository in &self.repositories {
            ResourceId::new(&repository.id)?;
        }
        Ok(())
    }
}
