//! Records served by the external resource API.

use crate::checksum::Checksum;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Name and namespace of a resource.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceMeta {
    pub name: String,
    pub namespace: String,
}

/// Build progress of a package's deployment archive.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    /// The package needs no build step.
    #[default]
    None,
}

impl BuildStatus {
    /// Whether the deployment archive may be fetched in this state.
    pub fn deployment_ready(&self) -> bool {
        matches!(self, Self::Succeeded | Self::None)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::None => "none",
        }
    }
}

/// Archive content: literal bytes, a URL with checksum, or an image reference.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Archive {
    #[serde(default, with = "base64_bytes", skip_serializing_if = "Vec::is_empty")]
    pub literal: Vec<u8>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<Checksum>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub image: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageSpec {
    #[serde(default)]
    pub source: Archive,
    #[serde(default)]
    pub deployment: Archive,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageStatus {
    #[serde(default)]
    pub build_status: BuildStatus,
}

/// A function package.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Package {
    pub metadata: ResourceMeta,
    #[serde(default)]
    pub spec: PackageSpec,
    #[serde(default)]
    pub status: PackageStatus,
}

/// A secret; values are base64-encoded on the wire.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Secret {
    pub metadata: ResourceMeta,
    #[serde(default)]
    pub data: BTreeMap<String, String>,
}

impl Secret {
    /// Decode every value of the secret.
    pub fn decoded(&self) -> crate::Result<BTreeMap<String, Vec<u8>>> {
        use base64::Engine;
        self.data
            .iter()
            .map(|(key, value)| {
                base64::engine::general_purpose::STANDARD
                    .decode(value)
                    .map(|bytes| (key.clone(), bytes))
                    .map_err(|e| crate::Error::Serialization(format!("secret key {key}: {e}")))
            })
            .collect()
    }
}

/// A config map; values are plain strings.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigMap {
    pub metadata: ResourceMeta,
    #[serde(default)]
    pub data: BTreeMap<String, String>,
}

mod base64_bytes {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = Option::<String>::deserialize(deserializer)?.unwrap_or_default();
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}
