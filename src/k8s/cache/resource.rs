use base64::{Engine, engine::general_purpose};
use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use kube::ResourceExt;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

/// The resource kinds mirrored into the configuration tree
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum TrackedKind {
    /// Plain data maps (`ConfigMap`)
    ConfigMap,
    /// Secret data maps (`Secret`)
    Secret,
}

impl TrackedKind {
    /// Every kind the provider tracks, in load order
    pub const ALL: [Self; 2] = [Self::ConfigMap, Self::Secret];

    /// Name of the flattened-map partition owned by this kind
    #[must_use]
    pub const fn partition(self) -> &'static str {
        match self {
            Self::ConfigMap => "plain",
            Self::Secret => "secret",
        }
    }
}

impl fmt::Display for TrackedKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConfigMap => f.write_str("ConfigMap"),
            Self::Secret => f.write_str("Secret"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    Text(String),
    Binary(Vec<u8>),
}

impl FieldValue {
    /// Value as it appears in the configuration tree; binary data is base64 encoded
    #[must_use]
    pub fn to_config_value(&self) -> String {
        match self {
            Self::Text(text) => text.clone(),
            Self::Binary(bytes) => general_purpose::STANDARD.encode(bytes),
        }
    }
}

/// Latest observed state of one `ConfigMap` or `Secret`. Updates replace the
/// whole record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resource {
    pub uid: String,
    pub name: String,
    pub kind: TrackedKind,
    pub fields: BTreeMap<String, FieldValue>,
}

impl Resource {
    #[must_use]
    pub fn new(kind: TrackedKind, uid: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            uid: uid.into(),
            name: name.into(),
            kind,
            fields: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with_text(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.insert(key.into(), FieldValue::Text(value.into()));
        self
    }

    #[must_use]
    pub fn with_binary(mut self, key: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        self.fields.insert(key.into(), FieldValue::Binary(value.into()));
        self
    }
}

impl From<ConfigMap> for Resource {
    fn from(config_map: ConfigMap) -> Self {
        let mut resource = Self::new(
            TrackedKind::ConfigMap,
            config_map.uid().unwrap_or_default(),
            config_map.name_any(),
        );

        for (key, value) in config_map.data.unwrap_or_default() {
            resource.fields.insert(key, FieldValue::Text(value));
        }
        for (key, value) in config_map.binary_data.unwrap_or_default() {
            resource.fields.insert(key, FieldValue::Binary(value.0));
        }

        resource
    }
}

impl From<Secret> for Resource {
    fn from(secret: Secret) -> Self {
        let mut resource = Self::new(
            TrackedKind::Secret,
            secret.uid().unwrap_or_default(),
            secret.name_any(),
        );

        // stringData is write-only, the API server folds it into data
        for (key, value) in secret.data.unwrap_or_default() {
            let field = match String::from_utf8(value.0) {
                Ok(text) => FieldValue::Text(text),
                Err(e) => FieldValue::Binary(e.into_bytes()),
            };
            resource.fields.insert(key, field);
        }

        resource
    }
}

/// One item of a watch stream. The stream ending is equivalent to `Error`.
#[derive(Debug, Clone)]
pub enum ResourceEvent {
    Added(Resource),
    Modified(Resource),
    Deleted(Resource),
    Error(String),
}
