use super::cache::config::{DEFAULT_SELECTOR_LABEL, HOST_ENV_VAR};
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Requirement {
    Exists(String),
    NotExists(String),
    Equals(String, String),
    In(String, Vec<String>),
    NotIn(String, Vec<String>),
}

impl fmt::Display for Requirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exists(name) => write!(f, "{name}"),
            Self::NotExists(name) => write!(f, "!{name}"),
            Self::Equals(name, value) => write!(f, "{name}={value}"),
            Self::In(name, values) => write!(f, "{name} in ({})", values.join(", ")),
            Self::NotIn(name, values) => write!(f, "{name} notin ({})", values.join(", ")),
        }
    }
}

/// Builds Kubernetes label selector strings, e.g.
/// `LabelSelectorBuilder::new().equals("app", "web").has("tier", ["a", "b"])`
/// renders `app=web,tier in (a, b)`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelSelectorBuilder {
    requirements: Vec<Requirement>,
}

impl LabelSelectorBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Equality requirements for every label of `labels`
    #[must_use]
    pub fn from_labels(labels: &BTreeMap<String, String>) -> Self {
        labels
            .iter()
            .fold(Self::new(), |builder, (key, value)| builder.equals(key, value))
    }

    #[must_use]
    pub fn exists(mut self, name: impl Into<String>) -> Self {
        self.requirements.push(Requirement::Exists(name.into()));
        self
    }

    #[must_use]
    pub fn not_exists(mut self, name: impl Into<String>) -> Self {
        self.requirements.push(Requirement::NotExists(name.into()));
        self
    }

    #[must_use]
    pub fn equals(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.requirements
            .push(Requirement::Equals(name.into(), value.into()));
        self
    }

    #[must_use]
    pub fn has<I, S>(mut self, name: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.requirements.push(Requirement::In(
            name.into(),
            values.into_iter().map(Into::into).collect(),
        ));
        self
    }

    #[must_use]
    pub fn has_not<I, S>(mut self, name: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.requirements.push(Requirement::NotIn(
            name.into(),
            values.into_iter().map(Into::into).collect(),
        ));
        self
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.requirements.is_empty()
    }

    #[must_use]
    pub fn build(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for LabelSelectorBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rendered = self
            .requirements
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<String>>()
            .join(",");
        f.write_str(&rendered)
    }
}

/// Selector matching resources labelled for this host: `app=<host>`
#[must_use]
pub fn default_selector(host: &str) -> String {
    LabelSelectorBuilder::new()
        .equals(DEFAULT_SELECTOR_LABEL, host)
        .build()
}

/// Identity of the running host, as Kubernetes exposes it to pods
#[must_use]
pub fn host_identity() -> Option<String> {
    std::env::var(HOST_ENV_VAR)
        .ok()
        .filter(|host| !host.trim().is_empty())
}
