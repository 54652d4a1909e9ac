use crate::error::{Error, Result};
use crate::k8s::cache::config::{
    MAX_WATCH_TIMEOUT_SECONDS, default_reload_delay, default_watch_timeout,
};
use crate::k8s::client::ResourceScope;
use crate::k8s::selector::{LabelSelectorBuilder, default_selector};
use std::fmt;
use std::time::Duration;
use tracing::warn;

/// Options of a `ConfigMap`/`Secret` configuration source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceSource {
    /// Tolerate a source that lists no resources
    pub optional: bool,
    /// Keep watching the cluster and reload on change, instead of loading once
    pub reload_on_change: bool,
    /// Tick of the watch restart loop and the reload loop
    pub reload_delay: Duration,
    /// Explicit label selector
    pub label_selector: Option<String>,
    /// Select `app=<host>` when no explicit selector is set
    pub default_selector: bool,
    /// Namespace to read from, defaults to the client's namespace
    pub namespace: Option<String>,
    /// Server-side timeout of each watch request
    pub watch_timeout: Duration,
}

impl Default for ResourceSource {
    fn default() -> Self {
        Self {
            optional: false,
            reload_on_change: true,
            reload_delay: default_reload_delay(),
            label_selector: None,
            default_selector: false,
            namespace: None,
            watch_timeout: default_watch_timeout(),
        }
    }
}

impl ResourceSource {
    /// Required source that reloads on change every 250ms
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Like [`ResourceSource::new`] but selecting resources labelled `app=<host>`
    #[must_use]
    pub fn with_default_selector() -> Self {
        Self::new().default_selector(true)
    }

    #[must_use]
    pub const fn optional(mut self, optional: bool) -> Self {
        self.optional = optional;
        self
    }

    #[must_use]
    pub const fn reload_on_change(mut self, reload_on_change: bool) -> Self {
        self.reload_on_change = reload_on_change;
        self
    }

    #[must_use]
    pub const fn reload_delay(mut self, reload_delay: Duration) -> Self {
        self.reload_delay = reload_delay;
        self
    }

    #[must_use]
    pub fn label_selector(mut self, selector: impl Into<String>) -> Self {
        self.label_selector = Some(selector.into());
        self
    }

    /// Set the label selector from a [`LabelSelectorBuilder`]. An empty
    /// builder clears the selector.
    #[must_use]
    pub fn label_selector_with<F>(mut self, build: F) -> Self
    where
        F: FnOnce(LabelSelectorBuilder) -> LabelSelectorBuilder,
    {
        let builder = build(LabelSelectorBuilder::new());
        self.label_selector = (!builder.is_empty()).then(|| builder.build());
        self
    }

    #[must_use]
    pub const fn default_selector(mut self, default_selector: bool) -> Self {
        self.default_selector = default_selector;
        self
    }

    #[must_use]
    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    #[must_use]
    pub const fn watch_timeout(mut self, watch_timeout: Duration) -> Self {
        self.watch_timeout = watch_timeout;
        self
    }

    /// # Errors
    ///
    /// Returns a validation error for a zero reload delay or a watch timeout
    /// outside `1..295` seconds
    pub fn validate(&self) -> Result<()> {
        if self.reload_delay.is_zero() {
            return Err(Error::Validation(
                "reload delay must be greater than zero".to_string(),
            ));
        }
        if self.watch_timeout.as_secs() == 0
            || self.watch_timeout.as_secs() >= MAX_WATCH_TIMEOUT_SECONDS
        {
            return Err(Error::Validation(format!(
                "watch timeout must be between 1s and {}s, got {:?}",
                MAX_WATCH_TIMEOUT_SECONDS - 1,
                self.watch_timeout
            )));
        }
        Ok(())
    }

    /// The explicit selector, else `app=<host>` when the default selector is
    /// enabled and the host is known
    #[must_use]
    pub fn resolve_selector(&self, host: Option<&str>) -> Option<String> {
        if let Some(selector) = &self.label_selector {
            return Some(selector.clone());
        }
        if !self.default_selector {
            return None;
        }

        match host {
            Some(host) => Some(default_selector(host)),
            None => {
                warn!("Default selector requested but the host identity is unknown, selecting everything");
                None
            }
        }
    }

    #[must_use]
    pub fn scope(&self, default_namespace: &str, host: Option<&str>) -> ResourceScope {
        ResourceScope::new(
            self.namespace.as_deref().unwrap_or(default_namespace),
            self.resolve_selector(host),
        )
    }
}

impl fmt::Display for ResourceSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let requirement = if self.optional { "Optional" } else { "Required" };
        write!(f, "ResourceSource ({requirement})")
    }
}
