//! Live, flattened key/value configuration mirrored from Kubernetes
//! `ConfigMap`s and `Secret`s.
//!
//! ```no_run
//! use kubeconf::config::{ResourceConfigProvider, ResourceSource};
//! use kubeconf::k8s::client::KubeResourceClient;
//! use std::sync::Arc;
//!
//! # async fn run() -> kubeconf::error::Result<()> {
//! let client = Arc::new(KubeResourceClient::try_default().await?);
//! let provider = ResourceConfigProvider::new(client, ResourceSource::with_default_selector())?;
//! provider.load().await?;
//! println!("{:?}", provider.get("app-config:dbhost"));
//! # Ok(())
//! # }
//! ```
pub mod config;
pub mod error;
pub mod k8s;
