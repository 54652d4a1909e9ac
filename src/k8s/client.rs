// Cluster access for the resources mirrored into configuration
use super::USER_AGENT;
use super::cache::config::WATCH_EVENT_CHANNEL_CAPACITY;
use super::cache::{Resource, ResourceEvent, TrackedKind};
use crate::error::{Error, Result};
use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::{StreamExt, pin_mut};
use hyper::http::{HeaderName, HeaderValue};
use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use kube::api::{Api, ListParams, WatchEvent, WatchParams};
use kube::{Client, Config};
use serde::de::DeserializeOwned;
use std::fmt::Debug;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, warn};

/// Watch events of one kind. The stream ends when the server closes the watch.
pub type WatchStream = BoxStream<'static, ResourceEvent>;

/// Where to look for resources
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceScope {
    pub namespace: String,
    pub label_selector: Option<String>,
}

impl ResourceScope {
    #[must_use]
    pub fn new(namespace: impl Into<String>, label_selector: Option<String>) -> Self {
        Self {
            namespace: namespace.into(),
            label_selector,
        }
    }

    fn list_params(&self) -> ListParams {
        let lp = ListParams::default();
        match &self.label_selector {
            Some(selector) => lp.labels(selector),
            None => lp,
        }
    }

    fn watch_params(&self, timeout: Duration) -> WatchParams {
        let secs = u32::try_from(timeout.as_secs()).unwrap_or(u32::MAX).max(1);
        let wp = WatchParams::default().timeout(secs);
        match &self.label_selector {
            Some(selector) => wp.labels(selector),
            None => wp,
        }
    }
}

/// Every resource of one kind at one point in time
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceList {
    pub resources: Vec<Resource>,
    /// Collection version a watch resumes from; empty when the server sent none
    pub resource_version: String,
}

/// List/watch capability the provider needs from the cluster
#[async_trait]
pub trait ResourceClient: Send + Sync + 'static {
    /// Namespace used when the source does not name one
    fn default_namespace(&self) -> &str;

    /// Fetch every resource of `kind` matching `scope`
    async fn list(&self, kind: TrackedKind, scope: &ResourceScope) -> Result<ResourceList>;

    /// Open a watch stream for `kind` delivering the changes made after
    /// `resource_version`. An error means the stream could not be opened at
    /// all; failures after that arrive as [`ResourceEvent::Error`] or as the
    /// end of the stream.
    async fn watch(
        &self,
        kind: TrackedKind,
        scope: &ResourceScope,
        resource_version: &str,
        timeout: Duration,
    ) -> Result<WatchStream>;
}

/// Add a user-agent header to outgoing API requests, ignoring invalid values
pub fn add_user_agent_header(config: &mut Config, user_agent: Option<&str>) {
    if let Some(user_agent) = user_agent {
        match HeaderValue::from_str(user_agent) {
            Ok(header_value) => config
                .headers
                .push((HeaderName::from_static("user-agent"), header_value)),
            Err(e) => warn!("Ignoring invalid user-agent {:?}: {}", user_agent, e),
        }
    }
}

/// [`ResourceClient`] backed by the Kubernetes API
#[derive(Clone)]
pub struct KubeResourceClient {
    client: Client,
    namespace: String,
}

impl KubeResourceClient {
    #[must_use]
    pub fn new(client: Client, namespace: impl Into<String>) -> Self {
        Self {
            client,
            namespace: namespace.into(),
        }
    }

    /// Create a client from the inferred configuration (in-cluster service
    /// account or local kubeconfig)
    ///
    /// # Errors
    ///
    /// Will return `Err` if no configuration can be inferred or the client
    /// cannot be built from it
    pub async fn try_default() -> Result<Self> {
        let mut config = Config::infer().await?;
        add_user_agent_header(&mut config, Some(USER_AGENT));

        let namespace = config.default_namespace.clone();
        let client = Client::try_from(config)?;

        Ok(Self::new(client, namespace))
    }
}

#[async_trait]
impl ResourceClient for KubeResourceClient {
    fn default_namespace(&self) -> &str {
        &self.namespace
    }

    async fn list(&self, kind: TrackedKind, scope: &ResourceScope) -> Result<ResourceList> {
        let lp = scope.list_params();
        match kind {
            TrackedKind::ConfigMap => {
                list_kind(Api::<ConfigMap>::namespaced(self.client.clone(), &scope.namespace), &lp)
                    .await
            }
            TrackedKind::Secret => {
                list_kind(Api::<Secret>::namespaced(self.client.clone(), &scope.namespace), &lp)
                    .await
            }
        }
    }

    async fn watch(
        &self,
        kind: TrackedKind,
        scope: &ResourceScope,
        resource_version: &str,
        timeout: Duration,
    ) -> Result<WatchStream> {
        let wp = scope.watch_params(timeout);
        // "0" lets the server start from any recent state it has cached
        let version = if resource_version.is_empty() {
            "0".to_string()
        } else {
            resource_version.to_string()
        };
        match kind {
            TrackedKind::ConfigMap => {
                watch_kind(
                    Api::<ConfigMap>::namespaced(self.client.clone(), &scope.namespace),
                    kind,
                    wp,
                    version,
                )
                .await
            }
            TrackedKind::Secret => {
                watch_kind(
                    Api::<Secret>::namespaced(self.client.clone(), &scope.namespace),
                    kind,
                    wp,
                    version,
                )
                .await
            }
        }
    }
}

async fn list_kind<K>(api: Api<K>, lp: &ListParams) -> Result<ResourceList>
where
    K: Clone + DeserializeOwned + Debug,
    Resource: From<K>,
{
    let list = api.list(lp).await?;
    Ok(ResourceList {
        resource_version: list.metadata.resource_version.unwrap_or_default(),
        resources: list.items.into_iter().map(Resource::from).collect(),
    })
}

/// Run the HTTP watch on its own task and hand its events over a channel, so
/// the returned stream owns everything it needs. Dropping the stream ends the
/// task.
async fn watch_kind<K>(
    api: Api<K>,
    kind: TrackedKind,
    wp: WatchParams,
    version: String,
) -> Result<WatchStream>
where
    K: Clone + DeserializeOwned + Debug + Send + 'static,
    Resource: From<K>,
{
    let (tx, rx) = mpsc::channel(WATCH_EVENT_CHANNEL_CAPACITY);
    let (opened_tx, opened_rx) = oneshot::channel::<Result<()>>();

    tokio::spawn(async move {
        let stream = match api.watch(&wp, &version).await {
            Ok(stream) => {
                let _ = opened_tx.send(Ok(()));
                stream
            }
            Err(e) => {
                let _ = opened_tx.send(Err(e.into()));
                return;
            }
        };
        pin_mut!(stream);

        loop {
            let next = tokio::select! {
                () = tx.closed() => break,
                next = stream.next() => next,
            };

            let event = match next {
                None => {
                    debug!("{} watch closed by the server", kind);
                    break;
                }
                Some(Ok(WatchEvent::Added(obj))) => ResourceEvent::Added(obj.into()),
                Some(Ok(WatchEvent::Modified(obj))) => ResourceEvent::Modified(obj.into()),
                Some(Ok(WatchEvent::Deleted(obj))) => ResourceEvent::Deleted(obj.into()),
                Some(Ok(WatchEvent::Bookmark(_))) => continue,
                Some(Ok(WatchEvent::Error(e))) => ResourceEvent::Error(format!("{e:?}")),
                Some(Err(e)) => ResourceEvent::Error(e.to_string()),
            };

            let failed = matches!(event, ResourceEvent::Error(_));
            if tx.send(event).await.is_err() || failed {
                break;
            }
        }
    });

    match opened_rx.await {
        Ok(Ok(())) => Ok(ReceiverStream::new(rx).boxed()),
        Ok(Err(e)) => Err(e),
        Err(_) => Err(Error::Custom(format!(
            "{kind} watch task ended before the stream was opened"
        ))),
    }
}
