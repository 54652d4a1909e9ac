//! Scripted in-memory cluster shared by the integration tests.
//!
//! Lists return whatever was set with `set_list` at a fresh resource version;
//! every watch opens an unbounded channel the test drives with `emit` and
//! `close`.
#![allow(dead_code)]

use async_trait::async_trait;
use futures::StreamExt;
use kubeconf::error::{Error, Result};
use kubeconf::k8s::cache::{Resource, ResourceEvent, TrackedKind};
use kubeconf::k8s::client::{ResourceClient, ResourceList, ResourceScope, WatchStream};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

#[derive(Default)]
pub struct FakeClient {
    lists: Mutex<HashMap<TrackedKind, Vec<Resource>>>,
    streams: Mutex<HashMap<TrackedKind, mpsc::UnboundedSender<ResourceEvent>>>,
    watch_calls: Mutex<HashMap<TrackedKind, usize>>,
    watch_versions: Mutex<HashMap<TrackedKind, Vec<String>>>,
    list_calls: Mutex<HashMap<TrackedKind, usize>>,
    failing_opens: Mutex<HashMap<TrackedKind, usize>>,
    failing_lists: Mutex<HashMap<TrackedKind, usize>>,
}

/// Take one from the failure budget of `kind`, if any is left
fn consume_failure(budget: &Mutex<HashMap<TrackedKind, usize>>, kind: TrackedKind) -> bool {
    match budget.lock().unwrap().get_mut(&kind) {
        Some(remaining) if *remaining > 0 => {
            *remaining -= 1;
            true
        }
        _ => false,
    }
}

impl FakeClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_list(&self, kind: TrackedKind, resources: Vec<Resource>) {
        self.lists.lock().unwrap().insert(kind, resources);
    }

    /// Make the next `count` watch calls for `kind` fail to open
    pub fn fail_next_opens(&self, kind: TrackedKind, count: usize) {
        self.failing_opens.lock().unwrap().insert(kind, count);
    }

    /// Make the next `count` list calls for `kind` fail
    pub fn fail_next_lists(&self, kind: TrackedKind, count: usize) {
        self.failing_lists.lock().unwrap().insert(kind, count);
    }

    pub fn list_calls(&self, kind: TrackedKind) -> usize {
        self.list_calls
            .lock()
            .unwrap()
            .get(&kind)
            .copied()
            .unwrap_or(0)
    }

    /// Resource versions the watches of `kind` were opened from, oldest first
    pub fn watch_versions(&self, kind: TrackedKind) -> Vec<String> {
        self.watch_versions
            .lock()
            .unwrap()
            .get(&kind)
            .cloned()
            .unwrap_or_default()
    }

    pub fn watch_calls(&self, kind: TrackedKind) -> usize {
        self.watch_calls
            .lock()
            .unwrap()
            .get(&kind)
            .copied()
            .unwrap_or(0)
    }

    /// Push an event into the latest stream of `kind`; false if no consumer
    /// is listening
    pub fn emit(&self, kind: TrackedKind, event: ResourceEvent) -> bool {
        self.streams
            .lock()
            .unwrap()
            .get(&kind)
            .is_some_and(|tx| tx.send(event).is_ok())
    }

    /// End the latest stream of `kind` without an error event
    pub fn close(&self, kind: TrackedKind) {
        self.streams.lock().unwrap().remove(&kind);
    }

    pub fn is_open(&self, kind: TrackedKind) -> bool {
        self.streams
            .lock()
            .unwrap()
            .get(&kind)
            .is_some_and(|tx| !tx.is_closed())
    }
}

#[async_trait]
impl ResourceClient for FakeClient {
    fn default_namespace(&self) -> &str {
        "default"
    }

    async fn list(&self, kind: TrackedKind, _scope: &ResourceScope) -> Result<ResourceList> {
        let call = {
            let mut calls = self.list_calls.lock().unwrap();
            let call = calls.entry(kind).or_default();
            *call += 1;
            *call
        };
        if consume_failure(&self.failing_lists, kind) {
            return Err(Error::Custom(format!("{kind} list refused")));
        }

        Ok(ResourceList {
            resources: self
                .lists
                .lock()
                .unwrap()
                .get(&kind)
                .cloned()
                .unwrap_or_default(),
            resource_version: format!("{}-{call}", kind.partition()),
        })
    }

    async fn watch(
        &self,
        kind: TrackedKind,
        _scope: &ResourceScope,
        resource_version: &str,
        _timeout: Duration,
    ) -> Result<WatchStream> {
        *self.watch_calls.lock().unwrap().entry(kind).or_default() += 1;
        self.watch_versions
            .lock()
            .unwrap()
            .entry(kind)
            .or_default()
            .push(resource_version.to_string());

        if consume_failure(&self.failing_opens, kind) {
            return Err(Error::Custom(format!("{kind} watch refused")));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        self.streams.lock().unwrap().insert(kind, tx);
        Ok(UnboundedReceiverStream::new(rx).boxed())
    }
}

/// Poll `condition` until it holds or two seconds pass
pub async fn eventually(condition: impl Fn() -> bool) -> bool {
    for _ in 0..200 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

pub fn config_map(uid: &str, name: &str, fields: &[(&str, &str)]) -> Resource {
    fields
        .iter()
        .fold(Resource::new(TrackedKind::ConfigMap, uid, name), |r, (k, v)| {
            r.with_text(*k, *v)
        })
}

pub fn secret(uid: &str, name: &str, fields: &[(&str, &str)]) -> Resource {
    fields
        .iter()
        .fold(Resource::new(TrackedKind::Secret, uid, name), |r, (k, v)| {
            r.with_text(*k, *v)
        })
}
