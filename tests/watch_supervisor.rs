mod fake_client;

use fake_client::{FakeClient, config_map, eventually};
use kubeconf::error::Error;
use kubeconf::k8s::cache::{
    ResourceCache, ResourceEvent, ResourceWatcher, SharedCache, TrackedKind, WatchSettings,
    WatchState, lock_cache,
};
use kubeconf::k8s::client::ResourceScope;
use std::sync::Arc;
use std::time::Duration;

fn settings(restart_delay: Duration) -> WatchSettings {
    WatchSettings {
        scope: ResourceScope::new("default", None),
        timeout: Duration::from_secs(60),
        restart_delay,
    }
}

/// Watcher whose restart loop is not running; tests drive ticks by hand
fn manual_watcher(client: &Arc<FakeClient>) -> (ResourceWatcher<FakeClient>, SharedCache) {
    let cache = ResourceCache::shared(&[]);
    let watcher = ResourceWatcher::new(
        Arc::clone(client),
        Arc::clone(&cache),
        settings(Duration::from_secs(3600)),
    );
    watcher.watch(&TrackedKind::ALL).unwrap();
    (watcher, cache)
}

fn cached(cache: &SharedCache, kind: TrackedKind) -> usize {
    lock_cache(cache).unwrap().len(kind)
}

#[tokio::test]
async fn test_new_kinds_start_marked_and_attach_on_first_tick() {
    let client = Arc::new(FakeClient::new());
    let (watcher, cache) = manual_watcher(&client);

    // watch() registers the kinds with the cache
    assert!(lock_cache(&cache).unwrap().is_registered(TrackedKind::Secret));
    assert_eq!(watcher.state(TrackedKind::ConfigMap).unwrap(), WatchState::NeedsRestart);
    assert_eq!(watcher.state(TrackedKind::Secret).unwrap(), WatchState::NeedsRestart);

    assert_eq!(watcher.restart_marked().await.unwrap(), 2);

    assert_eq!(watcher.state(TrackedKind::ConfigMap).unwrap(), WatchState::Running);
    assert_eq!(watcher.state(TrackedKind::Secret).unwrap(), WatchState::Running);
    assert_eq!(client.watch_calls(TrackedKind::ConfigMap), 1);
    assert_eq!(client.watch_calls(TrackedKind::Secret), 1);

    let stats = watcher.stats();
    assert_eq!(stats.tracked_kinds, 2);
    assert_eq!(stats.active_watchers, 2);
    assert_eq!(stats.pending_restarts, 0);
    assert_eq!(stats.total_restarts, 2);
}

#[tokio::test]
async fn test_running_kinds_are_not_reopened() {
    let client = Arc::new(FakeClient::new());
    let (watcher, _cache) = manual_watcher(&client);
    watcher.restart_marked().await.unwrap();

    assert_eq!(watcher.restart_marked().await.unwrap(), 0);
    assert_eq!(client.watch_calls(TrackedKind::ConfigMap), 1);

    // Tracking an already known kind changes nothing
    watcher.watch(&[TrackedKind::ConfigMap]).unwrap();
    assert_eq!(watcher.state(TrackedKind::ConfigMap).unwrap(), WatchState::Running);
}

#[tokio::test]
async fn test_events_are_mirrored_into_the_cache_in_order() {
    let client = Arc::new(FakeClient::new());
    let (watcher, cache) = manual_watcher(&client);
    watcher.restart_marked().await.unwrap();

    let first = config_map("uid-1", "app-config", &[("db.host", "10.0.0.1")]);
    let updated = config_map("uid-1", "app-config", &[("db.host", "10.0.0.2")]);
    let other = config_map("uid-2", "feature-flags", &[("beta", "on")]);

    assert!(client.emit(TrackedKind::ConfigMap, ResourceEvent::Added(first)));
    assert!(client.emit(TrackedKind::ConfigMap, ResourceEvent::Added(other.clone())));
    assert!(client.emit(TrackedKind::ConfigMap, ResourceEvent::Modified(updated.clone())));
    assert!(eventually(|| watcher.stats().total_events == 3).await);

    {
        let mut cache = lock_cache(&cache).unwrap();
        assert!(cache.take_dirty());
        assert_eq!(cache.snapshot(TrackedKind::ConfigMap), vec![updated, other.clone()]);
        assert!(cache.snapshot(TrackedKind::Secret).is_empty());
    }

    let gone = config_map("uid-1", "app-config", &[]);
    assert!(client.emit(TrackedKind::ConfigMap, ResourceEvent::Deleted(gone)));
    assert!(eventually(|| cached(&cache, TrackedKind::ConfigMap) == 1).await);

    let mut cache = lock_cache(&cache).unwrap();
    assert!(cache.take_dirty());
    assert_eq!(cache.snapshot(TrackedKind::ConfigMap), vec![other]);
}

#[tokio::test]
async fn test_event_without_uid_is_skipped() {
    let client = Arc::new(FakeClient::new());
    let (watcher, cache) = manual_watcher(&client);
    watcher.restart_marked().await.unwrap();

    client.emit(
        TrackedKind::ConfigMap,
        ResourceEvent::Added(config_map("", "broken", &[("a", "b")])),
    );
    client.emit(
        TrackedKind::ConfigMap,
        ResourceEvent::Added(config_map("uid-1", "fine", &[("a", "b")])),
    );

    assert!(eventually(|| cached(&cache, TrackedKind::ConfigMap) == 1).await);
    assert_eq!(watcher.state(TrackedKind::ConfigMap).unwrap(), WatchState::Running);
}

#[tokio::test]
async fn test_closed_stream_is_marked_and_reopened() {
    let client = Arc::new(FakeClient::new());
    let (watcher, _cache) = manual_watcher(&client);
    watcher.restart_marked().await.unwrap();

    client.close(TrackedKind::ConfigMap);
    assert!(
        eventually(|| watcher.state(TrackedKind::ConfigMap).unwrap() == WatchState::NeedsRestart)
            .await
    );
    // The other kind is unaffected
    assert_eq!(watcher.state(TrackedKind::Secret).unwrap(), WatchState::Running);
    assert_eq!(watcher.stats().active_watchers, 1);

    assert_eq!(watcher.restart_marked().await.unwrap(), 1);
    assert_eq!(watcher.state(TrackedKind::ConfigMap).unwrap(), WatchState::Running);
    assert_eq!(client.watch_calls(TrackedKind::ConfigMap), 2);
    assert_eq!(client.watch_calls(TrackedKind::Secret), 1);
}

#[tokio::test]
async fn test_error_event_is_marked_and_reopened() {
    let client = Arc::new(FakeClient::new());
    let (watcher, _cache) = manual_watcher(&client);
    watcher.restart_marked().await.unwrap();

    assert!(client.emit(
        TrackedKind::Secret,
        ResourceEvent::Error("too old resource version".to_string())
    ));
    assert!(
        eventually(|| watcher.state(TrackedKind::Secret).unwrap() == WatchState::NeedsRestart)
            .await
    );

    // The consumer of the failed stream is gone
    assert!(eventually(|| !client.is_open(TrackedKind::Secret)).await);

    assert_eq!(watcher.restart_marked().await.unwrap(), 1);
    assert!(client.is_open(TrackedKind::Secret));
    assert_eq!(watcher.stats().total_restarts, 3);
}

#[tokio::test]
async fn test_failed_open_is_retried_once_per_tick() {
    let client = Arc::new(FakeClient::new());
    let (watcher, _cache) = manual_watcher(&client);
    client.fail_next_opens(TrackedKind::ConfigMap, 2);

    assert_eq!(watcher.restart_marked().await.unwrap(), 1);
    assert_eq!(client.watch_calls(TrackedKind::ConfigMap), 1);
    assert_eq!(watcher.state(TrackedKind::ConfigMap).unwrap(), WatchState::NeedsRestart);

    assert_eq!(watcher.restart_marked().await.unwrap(), 0);
    assert_eq!(client.watch_calls(TrackedKind::ConfigMap), 2);
    assert_eq!(watcher.state(TrackedKind::ConfigMap).unwrap(), WatchState::NeedsRestart);

    assert_eq!(watcher.restart_marked().await.unwrap(), 1);
    assert_eq!(client.watch_calls(TrackedKind::ConfigMap), 3);
    assert_eq!(watcher.state(TrackedKind::ConfigMap).unwrap(), WatchState::Running);

    // Secrets opened on the first tick and were never retried
    assert_eq!(client.watch_calls(TrackedKind::Secret), 1);
}

#[tokio::test]
async fn test_restart_loop_heals_streams() {
    let client = Arc::new(FakeClient::new());
    let cache = ResourceCache::shared(&[]);
    let watcher = ResourceWatcher::new(
        Arc::clone(&client),
        Arc::clone(&cache),
        settings(Duration::from_millis(20)),
    );
    watcher.watch(&TrackedKind::ALL).unwrap();
    watcher.start().unwrap();
    // A second start does not spawn another loop
    watcher.start().unwrap();

    assert!(eventually(|| watcher.stats().active_watchers == 2).await);

    client.close(TrackedKind::ConfigMap);
    assert!(eventually(|| client.watch_calls(TrackedKind::ConfigMap) == 2).await);
    assert!(
        eventually(|| watcher.state(TrackedKind::ConfigMap).unwrap() == WatchState::Running)
            .await
    );

    client.emit(
        TrackedKind::ConfigMap,
        ResourceEvent::Added(config_map("uid-1", "app-config", &[("k", "v")])),
    );
    assert!(eventually(|| cached(&cache, TrackedKind::ConfigMap) == 1).await);

    watcher.dispose();
}

#[tokio::test]
async fn test_dispose_closes_streams_and_is_idempotent() {
    let client = Arc::new(FakeClient::new());
    let (watcher, _cache) = manual_watcher(&client);
    watcher.restart_marked().await.unwrap();

    // One kind is mid-restart when disposal happens
    client.close(TrackedKind::Secret);
    assert!(
        eventually(|| watcher.state(TrackedKind::Secret).unwrap() == WatchState::NeedsRestart)
            .await
    );

    watcher.dispose();
    watcher.dispose();
    assert!(watcher.is_disposed());

    assert!(eventually(|| !client.is_open(TrackedKind::ConfigMap)).await);
    assert_eq!(watcher.stats().active_watchers, 0);

    // No new streams after disposal
    assert_eq!(watcher.restart_marked().await.unwrap(), 0);
    assert_eq!(client.watch_calls(TrackedKind::Secret), 1);

    watcher.watch(&TrackedKind::ALL).unwrap();
    watcher.start().unwrap();
    assert_eq!(watcher.stats().active_watchers, 0);
}

#[tokio::test]
async fn test_unknown_kind_is_an_invariant_violation() {
    let client = Arc::new(FakeClient::new());
    let watcher = ResourceWatcher::new(
        Arc::clone(&client),
        ResourceCache::shared(&[]),
        settings(Duration::from_secs(3600)),
    );
    watcher.watch(&[TrackedKind::ConfigMap]).unwrap();

    assert!(matches!(watcher.state(TrackedKind::Secret), Err(Error::Invariant(_))));
    assert_eq!(watcher.restart_marked().await.unwrap(), 1);
    assert_eq!(client.watch_calls(TrackedKind::Secret), 0);
}

#[tokio::test]
async fn test_restart_drops_resources_deleted_while_detached() {
    let client = Arc::new(FakeClient::new());
    let (watcher, cache) = manual_watcher(&client);
    watcher.restart_marked().await.unwrap();

    client.emit(
        TrackedKind::ConfigMap,
        ResourceEvent::Added(config_map("uid-1", "app-config", &[("db.host", "10.0.0.1")])),
    );
    assert!(eventually(|| cached(&cache, TrackedKind::ConfigMap) == 1).await);
    lock_cache(&cache).unwrap().take_dirty();

    // The resource is deleted while no stream is attached, so no Deleted
    // event is ever delivered
    client.close(TrackedKind::ConfigMap);
    assert!(
        eventually(|| watcher.state(TrackedKind::ConfigMap).unwrap() == WatchState::NeedsRestart)
            .await
    );

    assert_eq!(watcher.restart_marked().await.unwrap(), 1);

    let mut cache = lock_cache(&cache).unwrap();
    assert!(cache.take_dirty());
    assert!(cache.snapshot(TrackedKind::ConfigMap).is_empty());
}

#[tokio::test]
async fn test_restart_picks_up_resources_created_while_detached() {
    let client = Arc::new(FakeClient::new());
    let (watcher, cache) = manual_watcher(&client);
    let existing = config_map("uid-9", "feature-flags", &[("beta", "on")]);
    client.set_list(TrackedKind::ConfigMap, vec![existing.clone()]);

    watcher.restart_marked().await.unwrap();

    let mut cache = lock_cache(&cache).unwrap();
    assert!(cache.take_dirty());
    assert_eq!(cache.snapshot(TrackedKind::ConfigMap), vec![existing]);
    assert!(cache.snapshot(TrackedKind::Secret).is_empty());
}

#[tokio::test]
async fn test_watch_resumes_from_listing_version() {
    let client = Arc::new(FakeClient::new());
    let (watcher, _cache) = manual_watcher(&client);
    watcher.restart_marked().await.unwrap();

    client.close(TrackedKind::ConfigMap);
    assert!(
        eventually(|| watcher.state(TrackedKind::ConfigMap).unwrap() == WatchState::NeedsRestart)
            .await
    );
    watcher.restart_marked().await.unwrap();

    assert_eq!(client.list_calls(TrackedKind::ConfigMap), 2);
    assert_eq!(
        client.watch_versions(TrackedKind::ConfigMap),
        vec!["plain-1".to_string(), "plain-2".to_string()]
    );
    assert_eq!(client.watch_versions(TrackedKind::Secret), vec!["secret-1".to_string()]);
}

#[tokio::test]
async fn test_failed_list_keeps_kind_marked() {
    let client = Arc::new(FakeClient::new());
    let (watcher, _cache) = manual_watcher(&client);
    client.fail_next_lists(TrackedKind::ConfigMap, 1);

    assert_eq!(watcher.restart_marked().await.unwrap(), 1);
    assert_eq!(client.watch_calls(TrackedKind::ConfigMap), 0);
    assert_eq!(watcher.state(TrackedKind::ConfigMap).unwrap(), WatchState::NeedsRestart);

    assert_eq!(watcher.restart_marked().await.unwrap(), 1);
    assert_eq!(client.list_calls(TrackedKind::ConfigMap), 2);
    assert_eq!(watcher.state(TrackedKind::ConfigMap).unwrap(), WatchState::Running);
}
