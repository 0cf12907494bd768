mod common;

use common::{FakeCluster, config_maps, deployments, eventually, labelled, object, pods};
use k8s_openapi::api::core::v1::Pod;
use kube::ResourceExt;
use kube::api::GroupVersionKind;
use kube::runtime::watcher;
use kubecache::error::{Error, ErrorKind};
use kubecache::k8s::cache::{
    AccessKey, CacheConfig, InformerState, ObjectEvent, ObjectStore, ResourceType, handler_fn,
};
use kubecache::store::{Key, Store, get_as};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::mpsc::{UnboundedReceiver, unbounded_channel};

fn store(cluster: &Arc<FakeCluster>) -> ObjectStore {
    ObjectStore::new(cluster.clone(), CacheConfig::default())
}

fn pod_key(namespace: &str) -> Key {
    Key::new(namespace, "v1", "Pod")
}

async fn recv(rx: &mut UnboundedReceiver<ObjectEvent>) -> ObjectEvent {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for event")
        .expect("handler channel closed")
}

async fn synced(store: &ObjectStore) {
    let synced = store
        .wait_for_cache_sync(Duration::from_secs(5))
        .await
        .unwrap();
    assert!(synced.values().all(|s| *s), "not synced: {synced:?}");
}

async fn loaded(store: &ObjectStore, key: &Key) -> bool {
    eventually(|| async move { !store.is_loading(key).await }).await
}

#[tokio::test]
async fn test_list_reports_loading_until_synced() {
    let cluster = FakeCluster::new();
    let store = store(&cluster);

    let (items, loading) = store.list(&pod_key("default")).await.unwrap();
    assert!(items.is_empty());
    assert!(loading);
    assert!(store.is_loading(&pod_key("default")).await);

    cluster.sync(
        "pods",
        vec![
            object(&pods(), "default", "web"),
            object(&pods(), "default", "db"),
            object(&pods(), "kube-system", "dns"),
        ],
    );
    synced(&store).await;
    assert!(loaded(&store, &pod_key("default")).await);

    let (items, loading) = store.list(&pod_key("default")).await.unwrap();
    assert!(!loading);
    let names: Vec<String> = items.iter().map(ResourceExt::name_any).collect();
    assert_eq!(names, vec!["db", "web"]);

    let (all, _) = store.list(&pod_key("")).await.unwrap();
    assert_eq!(all.len(), 3);
}

#[tokio::test]
async fn test_unseen_key_is_not_loading() {
    let cluster = FakeCluster::new();
    let store = store(&cluster);
    assert!(!store.is_loading(&Key::new("default", "apps/v1", "Deployment")).await);
}

#[tokio::test]
async fn test_list_filters_by_selector() {
    let cluster = FakeCluster::new();
    let store = store(&cluster);
    store.list(&pod_key("default")).await.unwrap();

    cluster.sync(
        "pods",
        vec![
            labelled(&pods(), "default", "web-1", &[("app", "web")]),
            labelled(&pods(), "default", "web-2", &[("app", "web")]),
            labelled(&pods(), "default", "db-1", &[("app", "db")]),
        ],
    );
    synced(&store).await;

    let (items, _) = store
        .list(&pod_key("default").with_selector([("app", "web")]))
        .await
        .unwrap();
    assert_eq!(items.len(), 2);
}

#[tokio::test]
async fn test_get() {
    let cluster = FakeCluster::new();
    let store = store(&cluster);
    store.list(&pod_key("default")).await.unwrap();
    cluster.sync("pods", vec![object(&pods(), "default", "web")]);
    synced(&store).await;

    let found = store
        .get(&pod_key("default").with_name("web"))
        .await
        .unwrap();
    assert_eq!(found.map(|o| o.name_any()), Some("web".to_string()));

    let missing = store
        .get(&pod_key("default").with_name("nope"))
        .await
        .unwrap();
    assert!(missing.is_none());
}

#[tokio::test]
async fn test_get_as_typed() {
    let cluster = FakeCluster::new();
    let store = store(&cluster);
    store.list(&pod_key("default")).await.unwrap();
    cluster.sync(
        "pods",
        vec![labelled(&pods(), "default", "web", &[("app", "web")])],
    );
    synced(&store).await;

    let pod: Pod = get_as(&store, &pod_key("default").with_name("web"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(pod.metadata.name.as_deref(), Some("web"));
    assert_eq!(pod.labels().get("app").map(String::as_str), Some("web"));

    let missing: Option<Pod> = get_as(&store, &pod_key("default").with_name("db"))
        .await
        .unwrap();
    assert!(missing.is_none());
}

#[tokio::test]
async fn test_watch_invokes_handler_once() {
    let cluster = FakeCluster::new();
    let store = store(&cluster);
    let (tx, mut rx) = unbounded_channel();

    store
        .watch(
            &pod_key("default"),
            handler_fn(move |event| {
                let _ = tx.send(event);
            }),
        )
        .await
        .unwrap();
    cluster.sync("pods", Vec::new());
    synced(&store).await;

    cluster.send(
        "pods",
        watcher::Event::Apply(object(&pods(), "default", "web")),
    );
    cluster.send(
        "pods",
        watcher::Event::Apply(object(&pods(), "other", "ignored")),
    );
    cluster.send(
        "pods",
        watcher::Event::Apply(object(&pods(), "default", "db")),
    );

    match recv(&mut rx).await {
        ObjectEvent::Added(o) => assert_eq!(o.name_any(), "web"),
        other => panic!("unexpected event {other:?}"),
    }
    match recv(&mut rx).await {
        ObjectEvent::Added(o) => assert_eq!(o.name_any(), "db"),
        other => panic!("unexpected event {other:?}"),
    }
}

#[tokio::test]
async fn test_overlapping_watches_all_fire() {
    let cluster = FakeCluster::new();
    let store = store(&cluster);
    let calls = Arc::new(AtomicUsize::new(0));

    for key in [pod_key(""), pod_key("default"), pod_key("default").with_name("web")] {
        let calls = calls.clone();
        store
            .watch(
                &key,
                handler_fn(move |_| {
                    calls.fetch_add(1, Ordering::SeqCst);
                }),
            )
            .await
            .unwrap();
    }
    assert_eq!(cluster.watch_count("pods"), 1);

    cluster.sync("pods", vec![object(&pods(), "default", "web")]);
    let calls = &calls;
    assert!(eventually(|| async move { calls.load(Ordering::SeqCst) == 3 }).await);
}

#[tokio::test]
async fn test_unwatch_stops_handlers() {
    let cluster = FakeCluster::new();
    let store = store(&cluster);
    let (tx, mut rx) = unbounded_channel();

    store
        .watch(
            &pod_key("default"),
            handler_fn(move |event| {
                let _ = tx.send(event);
            }),
        )
        .await
        .unwrap();
    cluster.sync("pods", Vec::new());
    synced(&store).await;

    store
        .unwatch(&[GroupVersionKind::gvk("", "v1", "Pod")])
        .await
        .unwrap();
    assert_eq!(
        store
            .factory()
            .state(&ResourceType::from(&pods()))
            .unwrap(),
        InformerState::Stopped
    );

    cluster.send(
        "pods",
        watcher::Event::Apply(object(&pods(), "default", "web")),
    );
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(rx.try_recv().is_err());

    // the next use starts a fresh watch
    store.list(&pod_key("default")).await.unwrap();
    assert_eq!(cluster.watch_count("pods"), 2);
}

#[tokio::test]
async fn test_unwatch_ignores_inactive_kinds() {
    let cluster = FakeCluster::new();
    let store = store(&cluster);
    store.list(&pod_key("default")).await.unwrap();

    store
        .unwatch(&[
            GroupVersionKind::gvk("apps", "v1", "Deployment"),
            GroupVersionKind::gvk("example.com", "v1", "Unknown"),
        ])
        .await
        .unwrap();

    assert_eq!(
        store.factory().resources().unwrap(),
        vec![ResourceType::from(&pods())]
    );
}

#[tokio::test]
async fn test_access_denied_is_not_wrapped() {
    let cluster = FakeCluster::new();
    cluster.deny("list", "deployments");
    let store = store(&cluster);

    let err = store
        .list(&Key::new("default", "apps/v1", "Deployment"))
        .await
        .unwrap_err();

    match &err {
        Error::AccessDenied(key) => {
            assert_eq!(key.group, "apps");
            assert_eq!(key.resource, "deployments");
            assert_eq!(key.verb, "list");
        }
        other => panic!("expected access denied, got {other:?}"),
    }
    assert_eq!(
        err.to_string(),
        "access denied: no list access in default to apps/deployments"
    );
    assert_eq!(cluster.watch_count("deployments"), 0);
}

#[tokio::test]
async fn test_denial_is_cached() {
    let cluster = FakeCluster::new();
    cluster.deny("get", "pods");
    let store = store(&cluster);

    for _ in 0..3 {
        let err = store
            .get(&pod_key("default").with_name("web"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AccessDenied);
    }
    assert_eq!(cluster.reviews(), 1);
}

#[tokio::test]
async fn test_unknown_kind_is_mapping_error() {
    let cluster = FakeCluster::new();
    let store = store(&cluster);

    let err = store
        .list(&Key::new("default", "example.com/v1", "Widget"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Mapping);
    assert!(!err.is_retryable());
    assert_eq!(cluster.reviews(), 0);
}

#[tokio::test]
async fn test_unreachable_discovery_is_retryable() {
    let cluster = FakeCluster::new();
    cluster.set_offline(true);
    let store = store(&cluster);

    let err = store
        .access()
        .has_access(&pod_key("default"), "list")
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Transport);
    assert!(err.is_retryable());

    let err = store.list(&pod_key("default")).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Transport);
    assert!(err.is_retryable());
    assert_eq!(cluster.reviews(), 0);

    cluster.set_offline(false);
    store.list(&pod_key("default")).await.unwrap();
}

#[tokio::test]
async fn test_failed_review_is_retryable() {
    let cluster = FakeCluster::new();
    cluster.fail_reviews(true);
    let store = store(&cluster);

    let err = store.list(&pod_key("default")).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Fetch);
    assert!(err.is_retryable());
    assert!(err.to_string().contains("CacheKey[Namespace='default'"));

    cluster.fail_reviews(false);
    store.list(&pod_key("default")).await.unwrap();
    assert_eq!(cluster.reviews(), 2);
}

#[tokio::test]
async fn test_concurrent_checks_review_once() {
    let cluster = FakeCluster::new();
    cluster.set_review_delay(Duration::from_millis(50));
    let store = store(&cluster);

    let key = pod_key("default");
    let (a, b) = tokio::join!(store.list(&key), store.list(&key));
    a.unwrap();
    b.unwrap();

    assert_eq!(cluster.reviews(), 1);
    assert_eq!(cluster.watch_count("pods"), 1);
}

#[tokio::test]
async fn test_update_cluster_client_keeps_cached_denial() {
    let first = FakeCluster::new();
    first.deny("list", "pods");
    let store = store(&first);
    assert!(store.list(&pod_key("default")).await.is_err());

    let second = FakeCluster::new();
    store.update_cluster_client(second.clone()).await.unwrap();

    let err = store.list(&pod_key("default")).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AccessDenied);
    assert_eq!(second.reviews(), 0);

    store.reset().await.unwrap();
    store.list(&pod_key("default")).await.unwrap();
    assert_eq!(second.reviews(), 1);
    assert_eq!(second.watch_count("pods"), 1);
}

#[tokio::test]
async fn test_pre_warmed_access() {
    let cluster = FakeCluster::new();
    let store = store(&cluster);
    store.access().set(
        AccessKey {
            namespace: "default".to_string(),
            group: String::new(),
            resource: "configmaps".to_string(),
            verb: "list".to_string(),
        },
        false,
    );

    let err = store
        .list(&Key::new("default", "v1", "ConfigMap"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AccessDenied);
    assert_eq!(cluster.reviews(), 0);
}

#[tokio::test]
async fn test_update() {
    let cluster = FakeCluster::new();
    cluster.put(&config_maps(), object(&config_maps(), "default", "settings"));
    let store = store(&cluster);
    let updates = Arc::new(AtomicUsize::new(0));
    let counter = updates.clone();
    store.register_on_update(Arc::new(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    }));

    let key = Key::new("default", "v1", "ConfigMap").with_name("settings");
    store
        .update(
            &key,
            Box::new(|object| {
                object
                    .labels_mut()
                    .insert("touched".to_string(), "yes".to_string());
                Ok(())
            }),
        )
        .await
        .unwrap();

    let stored = cluster
        .stored(&config_maps(), "default", "settings")
        .unwrap();
    assert_eq!(stored.labels().get("touched").map(String::as_str), Some("yes"));
    assert_eq!(updates.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_update_conflict() {
    let cluster = FakeCluster::new();
    cluster.put(&config_maps(), object(&config_maps(), "default", "settings"));
    cluster.set_conflict(true);
    let store = store(&cluster);
    let updates = Arc::new(AtomicUsize::new(0));
    let counter = updates.clone();
    store.register_on_update(Arc::new(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    }));

    let key = Key::new("default", "v1", "ConfigMap").with_name("settings");
    let err = store
        .update(&key, Box::new(|_| Ok(())))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Conflict);
    assert!(err.is_retryable());
    assert_eq!(updates.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_update_missing_object() {
    let cluster = FakeCluster::new();
    let store = store(&cluster);

    let err = store
        .update(
            &Key::new("default", "v1", "ConfigMap").with_name("absent"),
            Box::new(|_| Ok(())),
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn test_delete() {
    let cluster = FakeCluster::new();
    cluster.put(&deployments(), object(&deployments(), "default", "web"));
    let store = store(&cluster);
    let updates = Arc::new(AtomicUsize::new(0));
    let counter = updates.clone();
    store.register_on_update(Arc::new(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    }));

    store
        .delete(&Key::new("default", "apps/v1", "Deployment").with_name("web"))
        .await
        .unwrap();

    assert_eq!(cluster.deleted(), vec!["deployments/default/web"]);
    assert_eq!(updates.load(Ordering::SeqCst), 1);

    let err = store
        .delete(&Key::new("default", "apps/v1", "Deployment").with_name("web"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert_eq!(updates.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_delete_denied() {
    let cluster = FakeCluster::new();
    cluster.deny("delete", "pods");
    cluster.put(&pods(), object(&pods(), "default", "web"));
    let store = store(&cluster);

    let err = store
        .delete(&pod_key("default").with_name("web"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::AccessDenied(_)));
    assert!(cluster.deleted().is_empty());
}

#[tokio::test]
async fn test_reset_clears_everything() {
    let cluster = FakeCluster::new();
    let store = store(&cluster);
    store.list(&pod_key("default")).await.unwrap();
    store
        .list(&Key::new("default", "apps/v1", "Deployment"))
        .await
        .unwrap();
    let informer = store
        .factory()
        .get(&ResourceType::from(&pods()))
        .unwrap()
        .unwrap();
    assert_eq!(cluster.reviews(), 2);

    store.reset().await.unwrap();

    assert!(informer.is_stopped());
    assert!(store.factory().is_empty().unwrap());
    assert!(!store.is_loading(&pod_key("default")).await);

    store.list(&pod_key("default")).await.unwrap();
    assert_eq!(cluster.reviews(), 3);
    assert_eq!(cluster.watch_count("pods"), 2);
    let fresh = store
        .factory()
        .get(&ResourceType::from(&pods()))
        .unwrap()
        .unwrap();
    assert_ne!(fresh.id(), informer.id());
}

#[tokio::test]
async fn test_reset_during_concurrent_lists() {
    let cluster = FakeCluster::new();
    let store = Arc::new(store(&cluster));

    let lists: Vec<_> = (0..16)
        .map(|i| {
            let store = store.clone();
            tokio::spawn(async move {
                let key = if i % 2 == 0 {
                    pod_key("default")
                } else {
                    Key::new("default", "apps/v1", "Deployment")
                };
                store.list(&key).await.map(|_| ())
            })
        })
        .collect();
    store.reset().await.unwrap();

    for list in lists {
        list.await.unwrap().unwrap();
    }

    let live = store.factory().resources().unwrap();
    assert!(live.len() <= 2);
    for resource in &live {
        assert_ne!(
            store.factory().state(resource).unwrap(),
            InformerState::Stopped
        );
    }
}

#[tokio::test]
async fn test_relist_after_unwatch_reloads() {
    let cluster = FakeCluster::new();
    let store = store(&cluster);
    store.list(&pod_key("default")).await.unwrap();
    cluster.sync("pods", vec![object(&pods(), "default", "web")]);
    synced(&store).await;
    assert!(loaded(&store, &pod_key("default")).await);

    store
        .unwatch(&[GroupVersionKind::gvk("", "v1", "Pod")])
        .await
        .unwrap();

    let (items, loading) = store.list(&pod_key("default")).await.unwrap();
    assert!(items.is_empty());
    assert!(loading);
}

#[tokio::test]
async fn test_ended_watch_stays_loading() {
    let cluster = FakeCluster::new();
    let store = store(&cluster);
    let key = pod_key("default");

    store.list(&key).await.unwrap();
    cluster.send("pods", watcher::Event::Init);
    cluster.send("pods", watcher::Event::InitApply(object(&pods(), "default", "web")));
    cluster.close("pods");

    let synced = store
        .wait_for_cache_sync(Duration::from_millis(200))
        .await
        .unwrap();
    assert_eq!(synced.get(&ResourceType::from(&pods())), Some(&false));
    assert!(store.is_loading(&key).await);
    assert_eq!(
        store.factory().state(&ResourceType::from(&pods())).unwrap(),
        InformerState::Starting
    );

    let (items, loading) = store.list(&key).await.unwrap();
    assert!(items.is_empty());
    assert!(loading);
    assert_eq!(cluster.watch_count("pods"), 1);
}
