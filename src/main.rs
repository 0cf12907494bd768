use clap::Parser;
use kube::ResourceExt;
use kube::api::DynamicObject;
use kubecache::k8s::USER_AGENT;
use kubecache::k8s::cache::{CacheConfig, ObjectEvent, ObjectStore, handler_fn};
use kubecache::k8s::client;
use kubecache::k8s::cluster::KubeCluster;
use kubecache::store::{Key, Store};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Namespace to list from; all namespaces when omitted
    #[arg(short, long, default_value = "")]
    namespace: String,

    /// API version of the kind, e.g. `v1` or `apps/v1`
    #[arg(short, long, default_value = "v1")]
    api_version: String,

    /// Kind to list, e.g. `Pod`
    #[arg(short, long, default_value = "Pod")]
    kind: String,

    /// Only this object
    #[arg(long)]
    name: Option<String>,

    /// Label selector as `key=value` pairs separated by commas
    #[arg(short = 'l', long)]
    selector: Option<String>,

    /// Keep running and print changes until interrupted
    #[arg(short, long)]
    watch: bool,

    /// Kubeconfig context to use instead of the current one
    #[arg(long)]
    context: Option<String>,

    /// Seconds to wait for the initial list
    #[arg(long, default_value_t = kubecache::k8s::cache::config::DEFAULT_SYNC_TIMEOUT_SECONDS)]
    sync_timeout: u64,
}

fn parse_selector(selector: &str) -> anyhow::Result<Vec<(String, String)>> {
    selector
        .split(',')
        .filter(|pair| !pair.trim().is_empty())
        .map(|pair| {
            pair.split_once('=')
                .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
                .ok_or_else(|| anyhow::anyhow!("invalid selector {pair:?}, expected key=value"))
        })
        .collect()
}

fn describe(object: &DynamicObject) -> String {
    match object.namespace() {
        Some(namespace) => format!("{namespace}/{}", object.name_any()),
        None => object.name_any(),
    }
}

#[cfg(unix)]
fn start_diagnostics(store: &ObjectStore) -> anyhow::Result<()> {
    if store.config().diagnostics {
        store.start_diagnostics()?;
    }
    Ok(())
}

#[cfg(not(unix))]
fn start_diagnostics(_store: &ObjectStore) -> anyhow::Result<()> {
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("kubecache=info")),
        )
        .init();
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();

    let args = Args::parse();

    let cluster = match &args.context {
        Some(context) => KubeCluster::new(client::for_context(context, Some(USER_AGENT)).await?),
        None => KubeCluster::infer(Some(USER_AGENT)).await?,
    };
    let config = CacheConfig {
        sync_timeout: Duration::from_secs(args.sync_timeout),
        ..CacheConfig::default()
    };
    let store = Arc::new(ObjectStore::new(Arc::new(cluster), config));
    start_diagnostics(&store)?;

    let mut key = Key::new(&args.namespace, &args.api_version, &args.kind);
    if let Some(name) = &args.name {
        key = key.with_name(name);
    }
    if let Some(selector) = &args.selector {
        key = key.with_selector(parse_selector(selector)?);
    }

    let (_, loading) = store.list(&key).await?;
    if loading {
        let synced = store.wait_for_cache_sync(store.config().sync_timeout).await?;
        for (resource, done) in &synced {
            if !done {
                eprintln!("{resource} did not sync within {}s", args.sync_timeout);
            }
        }
    }

    let (objects, _) = store.list(&key).await?;
    for object in &objects {
        println!("{}", describe(object));
    }

    if args.watch {
        store
            .watch(
                &key,
                handler_fn(|event| match event {
                    ObjectEvent::Added(object) => println!("ADDED {}", describe(&object)),
                    ObjectEvent::Updated { new, .. } => println!("MODIFIED {}", describe(&new)),
                    ObjectEvent::Deleted(object) => println!("DELETED {}", describe(&object)),
                }),
            )
            .await?;
        tokio::signal::ctrl_c().await?;
    }

    store.reset().await?;
    Ok(())
}
