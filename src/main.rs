use anyhow::Context;
use clap::{Parser, ValueEnum};
use kubeconf::config::{FlattenedMap, ResourceConfigProvider, ResourceSource};
use kubeconf::k8s::cache::config::{DEFAULT_RELOAD_DELAY_MS, DEFAULT_WATCH_TIMEOUT_SECONDS};
use kubeconf::k8s::client::KubeResourceClient;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Namespace to read from (defaults to the current context's namespace)
    #[arg(short, long)]
    namespace: Option<String>,

    /// Label selector, e.g. "app=web,tier in (frontend, backend)"
    #[arg(short = 'l', long)]
    selector: Option<String>,

    /// Select app=$HOSTNAME when no selector is given
    #[arg(long)]
    default_selector: bool,

    /// Do not fail when no ConfigMaps or Secrets match
    #[arg(long)]
    optional: bool,

    /// Load once and exit instead of watching for changes
    #[arg(long)]
    no_watch: bool,

    /// Watch restart and reload tick in milliseconds
    #[arg(long, default_value_t = DEFAULT_RELOAD_DELAY_MS)]
    reload_delay_ms: u64,

    /// Server-side timeout of each watch request in seconds
    #[arg(long, default_value_t = DEFAULT_WATCH_TIMEOUT_SECONDS)]
    watch_timeout_secs: u64,

    /// Output format of the flattened configuration
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
    output: OutputFormat,
}

impl Args {
    fn source(&self) -> ResourceSource {
        let mut source = ResourceSource::new()
            .optional(self.optional)
            .reload_on_change(!self.no_watch)
            .reload_delay(Duration::from_millis(self.reload_delay_ms))
            .watch_timeout(Duration::from_secs(self.watch_timeout_secs))
            .default_selector(self.default_selector);

        if let Some(selector) = &self.selector {
            source = source.label_selector(selector);
        }
        if let Some(namespace) = &self.namespace {
            source = source.namespace(namespace);
        }
        source
    }
}

fn print_map(map: &FlattenedMap, output: OutputFormat) -> anyhow::Result<()> {
    match output {
        OutputFormat::Text => {
            for (key, value) in map.entries() {
                println!("{key}={value}");
            }
        }
        OutputFormat::Json => {
            println!("{}", k8s_openapi::serde_json::to_string_pretty(map)?);
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    // kube's rustls stack needs a process-wide crypto provider
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();

    let args = Args::parse();

    let client = KubeResourceClient::try_default()
        .await
        .context("failed to create Kubernetes client")?;
    let provider = ResourceConfigProvider::new(Arc::new(client), args.source())?;

    provider.load().await.context("initial configuration load failed")?;
    let mut last = provider.data();
    print_map(&last, args.output)?;

    if args.no_watch {
        return Ok(());
    }

    let mut reloads = provider.subscribe();
    let _ = reloads.borrow_and_update();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, shutting down");
                break;
            }
            changed = reloads.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = provider.data();
                if current != last {
                    print_map(&current, args.output)?;
                    last = current;
                }
            }
        }
    }

    provider.dispose();
    Ok(())
}
