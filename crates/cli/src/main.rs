use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use addonhub_core::{find_condition, Addon, AddonDefinition, Delta, DispatchRecord, CONDITION_PROGRESSING};
use addonhub_progress::config::parse_addon_names;
use addonhub_progress::{converge, status_patch, ControllerConfig, ManagedBySelf, ShouldReconcile};
use addonhub_store::{Cache, DispatchLister};
use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::ResourceExt;
use serde::de::DeserializeOwned;
use tokio::signal;
use tokio::sync::oneshot;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "addonhubctl", version, about = "Add-on rollout convergence controller")]
struct Cli {
    /// Output format
    #[arg(short = 'o', long = "output", value_enum, global = true, default_value_t = Output::Human)]
    output: Output,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Output {
    Human,
    Json,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the controller against the current kube context
    Run(RunArgs),
    /// Evaluate one Addon against dispatch records read from YAML files, without a cluster
    Eval {
        /// ManagedClusterAddOn manifest
        #[arg(long = "addon")]
        addon: PathBuf,
        /// ManifestWork manifests (repeatable)
        #[arg(long = "record")]
        records: Vec<PathBuf>,
        /// ClusterManagementAddOn manifest; when given, the ownership filter is applied
        #[arg(long = "definition")]
        definition: Option<PathBuf>,
        /// Owned add-on names (comma separated; empty = all)
        #[arg(long = "addons", env = "ADDONHUB_ADDONS", default_value = "")]
        addons: String,
    },
}

/// Flags override the `ADDONHUB_*` environment read by [`ControllerConfig::from_env`].
#[derive(Args, Debug)]
struct RunArgs {
    /// Concurrent reconciles [env: ADDONHUB_WORKERS]
    #[arg(long = "workers")]
    workers: Option<usize>,
    /// Upper bound of the per-key retry backoff [env: ADDONHUB_BACKOFF_MAX_SECS]
    #[arg(long = "backoff-max-secs")]
    backoff_max_secs: Option<u64>,
    /// Owned add-on names, comma separated; empty means all [env: ADDONHUB_ADDONS]
    #[arg(long = "addons")]
    addons: Option<String>,
    /// Only watch one cluster namespace [env: ADDONHUB_NAMESPACE]
    #[arg(long = "ns")]
    namespace: Option<String>,
    /// Prometheus listener, host:port
    #[arg(long = "metrics-addr", env = "ADDONHUB_METRICS_ADDR")]
    metrics_addr: Option<String>,
}

impl RunArgs {
    fn config(&self) -> ControllerConfig {
        let mut cfg = ControllerConfig::from_env();
        if let Some(w) = self.workers {
            cfg.workers = w.clamp(1, u16::MAX as usize);
        }
        if let Some(s) = self.backoff_max_secs {
            cfg.backoff_max = Duration::from_secs(s);
        }
        if let Some(a) = &self.addons {
            cfg.addons = parse_addon_names(a);
        }
        if let Some(ns) = self.namespace.as_ref().filter(|s| !s.is_empty()) {
            cfg.namespace = Some(ns.clone());
        }
        cfg
    }
}

fn init_tracing() {
    let env = std::env::var("ADDONHUB_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).init();
}

fn init_metrics(addr: Option<&str>) {
    let Some(addr) = addr else { return };
    if let Ok(sock) = addr.parse::<std::net::SocketAddr>() {
        let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
        match builder.with_http_listener(sock).install() {
            Ok(_) => tracing::info!(addr = %addr, "Prometheus metrics exporter listening"),
            Err(e) => tracing::warn!(error = %e, "failed to install metrics exporter"),
        }
    } else {
        tracing::warn!(addr = %addr, "invalid ADDONHUB_METRICS_ADDR; expected host:port");
    }
}

fn read_yaml<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let raw = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_yaml::from_str(&raw).with_context(|| format!("parsing {}", path.display()))
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Commands::Run(args) => {
            init_metrics(args.metrics_addr.as_deref());
            run(args.config()).await?;
        }
        Commands::Eval { addon, records, definition, addons } => {
            eval(cli.output, &addon, &records, definition.as_deref(), &addons)?;
        }
    }

    Ok(())
}

async fn run(cfg: ControllerConfig) -> Result<()> {
    info!(workers = cfg.workers, ns = ?cfg.namespace, addons = ?cfg.addons, "run invoked");
    let client = addonhub_kubehub::get_kube_client().await?;

    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    tokio::spawn(async move {
        match signal::ctrl_c().await {
            Ok(()) => info!("Ctrl-C received; shutting down"),
            Err(e) => error!(error = %e, "listening for Ctrl-C failed; shutting down"),
        }
        let _ = stop_tx.send(());
    });

    addonhub_progress::runtime::run(client, cfg, async move {
        let _ = stop_rx.await;
    })
    .await;
    info!("controller stopped");
    Ok(())
}

fn eval(output: Output, addon: &Path, records: &[PathBuf], definition: Option<&Path>, addons: &str) -> Result<()> {
    let addon: Addon = read_yaml(addon)?;
    let ns = addon.namespace().unwrap_or_default();
    let name = addon.name_any();

    if let Some(path) = definition {
        let definition: AddonDefinition = read_yaml(path)?;
        if definition.name_any() != name {
            bail!("definition {} does not define add-on {}", definition.name_any(), name);
        }
        if !ManagedBySelf::new(parse_addon_names(addons)).should_reconcile(&definition) {
            match output {
                Output::Human => println!("skipped: add-on {} is not owned by this controller", name),
                Output::Json => println!("{}", serde_json::json!({ "skipped": "notOwned" })),
            }
            return Ok(());
        }
    }

    let cache = Cache::new();
    let parsed = records.iter().map(|p| read_yaml::<DispatchRecord>(p)).collect::<Result<Vec<_>>>()?;
    cache.records.apply(Delta::Restarted(parsed));

    let now = Time(chrono::Utc::now());
    let out = converge(&addon, &now, || cache.list_dispatch_records(&ns, &name));
    let patch = status_patch(&addon, &out.addon)?;
    let progressing =
        out.addon.status.as_ref().and_then(|s| find_condition(&s.conditions, CONDITION_PROGRESSING)).cloned();

    match output {
        Output::Human => {
            println!("addon:       {}/{}", ns, name);
            println!("decision:    {:?}", out.decision);
            match &progressing {
                Some(c) => println!("progressing: {} {} {:?}", c.status, c.reason, c.message),
                None => println!("progressing: -"),
            }
            match &patch {
                Some(p) => println!("patch:       {}", serde_json::to_string(p)?),
                None => println!("patch:       (none)"),
            }
        }
        Output::Json => {
            #[derive(serde::Serialize)]
            struct Report<'a> {
                addon: String,
                decision: &'a addonhub_progress::Decision,
                progressing: &'a Option<k8s_openapi::apimachinery::pkg::apis::meta::v1::Condition>,
                patch: &'a Option<serde_json::Value>,
            }
            let report = Report { addon: format!("{}/{}", ns, name), decision: &out.decision, progressing: &progressing, patch: &patch };
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }
    Ok(())
}
