//! Node Resource Manager
//!
//! Per-node agent converging LVM volume groups, project-quota mount paths
//! and persistent memory tiers toward the rules in its config directory.

use clap::{ArgAction, Parser};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use node_resource_manager::domain::ports::{EventRecorderRef, HostTools};
use node_resource_manager::host::{
    KubeEventRecorder, KubeNodeSource, LocalDiskConfig, LogEventRecorder, NodeLvm, NodeMounter,
    NodePmem, ShellRunner, SysfsDiskInventory,
};
use node_resource_manager::{
    AgentConfig, Error, MemoryReconciler, NodeContext, NodeInfoSource,
    Orchestrator, QuotaPathReconciler, Reconciler, Result, RuleDocument, SweepMetrics,
    VolumeGroupReconciler,
};

// =============================================================================
// CLI Arguments
// =============================================================================

/// Node Resource Manager - converge node-local storage toward declarative rules
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Name of the Kubernetes node this agent runs on
    #[arg(long, env = "NODE_ID", required_unless_present = "print_schema")]
    node_id: Option<String>,

    /// Directory holding the volumegroup, quotapath and memory rule files
    #[arg(long, env = "CONFIG_DIR", default_value = "/etc/unified-config")]
    config_dir: PathBuf,

    /// Seconds between reconciliation sweeps
    #[arg(long, env = "UPDATE_INTERVAL", default_value = "20")]
    update_interval: u64,

    /// Run host tools inside the host's namespaces through nsenter
    #[arg(long, env = "NSENTER", default_value_t = true, action = ArgAction::Set)]
    nsenter: bool,

    /// Name of the agent's pod, used as the involved object of events
    #[arg(long, env = "POD_NAME", default_value = "")]
    pod_name: String,

    /// Namespace of the agent's pod
    #[arg(long, env = "POD_NAMESPACE", default_value = "kube-system")]
    pod_namespace: String,

    /// Name prefix of local data disks
    #[arg(long, env = "LOCAL_DISK_PREFIX", default_value = "vd")]
    local_disk_prefix: String,

    /// Local disks never used, comma separated
    #[arg(long, env = "LOCAL_DISK_EXCLUDE", value_delimiter = ',', default_value = "vda")]
    local_disk_exclude: Vec<String>,

    /// Health server bind address
    #[arg(long, env = "HEALTH_ADDR", default_value = "0.0.0.0:8081")]
    health_addr: String,

    /// Metrics server bind address
    #[arg(long, env = "METRICS_ADDR", default_value = "0.0.0.0:8080")]
    metrics_addr: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,

    /// Print the JSON schema of the rule files and exit
    #[arg(long)]
    print_schema: bool,
}

impl Args {
    fn agent_config(&self) -> AgentConfig {
        AgentConfig {
            node_name: self.node_id.clone().unwrap_or_default(),
            config_dir: self.config_dir.clone(),
            update_interval: Duration::from_secs(self.update_interval),
            nsenter: self.nsenter,
            pod_name: self.pod_name.clone(),
            pod_namespace: self.pod_namespace.clone(),
            local_disk: LocalDiskConfig {
                name_prefix: self.local_disk_prefix.clone(),
                exclude: self.local_disk_exclude.clone(),
                ..Default::default()
            },
        }
    }
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.print_schema {
        let schema = schemars::schema_for!(RuleDocument);
        println!("{}", serde_json::to_string_pretty(&schema)?);
        return Ok(());
    }

    init_logging(&args);

    let config = args.agent_config();
    if config.node_name.is_empty() {
        return Err(Error::Configuration("NODE_ID must not be empty".to_string()));
    }

    info!("Starting Node Resource Manager");
    info!("  Version: {}", node_resource_manager::VERSION);
    info!("  Node: {}", config.node_name);
    info!("  Config dir: {}", config.config_dir.display());
    info!("  Update interval: {:?}", config.update_interval);
    info!("  nsenter: {}", config.nsenter);

    let client = kube::Client::try_default().await?;

    let labels = KubeNodeSource::new(client.clone())
        .node_labels(&config.node_name)
        .await?;
    let node = NodeContext::new(config.node_name.as_str(), labels);

    let events: EventRecorderRef = if config.pod_name.is_empty() {
        info!("POD_NAME not set, events are written to the log only");
        Arc::new(LogEventRecorder)
    } else {
        Arc::new(KubeEventRecorder::new(
            client.clone(),
            &config.pod_name,
            &config.pod_namespace,
        ))
    };

    let runner = Arc::new(ShellRunner::new(config.nsenter));
    let pmem = Arc::new(NodePmem::new(runner.clone()));
    let tools = HostTools {
        mounter: Arc::new(NodeMounter::new(runner.clone())),
        lvm: Arc::new(NodeLvm::new(runner.clone())),
        pmem: pmem.clone(),
        events,
        local_disks: Arc::new(SysfsDiskInventory::new(config.local_disk.clone())),
    };

    let reconcilers: Vec<Box<dyn Reconciler>> = vec![
        Box::new(VolumeGroupReconciler::new(tools.clone())),
        Box::new(QuotaPathReconciler::new(tools.clone())),
        Box::new(MemoryReconciler::new(pmem)),
    ];

    let metrics = SweepMetrics::register(prometheus::default_registry())?;
    let orchestrator = Orchestrator::new(
        reconcilers,
        Arc::new(config.rule_loader()),
        node,
        config.update_interval,
        metrics,
    );
    let ready = orchestrator.readiness();

    // Start health server
    let health_addr = args.health_addr.clone();
    tokio::spawn(async move {
        if let Err(e) = run_health_server(&health_addr, ready).await {
            error!("Health server error: {}", e);
        }
    });

    // Start metrics server
    let metrics_addr = args.metrics_addr.clone();
    tokio::spawn(async move {
        if let Err(e) = run_metrics_server(&metrics_addr).await {
            error!("Metrics server error: {}", e);
        }
    });

    let shutdown = CancellationToken::new();
    let reconcile_loop = tokio::spawn(orchestrator.run(shutdown.clone()));

    wait_for_signal().await?;
    info!("Shutdown requested, finishing the current sweep");
    shutdown.cancel();

    reconcile_loop
        .await
        .map_err(|e| Error::Internal(format!("Reconciliation task failed: {}", e)))?;

    info!("Node Resource Manager shutdown complete");
    Ok(())
}

async fn wait_for_signal() -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = signal(SignalKind::terminate())?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result?,
        _ = terminate.recv() => {}
    }
    Ok(())
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let mut filter = EnvFilter::from_default_env().add_directive(level.into());
    for directive in ["hyper=warn", "kube=info", "tower=warn"] {
        if let Ok(directive) = directive.parse() {
            filter = filter.add_directive(directive);
        }
    }

    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .init();
    }
}

// =============================================================================
// Health Server
// =============================================================================

fn text_response(status: hyper::StatusCode, body: &'static str) -> hyper::Response<hyper::Body> {
    let mut response = hyper::Response::new(hyper::Body::from(body));
    *response.status_mut() = status;
    response
}

async fn run_health_server(addr: &str, ready: Arc<AtomicBool>) -> Result<()> {
    use hyper::service::{make_service_fn, service_fn};
    use hyper::{Body, Request, Server, StatusCode};

    let make_svc = make_service_fn(move |_conn| {
        let ready = ready.clone();
        async move {
            Ok::<_, std::convert::Infallible>(service_fn(move |req: Request<Body>| {
                let ready = ready.clone();
                async move {
                    let response = match req.uri().path() {
                        "/healthz" | "/livez" => text_response(StatusCode::OK, "ok"),
                        "/readyz" if ready.load(Ordering::Relaxed) => {
                            text_response(StatusCode::OK, "ok")
                        }
                        "/readyz" => text_response(StatusCode::SERVICE_UNAVAILABLE, "not ready"),
                        _ => text_response(StatusCode::NOT_FOUND, "not found"),
                    };
                    Ok::<_, std::convert::Infallible>(response)
                }
            }))
        }
    });

    let addr: SocketAddr = addr.parse().map_err(|e| {
        Error::Configuration(format!("Invalid health server address: {}", e))
    })?;

    info!("Health server listening on {}", addr);
    Server::bind(&addr)
        .serve(make_svc)
        .await
        .map_err(|e| Error::Internal(format!("Health server error: {}", e)))?;

    Ok(())
}

// =============================================================================
// Metrics Server
// =============================================================================

async fn run_metrics_server(addr: &str) -> Result<()> {
    use hyper::service::{make_service_fn, service_fn};
    use hyper::header::{HeaderValue, CONTENT_TYPE};
    use hyper::{Body, Request, Response, Server, StatusCode};
    use prometheus::{Encoder, TextEncoder};

    let make_svc = make_service_fn(|_conn| async {
        Ok::<_, std::convert::Infallible>(service_fn(|req: Request<Body>| async move {
            let response = match req.uri().path() {
                "/metrics" => {
                    let encoder = TextEncoder::new();
                    let metric_families = prometheus::gather();
                    let mut buffer = Vec::new();
                    match encoder.encode(&metric_families, &mut buffer) {
                        Ok(()) => {
                            let mut response = Response::new(Body::from(buffer));
                            if let Ok(value) = HeaderValue::from_str(encoder.format_type()) {
                                response.headers_mut().insert(CONTENT_TYPE, value);
                            }
                            response
                        }
                        Err(e) => {
                            error!("Failed to encode metrics: {}", e);
                            text_response(StatusCode::INTERNAL_SERVER_ERROR, "encode error")
                        }
                    }
                }
                _ => text_response(StatusCode::NOT_FOUND, "not found"),
            };
            Ok::<_, std::convert::Infallible>(response)
        }))
    });

    let addr: SocketAddr = addr.parse().map_err(|e| {
        Error::Configuration(format!("Invalid metrics server address: {}", e))
    })?;

    info!("Metrics server listening on {}", addr);
    Server::bind(&addr)
        .serve(make_svc)
        .await
        .map_err(|e| Error::Internal(format!("Metrics server error: {}", e)))?;

    Ok(())
}
