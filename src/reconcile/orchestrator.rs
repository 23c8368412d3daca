//! Reconciliation Orchestrator
//!
//! Drives the periodic sweep: for each resource kind, load its rules,
//! analyse the desired state, then apply the diff. A failing kind is logged
//! and the sweep moves on to the next one.

use crate::domain::ports::{NodeContext, RuleLoaderRef};
use crate::error::{Error, Result};
use crate::model::ResourceKind;
use crate::reconcile::{Reconciler, SweepReport};
use parking_lot::Mutex;
use prometheus::{Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

// =============================================================================
// Metrics
// =============================================================================

/// Sweep counters exposed on `/metrics`
#[derive(Clone)]
pub struct SweepMetrics {
    sweeps: IntCounter,
    items: IntCounterVec,
    duration: Histogram,
}

impl SweepMetrics {
    pub fn register(registry: &Registry) -> Result<Self> {
        let sweeps = IntCounter::new(
            "node_resource_manager_sweeps_total",
            "Total number of reconciliation sweeps",
        )
        .map_err(metrics_error)?;
        let items = IntCounterVec::new(
            Opts::new(
                "node_resource_manager_items_total",
                "Reconciled items by resource kind and outcome",
            ),
            &["kind", "outcome"],
        )
        .map_err(metrics_error)?;
        let duration = Histogram::with_opts(HistogramOpts::new(
            "node_resource_manager_sweep_duration_seconds",
            "Duration of reconciliation sweeps",
        ))
        .map_err(metrics_error)?;

        registry
            .register(Box::new(sweeps.clone()))
            .map_err(metrics_error)?;
        registry
            .register(Box::new(items.clone()))
            .map_err(metrics_error)?;
        registry
            .register(Box::new(duration.clone()))
            .map_err(metrics_error)?;

        Ok(Self {
            sweeps,
            items,
            duration,
        })
    }

    fn observe(&self, report: &SweepReport) {
        let kind = report.kind.to_string();
        for item in &report.items {
            self.items
                .with_label_values(&[kind.as_str(), item.outcome.label()])
                .inc();
        }
    }
}

fn metrics_error(e: prometheus::Error) -> Error {
    Error::Internal(format!("Metrics registration failed: {}", e))
}

// =============================================================================
// Orchestrator
// =============================================================================

pub struct Orchestrator {
    reconcilers: Vec<Box<dyn Reconciler>>,
    rules: RuleLoaderRef,
    node: NodeContext,
    interval: Duration,
    metrics: SweepMetrics,
    last_reports: Arc<Mutex<BTreeMap<ResourceKind, SweepReport>>>,
    ready: Arc<AtomicBool>,
}

impl Orchestrator {
    pub fn new(
        reconcilers: Vec<Box<dyn Reconciler>>,
        rules: RuleLoaderRef,
        node: NodeContext,
        interval: Duration,
        metrics: SweepMetrics,
    ) -> Self {
        Self {
            reconcilers,
            rules,
            node,
            interval,
            metrics,
            last_reports: Arc::new(Mutex::new(BTreeMap::new())),
            ready: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Set once the first sweep has completed
    pub fn readiness(&self) -> Arc<AtomicBool> {
        self.ready.clone()
    }

    /// The most recent report of one kind, analyse and apply merged
    pub fn last_report(&self, kind: ResourceKind) -> Option<SweepReport> {
        self.last_reports.lock().get(&kind).cloned()
    }

    async fn reconcile_kind(&mut self, index: usize) -> Result<SweepReport> {
        let reconciler = &mut self.reconcilers[index];
        let kind = reconciler.kind();

        let rules = self.rules.load_rules(kind).await?;
        debug!("Loaded {} {} rules", rules.len(), kind);

        let mut report = reconciler
            .analyse_desired_state(&rules, &self.node.labels)
            .await?;
        report.merge(reconciler.apply_diff().await?);
        Ok(report)
    }

    /// One pass over every resource kind
    pub async fn sweep(&mut self) -> Vec<SweepReport> {
        let started = Instant::now();
        let mut reports = Vec::new();

        for index in 0..self.reconcilers.len() {
            let kind = self.reconcilers[index].kind();
            match self.reconcile_kind(index).await {
                Ok(report) => {
                    self.metrics.observe(&report);
                    self.last_reports.lock().insert(kind, report.clone());
                    reports.push(report);
                }
                Err(e) => {
                    error!("Reconciling {} failed: {}", kind, e);
                    self.last_reports.lock().remove(&kind);
                    self.metrics
                        .items
                        .with_label_values(&[kind.to_string().as_str(), "error"])
                        .inc();
                }
            }
        }

        self.metrics.sweeps.inc();
        self.metrics
            .duration
            .observe(started.elapsed().as_secs_f64());
        self.ready.store(true, Ordering::Relaxed);
        reports
    }

    /// Sweep until `shutdown` is cancelled. Cancellation is honoured between
    /// sweeps; a running sweep always completes.
    pub async fn run(mut self, shutdown: CancellationToken) {
        info!(
            "Reconciling node {} every {:?}",
            self.node.node_name, self.interval
        );

        while !shutdown.is_cancelled() {
            self.sweep().await;

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(self.interval) => {}
            }
        }

        info!("Reconciliation loop stopped");
    }
}
