mod args;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tracing::{error, info, warn};

use meridian_common::telemetry;
use meridian_descheduler::metrics::{self, SharedMetrics};
use meridian_descheduler::reconcile::{resync_loop, watch_loop};
use meridian_descheduler::{AggregatedStatusHelper, Descheduler, MetaBindingStore, TracingEventRecorder};
use meridian_meta::{EtcdMetaStore, MemoryMetaStore, MetaStore};

use crate::args::{Args, StoreKind};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let provider = telemetry::init_tracing(
        "meridian-descheduler",
        "info",
        args.otlp_endpoint.as_deref(),
        args.otlp_token.as_deref(),
    );
    info!(store=?args.store, "meridian-descheduler starting...");

    let metrics = Arc::new(SharedMetrics::default());
    let listener = tokio::net::TcpListener::bind(&args.metrics_addr).await?;
    info!("metrics listening on {}", args.metrics_addr);
    let app = metrics::router(metrics.clone());
    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!(error=%e, "metrics server exited");
        }
    });

    let interval = Duration::from_secs(args.interval_secs.max(1));
    match args.store {
        StoreKind::Etcd => {
            let meta = EtcdMetaStore::connect(std::slice::from_ref(&args.etcd_endpoint)).await?;
            info!("connected to etcd at {}", args.etcd_endpoint);
            run(meta, interval, metrics).await;
        }
        StoreKind::Memory => {
            warn!("using in-memory store, state is lost on exit");
            run(MemoryMetaStore::new(), interval, metrics).await;
        }
    }

    if let Some(provider) = provider {
        if let Err(e) = provider.shutdown() {
            eprintln!("failed to flush spans: {e}");
        }
    }
    Ok(())
}

async fn run<M>(meta: M, interval: Duration, metrics: Arc<SharedMetrics>)
where
    M: MetaStore + Clone,
{
    let descheduler = Descheduler::new(
        MetaBindingStore::new(meta.clone()),
        AggregatedStatusHelper,
        TracingEventRecorder,
        metrics,
    );

    tokio::select! {
        _ = resync_loop(&descheduler, interval) => {}
        _ = watch_loop(&meta, &descheduler) => {}
        _ = tokio::signal::ctrl_c() => {
            info!("received ctrl-c, shutting down");
        }
    }
}
