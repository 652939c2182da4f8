use std::time::Duration;

use futures_util::StreamExt;
use tracing::{debug, error, info, warn};

use meridian_meta::MetaStore;

use crate::events::EventRecorder;
use crate::helper::SchedulingResultHelper;
use crate::recalibrate::{CycleOutcome, Descheduler};
use crate::store::{parse_binding_key, BindingStore, BINDINGS_PREFIX};
use crate::util::now_secs;

/// Delay before the first sweep so member clusters can report status.
const STARTUP_DELAY: Duration = Duration::from_secs(10);

/// Delay before re-establishing a failed or finished watch.
const WATCH_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Periodic full resync: recalibrate every binding once per `interval`.
pub async fn resync_loop<S, H, R>(descheduler: &Descheduler<S, H, R>, interval: Duration)
where
    S: BindingStore,
    H: SchedulingResultHelper,
    R: EventRecorder,
{
    tokio::time::sleep(STARTUP_DELAY).await;
    info!("resync loop started (interval={}s)", interval.as_secs());

    loop {
        match descheduler.sweep(now_secs()).await {
            Ok(summary) => {
                debug!(
                    bindings = summary.bindings,
                    descheduled = summary.descheduled,
                    errors = summary.errors,
                    "resync sweep finished"
                );
            }
            Err(e) => warn!(error=%e, "resync sweep failed to list bindings"),
        }
        tokio::time::sleep(interval).await;
    }
}

/// Recalibrate bindings as soon as their records change.
pub async fn watch_loop<M, S, H, R>(meta: &M, descheduler: &Descheduler<S, H, R>)
where
    M: MetaStore,
    S: BindingStore,
    H: SchedulingResultHelper,
    R: EventRecorder,
{
    let mut last_revision: Option<u64> = None;

    loop {
        info!("watching prefix: {}", BINDINGS_PREFIX);
        let mut stream = match meta.watch_prefix(BINDINGS_PREFIX, last_revision).await {
            Ok(s) => s,
            Err(e) => {
                error!("failed to watch prefix: {}, retrying in {}s", e, WATCH_RETRY_DELAY.as_secs());
                tokio::time::sleep(WATCH_RETRY_DELAY).await;
                continue;
            }
        };

        while let Some(event) = stream.next().await {
            last_revision = Some(event.revision);
            if event.value.is_none() {
                continue;
            }
            let Some((namespace, name)) = parse_binding_key(&event.key) else {
                debug!(key=%event.key, "ignoring non-binding key");
                continue;
            };

            match descheduler.recalibrate(namespace, name, now_secs()).await {
                Ok(CycleOutcome::Descheduled { target, moved, .. }) => {
                    info!(namespace, name, target=%target, moved, "binding descheduled on change");
                }
                Ok(_) => {}
                Err(e) => {
                    // a conflicting write arrives as its own event and triggers a fresh cycle
                    warn!(namespace, name, error=%e, "recalibration failed");
                }
            }
        }

        warn!("watch stream ended, reconnecting...");
        tokio::time::sleep(Duration::from_secs(1)).await;
    }
}
