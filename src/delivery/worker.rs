//! Worker pool draining the delivery queue.
//!
//! A bounded pool leases ready records in host-interleaved batches, signs and
//! POSTs each one, and advances the record's state machine. The pool never
//! rethrows a delivery failure; errors are recorded on the record. A reaper
//! task removes finished records past their retention.

use crate::{
    config::FederationConfig,
    delivery::request::{sign_and_send, SendOutcome},
    engine::FederationEngine,
    store::{ActorRepo, DeliveryRepo},
};
use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, Mutex},
};
use tokio::{
    sync::{watch, Semaphore},
    task::{JoinHandle, JoinSet},
};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// The delivery worker pool. Construct with [DeliveryWorker::spawn].
pub struct DeliveryWorker;

/// Handle to a running worker pool.
pub struct DeliveryWorkerHandle {
    shutdown: watch::Sender<bool>,
    main: JoinHandle<()>,
    reaper: JoinHandle<()>,
}

impl DeliveryWorkerHandle {
    /// Stop leasing, drain in-flight deliveries within the grace period, and
    /// revert whatever is still running back to `Pending`.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        let _ = self.main.await;
        self.reaper.abort();
        let _ = self.reaper.await;
    }
}

struct WorkerContext {
    config: FederationConfig,
    actors: Arc<dyn ActorRepo>,
    deliveries: Arc<dyn DeliveryRepo>,
    in_flight: Mutex<HashSet<Uuid>>,
    pool: Semaphore,
    host_slots: Mutex<HashMap<String, Arc<Semaphore>>>,
}

impl WorkerContext {
    fn host_slot(&self, host: &str) -> Arc<Semaphore> {
        let mut slots = match self.host_slots.lock() {
            Ok(slots) => slots,
            Err(poisoned) => poisoned.into_inner(),
        };
        slots
            .entry(host.to_owned())
            .or_insert_with(|| Arc::new(Semaphore::new(self.config.per_host_concurrency)))
            .clone()
    }

    fn track(&self, id: Uuid, running: bool) {
        if let Ok(mut in_flight) = self.in_flight.lock() {
            if running {
                in_flight.insert(id);
            } else {
                in_flight.remove(&id);
            }
        }
    }

    fn outstanding(&self) -> Vec<Uuid> {
        self.in_flight
            .lock()
            .map(|in_flight| in_flight.iter().copied().collect())
            .unwrap_or_default()
    }
}

impl DeliveryWorker {
    /// Spawn the worker pool and reaper for an engine's delivery queue.
    pub fn spawn(engine: &FederationEngine) -> DeliveryWorkerHandle {
        Self::spawn_with(
            engine.config.clone(),
            engine.actors.clone(),
            engine.deliveries.clone(),
        )
    }

    /// Spawn over explicit collaborators.
    pub fn spawn_with(
        config: FederationConfig,
        actors: Arc<dyn ActorRepo>,
        deliveries: Arc<dyn DeliveryRepo>,
    ) -> DeliveryWorkerHandle {
        let (shutdown, rx) = watch::channel(false);
        let context = Arc::new(WorkerContext {
            pool: Semaphore::new(config.worker_count),
            config,
            actors,
            deliveries,
            in_flight: Mutex::new(HashSet::new()),
            host_slots: Mutex::new(HashMap::new()),
        });

        let main = tokio::spawn(run_pool(context.clone(), rx.clone()));
        let reaper = tokio::spawn(run_reaper(context));
        DeliveryWorkerHandle {
            shutdown,
            main,
            reaper,
        }
    }
}

async fn run_pool(context: Arc<WorkerContext>, mut shutdown: watch::Receiver<bool>) {
    let mut tasks: JoinSet<()> = JoinSet::new();
    info!(
        workers = context.config.worker_count,
        "delivery worker pool started"
    );

    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            () = tokio::time::sleep(context.config.poll_interval) => {}
        }

        while tasks.try_join_next().is_some() {}

        let now = context.config.now();
        let leased = match context
            .deliveries
            .lease_pending(context.config.lease_batch, now)
            .await
        {
            Ok(leased) => leased,
            Err(err) => {
                warn!(%err, "failed to lease deliveries");
                continue;
            }
        };

        for record in leased {
            context.track(record.id, true);
            let context = context.clone();
            tasks.spawn(async move {
                let id = record.id;
                attempt(&context, record).await;
                context.track(id, false);
            });
        }
    }

    // drain with the grace period, then revert what is still in flight
    let grace = context.config.shutdown_grace;
    let drained = tokio::time::timeout(grace, async {
        while tasks.join_next().await.is_some() {}
    })
    .await;
    if drained.is_err() {
        tasks.abort_all();
        let outstanding = context.outstanding();
        if !outstanding.is_empty() {
            warn!(
                count = outstanding.len(),
                "reverting in-flight deliveries on shutdown"
            );
            if let Err(err) = context.deliveries.release(&outstanding).await {
                warn!(%err, "failed to release in-flight deliveries");
            }
        }
    }
    info!("delivery worker pool stopped");
}

async fn attempt(context: &WorkerContext, record: crate::delivery::DeliveryRecord) {
    // bound the pool and each host separately
    let Ok(_pool) = context.pool.acquire().await else {
        return;
    };
    let host_slot = context.host_slot(record.target_host());
    let Ok(_host) = host_slot.acquire().await else {
        return;
    };

    let sender = context
        .actors
        .get_by_username(&record.sender_username)
        .await;
    let private_key_pem = match sender {
        Ok(Some(actor)) => actor.private_key_pem,
        Ok(None) => None,
        Err(err) => {
            let message = format!("sender lookup failed: {err}");
            mark(context, record.id, SendOutcome::Retry { error: message, retry_after: None }).await;
            return;
        }
    };
    let Some(private_key_pem) = private_key_pem else {
        let outcome = SendOutcome::Permanent {
            error: "sender has no private key".into(),
        };
        mark(context, record.id, outcome).await;
        return;
    };

    let outcome = sign_and_send(
        &record,
        &context.config.client,
        &private_key_pem,
        context.config.request_timeout,
        context.config.now(),
    )
    .await;
    mark(context, record.id, outcome).await;
}

async fn mark(context: &WorkerContext, id: Uuid, outcome: SendOutcome) {
    let now = context.config.now();
    let result = match outcome {
        SendOutcome::Delivered => {
            debug!(%id, "delivery succeeded");
            context.deliveries.mark_delivered(id, now).await
        }
        SendOutcome::Retry { error, retry_after } => {
            debug!(%id, %error, "delivery failed, will retry");
            context.deliveries.mark_failed(id, &error, retry_after, now).await
        }
        SendOutcome::Permanent { error } => {
            warn!(%id, %error, "delivery rejected permanently");
            context.deliveries.mark_dead(id, &error, now).await
        }
    };
    if let Err(err) = result {
        warn!(%id, %err, "failed to record delivery outcome");
    }
}

async fn run_reaper(context: Arc<WorkerContext>) {
    loop {
        tokio::time::sleep(context.config.reaper_interval).await;
        let now = context.config.now();
        let delivered_before = now
            - chrono::Duration::from_std(context.config.delivered_retention)
                .unwrap_or_else(|_| chrono::Duration::hours(24));
        let dead_before = now
            - chrono::Duration::from_std(context.config.dead_retention)
                .unwrap_or_else(|_| chrono::Duration::days(7));
        match context.deliveries.reap(delivered_before, dead_before).await {
            Ok(0) => {}
            Ok(removed) => info!(removed, "reaped finished delivery records"),
            Err(err) => warn!(%err, "reaper failed"),
        }
    }
}
