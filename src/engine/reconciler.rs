//! The controller contract and its host
//!
//! A controller implements [`Reconciler`]; the [`Manager`] runs it on top of
//! `kube::runtime::Controller`.
//!
//! # Concurrency
//!
//! At most one attempt is in flight per object key at any time. The kube
//! runtime never schedules a key that is still being reconciled; a trigger
//! that arrives meanwhile is held back and merged until the running attempt
//! returns. Everything in [`Request`] relies on this and takes no locks.
//! Different keys run in parallel, bounded by
//! [`EngineConfig::max_concurrent_reconciles`].

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::StreamExt;
use kube::api::Api;
use kube::runtime::controller::{self, Action, Controller};
use kube::runtime::{reflector, watcher, WatchStreamExt};
use kube::Client;
use tracing::{debug, error, info, instrument, warn};

use super::backoff::{calculate_backoff, with_jitter, FailureTracker};
use super::config::EngineConfig;
use super::filter::dedup_events;
use super::leader::{LeaderState, RETRY_INTERVAL};
use super::request::Request;
use super::resource::{ObjectKey, Reconcilable};
use super::step::StepResult;
use super::store::{KubeStore, Store};
use crate::error::{Error, Result};

/// A domain controller hosted by the engine
#[async_trait]
pub trait Reconciler: Send + Sync + 'static {
    /// The custom resource this controller converges
    type Resource: Reconcilable;

    /// Stable name used in logs and metric labels
    fn name(&self) -> &'static str;

    /// Run the step pipeline for one attempt
    async fn reconcile(&self, req: &mut Request<Self::Resource>) -> StepResult;

    /// Register owned-type watches on the controller before it starts
    fn setup_with_manager(
        &self,
        controller: Controller<Self::Resource>,
        _client: &Client,
    ) -> Controller<Self::Resource> {
        controller
    }
}

/// Shared state handed to every attempt by the kube runtime
pub struct Context<R: Reconciler> {
    pub reconciler: Arc<R>,
    pub store: Arc<dyn Store<R::Resource>>,
    pub config: Arc<EngineConfig>,
    pub leader: LeaderState,
    pub failures: FailureTracker,
}

/// One attempt for one key, independent of how the key was scheduled
///
/// Fetches the object, runs the reconciler over a fresh [`Request`] and
/// records metrics. A missing object ends the attempt with `Halt`.
#[instrument(skip_all, fields(controller = reconciler.name(), object = %key))]
pub async fn reconcile_key<R: Reconciler>(
    reconciler: &R,
    store: Arc<dyn Store<R::Resource>>,
    key: &ObjectKey,
    config: Arc<EngineConfig>,
) -> StepResult {
    let started = Instant::now();
    let name = reconciler.name();

    let result = match Request::new(store, key, config, name).await {
        Ok(Some(mut req)) => reconciler.reconcile(&mut req).await,
        Ok(None) => StepResult::Halt,
        Err(err) => StepResult::Fail(err),
    };

    #[cfg(feature = "metrics")]
    {
        super::metrics::observe_reconcile_duration_seconds(name, started.elapsed().as_secs_f64());
        super::metrics::inc_step_result(name, result.outcome());
        if let Some(err) = result.err() {
            super::metrics::inc_reconcile_error(name, err.kind());
        }
    }

    debug!(
        controller = name,
        object = %key,
        outcome = result.outcome(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "reconcile attempt finished"
    );
    result
}

async fn reconcile<R: Reconciler>(obj: Arc<R::Resource>, ctx: Arc<Context<R>>) -> Result<Action> {
    if !ctx.leader.is_leader() {
        return Ok(Action::requeue(RETRY_INTERVAL));
    }

    let key = ObjectKey::of(obj.as_ref());
    let result = reconcile_key(
        ctx.reconciler.as_ref(),
        Arc::clone(&ctx.store),
        &key,
        Arc::clone(&ctx.config),
    )
    .await;

    if result.err().is_none() {
        ctx.failures.reset(&key);
    }
    result.reconciler_response()
}

/// Failed attempts back off exponentially per key; non-retriable errors wait the maximum
fn error_policy<R: Reconciler>(obj: Arc<R::Resource>, error: &Error, ctx: Arc<Context<R>>) -> Action {
    let key = ObjectKey::of(obj.as_ref());
    let attempt = ctx.failures.record_failure(&key);

    let delay = if error.is_retriable() {
        calculate_backoff(attempt, ctx.config.backoff_base, ctx.config.backoff_max)
    } else {
        ctx.config.backoff_max
    };
    let delay = with_jitter(delay);

    warn!(
        controller = ctx.reconciler.name(),
        object = %key,
        attempt,
        retry_in_ms = delay.as_millis() as u64,
        "Reconciliation error: {}",
        error
    );
    Action::requeue(delay)
}

/// Hosts controllers on a kube client
pub struct Manager {
    client: Client,
    config: Arc<EngineConfig>,
    leader: LeaderState,
}

impl Manager {
    pub fn new(client: Client, config: EngineConfig) -> Self {
        Self {
            client,
            config: Arc::new(config),
            leader: LeaderState::always(),
        }
    }

    /// Only act on the workqueue while `leader` reports leadership
    pub fn with_leader(mut self, leader: LeaderState) -> Self {
        self.leader = leader;
        self
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Run a controller until SIGTERM or SIGINT
    pub async fn run<R: Reconciler>(&self, reconciler: R) -> Result<()> {
        let name = reconciler.name();
        let api: Api<R::Resource> = Api::all(self.client.clone());

        if let Err(e) = api.list(&Default::default()).await {
            error!("{} CRD not available. Please install the CRD first: {:?}", name, e);
            return Err(Error::ConfigError(format!("{name} CRD not installed")));
        }

        let store: Arc<dyn Store<R::Resource>> = Arc::new(KubeStore::<R::Resource>::new(
            self.client.clone(),
            self.config.field_manager.clone(),
        ));

        let (reader, writer) = reflector::store();
        let events = watcher(api, watcher::Config::default().any_semantic())
            .default_backoff()
            .reflect(writer);

        let controller = Controller::for_stream(dedup_events(events), reader).with_config(
            controller::Config::default().concurrency(self.config.max_concurrent_reconciles),
        );
        let controller = reconciler.setup_with_manager(controller, &self.client);

        let ctx = Arc::new(Context {
            reconciler: Arc::new(reconciler),
            store,
            config: Arc::clone(&self.config),
            leader: self.leader.clone(),
            failures: FailureTracker::default(),
        });

        info!("Starting {} controller", name);
        controller
            .shutdown_on_signal()
            .run(reconcile::<R>, error_policy::<R>, ctx)
            .for_each(|res| async move {
                match res {
                    Ok((obj, _)) => debug!("Reconciled: {}", obj),
                    Err(e) => debug!("Reconcile error: {:?}", e),
                }
            })
            .await;
        info!("{} controller stopped", name);

        Ok(())
    }
}
