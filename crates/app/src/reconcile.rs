use std::time::Duration;

use metrics::counter;
use thiserror::Error;
use tokio::{
    sync::watch,
    time::{interval, MissedTickBehavior},
};
use tracing::{error, info, warn};

use live_notifier_core::WatchedBroadcaster;
use live_notifier_twitch::{
    CreateSubscriptionRequest, HelixClient, HelixError, SubscriptionFilter, TokenError,
    TokenProvider,
};

const SUBSCRIPTION_VERSION: &str = "1";

/// Keeps exactly one webhook subscription per broadcaster pointed at the
/// current callback.
#[derive(Clone)]
pub struct SubscriptionReconciler {
    helix: HelixClient,
    tokens: TokenProvider,
    webhook_secret: String,
}

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("failed to obtain access token: {0}")]
    Token(#[from] TokenError),
    #[error("failed to list subscriptions: {0}")]
    List(#[source] HelixError),
    #[error("failed to create subscription: {0}")]
    Create(#[source] HelixError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// A subscription with the desired callback already existed.
    Unchanged,
    Created { subscription_id: String },
    /// Listing was rate limited; nothing was changed.
    RateLimited,
}

impl ReconcileOutcome {
    fn metric_label(&self) -> &'static str {
        match self {
            Self::Unchanged => "unchanged",
            Self::Created { .. } => "created",
            Self::RateLimited => "rate_limited",
        }
    }
}

impl SubscriptionReconciler {
    pub fn new(helix: HelixClient, tokens: TokenProvider, webhook_secret: impl Into<String>) -> Self {
        Self {
            helix,
            tokens,
            webhook_secret: webhook_secret.into(),
        }
    }

    /// Reconciles one broadcaster.
    ///
    /// Upstream is listed by broadcaster only, since Helix accepts a single
    /// filter per request; entries of other event types are left alone.
    /// Stale subscriptions seen before a matching one are deleted; the scan
    /// stops at the first match, so stale entries listed after it survive
    /// until a later pass. Delete failures are logged and skipped.
    pub async fn reconcile(
        &self,
        broadcaster_id: &str,
        event_type: &str,
        callback_url: &str,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        let token = self.tokens.token().await?;

        let existing = match self
            .helix
            .list_all_eventsub_subscriptions(
                token.secret(),
                SubscriptionFilter::UserId(broadcaster_id),
            )
            .await
        {
            Ok(listed) => listed
                .into_iter()
                .filter(|sub| sub.covers(event_type, broadcaster_id))
                .collect::<Vec<_>>(),
            Err(err) if err.is_rate_limited() => {
                warn!(stage = "reconcile", %broadcaster_id, %event_type, "subscription listing rate limited; skipping");
                return Ok(ReconcileOutcome::RateLimited);
            }
            Err(err) => return Err(ReconcileError::List(err)),
        };

        for subscription in &existing {
            if subscription.delivers_to(callback_url) {
                info!(
                    stage = "reconcile",
                    %broadcaster_id,
                    %event_type,
                    subscription_id = %subscription.id,
                    "subscription already up to date"
                );
                return Ok(ReconcileOutcome::Unchanged);
            }

            match self
                .helix
                .delete_eventsub_subscription(token.secret(), &subscription.id)
                .await
            {
                Ok(()) => {
                    counter!("eventsub_subscription_delete_total", "result" => "ok").increment(1);
                    info!(
                        stage = "reconcile",
                        %broadcaster_id,
                        subscription_id = %subscription.id,
                        stale_callback = %subscription.callback_url,
                        "deleted stale subscription"
                    );
                }
                Err(err) => {
                    counter!("eventsub_subscription_delete_total", "result" => "error").increment(1);
                    warn!(
                        stage = "reconcile",
                        %broadcaster_id,
                        subscription_id = %subscription.id,
                        error = %err,
                        "failed to delete stale subscription"
                    );
                }
            }
        }

        let created = self
            .helix
            .create_eventsub_subscription(
                token.secret(),
                &CreateSubscriptionRequest {
                    event_type,
                    version: SUBSCRIPTION_VERSION,
                    broadcaster_id,
                    callback: callback_url,
                    secret: &self.webhook_secret,
                },
            )
            .await
            .map_err(ReconcileError::Create)?;

        info!(
            stage = "reconcile",
            %broadcaster_id,
            %event_type,
            subscription_id = %created.id,
            status = %created.status,
            "subscription created"
        );
        Ok(ReconcileOutcome::Created {
            subscription_id: created.id,
        })
    }

    /// Reconciles every broadcaster in turn. A failure only affects the
    /// broadcaster it happened for.
    pub async fn reconcile_all(
        &self,
        broadcasters: &[WatchedBroadcaster],
        event_type: &str,
        callback_url: &str,
    ) -> usize {
        let mut failures = 0;
        for broadcaster in broadcasters {
            let id = broadcaster.broadcaster_id.as_str();
            match self.reconcile(id, event_type, callback_url).await {
                Ok(outcome) => {
                    counter!("eventsub_reconcile_total", "outcome" => outcome.metric_label())
                        .increment(1);
                }
                Err(err) => {
                    failures += 1;
                    counter!("eventsub_reconcile_total", "outcome" => "failed").increment(1);
                    error!(stage = "reconcile", broadcaster_id = %id, %event_type, error = %err, "reconciliation failed");
                }
            }
        }
        failures
    }
}

/// Background worker that re-runs reconciliation on a fixed cadence.
pub struct ReconcileWorker {
    reconciler: SubscriptionReconciler,
    broadcasters: Vec<WatchedBroadcaster>,
    event_type: String,
    callback_url: String,
    interval: Duration,
}

impl ReconcileWorker {
    pub fn new(
        reconciler: SubscriptionReconciler,
        broadcasters: Vec<WatchedBroadcaster>,
        event_type: impl Into<String>,
        callback_url: impl Into<String>,
        interval: Duration,
    ) -> Self {
        Self {
            reconciler,
            broadcasters,
            event_type: event_type.into(),
            callback_url: callback_url.into(),
            interval,
        }
    }

    /// Runs the worker loop in the background until `shutdown` flips to `true`.
    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            self.run_loop(shutdown).await;
        })
    }

    async fn run_loop(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The startup pass already covered the first tick.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let failures = self.run_once().await;
                    info!(stage = "reconcile", broadcasters = self.broadcasters.len(), failures, "periodic reconciliation finished");
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!(stage = "reconcile", "reconcile worker stopping");
                        return;
                    }
                }
            }
        }
    }

    pub async fn run_once(&self) -> usize {
        self.reconciler
            .reconcile_all(&self.broadcasters, &self.event_type, &self.callback_url)
            .await
    }
}
