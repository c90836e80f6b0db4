//! Razorpay webhook orchestrator
//!
//! Ties the pipeline together: verify the signature over the raw body,
//! parse, claim the event against the dedup gate, and hand back a response
//! the HTTP layer can send immediately. Fulfillment fan-out runs on a
//! spawned task after the claim, so the webhook caller never waits on
//! downstream collaborators.
//!
//! The claim uses the atomic insert in [`EventStore`]; the in-memory
//! [`DedupWindow`] short-circuits obvious redeliveries without a database
//! round trip.

use std::time::Instant;

use futures::future::join_all;

use crate::dedup::{ClaimOutcome, DedupWindow, EventStore, ProcessingResult, SHORT_WINDOW};
use crate::error::{FulfillmentError, FulfillmentResult};
use crate::notify::{DatabaseNotifier, FulfillmentPayload, MetaCapiNotifier, ZapierNotifier};
use crate::products;
use crate::razorpay::{derive_event_id, PaymentEntity, RazorpayEvent, EVENT_PAYMENT_CAPTURED};
use crate::retry::{self, RetryPolicy};
use crate::signature::verify_signature;

/// How a verified delivery was dispositioned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Claimed; fulfillment fan-out is running
    Accepted,
    /// Already processed or in flight; idempotent success, no side effects
    Duplicate,
    /// Event type this funnel does not fulfill; acknowledged and dropped
    Ignored,
}

/// Result of accepting a verified webhook delivery
pub struct WebhookAccept {
    pub event_type: String,
    pub event_id: Option<String>,
    pub disposition: Disposition,
    /// Handle to the spawned fan-out task. The HTTP layer drops it (the
    /// response never waits on fan-out); tests join it.
    pub dispatch_task: Option<tokio::task::JoinHandle<()>>,
}

/// Webhook handler for Razorpay payment events
#[derive(Clone)]
pub struct WebhookHandler {
    webhook_secret: String,
    window: DedupWindow,
    store: EventStore,
    zapier: ZapierNotifier,
    meta: MetaCapiNotifier,
    database: DatabaseNotifier,
    http_policy: RetryPolicy,
    db_policy: RetryPolicy,
}

impl WebhookHandler {
    pub fn new(
        webhook_secret: String,
        store: EventStore,
        zapier: ZapierNotifier,
        meta: MetaCapiNotifier,
        database: DatabaseNotifier,
    ) -> Self {
        Self {
            webhook_secret,
            window: DedupWindow::new(SHORT_WINDOW),
            store,
            zapier,
            meta,
            database,
            http_policy: RetryPolicy::standard(),
            db_policy: RetryPolicy::fast(),
        }
    }

    /// Override retry pacing (tests use millisecond policies)
    pub fn with_policies(mut self, http_policy: RetryPolicy, db_policy: RetryPolicy) -> Self {
        self.http_policy = http_policy;
        self.db_policy = db_policy;
        self
    }

    /// In-memory dedup window, exposed for the cleanup job
    pub fn dedup_window(&self) -> &DedupWindow {
        &self.window
    }

    /// Durable event store, exposed for worker maintenance jobs
    pub fn event_store(&self) -> &EventStore {
        &self.store
    }

    /// Verify and parse an inbound delivery.
    ///
    /// Signature verification runs over the raw transport bytes before any
    /// parsing; a failure short-circuits with no side effects and without
    /// logging payload contents.
    pub fn verify_event(
        &self,
        raw_body: &[u8],
        signature: &str,
    ) -> FulfillmentResult<RazorpayEvent> {
        if !verify_signature(raw_body, signature, &self.webhook_secret) {
            tracing::warn!(
                body_len = raw_body.len(),
                "Webhook signature verification failed"
            );
            return Err(FulfillmentError::SignatureInvalid);
        }

        serde_json::from_slice(raw_body)
            .map_err(|e| FulfillmentError::MalformedPayload(e.to_string()))
    }

    /// Deduplicate a verified event and kick off fulfillment.
    ///
    /// Returns as soon as the claim is decided; fan-out continues on a
    /// spawned task. Duplicates are an idempotent success, not an error:
    /// the original delivery already succeeded or is in flight.
    pub async fn handle_event(&self, event: RazorpayEvent) -> FulfillmentResult<WebhookAccept> {
        if event.event != EVENT_PAYMENT_CAPTURED {
            tracing::info!(
                event_type = %event.event,
                "Unhandled webhook event type - acknowledged without fulfillment"
            );
            return Ok(WebhookAccept {
                event_type: event.event,
                event_id: None,
                disposition: Disposition::Ignored,
                dispatch_task: None,
            });
        }

        let payment = event
            .payment()
            .ok_or_else(|| {
                FulfillmentError::MalformedPayload("missing payload.payment.entity".to_string())
            })?
            .clone();

        let order_id = payment
            .order_id
            .clone()
            .ok_or_else(|| FulfillmentError::MissingField("order_id".to_string()))?;

        let event_id = derive_event_id(&event.event, &order_id);

        // Fast path: seen recently in this process
        if self.window.is_duplicate(&event_id).await {
            tracing::info!(event_id = %event_id, "Duplicate skipped (in-memory window)");
            return Ok(WebhookAccept {
                event_type: event.event,
                event_id: Some(event_id),
                disposition: Disposition::Duplicate,
                dispatch_task: None,
            });
        }

        // Authoritative gate: atomic claim on the unique event_id
        let claim = self
            .store
            .claim(&event_id, &event.event, Some(&order_id))
            .await?;

        // Only a durable claim outcome populates the advisory window; a
        // failed claim leaves it empty so the redelivery reaches the store
        self.window.mark_seen(&event_id).await;

        if claim == ClaimOutcome::Duplicate {
            tracing::info!(event_id = %event_id, "Duplicate skipped (event store claim)");
            return Ok(WebhookAccept {
                event_type: event.event,
                event_id: Some(event_id),
                disposition: Disposition::Duplicate,
                dispatch_task: None,
            });
        }

        tracing::info!(
            event_id = %event_id,
            payment_id = %payment.id,
            amount_paise = payment.amount,
            "Webhook event claimed, dispatching fulfillment"
        );

        let handler = self.clone();
        let task_event_id = event_id.clone();
        let dispatch_task = tokio::spawn(async move {
            handler.dispatch(task_event_id, payment).await;
        });

        Ok(WebhookAccept {
            event_type: event.event,
            event_id: Some(event_id),
            disposition: Disposition::Accepted,
            dispatch_task: Some(dispatch_task),
        })
    }

    /// Fulfillment fan-out for a claimed event.
    ///
    /// Runs product detection, then dispatches every notifier adapter
    /// through the retry engine concurrently with settle-all semantics: one
    /// adapter exhausting its budget never blocks or fails the others. The
    /// outcome is written back to the event store; it never alters the
    /// HTTP response already sent.
    async fn dispatch(&self, event_id: String, payment: PaymentEntity) {
        let started = Instant::now();

        let detected = match products::detect(payment.amount) {
            Ok(detected) => detected,
            Err(e) => {
                tracing::error!(
                    event_id = %event_id,
                    amount_paise = payment.amount,
                    error = %e,
                    "Amount matches no product tier - flagging for manual review"
                );
                self.finish(
                    &event_id,
                    ProcessingResult::NeedsReview,
                    started,
                    Some(&e.to_string()),
                )
                .await;
                return;
            }
        };

        if payment.email.is_none() && payment.contact.is_none() {
            tracing::error!(
                event_id = %event_id,
                payment_id = %payment.id,
                "Payment has no customer contact fields - flagging for manual review"
            );
            self.finish(
                &event_id,
                ProcessingResult::NeedsReview,
                started,
                Some("missing customer email and contact"),
            )
            .await;
            return;
        }

        // Correlation reference for cross-system lookups; best-effort
        if let Err(e) = self
            .store
            .record_reference("payment", &payment.id, &event_id)
            .await
        {
            tracing::warn!(event_id = %event_id, error = %e, "Failed to record event reference");
        }

        let payload = FulfillmentPayload {
            event_id: event_id.clone(),
            event_type: EVENT_PAYMENT_CAPTURED.to_string(),
            payment_id: payment.id.clone(),
            order_id: payment.order_id.clone().unwrap_or_default(),
            amount_paise: payment.amount,
            currency: payment.currency.clone(),
            email: payment.email.clone(),
            contact: payment.contact.clone(),
            notes: payment.notes.clone(),
            products: detected.products.clone(),
            flags: detected.flags,
        };

        let zapier_task = {
            let notifier = self.zapier.clone();
            let payload = payload.clone();
            let policy = self.http_policy.clone();
            tokio::spawn(async move {
                retry::execute(&policy, "zapier", || {
                    let notifier = notifier.clone();
                    let payload = payload.clone();
                    async move { notifier.send(&payload).await }
                })
                .await
            })
        };

        let meta_task = {
            let notifier = self.meta.clone();
            let payload = payload.clone();
            let policy = self.http_policy.clone();
            tokio::spawn(async move {
                retry::execute(&policy, "meta_capi", || {
                    let notifier = notifier.clone();
                    let payload = payload.clone();
                    async move { notifier.send(&payload).await }
                })
                .await
            })
        };

        let database_task = {
            let notifier = self.database.clone();
            let payload = payload.clone();
            let policy = self.db_policy.clone();
            tokio::spawn(async move {
                retry::execute(&policy, "database", || {
                    let notifier = notifier.clone();
                    let payload = payload.clone();
                    async move { notifier.send(&payload).await }
                })
                .await
            })
        };

        let adapter_names = ["zapier", "meta_capi", "database"];
        let settled = join_all([zapier_task, meta_task, database_task]).await;

        let mut failures: Vec<String> = Vec::new();
        for (name, joined) in adapter_names.iter().zip(settled) {
            match joined {
                Ok(Ok(())) => {
                    tracing::info!(
                        event_id = %event_id,
                        adapter = name,
                        "Adapter dispatch succeeded"
                    );
                }
                Ok(Err(e)) => {
                    tracing::error!(
                        event_id = %event_id,
                        adapter = name,
                        attempts = e.attempts,
                        error = %e,
                        "Adapter dispatch failed after retries"
                    );
                    failures.push(format!("{}: {}", name, e));
                }
                Err(join_error) => {
                    tracing::error!(
                        event_id = %event_id,
                        adapter = name,
                        error = %join_error,
                        "Adapter task panicked"
                    );
                    failures.push(format!("{}: task panicked", name));
                }
            }
        }

        let result = match failures.len() {
            0 => ProcessingResult::Success,
            n if n == adapter_names.len() => ProcessingResult::Error,
            _ => ProcessingResult::PartialFailure,
        };

        let error_message = (!failures.is_empty()).then(|| failures.join("; "));
        self.finish(&event_id, result, started, error_message.as_deref())
            .await;
    }

    async fn finish(
        &self,
        event_id: &str,
        result: ProcessingResult,
        started: Instant,
        error: Option<&str>,
    ) {
        let duration_ms = started.elapsed().as_millis() as i64;

        tracing::info!(
            event_id = %event_id,
            result = result.as_str(),
            duration_ms = duration_ms,
            "Fulfillment fan-out finished"
        );

        if let Err(e) = self
            .store
            .mark_result(event_id, result, duration_ms, error)
            .await
        {
            tracing::error!(
                event_id = %event_id,
                result = result.as_str(),
                error = %e,
                "Failed to record fan-out outcome - event may appear stuck in 'processing'"
            );
        }
    }
}
