//! Database logging adapter
//!
//! Writes the captured payment into the `payments` table. The unique
//! constraint on `order_id` makes retried sends idempotent: a conflicting
//! insert is a success, not an error.

use std::collections::HashMap;
use std::sync::Arc;

use sqlx::PgPool;
use tokio::sync::Mutex;

use super::{FulfillmentPayload, NotifyError};

#[derive(Clone)]
enum Backend {
    Postgres(PgPool),
    Memory(Arc<Mutex<HashMap<String, FulfillmentPayload>>>),
}

#[derive(Clone)]
pub struct DatabaseNotifier {
    backend: Backend,
}

impl DatabaseNotifier {
    pub fn new(pool: PgPool) -> Self {
        Self {
            backend: Backend::Postgres(pool),
        }
    }

    /// In-memory backend for tests
    pub fn new_in_memory() -> Self {
        Self {
            backend: Backend::Memory(Arc::new(Mutex::new(HashMap::new()))),
        }
    }

    pub async fn send(&self, payload: &FulfillmentPayload) -> Result<(), NotifyError> {
        match &self.backend {
            Backend::Postgres(pool) => {
                let products: Vec<String> = payload
                    .products
                    .iter()
                    .map(|p| p.as_str().to_string())
                    .collect();
                let notes = serde_json::to_string(&payload.notes)
                    .map_err(|e| NotifyError::InvalidPayload(e.to_string()))?;

                sqlx::query(
                    r#"
                    INSERT INTO payments
                        (order_id, payment_id, amount_paise, currency, status,
                         email, contact, products, notes)
                    VALUES ($1, $2, $3, $4, 'captured', $5, $6, $7, $8::jsonb)
                    ON CONFLICT (order_id) DO NOTHING
                    "#,
                )
                .bind(&payload.order_id)
                .bind(&payload.payment_id)
                .bind(payload.amount_paise)
                .bind(&payload.currency)
                .bind(&payload.email)
                .bind(&payload.contact)
                .bind(&products)
                .bind(&notes)
                .execute(pool)
                .await
                .map_err(|e| NotifyError::Database(e.to_string()))?;

                tracing::info!(
                    order_id = %payload.order_id,
                    payment_id = %payload.payment_id,
                    "Payment recorded"
                );
                Ok(())
            }
            Backend::Memory(payments) => {
                payments
                    .lock()
                    .await
                    .entry(payload.order_id.clone())
                    .or_insert_with(|| payload.clone());
                Ok(())
            }
        }
    }

    /// Number of recorded payments (memory backend, test assertions)
    pub async fn recorded_count(&self) -> usize {
        match &self.backend {
            Backend::Postgres(_) => 0,
            Backend::Memory(payments) => payments.lock().await.len(),
        }
    }

    /// Recorded payload for an order (memory backend, test assertions)
    pub async fn recorded(&self, order_id: &str) -> Option<FulfillmentPayload> {
        match &self.backend {
            Backend::Postgres(_) => None,
            Backend::Memory(payments) => payments.lock().await.get(order_id).cloned(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::products::{DeliveryFlags, ProductId};

    fn payload(order_id: &str) -> FulfillmentPayload {
        FulfillmentPayload {
            event_id: format!("payment.captured_{}", order_id),
            event_type: "payment.captured".into(),
            payment_id: "pay_1".into(),
            order_id: order_id.into(),
            amount_paise: 4998,
            currency: "INR".into(),
            email: Some("buyer@example.com".into()),
            contact: None,
            notes: serde_json::json!({"utm_source": "youtube"}),
            products: vec![ProductId::MainCourse, ProductId::OrderBump],
            flags: DeliveryFlags {
                send_course_access: true,
                send_database: true,
                send_calendar_link: false,
            },
        }
    }

    #[tokio::test]
    async fn records_payment() {
        let notifier = DatabaseNotifier::new_in_memory();
        notifier.send(&payload("order_1")).await.unwrap();

        assert_eq!(notifier.recorded_count().await, 1);
        let recorded = notifier.recorded("order_1").await.unwrap();
        assert_eq!(recorded.amount_paise, 4998);
    }

    #[tokio::test]
    async fn duplicate_order_id_is_idempotent() {
        let notifier = DatabaseNotifier::new_in_memory();
        notifier.send(&payload("order_1")).await.unwrap();
        notifier.send(&payload("order_1")).await.unwrap();

        assert_eq!(notifier.recorded_count().await, 1);
    }
}
