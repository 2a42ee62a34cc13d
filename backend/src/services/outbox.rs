//! Stock arrival outbox
//!
//! Entry confirmation must never be blocked or rolled back by downstream
//! allocation, so the rescan trigger is written to an outbox table inside
//! the confirming transaction and dispatched after commit. The dispatcher
//! claims rows with SKIP LOCKED so concurrent instances never double-run
//! the same event.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{FromRow, PgConnection, PgPool};
use uuid::Uuid;

use crate::error::AppResult;
use crate::models::OutboxStatus;
use crate::services::allocation::AllocationService;

const MAX_ATTEMPTS: i32 = 5;
const DISPATCH_BATCH: i64 = 100;
const STALE_CLAIM_MINUTES: i32 = 10;

/// Where a claimed event goes when its dispatch did not complete: back to
/// pending while attempts remain, failed for inspection once they run out.
fn release_status(attempts: i32) -> OutboxStatus {
    if attempts >= MAX_ATTEMPTS {
        OutboxStatus::Failed
    } else {
        OutboxStatus::Pending
    }
}

/// Outbox service for post-commit allocation rescans
#[derive(Clone)]
pub struct OutboxService {
    db: PgPool,
}

/// A queued stock-arrival event
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct OutboxEvent {
    pub id: Uuid,
    pub product_id: Uuid,
    pub status: OutboxStatus,
    pub attempts: i32,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

/// Result of one dispatcher pass
#[derive(Debug, Clone, Serialize)]
pub struct DispatchSummary {
    pub events_claimed: usize,
    pub orders_scanned: usize,
    pub orders_failed: usize,
}

impl OutboxService {
    /// Create a new OutboxService instance
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    /// Queue an arrival event for a product. Runs inside the entry
    /// confirmation transaction so the event exists iff the receipt does.
    pub async fn enqueue_stock_arrival(conn: &mut PgConnection, product_id: Uuid) -> AppResult<()> {
        sqlx::query("INSERT INTO stock_outbox (product_id, status) VALUES ($1, $2)")
            .bind(product_id)
            .bind(OutboxStatus::Pending)
            .execute(&mut *conn)
            .await?;
        Ok(())
    }

    /// Claim and dispatch pending arrival events
    ///
    /// Events are claimed in one transaction, the allocation rescan runs
    /// outside it, then events are marked processed. A rescan failure puts
    /// the claimed events back to pending (or failed once attempts run out)
    /// instead of bubbling up.
    pub async fn dispatch_pending(&self, allocation: &AllocationService) -> AppResult<DispatchSummary> {
        // A dispatcher that died between claiming and marking leaves its
        // events in PROCESSING; requeue them once the claim goes stale.
        let requeued = sqlx::query(
            r#"
            UPDATE stock_outbox
            SET status = CASE WHEN attempts >= $1 THEN $2::outbox_status ELSE $3::outbox_status END,
                updated_at = NOW()
            WHERE status = $4 AND updated_at < NOW() - $5 * INTERVAL '1 minute'
            "#,
        )
        .bind(MAX_ATTEMPTS)
        .bind(OutboxStatus::Failed)
        .bind(OutboxStatus::Pending)
        .bind(OutboxStatus::Processing)
        .bind(STALE_CLAIM_MINUTES)
        .execute(&self.db)
        .await?;
        if requeued.rows_affected() > 0 {
            tracing::warn!(events = requeued.rows_affected(), "Requeued stale outbox claims");
        }

        let mut tx = self.db.begin().await?;

        let claimed = sqlx::query_as::<_, (Uuid, Uuid, i32)>(
            r#"
            SELECT id, product_id, attempts FROM stock_outbox
            WHERE status = $1
            ORDER BY created_at ASC
            LIMIT $2
            FOR UPDATE SKIP LOCKED
            "#,
        )
        .bind(OutboxStatus::Pending)
        .bind(DISPATCH_BATCH)
        .fetch_all(&mut *tx)
        .await?;

        if claimed.is_empty() {
            return Ok(DispatchSummary {
                events_claimed: 0,
                orders_scanned: 0,
                orders_failed: 0,
            });
        }

        let event_ids: Vec<Uuid> = claimed.iter().map(|(id, _, _)| *id).collect();
        sqlx::query(
            "UPDATE stock_outbox SET status = $1, attempts = attempts + 1, updated_at = NOW() WHERE id = ANY($2)",
        )
        .bind(OutboxStatus::Processing)
        .bind(&event_ids)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        let mut product_ids: Vec<Uuid> = claimed.iter().map(|(_, pid, _)| *pid).collect();
        product_ids.sort();
        product_ids.dedup();

        match allocation.process_arrival(&product_ids).await {
            Ok(outcome) => {
                sqlx::query(
                    "UPDATE stock_outbox SET status = $1, processed_at = NOW(), updated_at = NOW() WHERE id = ANY($2)",
                )
                .bind(OutboxStatus::Processed)
                .bind(&event_ids)
                .execute(&self.db)
                .await?;

                Ok(DispatchSummary {
                    events_claimed: claimed.len(),
                    orders_scanned: outcome.orders_scanned,
                    orders_failed: outcome.orders_failed,
                })
            }
            Err(error) => {
                tracing::error!(%error, events = claimed.len(), "Arrival rescan failed; releasing outbox events");

                // attempts was already bumped when the claim was taken
                for (id, _, attempts) in &claimed {
                    sqlx::query(
                        "UPDATE stock_outbox SET status = $1, updated_at = NOW() WHERE id = $2",
                    )
                    .bind(release_status(attempts + 1))
                    .bind(id)
                    .execute(&self.db)
                    .await?;
                }

                Ok(DispatchSummary {
                    events_claimed: claimed.len(),
                    orders_scanned: 0,
                    orders_failed: 0,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_released_events_return_to_pending_while_attempts_remain() {
        assert_eq!(release_status(1), OutboxStatus::Pending);
        assert_eq!(release_status(MAX_ATTEMPTS - 1), OutboxStatus::Pending);
    }

    #[test]
    fn test_released_events_fail_once_attempts_run_out() {
        assert_eq!(release_status(MAX_ATTEMPTS), OutboxStatus::Failed);
        assert_eq!(release_status(MAX_ATTEMPTS + 3), OutboxStatus::Failed);
    }
}
