//! Stock entry service
//!
//! Inbound goods documents. Entries are drafted, edited item by item, then
//! confirmed. Confirmation is the only path that creates or grows lots: each
//! item carrying both a lot number and an expiration date is matched to its
//! (product, lot number) lot or a new lot is created, with a paired IN
//! movement; items missing either field land as untracked IN movements.
//! Confirmed arrivals enqueue an outbox event per product so waiting orders
//! get re-allocated after commit.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgConnection, PgPool};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::models::{EntryStatus, EntryType, PageMeta, Paginated};
use crate::services::outbox::OutboxService;
use crate::services::stock::StockService;

/// Stock entry service
#[derive(Clone)]
pub struct StockEntryService {
    db: PgPool,
}

/// An inbound goods document
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct StockEntry {
    pub id: Uuid,
    pub entry_type: EntryType,
    pub status: EntryStatus,
    pub supplier_id: Option<Uuid>,
    pub supplier_name: Option<String>,
    pub invoice_number: Option<String>,
    pub series: Option<String>,
    pub access_key: Option<String>,
    pub emission_date: Option<NaiveDate>,
    pub arrival_date: Option<NaiveDate>,
    pub freight_value: Option<Decimal>,
    pub carrier_name: Option<String>,
    pub total_value: Decimal,
    pub notes: Option<String>,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub confirmed_by: Option<Uuid>,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One line of an entry document
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct StockEntryItem {
    pub id: Uuid,
    pub entry_id: Uuid,
    pub product_id: Uuid,
    pub quantity: Decimal,
    pub unit_price: Decimal,
    pub lot_number: Option<String>,
    pub expiration_date: Option<NaiveDate>,
    pub shade: Option<String>,
    pub caliber: Option<String>,
    pub manufacturer: Option<String>,
}

/// Entry with its items
#[derive(Debug, Clone, Serialize)]
pub struct StockEntryDetail {
    #[serde(flatten)]
    pub entry: StockEntry,
    pub items: Vec<StockEntryItem>,
}

/// Input for drafting an entry
#[derive(Debug, Deserialize)]
pub struct CreateEntryInput {
    pub entry_type: EntryType,
    pub supplier_id: Option<Uuid>,
    pub supplier_name: Option<String>,
    pub invoice_number: Option<String>,
    pub series: Option<String>,
    pub access_key: Option<String>,
    pub emission_date: Option<NaiveDate>,
    pub arrival_date: Option<NaiveDate>,
    pub freight_value: Option<Decimal>,
    pub carrier_name: Option<String>,
    pub notes: Option<String>,
}

/// Input for adding an item to a draft entry
#[derive(Debug, Deserialize)]
pub struct AddEntryItemInput {
    pub product_id: Uuid,
    pub quantity: Decimal,
    pub unit_price: Option<Decimal>,
    pub lot_number: Option<String>,
    pub expiration_date: Option<NaiveDate>,
    pub shade: Option<String>,
    pub caliber: Option<String>,
    pub manufacturer: Option<String>,
}

/// Query filters for entry listing
#[derive(Debug, Deserialize)]
pub struct ListEntriesQuery {
    pub status: Option<EntryStatus>,
    pub entry_type: Option<EntryType>,
    pub supplier_id: Option<Uuid>,
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

const ENTRY_COLUMNS: &str = "id, entry_type, status, supplier_id, supplier_name, invoice_number, \
     series, access_key, emission_date, arrival_date, freight_value, carrier_name, \
     total_value, notes, confirmed_at, confirmed_by, created_by, created_at, updated_at";

const ITEM_COLUMNS: &str = "id, entry_id, product_id, quantity, unit_price, lot_number, \
     expiration_date, shade, caliber, manufacturer";

/// Lot assignment for one entry item: a lot is only materialized when the
/// item carries both a lot number and an expiration date. Anything else is
/// recorded as an untracked receipt.
pub fn lot_assignment(item: &StockEntryItem) -> Option<(&str, NaiveDate)> {
    match (item.lot_number.as_deref(), item.expiration_date) {
        (Some(lot_number), Some(expiration_date)) => Some((lot_number, expiration_date)),
        _ => None,
    }
}

/// The (invoice number, series, supplier) trio used as a dedup fallback when
/// the fiscal access key is absent or finds no match.
pub fn invoice_trio(input: &CreateEntryInput) -> Option<(&str, &str, Uuid)> {
    match (
        input.invoice_number.as_deref(),
        input.series.as_deref(),
        input.supplier_id,
    ) {
        (Some(invoice_number), Some(series), Some(supplier_id)) => {
            Some((invoice_number, series, supplier_id))
        }
        _ => None,
    }
}

impl StockEntryService {
    /// Create a new StockEntryService instance
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    /// Draft a new entry document
    ///
    /// Entries are deduplicated by natural key: first by fiscal access key,
    /// then by the (invoice number, series, supplier) trio when the access
    /// key is absent or finds nothing. A draft matching the natural key is
    /// updated in place; a confirmed or canceled match is a duplicate.
    pub async fn create_draft(&self, created_by: Uuid, input: CreateEntryInput) -> AppResult<StockEntry> {
        if input.entry_type == EntryType::Invoice && input.invoice_number.is_none() {
            return Err(AppError::Validation {
                field: "invoice_number".to_string(),
                message: "Invoice entries require an invoice number".to_string(),
                message_pt: "Entradas por nota fiscal exigem o número da nota".to_string(),
            });
        }

        let mut tx = self.db.begin().await?;

        let mut existing: Option<(Uuid, EntryStatus)> = None;
        if let Some(access_key) = &input.access_key {
            existing = sqlx::query_as(
                "SELECT id, status FROM stock_entries WHERE access_key = $1 ORDER BY created_at DESC LIMIT 1 FOR UPDATE",
            )
            .bind(access_key)
            .fetch_optional(&mut *tx)
            .await?;
        }
        if existing.is_none() {
            if let Some((invoice_number, series, supplier_id)) = invoice_trio(&input) {
                existing = sqlx::query_as(
                    r#"
                    SELECT id, status FROM stock_entries
                    WHERE invoice_number = $1 AND series = $2 AND supplier_id = $3
                    ORDER BY created_at DESC LIMIT 1
                    FOR UPDATE
                    "#,
                )
                .bind(invoice_number)
                .bind(series)
                .bind(supplier_id)
                .fetch_optional(&mut *tx)
                .await?;
            }
        }

        let entry = match existing {
            Some((id, EntryStatus::Draft)) => {
                let updated = sqlx::query_as::<_, StockEntry>(&format!(
                    r#"
                    UPDATE stock_entries
                    SET entry_type = $1, supplier_id = $2, supplier_name = $3, invoice_number = $4,
                        series = $5, access_key = $6, emission_date = $7, arrival_date = $8,
                        freight_value = $9, carrier_name = $10, notes = $11, updated_at = NOW()
                    WHERE id = $12
                    RETURNING {ENTRY_COLUMNS}
                    "#,
                ))
                .bind(input.entry_type)
                .bind(input.supplier_id)
                .bind(&input.supplier_name)
                .bind(&input.invoice_number)
                .bind(&input.series)
                .bind(&input.access_key)
                .bind(input.emission_date)
                .bind(input.arrival_date)
                .bind(input.freight_value)
                .bind(&input.carrier_name)
                .bind(&input.notes)
                .bind(id)
                .fetch_one(&mut *tx)
                .await?;

                tracing::info!(entry_id = %id, "Existing draft entry updated in place");
                updated
            }
            Some((_, _)) => {
                return Err(AppError::DuplicateDocument(match &input.access_key {
                    Some(access_key) => {
                        format!("An entry with access key {} already exists", access_key)
                    }
                    None => format!(
                        "Invoice {}/{} from this supplier already has an entry",
                        input.invoice_number.as_deref().unwrap_or("?"),
                        input.series.as_deref().unwrap_or("?")
                    ),
                }));
            }
            None => {
                let created = sqlx::query_as::<_, StockEntry>(&format!(
                    r#"
                    INSERT INTO stock_entries (entry_type, status, supplier_id, supplier_name,
                                               invoice_number, series, access_key, emission_date,
                                               arrival_date, freight_value, carrier_name,
                                               total_value, notes, created_by)
                    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, 0, $12, $13)
                    RETURNING {ENTRY_COLUMNS}
                    "#,
                ))
                .bind(input.entry_type)
                .bind(EntryStatus::Draft)
                .bind(input.supplier_id)
                .bind(&input.supplier_name)
                .bind(&input.invoice_number)
                .bind(&input.series)
                .bind(&input.access_key)
                .bind(input.emission_date)
                .bind(input.arrival_date)
                .bind(input.freight_value)
                .bind(&input.carrier_name)
                .bind(&input.notes)
                .bind(created_by)
                .fetch_one(&mut *tx)
                .await?;

                tracing::info!(entry_id = %created.id, entry_type = %created.entry_type.as_str(), "Stock entry drafted");
                created
            }
        };

        tx.commit().await?;

        Ok(entry)
    }

    /// Add an item to a draft entry and recompute its total
    pub async fn add_item(&self, entry_id: Uuid, input: AddEntryItemInput) -> AppResult<StockEntryItem> {
        if input.quantity <= Decimal::ZERO {
            return Err(AppError::Validation {
                field: "quantity".to_string(),
                message: "Quantity must be positive".to_string(),
                message_pt: "Quantidade deve ser positiva".to_string(),
            });
        }

        let mut tx = self.db.begin().await?;

        Self::require_draft(&mut tx, entry_id).await?;

        let product_exists =
            sqlx::query_scalar::<_, bool>("SELECT EXISTS(SELECT 1 FROM products WHERE id = $1)")
                .bind(input.product_id)
                .fetch_one(&mut *tx)
                .await?;
        if !product_exists {
            return Err(AppError::NotFound("Product".to_string()));
        }

        let item = sqlx::query_as::<_, StockEntryItem>(&format!(
            r#"
            INSERT INTO stock_entry_items (entry_id, product_id, quantity, unit_price, lot_number,
                                           expiration_date, shade, caliber, manufacturer)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING {ITEM_COLUMNS}
            "#,
        ))
        .bind(entry_id)
        .bind(input.product_id)
        .bind(input.quantity)
        .bind(input.unit_price.unwrap_or(Decimal::ZERO))
        .bind(&input.lot_number)
        .bind(input.expiration_date)
        .bind(&input.shade)
        .bind(&input.caliber)
        .bind(&input.manufacturer)
        .fetch_one(&mut *tx)
        .await?;

        Self::recompute_total(&mut tx, entry_id).await?;
        tx.commit().await?;

        Ok(item)
    }

    /// Remove an item from a draft entry and recompute its total
    pub async fn remove_item(&self, entry_id: Uuid, item_id: Uuid) -> AppResult<()> {
        let mut tx = self.db.begin().await?;

        Self::require_draft(&mut tx, entry_id).await?;

        let result = sqlx::query("DELETE FROM stock_entry_items WHERE id = $1 AND entry_id = $2")
            .bind(item_id)
            .bind(entry_id)
            .execute(&mut *tx)
            .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound("Entry item".to_string()));
        }

        Self::recompute_total(&mut tx, entry_id).await?;
        tx.commit().await?;

        Ok(())
    }

    /// Confirm a draft entry, applying its items to stock
    ///
    /// Items carrying both lot number and expiration date go through lot
    /// find-or-create; all others are recorded as untracked IN movements.
    /// One outbox event per distinct product is queued in the same
    /// transaction so allocation rescans run after commit.
    pub async fn confirm(&self, entry_id: Uuid, confirmed_by: Uuid) -> AppResult<StockEntryDetail> {
        let mut tx = self.db.begin().await?;

        let entry = Self::fetch_for_update(&mut tx, entry_id).await?;
        if entry.status != EntryStatus::Draft {
            return Err(AppError::InvalidStateTransition(
                "Only draft entries can be confirmed".to_string(),
            ));
        }

        let items = sqlx::query_as::<_, StockEntryItem>(&format!(
            r#"
            SELECT {ITEM_COLUMNS}
            FROM stock_entry_items WHERE entry_id = $1
            ORDER BY id
            "#,
        ))
        .bind(entry_id)
        .fetch_all(&mut *tx)
        .await?;

        if items.is_empty() {
            return Err(AppError::Validation {
                field: "items".to_string(),
                message: "Cannot confirm an entry without items".to_string(),
                message_pt: "Não é possível confirmar uma entrada sem itens".to_string(),
            });
        }

        if entry.entry_type == EntryType::Invoice {
            let missing = if entry.invoice_number.is_none() {
                Some("invoice_number")
            } else if entry.supplier_id.is_none() {
                Some("supplier_id")
            } else if entry.arrival_date.is_none() {
                Some("arrival_date")
            } else {
                None
            };
            if let Some(field) = missing {
                return Err(AppError::Validation {
                    field: field.to_string(),
                    message: format!("Invoice entries require {} before confirmation", field),
                    message_pt: "Entradas por nota fiscal exigem nota, fornecedor e data de chegada".to_string(),
                });
            }
        }

        let reason = match (&entry.invoice_number, &entry.series) {
            (Some(number), Some(series)) => format!("Entrada NF {}/{}", number, series),
            (Some(number), None) => format!("Entrada NF {}", number),
            _ => format!("Entrada {}", entry.entry_type.as_str()),
        };

        for item in &items {
            match lot_assignment(item) {
                Some((lot_number, expiration_date)) => {
                    StockService::increase_lot(
                        &mut tx,
                        item.product_id,
                        lot_number,
                        Some(expiration_date),
                        item.shade.as_deref(),
                        item.caliber.as_deref(),
                        item.quantity,
                        entry_id,
                        &reason,
                    )
                    .await?;
                }
                None => {
                    StockService::record_untracked_in(
                        &mut tx,
                        item.product_id,
                        item.quantity,
                        entry_id,
                        &reason,
                    )
                    .await?;
                }
            }
        }

        let confirmed = sqlx::query_as::<_, StockEntry>(&format!(
            r#"
            UPDATE stock_entries
            SET status = $1, confirmed_at = NOW(), confirmed_by = $2, updated_at = NOW()
            WHERE id = $3
            RETURNING {ENTRY_COLUMNS}
            "#,
        ))
        .bind(EntryStatus::Confirmed)
        .bind(confirmed_by)
        .bind(entry_id)
        .fetch_one(&mut *tx)
        .await?;

        let mut product_ids: Vec<Uuid> = items.iter().map(|i| i.product_id).collect();
        product_ids.sort();
        product_ids.dedup();
        for product_id in &product_ids {
            OutboxService::enqueue_stock_arrival(&mut tx, *product_id).await?;
        }

        tx.commit().await?;

        tracing::info!(
            entry_id = %entry_id,
            confirmed_by = %confirmed_by,
            items = items.len(),
            products = product_ids.len(),
            "Stock entry confirmed"
        );

        Ok(StockEntryDetail {
            entry: confirmed,
            items,
        })
    }

    /// Cancel a draft entry
    pub async fn cancel(&self, entry_id: Uuid) -> AppResult<StockEntry> {
        let entry = sqlx::query_as::<_, StockEntry>(&format!(
            r#"
            UPDATE stock_entries
            SET status = $1, updated_at = NOW()
            WHERE id = $2 AND status = $3
            RETURNING {ENTRY_COLUMNS}
            "#,
        ))
        .bind(EntryStatus::Canceled)
        .bind(entry_id)
        .bind(EntryStatus::Draft)
        .fetch_optional(&self.db)
        .await?;

        match entry {
            Some(e) => Ok(e),
            None => Err(Self::draft_only_error(&self.db, entry_id).await?),
        }
    }

    /// Delete a draft entry and its items
    pub async fn delete(&self, entry_id: Uuid) -> AppResult<()> {
        let mut tx = self.db.begin().await?;

        Self::require_draft(&mut tx, entry_id).await?;

        sqlx::query("DELETE FROM stock_entry_items WHERE entry_id = $1")
            .bind(entry_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM stock_entries WHERE id = $1")
            .bind(entry_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    /// Get an entry with its items
    pub async fn get(&self, entry_id: Uuid) -> AppResult<StockEntryDetail> {
        let entry = sqlx::query_as::<_, StockEntry>(&format!(
            "SELECT {ENTRY_COLUMNS} FROM stock_entries WHERE id = $1",
        ))
        .bind(entry_id)
        .fetch_optional(&self.db)
        .await?
        .ok_or_else(|| AppError::NotFound("Stock entry".to_string()))?;

        let items = sqlx::query_as::<_, StockEntryItem>(&format!(
            r#"
            SELECT {ITEM_COLUMNS}
            FROM stock_entry_items WHERE entry_id = $1
            ORDER BY id
            "#,
        ))
        .bind(entry_id)
        .fetch_all(&self.db)
        .await?;

        Ok(StockEntryDetail { entry, items })
    }

    /// List entries, filterable by status, type and supplier
    pub async fn list(&self, query: ListEntriesQuery) -> AppResult<Paginated<StockEntry>> {
        let page = query.page.unwrap_or(1).max(1);
        let limit = query.limit.unwrap_or(20).clamp(1, 200);
        let offset = (page - 1) * limit;

        let total = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT COUNT(*) FROM stock_entries
            WHERE ($1::entry_status IS NULL OR status = $1)
              AND ($2::entry_type IS NULL OR entry_type = $2)
              AND ($3::uuid IS NULL OR supplier_id = $3)
            "#,
        )
        .bind(query.status)
        .bind(query.entry_type)
        .bind(query.supplier_id)
        .fetch_one(&self.db)
        .await?;

        let data = sqlx::query_as::<_, StockEntry>(&format!(
            r#"
            SELECT {ENTRY_COLUMNS}
            FROM stock_entries
            WHERE ($1::entry_status IS NULL OR status = $1)
              AND ($2::entry_type IS NULL OR entry_type = $2)
              AND ($3::uuid IS NULL OR supplier_id = $3)
            ORDER BY created_at DESC
            LIMIT $4 OFFSET $5
            "#,
        ))
        .bind(query.status)
        .bind(query.entry_type)
        .bind(query.supplier_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.db)
        .await?;

        Ok(Paginated {
            data,
            meta: PageMeta::new(total, page, limit),
        })
    }

    async fn fetch_for_update(conn: &mut PgConnection, entry_id: Uuid) -> AppResult<StockEntry> {
        sqlx::query_as::<_, StockEntry>(&format!(
            "SELECT {ENTRY_COLUMNS} FROM stock_entries WHERE id = $1 FOR UPDATE",
        ))
        .bind(entry_id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| AppError::NotFound("Stock entry".to_string()))
    }

    async fn require_draft(conn: &mut PgConnection, entry_id: Uuid) -> AppResult<()> {
        let entry = Self::fetch_for_update(conn, entry_id).await?;
        if entry.status != EntryStatus::Draft {
            return Err(AppError::InvalidStateTransition(
                "Only draft entries can be modified".to_string(),
            ));
        }
        Ok(())
    }

    async fn recompute_total(conn: &mut PgConnection, entry_id: Uuid) -> AppResult<()> {
        sqlx::query(
            r#"
            UPDATE stock_entries
            SET total_value = COALESCE((
                    SELECT SUM(quantity * unit_price) FROM stock_entry_items WHERE entry_id = $1
                ), 0),
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(entry_id)
        .execute(&mut *conn)
        .await?;
        Ok(())
    }

    async fn draft_only_error(db: &PgPool, entry_id: Uuid) -> AppResult<AppError> {
        let exists =
            sqlx::query_scalar::<_, bool>("SELECT EXISTS(SELECT 1 FROM stock_entries WHERE id = $1)")
                .bind(entry_id)
                .fetch_one(db)
                .await?;

        Ok(if exists {
            AppError::InvalidStateTransition("Only draft entries can be cancelled".to_string())
        } else {
            AppError::NotFound("Stock entry".to_string())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn item(lot_number: Option<&str>, expiration_date: Option<NaiveDate>) -> StockEntryItem {
        StockEntryItem {
            id: Uuid::new_v4(),
            entry_id: Uuid::new_v4(),
            product_id: Uuid::new_v4(),
            quantity: Decimal::ONE,
            unit_price: Decimal::ZERO,
            lot_number: lot_number.map(str::to_string),
            expiration_date,
            shade: None,
            caliber: None,
            manufacturer: None,
        }
    }

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn test_lot_assignment_requires_both_fields() {
        let full = item(Some("L-100"), Some(date("2027-01-01")));
        assert_eq!(lot_assignment(&full), Some(("L-100", date("2027-01-01"))));
    }

    #[test]
    fn test_lot_number_without_expiration_is_untracked() {
        let missing_expiration = item(Some("L-100"), None);
        assert_eq!(lot_assignment(&missing_expiration), None);
    }

    #[test]
    fn test_expiration_without_lot_number_is_untracked() {
        let missing_lot = item(None, Some(date("2027-01-01")));
        assert_eq!(lot_assignment(&missing_lot), None);
        assert_eq!(lot_assignment(&item(None, None)), None);
    }

    #[test]
    fn test_invoice_trio_available_alongside_access_key() {
        let supplier_id = Uuid::new_v4();
        let input = CreateEntryInput {
            entry_type: EntryType::Invoice,
            supplier_id: Some(supplier_id),
            supplier_name: None,
            invoice_number: Some("1234".to_string()),
            series: Some("1".to_string()),
            access_key: Some("key-that-matches-nothing".to_string()),
            emission_date: None,
            arrival_date: None,
            freight_value: None,
            carrier_name: None,
            notes: None,
        };
        // The trio stays usable as a dedup fallback even when an access key
        // is present, so an unmatched key does not bypass the invoice check.
        assert_eq!(invoice_trio(&input), Some(("1234", "1", supplier_id)));
    }

    #[test]
    fn test_invoice_trio_needs_all_three() {
        let input = CreateEntryInput {
            entry_type: EntryType::Invoice,
            supplier_id: None,
            supplier_name: None,
            invoice_number: Some("1234".to_string()),
            series: Some("1".to_string()),
            access_key: None,
            emission_date: None,
            arrival_date: None,
            freight_value: None,
            carrier_name: None,
            notes: None,
        };
        assert_eq!(invoice_trio(&input), None);
    }
}
