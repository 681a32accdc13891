use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgConnection, PgExecutor, PgPool};
use uuid::Uuid;

use super::merchant_voucher::MerchantVoucher;
use super::page::{Page, PageRequest};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "voucher_type", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum VoucherType {
    OneTime,
    MultipleTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "voucher_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum VoucherStatus {
    Unused,
    Used,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "code_generation_method", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum GenerationMethod {
    Sms,
    QrCode,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Voucher {
    pub id: Uuid,
    pub voucher_code: String,
    pub sponsor_id: Uuid,
    pub purpose: Option<String>,
    pub expiry_date: Option<NaiveDate>,
    /// Remaining redemptions
    #[sqlx(rename = "usage_limit")]
    pub limit: i32,
    pub voucher_amount: Decimal,
    pub amount_per_code: Decimal,
    pub location: Option<String>,
    #[sqlx(rename = "type")]
    #[serde(rename = "type")]
    pub voucher_type: VoucherType,
    #[sqlx(rename = "voucher_status")]
    pub status: VoucherStatus,
    pub code_generation_method: GenerationMethod,
    pub deleted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A voucher together with the merchants it was distributed to
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoucherDetails {
    #[serde(flatten)]
    pub voucher: Voucher,
    pub merchants: Vec<MerchantVoucher>,
}

#[derive(Debug, Clone)]
pub struct NewVoucher {
    pub sponsor_id: Uuid,
    pub purpose: Option<String>,
    pub expiry_date: Option<NaiveDate>,
    pub limit: i32,
    pub voucher_amount: Decimal,
    pub amount_per_code: Decimal,
    pub location: Option<String>,
    pub voucher_type: VoucherType,
    pub code_generation_method: GenerationMethod,
}

/// Partial update; `None` leaves the column untouched. Nullable columns take
/// `Some(None)` to clear them.
#[derive(Debug, Clone, Default)]
pub struct VoucherChanges {
    pub purpose: Option<Option<String>>,
    pub expiry_date: Option<Option<NaiveDate>>,
    pub limit: Option<i32>,
    pub voucher_amount: Option<Decimal>,
    pub amount_per_code: Option<Decimal>,
    pub location: Option<Option<String>>,
    pub voucher_type: Option<VoucherType>,
    pub code_generation_method: Option<GenerationMethod>,
    pub status: Option<VoucherStatus>,
}

impl VoucherChanges {
    /// Applies the provided fields to an in-memory record
    pub fn apply_to(&self, voucher: &mut Voucher) {
        if let Some(purpose) = &self.purpose {
            voucher.purpose = purpose.clone();
        }
        if let Some(expiry_date) = self.expiry_date {
            voucher.expiry_date = expiry_date;
        }
        if let Some(limit) = self.limit {
            voucher.limit = limit;
        }
        if let Some(amount) = self.voucher_amount {
            voucher.voucher_amount = amount;
        }
        if let Some(amount) = self.amount_per_code {
            voucher.amount_per_code = amount;
        }
        if let Some(location) = &self.location {
            voucher.location = location.clone();
        }
        if let Some(voucher_type) = self.voucher_type {
            voucher.voucher_type = voucher_type;
        }
        if let Some(method) = self.code_generation_method {
            voucher.code_generation_method = method;
        }
        if let Some(status) = self.status {
            voucher.status = status;
        }
    }
}

/// Reporting views over a sponsor's live (non-revoked) vouchers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoucherFilter {
    All,
    CreatedBetween {
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    },
    /// Status `used`, or exhausted multi-use vouchers
    Used,
    /// Distributed to at least one merchant with a stamped code
    Distributed,
    /// Status `unused` with uses left
    Pending,
}

impl VoucherFilter {
    /// Evaluates the filter against a loaded record
    pub fn matches(&self, voucher: &Voucher, has_stamped_association: bool) -> bool {
        match self {
            VoucherFilter::All => true,
            VoucherFilter::CreatedBetween { from, to } => {
                voucher.created_at >= *from && voucher.created_at <= *to
            }
            VoucherFilter::Used => voucher.status == VoucherStatus::Used || voucher.limit == 0,
            VoucherFilter::Distributed => has_stamped_association,
            VoucherFilter::Pending => voucher.status == VoucherStatus::Unused && voucher.limit > 0,
        }
    }

    fn sql_condition(&self) -> &'static str {
        match self {
            VoucherFilter::All => "TRUE",
            VoucherFilter::CreatedBetween { .. } => "v.created_at BETWEEN $2 AND $3",
            VoucherFilter::Used => "(v.voucher_status = 'used' OR v.usage_limit = 0)",
            VoucherFilter::Distributed => {
                "EXISTS (SELECT 1 FROM merchant_vouchers mv WHERE mv.voucher_id = v.id AND mv.voucher_code IS NOT NULL)"
            }
            VoucherFilter::Pending => "(v.voucher_status = 'unused' AND v.usage_limit > 0)",
        }
    }
}

/// Returned when a redemption is applied to a voucher with no uses left
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("voucher has no redemptions left")]
pub struct LimitExhausted;

impl Voucher {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// A voucher expires at the start (UTC) of its expiry date
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        match self.expiry_date {
            Some(date) => date.and_time(NaiveTime::MIN).and_utc() < now,
            None => false,
        }
    }

    /// One-time vouchers are terminal once flagged used
    pub fn is_used_up(&self) -> bool {
        self.voucher_type == VoucherType::OneTime && self.status == VoucherStatus::Used
    }

    /// Status implied by type and remaining uses: a one-time voucher is `used`
    /// exactly when it has none left.
    pub fn derived_status(&self) -> VoucherStatus {
        if self.voucher_type == VoucherType::OneTime && self.limit == 0 {
            VoucherStatus::Used
        } else {
            VoucherStatus::Unused
        }
    }

    /// Consumes one use. A one-time voucher flips to `used` when its last use is taken;
    /// multi-use vouchers keep their status.
    pub fn apply_redemption(&mut self) -> Result<(), LimitExhausted> {
        if self.limit <= 0 {
            return Err(LimitExhausted);
        }

        self.limit -= 1;
        if self.limit == 0 && self.voucher_type == VoucherType::OneTime {
            self.status = VoucherStatus::Used;
        }

        Ok(())
    }

    /// Inserts a new voucher with the given code
    pub async fn insert(
        conn: &mut PgConnection,
        data: &NewVoucher,
        code: &str,
    ) -> Result<Self, sqlx::Error> {
        let voucher = sqlx::query_as::<_, Self>(
            r#"
            INSERT INTO vouchers (
                voucher_code, sponsor_id, purpose, expiry_date, usage_limit,
                voucher_amount, amount_per_code, location, type, code_generation_method
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING *
            "#,
        )
        .bind(code)
        .bind(data.sponsor_id)
        .bind(&data.purpose)
        .bind(data.expiry_date)
        .bind(data.limit)
        .bind(data.voucher_amount)
        .bind(data.amount_per_code)
        .bind(&data.location)
        .bind(data.voucher_type)
        .bind(data.code_generation_method)
        .fetch_one(&mut *conn)
        .await?;

        Ok(voucher)
    }

    /// Finds a live voucher by ID
    pub async fn find_by_id<'e, E: PgExecutor<'e>>(
        executor: E,
        id: Uuid,
    ) -> Result<Option<Self>, sqlx::Error> {
        let voucher = sqlx::query_as::<_, Self>(
            r#"
            SELECT * FROM vouchers WHERE id = $1 AND deleted_at IS NULL
            "#,
        )
        .bind(id)
        .fetch_optional(executor)
        .await?;

        Ok(voucher)
    }

    /// Finds a voucher by ID, including revoked ones
    pub async fn find_by_id_with_revoked<'e, E: PgExecutor<'e>>(
        executor: E,
        id: Uuid,
    ) -> Result<Option<Self>, sqlx::Error> {
        let voucher = sqlx::query_as::<_, Self>(
            r#"
            SELECT * FROM vouchers WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(executor)
        .await?;

        Ok(voucher)
    }

    /// Finds a live voucher by its exact code
    pub async fn find_by_code(pool: &PgPool, code: &str) -> Result<Option<Self>, sqlx::Error> {
        let voucher = sqlx::query_as::<_, Self>(
            r#"
            SELECT * FROM vouchers WHERE voucher_code = $1 AND deleted_at IS NULL
            "#,
        )
        .bind(code)
        .fetch_optional(pool)
        .await?;

        Ok(voucher)
    }

    /// Re-reads a live voucher and holds its row lock until the enclosing transaction ends
    pub async fn lock_for_redemption(
        conn: &mut PgConnection,
        id: Uuid,
    ) -> Result<Option<Self>, sqlx::Error> {
        let voucher = sqlx::query_as::<_, Self>(
            r#"
            SELECT * FROM vouchers
            WHERE id = $1 AND deleted_at IS NULL
            FOR UPDATE
            "#,
        )
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;

        Ok(voucher)
    }

    pub async fn set_redemption_state(
        conn: &mut PgConnection,
        id: Uuid,
        limit: i32,
        status: VoucherStatus,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE vouchers
            SET usage_limit = $2, voucher_status = $3, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(limit)
        .bind(status)
        .execute(&mut *conn)
        .await?;

        Ok(())
    }

    /// Applies a partial update to a live voucher
    pub async fn update(
        conn: &mut PgConnection,
        id: Uuid,
        changes: &VoucherChanges,
    ) -> Result<Option<Self>, sqlx::Error> {
        let voucher = sqlx::query_as::<_, Self>(
            r#"
            UPDATE vouchers
            SET
                purpose = CASE WHEN $2 THEN $3 ELSE purpose END,
                expiry_date = CASE WHEN $4 THEN $5 ELSE expiry_date END,
                usage_limit = COALESCE($6, usage_limit),
                voucher_amount = COALESCE($7, voucher_amount),
                amount_per_code = COALESCE($8, amount_per_code),
                location = CASE WHEN $9 THEN $10 ELSE location END,
                type = COALESCE($11, type),
                code_generation_method = COALESCE($12, code_generation_method),
                voucher_status = COALESCE($13, voucher_status),
                updated_at = NOW()
            WHERE id = $1 AND deleted_at IS NULL
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(changes.purpose.is_some())
        .bind(changes.purpose.clone().flatten())
        .bind(changes.expiry_date.is_some())
        .bind(changes.expiry_date.flatten())
        .bind(changes.limit)
        .bind(changes.voucher_amount)
        .bind(changes.amount_per_code)
        .bind(changes.location.is_some())
        .bind(changes.location.clone().flatten())
        .bind(changes.voucher_type)
        .bind(changes.code_generation_method)
        .bind(changes.status)
        .fetch_optional(&mut *conn)
        .await?;

        Ok(voucher)
    }

    /// Marks a live voucher as revoked. Returns false when nothing matched.
    pub async fn soft_delete(pool: &PgPool, id: Uuid) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE vouchers
            SET deleted_at = NOW(), updated_at = NOW()
            WHERE id = $1 AND deleted_at IS NULL
            "#,
        )
        .bind(id)
        .execute(pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Permanently removes a voucher row, revoked or not
    pub async fn hard_delete(conn: &mut PgConnection, id: Uuid) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            DELETE FROM vouchers WHERE id = $1
            "#,
        )
        .bind(id)
        .execute(&mut *conn)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Lists a sponsor's live vouchers matching a reporting filter, newest first
    pub async fn list_for_sponsor(
        pool: &PgPool,
        sponsor_id: Uuid,
        filter: VoucherFilter,
        page: PageRequest,
    ) -> Result<Page<Self>, sqlx::Error> {
        let condition = filter.sql_condition();
        let (limit_param, offset_param) = match filter {
            VoucherFilter::CreatedBetween { .. } => (4, 5),
            _ => (2, 3),
        };

        let count_sql = format!(
            "SELECT COUNT(*) FROM vouchers v WHERE v.sponsor_id = $1 AND v.deleted_at IS NULL AND {}",
            condition
        );
        let list_sql = format!(
            "SELECT v.* FROM vouchers v WHERE v.sponsor_id = $1 AND v.deleted_at IS NULL AND {} \
             ORDER BY v.created_at DESC, v.id LIMIT ${} OFFSET ${}",
            condition, limit_param, offset_param
        );

        let mut count_query = sqlx::query_scalar::<_, i64>(&count_sql).bind(sponsor_id);
        let mut list_query = sqlx::query_as::<_, Self>(&list_sql).bind(sponsor_id);

        if let VoucherFilter::CreatedBetween { from, to } = filter {
            count_query = count_query.bind(from).bind(to);
            list_query = list_query.bind(from).bind(to);
        }

        let total = count_query.fetch_one(pool).await?;
        let items = list_query
            .bind(page.limit())
            .bind(page.offset())
            .fetch_all(pool)
            .await?;

        Ok(Page::new(items, total, page))
    }
}
