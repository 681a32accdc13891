use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgConnection, PgPool};
use uuid::Uuid;

use super::voucher::{GenerationMethod, VoucherStatus, VoucherType};

/// Ledger entry for a redemption. Never updated once written.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Transaction {
    pub id: Uuid,
    pub voucher_id: Option<Uuid>, // nulled if the voucher is hard-deleted
    pub beneficiary_id: Uuid,
    pub merchant_id: Option<Uuid>,
    pub amount: Decimal,
    pub status: VoucherStatus,
    pub code: Option<String>,
    #[sqlx(rename = "type")]
    #[serde(rename = "type")]
    pub voucher_type: VoucherType,
    pub code_generation_method: GenerationMethod,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewTransaction {
    pub voucher_id: Uuid,
    pub beneficiary_id: Uuid,
    pub merchant_id: Option<Uuid>,
    pub amount: Decimal,
    pub status: VoucherStatus,
    pub code: String,
    pub voucher_type: VoucherType,
    pub code_generation_method: GenerationMethod,
}

impl Transaction {
    /// Appends a ledger entry
    pub async fn insert(
        conn: &mut PgConnection,
        data: &NewTransaction,
    ) -> Result<Self, sqlx::Error> {
        let transaction = sqlx::query_as::<_, Self>(
            r#"
            INSERT INTO transactions (
                voucher_id, beneficiary_id, merchant_id, amount, status,
                code, type, code_generation_method
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING *
            "#,
        )
        .bind(data.voucher_id)
        .bind(data.beneficiary_id)
        .bind(data.merchant_id)
        .bind(data.amount)
        .bind(data.status)
        .bind(&data.code)
        .bind(data.voucher_type)
        .bind(data.code_generation_method)
        .fetch_one(&mut *conn)
        .await?;

        Ok(transaction)
    }

    /// Lists the ledger entries of a voucher, newest first
    pub async fn list_by_voucher(pool: &PgPool, voucher_id: Uuid) -> Result<Vec<Self>, sqlx::Error> {
        let transactions = sqlx::query_as::<_, Self>(
            r#"
            SELECT * FROM transactions
            WHERE voucher_id = $1
            ORDER BY created_at DESC, id DESC
            "#,
        )
        .bind(voucher_id)
        .fetch_all(pool)
        .await?;

        Ok(transactions)
    }
}
