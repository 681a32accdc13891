use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgConnection, PgExecutor};
use uuid::Uuid;

/// Distribution of a voucher to one merchant, stamped with the voucher's code
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct MerchantVoucher {
    pub id: Uuid,
    pub voucher_id: Uuid,
    pub merchant_id: Uuid,
    pub voucher_code: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl MerchantVoucher {
    /// Lists the merchant associations of a voucher
    pub async fn list_by_voucher<'e, E: PgExecutor<'e>>(
        executor: E,
        voucher_id: Uuid,
    ) -> Result<Vec<Self>, sqlx::Error> {
        let associations = sqlx::query_as::<_, Self>(
            r#"
            SELECT * FROM merchant_vouchers
            WHERE voucher_id = $1
            ORDER BY created_at ASC, merchant_id ASC
            "#,
        )
        .bind(voucher_id)
        .fetch_all(executor)
        .await?;

        Ok(associations)
    }

    /// Replaces the association set of a voucher with `merchant_ids`.
    ///
    /// Associations not in the list are removed; the rest are inserted or
    /// re-stamped with `voucher_code`.
    pub async fn sync(
        conn: &mut PgConnection,
        voucher_id: Uuid,
        merchant_ids: &[Uuid],
        voucher_code: &str,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            DELETE FROM merchant_vouchers
            WHERE voucher_id = $1 AND NOT (merchant_id = ANY($2))
            "#,
        )
        .bind(voucher_id)
        .bind(merchant_ids)
        .execute(&mut *conn)
        .await?;

        if merchant_ids.is_empty() {
            return Ok(());
        }

        sqlx::query(
            r#"
            INSERT INTO merchant_vouchers (voucher_id, merchant_id, voucher_code)
            SELECT $1, merchant_id, $3 FROM UNNEST($2::uuid[]) AS merchant_id
            ON CONFLICT (voucher_id, merchant_id)
            DO UPDATE SET voucher_code = EXCLUDED.voucher_code, updated_at = NOW()
            "#,
        )
        .bind(voucher_id)
        .bind(merchant_ids)
        .bind(voucher_code)
        .execute(&mut *conn)
        .await?;

        Ok(())
    }

    /// Removes every merchant association of a voucher
    pub async fn detach_all(conn: &mut PgConnection, voucher_id: Uuid) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            r#"
            DELETE FROM merchant_vouchers WHERE voucher_id = $1
            "#,
        )
        .bind(voucher_id)
        .execute(&mut *conn)
        .await?;

        Ok(result.rows_affected())
    }
}
