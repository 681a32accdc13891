use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use super::page::{Page, PageRequest};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Beneficiary {
    pub id: Uuid,
    pub user_id: Uuid,
    pub state: Option<String>, // home state
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Beneficiary {
    /// Lists beneficiaries holding at least one coded transaction against a sponsor's live vouchers
    pub async fn list_redeemers_for_sponsor(
        pool: &PgPool,
        sponsor_id: Uuid,
        page: PageRequest,
    ) -> Result<Page<Self>, sqlx::Error> {
        let total = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT COUNT(*) FROM beneficiaries b
            WHERE b.deleted_at IS NULL
              AND EXISTS (
                SELECT 1 FROM transactions t
                JOIN vouchers v ON v.id = t.voucher_id
                WHERE t.beneficiary_id = b.id
                  AND v.sponsor_id = $1
                  AND v.deleted_at IS NULL
                  AND t.code IS NOT NULL
              )
            "#,
        )
        .bind(sponsor_id)
        .fetch_one(pool)
        .await?;

        let items = sqlx::query_as::<_, Self>(
            r#"
            SELECT b.id, b.user_id, b.state, b.created_at, b.updated_at
            FROM beneficiaries b
            WHERE b.deleted_at IS NULL
              AND EXISTS (
                SELECT 1 FROM transactions t
                JOIN vouchers v ON v.id = t.voucher_id
                WHERE t.beneficiary_id = b.id
                  AND v.sponsor_id = $1
                  AND v.deleted_at IS NULL
                  AND t.code IS NOT NULL
              )
            ORDER BY b.created_at ASC, b.id ASC
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(sponsor_id)
        .bind(page.limit())
        .bind(page.offset())
        .fetch_all(pool)
        .await?;

        Ok(Page::new(items, total, page))
    }
}
