use async_trait::async_trait;
use sqlx::{PgPool, Postgres};
use uuid::Uuid;

use super::{StoreError, UnitOfWork, VoucherStore};
use crate::models::{
    Beneficiary, MerchantVoucher, NewTransaction, NewVoucher, Page, PageRequest, Transaction,
    Voucher, VoucherChanges, VoucherFilter, VoucherStatus,
};

/// Postgres-backed store
#[derive(Clone)]
pub struct PgVoucherStore {
    pool: PgPool,
}

impl PgVoucherStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl VoucherStore for PgVoucherStore {
    async fn insert_voucher(
        &self,
        data: &NewVoucher,
        code: &str,
        merchant_ids: &[Uuid],
    ) -> Result<Voucher, StoreError> {
        let mut tx = self.pool.begin().await?;

        let voucher = Voucher::insert(&mut tx, data, code).await?;
        if !merchant_ids.is_empty() {
            MerchantVoucher::sync(&mut tx, voucher.id, merchant_ids, &voucher.voucher_code)
                .await?;
        }

        tx.commit().await?;

        Ok(voucher)
    }

    async fn find_voucher(&self, id: Uuid) -> Result<Option<Voucher>, StoreError> {
        Ok(Voucher::find_by_id(&self.pool, id).await?)
    }

    async fn find_voucher_with_revoked(&self, id: Uuid) -> Result<Option<Voucher>, StoreError> {
        Ok(Voucher::find_by_id_with_revoked(&self.pool, id).await?)
    }

    async fn find_voucher_by_code(&self, code: &str) -> Result<Option<Voucher>, StoreError> {
        Ok(Voucher::find_by_code(&self.pool, code).await?)
    }

    async fn merchant_associations(
        &self,
        voucher_id: Uuid,
    ) -> Result<Vec<MerchantVoucher>, StoreError> {
        Ok(MerchantVoucher::list_by_voucher(&self.pool, voucher_id).await?)
    }

    async fn update_voucher(
        &self,
        id: Uuid,
        changes: &VoucherChanges,
        merchant_ids: Option<&[Uuid]>,
    ) -> Result<Option<Voucher>, StoreError> {
        let mut tx = self.pool.begin().await?;

        let Some(voucher) = Voucher::update(&mut tx, id, changes).await? else {
            return Ok(None);
        };

        if let Some(merchant_ids) = merchant_ids {
            MerchantVoucher::sync(&mut tx, voucher.id, merchant_ids, &voucher.voucher_code)
                .await?;
        }

        tx.commit().await?;

        Ok(Some(voucher))
    }

    async fn revoke_voucher(&self, id: Uuid) -> Result<bool, StoreError> {
        Ok(Voucher::soft_delete(&self.pool, id).await?)
    }

    async fn delete_voucher(&self, id: Uuid) -> Result<bool, StoreError> {
        let mut tx = self.pool.begin().await?;

        MerchantVoucher::detach_all(&mut tx, id).await?;
        let deleted = Voucher::hard_delete(&mut tx, id).await?;

        tx.commit().await?;

        Ok(deleted)
    }

    async fn list_vouchers(
        &self,
        sponsor_id: Uuid,
        filter: VoucherFilter,
        page: PageRequest,
    ) -> Result<Page<Voucher>, StoreError> {
        Ok(Voucher::list_for_sponsor(&self.pool, sponsor_id, filter, page).await?)
    }

    async fn list_redeeming_beneficiaries(
        &self,
        sponsor_id: Uuid,
        page: PageRequest,
    ) -> Result<Page<Beneficiary>, StoreError> {
        Ok(Beneficiary::list_redeemers_for_sponsor(&self.pool, sponsor_id, page).await?)
    }

    async fn list_transactions(&self, voucher_id: Uuid) -> Result<Vec<Transaction>, StoreError> {
        Ok(Transaction::list_by_voucher(&self.pool, voucher_id).await?)
    }

    async fn begin(&self) -> Result<Box<dyn UnitOfWork>, StoreError> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgUnitOfWork { tx }))
    }

    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

/// A redemption transaction. Row locks taken by `lock_voucher` are held until
/// commit or rollback; dropping it rolls back.
pub struct PgUnitOfWork {
    tx: sqlx::Transaction<'static, Postgres>,
}

#[async_trait]
impl UnitOfWork for PgUnitOfWork {
    async fn lock_voucher(&mut self, id: Uuid) -> Result<Option<Voucher>, StoreError> {
        Ok(Voucher::lock_for_redemption(&mut self.tx, id).await?)
    }

    async fn save_redemption_state(
        &mut self,
        id: Uuid,
        limit: i32,
        status: VoucherStatus,
    ) -> Result<(), StoreError> {
        Ok(Voucher::set_redemption_state(&mut self.tx, id, limit, status).await?)
    }

    async fn append_transaction(
        &mut self,
        data: &NewTransaction,
    ) -> Result<Transaction, StoreError> {
        Ok(Transaction::insert(&mut self.tx, data).await?)
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.rollback().await?;
        Ok(())
    }
}
