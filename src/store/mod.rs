//! Persistence seam for vouchers, their merchant associations and the
//! redemption ledger.
//!
//! Lifecycle and reporting calls are independent statements. Redemption goes
//! through a [`UnitOfWork`]: everything done on it becomes visible only on
//! [`UnitOfWork::commit`], and dropping it without committing discards it.

use async_trait::async_trait;
use uuid::Uuid;

use crate::models::{
    Beneficiary, MerchantVoucher, NewTransaction, NewVoucher, Page, PageRequest, Transaction,
    Voucher, VoucherChanges, VoucherFilter, VoucherStatus,
};

pub mod memory;
pub mod postgres;

pub use memory::MemoryVoucherStore;
pub use postgres::PgVoucherStore;

#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("Voucher code already exists")]
    DuplicateCode,

    #[error("Constraint violation: {0}")]
    Constraint(String),

    #[error("Database error: {0}")]
    Database(sqlx::Error),

    #[error("Storage backend error: {0}")]
    Backend(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db_err) = &err {
            if db_err.is_unique_violation()
                && db_err.constraint() == Some("vouchers_voucher_code_key")
            {
                return StoreError::DuplicateCode;
            }
            if db_err.is_unique_violation()
                || db_err.is_foreign_key_violation()
                || db_err.is_check_violation()
            {
                return StoreError::Constraint(db_err.message().to_string());
            }
        }
        StoreError::Database(err)
    }
}

#[async_trait]
pub trait VoucherStore: Send + Sync {
    /// Inserts a voucher and stamps each merchant association with its code.
    /// Fails with [`StoreError::DuplicateCode`] if the code is taken.
    async fn insert_voucher(
        &self,
        data: &NewVoucher,
        code: &str,
        merchant_ids: &[Uuid],
    ) -> Result<Voucher, StoreError>;

    /// Live (non-revoked) voucher by ID
    async fn find_voucher(&self, id: Uuid) -> Result<Option<Voucher>, StoreError>;

    /// Voucher by ID, revoked or not
    async fn find_voucher_with_revoked(&self, id: Uuid) -> Result<Option<Voucher>, StoreError>;

    /// Live voucher by exact code
    async fn find_voucher_by_code(&self, code: &str) -> Result<Option<Voucher>, StoreError>;

    async fn merchant_associations(&self, voucher_id: Uuid)
        -> Result<Vec<MerchantVoucher>, StoreError>;

    /// Applies a partial update to a live voucher. When `merchant_ids` is given
    /// the association set is replaced by it. Returns `None` if no live voucher matched.
    async fn update_voucher(
        &self,
        id: Uuid,
        changes: &VoucherChanges,
        merchant_ids: Option<&[Uuid]>,
    ) -> Result<Option<Voucher>, StoreError>;

    /// Marks a live voucher revoked; false if none matched
    async fn revoke_voucher(&self, id: Uuid) -> Result<bool, StoreError>;

    /// Detaches merchants and removes the voucher row; false if none matched
    async fn delete_voucher(&self, id: Uuid) -> Result<bool, StoreError>;

    async fn list_vouchers(
        &self,
        sponsor_id: Uuid,
        filter: VoucherFilter,
        page: PageRequest,
    ) -> Result<Page<Voucher>, StoreError>;

    async fn list_redeeming_beneficiaries(
        &self,
        sponsor_id: Uuid,
        page: PageRequest,
    ) -> Result<Page<Beneficiary>, StoreError>;

    async fn list_transactions(&self, voucher_id: Uuid) -> Result<Vec<Transaction>, StoreError>;

    /// Opens an atomic unit of work for a redemption
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>, StoreError>;

    /// Cheap connectivity check
    async fn ping(&self) -> Result<(), StoreError>;
}

#[async_trait]
pub trait UnitOfWork: Send {
    /// Re-reads a live voucher and locks it against concurrent redemptions
    async fn lock_voucher(&mut self, id: Uuid) -> Result<Option<Voucher>, StoreError>;

    async fn save_redemption_state(
        &mut self,
        id: Uuid,
        limit: i32,
        status: VoucherStatus,
    ) -> Result<(), StoreError>;

    async fn append_transaction(&mut self, data: &NewTransaction)
        -> Result<Transaction, StoreError>;

    async fn commit(self: Box<Self>) -> Result<(), StoreError>;

    async fn rollback(self: Box<Self>) -> Result<(), StoreError>;
}
