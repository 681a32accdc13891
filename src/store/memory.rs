use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use super::{StoreError, UnitOfWork, VoucherStore};
use crate::models::{
    Beneficiary, MerchantVoucher, NewTransaction, NewVoucher, Page, PageRequest, Transaction,
    Voucher, VoucherChanges, VoucherFilter, VoucherStatus,
};

#[derive(Debug, Clone, Default)]
struct MemoryState {
    sponsors: HashSet<Uuid>,
    merchants: HashSet<Uuid>,
    beneficiaries: Vec<Beneficiary>,
    vouchers: Vec<Voucher>,
    associations: Vec<MerchantVoucher>,
    transactions: Vec<Transaction>,
}

impl MemoryState {
    fn live_voucher_mut(&mut self, id: Uuid) -> Option<&mut Voucher> {
        self.vouchers
            .iter_mut()
            .find(|v| v.id == id && v.deleted_at.is_none())
    }

    fn check_merchants(&self, merchant_ids: &[Uuid]) -> Result<(), StoreError> {
        match merchant_ids.iter().find(|id| !self.merchants.contains(id)) {
            Some(missing) => Err(StoreError::Constraint(format!(
                "merchant {} does not exist",
                missing
            ))),
            None => Ok(()),
        }
    }

    fn sync_associations(&mut self, voucher_id: Uuid, merchant_ids: &[Uuid], code: &str) {
        let now = Utc::now();

        self.associations
            .retain(|a| a.voucher_id != voucher_id || merchant_ids.contains(&a.merchant_id));

        for merchant_id in merchant_ids {
            let existing = self
                .associations
                .iter_mut()
                .find(|a| a.voucher_id == voucher_id && a.merchant_id == *merchant_id);

            match existing {
                Some(association) => {
                    association.voucher_code = Some(code.to_string());
                    association.updated_at = now;
                }
                None => self.associations.push(MerchantVoucher {
                    id: Uuid::new_v4(),
                    voucher_id,
                    merchant_id: *merchant_id,
                    voucher_code: Some(code.to_string()),
                    created_at: now,
                    updated_at: now,
                }),
            }
        }
    }

    fn has_stamped_association(&self, voucher_id: Uuid) -> bool {
        self.associations
            .iter()
            .any(|a| a.voucher_id == voucher_id && a.voucher_code.is_some())
    }
}

fn check_limit(limit: i32) -> Result<(), StoreError> {
    if limit < 0 {
        return Err(StoreError::Constraint(
            "usage_limit must not be negative".to_string(),
        ));
    }
    Ok(())
}

/// In-process store with the same observable semantics as the Postgres one.
///
/// A unit of work holds the single state lock for its whole lifetime and
/// stages its writes on a copy, so redemptions are fully serialized.
#[derive(Clone, Default)]
pub struct MemoryVoucherStore {
    state: Arc<Mutex<MemoryState>>,
    fail_ledger_writes: Arc<AtomicBool>,
}

impl MemoryVoucherStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_sponsor(&self) -> Uuid {
        let id = Uuid::new_v4();
        self.state.lock().await.sponsors.insert(id);
        id
    }

    pub async fn add_merchant(&self) -> Uuid {
        let id = Uuid::new_v4();
        self.state.lock().await.merchants.insert(id);
        id
    }

    pub async fn add_beneficiary(&self, home_state: Option<&str>) -> Uuid {
        let now = Utc::now();
        let beneficiary = Beneficiary {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            state: home_state.map(str::to_string),
            created_at: now,
            updated_at: now,
        };
        let id = beneficiary.id;
        self.state.lock().await.beneficiaries.push(beneficiary);
        id
    }

    /// Makes every subsequent ledger append fail, to exercise rollback paths
    pub fn fail_ledger_writes(&self, fail: bool) {
        self.fail_ledger_writes.store(fail, Ordering::SeqCst);
    }

    /// Number of ledger rows, including those whose voucher was deleted
    pub async fn transaction_count(&self) -> usize {
        self.state.lock().await.transactions.len()
    }
}

#[async_trait]
impl VoucherStore for MemoryVoucherStore {
    async fn insert_voucher(
        &self,
        data: &NewVoucher,
        code: &str,
        merchant_ids: &[Uuid],
    ) -> Result<Voucher, StoreError> {
        let mut state = self.state.lock().await;

        if !state.sponsors.contains(&data.sponsor_id) {
            return Err(StoreError::Constraint(format!(
                "sponsor {} does not exist",
                data.sponsor_id
            )));
        }
        if state.vouchers.iter().any(|v| v.voucher_code == code) {
            return Err(StoreError::DuplicateCode);
        }
        check_limit(data.limit)?;
        state.check_merchants(merchant_ids)?;

        let now = Utc::now();
        let voucher = Voucher {
            id: Uuid::new_v4(),
            voucher_code: code.to_string(),
            sponsor_id: data.sponsor_id,
            purpose: data.purpose.clone(),
            expiry_date: data.expiry_date,
            limit: data.limit,
            voucher_amount: data.voucher_amount,
            amount_per_code: data.amount_per_code,
            location: data.location.clone(),
            voucher_type: data.voucher_type,
            status: VoucherStatus::Unused,
            code_generation_method: data.code_generation_method,
            deleted_at: None,
            created_at: now,
            updated_at: now,
        };

        state.vouchers.push(voucher.clone());
        state.sync_associations(voucher.id, merchant_ids, code);

        Ok(voucher)
    }

    async fn find_voucher(&self, id: Uuid) -> Result<Option<Voucher>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .vouchers
            .iter()
            .find(|v| v.id == id && v.deleted_at.is_none())
            .cloned())
    }

    async fn find_voucher_with_revoked(&self, id: Uuid) -> Result<Option<Voucher>, StoreError> {
        let state = self.state.lock().await;
        Ok(state.vouchers.iter().find(|v| v.id == id).cloned())
    }

    async fn find_voucher_by_code(&self, code: &str) -> Result<Option<Voucher>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .vouchers
            .iter()
            .find(|v| v.voucher_code == code && v.deleted_at.is_none())
            .cloned())
    }

    async fn merchant_associations(
        &self,
        voucher_id: Uuid,
    ) -> Result<Vec<MerchantVoucher>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .associations
            .iter()
            .filter(|a| a.voucher_id == voucher_id)
            .cloned()
            .collect())
    }

    async fn update_voucher(
        &self,
        id: Uuid,
        changes: &VoucherChanges,
        merchant_ids: Option<&[Uuid]>,
    ) -> Result<Option<Voucher>, StoreError> {
        let mut state = self.state.lock().await;

        if let Some(merchant_ids) = merchant_ids {
            state.check_merchants(merchant_ids)?;
        }

        let Some(voucher) = state.live_voucher_mut(id) else {
            return Ok(None);
        };

        let mut updated = voucher.clone();
        changes.apply_to(&mut updated);
        check_limit(updated.limit)?;
        updated.updated_at = Utc::now();
        *voucher = updated.clone();

        if let Some(merchant_ids) = merchant_ids {
            state.sync_associations(id, merchant_ids, &updated.voucher_code);
        }

        Ok(Some(updated))
    }

    async fn revoke_voucher(&self, id: Uuid) -> Result<bool, StoreError> {
        let mut state = self.state.lock().await;
        match state.live_voucher_mut(id) {
            Some(voucher) => {
                let now = Utc::now();
                voucher.deleted_at = Some(now);
                voucher.updated_at = now;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete_voucher(&self, id: Uuid) -> Result<bool, StoreError> {
        let mut state = self.state.lock().await;

        state.associations.retain(|a| a.voucher_id != id);

        let before = state.vouchers.len();
        state.vouchers.retain(|v| v.id != id);
        let deleted = state.vouchers.len() < before;

        for transaction in state.transactions.iter_mut() {
            if transaction.voucher_id == Some(id) {
                transaction.voucher_id = None;
            }
        }

        Ok(deleted)
    }

    async fn list_vouchers(
        &self,
        sponsor_id: Uuid,
        filter: VoucherFilter,
        page: PageRequest,
    ) -> Result<Page<Voucher>, StoreError> {
        let state = self.state.lock().await;

        let mut matching: Vec<Voucher> = state
            .vouchers
            .iter()
            .filter(|v| v.sponsor_id == sponsor_id && v.deleted_at.is_none())
            .filter(|v| filter.matches(v, state.has_stamped_association(v.id)))
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        Ok(Page::from_slice(&matching, page))
    }

    async fn list_redeeming_beneficiaries(
        &self,
        sponsor_id: Uuid,
        page: PageRequest,
    ) -> Result<Page<Beneficiary>, StoreError> {
        let state = self.state.lock().await;

        let sponsor_vouchers: HashSet<Uuid> = state
            .vouchers
            .iter()
            .filter(|v| v.sponsor_id == sponsor_id && v.deleted_at.is_none())
            .map(|v| v.id)
            .collect();

        let mut matching: Vec<Beneficiary> = state
            .beneficiaries
            .iter()
            .filter(|b| {
                state.transactions.iter().any(|t| {
                    t.beneficiary_id == b.id
                        && t.code.is_some()
                        && t.voucher_id.is_some_and(|id| sponsor_vouchers.contains(&id))
                })
            })
            .cloned()
            .collect();
        matching.sort_by(|a, b| a.created_at.cmp(&b.created_at));

        Ok(Page::from_slice(&matching, page))
    }

    async fn list_transactions(&self, voucher_id: Uuid) -> Result<Vec<Transaction>, StoreError> {
        let state = self.state.lock().await;

        let mut transactions: Vec<Transaction> = state
            .transactions
            .iter()
            .filter(|t| t.voucher_id == Some(voucher_id))
            .cloned()
            .collect();
        transactions.reverse();

        Ok(transactions)
    }

    async fn begin(&self) -> Result<Box<dyn UnitOfWork>, StoreError> {
        let guard = self.state.clone().lock_owned().await;
        let working = guard.clone();

        Ok(Box::new(MemoryUnitOfWork {
            guard,
            working,
            fail_ledger_writes: self.fail_ledger_writes.load(Ordering::SeqCst),
        }))
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

struct MemoryUnitOfWork {
    guard: OwnedMutexGuard<MemoryState>,
    working: MemoryState,
    fail_ledger_writes: bool,
}

#[async_trait]
impl UnitOfWork for MemoryUnitOfWork {
    async fn lock_voucher(&mut self, id: Uuid) -> Result<Option<Voucher>, StoreError> {
        Ok(self.working.live_voucher_mut(id).map(|v| v.clone()))
    }

    async fn save_redemption_state(
        &mut self,
        id: Uuid,
        limit: i32,
        status: VoucherStatus,
    ) -> Result<(), StoreError> {
        check_limit(limit)?;

        let voucher = self
            .working
            .live_voucher_mut(id)
            .ok_or_else(|| StoreError::Backend(format!("voucher {} vanished", id)))?;
        voucher.limit = limit;
        voucher.status = status;
        voucher.updated_at = Utc::now();

        Ok(())
    }

    async fn append_transaction(
        &mut self,
        data: &NewTransaction,
    ) -> Result<Transaction, StoreError> {
        if self.fail_ledger_writes {
            return Err(StoreError::Backend("ledger write rejected".to_string()));
        }
        if !self
            .working
            .beneficiaries
            .iter()
            .any(|b| b.id == data.beneficiary_id)
        {
            return Err(StoreError::Constraint(format!(
                "beneficiary {} does not exist",
                data.beneficiary_id
            )));
        }

        let transaction = Transaction {
            id: Uuid::new_v4(),
            voucher_id: Some(data.voucher_id),
            beneficiary_id: data.beneficiary_id,
            merchant_id: data.merchant_id,
            amount: data.amount,
            status: data.status,
            code: Some(data.code.clone()),
            voucher_type: data.voucher_type,
            code_generation_method: data.code_generation_method,
            created_at: Utc::now(),
        };
        self.working.transactions.push(transaction.clone());

        Ok(transaction)
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let MemoryUnitOfWork {
            mut guard, working, ..
        } = *self;
        *guard = working;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{GenerationMethod, VoucherType};
    use rust_decimal::Decimal;

    fn new_voucher(sponsor_id: Uuid, limit: i32) -> NewVoucher {
        NewVoucher {
            sponsor_id,
            purpose: Some("Food support".to_string()),
            expiry_date: None,
            limit,
            voucher_amount: Decimal::new(5_000, 2),
            amount_per_code: Decimal::new(1_000, 2),
            location: None,
            voucher_type: VoucherType::MultipleTime,
            code_generation_method: GenerationMethod::Sms,
        }
    }

    #[tokio::test]
    async fn test_insert_enforces_unique_code_and_foreign_keys() {
        let store = MemoryVoucherStore::new();
        let sponsor_id = store.add_sponsor().await;

        store
            .insert_voucher(&new_voucher(sponsor_id, 3), "CODE000001", &[])
            .await
            .unwrap();

        let duplicate = store
            .insert_voucher(&new_voucher(sponsor_id, 3), "CODE000001", &[])
            .await;
        assert!(matches!(duplicate, Err(StoreError::DuplicateCode)));

        let unknown_sponsor = store
            .insert_voucher(&new_voucher(Uuid::new_v4(), 3), "CODE000002", &[])
            .await;
        assert!(matches!(unknown_sponsor, Err(StoreError::Constraint(_))));

        let unknown_merchant = store
            .insert_voucher(&new_voucher(sponsor_id, 3), "CODE000003", &[Uuid::new_v4()])
            .await;
        assert!(matches!(unknown_merchant, Err(StoreError::Constraint(_))));
    }

    #[tokio::test]
    async fn test_dropped_unit_of_work_discards_writes() {
        let store = MemoryVoucherStore::new();
        let sponsor_id = store.add_sponsor().await;
        let voucher = store
            .insert_voucher(&new_voucher(sponsor_id, 3), "CODE000001", &[])
            .await
            .unwrap();

        {
            let mut unit = store.begin().await.unwrap();
            unit.save_redemption_state(voucher.id, 2, VoucherStatus::Unused)
                .await
                .unwrap();
        }

        let reloaded = store.find_voucher(voucher.id).await.unwrap().unwrap();
        assert_eq!(reloaded.limit, 3);

        let mut unit = store.begin().await.unwrap();
        unit.save_redemption_state(voucher.id, 2, VoucherStatus::Unused)
            .await
            .unwrap();
        unit.commit().await.unwrap();

        let reloaded = store.find_voucher(voucher.id).await.unwrap().unwrap();
        assert_eq!(reloaded.limit, 2);
    }

    #[tokio::test]
    async fn test_hard_delete_keeps_ledger_rows() {
        let store = MemoryVoucherStore::new();
        let sponsor_id = store.add_sponsor().await;
        let beneficiary_id = store.add_beneficiary(Some("Oyo")).await;
        let voucher = store
            .insert_voucher(&new_voucher(sponsor_id, 3), "CODE000001", &[])
            .await
            .unwrap();

        let mut unit = store.begin().await.unwrap();
        unit.append_transaction(&NewTransaction {
            voucher_id: voucher.id,
            beneficiary_id,
            merchant_id: None,
            amount: voucher.amount_per_code,
            status: VoucherStatus::Used,
            code: voucher.voucher_code.clone(),
            voucher_type: voucher.voucher_type,
            code_generation_method: voucher.code_generation_method,
        })
        .await
        .unwrap();
        unit.commit().await.unwrap();

        assert!(store.delete_voucher(voucher.id).await.unwrap());
        assert!(store.list_transactions(voucher.id).await.unwrap().is_empty());
        assert_eq!(store.transaction_count().await, 1);
    }
}
