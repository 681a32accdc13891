use chrono::NaiveDate;
use ring::rand::SystemRandom;
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

use crate::models::{
    GenerationMethod, NewVoucher, Transaction, Voucher, VoucherChanges, VoucherDetails,
    VoucherType,
};
use crate::services::code_generator::{self, CodeGenerationError};
use crate::store::{StoreError, VoucherStore};

/// Attempts at drawing a fresh code before giving up on a create
const MAX_CODE_ATTEMPTS: usize = 5;

const DEFAULT_LIMIT: i32 = 1;

#[derive(thiserror::Error, Debug)]
pub enum VoucherError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Voucher not found")]
    NotFound,

    #[error("Persistence error: {0}")]
    Persistence(#[from] StoreError),

    #[error("Code generation failed: {0}")]
    CodeGeneration(#[from] CodeGenerationError),
}

/// Caller-supplied voucher fields. On create, omitted fields take defaults;
/// on update, omitted fields are left untouched and an explicit `null`
/// clears a nullable field.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VoucherAttributes {
    #[serde(default, deserialize_with = "nullable", skip_serializing_if = "Option::is_none")]
    pub purpose: Option<Option<String>>,
    #[serde(default, deserialize_with = "nullable", skip_serializing_if = "Option::is_none")]
    pub expiry_date: Option<Option<NaiveDate>>,
    pub limit: Option<i32>,
    pub voucher_amount: Option<Decimal>,
    pub amount_per_code: Option<Decimal>,
    #[serde(default, deserialize_with = "nullable", skip_serializing_if = "Option::is_none")]
    pub location: Option<Option<String>>,
    #[serde(rename = "type")]
    pub voucher_type: Option<VoucherType>,
    pub code_generation_method: Option<GenerationMethod>,
}

/// Keeps a present `null` apart from an absent field
fn nullable<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

impl VoucherAttributes {
    fn into_changes(self) -> VoucherChanges {
        VoucherChanges {
            purpose: self.purpose,
            expiry_date: self.expiry_date,
            limit: self.limit,
            voucher_amount: self.voucher_amount,
            amount_per_code: self.amount_per_code,
            location: self.location,
            voucher_type: self.voucher_type,
            code_generation_method: self.code_generation_method,
            status: None,
        }
    }
}

/// A voucher and its redemption ledger
#[derive(Debug, Clone, Serialize)]
pub struct VoucherAudit {
    pub voucher: Voucher,
    pub transactions: Vec<Transaction>,
}

fn validate_limit(limit: i32) -> Result<(), VoucherError> {
    if limit < 0 {
        return Err(VoucherError::Validation(
            "limit must not be negative".to_string(),
        ));
    }
    Ok(())
}

fn validate_amounts(voucher_amount: Decimal, amount_per_code: Decimal) -> Result<(), VoucherError> {
    if voucher_amount.is_sign_negative() || amount_per_code.is_sign_negative() {
        return Err(VoucherError::Validation(
            "amounts must not be negative".to_string(),
        ));
    }
    if amount_per_code > voucher_amount {
        return Err(VoucherError::Validation(
            "amount_per_code must not exceed voucher_amount".to_string(),
        ));
    }
    Ok(())
}

fn validate_location(location: Option<&str>) -> Result<(), VoucherError> {
    if location.is_some_and(|l| l.trim().is_empty()) {
        return Err(VoucherError::Validation(
            "location must not be blank".to_string(),
        ));
    }
    Ok(())
}

/// Collapses repeated merchant ids, keeping first-seen order
fn dedup_merchants(merchant_ids: &[Uuid]) -> Vec<Uuid> {
    let mut unique = Vec::with_capacity(merchant_ids.len());
    for id in merchant_ids {
        if !unique.contains(id) {
            unique.push(*id);
        }
    }
    unique
}

async fn load_details(
    store: &dyn VoucherStore,
    voucher: Voucher,
) -> Result<VoucherDetails, VoucherError> {
    let merchants = store.merchant_associations(voucher.id).await?;
    Ok(VoucherDetails { voucher, merchants })
}

/// Creates a voucher with a fresh unique code and distributes it to `merchant_ids`
#[tracing::instrument(skip(store, rng, attributes, merchant_ids), fields(merchant_count = merchant_ids.len()))]
pub async fn create_voucher(
    store: &dyn VoucherStore,
    rng: &SystemRandom,
    sponsor_id: Option<Uuid>,
    attributes: VoucherAttributes,
    merchant_ids: &[Uuid],
) -> Result<VoucherDetails, VoucherError> {
    let sponsor_id =
        sponsor_id.ok_or_else(|| VoucherError::Validation("sponsor_id is required".to_string()))?;
    let voucher_amount = attributes
        .voucher_amount
        .ok_or_else(|| VoucherError::Validation("voucher_amount is required".to_string()))?;
    let amount_per_code = attributes
        .amount_per_code
        .ok_or_else(|| VoucherError::Validation("amount_per_code is required".to_string()))?;
    let limit = attributes.limit.unwrap_or(DEFAULT_LIMIT);
    let location = attributes.location.flatten();

    validate_limit(limit)?;
    validate_amounts(voucher_amount, amount_per_code)?;
    validate_location(location.as_deref())?;

    let data = NewVoucher {
        sponsor_id,
        purpose: attributes.purpose.flatten(),
        expiry_date: attributes.expiry_date.flatten(),
        limit,
        voucher_amount,
        amount_per_code,
        location,
        voucher_type: attributes.voucher_type.unwrap_or(VoucherType::OneTime),
        code_generation_method: attributes
            .code_generation_method
            .unwrap_or(GenerationMethod::QrCode),
    };
    let merchant_ids = dedup_merchants(merchant_ids);

    for attempt in 1..=MAX_CODE_ATTEMPTS {
        let code = code_generator::generate_code(rng)?;

        match store.insert_voucher(&data, &code, &merchant_ids).await {
            Ok(voucher) => {
                tracing::info!(
                    voucher_id = %voucher.id,
                    voucher_code = %voucher.voucher_code,
                    sponsor_id = %sponsor_id,
                    "Voucher created"
                );
                return load_details(store, voucher).await;
            }
            Err(StoreError::DuplicateCode) => {
                tracing::warn!(attempt, "Voucher code collision, regenerating");
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to create voucher");
                return Err(e.into());
            }
        }
    }

    Err(VoucherError::Persistence(StoreError::DuplicateCode))
}

/// Applies a partial update. When `merchant_ids` is given it replaces the
/// full association set; merchants left out lose their association.
/// Changing the limit or type re-derives the status from the merged record.
#[tracing::instrument(skip(store, attributes, merchant_ids))]
pub async fn update_voucher(
    store: &dyn VoucherStore,
    voucher_id: Uuid,
    attributes: VoucherAttributes,
    merchant_ids: Option<&[Uuid]>,
) -> Result<VoucherDetails, VoucherError> {
    let current = store
        .find_voucher(voucher_id)
        .await?
        .ok_or(VoucherError::NotFound)?;

    let mut changes = attributes.into_changes();
    let mut merged = current;
    changes.apply_to(&mut merged);

    validate_limit(merged.limit)?;
    validate_amounts(merged.voucher_amount, merged.amount_per_code)?;
    validate_location(merged.location.as_deref())?;

    if changes.limit.is_some() || changes.voucher_type.is_some() {
        changes.status = Some(merged.derived_status());
    }

    let merchant_ids = merchant_ids.map(dedup_merchants);

    let voucher = store
        .update_voucher(voucher_id, &changes, merchant_ids.as_deref())
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Failed to update voucher");
            VoucherError::from(e)
        })?
        .ok_or(VoucherError::NotFound)?;

    tracing::info!(
        voucher_id = %voucher.id,
        merchants_replaced = merchant_ids.is_some(),
        "Voucher updated"
    );

    load_details(store, voucher).await
}

/// Soft-deletes a voucher; it stays readable for audit
#[tracing::instrument(skip(store))]
pub async fn revoke_voucher(store: &dyn VoucherStore, voucher_id: Uuid) -> Result<(), VoucherError> {
    if !store.revoke_voucher(voucher_id).await? {
        return Err(VoucherError::NotFound);
    }

    tracing::info!(voucher_id = %voucher_id, "Voucher revoked");
    Ok(())
}

/// Detaches all merchants and permanently removes a voucher, revoked or not
#[tracing::instrument(skip(store))]
pub async fn delete_voucher(store: &dyn VoucherStore, voucher_id: Uuid) -> Result<(), VoucherError> {
    if !store.delete_voucher(voucher_id).await? {
        return Err(VoucherError::NotFound);
    }

    tracing::info!(voucher_id = %voucher_id, "Voucher permanently deleted");
    Ok(())
}

pub async fn get_voucher(
    store: &dyn VoucherStore,
    voucher_id: Uuid,
) -> Result<VoucherDetails, VoucherError> {
    let voucher = store
        .find_voucher(voucher_id)
        .await?
        .ok_or(VoucherError::NotFound)?;

    load_details(store, voucher).await
}

pub async fn find_voucher_by_code(
    store: &dyn VoucherStore,
    code: &str,
) -> Result<VoucherDetails, VoucherError> {
    let voucher = store
        .find_voucher_by_code(code)
        .await?
        .ok_or(VoucherError::NotFound)?;

    load_details(store, voucher).await
}

/// Loads a voucher (revoked included) with its ledger, newest first
pub async fn voucher_audit(
    store: &dyn VoucherStore,
    voucher_id: Uuid,
) -> Result<VoucherAudit, VoucherError> {
    let voucher = store
        .find_voucher_with_revoked(voucher_id)
        .await?
        .ok_or(VoucherError::NotFound)?;
    let transactions = store.list_transactions(voucher_id).await?;

    Ok(VoucherAudit {
        voucher,
        transactions,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::VoucherStatus;
    use crate::services::code_generator::is_well_formed;
    use crate::services::geolocation::FixedLocation;
    use crate::services::redemption::{redeem_voucher, RedeemRequest, RedemptionOutcome};
    use crate::store::MemoryVoucherStore;

    fn attributes(limit: i32) -> VoucherAttributes {
        VoucherAttributes {
            purpose: Some(Some("School supplies".to_string())),
            limit: Some(limit),
            voucher_amount: Some(Decimal::new(30_000, 2)),
            amount_per_code: Some(Decimal::new(10_000, 2)),
            voucher_type: Some(VoucherType::MultipleTime),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_create_then_find_by_code_round_trips() {
        let store = MemoryVoucherStore::new();
        let rng = SystemRandom::new();
        let sponsor_id = store.add_sponsor().await;
        let merchant_a = store.add_merchant().await;
        let merchant_b = store.add_merchant().await;

        let created = create_voucher(
            &store,
            &rng,
            Some(sponsor_id),
            attributes(3),
            &[merchant_a, merchant_b, merchant_a],
        )
        .await
        .unwrap();

        assert!(is_well_formed(&created.voucher.voucher_code));
        assert_eq!(created.voucher.status, VoucherStatus::Unused);

        let fetched = find_voucher_by_code(&store, &created.voucher.voucher_code)
            .await
            .unwrap();

        assert_eq!(fetched.voucher.id, created.voucher.id);
        assert_eq!(fetched.voucher.limit, 3);
        assert_eq!(fetched.voucher.amount_per_code, Decimal::new(10_000, 2));
        assert_eq!(fetched.merchants, created.merchants);

        let mut merchant_ids: Vec<Uuid> = fetched.merchants.iter().map(|m| m.merchant_id).collect();
        merchant_ids.sort();
        let mut expected = vec![merchant_a, merchant_b];
        expected.sort();
        assert_eq!(merchant_ids, expected);
        assert!(fetched
            .merchants
            .iter()
            .all(|m| m.voucher_code.as_deref() == Some(created.voucher.voucher_code.as_str())));
    }

    #[tokio::test]
    async fn test_create_applies_defaults() {
        let store = MemoryVoucherStore::new();
        let sponsor_id = store.add_sponsor().await;

        let created = create_voucher(
            &store,
            &SystemRandom::new(),
            Some(sponsor_id),
            VoucherAttributes {
                voucher_amount: Some(Decimal::new(500, 0)),
                amount_per_code: Some(Decimal::new(500, 0)),
                ..Default::default()
            },
            &[],
        )
        .await
        .unwrap();

        assert_eq!(created.voucher.limit, 1);
        assert_eq!(created.voucher.voucher_type, VoucherType::OneTime);
        assert_eq!(
            created.voucher.code_generation_method,
            GenerationMethod::QrCode
        );
        assert!(created.merchants.is_empty());
    }

    #[tokio::test]
    async fn test_create_requires_sponsor_and_valid_amounts() {
        let store = MemoryVoucherStore::new();
        let rng = SystemRandom::new();
        let sponsor_id = store.add_sponsor().await;

        let missing_sponsor = create_voucher(&store, &rng, None, attributes(1), &[]).await;
        assert!(matches!(missing_sponsor, Err(VoucherError::Validation(_))));

        let mut negative_limit = attributes(1);
        negative_limit.limit = Some(-1);
        let result = create_voucher(&store, &rng, Some(sponsor_id), negative_limit, &[]).await;
        assert!(matches!(result, Err(VoucherError::Validation(_))));

        let mut oversized = attributes(1);
        oversized.amount_per_code = Some(Decimal::new(50_000, 2));
        let result = create_voucher(&store, &rng, Some(sponsor_id), oversized, &[]).await;
        assert!(matches!(result, Err(VoucherError::Validation(_))));

        let mut blank_location = attributes(1);
        blank_location.location = Some(Some("   ".to_string()));
        let result = create_voucher(&store, &rng, Some(sponsor_id), blank_location, &[]).await;
        assert!(matches!(result, Err(VoucherError::Validation(_))));
    }

    #[tokio::test]
    async fn test_create_with_unknown_merchant_is_persistence_error() {
        let store = MemoryVoucherStore::new();
        let sponsor_id = store.add_sponsor().await;

        let result = create_voucher(
            &store,
            &SystemRandom::new(),
            Some(sponsor_id),
            attributes(1),
            &[Uuid::new_v4()],
        )
        .await;

        assert!(matches!(
            result,
            Err(VoucherError::Persistence(StoreError::Constraint(_)))
        ));
    }

    #[tokio::test]
    async fn test_update_is_partial_and_syncs_merchants() {
        let store = MemoryVoucherStore::new();
        let rng = SystemRandom::new();
        let sponsor_id = store.add_sponsor().await;
        let merchant_a = store.add_merchant().await;
        let merchant_b = store.add_merchant().await;
        let merchant_c = store.add_merchant().await;

        let created = create_voucher(
            &store,
            &rng,
            Some(sponsor_id),
            attributes(3),
            &[merchant_a, merchant_b],
        )
        .await
        .unwrap();

        let updated = update_voucher(
            &store,
            created.voucher.id,
            VoucherAttributes {
                location: Some(Some("Oyo".to_string())),
                ..Default::default()
            },
            None,
        )
        .await
        .unwrap();

        assert_eq!(updated.voucher.location.as_deref(), Some("Oyo"));
        assert_eq!(updated.voucher.limit, 3);
        assert_eq!(updated.voucher.purpose.as_deref(), Some("School supplies"));
        assert_eq!(updated.voucher.voucher_code, created.voucher.voucher_code);
        assert_eq!(updated.merchants.len(), 2);

        let synced = update_voucher(
            &store,
            created.voucher.id,
            VoucherAttributes::default(),
            Some(&[merchant_b, merchant_c]),
        )
        .await
        .unwrap();

        let mut merchant_ids: Vec<Uuid> = synced.merchants.iter().map(|m| m.merchant_id).collect();
        merchant_ids.sort();
        let mut expected = vec![merchant_b, merchant_c];
        expected.sort();
        assert_eq!(merchant_ids, expected);

        let cleared = update_voucher(
            &store,
            created.voucher.id,
            VoucherAttributes::default(),
            Some(&[]),
        )
        .await
        .unwrap();
        assert!(cleared.merchants.is_empty());
    }

    #[tokio::test]
    async fn test_update_missing_or_revoked_is_not_found() {
        let store = MemoryVoucherStore::new();
        let sponsor_id = store.add_sponsor().await;

        let missing = update_voucher(&store, Uuid::new_v4(), attributes(1), None).await;
        assert!(matches!(missing, Err(VoucherError::NotFound)));

        let created = create_voucher(
            &store,
            &SystemRandom::new(),
            Some(sponsor_id),
            attributes(1),
            &[],
        )
        .await
        .unwrap();
        revoke_voucher(&store, created.voucher.id).await.unwrap();

        let revoked = update_voucher(&store, created.voucher.id, attributes(2), None).await;
        assert!(matches!(revoked, Err(VoucherError::NotFound)));
    }

    #[tokio::test]
    async fn test_update_with_unknown_merchant_leaves_voucher_unchanged() {
        let store = MemoryVoucherStore::new();
        let sponsor_id = store.add_sponsor().await;
        let merchant = store.add_merchant().await;

        let created = create_voucher(
            &store,
            &SystemRandom::new(),
            Some(sponsor_id),
            attributes(1),
            &[merchant],
        )
        .await
        .unwrap();

        let result = update_voucher(
            &store,
            created.voucher.id,
            VoucherAttributes {
                limit: Some(9),
                ..Default::default()
            },
            Some(&[Uuid::new_v4()]),
        )
        .await;
        assert!(matches!(
            result,
            Err(VoucherError::Persistence(StoreError::Constraint(_)))
        ));

        let current = get_voucher(&store, created.voucher.id).await.unwrap();
        assert_eq!(current.voucher.limit, 1);
        assert_eq!(current.merchants.len(), 1);
    }

    async fn redeem_once(
        store: &MemoryVoucherStore,
        code: &str,
        location: &str,
    ) -> RedemptionOutcome {
        let beneficiary_id = store.add_beneficiary(None).await;
        redeem_voucher(
            store,
            &FixedLocation::new(location),
            RedeemRequest {
                code: code.to_string(),
                address: "203.0.113.9".parse().unwrap(),
                beneficiary_id,
                merchant_id: None,
            },
        )
        .await
    }

    #[tokio::test]
    async fn test_topping_up_used_one_time_voucher_makes_it_redeemable() {
        let store = MemoryVoucherStore::new();
        let sponsor_id = store.add_sponsor().await;
        let mut one_time = attributes(1);
        one_time.voucher_type = Some(VoucherType::OneTime);

        let created = create_voucher(
            &store,
            &SystemRandom::new(),
            Some(sponsor_id),
            one_time,
            &[],
        )
        .await
        .unwrap();
        let code = created.voucher.voucher_code.clone();
        assert!(redeem_once(&store, &code, "Lagos").await.is_success());
        let spent = get_voucher(&store, created.voucher.id).await.unwrap();
        assert_eq!(spent.voucher.status, VoucherStatus::Used);

        let topped_up = update_voucher(
            &store,
            created.voucher.id,
            VoucherAttributes {
                limit: Some(5),
                ..Default::default()
            },
            None,
        )
        .await
        .unwrap();
        assert_eq!(topped_up.voucher.limit, 5);
        assert_eq!(topped_up.voucher.status, VoucherStatus::Unused);

        assert!(redeem_once(&store, &code, "Lagos").await.is_success());
    }

    #[tokio::test]
    async fn test_zeroing_one_time_voucher_marks_it_used() {
        let store = MemoryVoucherStore::new();
        let sponsor_id = store.add_sponsor().await;
        let mut one_time = attributes(3);
        one_time.voucher_type = Some(VoucherType::OneTime);

        let created = create_voucher(
            &store,
            &SystemRandom::new(),
            Some(sponsor_id),
            one_time,
            &[],
        )
        .await
        .unwrap();

        let zeroed = update_voucher(
            &store,
            created.voucher.id,
            VoucherAttributes {
                limit: Some(0),
                ..Default::default()
            },
            None,
        )
        .await
        .unwrap();
        assert_eq!(zeroed.voucher.status, VoucherStatus::Used);

        let outcome = redeem_once(&store, &created.voucher.voucher_code, "Lagos").await;
        assert!(matches!(outcome, RedemptionOutcome::AlreadyUsed));

        // Switching to multiple_time keeps the zero limit but drops the used flag
        let switched = update_voucher(
            &store,
            created.voucher.id,
            VoucherAttributes {
                voucher_type: Some(VoucherType::MultipleTime),
                ..Default::default()
            },
            None,
        )
        .await
        .unwrap();
        assert_eq!(switched.voucher.status, VoucherStatus::Unused);
        assert_eq!(switched.voucher.limit, 0);
    }

    #[tokio::test]
    async fn test_update_can_clear_location_and_expiry() {
        let store = MemoryVoucherStore::new();
        let sponsor_id = store.add_sponsor().await;
        let mut constrained = attributes(2);
        constrained.location = Some(Some("Lagos".to_string()));
        constrained.expiry_date = Some(NaiveDate::from_ymd_opt(2020, 1, 1));

        let created = create_voucher(
            &store,
            &SystemRandom::new(),
            Some(sponsor_id),
            constrained,
            &[],
        )
        .await
        .unwrap();
        let code = created.voucher.voucher_code.clone();
        assert!(matches!(
            redeem_once(&store, &code, "Abuja").await,
            RedemptionOutcome::Expired
        ));

        let changes: VoucherAttributes =
            serde_json::from_value(serde_json::json!({ "location": null, "expiry_date": null }))
                .unwrap();
        let cleared = update_voucher(&store, created.voucher.id, changes, None)
            .await
            .unwrap();

        assert_eq!(cleared.voucher.location, None);
        assert_eq!(cleared.voucher.expiry_date, None);
        assert_eq!(cleared.voucher.purpose.as_deref(), Some("School supplies"));
        assert!(redeem_once(&store, &code, "Abuja").await.is_success());
    }

    #[test]
    fn test_attributes_tell_null_from_absent() {
        let absent: VoucherAttributes = serde_json::from_str(r#"{"limit": 2}"#).unwrap();
        assert_eq!(absent.location, None);
        assert_eq!(absent.expiry_date, None);

        let cleared: VoucherAttributes =
            serde_json::from_str(r#"{"location": null, "purpose": "Rent"}"#).unwrap();
        assert_eq!(cleared.location, Some(None));
        assert_eq!(cleared.purpose, Some(Some("Rent".to_string())));
    }

    #[tokio::test]
    async fn test_revoke_hides_voucher_but_keeps_it_for_audit() {
        let store = MemoryVoucherStore::new();
        let sponsor_id = store.add_sponsor().await;
        let merchant = store.add_merchant().await;

        let created = create_voucher(
            &store,
            &SystemRandom::new(),
            Some(sponsor_id),
            attributes(1),
            &[merchant],
        )
        .await
        .unwrap();

        revoke_voucher(&store, created.voucher.id).await.unwrap();

        assert!(matches!(
            get_voucher(&store, created.voucher.id).await,
            Err(VoucherError::NotFound)
        ));
        assert!(matches!(
            find_voucher_by_code(&store, &created.voucher.voucher_code).await,
            Err(VoucherError::NotFound)
        ));
        assert!(matches!(
            revoke_voucher(&store, created.voucher.id).await,
            Err(VoucherError::NotFound)
        ));

        let audit = voucher_audit(&store, created.voucher.id).await.unwrap();
        assert!(audit.voucher.is_deleted());
        assert_eq!(
            store.merchant_associations(created.voucher.id).await.unwrap().len(),
            1
        );
    }

    #[tokio::test]
    async fn test_delete_removes_voucher_and_associations() {
        let store = MemoryVoucherStore::new();
        let sponsor_id = store.add_sponsor().await;
        let merchant = store.add_merchant().await;

        let created = create_voucher(
            &store,
            &SystemRandom::new(),
            Some(sponsor_id),
            attributes(1),
            &[merchant],
        )
        .await
        .unwrap();

        delete_voucher(&store, created.voucher.id).await.unwrap();

        assert!(store
            .merchant_associations(created.voucher.id)
            .await
            .unwrap()
            .is_empty());
        assert!(matches!(
            voucher_audit(&store, created.voucher.id).await,
            Err(VoucherError::NotFound)
        ));
        assert!(matches!(
            delete_voucher(&store, created.voucher.id).await,
            Err(VoucherError::NotFound)
        ));
    }
}
