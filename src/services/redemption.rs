use std::net::IpAddr;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::models::{NewTransaction, Transaction, Voucher, VoucherStatus};
use crate::services::code_generator;
use crate::services::geolocation::LocationResolver;
use crate::store::{StoreError, UnitOfWork, VoucherStore};

/// A redemption attempt by an authenticated beneficiary
#[derive(Debug, Clone)]
pub struct RedeemRequest {
    pub code: String,
    pub address: IpAddr,
    pub beneficiary_id: Uuid,
    /// Merchant at which the voucher is being redeemed, if known
    pub merchant_id: Option<Uuid>,
}

/// Result of a redemption attempt. Every variant other than `Redeemed`
/// leaves the voucher unchanged.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum RedemptionOutcome {
    Redeemed {
        voucher: Voucher,
        transaction: Transaction,
    },
    VoucherNotFound,
    Expired,
    AlreadyUsed,
    LocationMismatch {
        required: String,
        resolved: String,
    },
    MerchantNotAssociated,
    NoneAvailable,
    RedemptionFailed,
}

impl RedemptionOutcome {
    /// Returns the result type as a string for logging
    pub fn result_type(&self) -> &'static str {
        match self {
            RedemptionOutcome::Redeemed { .. } => "redeemed",
            RedemptionOutcome::VoucherNotFound => "voucher_not_found",
            RedemptionOutcome::Expired => "expired",
            RedemptionOutcome::AlreadyUsed => "already_used",
            RedemptionOutcome::LocationMismatch { .. } => "location_mismatch",
            RedemptionOutcome::MerchantNotAssociated => "merchant_not_associated",
            RedemptionOutcome::NoneAvailable => "none_available",
            RedemptionOutcome::RedemptionFailed => "redemption_failed",
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, RedemptionOutcome::Redeemed { .. })
    }
}

/// Redeems a voucher code for a beneficiary
pub async fn redeem_voucher(
    store: &dyn VoucherStore,
    locator: &dyn LocationResolver,
    request: RedeemRequest,
) -> RedemptionOutcome {
    redeem_voucher_at(store, locator, request, Utc::now()).await
}

/// Redeems a voucher code, evaluating expiry against `now`.
///
/// Checks run in order and stop at the first rejection:
/// 1. Look up the live voucher by code
/// 2. Reject if expired
/// 3. Reject a one-time voucher already flagged used
/// 4. Reject on a location or merchant mismatch
/// 5. Re-read the voucher under lock and reject if no uses remain
/// 6. Decrement the limit, flipping a spent one-time voucher to used
/// 7. Append the ledger transaction
/// 8. Commit
///
/// Steps 5 to 8 share one unit of work; any storage failure there rolls it
/// back and yields `RedemptionFailed`.
#[tracing::instrument(
    skip(store, locator, request),
    fields(code = %request.code, beneficiary_id = %request.beneficiary_id)
)]
pub async fn redeem_voucher_at(
    store: &dyn VoucherStore,
    locator: &dyn LocationResolver,
    request: RedeemRequest,
    now: DateTime<Utc>,
) -> RedemptionOutcome {
    let outcome = run_checks_and_redeem(store, locator, &request, now).await;

    match &outcome {
        RedemptionOutcome::Redeemed {
            voucher,
            transaction,
        } => tracing::info!(
            voucher_id = %voucher.id,
            transaction_id = %transaction.id,
            remaining = voucher.limit,
            "Voucher redeemed"
        ),
        RedemptionOutcome::RedemptionFailed => {
            tracing::error!(result = outcome.result_type(), "Redemption failed")
        }
        rejected => tracing::warn!(result = rejected.result_type(), "Redemption rejected"),
    }

    outcome
}

async fn run_checks_and_redeem(
    store: &dyn VoucherStore,
    locator: &dyn LocationResolver,
    request: &RedeemRequest,
    now: DateTime<Utc>,
) -> RedemptionOutcome {
    // 1. Lookup
    if !code_generator::is_well_formed(&request.code) {
        tracing::debug!("Code is not well formed");
        return RedemptionOutcome::VoucherNotFound;
    }

    let voucher = match store.find_voucher_by_code(&request.code).await {
        Ok(Some(voucher)) => voucher,
        Ok(None) => return RedemptionOutcome::VoucherNotFound,
        Err(e) => {
            tracing::error!(error = %e, "Voucher lookup failed");
            return RedemptionOutcome::RedemptionFailed;
        }
    };

    // 2. Expiry
    if voucher.is_expired_at(now) {
        return RedemptionOutcome::Expired;
    }

    // 3. One-time reuse
    if voucher.is_used_up() {
        return RedemptionOutcome::AlreadyUsed;
    }

    // 4. Location, resolved outside any lock
    if let Some(required) = voucher.location.as_deref() {
        let resolved = locator.resolve(request.address).await;
        if resolved != required {
            return RedemptionOutcome::LocationMismatch {
                required: required.to_string(),
                resolved,
            };
        }
    }

    let merchant_id = match attribute_merchant(store, &voucher, request.merchant_id).await {
        Ok(Some(attribution)) => attribution,
        Ok(None) => return RedemptionOutcome::MerchantNotAssociated,
        Err(e) => {
            tracing::error!(error = %e, "Merchant association lookup failed");
            return RedemptionOutcome::RedemptionFailed;
        }
    };

    // 5-8. Atomic decrement and record
    let mut unit = match store.begin().await {
        Ok(unit) => unit,
        Err(e) => {
            tracing::error!(error = %e, "Failed to open unit of work");
            return RedemptionOutcome::RedemptionFailed;
        }
    };

    let consumed = consume_use(&mut *unit, voucher.id, request.beneficiary_id, merchant_id).await;

    match consumed {
        Ok(outcome @ RedemptionOutcome::Redeemed { .. }) => match unit.commit().await {
            Ok(()) => outcome,
            Err(e) => {
                tracing::error!(error = %e, "Failed to commit redemption");
                RedemptionOutcome::RedemptionFailed
            }
        },
        Ok(rejected) => {
            discard(unit).await;
            rejected
        }
        Err(e) => {
            tracing::error!(error = %e, voucher_id = %voucher.id, "Redemption rolled back");
            discard(unit).await;
            RedemptionOutcome::RedemptionFailed
        }
    }
}

/// Resolves which merchant the ledger row is attributed to.
///
/// An explicit merchant must be associated with the voucher (`Ok(None)` when
/// it is not). Without one, a voucher distributed to exactly one merchant is
/// attributed to it; otherwise the attribution is left empty.
async fn attribute_merchant(
    store: &dyn VoucherStore,
    voucher: &Voucher,
    requested: Option<Uuid>,
) -> Result<Option<Option<Uuid>>, StoreError> {
    let associations = store.merchant_associations(voucher.id).await?;

    match requested {
        Some(merchant_id) => Ok(associations
            .iter()
            .any(|a| a.merchant_id == merchant_id)
            .then_some(Some(merchant_id))),
        None => match associations.as_slice() {
            [only] => Ok(Some(Some(only.merchant_id))),
            _ => Ok(Some(None)),
        },
    }
}

async fn consume_use(
    unit: &mut dyn UnitOfWork,
    voucher_id: Uuid,
    beneficiary_id: Uuid,
    merchant_id: Option<Uuid>,
) -> Result<RedemptionOutcome, StoreError> {
    // Authoritative re-read; the earlier copy may be stale
    let Some(mut voucher) = unit.lock_voucher(voucher_id).await? else {
        return Ok(RedemptionOutcome::VoucherNotFound);
    };

    if voucher.apply_redemption().is_err() {
        return Ok(RedemptionOutcome::NoneAvailable);
    }

    unit.save_redemption_state(voucher.id, voucher.limit, voucher.status)
        .await?;

    let transaction = unit
        .append_transaction(&NewTransaction {
            voucher_id: voucher.id,
            beneficiary_id,
            merchant_id,
            amount: voucher.amount_per_code,
            status: VoucherStatus::Used,
            code: voucher.voucher_code.clone(),
            voucher_type: voucher.voucher_type,
            code_generation_method: voucher.code_generation_method,
        })
        .await?;

    Ok(RedemptionOutcome::Redeemed {
        voucher,
        transaction,
    })
}

async fn discard(unit: Box<dyn UnitOfWork>) {
    if let Err(e) = unit.rollback().await {
        tracing::warn!(error = %e, "Rollback failed");
    }
}
