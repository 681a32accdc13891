use chrono::{NaiveDate, NaiveTime};
use uuid::Uuid;

use crate::models::{Beneficiary, Page, PageRequest, Voucher, VoucherFilter};
use crate::services::lifecycle::VoucherError;
use crate::store::VoucherStore;

pub async fn vouchers_by_sponsor(
    store: &dyn VoucherStore,
    sponsor_id: Uuid,
    page: PageRequest,
) -> Result<Page<Voucher>, VoucherError> {
    Ok(store.list_vouchers(sponsor_id, VoucherFilter::All, page).await?)
}

/// Vouchers created within `[start, end]`, both days inclusive (UTC)
#[tracing::instrument(skip(store))]
pub async fn vouchers_by_date_range(
    store: &dyn VoucherStore,
    sponsor_id: Uuid,
    start: NaiveDate,
    end: NaiveDate,
    page: PageRequest,
) -> Result<Page<Voucher>, VoucherError> {
    if start > end {
        return Err(VoucherError::Validation(
            "start_date must not be after end_date".to_string(),
        ));
    }

    let filter = VoucherFilter::CreatedBetween {
        from: start.and_time(NaiveTime::MIN).and_utc(),
        to: end
            .and_hms_nano_opt(23, 59, 59, 999_999_999)
            .unwrap_or_else(|| end.and_time(NaiveTime::MIN))
            .and_utc(),
    };

    Ok(store.list_vouchers(sponsor_id, filter, page).await?)
}

/// Vouchers with status `used`, plus multi-use vouchers with no uses left
pub async fn used_vouchers(
    store: &dyn VoucherStore,
    sponsor_id: Uuid,
    page: PageRequest,
) -> Result<Page<Voucher>, VoucherError> {
    Ok(store.list_vouchers(sponsor_id, VoucherFilter::Used, page).await?)
}

/// Vouchers distributed to at least one merchant with a stamped code
pub async fn redeemed_vouchers(
    store: &dyn VoucherStore,
    sponsor_id: Uuid,
    page: PageRequest,
) -> Result<Page<Voucher>, VoucherError> {
    Ok(store
        .list_vouchers(sponsor_id, VoucherFilter::Distributed, page)
        .await?)
}

/// Vouchers still redeemable: status `unused` with uses left
pub async fn pending_vouchers(
    store: &dyn VoucherStore,
    sponsor_id: Uuid,
    page: PageRequest,
) -> Result<Page<Voucher>, VoucherError> {
    Ok(store
        .list_vouchers(sponsor_id, VoucherFilter::Pending, page)
        .await?)
}

pub async fn beneficiaries_with_redemptions(
    store: &dyn VoucherStore,
    sponsor_id: Uuid,
    page: PageRequest,
) -> Result<Page<Beneficiary>, VoucherError> {
    Ok(store.list_redeeming_beneficiaries(sponsor_id, page).await?)
}
