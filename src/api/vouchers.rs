use std::net::{IpAddr, SocketAddr};

use axum::{
    extract::{ConnectInfo, Path, State},
    http::{header, HeaderMap, StatusCode},
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use tower_sessions::Session;
use uuid::Uuid;

use crate::api::middleware::{
    auth::{get_authenticated_beneficiary, get_authenticated_sponsor, require_auth},
    session::AppState,
};
use crate::error::{AppError, Result};
use crate::models::{Voucher, VoucherDetails};
use crate::services::lifecycle::{self, VoucherAttributes, VoucherAudit};
use crate::services::qr_code;
use crate::services::redemption::{self, RedeemRequest, RedemptionOutcome};

#[derive(Debug, Deserialize)]
struct CreateVoucherRequest {
    #[serde(flatten)]
    attributes: VoucherAttributes,
    #[serde(default)]
    merchant_ids: Vec<Uuid>,
}

#[derive(Debug, Deserialize)]
struct UpdateVoucherRequest {
    #[serde(flatten)]
    attributes: VoucherAttributes,
    /// Replaces the full association set when present
    merchant_ids: Option<Vec<Uuid>>,
}

#[derive(Debug, Deserialize)]
struct RedeemVoucherRequest {
    code: String,
    merchant_id: Option<Uuid>,
}

/// Sponsors only see their own vouchers; anything else reads as absent
fn ensure_owner(voucher: &Voucher, sponsor_id: Uuid) -> Result<()> {
    if voucher.sponsor_id != sponsor_id {
        return Err(AppError::NotFound("Voucher not found".to_string()));
    }
    Ok(())
}

async fn load_owned(state: &AppState, sponsor_id: Uuid, voucher_id: Uuid) -> Result<VoucherDetails> {
    let details = lifecycle::get_voucher(state.store.as_ref(), voucher_id).await?;
    ensure_owner(&details.voucher, sponsor_id)?;
    Ok(details)
}

/// Requester address: the first `X-Forwarded-For` hop when trusted, else the peer
fn client_address(headers: &HeaderMap, peer: SocketAddr, trust_forwarded_for: bool) -> IpAddr {
    if trust_forwarded_for {
        let forwarded = headers
            .get("x-forwarded-for")
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.split(',').next())
            .and_then(|first| first.trim().parse::<IpAddr>().ok());

        if let Some(address) = forwarded {
            return address;
        }
    }

    peer.ip()
}

async fn create_voucher(
    State(state): State<AppState>,
    session: Session,
    Json(req): Json<CreateVoucherRequest>,
) -> Result<(StatusCode, Json<VoucherDetails>)> {
    let sponsor = get_authenticated_sponsor(&session).await?;

    let details = lifecycle::create_voucher(
        state.store.as_ref(),
        &state.rng,
        Some(sponsor.sponsor_id),
        req.attributes,
        &req.merchant_ids,
    )
    .await?;

    Ok((StatusCode::CREATED, Json(details)))
}

async fn show_voucher(
    State(state): State<AppState>,
    Path(voucher_id): Path<Uuid>,
    session: Session,
) -> Result<Json<VoucherDetails>> {
    let sponsor = get_authenticated_sponsor(&session).await?;
    let details = load_owned(&state, sponsor.sponsor_id, voucher_id).await?;

    Ok(Json(details))
}

async fn update_voucher(
    State(state): State<AppState>,
    Path(voucher_id): Path<Uuid>,
    session: Session,
    Json(req): Json<UpdateVoucherRequest>,
) -> Result<Json<VoucherDetails>> {
    let sponsor = get_authenticated_sponsor(&session).await?;
    load_owned(&state, sponsor.sponsor_id, voucher_id).await?;

    let details = lifecycle::update_voucher(
        state.store.as_ref(),
        voucher_id,
        req.attributes,
        req.merchant_ids.as_deref(),
    )
    .await?;

    Ok(Json(details))
}

async fn revoke_voucher(
    State(state): State<AppState>,
    Path(voucher_id): Path<Uuid>,
    session: Session,
) -> Result<StatusCode> {
    let sponsor = get_authenticated_sponsor(&session).await?;
    load_owned(&state, sponsor.sponsor_id, voucher_id).await?;

    lifecycle::revoke_voucher(state.store.as_ref(), voucher_id).await?;

    Ok(StatusCode::NO_CONTENT)
}

async fn delete_voucher(
    State(state): State<AppState>,
    Path(voucher_id): Path<Uuid>,
    session: Session,
) -> Result<StatusCode> {
    let sponsor = get_authenticated_sponsor(&session).await?;

    // Revoked vouchers can still be purged by their owner
    let voucher = state
        .store
        .find_voucher_with_revoked(voucher_id)
        .await?
        .ok_or_else(|| AppError::NotFound("Voucher not found".to_string()))?;
    ensure_owner(&voucher, sponsor.sponsor_id)?;

    lifecycle::delete_voucher(state.store.as_ref(), voucher_id).await?;

    Ok(StatusCode::NO_CONTENT)
}

async fn voucher_transactions(
    State(state): State<AppState>,
    Path(voucher_id): Path<Uuid>,
    session: Session,
) -> Result<Json<VoucherAudit>> {
    let sponsor = get_authenticated_sponsor(&session).await?;

    let audit = lifecycle::voucher_audit(state.store.as_ref(), voucher_id).await?;
    ensure_owner(&audit.voucher, sponsor.sponsor_id)?;

    Ok(Json(audit))
}

async fn voucher_qr(
    State(state): State<AppState>,
    Path(voucher_id): Path<Uuid>,
    session: Session,
) -> Result<Response> {
    let sponsor = get_authenticated_sponsor(&session).await?;
    let details = load_owned(&state, sponsor.sponsor_id, voucher_id).await?;

    let svg = qr_code::render_voucher_svg(&details.voucher)?;

    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, "image/svg+xml")],
        svg,
    )
        .into_response())
}

async fn redeem_voucher(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    session: Session,
    Json(req): Json<RedeemVoucherRequest>,
) -> Result<Json<RedemptionOutcome>> {
    let beneficiary = get_authenticated_beneficiary(&session).await?;
    let address = client_address(&headers, peer, state.config.trust_forwarded_for);

    let outcome = redemption::redeem_voucher(
        state.store.as_ref(),
        state.locator.as_ref(),
        RedeemRequest {
            code: req.code.trim().to_string(),
            address,
            beneficiary_id: beneficiary.beneficiary_id,
            merchant_id: req.merchant_id,
        },
    )
    .await;

    if !outcome.is_success() {
        return Err(AppError::from_outcome(&outcome));
    }

    Ok(Json(outcome))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/vouchers", post(create_voucher))
        .route("/api/vouchers/redeem", post(redeem_voucher))
        .route(
            "/api/vouchers/:id",
            get(show_voucher).put(update_voucher).delete(delete_voucher),
        )
        .route("/api/vouchers/:id/revoke", post(revoke_voucher))
        .route("/api/vouchers/:id/transactions", get(voucher_transactions))
        .route("/api/vouchers/:id/qr", get(voucher_qr))
        .route_layer(middleware::from_fn(require_auth))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer() -> SocketAddr {
        "10.1.2.3:44321".parse().unwrap()
    }

    #[test]
    fn test_client_address_uses_peer_by_default() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", "203.0.113.9".parse().unwrap());

        assert_eq!(
            client_address(&headers, peer(), false),
            "10.1.2.3".parse::<IpAddr>().unwrap()
        );
    }

    #[test]
    fn test_client_address_takes_first_forwarded_hop_when_trusted() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            "203.0.113.9, 10.0.0.1".parse().unwrap(),
        );

        assert_eq!(
            client_address(&headers, peer(), true),
            "203.0.113.9".parse::<IpAddr>().unwrap()
        );

        headers.insert("x-forwarded-for", "not-an-ip".parse().unwrap());
        assert_eq!(
            client_address(&headers, peer(), true),
            "10.1.2.3".parse::<IpAddr>().unwrap()
        );
    }
}
