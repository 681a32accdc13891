use axum::{
    extract::{rejection::QueryRejection, Query, State},
    middleware,
    routing::get,
    Json, Router,
};
use chrono::NaiveDate;
use serde::Deserialize;
use tower_sessions::Session;

use crate::api::middleware::{
    auth::{get_authenticated_sponsor, require_auth},
    session::AppState,
};
use crate::error::Result;
use crate::models::{Beneficiary, Page, PageRequest, Voucher};
use crate::services::reporting;

#[derive(Debug, Default, Deserialize)]
struct PageQuery {
    page: Option<u32>,
    per_page: Option<u32>,
}

impl PageQuery {
    fn to_request(&self, state: &AppState) -> PageRequest {
        PageRequest::new(self.page, self.per_page, state.config.default_page_size)
    }
}

#[derive(Debug, Deserialize)]
struct DateRangeQuery {
    start_date: NaiveDate,
    end_date: NaiveDate,
    page: Option<u32>,
    per_page: Option<u32>,
}

impl DateRangeQuery {
    fn paging(&self) -> PageQuery {
        PageQuery {
            page: self.page,
            per_page: self.per_page,
        }
    }
}

/// Malformed query strings get the JSON error body instead of axum's plain-text rejection
type QueryResult<T> = std::result::Result<Query<T>, QueryRejection>;

async fn vouchers(
    State(state): State<AppState>,
    query: QueryResult<PageQuery>,
    session: Session,
) -> Result<Json<Page<Voucher>>> {
    let Query(query) = query?;
    let sponsor = get_authenticated_sponsor(&session).await?;
    let page = reporting::vouchers_by_sponsor(
        state.store.as_ref(),
        sponsor.sponsor_id,
        query.to_request(&state),
    )
    .await?;

    Ok(Json(page))
}

async fn vouchers_by_date_range(
    State(state): State<AppState>,
    query: QueryResult<DateRangeQuery>,
    session: Session,
) -> Result<Json<Page<Voucher>>> {
    let Query(query) = query?;
    let sponsor = get_authenticated_sponsor(&session).await?;
    let page = reporting::vouchers_by_date_range(
        state.store.as_ref(),
        sponsor.sponsor_id,
        query.start_date,
        query.end_date,
        query.paging().to_request(&state),
    )
    .await?;

    Ok(Json(page))
}

async fn used_vouchers(
    State(state): State<AppState>,
    query: QueryResult<PageQuery>,
    session: Session,
) -> Result<Json<Page<Voucher>>> {
    let Query(query) = query?;
    let sponsor = get_authenticated_sponsor(&session).await?;
    let page = reporting::used_vouchers(
        state.store.as_ref(),
        sponsor.sponsor_id,
        query.to_request(&state),
    )
    .await?;

    Ok(Json(page))
}

async fn redeemed_vouchers(
    State(state): State<AppState>,
    query: QueryResult<PageQuery>,
    session: Session,
) -> Result<Json<Page<Voucher>>> {
    let Query(query) = query?;
    let sponsor = get_authenticated_sponsor(&session).await?;
    let page = reporting::redeemed_vouchers(
        state.store.as_ref(),
        sponsor.sponsor_id,
        query.to_request(&state),
    )
    .await?;

    Ok(Json(page))
}

async fn pending_vouchers(
    State(state): State<AppState>,
    query: QueryResult<PageQuery>,
    session: Session,
) -> Result<Json<Page<Voucher>>> {
    let Query(query) = query?;
    let sponsor = get_authenticated_sponsor(&session).await?;
    let page = reporting::pending_vouchers(
        state.store.as_ref(),
        sponsor.sponsor_id,
        query.to_request(&state),
    )
    .await?;

    Ok(Json(page))
}

async fn beneficiaries(
    State(state): State<AppState>,
    query: QueryResult<PageQuery>,
    session: Session,
) -> Result<Json<Page<Beneficiary>>> {
    let Query(query) = query?;
    let sponsor = get_authenticated_sponsor(&session).await?;
    let page = reporting::beneficiaries_with_redemptions(
        state.store.as_ref(),
        sponsor.sponsor_id,
        query.to_request(&state),
    )
    .await?;

    Ok(Json(page))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/reports/vouchers", get(vouchers))
        .route("/api/reports/vouchers/date-range", get(vouchers_by_date_range))
        .route("/api/reports/vouchers/used", get(used_vouchers))
        .route("/api/reports/vouchers/redeemed", get(redeemed_vouchers))
        .route("/api/reports/vouchers/pending", get(pending_vouchers))
        .route("/api/reports/beneficiaries", get(beneficiaries))
        .route_layer(middleware::from_fn(require_auth))
}
