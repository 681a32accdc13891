use axum::{extract::Request, middleware::Next, response::Response};
use tower_sessions::Session;
use uuid::Uuid;

use super::session::{SESSION_KEY_BENEFICIARY_ID, SESSION_KEY_MERCHANT_ID, SESSION_KEY_SPONSOR_ID};
use crate::error::AppError;

const IDENTITY_KEYS: [&str; 3] = [
    SESSION_KEY_SPONSOR_ID,
    SESSION_KEY_MERCHANT_ID,
    SESSION_KEY_BENEFICIARY_ID,
];

async fn session_id(session: &Session, key: &str) -> Result<Option<Uuid>, AppError> {
    session
        .get::<Uuid>(key)
        .await
        .map_err(|e| AppError::Internal(anyhow::anyhow!("session read failed: {}", e)))
}

async fn has_any_identity(session: &Session) -> Result<bool, AppError> {
    for key in IDENTITY_KEYS {
        if session_id(session, key).await?.is_some() {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Middleware that requires some authenticated identity in the session
pub async fn require_auth(
    session: Session,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    if !has_any_identity(&session).await? {
        return Err(AppError::Unauthorized);
    }

    Ok(next.run(request).await)
}

/// Reads one role's id; a caller signed in under another role is forbidden
async fn require_role(session: &Session, key: &str) -> Result<Uuid, AppError> {
    if let Some(id) = session_id(session, key).await? {
        return Ok(id);
    }

    if has_any_identity(session).await? {
        Err(AppError::Forbidden)
    } else {
        Err(AppError::Unauthorized)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct AuthenticatedSponsor {
    pub sponsor_id: Uuid,
}

#[derive(Debug, Clone, Copy)]
pub struct AuthenticatedBeneficiary {
    pub beneficiary_id: Uuid,
}

pub async fn get_authenticated_sponsor(session: &Session) -> Result<AuthenticatedSponsor, AppError> {
    let sponsor_id = require_role(session, SESSION_KEY_SPONSOR_ID).await?;
    Ok(AuthenticatedSponsor { sponsor_id })
}

pub async fn get_authenticated_beneficiary(
    session: &Session,
) -> Result<AuthenticatedBeneficiary, AppError> {
    let beneficiary_id = require_role(session, SESSION_KEY_BENEFICIARY_ID).await?;
    Ok(AuthenticatedBeneficiary { beneficiary_id })
}
