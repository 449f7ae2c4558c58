use bytes::Bytes;
use http::{Request, Response, StatusCode};
use http_body_util::Full;
use serde::Serialize;

use super::{json_response, require_staff};
use crate::confirmation::StudentStatus;
use crate::error::AppError;
use crate::session::{identify, session_token};
use crate::AppState;

#[derive(Serialize)]
struct Confirmed {
    confirmed: bool,
}

#[derive(Serialize)]
struct Unconfirmed {
    students: Vec<StudentStatus>,
}

/// Marks the caller's current choices as final.
pub async fn confirm<B>(
    state: &AppState,
    request: Request<B>,
) -> Result<Response<Full<Bytes>>, AppError> {
    let identity = identify(state.sessions.as_ref(), session_token(&request)).await?;
    if state.control.cohorts().is_staff(&identity.department) {
        return Err(AppError::StudentsOnly);
    }
    state.control.confirm(&identity).await?;
    json_response(StatusCode::OK, &Confirmed { confirmed: true })
}

pub async fn unconfirmed<B>(
    state: &AppState,
    request: Request<B>,
) -> Result<Response<Full<Bytes>>, AppError> {
    require_staff(state, session_token(&request)).await?;
    let students = state.control.unconfirmed().await?;
    json_response(StatusCode::OK, &Unconfirmed { students })
}
