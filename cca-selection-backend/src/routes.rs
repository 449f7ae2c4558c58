pub mod courses;
pub mod state;
pub mod students;
pub mod ws;

use std::error::Error;

use bytes::Bytes;
use http::header::CONTENT_TYPE;
use http::{Request, Response, StatusCode};
use http_body_util::{BodyExt as _, Full, Limited};
use hyper::body::Body;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::AppError;
use crate::session::{identify, Identity};
use crate::AppState;

const MAX_BODY: usize = 4 * 1024 * 1024;

pub fn json_response<T: Serialize>(
    status: StatusCode,
    value: &T,
) -> Result<Response<Full<Bytes>>, AppError> {
    Ok(Response::builder()
        .status(status)
        .header(CONTENT_TYPE, "application/json")
        .body(Full::new(Bytes::from(serde_json::to_vec(value)?)))?)
}

pub async fn read_json<T, B>(request: Request<B>) -> Result<T, AppError>
where
    T: DeserializeOwned,
    B: Body<Data = Bytes>,
    B::Error: Into<Box<dyn Error + Send + Sync>>,
{
    let body = Limited::new(request.into_body(), MAX_BODY)
        .collect()
        .await
        .map_err(AppError::Body)?
        .to_bytes();
    Ok(serde_json::from_slice(&body)?)
}

pub async fn require_staff(state: &AppState, token: Option<String>) -> Result<Identity, AppError> {
    let identity = identify(state.sessions.as_ref(), token).await?;
    if state.control.cohorts().is_staff(&identity.department) {
        Ok(identity)
    } else {
        Err(AppError::StaffOnly)
    }
}
