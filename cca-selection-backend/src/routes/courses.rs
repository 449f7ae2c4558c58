use bytes::Bytes;
use http::{Request, Response, StatusCode};
use http_body_util::Full;
use hyper::body::Body;
use serde::Serialize;

use super::{json_response, read_json, require_staff};
use crate::courses::CourseRecord;
use crate::error::AppError;
use crate::phase::Phase;
use crate::session::{identify, session_token};
use crate::AppState;

#[derive(Serialize)]
struct ImportSummary {
    imported: usize,
}

/// Course listing for the logged in user. Students get their pre-selected courses
/// assigned here once selections are visible.
pub async fn list<B>(state: &AppState, request: Request<B>) -> Result<Response<Full<Bytes>>, AppError> {
    let identity = identify(state.sessions.as_ref(), session_token(&request)).await?;
    let control = &state.control;
    if control.cohorts().is_staff(&identity.department) || control.phase() == Phase::Closed {
        return json_response(StatusCode::OK, &control.snapshot(&identity, None));
    }

    let mut enrollment = control.enroll(&identity).await?;
    let preselected = match identity.student_id() {
        Some(student_id) => Some(control.preselect(&mut enrollment, student_id).await?),
        None => None,
    };
    let mut snapshot = control.snapshot(&identity, Some(&enrollment));
    snapshot.preselected = preselected;
    json_response(StatusCode::OK, &snapshot)
}

pub async fn import<B>(
    state: &AppState,
    request: Request<B>,
) -> Result<Response<Full<Bytes>>, AppError>
where
    B: Body<Data = Bytes>,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    require_staff(state, session_token(&request)).await?;
    let records: Vec<CourseRecord> = read_json(request).await?;
    let imported = state.control.import_courses(records).await?;
    json_response(StatusCode::OK, &ImportSummary { imported })
}
