use bytes::Bytes;
use http::{Request, Response, StatusCode};
use http_body_util::Full;
use hyper::body::Body;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::{json_response, read_json, require_staff};
use crate::error::AppError;
use crate::phase::Phase;
use crate::schedule::ScheduledTransition;
use crate::session::session_token;
use crate::AppState;

#[derive(Deserialize)]
struct StateChange {
    phase: Phase,
    /// seconds since the unix epoch, now if absent
    #[serde(default)]
    at: Option<u64>,
}

#[derive(Serialize)]
#[serde(untagged)]
enum StateChanged {
    Changed { previous: Phase, phase: Phase },
    Scheduled { scheduled: ScheduledTransition },
}

pub async fn set_state<B>(
    state: &AppState,
    request: Request<B>,
) -> Result<Response<Full<Bytes>>, AppError>
where
    B: Body<Data = Bytes>,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let identity = require_staff(state, session_token(&request)).await?;
    let change: StateChange = read_json(request).await?;
    if let Some(at) = change.at {
        let scheduled = ScheduledTransition {
            phase: change.phase,
            at,
        };
        state.control.schedule(scheduled);
        info!(user = %identity.user_id, phase = %change.phase, at, "phase change scheduled by staff");
        return json_response(StatusCode::ACCEPTED, &StateChanged::Scheduled { scheduled });
    }

    // an explicit change overrides whatever was scheduled
    state.control.cancel_schedule();
    let previous = state.control.transition(change.phase).await?;
    info!(user = %identity.user_id, %previous, phase = %change.phase, "phase set by staff");
    json_response(
        StatusCode::OK,
        &StateChanged::Changed {
            previous,
            phase: change.phase,
        },
    )
}
