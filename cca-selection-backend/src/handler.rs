use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::admission::AdmissionControl;
use crate::courses::CourseId;
use crate::protocol::{ClientMessage, ProtocolError, ServerMessage};
use crate::selection::{Enrollment, SelectionError};

const INTERNAL_FAILURE: &str = "internal error, please try again";

#[derive(thiserror::Error, Debug)]
pub enum HandlerError {
    #[error("protocol violation: {0}")]
    Protocol(#[from] ProtocolError),
    #[error("connection cancelled")]
    Cancelled,
}

/// Turns the inbound messages of one connection into admission operations.
///
/// Rejections and ledger failures are answered and keep the connection alive.
/// Malformed input and cancellation end it.
pub struct MessageHandler {
    control: Arc<AdmissionControl>,
    enrollment: Enrollment,
    cancel: CancellationToken,
}

impl MessageHandler {
    #[must_use]
    pub const fn new(
        control: Arc<AdmissionControl>,
        enrollment: Enrollment,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            control,
            enrollment,
            cancel,
        }
    }

    #[must_use]
    pub const fn enrollment(&self) -> &Enrollment {
        &self.enrollment
    }

    pub async fn handle(&mut self, line: &str) -> Result<ServerMessage, HandlerError> {
        if self.cancel.is_cancelled() {
            return Err(HandlerError::Cancelled);
        }
        let message = ClientMessage::parse(line)?;
        let course = message.course();
        let outcome = match message {
            ClientMessage::Choose(course) => self
                .control
                .choose(&mut self.enrollment, course)
                .await
                .map(|_| ServerMessage::Chosen(course)),
            // an unknown choice is acknowledged like a removed one
            ClientMessage::Unchoose(course) => self
                .control
                .unchoose(&mut self.enrollment, course)
                .await
                .map(|_| ServerMessage::Unchosen(course)),
        };
        Ok(outcome.unwrap_or_else(|err| self.rejection(course, &err)))
    }

    fn rejection(&self, course: CourseId, err: &SelectionError) -> ServerMessage {
        if let Some(reason) = err.reject_reason() {
            debug!(user = self.enrollment.user_id(), %course, %err, "rejected");
            ServerMessage::Rejected(course, reason)
        } else {
            error!(user = self.enrollment.user_id(), %course, %err, "selection failed");
            ServerMessage::Failure(INTERNAL_FAILURE.to_owned())
        }
    }
}
