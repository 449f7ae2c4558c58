use std::sync::Arc;
use std::time::Duration;

use futures_util::{Sink, SinkExt as _, StreamExt as _};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, error, info, warn};

use crate::admission::AdmissionControl;
use crate::handler::{HandlerError, MessageHandler};
use crate::phase::Phase;
use crate::protocol::{ProtocolError, ServerMessage};
use crate::session::Identity;

const SEND_TIMEOUT: Duration = Duration::from_secs(10);

fn close(code: CloseCode, reason: &'static str) -> Message {
    Message::Close(Some(CloseFrame {
        code,
        reason: reason.into(),
    }))
}

/// Whether `message` was written before the timeout.
async fn send<S>(sink: &mut S, message: Message) -> bool
where
    S: Sink<Message> + Unpin,
{
    matches!(
        tokio::time::timeout(SEND_TIMEOUT, sink.send(message)).await,
        Ok(Ok(()))
    )
}

/// Drives one student's real-time connection until either side ends it.
pub async fn serve<S>(
    control: Arc<AdmissionControl>,
    identity: Identity,
    socket: WebSocketStream<S>,
    send_queue: usize,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (outbound, mut queued) = mpsc::channel(send_queue);
    let guard = control
        .connections()
        .register(&identity.user_id, &identity.department, outbound);
    let cancel = guard.cancellation().clone();
    let (mut sink, mut stream) = socket.split();

    // closing may have cancelled everybody just before this connection registered
    if control.phase() == Phase::Closed {
        send(&mut sink, close(CloseCode::Policy, "selections are closed")).await;
        return;
    }

    let enrollment = match control.enroll(&identity).await {
        Ok(enrollment) => enrollment,
        Err(err) => {
            error!(user = %identity.user_id, %err, "failed to load choices");
            send(&mut sink, close(CloseCode::Error, "internal error")).await;
            return;
        }
    };
    let mut handler = MessageHandler::new(Arc::clone(&control), enrollment, cancel.clone());
    info!(connection = %guard.id(), user = %identity.user_id, "connection established");
    if let Some(greeting) = greeting(control.phase()) {
        send(&mut sink, Message::Text(greeting.to_string())).await;
    }

    #[allow(clippy::redundant_pub_crate)]
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                send(&mut sink, close(CloseCode::Away, "disconnected by the server")).await;
                break;
            }
            Some(message) = queued.recv() => {
                if !send(&mut sink, Message::Text(message.to_string())).await {
                    break;
                }
            }
            frame = stream.next() => match frame {
                // handled to completion so a committed seat is always counted
                Some(Ok(Message::Text(text))) => match handler.handle(&text).await {
                    Ok(reply) => {
                        if !send(&mut sink, Message::Text(reply.to_string())).await {
                            break;
                        }
                    }
                    Err(HandlerError::Cancelled) => {
                        send(&mut sink, close(CloseCode::Away, "disconnected by the server")).await;
                        break;
                    }
                    Err(HandlerError::Protocol(err)) => {
                        warn!(user = %identity.user_id, %err, "closing connection");
                        send(&mut sink, close(CloseCode::Protocol, "malformed message")).await;
                        break;
                    }
                },
                Some(Ok(Message::Binary(_))) => {
                    warn!(user = %identity.user_id, err = %ProtocolError::Binary, "closing connection");
                    send(&mut sink, close(CloseCode::Unsupported, "binary frames are not supported")).await;
                    break;
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(err)) => {
                    debug!(user = %identity.user_id, %err, "connection failed");
                    break;
                }
            },
        }
    }
    debug!(connection = %guard.id(), user = %identity.user_id, "connection closed");
}

/// `STOP` tells a client connecting during `ReadOnly` that choices are frozen.
const fn greeting(phase: Phase) -> Option<ServerMessage> {
    match phase {
        Phase::ReadOnly => Some(ServerMessage::Stop),
        Phase::Open | Phase::Closed => None,
    }
}
