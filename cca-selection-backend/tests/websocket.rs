mod common;

use std::sync::Arc;

use cca_selection_backend::admission::AdmissionControl;
use cca_selection_backend::phase::Phase;
use cca_selection_backend::websocket;
use common::{control_in, course, student};
use futures_util::{SinkExt as _, StreamExt as _};
use tokio::io::DuplexStream;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::protocol::Role;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

async fn connect(
    control: &Arc<AdmissionControl>,
    user: &str,
) -> (WebSocketStream<DuplexStream>, JoinHandle<()>) {
    let (client, server) = tokio::io::duplex(4096);
    let (client, server) = tokio::join!(
        WebSocketStream::from_raw_socket(client, Role::Client, None),
        WebSocketStream::from_raw_socket(server, Role::Server, None),
    );
    let task = tokio::spawn(websocket::serve(
        Arc::clone(control),
        student(user),
        server,
        8,
    ));
    (client, task)
}

async fn request(client: &mut WebSocketStream<DuplexStream>, line: &str) -> String {
    client.send(Message::Text(line.to_owned())).await.unwrap();
    next_text(client).await
}

async fn next_text(client: &mut WebSocketStream<DuplexStream>) -> String {
    match client.next().await {
        Some(Ok(Message::Text(text))) => text,
        other => panic!("expected a text frame, got {other:?}"),
    }
}

#[tokio::test]
async fn choose_and_unchoose_over_the_wire() {
    let (_, control) = control_in(Phase::Open, vec![course(1, 1, "MW1")]).await;
    let (mut alice, _alice_task) = connect(&control, "alice").await;
    let (mut bob, _bob_task) = connect(&control, "bob").await;

    assert_eq!(request(&mut alice, "C 1").await, "Y 1");
    assert_eq!(request(&mut bob, "C 1").await, "R 1 FULL");
    assert_eq!(request(&mut bob, "C 99").await, "R 99 NOTFOUND");
    assert_eq!(request(&mut alice, "N 1").await, "N 1");
    assert_eq!(request(&mut bob, "C 1").await, "Y 1");
}

#[tokio::test]
async fn phase_changes_reach_the_client() {
    let (_, control) = control_in(Phase::Open, vec![course(1, 1, "MW1")]).await;
    let (mut client, task) = connect(&control, "alice").await;
    assert_eq!(request(&mut client, "C 1").await, "Y 1");

    control.transition(Phase::ReadOnly).await.unwrap();
    assert_eq!(next_text(&mut client).await, "STOP");
    assert_eq!(request(&mut client, "N 1").await, "R 1 CLOSED");

    control.transition(Phase::Open).await.unwrap();
    assert_eq!(next_text(&mut client).await, "START");

    control.transition(Phase::Closed).await.unwrap();
    assert!(matches!(
        client.next().await,
        Some(Ok(Message::Close(Some(_))))
    ));
    task.await.unwrap();
    assert!(control.connections().is_empty());
}

#[tokio::test]
async fn malformed_message_ends_the_connection() {
    let (_, control) = control_in(Phase::Open, vec![course(1, 1, "MW1")]).await;
    let (mut client, task) = connect(&control, "alice").await;

    client
        .send(Message::Text("HELLO 1".to_owned()))
        .await
        .unwrap();
    assert!(matches!(
        client.next().await,
        Some(Ok(Message::Close(Some(_))))
    ));
    task.await.unwrap();
    assert!(control.connections().is_empty());
}

#[tokio::test]
async fn connecting_while_closed_is_refused() {
    let (_, control) = control_in(Phase::Closed, vec![course(1, 1, "MW1")]).await;
    let (mut client, task) = connect(&control, "alice").await;

    assert!(matches!(
        client.next().await,
        Some(Ok(Message::Close(Some(_))))
    ));
    task.await.unwrap();
    assert!(control.connections().is_empty());
}

#[tokio::test]
async fn read_only_greets_with_stop() {
    let (_, control) = control_in(Phase::ReadOnly, vec![course(1, 1, "MW1")]).await;
    let (mut client, _task) = connect(&control, "alice").await;

    assert_eq!(next_text(&mut client).await, "STOP");
    assert_eq!(request(&mut client, "C 1").await, "R 1 CLOSED");
}
