
use std::time::Duration;

use futures_util::StreamExt;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;

const WAIT: Duration = Duration::from_secs(5);

#[tokio::test]
async fn shutdown_sends_close_and_drains_connection_tasks() {
    let server = test_utils::start_server().await;
    let mut ws = server.connect("alice").await;

    server.shutdown.send(()).unwrap();

    // The open connection receives an explicit Close frame
    let got_close = timeout(WAIT, async {
        loop {
            match ws.next().await {
                Some(Ok(Message::Close(_))) => break true,
                Some(Ok(_)) => continue,
                _ => break false,
            }
        }
    })
    .await
    .expect("expected a close frame before the timeout");
    assert!(got_close);

    // The accept loop stops and the drain completes
    timeout(WAIT, server.server)
        .await
        .expect("server task should finish draining")
        .unwrap();
}

#[tokio::test]
async fn shutdown_with_no_connections_completes_immediately() {
    let server = test_utils::start_server().await;

    server.shutdown.send(()).unwrap();
    timeout(WAIT, server.server)
        .await
        .expect("server task should finish")
        .unwrap();
}
