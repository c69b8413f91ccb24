
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::Error as WsError;

#[tokio::test]
async fn upgrade_without_token_is_rejected_with_401() {
    let server = test_utils::start_server().await;

    let request = format!("ws://{}/", server.addr)
        .into_client_request()
        .unwrap();
    let err = connect_async(request)
        .await
        .expect_err("handshake should be rejected");

    match err {
        WsError::Http(response) => assert_eq!(response.status(), 401),
        other => panic!("unexpected handshake error: {}", other),
    }
}

#[tokio::test]
async fn upgrade_with_invalid_token_is_rejected_with_401() {
    let server = test_utils::start_server().await;

    let mut request = format!("ws://{}/", server.addr)
        .into_client_request()
        .unwrap();
    request
        .headers_mut()
        .insert("Authorization", "Bearer not-a-jwt".parse().unwrap());
    let err = connect_async(request)
        .await
        .expect_err("handshake should be rejected");

    match err {
        WsError::Http(response) => assert_eq!(response.status(), 401),
        other => panic!("unexpected handshake error: {}", other),
    }
}

#[tokio::test]
async fn upgrade_with_valid_token_succeeds() {
    let server = test_utils::start_server().await;
    let ws = server.connect("alice").await;
    drop(ws);
}

#[tokio::test]
async fn token_query_parameter_is_accepted() {
    let server = test_utils::start_server().await;
    let url = format!("ws://{}/?token={}", server.addr, server.token_for("alice"));
    connect_async(url)
        .await
        .expect("query-parameter token should authenticate the upgrade");
}
