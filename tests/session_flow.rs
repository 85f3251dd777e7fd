//! End-to-end session behavior over TCP.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::*;
use ldapd::proto::{MessageId, ResultCode};
use tokio::io::AsyncReadExt;
use tokio::time::timeout;

#[tokio::test]
async fn operation_round_trip() {
    let server = start_server(Arc::new(EchoHandler)).await;
    let mut client = connect(server.addr).await;

    send_request(&mut client, &search(5)).await;
    let response = read_response(&mut client).await;
    assert_eq!(response.message_id, MessageId(5));
    assert_eq!(response.code, ResultCode::Success);
}

#[tokio::test]
async fn message_id_reusable_after_completion() {
    let server = start_server(Arc::new(EchoHandler)).await;
    let mut client = connect(server.addr).await;

    send_request(&mut client, &search(5)).await;
    assert_eq!(read_response(&mut client).await.code, ResultCode::Success);

    send_request(&mut client, &search(5)).await;
    assert_eq!(read_response(&mut client).await.code, ResultCode::Success);
}

#[tokio::test]
async fn duplicate_message_id_rejected_while_pending() {
    let server = start_server(Arc::new(ParkedHandler)).await;
    let mut client = connect(server.addr).await;

    send_request(&mut client, &search(5)).await;
    send_request(&mut client, &search(5)).await;

    // The parked first operation never answers, so the first frame back
    // is the duplicate rejection.
    let response = read_response(&mut client).await;
    assert_eq!(response.message_id, MessageId(5));
    assert_eq!(response.code, ResultCode::ProtocolError);
}

#[tokio::test]
async fn bind_drains_pending_operations() {
    let server = start_server(Arc::new(ParkedHandler)).await;
    let mut client = connect(server.addr).await;

    send_request(&mut client, &search(1)).await;
    send_request(&mut client, &search(2)).await;
    send_request(&mut client, &search(3)).await;
    send_request(&mut client, &bind(4, ADMIN_DN, ADMIN_PASSWORD)).await;

    // The bind must complete even though three operations were parked:
    // the drain abandons them rather than waiting them out.
    let response = timeout(Duration::from_secs(5), read_response(&mut client))
        .await
        .expect("bind blocked behind parked operations");
    assert_eq!(response.message_id, MessageId(4));
    assert_eq!(response.code, ResultCode::Success);
}

#[tokio::test]
async fn bind_with_wrong_password_is_rejected() {
    let server = start_server(Arc::new(EchoHandler)).await;
    let mut client = connect(server.addr).await;

    send_request(&mut client, &bind(1, ADMIN_DN, "wrong")).await;
    let response = read_response(&mut client).await;
    assert_eq!(response.code, ResultCode::InvalidCredentials);

    // The session survives a failed bind.
    send_request(&mut client, &search(2)).await;
    assert_eq!(read_response(&mut client).await.code, ResultCode::Success);
}

#[tokio::test]
async fn abandon_of_unknown_id_is_harmless() {
    let server = start_server(Arc::new(EchoHandler)).await;
    let mut client = connect(server.addr).await;

    send_request(&mut client, &abandon(2, 99)).await;

    // No response is owed for abandon; the session keeps working.
    send_request(&mut client, &search(3)).await;
    let response = read_response(&mut client).await;
    assert_eq!(response.message_id, MessageId(3));
    assert_eq!(response.code, ResultCode::Success);
}

#[tokio::test]
async fn abandon_cancels_a_parked_operation() {
    let server = start_server(Arc::new(ParkedHandler)).await;
    let mut client = connect(server.addr).await;

    send_request(&mut client, &search(7)).await;
    send_request(&mut client, &abandon(8, 7)).await;

    // The abandoned operation yields no response; a subsequent reuse of
    // its message id proves the slot was removed.
    send_request(&mut client, &search(7)).await;
    send_request(&mut client, &abandon(9, 7)).await;
    send_request(&mut client, &bind(10, ADMIN_DN, ADMIN_PASSWORD)).await;
    let response = read_response(&mut client).await;
    assert_eq!(response.message_id, MessageId(10));
    assert_eq!(response.code, ResultCode::Success);
}

#[tokio::test]
async fn unbind_closes_the_session() {
    let server = start_server(Arc::new(EchoHandler)).await;
    let mut client = connect(server.addr).await;

    send_request(&mut client, &unbind(1)).await;

    let mut buf = [0u8; 1];
    let eof = timeout(Duration::from_secs(5), client.read(&mut buf))
        .await
        .expect("server never closed the transport");
    match eof {
        Ok(n) => assert_eq!(n, 0, "expected EOF after unbind"),
        Err(_) => {} // reset is also an acceptable close
    }
}

#[tokio::test]
async fn starttls_is_unavailable_without_tls_material() {
    let server = start_server(Arc::new(EchoHandler)).await;
    let mut client = connect(server.addr).await;

    send_request(&mut client, &starttls(1)).await;
    let response = read_response(&mut client).await;
    assert_eq!(response.code, ResultCode::Unavailable);

    // Rejection leaves the session usable.
    send_request(&mut client, &search(2)).await;
    assert_eq!(read_response(&mut client).await.code, ResultCode::Success);
}

#[tokio::test]
async fn malformed_frame_draws_a_disconnection_notice() {
    use tokio::io::AsyncWriteExt;

    let server = start_server(Arc::new(EchoHandler)).await;
    let mut client = connect(server.addr).await;

    // Valid length prefix, garbage body.
    client
        .write_all(&[0, 0, 0, 4, 0xde, 0xad, 0xbe, 0xef])
        .await
        .unwrap();

    let notice = read_response(&mut client).await;
    assert_eq!(notice.message_id, MessageId(0));
    assert_eq!(notice.code, ResultCode::ProtocolError);

    // The connection is then torn down.
    let mut buf = [0u8; 1];
    let eof = timeout(Duration::from_secs(5), client.read(&mut buf))
        .await
        .expect("server never closed the transport");
    match eof {
        Ok(n) => assert_eq!(n, 0),
        Err(_) => {}
    }
}

#[tokio::test]
async fn unsupported_extended_operation_is_rejected() {
    let server = start_server(Arc::new(EchoHandler)).await;
    let mut client = connect(server.addr).await;

    let mut request = starttls(1);
    if let ldapd::proto::ProtocolOp::Extended { ref mut oid, .. } = request.op {
        *oid = "1.2.3.4.5".to_string();
    }
    send_request(&mut client, &request).await;
    let response = read_response(&mut client).await;
    assert_eq!(response.code, ResultCode::ProtocolError);
}
