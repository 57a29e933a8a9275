use std::net::SocketAddr;
use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, UdpSocket};
use tokio::sync::mpsc;
use tokio::time::timeout;

use siplet_sip_core::{CSeq, HeaderAccess, Method, Request, SipMessage, StatusCode};

use crate::prelude::*;
use crate::transport::udp::DEFAULT_MTU;

const OPTIONS: &str = "OPTIONS sip:bob@127.0.0.1 SIP/2.0\r\n\
    Via: SIP/2.0/UDP 127.0.0.1:5070;branch=z9hG4bKtest1\r\n\
    From: <sip:alice@127.0.0.1>;tag=a1\r\n\
    To: <sip:bob@127.0.0.1>\r\n\
    Call-ID: transport-test@127.0.0.1\r\n\
    CSeq: 1 OPTIONS\r\n\
    Content-Length: 0\r\n\r\n";

fn local() -> SocketAddr {
    "127.0.0.1:0".parse().unwrap()
}

fn options_request(target: SocketAddr) -> Request {
    let mut request = Request::new(Method::Options, format!("sip:bob@{}", target).parse().unwrap());
    request
        .push_via("SIP/2.0/WS 127.0.0.1;branch=z9hG4bKws1".parse().unwrap())
        .unwrap();
    request
        .set_dialog_headers(
            "<sip:alice@127.0.0.1>;tag=a1".parse().unwrap(),
            "<sip:bob@127.0.0.1>".parse().unwrap(),
            "ws-test@127.0.0.1",
            CSeq::new(1, Method::Options),
        )
        .unwrap();
    request
}

async fn next_message(
    rx: &mut mpsc::Receiver<TransportEvent>,
) -> (SipMessage, std::sync::Arc<dyn SipConnection>) {
    loop {
        let event = timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for event")
            .expect("event channel closed");
        if let TransportEvent::MessageReceived { message, connection } = event {
            return (message, connection);
        }
    }
}

#[tokio::test]
async fn test_udp_request_and_reply() {
    let (connector, mut rx) = bind_udp(local()).await.unwrap();
    let client = UdpSocket::bind(local()).await.unwrap();
    client
        .send_to(OPTIONS.as_bytes(), connector.local_addr())
        .await
        .unwrap();

    let (message, connection) = next_message(&mut rx).await;
    assert_eq!(connection.transport(), TransportKind::Udp);
    assert_eq!(connection.remote_addr(), client.local_addr().unwrap());
    let request = message.into_request().unwrap();
    assert_eq!(request.call_id().unwrap(), "transport-test@127.0.0.1");

    let response = request.create_response(StatusCode::OK, None).unwrap();
    connection.send_response(&response).unwrap();

    let mut buf = vec![0u8; 2048];
    let (n, _) = timeout(Duration::from_secs(5), client.recv_from(&mut buf))
        .await
        .unwrap()
        .unwrap();
    assert!(buf[..n].starts_with(b"SIP/2.0 200 OK\r\n"));

    connector.close().await.unwrap();
    assert!(connector.is_closed());
}

#[tokio::test]
async fn test_udp_oversized_message_is_refused() {
    let (connector, _rx) = bind_udp(local()).await.unwrap();
    let connection = connector.connect("127.0.0.1:9".parse().unwrap()).await.unwrap();
    assert_eq!(connection.max_message_size(), DEFAULT_MTU);

    let mut request = options_request(connection.remote_addr());
    request.set_body(vec![b'x'; 4000], Some("text/plain")).unwrap();
    let err = connection.send_request(&request).unwrap_err();
    assert!(err.is_message_too_long());
}

#[tokio::test]
async fn test_udp_keepalive_is_ignored() {
    let (connector, mut rx) = bind_udp(local()).await.unwrap();
    let client = UdpSocket::bind(local()).await.unwrap();
    client.send_to(b"\r\n\r\n", connector.local_addr()).await.unwrap();
    client
        .send_to(OPTIONS.as_bytes(), connector.local_addr())
        .await
        .unwrap();
    let (message, _) = next_message(&mut rx).await;
    assert!(message.is_request());
}

#[tokio::test]
async fn test_tcp_message_split_across_writes() {
    let (connector, mut rx) = bind_tcp(local()).await.unwrap();
    let mut client = TcpStream::connect(connector.local_addr()).await.unwrap();

    let (head, tail) = OPTIONS.as_bytes().split_at(57);
    client.write_all(head).await.unwrap();
    client.flush().await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    client.write_all(tail).await.unwrap();

    let (message, connection) = next_message(&mut rx).await;
    assert_eq!(connection.transport(), TransportKind::Tcp);
    assert_eq!(connector.connection_count(), 1);
    let request = message.into_request().unwrap();
    connection
        .send_response(&request.create_response(StatusCode::OK, None).unwrap())
        .unwrap();

    let mut buf = vec![0u8; 2048];
    let n = timeout(Duration::from_secs(5), client.read(&mut buf))
        .await
        .unwrap()
        .unwrap();
    assert!(buf[..n].starts_with(b"SIP/2.0 200 OK\r\n"));
}

#[tokio::test]
async fn test_tcp_pipelined_messages() {
    let (connector, mut rx) = bind_tcp(local()).await.unwrap();
    let mut client = TcpStream::connect(connector.local_addr()).await.unwrap();
    let second = OPTIONS.replace("CSeq: 1 OPTIONS", "CSeq: 2 OPTIONS");
    client
        .write_all(format!("{}{}", OPTIONS, second).as_bytes())
        .await
        .unwrap();

    let (first, _) = next_message(&mut rx).await;
    let (second, _) = next_message(&mut rx).await;
    assert_eq!(first.cseq().unwrap().seq, 1);
    assert_eq!(second.cseq().unwrap().seq, 2);
}

#[tokio::test]
async fn test_tcp_missing_content_length_is_rejected() {
    let (connector, mut rx) = bind_tcp(local()).await.unwrap();
    let mut client = TcpStream::connect(connector.local_addr()).await.unwrap();
    let without_length = OPTIONS.replace("Content-Length: 0\r\n", "");
    client.write_all(without_length.as_bytes()).await.unwrap();

    let mut received = Vec::new();
    timeout(Duration::from_secs(5), client.read_to_end(&mut received))
        .await
        .unwrap()
        .unwrap();
    assert!(received.starts_with(b"SIP/2.0 400 Content-Length is mandatory\r\n"));
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn test_tcp_outbound_connection_is_reused() {
    let (server, mut server_rx) = bind_tcp(local()).await.unwrap();
    let (client, _client_rx) = bind_tcp(local()).await.unwrap();

    let first = client.connect(server.local_addr()).await.unwrap();
    let second = client.connect(server.local_addr()).await.unwrap();
    assert_eq!(first.local_addr(), second.local_addr());

    first.write(Bytes::from_static(OPTIONS.as_bytes())).unwrap();
    let (message, _) = next_message(&mut server_rx).await;
    assert!(message.is_request());

    client.close().await.unwrap();
    assert!(client.connect(server.local_addr()).await.is_err());
}

#[tokio::test]
async fn test_ws_request_and_reply() {
    let (server_tx, mut server_rx) = event_channel();
    let (client_tx, mut client_rx) = event_channel();
    let server = WsConnector::bind(local(), StreamLimits::default(), server_tx)
        .await
        .unwrap();
    let client = WsConnector::bind(local(), StreamLimits::default(), client_tx)
        .await
        .unwrap();

    let connection = client.connect(server.local_addr()).await.unwrap();
    assert_eq!(connection.transport(), TransportKind::Ws);
    connection
        .send_request(&options_request(server.local_addr()))
        .unwrap();

    let (message, inbound) = next_message(&mut server_rx).await;
    let request = message.into_request().unwrap();
    assert_eq!(request.call_id().unwrap(), "ws-test@127.0.0.1");
    inbound
        .send_response(&request.create_response(StatusCode::OK, None).unwrap())
        .unwrap();

    let (reply, _) = next_message(&mut client_rx).await;
    let response = reply.into_response().unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}
