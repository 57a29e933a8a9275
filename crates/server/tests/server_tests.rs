use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use serial_test::serial;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, UdpSocket};
use tokio::time::timeout;

use siplet_sip_core::{Framing, HeaderAccess, HeaderName, Response, SipMessage};
use siplet_sip_transport::{Decoded, MessageDecoder, TransportKind};
use siplet_server::{OptionsResponder, ServerConfig, SipServer};

fn request(method: &str, transport: &str, branch: &str, call_id: &str) -> String {
    format!(
        "{method} sip:server@127.0.0.1 SIP/2.0\r\n\
         Via: SIP/2.0/{transport} 127.0.0.1:5999;branch={branch}\r\n\
         From: <sip:alice@127.0.0.1>;tag=a1\r\n\
         To: <sip:server@127.0.0.1>\r\n\
         Call-ID: {call_id}\r\n\
         CSeq: 1 {method}\r\n\
         Max-Forwards: 70\r\n\
         Content-Length: 0\r\n\r\n"
    )
}

fn parse_response(bytes: &[u8]) -> Response {
    match MessageDecoder::new(Framing::Datagram).decode_datagram(bytes) {
        Some(Decoded::Message(SipMessage::Response(response))) => response,
        other => panic!("expected a response, got {:?}", other),
    }
}

async fn start(config: &str) -> SipServer {
    let config = ServerConfig::from_toml_str(config).unwrap();
    SipServer::start(config, Arc::new(OptionsResponder::default()))
        .await
        .unwrap()
}

async fn udp_exchange(socket: &UdpSocket, server: SocketAddr, message: &str) -> Response {
    socket.send_to(message.as_bytes(), server).await.unwrap();
    let mut buf = vec![0u8; 4096];
    let (len, _) = timeout(Duration::from_secs(2), socket.recv_from(&mut buf))
        .await
        .expect("no response")
        .unwrap();
    parse_response(&buf[..len])
}

#[tokio::test]
#[serial]
async fn test_udp_options_and_rejection() {
    let mut server = start("udp = \"127.0.0.1:0\"").await;
    let server_addr = server.local_addr(TransportKind::Udp).unwrap();
    assert!(server.local_addr(TransportKind::Tcp).is_none());

    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let options = request("OPTIONS", "UDP", "z9hG4bKsrv1", "srv-1");
    let ok = udp_exchange(&socket, server_addr, &options).await;
    assert_eq!(ok.status().as_u16(), 200);
    assert!(ok.to_tag().is_some());
    assert_eq!(
        ok.header(&HeaderName::Allow).and_then(|v| v.as_text()),
        Some("INVITE, ACK, CANCEL, BYE, OPTIONS")
    );

    let unknown = request("MESSAGE", "UDP", "z9hG4bKsrv2", "srv-2");
    let rejected = udp_exchange(&socket, server_addr, &unknown).await;
    assert_eq!(rejected.status().as_u16(), 404);
    assert_eq!(rejected.call_id(), Some("srv-2"));

    let stats = server.stats();
    assert_eq!(stats.server_transactions_total, 2);

    server.stop().await.unwrap();
    assert!(!server.is_running());
}

#[tokio::test]
#[serial]
async fn test_tcp_options() {
    let mut server = start("tcp = \"127.0.0.1:0\"").await;
    let server_addr = server.local_addr(TransportKind::Tcp).unwrap();

    let mut stream = TcpStream::connect(server_addr).await.unwrap();
    stream
        .write_all(request("OPTIONS", "TCP", "z9hG4bKtcp1", "srv-tcp").as_bytes())
        .await
        .unwrap();

    let mut received = Vec::new();
    let mut buf = [0u8; 2048];
    let response = timeout(Duration::from_secs(2), async {
        loop {
            let n = stream.read(&mut buf).await.unwrap();
            assert!(n > 0, "connection closed before a response arrived");
            received.extend_from_slice(&buf[..n]);
            if received.windows(4).any(|w| w == b"\r\n\r\n") {
                return parse_response(&received);
            }
        }
    })
    .await
    .expect("no response");

    assert_eq!(response.status().as_u16(), 200);
    server.stop().await.unwrap();
}

#[tokio::test]
#[serial]
async fn test_bind_failure_reports_error() {
    let taken = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let addr = taken.local_addr().unwrap();
    let config = ServerConfig::from_toml_str(&format!("udp = \"{}\"", addr)).unwrap();
    let result = SipServer::start(config, Arc::new(OptionsResponder::default())).await;
    assert!(result.is_err());
}
