#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;

use siplet_sip_core::{CSeq, Framing, Method, Request, Response, SipMessage, StatusCode};
use siplet_sip_transport::{
    Decoded, Error as TransportError, MessageDecoder, SipConnection, TransportKind,
};
use siplet_transaction_core::{
    ClientTransactionListener, SessionContext, SipHandler, TransactionConfig, TransactionKey,
    TransactionManager,
};

pub const CALL_ID: &str = "call-1@127.0.0.1";

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("siplet_transaction_core=debug")
        .with_test_writer()
        .try_init();
}

/// Connection recording every message written to it
#[derive(Debug)]
pub struct MockConnection {
    transport: TransportKind,
    max_message_size: usize,
    written: Mutex<Vec<Bytes>>,
}

impl MockConnection {
    pub fn udp() -> Arc<Self> {
        Self::new(TransportKind::Udp)
    }

    pub fn tcp() -> Arc<Self> {
        Self::new(TransportKind::Tcp)
    }

    /// UDP connection refusing messages over `max_message_size` bytes
    pub fn udp_with_limit(max_message_size: usize) -> Arc<Self> {
        Arc::new(Self {
            transport: TransportKind::Udp,
            max_message_size,
            written: Mutex::new(Vec::new()),
        })
    }

    fn new(transport: TransportKind) -> Arc<Self> {
        Arc::new(Self {
            transport,
            max_message_size: 8192,
            written: Mutex::new(Vec::new()),
        })
    }

    pub fn count(&self) -> usize {
        self.written.lock().len()
    }

    pub fn messages(&self) -> Vec<SipMessage> {
        self.written
            .lock()
            .iter()
            .map(|bytes| match MessageDecoder::new(Framing::Datagram).decode_datagram(bytes) {
                Some(Decoded::Message(message)) => message,
                other => panic!("written bytes do not parse: {:?}", other),
            })
            .collect()
    }

    pub fn statuses(&self) -> Vec<u16> {
        self.messages()
            .iter()
            .filter_map(|m| m.as_response().map(|r| r.status().as_u16()))
            .collect()
    }

    pub fn last_request(&self) -> Option<Request> {
        self.messages().into_iter().rev().find_map(SipMessage::into_request)
    }
}

impl SipConnection for MockConnection {
    fn transport(&self) -> TransportKind {
        self.transport
    }

    fn local_addr(&self) -> SocketAddr {
        "127.0.0.1:5060".parse().unwrap()
    }

    fn remote_addr(&self) -> SocketAddr {
        "127.0.0.1:5070".parse().unwrap()
    }

    fn is_open(&self) -> bool {
        true
    }

    fn max_message_size(&self) -> usize {
        self.max_message_size
    }

    fn write(&self, bytes: Bytes) -> Result<(), TransportError> {
        self.written.lock().push(bytes);
        Ok(())
    }
}

pub fn request(method: Method, seq: u32, branch: &str, to_tag: Option<&str>) -> Request {
    request_in(CALL_ID, method, seq, branch, to_tag)
}

pub fn request_in(
    call_id: &str,
    method: Method,
    seq: u32,
    branch: &str,
    to_tag: Option<&str>,
) -> Request {
    let mut request = Request::new(method.clone(), "sip:bob@127.0.0.1".parse().unwrap());
    request
        .push_via(format!("SIP/2.0/UDP 127.0.0.1:5070;branch={}", branch).parse().unwrap())
        .unwrap();
    let to = match to_tag {
        Some(tag) => format!("<sip:bob@127.0.0.1>;tag={}", tag),
        None => "<sip:bob@127.0.0.1>".to_string(),
    };
    request
        .set_dialog_headers(
            "<sip:alice@127.0.0.1>;tag=a1".parse().unwrap(),
            to.parse().unwrap(),
            call_id,
            CSeq::new(seq, method),
        )
        .unwrap();
    request
}

/// Handler answering every request with a fixed status and recording callbacks
pub struct TestHandler {
    status: StatusCode,
    pub requests: Mutex<Vec<Method>>,
    pub acks: AtomicUsize,
    pub timeouts: Mutex<Vec<TransactionKey>>,
}

impl TestHandler {
    pub fn new(status: StatusCode) -> Arc<Self> {
        Arc::new(Self {
            status,
            requests: Mutex::new(Vec::new()),
            acks: AtomicUsize::new(0),
            timeouts: Mutex::new(Vec::new()),
        })
    }

    pub fn ack_count(&self) -> usize {
        self.acks.load(Ordering::SeqCst)
    }
}

impl SipHandler for TestHandler {
    fn handle_request(&self, ctx: &mut SessionContext<'_>, key: &TransactionKey, request: Request) {
        self.requests.lock().push(request.method().clone());
        let mut response = request.create_response(self.status, None).unwrap();
        if self.status.as_u16() > 100 && response.to_tag().is_none() {
            response.set_to_tag("b1").unwrap();
        }
        ctx.send_response(key, response).unwrap();
    }

    fn handle_ack(
        &self,
        _ctx: &mut SessionContext<'_>,
        _ack: Request,
        _connection: Arc<dyn SipConnection>,
    ) {
        self.acks.fetch_add(1, Ordering::SeqCst);
    }

    fn transaction_timeout(&self, _ctx: &mut SessionContext<'_>, key: &TransactionKey) {
        self.timeouts.lock().push(key.clone());
    }
}

/// Listener recording every response status
#[derive(Default)]
pub struct RecordingListener {
    pub statuses: Mutex<Vec<u16>>,
    pub terminated: AtomicUsize,
}

impl ClientTransactionListener for RecordingListener {
    fn handle_response(
        &self,
        _ctx: &mut SessionContext<'_>,
        _key: &TransactionKey,
        response: Response,
    ) {
        self.statuses.lock().push(response.status().as_u16());
    }

    fn transaction_terminated(&self, _ctx: &mut SessionContext<'_>, _key: &TransactionKey) {
        self.terminated.fetch_add(1, Ordering::SeqCst);
    }
}

pub fn manager(handler: Arc<dyn SipHandler>) -> TransactionManager {
    init_tracing();
    TransactionManager::new(TransactionConfig::default(), handler)
}

/// Poll `condition` every few milliseconds until it holds or `timeout` passes
pub async fn wait_for(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}
