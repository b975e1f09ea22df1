//! End-to-end connector tests against local fake servers.

use std::io::{BufRead, BufReader, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use tether_connectors::{CheckStatus, ConnectorKind, ConnectorRegistry, ManagedConnector};
use tether_core::{CancelToken, ConnectionParams, LifecycleState};
use tether_fetch::{FetchPermitGate, ThrottleSpec, Wait};
use tether_session::SessionSettings;

// ============================================================================
// Fake Servers
// ============================================================================

const SERVICE_DOC: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<app:service xmlns:app="http://www.w3.org/2007/app" xmlns:cmis="http://docs.oasis-open.org/ns/cmis/core/200908/" xmlns:cmisra="http://docs.oasis-open.org/ns/cmis/restatom/200908/">
  <app:workspace>
    <cmisra:repositoryInfo>
      <cmis:repositoryId>A1</cmis:repositoryId>
      <cmis:repositoryName>Main</cmis:repositoryName>
    </cmisra:repositoryInfo>
  </app:workspace>
</app:service>"#;

const SOAP_RESPONSE: &str = r#"<S:Envelope xmlns:S="http://schemas.xmlsoap.org/soap/envelope/"><S:Body>
<getRepositoriesResponse xmlns="http://docs.oasis-open.org/ns/cmis/messaging/200908/">
<repositories><repositoryId>R9</repositoryId><repositoryName>Records</repositoryName></repositories>
</getRepositoriesResponse></S:Body></S:Envelope>"#;

struct FakeHttp {
    addr: SocketAddr,
    requests: Arc<Mutex<Vec<String>>>,
}

impl FakeHttp {
    fn url(&self, path: &str) -> String {
        format!("http://{}{path}", self.addr)
    }

    fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }
}

/// Answers every request with `status` and `body`, closing each connection.
fn serve_http(status: u16, body: &'static str) -> FakeHttp {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let requests = Arc::new(Mutex::new(Vec::new()));
    let log = Arc::clone(&requests);

    thread::spawn(move || {
        for stream in listener.incoming() {
            let Ok(mut stream) = stream else { break };
            let request = read_http_request(&stream);
            log.lock().unwrap().push(request);
            let response = format!(
                "HTTP/1.1 {status} Fake\r\nContent-Type: application/xml\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            let _ = stream.write_all(response.as_bytes());
        }
    });

    FakeHttp { addr, requests }
}

fn read_http_request(stream: &TcpStream) -> String {
    let mut reader = BufReader::new(stream);
    let mut head = String::new();
    let mut content_length = 0;
    loop {
        let mut line = String::new();
        if reader.read_line(&mut line).unwrap_or(0) == 0 {
            break;
        }
        if let Some(value) = line.to_lowercase().strip_prefix("content-length:") {
            content_length = value.trim().parse().unwrap_or(0);
        }
        head.push_str(&line);
        if line == "\r\n" {
            break;
        }
    }
    let mut body = vec![0u8; content_length];
    let _ = reader.read_exact(&mut body);
    head.push_str(&String::from_utf8_lossy(&body));
    head
}

/// Length of the reply sent by [`serve_mongo`].
const MONGO_REPLY_LEN: u64 = 38;

fn mongo_ok_reply(response_to: i32) -> Vec<u8> {
    let mut doc = Vec::new();
    doc.extend_from_slice(&17i32.to_le_bytes());
    doc.push(0x01);
    doc.extend_from_slice(b"ok\0");
    doc.extend_from_slice(&1.0f64.to_le_bytes());
    doc.push(0);

    let len = i32::try_from(16 + 4 + 1 + doc.len()).unwrap();
    let mut msg = Vec::new();
    msg.extend_from_slice(&len.to_le_bytes());
    msg.extend_from_slice(&1i32.to_le_bytes());
    msg.extend_from_slice(&response_to.to_le_bytes());
    msg.extend_from_slice(&2013i32.to_le_bytes());
    msg.extend_from_slice(&0u32.to_le_bytes());
    msg.push(0);
    msg.extend_from_slice(&doc);
    msg
}

fn mongo_auth_failed_reply(response_to: i32) -> Vec<u8> {
    let mut doc = Vec::new();
    doc.push(0x01);
    doc.extend_from_slice(b"ok\0");
    doc.extend_from_slice(&0.0f64.to_le_bytes());
    doc.push(0x02);
    doc.extend_from_slice(b"errmsg\0");
    let text = b"Authentication failed.\0";
    doc.extend_from_slice(&i32::try_from(text.len()).unwrap().to_le_bytes());
    doc.extend_from_slice(text);
    doc.push(0x10);
    doc.extend_from_slice(b"code\0");
    doc.extend_from_slice(&18i32.to_le_bytes());
    doc.push(0);
    let doc_len = i32::try_from(doc.len() + 4).unwrap();

    let len = i32::try_from(16 + 4 + 1 + 4 + doc.len()).unwrap();
    let mut msg = Vec::new();
    msg.extend_from_slice(&len.to_le_bytes());
    msg.extend_from_slice(&1i32.to_le_bytes());
    msg.extend_from_slice(&response_to.to_le_bytes());
    msg.extend_from_slice(&2013i32.to_le_bytes());
    msg.extend_from_slice(&0u32.to_le_bytes());
    msg.push(0);
    msg.extend_from_slice(&doc_len.to_le_bytes());
    msg.extend_from_slice(&doc);
    msg
}

/// Answers every `OP_MSG` with `{ ok: 1.0 }`.
fn serve_mongo() -> SocketAddr {
    serve_mongo_with(None, mongo_ok_reply)
}

/// Answers every `OP_MSG` with `reply`. With `delay_second`, the first
/// connection answers its second request only after that delay.
fn serve_mongo_with(delay_second: Option<Duration>, reply: fn(i32) -> Vec<u8>) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    thread::spawn(move || {
        for (connection, stream) in listener.incoming().enumerate() {
            let Ok(mut stream) = stream else { break };
            thread::spawn(move || {
                let mut requests = 0;
                loop {
                    let mut header = [0u8; 16];
                    if stream.read_exact(&mut header).is_err() {
                        return;
                    }
                    let len = i32::from_le_bytes(header[0..4].try_into().unwrap());
                    let request_id = i32::from_le_bytes(header[4..8].try_into().unwrap());
                    let mut body = vec![0u8; usize::try_from(len).unwrap() - 16];
                    if stream.read_exact(&mut body).is_err() {
                        return;
                    }
                    requests += 1;
                    if let Some(delay) = delay_second.filter(|_| connection == 0 && requests == 2) {
                        thread::sleep(delay);
                    }
                    if stream.write_all(&reply(request_id)).is_err() {
                        return;
                    }
                }
            });
        }
    });
    addr
}

/// Accepts connections and reads requests without ever answering.
fn serve_silent() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    thread::spawn(move || {
        for stream in listener.incoming() {
            let Ok(mut stream) = stream else { break };
            thread::spawn(move || {
                let mut sink = [0u8; 1024];
                while matches!(stream.read(&mut sink), Ok(n) if n > 0) {}
            });
        }
    });
    addr
}

async fn eventually(mut condition: impl FnMut() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}

fn unused_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

fn open(kind: ConnectorKind, params: &ConnectionParams) -> Arc<dyn ManagedConnector> {
    let gate = Arc::new(FetchPermitGate::new(ThrottleSpec::new(2)));
    ConnectorRegistry::open(kind, params, SessionSettings::default(), gate).unwrap()
}

// ============================================================================
// CMIS
// ============================================================================

fn cmis_params(endpoint: &str) -> ConnectionParams {
    ConnectionParams::new()
        .with("binding", "atom")
        .with("username", "crawler")
        .with("password", "s3cret")
        .with("endpoint", endpoint)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_cmis_atom_check_working() {
    let server = serve_http(200, SERVICE_DOC);
    let connector = open(ConnectorKind::Cmis, &cmis_params(&server.url("/cmis/atom")));
    let cancel = CancelToken::new();

    let status = connector.check(&cancel).await;
    assert_eq!(status, CheckStatus::Working);
    assert_eq!(status.to_string(), "Connection working");
    assert_eq!(connector.state(), LifecycleState::Active);

    let requests = server.requests();
    assert_eq!(requests.len(), 2, "connect plus check");
    let first = requests[0].to_lowercase();
    assert!(first.starts_with("get /cmis/atom "));
    assert!(first.contains("authorization: basic "));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_cmis_unknown_repository_fails() {
    let server = serve_http(200, SERVICE_DOC);
    let params = cmis_params(&server.url("/cmis/atom")).with("repositoryId", "Z");
    let connector = open(ConnectorKind::Cmis, &params);

    let status = connector.check(&CancelToken::new()).await;
    assert_eq!(status.to_string(), "Connection failed: Repository Z not found");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_cmis_unauthorized_is_fatal() {
    let server = serve_http(401, "");
    let connector = open(ConnectorKind::Cmis, &cmis_params(&server.url("/cmis/atom")));

    let status = connector.check(&CancelToken::new()).await;
    assert!(matches!(status, CheckStatus::Failed { .. }), "{status}");
    assert!(status.to_string().contains("401"));
    assert_eq!(connector.stats().sessions_created, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_cmis_unavailable_is_transient() {
    let server = serve_http(503, "");
    let connector = open(ConnectorKind::Cmis, &cmis_params(&server.url("/cmis/atom")));

    let status = connector.check(&CancelToken::new()).await;
    assert!(
        matches!(status, CheckStatus::TemporarilyFailed { .. }),
        "{status}"
    );
    assert!(status.to_string().starts_with("Connection temporarily failed: "));
    assert_eq!(server.requests().len(), 1, "no prior session, no retry");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_cmis_ws_binding_posts_soap() {
    let server = serve_http(200, SOAP_RESPONSE);
    let params = cmis_params(&server.url("/cmis/services")).with("binding", "ws");
    let connector = open(ConnectorKind::Cmis, &params);

    assert_eq!(connector.check(&CancelToken::new()).await, CheckStatus::Working);
    let request = server.requests().remove(0);
    assert!(request.starts_with("POST /cmis/services/RepositoryService "));
    assert!(request.contains("<wsse:Username>crawler</wsse:Username>"));
    assert!(request.contains("getRepositories"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_cmis_bad_binding_spawns_no_worker() {
    let connector = open(
        ConnectorKind::Cmis,
        &cmis_params("http://127.0.0.1:1/cmis").with("binding", "browser"),
    );

    let status = connector.check(&CancelToken::new()).await;
    assert!(matches!(status, CheckStatus::Failed { .. }));
    assert!(status.to_string().contains("binding"));
    assert_eq!(connector.stats().workers_spawned, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_cmis_sample_reads_through_permit() {
    let server = serve_http(200, SERVICE_DOC);
    let connector = open(ConnectorKind::Cmis, &cmis_params(&server.url("/cmis/atom")));

    let bytes = connector
        .sample(&CancelToken::new(), Wait::Blocking)
        .await
        .unwrap();
    assert_eq!(bytes, SERVICE_DOC.len() as u64);
    assert_eq!(connector.bin_name(), format!("127.0.0.1:{}", server.addr.port()));
}

// ============================================================================
// MongoDB
// ============================================================================

fn mongo_params(port: u16) -> ConnectionParams {
    ConnectionParams::new()
        .with("host", "127.0.0.1")
        .with("port", port.to_string())
        .with("database", "crawl")
        .with("collection", "docs")
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_mongodb_check_reuses_session() {
    let addr = serve_mongo();
    let connector = open(ConnectorKind::Mongodb, &mongo_params(addr.port()));
    let cancel = CancelToken::new();

    assert_eq!(connector.check(&cancel).await, CheckStatus::Working);
    assert_eq!(connector.check(&cancel).await, CheckStatus::Working);
    assert_eq!(connector.stats().sessions_created, 1);

    connector.disconnect().await;
    assert_eq!(connector.state(), LifecycleState::Idle);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_mongodb_sample_counts_reply_bytes() {
    let addr = serve_mongo();
    let connector = open(ConnectorKind::Mongodb, &mongo_params(addr.port()));

    let bytes = connector
        .sample(&CancelToken::new(), Wait::Blocking)
        .await
        .unwrap();
    assert_eq!(bytes, MONGO_REPLY_LEN);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_mongodb_refused_is_transient() {
    let connector = open(ConnectorKind::Mongodb, &mongo_params(unused_port()));

    let status = connector.check(&CancelToken::new()).await;
    assert!(
        matches!(status, CheckStatus::TemporarilyFailed { .. }),
        "{status}"
    );
    assert!(status.to_string().contains("Cannot connect to"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_mongodb_missing_database_is_fatal() {
    let params = ConnectionParams::new().with("collection", "docs");
    let connector = open(ConnectorKind::Mongodb, &params);

    let status = connector.check(&CancelToken::new()).await;
    assert_eq!(
        status.to_string(),
        "Connection failed: Parameter database required but not set"
    );
    assert_eq!(connector.stats().workers_spawned, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_mongodb_bad_port_is_fatal() {
    let params = mongo_params(27017).with("port", "mongo");
    let connector = open(ConnectorKind::Mongodb, &params);

    let status = connector.check(&CancelToken::new()).await;
    assert!(matches!(status, CheckStatus::Failed { .. }));
    assert!(status.to_string().contains("Invalid parameter port"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_mongodb_check_after_cancelled_check() {
    let addr = serve_mongo_with(Some(Duration::from_millis(400)), mongo_ok_reply);
    let connector = open(ConnectorKind::Mongodb, &mongo_params(addr.port()));

    let cancel = CancelToken::new();
    let first = {
        let connector = Arc::clone(&connector);
        let cancel = cancel.clone();
        tokio::spawn(async move { connector.check(&cancel).await })
    };
    tokio::time::sleep(Duration::from_millis(150)).await;
    cancel.cancel();
    assert_eq!(first.await.unwrap(), CheckStatus::Cancelled);

    // The late reply to the abandoned ping must not be read as this one's.
    let second = connector.check(&CancelToken::new()).await;
    assert_eq!(second, CheckStatus::Working, "{second}");
    assert_eq!(connector.stats().sessions_created, 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_mongodb_rejected_credentials_are_fatal() {
    let addr = serve_mongo_with(None, mongo_auth_failed_reply);
    let params = mongo_params(addr.port())
        .with("username", "crawler")
        .with("password", "wrong");
    let connector = open(ConnectorKind::Mongodb, &params);

    let status = connector.check(&CancelToken::new()).await;
    assert!(matches!(status, CheckStatus::Failed { .. }), "{status}");
    assert_eq!(
        status.to_string(),
        "Connection failed: Authentication failed: Authentication failed."
    );
    assert_eq!(connector.stats().sessions_created, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_slow_connect_holds_no_fetch_permit() {
    let addr = serve_silent();
    let gate = Arc::new(FetchPermitGate::new(ThrottleSpec::new(1)));
    let connector = ConnectorRegistry::open(
        ConnectorKind::Mongodb,
        &mongo_params(addr.port()),
        SessionSettings::default(),
        Arc::clone(&gate),
    )
    .unwrap();

    let cancel = CancelToken::new();
    let sampler = {
        let connector = Arc::clone(&connector);
        let cancel = cancel.clone();
        tokio::spawn(async move { connector.sample(&cancel, Wait::Blocking).await })
    };
    eventually(|| connector.state() == LifecycleState::Acquiring).await;

    // The only permit in the bin is still free while the connect hangs.
    let permit = gate
        .acquire_permit(
            connector.bin_name(),
            Wait::within(Duration::from_millis(100)),
            &CancelToken::new(),
        )
        .await
        .unwrap();
    permit.release();

    cancel.cancel();
    assert!(sampler.await.unwrap().unwrap_err().is_cancelled());
}
