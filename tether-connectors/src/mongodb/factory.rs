//! MongoDB endpoint probe.

use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use tether_core::{ConnectionParams, CoreError, ErrorTaxonomy, Interrupt, SessionFactory};
use tether_fetch::{StreamThrottle, ThrottledRead};
use tracing::{debug, info, instrument, warn};

use super::error::{ProbeError, ProbeTaxonomy};
use super::scram::{self, ScramClient};
use super::wire::{self, DocumentBuilder, Reply};
use crate::connector::FetchTarget;

/// Parameter names.
pub mod params {
    /// Server host name or address.
    pub const HOST: &str = "host";
    /// Server port.
    pub const PORT: &str = "port";
    /// Database user.
    pub const USERNAME: &str = "username";
    /// Database password.
    pub const PASSWORD: &str = "password";
    /// Database to probe.
    pub const DATABASE: &str = "database";
    /// Collection documents are read from.
    pub const COLLECTION: &str = "collection";
}

/// Default server port.
pub const DEFAULT_PORT: u16 = 27017;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const REPLY_TIMEOUT: Duration = Duration::from_secs(10);

/// Socket read timeout between interrupt checks.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

fn parse_port(raw: Option<&str>) -> Result<u16, ProbeError> {
    match raw {
        None => Ok(DEFAULT_PORT),
        Some(value) => match value.trim().parse::<u16>() {
            Ok(port) if port > 0 => Ok(port),
            _ => Err(ProbeError::InvalidPort(value.to_string())),
        },
    }
}

// ============================================================================
// Credentials
// ============================================================================

/// A user to authenticate as.
struct Credentials {
    username: String,
    password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

impl Credentials {
    /// Reads credentials from the parameters; none without a username.
    fn from_params(params: &ConnectionParams) -> Option<Self> {
        let username = params.get(params::USERNAME).filter(|u| !u.is_empty())?;
        Some(Self {
            username: username.to_string(),
            password: params.get_or(params::PASSWORD, "").to_string(),
        })
    }
}

// ============================================================================
// Session
// ============================================================================

/// An open connection to a MongoDB server.
#[derive(Debug)]
pub struct MongoSession {
    stream: Mutex<TcpStream>,
    peer: SocketAddr,
    database: String,
    collection: String,
    next_request: AtomicI32,
    /// Set while a request is on the wire and its reply unread.
    broken: AtomicBool,
}

impl MongoSession {
    /// Returns the connected address.
    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Returns the database name.
    pub fn database(&self) -> &str {
        &self.database
    }

    /// Returns the collection name.
    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Returns true once an exchange was left unfinished.
    pub fn is_broken(&self) -> bool {
        self.broken.load(Ordering::Acquire)
    }

    /// Sends `ping` and waits for a successful reply.
    ///
    /// Returns the size of the reply in bytes.
    fn ping(&self, throttle: Option<&StreamThrottle>, interrupt: &Interrupt) -> Result<u64, ProbeError> {
        let (reply, bytes) = self.round_trip(wire::ping(), throttle, interrupt)?;
        if !reply.ok {
            return Err(ProbeError::CommandFailed(
                reply.errmsg.unwrap_or_else(|| "ping refused".to_string()),
            ));
        }
        Ok(bytes)
    }

    /// Runs the SCRAM-SHA-256 conversation against this session's database.
    fn authenticate(&self, credentials: &Credentials, interrupt: &Interrupt) -> Result<(), ProbeError> {
        let client = ScramClient::new(&credentials.username, &credentials.password)?;
        let start = DocumentBuilder::default()
            .int32("saslStart", 1)
            .string("mechanism", scram::MECHANISM)
            .binary("payload", client.client_first().as_bytes())
            .int32("autoAuthorize", 1);
        let reply = self.sasl_step(start, interrupt)?;
        let conversation = reply
            .conversation_id
            .ok_or_else(|| ProbeError::Malformed("saslStart reply without conversationId".to_string()))?;

        let last = client.client_final(&sasl_payload(&reply)?)?;
        let reply = self.sasl_step(sasl_continue(conversation, last.message.as_bytes()), interrupt)?;
        last.verify(&sasl_payload(&reply)?)?;

        // The server may want one empty round before it calls the conversation done.
        if !reply.done && !self.sasl_step(sasl_continue(conversation, &[]), interrupt)?.done {
            return Err(ProbeError::AuthFailed("conversation did not complete".to_string()));
        }
        debug!(peer = %self.peer, user = %credentials.username, "Authenticated");
        Ok(())
    }

    fn sasl_step(&self, command: DocumentBuilder, interrupt: &Interrupt) -> Result<Reply, ProbeError> {
        let (reply, _) = self.round_trip(command, None, interrupt)?;
        if reply.ok {
            Ok(reply)
        } else {
            Err(ProbeError::AuthFailed(
                reply.errmsg.unwrap_or_else(|| "credentials refused".to_string()),
            ))
        }
    }

    /// Writes one command and reads its reply.
    ///
    /// An exchange that does not finish leaves the session broken, and every
    /// later call fails with [`ProbeError::Abandoned`] instead of reading a
    /// reply meant for someone else.
    fn round_trip(
        &self,
        command: DocumentBuilder,
        throttle: Option<&StreamThrottle>,
        interrupt: &Interrupt,
    ) -> Result<(Reply, u64), ProbeError> {
        let stream = self.stream.lock().unwrap_or_else(PoisonError::into_inner);
        if self.broken.swap(true, Ordering::AcqRel) {
            return Err(ProbeError::Abandoned);
        }
        let request_id = self.next_request.fetch_add(1, Ordering::Relaxed);

        (&*stream)
            .write_all(&wire::encode_command(request_id, &self.database, command))
            .map_err(|e| ProbeError::from_io("write", e))?;

        let mut reader = Polled::new(&stream, interrupt, REPLY_TIMEOUT);
        let (reply, bytes) = match throttle {
            Some(throttle) => {
                let mut paced = ThrottledRead::new(&mut reader, throttle.clone());
                let reply = wire::read_reply(&mut paced)?;
                (reply, throttle.bytes_read())
            }
            None => (wire::read_reply(&mut reader)?, 0),
        };

        if reply.response_to != request_id {
            return Err(ProbeError::Malformed(format!(
                "reply to request {} while waiting for {request_id}",
                reply.response_to
            )));
        }
        self.broken.store(false, Ordering::Release);
        Ok((reply, bytes))
    }
}

fn sasl_continue(conversation: i32, payload: &[u8]) -> DocumentBuilder {
    DocumentBuilder::default()
        .int32("saslContinue", 1)
        .int32("conversationId", conversation)
        .binary("payload", payload)
}

fn sasl_payload(reply: &Reply) -> Result<String, ProbeError> {
    let payload = reply
        .payload
        .as_deref()
        .ok_or_else(|| ProbeError::Malformed("SASL reply without payload".to_string()))?;
    String::from_utf8(payload.to_vec())
        .map_err(|_| ProbeError::Malformed("SASL payload is not UTF-8".to_string()))
}

// ============================================================================
// Interruptible Reader
// ============================================================================

/// Reads from a socket with a short timeout, checking the interrupt between
/// attempts.
struct Polled<'a> {
    stream: &'a TcpStream,
    interrupt: &'a Interrupt,
    deadline: Instant,
}

impl<'a> Polled<'a> {
    fn new(stream: &'a TcpStream, interrupt: &'a Interrupt, timeout: Duration) -> Self {
        Self {
            stream,
            interrupt,
            deadline: Instant::now() + timeout,
        }
    }
}

impl Read for Polled<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            if self.interrupt.is_requested() {
                return Err(io::Error::other(ProbeError::Interrupted));
            }
            match self.stream.read(buf) {
                Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {
                    if Instant::now() >= self.deadline {
                        return Err(io::Error::other(ProbeError::Timeout("reply")));
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                other => return other,
            }
        }
    }
}

// ============================================================================
// Factory
// ============================================================================

/// Opens connections to a MongoDB server.
#[derive(Debug, Clone, Copy, Default)]
pub struct MongoFactory;

impl MongoFactory {
    /// Creates a factory.
    pub fn new() -> Self {
        Self
    }

    fn resolve(host: &str, port: u16) -> Result<Vec<SocketAddr>, ProbeError> {
        let addrs: Vec<SocketAddr> = (host, port)
            .to_socket_addrs()
            .map_err(|source| ProbeError::Resolve {
                host: host.to_string(),
                source,
            })?
            .collect();
        if addrs.is_empty() {
            return Err(ProbeError::NoAddress(host.to_string()));
        }
        Ok(addrs)
    }

    fn open(addrs: &[SocketAddr], interrupt: &Interrupt) -> Result<TcpStream, ProbeError> {
        let mut last = None;
        for addr in addrs {
            if interrupt.is_requested() {
                return Err(ProbeError::Interrupted);
            }
            match TcpStream::connect_timeout(addr, CONNECT_TIMEOUT) {
                Ok(stream) => return Ok(stream),
                Err(source) => {
                    debug!(%addr, error = %source, "Connect attempt failed");
                    last = Some(ProbeError::Connect { addr: *addr, source });
                }
            }
        }
        Err(last.unwrap_or(ProbeError::Closed))
    }
}

impl SessionFactory for MongoFactory {
    type Session = MongoSession;
    type Error = ProbeError;

    fn name(&self) -> &str {
        "mongodb"
    }

    fn required_params(&self) -> &'static [&'static str] {
        &[params::HOST, params::DATABASE, params::COLLECTION]
    }

    fn validate(&self, params: &ConnectionParams) -> Result<(), CoreError> {
        parse_port(params.get(params::PORT))
            .map(|_| ())
            .map_err(|err| CoreError::invalid(params::PORT, err.to_string()))
    }

    #[instrument(skip_all, fields(host = params.get_or(params::HOST, "")))]
    fn connect(&self, params: &ConnectionParams, interrupt: &Interrupt) -> Result<MongoSession, ProbeError> {
        let host = params.get_or(params::HOST, "localhost");
        let port = parse_port(params.get(params::PORT))?;
        let addrs = Self::resolve(host, port)?;

        let stream = Self::open(&addrs, interrupt)?;
        stream
            .set_read_timeout(Some(POLL_INTERVAL))
            .map_err(|e| ProbeError::from_io("configure", e))?;
        stream
            .set_nodelay(true)
            .map_err(|e| ProbeError::from_io("configure", e))?;
        let peer = stream
            .peer_addr()
            .map_err(|e| ProbeError::from_io("connect", e))?;

        let session = MongoSession {
            stream: Mutex::new(stream),
            peer,
            database: params.get_or(params::DATABASE, "admin").to_string(),
            collection: params.get_or(params::COLLECTION, "").to_string(),
            next_request: AtomicI32::new(1),
            broken: AtomicBool::new(false),
        };
        let credentials = Credentials::from_params(params);
        if let Some(credentials) = &credentials {
            session.authenticate(credentials, interrupt)?;
        }
        session.ping(None, interrupt)?;

        info!(
            %peer,
            database = %session.database,
            authenticated = credentials.is_some(),
            "MongoDB session created"
        );
        Ok(session)
    }

    fn check(&self, session: &MongoSession, interrupt: &Interrupt) -> Result<(), ProbeError> {
        session.ping(None, interrupt).map(|_| ())
    }

    fn teardown(&self, session: &MongoSession) -> Result<(), ProbeError> {
        let stream = session.stream.lock().unwrap_or_else(PoisonError::into_inner);
        match stream.shutdown(Shutdown::Both) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotConnected => {
                warn!(peer = %session.peer, "Peer already disconnected");
                Ok(())
            }
            Err(e) => Err(ProbeError::from_io("shutdown", e)),
        }
    }

    fn taxonomy(&self) -> Arc<dyn ErrorTaxonomy> {
        Arc::new(ProbeTaxonomy)
    }
}

impl FetchTarget for MongoFactory {
    fn bin_name(params: &ConnectionParams) -> String {
        let host = params.get_or(params::HOST, "localhost");
        let port = parse_port(params.get(params::PORT)).unwrap_or(DEFAULT_PORT);
        format!("{host}:{port}")
    }

    fn sample(
        session: &MongoSession,
        throttle: &StreamThrottle,
        interrupt: &Interrupt,
    ) -> Result<u64, ProbeError> {
        session.ping(Some(throttle), interrupt)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;
    use std::num::NonZeroU32;
    use std::thread;

    use base64::prelude::*;
    use tether_core::ErrorKind;

    fn serve(handler: impl FnOnce(TcpStream) + Send + 'static) -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        thread::spawn(move || {
            if let Ok((stream, _)) = listener.accept() {
                handler(stream);
            }
        });
        port
    }

    fn answer(stream: &mut TcpStream, response_to: i32, document: DocumentBuilder) {
        stream
            .write_all(&wire::encode_message(100, response_to, &document.finish()))
            .unwrap();
    }

    fn ok() -> DocumentBuilder {
        DocumentBuilder::default().double("ok", 1.0)
    }

    fn test_params(port: u16) -> ConnectionParams {
        ConnectionParams::new()
            .with(params::HOST, "127.0.0.1")
            .with(params::PORT, port.to_string())
            .with(params::DATABASE, "crawl")
            .with(params::COLLECTION, "docs")
    }

    #[test]
    fn test_interrupted_exchange_breaks_session() {
        let port = serve(|mut stream| {
            wire::read_reply(&mut stream).unwrap();
            answer(&mut stream, 1, ok());
            // Swallow the next request and never answer it.
            let _ = wire::read_reply(&mut stream);
            thread::sleep(Duration::from_secs(2));
        });
        let factory = MongoFactory::new();
        let session = factory.connect(&test_params(port), &Interrupt::new()).unwrap();
        assert!(!session.is_broken());

        let interrupt = Interrupt::new();
        let raiser = {
            let interrupt = interrupt.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(150));
                interrupt.request();
            })
        };
        assert!(matches!(
            factory.check(&session, &interrupt),
            Err(ProbeError::Interrupted)
        ));
        raiser.join().unwrap();
        assert!(session.is_broken());

        let err = factory.check(&session, &Interrupt::new()).unwrap_err();
        assert!(matches!(err, ProbeError::Abandoned));
        assert_eq!(ProbeTaxonomy.kind_of(&err), Some(ErrorKind::Network));
    }

    #[test]
    fn test_refused_ping_leaves_session_usable() {
        let port = serve(|mut stream| {
            wire::read_reply(&mut stream).unwrap();
            answer(&mut stream, 1, ok());
            wire::read_reply(&mut stream).unwrap();
            answer(
                &mut stream,
                2,
                DocumentBuilder::default().string("errmsg", "busy").double("ok", 0.0),
            );
            wire::read_reply(&mut stream).unwrap();
            answer(&mut stream, 3, ok());
        });
        let factory = MongoFactory::new();
        let session = factory.connect(&test_params(port), &Interrupt::new()).unwrap();

        let err = factory.check(&session, &Interrupt::new()).unwrap_err();
        assert!(matches!(err, ProbeError::CommandFailed(ref msg) if msg == "busy"));
        assert!(!session.is_broken());
        factory.check(&session, &Interrupt::new()).unwrap();
    }

    #[test]
    fn test_scram_conversation_authenticates() {
        const SALT: &[u8] = b"tether-salt";
        let port = serve(|mut stream| {
            let start = wire::read_reply(&mut stream).unwrap();
            let client_first = String::from_utf8(start.payload.unwrap()).unwrap();
            let client_first_bare = client_first.strip_prefix("n,,").unwrap().to_string();
            assert!(client_first_bare.starts_with("n=crawler,r="));
            let client_nonce = client_first_bare.split(",r=").nth(1).unwrap().to_string();
            let server_first = format!(
                "r={client_nonce}server,s={},i=4096",
                BASE64_STANDARD.encode(SALT)
            );
            answer(
                &mut stream,
                1,
                DocumentBuilder::default()
                    .int32("conversationId", 7)
                    .boolean("done", false)
                    .binary("payload", server_first.as_bytes())
                    .double("ok", 1.0),
            );

            let step = wire::read_reply(&mut stream).unwrap();
            assert_eq!(step.conversation_id, Some(7));
            let client_final = String::from_utf8(step.payload.unwrap()).unwrap();
            let without_proof = client_final.split(",p=").next().unwrap();
            let auth_message = format!("{client_first_bare},{server_first},{without_proof}");
            let salted = scram::salted_password("hunter2", SALT, NonZeroU32::new(4096).unwrap());
            let server_key = scram::hmac_sha256(&salted, b"Server Key");
            let server_final = format!(
                "v={}",
                BASE64_STANDARD.encode(scram::hmac_sha256(&server_key, auth_message.as_bytes()))
            );
            answer(
                &mut stream,
                2,
                DocumentBuilder::default()
                    .int32("conversationId", 7)
                    .boolean("done", true)
                    .binary("payload", server_final.as_bytes())
                    .double("ok", 1.0),
            );

            wire::read_reply(&mut stream).unwrap();
            answer(&mut stream, 3, ok());
            let _ = wire::read_reply(&mut stream);
        });

        let params = test_params(port)
            .with(params::USERNAME, "crawler")
            .with(params::PASSWORD, "hunter2");
        let session = MongoFactory::new().connect(&params, &Interrupt::new()).unwrap();
        assert!(!session.is_broken());
    }

    #[test]
    fn test_rejected_credentials_fail_connect() {
        let port = serve(|mut stream| {
            wire::read_reply(&mut stream).unwrap();
            answer(
                &mut stream,
                1,
                DocumentBuilder::default()
                    .double("ok", 0.0)
                    .string("errmsg", "Authentication failed.")
                    .int32("code", 18),
            );
        });
        let params = test_params(port)
            .with(params::USERNAME, "crawler")
            .with(params::PASSWORD, "wrong");
        let err = MongoFactory::new().connect(&params, &Interrupt::new()).unwrap_err();
        assert_eq!(err.to_string(), "Authentication failed: Authentication failed.");
        assert_eq!(ProbeTaxonomy.kind_of(&err), Some(ErrorKind::Authentication));
    }

    #[test]
    fn test_credentials_need_a_username() {
        let params = ConnectionParams::new().with(params::PASSWORD, "pw");
        assert!(Credentials::from_params(&params).is_none());
        let params = params.with(params::USERNAME, "crawler");
        let credentials = Credentials::from_params(&params).unwrap();
        assert_eq!(credentials.password, "pw");
        assert!(!format!("{credentials:?}").contains("pw"));
    }

    #[test]
    fn test_parse_port() {
        assert_eq!(parse_port(None).unwrap(), DEFAULT_PORT);
        assert_eq!(parse_port(Some("28017")).unwrap(), 28017);
        assert!(matches!(parse_port(Some("mongo")), Err(ProbeError::InvalidPort(_))));
        assert!(matches!(parse_port(Some("0")), Err(ProbeError::InvalidPort(_))));
        assert!(matches!(parse_port(Some("70000")), Err(ProbeError::InvalidPort(_))));
    }

    #[test]
    fn test_validate_rejects_bad_port() {
        let params = ConnectionParams::new()
            .with(params::HOST, "localhost")
            .with(params::PORT, "abc");
        let err = MongoFactory::new().validate(&params).unwrap_err();
        assert!(err.to_string().contains("port"));
    }

    #[test]
    fn test_connect_refused_is_connect_error() {
        // Bind then drop to get a port nothing listens on.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let params = ConnectionParams::new()
            .with(params::HOST, "127.0.0.1")
            .with(params::PORT, port.to_string())
            .with(params::DATABASE, "crawl")
            .with(params::COLLECTION, "docs");
        let err = MongoFactory::new()
            .connect(&params, &Interrupt::new())
            .unwrap_err();
        assert!(matches!(err, ProbeError::Connect { .. }));
    }
}
