//! Outbound connection state machine.
//!
//! # Responsibilities
//! - Connect to the backend, or to a proxy and tunnel through it with CONNECT
//! - Upgrade to TLS, verify the peer and optionally its pinned public key
//! - Serialize request/response exchanges on one transport
//! - Retry a failed request once over a fresh connection
//! - Suspend itself after sustained failure and probe for recovery
//!
//! # States
//! ```text
//! Uninitialized → Connecting → [Tunneling] → [Handshaking → VerifyingCert] → Active ⇄ Suspended
//! any state → Closed (timeout / parse error sets should_close) → Connecting
//! ```
//!
//! # Design Decisions
//! - The transport lives behind a FIFO `tokio::sync::Mutex`; requests on one
//!   connection are handled in submission order
//! - `should_close` is readable without the transport lock so the pool can evict
//! - Suspension bookkeeping sits behind a `std::sync::Mutex` never held across `.await`

use std::collections::BTreeMap;
use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, MutexGuard, PoisonError};
use std::time::Duration;

use rustls::ClientConfig;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::Instant;
use tokio_rustls::client::TlsStream;
use tokio_util::sync::CancellationToken;

use crate::context::MessagingContext;
use crate::error::{MessagingError, TimeoutKind, TlsError};
use crate::http::{HttpMethod, HttpRequest, HttpResponse, HttpResponseParser, HttpStatusCode, RequestTarget};
use crate::net::key::ConnectionKey;
use crate::net::metadata::{ClientAuth, ConnectionFlags, MessageMetadata, ProxySettings};
use crate::net::tls::{self, TlsOptions};
use crate::net::transport::Transport;
use crate::observability::{metrics, printout};
use crate::resilience::timeouts::{self, ReceiveDeadlines};
use crate::resilience::{Suspension, SuspensionReason, SuspensionStatus};

const READ_BUFFER_SIZE: usize = 4096;

/// Global counter for connection IDs.
static CONNECTION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier of a connection, for log correlation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    fn next() -> Self {
        Self(CONNECTION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Result of one connect attempt.
#[derive(Debug)]
enum ConnectOutcome {
    Success(TcpStream),
    /// Transient; try again until the connect deadline.
    ShouldRetry(io::Error),
    ShouldNotRetry(io::Error),
}

impl ConnectOutcome {
    fn from_result(result: io::Result<TcpStream>) -> Self {
        match result {
            Ok(stream) => ConnectOutcome::Success(stream),
            Err(e) => match e.kind() {
                io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted | io::ErrorKind::TimedOut => {
                    ConnectOutcome::ShouldRetry(e)
                }
                _ => ConnectOutcome::ShouldNotRetry(e),
            },
        }
    }
}

#[derive(Debug, Default)]
struct Link {
    transport: Option<Transport>,
}

struct Inner {
    id: ConnectionId,
    key: ConnectionKey,
    flags: ConnectionFlags,
    proxy: Option<ProxySettings>,
    connect_message: Option<String>,
    credential: Option<String>,
    client_auth: Option<ClientAuth>,
    sni_host: Option<String>,
    verify_host: Option<String>,
    context: MessagingContext,
    link: tokio::sync::Mutex<Link>,
    health: std::sync::Mutex<Suspension>,
    should_close: AtomicBool,
}

/// A cheaply clonable handle to one logical connection.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.inner.id)
            .field("key", &self.inner.key)
            .field("flags", &self.inner.flags)
            .field("proxy", &self.inner.proxy)
            .field("should_close", &self.should_close())
            .finish()
    }
}

impl Connection {
    /// A connection for `key` configured from `metadata`. Nothing is dialled yet.
    pub fn new(key: ConnectionKey, metadata: &MessageMetadata, context: MessagingContext) -> Self {
        let mut flags = ConnectionFlags::from_message_config(metadata.conn_flags);
        let connect_message = metadata.proxy.as_ref().map(|proxy| {
            flags.insert(ConnectionFlags::PROXY);
            HttpRequest::connect(&key, proxy).to_wire()
        });
        let health = Suspension::new(&context.config.resilience);

        Self {
            inner: Arc::new(Inner {
                id: ConnectionId::next(),
                key,
                flags,
                proxy: metadata.proxy.clone(),
                connect_message,
                credential: metadata.external_certificate.clone(),
                client_auth: metadata.client_auth.clone(),
                sni_host: metadata.sni_host.clone(),
                verify_host: metadata.verify_host.clone(),
                context,
                link: tokio::sync::Mutex::new(Link::default()),
                health: std::sync::Mutex::new(health),
                should_close: AtomicBool::new(false),
            }),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.inner.id
    }

    pub fn key(&self) -> &ConnectionKey {
        &self.inner.key
    }

    pub fn flags(&self) -> ConnectionFlags {
        self.inner.flags
    }

    pub fn proxy(&self) -> Option<&ProxySettings> {
        self.inner.proxy.as_ref()
    }

    pub fn is_over_proxy(&self) -> bool {
        self.inner.flags.contains(ConnectionFlags::PROXY)
    }

    pub fn is_unsecure(&self) -> bool {
        self.inner.flags.contains(ConnectionFlags::UNSECURE)
    }

    pub fn is_one_time(&self) -> bool {
        self.inner.flags.contains(ConnectionFlags::ONE_TIME)
    }

    /// The last exchange failed in a way that left the transport unusable.
    pub fn should_close(&self) -> bool {
        self.inner.should_close.load(Ordering::Acquire)
    }

    pub fn failed_attempts(&self) -> u32 {
        self.health().failed_attempts()
    }

    /// Current suspension state, without probing the backend.
    pub fn suspension_status(&self) -> SuspensionStatus {
        self.health().status()
    }

    /// How requests on this connection are addressed.
    pub fn request_target(&self) -> RequestTarget<'_> {
        RequestTarget {
            key: &self.inner.key,
            proxy: self.inner.proxy.as_ref(),
            unsecure: self.is_unsecure(),
            credential: self.inner.credential.as_deref(),
            send_access_token: true,
        }
    }

    /// Build a request addressed through this connection.
    pub fn prepare_request(
        &self,
        method: HttpMethod,
        uri: &str,
        headers: &BTreeMap<String, String>,
        body: &str,
    ) -> Result<HttpRequest, MessagingError> {
        HttpRequest::prepare(
            &self.request_target(),
            self.inner.context.agent.as_ref(),
            method,
            uri,
            headers,
            body,
        )
    }

    /// (Re)build the transport: connect, tunnel, handshake and verify.
    pub async fn establish(&self) -> Result<(), MessagingError> {
        let mut link = self.inner.link.lock().await;
        self.establish_locked(&mut link).await
    }

    /// Send `request` and wait for its response, retrying once over a fresh transport.
    pub async fn send_request(&self, request: &str) -> Result<HttpResponse, MessagingError> {
        tracing::trace!(
            connection = %self.inner.id,
            target = %self.inner.key,
            request = %printout(&self.inner.context.config.message, request),
            "Send request"
        );

        let mut result = self.send_and_receive(request, false).await;
        if let Err(e) = &result {
            tracing::debug!(connection = %self.inner.id, error = %e, "Request failed, re-establishing the connection");
            if let Err(e) = self.establish().await {
                tracing::warn!(connection = %self.inner.id, error = %e, "Failed to re-establish the connection");
            }
            result = self.send_and_receive(request, false).await;
        }

        {
            let mut health = self.health();
            match &result {
                Ok(_) => health.record_success(),
                Err(e) => {
                    if health.record_failure() {
                        tracing::warn!(
                            connection = %self.inner.id,
                            target = %self.inner.key,
                            failed_attempts = health.failed_attempts(),
                            error = %e,
                            "Too many consecutive failures, suspending the connection"
                        );
                    }
                }
            }
        }
        metrics::record_request(result.is_ok());
        result
    }

    /// Whether the connection is suspended. An expired suspension triggers a
    /// re-establish; success lifts it, failure re-arms the failure suspension.
    pub async fn is_suspended(&self) -> bool {
        let status = self.health().status();
        match status {
            SuspensionStatus::Inactive => false,
            SuspensionStatus::Active { remaining } => {
                tracing::trace!(connection = %self.inner.id, remaining = ?remaining, "Connection is suspended");
                true
            }
            SuspensionStatus::Expired => match self.establish().await {
                Ok(()) => {
                    tracing::debug!(connection = %self.inner.id, target = %self.inner.key, "Reestablished connection");
                    false
                }
                Err(e) => {
                    tracing::warn!(connection = %self.inner.id, error = %e, "Reestablish connection failed");
                    self.health().arm(SuspensionReason::ConsecutiveFailures);
                    true
                }
            },
        }
    }

    /// One request/response exchange on the current transport, no retry.
    pub async fn send_and_receive(&self, request: &str, is_connect: bool) -> Result<HttpResponse, MessagingError> {
        let mut link = self.inner.link.lock().await;

        if self.should_close() {
            let err = MessagingError::Closing;
            tracing::warn!(connection = %self.inner.id, "{}", err);
            return Err(err);
        }

        if self.inner.flags.contains(ConnectionFlags::ASYNC_ONE_TIME) {
            self.send_async(&mut link, request).await?;
        } else {
            let transport = link.transport.as_mut().ok_or(MessagingError::NotConnected)?;
            self.write_request(transport, request.as_bytes()).await?;
        }

        tracing::trace!(connection = %self.inner.id, "Sent the message, now waiting for response");
        let transport = link.transport.as_mut().ok_or(MessagingError::NotConnected)?;
        self.read_response(transport, is_connect).await
    }

    fn health(&self) -> MutexGuard<'_, Suspension> {
        self.inner.health.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn mark_should_close(&self) {
        self.inner.should_close.store(true, Ordering::Release);
    }

    fn connection_timeout(&self) -> Duration {
        let service = self.inner.context.agent.service_name();
        self.inner.context.config.message.connection_timeout(&service)
    }

    fn verifies_peer(&self) -> bool {
        !self.is_unsecure()
            && !self.inner.flags.contains(ConnectionFlags::IGNORE_SSL_VALIDATION)
            && !self.inner.context.config.message.ignore_ssl_validation
    }

    async fn establish_locked(&self, link: &mut Link) -> Result<(), MessagingError> {
        tracing::debug!(connection = %self.inner.id, target = %self.inner.key, "Establishing a new connection");
        link.transport = None;

        let tls_config = if self.is_unsecure() {
            None
        } else {
            Some(self.tls_config()?)
        };

        let mut tcp = self.connect().await.inspect_err(|e| {
            tracing::warn!(connection = %self.inner.id, error = %e, "Failed to connect to host");
        })?;

        if let (Some(proxy), Some(message)) = (&self.inner.proxy, &self.inner.connect_message) {
            self.tunnel(&mut tcp, proxy, message).await?;
        }

        let transport = match tls_config {
            Some(config) => Transport::Tls(Box::new(self.handshake_and_verify(config, tcp).await?)),
            None => Transport::Plain(tcp),
        };
        link.transport = Some(transport);

        self.health().clear();
        self.inner.should_close.store(false, Ordering::Release);
        metrics::record_connection_established();

        match &self.inner.proxy {
            Some(proxy) => tracing::debug!(
                connection = %self.inner.id,
                target = %self.inner.key,
                proxy = %format!("{}:{}", proxy.host(), proxy.port()),
                "Successfully connected over proxy"
            ),
            None => tracing::debug!(connection = %self.inner.id, target = %self.inner.key, "Successfully connected"),
        }
        Ok(())
    }

    fn tls_config(&self) -> Result<Arc<ClientConfig>, MessagingError> {
        let msg = &self.inner.context.config.message;
        let openssl_dir = self.inner.context.agent.openssl_dir();
        let options = TlsOptions {
            verify: self.verifies_peer(),
            verify_host: self
                .inner
                .verify_host
                .clone()
                .unwrap_or_else(|| self.inner.key.host().to_string()),
            client_auth: self.inner.client_auth.clone(),
            certificate_chain_path: msg.certificate_chain_path(),
            trusted_ca_dir: msg.trusted_ca_dir(openssl_dir.as_deref()),
        };
        Ok(tls::build_client_config(&options)?)
    }

    /// Dial the proxy or the target, retrying transient failures until the connect deadline.
    async fn connect(&self) -> Result<TcpStream, MessagingError> {
        let (host, port) = match &self.inner.proxy {
            Some(proxy) => (proxy.host().to_string(), proxy.port()),
            None => (self.inner.key.host().to_string(), self.inner.key.port()),
        };
        let address = format!("{host}:{port}");
        let limit = self.connection_timeout();
        let deadline = Instant::now() + limit;
        tracing::trace!(connection = %self.inner.id, address = %address, "Connecting");

        loop {
            let attempt = timeouts::until(TimeoutKind::Connect, deadline, TcpStream::connect((host.as_str(), port))).await;
            let result = match attempt {
                Ok(result) => result,
                Err(e) => {
                    self.health().arm(SuspensionReason::ConnectFailure);
                    tracing::warn!(
                        connection = %self.inner.id,
                        address = %address,
                        timeout = ?limit,
                        "Failed to establish new connection after reaching timeout, connection suspended"
                    );
                    return Err(e);
                }
            };

            match ConnectOutcome::from_result(result) {
                ConnectOutcome::Success(stream) => {
                    if let Err(e) = stream.set_nodelay(true) {
                        tracing::trace!(error = %e, "Failed to set TCP_NODELAY");
                    }
                    return Ok(stream);
                }
                ConnectOutcome::ShouldRetry(e) => {
                    tracing::trace!(connection = %self.inner.id, error = %e, "Connect attempt interrupted, retrying");
                    tokio::task::yield_now().await;
                }
                ConnectOutcome::ShouldNotRetry(e) => {
                    self.health().arm(SuspensionReason::ConnectFailure);
                    return Err(MessagingError::transport(
                        &format!("Failed to connect to: {address}, connection suspended"),
                        e,
                    ));
                }
            }
        }
    }

    /// Open a CONNECT tunnel on the plain socket to the proxy.
    async fn tunnel(&self, tcp: &mut TcpStream, proxy: &ProxySettings, message: &str) -> Result<(), MessagingError> {
        tracing::debug!(
            connection = %self.inner.id,
            proxy = %format!("{}:{}", proxy.host(), proxy.port()),
            request = %printout(&self.inner.context.config.message, message),
            "Sending a CONNECT request"
        );

        let exchange = match self.write_request(&mut *tcp, message.as_bytes()).await {
            Ok(()) => self.read_response(&mut *tcp, true).await,
            Err(e) => Err(e),
        };
        let response = exchange.map_err(|e| {
            tracing::warn!(connection = %self.inner.id, error = %e, "Failed to connect to proxy");
            MessagingError::Proxy(e.to_string())
        })?;

        if response.status() != HttpStatusCode::Ok {
            tracing::warn!(connection = %self.inner.id, status = %response.status(), "Proxy refused the tunnel");
            return Err(MessagingError::Proxy(format!("CONNECT answered with {}", response.status())));
        }
        Ok(())
    }

    async fn handshake_and_verify(
        &self,
        config: Arc<ClientConfig>,
        tcp: TcpStream,
    ) -> Result<TlsStream<TcpStream>, MessagingError> {
        let msg = &self.inner.context.config.message;
        let sni_host = self.inner.sni_host.as_deref().unwrap_or(self.inner.key.host());
        let sni = tls::server_name(sni_host)?;
        tracing::trace!(connection = %self.inner.id, sni = %sni_host, "Performing TLS handshake");

        let stream = tls::handshake(config, sni, tcp, msg.handshake_timeout()).await.inspect_err(|e| {
            tracing::warn!(connection = %self.inner.id, error = %e, "TLS handshake failed");
        })?;

        if !self.verifies_peer() {
            tracing::trace!(connection = %self.inner.id, "Ignoring SSL validation");
            return Ok(stream);
        }

        let leaf = tls::peer_leaf_certificate(&stream)
            .ok_or_else(|| TlsError::Verification("Server did not provide a cert during handshake".to_string()))?;

        if msg.verify_ssl_pinning {
            let path = msg.public_key_path();
            tls::verify_pinned_key(&leaf, Path::new(&path))?;
            tracing::trace!(connection = %self.inner.id, path = %path, "Pinned public key matched");
        }
        Ok(stream)
    }

    /// Write the whole payload before the send deadline.
    async fn write_request<S>(&self, stream: &mut S, payload: &[u8]) -> Result<(), MessagingError>
    where
        S: AsyncWrite + Unpin,
    {
        let deadline = Instant::now() + self.connection_timeout();
        let mut offset = 0;

        while offset < payload.len() {
            if Instant::now() >= deadline {
                return Err(MessagingError::Timeout(TimeoutKind::Send));
            }
            let written = timeouts::until(TimeoutKind::Send, deadline, stream.write(&payload[offset..]))
                .await?
                .map_err(|e| MessagingError::transport("Failed to write data into socket", e))?;
            tracing::trace!(sent = written, remaining = payload.len() - offset, "Sent bytes");
            if written == 0 {
                tokio::task::yield_now().await;
            }
            offset += written;
        }

        timeouts::until(TimeoutKind::Send, deadline, stream.flush())
            .await?
            .map_err(|e| MessagingError::transport("Failed to flush socket", e))
    }

    /// Hand the transport to a background task for the write and wait for it
    /// within the async send timeout.
    async fn send_async(&self, link: &mut Link, request: &str) -> Result<(), MessagingError> {
        let mut transport = link.transport.take().ok_or(MessagingError::NotConnected)?;
        let limit = self.inner.context.config.message.async_send_timeout();
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let payload = request.as_bytes().to_vec();

        let mut task = tokio::spawn(async move {
            let result = write_until_cancelled(&mut transport, &payload, &token).await;
            (transport, result)
        });

        match tokio::time::timeout(limit, &mut task).await {
            Ok(Ok((transport, result))) => {
                link.transport = Some(transport);
                result
            }
            Ok(Err(e)) => {
                self.mark_should_close();
                Err(MessagingError::transport("Async send task failed", e))
            }
            Err(_) => {
                cancel.cancel();
                self.mark_should_close();
                tracing::warn!(connection = %self.inner.id, timeout = ?limit, "Async send timed out, cancelling");
                Err(MessagingError::Timeout(TimeoutKind::AsyncSend))
            }
        }
    }

    /// Read until the parser completes a response or a receive clock expires.
    async fn read_response<S>(&self, stream: &mut S, is_connect: bool) -> Result<HttpResponse, MessagingError>
    where
        S: AsyncRead + Unpin,
    {
        let msg = &self.inner.context.config.message;
        let mut deadlines = ReceiveDeadlines::start(msg.receive_chunk_timeout(), msg.receive_global_timeout());
        let mut parser = HttpResponseParser::new();
        let mut buf = vec![0u8; READ_BUFFER_SIZE];

        loop {
            let read = match tokio::time::timeout_at(deadlines.next(), stream.read(&mut buf)).await {
                Err(_) => {
                    self.mark_should_close();
                    let kind = deadlines.expired_kind();
                    tracing::warn!(connection = %self.inner.id, kind = %kind, "Receive timed out");
                    return Err(MessagingError::Timeout(kind));
                }
                Ok(Err(e)) => {
                    self.mark_should_close();
                    return Err(MessagingError::transport("Failed to read data from socket", e));
                }
                Ok(Ok(0)) => {
                    self.mark_should_close();
                    tracing::warn!(connection = %self.inner.id, "Connection closed by peer");
                    return Err(MessagingError::Transport("Connection closed by peer".to_string()));
                }
                Ok(Ok(n)) => n,
            };
            deadlines.progress();
            tracing::trace!(connection = %self.inner.id, received = read, "Received bytes");

            match parser.parse(&buf[..read], is_connect) {
                Ok(Some(response)) => {
                    tracing::trace!(
                        connection = %self.inner.id,
                        response = %printout(msg, &response.to_string()),
                        "Received response"
                    );
                    return Ok(response);
                }
                Ok(None) => continue,
                Err(e) => {
                    self.mark_should_close();
                    tracing::warn!(connection = %self.inner.id, error = %e, "Failed to parse the HTTP response");
                    return Err(e.into());
                }
            }
        }
    }
}

async fn write_until_cancelled(
    transport: &mut Transport,
    payload: &[u8],
    cancel: &CancellationToken,
) -> Result<(), MessagingError> {
    let mut offset = 0;
    while offset < payload.len() {
        let written = tokio::select! {
            _ = cancel.cancelled() => return Err(MessagingError::Timeout(TimeoutKind::AsyncSend)),
            res = transport.write(&payload[offset..]) => {
                res.map_err(|e| MessagingError::transport("Failed to write data into socket", e))?
            }
        };
        if written == 0 {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        offset += written;
    }

    tokio::select! {
        _ = cancel.cancelled() => Err(MessagingError::Timeout(TimeoutKind::AsyncSend)),
        res = transport.flush() => res.map_err(|e| MessagingError::transport("Failed to flush socket", e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MessagingConfig;
    use crate::net::metadata::MessageConnectionConfig;
    use crate::net::MessageCategory;

    fn context() -> MessagingContext {
        MessagingContext::from_config(MessagingConfig::default())
    }

    #[test]
    fn connect_outcome_classification() {
        let retry = ConnectOutcome::from_result(Err(io::Error::from(io::ErrorKind::Interrupted)));
        assert!(matches!(retry, ConnectOutcome::ShouldRetry(_)));

        let refused = ConnectOutcome::from_result(Err(io::Error::from(io::ErrorKind::ConnectionRefused)));
        assert!(matches!(refused, ConnectOutcome::ShouldNotRetry(_)));
    }

    #[test]
    fn proxied_connection_prepares_connect_message() {
        let key = ConnectionKey::new("fog.example.com", 443, MessageCategory::Generic);
        let metadata = MessageMetadata::new("fog.example.com", 443)
            .with_proxy(ProxySettings::new("proxy.local", 3128, None));
        let conn = Connection::new(key, &metadata, context());

        assert!(conn.is_over_proxy());
        assert!(!conn.is_unsecure());
        let message = conn.inner.connect_message.as_deref().unwrap();
        assert!(message.starts_with("CONNECT fog.example.com:443 HTTP/1.1\r\n"));
    }

    #[test]
    fn ids_are_unique() {
        let key = ConnectionKey::new("a", 1, MessageCategory::Log);
        let metadata = MessageMetadata::new("a", 1).with_flags(MessageConnectionConfig::UNSECURE_CONN);
        let first = Connection::new(key.clone(), &metadata, context());
        let second = Connection::new(key, &metadata, context());
        assert_ne!(first.id(), second.id());
        assert_eq!(first.suspension_status(), SuspensionStatus::Inactive);
    }

    #[tokio::test]
    async fn send_without_transport_is_not_connected() {
        let key = ConnectionKey::new("127.0.0.1", 9, MessageCategory::Generic);
        let metadata = MessageMetadata::new("127.0.0.1", 9).with_flags(MessageConnectionConfig::UNSECURE_CONN);
        let conn = Connection::new(key, &metadata, context());
        let err = conn.send_and_receive("GET / HTTP/1.1\r\n\r\n", false).await.unwrap_err();
        assert!(matches!(err, MessagingError::NotConnected));
    }
}
