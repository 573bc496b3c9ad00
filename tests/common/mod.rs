//! Shared utilities for integration testing: scripted mock backends, a CONNECT
//! proxy and a TLS backend with throw-away certificates.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use fog_messaging::config::MessagingConfig;
use fog_messaging::{MessagingContext, StaticAgentDetails};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

pub const TOKEN: &str = "accesstoken";

/// Short timeouts and suspensions so failure paths run in real time.
pub fn test_config() -> MessagingConfig {
    let mut config = MessagingConfig::default();
    config.message.connection_timeout_ms = 1_000;
    config.message.handshake_timeout_ms = 2_000;
    config.message.receive_chunk_timeout_ms = 300;
    config.message.receive_global_timeout_ms = 2_000;
    config.message.async_send_timeout_ms = 1_000;
    config.message.trusted_ca_dir = Some(String::new());
    config.resilience.connect_failure_suspension_secs = 1;
    config.resilience.failure_suspension_secs = 1;
    config
}

pub fn context(config: MessagingConfig) -> MessagingContext {
    let agent = StaticAgentDetails::default().with_access_token(TOKEN);
    MessagingContext::new(config, Arc::new(agent))
}

pub fn fog_context(config: MessagingConfig, addr: SocketAddr) -> MessagingContext {
    let agent = StaticAgentDetails::default()
        .with_access_token(TOKEN)
        .with_fog(addr.ip().to_string(), addr.port(), false);
    MessagingContext::new(config, Arc::new(agent))
}

/// An address nothing listens on.
pub async fn unused_addr() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}

/// Read one request (headers plus Content-Length body). `None` on EOF.
pub async fn read_request<S: AsyncRead + Unpin>(stream: &mut S) -> Option<String> {
    let mut data = Vec::new();
    let mut buf = [0u8; 1024];
    loop {
        if let Some(end) = find(&data, b"\r\n\r\n") {
            let head = String::from_utf8_lossy(&data[..end]).to_string();
            let length = head
                .lines()
                .find_map(|line| {
                    let (key, value) = line.split_once(':')?;
                    key.eq_ignore_ascii_case("content-length")
                        .then(|| value.trim().parse::<usize>().ok())
                        .flatten()
                })
                .unwrap_or(0);
            if data.len() >= end + 4 + length {
                return Some(String::from_utf8_lossy(&data[..end + 4 + length]).to_string());
            }
        }
        let n = stream.read(&mut buf).await.ok()?;
        if n == 0 {
            return None;
        }
        data.extend_from_slice(&buf[..n]);
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// Requests seen by a mock backend.
#[derive(Clone, Default)]
pub struct Recorder {
    requests: Arc<Mutex<Vec<String>>>,
    accepts: Arc<AtomicU32>,
}

impl Recorder {
    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }

    pub fn count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn accepts(&self) -> u32 {
        self.accepts.load(Ordering::SeqCst)
    }

    fn record(&self, request: String) {
        self.requests.lock().unwrap().push(request);
    }
}

/// Keep-alive backend: every request is answered with the parts returned by
/// `respond`, written with a short pause between them.
pub async fn start_scripted_backend<F>(respond: F) -> (SocketAddr, Recorder)
where
    F: Fn(&str) -> Vec<Vec<u8>> + Send + Sync + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let recorder = Recorder::default();
    let respond = Arc::new(respond);
    let rec = recorder.clone();

    tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            rec.accepts.fetch_add(1, Ordering::SeqCst);
            let respond = respond.clone();
            let rec = rec.clone();
            tokio::spawn(async move {
                serve_scripted(socket, respond.as_ref(), &rec).await;
            });
        }
    });

    (addr, recorder)
}

async fn serve_scripted<S, F>(mut socket: S, respond: &F, rec: &Recorder)
where
    S: AsyncRead + AsyncWrite + Unpin,
    F: Fn(&str) -> Vec<Vec<u8>>,
{
    while let Some(request) = read_request(&mut socket).await {
        let parts = respond(&request);
        rec.record(request);
        for (i, part) in parts.iter().enumerate() {
            if i > 0 {
                tokio::time::sleep(Duration::from_millis(30)).await;
            }
            if socket.write_all(part).await.is_err() {
                return;
            }
            let _ = socket.flush().await;
        }
    }
}

/// Keep-alive backend answering every request with the same response.
pub async fn start_static_backend(response: &'static str) -> (SocketAddr, Recorder) {
    start_scripted_backend(move |_| vec![response.as_bytes().to_vec()]).await
}

pub fn ok_response(body: &str) -> String {
    format!("HTTP/1.1 200 OK\r\nContent-Length: {}\r\n\r\n{}", body.len(), body)
}

/// Backend that reads each request and closes the socket without answering.
pub async fn start_closing_backend() -> (SocketAddr, Recorder) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let recorder = Recorder::default();
    let rec = recorder.clone();

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            rec.accepts.fetch_add(1, Ordering::SeqCst);
            let rec = rec.clone();
            tokio::spawn(async move {
                if let Some(request) = read_request(&mut socket).await {
                    rec.record(request);
                }
                let _ = socket.shutdown().await;
            });
        }
    });

    (addr, recorder)
}

/// Backend that reads requests and never answers.
pub async fn start_silent_backend() -> (SocketAddr, Recorder) {
    start_scripted_backend(|_| Vec::new()).await
}

/// Backend that keeps trickling header bytes and never finishes the response.
pub async fn start_trickling_backend(interval: Duration) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                if read_request(&mut socket).await.is_none() {
                    return;
                }
                if socket.write_all(b"HTTP/1.1 200 OK\r\n").await.is_err() {
                    return;
                }
                loop {
                    tokio::time::sleep(interval).await;
                    if socket.write_all(b"X-Pad: a\r\n").await.is_err() {
                        return;
                    }
                }
            });
        }
    });

    addr
}

/// HTTP proxy that answers CONNECT with `reply` and, on 200, relays bytes to `backend`.
pub async fn start_connect_proxy(backend: SocketAddr, reply: &'static str) -> (SocketAddr, Recorder) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let recorder = Recorder::default();
    let rec = recorder.clone();

    tokio::spawn(async move {
        while let Ok((mut client, _)) = listener.accept().await {
            rec.accepts.fetch_add(1, Ordering::SeqCst);
            let rec = rec.clone();
            tokio::spawn(async move {
                let Some(request) = read_request(&mut client).await else {
                    return;
                };
                rec.record(request);
                if client.write_all(reply.as_bytes()).await.is_err() || !reply.contains(" 200 ") {
                    return;
                }
                let Ok(mut upstream) = TcpStream::connect(backend).await else {
                    return;
                };
                let _ = tokio::io::copy_bidirectional(&mut client, &mut upstream).await;
            });
        }
    });

    (addr, recorder)
}

/// Throw-away TLS identity for `localhost`.
pub struct TestCert {
    pub cert_pem: String,
    pub public_key_pem: String,
    cert_der: rustls::pki_types::CertificateDer<'static>,
    key_der: Vec<u8>,
}

impl TestCert {
    pub fn generate() -> Self {
        let key_pair = rcgen::KeyPair::generate().unwrap();
        let params = rcgen::CertificateParams::new(vec!["localhost".to_string()]).unwrap();
        let cert = params.self_signed(&key_pair).unwrap();
        Self {
            cert_pem: cert.pem(),
            public_key_pem: key_pair.public_key_pem(),
            cert_der: cert.der().clone(),
            key_der: key_pair.serialize_der(),
        }
    }

    fn server_config(&self) -> Arc<rustls::ServerConfig> {
        let key = rustls::pki_types::PrivateKeyDer::Pkcs8(self.key_der.clone().into());
        let config = rustls::ServerConfig::builder_with_provider(Arc::new(rustls::crypto::ring::default_provider()))
            .with_safe_default_protocol_versions()
            .unwrap()
            .with_no_client_auth()
            .with_single_cert(vec![self.cert_der.clone()], key)
            .unwrap();
        Arc::new(config)
    }
}

/// Keep-alive TLS backend answering every request with `response`.
pub async fn start_tls_backend(cert: &TestCert, response: &'static str) -> (SocketAddr, Recorder) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let acceptor = tokio_rustls::TlsAcceptor::from(cert.server_config());
    let recorder = Recorder::default();
    let rec = recorder.clone();

    tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            rec.accepts.fetch_add(1, Ordering::SeqCst);
            let acceptor = acceptor.clone();
            let rec = rec.clone();
            tokio::spawn(async move {
                let Ok(stream) = acceptor.accept(socket).await else {
                    return;
                };
                let respond = |_: &str| vec![response.as_bytes().to_vec()];
                serve_scripted(stream, &respond, &rec).await;
            });
        }
    });

    (addr, recorder)
}

/// Write `contents` to a unique temporary file and return its path.
pub fn temp_file(name: &str, contents: &str) -> String {
    static COUNTER: AtomicU32 = AtomicU32::new(0);
    let n = COUNTER.fetch_add(1, Ordering::SeqCst);
    let path = std::env::temp_dir().join(format!("fog-messaging-it-{}-{n}-{name}", std::process::id()));
    std::fs::write(&path, contents).unwrap();
    path.to_string_lossy().into_owned()
}
