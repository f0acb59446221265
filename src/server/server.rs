//! Listener, worker pool, and TLS front door.
//!
//! A `crossbeam::queue::SegQueue` admission queue feeds a fixed number of
//! long-lived workers, shared by an optional two-listener (HTTP + TLS)
//! bind sequence, built on `tokio-rustls` + a fixed pool of
//! `tokio::spawn`ed workers.

use crate::handler::{Handler, SessionStore};
use crate::limits::{ConnLimits, ReqLimits, RespLimits, ServerLimits, WaitStrategy};
use crate::server::connection::HttpConnection;
use crate::session::SessionManager;
use crossbeam::queue::SegQueue;
use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context as TaskContext, Poll};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::yield_now;
use tokio::time::sleep as tokio_sleep;
use tokio_rustls::rustls::pki_types::{CertificateDer, PrivateKeyDer};
use tokio_rustls::rustls::ServerConfig as RustlsServerConfig;
use tokio_rustls::TlsAcceptor;

/// Paths to a PEM certificate chain and private key, loaded once at
/// [`Server::launch`] time.
#[derive(Debug, Clone)]
pub struct TlsConfig {
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
}

/// Bind addresses for the plaintext and (optional) TLS listeners.
/// Mirrors `original_source/mhttp/server.py::HttpServer.run`'s
/// `ip`/`http_port`/`https_port`/`certs` parameters.
#[derive(Debug, Clone)]
pub struct ListenerConfig {
    pub bind_ip: String,
    pub http_port: u16,
    pub https_port: u16,
    pub tls: Option<TlsConfig>,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_ip: "0.0.0.0".to_string(),
            http_port: 5400,
            https_port: 5401,
            tls: None,
        }
    }
}

/// A connected stream, either plaintext or behind a completed TLS
/// handshake, presented to [`HttpConnection`] behind one `AsyncRead` +
/// `AsyncWrite` surface.
enum Conn {
    Plain(TcpStream),
    Tls(Box<tokio_rustls::server::TlsStream<TcpStream>>),
}

impl AsyncRead for Conn {
    fn poll_read(self: Pin<&mut Self>, cx: &mut TaskContext<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Conn::Plain(s) => Pin::new(s).poll_read(cx, buf),
            Conn::Tls(s) => Pin::new(s.as_mut()).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for Conn {
    fn poll_write(self: Pin<&mut Self>, cx: &mut TaskContext<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            Conn::Plain(s) => Pin::new(s).poll_write(cx, buf),
            Conn::Tls(s) => Pin::new(s.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Conn::Plain(s) => Pin::new(s).poll_flush(cx),
            Conn::Tls(s) => Pin::new(s.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Conn::Plain(s) => Pin::new(s).poll_shutdown(cx),
            Conn::Tls(s) => Pin::new(s.as_mut()).poll_shutdown(cx),
        }
    }
}

/// A just-accepted TCP stream awaiting its (possibly absent) TLS
/// handshake, queued between the accept loop and a free worker.
enum Pending {
    Plain(TcpStream, SocketAddr),
    Tls(TcpStream, SocketAddr),
}

/// An HTTP/1.1 server: a bound listener (plus optional TLS listener)
/// drained by a fixed pool of worker tasks.
///
/// # Examples
///
/// ```no_run
/// use wirebound::{Handler, Context, Request, Response, StatusCode, Version};
/// use wirebound::errors::HttpError;
/// use wirebound::server::{Server, ListenerConfig};
///
/// struct Hello;
///
/// impl Handler for Hello {
///     async fn handle(&self, _ctx: &mut Context<'_>, _req: &Request) -> Result<Response, HttpError> {
///         let mut resp = Response::new(StatusCode::Ok, Version::Http11);
///         resp.set_body(Box::pin(std::io::Cursor::new(b"hello".to_vec())), 5);
///         Ok(resp)
///     }
/// }
///
/// #[tokio::main]
/// async fn main() -> std::io::Result<()> {
///     Server::builder()
///         .handler(Hello)
///         .session_limits(wirebound::limits::SessionLimits::default())
///         .listener_config(ListenerConfig::default())
///         .build()
///         .await?
///         .launch()
///         .await
/// }
/// ```
pub struct Server<H: Handler, St: SessionStore> {
    http_listener: TcpListener,
    tls_listener: Option<(TcpListener, TlsAcceptor)>,
    handler: Arc<H>,
    session_store: Arc<St>,
    server_name: Option<String>,
    server_limits: ServerLimits,
    conn_limits: ConnLimits,
    req_limits: ReqLimits,
    resp_limits: RespLimits,
}

impl<H: Handler, St: SessionStore> Server<H, St> {
    pub fn builder() -> ServerBuilder<H, St> {
        ServerBuilder {
            handler: None,
            session_store: None,
            listener_config: None,
            server_name: Some("wirebound".to_string()),
            server_limits: None,
            conn_limits: None,
            req_limits: None,
            resp_limits: None,
        }
    }

    /// Binds the listener(s), then accepts connections forever, handing
    /// each off to a fixed pool of `server_limits.max_connections` worker
    /// tasks via a `crossbeam::queue::SegQueue` admission queue.
    pub async fn launch(self) -> ! {
        let incoming = Arc::new(SegQueue::<Pending>::new());

        let http_listener = self.http_listener;
        let tls_listener = self.tls_listener.map(|(l, a)| (l, a));
        let accept_queue = incoming.clone();
        let limits_for_accept = self.server_limits.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    accepted = http_listener.accept() => {
                        if let Ok((stream, addr)) = accepted {
                            Self::admit(Pending::Plain(stream, addr), &accept_queue, &limits_for_accept);
                        }
                    }
                }
            }
        });

        if let Some((listener, acceptor)) = tls_listener {
            let accept_queue = incoming.clone();
            let limits_for_accept = self.server_limits.clone();
            let _acceptor_kept_alive = acceptor.clone();
            tokio::spawn(async move {
                loop {
                    if let Ok((stream, addr)) = listener.accept().await {
                        Self::admit(Pending::Tls(stream, addr), &accept_queue, &limits_for_accept);
                    }
                }
            });
            self.run_workers(incoming, Some(acceptor)).await
        } else {
            self.run_workers(incoming, None).await
        }
    }

    fn admit(item: Pending, queue: &Arc<SegQueue<Pending>>, limits: &ServerLimits) {
        if queue.len() < limits.max_pending_connections {
            queue.push(item);
        } else {
            tracing::warn!("admission queue full, dropping connection");
        }
    }

    async fn run_workers(self, incoming: Arc<SegQueue<Pending>>, acceptor: Option<TlsAcceptor>) -> ! {
        let handler = self.handler;
        let session_store = self.session_store;
        let server_name = self.server_name;
        let conn_limits = self.conn_limits;
        let req_limits = self.req_limits;
        let resp_limits = self.resp_limits;
        let server_limits = self.server_limits;

        let mut tasks = Vec::with_capacity(server_limits.max_connections);
        for _ in 0..server_limits.max_connections {
            let incoming = incoming.clone();
            let handler = handler.clone();
            let session_store = session_store.clone();
            let server_name = server_name.clone();
            let conn_limits = conn_limits.clone();
            let req_limits = req_limits.clone();
            let resp_limits = resp_limits.clone();
            let server_limits = server_limits.clone();
            let acceptor = acceptor.clone();

            tasks.push(tokio::spawn(async move {
                loop {
                    let pending = Self::wait_for_work(&incoming, &server_limits).await;

                    let stream = match Self::handshake(pending, acceptor.as_ref()).await {
                        Some(s) => s,
                        None => continue,
                    };

                    let conn = HttpConnection::new(
                        handler.clone(),
                        session_store.clone(),
                        conn_limits.clone(),
                        req_limits.clone(),
                        resp_limits.clone(),
                        server_name.clone(),
                    );
                    conn.run(stream).await;
                }
            }));
        }

        // Workers run forever; block here so `launch` itself never returns.
        futures_block_forever(tasks).await
    }

    async fn wait_for_work(incoming: &Arc<SegQueue<Pending>>, limits: &ServerLimits) -> Pending {
        loop {
            if let Some(item) = incoming.pop() {
                return item;
            }
            match &limits.wait_strategy {
                WaitStrategy::Yield => yield_now().await,
                WaitStrategy::Sleep(d) => tokio_sleep(*d).await,
            }
        }
    }

    async fn handshake(pending: Pending, acceptor: Option<&TlsAcceptor>) -> Option<Conn> {
        match pending {
            Pending::Plain(stream, _addr) => Some(Conn::Plain(stream)),
            Pending::Tls(stream, _addr) => {
                let acceptor = acceptor?;
                match acceptor.accept(stream).await {
                    Ok(tls) => Some(Conn::Tls(Box::new(tls))),
                    Err(e) => {
                        tracing::warn!(error = %e, "TLS handshake failed");
                        None
                    }
                }
            }
        }
    }
}

async fn futures_block_forever(tasks: Vec<tokio::task::JoinHandle<()>>) -> ! {
    // Workers never return (their loops are infinite); `join_all` only
    // completes if one panics, in which case there is nothing sane left
    // to do but keep waiting on the rest rather than take the process down.
    let _ = futures_join_all(tasks).await;
    loop {
        tokio_sleep(Duration::from_secs(3600)).await;
    }
}

async fn futures_join_all(tasks: Vec<tokio::task::JoinHandle<()>>) -> Vec<Result<(), tokio::task::JoinError>> {
    let mut results = Vec::with_capacity(tasks.len());
    for task in tasks {
        results.push(task.await);
    }
    results
}

/// Builder for [`Server`]: a required `handler`, a required
/// `listener_config`, and optional `*_limits` overrides with `Default`
/// fallbacks.
pub struct ServerBuilder<H: Handler, St: SessionStore> {
    handler: Option<H>,
    session_store: Option<St>,
    listener_config: Option<ListenerConfig>,
    server_name: Option<String>,
    server_limits: Option<ServerLimits>,
    conn_limits: Option<ConnLimits>,
    req_limits: Option<ReqLimits>,
    resp_limits: Option<RespLimits>,
}

impl<H: Handler> ServerBuilder<H, SessionManager> {
    /// Uses the in-memory [`SessionManager`] with `limits.ttl`. Call
    /// [`Self::session_store`] instead to supply a
    /// custom [`SessionStore`] implementation.
    pub fn session_limits(mut self, limits: crate::limits::SessionLimits) -> Self {
        self.session_store = Some(SessionManager::new(limits.ttl));
        self
    }
}

impl<H: Handler, St: SessionStore> ServerBuilder<H, St> {
    pub fn handler(mut self, handler: H) -> Self {
        self.handler = Some(handler);
        self
    }

    pub fn session_store(mut self, store: St) -> Self {
        self.session_store = Some(store);
        self
    }

    pub fn listener_config(mut self, config: ListenerConfig) -> Self {
        self.listener_config = Some(config);
        self
    }

    /// Sets (or clears, with `None`) the `Server` response header value.
    /// Matches `original_source/mhttp/server.py::HttpServer.server_name`.
    pub fn server_name(mut self, name: Option<String>) -> Self {
        self.server_name = name;
        self
    }

    pub fn server_limits(mut self, limits: ServerLimits) -> Self {
        self.server_limits = Some(limits);
        self
    }

    pub fn connection_limits(mut self, limits: ConnLimits) -> Self {
        self.conn_limits = Some(limits);
        self
    }

    pub fn request_limits(mut self, limits: ReqLimits) -> Self {
        self.req_limits = Some(limits);
        self
    }

    pub fn response_limits(mut self, limits: RespLimits) -> Self {
        self.resp_limits = Some(limits);
        self
    }

    /// Binds the configured listener(s) and, if a [`TlsConfig`] was set,
    /// loads and parses its certificate chain and private key.
    ///
    /// # Panics
    /// Panics if `handler`, `session_store` (when `St` isn't
    /// [`SessionManager`]), or `listener_config` were never set.
    pub async fn build(self) -> io::Result<Server<H, St>> {
        let handler = Arc::new(
            self.handler
                .expect("the `handler` method must be called before `build`"),
        );
        let session_store = Arc::new(
            self.session_store
                .expect("the `session_store` method must be called before `build` for a custom store"),
        );
        let listener_config = self.listener_config.unwrap_or_default();

        let http_listener =
            TcpListener::bind((listener_config.bind_ip.as_str(), listener_config.http_port)).await?;

        let tls_listener = match &listener_config.tls {
            Some(tls) => {
                let listener =
                    TcpListener::bind((listener_config.bind_ip.as_str(), listener_config.https_port)).await?;
                let acceptor = build_tls_acceptor(tls)?;
                Some((listener, acceptor))
            }
            None => None,
        };

        Ok(Server {
            http_listener,
            tls_listener,
            handler,
            session_store,
            server_name: self.server_name,
            server_limits: self.server_limits.unwrap_or_default(),
            conn_limits: self.conn_limits.unwrap_or_default(),
            req_limits: self.req_limits.unwrap_or_default(),
            resp_limits: self.resp_limits.unwrap_or_default(),
        })
    }
}

/// Builds a `rustls` server config negotiating ALPN `http/1.1` only,
/// matching `original_source/mhttp/server.py::HttpServer.run`'s
/// `context.set_alpn_protocols(['http/1.1'])`.
fn build_tls_acceptor(config: &TlsConfig) -> io::Result<TlsAcceptor> {
    let cert_bytes = std::fs::read(&config.cert_path)?;
    let key_bytes = std::fs::read(&config.key_path)?;

    let certs: Vec<CertificateDer<'static>> = rustls_pemfile::certs(&mut cert_bytes.as_slice())
        .collect::<Result<_, _>>()
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let key: PrivateKeyDer<'static> = rustls_pemfile::private_key(&mut key_bytes.as_slice())
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "no private key found in key file"))?;

    let mut server_config = RustlsServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    server_config.alpn_protocols = vec![b"http/1.1".to_vec()];

    Ok(TlsAcceptor::from(Arc::new(server_config)))
}
