//! The per-connection request/response loop.
//!
//! Grounded on `original_source/mhttp/server.py::HttpServer.handle_client`
//! / `handle_request` for the error-mapping and session get/set/delete
//! shape: one struct per connection, its socket buffer and budgets reset
//! and reused across keep-alive iterations rather than reallocated per
//! request.

use crate::errors::HttpError;
use crate::handler::{Context, Handler, SessionStore};
use crate::http::cookie::Cookie;
use crate::http::types::{StatusCode, Version};
use crate::http::{write_response, Response};
use crate::limits::{ConnLimits, ReqLimits, RespLimits};
use crate::session::SessionValue;
use crate::socket::BufferedSocket;
use std::sync::Arc;
use std::time::Instant;
use tokio::io::{AsyncRead, AsyncWrite};

const SESSION_COOKIE: &str = "Session";

/// Drives one accepted connection from its first byte to close,
/// reusing the same socket buffer and budgets across keep-alive
/// iterations instead of allocating a fresh reader per request.
pub struct HttpConnection<H, St> {
    handler: Arc<H>,
    session_store: Arc<St>,
    conn_limits: ConnLimits,
    req_limits: ReqLimits,
    resp_limits: RespLimits,
    server_name: Option<String>,
}

impl<H, St> HttpConnection<H, St>
where
    H: Handler,
    St: SessionStore,
{
    pub fn new(
        handler: Arc<H>,
        session_store: Arc<St>,
        conn_limits: ConnLimits,
        req_limits: ReqLimits,
        resp_limits: RespLimits,
        server_name: Option<String>,
    ) -> Self {
        Self {
            handler,
            session_store,
            conn_limits,
            req_limits,
            resp_limits,
            server_name,
        }
    }

    /// Serves requests off `stream` until the peer closes, a protocol
    /// error ends the connection, or a per-connection limit (request
    /// count, lifetime) is reached.
    pub async fn run<S>(&self, stream: S)
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let mut socket = BufferedSocket::new(stream);
        let started = Instant::now();
        let mut request_count = 0usize;

        loop {
            if request_count >= self.conn_limits.max_requests_per_connection {
                break;
            }
            if started.elapsed() > self.conn_limits.connection_lifetime {
                break;
            }

            socket.timeout = self.conn_limits.socket_read_timeout;
            let mut reader = crate::http::HttpReader::new(&mut socket, self.req_limits.clone());
            let request = match reader.read_request().await {
                Ok(Some(req)) => req,
                Ok(None) => break,
                Err(e) => {
                    let mut resp = self.error_response(&e, Version::Http11);
                    let _ = socket.send_with_timeout(&resp_bytes(&mut resp).await, self.conn_limits.socket_write_timeout).await;
                    break;
                }
            };

            let version = request.version;
            let request_keep_alive = request.keep_connection();

            let mut response = match self.handle_with_session(&request).await {
                Ok(resp) => resp,
                Err(e) => self.error_response(&e, version),
            };
            response.version = version;
            self.add_server_name(&mut response);
            if response.is_chunked() && response.chunk_size == crate::http::DEFAULT_CHUNK_SIZE {
                response.chunk_size = self.resp_limits.io_chunk_size;
            }
            let keep_alive = request_keep_alive && response.keep_connection();

            let bytes = resp_bytes(&mut response).await;
            if socket
                .send_with_timeout(&bytes, self.conn_limits.socket_write_timeout)
                .await
                .is_err()
            {
                break;
            }

            request_count += 1;
            if !keep_alive {
                break;
            }
        }
    }

    /// Loads the session named by the request's `Session` cookie (or
    /// starts an empty one), runs the handler, and persists the result.
    ///
    /// Departs from the source here: Python's `dict` is passed by
    /// reference, so a handler mutating `context.session` mutates the
    /// same object already stored in `ExpiringDict`, and an *existing*
    /// session never needs to be written back. Rust's `SessionManager`
    /// hands out owned clones instead, so an existing session is always
    /// re-saved after the handler runs to make the same mutations durable.
    async fn handle_with_session(&self, request: &crate::http::Request) -> Result<Response, HttpError> {
        let session_key = request.cookies.get(SESSION_COOKIE).map(str::to_string);
        let mut session: SessionValue = match &session_key {
            Some(key) => self.session_store.get(key).await.unwrap_or_default(),
            None => SessionValue::new(),
        };

        let mut ctx = Context { session: &mut session };
        let mut response = self.handler.handle(&mut ctx, request).await?;

        if session.is_empty() {
            if let Some(key) = &session_key {
                self.session_store.delete(key).await;
            }
        } else {
            match &session_key {
                Some(key) if self.session_store.contains(key).await => {
                    self.session_store.set(key, session).await;
                }
                _ => {
                    let new_key = self.session_store.add(session).await;
                    response.add_cookie(
                        Cookie::new(SESSION_COOKIE, new_key, "/", None, None, true, false, crate::http::SameSite::Lax, None)
                            .expect("HttpOnly/Lax session cookie is always constructible"),
                    );
                }
            }
        }

        Ok(response)
    }

    fn add_server_name(&self, response: &mut Response) {
        if let Some(name) = &self.server_name {
            response.headers.insert("Server", name.clone());
        }
    }

    /// Builds an error response, matching `HttpServer.error_resp`: the
    /// error's message becomes the body, its status the status line.
    fn error_response(&self, error: &HttpError, version: Version) -> Response {
        let mut resp = Response::new(error.status, version);
        self.add_server_name(&mut resp);
        if let Some(message) = &error.message {
            let body = message.clone().into_bytes();
            let len = body.len() as u64;
            resp.set_body(Box::pin(std::io::Cursor::new(body)), len);
        }
        resp
    }
}

async fn resp_bytes(response: &mut Response) -> Vec<u8> {
    let mut buf = Vec::new();
    let _ = write_response(&mut buf, response).await;
    buf
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionManager;
    use std::time::Duration;
    use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt};

    struct EchoHandler;

    impl Handler for EchoHandler {
        async fn handle(&self, ctx: &mut Context<'_>, req: &crate::http::Request) -> Result<Response, HttpError> {
            let count = ctx.session.get("count").and_then(|v| v.as_i64()).unwrap_or(0) + 1;
            ctx.session.insert("count".to_string(), serde_json::json!(count));
            let mut resp = Response::new(StatusCode::Ok, req.version);
            let body = format!("visit {count}").into_bytes();
            let len = body.len() as u64;
            resp.set_body(Box::pin(std::io::Cursor::new(body)), len);
            Ok(resp)
        }
    }

    fn new_conn() -> HttpConnection<EchoHandler, SessionManager> {
        HttpConnection::new(
            Arc::new(EchoHandler),
            Arc::new(SessionManager::new(Duration::from_secs(60))),
            ConnLimits::default(),
            ReqLimits::default(),
            RespLimits::default(),
            Some("wirebound".to_string()),
        )
    }

    #[tokio::test]
    async fn serves_one_request_and_closes_on_connection_header() {
        let conn = new_conn();
        let (mut client, server) = duplex(8192);
        client
            .write_all(b"GET / HTTP/1.1\r\nConnection: close\r\n\r\n")
            .await
            .unwrap();
        conn.run(server).await;
        let mut out = Vec::new();
        client.read_to_end(&mut out).await.unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("HTTP/1.1 200 OK"));
        assert!(text.contains("Server: wirebound"));
        assert!(text.ends_with("visit 1"));
    }

    #[tokio::test]
    async fn sets_session_cookie_on_first_response_with_fresh_session() {
        let conn = new_conn();
        let (mut client, server) = duplex(8192);
        client
            .write_all(b"GET / HTTP/1.1\r\nConnection: close\r\n\r\n")
            .await
            .unwrap();
        conn.run(server).await;
        let mut out = Vec::new();
        client.read_to_end(&mut out).await.unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("Set-Cookie: Session="));
    }

    #[tokio::test]
    async fn bad_request_gets_an_error_response_not_a_silent_close() {
        let conn = new_conn();
        let (mut client, server) = duplex(8192);
        client.write_all(b"NOPE / HTTP/1.1\r\n\r\n").await.unwrap();
        conn.run(server).await;
        let mut out = Vec::new();
        client.read_to_end(&mut out).await.unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("HTTP/1.1 400"));
    }
}
