//! wirebound - a from-scratch HTTP/1.1 server framework
//!
//! Owns the wire parsing, body ingestion, response framing, session
//! tracking, and request dispatch for an HTTP/1.1 connection: a
//! line-oriented protocol reader with bounded time/byte/header budgets,
//! a chunked-and-fixed-length body decoder that spills large bodies to
//! disk, a streaming `multipart/form-data` parser, and a response
//! emitter that picks between `Content-Length` and chunked framing.
//!
//! # Quick start
//!
//! ```no_run
//! use wirebound::{Context, Handler, ListenerConfig, Request, Response, Server, StatusCode, Version};
//! use wirebound::errors::HttpError;
//!
//! struct Hello;
//!
//! impl Handler for Hello {
//!     async fn handle(&self, _ctx: &mut Context<'_>, _req: &Request) -> Result<Response, HttpError> {
//!         let mut resp = Response::new(StatusCode::Ok, Version::Http11);
//!         resp.set_body(Box::pin(std::io::Cursor::new(b"hello".to_vec())), 5);
//!         Ok(resp)
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> std::io::Result<()> {
//!     Server::builder()
//!         .handler(Hello)
//!         .session_limits(wirebound::limits::SessionLimits::default())
//!         .listener_config(ListenerConfig::default())
//!         .build()
//!         .await?
//!         .launch()
//!         .await
//! }
//! ```
//!
//! What this crate does NOT do: HTTP/2 or HTTP/3 framing, WebSocket
//! upgrade, pipelined request interleaving, content compression,
//! caching, or authentication beyond an opaque session cookie. Bring
//! your own accept-loop substitute, TLS terminator, or session backend
//! via the [`SessionStore`] trait if the built-in pieces don't fit.

pub mod buffer;
pub mod errors;
pub mod form;
pub mod handler;
pub mod http;
pub mod json;
pub mod limits;
pub mod multipart;
pub mod server;
pub mod session;
pub mod socket;
pub mod spool;

pub use crate::{
    errors::HttpError,
    form::{CopiedFile, Form, FormFile},
    handler::{Context, Handler, SessionStore},
    http::{
        file_response, BodyValue, Cookie, FileSource, HeaderMap, HeaderMapView, Method, Request, Response,
        ResponseBody, SameSite, StatusCode, Version,
    },
    multipart::{FieldMetadata, MultipartReader},
    server::{ListenerConfig, Server, ServerBuilder, TlsConfig},
    session::{SessionManager, SessionValue},
    spool::{Body, BodyStream, TempFileFactory},
};
