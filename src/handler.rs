//! The request-handling seam: the [`Handler`] trait a caller implements,
//! [`Context`] bundling per-request session state, and the
//! [`SessionStore`] trait seam backing it.
//!
//! `Handler::handle` is an async method returning `impl Future<..> +
//! Send` rather than `#[async_trait]`, and takes a session value rather
//! than a generic connection-data parameter: every request carries a
//! session loaded from its `Session` cookie.

use crate::errors::HttpError;
use crate::http::{Request, Response};
use crate::session::SessionValue;
use std::future::Future;

/// Per-request state handed to a [`Handler`]: the session value loaded
/// for the request's `Session` cookie (or an empty map for a new
/// session). A handler mutates it freely; the connection loop decides
/// afterward whether to persist, replace, or drop it.
pub struct Context<'a> {
    pub session: &'a mut SessionValue,
}

/// Implemented by application code to answer one request at a time.
///
/// Session handling is a built-in feature rather than something every
/// handler re-derives, so the second parameter is always the
/// session-bearing [`Context`] rather than a generic connection type.
pub trait Handler: Sync + Send + 'static {
    fn handle(
        &self,
        ctx: &mut Context<'_>,
        req: &Request,
    ) -> impl Future<Output = Result<Response, HttpError>> + Send;
}

/// A pluggable backing store for session values:
/// [`crate::session::SessionManager`] is the in-memory default, but a
/// caller may back sessions with Redis, a database, or anything else
/// that can satisfy this trait.
pub trait SessionStore: Sync + Send + 'static {
    fn get(&self, token: &str) -> impl Future<Output = Option<SessionValue>> + Send;
    fn set(&self, token: &str, value: SessionValue) -> impl Future<Output = ()> + Send;
    fn add(&self, value: SessionValue) -> impl Future<Output = String> + Send;
    fn delete(&self, token: &str) -> impl Future<Output = ()> + Send;
    fn contains(&self, token: &str) -> impl Future<Output = bool> + Send;
}

impl SessionStore for crate::session::SessionManager {
    async fn get(&self, token: &str) -> Option<SessionValue> {
        self.get_session(token).await
    }

    async fn set(&self, token: &str, value: SessionValue) {
        self.set_session(token, value).await
    }

    async fn add(&self, value: SessionValue) -> String {
        self.add_session(value).await
    }

    async fn delete(&self, token: &str) {
        self.delete_session(token).await
    }

    async fn contains(&self, token: &str) -> bool {
        self.contains(token).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::types::{StatusCode, Version};
    use crate::session::SessionManager;
    use std::time::Duration;

    struct EchoHandler;

    impl Handler for EchoHandler {
        async fn handle(&self, ctx: &mut Context<'_>, _req: &Request) -> Result<Response, HttpError> {
            ctx.session.insert("visits".to_string(), serde_json::json!(1));
            Ok(Response::new(StatusCode::Ok, Version::Http11))
        }
    }

    #[tokio::test]
    async fn handler_can_mutate_session_through_context() {
        let store = SessionManager::new(Duration::from_secs(60));
        let mut session = SessionValue::new();
        let mut ctx = Context { session: &mut session };
        let handler = EchoHandler;
        let req = crate::http::request::Request {
            method: crate::http::types::Method::Get,
            route: "/".to_string(),
            version: Version::Http11,
            headers: crate::http::types::HeaderMap::new(),
            cookies: crate::http::types::HeaderMap::new(),
            args: crate::http::types::HeaderMap::new(),
            body: crate::spool::Body::empty(),
        };
        handler.handle(&mut ctx, &req).await.unwrap();
        assert_eq!(session.get("visits"), Some(&serde_json::json!(1)));
        let _ = store;
    }
}
