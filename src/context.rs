// ChurchCMS backend — per-request context carrier
//
// Every inbound request is served inside its own task-local scope holding
// the caller's identity (admin username, client IP, user agent). Code that
// has no handle to the request — change observers, audit hooks — reads it
// through `current()`. The scope is dropped with the request future on
// every exit path, so one request's identity can never leak into another.

use std::net::SocketAddr;

use axum::http::{header, HeaderMap};

tokio::task_local! {
    static REQUEST_CONTEXT: RequestContext;
}

#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Authenticated admin username; `None` for anonymous requests.
    pub actor: Option<String>,
    pub ip_address: Option<String>,
    pub user_agent: String,
}

/// Run `fut` with `ctx` as the ambient request context of the current task.
pub async fn scope<F>(ctx: RequestContext, fut: F) -> F::Output
where
    F: std::future::Future,
{
    REQUEST_CONTEXT.scope(ctx, fut).await
}

/// The context of the request currently being served on this task, or
/// `None` outside a request scope (startup, scheduler jobs, operator bins).
pub fn current() -> Option<RequestContext> {
    REQUEST_CONTEXT.try_with(|ctx| ctx.clone()).ok()
}

/// Client IP: first hop of X-Forwarded-For when present, else the peer
/// address of the socket.
pub fn client_ip(headers: &HeaderMap, peer: Option<SocketAddr>) -> Option<String> {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|ip| ip.trim().to_string())
        .filter(|ip| !ip.is_empty())
        .or_else(|| peer.map(|addr| addr.ip().to_string()))
}

pub fn user_agent(headers: &HeaderMap) -> String {
    headers
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(actor: &str) -> RequestContext {
        RequestContext {
            actor: Some(actor.to_string()),
            ip_address: Some("10.0.0.1".to_string()),
            user_agent: "test".to_string(),
        }
    }

    #[tokio::test]
    async fn current_is_none_outside_scope() {
        assert!(current().is_none());
    }

    #[tokio::test]
    async fn scope_sets_and_clears_context() {
        scope(ctx("alice"), async {
            let c = current().expect("context should be set inside scope");
            assert_eq!(c.actor.as_deref(), Some("alice"));
        })
        .await;

        assert!(current().is_none(), "context must not outlive its scope");
    }

    #[tokio::test]
    async fn concurrent_tasks_are_isolated() {
        let a = tokio::spawn(scope(ctx("alice"), async {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            current().and_then(|c| c.actor)
        }));
        let b = tokio::spawn(scope(ctx("bob"), async {
            current().and_then(|c| c.actor)
        }));

        assert_eq!(a.await.unwrap().as_deref(), Some("alice"));
        assert_eq!(b.await.unwrap().as_deref(), Some("bob"));
    }

    #[test]
    fn client_ip_prefers_forwarded_for_first_hop() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", "203.0.113.9, 10.0.0.2".parse().unwrap());
        let peer: SocketAddr = "127.0.0.1:9999".parse().unwrap();
        assert_eq!(
            client_ip(&headers, Some(peer)).as_deref(),
            Some("203.0.113.9")
        );
    }

    #[test]
    fn client_ip_falls_back_to_peer() {
        let peer: SocketAddr = "192.0.2.4:1234".parse().unwrap();
        assert_eq!(
            client_ip(&HeaderMap::new(), Some(peer)).as_deref(),
            Some("192.0.2.4")
        );
        assert!(client_ip(&HeaderMap::new(), None).is_none());
    }
}
