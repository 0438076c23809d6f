// sb-test-utils: shared test helpers for the switchboard suites.
//
// Canned service handlers, free-port allocation, and a polling helper for
// timing-sensitive assertions.

use std::sync::Arc;
use std::time::Duration;

use sb_core::{handler_fn, ServiceHandler};
use serde_json::Value;
use tokio::net::TcpListener;

/// Pick a free port.
pub async fn free_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    tokio::time::sleep(Duration::from_millis(10)).await;
    port
}

/// An echo service: `echo` returns its first parameter, `concat` joins all
/// string parameters, anything else fails.
pub fn echo_handler() -> Arc<dyn ServiceHandler> {
    handler_fn(|method, params| match method {
        "echo" => Ok(params.first().cloned().unwrap_or(Value::Null)),
        "concat" => Ok(Value::String(
            params
                .iter()
                .filter_map(Value::as_str)
                .collect::<Vec<_>>()
                .join(""),
        )),
        other => Err(format!("no such method: {other}")),
    })
}

/// A service whose every method fails with `message`.
pub fn failing_handler(message: &str) -> Arc<dyn ServiceHandler> {
    let message = message.to_owned();
    handler_fn(move |_, _| Err(message.clone()))
}

/// A service whose every method blocks for `delay` before answering.
pub fn slow_handler(delay: Duration, reply: Value) -> Arc<dyn ServiceHandler> {
    handler_fn(move |_, _| {
        std::thread::sleep(delay);
        Ok(reply.clone())
    })
}

/// Poll `check` every 20 ms until it passes or `deadline` elapses.
pub async fn wait_until(deadline: Duration, mut check: impl FnMut() -> bool) -> bool {
    let start = tokio::time::Instant::now();
    loop {
        if check() {
            return true;
        }
        if start.elapsed() > deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn echo_returns_first_parameter() {
        let handler = echo_handler();
        assert_eq!(handler.invoke("echo", &[json!(5)]).unwrap(), json!(5));
        assert_eq!(
            handler.invoke("concat", &[json!("a"), json!("b")]).unwrap(),
            json!("ab")
        );
        assert!(handler.invoke("nope", &[]).is_err());
    }

    #[test]
    fn failing_handler_always_fails() {
        let handler = failing_handler("boom");
        assert_eq!(handler.invoke("anything", &[]).unwrap_err(), "boom");
    }

    #[tokio::test]
    async fn wait_until_observes_the_deadline() {
        assert!(wait_until(Duration::from_millis(200), || true).await);
        let start = tokio::time::Instant::now();
        assert!(!wait_until(Duration::from_millis(100), || false).await);
        assert!(start.elapsed() >= Duration::from_millis(100));
    }
}
