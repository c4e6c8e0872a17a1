//! The async boundary: run a handler so that every way it can fail (an
//! `Err`, a panic while building the future, a panic at any later poll)
//! resolves to exactly one normalized outcome.
//!
//! `catch_unwind` wraps the future before its first poll, so there is no
//! suspension point at which a failure can slip past the boundary.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use axum::response::{IntoResponse, Response};
use futures_util::FutureExt;
use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::error::{normalize, Failure, NormalizedError};

/// Run `handler` and settle it exactly once.
///
/// Synchronous panics (raised before the first `.await`, or while the
/// future is being constructed), asynchronous panics and `Err` values all
/// come back as `Err(NormalizedError)`.
pub async fn settle<F, Fut, T, E>(handler: F) -> Result<T, NormalizedError>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Into<Failure>,
{
    let fut = match std::panic::catch_unwind(AssertUnwindSafe(handler)) {
        Ok(fut) => fut,
        Err(payload) => return Err(normalize(Failure::from_panic(payload))),
    };

    match AssertUnwindSafe(fut).catch_unwind().await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(err)) => Err(normalize(err.into())),
        Err(payload) => Err(normalize(Failure::from_panic(payload))),
    }
}

/// Specialisation used by the middleware: the inner service already turns
/// typed errors into responses, so only panics need intercepting here.
pub async fn catch_response<Fut>(fut: Fut) -> Result<Response, NormalizedError>
where
    Fut: Future<Output = Response>,
{
    AssertUnwindSafe(fut)
        .catch_unwind()
        .await
        .map_err(|payload| normalize(Failure::from_panic(payload)))
}

// ─── Early reply ─────────────────────────────────────────────────

/// Handle for sending the response before the handler has finished.
///
/// Inserted into the request extensions by the middleware; take it with
/// `Extension<Reply>`. The first `send` wins; the handler keeps running in
/// the background and anything it returns (or fails with) afterwards is
/// recorded but never sent.
#[derive(Clone)]
pub struct Reply {
    slot: Arc<Mutex<Option<oneshot::Sender<Response>>>>,
}

impl Reply {
    pub(crate) fn channel() -> (Self, oneshot::Receiver<Response>) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                slot: Arc::new(Mutex::new(Some(tx))),
            },
            rx,
        )
    }

    /// Send `response` now. Returns `false` if a response was already sent
    /// or the request has gone away.
    pub fn send(&self, response: impl IntoResponse) -> bool {
        let Some(tx) = self.slot.lock().take() else {
            return false;
        };
        tx.send(response.into_response()).is_ok()
    }

    pub fn is_sent(&self) -> bool {
        self.slot.lock().is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{create_error, HttpError};
    use axum::http::StatusCode;

    #[tokio::test]
    async fn ok_passes_through() {
        let out = settle(|| async { Ok::<_, HttpError>(7) }).await;
        assert_eq!(out.unwrap(), 7);
    }

    #[tokio::test]
    async fn err_is_normalized() {
        let out: Result<(), _> =
            settle(|| async { Err(create_error("User not found", 404, "USER_NOT_FOUND")) }).await;
        let err = out.unwrap_err();
        assert_eq!(err.status_code(), 404);
        assert_eq!(err.code(), "USER_NOT_FOUND");
    }

    #[tokio::test]
    async fn sync_panic_is_caught() {
        let out: Result<(), NormalizedError> = settle(|| {
            if true {
                panic!("before the future exists");
            }
            async { Ok::<_, HttpError>(()) }
        })
        .await;
        let err = out.unwrap_err();
        assert_eq!(err.status_code(), 500);
        assert_eq!(err.cause(), Some("before the future exists"));
    }

    #[tokio::test]
    async fn panic_after_await_is_caught() {
        let out = settle(|| async {
            tokio::task::yield_now().await;
            if true {
                panic!("after a suspension point");
            }
            Ok::<(), HttpError>(())
        })
        .await;
        assert_eq!(out.unwrap_err().cause(), Some("after a suspension point"));
    }

    #[tokio::test]
    async fn catch_response_maps_panics_only() {
        let ok = catch_response(async { StatusCode::CREATED.into_response() }).await;
        assert_eq!(ok.unwrap().status(), StatusCode::CREATED);

        let failed = catch_response(async {
            tokio::task::yield_now().await;
            if true {
                panic!("boom");
            }
            StatusCode::OK.into_response()
        })
        .await;
        assert_eq!(failed.err().unwrap().code(), "INTERNAL_ERROR");
    }

    #[tokio::test]
    async fn reply_sends_once() {
        let (reply, rx) = Reply::channel();
        assert!(!reply.is_sent());
        assert!(reply.send(StatusCode::ACCEPTED));
        assert!(reply.is_sent());
        assert!(!reply.clone().send(StatusCode::OK));
        assert_eq!(rx.await.unwrap().status(), StatusCode::ACCEPTED);
    }
}
