//! Ensures a callback future's panic, if it has one, never escapes into the
//! dispatch machinery (spec section 4.1, "tie-breaks and edge cases":
//! callback exceptions are caught, logged as `CallbackFailed`, and never
//! affect dispatch progress).

use futures::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;

/// Awaits `fut`, catching any panic. Returns `None` if it panicked.
pub(crate) async fn guard<F, T>(callback: &'static str, fut: F) -> Option<T>
where
    F: Future<Output = T>,
{
    match AssertUnwindSafe(fut).catch_unwind().await {
        Ok(value) => Some(value),
        Err(_panic_payload) => {
            #[cfg(feature = "tracing")]
            tracing::warn!(callback, "dispatch callback panicked; ignoring");

            #[cfg(feature = "metrics")]
            metrics::counter!("dispatch_callback_failures_total", "callback" => callback)
                .increment(1);

            #[cfg(not(any(feature = "tracing", feature = "metrics")))]
            let _ = callback;

            None
        }
    }
}
