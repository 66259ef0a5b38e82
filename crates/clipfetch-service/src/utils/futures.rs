use std::future::Future;
use std::time::Instant;

/// Execute a callback on dropping of the container type.
///
/// The callback must not panic under any circumstance. Since it is called while dropping an item,
/// this might result in aborting program execution.
pub struct CallOnDrop {
    f: Option<Box<dyn FnOnce() + Send + 'static>>,
}

impl CallOnDrop {
    /// Creates a new `CallOnDrop`.
    pub fn new<F: FnOnce() + Send + 'static>(f: F) -> CallOnDrop {
        CallOnDrop {
            f: Some(Box::new(f)),
        }
    }
}

impl Drop for CallOnDrop {
    fn drop(&mut self) {
        if let Some(f) = self.f.take() {
            f();
        }
    }
}

/// A guard to [`measure`] the execution of futures.
struct MeasureGuard {
    status: &'static str,
    metric: &'static str,
    start: Instant,
}

impl Drop for MeasureGuard {
    fn drop(&mut self) {
        metric!(
            timer(self.metric) = self.start.elapsed(),
            "status" => self.status,
        );
    }
}

/// Measures the duration of a future and reports it as the `metric` timer.
///
/// The metric is tagged with a status derived with the `get_status` function, or `"canceled"` if
/// the future is dropped before it completes. See the [`m`] module for status helpers.
pub async fn measure<S, F>(metric: &'static str, get_status: S, f: F) -> F::Output
where
    F: Future,
    S: FnOnce(&F::Output) -> &'static str,
{
    let mut guard = MeasureGuard {
        status: "canceled",
        metric,
        start: Instant::now(),
    };

    let output = f.await;
    guard.status = get_status(&output);
    output
}

/// Status helpers for [`measure`].
pub mod m {
    /// Creates a status derived from the future's result for [`measure`](super::measure).
    ///
    ///  - `"ok"` if the future resolves to `Ok(_)`
    ///  - `"err"` if the future resolves to `Err(_)`
    pub fn result<T, E>(result: &Result<T, E>) -> &'static str {
        match result {
            Ok(_) => "ok",
            Err(_) => "err",
        }
    }

    /// Creates a status derived from the future's result for [`measure`](super::measure).
    ///
    ///  - `"ok"` if the future resolves to `Ok(_)`
    ///  - `"err"` if the future resolves to `Err(_)`
    ///  - `"timeout"` if the future times out
    pub fn timed_result<T, E>(
        result: &Result<Result<T, E>, tokio::time::error::Elapsed>,
    ) -> &'static str {
        match result {
            Ok(inner) => self::result(inner),
            Err(_) => "timeout",
        }
    }
}
