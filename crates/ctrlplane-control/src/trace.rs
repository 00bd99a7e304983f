//! Span wrapping for units of work

use std::future::Future;
use tracing::Instrument;

/// Run a future inside an `info` span named after the operation
pub async fn traced<F>(operation: &'static str, fut: F) -> F::Output
where
    F: Future,
{
    fut.instrument(tracing::info_span!("ctrlplane", operation))
        .await
}
