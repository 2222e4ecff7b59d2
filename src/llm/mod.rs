pub mod openai;

use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

pub use openai::{OpenAiEmbeddingProvider, OpenAiTextProvider};

/// Provider calls are retried this many times with exponential backoff
/// before the error surfaces to the handler.
const MAX_ATTEMPTS: u32 = 3;
const BACKOFF_BASE: Duration = Duration::from_millis(500);

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("provider returned an empty response")]
    EmptyResponse,

    #[error("{operation} failed after {attempts} attempts: {message}")]
    Exhausted {
        operation: &'static str,
        attempts: u32,
        message: String,
    },
}

/// Text generation as the enrichment handlers consume it.
#[async_trait]
pub trait TextProvider: Send + Sync {
    async fn generate_text(&self, prompt: &str) -> Result<String, ProviderError>;
}

/// Batch embedding. The dimension is fixed per provider instance and is
/// checked against the embedding tables at initialisation.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    fn dimensions(&self) -> usize;

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError>;
}

/// Retry a provider call with bounded exponential backoff. Transient
/// network and rate-limit errors wash out here; whatever survives all
/// attempts is reported once.
pub(crate) async fn with_retries<T, E, F, Fut>(
    operation: &'static str,
    mut call: F,
) -> Result<T, ProviderError>
where
    E: std::fmt::Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut last_error = String::new();

    for attempt in 1..=MAX_ATTEMPTS {
        match call().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                last_error = err.to_string();
                warn!(operation, attempt, error = %last_error, "provider call failed");
                if attempt < MAX_ATTEMPTS {
                    tokio::time::sleep(BACKOFF_BASE * 2u32.pow(attempt - 1)).await;
                }
            }
        }
    }

    Err(ProviderError::Exhausted {
        operation,
        attempts: MAX_ATTEMPTS,
        message: last_error,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test(start_paused = true)]
    async fn retries_until_success() {
        let calls = AtomicU32::new(0);
        let result = with_retries("test", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err("transient")
                } else {
                    Ok(42)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_the_cap() {
        let result: Result<(), _> = with_retries("test", || async { Err("still broken") }).await;

        match result {
            Err(ProviderError::Exhausted {
                attempts, message, ..
            }) => {
                assert_eq!(attempts, 3);
                assert_eq!(message, "still broken");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }
}
