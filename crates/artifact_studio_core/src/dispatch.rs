//! crates/artifact_studio_core/src/dispatch.rs
//!
//! Sends built requests to the model transport, retrying rate-limited attempts
//! with exponential backoff and honouring a cancellation token.

use futures::{Stream, StreamExt};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::ports::{ModelTransport, TransportError};
use crate::request::GenerationRequest;

/// Used when a single-shot call succeeds with no text.
pub const EMPTY_RESPONSE_FALLBACK: &str = "Sorry, I couldn't generate a response.";

/// Backoff settings for rate-limited attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(2000),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry `retry` (1-based): `base * 2^retry`.
    pub fn delay_for(&self, retry: u32) -> Duration {
        self.base_delay * 2u32.pow(retry)
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum DispatchError {
    #[error("Rate limit still exceeded after {attempts} attempts")]
    RateLimited { attempts: u32 },
    #[error("Model transport failed: {0}")]
    Fatal(TransportError),
}

/// Ordered deltas from one dispatch, across however many attempts it took.
pub type DeltaStream = Pin<Box<dyn Stream<Item = Result<String, DispatchError>> + Send>>;

#[derive(Clone)]
pub struct Dispatcher {
    transport: Arc<dyn ModelTransport>,
    policy: RetryPolicy,
}

impl Dispatcher {
    pub fn new(transport: Arc<dyn ModelTransport>) -> Self {
        Self::with_policy(transport, RetryPolicy::default())
    }

    pub fn with_policy(transport: Arc<dyn ModelTransport>, policy: RetryPolicy) -> Self {
        Self { transport, policy }
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Single-shot dispatch. `Ok(None)` means the token was cancelled.
    pub async fn complete(
        &self,
        request: &GenerationRequest,
        token: &CancellationToken,
    ) -> Result<Option<String>, DispatchError> {
        let mut retries = 0;
        loop {
            if token.is_cancelled() {
                info!("Dispatch cancelled before attempt {}.", retries + 1);
                return Ok(None);
            }

            let result = tokio::select! {
                biased;
                _ = token.cancelled() => return Ok(None),
                result = self.transport.generate(request) => result,
            };

            match result {
                Ok(text) if text.trim().is_empty() => return Ok(Some(EMPTY_RESPONSE_FALLBACK.to_string())),
                Ok(text) => return Ok(Some(text)),
                Err(err) if err.is_rate_limited() => {
                    retries += 1;
                    if retries > self.policy.max_retries {
                        error!("Rate limit exhausted after {} attempts: {}", retries, err);
                        return Err(DispatchError::RateLimited { attempts: retries });
                    }
                    let delay = self.policy.delay_for(retries);
                    warn!(
                        "Rate limit hit. Retrying ({}/{}) in {:?}...",
                        retries, self.policy.max_retries, delay
                    );
                    if !wait_or_cancel(delay, token).await {
                        return Ok(None);
                    }
                }
                Err(err) => {
                    error!("Model transport error: {}", err);
                    return Err(DispatchError::Fatal(err));
                }
            }
        }
    }

    /// Streaming dispatch. The stream simply ends when the token is cancelled.
    ///
    /// Only attempts that fail before yielding anything are retried; a failure
    /// after partial output ends the stream with a fatal error.
    pub fn stream(&self, request: GenerationRequest, token: CancellationToken) -> DeltaStream {
        let transport = self.transport.clone();
        let policy = self.policy;

        Box::pin(async_stream::stream! {
            let mut retries = 0;
            loop {
                if token.is_cancelled() {
                    info!("Stream dispatch cancelled before attempt {}.", retries + 1);
                    return;
                }

                let opened = tokio::select! {
                    biased;
                    _ = token.cancelled() => return,
                    opened = transport.generate_stream(&request) => opened,
                };

                let failure = match opened {
                    Ok(mut deltas) => {
                        let mut yielded = false;
                        loop {
                            let next = tokio::select! {
                                biased;
                                _ = token.cancelled() => {
                                    info!("Stream aborted by user.");
                                    return;
                                }
                                next = deltas.next() => next,
                            };
                            match next {
                                None => return,
                                Some(Ok(delta)) => {
                                    yielded = true;
                                    yield Ok(delta);
                                }
                                Some(Err(err)) if !yielded => break err,
                                Some(Err(err)) => {
                                    error!("Model stream dropped after partial output: {}", err);
                                    yield Err(DispatchError::Fatal(err));
                                    return;
                                }
                            }
                        }
                    }
                    Err(err) => err,
                };

                if !failure.is_rate_limited() {
                    error!("Model stream error: {}", failure);
                    yield Err(DispatchError::Fatal(failure));
                    return;
                }

                retries += 1;
                if retries > policy.max_retries {
                    error!("Stream rate limit exhausted after {} attempts: {}", retries, failure);
                    yield Err(DispatchError::RateLimited { attempts: retries });
                    return;
                }
                let delay = policy.delay_for(retries);
                warn!(
                    "Rate limit hit (stream). Retrying ({}/{}) in {:?}...",
                    retries, policy.max_retries, delay
                );
                if !wait_or_cancel(delay, &token).await {
                    return;
                }
            }
        })
    }
}

/// Sleeps for `delay`; returns false if the token fired first.
async fn wait_or_cancel(delay: Duration, token: &CancellationToken) -> bool {
    tokio::select! {
        biased;
        _ = token.cancelled() => false,
        _ = tokio::time::sleep(delay) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ChatMode, Tier};
    use crate::ports::TextStream;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use tokio::time::Instant;

    enum Attempt {
        Fail(TransportError),
        Deltas(Vec<Result<String, TransportError>>),
    }

    struct ScriptedTransport {
        script: Mutex<VecDeque<Attempt>>,
        attempts_at: Mutex<Vec<Instant>>,
    }

    impl ScriptedTransport {
        fn new(script: Vec<Attempt>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into()),
                attempts_at: Mutex::new(Vec::new()),
            })
        }

        fn next(&self) -> Attempt {
            self.attempts_at.lock().unwrap().push(Instant::now());
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Attempt::Fail(TransportError::fatal(None, "script exhausted")))
        }

        fn gaps(&self) -> Vec<Duration> {
            let at = self.attempts_at.lock().unwrap();
            at.windows(2).map(|w| w[1] - w[0]).collect()
        }

        fn attempts(&self) -> usize {
            self.attempts_at.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl ModelTransport for ScriptedTransport {
        async fn generate(&self, _request: &GenerationRequest) -> Result<String, TransportError> {
            match self.next() {
                Attempt::Fail(err) => Err(err),
                Attempt::Deltas(deltas) => Ok(deltas.into_iter().filter_map(Result::ok).collect()),
            }
        }

        async fn generate_stream(
            &self,
            _request: &GenerationRequest,
        ) -> Result<TextStream, TransportError> {
            match self.next() {
                Attempt::Fail(err) => Err(err),
                Attempt::Deltas(deltas) => Ok(Box::pin(futures::stream::iter(deltas))),
            }
        }
    }

    fn request() -> GenerationRequest {
        GenerationRequest {
            model: "m".to_string(),
            system_instruction: String::new(),
            parts: Vec::new(),
            mode: ChatMode::Creator,
            tier: Tier::Free,
        }
    }

    fn ok(deltas: &[&str]) -> Attempt {
        Attempt::Deltas(deltas.iter().map(|d| Ok(d.to_string())).collect())
    }

    fn limited() -> Attempt {
        Attempt::Fail(TransportError::rate_limited("429 Too Many Requests"))
    }

    async fn collect(stream: DeltaStream) -> Vec<Result<String, DispatchError>> {
        stream.collect().await
    }

    #[test]
    fn backoff_doubles_from_four_seconds() {
        let policy = RetryPolicy::default();
        assert_eq!(
            (1..=3).map(|n| policy.delay_for(n)).collect::<Vec<_>>(),
            vec![
                Duration::from_millis(4000),
                Duration::from_millis(8000),
                Duration::from_millis(16000)
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn stream_retries_rate_limits_with_backoff() {
        let transport = ScriptedTransport::new(vec![limited(), limited(), ok(&["a", "b"])]);
        let dispatcher = Dispatcher::new(transport.clone());

        let out = collect(dispatcher.stream(request(), CancellationToken::new())).await;

        assert_eq!(out.into_iter().map(Result::unwrap).collect::<Vec<_>>(), vec!["a", "b"]);
        assert_eq!(transport.attempts(), 3);
        assert_eq!(
            transport.gaps(),
            vec![Duration::from_millis(4000), Duration::from_millis(8000)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn complete_retries_rate_limits_with_backoff() {
        let transport = ScriptedTransport::new(vec![limited(), limited(), ok(&["done"])]);
        let dispatcher = Dispatcher::new(transport.clone());

        let out = dispatcher.complete(&request(), &CancellationToken::new()).await.unwrap();

        assert_eq!(out.as_deref(), Some("done"));
        assert_eq!(
            transport.gaps(),
            vec![Duration::from_millis(4000), Duration::from_millis(8000)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_retries_surface_rate_limit_error() {
        let transport = ScriptedTransport::new(vec![limited(), limited(), limited(), limited()]);
        let dispatcher = Dispatcher::new(transport.clone());

        let err = dispatcher
            .complete(&request(), &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, DispatchError::RateLimited { attempts: 4 }));
        assert_eq!(transport.attempts(), 4);
        assert_eq!(transport.gaps().last(), Some(&Duration::from_millis(16000)));
    }

    #[tokio::test]
    async fn fatal_errors_are_not_retried() {
        let transport = ScriptedTransport::new(vec![
            Attempt::Fail(TransportError::fatal(Some(500), "boom")),
            ok(&["never"]),
        ]);
        let dispatcher = Dispatcher::new(transport.clone());

        let out = collect(dispatcher.stream(request(), CancellationToken::new())).await;

        assert_eq!(out.len(), 1);
        assert!(matches!(&out[0], Err(DispatchError::Fatal(e)) if e.status == Some(500)));
        assert_eq!(transport.attempts(), 1);
    }

    #[tokio::test]
    async fn failure_after_partial_output_is_fatal() {
        let transport = ScriptedTransport::new(vec![
            Attempt::Deltas(vec![
                Ok("partial".to_string()),
                Err(TransportError::rate_limited("429 mid-stream")),
            ]),
            ok(&["retry"]),
        ]);
        let dispatcher = Dispatcher::new(transport.clone());

        let out = collect(dispatcher.stream(request(), CancellationToken::new())).await;

        assert_eq!(out.len(), 2);
        assert_eq!(out[0].as_deref().ok(), Some("partial"));
        assert!(matches!(out[1], Err(DispatchError::Fatal(_))));
        assert_eq!(transport.attempts(), 1);
    }

    #[tokio::test]
    async fn cancelled_token_makes_no_attempt() {
        let transport = ScriptedTransport::new(vec![ok(&["x"])]);
        let dispatcher = Dispatcher::new(transport.clone());
        let token = CancellationToken::new();
        token.cancel();

        assert!(collect(dispatcher.stream(request(), token.clone())).await.is_empty());
        assert_eq!(dispatcher.complete(&request(), &token).await.unwrap(), None);
        assert_eq!(transport.attempts(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_during_backoff_ends_quietly() {
        let transport = ScriptedTransport::new(vec![limited(), ok(&["late"])]);
        let dispatcher = Dispatcher::new(transport.clone());
        let token = CancellationToken::new();

        let canceller = {
            let token = token.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(1000)).await;
                token.cancel();
            })
        };
        let out = collect(dispatcher.stream(request(), token)).await;
        canceller.await.unwrap();

        assert!(out.is_empty());
        assert_eq!(transport.attempts(), 1);
    }

    #[tokio::test]
    async fn empty_single_shot_response_uses_fallback() {
        let transport = ScriptedTransport::new(vec![ok(&["  "])]);
        let out = Dispatcher::new(transport)
            .complete(&request(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(out.as_deref(), Some(EMPTY_RESPONSE_FALLBACK));
    }
}
