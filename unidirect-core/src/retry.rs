//! Retrying subscriptions
//!
//! A subscription whose underlying operation can fail. A failure is turned
//! into an action right away, then the operation is re-invoked after a fixed
//! delay, indefinitely. The subscription's cancellation token is checked
//! immediately before every deferred re-attempt, so a subscription stopped
//! during its delay window produces nothing more.

use std::sync::Arc;
use std::time::Duration;

use futures::future::Future;
use futures::stream::{self, BoxStream, Stream, StreamExt};
use tokio_util::sync::CancellationToken;

use crate::subscriptions::{Subscription, SubscriptionKey};

/// Configuration for retrying subscriptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryConfig {
    /// Pause between a failure and the next attempt.
    pub delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            delay: Duration::from_secs(1),
        }
    }
}

impl RetryConfig {
    /// Create a config with the given delay.
    pub fn with_delay(delay: Duration) -> Self {
        Self { delay }
    }
}

enum Phase<T, E> {
    Start,
    Running(BoxStream<'static, Result<T, E>>),
    Waiting,
}

struct Retry<Op, M, Env, T, E> {
    op: Arc<Op>,
    map: Arc<M>,
    env: Arc<Env>,
    token: CancellationToken,
    delay: Duration,
    attempt: u64,
    phase: Phase<T, E>,
}

fn retry_stream<A, Env, Op, St, T, E, M>(
    op: Arc<Op>,
    map: Arc<M>,
    env: Arc<Env>,
    token: CancellationToken,
    delay: Duration,
) -> BoxStream<'static, A>
where
    A: Send + 'static,
    Env: Send + Sync + 'static,
    Op: Fn(Arc<Env>) -> St + Send + Sync + 'static,
    St: Stream<Item = Result<T, E>> + Send + 'static,
    M: Fn(Result<T, E>) -> A + Send + Sync + 'static,
    T: Send + 'static,
    E: Send + 'static,
{
    let state = Retry {
        op,
        map,
        env,
        token,
        delay,
        attempt: 0,
        phase: Phase::Start,
    };

    stream::unfold(state, |mut st| async move {
        loop {
            match std::mem::replace(&mut st.phase, Phase::Start) {
                Phase::Start => {
                    if st.token.is_cancelled() {
                        return None;
                    }
                    st.attempt += 1;
                    st.phase = Phase::Running((st.op)(Arc::clone(&st.env)).boxed());
                }
                Phase::Running(mut attempt) => match attempt.next().await {
                    Some(Ok(value)) => {
                        st.phase = Phase::Running(attempt);
                        let action = (st.map)(Ok(value));
                        return Some((action, st));
                    }
                    Some(Err(err)) => {
                        // Emit the failure before the delay starts
                        tracing::debug!(
                            attempt = st.attempt,
                            delay_ms = st.delay.as_millis() as u64,
                            "Subscription attempt failed, retrying"
                        );
                        st.phase = Phase::Waiting;
                        let action = (st.map)(Err(err));
                        return Some((action, st));
                    }
                    None => return None,
                },
                Phase::Waiting => {
                    tokio::select! {
                        biased;
                        _ = st.token.cancelled() => return None,
                        _ = tokio::time::sleep(st.delay) => {}
                    }
                    if st.token.is_cancelled() {
                        return None;
                    }
                    st.phase = Phase::Start;
                }
            }
        }
    })
    .boxed()
}

impl<A, Env, K> Subscription<A, Env, K>
where
    A: Send + 'static,
    Env: Send + Sync + 'static,
    K: SubscriptionKey,
{
    /// A subscription over a fallible stream that restarts after failures.
    ///
    /// Every item is handed to `map`: successes as they arrive, a failure once
    /// (after which the current attempt is abandoned). After a failure the
    /// subscription waits `config.delay` and calls `op` again. If an attempt's
    /// stream ends without failing, the subscription ends.
    ///
    /// # Example
    ///
    /// ```ignore
    /// Subscription::retrying(
    ///     SubKey::with_input("prices", &state.symbol),
    ///     RetryConfig::with_delay(Duration::from_secs(5)),
    ///     move |env: Arc<Env>| env.market.ticks(symbol.clone()),
    ///     Action::DidReceiveTick, // fn(Result<Tick, MarketError>) -> Action
    /// )
    /// ```
    pub fn retrying<Op, St, T, E, M>(key: impl Into<K>, config: RetryConfig, op: Op, map: M) -> Self
    where
        Op: Fn(Arc<Env>) -> St + Send + Sync + 'static,
        St: Stream<Item = Result<T, E>> + Send + 'static,
        M: Fn(Result<T, E>) -> A + Send + Sync + 'static,
        T: Send + 'static,
        E: Send + 'static,
    {
        let op = Arc::new(op);
        let map = Arc::new(map);
        Self::new(key, move |env, token| {
            retry_stream(Arc::clone(&op), Arc::clone(&map), env, token, config.delay)
        })
    }

    /// Like [`retrying`](Self::retrying) for an operation producing a single
    /// result.
    pub fn retrying_future<Op, Fut, T, E, M>(
        key: impl Into<K>,
        config: RetryConfig,
        op: Op,
        map: M,
    ) -> Self
    where
        Op: Fn(Arc<Env>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        M: Fn(Result<T, E>) -> A + Send + Sync + 'static,
        T: Send + 'static,
        E: Send + 'static,
    {
        Self::retrying(key, config, move |env| stream::once(op(env)), map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::time::Instant;

    #[derive(Clone, Debug, PartialEq)]
    enum TestAction {
        Loaded(usize),
        Failed(String),
    }

    fn to_action(r: Result<usize, String>) -> TestAction {
        match r {
            Ok(n) => TestAction::Loaded(n),
            Err(e) => TestAction::Failed(e),
        }
    }

    struct Env;

    const DELAY: Duration = Duration::from_millis(500);

    /// Fails `failures` times, then succeeds with the attempt number.
    fn flaky(failures: usize) -> (Subscription<TestAction, Env>, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let sub = Subscription::retrying_future(
            "flaky",
            RetryConfig::with_delay(DELAY),
            move |_: Arc<Env>| {
                let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                async move {
                    if n <= failures {
                        Err(format!("attempt {n}"))
                    } else {
                        Ok(n)
                    }
                }
            },
            to_action,
        );
        (sub, calls)
    }

    #[test]
    fn test_retry_config_default() {
        assert_eq!(RetryConfig::default().delay, Duration::from_secs(1));
        assert_eq!(RetryConfig::with_delay(DELAY).delay, DELAY);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fails_three_times_then_succeeds() {
        let (sub, calls) = flaky(3);
        let start = Instant::now();
        let mut stream = sub.start(Arc::new(Env), CancellationToken::new());

        let mut seen = Vec::new();
        while let Some(action) = stream.next().await {
            seen.push((action, start.elapsed()));
        }

        assert_eq!(
            seen.iter().map(|(a, _)| a.clone()).collect::<Vec<_>>(),
            vec![
                TestAction::Failed("attempt 1".into()),
                TestAction::Failed("attempt 2".into()),
                TestAction::Failed("attempt 3".into()),
                TestAction::Loaded(4),
            ]
        );
        // Each failure is followed by exactly one delay
        let slack = Duration::from_millis(5);
        for (i, (_, at)) in seen.iter().enumerate() {
            let expected = DELAY * i as u32;
            assert!(
                *at >= expected && *at < expected + slack,
                "action {i} at {at:?}, expected {expected:?}"
            );
        }
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_delay_emits_nothing_more() {
        let (sub, calls) = flaky(3);
        let token = CancellationToken::new();
        let mut stream = sub.start(Arc::new(Env), token.clone());

        assert_eq!(
            stream.next().await,
            Some(TestAction::Failed("attempt 1".into()))
        );
        assert_eq!(
            stream.next().await,
            Some(TestAction::Failed("attempt 2".into()))
        );

        // Now inside the second delay window
        tokio::time::advance(DELAY / 2).await;
        token.cancel();

        assert_eq!(stream.next().await, None);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_before_deferred_attempt_is_observed() {
        let (sub, calls) = flaky(5);
        let token = CancellationToken::new();
        let mut stream = sub.start(Arc::new(Env), token.clone());

        assert!(stream.next().await.is_some());
        // Cancelled while the delay is still pending: the next poll must not re-invoke
        token.cancel();
        tokio::time::advance(DELAY * 2).await;

        assert_eq!(stream.next().await, None);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_successes_pass_through_until_failure() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let sub: Subscription<TestAction, Env> = Subscription::retrying(
            "feed",
            RetryConfig::with_delay(DELAY),
            move |_: Arc<Env>| {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                if n == 0 {
                    stream::iter(vec![Ok(1), Ok(2), Err("dropped".to_string())]).boxed()
                } else {
                    stream::iter(vec![Ok(10)]).boxed()
                }
            },
            to_action,
        );

        let actions: Vec<_> = sub
            .start(Arc::new(Env), CancellationToken::new())
            .collect()
            .await;

        assert_eq!(
            actions,
            vec![
                TestAction::Loaded(1),
                TestAction::Loaded(2),
                TestAction::Failed("dropped".into()),
                TestAction::Loaded(10),
            ]
        );
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
