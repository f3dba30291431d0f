//! Loader fallback engine.
//!
//! Strategies are tried strictly in order until one yields a decoder. The
//! outcome is settled once for the life of the engine: a success is reused by
//! every later caller, and exhaustion is final. Callers that arrive while
//! negotiation is running wait for the same outcome instead of starting their
//! own.
//!
//! Negotiation runs on its own task, so a caller that gives up waiting does
//! not leave the engine stuck in `Trying`. A strategy that panics counts as a
//! failed strategy.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::oneshot;

use super::decode::{minimal_glb, ContainerDecoder, DecodeError, FullGltfDecoder, LenientGltfDecoder};
use super::scene::LoadedModel;

/// Turns model bytes into scene-ready geometry
pub trait ModelDecoder: Send + Sync {
    fn name(&self) -> &'static str;
    fn decode(&self, bytes: &[u8]) -> Result<LoadedModel, DecodeError>;
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct StrategyError(pub String);

/// One way of obtaining a decoder
#[async_trait]
pub trait LoaderStrategy: Send + Sync {
    fn name(&self) -> &'static str;
    async fn obtain(&self) -> Result<Arc<dyn ModelDecoder>, StrategyError>;
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LoaderError {
    #[error("loader strategy '{strategy}' failed: {reason}")]
    StrategyFailed { strategy: String, reason: String },

    #[error("all {tried} loader strategies failed")]
    Exhausted { tried: usize },

    #[error("loader negotiation aborted")]
    Aborted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoaderState {
    Idle,
    /// Index of the strategy being attempted
    Trying(usize),
    Ready,
    Exhausted,
}

type Outcome = Result<Arc<dyn ModelDecoder>, LoaderError>;

struct Inner {
    state: LoaderState,
    decoder: Option<Arc<dyn ModelDecoder>>,
    waiters: Vec<oneshot::Sender<Outcome>>,
    attempts: Vec<LoaderError>,
}

pub struct LoaderEngine {
    strategies: Arc<Vec<Arc<dyn LoaderStrategy>>>,
    inner: Arc<Mutex<Inner>>,
}

impl LoaderEngine {
    pub fn new(strategies: Vec<Arc<dyn LoaderStrategy>>) -> Self {
        Self {
            strategies: Arc::new(strategies),
            inner: Arc::new(Mutex::new(Inner {
                state: LoaderState::Idle,
                decoder: None,
                waiters: Vec::new(),
                attempts: Vec::new(),
            })),
        }
    }

    pub fn with_default_strategies() -> Self {
        Self::new(default_strategies())
    }

    pub fn state(&self) -> LoaderState {
        self.inner.lock().state
    }

    /// Failures recorded so far, one per strategy that did not work
    pub fn attempts(&self) -> Vec<LoaderError> {
        self.inner.lock().attempts.clone()
    }

    /// Get the negotiated decoder, negotiating on first use
    pub async fn get_loader(&self) -> Result<Arc<dyn ModelDecoder>, LoaderError> {
        let rx = {
            let mut inner = self.inner.lock();
            match inner.state {
                LoaderState::Ready => {
                    if let Some(decoder) = &inner.decoder {
                        return Ok(decoder.clone());
                    }
                }
                LoaderState::Exhausted => {
                    return Err(LoaderError::Exhausted {
                        tried: inner.attempts.len(),
                    });
                }
                LoaderState::Trying(_) => {}
                LoaderState::Idle => {
                    inner.state = LoaderState::Trying(0);
                    tokio::spawn(negotiate(self.strategies.clone(), self.inner.clone()));
                }
            }

            let (tx, rx) = oneshot::channel();
            inner.waiters.push(tx);
            rx
        };

        rx.await.map_err(|_| LoaderError::Aborted)?
    }
}

async fn negotiate(strategies: Arc<Vec<Arc<dyn LoaderStrategy>>>, inner: Arc<Mutex<Inner>>) {
    for (index, strategy) in strategies.iter().enumerate() {
        inner.lock().state = LoaderState::Trying(index);
        tracing::debug!("Trying loader strategy {} ({})", index, strategy.name());

        let obtained = AssertUnwindSafe(strategy.obtain())
            .catch_unwind()
            .await
            .unwrap_or_else(|_| Err(StrategyError("strategy panicked".to_string())));

        match obtained {
            Ok(decoder) => {
                tracing::info!(
                    "Loader ready via '{}' (decoder '{}')",
                    strategy.name(),
                    decoder.name()
                );
                settle(&inner, LoaderState::Ready, Ok(decoder));
                return;
            }
            Err(e) => {
                tracing::warn!("Loader strategy '{}' failed: {}", strategy.name(), e);
                inner.lock().attempts.push(LoaderError::StrategyFailed {
                    strategy: strategy.name().to_string(),
                    reason: e.0,
                });
            }
        }
    }

    tracing::error!("All {} loader strategies failed", strategies.len());
    settle(
        &inner,
        LoaderState::Exhausted,
        Err(LoaderError::Exhausted {
            tried: strategies.len(),
        }),
    );
}

fn settle(inner: &Mutex<Inner>, state: LoaderState, outcome: Outcome) {
    let waiters = {
        let mut inner = inner.lock();
        inner.state = state;
        inner.decoder = outcome.as_ref().ok().cloned();
        std::mem::take(&mut inner.waiters)
    };
    for waiter in waiters {
        // Receiver gone means that caller stopped waiting
        let _ = waiter.send(outcome.clone());
    }
}

/// Validating glTF decoder, checked against a built-in model first
pub struct FullGltfStrategy;

#[async_trait]
impl LoaderStrategy for FullGltfStrategy {
    fn name(&self) -> &'static str {
        "full-gltf"
    }

    async fn obtain(&self) -> Result<Arc<dyn ModelDecoder>, StrategyError> {
        let decoder = FullGltfDecoder;
        let self_test = tokio::task::spawn_blocking(move || {
            FullGltfDecoder.decode(&minimal_glb()).map(|_| ())
        })
        .await
        .map_err(|e| StrategyError(format!("self-test panicked: {}", e)))?;
        self_test.map_err(|e| StrategyError(format!("self-test failed: {}", e)))?;
        Ok(Arc::new(decoder))
    }
}

pub struct LenientGltfStrategy;

#[async_trait]
impl LoaderStrategy for LenientGltfStrategy {
    fn name(&self) -> &'static str {
        "lenient-gltf"
    }

    async fn obtain(&self) -> Result<Arc<dyn ModelDecoder>, StrategyError> {
        Ok(Arc::new(LenientGltfDecoder))
    }
}

/// Bundled container reader; needs nothing beyond JSON parsing
pub struct ContainerStrategy;

#[async_trait]
impl LoaderStrategy for ContainerStrategy {
    fn name(&self) -> &'static str {
        "glb-container"
    }

    async fn obtain(&self) -> Result<Arc<dyn ModelDecoder>, StrategyError> {
        Ok(Arc::new(ContainerDecoder))
    }
}

pub fn default_strategies() -> Vec<Arc<dyn LoaderStrategy>> {
    vec![
        Arc::new(FullGltfStrategy),
        Arc::new(LenientGltfStrategy),
        Arc::new(ContainerStrategy),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::Notify;

    struct Failing {
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl LoaderStrategy for Failing {
        fn name(&self) -> &'static str {
            "failing"
        }

        async fn obtain(&self) -> Result<Arc<dyn ModelDecoder>, StrategyError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(StrategyError("module not found".into()))
        }
    }

    /// Succeeds once released
    struct Gated {
        calls: Arc<AtomicUsize>,
        gate: Arc<Notify>,
    }

    #[async_trait]
    impl LoaderStrategy for Gated {
        fn name(&self) -> &'static str {
            "gated"
        }

        async fn obtain(&self) -> Result<Arc<dyn ModelDecoder>, StrategyError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.gate.notified().await;
            Ok(Arc::new(ContainerDecoder))
        }
    }

    struct Panicking;

    #[async_trait]
    impl LoaderStrategy for Panicking {
        fn name(&self) -> &'static str {
            "panicking"
        }

        async fn obtain(&self) -> Result<Arc<dyn ModelDecoder>, StrategyError> {
            panic!("decoder backend crashed");
        }
    }

    fn failing(calls: &Arc<AtomicUsize>) -> Arc<dyn LoaderStrategy> {
        Arc::new(Failing {
            calls: calls.clone(),
        })
    }

    #[tokio::test]
    async fn test_default_strategies_settle_on_first() {
        let engine = LoaderEngine::with_default_strategies();
        assert_eq!(engine.state(), LoaderState::Idle);

        let decoder = engine.get_loader().await.unwrap();
        assert_eq!(decoder.name(), "gltf-full");
        assert_eq!(engine.state(), LoaderState::Ready);
        assert!(engine.attempts().is_empty());
    }

    #[tokio::test]
    async fn test_falls_back_in_order() {
        let calls = Arc::new(AtomicUsize::new(0));
        let engine = LoaderEngine::new(vec![
            failing(&calls),
            failing(&calls),
            Arc::new(ContainerStrategy),
        ]);

        let decoder = engine.get_loader().await.unwrap();
        assert_eq!(decoder.name(), "glb-container");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(engine.attempts().len(), 2);
        assert!(matches!(
            &engine.attempts()[0],
            LoaderError::StrategyFailed { strategy, .. } if strategy == "failing"
        ));

        // Memoized: no renegotiation
        engine.get_loader().await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_exhaustion_is_terminal() {
        let calls = Arc::new(AtomicUsize::new(0));
        let engine = LoaderEngine::new(vec![failing(&calls), failing(&calls)]);

        let err = engine.get_loader().await.err().unwrap();
        assert_eq!(err, LoaderError::Exhausted { tried: 2 });
        assert_eq!(engine.state(), LoaderState::Exhausted);

        let err = engine.get_loader().await.err().unwrap();
        assert_eq!(err, LoaderError::Exhausted { tried: 2 });
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_negotiation() {
        let calls = Arc::new(AtomicUsize::new(0));
        let gate = Arc::new(Notify::new());
        let engine = Arc::new(LoaderEngine::new(vec![Arc::new(Gated {
            calls: calls.clone(),
            gate: gate.clone(),
        })]));

        let mut handles = Vec::new();
        for _ in 0..5 {
            let engine = engine.clone();
            handles.push(tokio::spawn(async move { engine.get_loader().await.map(|d| d.name()) }));
        }

        while calls.load(Ordering::SeqCst) == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(engine.state(), LoaderState::Trying(0));
        gate.notify_one();

        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap(), "glb-container");
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_dropped_caller_does_not_stall_negotiation() {
        let calls = Arc::new(AtomicUsize::new(0));
        let gate = Arc::new(Notify::new());
        let engine = Arc::new(LoaderEngine::new(vec![Arc::new(Gated {
            calls: calls.clone(),
            gate: gate.clone(),
        })]));

        // First caller gives up before the strategy finishes
        let first = tokio::time::timeout(Duration::from_millis(20), engine.get_loader()).await;
        assert!(first.is_err());

        gate.notify_one();
        assert!(engine.get_loader().await.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_panicking_strategy_falls_through() {
        let engine = LoaderEngine::new(vec![Arc::new(Panicking), Arc::new(ContainerStrategy)]);

        let decoder = tokio::time::timeout(Duration::from_secs(5), engine.get_loader())
            .await
            .expect("negotiation hung")
            .unwrap();
        assert_eq!(decoder.name(), "glb-container");
        assert_eq!(engine.state(), LoaderState::Ready);
        assert!(matches!(
            &engine.attempts()[0],
            LoaderError::StrategyFailed { strategy, reason } if strategy == "panicking" && reason == "strategy panicked"
        ));
    }

    #[tokio::test]
    async fn test_only_panicking_strategy_exhausts() {
        let engine = LoaderEngine::new(vec![Arc::new(Panicking)]);

        let first = tokio::time::timeout(Duration::from_secs(5), engine.get_loader())
            .await
            .expect("negotiation hung");
        assert_eq!(first.err(), Some(LoaderError::Exhausted { tried: 1 }));
        assert_eq!(engine.state(), LoaderState::Exhausted);

        let second = tokio::time::timeout(Duration::from_secs(5), engine.get_loader())
            .await
            .expect("second caller hung");
        assert_eq!(second.err(), Some(LoaderError::Exhausted { tried: 1 }));
    }
}
