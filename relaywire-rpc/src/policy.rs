//! Pre-send and pre-handler policy hooks.
//!
//! Policies are collaborators supplied by the application. A [`Policy`]
//! bundles them and applies them in a fixed order: rate limit, circuit
//! breaker, then the middleware chain.

use crate::error::RpcError;
use parking_lot::Mutex;
use relaywire_codec::Value;
use relaywire_transport::PeerId;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Interceptor run before delivery.
pub trait Middleware: Send + Sync {
    /// Returns the (possibly rewritten) data, `Ok(None)` to block delivery,
    /// or `Err` when the interceptor itself failed.
    fn process(
        &self,
        event: &str,
        peer: Option<&PeerId>,
        data: Value,
    ) -> Result<Option<Value>, String>;
}

impl<F> Middleware for F
where
    F: Fn(&str, Option<&PeerId>, Value) -> Result<Option<Value>, String> + Send + Sync,
{
    fn process(
        &self,
        event: &str,
        peer: Option<&PeerId>,
        data: Value,
    ) -> Result<Option<Value>, String> {
        self(event, peer, data)
    }
}

pub trait RateLimiter: Send + Sync {
    /// Takes one permit for `peer`, returning false when none is left.
    fn try_acquire(&self, peer: Option<&PeerId>) -> bool;
}

pub trait CircuitBreaker: Send + Sync {
    fn is_allowed(&self) -> bool;

    fn record_success(&self);

    fn record_failure(&self);

    /// Result returned instead of a rejection while the circuit is open.
    fn fallback(&self, _peer: Option<&PeerId>, _data: &Value) -> Option<Value> {
        None
    }
}

/// Checks a value against a declared contract.
pub trait ShapeValidator: Send + Sync {
    fn validate(&self, value: &Value) -> Result<(), String>;
}

impl<F> ShapeValidator for F
where
    F: Fn(&Value) -> Result<(), String> + Send + Sync,
{
    fn validate(&self, value: &Value) -> Result<(), String> {
        self(value)
    }
}

/// Outcome of the admission checks.
#[derive(Debug, Clone, PartialEq)]
pub enum Admission {
    /// Continue with this data.
    Proceed(Value),
    /// The circuit is open; answer with this value without any exchange.
    Fallback(Value),
}

/// Set of policy collaborators applied to a call or a served request.
#[derive(Clone, Default)]
pub struct Policy {
    middleware: Vec<Arc<dyn Middleware>>,
    rate_limiter: Option<Arc<dyn RateLimiter>>,
    circuit_breaker: Option<Arc<dyn CircuitBreaker>>,
    request_shape: Option<Arc<dyn ShapeValidator>>,
    response_shape: Option<Arc<dyn ShapeValidator>>,
}

impl Policy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a middleware; middleware runs in insertion order.
    pub fn with_middleware(mut self, middleware: impl Middleware + 'static) -> Self {
        self.middleware.push(Arc::new(middleware));
        self
    }

    pub fn with_rate_limiter(mut self, limiter: Arc<dyn RateLimiter>) -> Self {
        self.rate_limiter = Some(limiter);
        self
    }

    pub fn with_circuit_breaker(mut self, breaker: Arc<dyn CircuitBreaker>) -> Self {
        self.circuit_breaker = Some(breaker);
        self
    }

    pub fn with_request_shape(mut self, validator: impl ShapeValidator + 'static) -> Self {
        self.request_shape = Some(Arc::new(validator));
        self
    }

    pub fn with_response_shape(mut self, validator: impl ShapeValidator + 'static) -> Self {
        self.response_shape = Some(Arc::new(validator));
        self
    }

    pub fn circuit_breaker(&self) -> Option<&Arc<dyn CircuitBreaker>> {
        self.circuit_breaker.as_ref()
    }

    /// Runs rate limit, circuit and middleware checks.
    pub fn admit(
        &self,
        event: &str,
        peer: Option<&PeerId>,
        data: Value,
    ) -> Result<Admission, RpcError> {
        if let Some(limiter) = &self.rate_limiter {
            if !limiter.try_acquire(peer) {
                tracing::debug!("rate limited '{}'", event);
                return Err(RpcError::RateLimited);
            }
        }

        if let Some(breaker) = &self.circuit_breaker {
            if !breaker.is_allowed() {
                tracing::debug!("circuit open for '{}'", event);
                return match breaker.fallback(peer, &data) {
                    Some(value) => Ok(Admission::Fallback(value)),
                    None => Err(RpcError::CircuitOpen),
                };
            }
        }

        let mut data = data;
        for middleware in &self.middleware {
            data = match middleware.process(event, peer, data) {
                Ok(Some(next)) => next,
                Ok(None) => {
                    return Err(RpcError::Middleware(format!(
                        "'{}' blocked by middleware",
                        event
                    )))
                }
                Err(e) => return Err(RpcError::Middleware(e)),
            };
        }

        Ok(Admission::Proceed(data))
    }

    pub fn validate_request(&self, value: &Value) -> Result<(), RpcError> {
        validate_with(self.request_shape.as_deref(), "request", value)
    }

    pub fn validate_response(&self, value: &Value) -> Result<(), RpcError> {
        validate_with(self.response_shape.as_deref(), "response", value)
    }

    pub(crate) fn record_success(&self) {
        if let Some(breaker) = &self.circuit_breaker {
            breaker.record_success();
        }
    }

    pub(crate) fn record_failure(&self) {
        if let Some(breaker) = &self.circuit_breaker {
            breaker.record_failure();
        }
    }
}

fn validate_with(
    validator: Option<&dyn ShapeValidator>,
    what: &str,
    value: &Value,
) -> Result<(), RpcError> {
    match validator {
        Some(v) => v
            .validate(value)
            .map_err(|e| RpcError::Validation(format!("{}: {}", what, e))),
        None => Ok(()),
    }
}

/// Circuit breaker that opens after consecutive failures.
///
/// Once open, calls are refused until `cooldown` has elapsed. Exactly one
/// call is then let through, and its outcome closes or reopens the circuit.
/// If that call never reports back, another one is admitted after a further
/// `cooldown`.
pub struct ThresholdBreaker {
    failure_threshold: u32,
    cooldown: Duration,
    state: Mutex<BreakerState>,
}

#[derive(Default)]
struct BreakerState {
    failures: u32,
    opened_at: Option<Instant>,
    /// Start of the single call admitted while half-open.
    trial_started: Option<Instant>,
}

impl ThresholdBreaker {
    pub fn new(failure_threshold: u32, cooldown: Duration) -> Self {
        Self {
            failure_threshold: failure_threshold.max(1),
            cooldown,
            state: Mutex::new(BreakerState::default()),
        }
    }

    pub fn is_open(&self) -> bool {
        self.state.lock().opened_at.is_some()
    }
}

impl CircuitBreaker for ThresholdBreaker {
    fn is_allowed(&self) -> bool {
        let mut state = self.state.lock();
        let Some(opened) = state.opened_at else {
            return true;
        };
        if opened.elapsed() < self.cooldown {
            return false;
        }
        match state.trial_started {
            Some(started) if started.elapsed() < self.cooldown => false,
            _ => {
                tracing::debug!("circuit half-open, admitting one call");
                state.trial_started = Some(Instant::now());
                true
            }
        }
    }

    fn record_success(&self) {
        let mut state = self.state.lock();
        if state.opened_at.is_some() {
            tracing::info!("circuit closed");
        }
        *state = BreakerState::default();
    }

    fn record_failure(&self) {
        let mut state = self.state.lock();
        state.failures = state.failures.saturating_add(1);
        if state.failures >= self.failure_threshold {
            if state.opened_at.is_none() {
                tracing::warn!("circuit opened after {} failures", state.failures);
            }
            state.opened_at = Some(Instant::now());
            state.trial_started = None;
        }
    }
}

/// Token bucket rate limiter keyed by peer.
///
/// Peers whose buckets have refilled to capacity are indistinguishable from
/// unseen peers and are dropped by a periodic sweep.
pub struct TokenBucket {
    capacity: f64,
    refill_per_sec: f64,
    /// Time an empty bucket takes to refill; `None` when it never does.
    sweep_interval: Option<Duration>,
    state: Mutex<BucketState>,
}

struct BucketState {
    buckets: HashMap<Option<PeerId>, Bucket>,
    swept_at: Instant,
}

struct Bucket {
    tokens: f64,
    refilled_at: Instant,
}

impl Bucket {
    fn level(&self, now: Instant, refill_per_sec: f64, capacity: f64) -> f64 {
        let elapsed = now.duration_since(self.refilled_at).as_secs_f64();
        (self.tokens + elapsed * refill_per_sec).min(capacity)
    }
}

impl TokenBucket {
    pub fn new(capacity: u32, refill_per_sec: f64) -> Self {
        let capacity = f64::from(capacity);
        let sweep_interval = if refill_per_sec > 0.0 {
            Duration::try_from_secs_f64(capacity / refill_per_sec).ok()
        } else {
            None
        };
        Self {
            capacity,
            refill_per_sec,
            sweep_interval,
            state: Mutex::new(BucketState {
                buckets: HashMap::new(),
                swept_at: Instant::now(),
            }),
        }
    }

    /// Returns the number of peers with a bucket below capacity.
    pub fn tracked_peers(&self) -> usize {
        self.state.lock().buckets.len()
    }

    fn sweep(&self, state: &mut BucketState, now: Instant) {
        let Some(interval) = self.sweep_interval else {
            return;
        };
        if now.duration_since(state.swept_at) < interval {
            return;
        }
        state.swept_at = now;
        let before = state.buckets.len();
        state
            .buckets
            .retain(|_, b| b.level(now, self.refill_per_sec, self.capacity) < self.capacity);
        let evicted = before - state.buckets.len();
        if evicted > 0 {
            tracing::debug!("rate limiter evicted {} idle peer(s)", evicted);
        }
    }
}

impl RateLimiter for TokenBucket {
    fn try_acquire(&self, peer: Option<&PeerId>) -> bool {
        let now = Instant::now();
        let mut state = self.state.lock();
        self.sweep(&mut state, now);

        let bucket = state.buckets.entry(peer.copied()).or_insert(Bucket {
            tokens: self.capacity,
            refilled_at: now,
        });
        bucket.tokens = bucket.level(now, self.refill_per_sec, self.capacity);
        bucket.refilled_at = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_policy_proceeds() {
        let policy = Policy::new();
        let admitted = policy.admit("ping", None, Value::Int(1)).unwrap();
        assert_eq!(admitted, Admission::Proceed(Value::Int(1)));
    }

    #[test]
    fn test_middleware_chain() {
        let policy = Policy::new()
            .with_middleware(|_: &str, _: Option<&PeerId>, data: Value| {
                Ok::<_, String>(Some(Value::Int(data.as_int().unwrap_or(0) + 1)))
            })
            .with_middleware(|_: &str, _: Option<&PeerId>, data: Value| {
                Ok::<_, String>(Some(Value::Int(data.as_int().unwrap_or(0) * 10)))
            });

        let admitted = policy.admit("count", None, Value::Int(1)).unwrap();
        assert_eq!(admitted, Admission::Proceed(Value::Int(20)));
    }

    #[test]
    fn test_middleware_block_and_error() {
        let policy = Policy::new().with_middleware(
            |event: &str, _: Option<&PeerId>, data: Value| match event {
                "blocked" => Ok(None),
                "broken" => Err("interceptor failed".to_string()),
                _ => Ok(Some(data)),
            },
        );

        let err = policy.admit("blocked", None, Value::Nil).unwrap_err();
        assert!(matches!(err, RpcError::Middleware(_)));

        let err = policy.admit("broken", None, Value::Nil).unwrap_err();
        assert_eq!(err.to_string(), "blocked by middleware: interceptor failed");

        assert!(policy.admit("fine", None, Value::Nil).is_ok());
    }

    struct Deny;

    impl RateLimiter for Deny {
        fn try_acquire(&self, _peer: Option<&PeerId>) -> bool {
            false
        }
    }

    struct Open {
        fallback: Option<Value>,
    }

    impl CircuitBreaker for Open {
        fn is_allowed(&self) -> bool {
            false
        }
        fn record_success(&self) {}
        fn record_failure(&self) {}
        fn fallback(&self, _peer: Option<&PeerId>, _data: &Value) -> Option<Value> {
            self.fallback.clone()
        }
    }

    #[test]
    fn test_rate_limit_checked_first() {
        let policy = Policy::new()
            .with_rate_limiter(Arc::new(Deny))
            .with_circuit_breaker(Arc::new(Open { fallback: None }));
        let err = policy.admit("x", None, Value::Nil).unwrap_err();
        assert!(matches!(err, RpcError::RateLimited));
    }

    #[test]
    fn test_open_circuit() {
        let policy = Policy::new().with_circuit_breaker(Arc::new(Open { fallback: None }));
        let err = policy.admit("x", None, Value::Nil).unwrap_err();
        assert!(matches!(err, RpcError::CircuitOpen));

        let policy = Policy::new().with_circuit_breaker(Arc::new(Open {
            fallback: Some(Value::from("cached")),
        }));
        let admitted = policy.admit("x", None, Value::Nil).unwrap();
        assert_eq!(admitted, Admission::Fallback(Value::from("cached")));
    }

    #[test]
    fn test_shape_validation() {
        let policy = Policy::new().with_request_shape(|v: &Value| {
            if v.as_table().and_then(|t| t.get_str("name")).is_some() {
                Ok(())
            } else {
                Err("missing name".to_string())
            }
        });

        let ok = Value::map(vec![("name", Value::from("ada"))]);
        assert!(policy.validate_request(&ok).is_ok());

        let err = policy.validate_request(&Value::Int(1)).unwrap_err();
        assert!(matches!(err, RpcError::Validation(ref m) if m == "request: missing name"));

        // No response contract declared.
        assert!(policy.validate_response(&Value::Int(1)).is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_threshold_breaker() {
        let breaker = ThresholdBreaker::new(2, Duration::from_secs(5));
        assert!(breaker.is_allowed());

        breaker.record_failure();
        assert!(breaker.is_allowed());
        breaker.record_failure();
        assert!(breaker.is_open());
        assert!(!breaker.is_allowed());

        tokio::time::advance(Duration::from_secs(5)).await;
        assert!(breaker.is_allowed());

        breaker.record_success();
        assert!(!breaker.is_open());
        assert!(breaker.is_allowed());
        assert!(breaker.is_allowed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_admits_one_call() {
        let breaker = ThresholdBreaker::new(1, Duration::from_secs(5));
        breaker.record_failure();
        tokio::time::advance(Duration::from_secs(5)).await;

        assert!(breaker.is_allowed());
        assert!(!breaker.is_allowed());
        assert!(!breaker.is_allowed());

        // the admitted call failed: the full cooldown starts over
        breaker.record_failure();
        assert!(!breaker.is_allowed());
        tokio::time::advance(Duration::from_secs(4)).await;
        assert!(!breaker.is_allowed());
        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(breaker.is_allowed());
        assert!(!breaker.is_allowed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unreported_trial_call_expires() {
        let breaker = ThresholdBreaker::new(1, Duration::from_secs(5));
        breaker.record_failure();
        tokio::time::advance(Duration::from_secs(5)).await;
        assert!(breaker.is_allowed());

        tokio::time::advance(Duration::from_secs(4)).await;
        assert!(!breaker.is_allowed());
        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(breaker.is_allowed());
        assert!(breaker.is_open());
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_through_policy() {
        let breaker = Arc::new(ThresholdBreaker::new(1, Duration::from_secs(1)));
        let policy = Policy::new().with_circuit_breaker(breaker.clone());
        policy.record_failure();
        tokio::time::advance(Duration::from_secs(1)).await;

        assert!(policy.admit("x", None, Value::Nil).is_ok());
        let err = policy.admit("x", None, Value::Nil).unwrap_err();
        assert!(matches!(err, RpcError::CircuitOpen));

        policy.record_success();
        assert!(!breaker.is_open());
        assert!(policy.admit("x", None, Value::Nil).is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_token_bucket() {
        let limiter = TokenBucket::new(2, 1.0);
        let peer = PeerId(9);

        assert!(limiter.try_acquire(Some(&peer)));
        assert!(limiter.try_acquire(Some(&peer)));
        assert!(!limiter.try_acquire(Some(&peer)));

        // Buckets are per peer.
        assert!(limiter.try_acquire(None));

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(limiter.try_acquire(Some(&peer)));
        assert!(!limiter.try_acquire(Some(&peer)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_token_bucket_evicts_idle_peers() {
        let limiter = TokenBucket::new(3, 1.0);
        for id in 0..100 {
            assert!(limiter.try_acquire(Some(&PeerId(id))));
        }
        assert_eq!(limiter.tracked_peers(), 100);

        tokio::time::advance(Duration::from_secs(2)).await;
        let busy = PeerId(500);
        for _ in 0..3 {
            assert!(limiter.try_acquire(Some(&busy)));
        }
        assert!(!limiter.try_acquire(Some(&busy)));

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(limiter.try_acquire(Some(&PeerId(600))));
        // refilled peers are gone; the drained one keeps its state
        assert_eq!(limiter.tracked_peers(), 2);
        assert!(limiter.try_acquire(Some(&busy)));
        assert!(!limiter.try_acquire(Some(&busy)));
    }

    #[test]
    fn test_token_bucket_without_refill_keeps_peers() {
        let limiter = TokenBucket::new(1, 0.0);
        assert!(limiter.try_acquire(None));
        assert!(!limiter.try_acquire(None));
        assert_eq!(limiter.tracked_peers(), 1);
    }
}
