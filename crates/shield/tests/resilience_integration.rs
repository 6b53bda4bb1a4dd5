//! Integration tests for resilience module
//!
//! Tests retry, fallback, the breaker registry and the circuit orchestrator
//! together through the public API, including recovery timing and
//! concurrent use of one registry.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use shield::error::{ErrorKind, FallbackError, OperationError, ResilienceError};
use shield::resilience::{
    BackoffStrategy, Circuit, CircuitBreakerConfig, CircuitBreakerRegistry, CircuitState,
    FallbackPolicy, RetryPolicy,
};
use shield::time::MockClock;

fn transient(message: &str) -> OperationError {
    OperationError::transient(message)
}

/// Install a test subscriber once so `tracing` output shows up with
/// `--nocapture`.
fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().with_env_filter("shield=debug").try_init();
}

// ============================================================================
// Retry
// ============================================================================

/// Validates retry with fixed backoff recovers after two transient failures.
///
/// # Test Steps
/// 1. Configure 5 attempts with a fixed 50 ms delay
/// 2. Fail the first two invocations
/// 3. Verify exactly three invocations and at least 100 ms of waiting
#[test]
fn test_retry_fixed_backoff_recovers() {
    init_tracing();
    let calls = AtomicU32::new(0);
    let policy = RetryPolicy::new()
        .with_max_attempts(5)
        .with_fixed_backoff(Duration::from_millis(50));

    let started = Instant::now();
    let result = policy.run(|| {
        if calls.fetch_add(1, Ordering::SeqCst) < 2 {
            Err(transient("flaky"))
        } else {
            Ok("done")
        }
    });

    assert_eq!(result.expect("should recover"), "done");
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert!(started.elapsed() >= Duration::from_millis(100));
}

/// Validates exhausted retries surface the last operation error untouched.
#[test]
fn test_retry_exhaustion_preserves_last_error() {
    let calls = AtomicU32::new(0);
    let policy = RetryPolicy::new().with_max_attempts(3).with_fixed_backoff(Duration::ZERO);

    let result: Result<u32, _> = policy.run(|| {
        let n = calls.fetch_add(1, Ordering::SeqCst);
        Err(transient(&format!("failure {n}")))
    });

    let error = result.expect_err("should exhaust").into_operation_error().expect("operation");
    assert_eq!(error.message(), "failure 2");
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

/// Validates kind filtering stops on an ineligible error after one attempt.
#[test]
fn test_retry_stops_on_ineligible_kind() {
    let calls = AtomicU32::new(0);
    let policy = RetryPolicy::new()
        .with_max_attempts(5)
        .with_fixed_backoff(Duration::ZERO)
        .retry_on(ErrorKind::Timeout);

    let result: Result<(), _> = policy.run(|| {
        calls.fetch_add(1, Ordering::SeqCst);
        Err(OperationError::invalid_input("bad request"))
    });

    assert!(matches!(result, Err(ResilienceError::OperationFailed { .. })));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

/// Validates the retry callback sees every scheduled retry with its delay.
#[test]
fn test_retry_callback_observes_schedule() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let policy = RetryPolicy::new()
        .with_max_attempts(4)
        .with_linear_backoff(Duration::from_millis(1), Duration::from_millis(10))
        .on_retry(move |_error: &OperationError, attempt, delay| {
            sink.lock().expect("lock").push((attempt, delay));
        });

    let _: Result<(), _> = policy.run(|| Err(transient("down")));

    let seen = seen.lock().expect("lock");
    assert_eq!(
        *seen,
        vec![
            (1, Duration::from_millis(1)),
            (2, Duration::from_millis(2)),
            (3, Duration::from_millis(3)),
        ]
    );
}

/// Validates the free `retry` helper with exponential backoff.
#[test]
fn test_retry_helper_function() {
    let calls = AtomicU32::new(0);
    let result = shield::retry(3, Duration::from_millis(1), || {
        if calls.fetch_add(1, Ordering::SeqCst) == 0 {
            Err(transient("once"))
        } else {
            Ok(7_u8)
        }
    });

    assert_eq!(result.expect("should succeed"), 7);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

// ============================================================================
// Fallback
// ============================================================================

/// Validates a value fallback replaces the error once retries are exhausted.
#[test]
fn test_retry_with_value_fallback() {
    let policy = RetryPolicy::new()
        .with_max_attempts(2)
        .with_fixed_backoff(Duration::ZERO)
        .with_fallback(FallbackPolicy::with_value(String::from("cached")));

    let result: Result<String, _> = policy.run(|| Err(transient("down")));

    assert_eq!(result.expect("fallback value"), "cached");
}

/// Validates a callable fallback is invoked lazily on every resolution.
#[test]
fn test_callable_fallback_invoked_per_failure() {
    let invocations = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&invocations);
    let fallback = FallbackPolicy::with_callable(move || counter.fetch_add(1, Ordering::SeqCst));
    let policy = RetryPolicy::new()
        .with_max_attempts(1)
        .with_fallback(fallback);

    assert_eq!(invocations.load(Ordering::SeqCst), 0);
    let first: u32 = policy.run(|| Err(transient("a"))).expect("fallback");
    let second: u32 = policy.run(|| Err(transient("b"))).expect("fallback");

    assert_eq!((first, second), (0, 1));
    assert_eq!(invocations.load(Ordering::SeqCst), 2);
}

/// Validates a Throw fallback turns an operation failure into a refusal.
#[test]
fn test_throw_fallback_refuses() {
    let registry = CircuitBreakerRegistry::new();
    let circuit = Circuit::new(&registry, "strict").with_fallback(FallbackPolicy::with_throw());

    let result: Result<i32, ResilienceError<OperationError>> =
        circuit.run(|| Err(transient("boom")));

    assert!(matches!(result, Err(ResilienceError::Fallback(FallbackError::Refused))));
}

/// Validates a default fallback with no default for the type re-raises.
#[test]
fn test_default_fallback_without_value_reraises() {
    #[derive(Debug, Clone, PartialEq)]
    #[allow(dead_code)]
    struct Quote(f64);
    impl shield::FallbackValue for Quote {}

    let policy = RetryPolicy::new()
        .with_max_attempts(1)
        .with_fallback(FallbackPolicy::with_default());

    let result: Result<Quote, _> = policy.run(|| Err(transient("no quote")));

    let error = result.expect_err("no default for Quote");
    assert_eq!(error.operation_error().map(OperationError::message), Some("no quote"));
}

// ============================================================================
// Circuit breaker lifecycle
// ============================================================================

/// Validates the full closed → open → half-open → closed cycle on a mock
/// clock.
///
/// # Test Steps
/// 1. Threshold 3, timeout 2 s
/// 2. Three failures open the breaker
/// 3. Admission is denied until more than 2 s has elapsed
/// 4. A probe is admitted (half-open) and its success closes the breaker
#[test]
fn test_breaker_recovery_cycle() {
    let clock = MockClock::new();
    let registry = CircuitBreakerRegistry::with_clock(clock.clone());
    let breaker = registry.create("inventory", 3, Duration::from_secs(2)).expect("valid");

    for _ in 0..3 {
        assert!(breaker.admit());
        breaker.record_failure();
    }
    assert_eq!(breaker.state(), CircuitState::Open);
    assert!(!breaker.admit());

    clock.advance(Duration::from_secs(2));
    assert!(!breaker.admit(), "timeout must be strictly exceeded");

    clock.advance_millis(100);
    assert!(breaker.admit());
    assert_eq!(breaker.state(), CircuitState::HalfOpen);

    breaker.record_success();
    assert_eq!(breaker.state(), CircuitState::Closed);
    assert_eq!(breaker.failure_count(), 0);
}

/// Validates a failed half-open probe reopens the breaker immediately.
#[test]
fn test_half_open_failure_reopens() {
    let clock = MockClock::new();
    let registry = CircuitBreakerRegistry::with_clock(clock.clone());
    let breaker = registry.create("search", 2, Duration::from_secs(1)).expect("valid");

    breaker.record_failure();
    breaker.record_failure();
    clock.advance_millis(1_500);
    assert!(breaker.admit());
    assert_eq!(breaker.state(), CircuitState::HalfOpen);

    breaker.record_failure();
    assert_eq!(breaker.state(), CircuitState::Open);
    assert!(!breaker.admit());
}

/// Validates recovery against the real clock.
#[test]
fn test_breaker_recovers_on_system_clock() {
    let registry = CircuitBreakerRegistry::new();
    let breaker = registry.create("realtime", 1, Duration::from_millis(100)).expect("valid");

    breaker.record_failure();
    assert!(!breaker.admit());

    thread::sleep(Duration::from_millis(150));
    assert!(breaker.admit());
    breaker.record_success();
    assert_eq!(breaker.state(), CircuitState::Closed);
}

/// Validates a circuit closes again after its real recovery timeout.
///
/// # Test Steps
/// 1. Threshold 3, timeout 2 s on the system clock
/// 2. Three failing runs open the breaker; the next run is rejected
/// 3. Sleep 2.1 s; one successful run closes the breaker
#[test]
fn test_circuit_recovers_after_timeout() {
    let registry = CircuitBreakerRegistry::new();
    registry.create("slow-recovery", 3, Duration::from_secs(2)).expect("valid");
    let circuit: Circuit<OperationError> = Circuit::new(&registry, "slow-recovery");

    for _ in 0..3 {
        let _ = circuit.run(|| Err::<(), _>(transient("down")));
    }
    assert_eq!(circuit.breaker().state(), CircuitState::Open);
    assert!(circuit.run(|| Ok(())).expect_err("rejected").is_circuit_open());

    thread::sleep(Duration::from_millis(2_100));
    circuit.run(|| Ok(())).expect("probe admitted");

    assert_eq!(circuit.breaker().state(), CircuitState::Closed);
    assert_eq!(circuit.breaker().failure_count(), 0);
}

// ============================================================================
// Circuit orchestration
// ============================================================================

/// Validates an open circuit with no fallback rejects without invoking the
/// operation.
#[test]
fn test_open_circuit_rejects_without_invoking() {
    let registry = CircuitBreakerRegistry::new();
    registry.create("ledger", 1, Duration::from_secs(60)).expect("valid");
    registry.record_failure("ledger");

    let calls = AtomicU32::new(0);
    let circuit: Circuit<OperationError> = Circuit::new(&registry, "ledger");
    let result = circuit.run(|| {
        calls.fetch_add(1, Ordering::SeqCst);
        Ok(1_u32)
    });

    match result {
        Err(ResilienceError::CircuitOpen { name }) => assert_eq!(name, "ledger"),
        other => panic!("expected CircuitOpen, got {other:?}"),
    }
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

/// Validates an open circuit with a fallback serves the fallback value.
#[test]
fn test_open_circuit_serves_fallback() {
    let registry = CircuitBreakerRegistry::new();
    registry.create("prices", 1, Duration::from_secs(60)).expect("valid");
    registry.record_failure("prices");

    let circuit = Circuit::new(&registry, "prices")
        .with_fallback(FallbackPolicy::with_value(vec![1_u32, 2, 3]));
    let result = circuit.run(|| -> Result<Vec<u32>, OperationError> {
        panic!("operation must not run")
    });

    assert_eq!(result.expect("fallback"), vec![1, 2, 3]);
}

/// Validates retries inside a circuit record every failed attempt and trip
/// the breaker.
#[test]
fn test_circuit_retry_trips_breaker() {
    let registry = CircuitBreakerRegistry::new();
    registry.create("mailer", 3, Duration::from_secs(60)).expect("valid");

    let calls = AtomicU32::new(0);
    let retry = RetryPolicy::new()
        .with_max_attempts(3)
        .with_backoff(BackoffStrategy::fixed(Duration::ZERO));
    let circuit = Circuit::new(&registry, "mailer").with_retry(retry);

    let result: Result<(), _> = circuit.run(|| {
        calls.fetch_add(1, Ordering::SeqCst);
        Err(transient("smtp down"))
    });

    assert!(matches!(result, Err(ResilienceError::OperationFailed { .. })));
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(registry.get("mailer").state(), CircuitState::Open);

    let rejected: Result<(), _> = circuit.run(|| Ok(()));
    assert!(rejected.expect_err("open").is_circuit_open());
}

/// Validates unexpected error kinds bypass recording and fallback.
#[test]
fn test_run_expecting_ignores_other_kinds() {
    let registry = CircuitBreakerRegistry::new();
    registry.create("geo", 1, Duration::from_secs(60)).expect("valid");
    let circuit =
        Circuit::new(&registry, "geo").with_fallback(FallbackPolicy::with_value(0_i64));

    let result: Result<i64, _> = circuit
        .run_expecting(ErrorKind::Timeout, || Err(OperationError::invalid_input("bad coords")));

    assert!(matches!(result, Err(ResilienceError::OperationFailed { .. })));
    assert_eq!(registry.get("geo").state(), CircuitState::Closed);

    let recovered: i64 = circuit
        .run_expecting(ErrorKind::Timeout, || Err(OperationError::timeout("slow")))
        .expect("fallback");
    assert_eq!(recovered, 0);
    assert_eq!(registry.get("geo").state(), CircuitState::Open);
}

/// Validates circuits with the same name share one breaker.
#[test]
fn test_circuits_share_breaker_by_name() {
    let registry = CircuitBreakerRegistry::new();
    registry
        .create_from_config(CircuitBreakerConfig::new("shared", 2, Duration::from_secs(60)))
        .expect("valid");

    let a: Circuit<OperationError> = Circuit::new(&registry, "shared");
    let b: Circuit<OperationError> = Circuit::new(&registry, "shared");
    assert!(a.breaker().shares_state_with(b.breaker()));

    let _ = a.run(|| Err::<(), _>(transient("x")));
    let _ = b.run(|| Err::<(), _>(transient("y")));

    assert_eq!(registry.get("shared").state(), CircuitState::Open);
}

// ============================================================================
// Concurrency
// ============================================================================

/// Validates concurrent failures through a shared registry count exactly and
/// open the breaker once the threshold is reached.
#[test]
fn test_concurrent_failures_open_breaker() {
    let registry = Arc::new(CircuitBreakerRegistry::new());
    registry.create("hot", 40, Duration::from_secs(60)).expect("valid");

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let registry = Arc::clone(&registry);
            thread::spawn(move || {
                for _ in 0..5 {
                    registry.record_failure("hot");
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().expect("thread panicked");
    }

    let breaker = registry.get("hot");
    assert_eq!(breaker.failure_count(), 40);
    assert_eq!(breaker.state(), CircuitState::Open);
}

/// Validates concurrent get-or-create yields a single shared breaker.
#[test]
fn test_concurrent_get_or_create() {
    let registry = Arc::new(CircuitBreakerRegistry::new());

    let breakers: Vec<_> = (0..8)
        .map(|_| {
            let registry = Arc::clone(&registry);
            thread::spawn(move || registry.get("lazy"))
        })
        .collect::<Vec<_>>()
        .into_iter()
        .map(|handle| handle.join().expect("thread panicked"))
        .collect();

    assert_eq!(registry.len(), 1);
    assert!(breakers.windows(2).all(|pair| pair[0].shares_state_with(&pair[1])));
}

/// Validates circuits used from many threads keep the breaker consistent.
#[test]
fn test_concurrent_circuit_runs() {
    let registry = Arc::new(CircuitBreakerRegistry::new());
    registry.create("pool", 1_000, Duration::from_secs(60)).expect("valid");
    let successes = Arc::new(AtomicU32::new(0));

    let handles: Vec<_> = (0..4)
        .map(|worker| {
            let registry = Arc::clone(&registry);
            let successes = Arc::clone(&successes);
            thread::spawn(move || {
                let circuit: Circuit<OperationError> = Circuit::new(&registry, "pool");
                for i in 0..25_u32 {
                    let outcome = circuit.run(|| {
                        if (worker + i) % 5 == 0 {
                            Err(transient("sporadic"))
                        } else {
                            Ok(i)
                        }
                    });
                    if outcome.is_ok() {
                        successes.fetch_add(1, Ordering::SeqCst);
                    }
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().expect("thread panicked");
    }

    assert_eq!(successes.load(Ordering::SeqCst), 80);
    assert_eq!(registry.get("pool").state(), CircuitState::Closed);
}
