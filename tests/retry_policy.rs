use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use deskagents::error::{DeskError, Result};
use deskagents::retry::{ErrorClass, RetryPolicy};
use tokio_test::assert_err;

#[tokio::test(start_paused = true)]
async fn service_unavailable_is_retried_with_growing_delays() {
    let policy = RetryPolicy::new(3, Duration::from_secs(5), 2.0);
    let attempts = Arc::new(AtomicU32::new(0));
    let delays = Arc::new(Mutex::new(Vec::new()));

    let a = attempts.clone();
    let d = delays.clone();
    let started = tokio::time::Instant::now();
    let result: Result<()> = policy
        .run_with_hook(
            "exchange",
            move || {
                let a = a.clone();
                async move {
                    a.fetch_add(1, Ordering::SeqCst);
                    Err(DeskError::Exchange("HTTP 503 Service Unavailable".into()))
                }
            },
            move |ctx| {
                assert_eq!(ctx.class, ErrorClass::Retryable);
                if !ctx.delay.is_zero() {
                    d.lock().unwrap().push(ctx.delay);
                }
            },
        )
        .await;

    let err = assert_err!(result);
    assert!(err.to_string().contains("503"));
    // first attempt plus max_retries retries
    assert_eq!(attempts.load(Ordering::SeqCst), 4);

    let delays = delays.lock().unwrap().clone();
    assert_eq!(
        delays,
        vec![Duration::from_secs(5), Duration::from_secs(10), Duration::from_secs(20)]
    );
    assert!(delays.windows(2).all(|w| w[0] < w[1]));
    assert!(started.elapsed() >= Duration::from_secs(35));
}

#[tokio::test(start_paused = true)]
async fn invalid_api_key_is_never_retried() {
    let policy = RetryPolicy::new(3, Duration::from_secs(5), 2.0);

    let fatal: [fn() -> DeskError; 3] = [
        || DeskError::Exchange("invalid api key".into()),
        || DeskError::Auth("invalid api key".into()),
        || DeskError::Llm("invalid api key".into()),
    ];
    for err in fatal {
        let attempts = Arc::new(AtomicU32::new(0));
        let a = attempts.clone();
        let started = tokio::time::Instant::now();
        let result: Result<()> = policy
            .run("llm", move || {
                let a = a.clone();
                async move {
                    a.fetch_add(1, Ordering::SeqCst);
                    Err(err())
                }
            })
            .await;
        assert_err!(result);
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        assert_eq!(started.elapsed(), Duration::ZERO);
    }
}

#[tokio::test(start_paused = true)]
async fn vocabulary_covers_transient_failures() {
    for message in [
        "404 page",
        "resource not found",
        "HTTP 500",
        "502 Bad Gateway",
        "504 Gateway Timeout",
        "request timed out",
        "connection reset by peer",
        "Rate limit exceeded",
        "Too Many Requests",
    ] {
        assert_eq!(
            RetryPolicy::classify(&DeskError::Llm(message.into())),
            ErrorClass::Retryable,
            "{message}"
        );
    }
    assert_eq!(
        RetryPolicy::classify(&DeskError::Validation("timeout must be positive".into())),
        ErrorClass::Fatal
    );
}
