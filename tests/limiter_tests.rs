//! Integration tests for admission, ordering and shutdown behavior.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::mpsc;
use tokio::time::Instant;

use slidegate::config::LimiterConfig;
use slidegate::{CancelReason, CancelToken, CoordinatorState, Limiter, LimiterError};

fn spawn_acquire(
    limiter: &Arc<Limiter>,
    token: CancelToken,
) -> tokio::task::JoinHandle<slidegate::Result<Instant>> {
    let limiter = Arc::clone(limiter);
    tokio::spawn(async move {
        limiter.acquire(&token).await?;
        Ok(Instant::now())
    })
}

#[tokio::test(start_paused = true)]
async fn test_two_per_second_scenario() {
    let limiter = Arc::new(Limiter::new(2, Duration::from_secs(1)));
    let start = Instant::now();

    let handles: Vec<_> = (0..3)
        .map(|_| spawn_acquire(&limiter, CancelToken::new()))
        .collect();
    let mut admitted: Vec<Instant> = join_all(handles)
        .await
        .into_iter()
        .map(|r| r.unwrap().unwrap())
        .collect();
    admitted.sort();

    assert_eq!(admitted[0], start);
    assert_eq!(admitted[1], start);
    assert!(admitted[2].duration_since(start) >= Duration::from_secs(1));
    assert!(admitted[2].duration_since(start) < Duration::from_millis(1200));
}

#[tokio::test(start_paused = true)]
async fn test_quota_bound_under_contention() {
    let max_count = 3;
    let interval = Duration::from_millis(200);
    let limiter = Arc::new(Limiter::new(max_count, interval));

    let handles: Vec<_> = (0..20)
        .map(|_| spawn_acquire(&limiter, CancelToken::new()))
        .collect();
    let mut admitted: Vec<Instant> = join_all(handles)
        .await
        .into_iter()
        .map(|r| r.unwrap().unwrap())
        .collect();
    admitted.sort();

    for (i, &window_start) in admitted.iter().enumerate() {
        let in_window = admitted[i..]
            .iter()
            .take_while(|&&t| t.duration_since(window_start) <= interval)
            .count();
        assert!(
            in_window <= max_count as usize,
            "{} admissions within one window starting at #{}",
            in_window,
            i
        );
    }
}

#[tokio::test(start_paused = true)]
async fn test_unlimited_mode_never_blocks() {
    let limiter = Arc::new(Limiter::new(1, Duration::ZERO));
    let start = Instant::now();

    let handles: Vec<_> = (0..500)
        .map(|_| spawn_acquire(&limiter, CancelToken::new()))
        .collect();
    for result in join_all(handles).await {
        assert_eq!(result.unwrap().unwrap(), start);
    }

    let token = CancelToken::new();
    token.cancel();
    let err = limiter.acquire(&token).await.unwrap_err();
    assert_eq!(err.cancel_reason(), Some(CancelReason::Cancelled));
}

#[tokio::test(start_paused = true)]
async fn test_precancelled_call_costs_nothing() {
    let limiter = Limiter::new(1, Duration::from_secs(60));

    let token = CancelToken::new();
    token.cancel();
    for _ in 0..5 {
        assert!(matches!(
            limiter.acquire(&token).await,
            Err(LimiterError::Cancelled(CancelReason::Cancelled))
        ));
    }

    let start = Instant::now();
    limiter.acquire(&CancelToken::new()).await.unwrap();
    assert_eq!(start.elapsed(), Duration::ZERO);
}

#[tokio::test(start_paused = true)]
async fn test_fifo_release_order() {
    let limiter = Arc::new(Limiter::new(1, Duration::from_millis(100)));
    limiter.acquire(&CancelToken::new()).await.unwrap();

    let (order_tx, mut order_rx) = mpsc::unbounded_channel();
    let mut handles = Vec::new();
    for label in ["A", "B", "C"] {
        let limiter = Arc::clone(&limiter);
        let order_tx = order_tx.clone();
        handles.push(tokio::spawn(async move {
            limiter.acquire(&CancelToken::new()).await.unwrap();
            order_tx.send(label).unwrap();
        }));
        // Let each caller reach the coordinator before the next one starts
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    drop(order_tx);
    join_all(handles).await;

    let mut order = Vec::new();
    while let Some(label) = order_rx.recv().await {
        order.push(label);
    }
    assert_eq!(order, vec!["A", "B", "C"]);
}

#[tokio::test(start_paused = true)]
async fn test_queued_caller_takes_freed_slot() {
    let limiter = Arc::new(Limiter::new(1, Duration::from_millis(100)));
    limiter.acquire(&CancelToken::new()).await.unwrap();

    let queued = spawn_acquire(&limiter, CancelToken::new());
    tokio::time::sleep(Duration::from_millis(150)).await;

    // The queued caller took the freed slot; a newcomer has to wait for the next one
    let queued_at = queued.await.unwrap().unwrap();
    let start = Instant::now();
    let late_at = spawn_acquire(&limiter, CancelToken::new())
        .await
        .unwrap()
        .unwrap();
    assert!(queued_at < start);
    assert!(late_at.duration_since(queued_at) > Duration::from_millis(100));
}

#[tokio::test(start_paused = true)]
async fn test_bounded_shutdown() {
    let limiter = Arc::new(Limiter::new(1, Duration::from_secs(30)));
    limiter.acquire(&CancelToken::new()).await.unwrap();

    let waiters: Vec<_> = (0..5)
        .map(|_| spawn_acquire(&limiter, CancelToken::new()))
        .collect();
    tokio::time::sleep(Duration::from_millis(10)).await;

    let stopped_at = Instant::now();
    limiter.stop();

    let results = tokio::time::timeout(Duration::from_millis(500), join_all(waiters))
        .await
        .expect("waiters hung after stop");
    for result in results {
        assert!(result.unwrap().unwrap_err().is_stopped());
    }

    assert!(limiter
        .acquire(&CancelToken::new())
        .await
        .unwrap_err()
        .is_stopped());

    tokio::time::timeout(Duration::from_millis(500), limiter.terminated())
        .await
        .expect("coordinator did not terminate");
    assert_eq!(limiter.state(), CoordinatorState::Terminated);
    assert!(stopped_at.elapsed() <= Duration::from_millis(200));
}

#[tokio::test(start_paused = true)]
async fn test_never_admit_configuration() {
    for max_count in [0, -10] {
        let limiter = Limiter::new(max_count, Duration::from_secs(1));
        for _ in 0..3 {
            let err = limiter.acquire(&CancelToken::new()).await.unwrap_err();
            assert!(matches!(err, LimiterError::InvalidConfig(_)));
        }

        let token = CancelToken::new();
        token.cancel();
        assert!(matches!(
            limiter.acquire(&token).await,
            Err(LimiterError::Cancelled(_))
        ));
    }

    assert!(Limiter::try_new(LimiterConfig::new(0, Duration::from_secs(1))).is_err());
}

#[tokio::test(start_paused = true)]
async fn test_deadline_and_cancel_reported_distinctly() {
    let limiter = Arc::new(Limiter::new(1, Duration::from_secs(10)));
    limiter.acquire(&CancelToken::new()).await.unwrap();

    let deadline = spawn_acquire(&limiter, CancelToken::with_timeout(Duration::from_millis(50)));
    let explicit_token = CancelToken::new();
    let explicit = spawn_acquire(&limiter, explicit_token.clone());
    tokio::time::sleep(Duration::from_millis(10)).await;
    explicit_token.cancel();

    assert_eq!(
        explicit.await.unwrap().unwrap_err().cancel_reason(),
        Some(CancelReason::Cancelled)
    );
    assert_eq!(
        deadline.await.unwrap().unwrap_err().cancel_reason(),
        Some(CancelReason::DeadlineExceeded)
    );
}
