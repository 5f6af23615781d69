//! Cancellation-preservation scenarios: canceling a still-queued
//! acquisition must fail it cleanly, leave the queue's bookkeeping intact,
//! and have no effect once a lock is already held.

mod util;

use rwmux::{cancel_pair, AcquireOptions, CancelReason, InstanceMutex, KeyedAcquireOptions, KeyedMutex, MuxError};
use util::Log;

/// A token canceled before the acquisition even starts fails immediately
/// without ever touching the queue.
#[tokio::test(flavor = "current_thread")]
async fn already_canceled_token_fails_immediately() {
    let mux = InstanceMutex::new();
    let (token, guard) = cancel_pair::<CancelReason>();
    guard.cancel(CancelReason::from("stale request"));

    let result = mux
        .manual_acquire_exclusive(AcquireOptions {
            cancel: Some(token),
        })
        .await;
    assert!(matches!(result, Err(MuxError::Canceled(_))));

    // The queue was never touched: a fresh acquisition proceeds immediately.
    let handle = mux
        .manual_acquire_exclusive(AcquireOptions::default())
        .await
        .unwrap();
    handle.release();
}

/// Canceling an acquisition that is queued behind a held lock fails it with
/// the supplied reason and frees its slot, so the next waiter in line still
/// proceeds once the holder releases.
#[tokio::test(flavor = "current_thread")]
async fn canceling_a_queued_acquisition_frees_its_slot() {
    let mux = InstanceMutex::new();
    let holder = mux
        .manual_acquire_exclusive(AcquireOptions::default())
        .await
        .unwrap();

    let (token, guard) = cancel_pair::<CancelReason>();
    let canceled = tokio::join!(
        mux.manual_acquire_exclusive(AcquireOptions {
            cancel: Some(token),
        }),
        async {
            tokio::task::yield_now().await;
            guard.cancel(CancelReason::from("timed out"));
        },
    )
    .0;

    match canceled {
        Err(MuxError::Canceled(reason)) => assert_eq!(reason, CancelReason::from("timed out")),
        other => panic!("expected Canceled, got {other:?}"),
    }

    let log = Log::new();
    tokio::join!(
        async {
            mux.acquire_exclusive(|| async { log.push("next") })
                .await
                .unwrap();
        },
        async {
            tokio::task::yield_now().await;
            holder.release();
        },
    );
    assert_eq!(log.snapshot(), vec!["next"]);
}

/// Once an acquisition succeeds, canceling its token afterward has no
/// effect: the lock stays held and a second acquisition still queues
/// normally behind it.
#[tokio::test(flavor = "current_thread")]
async fn cancellation_has_no_effect_once_lock_is_held() {
    let mux = InstanceMutex::new();
    let (token, guard) = cancel_pair::<CancelReason>();

    let handle = mux
        .manual_acquire_exclusive(AcquireOptions {
            cancel: Some(token),
        })
        .await
        .unwrap();

    guard.cancel(CancelReason::from("too late"));

    let log = Log::new();
    tokio::join!(
        async {
            mux.acquire_exclusive(|| async { log.push("second") })
                .await
                .unwrap();
        },
        async {
            tokio::task::yield_now().await;
            log.push("releasing");
            handle.release();
        },
    );
    assert_eq!(log.snapshot(), vec!["releasing", "second"]);
}

/// The same pre-check applies on the keyed lock: a canceled token fails a
/// keyed acquisition without creating that key's queue.
#[tokio::test(flavor = "current_thread")]
async fn already_canceled_token_fails_keyed_acquisition_immediately() {
    let mux = KeyedMutex::new();
    let (token, guard) = cancel_pair::<CancelReason>();
    guard.cancel(CancelReason::from("stale request"));

    let result = mux
        .exclusive(KeyedAcquireOptions {
            key: Some("widgets".to_owned()),
            cancel: Some(token),
        })
        .await;
    assert!(matches!(result, Err(MuxError::Canceled(_))));

    // The key never took hold: a fresh acquisition on it proceeds
    // immediately rather than queuing behind a phantom entry.
    let handle = mux.exclusive("widgets").await.unwrap();
    handle.release();
}
