//! End-to-end scenarios against [`InstanceMutex`].

mod util;

use std::time::Duration;

use rwmux::{InstanceMutex, MuxError};
use util::Log;

/// Three writers launched concurrently serialize strictly in arrival
/// order, regardless of how long each one's critical section runs.
#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn writer_serialization_orders_by_arrival_not_duration() {
    let mux = InstanceMutex::new();
    let log = Log::new();

    async fn mux_writer(mux: &InstanceMutex, label: &'static str, millis: u64, log: &Log) {
        mux.acquire_exclusive(|| async move {
            tokio::time::sleep(Duration::from_millis(millis)).await;
            log.push(label);
        })
        .await
        .unwrap();
    }

    tokio::join!(
        mux_writer(&mux, "A", 400, &log),
        mux_writer(&mux, "B", 200, &log),
        mux_writer(&mux, "C", 0, &log),
    );

    assert_eq!(log.snapshot(), vec!["A", "B", "C"]);
}

/// Three readers launched concurrently run in parallel; the shortest
/// critical section finishes (and logs) first.
#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn reader_parallelism_orders_by_duration() {
    let mux = InstanceMutex::new();
    let log = Log::new();

    async fn mux_reader(mux: &InstanceMutex, label: &'static str, millis: u64, log: &Log) {
        mux.acquire_shared(|| async move {
            tokio::time::sleep(Duration::from_millis(millis)).await;
            log.push(label);
        })
        .await
        .unwrap();
    }

    tokio::join!(
        mux_reader(&mux, "A", 400, &log),
        mux_reader(&mux, "B", 200, &log),
        mux_reader(&mux, "C", 0, &log),
    );

    assert_eq!(log.snapshot(), vec!["C", "B", "A"]);
}

/// Mixed writer/reader arrivals coalesce into the expected groups and
/// release in the order those groups become runnable.
#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn mixed_arrivals_coalesce_and_release_in_group_order() {
    let mux = InstanceMutex::new();
    let log = Log::new();

    async fn writer(mux: &InstanceMutex, label: &'static str, millis: u64, log: &Log) {
        mux.acquire_exclusive(|| async move {
            tokio::time::sleep(Duration::from_millis(millis)).await;
            log.push(format!("W:{label}"));
        })
        .await
        .unwrap();
    }

    async fn reader(mux: &InstanceMutex, label: &'static str, millis: u64, log: &Log) {
        mux.acquire_shared(|| async move {
            tokio::time::sleep(Duration::from_millis(millis)).await;
            log.push(format!("R:{label}"));
        })
        .await
        .unwrap();
    }

    // Arrival order matters: each of these arrives (synchronously joins or
    // creates a queue item) in the order listed, since `tokio::join!`
    // polls its branches in declaration order on every wake.
    tokio::join!(
        writer(&mux, "A", 200, &log),
        writer(&mux, "B", 0, &log),
        reader(&mux, "A", 400, &log),
        reader(&mux, "B", 200, &log),
        writer(&mux, "C", 0, &log),
        reader(&mux, "B", 0, &log),
    );

    assert_eq!(
        log.snapshot(),
        vec!["W:A", "W:B", "R:B", "R:A", "W:C", "R:B"]
    );
}

/// A writer whose body itself acquires the same instance exclusively
/// again must not deadlock: the nested acquisition runs immediately
/// (inside the outer body's own critical section), while an unrelated
/// sibling writer that merely arrived while the outer body was asleep
/// still queues normally and only runs after the outer writer finishes.
#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn writer_reentering_its_own_lock_runs_immediately_while_siblings_still_queue() {
    let mux = InstanceMutex::new();
    let log = Log::new();

    async fn nested(mux: &InstanceMutex, label: &'static str, log: &Log) {
        mux.acquire_exclusive(|| async move {
            log.push(format!("W2:{label}"));
        })
        .await
        .unwrap();
    }

    async fn outer(mux: &InstanceMutex, label: &'static str, millis: u64, log: &Log) {
        mux.acquire_exclusive(|| async move {
            tokio::time::sleep(Duration::from_millis(millis)).await;
            log.push(format!("W1:{label}"));
            nested(mux, "A", log).await;
            nested(mux, "B", log).await;
        })
        .await
        .unwrap();
    }

    tokio::join!(
        outer(&mux, "A", 200, &log),
        outer(&mux, "B", 0, &log),
    );

    assert_eq!(
        log.snapshot(),
        vec!["W1:A", "W2:A", "W2:B", "W1:B", "W2:A", "W2:B"]
    );
}

/// A reader whose body attempts an exclusive acquisition on the same
/// instance is rejected with `Escalation`, but its own log entry is
/// still produced first, and the queue is left empty afterward.
#[tokio::test(flavor = "current_thread")]
async fn reader_escalating_to_writer_is_rejected() {
    let mux = InstanceMutex::new();
    let log = Log::new();

    let result = mux
        .acquire_shared(|| async {
            log.push("R:A");
            mux.acquire_exclusive(|| async { "unreachable" }).await
        })
        .await;

    assert_eq!(log.snapshot(), vec!["R:A"]);
    assert!(matches!(result, Ok(Err(MuxError::Escalation))));

    // The queue must be empty: a later acquisition must not block.
    mux.acquire_exclusive(|| async {}).await.unwrap();
}
