//! Tests for the blocking producer bridge.

use ferry_runtime::{BridgeState, Error, ThreadBridge, blocking_stream};
use futures_util::StreamExt;
use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

#[tokio::test(flavor = "multi_thread")]
async fn delivers_every_item_in_order() {
    for n in [0usize, 1, 1000] {
        let bridge = ThreadBridge::new();
        assert_eq!(bridge.state(), BridgeState::Idle);

        let items: Vec<_> = bridge
            .run(move || (0..n).map(Ok::<_, anyhow::Error>))
            .unwrap()
            .collect()
            .await;

        let items: Vec<usize> = items.into_iter().map(Result::unwrap).collect();
        assert_eq!(items, (0..n).collect::<Vec<_>>());
        assert_eq!(bridge.state(), BridgeState::Closed);
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn producer_error_is_raised_once_after_prior_items() {
    let producer = || {
        vec![
            Ok(1),
            Ok(2),
            Err(anyhow::anyhow!("sdk exploded")),
            Ok(3),
        ]
    };
    let items: Vec<_> = blocking_stream(producer).collect().await;

    assert_eq!(items.len(), 3);
    assert_eq!(items[0].as_ref().unwrap(), &1);
    assert_eq!(items[1].as_ref().unwrap(), &2);
    match &items[2] {
        Err(Error::Backend { message, trace }) => {
            assert!(message.contains("sdk exploded"));
            assert!(trace.is_some());
        }
        other => panic!("expected a backend error, got {other:?}"),
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn producer_panic_becomes_error() {
    let producer = || {
        (0..5).map(|i| {
            if i == 2 {
                panic!("worker blew up");
            }
            Ok::<_, anyhow::Error>(i)
        })
    };
    let items: Vec<_> = blocking_stream(producer).collect().await;

    assert_eq!(items.len(), 3);
    assert!(matches!(&items[2], Err(Error::Backend { message, .. }) if message.contains("worker blew up")));
}

#[tokio::test(flavor = "multi_thread")]
async fn second_run_fails_fast() {
    let bridge = ThreadBridge::new();
    let first = bridge.run(|| std::iter::once(Ok::<_, anyhow::Error>(1))).unwrap();
    assert!(matches!(
        bridge.run(|| std::iter::once(Ok::<_, anyhow::Error>(2))),
        Err(Error::BridgeStarted)
    ));

    let items: Vec<_> = first.collect().await;
    assert_eq!(items.len(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn cancel_stops_the_producer_between_items() {
    let bridge = ThreadBridge::with_capacity(4);
    let stream = bridge
        .run(|| {
            (0..).map(|i| {
                std::thread::sleep(Duration::from_millis(1));
                Ok::<_, anyhow::Error>(i)
            })
        })
        .unwrap();
    futures_util::pin_mut!(stream);

    for expected in 0..3 {
        assert_eq!(stream.next().await.unwrap().unwrap(), expected);
    }
    bridge.cancel();

    let rest = tokio::time::timeout(Duration::from_secs(5), stream.count())
        .await
        .expect("stream did not end after cancel");
    assert!(rest <= 8);
}

#[tokio::test(flavor = "multi_thread")]
async fn dropping_the_consumer_stops_the_producer() {
    let produced = Arc::new(AtomicUsize::new(0));
    let counter = produced.clone();
    let mut stream = Box::pin(blocking_stream(move || {
        (0..).map(move |i| {
            counter.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(1));
            Ok::<_, anyhow::Error>(i)
        })
    }));
    stream.next().await.unwrap().unwrap();
    drop(stream);

    tokio::time::sleep(Duration::from_millis(100)).await;
    let settled = produced.load(Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(produced.load(Ordering::SeqCst), settled);
}

#[tokio::test(flavor = "multi_thread")]
async fn stream_outlives_its_bridge() {
    let stream = {
        let bridge = ThreadBridge::new();
        bridge.run(|| (0..3).map(Ok::<_, anyhow::Error>)).unwrap()
    };
    let spawned = tokio::spawn(stream.map(Result::unwrap).collect::<Vec<usize>>());
    assert_eq!(spawned.await.unwrap(), [0, 1, 2]);
}
