//! Event bus delivery contracts.

use std::sync::Arc;
use std::time::Duration;

use checkerbox_core::{
    ControlEvent, Event, EventBus, Notification, Outcome, SequenceEvent, StepSettings,
    CONTROL_TOPIC, NOTIFICATION_TOPIC, SEQUENCE_TOPIC,
};
use tokio::sync::mpsc;

fn step(id: usize, site: usize) -> SequenceEvent {
    SequenceEvent {
        id,
        label: format!("step {id}"),
        device: "testdevice".to_string(),
        site,
        retry: 1,
        timeout: Duration::from_millis(1000),
        settings: StepSettings::new(),
    }
}

#[tokio::test]
async fn test_every_subscriber_gets_every_event_in_order() {
    let bus = EventBus::new();
    let mut receivers = Vec::new();
    for _ in 0..3 {
        let (tx, rx) = mpsc::channel(8);
        bus.subscribe(SEQUENCE_TOPIC, tx).await;
        receivers.push(rx);
    }
    let (reply_tx, _reply_rx) = mpsc::channel(1);

    for id in 0..4 {
        let delivered = bus.publish(Event::sequence(step(id, 0), reply_tx.clone())).await;
        assert_eq!(delivered, 3);
    }

    for rx in &mut receivers {
        let ids: Vec<usize> = (0..4)
            .map(|_| rx.try_recv().unwrap().as_sequence().unwrap().id)
            .collect();
        assert_eq!(ids, vec![0, 1, 2, 3]);
    }
}

#[tokio::test]
async fn test_topics_are_isolated() {
    let bus = EventBus::new();
    let (seq_tx, mut seq_rx) = mpsc::channel(8);
    let (ui_tx, mut ui_rx) = mpsc::channel(8);
    let (ctl_tx, mut ctl_rx) = mpsc::channel(8);
    bus.subscribe(SEQUENCE_TOPIC, seq_tx).await;
    bus.subscribe(NOTIFICATION_TOPIC, ui_tx).await;
    bus.subscribe(CONTROL_TOPIC, ctl_tx).await;

    bus.publish(Event::control(ControlEvent::NoError)).await;
    bus.publish(Event::notification(Notification::SequenceEnd {
        outcome: Outcome::Fail,
        site: 2,
    }))
    .await;

    assert!(seq_rx.try_recv().is_err());
    assert!(ui_rx.try_recv().unwrap().as_notification().is_some());
    assert!(ctl_rx.try_recv().is_ok());
    assert!(ui_rx.try_recv().is_err());
}

#[tokio::test]
async fn test_publish_waits_for_inbox_capacity() {
    let bus = Arc::new(EventBus::new());
    let (tx, mut rx) = mpsc::channel(1);
    bus.subscribe(NOTIFICATION_TOPIC, tx).await;

    let end = |site| {
        Event::notification(Notification::SequenceEnd {
            outcome: Outcome::Pass,
            site,
        })
    };
    assert_eq!(bus.publish(end(0)).await, 1);

    // The inbox is full; the second publish must wait, not drop.
    let publisher = {
        let bus = Arc::clone(&bus);
        tokio::spawn(async move { bus.publish(end(1)).await })
    };
    tokio::task::yield_now().await;
    assert!(!publisher.is_finished());

    let first = rx.recv().await.unwrap();
    assert!(matches!(
        first.as_notification(),
        Some(Notification::SequenceEnd { site: 0, .. })
    ));
    assert_eq!(publisher.await.unwrap(), 1);
    let second = rx.recv().await.unwrap();
    assert!(matches!(
        second.as_notification(),
        Some(Notification::SequenceEnd { site: 1, .. })
    ));
}

#[tokio::test]
async fn test_concurrent_publishers_all_deliver() {
    let bus = Arc::new(EventBus::new());
    let (tx, mut rx) = mpsc::channel(256);
    bus.subscribe(SEQUENCE_TOPIC, tx).await;

    let mut handles = Vec::new();
    for site in 0..8 {
        let bus = Arc::clone(&bus);
        handles.push(tokio::spawn(async move {
            let (reply_tx, _reply_rx) = mpsc::channel(1);
            for id in 0..10 {
                bus.publish(Event::sequence(step(id, site), reply_tx.clone())).await;
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    let mut per_site = vec![Vec::new(); 8];
    while let Ok(event) = rx.try_recv() {
        let step = event.as_sequence().unwrap();
        per_site[step.site].push(step.id);
    }
    // No ordering across sites, strict ordering within one.
    for ids in per_site {
        assert_eq!(ids, (0..10).collect::<Vec<_>>());
    }
}
