use chrono::Utc;
use mediator_core::bus::{BucketNotificationEvent, EventBus, UploadEvent};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

fn upload(file: &str) -> UploadEvent {
    UploadEvent {
        bucket: "incoming".into(),
        file: file.into(),
        mime_type: "text/plain".into(),
        metadata: HashMap::new(),
        timestamp: Utc::now(),
        source: Some("mediator-a".into()),
    }
}

fn notification(file: &str) -> BucketNotificationEvent {
    BucketNotificationEvent {
        bucket: "incoming".into(),
        file: file.into(),
        event_type: "s3:ObjectCreated:Put".into(),
        timestamp: Utc::now(),
    }
}

#[test]
fn listeners_run_in_subscription_order() {
    let bus = EventBus::new();
    let order = Arc::new(Mutex::new(Vec::new()));
    for name in ["first", "second", "third"] {
        let order = order.clone();
        bus.on_upload(move |event| {
            order.lock().unwrap().push(format!("{name}:{}", event.file));
            Ok(())
        });
    }

    assert_eq!(bus.publish_upload(&upload("a.txt")), 3);
    assert_eq!(
        *order.lock().unwrap(),
        vec!["first:a.txt", "second:a.txt", "third:a.txt"]
    );
}

#[test]
fn failing_and_panicking_listeners_do_not_block_others() {
    let bus = EventBus::new();
    let reached = Arc::new(Mutex::new(0));

    bus.on_notification(|_| Err("listener refused".into()));
    bus.on_notification(|_| panic!("listener exploded"));
    {
        let reached = reached.clone();
        bus.on_notification(move |_| {
            *reached.lock().unwrap() += 1;
            Ok(())
        });
    }

    let delivered = bus.publish_notification(&notification("x.json"));
    assert_eq!(delivered, 1);
    assert_eq!(*reached.lock().unwrap(), 1);
    assert_eq!(bus.notification_listener_count(), 3);
}

#[test]
fn publishing_without_listeners_is_fine() {
    let bus = EventBus::new();
    assert_eq!(bus.publish_upload(&upload("none.txt")), 0);
    assert_eq!(bus.publish_notification(&notification("none.txt")), 0);
}

#[test]
fn topics_are_independent() {
    let bus = EventBus::new();
    let mut uploads = bus.subscribe_uploads();
    bus.publish_notification(&notification("n.txt"));
    assert!(uploads.try_recv().is_err());
    assert_eq!(bus.upload_listener_count(), 1);
    assert_eq!(bus.notification_listener_count(), 0);
}

#[tokio::test]
async fn channel_bridge_receives_events() {
    let bus = EventBus::new();
    let mut notifications = bus.subscribe_notifications();

    bus.publish_notification(&notification("one.txt"));
    bus.publish_notification(&notification("two.txt"));

    assert_eq!(notifications.recv().await.unwrap().file, "one.txt");
    assert_eq!(notifications.recv().await.unwrap().file, "two.txt");
}

#[test]
fn dropped_bridge_receiver_counts_as_failed_delivery() {
    let bus = EventBus::new();
    drop(bus.subscribe_uploads());
    assert_eq!(bus.publish_upload(&upload("a.txt")), 0);
}

#[test]
fn listener_may_subscribe_while_handling_an_event() {
    let bus = Arc::new(EventBus::new());
    {
        let inner = bus.clone();
        bus.on_upload(move |_| {
            inner.on_upload(|_| Ok(()));
            Ok(())
        });
    }
    assert_eq!(bus.publish_upload(&upload("a.txt")), 1);
    assert_eq!(bus.upload_listener_count(), 2);
}
