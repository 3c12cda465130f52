use super::*;
use crate::application::session::tests::{cookie_header_signed_with, test_config};
use crate::application::session::SessionData;
use crate::infrastructure::backbone::MemoryBus;
use http::header::COOKIE;
use http::HeaderValue;
use serde_json::json;
use std::time::Duration;

const CLIENT_ORIGIN: &str = "http://localhost:3000";

async fn gateway_on(bus: &MemoryBus) -> Gateway {
    let health = HealthMonitor::new("backbone");
    let (publisher, subscriber) = bus.open(health.clone()).await.unwrap();
    Gateway::new(
        GatewayOptions {
            allowed_origin: CLIENT_ORIGIN.to_string(),
        },
        Arc::new(SessionKeys::new(&test_config(), false)),
        publisher,
        subscriber.as_ref(),
        health,
    )
}

async fn next(connection: &Connection) -> Option<Delivery> {
    tokio::time::timeout(Duration::from_secs(2), connection.recv())
        .await
        .ok()
        .flatten()
}

async fn nothing_within(connection: &Connection, millis: u64) -> bool {
    tokio::time::timeout(Duration::from_millis(millis), connection.recv())
        .await
        .is_err()
}

#[tokio::test]
async fn test_publish_is_delivered_to_local_members_through_backbone() {
    let bus = MemoryBus::new();
    let gateway = gateway_on(&bus).await;

    let x = gateway.accept(&HeaderMap::new()).unwrap();
    let y = gateway.accept(&HeaderMap::new()).unwrap();
    x.join("room1").await.unwrap();
    y.join("room1").await.unwrap();

    x.publish("room1", json!({"text": "hi"})).await.unwrap();

    let delivery = next(&y).await.unwrap();
    assert_eq!(delivery.topic, "room1");
    assert_eq!(delivery.from, x.id());
    assert_eq!(delivery.payload, json!({"text": "hi"}));

    // 发布者自己也是成员
    assert_eq!(next(&x).await.unwrap().from, x.id());
}

#[tokio::test]
async fn test_cross_instance_delivery() {
    let bus = MemoryBus::new();
    let gateway_a = gateway_on(&bus).await;
    let gateway_b = gateway_on(&bus).await;

    let x = gateway_a.accept(&HeaderMap::new()).unwrap();
    let y = gateway_b.accept(&HeaderMap::new()).unwrap();
    x.join("room1").await.unwrap();
    y.join("room1").await.unwrap();

    x.publish("room1", json!({"text": "hi"})).await.unwrap();

    let delivery = next(&y).await.unwrap();
    assert_eq!(delivery.payload, json!({"text": "hi"}));
    assert_eq!(delivery.from, x.id());
}

#[tokio::test]
async fn test_non_members_receive_nothing() {
    let bus = MemoryBus::new();
    let gateway = gateway_on(&bus).await;

    let x = gateway.accept(&HeaderMap::new()).unwrap();
    let outsider = gateway.accept(&HeaderMap::new()).unwrap();
    outsider.join("room2").await.unwrap();

    x.publish("room1", json!(1)).await.unwrap();

    assert!(nothing_within(&outsider, 100).await);
}

#[tokio::test]
async fn test_per_publisher_order_is_preserved() {
    let bus = MemoryBus::new();
    let gateway_a = gateway_on(&bus).await;
    let gateway_b = gateway_on(&bus).await;

    let publisher = gateway_a.accept(&HeaderMap::new()).unwrap();
    let local = gateway_a.accept(&HeaderMap::new()).unwrap();
    let remote = gateway_b.accept(&HeaderMap::new()).unwrap();
    local.join("ordered").await.unwrap();
    remote.join("ordered").await.unwrap();

    for seq in 0..200 {
        publisher.publish("ordered", json!(seq)).await.unwrap();
    }

    for receiver in [&local, &remote] {
        for expected in 0..200 {
            let delivery = next(receiver).await.unwrap();
            assert_eq!(delivery.payload, json!(expected));
        }
    }
}

#[tokio::test]
async fn test_leave_under_concurrent_publishes() {
    let bus = MemoryBus::new();
    let gateway = gateway_on(&bus).await;

    let publisher = Arc::new(gateway.accept(&HeaderMap::new()).unwrap());
    let receiver = gateway.accept(&HeaderMap::new()).unwrap();
    receiver.join("busy").await.unwrap();
    receiver.join("control").await.unwrap();

    let flood = {
        let publisher = publisher.clone();
        tokio::spawn(async move {
            for seq in 0..2_000 {
                publisher.publish("busy", json!(seq)).await.unwrap();
                if seq % 50 == 0 {
                    tokio::task::yield_now().await;
                }
            }
        })
    };

    // 确保 leave 时已有消息在途
    let first = next(&receiver).await.unwrap();
    assert_eq!(first.topic, "busy");

    receiver.leave("busy").await.unwrap();
    publisher.publish("control", json!("marker")).await.unwrap();

    // leave 之后第一条只能是 control 上的标记
    let after = next(&receiver).await.unwrap();
    assert_eq!(after.topic, "control");
    assert_eq!(after.payload, json!("marker"));

    flood.await.unwrap();
    assert!(nothing_within(&receiver, 100).await);
    assert_eq!(gateway.topic_size("busy"), 0);
}

#[tokio::test]
async fn test_rejoin_does_not_resurrect_stale_deliveries() {
    let bus = MemoryBus::new();
    let gateway = gateway_on(&bus).await;

    let publisher = gateway.accept(&HeaderMap::new()).unwrap();
    let receiver = gateway.accept(&HeaderMap::new()).unwrap();
    receiver.join("room").await.unwrap();

    publisher.publish("room", json!("before")).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    receiver.leave("room").await.unwrap();
    receiver.join("room").await.unwrap();
    publisher.publish("room", json!("after")).await.unwrap();

    assert_eq!(next(&receiver).await.unwrap().payload, json!("after"));
}

#[tokio::test]
async fn test_disconnect_is_idempotent() {
    let bus = MemoryBus::new();
    let gateway = gateway_on(&bus).await;

    let connection = gateway.accept(&HeaderMap::new()).unwrap();
    let other = gateway.accept(&HeaderMap::new()).unwrap();
    connection.join("a").await.unwrap();
    connection.join("b").await.unwrap();
    other.join("a").await.unwrap();
    assert_eq!(gateway.connection_count(), 2);

    connection.disconnect().await;
    connection.disconnect().await;

    assert!(connection.is_closed().await);
    assert_eq!(gateway.connection_count(), 1);
    assert_eq!(gateway.topic_size("a"), 1);
    assert_eq!(gateway.topic_size("b"), 0);
    assert!(connection.topics().await.is_empty());
    assert_eq!(connection.recv().await, None);
    assert_eq!(
        connection.join("c").await,
        Err(GatewayError::ConnectionClosed(connection.id()))
    );
    assert_eq!(
        connection.publish("a", json!(1)).await,
        Err(GatewayError::ConnectionClosed(connection.id()))
    );
}

#[tokio::test]
async fn test_disconnect_during_publishes() {
    let bus = MemoryBus::new();
    let gateway = gateway_on(&bus).await;

    let publisher = Arc::new(gateway.accept(&HeaderMap::new()).unwrap());
    let receiver = Arc::new(gateway.accept(&HeaderMap::new()).unwrap());
    receiver.join("room").await.unwrap();

    let flood = {
        let publisher = publisher.clone();
        tokio::spawn(async move {
            for seq in 0..1_000 {
                publisher.publish("room", json!(seq)).await.unwrap();
            }
        })
    };
    let reader = {
        let receiver = receiver.clone();
        tokio::spawn(async move {
            let mut count = 0;
            while receiver.recv().await.is_some() {
                count += 1;
            }
            count
        })
    };

    tokio::time::sleep(Duration::from_millis(5)).await;
    receiver.disconnect().await;
    flood.await.unwrap();

    let received = tokio::time::timeout(Duration::from_secs(2), reader)
        .await
        .unwrap()
        .unwrap();
    assert!(received <= 1_000);
    assert_eq!(gateway.topic_size("room"), 0);
}

#[tokio::test]
async fn test_join_is_idempotent_and_topics_validated() {
    let bus = MemoryBus::new();
    let gateway = gateway_on(&bus).await;
    let connection = gateway.accept(&HeaderMap::new()).unwrap();

    connection.join("room").await.unwrap();
    connection.join("room").await.unwrap();
    assert_eq!(gateway.topic_size("room"), 1);
    assert_eq!(connection.topics().await, vec!["room".to_string()]);

    assert!(matches!(
        connection.join("").await,
        Err(GatewayError::InvalidTopic(_))
    ));
    let err: ClassifiedError = GatewayError::InvalidTopic("x".into()).into();
    assert_eq!(err.status_code().as_u16(), 400);

    // 未加入的 topic 离开是 no-op
    connection.leave("never-joined").await.unwrap();
}

#[tokio::test]
async fn test_accept_checks_origin() {
    let bus = MemoryBus::new();
    let gateway = gateway_on(&bus).await;

    let mut headers = HeaderMap::new();
    headers.insert(ORIGIN, HeaderValue::from_static(CLIENT_ORIGIN));
    assert!(gateway.accept(&headers).is_ok());

    headers.insert(ORIGIN, HeaderValue::from_static("http://evil.example"));
    let err = gateway.accept(&headers).unwrap_err();
    assert!(matches!(err, GatewayError::ConnectionRejected(_)));
    let classified: ClassifiedError = err.into();
    assert_eq!(classified.status_code().as_u16(), 401);
}

#[tokio::test]
async fn test_accept_checks_session_cookie() {
    let bus = MemoryBus::new();
    let gateway = gateway_on(&bus).await;

    let mut headers = HeaderMap::new();
    headers.insert(
        COOKIE,
        cookie_header_signed_with("previous-secret", &SessionData::for_user("alice")),
    );
    let connection = gateway.accept(&headers).unwrap();
    assert_eq!(connection.principal(), Some("alice"));

    headers.insert(
        COOKIE,
        cookie_header_signed_with("unknown-secret", &SessionData::for_user("alice")),
    );
    assert!(matches!(
        gateway.accept(&headers),
        Err(GatewayError::ConnectionRejected(_))
    ));

    let anonymous = gateway.accept(&HeaderMap::new()).unwrap();
    assert_eq!(anonymous.principal(), None);
}

#[tokio::test]
async fn test_publish_failure_degrades_to_local_delivery() {
    let bus = MemoryBus::new();
    let gateway = gateway_on(&bus).await;

    let x = gateway.accept(&HeaderMap::new()).unwrap();
    let y = gateway.accept(&HeaderMap::new()).unwrap();
    y.join("room").await.unwrap();

    bus.set_available(false);
    x.publish("room", json!("still here")).await.unwrap();

    assert_eq!(next(&y).await.unwrap().payload, json!("still here"));
    assert!(!gateway.health().is_healthy());
}

#[tokio::test]
async fn test_backbone_recovery_restores_health() {
    let bus = MemoryBus::new();
    let gateway = gateway_on(&bus).await;

    let x = gateway.accept(&HeaderMap::new()).unwrap();
    let y = gateway.accept(&HeaderMap::new()).unwrap();
    y.join("room").await.unwrap();

    bus.set_available(false);
    x.publish("room", json!("during outage")).await.unwrap();
    assert_eq!(next(&y).await.unwrap().payload, json!("during outage"));
    assert!(!gateway.health().is_healthy());

    bus.set_available(true);
    x.publish("room", json!("after outage")).await.unwrap();
    assert_eq!(next(&y).await.unwrap().payload, json!("after outage"));

    let mut health = gateway.health().subscribe();
    tokio::time::timeout(Duration::from_secs(2), health.wait_for(|s| s.is_healthy()))
        .await
        .expect("backbone health did not recover")
        .unwrap();
}

#[tokio::test]
async fn test_lost_subscription_degrades_to_local_delivery() {
    let bus = MemoryBus::new();
    let gateway = gateway_on(&bus).await;

    let x = gateway.accept(&HeaderMap::new()).unwrap();
    let y = gateway.accept(&HeaderMap::new()).unwrap();
    y.join("room").await.unwrap();

    bus.detach_subscribers();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!gateway.health().is_healthy());

    x.publish("room", json!("local only")).await.unwrap();
    assert_eq!(next(&y).await.unwrap().payload, json!("local only"));

    // 订阅已断开，发布成功也不算恢复
    assert!(!gateway.health().is_healthy());
}

#[tokio::test]
async fn test_slow_connection_is_evicted_when_queue_fills() {
    let bus = MemoryBus::new();
    let gateway = gateway_on(&bus).await;

    let publisher = gateway.accept(&HeaderMap::new()).unwrap();
    let slow = gateway.accept(&HeaderMap::new()).unwrap();
    slow.join("firehose").await.unwrap();

    for i in 0..=DELIVERY_QUEUE_CAPACITY {
        publisher.publish("firehose", json!(i)).await.unwrap();
    }

    tokio::time::timeout(Duration::from_secs(2), slow.evicted())
        .await
        .expect("slow connection was not evicted");
    assert!(slow.is_evicted());
    assert!(slow.is_closed().await);

    assert_eq!(slow.recv().await, None);
    assert_eq!(gateway.topic_size("firehose"), 0);
    assert_eq!(gateway.connection_count(), 1);
    assert_eq!(
        slow.join("firehose").await,
        Err(GatewayError::ConnectionClosed(slow.id()))
    );

    // 其他连接不受影响
    publisher.join("firehose").await.unwrap();
    publisher.publish("firehose", json!("still flowing")).await.unwrap();
    assert_eq!(next(&publisher).await.unwrap().payload, json!("still flowing"));
}
