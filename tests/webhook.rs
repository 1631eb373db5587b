//! Signed notification delivery against a mock HTTP receiver.

use std::time::Duration;

use activation_key_service::{
    models::notification::{
        ACTIVATION_KEYS_EVENT, KeyNotification, NotificationPayload, NotifiedKey,
    },
    notify::{Notifier, NotifyError, WebhookNotifier, webhook::generate_signature},
};
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{header_exists, method, path},
};

const SECRET: &str = "whsec_test";

fn notification() -> KeyNotification {
    KeyNotification {
        order_id: "order_A".to_string(),
        recipient: "buyer@example.com".to_string(),
        customer_name: "Ivan Petrov".to_string(),
        keys: vec![NotifiedKey {
            key_value: "AAAA-BBBB-CCCC".to_string(),
            product_label: "Steam Wallet - 500 RUB".to_string(),
        }],
    }
}

fn notifier_for(server: &MockServer) -> WebhookNotifier {
    WebhookNotifier::new(
        &format!("{}/hooks/keys", server.uri()),
        SECRET,
        Duration::from_secs(5),
    )
    .unwrap()
}

#[tokio::test]
async fn test_delivery_is_signed_and_verifiable() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/hooks/keys"))
        .and(header_exists("X-Webhook-Signature"))
        .and(header_exists("X-Webhook-Event-Id"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    notifier_for(&server).send(&notification()).await.unwrap();

    let requests = server.received_requests().await.unwrap();
    let request = &requests[0];
    let body = String::from_utf8(request.body.clone()).unwrap();
    let header = |name: &str| {
        request
            .headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .unwrap()
            .to_string()
    };

    assert_eq!(
        header("X-Webhook-Signature"),
        generate_signature(SECRET, &body).unwrap()
    );

    let payload: NotificationPayload = serde_json::from_str(&body).unwrap();
    assert_eq!(payload.event_type, ACTIVATION_KEYS_EVENT);
    assert_eq!(payload.event_id.to_string(), header("X-Webhook-Event-Id"));
    assert_eq!(payload.data, notification());
}

#[tokio::test]
async fn test_non_success_status_is_an_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(502))
        .expect(1)
        .mount(&server)
        .await;

    let err = notifier_for(&server)
        .send(&notification())
        .await
        .unwrap_err();

    assert!(matches!(err, NotifyError::Rejected(502)));
}

#[tokio::test]
async fn test_unreachable_receiver_is_a_client_error() {
    // Bind and drop to get a port nothing listens on
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let notifier = WebhookNotifier::new(
        &format!("http://127.0.0.1:{port}/hooks/keys"),
        SECRET,
        Duration::from_secs(2),
    )
    .unwrap();

    let err = notifier.send(&notification()).await.unwrap_err();
    assert!(matches!(err, NotifyError::Client(_)));
}
