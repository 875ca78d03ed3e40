use std::sync::Arc;

use amqp_twin_link::{
    AmqpClient, AmqpReceiverLink, AmqpSenderLink, ReceiverLinkEvent, SenderLinkEvent,
};
use amqp_twin_protocol::{TwinClientConfig, TwinClientEvent, TwinClientHandle};
use amqp_twin_types::{AmqpMessage, AmqpValue, DeliveryTag, LinkAddress, LinkOptions, TwinError};
use async_trait::async_trait;
use indexmap::IndexMap;
use tokio::sync::{mpsc, Mutex};

#[derive(Debug)]
struct StubSender {
    sent: mpsc::Sender<AmqpMessage>,
}

#[async_trait]
impl AmqpSenderLink for StubSender {
    async fn send(&self, message: AmqpMessage) -> Result<(), TwinError> {
        let _ = self.sent.send(message).await;
        Ok(())
    }
    async fn force_detach(&self) {}
}

#[derive(Debug)]
struct StubReceiver;

#[async_trait]
impl AmqpReceiverLink for StubReceiver {
    async fn accept(&self, _tag: &DeliveryTag) -> Result<(), TwinError> {
        Ok(())
    }
    async fn reject(&self, _tag: &DeliveryTag, _description: Option<String>) -> Result<(), TwinError> {
        Ok(())
    }
    async fn abandon(&self, _tag: &DeliveryTag) -> Result<(), TwinError> {
        Ok(())
    }
    async fn force_detach(&self) {}
}

#[derive(Debug)]
struct StubClient {
    sent: mpsc::Sender<AmqpMessage>,
    responses: Mutex<Option<mpsc::Sender<ReceiverLinkEvent>>>,
}

impl StubClient {
    fn new(sent: mpsc::Sender<AmqpMessage>) -> Self {
        Self {
            sent,
            responses: Mutex::new(None),
        }
    }

    async fn respond(&self, event: ReceiverLinkEvent) {
        let tx = self.responses.lock().await.clone().expect("receiver not attached yet");
        let _ = tx.send(event).await;
    }
}

#[async_trait]
impl AmqpClient for StubClient {
    async fn create_sender(
        &self,
        _address: &LinkAddress,
        _options: &LinkOptions,
    ) -> Result<(Arc<dyn AmqpSenderLink>, mpsc::Receiver<SenderLinkEvent>), TwinError> {
        let (_tx, rx) = mpsc::channel(1);
        Ok((
            Arc::new(StubSender {
                sent: self.sent.clone(),
            }),
            rx,
        ))
    }

    async fn create_receiver(
        &self,
        _address: &LinkAddress,
        _options: &LinkOptions,
    ) -> Result<(Arc<dyn AmqpReceiverLink>, mpsc::Receiver<ReceiverLinkEvent>), TwinError> {
        let (tx, rx) = mpsc::channel(8);
        *self.responses.lock().await = Some(tx);
        Ok((Arc::new(StubReceiver), rx))
    }
}

fn response_message(correlation_id: &str, status: i64) -> AmqpMessage {
    let mut message = AmqpMessage::with_body("{}");
    message.properties.correlation_id = Some(correlation_id.to_string());
    message
        .application_properties
        .insert("status-code".to_string(), AmqpValue::Int(status));
    message
}

#[tokio::test]
async fn subscribing_to_responses_connects_and_sends_patch_requests() {
    let (sent_tx, mut sent_rx) = mpsc::channel(8);
    let client: Arc<dyn AmqpClient> = Arc::new(StubClient::new(sent_tx));
    let (handle, mut events) = TwinClientHandle::spawn(client, TwinClientConfig::new("dev1"));

    let _responses = handle.subscribe_responses().await;
    match events.recv().await {
        Some(TwinClientEvent::Subscribed { event_name: "response" }) => {}
        other => panic!("expected response-subscribed event, got {other:?}"),
    }

    let mut properties = IndexMap::new();
    properties.insert("$rid".to_string(), AmqpValue::from("1"));
    handle
        .send_twin_request("PATCH", "/properties/reported/", properties, "{\"a\":1}")
        .await
        .unwrap();

    let sent = sent_rx.recv().await.unwrap();
    assert_eq!(
        sent.message_annotations.get("operation"),
        Some(&AmqpValue::from("PATCH"))
    );
    assert_eq!(sent.message_annotations.get("version"), Some(&AmqpValue::Null));
    assert_eq!(sent.properties.correlation_id.as_deref(), Some("1"));
}

#[tokio::test]
async fn unsolicited_response_is_demultiplexed_by_correlation_id() {
    let (sent_tx, _sent_rx) = mpsc::channel(8);
    let client = Arc::new(StubClient::new(sent_tx));
    let (handle, mut events) = TwinClientHandle::spawn(client.clone(), TwinClientConfig::new("dev1"));

    let _responses = handle.subscribe_responses().await;
    assert!(matches!(
        events.recv().await,
        Some(TwinClientEvent::Subscribed { event_name: "response" })
    ));

    client
        .respond(ReceiverLinkEvent::Message(response_message("42", 200)))
        .await;

    match events.recv().await {
        Some(TwinClientEvent::Response {
            topic,
            correlation_id,
            status,
            ..
        }) => {
            assert_eq!(topic, "$iothub/twin/res");
            assert_eq!(correlation_id, "42");
            assert_eq!(status, 200);
        }
        other => panic!("expected a response event, got {other:?}"),
    }
}

#[tokio::test]
async fn post_subscription_puts_then_deletes_the_desired_properties_resource() {
    let (sent_tx, mut sent_rx) = mpsc::channel(8);
    let client = Arc::new(StubClient::new(sent_tx));
    let (handle, mut events) = TwinClientHandle::spawn(client.clone(), TwinClientConfig::new("dev1"));

    let subscription = handle.subscribe_posts().await;

    let put = sent_rx.recv().await.unwrap();
    assert_eq!(put.message_annotations.get("operation"), Some(&AmqpValue::from("PUT")));
    assert_eq!(
        put.message_annotations.get("resource"),
        Some(&AmqpValue::from("/notifications/twin/properties/desired"))
    );
    let rid = put.properties.correlation_id.clone().unwrap();

    client.respond(ReceiverLinkEvent::Message(response_message(&rid, 200))).await;

    match events.recv().await {
        Some(TwinClientEvent::Subscribed { event_name: "post" }) => {}
        other => panic!("expected post-subscribed event, got {other:?}"),
    }

    drop(subscription);
    let delete = sent_rx.recv().await.unwrap();
    assert_eq!(
        delete.message_annotations.get("operation"),
        Some(&AmqpValue::from("DELETE"))
    );
    assert_ne!(delete.properties.correlation_id, Some(rid));
}

#[tokio::test]
async fn peer_detach_while_connected_emits_an_error_event() {
    let (sent_tx, _sent_rx) = mpsc::channel(8);
    let client = Arc::new(StubClient::new(sent_tx));
    let (handle, mut events) = TwinClientHandle::spawn(client.clone(), TwinClientConfig::new("dev1"));

    let _responses = handle.subscribe_responses().await;
    assert!(matches!(
        events.recv().await,
        Some(TwinClientEvent::Subscribed { event_name: "response" })
    ));

    client.respond(ReceiverLinkEvent::Detached(None)).await;

    match events.recv().await {
        Some(TwinClientEvent::Error(TwinError::LinkDetached { condition, .. })) => {
            assert_eq!(condition, TwinError::INTERNAL_ERROR_CONDITION);
        }
        other => panic!("expected a link-detached error event, got {other:?}"),
    }
}
