//! `TwinClient`: device-twin request/response plus desired-property notification, composed
//! from one sender and one receiver link bound to a device's twin node.
//!
//! Grounded on `fe2o3-amqp-management::client::MgmtClient`'s request/response correlation
//! (`req_id` bookkeeping, `send_request`/`recv_response`/`call`), generalized with the
//! subscription lifecycle (`response`/`post` listener counts, PUT/DELETE notification
//! churn) the AMQP variant needs.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use amqp_twin_link::{AmqpClient, ReceiverLinkEvent, ReceiverLinkHandle, ReceiverSubscription, SenderLinkHandle};
use amqp_twin_types::{
    new_correlation_id, AmqpBody, AmqpMessage, AmqpValue, LinkAddress, LinkOptions, ReceiverSettleMode,
    SenderSettleMode, TwinError,
};
use indexmap::IndexMap;
use tokio::sync::{mpsc, oneshot};

use crate::config::{TwinClientConfig, API_VERSION_PROPERTY, CHANNEL_CORRELATION_PROPERTY, RESPONSE_TOPIC};
use crate::request::{encode_notification_subscription_request, encode_twin_request};

/// Events a [`TwinClientHandle`] emits asynchronously.
#[derive(Debug, Clone)]
pub enum TwinClientEvent {
    /// A response to a previously-sent request, demultiplexed by `$rid`/`correlationId`.
    Response {
        /// Synthetic envelope topic, always [`RESPONSE_TOPIC`].
        topic: &'static str,
        /// The `$rid` this response correlates with.
        correlation_id: String,
        /// HTTP-style status carried in the synthetic envelope. Always `200`.
        status: i64,
        /// Response body, if any.
        body: Option<AmqpBody>,
    },
    /// An unsolicited desired-properties delta.
    Post {
        /// The delta body.
        body: Option<AmqpBody>,
    },
    /// A link-level or connection error.
    Error(TwinError),
    /// Acknowledges that a subscription is now active.
    Subscribed {
        /// Which event stream this acknowledges (`"response"` or `"post"`).
        event_name: &'static str,
    },
}

#[derive(PartialEq, Eq, Clone, Copy, Debug)]
enum StateTag {
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
}

enum Command {
    SubscribeResponses,
    UnsubscribeResponses,
    SubscribePosts,
    UnsubscribePosts,
    SendRequest(
        String,
        String,
        IndexMap<String, AmqpValue>,
        String,
        oneshot::Sender<Result<(), TwinError>>,
    ),
}

/// Guard returned by [`TwinClientHandle::subscribe_responses`]/`subscribe_posts`.
///
/// Dropping it unsubscribes, exactly like `amqp-twin-link`'s `ReceiverSubscription`.
#[derive(Debug)]
pub struct TwinEventSubscription {
    commands: mpsc::Sender<Command>,
    unsubscribe: fn() -> Command,
}

impl Drop for TwinEventSubscription {
    fn drop(&mut self) {
        let commands = self.commands.clone();
        let cmd = (self.unsubscribe)();
        tokio::spawn(async move {
            let _ = commands.send(cmd).await;
        });
    }
}

/// Handle to a running [`TwinClient`](self) actor.
#[derive(Debug, Clone)]
pub struct TwinClientHandle {
    commands: mpsc::Sender<Command>,
}

impl TwinClientHandle {
    /// Spawns a new `TwinClient` actor against the given AMQP client and configuration.
    ///
    /// Returns the handle alongside the event stream it emits on.
    pub fn spawn(client: Arc<dyn AmqpClient>, config: TwinClientConfig) -> (Self, mpsc::Receiver<TwinClientEvent>) {
        let channel_correlation_id = new_correlation_id();
        let options = LinkOptions::new()
            .with_property(
                CHANNEL_CORRELATION_PROPERTY,
                format!("twin:{channel_correlation_id}"),
            )
            .with_property(API_VERSION_PROPERTY, config.api_version.clone())
            .with_sender_settle_mode(SenderSettleMode::Settled)
            .with_receiver_settle_mode(ReceiverSettleMode::First);

        let address = LinkAddress::new(config.node_address());
        let sender = SenderLinkHandle::spawn(client.clone(), address.clone(), options.clone(), mpsc::channel(8).0);
        let receiver = ReceiverLinkHandle::spawn(client, address, options);

        let (commands_tx, commands_rx) = mpsc::channel(32);
        let (events_tx, events_rx) = mpsc::channel(32);
        let actor = Actor {
            sender,
            receiver,
            state: StateTag::Disconnected,
            subscription: None,
            response_subscribers: 0,
            post_subscribers: 0,
            pending_internal_ops: HashMap::new(),
            deferred: VecDeque::new(),
            events: events_tx,
            mailbox: commands_rx,
        };
        tokio::spawn(actor.run());
        (
            Self {
                commands: commands_tx,
            },
            events_rx,
        )
    }

    /// Subscribes to `response` events, connecting if this is the first `response`/`post`
    /// subscriber.
    pub async fn subscribe_responses(&self) -> TwinEventSubscription {
        let _ = self.commands.send(Command::SubscribeResponses).await;
        TwinEventSubscription {
            commands: self.commands.clone(),
            unsubscribe: || Command::UnsubscribeResponses,
        }
    }

    /// Subscribes to `post` (desired-property) events.
    pub async fn subscribe_posts(&self) -> TwinEventSubscription {
        let _ = self.commands.send(Command::SubscribePosts).await;
        TwinEventSubscription {
            commands: self.commands.clone(),
            unsubscribe: || Command::UnsubscribePosts,
        }
    }

    /// Encodes and sends a twin request.
    pub async fn send_twin_request(
        &self,
        method: impl Into<String>,
        resource: impl Into<String>,
        properties: IndexMap<String, AmqpValue>,
        body: impl Into<String>,
    ) -> Result<(), TwinError> {
        let (done_tx, done_rx) = oneshot::channel();
        let _ = self
            .commands
            .send(Command::SendRequest(
                method.into(),
                resource.into(),
                properties,
                body.into(),
                done_tx,
            ))
            .await;
        done_rx.await.unwrap_or_else(|_| Err(actor_gone()))
    }
}

fn actor_gone() -> TwinError {
    TwinError::transport_message("twin client actor is no longer running")
}

struct Actor {
    sender: SenderLinkHandle,
    receiver: ReceiverLinkHandle,
    state: StateTag,
    subscription: Option<ReceiverSubscription>,
    response_subscribers: usize,
    post_subscribers: usize,
    pending_internal_ops: HashMap<String, oneshot::Sender<AmqpMessage>>,
    deferred: VecDeque<Command>,
    events: mpsc::Sender<TwinClientEvent>,
    mailbox: mpsc::Receiver<Command>,
}

impl Actor {
    async fn run(mut self) {
        loop {
            tokio::select! {
                biased;
                cmd = self.mailbox.recv() => {
                    match cmd {
                        Some(cmd) => self.handle_command(cmd).await,
                        None => break,
                    }
                }
                ev = recv_optional(&mut self.subscription) => {
                    self.handle_link_event(ev).await;
                }
            }
        }
    }

    async fn handle_command(&mut self, cmd: Command) {
        match self.state {
            StateTag::Disconnected => match cmd {
                Command::SubscribeResponses => {
                    self.response_subscribers += 1;
                    self.enter_connecting().await;
                }
                Command::UnsubscribeResponses => {
                    self.response_subscribers = self.response_subscribers.saturating_sub(1);
                }
                Command::SubscribePosts => {
                    self.post_subscribers += 1;
                    self.enter_connecting().await;
                }
                Command::UnsubscribePosts => {
                    self.post_subscribers = self.post_subscribers.saturating_sub(1);
                }
                Command::SendRequest(..) => self.deferred.push_back(cmd),
            },
            StateTag::Connecting => match cmd {
                Command::SubscribeResponses => self.response_subscribers += 1,
                Command::UnsubscribeResponses => {
                    self.response_subscribers = self.response_subscribers.saturating_sub(1);
                }
                Command::SubscribePosts => self.post_subscribers += 1,
                Command::UnsubscribePosts => {
                    self.post_subscribers = self.post_subscribers.saturating_sub(1);
                }
                Command::SendRequest(..) => self.deferred.push_back(cmd),
            },
            StateTag::Connected => self.handle_command_connected(cmd).await,
            StateTag::Disconnecting => self.deferred.push_back(cmd),
        }
    }

    async fn handle_command_connected(&mut self, cmd: Command) {
        match cmd {
            Command::SubscribeResponses => {
                self.response_subscribers += 1;
                let _ = self
                    .events
                    .send(TwinClientEvent::Subscribed { event_name: "response" })
                    .await;
            }
            Command::UnsubscribeResponses => {
                self.response_subscribers = self.response_subscribers.saturating_sub(1);
                self.disconnect_if_idle().await;
            }
            Command::SubscribePosts => {
                let was_subscribed = self.post_subscribers > 0;
                self.post_subscribers += 1;
                if was_subscribed {
                    let _ = self
                        .events
                        .send(TwinClientEvent::Subscribed { event_name: "post" })
                        .await;
                } else {
                    self.request_post_subscription().await;
                }
            }
            Command::UnsubscribePosts => {
                self.post_subscribers = self.post_subscribers.saturating_sub(1);
                if self.post_subscribers == 0 {
                    self.request_post_unsubscription().await;
                }
                self.disconnect_if_idle().await;
            }
            Command::SendRequest(method, resource, properties, body, done) => {
                let result = match encode_twin_request(&method, &resource, &properties, &body) {
                    Ok(message) => self.sender.send(message).await.map(|_| ()),
                    Err(err) => Err(err),
                };
                let _ = done.send(result);
            }
        }
    }

    async fn disconnect_if_idle(&mut self) {
        if self.response_subscribers == 0 && self.post_subscribers == 0 {
            self.enter_disconnecting().await;
        }
    }

    async fn request_post_subscription(&mut self) {
        let correlation_id = new_correlation_id().to_string();
        let message = encode_notification_subscription_request("PUT", &correlation_id);
        let (done_tx, done_rx) = oneshot::channel();
        self.pending_internal_ops.insert(correlation_id, done_tx);
        if let Err(err) = self.sender.send(message).await {
            let _ = self.events.send(TwinClientEvent::Error(err)).await;
            return;
        }
        let events = self.events.clone();
        tokio::spawn(async move {
            if done_rx.await.is_ok() {
                let _ = events
                    .send(TwinClientEvent::Subscribed { event_name: "post" })
                    .await;
            }
        });
    }

    async fn request_post_unsubscription(&mut self) {
        let correlation_id = new_correlation_id().to_string();
        let message = encode_notification_subscription_request("DELETE", &correlation_id);
        if let Err(err) = self.sender.send(message).await {
            let _ = self.events.send(TwinClientEvent::Error(err)).await;
        }
    }

    async fn handle_link_event(&mut self, event: Option<ReceiverLinkEvent>) {
        let Some(event) = event else {
            self.handle_peer_detach(None).await;
            return;
        };
        match event {
            ReceiverLinkEvent::Message(message) => self.handle_inbound_message(message).await,
            ReceiverLinkEvent::Detached(cause) => self.handle_peer_detach(cause).await,
            ReceiverLinkEvent::ErrorReceived(err) => {
                let _ = self.events.send(TwinClientEvent::Error(err)).await;
            }
        }
    }

    async fn handle_inbound_message(&mut self, message: AmqpMessage) {
        match &message.properties.correlation_id {
            Some(correlation_id) => {
                if let Some(done) = self.pending_internal_ops.remove(correlation_id) {
                    let _ = done.send(message);
                } else {
                    let _ = self
                        .events
                        .send(TwinClientEvent::Response {
                            topic: RESPONSE_TOPIC,
                            correlation_id: correlation_id.clone(),
                            status: 200,
                            body: message.body.clone(),
                        })
                        .await;
                }
            }
            None if message.body.is_some() => {
                let _ = self
                    .events
                    .send(TwinClientEvent::Post {
                        body: message.body.clone(),
                    })
                    .await;
            }
            None => {
                #[cfg(feature = "tracing")]
                tracing::debug!("dropping twin message with no correlation id and no body");
                #[cfg(feature = "log")]
                log::debug!("dropping twin message with no correlation id and no body");
            }
        }
    }

    async fn handle_peer_detach(&mut self, cause: Option<TwinError>) {
        if self.state == StateTag::Connected {
            let err = cause.unwrap_or_else(TwinError::link_detached_no_cause);
            let _ = self.events.send(TwinClientEvent::Error(err)).await;
            self.enter_disconnecting().await;
        }
    }

    async fn enter_connecting(&mut self) {
        self.state = StateTag::Connecting;
        match self.receiver.subscribe().await {
            Ok(subscription) => match self.sender.attach().await {
                Ok(()) => {
                    self.subscription = Some(subscription);
                    self.enter_connected().await;
                }
                Err(err) => {
                    drop(subscription);
                    let _ = self.events.send(TwinClientEvent::Error(err)).await;
                    self.enter_disconnecting().await;
                }
            },
            Err(err) => {
                let _ = self.events.send(TwinClientEvent::Error(err)).await;
                self.enter_disconnecting().await;
            }
        }
    }

    async fn enter_connected(&mut self) {
        self.state = StateTag::Connected;
        if self.response_subscribers > 0 {
            let _ = self
                .events
                .send(TwinClientEvent::Subscribed { event_name: "response" })
                .await;
        }
        if self.post_subscribers > 0 {
            self.request_post_subscription().await;
        }
        self.replay_deferred().await;
    }

    async fn enter_disconnecting(&mut self) {
        self.state = StateTag::Disconnecting;
        self.sender.detach().await;
        self.subscription = None;
        self.pending_internal_ops.clear();
        self.state = StateTag::Disconnected;
        self.replay_deferred().await;
    }

    async fn replay_deferred(&mut self) {
        let deferred: Vec<_> = self.deferred.drain(..).collect();
        for cmd in deferred {
            Box::pin(self.handle_command(cmd)).await;
        }
    }
}

async fn recv_optional(sub: &mut Option<ReceiverSubscription>) -> Option<ReceiverLinkEvent> {
    match sub {
        Some(sub) => sub.recv().await,
        None => std::future::pending().await,
    }
}
