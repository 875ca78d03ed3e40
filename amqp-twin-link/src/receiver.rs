//! `ReceiverLink`: a state machine wrapping one inbound AMQP link.
//!
//! Shares `SenderLink`'s four-state shape and actor-task discipline, with one addition:
//! attach/detach are never driven directly by the caller. The first `subscribe()` call
//! triggers a self-attach and resolves once that attach has settled one way or the other;
//! the last subscription being dropped triggers a self-detach. A plain `usize` refcount
//! mutated only inside the actor loop tracks this, so it is never racy even though
//! subscriptions are dropped from arbitrary tasks.

use std::collections::VecDeque;
use std::sync::Arc;

use amqp_twin_types::{DeliveryTag, TwinError};
use amqp_twin_types::{LinkAddress, LinkOptions};
use tokio::sync::{broadcast, mpsc, oneshot};

use crate::client::{AmqpClient, AmqpReceiverLink, DispositionOutcome, ReceiverLinkEvent};

const EVENT_CHANNEL_CAPACITY: usize = 64;

type DispositionDone = oneshot::Sender<Result<DispositionOutcome, TwinError>>;
type SubscribeDone = oneshot::Sender<Result<broadcast::Receiver<ReceiverLinkEvent>, TwinError>>;

enum Command {
    Subscribe(SubscribeDone),
    Unsubscribe,
    Accept(DeliveryTag, DispositionDone),
    Reject(DeliveryTag, Option<String>, DispositionDone),
    Abandon(DeliveryTag, DispositionDone),
}

#[derive(PartialEq, Eq, Clone, Copy, Debug)]
enum StateTag {
    Detached,
    Attaching,
    Attached,
    Detaching,
}

enum State {
    Detached,
    Attaching,
    Attached(Arc<dyn AmqpReceiverLink>),
    Detaching,
}

impl State {
    fn tag(&self) -> StateTag {
        match self {
            State::Detached => StateTag::Detached,
            State::Attaching => StateTag::Attaching,
            State::Attached(_) => StateTag::Attached,
            State::Detaching => StateTag::Detaching,
        }
    }
}

/// A live subscription to a [`ReceiverLink`](self)'s events.
///
/// Dropping this unsubscribes. The underlying link self-detaches once the last
/// subscription drops.
#[derive(Debug)]
pub struct ReceiverSubscription {
    events: broadcast::Receiver<ReceiverLinkEvent>,
    _guard: UnsubscribeGuard,
}

impl ReceiverSubscription {
    /// Waits for the next event. Returns `None` if the actor has shut down.
    pub async fn recv(&mut self) -> Option<ReceiverLinkEvent> {
        loop {
            match self.events.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

#[derive(Debug)]
struct UnsubscribeGuard {
    commands: mpsc::Sender<Command>,
}

impl Drop for UnsubscribeGuard {
    fn drop(&mut self) {
        let commands = self.commands.clone();
        tokio::spawn(async move {
            let _ = commands.send(Command::Unsubscribe).await;
        });
    }
}

/// Handle to a running [`ReceiverLink`](self) actor.
#[derive(Debug, Clone)]
pub struct ReceiverLinkHandle {
    commands: mpsc::Sender<Command>,
}

impl ReceiverLinkHandle {
    /// Spawns a new `ReceiverLink` actor bound to `address`, and returns a handle to it.
    pub fn spawn(client: Arc<dyn AmqpClient>, address: LinkAddress, options: LinkOptions) -> Self {
        let (commands_tx, commands_rx) = mpsc::channel(32);
        let (events_tx, _events_rx) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let actor = Actor {
            client,
            address,
            options,
            state: State::Detached,
            subscriber_count: 0,
            pending_subscribes: Vec::new(),
            attach_error: None,
            deferred: VecDeque::new(),
            link_events: None,
            events: events_tx,
            mailbox: commands_rx,
        };
        tokio::spawn(actor.run());
        Self {
            commands: commands_tx,
        }
    }

    /// Subscribes to this link's events, attaching it if this is the first subscriber.
    ///
    /// Resolves once the (possibly already-in-flight) attach has settled.
    pub async fn subscribe(&self) -> Result<ReceiverSubscription, TwinError> {
        let (done_tx, done_rx) = oneshot::channel();
        let _ = self.commands.send(Command::Subscribe(done_tx)).await;
        let events = done_rx.await.unwrap_or_else(|_| Err(actor_gone()))?;
        Ok(ReceiverSubscription {
            events,
            _guard: UnsubscribeGuard {
                commands: self.commands.clone(),
            },
        })
    }

    /// Accepts (settles) a received message.
    pub async fn accept(&self, tag: DeliveryTag) -> Result<DispositionOutcome, TwinError> {
        self.disposition(|done| Command::Accept(tag, done)).await
    }

    /// Rejects a received message.
    pub async fn reject(
        &self,
        tag: DeliveryTag,
        description: Option<String>,
    ) -> Result<DispositionOutcome, TwinError> {
        self.disposition(|done| Command::Reject(tag, description, done))
            .await
    }

    /// Abandons (releases) a received message.
    pub async fn abandon(&self, tag: DeliveryTag) -> Result<DispositionOutcome, TwinError> {
        self.disposition(|done| Command::Abandon(tag, done)).await
    }

    async fn disposition(
        &self,
        build: impl FnOnce(DispositionDone) -> Command,
    ) -> Result<DispositionOutcome, TwinError> {
        let (done_tx, done_rx) = oneshot::channel();
        let _ = self.commands.send(build(done_tx)).await;
        done_rx.await.unwrap_or_else(|_| Err(actor_gone()))
    }
}

fn actor_gone() -> TwinError {
    TwinError::transport_message("receiver link actor is no longer running")
}

struct Actor {
    client: Arc<dyn AmqpClient>,
    address: LinkAddress,
    options: LinkOptions,
    state: State,
    subscriber_count: usize,
    pending_subscribes: Vec<SubscribeDone>,
    attach_error: Option<TwinError>,
    deferred: VecDeque<Command>,
    link_events: Option<mpsc::Receiver<ReceiverLinkEvent>>,
    events: broadcast::Sender<ReceiverLinkEvent>,
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
                ev = recv_optional(&mut self.link_events) => {
                    self.handle_link_event(ev).await;
                }
            }
        }
    }

    async fn handle_command(&mut self, cmd: Command) {
        match self.state.tag() {
            StateTag::Detached => match cmd {
                Command::Subscribe(done) => {
                    self.subscriber_count += 1;
                    self.pending_subscribes.push(done);
                    self.enter_attaching().await;
                }
                Command::Unsubscribe => {
                    self.subscriber_count = self.subscriber_count.saturating_sub(1);
                }
                Command::Accept(_, done) | Command::Abandon(_, done) => {
                    let _ = done.send(Err(TwinError::NotConnected));
                }
                Command::Reject(_, _, done) => {
                    let _ = done.send(Err(TwinError::NotConnected));
                }
            },
            StateTag::Attaching => match cmd {
                Command::Subscribe(done) => {
                    self.subscriber_count += 1;
                    self.pending_subscribes.push(done);
                }
                Command::Unsubscribe => {
                    self.subscriber_count = self.subscriber_count.saturating_sub(1);
                }
                other => self.deferred.push_back(other),
            },
            StateTag::Attached => match cmd {
                Command::Subscribe(done) => {
                    self.subscriber_count += 1;
                    let _ = done.send(Ok(self.events.subscribe()));
                }
                Command::Unsubscribe => {
                    self.subscriber_count = self.subscriber_count.saturating_sub(1);
                    if self.subscriber_count == 0 {
                        self.enter_detaching(None).await;
                    }
                }
                Command::Accept(tag, done) => {
                    let result = match &self.state {
                        State::Attached(link) => link
                            .accept(&tag)
                            .await
                            .map(|()| DispositionOutcome::MessageCompleted),
                        _ => Err(TwinError::NotConnected),
                    };
                    let _ = done.send(result);
                }
                Command::Reject(tag, description, done) => {
                    let result = match &self.state {
                        State::Attached(link) => link
                            .reject(&tag, description)
                            .await
                            .map(|()| DispositionOutcome::MessageRejected),
                        _ => Err(TwinError::NotConnected),
                    };
                    let _ = done.send(result);
                }
                Command::Abandon(tag, done) => {
                    let result = match &self.state {
                        State::Attached(link) => link
                            .abandon(&tag)
                            .await
                            .map(|()| DispositionOutcome::MessageAbandoned),
                        _ => Err(TwinError::NotConnected),
                    };
                    let _ = done.send(result);
                }
            },
            StateTag::Detaching => self.deferred.push_back(cmd),
        }
    }

    async fn handle_link_event(&mut self, event: Option<ReceiverLinkEvent>) {
        let Some(event) = event else {
            if self.state.tag() == StateTag::Attached {
                self.enter_detaching(Some(TwinError::link_detached_no_cause()))
                    .await;
            }
            return;
        };
        match event {
            ReceiverLinkEvent::Message(message) => {
                let _ = self.events.send(ReceiverLinkEvent::Message(message));
            }
            ReceiverLinkEvent::Detached(cause) => self.enter_detaching(cause).await,
            ReceiverLinkEvent::ErrorReceived(err) => {
                let _ = self.events.send(ReceiverLinkEvent::ErrorReceived(err));
            }
        }
    }

    async fn enter_attaching(&mut self) {
        self.state = State::Attaching;
        #[cfg(feature = "tracing")]
        tracing::debug!(address = %self.address, "receiver link attaching");
        #[cfg(feature = "log")]
        log::debug!("receiver link attaching: {}", self.address);

        match self.client.create_receiver(&self.address, &self.options).await {
            Ok((link, events)) => {
                self.attach_error = None;
                self.link_events = Some(events);
                self.state = State::Attached(link);
                for done in self.pending_subscribes.drain(..) {
                    let _ = done.send(Ok(self.events.subscribe()));
                }
                self.replay_deferred().await;
            }
            Err(err) => {
                self.attach_error = Some(err.clone());
                for done in self.pending_subscribes.drain(..) {
                    let _ = done.send(Err(err.clone()));
                }
                self.enter_detaching(None).await;
            }
        }
    }

    async fn enter_detaching(&mut self, cause: Option<TwinError>) {
        if let State::Attached(link) = &self.state {
            link.force_detach().await;
        }
        self.state = State::Detaching;
        if let Some(cause) = &cause {
            self.attach_error = Some(cause.clone());
        }
        self.link_events = None;
        let _ = self.events.send(ReceiverLinkEvent::Detached(cause));
        self.state = State::Detached;
        self.replay_deferred().await;
    }

    async fn replay_deferred(&mut self) {
        let deferred: Vec<_> = self.deferred.drain(..).collect();
        for cmd in deferred {
            Box::pin(self.handle_command(cmd)).await;
        }
    }
}

async fn recv_optional(rx: &mut Option<mpsc::Receiver<ReceiverLinkEvent>>) -> Option<ReceiverLinkEvent> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use tokio::sync::Mutex;

    #[derive(Debug)]
    struct StubReceiver {
        accepted: Mutex<Vec<DeliveryTag>>,
    }

    #[async_trait]
    impl AmqpReceiverLink for StubReceiver {
        async fn accept(&self, tag: &DeliveryTag) -> Result<(), TwinError> {
            self.accepted.lock().await.push(tag.clone());
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
        message_tx: Mutex<Option<mpsc::Sender<ReceiverLinkEvent>>>,
        fail_with: Option<String>,
    }

    #[async_trait]
    impl AmqpClient for StubClient {
        async fn create_sender(
            &self,
            _address: &LinkAddress,
            _options: &LinkOptions,
        ) -> Result<
            (
                Arc<dyn crate::client::AmqpSenderLink>,
                mpsc::Receiver<crate::client::SenderLinkEvent>,
            ),
            TwinError,
        > {
            unimplemented!("not exercised by ReceiverLink tests")
        }

        async fn create_receiver(
            &self,
            _address: &LinkAddress,
            _options: &LinkOptions,
        ) -> Result<(Arc<dyn AmqpReceiverLink>, mpsc::Receiver<ReceiverLinkEvent>), TwinError> {
            if let Some(message) = &self.fail_with {
                return Err(TwinError::transport_message(message.clone()));
            }
            let (tx, rx) = mpsc::channel(8);
            *self.message_tx.lock().await = Some(tx);
            Ok((
                Arc::new(StubReceiver {
                    accepted: Mutex::new(Vec::new()),
                }),
                rx,
            ))
        }
    }

    #[tokio::test]
    async fn first_subscriber_attaches_and_receives_messages() {
        let client = Arc::new(StubClient {
            message_tx: Mutex::new(None),
            fail_with: None,
        });
        let handle = ReceiverLinkHandle::spawn(
            client.clone(),
            LinkAddress::new("/devices/dev1/twin/"),
            LinkOptions::new(),
        );

        let mut sub = handle.subscribe().await.unwrap();

        let tx = client.message_tx.lock().await.clone().unwrap();
        tx.send(ReceiverLinkEvent::Message(amqp_twin_types::AmqpMessage::default()))
            .await
            .unwrap();

        match sub.recv().await {
            Some(ReceiverLinkEvent::Message(_)) => {}
            other => panic!("expected a message event, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn subscribe_surfaces_attach_failure() {
        let client = Arc::new(StubClient {
            message_tx: Mutex::new(None),
            fail_with: Some("denied".to_string()),
        });
        let handle = ReceiverLinkHandle::spawn(client, LinkAddress::new("$cbs"), LinkOptions::new());
        let result = handle.subscribe().await;
        assert!(matches!(result, Err(TwinError::Transport { message, .. }) if message == "denied"));
    }

    #[tokio::test]
    async fn accept_without_subscription_is_not_connected() {
        let client = Arc::new(StubClient {
            message_tx: Mutex::new(None),
            fail_with: None,
        });
        let handle = ReceiverLinkHandle::spawn(client, LinkAddress::new("$cbs"), LinkOptions::new());
        let result = handle.accept(DeliveryTag::new(vec![1])).await;
        assert!(matches!(result, Err(TwinError::NotConnected)));
    }

    #[tokio::test]
    async fn dispositions_report_their_outcome() {
        let client = Arc::new(StubClient {
            message_tx: Mutex::new(None),
            fail_with: None,
        });
        let handle = ReceiverLinkHandle::spawn(
            client,
            LinkAddress::new("/devices/dev1/twin/"),
            LinkOptions::new(),
        );
        let _sub = handle.subscribe().await.unwrap();

        let accepted = handle.accept(DeliveryTag::new(vec![1])).await.unwrap();
        assert_eq!(accepted, DispositionOutcome::MessageCompleted);

        let rejected = handle
            .reject(DeliveryTag::new(vec![2]), Some("bad payload".to_string()))
            .await
            .unwrap();
        assert_eq!(rejected, DispositionOutcome::MessageRejected);

        let abandoned = handle.abandon(DeliveryTag::new(vec![3])).await.unwrap();
        assert_eq!(abandoned, DispositionOutcome::MessageAbandoned);
    }
}
