//! `CbsAgent`: composes a sender and a receiver link bound to `$cbs` and implements
//! put-token request/response correlation with a shared timeout sweep.
//!
//! Grounded on `fe2o3-amqp-cbs::client::CbsClient`, which likewise composes a pair of
//! links (there, a `fe2o3-amqp-management::MgmtClient`'s sender+receiver) behind a single
//! `put_token` call; the request/response correlation and timeout bookkeeping below has no
//! counterpart there (that crate delegates correlation to `MgmtClient::call`) and is
//! instead modeled on `fe2o3-engine`'s actor-with-a-background-sweep shape.

use std::collections::VecDeque;
use std::sync::Arc;

use amqp_twin_link::{
    AmqpClient, ReceiverLinkHandle, ReceiverLinkEvent, ReceiverSubscription, SenderLinkHandle,
};
use amqp_twin_types::clock::{Clock, TokioClock};
use amqp_twin_types::{
    new_correlation_id, AmqpMessage, AmqpValue, LinkAddress, LinkOptions, MessageProperties,
    TwinError,
};
use indexmap::IndexMap;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use uuid::Uuid;

use crate::constants::{
    CBS_NODE_ADDR, CBS_REPLY_TO, PUT_TOKEN, PUT_TOKEN_TIMEOUT, SAS_TOKEN_TYPE, SWEEP_INTERVAL,
};

type PutTokenDone = oneshot::Sender<Result<(), TwinError>>;

struct PendingPutToken {
    correlation_id: Uuid,
    deadline: Instant,
    done: PutTokenDone,
}

enum Command {
    Attach(oneshot::Sender<Result<(), TwinError>>),
    Detach(oneshot::Sender<()>),
    PutToken(String, String, PutTokenDone),
}

/// Handle to a running [`CbsAgent`](self) actor.
#[derive(Debug, Clone)]
pub struct CbsAgentHandle {
    commands: mpsc::Sender<Command>,
}

impl CbsAgentHandle {
    /// Spawns a new CBS agent against the given AMQP client.
    pub fn spawn(client: Arc<dyn AmqpClient>) -> Self {
        Self::spawn_with_clock(client, Arc::new(TokioClock))
    }

    /// Spawns a new CBS agent using an explicit [`Clock`], for tests that drive the
    /// timeout sweep with `tokio::time::{pause, advance}`.
    pub fn spawn_with_clock(client: Arc<dyn AmqpClient>, clock: Arc<dyn Clock>) -> Self {
        let sender = SenderLinkHandle::spawn(
            client.clone(),
            LinkAddress::new(CBS_NODE_ADDR),
            LinkOptions::new(),
            mpsc::channel(8).0,
        );
        let receiver = ReceiverLinkHandle::spawn(client, LinkAddress::new(CBS_NODE_ADDR), LinkOptions::new());

        let (commands_tx, commands_rx) = mpsc::channel(32);
        let actor = Actor {
            sender,
            receiver,
            subscription: None,
            pending: VecDeque::new(),
            clock,
            mailbox: commands_rx,
        };
        tokio::spawn(actor.run());
        Self {
            commands: commands_tx,
        }
    }

    /// Attaches both the sender and receiver links, wiring the response correlation
    /// handler before returning.
    pub async fn attach(&self) -> Result<(), TwinError> {
        let (done_tx, done_rx) = oneshot::channel();
        let _ = self.commands.send(Command::Attach(done_tx)).await;
        done_rx.await.unwrap_or_else(|_| Err(actor_gone()))
    }

    /// Detaches the sender and drops the receiver subscription. Best-effort: this never
    /// itself returns an error, in keeping with "detach is best-effort".
    pub async fn detach(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        let _ = self.commands.send(Command::Detach(done_tx)).await;
        let _ = done_rx.await;
    }

    /// Requests a SAS token for `audience` via `put-token`.
    pub async fn put_token(&self, audience: impl Into<String>, token: impl Into<String>) -> Result<(), TwinError> {
        let (done_tx, done_rx) = oneshot::channel();
        let _ = self
            .commands
            .send(Command::PutToken(audience.into(), token.into(), done_tx))
            .await;
        done_rx.await.unwrap_or_else(|_| Err(actor_gone()))
    }
}

fn actor_gone() -> TwinError {
    TwinError::transport_message("CBS agent actor is no longer running")
}

struct Actor {
    sender: SenderLinkHandle,
    receiver: ReceiverLinkHandle,
    subscription: Option<ReceiverSubscription>,
    pending: VecDeque<PendingPutToken>,
    clock: Arc<dyn Clock>,
    mailbox: mpsc::Receiver<Command>,
}

impl Actor {
    async fn run(mut self) {
        let mut sweep: Option<tokio::time::Interval> = None;
        loop {
            tokio::select! {
                biased;
                cmd = self.mailbox.recv() => {
                    match cmd {
                        Some(cmd) => self.handle_command(cmd, &mut sweep).await,
                        None => break,
                    }
                }
                event = recv_subscription(&mut self.subscription) => {
                    self.handle_event(event).await;
                }
                _ = sweep_tick(&mut sweep) => {
                    self.sweep_expired(&mut sweep).await;
                }
            }
        }
    }

    async fn handle_command(&mut self, cmd: Command, sweep: &mut Option<tokio::time::Interval>) {
        match cmd {
            Command::Attach(done) => {
                let result = self.attach().await;
                let _ = done.send(result);
            }
            Command::Detach(done) => {
                self.detach().await;
                let _ = done.send(());
            }
            Command::PutToken(audience, token, done) => {
                self.put_token(audience, token, done, sweep).await;
            }
        }
    }

    async fn attach(&mut self) -> Result<(), TwinError> {
        #[cfg(feature = "tracing")]
        tracing::debug!("cbs agent attaching");
        #[cfg(feature = "log")]
        log::debug!("cbs agent attaching");

        let (sender_result, receiver_result) =
            tokio::join!(self.sender.attach(), self.receiver.subscribe());
        match (sender_result, receiver_result) {
            (Ok(()), Ok(subscription)) => {
                #[cfg(feature = "tracing")]
                tracing::debug!("cbs agent attached");
                #[cfg(feature = "log")]
                log::debug!("cbs agent attached");
                self.subscription = Some(subscription);
                Ok(())
            }
            (Ok(()), Err(err)) => {
                #[cfg(feature = "tracing")]
                tracing::debug!(error = %err, "cbs agent attach failed");
                #[cfg(feature = "log")]
                log::debug!("cbs agent attach failed: {err}");
                self.sender.detach().await;
                Err(err)
            }
            (Err(err), Ok(subscription)) => {
                #[cfg(feature = "tracing")]
                tracing::debug!(error = %err, "cbs agent attach failed");
                #[cfg(feature = "log")]
                log::debug!("cbs agent attach failed: {err}");
                // Dropping the only subscription brings the subscriber count to zero,
                // which self-detaches the receiver.
                drop(subscription);
                Err(err)
            }
            (Err(err), Err(_)) => {
                #[cfg(feature = "tracing")]
                tracing::debug!(error = %err, "cbs agent attach failed");
                #[cfg(feature = "log")]
                log::debug!("cbs agent attach failed: {err}");
                Err(err)
            }
        }
    }

    async fn detach(&mut self) {
        #[cfg(feature = "tracing")]
        tracing::debug!("cbs agent detaching");
        #[cfg(feature = "log")]
        log::debug!("cbs agent detaching");

        self.sender.detach().await;
        self.subscription = None;
    }

    async fn put_token(
        &mut self,
        audience: String,
        token: String,
        done: PutTokenDone,
        sweep: &mut Option<tokio::time::Interval>,
    ) {
        let correlation_id = new_correlation_id();
        let message = build_put_token_message(correlation_id, &audience, &token);

        #[cfg(feature = "tracing")]
        tracing::debug!(%audience, %correlation_id, "put-token request issued");
        #[cfg(feature = "log")]
        log::debug!("put-token request issued for {audience} ({correlation_id})");

        let deadline = self.clock.now() + PUT_TOKEN_TIMEOUT;
        self.pending.push_back(PendingPutToken {
            correlation_id,
            deadline,
            done,
        });
        if sweep.is_none() {
            *sweep = Some(tokio::time::interval_at(
                Instant::now() + SWEEP_INTERVAL,
                SWEEP_INTERVAL,
            ));
        }

        if let Err(err) = self.sender.send(message).await {
            #[cfg(feature = "tracing")]
            tracing::debug!(%correlation_id, error = %err, "put-token send failed");
            #[cfg(feature = "log")]
            log::debug!("put-token send failed ({correlation_id}): {err}");
            // Scan from the tail: this send's entry was just pushed, so it is almost
            // always the last one, but a concurrent response could have already removed
            // some earlier entry out from under us.
            if let Some(pos) = self
                .pending
                .iter()
                .rposition(|p| p.correlation_id == correlation_id)
            {
                let pending = self.pending.remove(pos).expect("position just located");
                let _ = pending.done.send(Err(err));
            }
        }
    }

    async fn handle_event(&mut self, event: Option<ReceiverLinkEvent>) {
        let Some(event) = event else { return };
        match event {
            ReceiverLinkEvent::Message(message) => self.handle_response(message).await,
            ReceiverLinkEvent::Detached(_) | ReceiverLinkEvent::ErrorReceived(_) => {}
        }
    }

    async fn handle_response(&mut self, message: AmqpMessage) {
        // The $cbs receiver uses the default settle mode (first/auto-settle), so there is
        // no disposition left for us to send here.
        let correlation_id = message
            .properties
            .correlation_id
            .as_deref()
            .and_then(|id| Uuid::parse_str(id).ok());

        let Some(correlation_id) = correlation_id else {
            return;
        };
        let Some(pos) = self
            .pending
            .iter()
            .position(|p| p.correlation_id == correlation_id)
        else {
            return;
        };
        let pending = self.pending.remove(pos).expect("position just located");
        let result = match message.status_code() {
            Some(200) => Ok(()),
            _ => {
                let description = message
                    .status_description()
                    .unwrap_or("put-token request was rejected")
                    .to_string();
                #[cfg(feature = "tracing")]
                tracing::debug!(%correlation_id, %description, "put-token request rejected");
                #[cfg(feature = "log")]
                log::debug!("put-token request rejected ({correlation_id}): {description}");
                Err(TwinError::Unauthorized(description))
            }
        };
        let _ = pending.done.send(result);
    }

    async fn sweep_expired(&mut self, sweep: &mut Option<tokio::time::Interval>) {
        let now = self.clock.now();
        while let Some(front) = self.pending.front() {
            if front.deadline > now {
                break;
            }
            let expired = self.pending.pop_front().expect("front just checked");
            #[cfg(feature = "tracing")]
            tracing::debug!(correlation_id = %expired.correlation_id, "put-token request timed out");
            #[cfg(feature = "log")]
            log::debug!("put-token request timed out ({})", expired.correlation_id);
            let _ = expired.done.send(Err(TwinError::Timeout));
        }
        if self.pending.is_empty() {
            *sweep = None;
        }
    }
}

fn build_put_token_message(correlation_id: Uuid, audience: &str, token: &str) -> AmqpMessage {
    let mut application_properties = IndexMap::new();
    application_properties.insert("operation".to_string(), AmqpValue::from(PUT_TOKEN));
    application_properties.insert("type".to_string(), AmqpValue::from(SAS_TOKEN_TYPE));
    application_properties.insert("name".to_string(), AmqpValue::from(audience.to_string()));

    AmqpMessage {
        body: Some(token.into()),
        properties: MessageProperties {
            message_id: Some(correlation_id.to_string()),
            to: Some(CBS_NODE_ADDR.to_string()),
            reply_to: Some(CBS_REPLY_TO.to_string()),
            correlation_id: None,
        },
        application_properties,
        message_annotations: IndexMap::new(),
        delivery_tag: None,
    }
}

async fn recv_subscription(sub: &mut Option<ReceiverSubscription>) -> Option<ReceiverLinkEvent> {
    match sub {
        Some(sub) => sub.recv().await,
        None => std::future::pending().await,
    }
}

async fn sweep_tick(sweep: &mut Option<tokio::time::Interval>) {
    match sweep {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}
