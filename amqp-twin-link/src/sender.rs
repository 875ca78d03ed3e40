//! `SenderLink`: a state machine wrapping one outbound AMQP link.
//!
//! Modeled on `fe2o3-engine::transport::connection::mux::Mux`: the state lives inside a
//! single task driven by `tokio::select!` over a command mailbox and (while attached) the
//! underlying link's event stream, and the public [`SenderLinkHandle`] only ever talks to
//! it through channels.

use std::collections::VecDeque;
use std::sync::Arc;

use amqp_twin_types::{AmqpMessage, LinkAddress, LinkOptions, TwinError};
use tokio::sync::{mpsc, oneshot};

use crate::client::{AmqpClient, AmqpSenderLink, SendOutcome, SenderLinkEvent};

type AttachDone = oneshot::Sender<Result<(), TwinError>>;
type SendDone = oneshot::Sender<Result<SendOutcome, TwinError>>;

enum Command {
    Attach(AttachDone),
    Detach,
    Send(AmqpMessage, SendDone),
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
    Attached(Arc<dyn AmqpSenderLink>),
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

/// Handle to a running [`SenderLink`](self) actor.
///
/// Cloning the handle is cheap (it is just a mailbox sender); every clone talks to the
/// same underlying actor task.
#[derive(Debug, Clone)]
pub struct SenderLinkHandle {
    commands: mpsc::Sender<Command>,
}

impl SenderLinkHandle {
    /// Spawns a new `SenderLink` actor bound to `address`, and returns a handle to it.
    ///
    /// `events` receives re-emitted `detached`/`errorReceived` notifications once the link
    /// is attached.
    pub fn spawn(
        client: Arc<dyn AmqpClient>,
        address: LinkAddress,
        options: LinkOptions,
        events: mpsc::Sender<SenderLinkEvent>,
    ) -> Self {
        let (commands_tx, commands_rx) = mpsc::channel(32);
        let actor = Actor {
            client,
            address,
            options,
            state: State::Detached,
            queue: VecDeque::new(),
            attach_done: None,
            attach_error: None,
            deferred: VecDeque::new(),
            link_events: None,
            events,
            mailbox: commands_rx,
        };
        tokio::spawn(actor.run());
        Self {
            commands: commands_tx,
        }
    }

    /// Attaches the link. Resolves once the attach has succeeded or failed for good.
    pub async fn attach(&self) -> Result<(), TwinError> {
        let (done_tx, done_rx) = oneshot::channel();
        self.dispatch(Command::Attach(done_tx)).await;
        await_done(done_rx)
            .await
            .unwrap_or_else(|| Err(actor_gone()))
    }

    /// Detaches the link. Queued sends are failed; this never itself returns an error, in
    /// keeping with "detach is best-effort".
    pub async fn detach(&self) {
        self.dispatch(Command::Detach).await;
    }

    /// Enqueues (and, if necessary, attaches and drains) a message.
    pub async fn send(&self, message: AmqpMessage) -> Result<SendOutcome, TwinError> {
        let (done_tx, done_rx) = oneshot::channel();
        self.dispatch(Command::Send(message, done_tx)).await;
        await_done(done_rx)
            .await
            .unwrap_or_else(|| Err(actor_gone()))
    }

    async fn dispatch(&self, cmd: Command) {
        // The actor only stops by choice (never panics mid-command); a closed mailbox
        // means the handle outlived the actor, which callers observe as `actor_gone()`.
        let _ = self.commands.send(cmd).await;
    }
}

async fn await_done<T>(rx: oneshot::Receiver<T>) -> Option<T> {
    rx.await.ok()
}

fn actor_gone() -> TwinError {
    TwinError::transport_message("sender link actor is no longer running")
}

struct Actor {
    client: Arc<dyn AmqpClient>,
    address: LinkAddress,
    options: LinkOptions,
    state: State,
    queue: VecDeque<(AmqpMessage, SendDone)>,
    attach_done: Option<AttachDone>,
    attach_error: Option<TwinError>,
    deferred: VecDeque<Command>,
    link_events: Option<mpsc::Receiver<SenderLinkEvent>>,
    events: mpsc::Sender<SenderLinkEvent>,
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
        self.fail_queue(actor_gone());
    }

    async fn handle_command(&mut self, cmd: Command) {
        match self.state.tag() {
            StateTag::Detached => match cmd {
                Command::Attach(done) => {
                    self.attach_done = Some(done);
                    self.enter_attaching().await;
                }
                Command::Send(message, done) => {
                    self.queue.push_back((message, done));
                    self.enter_attaching().await;
                }
                Command::Detach => {}
            },
            StateTag::Attaching => match cmd {
                Command::Send(message, done) => self.queue.push_back((message, done)),
                other => self.deferred.push_back(other),
            },
            StateTag::Attached => match cmd {
                Command::Send(message, done) => self.dispatch_send(message, done).await,
                Command::Attach(done) => {
                    let _ = done.send(Ok(()));
                }
                Command::Detach => self.enter_detaching(None).await,
            },
            StateTag::Detaching => self.deferred.push_back(cmd),
        }
    }

    async fn handle_link_event(&mut self, event: Option<SenderLinkEvent>) {
        let Some(event) = event else {
            // The live link's event channel closed without an explicit detach frame;
            // treat it the same as a peer detach with no cause.
            if self.state.tag() == StateTag::Attached {
                self.enter_detaching(Some(TwinError::link_detached_no_cause()))
                    .await;
            }
            return;
        };
        match event {
            SenderLinkEvent::Detached(cause) => self.enter_detaching(cause).await,
            SenderLinkEvent::ErrorReceived(err) => {
                let _ = self.events.send(SenderLinkEvent::ErrorReceived(err)).await;
            }
        }
    }

    async fn enter_attaching(&mut self) {
        self.state = State::Attaching;
        #[cfg(feature = "tracing")]
        tracing::debug!(address = %self.address, "sender link attaching");
        #[cfg(feature = "log")]
        log::debug!("sender link attaching: {}", self.address);

        match self.client.create_sender(&self.address, &self.options).await {
            Ok((link, events)) => {
                self.attach_error = None;
                self.link_events = Some(events);
                self.enter_attached(link).await;
            }
            Err(err) => {
                self.attach_error = Some(err.clone());
                if let Some(done) = self.attach_done.take() {
                    let _ = done.send(Err(err));
                }
                // Open question resolution: attach failure recovers through Detaching,
                // not straight back to Detached, so any caller-visible teardown side
                // effects run uniformly regardless of why we end up detached.
                self.enter_detaching(None).await;
            }
        }
    }

    async fn enter_attached(&mut self, link: Arc<dyn AmqpSenderLink>) {
        self.state = State::Attached(link);
        if let Some(done) = self.attach_done.take() {
            let _ = done.send(Ok(()));
        }
        self.drain_queue().await;
        self.replay_deferred().await;
    }

    async fn drain_queue(&mut self) {
        let pending: Vec<_> = self.queue.drain(..).collect();
        for (message, done) in pending {
            self.dispatch_send(message, done).await;
        }
    }

    async fn dispatch_send(&mut self, message: AmqpMessage, done: SendDone) {
        let State::Attached(link) = &self.state else {
            // Drained into a non-Attached state concurrently (e.g. a deferred Detach ran
            // ahead of us); fail the same way detach-while-queued does.
            let _ = done.send(Err(self.detach_cause()));
            return;
        };
        match link.send(message).await {
            Ok(()) => {
                let _ = done.send(Ok(SendOutcome::MessageEnqueued));
            }
            Err(err) => {
                let _ = done.send(Err(err));
            }
        }
    }

    async fn enter_detaching(&mut self, cause: Option<TwinError>) {
        if let State::Attached(link) = &self.state {
            link.force_detach().await;
        }
        self.state = State::Detaching;
        if let Some(cause) = cause {
            self.attach_error = Some(cause);
        }
        self.link_events = None;
        self.enter_detached().await;
    }

    async fn enter_detached(&mut self) {
        self.state = State::Detached;
        let cause = self
            .attach_error
            .clone()
            .unwrap_or_else(|| TwinError::link_detached_no_cause());
        self.fail_queue(cause);
        self.replay_deferred().await;
    }

    fn fail_queue(&mut self, cause: TwinError) {
        for (_, done) in self.queue.drain(..) {
            let _ = done.send(Err(cause.clone()));
        }
    }

    fn detach_cause(&self) -> TwinError {
        self.attach_error
            .clone()
            .unwrap_or_else(TwinError::link_detached_no_cause)
    }

    async fn replay_deferred(&mut self) {
        let deferred: Vec<_> = self.deferred.drain(..).collect();
        for cmd in deferred {
            Box::pin(self.handle_command(cmd)).await;
        }
    }
}

async fn recv_optional(rx: &mut Option<mpsc::Receiver<SenderLinkEvent>>) -> Option<SenderLinkEvent> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use amqp_twin_types::AmqpBody;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Mutex;

    #[derive(Debug)]
    struct StubSender;

    #[async_trait]
    impl AmqpSenderLink for StubSender {
        async fn send(&self, _message: AmqpMessage) -> Result<(), TwinError> {
            Ok(())
        }
        async fn force_detach(&self) {}
    }

    #[derive(Debug)]
    struct DelayedClient {
        delay: tokio::time::Duration,
        calls: AtomicUsize,
        fail_with: Option<String>,
    }

    #[async_trait]
    impl AmqpClient for DelayedClient {
        async fn create_sender(
            &self,
            _address: &LinkAddress,
            _options: &LinkOptions,
        ) -> Result<
            (
                Arc<dyn AmqpSenderLink>,
                mpsc::Receiver<SenderLinkEvent>,
            ),
            TwinError,
        > {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            if let Some(message) = &self.fail_with {
                return Err(TwinError::transport_message(message.clone()));
            }
            let (_tx, rx) = mpsc::channel(1);
            Ok((Arc::new(StubSender), rx))
        }

        async fn create_receiver(
            &self,
            _address: &LinkAddress,
            _options: &LinkOptions,
        ) -> Result<
            (
                Arc<dyn crate::client::AmqpReceiverLink>,
                mpsc::Receiver<crate::client::ReceiverLinkEvent>,
            ),
            TwinError,
        > {
            unimplemented!("not exercised by SenderLink tests")
        }
    }

    fn spawn_handle(client: DelayedClient) -> (SenderLinkHandle, mpsc::Receiver<SenderLinkEvent>) {
        let (events_tx, events_rx) = mpsc::channel(8);
        let handle = SenderLinkHandle::spawn(
            Arc::new(client),
            LinkAddress::new("$cbs"),
            LinkOptions::new(),
            events_tx,
        );
        (handle, events_rx)
    }

    #[tokio::test]
    async fn send_before_attach_preserves_order_and_attaches_once() {
        let client = DelayedClient {
            delay: tokio::time::Duration::from_millis(50),
            calls: AtomicUsize::new(0),
            fail_with: None,
        };
        let (handle, _events) = spawn_handle(client);

        let order = Arc::new(Mutex::new(Vec::new()));
        let h1 = {
            let handle = handle.clone();
            let order = order.clone();
            tokio::spawn(async move {
                let result = handle.send(AmqpMessage::with_body(AmqpBody::from("m1"))).await;
                order.lock().await.push(1);
                result
            })
        };
        let h2 = {
            let handle = handle.clone();
            let order = order.clone();
            tokio::spawn(async move {
                let result = handle.send(AmqpMessage::with_body(AmqpBody::from("m2"))).await;
                order.lock().await.push(2);
                result
            })
        };

        let (r1, r2) = tokio::join!(h1, h2);
        assert_eq!(r1.unwrap().unwrap(), SendOutcome::MessageEnqueued);
        assert_eq!(r2.unwrap().unwrap(), SendOutcome::MessageEnqueued);
        assert_eq!(*order.lock().await, vec![1, 2]);
    }

    #[tokio::test]
    async fn attach_failure_fails_every_queued_send() {
        let client = DelayedClient {
            delay: tokio::time::Duration::from_millis(10),
            calls: AtomicUsize::new(0),
            fail_with: Some("boom".to_string()),
        };
        let (handle, _events) = spawn_handle(client);

        let handle2 = handle.clone();
        let h1 = tokio::spawn(async move {
            handle.send(AmqpMessage::with_body(AmqpBody::from("m1"))).await
        });
        let h2 = tokio::spawn(async move {
            handle2.send(AmqpMessage::with_body(AmqpBody::from("m2"))).await
        });

        let (r1, r2) = tokio::join!(h1, h2);
        assert!(matches!(r1.unwrap(), Err(TwinError::Transport { message, .. }) if message == "boom"));
        assert!(matches!(r2.unwrap(), Err(TwinError::Transport { message, .. }) if message == "boom"));
    }

    #[tokio::test]
    async fn detach_on_detached_link_is_a_no_op() {
        let client = DelayedClient {
            delay: tokio::time::Duration::from_millis(0),
            calls: AtomicUsize::new(0),
            fail_with: None,
        };
        let (handle, _events) = spawn_handle(client);
        handle.detach().await;
    }
}
