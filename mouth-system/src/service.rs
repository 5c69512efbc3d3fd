use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::StreamExt;
use futures::stream::FuturesUnordered;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

/// A message interface for [services](Service).
///
/// Most commonly, this interface is an enumeration of messages, but it can also be implemented on
/// a single message. For each individual message, this type needs to implement the
/// [`FromMessage`] trait.
pub trait Interface: Send + 'static {}

/// Services without messages can use `()` as their interface.
impl Interface for () {}

/// An error when [sending](Addr::send) a message to a service fails.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SendError;

impl fmt::Display for SendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "failed to send message to service")
    }
}

impl std::error::Error for SendError {}

/// Response behavior of an [`Interface`] message.
///
/// It defines how a service handles and responds to messages, such as through asynchronously
/// responding with [`AsyncResponse`] or not responding at all with [`NoResponse`].
pub trait MessageResponse {
    /// Sends responses from the service back to the waiting recipient.
    type Sender;

    /// The type returned from [`Addr::send`].
    type Output;

    /// Returns the response channel for an interface message.
    fn channel() -> (Self::Sender, Self::Output);
}

/// The request when sending an asynchronous message to a service.
///
/// This is returned from [`Addr::send`] when the message responds asynchronously through
/// [`AsyncResponse`]. It is a future that should be awaited. The message still runs to completion
/// if this future is dropped.
pub struct Request<T>(oneshot::Receiver<T>);

impl<T> fmt::Debug for Request<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request").finish_non_exhaustive()
    }
}

impl<T> Future for Request<T> {
    type Output = Result<T, SendError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.0)
            .poll(cx)
            .map(|result| result.map_err(|_| SendError))
    }
}

/// Sends a message response from a service back to the waiting [`Request`].
pub struct Sender<T>(oneshot::Sender<T>);

impl<T> fmt::Debug for Sender<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sender")
            .field("open", &!self.0.is_closed())
            .finish()
    }
}

impl<T> Sender<T> {
    /// Sends the response value and closes the [`Request`].
    ///
    /// This silently drops the value if the request has been dropped.
    pub fn send(self, value: T) {
        self.0.send(value).ok();
    }
}

/// Message response resulting in an asynchronous [`Request`].
///
/// The sender must be placed on the interface in [`FromMessage::from_message`].
pub struct AsyncResponse<T>(PhantomData<T>);

impl<T> fmt::Debug for AsyncResponse<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AsyncResponse")
    }
}

impl<T> MessageResponse for AsyncResponse<T> {
    type Sender = Sender<T>;
    type Output = Request<T>;

    fn channel() -> (Self::Sender, Self::Output) {
        let (tx, rx) = oneshot::channel();
        (Sender(tx), Request(rx))
    }
}

/// Message response for fire-and-forget messages with no output.
///
/// There is no sender associated to this response. When implementing [`FromMessage`], the sender
/// can be ignored.
#[derive(Debug)]
pub struct NoResponse;

impl MessageResponse for NoResponse {
    type Sender = ();
    type Output = ();

    fn channel() -> (Self::Sender, Self::Output) {
        ((), ())
    }
}

/// Declares a message as part of an [`Interface`].
///
/// Messages have an associated `Response` type that determines the return value of sending the
/// message. Within an interface, the responder can vary for each message.
pub trait FromMessage<M>: Interface {
    /// The behavior declaring the return value when sending this message.
    type Response: MessageResponse;

    /// Converts the message into the service interface.
    fn from_message(message: M, sender: <Self::Response as MessageResponse>::Sender) -> Self;
}

/// The address of a [`Service`].
///
/// Addresses allow to [send](Self::send) messages to a service that implements a corresponding
/// [`Interface`] as long as the service is running. The channel is unbounded, so backlogs could
/// occur when sending too many messages.
pub struct Addr<I: Interface> {
    tx: mpsc::UnboundedSender<I>,
    name: &'static str,
}

impl<I: Interface> fmt::Debug for Addr<I> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Addr")
            .field("name", &self.name)
            .field("open", &!self.tx.is_closed())
            .finish()
    }
}

// Manually implement clone since we do not require `I: Clone`.
impl<I: Interface> Clone for Addr<I> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            name: self.name,
        }
    }
}

impl<I: Interface> Addr<I> {
    /// Sends a message to the service and returns the response.
    ///
    /// Depending on the message's response behavior, this either returns a future resolving to
    /// the return value, or does not return anything for fire-and-forget messages. The message is
    /// delivered and handled regardless of whether the response is awaited.
    ///
    /// If the service has shut down, the message is dropped and an asynchronous response resolves
    /// to `Err(SendError)`.
    pub fn send<M>(&self, message: M) -> <I::Response as MessageResponse>::Output
    where
        I: FromMessage<M>,
    {
        let (tx, rx) = I::Response::channel();
        if self.tx.send(I::from_message(message, tx)).is_err() {
            mouth_log::trace!(service = self.name, "message sent to a stopped service");
        }
        rx
    }

    /// Converts this address into a recipient of a single message type.
    pub fn recipient<M>(self) -> Recipient<M, I::Response>
    where
        I: FromMessage<M>,
    {
        Recipient {
            inner: Arc::new(self),
        }
    }

    /// Returns whether the service behind this address has stopped.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

trait SendDispatch<M>: Send + Sync {
    type Response: MessageResponse;

    fn send(&self, message: M) -> <Self::Response as MessageResponse>::Output;
}

impl<I, M> SendDispatch<M> for Addr<I>
where
    I: Interface + FromMessage<M>,
{
    type Response = <I as FromMessage<M>>::Response;

    fn send(&self, message: M) -> <Self::Response as MessageResponse>::Output {
        Addr::send(self, message)
    }
}

/// An address to a [`Service`] implementing any interface that takes a given message.
///
/// This is similar to an [`Addr`], but it is bound to a single message rather than an interface.
/// This allows to decouple the sender of a message from the concrete service receiving it.
pub struct Recipient<M, R> {
    inner: Arc<dyn SendDispatch<M, Response = R>>,
}

impl<M, R> fmt::Debug for Recipient<M, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Recipient")
    }
}

impl<M, R> Clone for Recipient<M, R> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<M, R: MessageResponse> Recipient<M, R> {
    /// Sends a message to the service and returns the response.
    ///
    /// See [`Addr::send`] for more information.
    pub fn send(&self, message: M) -> R::Output {
        self.inner.send(message)
    }
}

/// Inbound channel for messages sent through an [`Addr`].
///
/// This channel is meant to be polled in a [`Service`].
pub struct Receiver<I: Interface> {
    rx: mpsc::UnboundedReceiver<I>,
}

impl<I: Interface> fmt::Debug for Receiver<I> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Receiver")
            .field("pending", &self.rx.len())
            .finish()
    }
}

impl<I: Interface> Receiver<I> {
    /// Receives the next value for this receiver.
    ///
    /// Returns `None` once all addresses have been dropped and no messages are left in the queue.
    pub async fn recv(&mut self) -> Option<I> {
        self.rx.recv().await
    }

    /// Returns the next queued value without waiting.
    ///
    /// Returns `None` if the queue is currently empty or all addresses have been dropped.
    pub fn try_recv(&mut self) -> Option<I> {
        self.rx.try_recv().ok()
    }
}

/// Creates an unbounded channel for communicating with a [`Service`].
///
/// The `name` is used in log messages about the channel.
pub fn channel<I: Interface>(name: &'static str) -> (Addr<I>, Receiver<I>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Addr { tx, name }, Receiver { rx })
}

/// An asynchronous unit responding to messages.
///
/// Services receive messages conforming to some [`Interface`] through an [`Addr`] and handle them
/// one by one. Internally, services are free to concurrently process these messages or not, most
/// probably should.
///
/// Implementations drain the [`Receiver`] in [`run`](Self::run), and should listen to
/// [`Controller::shutdown_handle`](crate::Controller::shutdown_handle) to stop gracefully.
pub trait Service: Sized {
    /// The interface of messages this service implements.
    type Interface: Interface;

    /// Runs the service until its inbox closes or it decides to stop.
    fn run(self, rx: Receiver<Self::Interface>) -> impl Future<Output = ()> + Send + 'static;

    /// Starts the service in the current runtime and returns an address for it.
    ///
    /// The service keeps running in the background. Use [`ServiceRunner::start`] to be able to
    /// wait for the service to finish.
    fn start_detached(self) -> Addr<Self::Interface> {
        let (addr, rx) = channel(Self::name());
        tokio::spawn(self.run(rx));
        addr
    }

    /// Returns a unique name for this service implementation.
    fn name() -> &'static str {
        std::any::type_name::<Self>()
    }
}

/// Keeps track of running services, so that their completion can be awaited.
#[derive(Default)]
pub struct ServiceRunner(FuturesUnordered<JoinHandle<()>>);

impl fmt::Debug for ServiceRunner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceRunner")
            .field("services", &self.0.len())
            .finish()
    }
}

impl ServiceRunner {
    /// Creates a runner without any services.
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts a service in the current runtime and returns its address.
    pub fn start<S: Service>(&mut self, service: S) -> Addr<S::Interface> {
        let (addr, rx) = channel(S::name());
        self.start_with(service, rx);
        addr
    }

    /// Starts a service with an existing receiver.
    ///
    /// This allows to hand out the address of a service before the service is constructed.
    pub fn start_with<S: Service>(&mut self, service: S, rx: Receiver<S::Interface>) {
        self.0.push(tokio::spawn(service.run(rx)));
    }

    /// Waits until all services have finished.
    ///
    /// A panic in a service is propagated to the caller.
    pub async fn join(&mut self) {
        while let Some(result) = self.0.next().await {
            if let Err(error) = result {
                if error.is_panic() {
                    std::panic::resume_unwind(error.into_panic());
                }
            }
        }
    }
}
