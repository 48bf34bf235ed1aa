//! Service registry and message bus.
//!
//! Services are registered into a [`ServiceRegistry`] (the composition root) and
//! then started together with [`Bus::start`]. From there on they only talk through
//! messages:
//!
//! - every service gets an [`Outbox`] onto one shared inbound queue
//! - a dispatcher drains that queue and forwards each message to every service whose
//!   [`Service::listening_types`] contains the message kind
//! - each service has its own ordered delivery queue and worker, so messages from a
//!   single sender reach a receiver in the order they were sent, and a slow receiver
//!   never holds up the others
//! - each `handle` call runs in its own task; a panic is logged and only loses that
//!   one delivery

mod message;


pub use message::{
    ApiCommand, ApiRequest, Enclosure, FeedList, Message, MessageKind, Notification,
    StatusReport, SubscriptionOp, SubscriptionRequest, TextFormat,
};

use crate::config::BusConfig;
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Name used for messages injected from outside the registered services
pub const EXTERNAL_SENDER: &str = "external";

/// A pluggable unit that sends and receives bus messages
///
/// Lifecycle: [`attach`](Service::attach) and [`init`](Service::init) run once during
/// [`ServiceRegistry::register`]; [`serve`](Service::serve) and
/// [`handle`](Service::handle) run once the bus is started.
#[async_trait]
pub trait Service: Send + Sync {
    /// Unique registry key
    fn name(&self) -> &str;

    /// Message kinds this service wants to receive
    fn listening_types(&self) -> &[MessageKind];

    /// Hand the service its outbound channel onto the shared bus queue
    fn attach(&mut self, outbox: Outbox);

    /// Establish preconditions (credentials, clients). An error keeps this service off the bus.
    async fn init(&mut self) -> Result<()>;

    /// Long-running background work (polling loops). Cancelled at bus shutdown.
    async fn serve(&self) {}

    /// React to one routed message
    async fn handle(&self, message: Arc<Message>);
}

/// A message together with the name of the service that sent it
#[derive(Debug, Clone)]
pub struct Envelope {
    /// Sending service
    pub from: Arc<str>,
    /// The message
    pub message: Message,
}

/// Outbound handle onto the shared bus queue
#[derive(Debug, Clone)]
pub struct Outbox {
    from: Arc<str>,
    tx: mpsc::Sender<Envelope>,
}

impl Outbox {
    /// An outbox feeding a private queue instead of a bus, for driving a service by hand
    pub fn detached(name: &str, capacity: usize) -> (Self, mpsc::Receiver<Envelope>) {
        let (tx, rx) = mpsc::channel(capacity);
        (
            Self {
                from: Arc::from(name),
                tx,
            },
            rx,
        )
    }

    /// Name of the service this outbox belongs to
    pub fn owner(&self) -> &str {
        &self.from
    }

    /// Queue a message for routing. Only waits when the inbound queue is full.
    pub async fn send(&self, message: Message) -> Result<()> {
        tracing::trace!(from = %self.from, kind = %message.kind(), "queueing message");
        self.tx
            .send(Envelope {
                from: self.from.clone(),
                message,
            })
            .await
            .map_err(|_| Error::BusClosed)
    }
}

/// Registered services, keyed by name, in registration order
pub struct ServiceRegistry {
    services: Vec<Arc<dyn Service>>,
    inbound_tx: mpsc::Sender<Envelope>,
    inbound_rx: mpsc::Receiver<Envelope>,
}

impl ServiceRegistry {
    /// Create an empty registry together with its inbound queue
    pub fn new(config: &BusConfig) -> Self {
        let (inbound_tx, inbound_rx) = mpsc::channel(config.queue_capacity.max(1));
        Self {
            services: Vec::new(),
            inbound_tx,
            inbound_rx,
        }
    }

    /// Attach, initialise and add a service
    ///
    /// # Errors
    ///
    /// - [`Error::DuplicateService`] if the name is taken
    /// - whatever [`Service::init`] returns; the service is not registered and the
    ///   rest of the registry is unaffected
    pub async fn register<S>(&mut self, mut service: S) -> Result<()>
    where
        S: Service + 'static,
    {
        let name = service.name().to_string();
        if self.services.iter().any(|s| s.name() == name) {
            return Err(Error::DuplicateService(name));
        }

        service.attach(Outbox {
            from: Arc::from(name.as_str()),
            tx: self.inbound_tx.clone(),
        });

        if let Err(e) = service.init().await {
            tracing::error!(service = %name, error = %e, "Failed to initialise service");
            return Err(e);
        }

        tracing::info!(
            service = %name,
            listening = ?service.listening_types(),
            "Service registered"
        );
        self.services.push(Arc::new(service));
        Ok(())
    }

    /// Names of all registered services, in registration order
    pub fn names(&self) -> Vec<&str> {
        self.services.iter().map(|s| s.name()).collect()
    }

    /// Names of the services a message of `kind` is routed to
    pub fn recipients(&self, kind: MessageKind) -> Vec<&str> {
        self.services
            .iter()
            .filter(|s| s.listening_types().contains(&kind))
            .map(|s| s.name())
            .collect()
    }

    /// Outbox for injecting messages from outside the registered services
    pub fn publisher(&self) -> Outbox {
        Outbox {
            from: Arc::from(EXTERNAL_SENDER),
            tx: self.inbound_tx.clone(),
        }
    }
}

/// Delivery queue of one registered service
struct Route {
    name: String,
    kinds: Vec<MessageKind>,
    tx: mpsc::UnboundedSender<Arc<Message>>,
}

/// Entry point that turns a populated registry into running tasks
pub struct Bus;

impl Bus {
    /// Spawn the dispatcher, one delivery worker per service, and every `serve` loop
    pub fn start(registry: ServiceRegistry) -> RunningBus {
        let ServiceRegistry {
            services,
            inbound_tx,
            inbound_rx,
        } = registry;

        let cancel = CancellationToken::new();
        let mut tasks = Vec::with_capacity(services.len() * 2 + 1);
        let mut routes = Vec::with_capacity(services.len());

        for service in services {
            let (tx, rx) = mpsc::unbounded_channel();
            routes.push(Route {
                name: service.name().to_string(),
                kinds: service.listening_types().to_vec(),
                tx,
            });

            tasks.push(tokio::spawn(run_worker(
                service.clone(),
                rx,
                cancel.clone(),
            )));

            let token = cancel.clone();
            tasks.push(tokio::spawn(async move {
                tokio::select! {
                    _ = token.cancelled() => {}
                    _ = service.serve() => {
                        tracing::debug!(service = service.name(), "serve loop returned");
                    }
                }
            }));
        }

        tasks.push(tokio::spawn(dispatch(inbound_rx, routes, cancel.clone())));
        tracing::info!("Message bus started");

        RunningBus {
            publisher: Outbox {
                from: Arc::from(EXTERNAL_SENDER),
                tx: inbound_tx,
            },
            cancel,
            tasks,
        }
    }
}

/// Handle to a started bus
pub struct RunningBus {
    publisher: Outbox,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl RunningBus {
    /// Outbox for injecting messages from outside the registered services
    pub fn publisher(&self) -> Outbox {
        self.publisher.clone()
    }

    /// Stop the dispatcher, the delivery workers and every `serve` loop
    ///
    /// Handler calls already in flight are not waited for.
    pub async fn shutdown(self) {
        tracing::info!("Shutting down message bus");
        self.cancel.cancel();
        for task in self.tasks {
            if let Err(e) = task.await
                && e.is_panic()
            {
                tracing::error!(error = %e, "bus task panicked");
            }
        }
        tracing::info!("Message bus stopped");
    }
}

async fn dispatch(
    mut inbound: mpsc::Receiver<Envelope>,
    routes: Vec<Route>,
    cancel: CancellationToken,
) {
    loop {
        let envelope = tokio::select! {
            _ = cancel.cancelled() => break,
            next = inbound.recv() => match next {
                Some(envelope) => envelope,
                None => break,
            },
        };

        let kind = envelope.message.kind();
        let message = Arc::new(envelope.message);
        let mut delivered = 0usize;

        for route in routes.iter().filter(|r| r.kinds.contains(&kind)) {
            if route.tx.send(message.clone()).is_err() {
                tracing::warn!(service = %route.name, %kind, "delivery queue closed, message dropped");
            } else {
                delivered += 1;
            }
        }

        if delivered == 0 {
            tracing::debug!(from = %envelope.from, %kind, "no service listens for message");
        } else {
            tracing::trace!(from = %envelope.from, %kind, delivered, "message dispatched");
        }
    }
    tracing::debug!("dispatcher stopped");
}

async fn run_worker(
    service: Arc<dyn Service>,
    mut queue: mpsc::UnboundedReceiver<Arc<Message>>,
    cancel: CancellationToken,
) {
    loop {
        let message = tokio::select! {
            _ = cancel.cancelled() => break,
            next = queue.recv() => match next {
                Some(message) => message,
                None => break,
            },
        };

        let kind = message.kind();
        let receiver = service.clone();
        let mut handler = tokio::spawn(async move { receiver.handle(message).await });
        let outcome = tokio::select! {
            _ = cancel.cancelled() => {
                handler.abort();
                tracing::debug!(service = service.name(), %kind, "handler aborted by shutdown");
                break;
            }
            outcome = &mut handler => outcome,
        };

        if let Err(e) = outcome {
            tracing::error!(
                service = service.name(),
                %kind,
                error = %e,
                "message handler failed, delivery dropped"
            );
        }
    }
}
