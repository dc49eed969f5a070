//! # Event Bus
//!
//! Central messaging hub for the runtime's event-driven architecture. A
//! broadcast-based publish-subscribe mechanism lets registries and managers
//! announce lifecycle changes without direct dependencies on their
//! observers.
//!
//! Two separate channels are maintained: one for regular lifecycle events
//! and one for error events, so error monitoring can be handled
//! independently of normal traffic.

use std::collections::HashMap;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::broadcast;
use tracing::debug;

/// The type of an event, which determines how it is routed and processed.
#[derive(Debug, Clone, PartialEq, Default, strum::Display)]
pub enum EventType {
    #[default]
    Tick,
    // Registry lifecycle
    ComponentRegistered,
    ComponentUnregistered,
    // Service lifecycle
    ServiceStarted,
    ServiceStopped,
    // System lifecycle
    SystemStarting,
    SystemStarted,
    SystemStopping,
    SystemStopped,
    // Plugin lifecycle
    PluginAdded,
    PluginRemoved,
    PluginsStarted,
    PluginsStopped,
    // ETL process lifecycle
    ProcessInitialized,
    ProcessStarted,
    ProcessStopped,
    ProcessFailed,
    Custom(String),
}

/// Event payload values.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Integer(i64),
    Float(f64),
    String(String),
    Boolean(bool),
    Duration(Duration),
    List(Vec<Value>),
    Map(HashMap<String, Value>),
    Null,
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value)
    }
}

/// A discrete message: an event type plus key-value parameters.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Event {
    pub event_type: EventType,
    pub parameters: HashMap<String, Value>,
}

impl Event {
    pub fn new(event_type: EventType) -> Self {
        Self {
            event_type,
            parameters: HashMap::new(),
        }
    }

    pub fn with_parameter(mut self, key: &str, value: Value) -> Self {
        self.parameters.insert(key.to_string(), value);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub enum ErrorSeverity {
    #[default]
    Warning,
    Error,
    Critical,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ErrorEvent {
    pub error_type: String,
    pub message: String,
    pub severity: ErrorSeverity,
    pub parameters: HashMap<String, Value>,
}

#[derive(Error, Debug)]
pub enum EventError {
    #[error("event send failed: {message}")]
    SendFailed { message: String },

    #[error("event receive failed: {message}")]
    ReceiveFailed { message: String },

    #[error("event receiver lagged by {count} events")]
    Lagged { count: u64 },
}

pub type EventResult<T> = Result<T, EventError>;

/// Broadcast-based publish-subscribe hub.
///
/// The capacity determines how many unprocessed events can be buffered per
/// subscriber before slow receivers start lagging. Internal receivers keep
/// both channels open so publishing never fails for lack of subscribers.
pub struct EventBus {
    event_sender: broadcast::Sender<Event>,
    error_sender: broadcast::Sender<ErrorEvent>,
    capacity: usize,
    _internal_receiver: broadcast::Receiver<Event>,
    _internal_error_receiver: broadcast::Receiver<ErrorEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (event_sender, event_receiver) = broadcast::channel(capacity);
        let (error_sender, error_receiver) = broadcast::channel(capacity);
        Self {
            event_sender,
            error_sender,
            capacity,
            _internal_receiver: event_receiver,
            _internal_error_receiver: error_receiver,
        }
    }

    /// Subscribes to both regular and error events.
    pub fn subscribe(&self) -> (EventReceiver, ErrorReceiver) {
        let event_rx = self.event_sender.subscribe();
        let error_rx = self.error_sender.subscribe();
        (EventReceiver::new(event_rx), ErrorReceiver::new(error_rx))
    }

    pub async fn publish(&self, event: Event) -> EventResult<()> {
        debug!("Publishing event: {:?}", event.event_type);
        self.event_sender
            .send(event)
            .map_err(|e| EventError::SendFailed {
                message: e.to_string(),
            })?;
        Ok(())
    }

    /// Publishes without awaiting, for use from synchronous contexts.
    pub fn sync_publish(&self, event: Event) -> EventResult<()> {
        debug!("Sync publishing event: {:?}", event.event_type);
        self.event_sender
            .send(event)
            .map_err(|e| EventError::SendFailed {
                message: e.to_string(),
            })?;
        Ok(())
    }

    pub async fn publish_error(&self, error: ErrorEvent) -> EventResult<()> {
        self.error_sender
            .send(error)
            .map_err(|e| EventError::SendFailed {
                message: e.to_string(),
            })?;
        Ok(())
    }

    pub fn queue_size(&self) -> usize {
        self.event_sender.len()
    }

    pub fn subscribers_size(&self) -> usize {
        self.event_sender.receiver_count()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

pub struct EventReceiver {
    pub receiver: broadcast::Receiver<Event>,
}

impl EventReceiver {
    fn new(receiver: broadcast::Receiver<Event>) -> Self {
        Self { receiver }
    }

    /// Receives the next event. On lag the receiver resubscribes and
    /// reports how many events were skipped; callers should keep calling
    /// `recv` promptly to avoid lagging in the first place.
    pub async fn recv(&mut self) -> EventResult<Event> {
        match self.receiver.recv().await {
            Ok(event) => Ok(event),
            Err(broadcast::error::RecvError::Lagged(n)) => {
                self.receiver = self.receiver.resubscribe();
                Err(EventError::Lagged { count: n })
            }
            Err(e) => Err(EventError::ReceiveFailed {
                message: e.to_string(),
            }),
        }
    }
}

pub struct ErrorReceiver {
    pub receiver: broadcast::Receiver<ErrorEvent>,
}

impl ErrorReceiver {
    fn new(receiver: broadcast::Receiver<ErrorEvent>) -> Self {
        Self { receiver }
    }

    pub async fn recv(&mut self) -> EventResult<ErrorEvent> {
        self.receiver
            .recv()
            .await
            .map_err(|e| EventError::ReceiveFailed {
                message: e.to_string(),
            })
    }
}
