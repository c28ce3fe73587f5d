// Copyright 2025 Selk S.L.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use thiserror::Error;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Unique identifier for a bus registration
pub type RegistrationId = Uuid;

/// An action-addressed notification on the host's broadcast mechanism.
///
/// Mirrors the shape of an operating-system broadcast: an action string plus
/// string-keyed extras.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signal {
    pub action: String,
    pub extras: HashMap<String, String>,
}

impl Signal {
    pub fn new(action: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            extras: HashMap::new(),
        }
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extras.insert(key.into(), value.into());
        self
    }

    pub fn extra(&self, key: &str) -> Option<&str> {
        self.extras.get(key).map(String::as_str)
    }
}

/// Error type for signal bus operations
#[derive(Error, Debug)]
pub enum SignalBusError {
    /// The registration with the specified ID was not found
    #[error("Registration {0} not found")]
    RegistrationNotFound(RegistrationId),

    /// The host rejected the outbound broadcast
    #[error("Broadcast rejected: {0}")]
    Rejected(String),
}

/// A live registration handed out by [`SignalBus::register`]. Signals whose
/// action matches the registered one arrive on `signals`.
pub struct SignalRegistration {
    pub id: RegistrationId,
    pub signals: mpsc::UnboundedReceiver<Signal>,
}

/// Abstraction over the host's system-level publish/subscribe mechanism.
///
/// Nothing in the bridge depends on the concrete transport; hosts with a real
/// vendor broadcast bus implement this trait, tests and the bundled service
/// use [`LoopbackSignalBus`].
pub trait SignalBus: Send + Sync {
    /// Publish a signal to every listener registered for its action.
    fn broadcast(&self, signal: Signal) -> Result<(), SignalBusError>;

    /// Register a listener for one action and return its live registration.
    fn register(&self, action: &str) -> Result<SignalRegistration, SignalBusError>;

    /// Remove a listener previously handed out by [`SignalBus::register`].
    fn unregister(&self, id: RegistrationId) -> Result<(), SignalBusError>;
}

/// In-process signal bus delivering broadcasts over tokio channels.
pub struct LoopbackSignalBus {
    /// Map of registration IDs to the registered action and delivery sender
    listeners: Arc<Mutex<HashMap<RegistrationId, (String, mpsc::UnboundedSender<Signal>)>>>,
}

impl LoopbackSignalBus {
    pub fn new() -> Self {
        Self {
            listeners: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Number of currently registered listeners.
    pub fn registration_count(&self) -> usize {
        self.listeners.lock().unwrap().len()
    }
}

impl Default for LoopbackSignalBus {
    fn default() -> Self {
        Self::new()
    }
}

impl SignalBus for LoopbackSignalBus {
    fn broadcast(&self, signal: Signal) -> Result<(), SignalBusError> {
        let listeners = self.listeners.lock().unwrap();
        for (action, sender) in listeners.values() {
            if *action == signal.action {
                // A gone receiver only means the listener task is winding down
                let _ = sender.send(signal.clone());
            }
        }
        Ok(())
    }

    fn register(&self, action: &str) -> Result<SignalRegistration, SignalBusError> {
        let id = Uuid::new_v4();
        let (sender, receiver) = mpsc::unbounded_channel();
        self.listeners
            .lock()
            .unwrap()
            .insert(id, (action.to_string(), sender));
        Ok(SignalRegistration {
            id,
            signals: receiver,
        })
    }

    fn unregister(&self, id: RegistrationId) -> Result<(), SignalBusError> {
        self.listeners
            .lock()
            .unwrap()
            .remove(&id)
            .map(|_| ())
            .ok_or(SignalBusError::RegistrationNotFound(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn broadcast_reaches_matching_registration() {
        let bus = LoopbackSignalBus::new();
        let mut registration = bus.register("com.example.PING").unwrap();

        bus.broadcast(Signal::new("com.example.PING").with_extra("data", "x"))
            .unwrap();

        let signal = registration.signals.recv().await.unwrap();
        assert_eq!(signal.action, "com.example.PING");
        assert_eq!(signal.extra("data"), Some("x"));
    }

    #[tokio::test]
    async fn broadcast_skips_other_actions() {
        let bus = LoopbackSignalBus::new();
        let mut registration = bus.register("com.example.PING").unwrap();

        bus.broadcast(Signal::new("com.example.PONG")).unwrap();

        assert!(registration.signals.try_recv().is_err());
    }

    #[tokio::test]
    async fn unregister_removes_listener() {
        let bus = LoopbackSignalBus::new();
        let registration = bus.register("com.example.PING").unwrap();
        assert_eq!(bus.registration_count(), 1);

        bus.unregister(registration.id).unwrap();
        assert_eq!(bus.registration_count(), 0);

        // A second unregister for the same id reports the missing registration
        let err = bus.unregister(registration.id).unwrap_err();
        assert!(matches!(err, SignalBusError::RegistrationNotFound(id) if id == registration.id));
    }

    #[tokio::test]
    async fn broadcast_without_listeners_is_not_an_error() {
        let bus = LoopbackSignalBus::new();
        bus.broadcast(Signal::new("com.example.PING")).unwrap();
    }
}
