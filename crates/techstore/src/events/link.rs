//! Connection state shared by the producer and consumers of one bus.

use std::sync::Arc;

use tokio::sync::Mutex;

use techstore_core::connection::{ConnectionState, ConnectionStateCell};
use techstore_core::events::{Broker, BrokerError};

use super::{EventBusError, Result};

pub(crate) struct BrokerLink {
    broker: Arc<dyn Broker>,
    state: ConnectionStateCell,
    gate: Mutex<()>,
}

impl BrokerLink {
    pub(crate) fn new(broker: Arc<dyn Broker>) -> Self {
        Self {
            broker,
            state: ConnectionStateCell::default(),
            gate: Mutex::new(()),
        }
    }

    pub(crate) fn broker(&self) -> &dyn Broker {
        self.broker.as_ref()
    }

    pub(crate) fn state(&self) -> ConnectionState {
        self.state.get()
    }

    /// Connects if not connected yet. Concurrent callers share one attempt.
    ///
    /// A failed attempt leaves the link disconnected; the next call tries again.
    pub(crate) async fn ensure_connected(&self) -> Result<()> {
        if self.state.get() == ConnectionState::Connected {
            return Ok(());
        }

        let _gate = self.gate.lock().await;
        if !self
            .state
            .transition_from(ConnectionState::Disconnected, ConnectionState::Connecting)
        {
            return match self.state.get() {
                ConnectionState::Connected => Ok(()),
                other => Err(EventBusError::NotConnected(BrokerError::ConnectionFailed(
                    format!("broker link is {}", other),
                ))),
            };
        }

        match self.broker.connect().await {
            Ok(()) => {
                self.state.transition_from(ConnectionState::Connecting, ConnectionState::Connected);
                tracing::info!(broker = self.broker.name(), "Connected to event broker");
                Ok(())
            }
            Err(err) => {
                self.state.transition_from(ConnectionState::Connecting, ConnectionState::Disconnected);
                tracing::warn!(broker = self.broker.name(), error = %err, "Event broker connection failed");
                Err(EventBusError::NotConnected(err))
            }
        }
    }

    pub(crate) async fn disconnect(&self) -> Result<()> {
        let _gate = self.gate.lock().await;
        if self.state.get() != ConnectionState::Connected {
            return Ok(());
        }

        let outcome = self.broker.disconnect().await;
        self.state.transition_from(ConnectionState::Connected, ConnectionState::Disconnected);
        tracing::info!(broker = self.broker.name(), "Disconnected from event broker");
        outcome.map_err(EventBusError::Broker)
    }
}
