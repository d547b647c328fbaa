//! Messaging seams used by async scenarios.
//!
//! The engine needs very little from a broker: each virtual user opens its own
//! producer, and one consumer per scenario feeds the correlation store.

pub mod memory;

use std::fmt::Debug;

use async_trait::async_trait;
use bytes::Bytes;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("producer is closed")]
    Closed,

    #[error("transport error: {0}")]
    Other(#[source] BoxError),
}

impl TransportError {
    pub fn other<E>(err: E) -> Self
    where
        E: Into<BoxError>,
    {
        Self::Other(err.into())
    }
}

/// Outbound side owned by a single virtual user.
#[async_trait]
pub trait MessageProducer: Send + Sync {
    async fn send(
        &self,
        channel: &str,
        payload: Bytes,
        headers: &[(String, String)],
    ) -> Result<(), TransportError>;

    async fn close(&self);
}

/// Opens one producer per virtual user.
#[async_trait]
pub trait ProducerFactory: Send + Sync + Debug {
    async fn open(&self) -> Result<Box<dyn MessageProducer>, TransportError>;
}

/// Inbound stream of response payloads. `None` means the stream ended.
#[async_trait]
pub trait MessageConsumer: Send {
    async fn next(&mut self) -> Option<Result<Bytes, TransportError>>;
}
