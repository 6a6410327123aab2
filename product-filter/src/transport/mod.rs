use async_trait::async_trait;
use thiserror::Error;

use product_filter_common::BusMessage;

#[cfg(test)]
pub(crate) mod memory;
pub mod tcp;

#[cfg(test)]
pub(crate) use memory::{MemoryListener, MemoryPublisher};
pub use tcp::{TcpPublisher, TcpSubscriber};

#[derive(Debug, Error)]
pub enum BusError {
    #[error("bus I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to encode or decode message: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("bus endpoint is closed")]
    Closed,
}

/// Inbound side. Messages flow into the queue handed over at construction.
#[async_trait]
pub trait Listener: Send {
    async fn stop(&mut self) -> Result<(), BusError>;
}

#[async_trait]
pub trait Publisher: Send {
    async fn publish(&mut self, message: &BusMessage) -> Result<(), BusError>;

    async fn stop(&mut self) -> Result<(), BusError>;
}
