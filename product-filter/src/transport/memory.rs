use async_trait::async_trait;
use std::sync::{Arc, Mutex};

use product_filter_common::BusMessage;

use super::{BusError, Listener, Publisher};

/// Collects published messages for inspection
#[derive(Debug, Clone, Default)]
pub struct MemoryPublisher {
    sent: Arc<Mutex<Vec<BusMessage>>>,
    stopped: Arc<Mutex<bool>>,
}

impl MemoryPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<BusMessage> {
        self.sent.lock().map(|sent| sent.clone()).unwrap_or_default()
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.lock().map(|stopped| *stopped).unwrap_or(false)
    }
}

#[async_trait]
impl Publisher for MemoryPublisher {
    async fn publish(&mut self, message: &BusMessage) -> Result<(), BusError> {
        if self.is_stopped() {
            return Err(BusError::Closed);
        }
        self.sent
            .lock()
            .map_err(|_| BusError::Closed)?
            .push(message.clone());
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), BusError> {
        if let Ok(mut stopped) = self.stopped.lock() {
            *stopped = true;
        }
        Ok(())
    }
}

/// Listener whose messages are injected directly into the runner queue.
/// Can be told to fail on stop.
#[derive(Debug, Clone, Default)]
pub struct MemoryListener {
    fail_on_stop: bool,
    stops: Arc<Mutex<usize>>,
}

impl MemoryListener {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            fail_on_stop: true,
            ..Self::default()
        }
    }

    /// Number of times `stop` was called
    pub fn stops(&self) -> usize {
        self.stops.lock().map(|stops| *stops).unwrap_or(0)
    }
}

#[async_trait]
impl Listener for MemoryListener {
    async fn stop(&mut self) -> Result<(), BusError> {
        if let Ok(mut stops) = self.stops.lock() {
            *stops += 1;
        }
        if self.fail_on_stop {
            return Err(BusError::Io(std::io::Error::other("listener refused to stop")));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Map;

    #[tokio::test]
    async fn test_publisher_rejects_after_stop() {
        let mut publisher = MemoryPublisher::new();
        let message = BusMessage::new("/IASI/L2/TWT/filtered", "file", "product_filtering", Map::new());

        publisher.publish(&message).await.unwrap();
        publisher.stop().await.unwrap();
        assert!(matches!(publisher.publish(&message).await, Err(BusError::Closed)));
        assert_eq!(publisher.sent().len(), 1);
    }

    #[tokio::test]
    async fn test_failing_listener_counts_stops() {
        let mut listener = MemoryListener::failing();
        let probe = listener.clone();
        assert!(listener.stop().await.is_err());
        assert_eq!(probe.stops(), 1);
    }
}
