use async_trait::async_trait;
use futures::future::join_all;
use std::net::SocketAddr;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{Duration, sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use product_filter_common::BusMessage;

use super::{BusError, Listener, Publisher};

const RECONNECT_INTERVAL: Duration = Duration::from_secs(5);
const PUBLISH_BUFFER: usize = 256;

/// Newline-delimited JSON subscriber, one connection per address,
/// reconnecting when it drops
pub struct TcpSubscriber {
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl TcpSubscriber {
    /// Start one reader per address. Messages whose subject starts with one
    /// of `topics` are pushed into `queue`, waiting while it is full.
    pub fn connect(
        addresses: &[String],
        topics: Vec<String>,
        queue: mpsc::Sender<BusMessage>,
    ) -> Self {
        let cancel = CancellationToken::new();
        let tasks = addresses
            .iter()
            .map(|address| {
                tokio::spawn(subscribe_loop(
                    address.clone(),
                    topics.clone(),
                    queue.clone(),
                    cancel.clone(),
                ))
            })
            .collect();

        Self { cancel, tasks }
    }
}

#[async_trait]
impl Listener for TcpSubscriber {
    async fn stop(&mut self) -> Result<(), BusError> {
        self.cancel.cancel();
        for result in join_all(self.tasks.drain(..)).await {
            if let Err(e) = result {
                warn!("Subscriber task ended abnormally: {}", e);
            }
        }
        Ok(())
    }
}

async fn subscribe_loop(
    address: String,
    topics: Vec<String>,
    queue: mpsc::Sender<BusMessage>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            result = read_messages(&address, &topics, &queue) => match result {
                Ok(()) => info!("Connection to {} closed by peer", address),
                Err(e) => warn!("Connection to {} failed: {}", address, e),
            },
        }

        if queue.is_closed() {
            debug!("Queue closed, subscriber for {} exiting", address);
            break;
        }

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = sleep(RECONNECT_INTERVAL) => {
                debug!("Reconnecting to {}...", address);
            }
        }
    }
}

async fn read_messages(
    address: &str,
    topics: &[String],
    queue: &mpsc::Sender<BusMessage>,
) -> Result<(), BusError> {
    let stream = TcpStream::connect(address).await?;
    info!("Subscribed to {} for topics {:?}", address, topics);

    let mut lines = BufReader::new(stream).lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }

        let message: BusMessage = match serde_json::from_str(&line) {
            Ok(message) => message,
            Err(e) => {
                warn!("Ignoring undecodable message from {}: {}", address, e);
                continue;
            }
        };
        if !message.matches_topic(topics) {
            debug!("Ignoring message on topic {}", message.subject);
            continue;
        }

        queue.send(message).await.map_err(|_| BusError::Closed)?;
    }

    Ok(())
}

/// Fans every message out to all connected subscribers
pub struct TcpPublisher {
    sender: broadcast::Sender<String>,
    cancel: CancellationToken,
    accept_task: Option<JoinHandle<()>>,
    local_addr: SocketAddr,
}

impl TcpPublisher {
    pub async fn bind(address: &str) -> Result<Self, BusError> {
        let listener = TcpListener::bind(address).await?;
        let local_addr = listener.local_addr()?;
        info!("Publishing on {}", local_addr);

        let (sender, _) = broadcast::channel(PUBLISH_BUFFER);
        let cancel = CancellationToken::new();
        let accept_task = tokio::spawn(accept_loop(listener, sender.clone(), cancel.clone()));

        Ok(Self {
            sender,
            cancel,
            accept_task: Some(accept_task),
            local_addr,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

#[async_trait]
impl Publisher for TcpPublisher {
    async fn publish(&mut self, message: &BusMessage) -> Result<(), BusError> {
        if self.cancel.is_cancelled() {
            return Err(BusError::Closed);
        }

        let mut line = serde_json::to_string(message)?;
        line.push('\n');
        match self.sender.send(line) {
            Ok(count) => debug!("Published {} to {} subscribers", message.subject, count),
            Err(_) => debug!("No subscribers for {}", message.subject),
        }
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), BusError> {
        self.cancel.cancel();
        if let Some(task) = self.accept_task.take() {
            if let Err(e) = task.await {
                warn!("Publisher accept task ended abnormally: {}", e);
            }
        }
        Ok(())
    }
}

async fn accept_loop(
    listener: TcpListener,
    sender: broadcast::Sender<String>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    debug!("Subscriber connected from {}", peer);
                    tokio::spawn(serve_subscriber(stream, peer, sender.subscribe(), cancel.clone()));
                }
                Err(e) => warn!("Failed to accept subscriber: {}", e),
            },
        }
    }
}

async fn serve_subscriber(
    mut stream: TcpStream,
    peer: SocketAddr,
    mut messages: broadcast::Receiver<String>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            received = messages.recv() => match received {
                Ok(line) => {
                    if let Err(e) = stream.write_all(line.as_bytes()).await {
                        debug!("Subscriber {} disconnected: {}", peer, e);
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("Subscriber {} lagging, {} messages dropped", peer, skipped);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }
    }
}
