use anyhow::{Context, Result};
use chrono::Utc;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinError;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use product_filter_common::{BusMessage, outbound_data};

use crate::config::ServiceSettings;
use crate::module::area::AreaResolver;
use crate::module::filter::{FilterError, GranuleFilter};
use crate::module::orbit::OrbitPropagator;
use crate::module::registry::FileRegistry;
use crate::module::routing::{RouteError, RouteOutcome, route};
use crate::transport::{BusError, Listener, Publisher, TcpPublisher, TcpSubscriber};

/// Sender name on every announcement
pub const SENDER: &str = "product_filtering";
const ANNOUNCEMENT_TYPE: &str = "file";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunnerState {
    Starting,
    Running,
    Draining,
    Stopped,
}

/// Counters reported when the runner stops
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunnerStats {
    pub received: u64,
    pub inside: u64,
    pub outside: u64,
    pub routed: u64,
    pub duplicates: u64,
    pub failed: u64,
    pub published: u64,
}

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error(transparent)]
    Filter(#[from] FilterError),

    #[error(transparent)]
    Route(#[from] RouteError),

    #[error("failed to publish: {0}")]
    Bus(#[from] BusError),

    #[error("worker task failed: {0}")]
    Worker(#[from] JoinError),
}

/// Consumes granule notifications one at a time: filter, record, route,
/// announce.
pub struct ProductFilterRunner {
    settings: Arc<ServiceSettings>,
    propagator: Arc<dyn OrbitPropagator>,
    areas: Arc<dyn AreaResolver>,
    inbound: mpsc::Receiver<BusMessage>,
    listener: Option<Box<dyn Listener>>,
    publisher: Option<Box<dyn Publisher>>,
    registry: FileRegistry,
    cancel: CancellationToken,
    state: RunnerState,
    stats: RunnerStats,
}

impl ProductFilterRunner {
    pub fn new(
        settings: Arc<ServiceSettings>,
        propagator: Arc<dyn OrbitPropagator>,
        areas: Arc<dyn AreaResolver>,
        inbound: mpsc::Receiver<BusMessage>,
        listener: Box<dyn Listener>,
        publisher: Box<dyn Publisher>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            settings,
            propagator,
            areas,
            inbound,
            listener: Some(listener),
            publisher: Some(publisher),
            registry: FileRegistry::new(),
            cancel,
            state: RunnerState::Starting,
            stats: RunnerStats::default(),
        }
    }

    /// Build a runner on the TCP transport: subscribe to every configured
    /// address and bind the publish address.
    pub async fn start(
        settings: Arc<ServiceSettings>,
        propagator: Arc<dyn OrbitPropagator>,
        areas: Arc<dyn AreaResolver>,
        cancel: CancellationToken,
    ) -> Result<Self> {
        let (tx, rx) = mpsc::channel(settings.queue_capacity);
        let mut subscriber = TcpSubscriber::connect(
            &settings.subscribe_addresses,
            settings.message_types.clone(),
            tx,
        );

        let publisher = match TcpPublisher::bind(&settings.publish_address).await {
            Ok(publisher) => publisher,
            Err(e) => {
                if let Err(stop_err) = subscriber.stop().await {
                    warn!("Failed to stop subscriber: {}", stop_err);
                }
                return Err(e).with_context(|| {
                    format!("Failed to bind publisher on {}", settings.publish_address)
                });
            }
        };

        Ok(Self::new(
            settings,
            propagator,
            areas,
            rx,
            Box::new(subscriber),
            Box::new(publisher),
            cancel,
        ))
    }

    pub fn state(&self) -> RunnerState {
        self.state
    }

    pub fn registry(&self) -> &FileRegistry {
        &self.registry
    }

    /// Process messages until cancelled or the inbound queue closes, then
    /// shut the transport down.
    pub async fn run(&mut self) -> RunnerStats {
        self.state = RunnerState::Running;
        info!(
            "Service {} running, waiting for {:?}",
            self.settings.service, self.settings.message_types
        );

        let cancel = self.cancel.clone();
        let queue_wait = self.settings.queue_wait;
        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                received = timeout(queue_wait, self.inbound.recv()) => Some(received),
            };

            match next {
                None => {
                    info!("Shutdown requested");
                    break;
                }
                Some(Err(_)) => continue,
                Some(Ok(None)) => {
                    info!("Inbound queue closed");
                    break;
                }
                Some(Ok(Some(message))) => self.handle(message).await,
            }
        }

        self.close().await;
        info!("Service {} stopped: {:?}", self.settings.service, self.stats);
        self.stats.clone()
    }

    async fn handle(&mut self, message: BusMessage) {
        self.stats.received += 1;
        debug!("Message {} on {}", message.id, message.subject);

        match self.process(&message).await {
            Ok(RouteOutcome::Discarded) => self.stats.outside += 1,
            Ok(RouteOutcome::NoDestination) => self.stats.inside += 1,
            Ok(RouteOutcome::Copied(_)) => {
                self.stats.inside += 1;
                self.stats.routed += 1;
            }
            Ok(RouteOutcome::AlreadyPresent(_)) => {
                self.stats.inside += 1;
                self.stats.duplicates += 1;
            }
            Err(e) => {
                self.stats.failed += 1;
                log_failure(&message, &e);
            }
        }
    }

    async fn process(&mut self, message: &BusMessage) -> Result<RouteOutcome, ProcessError> {
        let settings = Arc::clone(&self.settings);
        let propagator = Arc::clone(&self.propagator);
        let areas = Arc::clone(&self.areas);
        let data = message.data.clone();

        let decision = tokio::task::spawn_blocking(move || {
            GranuleFilter::new(&settings, propagator.as_ref(), areas.as_ref())
                .filter(&data, Utc::now())
        })
        .await??;

        let scene_id = decision.granule.scene_id();
        self.registry.put(
            scene_id.clone(),
            decision.granule.source_path.display().to_string(),
        );
        debug!("Registry now holds {} scenes, latest {}", self.registry.len(), scene_id);

        let settings = Arc::clone(&self.settings);
        let (decision, outcome) = tokio::task::spawn_blocking(move || {
            let outcome = route(&decision, &settings);
            (decision, outcome)
        })
        .await?;
        let outcome = outcome?;

        if let Some(artifact) = outcome.artifact() {
            let data = outbound_data(&decision.granule.data, &artifact.path);
            let announcement = BusMessage::new(
                &self.settings.publish_topic,
                ANNOUNCEMENT_TYPE,
                SENDER,
                data,
            );

            if let Some(publisher) = self.publisher.as_mut() {
                publisher.publish(&announcement).await?;
                self.stats.published += 1;
                info!("Published {} on {}", artifact.filename, self.settings.publish_topic);
            }
        }

        Ok(outcome)
    }

    /// Stop listener and publisher. Safe to call more than once.
    pub async fn close(&mut self) {
        if self.state == RunnerState::Stopped {
            return;
        }
        self.state = RunnerState::Draining;

        if let Some(mut listener) = self.listener.take() {
            if let Err(e) = listener.stop().await {
                error!("Failed to stop listener: {}", e);
            }
        }
        if let Some(mut publisher) = self.publisher.take() {
            if let Err(e) = publisher.stop().await {
                error!("Failed to stop publisher: {}", e);
            }
        }

        self.state = RunnerState::Stopped;
    }
}

fn log_failure(message: &BusMessage, err: &ProcessError) {
    match err {
        ProcessError::Filter(FilterError::SceneNotSupported { .. }) => {
            info!("Skipping message {}: {}", message.id, err)
        }
        ProcessError::Filter(FilterError::InconsistentMessage(_))
        | ProcessError::Filter(FilterError::MissingSourceFile(_)) => {
            warn!("Rejected message {}: {}", message.id, err)
        }
        _ => error!("Failed to process message {}: {}", message.id, err),
    }
}
