//! Event dispatcher: feeds bus envelopes to the handlers registered for their
//! event type.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

use geotrack_core::{DispatcherConfig, Error, EventBus, EventEnvelope, Result};

use crate::handler::EventHandler;

/// Event emitted by the dispatcher.
#[derive(Debug, Clone)]
pub enum DispatcherEvent {
    Started,
    /// A handler finished an envelope successfully.
    Handled {
        event_type: String,
        handler: &'static str,
    },
    /// Validation, execution or timeout failure.
    Failed {
        event_type: String,
        handler: &'static str,
        error: String,
    },
    /// The bus receiver fell behind and skipped envelopes.
    Lagged(u64),
    Stopped,
}

/// Handle for controlling a running dispatcher.
pub struct DispatcherHandle {
    shutdown_tx: mpsc::Sender<()>,
    event_rx: broadcast::Receiver<DispatcherEvent>,
    task: JoinHandle<()>,
}

impl DispatcherHandle {
    /// Signal the dispatcher to shut down and wait for in-flight handlers.
    pub async fn shutdown(self) -> Result<()> {
        self.shutdown_tx
            .send(())
            .await
            .map_err(|_| Error::Internal("Failed to send shutdown signal".into()))?;
        self.task
            .await
            .map_err(|e| Error::Internal(format!("Dispatcher task failed: {}", e)))
    }

    /// Get a receiver for dispatcher events.
    pub fn events(&self) -> broadcast::Receiver<DispatcherEvent> {
        self.event_rx.resubscribe()
    }
}

/// Routes bus envelopes to handlers by `name()`.
pub struct EventDispatcher {
    bus: EventBus,
    config: DispatcherConfig,
    handlers: Vec<Arc<dyn EventHandler>>,
    event_tx: broadcast::Sender<DispatcherEvent>,
}

impl EventDispatcher {
    pub fn new(bus: EventBus, config: DispatcherConfig) -> Self {
        let (event_tx, _) = broadcast::channel(geotrack_core::defaults::EVENT_BUS_CAPACITY);
        Self {
            bus,
            config,
            handlers: Vec::new(),
            event_tx,
        }
    }

    /// Register a handler.
    pub fn with_handler<H: EventHandler + 'static>(self, handler: H) -> Self {
        self.with_shared_handler(Arc::new(handler))
    }

    /// Register an already shared handler.
    pub fn with_shared_handler(mut self, handler: Arc<dyn EventHandler>) -> Self {
        debug!(handler = handler.name(), "Registered event handler");
        self.handlers.push(handler);
        self
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }

    /// Subscribe to the bus and spawn the dispatch loop.
    ///
    /// The subscription is taken before this returns, so anything emitted
    /// afterwards is delivered.
    pub fn start(self) -> DispatcherHandle {
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel(1);
        let event_rx = self.event_tx.subscribe();
        let mut bus_rx = self.bus.subscribe();

        let task = tokio::spawn(async move {
            self.run(&mut bus_rx, &mut shutdown_rx).await;
        });

        DispatcherHandle {
            shutdown_tx,
            event_rx,
            task,
        }
    }

    async fn run(
        &self,
        bus_rx: &mut broadcast::Receiver<EventEnvelope>,
        shutdown_rx: &mut mpsc::Receiver<()>,
    ) {
        let max_concurrent = self.config.max_concurrent.max(1);
        info!(
            subsystem = "dispatch",
            handlers = self.handlers.len(),
            max_concurrent,
            "Event dispatcher started"
        );
        let _ = self.event_tx.send(DispatcherEvent::Started);

        let mut tasks = JoinSet::new();
        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!(subsystem = "dispatch", "Event dispatcher received shutdown signal");
                    break;
                }
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    if let Err(e) = joined {
                        error!(subsystem = "dispatch", error = ?e, "Handler task panicked");
                    }
                }
                received = bus_rx.recv(), if tasks.len() < max_concurrent => match received {
                    Ok(envelope) => self.dispatch(&mut tasks, envelope),
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(subsystem = "dispatch", skipped, "Event dispatcher lagged");
                        let _ = self.event_tx.send(DispatcherEvent::Lagged(skipped));
                    }
                    Err(RecvError::Closed) => {
                        info!(subsystem = "dispatch", "Event bus closed");
                        break;
                    }
                },
            }
        }

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                error!(subsystem = "dispatch", error = ?e, "Handler task panicked");
            }
        }
        let _ = self.event_tx.send(DispatcherEvent::Stopped);
        info!(subsystem = "dispatch", "Event dispatcher stopped");
    }

    fn dispatch(&self, tasks: &mut JoinSet<()>, envelope: EventEnvelope) {
        let envelope = Arc::new(envelope);
        let mut matched = false;
        for handler in self
            .handlers
            .iter()
            .filter(|h| h.can_handle(&envelope.event_type))
        {
            matched = true;
            let handler = handler.clone();
            let envelope = envelope.clone();
            let event_tx = self.event_tx.clone();
            let timeout = self.config.handler_timeout;
            tasks.spawn(async move {
                run_handler(handler, &envelope, timeout, &event_tx).await;
            });
        }
        if !matched {
            debug!(
                subsystem = "dispatch",
                event_type = %envelope.event_type,
                "No handler registered for event type"
            );
        }
    }
}

async fn run_handler(
    handler: Arc<dyn EventHandler>,
    envelope: &EventEnvelope,
    timeout: std::time::Duration,
    event_tx: &broadcast::Sender<DispatcherEvent>,
) {
    let start = Instant::now();
    let name = handler.name();

    let outcome = match handler.validate(&envelope.payload) {
        Err(e) => Err(e.to_string()),
        Ok(()) => match tokio::time::timeout(timeout, handler.execute(&envelope.payload)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(e.to_string()),
            Err(_) => Err(format!(
                "Handler exceeded timeout of {}s",
                timeout.as_secs()
            )),
        },
    };

    match outcome {
        Ok(()) => {
            debug!(
                subsystem = "dispatch",
                handler = name,
                event_type = %envelope.event_type,
                event_id = %envelope.event_id,
                duration_ms = start.elapsed().as_millis() as u64,
                "Event handled"
            );
            let _ = event_tx.send(DispatcherEvent::Handled {
                event_type: envelope.event_type.clone(),
                handler: name,
            });
        }
        Err(error) => {
            warn!(
                subsystem = "dispatch",
                handler = name,
                event_type = %envelope.event_type,
                event_id = %envelope.event_id,
                %error,
                duration_ms = start.elapsed().as_millis() as u64,
                "Event handling failed"
            );
            let _ = event_tx.send(DispatcherEvent::Failed {
                event_type: envelope.event_type.clone(),
                handler: name,
                error,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::NoOpHandler;
    use async_trait::async_trait;
    use geotrack_core::events::{AreaChanged, PointIngested, AREA_CHANGED, POINT_INGESTED};
    use geotrack_core::GeoBusEvent;
    use std::time::Duration;
    use uuid::Uuid;

    fn point_event() -> GeoBusEvent {
        GeoBusEvent::PointIngested(PointIngested {
            point_id: Uuid::now_v7(),
            subject_id: "device-1".into(),
            latitude: 1.0,
            longitude: 1.0,
            accuracy: 5.0,
            timestamp: 1_700_000_000_000,
        })
    }

    struct SlowHandler;

    #[async_trait]
    impl EventHandler for SlowHandler {
        fn name(&self) -> &'static str {
            POINT_INGESTED
        }

        fn validate(&self, _event: &GeoBusEvent) -> Result<()> {
            Ok(())
        }

        async fn execute(&self, _event: &GeoBusEvent) -> Result<()> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        }
    }

    async fn next_outcome(rx: &mut broadcast::Receiver<DispatcherEvent>) -> DispatcherEvent {
        loop {
            match rx.recv().await.unwrap() {
                DispatcherEvent::Started => continue,
                other => return other,
            }
        }
    }

    #[tokio::test]
    async fn test_routes_by_event_type() {
        let bus = EventBus::new(16);
        let handle = EventDispatcher::new(bus.clone(), DispatcherConfig::default())
            .with_handler(NoOpHandler::new(POINT_INGESTED))
            .start();
        let mut events = handle.events();

        bus.emit(point_event()).unwrap();
        match next_outcome(&mut events).await {
            DispatcherEvent::Handled {
                event_type,
                handler,
            } => {
                assert_eq!(event_type, POINT_INGESTED);
                assert_eq!(handler, POINT_INGESTED);
            }
            other => panic!("unexpected {:?}", other),
        }

        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_unmatched_event_is_ignored() {
        let bus = EventBus::new(16);
        let handle = EventDispatcher::new(bus.clone(), DispatcherConfig::default())
            .with_handler(NoOpHandler::new(AREA_CHANGED))
            .start();
        let mut events = handle.events();

        bus.emit(point_event()).unwrap();
        bus.emit(GeoBusEvent::AreaChanged(AreaChanged {
            area_id: Uuid::now_v7(),
            owner_id: "owner-1".into(),
            action: "updated".into(),
        }))
        .unwrap();

        match next_outcome(&mut events).await {
            DispatcherEvent::Handled { event_type, .. } => assert_eq!(event_type, AREA_CHANGED),
            other => panic!("unexpected {:?}", other),
        }
        handle.shutdown().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_handler_timeout_reported() {
        let bus = EventBus::new(16);
        let config = DispatcherConfig::default().with_handler_timeout(Duration::from_secs(1));
        let handle = EventDispatcher::new(bus.clone(), config)
            .with_handler(SlowHandler)
            .start();
        let mut events = handle.events();

        bus.emit(point_event()).unwrap();
        match next_outcome(&mut events).await {
            DispatcherEvent::Failed { error, .. } => assert!(error.contains("timeout")),
            other => panic!("unexpected {:?}", other),
        }
        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_emits_stopped() {
        let bus = EventBus::new(16);
        let handle = EventDispatcher::new(bus, DispatcherConfig::default()).start();
        let mut events = handle.events();
        handle.shutdown().await.unwrap();

        let mut saw_stopped = false;
        while let Ok(event) = events.try_recv() {
            if matches!(event, DispatcherEvent::Stopped) {
                saw_stopped = true;
            }
        }
        assert!(saw_stopped);
    }
}
