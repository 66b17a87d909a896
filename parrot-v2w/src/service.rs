//! Async extraction service
//!
//! Each conversion runs on its own blocking worker thread; the async caller
//! only awaits the join handle. Progress flows back through the observer and
//! the shared [`EventBus`].

use crate::config::ExtractorConfig;
use crate::error::{ConvertError, Result};
use crate::pipeline::{ConversionOutcome, ConversionRequest, Pipeline, ProgressObserver};
use crate::resources::ResourceLedger;
use parrot_common::{ConversionEvent, EventBus};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Entry point for single-file conversions
#[derive(Debug, Clone)]
pub struct AudioExtractor {
    config: Arc<ExtractorConfig>,
    events: EventBus,
    ledger: ResourceLedger,
}

impl AudioExtractor {
    /// Create an extractor; the configuration is validated first
    pub fn new(config: ExtractorConfig) -> Result<Self> {
        config.validate()?;
        let events = EventBus::new(config.event_capacity);
        Ok(Self {
            config: Arc::new(config),
            events,
            ledger: ResourceLedger::new(),
        })
    }

    /// Account resources in `ledger` instead of a private one
    pub fn with_ledger(mut self, ledger: ResourceLedger) -> Self {
        self.ledger = ledger;
        self
    }

    pub fn config(&self) -> &ExtractorConfig {
        &self.config
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Subscribe to conversion events
    pub fn subscribe(&self) -> broadcast::Receiver<ConversionEvent> {
        self.events.subscribe()
    }

    pub fn ledger(&self) -> &ResourceLedger {
        &self.ledger
    }

    /// Build a pipeline for `request` sharing this extractor's bus and ledger
    pub fn pipeline(&self, request: ConversionRequest) -> Pipeline {
        Pipeline::new(
            request,
            Arc::clone(&self.config),
            self.events.clone(),
            self.ledger.clone(),
        )
    }

    /// Convert one file on a dedicated blocking worker
    pub async fn convert(
        &self,
        request: ConversionRequest,
        observer: Arc<dyn ProgressObserver>,
        cancel: CancellationToken,
    ) -> Result<ConversionOutcome> {
        let mut pipeline = self.pipeline(request);
        debug!(conversion_id = %pipeline.id(), "Dispatching conversion to blocking worker");

        tokio::task::spawn_blocking(move || pipeline.run(observer.as_ref(), &cancel))
            .await
            .map_err(|e| ConvertError::Worker(e.to_string()))?
    }

    /// Convert one file on the calling thread
    pub fn convert_blocking(
        &self,
        request: ConversionRequest,
        observer: &dyn ProgressObserver,
        cancel: &CancellationToken,
    ) -> Result<ConversionOutcome> {
        self.pipeline(request).run(observer, cancel)
    }
}
