//! Wiring: build every service against shared collaborators and spawn one
//! consumer worker per topic group.
//!
//! Dependencies are threaded explicitly through constructors; there is no
//! process-wide initialisation to hide lifecycles behind.

use crate::audit::AuditWriter;
use crate::census::CensusService;
use crate::consumer::{BusConsumer, ConsumerMode};
use crate::dedup::DedupGuard;
use crate::gateway::InsurerGateway;
use crate::handlers::{
    CensusHandler, GatewayHandler, HandlerRegistry, HoldReleaseHandler, LedgerHandler,
    MessageHandler, OrchestratorHandler, SchedulerIngestHandler,
};
use crate::hold_release::HoldReleaseService;
use crate::ingest::IngestionService;
use crate::ledger::LedgerEngine;
use crate::orchestrator::Orchestrator;
use crate::scheduler::SmartScheduler;
use crate::store::Datastore;
use crate::topics;
use ems_config::EmsConfig;
use ems_connectors::{Clock, DocumentStore, InMemoryBus, KvStore, MemoryDocumentStore, MemoryKvStore};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// A fully wired in-process pipeline
pub struct EmsRuntime {
    pub config: EmsConfig,
    pub datastore: Arc<Datastore>,
    pub bus: InMemoryBus,
    pub kv: Arc<dyn KvStore>,
    pub documents: Arc<dyn DocumentStore>,
    pub clock: Arc<dyn Clock>,
    pub scheduler: Arc<SmartScheduler>,
    pub ledger: Arc<LedgerEngine>,
    pub ingestion: Arc<IngestionService>,
    pub registry: HandlerRegistry,
    workers: Vec<JoinHandle<()>>,
}

impl EmsRuntime {
    /// Start with in-memory collaborators
    pub fn start(config: EmsConfig, clock: Arc<dyn Clock>) -> Self {
        let documents: Arc<dyn DocumentStore> = Arc::new(MemoryDocumentStore::new());
        Self::start_with_documents(config, clock, documents)
    }

    /// Start with a caller-provided audit store (e.g. sled-backed)
    pub fn start_with_documents(
        config: EmsConfig,
        clock: Arc<dyn Clock>,
        documents: Arc<dyn DocumentStore>,
    ) -> Self {
        let datastore = Arc::new(Datastore::new());
        let kv: Arc<dyn KvStore> = Arc::new(MemoryKvStore::new(clock.clone()));
        let bus = InMemoryBus::new(clock.clone());
        let producer = Arc::new(bus.clone());

        let scheduler = Arc::new(SmartScheduler::new(
            kv.clone(),
            producer.clone(),
            clock.clone(),
            config.scheduler.window_seconds,
        ));
        let orchestrator = Arc::new(Orchestrator::new(
            datastore.clone(),
            producer.clone(),
            clock.clone(),
            &config.insurer,
            config.ledger.failed_debit_policy,
        ));
        let ledger = Arc::new(LedgerEngine::new(
            datastore.clone(),
            producer.clone(),
            kv.clone(),
            &config.ledger,
        ));
        let hold_release = Arc::new(HoldReleaseService::new(datastore.clone(), producer.clone()));
        let gateway = Arc::new(InsurerGateway::new(
            producer.clone(),
            AuditWriter::new(documents.clone()),
            reqwest::Client::new(),
            config.insurer.clone(),
        ));
        let census = Arc::new(CensusService::new(datastore.clone()));
        let ingestion = Arc::new(IngestionService::new(
            datastore.clone(),
            producer.clone(),
            DedupGuard::new(kv.clone(), config.dedup.ttl_seconds),
        ));

        let scheduler_handler = Arc::new(SchedulerIngestHandler::new(scheduler.clone()));
        let orchestrator_handler = Arc::new(OrchestratorHandler::new(orchestrator));
        let ledger_handler = Arc::new(LedgerHandler::new(ledger.clone()));
        let hold_release_handler = Arc::new(HoldReleaseHandler::new(hold_release));
        let gateway_handler = Arc::new(GatewayHandler::new(gateway));
        let census_handler = Arc::new(CensusHandler::new(census));

        let mut registry = HandlerRegistry::new();
        registry.register(scheduler_handler.clone());
        registry.register(orchestrator_handler.clone());
        registry.register(ledger_handler.clone());
        registry.register(hold_release_handler.clone());
        registry.register(gateway_handler.clone());
        registry.register(census_handler.clone());

        // One worker per topic group, each single-threaded over its
        // subscription so per-endorsement events stay ordered.
        let mut workers = Vec::new();
        let mut spawn_worker = |topics: &[&str], handler: Arc<dyn MessageHandler>| {
            let consumer =
                BusConsumer::new(bus.subscribe(topics), vec![handler], ConsumerMode::Single);
            workers.push(consumer.spawn());
        };
        spawn_worker(&[topics::ENDORSEMENT_INGESTED], scheduler_handler);
        spawn_worker(
            &[
                topics::ENDORSEMENT_PRIORITIZED,
                topics::LEDGER_FUNDS_LOCKED,
                topics::INSURER_SUCCESS,
            ],
            orchestrator_handler,
        );
        spawn_worker(&[topics::LEDGER_CHECK_FUNDS], ledger_handler);
        spawn_worker(&[topics::LEDGER_BALANCE_INCREASED], hold_release_handler);
        spawn_worker(
            &[topics::INSURER_REQUEST, topics::INSURER_REQUEST_RETRY],
            gateway_handler,
        );
        spawn_worker(&[topics::ENDORSEMENT_COMPLETED], census_handler);

        workers.push(
            scheduler
                .clone()
                .spawn_sweeper(Duration::from_secs(config.scheduler.sweep_interval_seconds)),
        );

        Self {
            config,
            datastore,
            bus,
            kv,
            documents,
            clock,
            scheduler,
            ledger,
            ingestion,
            registry,
            workers,
        }
    }

    /// Stop all workers
    pub fn shutdown(self) {
        for worker in self.workers {
            worker.abort();
        }
    }
}
