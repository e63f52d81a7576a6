//! # Queue System
//!
//! Construction and wiring of the whole queue core: entity tables, advisory
//! queues, event publisher, API services, and the background reapers. The
//! reapers are independent consumers communicating with the API services
//! only through the entity store and the advisory queues; `start` spawns
//! them and `stop` shuts them down.

use chrono::Utc;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::info;

use crate::artifacts::{
    ArtifactDownload, ArtifactService, ArtifactsPage, CreateArtifactRequest,
    CreateArtifactResponse, SigningBackend, StaticSigner,
};
use crate::config::QueueConfig;
use crate::error::Result;
use crate::events::PublishedEvent;
use crate::models::{TaskDefinition, TaskStatus};
use crate::orchestration::claim_reaper::ClaimReaper;
use crate::orchestration::core::{DependentTasksPage, QueueCore, TaskGroupPage};
use crate::orchestration::deadline_reaper::DeadlineReaper;
use crate::orchestration::dependency_tracker::DependencyTracker;
use crate::orchestration::expiration::ExpirationReaper;
use crate::orchestration::task_initializer::TaskInitializer;
use crate::orchestration::task_resolver::TaskResolver;
use crate::orchestration::work_claimer::{TaskClaim, WorkClaimer};
use crate::scopes::ScopeChecker;
use crate::state_machine::ReasonResolved;

/// The assembled queue core: API operations plus background liveness
/// enforcement.
pub struct QueueSystem {
    core: Arc<QueueCore>,
    initializer: TaskInitializer,
    tracker: Arc<DependencyTracker>,
    claimer: WorkClaimer,
    resolver: TaskResolver,
    artifacts: Arc<ArtifactService>,
    claim_reaper: Arc<ClaimReaper>,
    deadline_reaper: Arc<DeadlineReaper>,
    expiration_reaper: Arc<ExpirationReaper>,
    shutdown: watch::Sender<bool>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl QueueSystem {
    /// Build a queue system with the default (static) storage signer.
    pub fn new(config: QueueConfig) -> Result<Self> {
        Self::with_signer(config, Arc::new(StaticSigner))
    }

    /// Build a queue system against an external storage signer.
    pub fn with_signer(config: QueueConfig, signer: Arc<dyn SigningBackend>) -> Result<Self> {
        config.validate()?;
        let storage = config.storage.clone();
        let core = QueueCore::new(config);
        let tracker = DependencyTracker::new(Arc::clone(&core));
        let artifacts = Arc::new(ArtifactService::new(Arc::clone(&core), signer, storage));
        let (shutdown, _) = watch::channel(false);

        Ok(Self {
            initializer: TaskInitializer::new(Arc::clone(&core), Arc::clone(&tracker)),
            claimer: WorkClaimer::new(Arc::clone(&core)),
            resolver: TaskResolver::new(Arc::clone(&core)),
            claim_reaper: Arc::new(ClaimReaper::new(Arc::clone(&core))),
            deadline_reaper: Arc::new(DeadlineReaper::new(Arc::clone(&core))),
            expiration_reaper: Arc::new(ExpirationReaper::new(
                Arc::clone(&core),
                Arc::clone(&artifacts),
            )),
            artifacts,
            tracker,
            core,
            shutdown,
            handles: Mutex::new(Vec::new()),
        })
    }

    /// Spawn the background loops: claim reaper, deadline reaper,
    /// dependency resolver, and expiration reaper.
    pub fn start(&self) {
        let mut handles = self.handles.lock();
        if !handles.is_empty() {
            return;
        }

        let claim_reaper = Arc::clone(&self.claim_reaper);
        let rx = self.shutdown.subscribe();
        handles.push(tokio::spawn(async move { claim_reaper.run(rx).await }));

        let deadline_reaper = Arc::clone(&self.deadline_reaper);
        let rx = self.shutdown.subscribe();
        handles.push(tokio::spawn(async move { deadline_reaper.run(rx).await }));

        let tracker = Arc::clone(&self.tracker);
        let rx = self.shutdown.subscribe();
        handles.push(tokio::spawn(async move { tracker.run(rx).await }));

        let expiration_reaper = Arc::clone(&self.expiration_reaper);
        let rx = self.shutdown.subscribe();
        handles.push(tokio::spawn(async move { expiration_reaper.run(rx).await }));

        info!("queue system started");
    }

    /// Signal the background loops to stop and wait for them.
    pub async fn stop(&self) {
        let _ = self.shutdown.send(true);
        let handles: Vec<JoinHandle<()>> = self.handles.lock().drain(..).collect();
        for handle in handles {
            let _ = handle.await;
        }
        info!("queue system stopped");
    }

    // -- task lifecycle ---------------------------------------------------

    pub async fn create_task(&self, task_id: &str, def: TaskDefinition) -> Result<TaskStatus> {
        self.initializer.create_task(task_id, def).await
    }

    pub async fn define_task(&self, task_id: &str, def: TaskDefinition) -> Result<TaskStatus> {
        self.initializer.define_task(task_id, def).await
    }

    pub async fn schedule_task(&self, task_id: &str) -> Result<TaskStatus> {
        self.tracker.schedule_task(task_id).await
    }

    pub async fn rerun_task(&self, task_id: &str) -> Result<TaskStatus> {
        self.resolver.rerun_task(task_id).await
    }

    pub async fn cancel_task(&self, task_id: &str) -> Result<TaskStatus> {
        self.resolver.cancel_task(task_id).await
    }

    pub async fn status(&self, task_id: &str) -> Result<TaskStatus> {
        Ok(self.core.load_task(task_id).await?.status())
    }

    pub async fn get_task(&self, task_id: &str) -> Result<TaskDefinition> {
        Ok(self.core.load_task(task_id).await?.definition())
    }

    // -- worker interface -------------------------------------------------

    pub async fn claim_work(
        &self,
        task_queue_id: &str,
        worker_group: &str,
        worker_id: &str,
        count: usize,
    ) -> Result<Vec<TaskClaim>> {
        self.claimer
            .claim_work(task_queue_id, worker_group, worker_id, count)
            .await
    }

    pub async fn claim_task(
        &self,
        task_id: &str,
        run_id: usize,
        worker_group: &str,
        worker_id: &str,
    ) -> Result<TaskClaim> {
        self.claimer
            .claim_task(task_id, run_id, worker_group, worker_id, None)
            .await
    }

    pub async fn reclaim_task(
        &self,
        task_id: &str,
        run_id: usize,
        worker_group: &str,
        worker_id: &str,
    ) -> Result<TaskClaim> {
        self.claimer
            .reclaim_task(task_id, run_id, worker_group, worker_id)
            .await
    }

    pub async fn report_completed(&self, task_id: &str, run_id: usize) -> Result<TaskStatus> {
        self.resolver.report_completed(task_id, run_id).await
    }

    pub async fn report_failed(&self, task_id: &str, run_id: usize) -> Result<TaskStatus> {
        self.resolver.report_failed(task_id, run_id).await
    }

    pub async fn report_exception(
        &self,
        task_id: &str,
        run_id: usize,
        reason: ReasonResolved,
    ) -> Result<TaskStatus> {
        self.resolver.report_exception(task_id, run_id, reason).await
    }

    // -- artifacts --------------------------------------------------------

    pub async fn create_artifact(
        &self,
        task_id: &str,
        run_id: usize,
        name: &str,
        request: CreateArtifactRequest,
    ) -> Result<CreateArtifactResponse> {
        self.artifacts
            .create_artifact(task_id, run_id, name, request)
            .await
    }

    pub async fn get_artifact(
        &self,
        task_id: &str,
        run_id: usize,
        name: &str,
        scopes: &dyn ScopeChecker,
    ) -> Result<ArtifactDownload> {
        self.artifacts.get_artifact(task_id, run_id, name, scopes).await
    }

    pub async fn get_latest_artifact(
        &self,
        task_id: &str,
        name: &str,
        scopes: &dyn ScopeChecker,
    ) -> Result<ArtifactDownload> {
        self.artifacts.get_latest_artifact(task_id, name, scopes).await
    }

    pub async fn list_artifacts(
        &self,
        task_id: &str,
        run_id: usize,
        continuation_token: Option<&str>,
        limit: usize,
    ) -> Result<ArtifactsPage> {
        self.artifacts
            .list_artifacts(task_id, run_id, continuation_token, limit)
            .await
    }

    pub async fn list_latest_artifacts(
        &self,
        task_id: &str,
        continuation_token: Option<&str>,
        limit: usize,
    ) -> Result<ArtifactsPage> {
        self.artifacts
            .list_latest_artifacts(task_id, continuation_token, limit)
            .await
    }

    // -- listings and introspection ---------------------------------------

    pub async fn list_task_group(
        &self,
        task_group_id: &str,
        continuation_token: Option<&str>,
        limit: usize,
    ) -> Result<TaskGroupPage> {
        self.core
            .list_task_group(task_group_id, continuation_token, limit)
            .await
    }

    pub async fn list_dependent_tasks(
        &self,
        task_id: &str,
        continuation_token: Option<&str>,
        limit: usize,
    ) -> Result<DependentTasksPage> {
        self.core
            .list_dependent_tasks(task_id, continuation_token, limit)
            .await
    }

    /// Approximate count of pending runs for a worker pool.
    pub async fn pending_tasks(&self, provisioner_id: &str, worker_type: &str) -> Result<usize> {
        self.core
            .queue_service
            .pending_count(&format!("{provisioner_id}/{worker_type}"))
            .await
    }

    /// Subscribe to lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<PublishedEvent> {
        self.core.publisher.subscribe()
    }

    // -- direct access for embedding and tests ----------------------------

    pub fn core(&self) -> &Arc<QueueCore> {
        &self.core
    }

    pub fn claim_reaper(&self) -> &ClaimReaper {
        &self.claim_reaper
    }

    pub fn deadline_reaper(&self) -> &DeadlineReaper {
        &self.deadline_reaper
    }

    pub fn dependency_tracker(&self) -> &DependencyTracker {
        &self.tracker
    }

    pub fn expiration_reaper(&self) -> &ExpirationReaper {
        &self.expiration_reaper
    }

    /// Run one pass of every reaper, in the order deadline → claim →
    /// dependency → expiration. Embeddings without spawned loops can call
    /// this on their own schedule.
    pub async fn reap_once(&self) -> Result<()> {
        self.deadline_reaper.process_once().await?;
        self.claim_reaper.process_once().await?;
        self.tracker.process_once().await?;
        self.expiration_reaper.process_once(Utc::now()).await?;
        Ok(())
    }
}
