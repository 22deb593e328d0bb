use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use super::http::{AssetRequest, AssetResponse, Fetcher};
use super::policy::FetchPolicy;
use super::storage::CacheStorage;
use super::WorkerConfig;

/// Buffer size for the worker's control channel.
const CHANNEL_BUFFER_SIZE: usize = 64;

/// How long `get_version` waits for the worker before giving up.
const VERSION_QUERY_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Installing,
    Waiting,
    Activating,
    Active,
}

impl std::fmt::Display for WorkerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkerState::Installing => write!(f, "installing"),
            WorkerState::Waiting => write!(f, "waiting"),
            WorkerState::Activating => write!(f, "activating"),
            WorkerState::Active => write!(f, "active"),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum WorkerError {
    #[error("Install failed: {0}")]
    Install(String),

    #[error("Activation failed: {0}")]
    Activate(String),

    #[error("Cannot {action} while {state}")]
    InvalidState {
        action: &'static str,
        state: WorkerState,
    },

    #[error("Asset worker has stopped")]
    Stopped,
}

enum WorkerMessage {
    Fetch {
        request: AssetRequest,
        reply: oneshot::Sender<Option<AssetResponse>>,
    },
    SkipWaiting,
    GetVersion {
        reply: oneshot::Sender<String>,
    },
    State {
        reply: oneshot::Sender<WorkerState>,
    },
    Settled {
        reply: oneshot::Sender<Result<WorkerState, WorkerError>>,
    },
}

/// The install and activation steps, detached from worker state so a
/// running worker can drive them in the background.
#[derive(Clone)]
struct Lifecycle {
    config: Arc<WorkerConfig>,
    storage: Arc<dyn CacheStorage>,
    fetcher: Arc<dyn Fetcher>,
}

impl Lifecycle {
    /// Fetch every manifest entry, then store them all. A failure caches
    /// nothing.
    async fn precache(&self) -> Result<(), WorkerError> {
        let bucket = self.config.bucket_name();
        info!(bucket = %bucket, entries = self.config.precache.len(), "Installing asset worker");

        let mut fetched = Vec::with_capacity(self.config.precache.len());
        for path in &self.config.precache {
            let url = self
                .config
                .origin
                .join(path)
                .map_err(|e| WorkerError::Install(format!("bad manifest path {}: {}", path, e)))?;
            let request = AssetRequest::navigate(url);
            let response = self
                .fetcher
                .fetch(&request)
                .await
                .map_err(|e| WorkerError::Install(format!("{}: {}", path, e)))?;
            if !response.is_ok() {
                return Err(WorkerError::Install(format!("{}: status {}", path, response.status)));
            }
            fetched.push((request.cache_key(), response));
        }

        self.storage
            .open(&bucket)
            .await
            .map_err(|e| WorkerError::Install(e.to_string()))?;
        for (key, response) in &fetched {
            self.storage
                .put(&bucket, key, response)
                .await
                .map_err(|e| WorkerError::Install(e.to_string()))?;
        }
        Ok(())
    }

    /// Delete every bucket other than the current one. A bucket that cannot
    /// be deleted is logged and skipped; only failing to list buckets at all
    /// is an error.
    async fn evict(&self) -> Result<usize, WorkerError> {
        let current = self.config.bucket_name();
        let names = self
            .storage
            .bucket_names()
            .await
            .map_err(|e| WorkerError::Activate(e.to_string()))?;

        let mut removed = 0;
        for name in names.into_iter().filter(|n| *n != current) {
            match self.storage.delete_bucket(&name).await {
                Ok(true) => {
                    info!(bucket = %name, "Deleted obsolete cache bucket");
                    removed += 1;
                }
                Ok(false) => {}
                Err(e) => warn!(bucket = %name, error = %e, "Could not delete obsolete cache bucket"),
            }
        }
        Ok(removed)
    }

    fn state_after_install(&self) -> WorkerState {
        if self.config.activate_immediately {
            WorkerState::Activating
        } else {
            WorkerState::Waiting
        }
    }
}

/// The worker itself. Drive the lifecycle directly with `install` and
/// `activate`, or hand it to `spawn` to run it in its own task.
pub struct AssetWorker {
    lifecycle: Lifecycle,
    policy: FetchPolicy,
    state: WorkerState,
}

impl AssetWorker {
    pub fn new(config: WorkerConfig, storage: Arc<dyn CacheStorage>, fetcher: Arc<dyn Fetcher>) -> Self {
        let config = Arc::new(config);
        let policy = FetchPolicy::new(Arc::clone(&config), Arc::clone(&storage), Arc::clone(&fetcher));
        Self {
            lifecycle: Lifecycle {
                config,
                storage,
                fetcher,
            },
            policy,
            state: WorkerState::Installing,
        }
    }

    pub fn state(&self) -> WorkerState {
        self.state
    }

    pub fn version(&self) -> &str {
        &self.lifecycle.config.version
    }

    /// Precache the manifest into the current bucket. A failed install
    /// caches nothing and leaves the worker `Installing`.
    pub async fn install(&mut self) -> Result<(), WorkerError> {
        if self.state != WorkerState::Installing {
            return Err(WorkerError::InvalidState {
                action: "install",
                state: self.state,
            });
        }
        self.lifecycle.precache().await?;
        self.state = self.lifecycle.state_after_install();
        debug!(state = %self.state, "Install complete");
        Ok(())
    }

    /// Delete every bucket other than the current one and start
    /// intercepting. Only an installed worker can activate. Returns the
    /// number of buckets removed.
    pub async fn activate(&mut self) -> Result<usize, WorkerError> {
        if !matches!(self.state, WorkerState::Waiting | WorkerState::Activating) {
            return Err(WorkerError::InvalidState {
                action: "activate",
                state: self.state,
            });
        }
        self.state = WorkerState::Activating;
        let removed = self.lifecycle.evict().await?;
        self.state = WorkerState::Active;
        info!(bucket = %self.lifecycle.config.bucket_name(), removed, "Asset worker active");
        Ok(removed)
    }

    /// Response for `request`, or `None` if the worker does not intercept it
    /// and the caller should go to the network directly.
    pub async fn handle_fetch(&self, request: &AssetRequest) -> Option<AssetResponse> {
        if self.state != WorkerState::Active || !FetchPolicy::intercepts(request) {
            return None;
        }
        Some(self.policy.respond(request).await)
    }

    /// Run the worker in a dedicated task until every handle is dropped.
    /// Install and activation proceed in the background; control messages
    /// are answered throughout.
    pub fn spawn(self) -> WorkerHandle {
        let (tx, rx) = mpsc::channel(CHANNEL_BUFFER_SIZE);
        let (steps, steps_rx) = mpsc::channel(1);
        let driver = Driver {
            worker: self,
            steps,
            step_running: false,
            last_error: None,
            settle_waiters: Vec::new(),
        };
        tokio::spawn(driver.run(rx, steps_rx));
        WorkerHandle { tx }
    }
}

enum StepOutcome {
    Installed(Result<(), WorkerError>),
    Activated(Result<usize, WorkerError>),
}

/// Message loop of a spawned worker.
struct Driver {
    worker: AssetWorker,
    steps: mpsc::Sender<StepOutcome>,
    step_running: bool,
    last_error: Option<WorkerError>,
    settle_waiters: Vec<oneshot::Sender<Result<WorkerState, WorkerError>>>,
}

impl Driver {
    async fn run(mut self, mut rx: mpsc::Receiver<WorkerMessage>, mut steps_rx: mpsc::Receiver<StepOutcome>) {
        match self.worker.state {
            WorkerState::Installing => self.start_install(),
            WorkerState::Activating => self.start_activation(),
            WorkerState::Waiting | WorkerState::Active => {}
        }

        loop {
            tokio::select! {
                Some(outcome) = steps_rx.recv() => self.finish_step(outcome),
                message = rx.recv() => match message {
                    Some(message) => self.handle(message),
                    None => break,
                },
            }
        }

        debug!("All worker handles dropped, asset worker stopped");
    }

    fn start_install(&mut self) {
        self.step_running = true;
        let lifecycle = self.worker.lifecycle.clone();
        let steps = self.steps.clone();
        tokio::spawn(async move {
            let outcome = lifecycle.precache().await;
            let _ = steps.send(StepOutcome::Installed(outcome)).await;
        });
    }

    fn start_activation(&mut self) {
        self.worker.state = WorkerState::Activating;
        self.step_running = true;
        let lifecycle = self.worker.lifecycle.clone();
        let steps = self.steps.clone();
        tokio::spawn(async move {
            let outcome = lifecycle.evict().await;
            let _ = steps.send(StepOutcome::Activated(outcome)).await;
        });
    }

    fn finish_step(&mut self, outcome: StepOutcome) {
        self.step_running = false;
        match outcome {
            StepOutcome::Installed(Ok(())) => {
                self.last_error = None;
                match self.worker.lifecycle.state_after_install() {
                    WorkerState::Activating => self.start_activation(),
                    next => self.worker.state = next,
                }
                debug!(state = %self.worker.state, "Install complete");
            }
            StepOutcome::Installed(Err(e)) => {
                error!(error = %e, "Asset worker install failed");
                self.last_error = Some(e);
            }
            StepOutcome::Activated(Ok(removed)) => {
                self.last_error = None;
                self.worker.state = WorkerState::Active;
                info!(bucket = %self.worker.lifecycle.config.bucket_name(), removed, "Asset worker active");
            }
            StepOutcome::Activated(Err(e)) => {
                error!(error = %e, "Asset worker activation failed");
                self.last_error = Some(e);
            }
        }

        if !self.step_running {
            let outcome = self.settled_outcome();
            for waiter in self.settle_waiters.drain(..) {
                let _ = waiter.send(outcome.clone());
            }
        }
    }

    fn settled_outcome(&self) -> Result<WorkerState, WorkerError> {
        match &self.last_error {
            Some(e) => Err(e.clone()),
            None => Ok(self.worker.state),
        }
    }

    fn handle(&mut self, message: WorkerMessage) {
        match message {
            WorkerMessage::Fetch { request, reply } => {
                if self.worker.state != WorkerState::Active || !FetchPolicy::intercepts(&request) {
                    let _ = reply.send(None);
                    return;
                }
                let policy = self.worker.policy.clone();
                tokio::spawn(async move {
                    let response = policy.respond(&request).await;
                    let _ = reply.send(Some(response));
                });
            }
            WorkerMessage::SkipWaiting => {
                if self.worker.state == WorkerState::Waiting {
                    info!("Skip waiting requested, activating");
                    self.start_activation();
                } else {
                    debug!(state = %self.worker.state, "Skip waiting ignored");
                }
            }
            WorkerMessage::GetVersion { reply } => {
                let _ = reply.send(self.worker.version().to_string());
            }
            WorkerMessage::State { reply } => {
                let _ = reply.send(self.worker.state);
            }
            WorkerMessage::Settled { reply } => {
                if self.step_running {
                    self.settle_waiters.push(reply);
                } else {
                    let _ = reply.send(self.settled_outcome());
                }
            }
        }
    }
}

/// Message channel into a running `AssetWorker`. Clone is cheap.
#[derive(Clone)]
pub struct WorkerHandle {
    tx: mpsc::Sender<WorkerMessage>,
}

impl WorkerHandle {
    /// `Ok(None)` means the request was not intercepted.
    pub async fn fetch(&self, request: AssetRequest) -> Result<Option<AssetResponse>, WorkerError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(WorkerMessage::Fetch { request, reply })
            .await
            .map_err(|_| WorkerError::Stopped)?;
        rx.await.map_err(|_| WorkerError::Stopped)
    }

    /// Fire-and-forget request to activate a waiting worker.
    pub fn skip_waiting(&self) {
        if let Err(e) = self.tx.try_send(WorkerMessage::SkipWaiting) {
            warn!(error = %e, "Could not deliver skip-waiting message");
        }
    }

    /// The worker's embedded version, or `None` if it does not answer
    /// within a second.
    pub async fn get_version(&self) -> Option<String> {
        let query = async {
            let (reply, rx) = oneshot::channel();
            self.tx.send(WorkerMessage::GetVersion { reply }).await.ok()?;
            rx.await.ok()
        };
        tokio::time::timeout(VERSION_QUERY_TIMEOUT, query).await.ok().flatten()
    }

    pub async fn state(&self) -> Result<WorkerState, WorkerError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(WorkerMessage::State { reply })
            .await
            .map_err(|_| WorkerError::Stopped)?;
        rx.await.map_err(|_| WorkerError::Stopped)
    }

    /// Wait until no install or activation step is in progress. Returns the
    /// state at that point, or the error of the step that last failed.
    pub async fn settled(&self) -> Result<WorkerState, WorkerError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(WorkerMessage::Settled { reply })
            .await
            .map_err(|_| WorkerError::Stopped)?;
        rx.await.map_err(|_| WorkerError::Stopped)?
    }
}
