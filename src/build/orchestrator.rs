//! Build orchestration
//!
//! Drives one spec from resolution to a committed image:
//!
//! ```text
//! Pending -> Resolving -> Preparing -> Executing(i) -> ... -> Binding -> Succeeded
//!                                        |    ^
//!                                        v    |
//!                                      Retrying(i)
//! ```
//!
//! Any state may end in `Failed` or `Cancelled`. Steps run strictly in
//! order inside a single build container; caches are locked per step.

use crate::binder::{bind, SPEC_LABEL};
use crate::build::result::BuildRecorder;
use crate::build::{BuildResult, BuildState, RetryPolicy};
use crate::cache::{CacheHandle, CacheStore};
use crate::catalog::ToolCatalog;
use crate::config::schema::Config;
use crate::config::ConfigManager;
use crate::error::{SandkitError, SandkitResult};
use crate::executor::{Fetcher, StepExecutor, StepOutcome};
use crate::orchestration::container::BUILD_LABEL;
use crate::orchestration::{
    BuildContainer, ContainerConfig, ContainerRuntime, ExecRequest, DEFAULT_PATH,
};
use crate::plan::{resolve, Step};
use crate::spec::ImageSpec;
use futures_util::future::join_all;
use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Keep-alive process of the build container
const KEEP_ALIVE: [&str; 3] = ["tail", "-f", "/dev/null"];

/// Cooperative cancellation, observed at step boundaries
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Progress notifications
#[derive(Debug, Clone, PartialEq)]
pub enum BuildEvent {
    State {
        image: String,
        state: BuildState,
    },
    StepStarted {
        image: String,
        index: usize,
        total: usize,
        description: String,
    },
    StepFinished {
        image: String,
        index: usize,
        outcome: StepOutcome,
        attempts: u32,
    },
    Output {
        image: String,
        line: String,
    },
}

type EventSink = Arc<dyn Fn(&BuildEvent) + Send + Sync>;

/// Builds sandbox images
pub struct Orchestrator {
    runtime: Arc<dyn ContainerRuntime>,
    executor: StepExecutor,
    store: Arc<CacheStore>,
    catalog: Arc<ToolCatalog>,
    retry: RetryPolicy,
    image_prefix: String,
    keep_failed: bool,
    cancel: CancelToken,
    events: Option<EventSink>,
}

impl Orchestrator {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        fetcher: Arc<dyn Fetcher>,
        store: Arc<CacheStore>,
    ) -> Self {
        Self {
            executor: StepExecutor::new(Arc::clone(&runtime), fetcher),
            runtime,
            store,
            catalog: Arc::new(ToolCatalog::with_builtins()),
            retry: RetryPolicy::default(),
            image_prefix: "sandkit".to_string(),
            keep_failed: false,
            cancel: CancelToken::new(),
            events: None,
        }
    }

    /// Orchestrator using the process-wide cache store and configured policies
    pub fn from_config(
        config: &Config,
        runtime: Arc<dyn ContainerRuntime>,
        fetcher: Arc<dyn Fetcher>,
    ) -> Self {
        let store = CacheStore::global(&ConfigManager::cache_root(config));
        Self::new(runtime, fetcher, store)
            .with_retry(RetryPolicy::from_config(&config.retry))
            .with_image_prefix(&config.runtime.image_prefix)
            .keep_failed(config.runtime.keep_failed)
    }

    pub fn with_catalog(mut self, catalog: Arc<ToolCatalog>) -> Self {
        self.catalog = catalog;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_image_prefix(mut self, prefix: &str) -> Self {
        self.image_prefix = prefix.to_string();
        self
    }

    /// Leave the build container in place when a build fails
    pub fn keep_failed(mut self, keep: bool) -> Self {
        self.keep_failed = keep;
        self
    }

    pub fn with_cancel_token(mut self, token: CancelToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn on_event(mut self, sink: impl Fn(&BuildEvent) + Send + Sync + 'static) -> Self {
        self.events = Some(Arc::new(sink));
        self
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn store(&self) -> &CacheStore {
        &self.store
    }

    /// Build several specs concurrently. Results keep the input order.
    pub async fn build_many(&self, specs: &[ImageSpec]) -> Vec<BuildResult> {
        join_all(specs.iter().map(|spec| self.build(spec))).await
    }

    /// Build one spec to a terminal result. Never panics on build errors;
    /// every failure is described by the result.
    pub async fn build(&self, spec: &ImageSpec) -> BuildResult {
        let mut rec = BuildRecorder::new(&spec.name);
        info!("Building {} (build {})", spec.name, rec.build_id());

        self.transition(&mut rec, &spec.name, BuildState::Resolving);
        let result = match resolve(spec, &self.catalog) {
            Err(e) => rec.fail(None, &e, 1),
            Ok(_) if self.cancel.is_cancelled() => rec.cancel(),
            Ok(steps) => self.provision(rec, spec, &steps).await,
        };

        if let Some(last) = result.transitions.last() {
            self.emit(BuildEvent::State {
                image: spec.name.clone(),
                state: last.state,
            });
        }
        result
    }

    /// Preparing through the terminal state, with container cleanup
    async fn provision(&self, mut rec: BuildRecorder, spec: &ImageSpec, steps: &[Step]) -> BuildResult {
        self.transition(&mut rec, &spec.name, BuildState::Preparing);
        let container = match self.prepare(&mut rec, spec, steps).await {
            Ok(container) => container,
            Err((e, attempts)) => return rec.fail(None, &e, attempts),
        };

        let result = self.execute_steps(rec, spec, steps, &container).await;

        if self.keep_failed && !result.is_success() {
            warn!("Keeping build container {} for inspection", container.id);
        } else if let Err(e) = self.runtime.remove(&container.id).await {
            warn!("Failed to remove build container {}: {}", container.id, e);
        }
        result
    }

    /// Make the base image available and start the build container
    async fn prepare(
        &self,
        rec: &mut BuildRecorder,
        spec: &ImageSpec,
        steps: &[Step],
    ) -> Result<BuildContainer, (SandkitError, u32)> {
        let image = spec.base_image.as_str();
        let present = self.runtime.image_exists(image).await.map_err(|e| (e, 1))?;
        if !present {
            let runtime = &self.runtime;
            self.run_with_retry(rec, &spec.name, None, || runtime.pull(image))
                .await?;
        }

        let mut mounts = Vec::new();
        let mut seen = BTreeSet::new();
        for mount in steps.iter().flat_map(|s| &s.mounts) {
            if seen.insert(mount.key.as_str()) {
                let host = self.store.prepare_dir(&mount.key).await.map_err(|e| (e, 1))?;
                mounts.push(mount.volume_arg(&host));
            }
        }

        let build_id = rec.build_id().simple().to_string();
        let mut labels = BTreeMap::new();
        labels.insert(BUILD_LABEL.to_string(), build_id.clone());
        labels.insert(SPEC_LABEL.to_string(), spec.name.clone());

        let config = ContainerConfig {
            image: spec.base_image.clone(),
            name: format!("sandkit-build-{}-{}", spec.name, &build_id[..8]),
            mounts,
            labels,
            command: KEEP_ALIVE.iter().map(|s| s.to_string()).collect(),
        };
        let id = self.runtime.create(&config).await.map_err(|e| (e, 1))?;

        let base_path = self.base_path(&id).await;
        debug!("Build container {} base PATH {}", id, base_path);
        Ok(BuildContainer { id, base_path })
    }

    /// PATH the base image runs with
    async fn base_path(&self, container_id: &str) -> String {
        let request = ExecRequest::new(vec!["printenv".to_string(), "PATH".to_string()]);
        match self.runtime.exec(container_id, &request, &|_: String| {}).await {
            Ok(output) if output.success() && !output.stdout().trim().is_empty() => {
                output.stdout().trim().to_string()
            }
            _ => DEFAULT_PATH.to_string(),
        }
    }

    async fn execute_steps(
        &self,
        mut rec: BuildRecorder,
        spec: &ImageSpec,
        steps: &[Step],
        container: &BuildContainer,
    ) -> BuildResult {
        let total = steps.len();
        let on_output = |line: String| {
            debug!(target: "sandkit::build::output", "[{}] {}", spec.name, line);
            self.emit(BuildEvent::Output {
                image: spec.name.clone(),
                line,
            });
        };

        for step in steps {
            if self.cancel.is_cancelled() {
                return rec.cancel();
            }

            self.transition(&mut rec, &spec.name, BuildState::Executing { step: step.index });
            self.emit(BuildEvent::StepStarted {
                image: spec.name.clone(),
                index: step.index,
                total,
                description: step.description.clone(),
            });

            let handles = match self.acquire(step).await {
                Ok(handles) => handles,
                Err(e) => return rec.fail(Some(step), &e, 0),
            };

            let executor = &self.executor;
            let outcome = self
                .run_with_retry(&mut rec, &spec.name, Some(step.index), || {
                    executor.execute(step, &handles, container, &on_output)
                })
                .await;
            drop(handles);

            match outcome {
                Ok((outcome, attempts)) => {
                    rec.step_succeeded(step, attempts, outcome);
                    self.emit(BuildEvent::StepFinished {
                        image: spec.name.clone(),
                        index: step.index,
                        outcome,
                        attempts,
                    });
                }
                Err((e, attempts)) => return rec.fail(Some(step), &e, attempts),
            }
        }

        if self.cancel.is_cancelled() {
            return rec.cancel();
        }

        self.transition(&mut rec, &spec.name, BuildState::Binding);
        let tag = spec.image_tag(&self.image_prefix);
        let Some(mut manifest) = bind(spec, steps, rec.succeeded_steps(), &container.base_path, tag)
        else {
            let err = SandkitError::Internal("binding an incomplete build".to_string());
            return rec.fail(None, &err, 1);
        };

        match self
            .runtime
            .commit(&container.id, &manifest.tag, &manifest.commit_changes())
            .await
        {
            Ok(image_id) => {
                manifest.image_id = Some(image_id);
                rec.succeed(manifest)
            }
            Err(e) => rec.fail(None, &e, 1),
        }
    }

    /// Lock a step's caches in key order, returned in mount order
    async fn acquire(&self, step: &Step) -> SandkitResult<Vec<CacheHandle>> {
        let mut order: Vec<usize> = (0..step.mounts.len()).collect();
        order.sort_by(|a, b| step.mounts[*a].key.cmp(&step.mounts[*b].key));

        let mut slots: Vec<Option<CacheHandle>> = step.mounts.iter().map(|_| None).collect();
        for i in order {
            slots[i] = Some(self.store.acquire(&step.mounts[i].key).await?);
        }
        Ok(slots.into_iter().flatten().collect())
    }

    /// Run `op` under the retry policy. Returns the value or the last error,
    /// with the number of attempts made.
    async fn run_with_retry<T, F, Fut>(
        &self,
        rec: &mut BuildRecorder,
        image: &str,
        step: Option<usize>,
        mut op: F,
    ) -> Result<(T, u32), (SandkitError, u32)>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = SandkitResult<T>>,
    {
        let mut attempt = 1;
        loop {
            let err = match op().await {
                Ok(value) => return Ok((value, attempt)),
                Err(e) => e,
            };

            if attempt >= self.retry.attempts_for(err.kind()) {
                return Err((err, attempt));
            }
            if self.cancel.is_cancelled() {
                return Err((SandkitError::Cancelled, attempt));
            }

            let delay = self.retry.delay(attempt);
            warn!(
                "[{}] attempt {} failed ({}), retrying in {:?}",
                image, attempt, err, delay
            );
            if let Some(index) = step {
                self.transition(
                    rec,
                    image,
                    BuildState::Retrying {
                        step: index,
                        attempt: attempt + 1,
                    },
                );
            }

            tokio::time::sleep(delay).await;
            if self.cancel.is_cancelled() {
                return Err((SandkitError::Cancelled, attempt));
            }

            attempt += 1;
            if let Some(index) = step {
                self.transition(rec, image, BuildState::Executing { step: index });
            }
        }
    }

    fn transition(&self, rec: &mut BuildRecorder, image: &str, state: BuildState) {
        rec.transition(state);
        self.emit(BuildEvent::State {
            image: image.to_string(),
            state,
        });
    }

    fn emit(&self, event: BuildEvent) {
        if let Some(sink) = &self.events {
            sink(&event);
        }
    }
}
