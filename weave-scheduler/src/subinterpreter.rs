use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::task::JoinSet;
use tracing::{debug, warn};

use weave_cache::ResultCache;
use weave_core::{
    BoxFuture, Captures, NodeId, QueryFunction, Resolution, Result, Runtime, Scheduler,
    SubinterpreterKey,
};

use crate::request::{RequestState, SubinterpreterRequest};

/// Configuration for the subinterpreter scheduler.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Maximum nested queries running at once.
    pub max_concurrent: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self { max_concurrent: 8 }
    }
}

#[derive(Default)]
struct Registry {
    /// Registration order.
    order: Vec<SubinterpreterKey>,
    requests: HashMap<SubinterpreterKey, SubinterpreterRequest>,
}

/// Registers nested queries on behalf of the constraint graph and runs them
/// as tokio tasks.
///
/// Registration is idempotent: the same call site under the same prompt maps
/// to one request no matter how often the graph is evaluated.
pub struct SubinterpreterScheduler {
    config: SchedulerConfig,
    registry: Mutex<Registry>,
    cache: Option<Arc<ResultCache>>,
}

impl SubinterpreterScheduler {
    pub fn new(config: SchedulerConfig) -> Self {
        // A limit of zero would never start a task.
        let config = SchedulerConfig {
            max_concurrent: config.max_concurrent.max(1),
        };
        Self {
            config,
            registry: Mutex::new(Registry::default()),
            cache: None,
        }
    }

    /// Memoize nested-query results in `cache`.
    pub fn with_cache(mut self, cache: Arc<ResultCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn len(&self) -> usize {
        self.registry().order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registry().order.is_empty()
    }

    pub fn state(&self, key: &SubinterpreterKey) -> Option<RequestState> {
        self.registry().requests.get(key).map(|r| r.state)
    }

    pub fn resolution(&self, key: &SubinterpreterKey) -> Option<Resolution> {
        self.registry()
            .requests
            .get(key)
            .and_then(|r| r.promise.peek().cloned())
    }

    /// Every resolution reached so far, in registration order.
    pub fn resolutions(&self) -> Vec<(SubinterpreterKey, Resolution)> {
        let registry = self.registry();
        registry
            .order
            .iter()
            .filter_map(|key| {
                let resolution = registry.requests.get(key)?.promise.peek()?.clone();
                Some((*key, resolution))
            })
            .collect()
    }

    fn registry(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Marks every waiting request running and returns what its task needs.
    fn take_waiting(&self) -> Vec<Job> {
        let mut registry = self.registry();
        let Registry { order, requests } = &mut *registry;
        let mut jobs = Vec::new();
        for key in order.iter() {
            let Some(request) = requests.get_mut(key) else {
                continue;
            };
            if request.state != RequestState::Waiting {
                continue;
            }
            request.state = RequestState::Running;
            jobs.push(Job {
                key: request.key,
                query: request.query.clone(),
                captures: request.captures.clone(),
                promise: request.promise.clone(),
            });
        }
        jobs
    }

    async fn run_jobs(&self, jobs: Vec<Job>) -> Result<usize> {
        let keys: Vec<SubinterpreterKey> = jobs.iter().map(|j| j.key).collect();
        let mut tasks = JoinSet::new();

        for job in jobs {
            while tasks.len() >= self.config.max_concurrent {
                reap(tasks.join_next().await);
            }
            tasks.spawn(job.run(self.cache.clone()));
        }
        while let Some(joined) = tasks.join_next().await {
            reap(Some(joined));
        }

        let mut registry = self.registry();
        let mut resolved = 0;
        for key in keys {
            let Some(request) = registry.requests.get_mut(&key) else {
                continue;
            };
            if !request.promise.is_resolved() {
                // The task panicked before resolving.
                let _ = request
                    .promise
                    .resolve(Resolution::Failed("nested query task aborted".into()));
            }
            request.state = RequestState::Finished;
            resolved += 1;
        }
        Ok(resolved)
    }
}

fn reap(joined: Option<std::result::Result<(), tokio::task::JoinError>>) {
    if let Some(Err(e)) = joined {
        warn!(error = %e, "nested query task failed to join");
    }
}

struct Job {
    key: SubinterpreterKey,
    query: Arc<dyn QueryFunction>,
    captures: Captures,
    promise: weave_core::Promise,
}

impl Job {
    async fn run(self, cache: Option<Arc<ResultCache>>) {
        let Job {
            key,
            query,
            captures,
            promise,
        } = self;
        debug!(key = %key, query = query.name(), "running nested query");

        let compute = || {
            let invoke = query.invoke(captures.clone());
            async move { invoke.await.map(|output| output.result()) }
        };
        let outcome = match cache {
            Some(cache) => {
                cache
                    .lookup_or_compute(query.source(), &captures, compute)
                    .await
            }
            None => compute().await,
        };

        let resolution = match outcome {
            Ok(value) => Resolution::Ready(value),
            Err(e) => {
                warn!(key = %key, query = query.name(), error = %e, "nested query failed");
                Resolution::Failed(e.to_string())
            }
        };
        if let Err(e) = promise.resolve(resolution) {
            warn!(key = %key, error = %e, "nested query resolved twice");
        }
    }
}

impl Runtime for SubinterpreterScheduler {
    fn subinterpreter(
        &self,
        call_site: NodeId,
        prompt: &str,
        query: &Arc<dyn QueryFunction>,
        captures: &Captures,
    ) -> SubinterpreterKey {
        let key = SubinterpreterKey::new(call_site, prompt);
        let mut registry = self.registry();
        if !registry.requests.contains_key(&key) {
            debug!(
                key = %key,
                query = query.name(),
                prompt_len = prompt.len(),
                "registered nested query"
            );
            registry.order.push(key);
            registry.requests.insert(
                key,
                SubinterpreterRequest::new(key, query.clone(), captures.clone()),
            );
        }
        key
    }
}

impl Scheduler for SubinterpreterScheduler {
    fn has_pending(&self) -> bool {
        self.registry()
            .requests
            .values()
            .any(|r| !r.promise.is_resolved())
    }

    fn run_pending(&self) -> BoxFuture<'_, Result<usize>> {
        Box::pin(async move {
            let jobs = self.take_waiting();
            if jobs.is_empty() {
                return Ok(0);
            }
            self.run_jobs(jobs).await
        })
    }

    fn resolution(&self, key: &SubinterpreterKey) -> Option<Resolution> {
        SubinterpreterScheduler::resolution(self, key)
    }

    fn forget(&self, keys: &[SubinterpreterKey]) -> usize {
        let mut registry = self.registry();
        let before = registry.requests.len();
        for key in keys {
            registry.requests.remove(key);
        }
        let Registry { order, requests } = &mut *registry;
        order.retain(|key| requests.contains_key(key));
        let removed = before - requests.len();
        if removed > 0 {
            debug!(removed, remaining = requests.len(), "forgot nested queries");
        }
        removed
    }
}
