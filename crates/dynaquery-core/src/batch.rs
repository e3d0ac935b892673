//! Bulk operations: chunked writes, gets, and per-item updates.
//!
//! [`Batch`] splits work into store-sized chunks, runs them sequentially
//! or fanned out under a concurrency bound, resubmits partial leftovers
//! with linear backoff, and reports progress after every finished chunk.
//! A configurable error handler decides whether a failed chunk stops the
//! run; in parallel mode the first undismissed error is returned after
//! every task has joined.

use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use dynaquery_model::{CompiledBatchGet, CompiledQuery, Item, Key, Operation, WriteRequest};
use parking_lot::Mutex;
use tokio::sync::{Semaphore, mpsc};
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::config::EngineConfig;
use crate::error::{BuilderError, Error, Result};
use crate::executor::{Executor, ExecutorError, ExecutorErrorKind};
use crate::expression::{ExpressionCompiler, SetOperand};
use crate::model::{Model, key_of};
use crate::retry::RetryPolicy;
use crate::schema::{TAG_CREATED_AT, TAG_PROTECTED};

/// Store ceiling on writes per batch round trip.
const MAX_WRITE_CHUNK: usize = 25;
/// Store ceiling on keys per batch-get round trip.
const MAX_GET_CHUNK: usize = 100;
/// Rounds of resubmitting partial leftovers before giving up.
const MAX_UNPROCESSED_ATTEMPTS: u32 = 5;

fn unprocessed_backoff(attempt: u32) -> Duration {
    Duration::from_millis(u64::from(attempt) * 100).min(Duration::from_secs(2))
}

/// What a batch error handler tells the run to do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorDecision {
    /// Dismiss the failure and keep running remaining work.
    Continue,
    /// Treat the failure as fatal for the whole batch.
    Fail,
}

type ProgressFn = Arc<dyn Fn(usize, usize) + Send + Sync>;
type ErrorHandlerFn = Arc<dyn Fn(&Error) -> ErrorDecision + Send + Sync>;

/// Tuning and callbacks for one batch run.
#[derive(Clone)]
pub struct BatchOptions {
    max_batch_size: usize,
    parallel: bool,
    max_concurrency: usize,
    progress: Option<ProgressFn>,
    error_handler: Option<ErrorHandlerFn>,
    retry: RetryPolicy,
    deadline: Option<Duration>,
}

impl fmt::Debug for BatchOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchOptions")
            .field("max_batch_size", &self.max_batch_size)
            .field("parallel", &self.parallel)
            .field("max_concurrency", &self.max_concurrency)
            .field("progress", &self.progress.is_some())
            .field("error_handler", &self.error_handler.is_some())
            .field("retry", &self.retry)
            .field("deadline", &self.deadline)
            .finish()
    }
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            max_batch_size: MAX_WRITE_CHUNK,
            parallel: false,
            max_concurrency: 4,
            progress: None,
            error_handler: None,
            retry: RetryPolicy::default(),
            deadline: None,
        }
    }
}

impl BatchOptions {
    /// Derives options from the engine configuration.
    #[must_use]
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            max_batch_size: config.max_batch_size.clamp(1, MAX_WRITE_CHUNK),
            max_concurrency: config.max_concurrency.max(1),
            retry: config.retry.clone(),
            ..Self::default()
        }
    }

    /// Sets the write chunk size, clamped to the store ceiling.
    #[must_use]
    pub fn max_batch_size(mut self, size: usize) -> Self {
        self.max_batch_size = size.clamp(1, MAX_WRITE_CHUNK);
        self
    }

    /// Enables or disables concurrent chunk execution.
    #[must_use]
    pub fn parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    /// Bounds the number of chunks in flight at once.
    #[must_use]
    pub fn max_concurrency(mut self, concurrency: usize) -> Self {
        self.max_concurrency = concurrency.max(1);
        self
    }

    /// Registers a callback invoked with `(done, total)` item counts
    /// after each finished chunk.
    #[must_use]
    pub fn on_progress(mut self, callback: impl Fn(usize, usize) + Send + Sync + 'static) -> Self {
        self.progress = Some(Arc::new(callback));
        self
    }

    /// Registers a handler consulted on each chunk failure.
    #[must_use]
    pub fn on_error(
        mut self,
        handler: impl Fn(&Error) -> ErrorDecision + Send + Sync + 'static,
    ) -> Self {
        self.error_handler = Some(Arc::new(handler));
        self
    }

    /// Overrides the transient-failure retry schedule.
    #[must_use]
    pub fn retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = policy;
        self
    }

    /// Bounds the whole batch run.
    #[must_use]
    pub fn timeout(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }
}

/// Bulk executor for one model's table.
pub struct Batch<M: Model> {
    executor: Arc<dyn Executor>,
    options: BatchOptions,
    _model: PhantomData<M>,
}

impl<M: Model> fmt::Debug for Batch<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Batch")
            .field("table", &M::schema().table_name())
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl<M: Model> Batch<M> {
    /// Creates a batch runner with default options.
    #[must_use]
    pub fn new(executor: Arc<dyn Executor>) -> Self {
        Self {
            executor,
            options: BatchOptions::default(),
            _model: PhantomData,
        }
    }

    /// Replaces the run options.
    #[must_use]
    pub fn with_options(mut self, options: BatchOptions) -> Self {
        self.options = options;
        self
    }

    /// Stores every model as a full item.
    pub async fn put_all(&self, models: &[M]) -> Result<()> {
        let mut writes = Vec::with_capacity(models.len());
        for model in models {
            writes.push(WriteRequest::put(model.to_item()?));
        }
        self.run_writes(writes).await
    }

    /// Deletes every model by its extracted primary key.
    pub async fn delete_all(&self, models: &[M]) -> Result<()> {
        let mut keys = Vec::with_capacity(models.len());
        for model in models {
            keys.push(key_of(model)?);
        }
        self.delete_keys(keys).await
    }

    /// Deletes the given primary keys.
    pub async fn delete_keys(&self, keys: Vec<Key>) -> Result<()> {
        self.run_writes(keys.into_iter().map(WriteRequest::delete).collect())
            .await
    }

    /// Fetches the given keys and decodes the found items.
    ///
    /// Results come back in caller key order; keys the store knows
    /// nothing about are omitted rather than erroring.
    pub async fn get_all(&self, keys: Vec<Key>) -> Result<Vec<M>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let total = keys.len();
        debug!(table = M::schema().table_name(), total, "batch get");
        let run = async {
            let mut fetched = Vec::with_capacity(keys.len());
            let mut done = 0usize;
            let table = M::schema().table_name();
            for chunk in keys.chunks(MAX_GET_CHUNK) {
                fetched.extend(
                    get_chunk(&self.executor, &self.options.retry, table, chunk.to_vec()).await?,
                );
                done += chunk.len();
                self.report_progress(done, total);
            }
            associate::<M>(&keys, fetched)
        };
        self.bounded("batch_get", run).await
    }

    /// Updates every model individually, retrying throttled writes.
    ///
    /// Field selection follows the single-item update rules: an empty
    /// list auto-discovers non-key fields the model carries a value for,
    /// skipping creation-timestamp and protected fields.
    pub async fn update_all(&self, models: &[M], fields: &[&str]) -> Result<()> {
        if models.is_empty() {
            return Ok(());
        }
        let total = models.len();
        let mut updates = Vec::with_capacity(models.len());
        for model in models {
            updates.push(compile_update(model, fields)?);
        }
        debug!(table = M::schema().table_name(), total, "batch update");
        let run = async {
            if self.options.parallel {
                self.run_updates_parallel(updates, total).await
            } else {
                self.run_updates_sequential(updates, total).await
            }
        };
        self.bounded("batch_update", run).await
    }

    // -- write plumbing ----------------------------------------------------

    async fn run_writes(&self, writes: Vec<WriteRequest>) -> Result<()> {
        if writes.is_empty() {
            return Ok(());
        }
        let total = writes.len();
        let chunks: Vec<Vec<WriteRequest>> = writes
            .chunks(self.options.max_batch_size.clamp(1, MAX_WRITE_CHUNK))
            .map(<[WriteRequest]>::to_vec)
            .collect();
        debug!(
            table = M::schema().table_name(),
            total,
            chunks = chunks.len(),
            "batch write"
        );
        let run = async {
            if self.options.parallel {
                self.run_chunks_parallel(chunks, total).await
            } else {
                self.run_chunks_sequential(chunks, total).await
            }
        };
        self.bounded("batch_write", run).await
    }

    async fn run_chunks_sequential(
        &self,
        chunks: Vec<Vec<WriteRequest>>,
        total: usize,
    ) -> Result<()> {
        let table = M::schema().table_name();
        let mut done = 0usize;
        for chunk in chunks {
            let len = chunk.len();
            if let Err(e) = write_chunk(&self.executor, &self.options.retry, table, chunk).await {
                match self.decide(&e) {
                    ErrorDecision::Continue => {}
                    ErrorDecision::Fail => return Err(e),
                }
            }
            done += len;
            self.report_progress(done, total);
        }
        Ok(())
    }

    async fn run_chunks_parallel(
        &self,
        chunks: Vec<Vec<WriteRequest>>,
        total: usize,
    ) -> Result<()> {
        let table = M::schema().table_name();
        let semaphore = Arc::new(Semaphore::new(self.options.max_concurrency));
        let (err_tx, mut err_rx) = mpsc::channel::<Error>(chunks.len().max(1));
        let done = Arc::new(Mutex::new(0usize));
        let mut tasks: JoinSet<()> = JoinSet::new();

        for chunk in chunks {
            let executor = self.executor.clone();
            let retry = self.options.retry.clone();
            let semaphore = semaphore.clone();
            let err_tx = err_tx.clone();
            let done = done.clone();
            let progress = self.options.progress.clone();
            let error_handler = self.options.error_handler.clone();
            let len = chunk.len();
            tasks.spawn(async move {
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return;
                };
                if let Err(e) = write_chunk(&executor, &retry, table, chunk).await {
                    let decision = error_handler.as_ref().map_or(ErrorDecision::Fail, |h| h(&e));
                    if decision == ErrorDecision::Fail {
                        let _ = err_tx.try_send(e);
                    }
                }
                let count = {
                    let mut done = done.lock();
                    *done += len;
                    *done
                };
                if let Some(progress) = &progress {
                    progress(count, total);
                }
            });
        }
        drop(err_tx);
        while tasks.join_next().await.is_some() {}
        match err_rx.try_recv() {
            Ok(e) => Err(e),
            Err(_) => Ok(()),
        }
    }

    // -- update plumbing ---------------------------------------------------

    async fn run_updates_sequential(
        &self,
        updates: Vec<CompiledQuery>,
        total: usize,
    ) -> Result<()> {
        let mut done = 0usize;
        for compiled in &updates {
            if let Err(e) = update_item(&self.executor, &self.options.retry, compiled).await {
                match self.decide(&e) {
                    ErrorDecision::Continue => {}
                    ErrorDecision::Fail => return Err(e),
                }
            }
            done += 1;
            self.report_progress(done, total);
        }
        Ok(())
    }

    async fn run_updates_parallel(
        &self,
        updates: Vec<CompiledQuery>,
        total: usize,
    ) -> Result<()> {
        let semaphore = Arc::new(Semaphore::new(self.options.max_concurrency));
        let (err_tx, mut err_rx) = mpsc::channel::<Error>(updates.len().max(1));
        let done = Arc::new(Mutex::new(0usize));
        let mut tasks: JoinSet<()> = JoinSet::new();

        for compiled in updates {
            let executor = self.executor.clone();
            let retry = self.options.retry.clone();
            let semaphore = semaphore.clone();
            let err_tx = err_tx.clone();
            let done = done.clone();
            let progress = self.options.progress.clone();
            let error_handler = self.options.error_handler.clone();
            tasks.spawn(async move {
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return;
                };
                if let Err(e) = update_item(&executor, &retry, &compiled).await {
                    let decision = error_handler.as_ref().map_or(ErrorDecision::Fail, |h| h(&e));
                    if decision == ErrorDecision::Fail {
                        let _ = err_tx.try_send(e);
                    }
                }
                let count = {
                    let mut done = done.lock();
                    *done += 1;
                    *done
                };
                if let Some(progress) = &progress {
                    progress(count, total);
                }
            });
        }
        drop(err_tx);
        while tasks.join_next().await.is_some() {}
        match err_rx.try_recv() {
            Ok(e) => Err(e),
            Err(_) => Ok(()),
        }
    }

    // -- shared ------------------------------------------------------------

    fn decide(&self, err: &Error) -> ErrorDecision {
        self.options
            .error_handler
            .as_ref()
            .map_or(ErrorDecision::Fail, |h| h(err))
    }

    fn report_progress(&self, done: usize, total: usize) {
        if let Some(progress) = &self.options.progress {
            progress(done, total);
        }
    }

    async fn bounded<T>(
        &self,
        operation: &str,
        run: impl Future<Output = Result<T>>,
    ) -> Result<T> {
        match self.options.deadline {
            Some(deadline) => tokio::time::timeout(deadline, run).await.unwrap_or_else(|_| {
                Err(Error::DeadlineExceeded {
                    operation: operation.to_owned(),
                })
            }),
            None => run.await,
        }
    }
}

/// Submits one write chunk, resubmitting partial leftovers until they
/// drain or the attempt budget runs out.
async fn write_chunk(
    executor: &Arc<dyn Executor>,
    retry: &RetryPolicy,
    table: &'static str,
    mut writes: Vec<WriteRequest>,
) -> Result<()> {
    let mut attempt = 0u32;
    loop {
        let result = retry
            .run("batch_write", || executor.execute_batch_write(table, &writes))
            .await
            .map_err(Error::Executor)?;
        let leftover: Vec<WriteRequest> = result.unprocessed_items.into_values().flatten().collect();
        if leftover.is_empty() {
            return Ok(());
        }
        if attempt >= MAX_UNPROCESSED_ATTEMPTS {
            return Err(Error::UnprocessedItems {
                remaining: leftover.len(),
                attempts: attempt,
            });
        }
        attempt += 1;
        let delay = unprocessed_backoff(attempt);
        warn!(
            table,
            remaining = leftover.len(),
            attempt,
            ?delay,
            "resubmitting unprocessed writes"
        );
        tokio::time::sleep(delay).await;
        writes = leftover;
    }
}

/// Fetches one key chunk, resubmitting unserved keys until they drain or
/// the attempt budget runs out.
async fn get_chunk(
    executor: &Arc<dyn Executor>,
    retry: &RetryPolicy,
    table: &'static str,
    mut keys: Vec<Key>,
) -> Result<Vec<Item>> {
    let mut items = Vec::new();
    let mut attempt = 0u32;
    loop {
        let request = CompiledBatchGet {
            table_name: table.to_owned(),
            keys: keys.clone(),
            ..CompiledBatchGet::default()
        };
        let result = retry
            .run("batch_get", || executor.execute_batch_get(&request))
            .await
            .map_err(Error::Executor)?;
        items.extend(result.responses.into_values().flatten());
        let leftover: Vec<Key> = result
            .unprocessed_keys
            .into_values()
            .flat_map(|ka| ka.keys)
            .collect();
        if leftover.is_empty() {
            return Ok(items);
        }
        if attempt >= MAX_UNPROCESSED_ATTEMPTS {
            return Err(Error::UnprocessedItems {
                remaining: leftover.len(),
                attempts: attempt,
            });
        }
        attempt += 1;
        let delay = unprocessed_backoff(attempt);
        warn!(
            table,
            remaining = leftover.len(),
            attempt,
            ?delay,
            "refetching unprocessed keys"
        );
        tokio::time::sleep(delay).await;
        keys = leftover;
    }
}

async fn update_item(
    executor: &Arc<dyn Executor>,
    retry: &RetryPolicy,
    compiled: &CompiledQuery,
) -> Result<()> {
    retry
        .run_if(
            "batch_update",
            |e| e.kind == ExecutorErrorKind::Throttled,
            || executor.execute_update_item(compiled),
        )
        .await
        .map_err(|e| Error::from_executor(Operation::UpdateItem, e))
}

/// Pairs fetched items with caller keys by their key attributes,
/// preserving caller order and dropping unmatched keys.
fn associate<M: Model>(keys: &[Key], items: Vec<Item>) -> Result<Vec<M>> {
    let primary = M::schema().primary_key();
    let mut remaining: Vec<(Key, Item)> = items
        .into_iter()
        .filter_map(|item| {
            let mut projected = Key::new();
            projected.insert(
                primary.partition_key.clone(),
                item.get(&primary.partition_key)?.clone(),
            );
            if let Some(sort) = &primary.sort_key {
                projected.insert(sort.clone(), item.get(sort)?.clone());
            }
            Some((projected, item))
        })
        .collect();

    let mut out = Vec::with_capacity(keys.len());
    for key in keys {
        if let Some(pos) = remaining.iter().position(|(k, _)| k == key) {
            let (_, item) = remaining.swap_remove(pos);
            out.push(M::from_item(&item)?);
        }
    }
    Ok(out)
}

fn compile_update<M: Model>(model: &M, fields: &[&str]) -> Result<CompiledQuery> {
    let schema = M::schema();
    let key = key_of(model)?;
    let names: Vec<&str> = if fields.is_empty() {
        schema
            .attributes()
            .iter()
            .filter(|a| {
                !schema.is_primary_key_attribute(&a.wire_name)
                    && !a.has_tag(TAG_CREATED_AT)
                    && !a.has_tag(TAG_PROTECTED)
            })
            .map(|a| a.name.as_str())
            .collect()
    } else {
        fields.to_vec()
    };
    let mut compiler = ExpressionCompiler::new();
    for name in names {
        if schema.attribute(name).is_some_and(|a| a.has_tag(TAG_PROTECTED)) {
            return Err(BuilderError::ProtectedField {
                field: name.to_owned(),
            }
            .into());
        }
        if let Some(value) = model.attribute(name) {
            compiler.push_set(schema.wire_name(name), SetOperand::Value(value))?;
        }
    }
    if !compiler.has_update_clauses() {
        return Err(BuilderError::EmptyUpdate.into());
    }
    let mut compiled = CompiledQuery::new(Operation::UpdateItem, schema.table_name());
    compiled.expressions = compiler.build();
    compiled.key = key;
    Ok(compiled)
}
