//! Statement lifecycle: submission, continuation polling and termination.
//!
//! Each execution is driven by one Tokio task. The task submits the
//! statement, follows the coordinator's `nextUri` chain and hands decoded rows
//! to the execution's [`ResultCursor`] over a bounded channel. Cancellation,
//! the statement timeout and the driving loop race in a single `select!`, so
//! a cancel takes effect at the next suspension point.

use super::cursor::ResultCursor;
use super::retry::RetryPolicy;
use crate::connection::auth::Authenticator;
use crate::connection::session::SessionContext;
use crate::error::{CancelReason, TransportError, TrinoError};
use crate::transport::messages::{QueryResults, StatementStats, Warning};
use crate::transport::{Column, CoordinatorRequest, CoordinatorResponse, HttpTransport};
use crate::types::{Row, RowDecoder};
use arrow::array::RecordBatch;
use arrow::datatypes::Schema;
use log::{debug, warn};
use parking_lot::Mutex;
use reqwest::header::HeaderMap;
use reqwest::Url;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Upper bound on waiting for the coordinator to acknowledge a cancel.
const CANCEL_NOTICE_TIMEOUT: Duration = Duration::from_secs(5);

/// Longest error body excerpt kept in an HTTP status error.
const MAX_ERROR_BODY_CHARS: usize = 256;

/// Lifecycle state of an execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionState {
    /// Created, not yet submitted
    Created,
    /// Statement submission in flight
    Submitting,
    /// Following continuation URIs
    Polling,
    /// Finished without error
    Succeeded,
    /// Finished with an error
    Failed,
    /// Stopped by cancellation, timeout, close or abandonment
    Cancelled,
}

impl ExecutionState {
    /// Whether the state is final.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ExecutionState::Succeeded | ExecutionState::Failed | ExecutionState::Cancelled
        )
    }

    /// Coarse status view of this state.
    pub fn status(self) -> ExecutionStatus {
        match self {
            ExecutionState::Created | ExecutionState::Submitting | ExecutionState::Polling => {
                ExecutionStatus::Running
            }
            ExecutionState::Succeeded => ExecutionStatus::Succeeded,
            ExecutionState::Failed => ExecutionStatus::Failed,
            ExecutionState::Cancelled => ExecutionStatus::Cancelled,
        }
    }
}

impl fmt::Display for ExecutionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionState::Created => write!(f, "CREATED"),
            ExecutionState::Submitting => write!(f, "SUBMITTING"),
            ExecutionState::Polling => write!(f, "POLLING"),
            ExecutionState::Succeeded => write!(f, "SUCCEEDED"),
            ExecutionState::Failed => write!(f, "FAILED"),
            ExecutionState::Cancelled => write!(f, "CANCELLED"),
        }
    }
}

/// Status of an execution as reported to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionStatus {
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

/// How the driver task ended.
#[derive(Debug)]
pub(crate) enum Outcome {
    Succeeded,
    Failed(TrinoError),
    Cancelled(CancelReason),
}

/// Rows and continuation extracted from one batch.
type BatchPlan = (Option<Vec<Vec<serde_json::Value>>>, Option<(Url, Duration)>);

#[derive(Default)]
struct ExecutionInner {
    query_id: Option<String>,
    info_uri: Option<String>,
    /// URI of the next poll; the target of a cancel notice
    next_uri: Option<Url>,
    columns: Option<Arc<[Column]>>,
    error: Option<TrinoError>,
    stats: Option<StatementStats>,
    update_type: Option<String>,
    update_count: Option<i64>,
    warnings: Vec<Warning>,
    cancel_reason: Option<CancelReason>,
}

/// State shared between an execution's handle, its cursor and its driver task.
pub(crate) struct ExecutionShared {
    id: u64,
    statement: String,
    state: watch::Sender<ExecutionState>,
    inner: Mutex<ExecutionInner>,
    cancel: CancellationToken,
}

impl ExecutionShared {
    pub(crate) fn new(id: u64, statement: String) -> Self {
        let (state, _) = watch::channel(ExecutionState::Created);
        Self {
            id,
            statement,
            state,
            inner: Mutex::new(ExecutionInner::default()),
            cancel: CancellationToken::new(),
        }
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn state(&self) -> ExecutionState {
        *self.state.borrow()
    }

    /// Move to `next` unless already terminal.
    fn transition(&self, next: ExecutionState) -> bool {
        self.state.send_if_modified(|current| {
            if current.is_terminal() || *current == next {
                false
            } else {
                *current = next;
                true
            }
        })
    }

    /// Ask the driver to stop. No-op once the execution is terminal.
    pub(crate) fn request_cancel(&self, reason: CancelReason) {
        if self.state().is_terminal() {
            return;
        }
        self.inner.lock().cancel_reason.get_or_insert(reason);
        self.cancel.cancel();
    }

    /// Reason of a requested cancellation, if one was requested.
    pub(crate) fn cancel_requested(&self) -> Option<CancelReason> {
        if self.cancel.is_cancelled() {
            Some(self.cancel_reason())
        } else {
            None
        }
    }

    fn cancel_reason(&self) -> CancelReason {
        self.inner.lock().cancel_reason.unwrap_or(CancelReason::Caller)
    }

    pub(crate) fn columns(&self) -> Option<Arc<[Column]>> {
        self.inner.lock().columns.clone()
    }

    pub(crate) fn error(&self) -> Option<TrinoError> {
        self.inner.lock().error.clone()
    }

    async fn wait_terminal(&self) -> ExecutionState {
        let mut receiver = self.state.subscribe();
        let terminal = match receiver.wait_for(|state| state.is_terminal()).await {
            Ok(state) => *state,
            Err(_) => self.state(),
        };
        terminal
    }

    /// Record the metadata of a batch and decide how to continue.
    ///
    /// A coordinator error wins over a simultaneous `nextUri`.
    fn record_batch(&self, batch: QueryResults, min_poll_delay: Duration) -> Result<BatchPlan, TrinoError> {
        let QueryResults {
            id,
            info_uri,
            next_uri,
            columns,
            data,
            stats,
            error,
            warnings,
            update_type,
            update_count,
            wait_hint_millis,
        } = batch;

        let mut inner = self.inner.lock();
        if !id.is_empty() {
            inner.query_id = Some(id);
        }
        if info_uri.is_some() {
            inner.info_uri = info_uri;
        }
        if stats.is_some() {
            inner.stats = stats;
        }
        if update_type.is_some() {
            inner.update_type = update_type;
        }
        if update_count.is_some() {
            inner.update_count = update_count;
        }
        inner.warnings.extend(warnings);

        if let Some(error) = error {
            inner.next_uri = None;
            return Err(TrinoError::Query(error.into()));
        }

        if let Some(columns) = columns {
            match &inner.columns {
                Some(existing) => {
                    let same = existing.len() == columns.len()
                        && existing
                            .iter()
                            .zip(columns.iter())
                            .all(|(a, b)| a.same_definition(b));
                    if !same {
                        return Err(TrinoError::Protocol(
                            "coordinator changed the column schema mid-query".to_string(),
                        ));
                    }
                }
                None => inner.columns = Some(columns.into()),
            }
        }

        let rows = match data {
            Some(rows) if !rows.is_empty() => {
                if inner.columns.is_none() {
                    return Err(TrinoError::Protocol(
                        "coordinator sent rows before the column schema".to_string(),
                    ));
                }
                Some(rows)
            }
            _ => None,
        };

        let next = match next_uri {
            Some(raw) => {
                let uri = parse_next_uri(&raw)?;
                inner.next_uri = Some(uri.clone());
                let hint = Duration::from_millis(wait_hint_millis.unwrap_or(0));
                Some((uri, hint.max(min_poll_delay)))
            }
            None => {
                inner.next_uri = None;
                None
            }
        };

        Ok((rows, next))
    }

    /// Store the terminal outcome and return the URI a cancel notice should
    /// be sent to, if any.
    pub(crate) fn complete(&self, outcome: Outcome) -> Option<Url> {
        let (state, notify) = {
            let mut inner = self.inner.lock();
            match outcome {
                Outcome::Succeeded => {
                    inner.next_uri = None;
                    (ExecutionState::Succeeded, None)
                }
                Outcome::Failed(err) => {
                    let notify = inner.next_uri.take();
                    inner.error = Some(err);
                    (ExecutionState::Failed, notify)
                }
                Outcome::Cancelled(reason) => {
                    inner.cancel_reason = Some(reason);
                    inner.error = Some(TrinoError::Cancelled(reason));
                    (ExecutionState::Cancelled, inner.next_uri.take())
                }
            }
        };
        self.transition(state);
        notify
    }
}

/// Everything the driver task needs besides the shared state.
#[derive(Clone)]
pub(crate) struct ExecutionContext {
    pub(crate) transport: Arc<dyn HttpTransport>,
    pub(crate) auth: Arc<dyn Authenticator>,
    pub(crate) decoder: Arc<dyn RowDecoder>,
    pub(crate) session: Arc<SessionContext>,
    pub(crate) statement_url: Url,
    pub(crate) submit_headers: HeaderMap,
    pub(crate) poll_headers: HeaderMap,
    pub(crate) retry: RetryPolicy,
    pub(crate) min_poll_delay: Duration,
    pub(crate) statement_timeout: Option<Duration>,
    pub(crate) max_buffered_batches: usize,
}

/// Start driving a statement on `runtime`.
pub(crate) fn spawn_execution(
    runtime: &Handle,
    id: u64,
    statement: String,
    ctx: ExecutionContext,
) -> (QueryExecution, JoinHandle<()>) {
    let shared = Arc::new(ExecutionShared::new(id, statement));
    let (sender, receiver) = mpsc::channel(ctx.max_buffered_batches.max(1));
    // A timeout past the clock's range means no deadline.
    let deadline = ctx
        .statement_timeout
        .and_then(|timeout| Instant::now().checked_add(timeout));
    let handle = runtime.spawn(run(Arc::clone(&shared), ctx, sender, deadline));
    (QueryExecution::new(shared, receiver), handle)
}

async fn run(
    shared: Arc<ExecutionShared>,
    ctx: ExecutionContext,
    sender: mpsc::Sender<Vec<Row>>,
    deadline: Option<Instant>,
) {
    let outcome = {
        let timeout = async move {
            match deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            biased;
            _ = shared.cancel.cancelled() => Outcome::Cancelled(shared.cancel_reason()),
            _ = timeout => {
                shared.request_cancel(CancelReason::Timeout);
                Outcome::Cancelled(shared.cancel_reason())
            }
            result = drive(&shared, &ctx, &sender) => match result {
                Ok(()) => Outcome::Succeeded,
                Err(TrinoError::Cancelled(reason)) => {
                    shared.request_cancel(reason);
                    Outcome::Cancelled(shared.cancel_reason())
                }
                Err(err) => Outcome::Failed(err),
            },
        }
    };

    match &outcome {
        Outcome::Succeeded => debug!("[TRINO_QUERY] Execution #{} succeeded", shared.id),
        Outcome::Failed(err) => debug!("[TRINO_QUERY] Execution #{} failed: {}", shared.id, err),
        Outcome::Cancelled(reason) => {
            debug!("[TRINO_QUERY] Execution #{} cancelled: {}", shared.id, reason)
        }
    }

    let notify = shared.complete(outcome);
    // Release the cursor before the cancel notice so readers are not held up.
    drop(sender);

    if let Some(uri) = notify {
        send_cancel_notice(&ctx, shared.id, uri).await;
    }
}

async fn drive(
    shared: &ExecutionShared,
    ctx: &ExecutionContext,
    sender: &mpsc::Sender<Vec<Row>>,
) -> Result<(), TrinoError> {
    shared.transition(ExecutionState::Submitting);

    let mut request = CoordinatorRequest::submit(ctx.statement_url.clone(), &shared.statement)
        .with_headers(&ctx.submit_headers);
    ctx.auth.decorate(&mut request)?;

    debug!(
        "[TRINO_QUERY] Submitting execution #{} (len={})",
        shared.id,
        shared.statement.len()
    );
    let started = Instant::now();
    // Never retried: the coordinator may already have accepted the statement.
    let response = ctx.transport.send(request).await?;
    let mut batch = read_results(ctx, response).await?;
    debug!(
        "[TRINO_QUERY] Execution #{} accepted as {} in {}ms",
        shared.id,
        batch.id,
        started.elapsed().as_millis()
    );

    loop {
        let (rows, next) = shared.record_batch(batch, ctx.min_poll_delay)?;
        if next.is_some() {
            shared.transition(ExecutionState::Polling);
        }

        if let Some(rows) = rows {
            let columns = shared.columns().ok_or_else(|| {
                TrinoError::Protocol("coordinator sent rows before the column schema".to_string())
            })?;
            let decoded = ctx.decoder.decode_batch(&columns, rows)?;
            if !decoded.is_empty() {
                sender
                    .send(decoded)
                    .await
                    .map_err(|_| TrinoError::Cancelled(CancelReason::Abandoned))?;
            }
        }

        let Some((uri, delay)) = next else {
            return Ok(());
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        batch = poll(ctx, shared.id, &uri).await?;
    }
}

/// Fetch one continuation URI, retrying transport faults per the policy.
async fn poll(ctx: &ExecutionContext, id: u64, uri: &Url) -> Result<QueryResults, TrinoError> {
    let mut attempt = 0u32;
    loop {
        let mut request = CoordinatorRequest::poll(uri.clone()).with_headers(&ctx.poll_headers);
        ctx.auth.decorate(&mut request)?;

        let result = match ctx.transport.send(request).await {
            Ok(response) => read_results(ctx, response).await,
            Err(err) => Err(TrinoError::Transport(err)),
        };

        match result {
            Err(TrinoError::Transport(err)) if err.is_retryable() => {
                if attempt >= ctx.retry.max_retries {
                    warn!(
                        "[TRINO_QUERY] Execution #{} giving up on {} after {} retries: {}",
                        id,
                        uri.path(),
                        attempt,
                        err
                    );
                    return Err(TrinoError::Transport(err));
                }
                attempt += 1;
                let backoff = ctx.retry.backoff(attempt);
                warn!(
                    "[TRINO_QUERY] Execution #{} poll failed: {} (retry {}/{} in {}ms)",
                    id,
                    err,
                    attempt,
                    ctx.retry.max_retries,
                    backoff.as_millis()
                );
                tokio::time::sleep(backoff).await;
            }
            other => return other,
        }
    }
}

/// Check the status, apply session headers and decode a `QueryResults` body.
async fn read_results(ctx: &ExecutionContext, response: CoordinatorResponse) -> Result<QueryResults, TrinoError> {
    let status = response.status;
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(TrinoError::Transport(TransportError::HttpStatus {
            status: status.as_u16(),
            message: error_excerpt(&body, status.canonical_reason()),
        }));
    }

    ctx.session.apply_response_headers(&response.headers);
    response.json::<QueryResults>().await
}

fn error_excerpt(body: &str, reason: Option<&str>) -> String {
    let body = body.trim();
    if body.is_empty() {
        return reason.unwrap_or("no response body").to_string();
    }
    let mut excerpt: String = body.chars().take(MAX_ERROR_BODY_CHARS).collect();
    if body.chars().count() > MAX_ERROR_BODY_CHARS {
        excerpt.push_str("...");
    }
    excerpt
}

fn parse_next_uri(raw: &str) -> Result<Url, TrinoError> {
    let uri = Url::parse(raw)
        .map_err(|e| TrinoError::Protocol(format!("invalid nextUri '{}': {}", raw, e)))?;
    match uri.scheme() {
        "http" | "https" => Ok(uri),
        scheme => Err(TrinoError::Protocol(format!(
            "nextUri has unsupported scheme '{}'",
            scheme
        ))),
    }
}

async fn send_cancel_notice(ctx: &ExecutionContext, id: u64, uri: Url) {
    let mut request = CoordinatorRequest::cancel(uri).with_headers(&ctx.poll_headers);
    if let Err(err) = ctx.auth.decorate(&mut request) {
        warn!("[TRINO_QUERY] Cannot send cancel for execution #{}: {}", id, err);
        return;
    }

    match tokio::time::timeout(CANCEL_NOTICE_TIMEOUT, ctx.transport.send(request)).await {
        Ok(Ok(response)) => debug!(
            "[TRINO_QUERY] Cancel for execution #{} answered {}",
            id,
            response.status.as_u16()
        ),
        Ok(Err(err)) => warn!(
            "[TRINO_QUERY] Cancel for execution #{} failed: {}",
            id, err
        ),
        Err(_) => warn!(
            "[TRINO_QUERY] Cancel for execution #{} timed out after {}s",
            id,
            CANCEL_NOTICE_TIMEOUT.as_secs()
        ),
    }
}

/// A running or finished statement execution.
///
/// Owns the result cursor. Dropping an unfinished execution cancels it.
pub struct QueryExecution {
    shared: Arc<ExecutionShared>,
    cursor: ResultCursor,
}

impl QueryExecution {
    fn new(shared: Arc<ExecutionShared>, receiver: mpsc::Receiver<Vec<Row>>) -> Self {
        let cursor = ResultCursor::new(Arc::clone(&shared), receiver);
        Self { shared, cursor }
    }

    pub(crate) fn shared(&self) -> Arc<ExecutionShared> {
        Arc::clone(&self.shared)
    }

    /// Statement text as submitted.
    pub fn statement(&self) -> &str {
        &self.shared.statement
    }

    /// Current status.
    pub fn status(&self) -> ExecutionStatus {
        self.shared.state().status()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ExecutionState {
        self.shared.state()
    }

    /// Coordinator query id, once the submission was answered.
    pub fn query_id(&self) -> Option<String> {
        self.shared.inner.lock().query_id.clone()
    }

    /// Link to the coordinator's web UI page for the query.
    pub fn info_uri(&self) -> Option<String> {
        self.shared.inner.lock().info_uri.clone()
    }

    /// Terminal error, if the execution failed or was cancelled.
    pub fn error(&self) -> Option<TrinoError> {
        self.shared.error()
    }

    /// Latest statistics reported by the coordinator.
    pub fn stats(&self) -> Option<StatementStats> {
        self.shared.inner.lock().stats.clone()
    }

    /// Statement kind reported for non-query statements, e.g. `INSERT`.
    pub fn update_type(&self) -> Option<String> {
        self.shared.inner.lock().update_type.clone()
    }

    /// Rows affected by a DML statement.
    pub fn update_count(&self) -> Option<i64> {
        self.shared.inner.lock().update_count
    }

    /// Warnings collected from all batches so far.
    pub fn warnings(&self) -> Vec<Warning> {
        self.shared.inner.lock().warnings.clone()
    }

    /// Cancel the execution.
    ///
    /// Polling stops at the next suspension point and a cancel notice is sent
    /// to the coordinator. No-op once the execution is terminal.
    pub fn cancel(&self) {
        self.shared.request_cancel(CancelReason::Caller);
    }

    /// A handle that can cancel this execution from another task.
    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Wait until the execution reaches a terminal state.
    ///
    /// An execution whose rows are not consumed pauses once its buffer is
    /// full, so drain the cursor or cancel before awaiting this.
    pub async fn finished(&self) -> ExecutionStatus {
        self.shared.wait_terminal().await.status()
    }

    /// Move the cursor to the next row. See [`ResultCursor::advance`].
    pub async fn advance(&mut self) -> Result<bool, TrinoError> {
        self.cursor.advance().await
    }

    /// The row the cursor is positioned on. See [`ResultCursor::current`].
    pub fn current(&self) -> Result<&Row, TrinoError> {
        self.cursor.current()
    }

    /// Column schema of the result. See [`ResultCursor::columns`].
    pub fn columns(&self) -> Result<Arc<[Column]>, TrinoError> {
        self.cursor.columns()
    }

    /// The underlying cursor.
    pub fn cursor(&mut self) -> &mut ResultCursor {
        &mut self.cursor
    }

    /// Drain all remaining rows.
    pub async fn fetch_all(&mut self) -> Result<Vec<Row>, TrinoError> {
        let mut rows = Vec::new();
        while self.cursor.advance().await? {
            rows.push(self.cursor.current()?.clone());
        }
        Ok(rows)
    }

    /// Drain all remaining rows into one Arrow record batch.
    ///
    /// Statements without a result schema yield an empty batch, and so does a
    /// cursor that was already drained.
    pub async fn fetch_record_batch(&mut self) -> Result<RecordBatch, TrinoError> {
        let rows = if self.cursor.is_exhausted() {
            Vec::new()
        } else {
            self.fetch_all().await?
        };
        match self.cursor.columns() {
            Ok(columns) => {
                let converter = crate::arrow_conversion::ArrowConverter::new(&columns);
                Ok(converter.convert(&rows)?)
            }
            Err(TrinoError::SchemaNotYetAvailable) => {
                Ok(RecordBatch::new_empty(Arc::new(Schema::empty())))
            }
            Err(err) => Err(err),
        }
    }
}

impl Drop for QueryExecution {
    fn drop(&mut self) {
        self.shared.request_cancel(CancelReason::Abandoned);
    }
}

impl fmt::Debug for QueryExecution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryExecution")
            .field("id", &self.shared.id)
            .field("query_id", &self.query_id())
            .field("state", &self.state())
            .field("cursor", &self.cursor)
            .finish()
    }
}

/// Cancels an execution from anywhere.
#[derive(Clone)]
pub struct CancelHandle {
    shared: Arc<ExecutionShared>,
}

impl CancelHandle {
    /// Cancel the execution. No-op once it is terminal.
    pub fn cancel(&self) {
        self.shared.request_cancel(CancelReason::Caller);
    }

    /// Whether the execution has reached a terminal state.
    pub fn is_finished(&self) -> bool {
        self.shared.state().is_terminal()
    }
}

impl fmt::Debug for CancelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelHandle")
            .field("id", &self.shared.id)
            .finish()
    }
}
