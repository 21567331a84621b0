//! Forward-only cursor over the rows of one execution.
//!
//! Rows arrive from the execution's driver task in batches over a bounded
//! channel. The cursor flattens them so batch boundaries are invisible to the
//! caller; a full channel pauses polling until the caller catches up.

use super::execution::{ExecutionShared, ExecutionState};
use crate::error::TrinoError;
use crate::transport::Column;
use crate::types::Row;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Single-pass cursor over an execution's rows in arrival order.
pub struct ResultCursor {
    shared: Arc<ExecutionShared>,
    receiver: mpsc::Receiver<Vec<Row>>,
    buffer: VecDeque<Row>,
    current: Option<Row>,
    exhausted: bool,
}

impl ResultCursor {
    pub(crate) fn new(shared: Arc<ExecutionShared>, receiver: mpsc::Receiver<Vec<Row>>) -> Self {
        Self {
            shared,
            receiver,
            buffer: VecDeque::new(),
            current: None,
            exhausted: false,
        }
    }

    /// Move to the next row.
    ///
    /// Returns `Ok(true)` when a row is available through [`current`](Self::current)
    /// and `Ok(false)` exactly once after the last row of a successful
    /// execution. Suspends while the execution is still fetching.
    ///
    /// # Errors
    ///
    /// - The execution's terminal error once buffered rows are drained; the
    ///   same error is returned on every later call
    /// - `TrinoError::Cancelled` as soon as cancellation was requested
    /// - `TrinoError::InvalidCursorState` after `Ok(false)` was returned
    pub async fn advance(&mut self) -> Result<bool, TrinoError> {
        if self.exhausted {
            return Err(TrinoError::InvalidCursorState(
                "result cursor is exhausted".to_string(),
            ));
        }

        if let Some(reason) = self.shared.cancel_requested() {
            if !matches!(
                self.shared.state(),
                ExecutionState::Succeeded | ExecutionState::Failed
            ) {
                self.current = None;
                return Err(TrinoError::Cancelled(reason));
            }
        }

        loop {
            if let Some(row) = self.buffer.pop_front() {
                self.current = Some(row);
                return Ok(true);
            }
            match self.receiver.recv().await {
                Some(batch) => self.buffer.extend(batch),
                None => break,
            }
        }

        // The driver records its terminal state before releasing the channel.
        self.current = None;
        match self.shared.state() {
            ExecutionState::Succeeded => {
                self.exhausted = true;
                Ok(false)
            }
            ExecutionState::Failed | ExecutionState::Cancelled => Err(self
                .shared
                .error()
                .unwrap_or_else(|| TrinoError::Protocol("execution ended without an error".to_string()))),
            state => Err(TrinoError::Protocol(format!(
                "execution stopped unexpectedly in state {}",
                state
            ))),
        }
    }

    /// The row the cursor is positioned on.
    ///
    /// # Errors
    ///
    /// Returns `TrinoError::InvalidCursorState` unless the last `advance`
    /// returned `Ok(true)`.
    pub fn current(&self) -> Result<&Row, TrinoError> {
        self.current.as_ref().ok_or_else(|| {
            TrinoError::InvalidCursorState("cursor is not positioned on a row".to_string())
        })
    }

    /// Column schema of the result.
    ///
    /// # Errors
    ///
    /// Returns `TrinoError::SchemaNotYetAvailable` before the first
    /// schema-bearing batch has been received.
    pub fn columns(&self) -> Result<Arc<[Column]>, TrinoError> {
        self.shared.columns().ok_or(TrinoError::SchemaNotYetAvailable)
    }

    /// Whether `advance` has reported the end of the result.
    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }
}

impl std::fmt::Debug for ResultCursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultCursor")
            .field("buffered", &self.buffer.len())
            .field("positioned", &self.current.is_some())
            .field("exhausted", &self.exhausted)
            .finish()
    }
}
