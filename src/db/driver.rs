//! The transport boundary between sessions and a database.
//!
//! A [`DriverSession`] is a blocking request/response channel. Sessions call it
//! from `tokio::task::spawn_blocking`, so every method may block on the network.

use std::sync::Arc;

use crate::db::cancel::Interruption;
use crate::db::connection::ConnectionInfo;
use crate::db::query::{BindVariable, SqlResultSetMetadata, SqlScriptError};

/// Server-side cursor identifier, unique within one driver session.
pub type CursorId = u64;

/// One fetched row, column values as text. `None` is SQL NULL.
pub type RawRow = Vec<Option<String>>;

/// A cursor returned through a REFCURSOR bind.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundCursor {
    pub name: String,
    pub cursor: CursorId,
    pub metadata: Vec<SqlResultSetMetadata>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecuteOutcome {
    pub rows_affected: u64,
    /// OUT, INOUT and RETURNING binds with the values the database wrote back.
    pub binds: Vec<BindVariable>,
    pub cursors: Vec<BoundCursor>,
}

pub trait DatabaseDriver: Send + Sync {
    fn connect(&self, info: &ConnectionInfo) -> Result<Arc<dyn DriverSession>, SqlScriptError>;
}

pub trait DriverSession: Send + Sync {
    /// Runs a statement that does not return rows to the caller.
    fn execute(&self, sql: &str, binds: &[BindVariable]) -> Result<ExecuteOutcome, SqlScriptError>;

    /// Opens a query and returns its column metadata without fetching rows.
    fn open_cursor(
        &self,
        sql: &str,
        binds: &[BindVariable],
    ) -> Result<(CursorId, Vec<SqlResultSetMetadata>), SqlScriptError>;

    /// Fetches up to `max_rows` further rows. Fewer rows means the cursor is drained.
    fn fetch(&self, cursor: CursorId, max_rows: usize) -> Result<Vec<RawRow>, SqlScriptError>;

    fn close_cursor(&self, cursor: CursorId) -> Result<(), SqlScriptError>;

    /// Enables DBMS_OUTPUT; `None` is an unlimited buffer.
    fn enable_output(&self, size: Option<u32>) -> Result<(), SqlScriptError>;

    fn disable_output(&self) -> Result<(), SqlScriptError>;

    /// Drains buffered DBMS_OUTPUT lines.
    fn take_output(&self) -> Result<Vec<String>, SqlScriptError>;

    fn sql_id(&self, sql: &str) -> Result<Option<String>, SqlScriptError>;

    fn time_zone(&self) -> Result<Option<String>, SqlScriptError>;

    /// Breaks the call currently running on this session, from another thread.
    fn interrupt(&self);

    fn close(&self) -> Result<(), SqlScriptError>;
}

/// A driver session plus the gate that keeps calls on it one at a time.
#[derive(Clone)]
pub(crate) struct DriverHandle {
    driver: Arc<dyn DriverSession>,
    gate: Arc<tokio::sync::Mutex<()>>,
}

impl DriverHandle {
    pub(crate) fn new(driver: Arc<dyn DriverSession>) -> Self {
        Self {
            driver,
            gate: Arc::new(tokio::sync::Mutex::new(())),
        }
    }

    /// Runs `op` on a blocking thread.
    ///
    /// When `interruption` fires first the in-flight call is broken and awaited,
    /// so the next call never overlaps it. A call that still finished is
    /// returned as is, so whatever it opened or committed is not lost;
    /// otherwise the caller sees ORA-01013.
    pub(crate) async fn call<T, F>(
        &self,
        interruption: &Interruption,
        op: F,
    ) -> crate::error::Result<Result<T, SqlScriptError>>
    where
        T: Send + 'static,
        F: FnOnce(&dyn DriverSession) -> Result<T, SqlScriptError> + Send + 'static,
    {
        let _gate = self.gate.lock().await;
        if interruption.is_triggered() {
            return Ok(Err(SqlScriptError::cancelled()));
        }

        let driver = Arc::clone(&self.driver);
        let mut task = tokio::task::spawn_blocking(move || op(driver.as_ref()));
        tokio::select! {
            joined = &mut task => Ok(joined?),
            _ = interruption.triggered() => {
                self.driver.interrupt();
                Ok(task.await?.map_err(|_| SqlScriptError::cancelled()))
            }
        }
    }

    /// Best-effort cursor release that never waits on the gate.
    pub(crate) fn release_detached(&self, cursor: CursorId) {
        let driver = Arc::clone(&self.driver);
        let release = move || {
            if let Err(err) = driver.close_cursor(cursor) {
                eprintln!("Warning: failed to release cursor {cursor}: {err}");
            }
        };
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn_blocking(release);
            }
            Err(_) => release(),
        }
    }

    pub(crate) fn interrupt(&self) {
        self.driver.interrupt();
    }
}
