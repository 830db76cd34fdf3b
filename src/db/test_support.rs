//! Scripted in-memory driver for session and executor tests.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::db::connection::ConnectionInfo;
use crate::db::driver::{
    BoundCursor, CursorId, DatabaseDriver, DriverSession, ExecuteOutcome, RawRow,
};
use crate::db::query::{BindVariable, SqlResultSetMetadata, SqlScriptError};

/// What the mock answers for statements matching a pattern.
#[derive(Debug, Clone, Default)]
pub(crate) struct MockResponse {
    pub metadata: Vec<SqlResultSetMetadata>,
    pub rows: Vec<RawRow>,
    pub rows_affected: u64,
    pub error: Option<SqlScriptError>,
    pub delay: Option<Duration>,
    /// Finish the delay even when interrupted, like a call the server completes anyway.
    pub ignores_interrupt: bool,
    pub output: Vec<String>,
    pub out_binds: Vec<(String, String)>,
}

impl MockResponse {
    pub fn rows(columns: &[(&str, &str)], rows: Vec<Vec<Option<&str>>>) -> Self {
        Self {
            metadata: columns
                .iter()
                .map(|(name, type_name)| SqlResultSetMetadata {
                    column_name: Some(name.to_string()),
                    json_column_name: None,
                    column_type_name: Some(type_name.to_string()),
                    precision: None,
                    scale: None,
                    is_nullable: Some(true),
                })
                .collect(),
            rows: rows
                .into_iter()
                .map(|row| row.into_iter().map(|value| value.map(str::to_string)).collect())
                .collect(),
            ..Self::default()
        }
    }

    /// One NUMBER column `N` holding 1..=total.
    pub fn numbered(total: usize) -> Self {
        let mut response = Self::rows(&[("N", "NUMBER")], Vec::new());
        response.rows = (1..=total).map(|n| vec![Some(n.to_string())]).collect();
        response
    }

    pub fn affected(rows_affected: u64) -> Self {
        Self {
            rows_affected,
            ..Self::default()
        }
    }

    pub fn error(code: &str, message: &str) -> Self {
        Self {
            error: Some(SqlScriptError::new(code, message)),
            ..Self::default()
        }
    }

    pub fn delayed(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn ignoring_interrupts(mut self) -> Self {
        self.ignores_interrupt = true;
        self
    }

    pub fn with_output(mut self, lines: &[&str]) -> Self {
        self.output = lines.iter().map(|line| line.to_string()).collect();
        self
    }

    pub fn with_out_bind(mut self, name: &str, value: &str) -> Self {
        self.out_binds.push((name.to_uppercase(), value.to_string()));
        self
    }
}

#[derive(Default)]
struct MockState {
    rules: Mutex<Vec<(String, MockResponse)>>,
    executed: Mutex<Vec<String>>,
    cursors: Mutex<HashMap<CursorId, VecDeque<RawRow>>>,
    output: Mutex<Vec<String>>,
    fetch_delay: Mutex<Option<Duration>>,
    next_cursor: AtomicU64,
    fail_connect: AtomicBool,
    interrupted: AtomicBool,
    connects: AtomicUsize,
    calls: AtomicUsize,
    cursors_opened: AtomicUsize,
    cursors_closed: AtomicUsize,
    fetches: AtomicUsize,
    sessions_closed: AtomicUsize,
    interrupts: AtomicUsize,
}

#[derive(Clone, Default)]
pub(crate) struct MockDriver {
    state: Arc<MockState>,
}

impl MockDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answers statements whose upper-cased text contains `pattern`. The first
    /// matching rule wins.
    pub fn on(&self, pattern: &str, response: MockResponse) -> &Self {
        self.state
            .rules
            .lock()
            .expect("rules lock")
            .push((pattern.to_uppercase(), response));
        self
    }

    pub fn fail_connect(&self, fail: bool) {
        self.state.fail_connect.store(fail, Ordering::SeqCst);
    }

    /// Makes every later fetch take `delay` unless interrupted.
    pub fn slow_fetches(&self, delay: Duration) {
        *self.state.fetch_delay.lock().expect("fetch delay lock") = Some(delay);
    }

    pub fn executed(&self) -> Vec<String> {
        self.state.executed.lock().expect("executed lock").clone()
    }

    pub fn connects(&self) -> usize {
        self.state.connects.load(Ordering::SeqCst)
    }

    /// Requests sent over an open session.
    pub fn calls(&self) -> usize {
        self.state.calls.load(Ordering::SeqCst)
    }

    pub fn cursors_opened(&self) -> usize {
        self.state.cursors_opened.load(Ordering::SeqCst)
    }

    pub fn cursors_closed(&self) -> usize {
        self.state.cursors_closed.load(Ordering::SeqCst)
    }

    pub fn open_cursors(&self) -> usize {
        self.state.cursors.lock().expect("cursor lock").len()
    }

    pub fn fetches(&self) -> usize {
        self.state.fetches.load(Ordering::SeqCst)
    }

    pub fn sessions_closed(&self) -> usize {
        self.state.sessions_closed.load(Ordering::SeqCst)
    }

    pub fn interrupts(&self) -> usize {
        self.state.interrupts.load(Ordering::SeqCst)
    }
}

impl DatabaseDriver for MockDriver {
    fn connect(&self, info: &ConnectionInfo) -> Result<Arc<dyn DriverSession>, SqlScriptError> {
        self.state.connects.fetch_add(1, Ordering::SeqCst);
        if self.state.fail_connect.load(Ordering::SeqCst) {
            return Err(SqlScriptError::new(
                "ORA-12541",
                &format!("TNS:no listener at {}", info.connection_string()),
            ));
        }
        Ok(Arc::new(MockSession {
            state: Arc::clone(&self.state),
        }))
    }
}

struct MockSession {
    state: Arc<MockState>,
}

impl MockSession {
    fn respond(&self, sql: &str) -> Result<MockResponse, SqlScriptError> {
        self.state.calls.fetch_add(1, Ordering::SeqCst);
        self.state.interrupted.store(false, Ordering::SeqCst);
        self.state
            .executed
            .lock()
            .expect("executed lock")
            .push(sql.to_string());

        let upper = sql.to_uppercase();
        let response = self
            .state
            .rules
            .lock()
            .expect("rules lock")
            .iter()
            .find(|(pattern, _)| upper.contains(pattern.as_str()))
            .map(|(_, response)| response.clone())
            .unwrap_or_default();

        if let Some(delay) = response.delay {
            self.wait(delay, response.ignores_interrupt)?;
        }
        if let Some(error) = &response.error {
            return Err(error.clone());
        }
        *self.state.output.lock().expect("output lock") = response.output.clone();
        Ok(response)
    }

    fn wait(&self, delay: Duration, ignores_interrupt: bool) -> Result<(), SqlScriptError> {
        let started = Instant::now();
        while started.elapsed() < delay {
            if !ignores_interrupt && self.state.interrupted.load(Ordering::SeqCst) {
                return Err(SqlScriptError::cancelled());
            }
            std::thread::sleep(Duration::from_millis(2));
        }
        Ok(())
    }

    fn open(&self, rows: Vec<RawRow>) -> CursorId {
        let id = self.state.next_cursor.fetch_add(1, Ordering::SeqCst) + 1;
        self.state.cursors_opened.fetch_add(1, Ordering::SeqCst);
        self.state
            .cursors
            .lock()
            .expect("cursor lock")
            .insert(id, rows.into());
        id
    }
}

impl DriverSession for MockSession {
    fn execute(&self, sql: &str, binds: &[BindVariable]) -> Result<ExecuteOutcome, SqlScriptError> {
        let response = self.respond(sql)?;
        let mut outcome = ExecuteOutcome {
            rows_affected: response.rows_affected,
            ..ExecuteOutcome::default()
        };
        for bind in binds.iter().filter(|bind| bind.mode.reads_back()) {
            if bind.data_type.is_cursor() {
                let cursor = self.open(response.rows.clone());
                outcome.cursors.push(BoundCursor {
                    name: bind.name.clone(),
                    cursor,
                    metadata: response.metadata.clone(),
                });
                continue;
            }
            let value = response
                .out_binds
                .iter()
                .find(|(name, _)| *name == bind.name)
                .map(|(_, value)| value.clone())
                .or_else(|| bind.value.clone());
            outcome.binds.push(BindVariable {
                value,
                ..bind.clone()
            });
        }
        Ok(outcome)
    }

    fn open_cursor(
        &self,
        sql: &str,
        _binds: &[BindVariable],
    ) -> Result<(CursorId, Vec<SqlResultSetMetadata>), SqlScriptError> {
        let response = self.respond(sql)?;
        let id = self.open(response.rows);
        Ok((id, response.metadata))
    }

    fn fetch(&self, cursor: CursorId, max_rows: usize) -> Result<Vec<RawRow>, SqlScriptError> {
        self.state.calls.fetch_add(1, Ordering::SeqCst);
        self.state.fetches.fetch_add(1, Ordering::SeqCst);
        self.state.interrupted.store(false, Ordering::SeqCst);
        let delay = *self.state.fetch_delay.lock().expect("fetch delay lock");
        if let Some(delay) = delay {
            self.wait(delay, false)?;
        }
        let mut cursors = self.state.cursors.lock().expect("cursor lock");
        let rows = cursors
            .get_mut(&cursor)
            .ok_or_else(|| SqlScriptError::new("ORA-01001", "invalid cursor"))?;
        let take = max_rows.min(rows.len());
        Ok(rows.drain(..take).collect())
    }

    fn close_cursor(&self, cursor: CursorId) -> Result<(), SqlScriptError> {
        self.state.calls.fetch_add(1, Ordering::SeqCst);
        if self
            .state
            .cursors
            .lock()
            .expect("cursor lock")
            .remove(&cursor)
            .is_some()
        {
            self.state.cursors_closed.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    fn enable_output(&self, _size: Option<u32>) -> Result<(), SqlScriptError> {
        self.state.calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn disable_output(&self) -> Result<(), SqlScriptError> {
        self.state.calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn take_output(&self) -> Result<Vec<String>, SqlScriptError> {
        self.state.calls.fetch_add(1, Ordering::SeqCst);
        Ok(std::mem::take(
            &mut *self.state.output.lock().expect("output lock"),
        ))
    }

    fn sql_id(&self, _sql: &str) -> Result<Option<String>, SqlScriptError> {
        self.state.calls.fetch_add(1, Ordering::SeqCst);
        Ok(Some("mock0sqlid000".to_string()))
    }

    fn time_zone(&self) -> Result<Option<String>, SqlScriptError> {
        self.state.calls.fetch_add(1, Ordering::SeqCst);
        Ok(Some("+00:00".to_string()))
    }

    fn interrupt(&self) {
        self.state.interrupts.fetch_add(1, Ordering::SeqCst);
        self.state.interrupted.store(true, Ordering::SeqCst);
    }

    fn close(&self) -> Result<(), SqlScriptError> {
        self.state.sessions_closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Connection details the mock accepts.
pub(crate) fn mock_info(name: &str) -> ConnectionInfo {
    ConnectionInfo::new(name, "scott", "tiger", "localhost", 1521, "FREEPDB1")
}
