use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use uuid::Uuid;

use crate::db::cancel::{CancelToken, Interruption};
use crate::db::driver::{BoundCursor, DriverHandle, DriverSession};
use crate::db::lock_or_recover;
use crate::db::query::executor::{RowMode, ScriptRun};
use crate::db::query::pagination::{
    expired_link, next_link, parse_link, CursorRegistry, LinkTarget, DEFAULT_PAGE_SIZE,
};
use crate::db::query::{
    split, BindVariable, Hyperlink, Position, QueryExecutionOptions, ResponseFormat, ResultSet,
    ScriptEnv, ScriptExecutionOptions, SessionVariable, SqlPrepareResponse, SqlQuery,
    SqlResultSet, SqlScript, SqlScriptResponse, StatementPreparer, SubstitutionResolver,
};
use crate::error::{Error, Result};
use crate::format::{binary, json, text, ScriptByteStream, ScriptOutput};

/// Engine limits handed to every session a registry opens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineSettings {
    pub default_page_size: usize,
    pub statement_page_size: usize,
    pub fetch_batch_size: usize,
    pub cursor_idle_timeout: Duration,
    pub server_output_size: u32,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            default_page_size: DEFAULT_PAGE_SIZE,
            statement_page_size: 500,
            fetch_batch_size: 500,
            cursor_idle_timeout: Duration::from_secs(600),
            server_output_size: 1_000_000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Connected,
    Disconnected,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerOutputConfig {
    pub enabled: bool,
    /// Buffer size in bytes; `None` is unlimited.
    pub size: Option<u32>,
}

impl Default for ServerOutputConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            size: Some(1_000_000),
        }
    }
}

/// Script state that carries over between statements and runs on one session.
#[derive(Debug, Clone)]
pub struct SessionState {
    pub variables: BTreeMap<String, SessionVariable>,
    pub defines: BTreeMap<String, String>,
    /// `None` while SET DEFINE OFF is in effect.
    pub define_char: Option<char>,
    pub scan: bool,
    pub server_output: ServerOutputConfig,
    pub feedback: bool,
    pub timing: bool,
    pub exit_on_error: bool,
    /// REFCURSOR results waiting for PRINT.
    pending_cursors: BTreeMap<String, BoundCursor>,
}

impl Default for SessionState {
    fn default() -> Self {
        Self {
            variables: BTreeMap::new(),
            defines: BTreeMap::new(),
            define_char: Some(crate::db::query::DEFAULT_DEFINE_CHAR),
            scan: true,
            server_output: ServerOutputConfig::default(),
            feedback: true,
            timing: false,
            exit_on_error: false,
            pending_cursors: BTreeMap::new(),
        }
    }
}

impl SessionState {
    pub fn normalize_name(name: &str) -> String {
        name.trim().trim_start_matches(':').to_uppercase()
    }

    pub fn variable(&self, name: &str) -> Option<&SessionVariable> {
        self.variables.get(&Self::normalize_name(name))
    }

    fn resolver(&self) -> SubstitutionResolver {
        SubstitutionResolver::with_state(self.defines.clone(), self.define_char, self.scan)
    }
}

/// A statement list waiting behind a `script/...` link.
struct PendingScript {
    run: ScriptRun,
    env: ScriptEnv,
    statement_page_size: usize,
    cancel: Option<CancelToken>,
    timeout: Option<Duration>,
    last_used: Instant,
}

impl PendingScript {
    fn is_idle(&self, timeout: Duration) -> bool {
        self.last_used.elapsed() > timeout
    }
}

struct SessionInner {
    id: Uuid,
    connection_name: String,
    handle: Mutex<Option<DriverHandle>>,
    state: Mutex<SessionState>,
    /// Held for a whole script so two runs never interleave statements.
    runs: Arc<tokio::sync::Mutex<()>>,
    cursors: CursorRegistry,
    scripts: Mutex<HashMap<Uuid, Arc<tokio::sync::Mutex<PendingScript>>>>,
    settings: EngineSettings,
}

/// One live channel to the database plus the script state riding on it.
///
/// Cloning is cheap and every clone drives the same session.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.inner.id)
            .field("connection", &self.inner.connection_name)
            .field("status", &self.status())
            .finish()
    }
}

impl PartialEq for Session {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Session {
    pub(crate) fn new(
        connection_name: &str,
        driver: Arc<dyn DriverSession>,
        settings: EngineSettings,
    ) -> Self {
        let state = SessionState {
            server_output: ServerOutputConfig {
                enabled: false,
                size: Some(settings.server_output_size),
            },
            ..SessionState::default()
        };
        Self {
            inner: Arc::new(SessionInner {
                id: Uuid::new_v4(),
                connection_name: connection_name.to_string(),
                handle: Mutex::new(Some(DriverHandle::new(driver))),
                state: Mutex::new(state),
                runs: Arc::new(tokio::sync::Mutex::new(())),
                cursors: CursorRegistry::new(settings.cursor_idle_timeout),
                scripts: Mutex::new(HashMap::new()),
                settings,
            }),
        }
    }

    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    pub fn connection_name(&self) -> &str {
        &self.inner.connection_name
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.inner.settings
    }

    pub fn status(&self) -> SessionStatus {
        if lock_or_recover(&self.inner.handle, "session handle").is_some() {
            SessionStatus::Connected
        } else {
            SessionStatus::Disconnected
        }
    }

    pub fn is_connected(&self) -> bool {
        self.status() == SessionStatus::Connected
    }

    /// Copy of the current script state.
    pub fn state(&self) -> SessionState {
        lock_or_recover(&self.inner.state, "session state").clone()
    }

    /// Result pages still waiting behind a continuation link.
    pub fn open_cursor_count(&self) -> usize {
        self.inner.cursors.len()
    }

    pub(crate) fn handle(&self) -> Result<DriverHandle> {
        lock_or_recover(&self.inner.handle, "session handle")
            .clone()
            .ok_or(Error::SessionDisconnected)
    }

    pub(crate) fn with_state<T>(&self, f: impl FnOnce(&mut SessionState) -> T) -> T {
        f(&mut lock_or_recover(&self.inner.state, "session state"))
    }

    pub(crate) fn cursors(&self) -> &CursorRegistry {
        &self.inner.cursors
    }

    pub(crate) fn store_substitution_state(&self, resolver: &SubstitutionResolver) {
        self.with_state(|state| {
            state.defines = resolver.defines().clone();
            state.define_char = resolver.define_char();
            state.scan = resolver.scan();
        });
    }

    /// Records OUT values for binds the session declared with VAR.
    pub(crate) fn store_bind_values(&self, binds: &[BindVariable]) {
        self.with_state(|state| {
            for bind in binds {
                if let Some(variable) = state.variables.get_mut(&bind.name) {
                    variable.value = bind.value.clone();
                }
            }
        });
    }

    /// Keeps REFCURSOR results for PRINT, releasing any cursor they replace.
    pub(crate) fn store_cursors(&self, handle: &DriverHandle, cursors: Vec<BoundCursor>) {
        let replaced: Vec<BoundCursor> = self.with_state(|state| {
            cursors
                .into_iter()
                .filter_map(|cursor| state.pending_cursors.insert(cursor.name.clone(), cursor))
                .collect()
        });
        for cursor in replaced {
            handle.release_detached(cursor.cursor);
        }
    }

    pub(crate) fn take_cursor(&self, name: &str) -> Option<BoundCursor> {
        self.with_state(|state| state.pending_cursors.remove(name))
    }

    pub(crate) async fn release_cursor(&self, id: Uuid) -> bool {
        self.inner.cursors.release(id).await
    }

    pub(crate) fn forget_cursor(&self, id: Uuid) {
        self.inner.cursors.forget(id);
    }

    /// Runs exactly one statement and returns its rows as a forward-only
    /// [`ResultSet`]. Database errors fail the call.
    ///
    /// Statements that return no rows yield an empty result set.
    pub async fn execute_query(
        &self,
        query: &SqlQuery,
        options: QueryExecutionOptions,
    ) -> Result<ResultSet> {
        if options.page_size == Some(0) {
            return Err(Error::invalid_page_size(0));
        }
        self.handle()?;

        let count = split(&query.sql)
            .iter()
            .filter(|span| span.statement_type.is_executable())
            .count();
        if count != 1 {
            return Err(Error::NotASingleStatement { count });
        }

        let page_size = options
            .page_size
            .unwrap_or(self.inner.settings.default_page_size);
        let script = SqlScript {
            sql: query.sql.clone(),
            binds: query.binds.clone(),
            substitutions: BTreeMap::new(),
        };
        let resolver = self.with_state(|state| state.resolver());
        let mut run = ScriptRun::prepare(&script, resolver, RowMode::Paged(page_size))?;

        let _run_guard = self.inner.runs.lock().await;
        let interruption = Interruption::new(options.cancel.clone(), options.timeout);
        let response = run
            .step(self, &interruption)
            .await?
            .ok_or_else(|| Error::Internal("statement produced no response".to_string()))?;

        if let Some(error) = response.error {
            if interruption.is_triggered() {
                return Err(Error::Cancelled);
            }
            return Err(Error::Statement(error));
        }
        let page = response.result_set.unwrap_or_else(|| SqlResultSet {
            limit: Some(page_size),
            ..SqlResultSet::default()
        });
        Ok(ResultSet::new(self.clone(), page, interruption))
    }

    /// Runs a script and encodes the statement responses as `options` asks.
    pub async fn execute(
        &self,
        script: &SqlScript,
        options: ScriptExecutionOptions,
    ) -> Result<ScriptOutput> {
        match options.response_format {
            ResponseFormat::Json => self.execute_json(script, options).await.map(ScriptOutput::Json),
            ResponseFormat::Text => self.execute_text(script, options).await.map(ScriptOutput::Text),
            ResponseFormat::Binary => self
                .execute_binary(script, options)
                .await
                .map(ScriptOutput::Binary),
        }
    }

    /// Paginated JSON. Rows are paged by `page_size`, the statement list by
    /// `statement_page_size`; a `script/...` link resumes with the next statement.
    pub async fn execute_json(
        &self,
        script: &SqlScript,
        options: ScriptExecutionOptions,
    ) -> Result<SqlScriptResponse> {
        if options.page_size == Some(0) {
            return Err(Error::invalid_page_size(0));
        }
        if options.statement_page_size == Some(0) {
            return Err(Error::InvalidOptions(
                "statementPageSize must be at least 1 (got 0)".to_string(),
            ));
        }
        let handle = self.handle()?;

        let page_size = options
            .page_size
            .unwrap_or(self.inner.settings.default_page_size);
        let statement_page_size = options
            .statement_page_size
            .unwrap_or(self.inner.settings.statement_page_size);
        let resolver = self.with_state(|state| state.resolver());
        let mut run = ScriptRun::prepare(script, resolver, RowMode::Paged(page_size))?;

        let _run_guard = self.inner.runs.lock().await;
        let interruption = Interruption::new(options.cancel.clone(), options.timeout);
        let env = self.script_env(&handle).await?;
        let items = run.run_page(self, statement_page_size, &interruption).await?;

        let mut response = json::assemble(env.clone(), items);
        if !run.is_finished() {
            self.sweep_scripts();
            let offset = run.next_statement_id();
            let id = Uuid::new_v4();
            lock_or_recover(&self.inner.scripts, "pending scripts").insert(
                id,
                Arc::new(tokio::sync::Mutex::new(PendingScript {
                    run,
                    env,
                    statement_page_size,
                    cancel: options.cancel,
                    timeout: options.timeout,
                    last_used: Instant::now(),
                })),
            );
            response.has_more = true;
            response
                .links
                .push(next_link(LinkTarget::Script, id, offset));
        }
        Ok(response)
    }

    /// A SQL Developer style transcript of the whole script.
    pub async fn execute_text(
        &self,
        script: &SqlScript,
        options: ScriptExecutionOptions,
    ) -> Result<String> {
        let handle = self.handle()?;
        let batch_size = self.inner.settings.fetch_batch_size;
        let resolver = self.with_state(|state| state.resolver());
        let mut run = ScriptRun::prepare(script, resolver, RowMode::All(batch_size))?;

        let _run_guard = self.inner.runs.lock().await;
        let interruption = Interruption::new(options.cancel, options.timeout);
        let env = self.script_env(&handle).await?;
        let items = run.run_page(self, usize::MAX, &interruption).await?;
        Ok(text::render_script(&env, &items))
    }

    /// NDJSON streamed as statements complete. Preparation errors are returned
    /// here; anything later ends the stream with an error line.
    pub async fn execute_binary(
        &self,
        script: &SqlScript,
        options: ScriptExecutionOptions,
    ) -> Result<ScriptByteStream> {
        let handle = self.handle()?;
        let batch_size = self.inner.settings.fetch_batch_size;
        let resolver = self.with_state(|state| state.resolver());
        let mut run = ScriptRun::prepare(script, resolver, RowMode::All(batch_size))?;

        let run_guard = Arc::clone(&self.inner.runs).lock_owned().await;
        let interruption = Interruption::new(options.cancel, options.timeout);
        let (sender, stream) = ScriptByteStream::channel();
        let session = self.clone();

        tokio::spawn(async move {
            let _run_guard = run_guard;
            let env = match session.script_env(&handle).await {
                Ok(env) => env,
                Err(err) => {
                    let _ = sender.send(binary::encode_failure(&err)).await;
                    return;
                }
            };
            if sender.send(binary::encode_env(&env)).await.is_err() {
                return;
            }
            loop {
                let chunk = match run.step(&session, &interruption).await {
                    Ok(Some(response)) => binary::encode_statement(&response),
                    Ok(None) => break,
                    Err(err) => {
                        let _ = sender.send(binary::encode_failure(&err)).await;
                        break;
                    }
                };
                if sender.send(chunk).await.is_err() {
                    eprintln!("Warning: script output stream was dropped; stopping the run.");
                    break;
                }
            }
        });

        Ok(stream)
    }

    /// Dereferences a `cursor/...` link from an earlier page.
    pub async fn fetch_page(&self, link: &Hyperlink) -> Result<SqlResultSet> {
        self.fetch_page_with(link, QueryExecutionOptions::default()).await
    }

    /// [`Session::fetch_page`] with its own cancel token or timeout.
    pub async fn fetch_page_with(
        &self,
        link: &Hyperlink,
        options: QueryExecutionOptions,
    ) -> Result<SqlResultSet> {
        self.handle()?;
        let Some((LinkTarget::Cursor, id, offset)) = parse_link(&link.href) else {
            return Err(expired_link(&link.href));
        };
        let interruption = Interruption::new(options.cancel, options.timeout);
        self.inner.cursors.fetch(id, offset, &interruption).await
    }

    /// Dereferences a `script/...` link: runs the next page of statements.
    pub async fn fetch_script_page(&self, link: &Hyperlink) -> Result<SqlScriptResponse> {
        self.handle()?;
        let Some((LinkTarget::Script, id, offset)) = parse_link(&link.href) else {
            return Err(expired_link(&link.href));
        };
        let entry = lock_or_recover(&self.inner.scripts, "pending scripts")
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::CursorExpired(format!("script {id} has finished")))?;
        let Ok(mut pending) = entry.try_lock() else {
            return Err(Error::ConcurrentAccess(format!(
                "script {id} is already running a page"
            )));
        };
        let idle_timeout = self.inner.settings.cursor_idle_timeout;
        if pending.is_idle(idle_timeout) {
            lock_or_recover(&self.inner.scripts, "pending scripts").remove(&id);
            return Err(Error::CursorExpired(format!(
                "script {id} was idle for longer than {}s",
                idle_timeout.as_secs()
            )));
        }
        if pending.run.next_statement_id() != offset {
            return Err(Error::CursorExpired(format!(
                "offset {offset} is stale; script {id} is at statement {}",
                pending.run.next_statement_id()
            )));
        }

        let _run_guard = self.inner.runs.lock().await;
        let interruption = Interruption::new(pending.cancel.clone(), pending.timeout);
        let limit = pending.statement_page_size;
        let items = pending.run.run_page(self, limit, &interruption).await?;
        pending.last_used = Instant::now();

        let mut response = json::assemble(pending.env.clone(), items);
        if pending.run.is_finished() {
            lock_or_recover(&self.inner.scripts, "pending scripts").remove(&id);
        } else {
            response.has_more = true;
            response.links.push(next_link(
                LinkTarget::Script,
                id,
                pending.run.next_statement_id(),
            ));
        }
        Ok(response)
    }

    /// Scripts whose continuation link nobody has followed within the idle timeout.
    fn sweep_scripts(&self) {
        let timeout = self.inner.settings.cursor_idle_timeout;
        lock_or_recover(&self.inner.scripts, "pending scripts").retain(|_, entry| {
            entry
                .try_lock()
                .map(|pending| !pending.is_idle(timeout))
                .unwrap_or(true)
        });
    }

    /// Number of scripts waiting behind a `script/...` link.
    pub fn pending_script_count(&self) -> usize {
        lock_or_recover(&self.inner.scripts, "pending scripts").len()
    }

    /// Statement at `position` plus what it needs, using this session's DEFINEs
    /// and VARs. Adds the SQL_ID when the database can compute it.
    pub async fn prepare_sql(
        &self,
        script: &str,
        position: Option<Position>,
    ) -> Result<SqlPrepareResponse> {
        let (resolver, variables) =
            self.with_state(|state| (state.resolver(), state.variables.clone()));
        let mut response =
            StatementPreparer::with_session(resolver, variables).prepare(script, position);

        if let (Ok(handle), Some(text)) = (self.handle(), response.statement_text.clone()) {
            match handle
                .call(&Interruption::default(), move |driver| driver.sql_id(&text))
                .await?
            {
                Ok(sql_id) => response.statement_sql_id = sql_id,
                Err(err) => eprintln!("Warning: failed to compute SQL_ID: {err}"),
            }
        }
        Ok(response)
    }

    /// `EXPLAIN PLAN FOR sql`, then the DBMS_XPLAN lines.
    pub async fn explain_plan(&self, sql: &str) -> Result<Vec<String>> {
        let handle = self.handle()?;
        let _run_guard = self.inner.runs.lock().await;
        let statement = format!("EXPLAIN PLAN FOR {}", sql.trim().trim_end_matches(';'));
        let batch_size = self.inner.settings.fetch_batch_size;

        let lines = handle
            .call(&Interruption::default(), move |driver| {
                driver.execute(&statement, &[])?;
                let (cursor, _) = driver.open_cursor(
                    "SELECT plan_table_output FROM TABLE(DBMS_XPLAN.DISPLAY('PLAN_TABLE', NULL, 'ALL'))",
                    &[],
                )?;
                let mut lines = Vec::new();
                loop {
                    let rows = driver.fetch(cursor, batch_size)?;
                    let drained = rows.len() < batch_size;
                    lines.extend(rows.into_iter().filter_map(|row| row.into_iter().next().flatten()));
                    if drained {
                        break;
                    }
                }
                driver.close_cursor(cursor)?;
                Ok(lines)
            })
            .await??;
        Ok(lines)
    }

    /// Releases every cursor and closes the driver session. Closing twice is a no-op.
    pub async fn close(&self) -> Result<()> {
        let Some(handle) = lock_or_recover(&self.inner.handle, "session handle").take() else {
            return Ok(());
        };

        self.inner.cursors.release_all().await;
        lock_or_recover(&self.inner.scripts, "pending scripts").clear();
        let pending: Vec<BoundCursor> = self.with_state(|state| {
            std::mem::take(&mut state.pending_cursors)
                .into_values()
                .collect()
        });
        for cursor in pending {
            handle.release_detached(cursor.cursor);
        }

        if let Err(err) = handle
            .call(&Interruption::default(), |driver| driver.close())
            .await?
        {
            eprintln!("Warning: failed to close session cleanly: {err}");
        }
        Ok(())
    }

    /// Stops whatever the session is running right now.
    pub fn interrupt(&self) {
        if let Ok(handle) = self.handle() {
            handle.interrupt();
        }
    }

    async fn script_env(&self, handle: &DriverHandle) -> Result<ScriptEnv> {
        let zone = match handle
            .call(&Interruption::default(), |driver| driver.time_zone())
            .await?
        {
            Ok(zone) => zone,
            Err(err) => {
                eprintln!("Warning: failed to read session time zone: {err}");
                None
            }
        };
        Ok(ScriptEnv {
            default_time_zone: zone.or_else(|| Some(chrono::Local::now().format("%:z").to_string())),
        })
    }
}
