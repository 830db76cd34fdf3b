//! Worksheets: editor buffers bound to a session, plus the command registry
//! editors invoke through toolbar buttons and shortcuts.
//!
//! The core only publishes notifications here; it never asks the editor for
//! anything beyond the text and cursor of the worksheet a command runs on.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use serde_json::Value;
use uuid::Uuid;

use crate::db::{
    lock_or_recover, Connection, ConnectionRegistry, EventBus, Position, ScriptExecutionOptions,
    Session, SqlScript, Subscription,
};
use crate::error::{Error, Result};

pub const RUN_STATEMENT: &str = "runStatement";
pub const RUN_SCRIPT: &str = "runScript";
pub const ATTACH: &str = "attach";
pub const DETACH: &str = "detach";
pub const EXPLAIN_PLAN: &str = "explainPlan";

const BUILTIN_COMMANDS: [&str; 5] = [RUN_STATEMENT, RUN_SCRIPT, ATTACH, DETACH, EXPLAIN_PLAN];

/// What a worksheet needs from the editor showing it.
pub trait EditorHandle: Send + Sync {
    fn text(&self) -> String;

    /// Caret position, if the editor has one.
    fn cursor(&self) -> Option<Position>;
}

/// In-memory editor contents, for headless callers and tests.
#[derive(Debug, Default)]
pub struct TextBuffer {
    text: Mutex<String>,
    cursor: Mutex<Option<Position>>,
}

impl TextBuffer {
    pub fn new(text: &str) -> Self {
        Self {
            text: Mutex::new(text.to_string()),
            cursor: Mutex::new(None),
        }
    }

    pub fn set_text(&self, text: &str) {
        *lock_or_recover(&self.text, "editor text") = text.to_string();
    }

    pub fn set_cursor(&self, cursor: Option<Position>) {
        *lock_or_recover(&self.cursor, "editor cursor") = cursor;
    }
}

impl EditorHandle for TextBuffer {
    fn text(&self) -> String {
        lock_or_recover(&self.text, "editor text").clone()
    }

    fn cursor(&self) -> Option<Position> {
        *lock_or_recover(&self.cursor, "editor cursor")
    }
}

struct WorksheetInner {
    id: Uuid,
    editor: Arc<dyn EditorHandle>,
    connections: ConnectionRegistry,
    connection_id: Mutex<Option<String>>,
    session: Mutex<Option<Session>>,
}

#[derive(Clone)]
pub struct Worksheet {
    inner: Arc<WorksheetInner>,
}

impl std::fmt::Debug for Worksheet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Worksheet")
            .field("id", &self.inner.id)
            .field("connection", &self.connection_id())
            .field("attached", &self.session().is_some())
            .finish()
    }
}

impl PartialEq for Worksheet {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Worksheet {
    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    pub fn editor(&self) -> &Arc<dyn EditorHandle> {
        &self.inner.editor
    }

    /// The attached session, if any.
    pub fn session(&self) -> Option<Session> {
        lock_or_recover(&self.inner.session, "worksheet session").clone()
    }

    /// Connection the worksheet was last attached to.
    pub fn connection_id(&self) -> Option<String> {
        lock_or_recover(&self.inner.connection_id, "worksheet connection").clone()
    }

    /// Connects `connection` if needed and attaches its session.
    pub async fn attach(&self, connection: &Connection) -> Result<Session> {
        let session = self.inner.connections.connect(connection.id()).await?;
        *lock_or_recover(&self.inner.connection_id, "worksheet connection") =
            Some(connection.id().to_string());
        *lock_or_recover(&self.inner.session, "worksheet session") = Some(session.clone());
        Ok(session)
    }

    /// Drops the worksheet's reference to its session; the session stays open
    /// for other worksheets on the same connection.
    pub fn detach(&self) {
        lock_or_recover(&self.inner.session, "worksheet session").take();
    }

    fn live_session(&self) -> Result<Session> {
        self.session()
            .filter(Session::is_connected)
            .ok_or(Error::SessionDisconnected)
    }

    /// Text of the statement under the caret.
    async fn current_statement(&self, session: &Session) -> Result<String> {
        let editor = &self.inner.editor;
        session
            .prepare_sql(&editor.text(), editor.cursor())
            .await?
            .statement_text
            .ok_or_else(|| Error::InvalidOptions("no statement at the cursor".to_string()))
    }
}

pub type CommandFuture = Pin<Box<dyn Future<Output = Result<Value>> + Send>>;
type Callback = Arc<dyn Fn(Worksheet) -> CommandFuture + Send + Sync>;

struct RegisteredCommand {
    token: u64,
    callback: Callback,
}

type CommandTable = Mutex<HashMap<String, RegisteredCommand>>;

/// Keeps a command registered until disposed or dropped.
#[must_use = "the command is unregistered when the registration is dropped"]
pub struct CommandRegistration {
    id: String,
    token: u64,
    commands: Weak<CommandTable>,
}

impl CommandRegistration {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn dispose(self) {}
}

impl Drop for CommandRegistration {
    fn drop(&mut self) {
        let Some(commands) = self.commands.upgrade() else {
            return;
        };
        let mut commands = lock_or_recover(&commands, "worksheet commands");
        if commands.get(&self.id).is_some_and(|entry| entry.token == self.token) {
            commands.remove(&self.id);
        }
    }
}

#[derive(Debug, Clone)]
pub struct WillExecuteCommand {
    pub worksheet: Worksheet,
    pub command_id: String,
}

#[derive(Debug, Clone)]
pub struct DidExecuteCommand {
    pub worksheet: Worksheet,
    pub command_id: String,
    /// Command output, or the error's message.
    pub result: std::result::Result<Value, String>,
}

struct WorksheetsInner {
    connections: ConnectionRegistry,
    open: Mutex<Vec<Worksheet>>,
    active: Mutex<Option<Worksheet>>,
    commands: Arc<CommandTable>,
    next_token: AtomicU64,
    did_change_active: EventBus<Option<Worksheet>>,
    did_open: EventBus<Worksheet>,
    did_close: EventBus<Worksheet>,
    will_execute_command: EventBus<WillExecuteCommand>,
    did_execute_command: EventBus<DidExecuteCommand>,
}

/// Open worksheets, the active one, and the commands they can run.
#[derive(Clone)]
pub struct Worksheets {
    inner: Arc<WorksheetsInner>,
}

impl Worksheets {
    pub fn new(connections: ConnectionRegistry) -> Self {
        Self {
            inner: Arc::new(WorksheetsInner {
                connections,
                open: Mutex::new(Vec::new()),
                active: Mutex::new(None),
                commands: Arc::new(Mutex::new(HashMap::new())),
                next_token: AtomicU64::new(1),
                did_change_active: EventBus::new(),
                did_open: EventBus::new(),
                did_close: EventBus::new(),
                will_execute_command: EventBus::new(),
                did_execute_command: EventBus::new(),
            }),
        }
    }

    pub fn connections(&self) -> &ConnectionRegistry {
        &self.inner.connections
    }

    pub fn on_did_change_active(&self) -> Subscription<Option<Worksheet>> {
        self.inner.did_change_active.subscribe()
    }

    pub fn on_did_open(&self) -> Subscription<Worksheet> {
        self.inner.did_open.subscribe()
    }

    pub fn on_did_close(&self) -> Subscription<Worksheet> {
        self.inner.did_close.subscribe()
    }

    pub fn on_will_execute_command(&self) -> Subscription<WillExecuteCommand> {
        self.inner.will_execute_command.subscribe()
    }

    pub fn on_did_execute_command(&self) -> Subscription<DidExecuteCommand> {
        self.inner.did_execute_command.subscribe()
    }

    /// Opens a worksheet over `editor` and makes it active. `connection`
    /// becomes the target of the `attach` command; nothing connects yet.
    pub fn open(&self, editor: Arc<dyn EditorHandle>, connection: Option<&Connection>) -> Worksheet {
        let worksheet = Worksheet {
            inner: Arc::new(WorksheetInner {
                id: Uuid::new_v4(),
                editor,
                connections: self.inner.connections.clone(),
                connection_id: Mutex::new(connection.map(|c| c.id().to_string())),
                session: Mutex::new(None),
            }),
        };
        lock_or_recover(&self.inner.open, "open worksheets").push(worksheet.clone());
        self.inner.did_open.publish(worksheet.clone());
        self.set_active_unchecked(Some(worksheet.clone()));
        worksheet
    }

    /// Closes `worksheet`. If it was active, the most recently opened remaining
    /// worksheet becomes active.
    pub fn close(&self, worksheet: &Worksheet) -> bool {
        let next_active = {
            let mut open = lock_or_recover(&self.inner.open, "open worksheets");
            let before = open.len();
            open.retain(|candidate| candidate != worksheet);
            if open.len() == before {
                return false;
            }
            open.last().cloned()
        };
        worksheet.detach();
        self.inner.did_close.publish(worksheet.clone());
        if self.active().as_ref() == Some(worksheet) {
            self.set_active_unchecked(next_active);
        }
        true
    }

    pub fn active(&self) -> Option<Worksheet> {
        lock_or_recover(&self.inner.active, "active worksheet").clone()
    }

    /// Returns false when `worksheet` is not open here.
    pub fn set_active(&self, worksheet: &Worksheet) -> bool {
        if !self.visible().contains(worksheet) {
            return false;
        }
        self.set_active_unchecked(Some(worksheet.clone()));
        true
    }

    fn set_active_unchecked(&self, worksheet: Option<Worksheet>) {
        {
            let mut active = lock_or_recover(&self.inner.active, "active worksheet");
            if *active == worksheet {
                return;
            }
            *active = worksheet.clone();
        }
        self.inner.did_change_active.publish(worksheet);
    }

    pub fn visible(&self) -> Vec<Worksheet> {
        lock_or_recover(&self.inner.open, "open worksheets").clone()
    }

    /// Registers `callback` under `id`. Ids must be unique and may not shadow
    /// the built-in commands.
    pub fn register_command<F, Fut>(&self, id: &str, callback: F) -> Result<CommandRegistration>
    where
        F: Fn(Worksheet) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        if BUILTIN_COMMANDS.contains(&id) {
            return Err(Error::InvalidOptions(format!(
                "`{id}` is a built-in command"
            )));
        }
        let mut commands = lock_or_recover(&self.inner.commands, "worksheet commands");
        if commands.contains_key(id) {
            return Err(Error::InvalidOptions(format!(
                "command `{id}` is already registered"
            )));
        }
        let token = self.inner.next_token.fetch_add(1, Ordering::SeqCst);
        let callback: Callback =
            Arc::new(move |worksheet| -> CommandFuture { Box::pin(callback(worksheet)) });
        commands.insert(id.to_string(), RegisteredCommand { token, callback });
        Ok(CommandRegistration {
            id: id.to_string(),
            token,
            commands: Arc::downgrade(&self.inner.commands),
        })
    }

    pub fn is_registered(&self, id: &str) -> bool {
        BUILTIN_COMMANDS.contains(&id)
            || lock_or_recover(&self.inner.commands, "worksheet commands").contains_key(id)
    }

    /// Runs command `id` on `worksheet`, bracketed by the will/did
    /// notifications. The did notification fires whatever the outcome.
    pub async fn execute_command(&self, worksheet: &Worksheet, id: &str) -> Result<Value> {
        let callback = lock_or_recover(&self.inner.commands, "worksheet commands")
            .get(id)
            .map(|entry| Arc::clone(&entry.callback));
        if callback.is_none() && !BUILTIN_COMMANDS.contains(&id) {
            return Err(Error::InvalidOptions(format!("unknown command `{id}`")));
        }

        self.inner.will_execute_command.publish(WillExecuteCommand {
            worksheet: worksheet.clone(),
            command_id: id.to_string(),
        });
        let result = match callback {
            Some(callback) => callback(worksheet.clone()).await,
            None => self.run_builtin(worksheet, id).await,
        };
        self.inner.did_execute_command.publish(DidExecuteCommand {
            worksheet: worksheet.clone(),
            command_id: id.to_string(),
            result: result
                .as_ref()
                .map(Value::clone)
                .map_err(|err| err.to_string()),
        });
        result
    }

    async fn run_builtin(&self, worksheet: &Worksheet, id: &str) -> Result<Value> {
        match id {
            RUN_STATEMENT => {
                let session = worksheet.live_session()?;
                let statement = worksheet.current_statement(&session).await?;
                let response = session
                    .execute_json(&SqlScript::new(&statement), ScriptExecutionOptions::json())
                    .await?;
                Ok(serde_json::to_value(response)?)
            }
            RUN_SCRIPT => {
                let session = worksheet.live_session()?;
                let script = SqlScript::new(&worksheet.editor().text());
                let response = session
                    .execute_json(&script, ScriptExecutionOptions::json())
                    .await?;
                Ok(serde_json::to_value(response)?)
            }
            ATTACH => {
                let connection = worksheet
                    .connection_id()
                    .and_then(|id| self.inner.connections.get(&id))
                    .ok_or_else(|| {
                        Error::InvalidOptions("worksheet has no connection to attach to".to_string())
                    })?;
                let session = worksheet.attach(&connection).await?;
                Ok(Value::String(session.id().to_string()))
            }
            DETACH => {
                worksheet.detach();
                Ok(Value::Null)
            }
            EXPLAIN_PLAN => {
                let session = worksheet.live_session()?;
                let statement = worksheet.current_statement(&session).await?;
                let lines = session.explain_plan(&statement).await?;
                Ok(Value::from(lines))
            }
            other => Err(Error::InvalidOptions(format!("unknown command `{other}`"))),
        }
    }
}
