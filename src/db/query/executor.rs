//! Statement-by-statement script execution.
//!
//! A [`ScriptRun`] is split and gated up front, then stepped one statement at a
//! time. Each step records exactly one [`SqlStatementResponse`]; database errors
//! land in that response and the run moves on, unless the error was a cancel or
//! `WHENEVER SQLERROR EXIT` is in effect.

use std::collections::BTreeMap;
use std::time::Instant;

use crate::db::cancel::Interruption;
use crate::db::driver::{BoundCursor, DriverHandle};
use crate::db::session::Session;
use crate::error::{Error, Result};

use super::binds::{resolve_binds, SessionVariable};
use super::feedback::{completion_message, elapsed_message};
use super::pagination::{next_link, LinkTarget, PageCursor};
use super::script::split;
use super::substitution::SubstitutionResolver;
use super::types::{
    BindVariable, SqlResultSet, SqlScript, SqlScriptError, SqlStatementResponse,
    StatementSpan, StatementType, ToolCommand,
};

/// How query rows are returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RowMode {
    /// First page only; the rest stays behind a continuation link.
    Paged(usize),
    /// Every row, fetched in batches of the given size.
    All(usize),
}

pub(crate) struct ScriptRun {
    spans: Vec<StatementSpan>,
    next_span: usize,
    next_statement_id: usize,
    resolver: SubstitutionResolver,
    supplied: BTreeMap<String, String>,
    binds: Vec<BindVariable>,
    rows: RowMode,
    finished: bool,
}

impl ScriptRun {
    /// Splits `script` and checks that it can run at all.
    ///
    /// Fails before anything executes when a statement is malformed or a
    /// substitution prompt has no value.
    pub(crate) fn prepare(
        script: &SqlScript,
        resolver: SubstitutionResolver,
        rows: RowMode,
    ) -> Result<Self> {
        let spans = split(&script.sql);

        for (statement_id, span) in spans
            .iter()
            .filter(|span| span.statement_type.is_executable())
            .enumerate()
        {
            if span.malformed {
                return Err(Error::MalformedStatement {
                    statement_id,
                    reason: format!(
                        "unterminated quoted literal or comment in statement starting at line {}",
                        span.start_line() + 1
                    ),
                });
            }
        }

        // Substitution names are case-insensitive; lookups use the upper-cased key.
        let supplied: BTreeMap<String, String> = script
            .substitutions
            .iter()
            .map(|(name, value)| (name.trim().to_uppercase(), value.clone()))
            .collect();
        let names = resolver
            .clone()
            .resolve_script(&spans)
            .unresolved(&supplied);
        if !names.is_empty() {
            return Err(Error::UnresolvedSubstitutions { names });
        }

        Ok(Self {
            spans,
            next_span: 0,
            next_statement_id: 0,
            resolver,
            supplied,
            binds: script.binds.clone(),
            rows,
            finished: false,
        })
    }

    /// Id the next executed statement will get.
    pub(crate) fn next_statement_id(&self) -> usize {
        self.next_statement_id
    }

    pub(crate) fn is_finished(&self) -> bool {
        self.finished
            || !self.spans[self.next_span..]
                .iter()
                .any(|span| span.statement_type.is_executable())
    }

    /// Runs statements until `limit` responses are recorded or the run ends.
    pub(crate) async fn run_page(
        &mut self,
        session: &Session,
        limit: usize,
        interruption: &Interruption,
    ) -> Result<Vec<SqlStatementResponse>> {
        let mut items = Vec::new();
        while items.len() < limit.max(1) {
            match self.step(session, interruption).await? {
                Some(response) => items.push(response),
                None => break,
            }
        }
        Ok(items)
    }

    /// Executes the next statement. `None` once the run is over.
    pub(crate) async fn step(
        &mut self,
        session: &Session,
        interruption: &Interruption,
    ) -> Result<Option<SqlStatementResponse>> {
        if self.finished {
            return Ok(None);
        }
        let Some(index) = (self.next_span..self.spans.len())
            .find(|&idx| self.spans[idx].statement_type.is_executable())
        else {
            self.finished = true;
            return Ok(None);
        };
        if interruption.is_triggered() {
            self.finished = true;
            return Ok(None);
        }

        self.next_span = index + 1;
        let statement_id = self.next_statement_id;
        self.next_statement_id += 1;

        let handle = session.handle()?;
        let span = self.spans[index].clone();
        let started = Instant::now();

        let mut response = match &span.command {
            Some(command) => {
                self.run_directive(session, &handle, statement_id, &span, command, interruption)
                    .await?
            }
            None => {
                self.run_sql(session, &handle, statement_id, &span, interruption)
                    .await?
            }
        };

        let cancelled = interruption.is_triggered()
            && response
                .error
                .as_ref()
                .is_some_and(|error| error.error_code == SqlScriptError::cancelled().error_code);
        let (output_enabled, timing, exit_on_error) = session.with_state(|state| {
            (state.server_output.enabled, state.timing, state.exit_on_error)
        });

        if output_enabled && span.command.is_none() && !cancelled {
            match handle
                .call(&Interruption::default(), |driver| driver.take_output())
                .await?
            {
                Ok(lines) => response.response.extend(lines),
                Err(err) => eprintln!("Warning: failed to read DBMS_OUTPUT: {err}"),
            }
        }
        if timing && span.command.is_none() {
            response.response.push(elapsed_message(started.elapsed()));
        }

        if cancelled || (response.is_error() && exit_on_error) {
            self.finished = true;
        }
        session.store_substitution_state(&self.resolver);
        Ok(Some(response))
    }

    async fn run_sql(
        &mut self,
        session: &Session,
        handle: &DriverHandle,
        statement_id: usize,
        span: &StatementSpan,
        interruption: &Interruption,
    ) -> Result<SqlStatementResponse> {
        let sql = self.resolver.substitute(&span.sql(), &self.supplied);
        let mut response = SqlStatementResponse::for_span(statement_id, span, &sql);

        let (variables, feedback) =
            session.with_state(|state| (state.variables.clone(), state.feedback));
        let binds = match resolve_binds(&sql, span.statement_type, &self.binds, &variables) {
            Ok(binds) => binds,
            Err(err) => {
                response.set_error(err);
                return Ok(response);
            }
        };

        if span.statement_type == StatementType::Query {
            match self.run_query(session, handle, sql, binds, interruption).await? {
                Ok(result_set) => response.result_set = Some(result_set),
                Err(err) => response.set_error(err),
            }
            return Ok(response);
        }

        let statement = sql.clone();
        let bound = binds.clone();
        let outcome = handle
            .call(interruption, move |driver| driver.execute(&statement, &bound))
            .await?;
        match outcome {
            Ok(outcome) => {
                if span.statement_type == StatementType::Dml {
                    response.result = Some(outcome.rows_affected);
                }
                if feedback {
                    response.response.extend(completion_message(
                        span.statement_type,
                        &sql,
                        Some(outcome.rows_affected),
                    ));
                }
                response.binds = outcome.binds.clone();
                response.binds.extend(
                    binds
                        .iter()
                        .filter(|bind| bind.data_type.is_cursor() && bind.mode.reads_back())
                        .map(|bind| BindVariable {
                            value: None,
                            ..bind.clone()
                        }),
                );
                session.store_bind_values(&outcome.binds);
                session.store_cursors(handle, outcome.cursors);
            }
            Err(err) => response.set_error(err),
        }
        Ok(response)
    }

    async fn run_query(
        &self,
        session: &Session,
        handle: &DriverHandle,
        sql: String,
        binds: Vec<BindVariable>,
        interruption: &Interruption,
    ) -> Result<std::result::Result<SqlResultSet, SqlScriptError>> {
        let opened = handle
            .call(interruption, move |driver| driver.open_cursor(&sql, &binds))
            .await?;
        let (cursor_id, metadata) = match opened {
            Ok(opened) => opened,
            Err(err) => return Ok(Err(err)),
        };

        let page = match self.rows {
            RowMode::Paged(page_size) => {
                let mut cursor = PageCursor::new(handle.clone(), cursor_id, metadata, page_size);
                match cursor.next_page(interruption).await {
                    Ok(mut page) if page.has_more => {
                        let offset = cursor.offset();
                        let id = session.cursors().register(cursor).await;
                        page.links.push(next_link(LinkTarget::Cursor, id, offset));
                        Ok(page)
                    }
                    other => other,
                }
            }
            RowMode::All(batch_size) => {
                PageCursor::new(handle.clone(), cursor_id, metadata, batch_size)
                    .collect_all(batch_size, interruption)
                    .await
            }
        };
        in_band(page)
    }

    async fn run_directive(
        &mut self,
        session: &Session,
        handle: &DriverHandle,
        statement_id: usize,
        span: &StatementSpan,
        command: &ToolCommand,
        interruption: &Interruption,
    ) -> Result<SqlStatementResponse> {
        let mut response = SqlStatementResponse::for_span(statement_id, span, span.body().trim());

        match command {
            ToolCommand::Define { .. }
            | ToolCommand::Undefine { .. }
            | ToolCommand::SetDefine { .. }
            | ToolCommand::SetScan { .. } => self.resolver.apply(command),
            ToolCommand::Accept {
                name,
                default_value,
                ..
            } => {
                self.resolver.apply(command);
                let value = self
                    .supplied
                    .get(&name.to_uppercase())
                    .or(default_value.as_ref())
                    .cloned();
                if let Some(value) = value {
                    self.resolver.define(name, &value);
                }
            }
            ToolCommand::ShowDefine { name } => {
                response.response = self.show_defines(name.as_deref());
            }
            ToolCommand::Prompt { text } => {
                response
                    .response
                    .push(self.resolver.substitute(text, &self.supplied));
            }
            ToolCommand::Var {
                name,
                data_type,
                size,
            } => {
                session.with_state(|state| {
                    state.variables.insert(
                        name.to_uppercase(),
                        SessionVariable {
                            data_type: *data_type,
                            size: *size,
                            value: None,
                        },
                    );
                });
            }
            ToolCommand::Print { name } => {
                self.print(session, handle, &mut response, name.as_deref(), interruption)
                    .await?;
            }
            ToolCommand::SetServerOutput {
                enabled,
                size,
                unlimited,
            } => {
                let enabled = *enabled;
                let size = if *unlimited {
                    None
                } else {
                    Some(size.unwrap_or(session.settings().server_output_size))
                };
                let outcome = handle
                    .call(interruption, move |driver| {
                        if enabled {
                            driver.enable_output(size)
                        } else {
                            driver.disable_output()
                        }
                    })
                    .await?;
                match outcome {
                    Ok(()) => session.with_state(|state| {
                        state.server_output.enabled = enabled;
                        state.server_output.size = size;
                    }),
                    Err(err) => response.set_error(err),
                }
            }
            ToolCommand::SetFeedback { enabled } => {
                session.with_state(|state| state.feedback = *enabled)
            }
            ToolCommand::SetTiming { enabled } => session.with_state(|state| state.timing = *enabled),
            ToolCommand::WheneverSqlError { exit } => {
                session.with_state(|state| state.exit_on_error = *exit)
            }
            ToolCommand::Exit => self.finished = true,
            ToolCommand::Unsupported { message, .. } => {
                response.set_error(SqlScriptError::new("SP2-0734", message));
            }
        }

        Ok(response)
    }

    fn show_defines(&self, name: Option<&str>) -> Vec<String> {
        let line = |name: &str, value: &str| format!("DEFINE {name} = \"{value}\" (CHAR)");
        match name {
            Some(name) => match self.resolver.lookup(name) {
                Some(value) => vec![line(&name.to_uppercase(), value)],
                None => vec![format!("SP2-0135: symbol {name} is UNDEFINED")],
            },
            None => self
                .resolver
                .defines()
                .iter()
                .map(|(name, value)| line(name, value))
                .collect(),
        }
    }

    async fn print(
        &self,
        session: &Session,
        handle: &DriverHandle,
        response: &mut SqlStatementResponse,
        name: Option<&str>,
        interruption: &Interruption,
    ) -> Result<()> {
        let variables = session.with_state(|state| state.variables.clone());
        let names: Vec<String> = match name {
            Some(name) => vec![name.to_uppercase()],
            None => variables.keys().cloned().collect(),
        };

        for name in names {
            let Some(variable) = variables.get(&name) else {
                response.set_error(SqlScriptError::new(
                    "SP2-0552",
                    &format!("Bind variable \"{name}\" not declared."),
                ));
                return Ok(());
            };

            if variable.data_type.is_cursor() {
                let Some(bound) = session.take_cursor(&name) else {
                    response.set_error(SqlScriptError::new(
                        "SP2-0625",
                        &format!("Error printing variable \"{name}\""),
                    ));
                    return Ok(());
                };
                match self.print_cursor(handle, bound, interruption).await? {
                    Ok(result_set) => response.result_set = Some(result_set),
                    Err(err) => {
                        response.set_error(err);
                        return Ok(());
                    }
                }
                continue;
            }

            let value = variable.value.clone().unwrap_or_default();
            let width = name.chars().count().max(value.chars().count());
            response.response.push(name.clone());
            response.response.push("-".repeat(width));
            response.response.push(value);
            response.binds.push(BindVariable {
                name: name.clone(),
                value: variable.value.clone(),
                data_type: variable.data_type,
                mode: Default::default(),
            });
        }
        Ok(())
    }

    async fn print_cursor(
        &self,
        handle: &DriverHandle,
        bound: BoundCursor,
        interruption: &Interruption,
    ) -> Result<std::result::Result<SqlResultSet, SqlScriptError>> {
        let batch_size = match self.rows {
            RowMode::Paged(size) | RowMode::All(size) => size,
        };
        let cursor = PageCursor::new(handle.clone(), bound.cursor, bound.metadata, batch_size);
        in_band(cursor.collect_all(batch_size, interruption).await)
    }
}

/// Moves statement-level failures into the response; anything else stops the run.
fn in_band(
    page: Result<SqlResultSet>,
) -> Result<std::result::Result<SqlResultSet, SqlScriptError>> {
    match page {
        Ok(page) => Ok(Ok(page)),
        Err(Error::Statement(err)) => Ok(Err(err)),
        Err(Error::Cancelled) => Ok(Err(SqlScriptError::cancelled())),
        Err(err) => Err(err),
    }
}

