use oracle::sql_type::{OracleType, RefCursor, ToSql};
use oracle::{Connection, Error as OracleError, ResultSet, Row};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::db::connection::ConnectionInfo;
use crate::db::driver::{
    BoundCursor, CursorId, DatabaseDriver, DriverSession, ExecuteOutcome, RawRow,
};
use crate::db::query::{BindDataType, BindVariable, SqlResultSetMetadata, SqlScriptError};

/// Upper bound on DBMS_OUTPUT lines drained after one statement.
const MAX_OUTPUT_LINES: usize = 100_000;

/// Connects through the `oracle` crate (ODPI-C).
#[derive(Debug, Clone, Default)]
pub struct OracleDriver;

impl OracleDriver {
    pub fn new() -> Self {
        Self
    }
}

impl DatabaseDriver for OracleDriver {
    fn connect(&self, info: &ConnectionInfo) -> Result<Arc<dyn DriverSession>, SqlScriptError> {
        let conn_str = info.connection_string();
        let connection = match Connection::connect(&info.username, &info.password, &conn_str) {
            Ok(connection) => connection,
            Err(err) => {
                eprintln!("Connection error: {err}");
                return Err(db_error(&err));
            }
        };

        apply_default_session_settings(&connection);

        Ok(Arc::new(OracleSession {
            conn: connection,
            cursors: Mutex::new(HashMap::new()),
            next_cursor: AtomicU64::new(1),
        }))
    }
}

fn apply_default_session_settings(conn: &Connection) {
    let statements = [
        "ALTER SESSION SET NLS_TIMESTAMP_FORMAT = 'yyyy-mm-dd hh24:mi:ss'",
        "ALTER SESSION SET NLS_DATE_FORMAT = 'yyyy-mm-dd hh24:mi:ss'",
    ];

    for statement in statements {
        if let Err(err) = conn.execute(statement, &[]) {
            eprintln!("Warning: failed to apply default session setting `{statement}`: {err}");
        }
    }
}

enum OracleCursor {
    Live(ResultSet<'static, Row>),
    /// REFCURSOR binds are drained when the statement completes.
    Buffered(VecDeque<RawRow>),
}

pub struct OracleSession {
    conn: Connection,
    cursors: Mutex<HashMap<CursorId, OracleCursor>>,
    next_cursor: AtomicU64,
}

impl OracleSession {
    fn lock_cursors(&self) -> MutexGuard<'_, HashMap<CursorId, OracleCursor>> {
        match self.cursors.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                eprintln!("Warning: cursor table lock was poisoned; recovering.");
                poisoned.into_inner()
            }
        }
    }

    fn register(&self, cursor: OracleCursor) -> CursorId {
        let id = self.next_cursor.fetch_add(1, Ordering::SeqCst);
        self.lock_cursors().insert(id, cursor);
        id
    }
}

/// Oracle type used to bind a value of `data_type`.
pub(crate) fn oracle_type(data_type: BindDataType, size: Option<u32>) -> OracleType {
    match data_type {
        BindDataType::Number => OracleType::Number(0, 0),
        BindDataType::Float => OracleType::Float(126),
        BindDataType::BinaryFloat => OracleType::BinaryFloat,
        BindDataType::BinaryDouble => OracleType::BinaryDouble,
        BindDataType::Char => OracleType::Char(size.unwrap_or(2000)),
        BindDataType::Nchar => OracleType::NChar(size.unwrap_or(1000)),
        BindDataType::Nvarchar2 => OracleType::NVarchar2(size.unwrap_or(2000)),
        BindDataType::Date => OracleType::Date,
        BindDataType::Timestamp => OracleType::Timestamp(6),
        BindDataType::TimestampWithTimeZone => OracleType::TimestampTZ(6),
        BindDataType::TimestampWithLocalTimeZone => OracleType::TimestampLTZ(6),
        BindDataType::IntervalYearToMonth | BindDataType::Intervalym => OracleType::IntervalYM(2),
        BindDataType::IntervalDayToSecond | BindDataType::Intervalds => {
            OracleType::IntervalDS(2, 6)
        }
        BindDataType::Raw => OracleType::Raw(size.unwrap_or(2000)),
        BindDataType::LongRaw => OracleType::LongRaw,
        BindDataType::Long => OracleType::Long,
        BindDataType::Rowid | BindDataType::Urowid => OracleType::Rowid,
        BindDataType::Refcursor | BindDataType::SysRefcursor => OracleType::RefCursor,
        BindDataType::Clob | BindDataType::Json | BindDataType::Xml => OracleType::CLOB,
        BindDataType::Nclob => OracleType::NCLOB,
        BindDataType::Blob => OracleType::BLOB,
        BindDataType::Bfile => OracleType::BFILE,
        BindDataType::Varchar2 => OracleType::Varchar2(size.unwrap_or(32767)),
    }
}

/// Splits `ORA-00942: table or view does not exist` into code and message, and
/// picks up `line X, column Y` from PL/SQL compilation errors.
pub(crate) fn db_error(err: &OracleError) -> SqlScriptError {
    parse_error_text(&err.to_string())
}

pub(crate) fn parse_error_text(text: &str) -> SqlScriptError {
    let text = text.trim();
    let (code, message) = match text.split_once(": ") {
        Some((code, message))
            if code.len() <= 10
                && code.contains('-')
                && code
                    .rsplit('-')
                    .next()
                    .is_some_and(|digits| !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit())) =>
        {
            (code.to_string(), message.to_string())
        }
        _ => ("ORA-00000".to_string(), text.to_string()),
    };

    let mut error = SqlScriptError::new(&code, message.lines().next().unwrap_or_default());
    if message.lines().count() > 1 {
        error.cause = Some(message.lines().skip(1).collect::<Vec<_>>().join("\n"));
    }

    if let Some(rest) = message.strip_prefix("line ") {
        let line: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
        let column = rest
            .find("column ")
            .map(|col| {
                rest[col + 7..]
                    .chars()
                    .take_while(|c| c.is_ascii_digit())
                    .collect::<String>()
            })
            .unwrap_or_default();
        error.line = line.parse().ok();
        error.column = column.parse().ok();
    }
    error
}

fn bind_all(
    stmt: &mut oracle::Statement,
    binds: &[BindVariable],
) -> Result<(), OracleError> {
    for bind in binds {
        let oratype = oracle_type(bind.data_type, None);
        match (&bind.value, bind.data_type.is_cursor()) {
            (_, true) => stmt.bind(bind.name.as_str(), &OracleType::RefCursor)?,
            (Some(value), false) => stmt.bind(bind.name.as_str(), &(value, &oratype))?,
            (None, false) => stmt.bind(bind.name.as_str(), &oratype)?,
        }
    }
    Ok(())
}

fn column_metadata(result: &ResultSet<'_, Row>) -> Vec<SqlResultSetMetadata> {
    result
        .column_info()
        .iter()
        .map(|info| {
            let (precision, scale) = match info.oracle_type() {
                OracleType::Number(precision, scale) => {
                    (Some(*precision as i64), Some(*scale as i64))
                }
                OracleType::Float(precision) => (Some(*precision as i64), None),
                _ => (None, None),
            };
            let type_name = info.oracle_type().to_string();
            let base_type = type_name
                .split('(')
                .next()
                .unwrap_or(type_name.as_str())
                .trim()
                .to_string();
            SqlResultSetMetadata {
                column_name: Some(info.name().to_string()),
                json_column_name: None,
                column_type_name: Some(base_type),
                precision,
                scale,
                is_nullable: Some(info.nullable()),
            }
        })
        .collect()
}

fn raw_row(row: &Row) -> RawRow {
    (0..row.sql_values().len())
        .map(|idx| match row.get::<usize, Option<String>>(idx) {
            Ok(value) => value,
            Err(err) => Some(format!("<{err}>")),
        })
        .collect()
}

fn drain_ref_cursor(cursor: &mut RefCursor) -> Result<(Vec<SqlResultSetMetadata>, VecDeque<RawRow>), OracleError> {
    let result = cursor.query()?;
    let metadata = column_metadata(&result);
    let mut rows = VecDeque::new();
    for row in result {
        rows.push_back(raw_row(&row?));
    }
    Ok((metadata, rows))
}

impl DriverSession for OracleSession {
    fn execute(&self, sql: &str, binds: &[BindVariable]) -> Result<ExecuteOutcome, SqlScriptError> {
        let mut stmt = self.conn.statement(sql).build().map_err(|err| db_error(&err))?;
        bind_all(&mut stmt, binds).map_err(|err| db_error(&err))?;
        if let Err(err) = stmt.execute(&[]) {
            return Err(db_error(&err));
        }

        let mut outcome = ExecuteOutcome {
            rows_affected: if stmt.is_dml() {
                stmt.row_count().map_err(|err| db_error(&err))?
            } else {
                0
            },
            ..ExecuteOutcome::default()
        };

        for bind in binds.iter().filter(|bind| bind.mode.reads_back()) {
            if bind.data_type.is_cursor() {
                let cursor: Option<RefCursor> = stmt
                    .bind_value(bind.name.as_str())
                    .map_err(|err| db_error(&err))?;
                if let Some(mut cursor) = cursor {
                    let (metadata, rows) =
                        drain_ref_cursor(&mut cursor).map_err(|err| db_error(&err))?;
                    let id = self.register(OracleCursor::Buffered(rows));
                    outcome.cursors.push(BoundCursor {
                        name: bind.name.clone(),
                        cursor: id,
                        metadata,
                    });
                }
                continue;
            }
            let value: Option<String> = stmt
                .bind_value(bind.name.as_str())
                .map_err(|err| db_error(&err))?;
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
        binds: &[BindVariable],
    ) -> Result<(CursorId, Vec<SqlResultSetMetadata>), SqlScriptError> {
        let types: Vec<OracleType> = binds
            .iter()
            .map(|bind| oracle_type(bind.data_type, None))
            .collect();
        let params: Vec<(&str, &dyn ToSql)> = binds
            .iter()
            .zip(types.iter())
            .map(|(bind, oratype)| -> (&str, &dyn ToSql) {
                match &bind.value {
                    Some(value) => (bind.name.as_str(), value),
                    None => (bind.name.as_str(), oratype),
                }
            })
            .collect();

        let result = self
            .conn
            .query_named(sql, &params)
            .map_err(|err| db_error(&err))?;
        let metadata = column_metadata(&result);
        let id = self.register(OracleCursor::Live(result));
        Ok((id, metadata))
    }

    fn fetch(&self, cursor: CursorId, max_rows: usize) -> Result<Vec<RawRow>, SqlScriptError> {
        let mut cursors = self.lock_cursors();
        let Some(state) = cursors.get_mut(&cursor) else {
            return Err(SqlScriptError::new("ORA-01001", "invalid cursor"));
        };

        let mut rows = Vec::with_capacity(max_rows.min(1024));
        match state {
            OracleCursor::Live(result) => {
                while rows.len() < max_rows {
                    match result.next() {
                        Some(Ok(row)) => rows.push(raw_row(&row)),
                        Some(Err(err)) => return Err(db_error(&err)),
                        None => break,
                    }
                }
            }
            OracleCursor::Buffered(buffer) => {
                while rows.len() < max_rows {
                    match buffer.pop_front() {
                        Some(row) => rows.push(row),
                        None => break,
                    }
                }
            }
        }
        Ok(rows)
    }

    fn close_cursor(&self, cursor: CursorId) -> Result<(), SqlScriptError> {
        self.lock_cursors().remove(&cursor);
        Ok(())
    }

    fn enable_output(&self, size: Option<u32>) -> Result<(), SqlScriptError> {
        let sql = match size {
            Some(size) => format!("BEGIN DBMS_OUTPUT.ENABLE({}); END;", size),
            None => "BEGIN DBMS_OUTPUT.ENABLE(NULL); END;".to_string(),
        };
        self.conn
            .execute(&sql, &[])
            .map(|_| ())
            .map_err(|err| db_error(&err))
    }

    fn disable_output(&self) -> Result<(), SqlScriptError> {
        self.conn
            .execute("BEGIN DBMS_OUTPUT.DISABLE; END;", &[])
            .map(|_| ())
            .map_err(|err| db_error(&err))
    }

    fn take_output(&self) -> Result<Vec<String>, SqlScriptError> {
        let mut lines = Vec::new();
        let mut stmt = self
            .conn
            .statement("BEGIN DBMS_OUTPUT.GET_LINE(:line, :status); END;")
            .build()
            .map_err(|err| db_error(&err))?;

        stmt.bind("line", &OracleType::Varchar2(32767))
            .map_err(|err| db_error(&err))?;
        stmt.bind("status", &OracleType::Number(0, 0))
            .map_err(|err| db_error(&err))?;

        while lines.len() < MAX_OUTPUT_LINES {
            stmt.execute(&[]).map_err(|err| db_error(&err))?;
            let status: i32 = stmt.bind_value("status").map_err(|err| db_error(&err))?;
            if status != 0 {
                break;
            }
            let line: Option<String> = stmt.bind_value("line").map_err(|err| db_error(&err))?;
            lines.push(line.unwrap_or_default());
        }

        Ok(lines)
    }

    fn sql_id(&self, sql: &str) -> Result<Option<String>, SqlScriptError> {
        let text = sql.to_string();
        self.conn
            .query_row_as::<Option<String>>(
                "SELECT DBMS_SQL_TRANSLATOR.SQL_ID(:1) FROM DUAL",
                &[&text],
            )
            .map_err(|err| db_error(&err))
    }

    fn time_zone(&self) -> Result<Option<String>, SqlScriptError> {
        self.conn
            .query_row_as::<Option<String>>("SELECT SESSIONTIMEZONE FROM DUAL", &[])
            .map_err(|err| db_error(&err))
    }

    fn interrupt(&self) {
        if let Err(err) = self.conn.break_execution() {
            eprintln!("Warning: failed to interrupt the running call: {err}");
        }
    }

    fn close(&self) -> Result<(), SqlScriptError> {
        self.lock_cursors().clear();
        self.conn.close().map_err(|err| db_error(&err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_ora_error_text() {
        let error = parse_error_text("ORA-00942: table or view does not exist");
        assert_eq!(error.error_code, "ORA-00942");
        assert_eq!(error.message, "table or view does not exist");
        assert_eq!(error.numeric_code(), Some(942));
    }

    #[test]
    fn parses_plsql_error_position() {
        let error = parse_error_text(
            "ORA-06550: line 3, column 7:\nPLS-00201: identifier 'X' must be declared",
        );
        assert_eq!(error.error_code, "ORA-06550");
        assert_eq!(error.line, Some(3));
        assert_eq!(error.column, Some(7));
        assert_eq!(
            error.cause.as_deref(),
            Some("PLS-00201: identifier 'X' must be declared")
        );
    }

    #[test]
    fn unknown_error_text_keeps_message() {
        let error = parse_error_text("connection reset");
        assert_eq!(error.error_code, "ORA-00000");
        assert_eq!(error.message, "connection reset");
    }

    #[test]
    fn varchar_binds_default_to_max_size() {
        assert!(matches!(
            oracle_type(BindDataType::Varchar2, None),
            OracleType::Varchar2(32767)
        ));
        assert!(matches!(
            oracle_type(BindDataType::Refcursor, None),
            OracleType::RefCursor
        ));
    }
}
