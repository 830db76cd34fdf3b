use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;

use crate::db::cancel::CancelToken;

/// Zero-based line and character position in a script.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
pub struct Position {
    pub line: usize,
    pub character: usize,
}

impl Position {
    pub fn new(line: usize, character: usize) -> Self {
        Self { line, character }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Range {
    pub start: Position,
    pub end: Position,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StatementType {
    Query,
    Other,
    Ignore,
    Plsql,
    Sqlplus,
    Dml,
    TransactionControl,
    SessionControl,
    SystemControl,
    Ddl,
    Jdbc,
}

impl StatementType {
    pub fn is_executable(self) -> bool {
        !matches!(self, StatementType::Ignore)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            StatementType::Query => "query",
            StatementType::Other => "other",
            StatementType::Ignore => "ignore",
            StatementType::Plsql => "plsql",
            StatementType::Sqlplus => "sqlplus",
            StatementType::Dml => "dml",
            StatementType::TransactionControl => "transaction-control",
            StatementType::SessionControl => "session-control",
            StatementType::SystemControl => "system-control",
            StatementType::Ddl => "ddl",
            StatementType::Jdbc => "jdbc",
        }
    }
}

/// One lexically delimited unit of a script.
///
/// Spans tile the script: `text` is the verbatim slice
/// `start_offset..end_offset`, so concatenating every span's text gives the
/// original script back. `body_start..body_end` is the statement itself with
/// surrounding whitespace and comments excluded, and `range` is the same region
/// expressed as line/character positions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatementSpan {
    pub start_offset: usize,
    pub end_offset: usize,
    pub body_start: usize,
    pub body_end: usize,
    pub range: Range,
    pub statement_type: StatementType,
    pub text: String,
    /// Set when the span ends inside an unterminated quote or block comment.
    pub malformed: bool,
    pub command: Option<ToolCommand>,
}

impl StatementSpan {
    pub fn start_line(&self) -> usize {
        self.range.start.line
    }

    pub fn end_line(&self) -> usize {
        self.range.end.line
    }

    pub fn contains_offset(&self, offset: usize) -> bool {
        offset >= self.body_start && offset <= self.body_end
    }

    /// The statement body as written, terminator included.
    pub fn body(&self) -> &str {
        let start = self.body_start - self.start_offset;
        let end = self.body_end - self.start_offset;
        &self.text[start..end]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BindDataType {
    Char,
    Nchar,
    Nvarchar2,
    Date,
    Varchar2,
    Number,
    Float,
    Long,
    BinaryFloat,
    BinaryDouble,
    Timestamp,
    TimestampWithTimeZone,
    TimestampWithLocalTimeZone,
    IntervalYearToMonth,
    Intervalym,
    IntervalDayToSecond,
    Intervalds,
    Raw,
    Refcursor,
    SysRefcursor,
    LongRaw,
    Rowid,
    Urowid,
    Clob,
    Nclob,
    Blob,
    Bfile,
    Json,
    Xml,
}

impl BindDataType {
    pub fn is_cursor(self) -> bool {
        matches!(self, BindDataType::Refcursor | BindDataType::SysRefcursor)
    }

    pub fn display(self) -> &'static str {
        match self {
            BindDataType::Char => "CHAR",
            BindDataType::Nchar => "NCHAR",
            BindDataType::Nvarchar2 => "NVARCHAR2",
            BindDataType::Date => "DATE",
            BindDataType::Varchar2 => "VARCHAR2",
            BindDataType::Number => "NUMBER",
            BindDataType::Float => "FLOAT",
            BindDataType::Long => "LONG",
            BindDataType::BinaryFloat => "BINARY_FLOAT",
            BindDataType::BinaryDouble => "BINARY_DOUBLE",
            BindDataType::Timestamp => "TIMESTAMP",
            BindDataType::TimestampWithTimeZone => "TIMESTAMP WITH TIME ZONE",
            BindDataType::TimestampWithLocalTimeZone => "TIMESTAMP WITH LOCAL TIME ZONE",
            BindDataType::IntervalYearToMonth | BindDataType::Intervalym => {
                "INTERVAL YEAR TO MONTH"
            }
            BindDataType::IntervalDayToSecond | BindDataType::Intervalds => {
                "INTERVAL DAY TO SECOND"
            }
            BindDataType::Raw => "RAW",
            BindDataType::Refcursor => "REFCURSOR",
            BindDataType::SysRefcursor => "SYS_REFCURSOR",
            BindDataType::LongRaw => "LONG RAW",
            BindDataType::Rowid => "ROWID",
            BindDataType::Urowid => "UROWID",
            BindDataType::Clob => "CLOB",
            BindDataType::Nclob => "NCLOB",
            BindDataType::Blob => "BLOB",
            BindDataType::Bfile => "BFILE",
            BindDataType::Json => "JSON",
            BindDataType::Xml => "XML",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum BindMode {
    In,
    Out,
    Inout,
    #[default]
    Unknown,
    Returning,
}

impl BindMode {
    pub fn reads_back(self) -> bool {
        matches!(self, BindMode::Out | BindMode::Inout | BindMode::Returning)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BindVariable {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    pub data_type: BindDataType,
    #[serde(default)]
    pub mode: BindMode,
}

impl BindVariable {
    pub fn new(name: &str, value: Option<&str>, data_type: BindDataType) -> Self {
        Self {
            name: name.to_string(),
            value: value.map(str::to_string),
            data_type,
            mode: BindMode::Unknown,
        }
    }

    pub fn with_mode(mut self, mode: BindMode) -> Self {
        self.mode = mode;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum EchoMode {
    #[default]
    Normal,
    Hidden,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubstitutionKind {
    PromptAlways,
    PromptFirst,
    Accept,
    Defined,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Substitution {
    pub name: String,
    pub kind: SubstitutionKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub range: Option<Range>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_value: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    pub echo_mode: EchoMode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    /// Byte range of the placeholder in the script; `None` for ACCEPT prompts.
    #[serde(skip)]
    pub(crate) offsets: Option<std::ops::Range<usize>>,
}

impl Substitution {
    pub fn is_resolved(&self) -> bool {
        self.value.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct SqlPrepareResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub statement_type: Option<StatementType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub statement_text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub statement_sql_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub statement_range: Option<Range>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub substitutions: Vec<Substitution>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub binds: Vec<BindVariable>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hyperlink {
    pub href: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rel: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
}

impl Hyperlink {
    pub fn next(href: String, title: &str) -> Self {
        Self {
            href,
            rel: Some("next".to_string()),
            title: Some(title.to_string()),
            media_type: Some("application/json".to_string()),
        }
    }

    pub fn is_next(&self) -> bool {
        self.rel.as_deref() == Some("next")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct SqlResultSetMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub column_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub json_column_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub column_type_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub precision: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scale: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_nullable: Option<bool>,
}

pub type SqlResultSetRow = Map<String, Value>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct SqlResultSet {
    pub metadata: Vec<SqlResultSetMetadata>,
    pub items: Vec<SqlResultSetRow>,
    pub has_more: bool,
    pub offset: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
    pub count: usize,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub links: Vec<Hyperlink>,
}

impl SqlResultSet {
    pub fn next_link(&self) -> Option<&Hyperlink> {
        self.links.iter().find(|link| link.is_next())
    }
}

/// A database or script-level error recorded against one statement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error, Default)]
#[serde(rename_all = "camelCase")]
#[error("{error_code}: {message}")]
pub struct SqlScriptError {
    pub error_code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cause: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub column: Option<usize>,
}

impl SqlScriptError {
    pub fn new(error_code: &str, message: &str) -> Self {
        Self {
            error_code: error_code.to_string(),
            message: message.to_string(),
            ..Self::default()
        }
    }

    pub fn cancelled() -> Self {
        Self::new("ORA-01013", "user requested cancel of current operation")
    }

    pub fn with_cause(mut self, cause: &str) -> Self {
        self.cause = Some(cause.to_string());
        self
    }

    pub fn with_action(mut self, action: &str) -> Self {
        self.action = Some(action.to_string());
        self
    }

    /// Numeric part of an `ORA-00942` style code.
    pub fn numeric_code(&self) -> Option<i64> {
        let digits: String = self
            .error_code
            .chars()
            .skip_while(|c| !c.is_ascii_digit())
            .take_while(|c| c.is_ascii_digit())
            .collect();
        digits.parse().ok()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct StatementPos {
    pub start_line: usize,
    pub end_line: usize,
}

/// Outcome of one statement in a script run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct SqlStatementResponse {
    pub statement_id: usize,
    pub statement_type: Option<StatementType>,
    pub statement_pos: StatementPos,
    pub statement_text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub statement_sql_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_set: Option<SqlResultSet>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub response: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub binds: Vec<BindVariable>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<SqlScriptError>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_line: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_column: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_details: Option<String>,
    /// Rows affected by DML.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<u64>,
}

impl SqlStatementResponse {
    pub fn for_span(statement_id: usize, span: &StatementSpan, text: &str) -> Self {
        Self {
            statement_id,
            statement_type: Some(span.statement_type),
            statement_pos: StatementPos {
                start_line: span.start_line(),
                end_line: span.end_line(),
            },
            statement_text: text.to_string(),
            ..Self::default()
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    /// Records the error and mirrors it into the legacy flat fields.
    pub fn set_error(&mut self, error: SqlScriptError) {
        self.error_code = error.numeric_code();
        self.error_line = error.line;
        self.error_column = error.column;
        self.error_message = Some(error.message.clone());
        self.error_details = error.cause.clone();
        self.result_set = None;
        self.result = None;
        self.error = Some(error);
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ScriptEnv {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_time_zone: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct SqlScriptResponse {
    pub env: ScriptEnv,
    pub items: Vec<SqlStatementResponse>,
    pub has_more: bool,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub links: Vec<Hyperlink>,
}

impl SqlScriptResponse {
    pub fn next_link(&self) -> Option<&Hyperlink> {
        self.links.iter().find(|link| link.is_next())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SqlQuery {
    pub sql: String,
    pub binds: Vec<BindVariable>,
}

impl SqlQuery {
    pub fn new(sql: &str) -> Self {
        Self {
            sql: sql.to_string(),
            binds: Vec::new(),
        }
    }

    pub fn with_bind(mut self, bind: BindVariable) -> Self {
        self.binds.push(bind);
        self
    }
}

/// A script plus the values the caller supplies for substitution prompts.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SqlScript {
    pub sql: String,
    pub binds: Vec<BindVariable>,
    pub substitutions: BTreeMap<String, String>,
}

impl SqlScript {
    pub fn new(sql: &str) -> Self {
        Self {
            sql: sql.to_string(),
            ..Self::default()
        }
    }

    pub fn with_bind(mut self, bind: BindVariable) -> Self {
        self.binds.push(bind);
        self
    }

    pub fn with_substitution(mut self, name: &str, value: &str) -> Self {
        self.substitutions
            .insert(name.trim().to_uppercase(), value.to_string());
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct QueryExecutionOptions {
    pub page_size: Option<usize>,
    pub timeout: Option<Duration>,
    pub cancel: Option<CancelToken>,
}

impl QueryExecutionOptions {
    pub fn with_page_size(page_size: usize) -> Self {
        Self {
            page_size: Some(page_size),
            ..Self::default()
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = Some(cancel);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ResponseFormat {
    #[default]
    Json,
    Text,
    Binary,
}

impl std::str::FromStr for ResponseFormat {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(ResponseFormat::Json),
            "text" => Ok(ResponseFormat::Text),
            "binary" => Ok(ResponseFormat::Binary),
            other => Err(format!("unknown response format `{other}`")),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ScriptExecutionOptions {
    pub response_format: ResponseFormat,
    /// Rows per result page; only used by the JSON format.
    pub page_size: Option<usize>,
    /// Statements per script page; only used by the JSON format.
    pub statement_page_size: Option<usize>,
    pub timeout: Option<Duration>,
    pub cancel: Option<CancelToken>,
}

impl ScriptExecutionOptions {
    pub fn new(response_format: ResponseFormat) -> Self {
        Self {
            response_format,
            ..Self::default()
        }
    }

    pub fn json() -> Self {
        Self::new(ResponseFormat::Json)
    }

    pub fn text() -> Self {
        Self::new(ResponseFormat::Text)
    }

    pub fn binary() -> Self {
        Self::new(ResponseFormat::Binary)
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = Some(page_size);
        self
    }

    pub fn with_statement_page_size(mut self, size: usize) -> Self {
        self.statement_page_size = Some(size);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = Some(cancel);
        self
    }
}

/// Script-control directives understood by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolCommand {
    Define {
        name: String,
        value: String,
    },
    ShowDefine {
        name: Option<String>,
    },
    Undefine {
        names: Vec<String>,
    },
    Accept {
        name: String,
        data_type: Option<String>,
        format: Option<String>,
        default_value: Option<String>,
        prompt: Option<String>,
        hide: bool,
    },
    Prompt {
        text: String,
    },
    Var {
        name: String,
        data_type: BindDataType,
        size: Option<u32>,
    },
    Print {
        name: Option<String>,
    },
    SetDefine {
        enabled: bool,
        define_char: Option<char>,
    },
    SetScan {
        enabled: bool,
    },
    SetServerOutput {
        enabled: bool,
        size: Option<u32>,
        unlimited: bool,
    },
    SetFeedback {
        enabled: bool,
    },
    SetTiming {
        enabled: bool,
    },
    WheneverSqlError {
        exit: bool,
    },
    Exit,
    Unsupported {
        raw: String,
        message: String,
    },
}
