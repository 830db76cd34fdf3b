use once_cell::sync::Lazy;
use std::collections::HashSet;

use super::types::{BindDataType, StatementType, ToolCommand};

static DML_KEYWORDS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    ["INSERT", "UPDATE", "DELETE", "MERGE", "CALL", "LOCK", "EXPLAIN"]
        .into_iter()
        .collect()
});

static DDL_KEYWORDS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "CREATE", "ALTER", "DROP", "TRUNCATE", "RENAME", "GRANT", "REVOKE", "COMMENT",
        "AUDIT", "NOAUDIT", "ANALYZE", "FLASHBACK", "PURGE", "ASSOCIATE", "DISASSOCIATE",
    ]
    .into_iter()
    .collect()
});

static PLSQL_UNITS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    ["PROCEDURE", "FUNCTION", "PACKAGE", "TYPE", "TRIGGER", "LIBRARY"]
        .into_iter()
        .collect()
});

static TRANSACTION_KEYWORDS: Lazy<HashSet<&'static str>> =
    Lazy::new(|| ["COMMIT", "ROLLBACK", "SAVEPOINT"].into_iter().collect());

/// Returns `sql` with leading whitespace and comments removed.
pub fn strip_leading_comments(sql: &str) -> &str {
    let mut remaining = sql;

    loop {
        let trimmed = remaining.trim_start();

        if let Some(rest) = trimmed.strip_prefix("--") {
            match rest.find('\n') {
                Some(line_end) => {
                    remaining = &rest[line_end + 1..];
                    continue;
                }
                None => return "",
            }
        }

        if let Some(rest) = trimmed.strip_prefix("/*") {
            match rest.find("*/") {
                Some(block_end) => {
                    remaining = &rest[block_end + 2..];
                    continue;
                }
                None => return "",
            }
        }

        return trimmed;
    }
}

/// Upper-cased leading words, split on whitespace and punctuation.
pub fn leading_words(sql: &str, count: usize) -> Vec<String> {
    strip_leading_comments(sql)
        .split(|c: char| !(c.is_alphanumeric() || c == '_' || c == '$' || c == '#'))
        .filter(|word| !word.is_empty())
        .take(count)
        .map(|word| word.to_uppercase())
        .collect()
}

pub fn leading_keyword(sql: &str) -> Option<String> {
    leading_words(sql, 1).into_iter().next()
}

/// Classifies one statement body by its leading keywords.
pub fn classify(sql: &str) -> StatementType {
    let body = strip_leading_comments(sql);
    // A stray `;` left after a terminated statement.
    if body.chars().all(|c| c == ';' || c.is_whitespace()) {
        return StatementType::Ignore;
    }
    if body.starts_with('{') {
        return StatementType::Jdbc;
    }
    if body.starts_with('(') {
        return StatementType::Query;
    }
    if parse_tool_command(body.lines().next().unwrap_or_default()).is_some() {
        return StatementType::Sqlplus;
    }

    let words = leading_words(body, 6);
    let Some(first) = words.first().map(String::as_str) else {
        return StatementType::Other;
    };
    let second = words.get(1).map(String::as_str);

    match first {
        "SELECT" | "WITH" | "VALUES" => StatementType::Query,
        "BEGIN" | "DECLARE" | "EXEC" | "EXECUTE" => StatementType::Plsql,
        "CREATE" if creates_plsql_unit(&words) => StatementType::Plsql,
        "ALTER" if second == Some("SESSION") => StatementType::SessionControl,
        "ALTER" if second == Some("SYSTEM") => StatementType::SystemControl,
        "SET" if second == Some("TRANSACTION") => StatementType::TransactionControl,
        "SET" if matches!(second, Some("ROLE") | Some("CONSTRAINT") | Some("CONSTRAINTS")) => {
            StatementType::SessionControl
        }
        word if TRANSACTION_KEYWORDS.contains(word) => StatementType::TransactionControl,
        word if DML_KEYWORDS.contains(word) => StatementType::Dml,
        word if DDL_KEYWORDS.contains(word) => StatementType::Ddl,
        _ => StatementType::Other,
    }
}

fn creates_plsql_unit(words: &[String]) -> bool {
    let mut idx = 1usize;
    if words.get(idx).map(String::as_str) == Some("OR")
        && words.get(idx + 1).map(String::as_str) == Some("REPLACE")
    {
        idx += 2;
    }
    if matches!(
        words.get(idx).map(String::as_str),
        Some("EDITIONABLE") | Some("NONEDITIONABLE")
    ) {
        idx += 1;
    }
    words
        .get(idx)
        .is_some_and(|word| PLSQL_UNITS.contains(word.as_str()))
}

/// Parses one line as a script directive. Returns `None` for plain SQL.
pub fn parse_tool_command(line: &str) -> Option<ToolCommand> {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with("--") || trimmed.starts_with("/*") {
        return None;
    }
    let trimmed = trimmed.trim_end_matches(';').trim();
    if trimmed.is_empty() {
        return None;
    }

    let upper = trimmed.to_uppercase();

    if is_word_command(&upper, "VAR") || is_word_command(&upper, "VARIABLE") {
        return Some(parse_var_command(trimmed));
    }

    if is_word_command(&upper, "PRINT") {
        let rest = word_tail(trimmed);
        let name = if rest.is_empty() {
            None
        } else {
            Some(rest.trim_start_matches(':').to_uppercase())
        };
        return Some(ToolCommand::Print { name });
    }

    if is_word_command(&upper, "PROMPT") || is_word_command(&upper, "PRO") {
        return Some(ToolCommand::Prompt {
            text: word_tail(trimmed).to_string(),
        });
    }

    if is_word_command(&upper, "ACCEPT") || is_word_command(&upper, "ACC") {
        return Some(parse_accept_command(trimmed));
    }

    if is_word_command(&upper, "DEFINE") || is_word_command(&upper, "DEF") {
        if word_tail(trimmed).is_empty() {
            // MATCH_RECOGNIZE DEFINE clause marker: keep it as SQL text.
            return None;
        }
        return Some(parse_define_assign_command(trimmed));
    }

    if is_word_command(&upper, "UNDEFINE") || is_word_command(&upper, "UNDEF") {
        return Some(parse_undefine_command(trimmed));
    }

    if is_word_command(&upper, "SET") {
        return parse_set_command(trimmed, &upper);
    }

    if upper.starts_with("WHENEVER SQLERROR") {
        return Some(parse_whenever_sqlerror_command(trimmed));
    }

    if upper.starts_with("WHENEVER OSERROR") {
        return Some(unsupported(trimmed, "WHENEVER OSERROR is not supported in a worksheet."));
    }

    if is_word_command(&upper, "EXIT") || is_word_command(&upper, "QUIT") {
        return Some(ToolCommand::Exit);
    }

    if is_word_command(&upper, "SPOOL") || is_word_command(&upper, "SPO") {
        return Some(unsupported(trimmed, "SPOOL is not supported in a worksheet."));
    }

    if trimmed.starts_with('@') || is_start_script_command(trimmed) {
        return Some(unsupported(
            trimmed,
            "Running nested script files is not supported in a worksheet.",
        ));
    }

    if (is_word_command(&upper, "CONNECT") && !upper.starts_with("CONNECT BY"))
        || is_word_command(&upper, "CONN")
    {
        return Some(unsupported(
            trimmed,
            "CONNECT is not supported in a worksheet; attach a connection instead.",
        ));
    }

    if upper == "DISCONNECT" || upper == "DISC" {
        return Some(unsupported(
            trimmed,
            "DISCONNECT is not supported in a worksheet; detach the connection instead.",
        ));
    }

    if is_word_command(&upper, "DESC") || is_word_command(&upper, "DESCRIBE") {
        return Some(unsupported(trimmed, "DESCRIBE is not supported in a worksheet."));
    }

    if is_word_command(&upper, "SHOW") || is_word_command(&upper, "SHO") {
        return Some(unsupported(trimmed, "SHOW is not supported in a worksheet."));
    }

    None
}

/// Directives that also end a statement still waiting for its terminator.
///
/// DEFINE and unsupported SET options are left out: `DEFINE` opens the
/// MATCH_RECOGNIZE clause and `SET col = ...` continues an UPDATE.
pub(crate) fn interrupts_statement(command: &ToolCommand) -> bool {
    matches!(
        command,
        ToolCommand::Prompt { .. }
            | ToolCommand::Var { .. }
            | ToolCommand::Print { .. }
            | ToolCommand::Accept { .. }
            | ToolCommand::Undefine { .. }
            | ToolCommand::SetDefine { .. }
            | ToolCommand::SetScan { .. }
            | ToolCommand::SetServerOutput { .. }
            | ToolCommand::SetFeedback { .. }
            | ToolCommand::SetTiming { .. }
            | ToolCommand::WheneverSqlError { .. }
    )
}

fn unsupported(raw: &str, message: &str) -> ToolCommand {
    ToolCommand::Unsupported {
        raw: raw.to_string(),
        message: message.to_string(),
    }
}

/// Text after the first word of `raw`.
fn word_tail(raw: &str) -> &str {
    raw.split_once(char::is_whitespace)
        .map(|(_, rest)| rest.trim())
        .unwrap_or_default()
}

fn is_word_command(upper: &str, command: &str) -> bool {
    if upper == command {
        return true;
    }
    upper
        .strip_prefix(command)
        .and_then(|tail| tail.chars().next())
        .map(|ch| ch.is_whitespace())
        .unwrap_or(false)
}

fn is_start_script_command(trimmed: &str) -> bool {
    let upper = trimmed.to_uppercase();
    if !is_word_command(&upper, "START") && !is_word_command(&upper, "STA") {
        return false;
    }
    // START WITH belongs to hierarchical queries.
    let rest = word_tail(&upper);
    !rest.is_empty() && !rest.starts_with("WITH")
}

fn parse_var_command(raw: &str) -> ToolCommand {
    let mut parts = raw.split_whitespace();
    let _ = parts.next(); // VAR or VARIABLE
    let name = parts.next().unwrap_or_default();
    let type_str = parts.collect::<Vec<&str>>().join(" ");

    if name.is_empty() || type_str.trim().is_empty() {
        return unsupported(raw, "VAR requires a variable name and type.");
    }

    match parse_bind_type(&type_str) {
        Ok((data_type, size)) => ToolCommand::Var {
            name: name.trim_start_matches(':').to_uppercase(),
            data_type,
            size,
        },
        Err(message) => unsupported(raw, &message),
    }
}

/// Splits on whitespace while keeping quoted text together, quotes removed.
fn quoted_tokens(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;

    for ch in text.chars() {
        match quote {
            Some(q) if ch == q => {
                quote = None;
                tokens.push(std::mem::take(&mut current));
            }
            Some(_) => current.push(ch),
            None if ch == '\'' || ch == '"' => {
                if !current.is_empty() {
                    tokens.push(std::mem::take(&mut current));
                }
                quote = Some(ch);
            }
            None if ch.is_whitespace() => {
                if !current.is_empty() {
                    tokens.push(std::mem::take(&mut current));
                }
            }
            None => current.push(ch),
        }
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}

fn parse_accept_command(raw: &str) -> ToolCommand {
    let tokens = quoted_tokens(word_tail(raw));
    let Some(name) = tokens.first() else {
        return unsupported(raw, "ACCEPT requires a variable name.");
    };

    let mut data_type = None;
    let mut format = None;
    let mut default_value = None;
    let mut prompt = None;
    let mut hide = false;

    let mut idx = 1usize;
    while idx < tokens.len() {
        let keyword = tokens[idx].to_uppercase();
        let value = tokens.get(idx + 1).cloned();
        match keyword.as_str() {
            "NUM" | "NUMBER" | "CHAR" | "DATE" | "BINARY_FLOAT" | "BINARY_DOUBLE" => {
                data_type = Some(if keyword == "NUM" {
                    "NUMBER".to_string()
                } else {
                    keyword
                });
            }
            "FOR" | "FORMAT" => {
                format = value;
                idx += 1;
            }
            "DEF" | "DEFAULT" => {
                default_value = value;
                idx += 1;
            }
            "PROMPT" => {
                // PROMPT takes the rest of the line when it is not quoted.
                let rest = tokens[idx + 1..].join(" ");
                let rest = rest
                    .split_whitespace()
                    .filter(|word| !word.eq_ignore_ascii_case("HIDE"))
                    .collect::<Vec<_>>()
                    .join(" ");
                hide |= tokens[idx + 1..]
                    .iter()
                    .any(|token| token.eq_ignore_ascii_case("HIDE"));
                if !rest.is_empty() {
                    prompt = Some(rest);
                }
                break;
            }
            "NOPR" | "NOPROMPT" => {
                prompt = None;
            }
            "HIDE" => hide = true,
            _ => {}
        }
        idx += 1;
    }

    ToolCommand::Accept {
        name: name.trim_start_matches(':').to_uppercase(),
        data_type,
        format,
        default_value,
        prompt,
        hide,
    }
}

fn parse_define_assign_command(raw: &str) -> ToolCommand {
    let rest = word_tail(raw);

    if let Some((name, value)) = rest.split_once('=') {
        let name = name.trim();
        if name.is_empty() {
            return unsupported(raw, "DEFINE requires a variable name.");
        }
        return ToolCommand::Define {
            name: name.to_uppercase(),
            value: unquote(value.trim()),
        };
    }

    match rest.split_once(char::is_whitespace) {
        Some((name, value)) => ToolCommand::Define {
            name: name.to_uppercase(),
            value: unquote(value.trim()),
        },
        None => ToolCommand::ShowDefine {
            name: Some(rest.to_uppercase()),
        },
    }
}

fn unquote(value: &str) -> String {
    for quote in ['\'', '"'] {
        if value.len() >= 2 && value.starts_with(quote) && value.ends_with(quote) {
            return value[1..value.len() - 1].to_string();
        }
    }
    value.to_string()
}

fn parse_undefine_command(raw: &str) -> ToolCommand {
    let names: Vec<String> = word_tail(raw)
        .split_whitespace()
        .map(|name| name.to_uppercase())
        .collect();
    if names.is_empty() {
        return unsupported(raw, "UNDEFINE requires at least one variable name.");
    }
    ToolCommand::Undefine { names }
}

fn parse_set_command(raw: &str, upper: &str) -> Option<ToolCommand> {
    let tokens: Vec<&str> = upper.split_whitespace().collect();
    let option = tokens.get(1).copied().unwrap_or_default();
    // `SET col = value` is the continuation of an UPDATE, whatever the column is called.
    if tokens.get(2).is_some_and(|token| token.starts_with('=')) || option.contains('=') {
        return None;
    }

    match option {
        // Plain SQL statements that start with SET.
        "TRANSACTION" | "ROLE" | "CONSTRAINT" | "CONSTRAINTS" => None,
        "SERVEROUTPUT" | "SERVEROUT" => Some(parse_serveroutput_command(raw)),
        "DEFINE" | "DEF" => Some(parse_define_command(raw)),
        "SCAN" => Some(match on_off(tokens.get(2).copied()) {
            Some(enabled) => ToolCommand::SetScan { enabled },
            None => unsupported(raw, "SET SCAN requires ON or OFF."),
        }),
        "FEEDBACK" | "FEED" => Some(match tokens.get(2).copied() {
            Some(value) if value.chars().all(|c| c.is_ascii_digit()) => {
                ToolCommand::SetFeedback {
                    enabled: value != "0",
                }
            }
            value => match on_off(value) {
                Some(enabled) => ToolCommand::SetFeedback { enabled },
                None => unsupported(raw, "SET FEEDBACK requires ON, OFF or a row count."),
            },
        }),
        "TIMING" | "TIMI" => Some(match on_off(tokens.get(2).copied()) {
            Some(enabled) => ToolCommand::SetTiming { enabled },
            None => unsupported(raw, "SET TIMING requires ON or OFF."),
        }),
        _ => Some(unsupported(
            raw,
            &format!("SET {option} is not supported in a worksheet."),
        )),
    }
}

fn on_off(value: Option<&str>) -> Option<bool> {
    match value {
        Some("ON") => Some(true),
        Some("OFF") => Some(false),
        _ => None,
    }
}

fn parse_serveroutput_command(raw: &str) -> ToolCommand {
    let tokens: Vec<&str> = raw.split_whitespace().collect();
    let Some(mode) = tokens.get(2).map(|token| token.to_uppercase()) else {
        return unsupported(raw, "SET SERVEROUTPUT requires ON or OFF.");
    };

    if mode == "OFF" {
        return ToolCommand::SetServerOutput {
            enabled: false,
            size: None,
            unlimited: false,
        };
    }

    if mode != "ON" {
        return unsupported(raw, "SET SERVEROUTPUT supports only ON or OFF.");
    }

    let mut size: Option<u32> = None;
    let mut unlimited = false;
    let mut idx = 3usize;
    while idx + 1 < tokens.len() {
        if tokens[idx].eq_ignore_ascii_case("SIZE") {
            let size_val = tokens[idx + 1];
            if size_val.eq_ignore_ascii_case("UNLIMITED") {
                unlimited = true;
            } else {
                match size_val.parse::<u32>() {
                    Ok(val) => size = Some(val),
                    Err(_) => {
                        return unsupported(
                            raw,
                            "SET SERVEROUTPUT SIZE must be a number or UNLIMITED.",
                        );
                    }
                }
            }
            break;
        }
        idx += 1;
    }

    ToolCommand::SetServerOutput {
        enabled: true,
        size,
        unlimited,
    }
}

fn parse_define_command(raw: &str) -> ToolCommand {
    let value = raw.split_whitespace().nth(2).unwrap_or_default();
    if value.is_empty() {
        return unsupported(raw, "SET DEFINE requires ON, OFF, or a single character.");
    }

    match value.to_uppercase().as_str() {
        "ON" => ToolCommand::SetDefine {
            enabled: true,
            define_char: None,
        },
        "OFF" => ToolCommand::SetDefine {
            enabled: false,
            define_char: None,
        },
        _ => {
            let unquoted = unquote(value);
            let mut chars = unquoted.chars();
            match (chars.next(), chars.next()) {
                (Some(ch), None) if !ch.is_alphanumeric() && !ch.is_whitespace() => {
                    ToolCommand::SetDefine {
                        enabled: true,
                        define_char: Some(ch),
                    }
                }
                _ => unsupported(raw, "SET DEFINE character must be a single symbol."),
            }
        }
    }
}

fn parse_whenever_sqlerror_command(raw: &str) -> ToolCommand {
    let action = raw
        .split_whitespace()
        .nth(2)
        .map(|token| token.to_uppercase())
        .unwrap_or_default();

    match action.as_str() {
        "EXIT" => ToolCommand::WheneverSqlError { exit: true },
        "CONTINUE" => ToolCommand::WheneverSqlError { exit: false },
        _ => unsupported(raw, "WHENEVER SQLERROR requires EXIT or CONTINUE."),
    }
}

/// Parses a VAR data type into its bind type and declared size.
pub(crate) fn parse_bind_type(type_str: &str) -> Result<(BindDataType, Option<u32>), String> {
    let trimmed = type_str.trim();
    if trimmed.is_empty() {
        return Err("VAR requires a data type.".to_string());
    }

    let upper = trimmed.to_uppercase();
    let compact = upper.replace(' ', "");
    let size = parse_parenthesized_u32(&upper);

    let data_type = if compact == "REFCURSOR" {
        BindDataType::Refcursor
    } else if compact == "SYS_REFCURSOR" {
        BindDataType::SysRefcursor
    } else if upper.starts_with("NUMBER") || upper.starts_with("NUMERIC") {
        BindDataType::Number
    } else if upper.starts_with("BINARY_FLOAT") {
        BindDataType::BinaryFloat
    } else if upper.starts_with("BINARY_DOUBLE") {
        BindDataType::BinaryDouble
    } else if upper.starts_with("DATE") {
        BindDataType::Date
    } else if compact.starts_with("TIMESTAMP") && compact.ends_with("WITHLOCALTIMEZONE") {
        BindDataType::TimestampWithLocalTimeZone
    } else if compact.starts_with("TIMESTAMP") && compact.ends_with("WITHTIMEZONE") {
        BindDataType::TimestampWithTimeZone
    } else if upper.starts_with("TIMESTAMP") {
        BindDataType::Timestamp
    } else if upper.starts_with("NCLOB") {
        BindDataType::Nclob
    } else if upper.starts_with("CLOB") {
        BindDataType::Clob
    } else if upper.starts_with("BLOB") {
        BindDataType::Blob
    } else if upper.starts_with("NVARCHAR2") {
        BindDataType::Nvarchar2
    } else if upper.starts_with("VARCHAR2") || upper.starts_with("VARCHAR") {
        BindDataType::Varchar2
    } else if upper.starts_with("NCHAR") {
        BindDataType::Nchar
    } else if upper.starts_with("CHAR") {
        BindDataType::Char
    } else if upper.starts_with("RAW") {
        BindDataType::Raw
    } else {
        return Err(format!("Unsupported VAR type: {}", trimmed));
    };

    Ok((data_type, size))
}

fn parse_parenthesized_u32(value: &str) -> Option<u32> {
    let start = value.find('(')?;
    let end = value[start + 1..].find(')')? + start + 1;
    value[start + 1..end]
        .split_whitespace()
        .next()?
        .parse::<u32>()
        .ok()
}
