//! Feedback lines printed after a statement completes.

use std::time::Duration;

use super::command::{leading_words, strip_leading_comments};
use super::types::StatementType;

/// `N rows inserted.` and friends for DML.
pub fn dml_message(sql: &str, affected_rows: u64) -> String {
    let verb = match leading_words(sql, 1).first().map(String::as_str) {
        Some("INSERT") => "inserted",
        Some("UPDATE") => "updated",
        Some("DELETE") => "deleted",
        Some("MERGE") => "merged",
        Some("LOCK") => return "Table(s) Locked.".to_string(),
        Some("CALL") => return "Call completed.".to_string(),
        Some("EXPLAIN") => return "Explained.".to_string(),
        _ => "processed",
    };
    let noun = if affected_rows == 1 { "row" } else { "rows" };
    format!("{affected_rows} {noun} {verb}.")
}

/// Feedback line for a statement that returned no rows to the caller.
pub fn completion_message(
    statement_type: StatementType,
    sql: &str,
    affected_rows: Option<u64>,
) -> Option<String> {
    match statement_type {
        StatementType::Dml => Some(dml_message(sql, affected_rows.unwrap_or(0))),
        StatementType::Ddl => Some(ddl_message(sql)),
        StatementType::Plsql => Some(plsql_message(sql)),
        StatementType::TransactionControl => Some(transaction_message(sql)),
        StatementType::SessionControl => Some(if sql_upper(sql).starts_with("ALTER SESSION") {
            format!("{}.", alter_session_message(&sql_upper(sql)))
        } else {
            "Session altered.".to_string()
        }),
        StatementType::SystemControl => Some("System altered.".to_string()),
        StatementType::Jdbc | StatementType::Other => {
            Some("Statement executed successfully.".to_string())
        }
        StatementType::Query | StatementType::Sqlplus | StatementType::Ignore => None,
    }
}

fn sql_upper(sql: &str) -> String {
    strip_leading_comments(sql).to_uppercase()
}

fn transaction_message(sql: &str) -> String {
    match leading_words(sql, 1).first().map(String::as_str) {
        Some("COMMIT") => "Commit complete.".to_string(),
        Some("ROLLBACK") => "Rollback complete.".to_string(),
        Some("SAVEPOINT") => "Savepoint created.".to_string(),
        _ => "Transaction set.".to_string(),
    }
}

fn plsql_message(sql: &str) -> String {
    let upper = sql_upper(sql);
    if upper.starts_with("CREATE") {
        return ddl_message(sql);
    }
    "PL/SQL procedure successfully completed.".to_string()
}

pub fn ddl_message(sql: &str) -> String {
    let sql_upper = sql_upper(sql);
    let message = if sql_upper.starts_with("CREATE") {
        format!("{} created", parse_ddl_object_type(&sql_upper))
    } else if sql_upper.starts_with("ALTER SESSION") {
        alter_session_message(&sql_upper)
    } else if sql_upper.starts_with("ALTER") {
        format!("{} altered", parse_ddl_object_type(&sql_upper))
    } else if sql_upper.starts_with("DROP") {
        format!("{} dropped", parse_ddl_object_type(&sql_upper))
    } else if sql_upper.starts_with("TRUNCATE") {
        "Table truncated".to_string()
    } else if sql_upper.starts_with("GRANT") {
        "Grant succeeded".to_string()
    } else if sql_upper.starts_with("REVOKE") {
        "Revoke succeeded".to_string()
    } else if sql_upper.starts_with("COMMENT") {
        "Comment created".to_string()
    } else if sql_upper.starts_with("RENAME") {
        "Table renamed".to_string()
    } else if sql_upper.starts_with("ANALYZE") {
        "Table analyzed".to_string()
    } else if sql_upper.starts_with("FLASHBACK") {
        "Flashback complete".to_string()
    } else if sql_upper.starts_with("PURGE") {
        "Recyclebin purged".to_string()
    } else {
        "Statement executed successfully".to_string()
    };
    format!("{message}.")
}

fn alter_session_message(sql_upper: &str) -> String {
    let tokens: Vec<&str> = sql_upper.split_whitespace().collect();
    if tokens.len() < 3 {
        return "Session altered".to_string();
    }

    match tokens[2] {
        "SET" => alter_session_set_message(&tokens),
        "ENABLE" | "DISABLE" => {
            let state = if tokens[2] == "ENABLE" {
                "enabled"
            } else {
                "disabled"
            };
            match tokens.get(3).copied() {
                Some("RESUMABLE") => format!("Session resumable mode {state}"),
                Some("PARALLEL") => format!("Session parallel mode {state}"),
                _ => format!("Session option {state}"),
            }
        }
        "ADVISE" => match tokens.get(3).copied() {
            Some(mode @ ("COMMIT" | "ROLLBACK" | "NOTHING")) => {
                format!("Session advise mode: {mode}")
            }
            _ => "Session advise mode updated".to_string(),
        },
        "CLOSE" if tokens.get(3).copied() == Some("DATABASE") => "Database link closed".to_string(),
        _ => "Session altered".to_string(),
    }
}

fn alter_session_set_message(tokens: &[&str]) -> String {
    let raw_target = match tokens.get(3).copied() {
        Some(token) if !token.is_empty() => token,
        _ => return "Session altered".to_string(),
    };
    let target = raw_target
        .split('=')
        .next()
        .unwrap_or(raw_target)
        .trim_matches(|c: char| matches!(c, '"' | '\'' | '(' | ')' | ',' | ';'));

    match target {
        "CURRENT_SCHEMA" => "Current schema changed".to_string(),
        "CONTAINER" => "Container changed".to_string(),
        "EDITION" => "Edition changed".to_string(),
        "TIME_ZONE" => "Session time zone changed".to_string(),
        _ => "Session altered".to_string(),
    }
}

/// Object type named by a DDL header. Only the leading tokens are examined so
/// keywords inside PL/SQL bodies cannot match.
pub fn parse_ddl_object_type(sql_upper: &str) -> &'static str {
    let tokens: Vec<&str> = sql_upper.split_whitespace().take(8).collect();
    if tokens.len() < 2 {
        return "Object";
    }

    let verb = tokens[0];
    let mut idx = 1usize;

    if tokens.get(idx).copied() == Some("IF") {
        if tokens.get(idx + 1).copied() == Some("NOT") && tokens.get(idx + 2).copied() == Some("EXISTS") {
            idx += 3;
        } else if tokens.get(idx + 1).copied() == Some("EXISTS") {
            idx += 2;
        }
    }

    if verb == "CREATE" {
        if tokens.get(idx).copied() == Some("OR") && tokens.get(idx + 1).copied() == Some("REPLACE") {
            idx += 2;
        }
        if matches!(tokens.get(idx).copied(), Some("EDITIONABLE") | Some("NONEDITIONABLE")) {
            idx += 1;
        }
        if tokens.get(idx).copied() == Some("NO") && tokens.get(idx + 1).copied() == Some("FORCE") {
            idx += 2;
        } else if tokens.get(idx).copied() == Some("FORCE") {
            idx += 1;
        }
    }

    let next_is = |offset: usize, word: &str| tokens.get(idx + offset).copied() == Some(word);

    match tokens.get(idx).copied() {
        Some("TABLE") => "Table",
        Some("GLOBAL") | Some("PRIVATE") if next_is(1, "TEMPORARY") || next_is(1, "TABLE") => "Table",
        Some("MATERIALIZED") if next_is(2, "LOG") => "Materialized View Log",
        Some("VIEW") => "View",
        Some("MATERIALIZED") => "Materialized View",
        Some("INDEX") | Some("UNIQUE") | Some("BITMAP") => "Index",
        Some("PROCEDURE") => "Procedure",
        Some("FUNCTION") => "Function",
        Some("PACKAGE") if next_is(1, "BODY") => "Package Body",
        Some("PACKAGE") => "Package",
        Some("TRIGGER") => "Trigger",
        Some("SEQUENCE") => "Sequence",
        Some("SYNONYM") => "Synonym",
        Some("PUBLIC") if next_is(1, "SYNONYM") => "Synonym",
        Some("PUBLIC") if next_is(1, "DATABASE") => "Database Link",
        Some("PRIVATE") if next_is(1, "SYNONYM") => "Synonym",
        Some("TYPE") if next_is(1, "BODY") => "Type Body",
        Some("TYPE") => "Type",
        Some("DATABASE") if next_is(1, "LINK") => "Database Link",
        Some("DIRECTORY") => "Directory",
        Some("TABLESPACE") => "Tablespace",
        Some("USER") => "User",
        Some("ROLE") => "Role",
        Some("PROFILE") => "Profile",
        Some("LIBRARY") => "Library",
        Some("CLUSTER") => "Cluster",
        Some("CONTEXT") => "Context",
        Some("DIMENSION") => "Dimension",
        Some("EDITION") => "Edition",
        _ => "Object",
    }
}

/// `Elapsed: hh:mm:ss.fff`
pub fn elapsed_message(elapsed: Duration) -> String {
    let total_millis = elapsed.as_millis();
    let hours = total_millis / 3_600_000;
    let minutes = (total_millis / 60_000) % 60;
    let seconds = (total_millis / 1000) % 60;
    let millis = total_millis % 1000;
    format!("Elapsed: {hours:02}:{minutes:02}:{seconds:02}.{millis:03}")
}
