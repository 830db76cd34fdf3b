use serde_json::Value;

use crate::db::query::{ScriptEnv, SqlResultSet, SqlScriptError, SqlStatementResponse};

/// SQL Developer style transcript: feedback lines as they were recorded,
/// query rows as an aligned table, errors as `Error starting at line` blocks.
/// An error never stops the transcript; the next statement follows it.
pub fn render_script(_env: &ScriptEnv, items: &[SqlStatementResponse]) -> String {
    let mut out = String::new();
    for item in items {
        render_statement(&mut out, item);
    }
    out
}

fn render_statement(out: &mut String, item: &SqlStatementResponse) {
    if let Some(error) = &item.error {
        render_error(out, item, error);
        for line in &item.response {
            push_line(out, line);
        }
        out.push('\n');
        return;
    }

    if let Some(result_set) = &item.result_set {
        if !result_set.metadata.is_empty() {
            render_table(out, result_set);
        }
    }
    for line in &item.response {
        push_line(out, line);
    }
    if item.result_set.is_some() || !item.response.is_empty() {
        out.push('\n');
    }
}

/// `statement_pos` is zero-based; the transcript counts lines from 1.
fn render_error(out: &mut String, item: &SqlStatementResponse, error: &SqlScriptError) {
    push_line(
        out,
        &format!(
            "Error starting at line : {} in command -",
            item.statement_pos.start_line + 1
        ),
    );
    push_line(out, item.statement_text.trim_end());
    push_line(out, "Error report -");
    push_line(out, &error.to_string());
    if let Some(cause) = &error.cause {
        push_line(out, &format!("*Cause:    {cause}"));
    }
    if let Some(action) = &error.action {
        push_line(out, &format!("*Action:   {action}"));
    }
}

fn render_table(out: &mut String, result_set: &SqlResultSet) {
    let headers: Vec<String> = result_set
        .metadata
        .iter()
        .enumerate()
        .map(|(idx, column)| {
            column
                .column_name
                .clone()
                .unwrap_or_else(|| format!("COLUMN_{}", idx + 1))
        })
        .collect();
    let keys: Vec<String> = result_set
        .metadata
        .iter()
        .map(|column| column.json_column_name.clone().unwrap_or_default())
        .collect();

    let rows: Vec<Vec<(String, bool)>> = result_set
        .items
        .iter()
        .map(|row| keys.iter().map(|key| cell(row.get(key))).collect())
        .collect();

    let mut widths: Vec<usize> = headers.iter().map(|h| h.chars().count()).collect();
    for row in &rows {
        for (idx, (text, _)) in row.iter().enumerate() {
            widths[idx] = widths[idx].max(text.chars().count());
        }
    }

    let header_line: Vec<String> = headers
        .iter()
        .zip(&widths)
        .map(|(header, width)| format!("{header:<width$}"))
        .collect();
    push_line(out, header_line.join(" ").trim_end());
    let rule: Vec<String> = widths.iter().map(|width| "-".repeat(*width)).collect();
    push_line(out, &rule.join(" "));

    for row in &rows {
        let line: Vec<String> = row
            .iter()
            .zip(&widths)
            .map(|((text, numeric), width)| {
                if *numeric {
                    format!("{text:>width$}")
                } else {
                    format!("{text:<width$}")
                }
            })
            .collect();
        push_line(out, line.join(" ").trim_end());
    }

    out.push('\n');
    push_line(out, &rows_selected(result_set.count));
}

/// Display text and whether it is right-aligned.
fn cell(value: Option<&Value>) -> (String, bool) {
    match value {
        None | Some(Value::Null) => (String::new(), false),
        Some(Value::String(text)) => (text.clone(), false),
        Some(Value::Number(number)) => (number.to_string(), true),
        Some(other) => (other.to_string(), false),
    }
}

fn rows_selected(count: usize) -> String {
    match count {
        0 => "no rows selected".to_string(),
        1 => "1 row selected.".to_string(),
        n => format!("{n} rows selected."),
    }
}

fn push_line(out: &mut String, line: &str) {
    out.push_str(line);
    out.push('\n');
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::query::{SqlResultSetMetadata, StatementPos, StatementType};
    use serde_json::json;

    fn column(name: &str, type_name: &str) -> SqlResultSetMetadata {
        SqlResultSetMetadata {
            column_name: Some(name.to_string()),
            json_column_name: Some(name.to_lowercase()),
            column_type_name: Some(type_name.to_string()),
            ..SqlResultSetMetadata::default()
        }
    }

    #[test]
    fn renders_rows_as_an_aligned_table() {
        let rows = vec![
            json!({"empno": 7369, "ename": "SMITH"}),
            json!({"empno": 7499, "ename": null}),
        ];
        let item = SqlStatementResponse {
            statement_type: Some(StatementType::Query),
            result_set: Some(SqlResultSet {
                metadata: vec![column("EMPNO", "NUMBER"), column("ENAME", "VARCHAR2")],
                items: rows
                    .into_iter()
                    .filter_map(|row| row.as_object().cloned())
                    .collect(),
                count: 2,
                ..SqlResultSet::default()
            }),
            ..SqlStatementResponse::default()
        };

        let transcript = render_script(&ScriptEnv::default(), &[item]);
        assert_eq!(
            transcript,
            "EMPNO ENAME\n----- -----\n 7369 SMITH\n 7499\n\n2 rows selected.\n\n"
        );
    }

    #[test]
    fn errors_render_inline_and_the_transcript_continues() {
        let mut failed = SqlStatementResponse {
            statement_id: 0,
            statement_pos: StatementPos {
                start_line: 2,
                end_line: 2,
            },
            statement_text: "insert into t values (1)".to_string(),
            ..SqlStatementResponse::default()
        };
        failed.set_error(
            SqlScriptError::new("ORA-00001", "unique constraint (SCOTT.PK_T) violated")
                .with_cause("An UPDATE or INSERT statement attempted to insert a duplicate key.")
                .with_action("Either remove the unique restriction or do not insert the key."),
        );
        let next = SqlStatementResponse {
            statement_id: 1,
            response: vec!["Commit complete.".to_string()],
            ..SqlStatementResponse::default()
        };

        let transcript = render_script(&ScriptEnv::default(), &[failed, next]);
        let lines: Vec<&str> = transcript.lines().collect();
        assert_eq!(lines[0], "Error starting at line : 3 in command -");
        assert_eq!(lines[1], "insert into t values (1)");
        assert_eq!(lines[2], "Error report -");
        assert_eq!(lines[3], "ORA-00001: unique constraint (SCOTT.PK_T) violated");
        assert!(lines[4].starts_with("*Cause:    An UPDATE"));
        assert!(lines[5].starts_with("*Action:   Either remove"));
        assert_eq!(lines[7], "Commit complete.");
    }

    #[test]
    fn empty_queries_say_no_rows_selected() {
        let item = SqlStatementResponse {
            result_set: Some(SqlResultSet {
                metadata: vec![column("DUMMY", "VARCHAR2")],
                ..SqlResultSet::default()
            }),
            ..SqlStatementResponse::default()
        };
        let transcript = render_script(&ScriptEnv::default(), &[item]);
        assert!(transcript.ends_with("\nno rows selected\n\n"));
    }
}
