use std::collections::{BTreeMap, HashSet};

use super::command::leading_words;
use super::types::{BindDataType, BindMode, BindVariable, SqlScriptError, StatementType};

/// A bind marker found in statement text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindMarker {
    /// Upper-cased name without the colon; positional markers keep their digits.
    pub name: String,
    /// Marker appears after RETURNING ... INTO.
    pub returning: bool,
}

/// Check if the SQL is a CREATE [OR REPLACE] TRIGGER statement.
/// Used to skip :NEW and :OLD pseudo-records from bind scanning.
pub(crate) fn is_create_trigger(sql: &str) -> bool {
    let tokens = leading_words(sql, 5);
    if tokens.first().map(String::as_str) != Some("CREATE") {
        return false;
    }
    for token in tokens.iter().skip(1) {
        match token.as_str() {
            "OR" | "REPLACE" | "EDITIONABLE" | "NONEDITIONABLE" => continue,
            "TRIGGER" => return true,
            _ => return false,
        }
    }
    false
}

fn is_ident_char(ch: char) -> bool {
    ch.is_alphanumeric() || ch == '_' || ch == '$' || ch == '#'
}

/// Bind markers outside literals and comments, first occurrence order, each
/// name once. `::` casts and the trigger pseudo-records are skipped.
pub fn extract_bind_markers(sql: &str) -> Vec<BindMarker> {
    let mut markers: Vec<BindMarker> = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();
    let is_trigger = is_create_trigger(sql);

    let mut in_single_quote = false;
    let mut in_double_quote = false;
    let mut in_line_comment = false;
    let mut in_block_comment = false;
    let mut in_q_quote = false;
    let mut q_quote_end: Option<char> = None;

    let mut word = String::new();
    let mut after_returning = false;
    let mut returning_into = false;

    let chars: Vec<char> = sql.chars().collect();
    let len = chars.len();
    let mut i = 0usize;

    while i < len {
        let c = chars[i];
        let next = chars.get(i + 1).copied();
        let next2 = chars.get(i + 2).copied();

        if in_line_comment {
            if c == '\n' {
                in_line_comment = false;
            }
            i += 1;
            continue;
        }

        if in_block_comment {
            if c == '*' && next == Some('/') {
                in_block_comment = false;
                i += 2;
                continue;
            }
            i += 1;
            continue;
        }

        if in_q_quote {
            if Some(c) == q_quote_end && next == Some('\'') {
                in_q_quote = false;
                q_quote_end = None;
                i += 2;
                continue;
            }
            i += 1;
            continue;
        }

        if in_single_quote || in_double_quote {
            let quote = if in_single_quote { '\'' } else { '"' };
            if c == quote {
                if next == Some(quote) {
                    i += 2;
                    continue;
                }
                in_single_quote = false;
                in_double_quote = false;
            }
            i += 1;
            continue;
        }

        if c == '-' && next == Some('-') {
            in_line_comment = true;
            i += 2;
            continue;
        }

        if c == '/' && next == Some('*') {
            in_block_comment = true;
            i += 2;
            continue;
        }

        let q_start = if (c == 'n' || c == 'N') && matches!(next, Some('q') | Some('Q')) {
            (next2 == Some('\'')).then_some(3)
        } else if (c == 'q' || c == 'Q') && next == Some('\'') {
            Some(2)
        } else {
            None
        };
        if let Some(offset) = q_start.filter(|_| word.is_empty()) {
            if let Some(&delimiter) = chars.get(i + offset) {
                in_q_quote = true;
                q_quote_end = Some(match delimiter {
                    '[' => ']',
                    '(' => ')',
                    '{' => '}',
                    '<' => '>',
                    other => other,
                });
                i += offset + 1;
                continue;
            }
        }

        if c == '\'' {
            in_single_quote = true;
            i += 1;
            continue;
        }

        if c == '"' {
            in_double_quote = true;
            i += 1;
            continue;
        }

        if is_ident_char(c) {
            word.push(c);
            i += 1;
            continue;
        }

        if !word.is_empty() {
            let upper = word.to_uppercase();
            match upper.as_str() {
                "RETURNING" | "RETURN" => after_returning = true,
                "INTO" if after_returning => returning_into = true,
                _ => {}
            }
            word.clear();
        }
        if c == ';' {
            after_returning = false;
            returning_into = false;
        }

        if c == ':' {
            let prev = if i > 0 { Some(chars[i - 1]) } else { None };
            if prev == Some(':') || next == Some(':') || next == Some('=') {
                i += 1;
                continue;
            }

            if let Some(nc) = next.filter(|nc| is_ident_char(*nc)) {
                let mut j = i + 1;
                let digits_only = nc.is_ascii_digit();
                while j < len {
                    let ch = chars[j];
                    let accept = if digits_only {
                        ch.is_ascii_digit()
                    } else {
                        is_ident_char(ch)
                    };
                    if !accept {
                        break;
                    }
                    j += 1;
                }
                let name: String = chars[i + 1..j].iter().collect::<String>().to_uppercase();

                if is_trigger && (name == "NEW" || name == "OLD") {
                    i = j;
                    continue;
                }

                if seen.insert(name.clone()) {
                    markers.push(BindMarker {
                        name,
                        returning: returning_into,
                    });
                }
                i = j;
                continue;
            }
        }

        i += 1;
    }

    markers
}

pub fn extract_bind_names(sql: &str) -> Vec<String> {
    extract_bind_markers(sql)
        .into_iter()
        .map(|marker| marker.name)
        .collect()
}

/// A VAR declaration held by the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionVariable {
    pub data_type: BindDataType,
    pub size: Option<u32>,
    pub value: Option<String>,
}

/// Matches each marker in `sql` to a value: caller binds first, then session
/// VAR declarations. Fails with SP2-0552 for the first unbound marker.
pub fn resolve_binds(
    sql: &str,
    statement_type: StatementType,
    supplied: &[BindVariable],
    variables: &BTreeMap<String, SessionVariable>,
) -> Result<Vec<BindVariable>, SqlScriptError> {
    let mut resolved = Vec::new();

    for marker in extract_bind_markers(sql) {
        let supplied_bind = supplied
            .iter()
            .find(|bind| bind.name.trim_start_matches(':').eq_ignore_ascii_case(&marker.name));
        let variable = variables.get(&marker.name);

        let mode = if marker.returning {
            BindMode::Returning
        } else if statement_type == StatementType::Plsql {
            if variable.is_some() {
                BindMode::Inout
            } else {
                supplied_bind.map(|bind| bind.mode).unwrap_or_default()
            }
        } else {
            BindMode::In
        };

        let bind = match (supplied_bind, variable) {
            (Some(bind), _) => BindVariable {
                name: marker.name.clone(),
                value: bind.value.clone(),
                data_type: bind.data_type,
                mode: if bind.mode == BindMode::Unknown || marker.returning {
                    mode
                } else {
                    bind.mode
                },
            },
            (None, Some(variable)) => BindVariable {
                name: marker.name.clone(),
                value: variable.value.clone(),
                data_type: variable.data_type,
                mode,
            },
            (None, None) => {
                return Err(SqlScriptError::new(
                    "SP2-0552",
                    &format!("Bind variable \"{}\" not declared.", marker.name),
                ));
            }
        };
        resolved.push(bind);
    }

    Ok(resolved)
}
