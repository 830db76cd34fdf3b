use std::collections::BTreeMap;

use super::binds::{extract_bind_markers, SessionVariable};
use super::script::{split, LineIndex};
use super::substitution::SubstitutionResolver;
use super::types::{
    BindDataType, BindMode, BindVariable, Position, SqlPrepareResponse, StatementSpan,
    StatementType, SubstitutionKind, ToolCommand,
};

/// Answers "which statement is at this position and what does it need" without
/// executing anything.
#[derive(Debug, Clone, Default)]
pub struct StatementPreparer {
    resolver: SubstitutionResolver,
    variables: BTreeMap<String, SessionVariable>,
}

impl StatementPreparer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds the preparer with what a session already knows: DEFINEs and VARs.
    pub fn with_session(
        resolver: SubstitutionResolver,
        variables: BTreeMap<String, SessionVariable>,
    ) -> Self {
        Self {
            resolver,
            variables,
        }
    }

    pub fn prepare(&self, script: &str, position: Option<Position>) -> SqlPrepareResponse {
        let spans = split(script);
        let offset = position.map(|position| LineIndex::new(script).offset(position));
        let Some(index) = select_span(&spans, offset) else {
            return SqlPrepareResponse::default();
        };
        let span = &spans[index];

        let mut resolver = self.resolver.clone();
        let substitutions = resolver
            .resolve_script(&spans[..=index])
            .statements
            .pop()
            .unwrap_or_default()
            .into_iter()
            .filter(|substitution| substitution.kind != SubstitutionKind::Defined)
            .collect();

        let mut variables = self.variables.clone();
        for earlier in &spans[..index] {
            if let Some(ToolCommand::Var {
                name,
                data_type,
                size,
            }) = &earlier.command
            {
                variables.insert(
                    name.clone(),
                    SessionVariable {
                        data_type: *data_type,
                        size: *size,
                        value: None,
                    },
                );
            }
        }

        SqlPrepareResponse {
            statement_type: Some(span.statement_type),
            statement_text: Some(span.body().to_string()),
            statement_sql_id: None,
            statement_range: Some(span.range),
            substitutions,
            binds: declared_binds(span, &variables),
        }
    }
}

/// Span at `offset`: the one whose body contains it, else the nearest preceding
/// one, else the first following one. With no offset, the first executable span.
pub(crate) fn select_span(spans: &[StatementSpan], offset: Option<usize>) -> Option<usize> {
    let executable = || {
        spans
            .iter()
            .enumerate()
            .filter(|(_, span)| span.statement_type.is_executable())
    };

    let Some(offset) = offset else {
        return executable().map(|(idx, _)| idx).next();
    };

    if let Some((idx, _)) = executable().find(|(_, span)| span.contains_offset(offset)) {
        return Some(idx);
    }
    if let Some((idx, _)) = executable()
        .filter(|(_, span)| span.body_end <= offset)
        .last()
    {
        return Some(idx);
    }
    executable().map(|(idx, _)| idx).next()
}

fn declared_binds(
    span: &StatementSpan,
    variables: &BTreeMap<String, SessionVariable>,
) -> Vec<BindVariable> {
    if matches!(span.statement_type, StatementType::Sqlplus | StatementType::Ignore) {
        return Vec::new();
    }
    extract_bind_markers(span.body())
        .into_iter()
        .map(|marker| {
            let variable = variables.get(&marker.name);
            let mode = if marker.returning {
                BindMode::Returning
            } else if span.statement_type == StatementType::Plsql {
                if variable.is_some() {
                    BindMode::Inout
                } else {
                    BindMode::Unknown
                }
            } else {
                BindMode::In
            };
            BindVariable {
                name: marker.name,
                value: variable.and_then(|variable| variable.value.clone()),
                data_type: variable
                    .map(|variable| variable.data_type)
                    .unwrap_or(BindDataType::Varchar2),
                mode,
            }
        })
        .collect()
}

/// `prepare` with no session state.
pub fn prepare(script: &str, position: Option<Position>) -> SqlPrepareResponse {
    StatementPreparer::new().prepare(script, position)
}
