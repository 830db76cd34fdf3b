mod binds;
mod command;
pub(crate) mod executor;
mod feedback;
pub(crate) mod pagination;
mod prepare;
mod result_set;
mod script;
mod substitution;
mod types;

pub use binds::{extract_bind_markers, extract_bind_names, resolve_binds, BindMarker, SessionVariable};
pub use command::{classify, leading_keyword, parse_tool_command, strip_leading_comments};
pub use feedback::{completion_message, ddl_message, dml_message, elapsed_message};
pub use pagination::DEFAULT_PAGE_SIZE;
pub use prepare::{prepare, StatementPreparer};
pub use result_set::ResultSet;
pub use script::{executable_spans, split, LineIndex};
pub use substitution::{ScriptSubstitutions, SubstitutionResolver, DEFAULT_DEFINE_CHAR};
pub use types::*;

#[cfg(test)]
mod query_tests;
