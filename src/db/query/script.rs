use super::command::{classify, interrupts_statement, parse_tool_command};
use super::types::{Position, Range, StatementSpan, StatementType, ToolCommand};

#[derive(Default)]
struct SplitState {
    in_single_quote: bool,
    in_double_quote: bool,
    in_line_comment: bool,
    in_block_comment: bool,
    in_q_quote: bool,
    q_quote_end: Option<char>,
    block_depth: usize,
    pending_end: bool,
    token: String,
    in_create_plsql: bool,
    create_pending: bool,
    after_declare: bool,
    /// AS/IS seen in CREATE TYPE; the next OBJECT/VARRAY/TABLE closes it.
    after_as_is: bool,
    nested_subprogram: bool,
    /// Nested subprogram bodies (AS/IS) still waiting for their BEGIN.
    pending_subprogram_begins: usize,
    /// Package specs and bodies have no BEGIN at the AS level.
    is_package: bool,
    /// Block depth at which each open CASE started. A plain END at that depth + 1
    /// closes a CASE expression, END CASE closes a CASE statement.
    case_depth_stack: Vec<usize>,
    /// Trigger headers name INSERT/UPDATE/DELETE events before the body opens.
    is_trigger: bool,
    in_compound_trigger: bool,
    pending_timing_point_is: bool,
    after_type: bool,
    is_type_create: bool,
}

impl SplitState {
    fn is_idle(&self) -> bool {
        !self.in_single_quote
            && !self.in_double_quote
            && !self.in_block_comment
            && !self.in_q_quote
            && !self.in_line_comment
    }

    /// An unterminated quote or block comment at end of input.
    fn is_unterminated(&self) -> bool {
        self.in_single_quote || self.in_double_quote || self.in_block_comment || self.in_q_quote
    }

    fn flush_token(&mut self) {
        if self.token.is_empty() {
            return;
        }
        let upper = self.token.to_uppercase();

        self.track_create_plsql(&upper);

        let is_end_case = self.pending_end && upper == "CASE";
        let is_end_if = self.pending_end && upper == "IF";
        let is_end_loop = self.pending_end && upper == "LOOP";

        if self.pending_end {
            if upper == "CASE" {
                self.case_depth_stack.pop();
                self.block_depth = self.block_depth.saturating_sub(1);
            } else if upper == "IF" || upper == "LOOP" {
                self.block_depth = self.block_depth.saturating_sub(1);
            } else if matches!(upper.as_str(), "BEFORE" | "AFTER") && self.in_compound_trigger {
                // END BEFORE STATEMENT / END AFTER EACH ROW
                self.block_depth = self.block_depth.saturating_sub(1);
            } else {
                self.close_plain_end();
            }
            self.pending_end = false;
        }

        if upper == "CASE" && !is_end_case {
            self.case_depth_stack.push(self.block_depth);
            self.block_depth += 1;
        }

        if (upper == "IF" && !is_end_if) || (upper == "LOOP" && !is_end_loop) {
            self.block_depth += 1;
        }

        // TYPE ... AS OBJECT / VARRAY / TABLE and IS REF CURSOR declare, they do not open a block.
        if self.after_as_is
            && matches!(
                upper.as_str(),
                "OBJECT" | "VARRAY" | "TABLE" | "REF" | "RECORD"
            )
        {
            if self.block_depth > 0 {
                self.block_depth -= 1;
            } else {
                eprintln!(
                    "Warning: encountered TYPE body terminator while block depth was already zero."
                );
            }
            self.after_as_is = false;
        }

        if self.block_depth > 0 && matches!(upper.as_str(), "PROCEDURE" | "FUNCTION") {
            self.nested_subprogram = true;
        }

        // AS/IS opens a body only after a subprogram header, a timing point, or as
        // the first AS/IS of a CREATE unit. `x IS NULL` stays an expression.
        let is_block_starting_as_is = matches!(upper.as_str(), "AS" | "IS")
            && (self.pending_timing_point_is
                || self.nested_subprogram
                || (self.in_create_plsql && self.block_depth == 0));

        if is_block_starting_as_is {
            self.block_depth += 1;
            if self.is_type_create && !self.nested_subprogram && !self.pending_timing_point_is {
                self.after_as_is = true;
            }
            self.nested_subprogram = false;
            self.pending_timing_point_is = false;
            let needs_begin_tracking = !self.is_package || self.block_depth > 1;
            if needs_begin_tracking {
                self.pending_subprogram_begins += 1;
            }
        } else if upper == "DECLARE" {
            self.block_depth += 1;
            self.after_declare = true;
        } else if upper == "BEGIN" {
            if self.after_declare {
                self.after_declare = false;
            } else if self.pending_subprogram_begins > 0 {
                self.pending_subprogram_begins -= 1;
            } else {
                self.block_depth += 1;
            }
        } else if upper == "END" {
            // Resolved by the next token: END IF, END LOOP, END CASE, END name or `;`.
            self.pending_end = true;
        } else if upper == "COMPOUND" && self.in_create_plsql {
            self.in_compound_trigger = true;
            self.block_depth += 1;
        } else if matches!(upper.as_str(), "BEFORE" | "AFTER") && self.in_compound_trigger {
            self.pending_timing_point_is = true;
        }

        self.token.clear();
    }

    fn close_plain_end(&mut self) {
        if self
            .case_depth_stack
            .last()
            .is_some_and(|depth| *depth + 1 == self.block_depth)
        {
            self.case_depth_stack.pop();
        }
        self.block_depth = self.block_depth.saturating_sub(1);
    }

    fn resolve_pending_end(&mut self) {
        if self.pending_end {
            self.close_plain_end();
            if self.block_depth == 0 {
                self.reset_create_state();
            }
            self.pending_end = false;
        }
    }

    fn reset_create_state(&mut self) {
        self.in_create_plsql = false;
        self.create_pending = false;
        self.after_as_is = false;
        self.nested_subprogram = false;
        self.pending_subprogram_begins = 0;
        self.is_package = false;
        self.is_trigger = false;
        self.in_compound_trigger = false;
        self.pending_timing_point_is = false;
        self.after_type = false;
        self.is_type_create = false;
    }

    fn reset(&mut self) {
        *self = SplitState::default();
    }

    fn track_create_plsql(&mut self, upper: &str) {
        if self.in_create_plsql && self.after_type && upper == "BODY" {
            // TYPE BODY nests like PACKAGE BODY
            self.is_package = true;
            self.after_type = false;
            return;
        }

        if self.after_type && upper != "BODY" {
            self.after_type = false;
        }

        if self.in_create_plsql {
            return;
        }

        if self.create_pending {
            match upper {
                "OR" | "REPLACE" | "EDITIONABLE" | "NONEDITIONABLE" => return,
                "PROCEDURE" | "FUNCTION" | "PACKAGE" | "TYPE" | "TRIGGER" => {
                    self.in_create_plsql = true;
                    self.is_package = upper == "PACKAGE";
                    self.is_trigger = upper == "TRIGGER";
                    self.is_type_create = upper == "TYPE";
                    self.after_type = upper == "TYPE";
                    self.create_pending = false;
                    return;
                }
                _ => self.create_pending = false,
            }
        }

        if upper == "CREATE" {
            self.create_pending = true;
        }
    }

    fn start_q_quote(&mut self, delimiter: char) {
        self.in_q_quote = true;
        self.q_quote_end = Some(match delimiter {
            '[' => ']',
            '(' => ')',
            '{' => '}',
            '<' => '>',
            other => other,
        });
    }
}

/// Maps byte offsets in a script to zero-based line/character positions and back.
pub struct LineIndex<'a> {
    text: &'a str,
    line_starts: Vec<usize>,
}

impl<'a> LineIndex<'a> {
    pub fn new(text: &'a str) -> Self {
        let mut line_starts = vec![0];
        line_starts.extend(
            text.char_indices()
                .filter(|(_, ch)| *ch == '\n')
                .map(|(idx, _)| idx + 1),
        );
        Self { text, line_starts }
    }

    pub fn position(&self, offset: usize) -> Position {
        let offset = offset.min(self.text.len());
        let line = self
            .line_starts
            .partition_point(|start| *start <= offset)
            .saturating_sub(1);
        let line_start = self.line_starts[line];
        let character = self
            .text
            .get(line_start..offset)
            .map(|slice| slice.chars().count())
            .unwrap_or_default();
        Position::new(line, character)
    }

    pub fn range(&self, start: usize, end: usize) -> Range {
        Range {
            start: self.position(start),
            end: self.position(end),
        }
    }

    /// Byte offset of `position`, clamped to the end of its line.
    pub fn offset(&self, position: Position) -> usize {
        let Some(&line_start) = self.line_starts.get(position.line) else {
            return self.text.len();
        };
        let line_end = self
            .line_starts
            .get(position.line + 1)
            .map(|next| next - 1)
            .unwrap_or(self.text.len());
        let line = &self.text[line_start..line_end];
        let line = line.strip_suffix('\r').unwrap_or(line);
        line.char_indices()
            .nth(position.character)
            .map(|(idx, _)| line_start + idx)
            .unwrap_or(line_start + line.len())
    }
}

struct SpanBuilder<'a> {
    script: &'a str,
    index: LineIndex<'a>,
    state: SplitState,
    /// Where the span under construction begins (end of the previous span).
    span_start: usize,
    /// First code byte of the pending statement.
    body_start: Option<usize>,
    /// End of the last code byte of the pending statement.
    body_end: usize,
    /// Opening offset of the quote or comment currently open.
    open_at: usize,
    spans: Vec<StatementSpan>,
}

impl<'a> SpanBuilder<'a> {
    fn new(script: &'a str) -> Self {
        Self {
            script,
            index: LineIndex::new(script),
            state: SplitState::default(),
            span_start: 0,
            body_start: None,
            body_end: 0,
            open_at: 0,
            spans: Vec::new(),
        }
    }

    fn has_pending(&self) -> bool {
        self.body_start.is_some()
    }

    fn mark_code(&mut self, start: usize, end: usize) {
        if self.body_start.is_none() {
            self.body_start = Some(start);
        }
        self.body_end = end;
    }

    fn push_span(
        &mut self,
        end: usize,
        body: std::ops::Range<usize>,
        statement_type: StatementType,
        malformed: bool,
        command: Option<ToolCommand>,
    ) {
        self.spans.push(StatementSpan {
            start_offset: self.span_start,
            end_offset: end,
            body_start: body.start,
            body_end: body.end,
            range: self.index.range(body.start, body.end),
            statement_type,
            text: self.script[self.span_start..end].to_string(),
            malformed,
            command,
        });
        self.span_start = end;
        self.body_start = None;
    }

    fn finish_statement(&mut self, end: usize, malformed: bool) {
        let Some(body_start) = self.body_start else {
            return;
        };
        let body_end = self.body_end.max(body_start);
        let statement_type = classify(&self.script[body_start..body_end]);
        self.push_span(end, body_start..body_end, statement_type, malformed, None);
    }

    /// Ends the pending statement at `end` and forgets any open block.
    fn force_terminate(&mut self, end: usize) {
        self.state.flush_token();
        self.finish_statement(end, false);
        self.state.reset();
    }

    fn push_directive(&mut self, line: &str, line_start: usize, command: ToolCommand) {
        let body_start = line_start + (line.len() - line.trim_start().len());
        let body_end = line_start + line.trim_end().len();
        self.push_span(
            line_start + line.len(),
            body_start..body_end,
            StatementType::Sqlplus,
            false,
            Some(command),
        );
    }

    /// A line holding only `/` runs the buffer; with nothing pending it belongs to
    /// the previous span.
    fn slash_line(&mut self, end: usize) {
        if self.has_pending() {
            self.force_terminate(end);
            return;
        }
        if let Some(last) = self.spans.last_mut() {
            last.end_offset = end;
            last.text = self.script[last.start_offset..end].to_string();
            self.span_start = end;
        }
    }

    fn process_line(&mut self, line: &str, line_start: usize) {
        let chars: Vec<(usize, char)> = line.char_indices().collect();
        let len = chars.len();
        let end_of = |k: usize| -> usize {
            chars
                .get(k)
                .map(|&(idx, ch)| line_start + idx + ch.len_utf8())
                .unwrap_or(line_start + line.len())
        };
        let mut i = 0usize;

        while i < len {
            let (idx, c) = chars[i];
            let pos = line_start + idx;
            let next = chars.get(i + 1).map(|&(_, ch)| ch);
            let next2 = chars.get(i + 2).map(|&(_, ch)| ch);

            if self.state.in_line_comment {
                if c == '\n' {
                    self.state.in_line_comment = false;
                }
                i += 1;
                continue;
            }

            if self.state.in_block_comment {
                if c == '*' && next == Some('/') {
                    self.state.in_block_comment = false;
                    i += 2;
                    continue;
                }
                i += 1;
                continue;
            }

            if self.state.in_q_quote {
                if Some(c) == self.state.q_quote_end && next == Some('\'') {
                    self.state.in_q_quote = false;
                    self.state.q_quote_end = None;
                    self.mark_code(pos, end_of(i + 1));
                    i += 2;
                    continue;
                }
                self.mark_code(pos, end_of(i));
                i += 1;
                continue;
            }

            if self.state.in_single_quote || self.state.in_double_quote {
                let quote = if self.state.in_single_quote { '\'' } else { '"' };
                if c == quote {
                    if next == Some(quote) {
                        self.mark_code(pos, end_of(i + 1));
                        i += 2;
                        continue;
                    }
                    self.state.in_single_quote = false;
                    self.state.in_double_quote = false;
                }
                self.mark_code(pos, end_of(i));
                i += 1;
                continue;
            }

            if c == '-' && next == Some('-') {
                self.state.flush_token();
                self.state.in_line_comment = true;
                i += 2;
                continue;
            }

            if c == '/' && next == Some('*') {
                self.state.flush_token();
                self.state.in_block_comment = true;
                self.open_at = pos;
                i += 2;
                continue;
            }

            // nq'[...]'
            if (c == 'n' || c == 'N')
                && matches!(next, Some('q') | Some('Q'))
                && next2 == Some('\'')
                && self.state.token.is_empty()
            {
                if let Some(&(_, delimiter)) = chars.get(i + 3) {
                    self.state.flush_token();
                    self.state.start_q_quote(delimiter);
                    self.open_at = pos;
                    self.mark_code(pos, end_of(i + 3));
                    i += 4;
                    continue;
                }
            }

            // q'[...]'
            if (c == 'q' || c == 'Q') && next == Some('\'') && self.state.token.is_empty() {
                if let Some(delimiter) = next2 {
                    self.state.flush_token();
                    self.state.start_q_quote(delimiter);
                    self.open_at = pos;
                    self.mark_code(pos, end_of(i + 2));
                    i += 3;
                    continue;
                }
            }

            if c == '\'' || c == '"' {
                self.state.flush_token();
                if c == '\'' {
                    self.state.in_single_quote = true;
                } else {
                    self.state.in_double_quote = true;
                }
                self.open_at = pos;
                self.mark_code(pos, end_of(i));
                i += 1;
                continue;
            }

            if c.is_alphanumeric() || c == '_' || c == '$' || c == '#' {
                self.state.token.push(c);
                self.mark_code(pos, end_of(i));
                i += 1;
                continue;
            }

            self.state.flush_token();

            if c.is_whitespace() {
                i += 1;
                continue;
            }

            self.mark_code(pos, end_of(i));

            if c == ';' {
                self.state.resolve_pending_end();
                if self.state.block_depth == 0 {
                    self.finish_statement(end_of(i), false);
                    // `END name;` clears pending_end inside flush_token, so the
                    // create state is reset here as well.
                    self.state.reset_create_state();
                }
            }

            i += 1;
        }
    }

    fn finalize(mut self) -> Vec<StatementSpan> {
        let end = self.script.len();
        self.state.flush_token();
        let malformed = self.state.is_unterminated();

        if malformed && self.body_start.is_none() {
            self.body_start = Some(self.open_at);
            self.body_end = self.open_at + self.script[self.open_at..].trim_end().len();
        }

        if self.has_pending() {
            self.finish_statement(end, malformed);
        } else if self.span_start < end {
            let tail = &self.script[self.span_start..end];
            let body_start = self.span_start + (tail.len() - tail.trim_start().len());
            let body_end = (self.span_start + tail.trim_end().len()).max(body_start);
            self.push_span(end, body_start..body_end, StatementType::Ignore, false, None);
        }

        self.spans
    }
}

/// SQL*Plus keywords that start a new statement after a CREATE unit whose
/// terminator was left out.
fn starts_new_statement(upper: &str) -> bool {
    [
        "CREATE", "ALTER", "DROP", "TRUNCATE", "GRANT", "REVOKE", "COMMIT", "ROLLBACK",
        "SAVEPOINT", "SELECT", "INSERT", "UPDATE", "DELETE", "MERGE", "WITH",
    ]
    .iter()
    .any(|keyword| upper.starts_with(keyword))
}

/// Splits a script into spans that tile it exactly.
///
/// Every byte of `script` belongs to exactly one span. Whitespace and comments
/// before a statement belong to that statement's span, a comment-only tail
/// becomes an [`StatementType::Ignore`] span, and script directives occupy one
/// line each.
pub fn split(script: &str) -> Vec<StatementSpan> {
    let mut builder = SpanBuilder::new(script);
    let mut line_start = 0usize;

    for line in script.split_inclusive('\n') {
        let start = line_start;
        line_start += line.len();
        let trimmed = line.trim();

        let at_top_level = builder.state.is_idle() && builder.state.block_depth == 0;

        // Trigger headers name DML events before the body opens.
        if at_top_level
            && builder.has_pending()
            && builder.state.in_create_plsql
            && !builder.state.is_trigger
            && starts_new_statement(&trimmed.to_uppercase())
        {
            builder.force_terminate(start);
        }

        if trimmed == "/" && builder.state.is_idle() {
            builder.slash_line(line_start);
            continue;
        }

        if at_top_level {
            // A bare DEFINE lists every variable; inside a statement it is the
            // MATCH_RECOGNIZE clause.
            if !builder.has_pending() && is_bare_define(trimmed) {
                builder.push_directive(line, start, ToolCommand::ShowDefine { name: None });
                continue;
            }
            if let Some(command) = parse_tool_command(trimmed) {
                if !builder.has_pending() {
                    builder.push_directive(line, start, command);
                    continue;
                }
                if interrupts_statement(&command) {
                    builder.force_terminate(start);
                    builder.push_directive(line, start, command);
                    continue;
                }
            }
        }

        builder.process_line(line, start);
    }

    builder.finalize()
}

fn is_bare_define(line: &str) -> bool {
    let word = line.trim_end_matches(';').trim();
    word.eq_ignore_ascii_case("DEFINE") || word.eq_ignore_ascii_case("DEF")
}

/// Spans that run against the database or drive the script.
pub fn executable_spans(spans: &[StatementSpan]) -> impl Iterator<Item = &StatementSpan> {
    spans
        .iter()
        .filter(|span| span.statement_type.is_executable())
}

impl StatementSpan {
    /// Text sent to the database: comments around the body and SQL*Plus
    /// terminators removed, EXEC rewritten as an anonymous block.
    pub fn sql(&self) -> String {
        let body = self.body().trim();
        match self.statement_type {
            StatementType::Ignore => String::new(),
            StatementType::Sqlplus | StatementType::Jdbc => body.to_string(),
            StatementType::Plsql => {
                normalize_exec_call(body).unwrap_or_else(|| strip_extra_trailing_semicolons(body))
            }
            _ => body
                .trim_end_matches(|c: char| c == ';' || c.is_whitespace())
                .to_string(),
        }
    }
}

/// "END;;" -> "END;". PL/SQL keeps its own terminator.
fn strip_extra_trailing_semicolons(sql: &str) -> String {
    let without_semis = sql.trim_end_matches(|c: char| c == ';' || c.is_whitespace());
    if without_semis.len() < sql.trim_end().len() {
        format!("{without_semis};")
    } else {
        without_semis.to_string()
    }
}

/// Rewrites `EXEC proc(args)` as `BEGIN proc(args); END;`.
pub(crate) fn normalize_exec_call(sql: &str) -> Option<String> {
    let (keyword, rest) = sql.split_once(char::is_whitespace)?;
    if !keyword.eq_ignore_ascii_case("EXEC") && !keyword.eq_ignore_ascii_case("EXECUTE") {
        return None;
    }
    let body = rest.trim().trim_end_matches(';').trim();
    if body.is_empty() {
        return None;
    }
    Some(format!("BEGIN {}; END;", body))
}
