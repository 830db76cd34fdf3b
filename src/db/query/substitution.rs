use std::collections::{BTreeMap, HashSet};

use super::types::{
    EchoMode, Position, Range, StatementSpan, StatementType, Substitution, SubstitutionKind,
    ToolCommand,
};

pub const DEFAULT_DEFINE_CHAR: char = '&';

/// What an ACCEPT directive declared for a name.
#[derive(Debug, Clone, PartialEq, Eq)]
struct AcceptSpec {
    data_type: Option<String>,
    format: Option<String>,
    default_value: Option<String>,
    prompt: Option<String>,
    hide: bool,
}

/// One `&name` / `&&name` occurrence, offsets relative to the scanned text.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Placeholder {
    start: usize,
    end: usize,
    /// Name as written.
    raw_name: String,
    /// Upper-cased lookup key.
    key: String,
    prompt_first: bool,
}

/// Substitutions found across a whole script.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScriptSubstitutions {
    /// One entry per span, in span order.
    pub statements: Vec<Vec<Substitution>>,
    /// The prompts a caller must answer, with PROMPT_FIRST and ACCEPT collapsed
    /// to one entry per name.
    pub prompts: Vec<Substitution>,
}

impl ScriptSubstitutions {
    /// Upper-cased names of prompts that neither a DEFINE, an ACCEPT default nor
    /// `supplied` satisfies. Each name appears once.
    pub fn unresolved(&self, supplied: &BTreeMap<String, String>) -> Vec<String> {
        let mut seen = HashSet::new();
        self.prompts
            .iter()
            .filter(|prompt| !prompt.is_resolved() && prompt.default_value.is_none())
            .filter(|prompt| !supplied.contains_key(&prompt.name))
            .filter(|prompt| seen.insert(prompt.name.clone()))
            .map(|prompt| prompt.name.clone())
            .collect()
    }
}

/// Tracks the SQL*Plus substitution state of a script run: the define
/// character, whether scanning is on, DEFINEd values and ACCEPT declarations.
#[derive(Debug, Clone)]
pub struct SubstitutionResolver {
    define_char: char,
    enabled: bool,
    scan: bool,
    defines: BTreeMap<String, String>,
    accepts: BTreeMap<String, AcceptSpec>,
    /// Names already prompted once through `&&`.
    prompted_first: HashSet<String>,
}

impl Default for SubstitutionResolver {
    fn default() -> Self {
        Self {
            define_char: DEFAULT_DEFINE_CHAR,
            enabled: true,
            scan: true,
            defines: BTreeMap::new(),
            accepts: BTreeMap::new(),
            prompted_first: HashSet::new(),
        }
    }
}

impl SubstitutionResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts from the define state a session carries between runs.
    pub fn with_state(defines: BTreeMap<String, String>, define_char: Option<char>, scan: bool) -> Self {
        Self {
            define_char: define_char.unwrap_or(DEFAULT_DEFINE_CHAR),
            enabled: define_char.is_some(),
            scan,
            defines,
            ..Self::default()
        }
    }

    /// The define character, or `None` when SET DEFINE OFF is in effect.
    pub fn define_char(&self) -> Option<char> {
        self.enabled.then_some(self.define_char)
    }

    pub fn scan(&self) -> bool {
        self.scan
    }

    pub fn defines(&self) -> &BTreeMap<String, String> {
        &self.defines
    }

    pub fn define(&mut self, name: &str, value: &str) {
        self.defines
            .insert(name.trim().to_uppercase(), value.to_string());
    }

    pub fn lookup(&self, name: &str) -> Option<&str> {
        self.defines.get(&name.to_uppercase()).map(String::as_str)
    }

    /// Applies the effect a directive has on substitution.
    pub fn apply(&mut self, command: &ToolCommand) {
        match command {
            ToolCommand::Define { name, value } => self.define(name, value),
            ToolCommand::Undefine { names } => {
                for name in names {
                    let key = name.to_uppercase();
                    self.defines.remove(&key);
                    self.prompted_first.remove(&key);
                }
            }
            ToolCommand::Accept {
                name,
                data_type,
                format,
                default_value,
                prompt,
                hide,
            } => {
                // A fresh ACCEPT replaces any earlier DEFINE.
                self.defines.remove(&name.to_uppercase());
                self.accepts.insert(
                    name.to_uppercase(),
                    AcceptSpec {
                        data_type: data_type.clone(),
                        format: format.clone(),
                        default_value: default_value.clone(),
                        prompt: prompt.clone(),
                        hide: *hide,
                    },
                );
            }
            ToolCommand::SetDefine {
                enabled,
                define_char,
            } => {
                self.enabled = *enabled;
                if let Some(ch) = define_char {
                    self.define_char = *ch;
                }
            }
            ToolCommand::SetScan { enabled } => self.scan = *enabled,
            _ => {}
        }
    }

    fn is_active(&self) -> bool {
        self.enabled && self.scan
    }

    /// Spans whose text is scanned for placeholders.
    fn scans(span: &StatementSpan) -> bool {
        match span.statement_type {
            StatementType::Ignore => false,
            StatementType::Sqlplus => matches!(span.command, Some(ToolCommand::Prompt { .. })),
            _ => true,
        }
    }

    /// Finds `&name`, `&&name` and `&name.` outside comments. Literals are scanned.
    fn placeholders(&self, text: &str) -> Vec<Placeholder> {
        let mut found = Vec::new();
        if !self.is_active() {
            return found;
        }
        let define_char = self.define_char;
        let chars: Vec<(usize, char)> = text.char_indices().collect();
        let len = chars.len();
        let mut in_line_comment = false;
        let mut in_block_comment = false;
        let mut in_literal = false;
        let mut i = 0usize;

        while i < len {
            let (idx, c) = chars[i];
            let next = chars.get(i + 1).map(|&(_, ch)| ch);

            if c == '\'' && !in_line_comment && !in_block_comment {
                in_literal = !in_literal;
                i += 1;
                continue;
            }

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
            if !in_literal && c == '-' && next == Some('-') {
                in_line_comment = true;
                i += 2;
                continue;
            }
            if !in_literal && c == '/' && next == Some('*') {
                in_block_comment = true;
                i += 2;
                continue;
            }

            if c != define_char {
                i += 1;
                continue;
            }

            let prompt_first = next == Some(define_char);
            let name_start = if prompt_first { i + 2 } else { i + 1 };
            let mut j = name_start;
            while j < len {
                let ch = chars[j].1;
                if ch.is_alphanumeric() || ch == '_' || ch == '$' || ch == '#' {
                    j += 1;
                } else {
                    break;
                }
            }
            if j == name_start {
                i = name_start.max(i + 1);
                continue;
            }

            let raw_name: String = chars[name_start..j].iter().map(|&(_, ch)| ch).collect();
            // A trailing period ends the name and is consumed with it.
            let end_idx = if chars.get(j).map(|&(_, ch)| ch) == Some('.') {
                j + 1
            } else {
                j
            };
            let end = chars.get(end_idx).map(|&(pos, _)| pos).unwrap_or(text.len());

            found.push(Placeholder {
                start: idx,
                end,
                key: raw_name.to_uppercase(),
                raw_name,
                prompt_first,
            });
            i = end_idx;
        }

        found
    }

    fn substitution_for(&self, placeholder: &Placeholder) -> Substitution {
        let key = placeholder.key.clone();
        let default_prompt = format!("Enter value for {}:", placeholder.raw_name);

        if let Some(value) = self.defines.get(&key) {
            return Substitution {
                name: key,
                kind: SubstitutionKind::Defined,
                range: None,
                data_type: None,
                format: None,
                default_value: None,
                prompt: None,
                echo_mode: EchoMode::Normal,
                value: Some(value.clone()),
                offsets: None,
            };
        }

        if let Some(accept) = self.accepts.get(&key) {
            return Self::accept_substitution(&key, accept, default_prompt);
        }

        let kind = if placeholder.prompt_first || self.prompted_first.contains(&key) {
            SubstitutionKind::PromptFirst
        } else {
            SubstitutionKind::PromptAlways
        };
        Substitution {
            name: key,
            kind,
            range: None,
            data_type: None,
            format: None,
            default_value: None,
            prompt: Some(default_prompt),
            echo_mode: EchoMode::Normal,
            value: None,
            offsets: None,
        }
    }

    fn accept_substitution(key: &str, accept: &AcceptSpec, default_prompt: String) -> Substitution {
        Substitution {
            name: key.to_string(),
            kind: SubstitutionKind::Accept,
            range: None,
            data_type: accept.data_type.clone(),
            format: accept.format.clone(),
            default_value: accept.default_value.clone(),
            prompt: Some(accept.prompt.clone().unwrap_or(default_prompt)),
            echo_mode: if accept.hide {
                EchoMode::Hidden
            } else {
                EchoMode::Normal
            },
            value: None,
            offsets: None,
        }
    }

    /// Substitutions referenced by one span, in text order.
    ///
    /// Reads the current state only, so resolving the same span twice gives the
    /// same result.
    pub fn resolve(&self, span: &StatementSpan) -> Vec<Substitution> {
        if !Self::scans(span) {
            return Vec::new();
        }
        self.placeholders(span.body())
            .iter()
            .map(|placeholder| {
                let start = span.body_start + placeholder.start;
                let end = span.body_start + placeholder.end;
                let mut substitution = self.substitution_for(placeholder);
                substitution.range = Some(Range {
                    start: position_in_span(span, start),
                    end: position_in_span(span, end),
                });
                substitution.offsets = Some(start..end);
                substitution
            })
            .collect()
    }

    /// Walks a whole script in order, applying directives as it goes.
    ///
    /// PROMPT_FIRST prompts are keyed on the upper-cased name alone: once `&&x`
    /// has been seen, every later reference to `x` collapses onto that prompt.
    pub fn resolve_script(&mut self, spans: &[StatementSpan]) -> ScriptSubstitutions {
        let mut result = ScriptSubstitutions::default();
        let mut prompted: HashSet<String> = HashSet::new();

        for span in spans {
            if let Some(command) = &span.command {
                self.apply(command);
            }
            if let Some(ToolCommand::Accept { name, .. }) = &span.command {
                let key = name.to_uppercase();
                let prompt = self.accepts.get(&key).map(|accept| {
                    Self::accept_substitution(&key, accept, format!("Enter value for {name}:"))
                });
                if let Some(mut prompt) = prompt {
                    prompt.range = Some(span.range);
                    if prompted.insert(key) {
                        result.prompts.push(prompt.clone());
                    }
                    result.statements.push(vec![prompt]);
                    continue;
                }
            }

            let substitutions = self.resolve(span);
            for substitution in &substitutions {
                match substitution.kind {
                    SubstitutionKind::Defined => {}
                    SubstitutionKind::PromptAlways => result.prompts.push(substitution.clone()),
                    SubstitutionKind::PromptFirst | SubstitutionKind::Accept => {
                        if prompted.insert(substitution.name.clone()) {
                            result.prompts.push(substitution.clone());
                        }
                    }
                }
                if substitution.kind == SubstitutionKind::PromptFirst {
                    self.prompted_first.insert(substitution.name.clone());
                }
            }
            result.statements.push(substitutions);
        }

        result
    }

    /// Replaces placeholders in `text` with DEFINEd or supplied values.
    ///
    /// `&&name` defines `name` with the value it received, as SQL*Plus does.
    /// Placeholders with no value are left as written.
    pub fn substitute(&mut self, text: &str, supplied: &BTreeMap<String, String>) -> String {
        let placeholders = self.placeholders(text);
        if placeholders.is_empty() {
            return text.to_string();
        }

        let mut output = String::with_capacity(text.len());
        let mut last = 0usize;
        for placeholder in placeholders {
            output.push_str(&text[last..placeholder.start]);
            let value = self
                .defines
                .get(&placeholder.key)
                .or_else(|| supplied.get(&placeholder.key))
                .cloned()
                .or_else(|| {
                    self.accepts
                        .get(&placeholder.key)
                        .and_then(|accept| accept.default_value.clone())
                });
            match value {
                Some(value) => {
                    output.push_str(&value);
                    if placeholder.prompt_first {
                        self.defines.insert(placeholder.key.clone(), value);
                    }
                }
                None => output.push_str(&text[placeholder.start..placeholder.end]),
            }
            last = placeholder.end;
        }
        output.push_str(&text[last..]);
        output
    }
}

/// Position of a byte offset inside a span's body, derived from the body's
/// starting position.
pub(crate) fn position_in_span(span: &StatementSpan, offset: usize) -> Position {
    let from = span.body_start - span.start_offset;
    let to = offset.saturating_sub(span.start_offset).min(span.text.len());
    let Some(slice) = span.text.get(from..to) else {
        return span.range.start;
    };
    match slice.rfind('\n') {
        None => Position::new(
            span.range.start.line,
            span.range.start.character + slice.chars().count(),
        ),
        Some(last_newline) => Position::new(
            span.range.start.line + slice.matches('\n').count(),
            slice[last_newline + 1..].chars().count(),
        ),
    }
}
