use super::*;
use proptest::prelude::*;
use std::collections::BTreeMap;

/// SQL sent to the database for each statement span, directives excluded.
fn statements(sql: &str) -> Vec<String> {
    let spans = split(sql);
    executable_spans(&spans)
        .filter(|span| span.command.is_none())
        .map(|span| span.sql())
        .collect()
}

fn directives(sql: &str) -> Vec<ToolCommand> {
    split(sql)
        .into_iter()
        .filter_map(|span| span.command)
        .collect()
}

fn types(sql: &str) -> Vec<StatementType> {
    let spans = split(sql);
    executable_spans(&spans)
        .map(|span| span.statement_type)
        .collect()
}

fn rejoin(spans: &[StatementSpan]) -> String {
    spans.iter().map(|span| span.text.as_str()).collect()
}

fn supplied(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(name, value)| (name.to_uppercase(), value.to_string()))
        .collect()
}

// ============================================================================
// Splitting
// ============================================================================

#[test]
fn test_simple_select() {
    let sql = "SELECT 1 FROM DUAL;";
    assert_eq!(statements(sql), vec!["SELECT 1 FROM DUAL"]);
}

#[test]
fn test_multiple_selects() {
    let sql = "SELECT 1 FROM DUAL;\nSELECT 2 FROM DUAL;\nSELECT 3 FROM DUAL;";
    let result = statements(sql);
    assert_eq!(result.len(), 3, "Should have 3 statements, got: {:?}", result);
    assert_eq!(result[2], "SELECT 3 FROM DUAL");
}

#[test]
fn test_double_semicolon_is_ignored() {
    let sql = "SELECT 1 FROM DUAL;;\nSELECT 2 FROM DUAL;";
    let result = statements(sql);
    assert_eq!(result.len(), 2, "Stray semicolon must not run: {:?}", result);
    assert_eq!(result[0], "SELECT 1 FROM DUAL");
}

#[test]
fn test_anonymous_block() {
    let sql = "BEGIN\n  NULL;\nEND;";
    let result = statements(sql);
    assert_eq!(result.len(), 1, "Should have 1 statement, got: {:?}", result);
    assert!(result[0].starts_with("BEGIN"));
    assert!(result[0].ends_with("END;"));
}

#[test]
fn test_anonymous_block_with_declare() {
    let sql = r#"DECLARE
  v_num NUMBER := 10;
BEGIN
  IF v_num > 5 THEN
    DBMS_OUTPUT.PUT_LINE('big');
  END IF;
END;
/
SELECT 1 FROM DUAL;"#;
    let result = statements(sql);
    assert_eq!(result.len(), 2, "Should have 2 statements, got: {:?}", result);
    assert!(result[0].starts_with("DECLARE"));
    assert!(result[0].contains("END IF;"));
    assert_eq!(result[1], "SELECT 1 FROM DUAL");
}

#[test]
fn test_create_procedure_simple() {
    let sql = r#"CREATE PROCEDURE test_proc AS
BEGIN
  NULL;
END;"#;
    let result = statements(sql);
    assert_eq!(result.len(), 1, "Should have 1 statement, got: {:?}", result);
    assert!(result[0].starts_with("CREATE PROCEDURE"));
    assert_eq!(types(sql), vec![StatementType::Plsql]);
}

#[test]
fn test_create_or_replace_procedure_with_locals() {
    let sql = r#"CREATE OR REPLACE PROCEDURE test_proc IS
  v_count NUMBER;
  v_name VARCHAR2(100);
BEGIN
  SELECT COUNT(*) INTO v_count FROM emp;
  FOR r IN (SELECT ename FROM emp) LOOP
    v_name := r.ename;
  END LOOP;
END test_proc;
/
SELECT 2 FROM DUAL;"#;
    let result = statements(sql);
    assert_eq!(result.len(), 2, "Should have 2 statements, got: {:?}", result);
    assert!(result[0].ends_with("END test_proc;"));
}

#[test]
fn test_create_function() {
    let sql = r#"CREATE OR REPLACE FUNCTION add_one(p NUMBER) RETURN NUMBER IS
BEGIN
  RETURN p + 1;
END;
/"#;
    let result = statements(sql);
    assert_eq!(result.len(), 1, "Should have 1 statement, got: {:?}", result);
    assert!(result[0].contains("RETURN p + 1;"));
}

#[test]
fn test_package_spec() {
    let sql = r#"CREATE OR REPLACE PACKAGE test_pkg AS
  PROCEDURE proc1;
  FUNCTION func1 RETURN NUMBER;
END test_pkg;
/"#;
    let result = statements(sql);
    assert_eq!(result.len(), 1, "Should have 1 statement, got: {:?}", result);
    assert!(result[0].ends_with("END test_pkg;"));
}

#[test]
fn test_nested_begin_end_in_package_body() {
    let sql = r#"CREATE OR REPLACE PACKAGE BODY test_pkg AS
  PROCEDURE proc1 IS
  BEGIN
    IF TRUE THEN
      BEGIN
        NULL;
      END;
    END IF;
  END;
END test_pkg;
/"#;
    let result = statements(sql);
    assert_eq!(result.len(), 1, "Should have 1 statement, got: {:?}", result);
    assert!(result[0].contains("END IF;"));
    assert!(result[0].ends_with("END test_pkg;"));
}

#[test]
fn test_package_body_followed_by_select() {
    let sql = r#"CREATE OR REPLACE PACKAGE BODY test_pkg AS
  FUNCTION func1 RETURN NUMBER IS
  BEGIN
    RETURN 1;
  END func1;
END test_pkg;
/

SELECT test_pkg.func1 FROM DUAL;"#;
    let result = statements(sql);
    assert_eq!(result.len(), 2, "Should have 2 statements, got: {:?}", result);
    assert_eq!(result[1], "SELECT test_pkg.func1 FROM DUAL");
}

#[test]
fn test_multiple_packages() {
    let sql = r#"CREATE OR REPLACE PACKAGE pkg_a AS
  PROCEDURE p;
END pkg_a;
/
CREATE OR REPLACE PACKAGE BODY pkg_a AS
  PROCEDURE p IS
  BEGIN
    NULL;
  END p;
END pkg_a;
/"#;
    let result = statements(sql);
    assert_eq!(result.len(), 2, "Should have 2 statements, got: {:?}", result);
    assert!(result[0].starts_with("CREATE OR REPLACE PACKAGE pkg_a"));
    assert!(result[1].starts_with("CREATE OR REPLACE PACKAGE BODY pkg_a"));
}

#[test]
fn test_package_spec_with_ref_cursor_and_show_errors() {
    let sql = r#"CREATE OR REPLACE PACKAGE oqt_deep_pkg AS
  TYPE t_rc IS REF CURSOR;
  PROCEDURE log_msg(p_msg VARCHAR2);
  FUNCTION f_calc(p NUMBER) RETURN NUMBER;
END oqt_deep_pkg;
/
SHOW ERRORS"#;
    let result = statements(sql);
    assert_eq!(result.len(), 1, "Should have 1 statement, got: {:?}", result);
    assert!(result[0].ends_with("END oqt_deep_pkg;"));
    assert!(matches!(
        directives(sql).as_slice(),
        [ToolCommand::Unsupported { .. }]
    ));
}

#[test]
fn test_trigger() {
    let sql = r#"CREATE OR REPLACE TRIGGER emp_bi
BEFORE INSERT ON emp
FOR EACH ROW
BEGIN
  :NEW.created_at := SYSDATE;
END;
/
SELECT 1 FROM DUAL;"#;
    let result = statements(sql);
    assert_eq!(result.len(), 2, "Should have 2 statements, got: {:?}", result);
    assert!(result[0].contains(":NEW.created_at"));
    assert_eq!(types(sql)[0], StatementType::Plsql);
}

#[test]
fn test_create_type_body() {
    let sql = r#"CREATE OR REPLACE TYPE BODY point_t AS
  MEMBER FUNCTION norm RETURN NUMBER IS
  BEGIN
    RETURN SQRT(x * x + y * y);
  END;
END;
/"#;
    let result = statements(sql);
    assert_eq!(result.len(), 1, "Should have 1 statement, got: {:?}", result);
}

#[test]
fn test_loop_and_case_inside_block() {
    let sql = r#"BEGIN
  FOR i IN 1..3 LOOP
    CASE i
      WHEN 1 THEN NULL;
      ELSE NULL;
    END CASE;
  END LOOP;
END;
/
SELECT 1 FROM DUAL;"#;
    let result = statements(sql);
    assert_eq!(result.len(), 2, "Should have 2 statements, got: {:?}", result);
    assert!(result[0].contains("END CASE;"));
    assert!(result[0].contains("END LOOP;"));
}

#[test]
fn test_semicolon_in_literal_and_comment() {
    let sql = "SELECT 'a;b' FROM DUAL; -- trailing; comment\nSELECT /* ; */ 2 FROM DUAL;";
    let result = statements(sql);
    assert_eq!(result.len(), 2, "Should have 2 statements, got: {:?}", result);
    assert_eq!(result[0], "SELECT 'a;b' FROM DUAL");
    assert_eq!(result[1], "SELECT /* ; */ 2 FROM DUAL");
}

#[test]
fn test_q_quote_literal() {
    let sql = "SELECT q'[it's; fine]' FROM DUAL;\nSELECT 2 FROM DUAL;";
    let result = statements(sql);
    assert_eq!(result.len(), 2, "Should have 2 statements, got: {:?}", result);
    assert!(result[0].contains("it's; fine"));
}

#[test]
fn test_slash_terminates_statement_without_semicolon() {
    let sql = "SELECT 1 FROM DUAL\n/\nSELECT 2 FROM DUAL;";
    let result = statements(sql);
    assert_eq!(result, vec!["SELECT 1 FROM DUAL", "SELECT 2 FROM DUAL"]);
}

#[test]
fn test_slash_inside_comment_does_not_terminate() {
    let sql = "BEGIN\n  /*\n/\n  */\n  NULL;\nEND;\n/";
    let result = statements(sql);
    assert_eq!(result.len(), 1, "Should have 1 statement, got: {:?}", result);
}

#[test]
fn test_update_set_line_is_not_a_directive() {
    let sql = "UPDATE emp\nSET sal = sal * 2\nWHERE deptno = 10;";
    let result = statements(sql);
    assert_eq!(result.len(), 1, "Should have 1 statement, got: {:?}", result);
    assert!(result[0].contains("SET sal = sal * 2"));
}

#[test]
fn test_update_of_a_column_named_like_a_set_option() {
    let sql = "update cfg\nset define = 'Y'\nwhere id = 1;\nselect 2 from dual;";
    assert_eq!(
        statements(sql),
        vec!["update cfg\nset define = 'Y'\nwhere id = 1", "select 2 from dual"]
    );
    assert_eq!(types(sql), vec![StatementType::Dml, StatementType::Query]);
    assert!(directives(sql).is_empty());
}

#[test]
fn test_match_recognize_define_stays_in_statement() {
    let sql = r#"SELECT * FROM ticks
MATCH_RECOGNIZE (
  ORDER BY ts
  PATTERN (up+)
  DEFINE
    up AS price > PREV(price)
);"#;
    let result = statements(sql);
    assert_eq!(result.len(), 1, "Should have 1 statement, got: {:?}", result);
    assert!(directives(sql).is_empty());
}

#[test]
fn test_comment_only_script_has_no_statements() {
    let sql = "-- nothing here\n/* still nothing */\n";
    assert!(statements(sql).is_empty());
    let spans = split(sql);
    assert!(spans
        .iter()
        .all(|span| span.statement_type == StatementType::Ignore));
}

#[test]
fn test_exec_rewritten_as_block() {
    let sql = "EXEC dbms_output.put_line('hi');";
    assert_eq!(
        statements(sql),
        vec!["BEGIN dbms_output.put_line('hi'); END;"]
    );
}

// ============================================================================
// Spans
// ============================================================================

#[test]
fn spans_tile_the_script() {
    let sql = "-- header\nSELECT 1 FROM DUAL;\n\nprompt done\nBEGIN\n  NULL;\nEND;\n/\n-- tail\n";
    let spans = split(sql);
    assert_eq!(rejoin(&spans), sql);
    for pair in spans.windows(2) {
        assert_eq!(pair[0].end_offset, pair[1].start_offset);
    }
}

#[test]
fn leading_comment_belongs_to_following_statement() {
    let sql = "-- header\nSELECT 1 FROM DUAL;";
    let spans = split(sql);
    assert_eq!(spans.len(), 1);
    assert!(spans[0].text.starts_with("-- header"));
    assert_eq!(spans[0].body(), "SELECT 1 FROM DUAL;");
    assert_eq!(spans[0].range.start, Position::new(1, 0));
}

#[test]
fn span_ranges_follow_lines() {
    let sql = "SELECT 1\nFROM DUAL;\n\nSELECT 2 FROM DUAL;";
    let spans = split(sql);
    let executable: Vec<_> = executable_spans(&spans).collect();
    assert_eq!(executable.len(), 2);
    assert_eq!(executable[0].start_line(), 0);
    assert_eq!(executable[0].end_line(), 1);
    assert_eq!(executable[1].start_line(), 3);
    assert_eq!(executable[1].range.start.character, 0);
}

#[test]
fn classifies_statement_types() {
    let sql = "SELECT 1 FROM DUAL;\n\
               INSERT INTO t VALUES (1);\n\
               CREATE TABLE t2 (x NUMBER);\n\
               COMMIT;\n\
               ALTER SESSION SET NLS_DATE_FORMAT = 'YYYY';\n\
               BEGIN NULL; END;\n\
               /\n\
               CREATE OR REPLACE PROCEDURE p AS BEGIN NULL; END;\n\
               /\n";
    assert_eq!(
        types(sql),
        vec![
            StatementType::Query,
            StatementType::Dml,
            StatementType::Ddl,
            StatementType::TransactionControl,
            StatementType::SessionControl,
            StatementType::Plsql,
            StatementType::Plsql,
        ]
    );
}

#[test]
fn classify_handles_comments_and_parentheses() {
    assert_eq!(classify("/* x */ WITH a AS (SELECT 1 FROM DUAL) SELECT * FROM a"), StatementType::Query);
    assert_eq!(classify("(SELECT 1 FROM DUAL)"), StatementType::Query);
    assert_eq!(classify("ALTER SYSTEM FLUSH SHARED_POOL"), StatementType::SystemControl);
    assert_eq!(classify("SET TRANSACTION READ ONLY"), StatementType::TransactionControl);
    assert_eq!(classify("{call p()}"), StatementType::Jdbc);
    assert_eq!(classify("PROMPT hello"), StatementType::Sqlplus);
    assert_eq!(classify(";"), StatementType::Ignore);
    assert_eq!(StatementType::TransactionControl.as_str(), "transaction-control");
}

#[test]
fn directives_get_their_own_spans() {
    let sql = "prompt starting\nvar n number\nSELECT 1 FROM DUAL;\ndefine x = 5\nset define off\n";
    let spans = split(sql);
    let kinds: Vec<_> = executable_spans(&spans)
        .map(|span| (span.statement_type, span.command.clone()))
        .collect();
    assert_eq!(kinds.len(), 5);
    assert_eq!(
        kinds[0],
        (
            StatementType::Sqlplus,
            Some(ToolCommand::Prompt {
                text: "starting".to_string()
            })
        )
    );
    assert!(matches!(
        &kinds[1].1,
        Some(ToolCommand::Var { name, data_type: BindDataType::Number, .. }) if name == "N"
    ));
    assert_eq!(kinds[2].0, StatementType::Query);
    assert!(matches!(&kinds[3].1, Some(ToolCommand::Define { name, value }) if name == "X" && value == "5"));
    assert!(matches!(
        kinds[4].1,
        Some(ToolCommand::SetDefine { enabled: false, .. })
    ));
}

#[test]
fn bare_define_lists_variables() {
    let sql = "define\nSELECT 1 FROM DUAL;";
    assert_eq!(directives(sql), vec![ToolCommand::ShowDefine { name: None }]);
}

#[test]
fn unterminated_literal_marks_span_malformed() {
    let sql = "SELECT 1 FROM DUAL;\nSELECT 'abc FROM DUAL;\n";
    let spans = split(sql);
    assert_eq!(rejoin(&spans), sql);
    let last = executable_spans(&spans).last().expect("span");
    assert!(last.malformed);
    assert!(!spans[0].malformed);
}

#[test]
fn unterminated_block_comment_marks_span_malformed() {
    let sql = "SELECT 1 FROM DUAL;\n/* never closed\nSELECT 2 FROM DUAL;";
    let spans = split(sql);
    assert_eq!(rejoin(&spans), sql);
    assert!(spans.iter().any(|span| span.malformed));
}

#[test]
fn line_index_round_trips_positions() {
    let text = "ab\ncdé\n\nx";
    let index = LineIndex::new(text);
    let offset = text.find('x').expect("x");
    let position = index.position(offset);
    assert_eq!(position, Position::new(3, 0));
    assert_eq!(index.offset(position), offset);
    assert_eq!(index.offset(Position::new(1, 2)), text.find('é').expect("é"));
}

proptest! {
    #[test]
    fn split_always_tiles(script in "[a-zA-Z0-9 ;'\"/*&:.\\-\n]{0,120}") {
        let spans = split(&script);
        prop_assert_eq!(rejoin(&spans), script.clone());
        for span in &spans {
            prop_assert!(span.start_offset <= span.body_start);
            prop_assert!(span.body_start <= span.body_end);
            prop_assert!(span.body_end <= span.end_offset);
        }
    }

    #[test]
    fn statement_count_matches_terminated_selects(count in 1usize..8) {
        let script: String = (0..count)
            .map(|n| format!("SELECT {n} FROM DUAL;\n"))
            .collect();
        prop_assert_eq!(statements(&script).len(), count);
    }
}

// ============================================================================
// Substitution
// ============================================================================

#[test]
fn prompt_first_collapses_to_one_prompt() {
    let sql = "SELECT &&dept FROM DUAL;\nSELECT &dept, &&dept FROM emp;";
    let mut resolver = SubstitutionResolver::new();
    let found = resolver.resolve_script(&split(sql));
    assert_eq!(found.statements.len(), 2);
    assert_eq!(found.prompts.len(), 1);
    assert_eq!(found.prompts[0].kind, SubstitutionKind::PromptFirst);
    assert_eq!(found.prompts[0].name, "DEPT");
    assert_eq!(found.unresolved(&BTreeMap::new()), vec!["DEPT"]);
    assert!(found.unresolved(&supplied(&[("dept", "10")])).is_empty());
}

#[test]
fn prompt_always_repeats_but_reports_name_once() {
    let sql = "SELECT &a, &a FROM DUAL;";
    let mut resolver = SubstitutionResolver::new();
    let found = resolver.resolve_script(&split(sql));
    assert_eq!(found.prompts.len(), 2);
    assert!(found
        .prompts
        .iter()
        .all(|prompt| prompt.kind == SubstitutionKind::PromptAlways));
    assert_eq!(found.unresolved(&BTreeMap::new()), vec!["A"]);
}

#[test]
fn defined_names_are_not_unresolved() {
    let sql = "define x = 10\nSELECT &x FROM DUAL;";
    let mut resolver = SubstitutionResolver::new();
    let found = resolver.resolve_script(&split(sql));
    let referenced = found.statements.last().expect("statement");
    assert_eq!(referenced[0].kind, SubstitutionKind::Defined);
    assert_eq!(referenced[0].value.as_deref(), Some("10"));
    assert!(found.unresolved(&BTreeMap::new()).is_empty());
}

#[test]
fn accept_with_default_is_satisfiable() {
    let sql = "accept n number default 5 prompt 'How many?'\nSELECT &n FROM DUAL;";
    let mut resolver = SubstitutionResolver::new();
    let found = resolver.resolve_script(&split(sql));
    assert_eq!(found.prompts.len(), 1);
    let prompt = &found.prompts[0];
    assert_eq!(prompt.kind, SubstitutionKind::Accept);
    assert_eq!(prompt.default_value.as_deref(), Some("5"));
    assert_eq!(prompt.data_type.as_deref(), Some("NUMBER"));
    assert!(found.unresolved(&BTreeMap::new()).is_empty());
    assert_eq!(
        resolver.substitute("SELECT &n FROM DUAL", &BTreeMap::new()),
        "SELECT 5 FROM DUAL"
    );
}

#[test]
fn set_define_off_disables_scanning() {
    let sql = "set define off\nSELECT 'R&D' FROM DUAL;";
    let mut resolver = SubstitutionResolver::new();
    let found = resolver.resolve_script(&split(sql));
    assert!(found.prompts.is_empty());
    assert_eq!(resolver.define_char(), None);
}

#[test]
fn substitute_defines_prompt_first_values() {
    let mut resolver = SubstitutionResolver::new();
    let text = resolver.substitute("SELECT &&x, &x FROM DUAL", &supplied(&[("x", "1")]));
    assert_eq!(text, "SELECT 1, 1 FROM DUAL");
    assert_eq!(resolver.lookup("x"), Some("1"));
}

#[test]
fn substitute_consumes_trailing_period_and_keeps_unknowns() {
    let mut resolver = SubstitutionResolver::new();
    resolver.define("p", "abc");
    assert_eq!(
        resolver.substitute("SELECT '&p.txt', &missing FROM DUAL", &BTreeMap::new()),
        "SELECT 'abctxt', &missing FROM DUAL"
    );
}

#[test]
fn placeholders_in_comments_are_skipped() {
    let sql = "SELECT 1 -- &not_this\nFROM DUAL /* &nor_this */;";
    let mut resolver = SubstitutionResolver::new();
    assert!(resolver.resolve_script(&split(sql)).prompts.is_empty());
}

#[test]
fn substitution_ranges_point_into_the_script() {
    let sql = "SELECT 1 FROM DUAL;\nSELECT &col FROM emp;";
    let mut resolver = SubstitutionResolver::new();
    let found = resolver.resolve_script(&split(sql));
    let range = found.prompts[0].range.expect("range");
    assert_eq!(range.start, Position::new(1, 7));
    assert_eq!(range.end, Position::new(1, 11));
}

// ============================================================================
// Binds
// ============================================================================

#[test]
fn bind_markers_skip_literals_casts_and_trigger_records() {
    assert_eq!(
        extract_bind_names("SELECT :a, ':b', x::int, :A FROM t WHERE y = :c -- :d"),
        vec!["A", "C"]
    );
    assert!(extract_bind_names(
        "CREATE OR REPLACE TRIGGER t BEFORE INSERT ON x FOR EACH ROW BEGIN :NEW.a := 1; END;"
    )
    .is_empty());
}

#[test]
fn returning_into_markers_are_flagged() {
    let markers =
        extract_bind_markers("INSERT INTO t (a) VALUES (:v) RETURNING id INTO :new_id");
    assert_eq!(markers.len(), 2);
    assert!(!markers[0].returning);
    assert!(markers[1].returning);
}

#[test]
fn resolve_binds_reports_undeclared_marker() {
    let err = resolve_binds(
        "SELECT :x FROM DUAL",
        StatementType::Query,
        &[],
        &BTreeMap::new(),
    )
    .expect_err("undeclared");
    assert_eq!(err.error_code, "SP2-0552");
}

// ============================================================================
// Prepare
// ============================================================================

#[test]
fn prepare_picks_statement_under_cursor() {
    let sql = "SELECT 1 FROM DUAL;\nSELECT 2 FROM DUAL;";
    let response = prepare(sql, Some(Position::new(1, 3)));
    assert_eq!(response.statement_text.as_deref(), Some("SELECT 2 FROM DUAL;"));
    assert_eq!(response.statement_type, Some(StatementType::Query));
    let range = response.statement_range.expect("range");
    assert_eq!(range.start, Position::new(1, 0));
}

#[test]
fn prepare_between_statements_picks_preceding() {
    let sql = "SELECT 1 FROM DUAL;\n\n\nSELECT 2 FROM DUAL;";
    let response = prepare(sql, Some(Position::new(1, 0)));
    assert_eq!(response.statement_text.as_deref(), Some("SELECT 1 FROM DUAL;"));
}

#[test]
fn prepare_before_first_statement_picks_first() {
    let sql = "-- header\nSELECT 1 FROM DUAL;";
    let response = prepare(sql, Some(Position::new(0, 0)));
    assert_eq!(response.statement_text.as_deref(), Some("SELECT 1 FROM DUAL;"));
}

#[test]
fn prepare_without_position_uses_first_statement() {
    let response = prepare("\n\nSELECT 1 FROM DUAL;\nSELECT 2 FROM DUAL;", None);
    assert_eq!(response.statement_text.as_deref(), Some("SELECT 1 FROM DUAL;"));
}

#[test]
fn prepare_of_empty_script_is_empty() {
    assert_eq!(prepare("  -- only a comment\n", None), SqlPrepareResponse::default());
}

#[test]
fn prepare_lists_undefined_substitutions_only() {
    let sql = "define d = 1\nSELECT &d, &e FROM DUAL;";
    let response = prepare(sql, Some(Position::new(1, 0)));
    let names: Vec<_> = response
        .substitutions
        .iter()
        .map(|substitution| substitution.name.as_str())
        .collect();
    assert_eq!(names, vec!["E"]);
}

#[test]
fn prepare_reports_binds_with_declared_types() {
    let sql = "var n number\nBEGIN :n := 1; END;";
    let response = prepare(sql, Some(Position::new(1, 3)));
    assert_eq!(response.statement_type, Some(StatementType::Plsql));
    assert_eq!(response.binds.len(), 1);
    assert_eq!(response.binds[0].name, "N");
    assert_eq!(response.binds[0].data_type, BindDataType::Number);
    assert_eq!(response.binds[0].mode, BindMode::Inout);

    let response = prepare("SELECT :x FROM DUAL", None);
    assert_eq!(response.binds[0].data_type, BindDataType::Varchar2);
    assert_eq!(response.binds[0].mode, BindMode::In);
}

#[test]
fn preparer_uses_session_defines() {
    let mut resolver = SubstitutionResolver::new();
    resolver.define("d", "1");
    let preparer = StatementPreparer::with_session(resolver, BTreeMap::new());
    let response = preparer.prepare("SELECT &d FROM DUAL;", None);
    assert!(response.substitutions.is_empty());
}
