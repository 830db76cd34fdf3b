use crate::db::query::{ScriptEnv, SqlScriptResponse, SqlStatementResponse};

/// One page of a JSON script response. The caller adds `hasMore` and the
/// continuation link when statements remain.
pub fn assemble(env: ScriptEnv, items: Vec<SqlStatementResponse>) -> SqlScriptResponse {
    SqlScriptResponse {
        env,
        items,
        has_more: false,
        links: Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::query::{SqlScriptError, StatementPos, StatementType};

    #[test]
    fn serializes_the_documented_shape() {
        let mut failed = SqlStatementResponse {
            statement_id: 1,
            statement_type: Some(StatementType::Query),
            statement_pos: StatementPos {
                start_line: 2,
                end_line: 2,
            },
            statement_text: "select * from nope".to_string(),
            ..SqlStatementResponse::default()
        };
        failed.set_error(
            SqlScriptError::new("ORA-00942", "table or view does not exist")
                .with_cause("The table is missing."),
        );
        let response = assemble(
            ScriptEnv {
                default_time_zone: Some("+02:00".to_string()),
            },
            vec![failed],
        );

        let value = serde_json::to_value(&response).expect("json");
        assert_eq!(value["env"]["defaultTimeZone"], "+02:00");
        assert_eq!(value["hasMore"], false);
        assert!(value.get("links").is_none());
        let item = &value["items"][0];
        assert_eq!(item["statementId"], 1);
        assert_eq!(item["statementType"], "query");
        assert_eq!(item["statementPos"]["startLine"], 2);
        assert_eq!(item["error"]["errorCode"], "ORA-00942");
        assert_eq!(item["errorCode"], 942);
        assert_eq!(item["errorDetails"], "The table is missing.");
        assert!(item.get("resultSet").is_none());
    }
}
