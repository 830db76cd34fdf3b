//! NDJSON chunks for the streamed format: an `{"env":...}` line, then one
//! line per statement response, then `{"error":...}` if the run broke off.

use bytes::Bytes;
use serde::Serialize;
use serde_json::json;

use crate::db::query::{ScriptEnv, SqlStatementResponse};
use crate::error::Error;

pub fn encode_env(env: &ScriptEnv) -> Bytes {
    line(&json!({ "env": env }))
}

pub fn encode_statement(response: &SqlStatementResponse) -> Bytes {
    line(response)
}

pub fn encode_failure(err: &Error) -> Bytes {
    line(&json!({ "error": { "message": err.to_string() } }))
}

fn line<T: Serialize + ?Sized>(value: &T) -> Bytes {
    match serde_json::to_vec(value) {
        Ok(mut encoded) => {
            encoded.push(b'\n');
            Bytes::from(encoded)
        }
        Err(err) => {
            eprintln!("Warning: failed to encode script output: {err}");
            let fallback = json!({ "error": { "message": err.to_string() } });
            Bytes::from(format!("{fallback}\n"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    #[test]
    fn every_chunk_is_one_json_line() {
        let env = encode_env(&ScriptEnv {
            default_time_zone: Some("+00:00".to_string()),
        });
        let statement = encode_statement(&SqlStatementResponse {
            statement_id: 4,
            response: vec!["Table created.".to_string()],
            ..SqlStatementResponse::default()
        });
        let failure = encode_failure(&Error::SessionDisconnected);

        for chunk in [&env, &statement, &failure] {
            assert_eq!(chunk.iter().filter(|b| **b == b'\n').count(), 1);
            assert!(chunk.ends_with(b"\n"));
        }
        let env: Value = serde_json::from_slice(&env).expect("env");
        assert_eq!(env["env"]["defaultTimeZone"], "+00:00");
        let statement: Value = serde_json::from_slice(&statement).expect("statement");
        assert_eq!(statement["statementId"], 4);
        let failure: Value = serde_json::from_slice(&failure).expect("failure");
        assert_eq!(failure["error"]["message"], "session is disconnected");
    }
}
