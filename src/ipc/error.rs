//! Response envelopes. Every reply carries the request id plus either a
//! `result` or an `error {code, message, details?}`; codes are short
//! machine-readable strings (`bad_params`, `no_workspace`, `not_found`,
//! `db_*_failed`, ...) and the message is for humans.

use serde_json::{json, Map, Value};

pub fn ok(id: &str, result: Value) -> Value {
    json!({
        "id": id,
        "ok": true,
        "result": result
    })
}

pub fn err(id: &str, code: &str, message: impl Into<String>, details: Option<Value>) -> Value {
    let mut error = Map::new();
    error.insert("code".to_string(), Value::String(code.to_string()));
    error.insert("message".to_string(), Value::String(message.into()));
    if let Some(d) = details {
        error.insert("details".to_string(), d);
    }
    json!({
        "id": id,
        "ok": false,
        "error": error,
    })
}
