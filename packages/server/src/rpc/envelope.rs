//! Request / response envelopes.

use serde::Serialize;
use serde_json::{Map, Value};

use super::codes;

/// Returned verbatim if a response somehow fails to serialize
const INTERNAL_ERROR_FALLBACK: &str =
    r#"{"jsonrpc":"2.0","id":null,"error":{"code":-32603,"message":"Internal error"}}"#;

#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub id: Value,
    pub method: String,
    pub params: Option<Value>,
}

impl Request {
    /// Notifications are fire-and-forget and never get a response
    pub fn is_notification(&self) -> bool {
        self.method.starts_with("notifications/")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorObject {
    pub code: i64,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Response {
    jsonrpc: &'static str,
    pub id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorObject>,
}

impl Response {
    pub fn success(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn error(id: Value, code: i64, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: None,
            error: Some(ErrorObject {
                code,
                message: message.into(),
            }),
        }
    }

    pub fn to_json_string(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| {
            tracing::error!("Failed to serialize response: {}", e);
            INTERNAL_ERROR_FALLBACK.to_string()
        })
    }
}

/// Parse one request, or produce the error response to send instead
pub fn parse_request(text: &str) -> Result<Request, Response> {
    let value: Value = serde_json::from_str(text).map_err(|e| {
        tracing::warn!("Failed to parse JSON-RPC request: {}", e);
        Response::error(Value::Null, codes::PARSE_ERROR, format!("Parse error: {e}"))
    })?;

    let Value::Object(mut object) = value else {
        return Err(Response::error(
            Value::Null,
            codes::INVALID_REQUEST,
            "Invalid Request: expected a JSON object",
        ));
    };

    let id = object.remove("id").unwrap_or(Value::Null);
    let method = match object.remove("method") {
        Some(Value::String(method)) => method,
        _ => {
            return Err(Response::error(
                id,
                codes::INVALID_REQUEST,
                "Invalid Request: missing method",
            ));
        }
    };

    Ok(Request {
        id,
        method,
        params: object.remove("params"),
    })
}

/// `params.arguments` of a `tools/call`, defaulting to an empty object
pub fn call_arguments(params: &Value) -> Option<Value> {
    match params.get("arguments") {
        None | Some(Value::Null) => Some(Value::Object(Map::new())),
        Some(args @ Value::Object(_)) => Some(args.clone()),
        Some(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_request_keeps_id_and_params() {
        // テスト項目: id / method / params が取り出される
        // given (前提条件):
        let text = r#"{"jsonrpc":"2.0","id":"abc","method":"tools/list","params":{"x":1}}"#;

        // when (操作):
        let request = parse_request(text).unwrap();

        // then (期待する結果):
        assert_eq!(request.id, json!("abc"));
        assert_eq!(request.method, "tools/list");
        assert_eq!(request.params, Some(json!({"x": 1})));
        assert!(!request.is_notification());
    }

    #[test]
    fn test_parse_request_rejects_garbage() {
        // テスト項目: JSON でない入力は -32700、オブジェクトでない入力は -32600 になる
        // given (前提条件):
        let garbage = "{not json";
        let array = "[1,2,3]";
        let no_method = r#"{"id":7}"#;

        // when (操作):
        let garbage = parse_request(garbage).unwrap_err();
        let array = parse_request(array).unwrap_err();
        let no_method = parse_request(no_method).unwrap_err();

        // then (期待する結果):
        assert_eq!(garbage.error.unwrap().code, codes::PARSE_ERROR);
        assert_eq!(array.error.unwrap().code, codes::INVALID_REQUEST);
        assert_eq!(no_method.id, json!(7));
        assert_eq!(no_method.error.unwrap().code, codes::INVALID_REQUEST);
    }

    #[test]
    fn test_response_serialization_shape() {
        // テスト項目: 成功とエラーのレスポンスが正しい形式で直列化される
        // given (前提条件):
        let ok = Response::success(json!(1), json!({"tools": []}));
        let err = Response::error(Value::Null, codes::METHOD_NOT_FOUND, "Method not found: x");

        // when (操作):
        let ok: Value = serde_json::from_str(&ok.to_json_string()).unwrap();
        let err: Value = serde_json::from_str(&err.to_json_string()).unwrap();

        // then (期待する結果):
        assert_eq!(ok, json!({"jsonrpc": "2.0", "id": 1, "result": {"tools": []}}));
        assert_eq!(
            err,
            json!({"jsonrpc": "2.0", "id": null, "error": {"code": -32601, "message": "Method not found: x"}})
        );
    }

    #[test]
    fn test_call_arguments_defaults() {
        assert_eq!(call_arguments(&json!({"name": "a"})), Some(json!({})));
        assert_eq!(call_arguments(&json!({"arguments": null})), Some(json!({})));
        assert_eq!(
            call_arguments(&json!({"arguments": {"lines": 5}})),
            Some(json!({"lines": 5}))
        );
        assert_eq!(call_arguments(&json!({"arguments": [1]})), None);
    }
}
