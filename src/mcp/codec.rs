//! MCP wire codec
//!
//! The stdio transport carries one JSON-RPC object per line:
//! ```text
//! {"jsonrpc":"2.0","id":1,"method":"tools/list","params":{}}\n
//! ```
//! Decoding never fails. Servers launched through wrappers such as `npx`
//! occasionally print banners on stdout, so anything that is not a JSON-RPC
//! object degrades to [`Envelope::Unparseable`].

use serde_json::{Map, Value};

use crate::common::Result;

use super::types::*;

/// Encode a request line
pub fn encode_request(id: i64, method: &str, params: &Value) -> Result<String> {
    let message = OutboundMessage {
        jsonrpc: "2.0",
        id: Some(id),
        method,
        params,
    };
    Ok(serde_json::to_string(&message)?)
}

/// Encode a notification line
pub fn encode_notification(method: &str, params: &Value) -> Result<String> {
    let message = OutboundMessage {
        jsonrpc: "2.0",
        id: None,
        method,
        params,
    };
    Ok(serde_json::to_string(&message)?)
}

/// Encode a response to a server-initiated request
pub fn encode_response(id: &RequestId, outcome: std::result::Result<Value, RpcError>) -> Result<String> {
    let mut message = Map::new();
    message.insert("jsonrpc".to_string(), Value::from("2.0"));
    message.insert("id".to_string(), id.to_value());
    match outcome {
        Ok(result) => {
            message.insert("result".to_string(), result);
        }
        Err(error) => {
            let mut body = Map::new();
            body.insert("code".to_string(), Value::from(error.code.unwrap_or(-32603)));
            body.insert("message".to_string(), Value::from(error.message));
            if let Some(data) = error.data {
                body.insert("data".to_string(), data);
            }
            message.insert("error".to_string(), Value::Object(body));
        }
    }
    Ok(serde_json::to_string(&Value::Object(message))?)
}

/// Decode one line from the server's stdout
pub fn decode(line: &str) -> Envelope {
    let trimmed = line.trim();
    let Ok(Value::Object(mut object)) = serde_json::from_str::<Value>(trimmed) else {
        return Envelope::Unparseable(trimmed.to_string());
    };

    let id = match object.get("id") {
        Some(raw) => match RequestId::from_value(raw) {
            Some(id) => Some(id),
            // An id that is not a valid JSON-RPC id cannot be correlated
            None => return Envelope::Unparseable(trimmed.to_string()),
        },
        None => None,
    };
    let method = object
        .get("method")
        .and_then(Value::as_str)
        .map(str::to_string);

    match (id, method) {
        (Some(id), _) if object.contains_key("result") || object.contains_key("error") => {
            let outcome = match object.remove("error") {
                Some(error) => Err(RpcError::from_value(error)),
                None => Ok(object.remove("result").unwrap_or(Value::Null)),
            };
            Envelope::Response(Response { id, outcome })
        }
        (Some(id), Some(method)) => Envelope::Request(ServerRequest {
            id,
            method,
            params: object.remove("params"),
        }),
        (None, Some(method)) => Envelope::Notification(Notification {
            method,
            params: object.remove("params"),
        }),
        _ => Envelope::Unparseable(trimmed.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_encode_request() {
        let line = encode_request(3, "tools/list", &json!({})).unwrap();
        let value: Value = serde_json::from_str(&line).unwrap();
        assert_eq!(
            value,
            json!({"jsonrpc": "2.0", "id": 3, "method": "tools/list", "params": {}})
        );
        assert!(!line.contains('\n'));
    }

    #[test]
    fn test_encode_notification_has_no_id() {
        let line = encode_notification("notifications/initialized", &json!({})).unwrap();
        let value: Value = serde_json::from_str(&line).unwrap();
        assert!(value.get("id").is_none());
        assert_eq!(value["method"], "notifications/initialized");
    }

    #[test]
    fn test_encode_error_response() {
        let error = RpcError {
            code: Some(-32601),
            message: "Method not found".to_string(),
            data: None,
        };
        let line = encode_response(&RequestId::String("s1".into()), Err(error)).unwrap();
        let value: Value = serde_json::from_str(&line).unwrap();
        assert_eq!(value["id"], "s1");
        assert_eq!(value["error"]["code"], -32601);
    }

    #[test]
    fn test_decode_success_response() {
        match decode(r#"{"jsonrpc":"2.0","id":4,"result":{"tools":[]}}"#) {
            Envelope::Response(response) => {
                assert!(response.id.matches(4));
                assert_eq!(response.into_result().unwrap(), json!({"tools": []}));
            }
            other => panic!("unexpected envelope: {other:?}"),
        }
    }

    #[test]
    fn test_decode_error_response_without_jsonrpc_member() {
        match decode(r#"{"id":2,"error":{"code":-32000,"message":"nope"}}"#) {
            Envelope::Response(response) => {
                let err = response.into_result().unwrap_err();
                assert_eq!(err.code, Some(-32000));
                assert_eq!(err.message, "nope");
            }
            other => panic!("unexpected envelope: {other:?}"),
        }
    }

    #[test]
    fn test_decode_notification() {
        match decode(r#"{"jsonrpc":"2.0","method":"notifications/message","params":{"level":"info"}}"#) {
            Envelope::Notification(n) => {
                assert_eq!(n.method, "notifications/message");
                assert_eq!(n.params, Some(json!({"level": "info"})));
            }
            other => panic!("unexpected envelope: {other:?}"),
        }
    }

    #[test]
    fn test_decode_server_request() {
        match decode(r#"{"jsonrpc":"2.0","id":"srv-1","method":"ping"}"#) {
            Envelope::Request(req) => {
                assert_eq!(req.method, "ping");
                assert_eq!(req.id, RequestId::String("srv-1".into()));
            }
            other => panic!("unexpected envelope: {other:?}"),
        }
    }

    #[test]
    fn test_decode_noise_is_unparseable() {
        for line in [
            "npm WARN deprecated something",
            "",
            "[1, 2, 3]",
            "42",
            r#"{"jsonrpc":"2.0"}"#,
            r#"{"id":1}"#,
            r#"{"id":{"nested":true},"result":{}}"#,
            "{\"id\": 1, \"result\": ",
        ] {
            assert!(
                matches!(decode(line), Envelope::Unparseable(_)),
                "line should be unparseable: {line}"
            );
        }
    }
}
