//! Runner wire protocol (spec §6.1): UTF-8 JSON objects, one per line,
//! newline-terminated. Encoding/decoding is done by hand against
//! `serde_json::Value` rather than a single tagged enum, because the frame
//! shapes are discriminated by different key sets (`action`, `event`,
//! `status`) rather than one common tag.

use serde_json::{json, Value};

use crate::error::{Error, Result};

/// A message the host sends to a worker.
#[derive(Debug, Clone)]
pub enum HostMessage {
    Ping,
    Exec { code: String, documents: Vec<String> },
    Shutdown,
    SubcallResultOk { text: String },
    SubcallResultErr { error_kind: String, message: String },
}

impl HostMessage {
    pub fn to_value(&self) -> Value {
        match self {
            HostMessage::Ping => json!({"action": "ping"}),
            HostMessage::Exec { code, documents } => {
                json!({"action": "exec", "code": code, "documents": documents})
            }
            HostMessage::Shutdown => json!({"action": "shutdown"}),
            HostMessage::SubcallResultOk { text } => {
                json!({"event": "subcall_result", "ok": true, "text": text})
            }
            HostMessage::SubcallResultErr { error_kind, message } => {
                json!({
                    "event": "subcall_result",
                    "ok": false,
                    "error_kind": error_kind,
                    "message": message,
                })
            }
        }
    }

    /// Render as a single newline-terminated frame line.
    pub fn encode_line(&self) -> Result<String> {
        let mut s = serde_json::to_string(&self.to_value())?;
        s.push('\n');
        Ok(s)
    }
}

/// A message a worker sends to the host.
#[derive(Debug, Clone)]
pub enum WorkerMessage {
    Pong,
    Subcall { instruction: String, content: String },
    Final { value: String },
    ExecResultOk { stdout: String },
    ExecResultErr { stdout: String, error: String },
    ShutdownAck,
}

impl WorkerMessage {
    pub fn parse_line(line: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(line)?;
        Self::parse_value(&value)
    }

    pub fn parse_value(value: &Value) -> Result<Self> {
        let obj = value
            .as_object()
            .ok_or_else(|| Error::protocol_violation("frame is not a JSON object"))?;

        if let Some(event) = obj.get("event").and_then(Value::as_str) {
            return match event {
                "subcall" => {
                    let instruction = str_field(obj, "instruction")?;
                    let content = str_field(obj, "content")?;
                    Ok(WorkerMessage::Subcall { instruction, content })
                }
                "final" => {
                    let val = str_field(obj, "value")?;
                    Ok(WorkerMessage::Final { value: val })
                }
                "exec_result" => {
                    let ok = obj
                        .get("ok")
                        .and_then(Value::as_bool)
                        .ok_or_else(|| Error::protocol_violation("exec_result missing ok"))?;
                    let stdout = str_field(obj, "stdout").unwrap_or_default();
                    if ok {
                        Ok(WorkerMessage::ExecResultOk { stdout })
                    } else {
                        let error = str_field(obj, "error").unwrap_or_default();
                        Ok(WorkerMessage::ExecResultErr { stdout, error })
                    }
                }
                other => Err(Error::protocol_violation(format!(
                    "unknown frame event {other:?}"
                ))),
            };
        }

        if let Some(status) = obj.get("status").and_then(Value::as_str) {
            return match status {
                "ok" => match obj.get("message").and_then(Value::as_str) {
                    Some("pong") => Ok(WorkerMessage::Pong),
                    None => Ok(WorkerMessage::ShutdownAck),
                    Some(other) => Err(Error::protocol_violation(format!(
                        "unexpected status message {other:?}"
                    ))),
                },
                other => Err(Error::protocol_violation(format!(
                    "unexpected status {other:?}"
                ))),
            };
        }

        Err(Error::protocol_violation("frame has neither event nor status"))
    }
}

fn str_field(obj: &serde_json::Map<String, Value>, field: &str) -> Result<String> {
    obj.get(field)
        .and_then(Value::as_str)
        .map(|s| s.to_string())
        .ok_or_else(|| Error::protocol_violation(format!("frame missing field {field:?}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_ping() {
        let line = HostMessage::Ping.encode_line().unwrap();
        assert_eq!(line, "{\"action\":\"ping\"}\n");
    }

    #[test]
    fn parses_pong() {
        let msg = WorkerMessage::parse_line(r#"{"status":"ok","message":"pong"}"#).unwrap();
        assert!(matches!(msg, WorkerMessage::Pong));
    }

    #[test]
    fn parses_final() {
        let msg = WorkerMessage::parse_line(r#"{"event":"final","value":"ok"}"#).unwrap();
        match msg {
            WorkerMessage::Final { value } => assert_eq!(value, "ok"),
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn unknown_event_is_protocol_violation() {
        let err = WorkerMessage::parse_line(r#"{"event":"mystery"}"#).unwrap_err();
        assert!(matches!(err, Error::ProtocolViolation(_)));
    }
}
