use crate::{ProcId, ProcStatus, ProcessSpec, ProcessUpdate};
use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;

pub const ACTION_ADD: &str = "add";
pub const ACTION_START: &str = "start";
pub const ACTION_FINISHED: &str = "finished";
pub const ACTION_INTERRUPT: &str = "interrupt";
pub const ACTION_KILL: &str = "kill";
pub const ACTION_INTERRUPT_RESTART: &str = "interrupt-restart";
pub const ACTION_KILL_RESTART: &str = "kill-restart";
pub const ACTION_DEL: &str = "del";
pub const ACTION_REFRESH: &str = "refresh";
pub const ACTION_ENV: &str = "env";
pub const ACTION_ERROR: &str = "error";

/// Sentinel identity in a refresh `content` list marking the message as a
/// full snapshot rather than a delta.
pub const REFRESH_ALL_SENTINEL: ProcId = -1;

/// The canonical message envelope. Both directions share the shape; which
/// fields are populated depends on the action.
#[derive(Debug, Deserialize)]
struct Envelope {
    action: String,
    #[serde(default)]
    content: Option<Value>,
    #[serde(default)]
    processes: Option<Vec<ProcessUpdate>>,
    #[serde(default)]
    contents: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusAction {
    Start,
    Finished,
    Interrupt,
    Kill,
}

impl StatusAction {
    pub fn as_str(self) -> &'static str {
        match self {
            StatusAction::Start => ACTION_START,
            StatusAction::Finished => ACTION_FINISHED,
            StatusAction::Interrupt => ACTION_INTERRUPT,
            StatusAction::Kill => ACTION_KILL,
        }
    }

    /// Status a bare status-change message implies when the server attached
    /// no record delta.
    pub fn implied_status(self) -> ProcStatus {
        match self {
            StatusAction::Start => ProcStatus::Running,
            StatusAction::Finished => ProcStatus::Stopped,
            StatusAction::Interrupt | StatusAction::Kill => ProcStatus::Stopping,
        }
    }
}

/// Decoded inbound message. Closed set: a new server-side action decodes to
/// `Unrecognized` instead of failing, so newer supervisors do not break the
/// client.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerMsg {
    Add {
        processes: Vec<ProcessUpdate>,
    },
    StatusChanged {
        action: StatusAction,
        num: ProcId,
        update: Option<ProcessUpdate>,
    },
    Deleted {
        num: ProcId,
    },
    RefreshFull {
        processes: Vec<ProcessUpdate>,
    },
    RefreshPartial {
        remove: Vec<ProcId>,
        update: Vec<ProcessUpdate>,
    },
    Env {
        lines: Vec<String>,
    },
    Error {
        message: String,
    },
    Unrecognized {
        action: String,
    },
}

/// Outgoing command. Encoding is total over this set.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Add(ProcessSpec),
    Start(ProcId),
    Interrupt(ProcId),
    Kill(ProcId),
    InterruptRestart(ProcId),
    KillRestart(ProcId),
    Delete(ProcId),
    RefreshAll,
    RefreshOne(ProcId),
    FetchEnv,
}

impl Command {
    pub fn action(&self) -> &'static str {
        match self {
            Command::Add(_) => ACTION_ADD,
            Command::Start(_) => ACTION_START,
            Command::Interrupt(_) => ACTION_INTERRUPT,
            Command::Kill(_) => ACTION_KILL,
            Command::InterruptRestart(_) => ACTION_INTERRUPT_RESTART,
            Command::KillRestart(_) => ACTION_KILL_RESTART,
            Command::Delete(_) => ACTION_DEL,
            Command::RefreshAll | Command::RefreshOne(_) => ACTION_REFRESH,
            Command::FetchEnv => ACTION_ENV,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("message parse failed: {0}")]
    Parse(String),
    #[error("action '{action}' missing required field '{field}'")]
    MissingField {
        action: &'static str,
        field: &'static str,
    },
    #[error("action '{action}' has invalid field '{field}': {detail}")]
    InvalidField {
        action: &'static str,
        field: &'static str,
        detail: String,
    },
}

pub fn decode_message(raw: &str) -> Result<ServerMsg, DecodeError> {
    let envelope: Envelope =
        serde_json::from_str(raw).map_err(|err| DecodeError::Parse(err.to_string()))?;
    match envelope.action.as_str() {
        ACTION_ADD => {
            let processes = envelope.processes.ok_or(DecodeError::MissingField {
                action: ACTION_ADD,
                field: "processes",
            })?;
            Ok(ServerMsg::Add { processes })
        }
        ACTION_START => decode_status_change(StatusAction::Start, envelope),
        ACTION_FINISHED => decode_status_change(StatusAction::Finished, envelope),
        ACTION_INTERRUPT => decode_status_change(StatusAction::Interrupt, envelope),
        ACTION_KILL => decode_status_change(StatusAction::Kill, envelope),
        ACTION_DEL => {
            let num = content_id(envelope.content.as_ref(), ACTION_DEL)?;
            Ok(ServerMsg::Deleted { num })
        }
        ACTION_REFRESH => {
            let ids = content_ids(envelope.content.as_ref(), ACTION_REFRESH)?;
            let processes = envelope.processes.unwrap_or_default();
            match ids {
                Some(ids) if ids.contains(&REFRESH_ALL_SENTINEL) => {
                    Ok(ServerMsg::RefreshFull { processes })
                }
                Some(ids) => Ok(ServerMsg::RefreshPartial {
                    remove: ids,
                    update: processes,
                }),
                None => Ok(ServerMsg::RefreshPartial {
                    remove: Vec::new(),
                    update: processes,
                }),
            }
        }
        ACTION_ENV => {
            let contents = envelope.contents.ok_or(DecodeError::MissingField {
                action: ACTION_ENV,
                field: "contents",
            })?;
            let lines: Vec<String> =
                serde_json::from_str(&contents).map_err(|err| DecodeError::InvalidField {
                    action: ACTION_ENV,
                    field: "contents",
                    detail: err.to_string(),
                })?;
            Ok(ServerMsg::Env { lines })
        }
        ACTION_ERROR => {
            let message = envelope
                .error
                .or(envelope.contents)
                .ok_or(DecodeError::MissingField {
                    action: ACTION_ERROR,
                    field: "error",
                })?;
            Ok(ServerMsg::Error { message })
        }
        _ => Ok(ServerMsg::Unrecognized {
            action: envelope.action,
        }),
    }
}

/// Infallible by construction: every command maps to a plain JSON object.
pub fn encode_command(command: &Command) -> String {
    let value = match command {
        Command::Add(spec) => json!({ "action": ACTION_ADD, "processes": [spec] }),
        Command::Start(num) => json!({ "action": ACTION_START, "content": num }),
        Command::Interrupt(num) => json!({ "action": ACTION_INTERRUPT, "content": num }),
        Command::Kill(num) => json!({ "action": ACTION_KILL, "content": num }),
        Command::InterruptRestart(num) => {
            json!({ "action": ACTION_INTERRUPT_RESTART, "content": num })
        }
        Command::KillRestart(num) => json!({ "action": ACTION_KILL_RESTART, "content": num }),
        Command::Delete(num) => json!({ "action": ACTION_DEL, "content": num }),
        Command::RefreshAll => json!({ "action": ACTION_REFRESH }),
        Command::RefreshOne(num) => json!({ "action": ACTION_REFRESH, "content": num }),
        Command::FetchEnv => json!({ "action": ACTION_ENV }),
    };
    value.to_string()
}

fn decode_status_change(
    action: StatusAction,
    envelope: Envelope,
) -> Result<ServerMsg, DecodeError> {
    let num = content_id(envelope.content.as_ref(), action.as_str())?;
    let update = envelope
        .processes
        .unwrap_or_default()
        .into_iter()
        .find(|update| update.num == num);
    Ok(ServerMsg::StatusChanged {
        action,
        num,
        update,
    })
}

fn content_id(content: Option<&Value>, action: &'static str) -> Result<ProcId, DecodeError> {
    match content {
        Some(Value::Number(number)) => {
            number.as_i64().ok_or_else(|| DecodeError::InvalidField {
                action,
                field: "content",
                detail: format!("expected process number, got {number}"),
            })
        }
        Some(other) => Err(DecodeError::InvalidField {
            action,
            field: "content",
            detail: format!("expected process number, got {other}"),
        }),
        None => Err(DecodeError::MissingField {
            action,
            field: "content",
        }),
    }
}

fn content_ids(
    content: Option<&Value>,
    action: &'static str,
) -> Result<Option<Vec<ProcId>>, DecodeError> {
    let Some(content) = content else {
        return Ok(None);
    };
    match content {
        Value::Number(_) => Ok(Some(vec![content_id(Some(content), action)?])),
        Value::Array(values) => values
            .iter()
            .map(|value| content_id(Some(value), action))
            .collect::<Result<Vec<_>, _>>()
            .map(Some),
        other => Err(DecodeError::InvalidField {
            action,
            field: "content",
            detail: format!("expected process number list, got {other}"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ProcStatus;

    #[test]
    fn decode_add_carries_every_record() {
        let msg = decode_message(
            r#"{"action":"add","processes":[
                {"num":1,"name":"api","program":"api-server","status":0},
                {"num":2,"name":"worker","program":"worker-bin","status":1}
            ]}"#,
        )
        .expect("decode");

        let ServerMsg::Add { processes } = msg else {
            panic!("expected add, got {msg:?}");
        };
        assert_eq!(processes.len(), 2);
        assert_eq!(processes[0].num, 1);
        assert_eq!(processes[1].status, Some(ProcStatus::Running));
    }

    #[test]
    fn decode_status_change_picks_matching_record() {
        let msg = decode_message(
            r#"{"action":"start","content":7,"processes":[
                {"num":3,"status":3},
                {"num":7,"status":1,"error":""}
            ]}"#,
        )
        .expect("decode");

        let ServerMsg::StatusChanged {
            action,
            num,
            update,
        } = msg
        else {
            panic!("expected status change, got {msg:?}");
        };
        assert_eq!(action, StatusAction::Start);
        assert_eq!(num, 7);
        assert_eq!(update.expect("update").status, Some(ProcStatus::Running));
    }

    #[test]
    fn decode_status_change_without_record() {
        let msg = decode_message(r#"{"action":"finished","content":4}"#).expect("decode");
        assert_eq!(
            msg,
            ServerMsg::StatusChanged {
                action: StatusAction::Finished,
                num: 4,
                update: None,
            }
        );
    }

    #[test]
    fn decode_refresh_sentinel_is_full_snapshot() {
        let msg = decode_message(
            r#"{"action":"refresh","content":[-1],"processes":[{"num":5,"name":"api"}]}"#,
        )
        .expect("decode");

        let ServerMsg::RefreshFull { processes } = msg else {
            panic!("expected full refresh, got {msg:?}");
        };
        assert_eq!(processes.len(), 1);
        assert_eq!(processes[0].num, 5);
    }

    #[test]
    fn decode_refresh_lists_are_partial() {
        let msg = decode_message(
            r#"{"action":"refresh","content":[2,9],"processes":[{"num":1,"status":1}]}"#,
        )
        .expect("decode");

        assert_eq!(
            msg,
            ServerMsg::RefreshPartial {
                remove: vec![2, 9],
                update: vec![ProcessUpdate {
                    num: 1,
                    status: Some(ProcStatus::Running),
                    ..ProcessUpdate::default()
                }],
            }
        );
    }

    #[test]
    fn decode_refresh_without_content_upserts_only() {
        let msg =
            decode_message(r#"{"action":"refresh","processes":[{"num":8}]}"#).expect("decode");
        let ServerMsg::RefreshPartial { remove, update } = msg else {
            panic!("expected partial refresh, got {msg:?}");
        };
        assert!(remove.is_empty());
        assert_eq!(update.len(), 1);
    }

    #[test]
    fn decode_refresh_single_number_is_one_element_delete_list() {
        let msg = decode_message(r#"{"action":"refresh","content":3}"#).expect("decode");
        assert_eq!(
            msg,
            ServerMsg::RefreshPartial {
                remove: vec![3],
                update: Vec::new(),
            }
        );
    }

    #[test]
    fn decode_env_parses_embedded_line_list() {
        let msg = decode_message(
            r#"{"action":"env","contents":"[\"PATH=/usr/bin\",\"HOME=/root\"]"}"#,
        )
        .expect("decode");
        assert_eq!(
            msg,
            ServerMsg::Env {
                lines: vec!["PATH=/usr/bin".to_string(), "HOME=/root".to_string()],
            }
        );
    }

    #[test]
    fn decode_error_prefers_error_field_over_contents() {
        let msg = decode_message(r#"{"action":"error","error":"no such process"}"#)
            .expect("decode error field");
        assert_eq!(
            msg,
            ServerMsg::Error {
                message: "no such process".to_string(),
            }
        );

        let legacy = decode_message(r#"{"action":"error","contents":"must have name"}"#)
            .expect("decode contents fallback");
        assert_eq!(
            legacy,
            ServerMsg::Error {
                message: "must have name".to_string(),
            }
        );
    }

    #[test]
    fn unknown_action_is_unrecognized_not_an_error() {
        let msg = decode_message(r#"{"action":"snapshot-v2","content":1}"#).expect("decode");
        assert_eq!(
            msg,
            ServerMsg::Unrecognized {
                action: "snapshot-v2".to_string(),
            }
        );
    }

    #[test]
    fn malformed_frames_fail_closed() {
        assert!(matches!(
            decode_message("{\"action\":\"add\""),
            Err(DecodeError::Parse(_))
        ));
        assert!(matches!(
            decode_message(r#"{"action":"add"}"#),
            Err(DecodeError::MissingField {
                action: ACTION_ADD,
                field: "processes",
            })
        ));
        assert!(matches!(
            decode_message(r#"{"action":"start"}"#),
            Err(DecodeError::MissingField {
                action: ACTION_START,
                field: "content",
            })
        ));
        assert!(matches!(
            decode_message(r#"{"action":"start","content":"four"}"#),
            Err(DecodeError::InvalidField { .. })
        ));
        assert!(matches!(
            decode_message(r#"{"action":"env","contents":"not json"}"#),
            Err(DecodeError::InvalidField { .. })
        ));
    }

    #[test]
    fn encode_add_carries_the_spec() {
        let spec = ProcessSpec {
            name: "api".to_string(),
            program: "api-server".to_string(),
            args: vec!["--port".to_string(), "8080".to_string()],
            env: vec!["MODE=prod".to_string()],
            dir: "/srv/api".to_string(),
        };
        let frame = encode_command(&Command::Add(spec));
        let value: Value = serde_json::from_str(&frame).expect("valid json");

        assert_eq!(value["action"], "add");
        assert_eq!(value["processes"][0]["name"], "api");
        assert_eq!(value["processes"][0]["args"][1], "8080");
    }

    #[test]
    fn encode_identity_commands_use_content() {
        for (command, action) in [
            (Command::Start(3), ACTION_START),
            (Command::Interrupt(3), ACTION_INTERRUPT),
            (Command::Kill(3), ACTION_KILL),
            (Command::InterruptRestart(3), ACTION_INTERRUPT_RESTART),
            (Command::KillRestart(3), ACTION_KILL_RESTART),
            (Command::Delete(3), ACTION_DEL),
            (Command::RefreshOne(3), ACTION_REFRESH),
        ] {
            let value: Value =
                serde_json::from_str(&encode_command(&command)).expect("valid json");
            assert_eq!(value["action"], action);
            assert_eq!(value["content"], 3);
        }
    }

    #[test]
    fn encode_bare_commands_have_no_payload() {
        for (command, action) in [
            (Command::RefreshAll, ACTION_REFRESH),
            (Command::FetchEnv, ACTION_ENV),
        ] {
            let value: Value =
                serde_json::from_str(&encode_command(&command)).expect("valid json");
            assert_eq!(value["action"], action);
            assert!(value.get("content").is_none());
            assert!(value.get("processes").is_none());
        }
    }
}
