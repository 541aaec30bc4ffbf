use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

pub mod wire;

pub use wire::{
    decode_message, encode_command, Command, DecodeError, ServerMsg, StatusAction,
};

/// Server-assigned process sequence number. `-1` is reserved on the wire as
/// the full-refresh sentinel and never identifies a real process.
pub type ProcId = i64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProcStatus {
    #[default]
    NotStarted,
    Running,
    Stopping,
    Stopped,
}

impl ProcStatus {
    pub fn code(self) -> i64 {
        match self {
            ProcStatus::NotStarted => 0,
            ProcStatus::Running => 1,
            ProcStatus::Stopping => 2,
            ProcStatus::Stopped => 3,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(ProcStatus::NotStarted),
            1 => Some(ProcStatus::Running),
            2 => Some(ProcStatus::Stopping),
            3 => Some(ProcStatus::Stopped),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ProcStatus::NotStarted => "not started",
            ProcStatus::Running => "running",
            ProcStatus::Stopping => "stopping",
            ProcStatus::Stopped => "stopped",
        }
    }
}

impl fmt::Display for ProcStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for ProcStatus {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_i64(self.code())
    }
}

impl<'de> Deserialize<'de> for ProcStatus {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct ProcStatusVisitor;

        impl<'de> Visitor<'de> for ProcStatusVisitor {
            type Value = ProcStatus;

            fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
                formatter.write_str("a process status as integer code or name")
            }

            fn visit_i64<E>(self, value: i64) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                ProcStatus::from_code(value)
                    .ok_or_else(|| E::custom(format!("status code out of range: {value}")))
            }

            fn visit_u64<E>(self, value: u64) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                let code = i64::try_from(value)
                    .map_err(|_| E::custom(format!("status code out of range: {value}")))?;
                self.visit_i64(code)
            }

            fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                let cleaned = value
                    .trim()
                    .replace(['-', '_'], " ")
                    .to_ascii_uppercase();
                match cleaned.as_str() {
                    "NOT STARTED" => Ok(ProcStatus::NotStarted),
                    "RUNNING" => Ok(ProcStatus::Running),
                    "STOPPING" => Ok(ProcStatus::Stopping),
                    "STOPPED" | "FINISHED" => Ok(ProcStatus::Stopped),
                    _ => Err(E::custom(format!("unknown status '{value}'"))),
                }
            }

            fn visit_string<E>(self, value: String) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                self.visit_str(&value)
            }
        }

        deserializer.deserialize_any(ProcStatusVisitor)
    }
}

/// A supervised process as mirrored locally. Every field is concrete; wire
/// deltas are [`ProcessUpdate`]s merged in via [`ProcessRecord::apply`].
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ProcessRecord {
    pub num: ProcId,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: Vec<String>,
    #[serde(default)]
    pub dir: String,
    #[serde(default)]
    pub status: ProcStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stderr: Option<String>,
}

impl ProcessRecord {
    /// Field-by-field merge: fields the update omits keep their value.
    /// Empty `error`/`stderr` strings clear the field (the supervisor sends
    /// empty strings rather than omitting them once a process has run).
    pub fn apply(&mut self, update: &ProcessUpdate) {
        if let Some(name) = &update.name {
            self.name = name.clone();
        }
        if let Some(program) = &update.program {
            self.program = program.clone();
        }
        if let Some(args) = &update.args {
            self.args = args.clone();
        }
        if let Some(env) = &update.env {
            self.env = env.clone();
        }
        if let Some(dir) = &update.dir {
            self.dir = dir.clone();
        }
        if let Some(status) = update.status {
            self.status = status;
        }
        if let Some(error) = &update.error {
            self.error = (!error.is_empty()).then(|| error.clone());
        }
        if let Some(stderr) = &update.stderr {
            self.stderr = (!stderr.is_empty()).then(|| stderr.clone());
        }
    }
}

impl From<ProcessUpdate> for ProcessRecord {
    fn from(update: ProcessUpdate) -> Self {
        let mut record = ProcessRecord {
            num: update.num,
            ..ProcessRecord::default()
        };
        record.apply(&update);
        record
    }
}

/// Wire-side process payload. Everything after `num` is optional so the
/// merge can tell "field omitted" apart from "field set to its default".
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ProcessUpdate {
    pub num: ProcId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub program: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dir: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<ProcStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stderr: Option<String>,
}

impl ProcessUpdate {
    pub fn status_only(num: ProcId, status: ProcStatus) -> Self {
        ProcessUpdate {
            num,
            status: Some(status),
            ..ProcessUpdate::default()
        }
    }
}

/// A process definition as composed by the operator, before the supervisor
/// has assigned a sequence number.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProcessSpec {
    pub name: String,
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: Vec<String>,
    #[serde(default)]
    pub dir: String,
}

impl From<&ProcessRecord> for ProcessSpec {
    fn from(record: &ProcessRecord) -> Self {
        ProcessSpec {
            name: record.name.clone(),
            program: record.program.clone(),
            args: record.args.clone(),
            env: record.env.clone(),
            dir: record.dir.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_serializes_as_integer_code() {
        let json = serde_json::to_string(&ProcStatus::Stopping).expect("serialize");
        assert_eq!(json, "2");
    }

    #[test]
    fn status_accepts_integer_and_string_forms() {
        let from_int: ProcStatus = serde_json::from_str("1").expect("parse int");
        assert_eq!(from_int, ProcStatus::Running);

        let from_str: ProcStatus = serde_json::from_str("\"NOT STARTED\"").expect("parse str");
        assert_eq!(from_str, ProcStatus::NotStarted);

        let from_legacy: ProcStatus = serde_json::from_str("\"FINISHED\"").expect("parse legacy");
        assert_eq!(from_legacy, ProcStatus::Stopped);

        let from_kebab: ProcStatus = serde_json::from_str("\"not-started\"").expect("parse kebab");
        assert_eq!(from_kebab, ProcStatus::NotStarted);
    }

    #[test]
    fn status_rejects_unknown_forms() {
        assert!(serde_json::from_str::<ProcStatus>("7").is_err());
        assert!(serde_json::from_str::<ProcStatus>("\"exploded\"").is_err());
    }

    #[test]
    fn record_merge_keeps_omitted_fields() {
        let mut record = ProcessRecord::from(ProcessUpdate {
            num: 4,
            name: Some("indexer".to_string()),
            program: Some("/usr/bin/indexer".to_string()),
            args: Some(vec!["--full".to_string()]),
            status: Some(ProcStatus::Running),
            ..ProcessUpdate::default()
        });

        record.apply(&ProcessUpdate::status_only(4, ProcStatus::Stopped));

        assert_eq!(record.name, "indexer");
        assert_eq!(record.program, "/usr/bin/indexer");
        assert_eq!(record.args, vec!["--full".to_string()]);
        assert_eq!(record.status, ProcStatus::Stopped);
    }

    #[test]
    fn record_merge_clears_error_on_empty_string() {
        let mut record = ProcessRecord {
            num: 2,
            error: Some("exit status 1".to_string()),
            ..ProcessRecord::default()
        };

        record.apply(&ProcessUpdate {
            num: 2,
            error: Some(String::new()),
            ..ProcessUpdate::default()
        });
        assert_eq!(record.error, None);
    }

    #[test]
    fn spec_from_record_copies_definition_fields_only() {
        let record = ProcessRecord {
            num: 9,
            name: "worker".to_string(),
            program: "worker-bin".to_string(),
            args: vec!["-v".to_string()],
            env: vec!["RUST_LOG=debug".to_string()],
            dir: "/srv".to_string(),
            status: ProcStatus::Running,
            error: Some("old failure".to_string()),
            stderr: Some("noise".to_string()),
        };

        let spec = ProcessSpec::from(&record);
        assert_eq!(spec.name, "worker");
        assert_eq!(spec.program, "worker-bin");
        assert_eq!(spec.args, vec!["-v".to_string()]);
        assert_eq!(spec.env, vec!["RUST_LOG=debug".to_string()]);
        assert_eq!(spec.dir, "/srv");
    }
}
