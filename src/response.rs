use serde::{de, Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;

use crate::error::DedupError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Ok,
    InvalidConfig,
    InvalidInput,
    NotFitted,
    FunctionFailed,
    Io,
}

impl Status {
    pub fn code(&self) -> u8 {
        match self {
            Status::Ok => 0,
            Status::InvalidConfig => 2,
            Status::InvalidInput => 3,
            Status::NotFitted => 4,
            Status::FunctionFailed => 5,
            Status::Io => 6,
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            Status::Ok => "ok",
            Status::InvalidConfig => "invalid configuration",
            Status::InvalidInput => "invalid input",
            Status::NotFitted => "not fitted",
            Status::FunctionFailed => "function failed",
            Status::Io => "io error",
        };
        f.write_str(name)
    }
}

impl Serialize for Status {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_u8(self.code())
    }
}

struct StatusCodeVisitor;

impl<'de> de::Visitor<'de> for StatusCodeVisitor {
    type Value = Status;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str("Status")
    }

    fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        match v {
            0 => Ok(Status::Ok),
            2 => Ok(Status::InvalidConfig),
            3 => Ok(Status::InvalidInput),
            4 => Ok(Status::NotFitted),
            5 => Ok(Status::FunctionFailed),
            6 => Ok(Status::Io),
            value => Err(de::Error::custom(value.to_string())),
        }
    }
}

impl<'de> de::Deserialize<'de> for Status {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        deserializer.deserialize_u8(StatusCodeVisitor)
    }
}

/// Counts describing one fit + predict run.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    pub n_records: usize,
    pub n_labeled: usize,
    pub n_candidate_pairs: usize,
    pub n_scored_pairs: usize,
    pub n_clusters: usize,
    /// Row count of the biggest cluster.
    pub largest_cluster: usize,
    pub rules_selected: Vec<String>,
}

#[derive(Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportPayload {
    pub status_code: Status,
    pub body: Value,
}

pub fn make_report(result: Result<RunSummary, DedupError>) -> Result<Value, DedupError> {
    let payload = match result {
        Err(err) => ReportPayload {
            status_code: err.status,
            body: json!({ "message": err.msg }),
        },
        Ok(summary) => ReportPayload {
            status_code: Status::Ok,
            body: serde_json::to_value(summary).map_err(DedupError::internal)?,
        },
    };
    serde_json::to_value(payload).map_err(DedupError::internal)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_serializes_as_code() {
        let value = serde_json::to_value(Status::NotFitted).unwrap();
        assert_eq!(value, json!(4));
        let parsed: Status = serde_json::from_value(json!(2)).unwrap();
        assert_eq!(parsed, Status::InvalidConfig);
        assert!(serde_json::from_value::<Status>(json!(42)).is_err());
    }

    #[test]
    fn report_carries_error_message() {
        let report = make_report(Err(DedupError::not_fitted("call fit first"))).unwrap();
        assert_eq!(report["statusCode"], json!(4));
        assert_eq!(report["body"]["message"], json!("call fit first"));
    }

    #[test]
    fn report_carries_summary() {
        let summary = RunSummary {
            n_records: 4,
            n_clusters: 3,
            rules_selected: vec!["name first_word".to_string()],
            ..Default::default()
        };
        let report = make_report(Ok(summary)).unwrap();
        assert_eq!(report["statusCode"], json!(0));
        assert_eq!(report["body"]["nRecords"], json!(4));
        assert_eq!(report["body"]["rulesSelected"][0], json!("name first_word"));
    }
}
