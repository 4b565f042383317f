use serde::de::{self, MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

use crate::error::DedupError;

pub const DEDUPLICATION_ID_NAME: &str = "deduplication_id";

/// Rectangular string table: the dataset handed to `fit` and `predict`.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
pub struct Table {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl Table {
    pub fn new(columns: Vec<String>, rows: Vec<Vec<String>>) -> Self {
        Table { columns, rows }
    }

    /// Single column table, handy for name lists.
    pub fn from_column(name: &str, values: &[&str]) -> Self {
        Table {
            columns: vec![name.to_string()],
            rows: values.iter().map(|v| vec![v.to_string()]).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Result<usize, DedupError> {
        self.columns
            .iter()
            .position(|c| c == name)
            .ok_or_else(|| DedupError::invalid_input(format!("column '{name}' not found")))
    }

    /// Assigns fresh row ids `0..n` and projects every row onto `fields`.
    pub fn records(&self, fields: &[String]) -> Result<Vec<Record>, DedupError> {
        let indices = fields
            .iter()
            .map(|f| self.column_index(f))
            .collect::<Result<Vec<_>, _>>()?;
        self.rows
            .iter()
            .enumerate()
            .map(|(row_id, row)| {
                let values = indices
                    .iter()
                    .map(|&i| {
                        row.get(i).cloned().ok_or_else(|| {
                            DedupError::invalid_input(format!(
                                "row {row_id} has {} values, expected {}",
                                row.len(),
                                self.columns.len()
                            ))
                        })
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Record { row_id, values })
            })
            .collect()
    }

    /// Returns a copy with `name` appended holding `ids`.
    pub fn with_id_column(&self, name: &str, ids: &[usize]) -> Self {
        let mut columns = self.columns.clone();
        columns.push(name.to_string());
        let rows = self
            .rows
            .iter()
            .zip(ids)
            .map(|(row, id)| {
                let mut row = row.clone();
                row.push(id.to_string());
                row
            })
            .collect();
        Table { columns, rows }
    }
}

/// One dataset row with a run-local id and its configured field values.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Record {
    pub row_id: usize,
    pub values: Vec<String>,
}

/// Final cluster assignment of one row.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct RecordResult {
    pub row_id: usize,
    pub cluster_id: usize,
}

/// Field name to a list of names, kept in the order the keys were written.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FieldMap(pub Vec<(String, Vec<String>)>);

impl FieldMap {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Vec<String>)> {
        self.0.iter().map(|(k, v)| (k, v))
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.0.iter().map(|(k, _)| k)
    }

    /// Last entry for `key`, like a map would keep.
    pub fn get(&self, key: &str) -> Option<&Vec<String>> {
        self.0.iter().rev().find(|(k, _)| k == key).map(|(_, v)| v)
    }
}

impl Serialize for FieldMap {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (k, v) in &self.0 {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

struct FieldMapVisitor;

impl<'de> Visitor<'de> for FieldMapVisitor {
    type Value = FieldMap;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str("a map of field name to a list of names")
    }

    fn visit_map<A>(self, mut access: A) -> Result<Self::Value, A::Error>
    where
        A: MapAccess<'de>,
    {
        let mut entries: Vec<(String, Vec<String>)> = Vec::with_capacity(access.size_hint().unwrap_or(0));
        while let Some((key, value)) = access.next_entry::<String, Vec<String>>()? {
            match entries.iter().position(|(k, _)| *k == key) {
                Some(pos) => entries[pos].1 = value,
                None => entries.push((key, value)),
            }
        }
        Ok(FieldMap(entries))
    }
}

impl<'de> Deserialize<'de> for FieldMap {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_map(FieldMapVisitor)
    }
}

/// Blocking rules: either one list applied to every field, or per field lists.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(untagged, expecting = "`rules` must be a list or a map")]
pub enum RulesConfig {
    All(Vec<String>),
    PerField(FieldMap),
}

fn default_recall() -> f64 {
    1.0
}

fn default_intermediate_dir() -> String {
    String::from(".")
}

fn default_n_queries() -> usize {
    999
}

fn default_coef_diff_threshold() -> f64 {
    0.05
}

fn default_patience() -> usize {
    3
}

fn default_max_consecutive_abstentions() -> usize {
    10
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct DedupConfig {
    /// Fields to compare with the default metrics. Takes precedence over `field_info`.
    #[serde(default)]
    pub col_names: Option<Vec<String>>,
    /// Field name to metric names, used when `col_names` is absent.
    #[serde(default)]
    pub field_info: Option<FieldMap>,
    #[serde(default)]
    pub interaction: bool,
    #[serde(default)]
    pub rules: Option<RulesConfig>,
    #[serde(default = "default_recall")]
    pub recall: f64,
    #[serde(default)]
    pub save_intermediate_steps: bool,
    #[serde(default = "default_intermediate_dir")]
    pub intermediate_dir: String,
    #[serde(default)]
    pub verbose: u8,
    #[serde(default = "default_n_queries")]
    pub n_queries: usize,
    #[serde(default = "default_coef_diff_threshold")]
    pub coef_diff_threshold: f64,
    #[serde(default = "default_patience")]
    pub patience: usize,
    #[serde(default = "default_max_consecutive_abstentions")]
    pub max_consecutive_abstentions: usize,
    #[serde(default)]
    pub query_timeout_secs: Option<u64>,
    #[serde(default)]
    pub seed: Option<u64>,
}

impl Default for DedupConfig {
    fn default() -> Self {
        DedupConfig {
            col_names: None,
            field_info: None,
            interaction: false,
            rules: None,
            recall: default_recall(),
            save_intermediate_steps: false,
            intermediate_dir: default_intermediate_dir(),
            verbose: 0,
            n_queries: default_n_queries(),
            coef_diff_threshold: default_coef_diff_threshold(),
            patience: default_patience(),
            max_consecutive_abstentions: default_max_consecutive_abstentions(),
            query_timeout_secs: None,
            seed: None,
        }
    }
}

impl DedupConfig {
    pub fn for_columns(col_names: &[&str]) -> Self {
        DedupConfig {
            col_names: Some(col_names.iter().map(|c| c.to_string()).collect()),
            ..Default::default()
        }
    }
}
