// Job Parameters - identity-bearing inputs of a JobInstance

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};

/// A single typed parameter value
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobParameter {
    String(String),
    Long(i64),
    Double(f64),
    Date(DateTime<Utc>),
}

impl JobParameter {
    pub fn type_name(&self) -> &'static str {
        match self {
            JobParameter::String(_) => "STRING",
            JobParameter::Long(_) => "LONG",
            JobParameter::Double(_) => "DOUBLE",
            JobParameter::Date(_) => "DATE",
        }
    }

    /// Stable textual form used when computing the instance signature
    fn canonical_value(&self) -> String {
        match self {
            JobParameter::String(s) => s.clone(),
            JobParameter::Long(v) => v.to_string(),
            JobParameter::Double(v) => format!("{:016x}", v.to_bits()),
            JobParameter::Date(d) => d.timestamp_millis().to_string(),
        }
    }
}

// Doubles compare by bit pattern so parameters can be used as map keys
impl PartialEq for JobParameter {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (JobParameter::String(a), JobParameter::String(b)) => a == b,
            (JobParameter::Long(a), JobParameter::Long(b)) => a == b,
            (JobParameter::Double(a), JobParameter::Double(b)) => a.to_bits() == b.to_bits(),
            (JobParameter::Date(a), JobParameter::Date(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for JobParameter {}

impl Hash for JobParameter {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.type_name().hash(state);
        self.canonical_value().hash(state);
    }
}

impl std::fmt::Display for JobParameter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobParameter::String(s) => write!(f, "{}", s),
            JobParameter::Long(v) => write!(f, "{}", v),
            JobParameter::Double(v) => write!(f, "{}", v),
            JobParameter::Date(d) => write!(f, "{}", d.to_rfc3339()),
        }
    }
}

/// Ordered key -> parameter mapping. Two instances are the same iff their
/// job name and the full parameter set are equal.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobParameters {
    params: BTreeMap<String, JobParameter>,
}

impl JobParameters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_string(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params
            .insert(key.into(), JobParameter::String(value.into()));
        self
    }

    pub fn with_long(mut self, key: impl Into<String>, value: i64) -> Self {
        self.params.insert(key.into(), JobParameter::Long(value));
        self
    }

    pub fn with_double(mut self, key: impl Into<String>, value: f64) -> Self {
        self.params.insert(key.into(), JobParameter::Double(value));
        self
    }

    pub fn with_date(mut self, key: impl Into<String>, value: DateTime<Utc>) -> Self {
        self.params.insert(key.into(), JobParameter::Date(value));
        self
    }

    /// Date parameter from epoch milliseconds; out-of-range values are ignored
    pub fn with_date_millis(self, key: impl Into<String>, millis: i64) -> Self {
        match Utc.timestamp_millis_opt(millis).single() {
            Some(date) => self.with_date(key, date),
            None => self,
        }
    }

    pub fn get(&self, key: &str) -> Option<&JobParameter> {
        self.params.get(key)
    }

    pub fn get_string(&self, key: &str) -> Option<&str> {
        match self.params.get(key) {
            Some(JobParameter::String(s)) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn get_long(&self, key: &str) -> Option<i64> {
        match self.params.get(key) {
            Some(JobParameter::Long(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn get_double(&self, key: &str) -> Option<f64> {
        match self.params.get(key) {
            Some(JobParameter::Double(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn get_date(&self, key: &str) -> Option<DateTime<Utc>> {
        match self.params.get(key) {
            Some(JobParameter::Date(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &JobParameter)> {
        self.params.iter()
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    /// Deterministic signature of the full parameter set.
    ///
    /// Used as the uniqueness key next to the job name in durable stores, so it
    /// must not depend on process state (no `DefaultHasher`).
    pub fn signature(&self) -> String {
        let canonical = self
            .params
            .iter()
            .map(|(k, v)| format!("{}={}:{}", k, v.type_name(), v.canonical_value()))
            .collect::<Vec<_>>()
            .join(";");
        uuid::Uuid::new_v5(&uuid::Uuid::NAMESPACE_OID, canonical.as_bytes())
            .simple()
            .to_string()
    }
}

impl std::fmt::Display for JobParameters {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{{")?;
        for (i, (k, v)) in self.params.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}={}", k, v)?;
        }
        write!(f, "}}")
    }
}
