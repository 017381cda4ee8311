//! C4: the Parameter Mirror. Builds a typed name -> (type, cached value) map at
//! connect, and exposes write-through `get`/`set` on top of
//! `GetAnalyzerParameterValue`/`SetAnalyzerParameterValue`.
//!
//! Grounded on the teacher's `Parameter<T>`/`Observable<T>` composition
//! (`src/parameter.rs`, `crates/daq-core/src/observable.rs`): a cached value behind a
//! `watch` channel, plus a hardware read/write pair that the mirror drives directly
//! instead of taking closures (the hardware side here is always "ask the broker").

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{watch, RwLock};
use tracing::{instrument, warn};

use crate::broker::ProdigyEndpoint;
use crate::error::{DriverResult, ProdigyError};
use crate::model::{ParameterType, ParameterValue};
use crate::protocol::Value;

struct Entry {
    value_type: ParameterType,
    unit: Option<String>,
    tx: watch::Sender<ParameterValue>,
}

/// Typed analyzer-parameter cache with write-through set semantics.
pub struct ParameterMirror {
    endpoint: Arc<dyn ProdigyEndpoint>,
    entries: RwLock<HashMap<String, Entry>>,
}

impl ParameterMirror {
    pub fn new(endpoint: Arc<dyn ProdigyEndpoint>) -> Self {
        Self {
            endpoint,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Enumerate all analyzer parameter names and fetch type/unit for each. Called
    /// once at connect, per the design note "parameter enumeration at connect, not
    /// lazily".
    #[instrument(skip(self))]
    pub async fn enumerate(&self) -> DriverResult<usize> {
        let names_outcome = self.endpoint.exchange("GetAllAnalyzerParameterNames", vec![]).await?;
        let names = names_outcome
            .get("Names")
            .map(|v| match v {
                // The codec only emits Array for purely numeric bracketed content;
                // a quoted name list always arrives as a Token, handled below.
                Value::Array(_) => Vec::new(),
                other => split_name_list(&other.as_str()),
            })
            .unwrap_or_default();

        let mut entries = self.entries.write().await;
        entries.clear();
        for name in &names {
            let info = self
                .endpoint
                .exchange(
                    "GetAnalyzerParameterInfo",
                    vec![("Name".to_string(), Value::QuotedString(name.clone()))],
                )
                .await?;
            let value_type = parse_value_type(
                &info.get("Type").map(|v| v.as_str()).unwrap_or_default(),
            );
            let unit = info.get("Unit").map(|v| v.as_str()).filter(|s| !s.is_empty());

            let current = self.fetch_value(name, value_type).await?;
            let (tx, _rx) = watch::channel(current);
            entries.insert(
                name.clone(),
                Entry {
                    value_type,
                    unit,
                    tx,
                },
            );
        }
        Ok(entries.len())
    }

    async fn fetch_value(&self, name: &str, value_type: ParameterType) -> DriverResult<ParameterValue> {
        let outcome = self
            .endpoint
            .exchange(
                "GetAnalyzerParameterValue",
                vec![("Name".to_string(), Value::QuotedString(name.to_string()))],
            )
            .await?;
        let raw = outcome
            .get("Value")
            .ok_or_else(|| ProdigyError::UnknownParameter(name.to_string()))?;
        coerce(raw, value_type, name)
    }

    /// Typed read of the cached value.
    pub async fn get(&self, name: &str) -> DriverResult<ParameterValue> {
        let entries = self.entries.read().await;
        let entry = entries
            .get(name)
            .ok_or_else(|| ProdigyError::UnknownParameter(name.to_string()))?;
        let value = entry.tx.borrow().clone();
        Ok(value)
    }

    /// Subscribe to future changes of a cached parameter.
    pub async fn subscribe(&self, name: &str) -> DriverResult<watch::Receiver<ParameterValue>> {
        let entries = self.entries.read().await;
        let entry = entries
            .get(name)
            .ok_or_else(|| ProdigyError::UnknownParameter(name.to_string()))?;
        Ok(entry.tx.subscribe())
    }

    /// Write-through set: rejected while `busy` (controller Running/Paused);
    /// otherwise issues `SetAnalyzerParameterValue`, then re-reads the value and
    /// updates the cache from the re-read (not from the written value), matching
    /// the spec's write-through read-back invariant.
    #[instrument(skip(self, value))]
    pub async fn set(&self, name: &str, value: ParameterValue, busy: bool) -> DriverResult<()> {
        if busy {
            return Err(ProdigyError::AcquisitionBusy);
        }

        let value_type = {
            let entries = self.entries.read().await;
            let entry = entries
                .get(name)
                .ok_or_else(|| ProdigyError::UnknownParameter(name.to_string()))?;
            if entry.value_type != value.value_type() {
                return Err(ProdigyError::ParameterTypeMismatch {
                    name: name.to_string(),
                    expected: entry.value_type.label(),
                    got: value.value_type().label(),
                });
            }
            entry.value_type
        };

        self.endpoint
            .exchange(
                "SetAnalyzerParameterValue",
                vec![
                    ("Name".to_string(), Value::QuotedString(name.to_string())),
                    ("Value".to_string(), to_wire_value(&value)),
                ],
            )
            .await?;

        let confirmed = self.fetch_value(name, value_type).await?;
        let entries = self.entries.read().await;
        if let Some(entry) = entries.get(name) {
            entry.tx.send_replace(confirmed);
        } else {
            warn!(%name, "parameter disappeared from cache during set");
        }
        Ok(())
    }

    pub async fn unit(&self, name: &str) -> Option<String> {
        self.entries.read().await.get(name).and_then(|e| e.unit.clone())
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }
}

fn split_name_list(raw: &str) -> Vec<String> {
    // Names are delivered as a comma-separated list of quoted strings:
    // Names:["Pass Energy [eV]","Lens Mode"]
    let inner = raw.trim().trim_start_matches('[').trim_end_matches(']');
    let mut names = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    for c in inner.chars() {
        match c {
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => {
                if !current.is_empty() {
                    names.push(std::mem::take(&mut current));
                }
            }
            c => current.push(c),
        }
    }
    if !current.is_empty() {
        names.push(current);
    }
    names
}

fn parse_value_type(raw: &str) -> ParameterType {
    match raw {
        "double" => ParameterType::Double,
        "integer" => ParameterType::Integer,
        "bool" => ParameterType::Bool,
        _ => ParameterType::String,
    }
}

fn coerce(raw: &Value, value_type: ParameterType, name: &str) -> DriverResult<ParameterValue> {
    let s = raw.as_str();
    match value_type {
        ParameterType::Double => s
            .parse::<f64>()
            .map(ParameterValue::Double)
            .map_err(|_| ProdigyError::ParameterTypeMismatch {
                name: name.to_string(),
                expected: "double",
                got: "unparseable",
            }),
        ParameterType::Integer => s
            .parse::<i64>()
            .map(ParameterValue::Integer)
            .map_err(|_| ProdigyError::ParameterTypeMismatch {
                name: name.to_string(),
                expected: "integer",
                got: "unparseable",
            }),
        ParameterType::Bool => match s.as_str() {
            "true" | "True" | "1" => Ok(ParameterValue::Bool(true)),
            "false" | "False" | "0" => Ok(ParameterValue::Bool(false)),
            _ => Err(ProdigyError::ParameterTypeMismatch {
                name: name.to_string(),
                expected: "bool",
                got: "unparseable",
            }),
        },
        ParameterType::String => Ok(ParameterValue::String(s)),
    }
}

fn to_wire_value(value: &ParameterValue) -> Value {
    match value {
        ParameterValue::Double(v) => Value::Number(*v),
        ParameterValue::Integer(v) => Value::Integer(*v),
        ParameterValue::Bool(v) => Value::Bool(*v),
        ParameterValue::String(v) => Value::QuotedString(v.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex as StdMutex;

    struct FakeEndpoint {
        responses: StdMutex<std::collections::VecDeque<Result<crate::broker::Outcome, ProdigyError>>>,
    }

    #[async_trait]
    impl ProdigyEndpoint for FakeEndpoint {
        async fn exchange(&self, _command: &str, _args: Vec<(String, Value)>) -> Result<crate::broker::Outcome, ProdigyError> {
            self.responses.lock().unwrap().pop_front().unwrap()
        }
    }

    fn outcome(pairs: &[(&str, Value)]) -> crate::broker::Outcome {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[tokio::test]
    async fn test_enumerate_and_get() {
        let endpoint = Arc::new(FakeEndpoint {
            responses: StdMutex::new(
                vec![
                    Ok(outcome(&[("Names", Value::Token("[\"PassEnergy\"]".to_string()))])),
                    Ok(outcome(&[
                        ("Type", Value::Token("double".to_string())),
                        ("Unit", Value::Token("eV".to_string())),
                    ])),
                    Ok(outcome(&[("Value", Value::Number(20.0))])),
                ]
                .into(),
            ),
        });
        let mirror = ParameterMirror::new(endpoint);
        let count = mirror.enumerate().await.unwrap();
        assert_eq!(count, 1);
        let value = mirror.get("PassEnergy").await.unwrap();
        assert_eq!(value, ParameterValue::Double(20.0));
        assert_eq!(mirror.unit("PassEnergy").await.as_deref(), Some("eV"));
    }

    #[tokio::test]
    async fn test_set_rejected_when_busy() {
        let endpoint = Arc::new(FakeEndpoint {
            responses: StdMutex::new(std::collections::VecDeque::new()),
        });
        let mirror = ParameterMirror::new(endpoint);
        let err = mirror
            .set("PassEnergy", ParameterValue::Double(25.0), true)
            .await
            .unwrap_err();
        assert!(matches!(err, ProdigyError::AcquisitionBusy));
    }

    #[tokio::test]
    async fn test_set_write_through_read_back() {
        let endpoint = Arc::new(FakeEndpoint {
            responses: StdMutex::new(
                vec![
                    Ok(outcome(&[("Names", Value::Token("[\"PassEnergy\"]".to_string()))])),
                    Ok(outcome(&[("Type", Value::Token("double".to_string()))])),
                    Ok(outcome(&[("Value", Value::Number(20.0))])),
                    Ok(outcome(&[])), // SetAnalyzerParameterValue OK
                    Ok(outcome(&[("Value", Value::Number(25.0))])), // re-read
                ]
                .into(),
            ),
        });
        let mirror = ParameterMirror::new(endpoint);
        mirror.enumerate().await.unwrap();
        mirror
            .set("PassEnergy", ParameterValue::Double(25.0), false)
            .await
            .unwrap();
        assert_eq!(
            mirror.get("PassEnergy").await.unwrap(),
            ParameterValue::Double(25.0)
        );
    }
}
