//! C6: the Data Reader. Issues `GetAcquisitionData FromIndex:a ToIndex:b` and
//! parses the ASCII `Data:[v1,v2,...]` payload.

use std::sync::Arc;

use tracing::instrument;

use crate::broker::ProdigyEndpoint;
use crate::error::DriverResult;
use crate::protocol::Value;

pub struct DataReader {
    endpoint: Arc<dyn ProdigyEndpoint>,
}

impl DataReader {
    pub fn new(endpoint: Arc<dyn ProdigyEndpoint>) -> Self {
        Self { endpoint }
    }

    /// Read the inclusive `[from_index, to_index]` sample range. Returns the flat
    /// doubles actually delivered; a count smaller than `(to_index - from_index +
    /// 1) * values_per_sample` is a valid reply — C7 decides whether that is a
    /// fatal short read.
    #[instrument(skip(self))]
    pub async fn read_range(&self, from_index: usize, to_index: usize) -> DriverResult<Vec<f64>> {
        let outcome = self
            .endpoint
            .exchange(
                "GetAcquisitionData",
                vec![
                    ("FromIndex".to_string(), Value::Integer(from_index as i64)),
                    ("ToIndex".to_string(), Value::Integer(to_index as i64)),
                ],
            )
            .await?;

        let values = match outcome.get("Data") {
            Some(Value::Array(values)) => values.clone(),
            Some(other) => crate::protocol::parse_array(&other.as_str()),
            None => Vec::new(),
        };
        Ok(values)
    }
}

/// §4.6 chunking policy: a single `readRange` call must not request more than
/// `max_values_per_read / values_per_sample` samples.
pub fn max_samples_per_read(max_values_per_read: usize, values_per_sample: usize) -> usize {
    (max_values_per_read / values_per_sample.max(1)).max(1)
}
