//! JSON codec for the blobs stored under each metric identifier.

use crate::error::StorageResult;
use serde::{Deserialize, Serialize};

/// One persisted accumulator: the value of a counter for one bucket and one
/// combination of label values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricValue {
    /// Time window the value accumulates under, e.g. `2024-03`
    pub since: String,
    /// Values for the counter's variable labels, in declaration order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub labels: Vec<String>,
    pub value: f64,
}

impl MetricValue {
    pub fn new(since: impl Into<String>, labels: Vec<String>, value: f64) -> Self {
        Self {
            since: since.into(),
            labels,
            value,
        }
    }
}

/// The full set of values persisted for one counter
pub type MetricValues = Vec<MetricValue>;

/// Serialize a value list to the blob format
pub fn encode(values: &[MetricValue]) -> StorageResult<Vec<u8>> {
    Ok(serde_json::to_vec(values)?)
}

/// Parse a blob back into a value list
pub fn decode(data: &[u8]) -> StorageResult<MetricValues> {
    Ok(serde_json::from_slice(data)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StorageError;

    #[test]
    fn test_unlabelled_values_omit_labels() {
        let encoded = encode(&[MetricValue::new("2024-01", Vec::new(), 12.0)]).unwrap();
        assert_eq!(
            String::from_utf8(encoded).unwrap(),
            r#"[{"since":"2024-01","value":12.0}]"#
        );
    }

    #[test]
    fn test_labelled_values_keep_label_order() {
        let encoded = encode(&[MetricValue::new(
            "2024-02",
            vec!["aa:bb:cc:dd:ee:ff".to_string()],
            50.0,
        )])
        .unwrap();
        assert_eq!(
            String::from_utf8(encoded).unwrap(),
            r#"[{"since":"2024-02","labels":["aa:bb:cc:dd:ee:ff"],"value":50.0}]"#
        );
    }

    #[test]
    fn test_decode_accepts_both_record_shapes() {
        let values = decode(
            br#"[{"since":"2024-02","value":1},{"since":"2024-03","labels":["x"],"value":2.5}]"#,
        )
        .unwrap();

        assert_eq!(values.len(), 2);
        assert!(values[0].labels.is_empty());
        assert_eq!(values[0].value, 1.0);
        assert_eq!(values[1].labels, vec!["x".to_string()]);
        assert_eq!(values[1].value, 2.5);
    }

    #[test]
    fn test_decode_rejects_malformed_blob() {
        assert!(matches!(decode(b"{not json"), Err(StorageError::Codec(_))));
    }

    #[test]
    fn test_empty_list_encodes_as_empty_array() {
        assert_eq!(encode(&[]).unwrap(), b"[]".to_vec());
    }
}
