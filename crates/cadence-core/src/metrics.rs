use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::ExecutorKind;

/// Execution statistics for one step.
///
/// Regular steps carry the executor's opaque `metrics` payload. A Parallel
/// group carries `parallel_steps` instead, keyed by child name; branch on
/// `executor_type` to know which one to read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepMetrics {
    pub step_name: String,
    pub executor_type: ExecutorKind,
    pub executor_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parallel_steps: Option<BTreeMap<String, StepMetrics>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

impl StepMetrics {
    pub fn is_parallel(&self) -> bool {
        self.executor_type == ExecutorKind::Parallel
    }
}

/// Workflow-level metrics report.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkflowMetrics {
    pub total_steps: usize,
    #[serde(default)]
    pub steps: BTreeMap<String, StepMetrics>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parallel_metrics_serialize_nested_only() {
        let child = StepMetrics {
            step_name: "x".into(),
            executor_type: ExecutorKind::Agent,
            executor_name: "researcher".into(),
            metrics: Some(json!({"input_tokens": 10})),
            parallel_steps: None,
            duration_ms: Some(5),
        };
        let mut nested = BTreeMap::new();
        nested.insert("x".to_string(), child);
        let group = StepMetrics {
            step_name: "fanout".into(),
            executor_type: ExecutorKind::Parallel,
            executor_name: "fanout".into(),
            metrics: None,
            parallel_steps: Some(nested),
            duration_ms: None,
        };

        let value = serde_json::to_value(&group).unwrap();
        assert_eq!(value["executor_type"], "parallel");
        assert!(value.get("metrics").is_none());
        assert_eq!(value["parallel_steps"]["x"]["metrics"]["input_tokens"], 10);
        assert!(group.is_parallel());
    }
}
