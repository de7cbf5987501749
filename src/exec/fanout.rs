// src/exec/fanout.rs

//! Fan-out execution: one sub-execution per item of the resolved source
//! array, bounded by the node's `parallel` setting.

use futures::stream::{self, StreamExt};
use serde_json::Value;
use tracing::{debug, info};

use crate::dag::node::{ItemSpec, NodeOutput};
use crate::errors::NodeError;
use crate::exec::executor::NodeExecutor;
use crate::template::Scope;

impl NodeExecutor {
    /// Run every item to completion, then aggregate.
    ///
    /// The result is the per-item results as one array, in input order
    /// regardless of completion order. When any item fails the whole node
    /// fails with the lowest failing index and partial results are
    /// discarded; sibling items still run to completion first so their
    /// work is not cut short mid-flight.
    pub(crate) async fn run_fan_out(
        &self,
        id: &str,
        scope: &Scope<'_>,
        items: Vec<Value>,
        item_var: &str,
        parallel: usize,
        spec: &ItemSpec,
    ) -> Result<NodeOutput, NodeError> {
        info!(node = %id, items = items.len(), parallel, "fanning out");

        let futs = items.iter().enumerate().map(|(index, item)| {
            let label = format!("{id}[{index}]");
            let artifact_dir = self.artifacts_root().join(id).join(index.to_string());
            async move {
                let resolved = scope.with_item(item_var, item).resolve_item(spec)?;
                self.run_item(&label, &artifact_dir, &resolved).await
            }
        });

        // `buffered` caps concurrency and yields in input order.
        let results: Vec<Result<NodeOutput, NodeError>> =
            stream::iter(futs).buffered(parallel.max(1)).collect().await;

        let mut outputs = Vec::with_capacity(results.len());
        let mut first_failure: Option<(usize, NodeError)> = None;
        for (index, result) in results.into_iter().enumerate() {
            match result {
                Ok(output) => outputs.push(output),
                Err(err) => {
                    debug!(node = %id, index, error = %err, "fan-out item failed");
                    if first_failure.is_none() {
                        first_failure = Some((index, err));
                    }
                }
            }
        }
        if let Some((index, err)) = first_failure {
            return Err(NodeError::Item {
                index,
                source: Box::new(err),
            });
        }

        let mut result_values = Vec::with_capacity(outputs.len());
        let mut artifacts = Vec::new();
        let mut logs = Vec::new();
        for output in outputs {
            result_values.push(output.result);
            artifacts.extend(output.artifacts);
            logs.extend(output.logs);
        }

        Ok(NodeOutput {
            result: Value::Array(result_values),
            artifacts,
            logs,
            cache_key: None,
            cached: false,
        })
    }
}
