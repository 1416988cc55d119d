//! Result of driving a dataflow to completion.

use std::fmt::Write;
use std::time::Duration;

use arrow::record_batch::RecordBatch;

use common_error::{SluiceError, SluiceResult};

use crate::bundle::RefBundle;
use crate::metrics::MetricsSink;
use crate::substrate::ExecutionSubstrate;

/// Output bundles of the sink operator plus per-operator metrics.
#[derive(Debug)]
pub struct ExecutionResult {
    /// Bundles taken from the sink, in the order they were produced.
    pub bundles: Vec<RefBundle>,
    /// Final metrics of every operator.
    pub metrics: MetricsSink,
    /// Total execution time.
    pub elapsed: Duration,
}

impl ExecutionResult {
    /// Create a new execution result.
    pub const fn new(bundles: Vec<RefBundle>, metrics: MetricsSink, elapsed: Duration) -> Self {
        Self {
            bundles,
            metrics,
            elapsed,
        }
    }

    /// Number of output bundles.
    pub fn num_bundles(&self) -> usize {
        self.bundles.len()
    }

    /// Total output rows; blocks with unknown row counts count as zero.
    pub fn total_rows(&self) -> usize {
        self.bundles
            .iter()
            .flat_map(|bundle| bundle.metadata())
            .filter_map(|meta| meta.num_rows)
            .sum()
    }

    /// Whether no rows were produced.
    pub fn is_empty(&self) -> bool {
        self.total_rows() == 0
    }

    /// Fetch every output block, in order.
    pub fn batches(&self, substrate: &dyn ExecutionSubstrate) -> SluiceResult<Vec<RecordBatch>> {
        self.bundles
            .iter()
            .flat_map(|bundle| bundle.block_refs())
            .map(|block| substrate.get_block(&block))
            .collect()
    }

    /// Fetch every output block and combine them into one batch.
    pub fn concat(&self, substrate: &dyn ExecutionSubstrate) -> SluiceResult<RecordBatch> {
        let batches = self.batches(substrate)?;
        let declared = self.bundles.iter().find_map(|bundle| bundle.schema());
        let schema = match (batches.first(), declared) {
            (Some(batch), _) => batch.schema(),
            (None, Some(schema)) => schema.clone(),
            (None, None) => {
                return Err(SluiceError::value_error(
                    "cannot concatenate an empty result without a schema",
                ))
            }
        };
        Ok(arrow::compute::concat_batches(&schema, &batches)?)
    }

    /// Format as EXPLAIN ANALYZE output.
    pub fn explain_analyze(&self) -> String {
        let mut output = String::new();
        let _ = writeln!(output, "Execution Time: {:?}", self.elapsed);
        let _ = writeln!(output, "Total Rows: {}", self.total_rows());
        let _ = writeln!(output, "Bundles: {}", self.num_bundles());
        output.push_str("\nOperator Metrics:\n");
        output.push_str(&self.metrics.format_analyze());
        output
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use arrow::array::Int64Array;
    use arrow::datatypes::{DataType, Field, Schema};

    use crate::substrate::LocalSubstrate;

    fn batch(values: &[i64]) -> RecordBatch {
        let schema = Arc::new(Schema::new(vec![Field::new("v", DataType::Int64, false)]));
        RecordBatch::try_new(schema, vec![Arc::new(Int64Array::from(values.to_vec()))]).unwrap()
    }

    #[test]
    fn test_result_accessors() {
        let substrate = LocalSubstrate::eager();
        let bundles = vec![
            substrate.put_bundle(vec![batch(&[1, 2])], true),
            substrate.put_bundle(vec![batch(&[3])], true),
        ];
        let result = ExecutionResult::new(bundles, MetricsSink::new(), Duration::from_millis(5));

        assert_eq!(result.num_bundles(), 2);
        assert_eq!(result.total_rows(), 3);
        assert!(!result.is_empty());

        let combined = result.concat(&substrate).unwrap();
        assert_eq!(combined.num_rows(), 3);

        let text = result.explain_analyze();
        assert!(text.contains("Total Rows: 3"));
        assert!(text.contains("No metrics collected."));
    }

    #[test]
    fn test_empty_result_without_schema() {
        let substrate = LocalSubstrate::eager();
        let result = ExecutionResult::new(Vec::new(), MetricsSink::new(), Duration::ZERO);
        assert!(result.is_empty());
        assert!(result.concat(&substrate).is_err());
    }
}
