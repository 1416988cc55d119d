//! End-to-end tests for the streaming executor on the local substrate.

use std::sync::Arc;

use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use arrow_array::{Array, Int64Array};

use common_config::{DataContext, ExecutionOptions, ResourceLimits};
use common_error::SluiceError;
use sluice_execution::{
    ActorPoolMapOperator, BlockTransform, ExecutionContext, ExecutionResources,
    ExecutionSubstrate, FnTransform, InputDataBuffer, LocalSubstrate, PhysicalOperator,
    StreamingExecutor, TaskPoolMapOperator, UnionOperator,
};

// ============================================================================
// Helpers
// ============================================================================

fn schema() -> Arc<Schema> {
    Arc::new(Schema::new(vec![Field::new("v", DataType::Int64, false)]))
}

fn batch(values: &[i64]) -> RecordBatch {
    RecordBatch::try_new(schema(), vec![Arc::new(Int64Array::from(values.to_vec()))]).unwrap()
}

fn context(data: DataContext) -> (Arc<LocalSubstrate>, ExecutionContext) {
    let substrate = Arc::new(LocalSubstrate::eager());
    let shared: Arc<dyn ExecutionSubstrate> = substrate.clone();
    (substrate, ExecutionContext::new(data, shared))
}

fn source(ctx: &ExecutionContext, substrate: &LocalSubstrate, rows: &[&[i64]]) -> Arc<InputDataBuffer> {
    let bundles = rows
        .iter()
        .map(|values| substrate.put_bundle(vec![batch(values)], true))
        .collect();
    InputDataBuffer::new(ctx.clone(), bundles)
}

fn dyn_op<T: PhysicalOperator + 'static>(op: &Arc<T>) -> Arc<dyn PhysicalOperator> {
    op.clone()
}

fn times_ten() -> Arc<dyn BlockTransform> {
    Arc::new(FnTransform::new("times_ten", |inputs, emit| {
        for input in inputs {
            let values = input
                .column(0)
                .as_any()
                .downcast_ref::<Int64Array>()
                .ok_or_else(|| SluiceError::value_error("expected an int64 column"))?;
            let scaled = Int64Array::from_iter_values(values.values().iter().map(|v| v * 10));
            emit(RecordBatch::try_new(input.schema(), vec![Arc::new(scaled)])?);
        }
        Ok(())
    }))
}

fn values(batch: &RecordBatch) -> Vec<i64> {
    batch
        .column(0)
        .as_any()
        .downcast_ref::<Int64Array>()
        .unwrap()
        .values()
        .to_vec()
}

// ============================================================================
// Dataflows
// ============================================================================

#[test]
fn test_input_only_dataflow() {
    let (substrate, ctx) = context(DataContext::default());
    let input = source(&ctx, &substrate, &[&[1, 2], &[3]]);
    let executor = StreamingExecutor::new(ctx, ExecutionOptions::default());

    let result = executor.execute(dyn_op(&input)).unwrap();

    assert_eq!(result.num_bundles(), 2);
    assert_eq!(result.total_rows(), 3);
    assert_eq!(values(&result.concat(substrate.as_ref()).unwrap()), vec![1, 2, 3]);
    assert!(input.base().is_shut_down());
}

#[test]
fn test_map_dataflow() {
    let (substrate, ctx) = context(DataContext::default());
    let input = source(&ctx, &substrate, &[&[1, 2], &[3], &[4, 5]]);
    let map = TaskPoolMapOperator::new(ctx.clone(), dyn_op(&input), times_ten(), Some(2));
    let executor = StreamingExecutor::new(ctx, ExecutionOptions::default());

    let result = executor.execute(dyn_op(&map)).unwrap();

    assert_eq!(result.total_rows(), 5);
    assert_eq!(
        values(&result.concat(substrate.as_ref()).unwrap()),
        vec![10, 20, 30, 40, 50]
    );
    let metrics = map.metrics();
    assert_eq!(metrics.num_tasks_submitted, 3);
    assert_eq!(metrics.num_tasks_finished, 3);
    assert_eq!(metrics.num_outputs_taken, 3);
    // Every owned input block was released once its task finished.
    assert_eq!(substrate.stats().freed_blocks, 3);
    assert!(map.base().is_shut_down());
    assert_eq!(map.num_outputs_total(), Some(3));
}

#[test]
fn test_union_preserves_input_order() {
    let (substrate, ctx) = context(DataContext::default());
    let left = source(&ctx, &substrate, &[&[1], &[2]]);
    let right = source(&ctx, &substrate, &[&[3], &[4]]);
    let left_map = TaskPoolMapOperator::new(ctx.clone(), dyn_op(&left), times_ten(), None);
    let right_map = TaskPoolMapOperator::new(ctx.clone(), dyn_op(&right), times_ten(), None);
    let union = UnionOperator::new(ctx.clone(), vec![dyn_op(&left_map), dyn_op(&right_map)]).unwrap();
    let options = ExecutionOptions::default().with_preserve_order(true);

    let result = StreamingExecutor::new(ctx, options)
        .execute(dyn_op(&union))
        .unwrap();

    assert_eq!(
        values(&result.concat(substrate.as_ref()).unwrap()),
        vec![10, 20, 30, 40]
    );
    assert_eq!(result.metrics.all().len(), 5);
    assert_eq!(result.metrics.total_tasks_submitted(), 4);
}

#[test]
fn test_actor_pool_dataflow() {
    let (substrate, ctx) = context(DataContext::default().with_max_tasks_in_flight_per_actor(1));
    let input = source(&ctx, &substrate, &[&[1], &[2], &[3], &[4]]);
    let pool = ActorPoolMapOperator::new(ctx.clone(), dyn_op(&input), times_ten(), 2).unwrap();

    let result = StreamingExecutor::new(ctx, ExecutionOptions::default())
        .execute(dyn_op(&pool))
        .unwrap();

    let mut output = values(&result.concat(substrate.as_ref()).unwrap());
    output.sort_unstable();
    assert_eq!(output, vec![10, 20, 30, 40]);
    let stats = substrate.stats();
    assert_eq!(stats.actors_created, 2);
    assert_eq!(stats.actors_killed, 2);
    assert_eq!(pool.metrics().num_tasks_finished, 4);
}

#[test]
fn test_cpu_limit_applies_backpressure() {
    let (substrate, ctx) = context(DataContext::default());
    let input = source(&ctx, &substrate, &[&[1], &[2], &[3]]);
    let map = TaskPoolMapOperator::new(ctx.clone(), dyn_op(&input), times_ten(), None);
    let options =
        ExecutionOptions::default().with_resource_limits(ResourceLimits::unlimited().with_cpu(1.0));
    let executor = StreamingExecutor::new(ctx, options);
    assert_eq!(executor.resource_limits().cpu(), 1.0);

    let result = executor.execute(dyn_op(&map)).unwrap();

    assert_eq!(result.total_rows(), 3);
    assert!(map.metrics().num_task_submission_backpressure_toggles >= 1);
}

#[test]
fn test_task_failure_aborts_execution() {
    let (substrate, ctx) = context(DataContext::default());
    let input = source(&ctx, &substrate, &[&[1], &[2]]);
    let broken: Arc<dyn BlockTransform> = Arc::new(FnTransform::new("broken", |_inputs, _emit| {
        Err(SluiceError::value_error("corrupt block"))
    }));
    let map = TaskPoolMapOperator::new(ctx.clone(), dyn_op(&input), broken, None);

    let err = StreamingExecutor::new(ctx, ExecutionOptions::default())
        .execute(dyn_op(&map))
        .unwrap_err();

    assert!(matches!(err, SluiceError::TaskFailed(_)));
    assert!(err.to_string().contains("corrupt block"));
    assert!(map.base().is_shut_down());
    assert!(input.base().is_shut_down());
    assert!(map.get_active_tasks().is_empty());
}

#[test]
fn test_explain_analyze_lists_operators() {
    let (substrate, ctx) = context(DataContext::default());
    let input = source(&ctx, &substrate, &[&[1, 2, 3]]);
    let map = TaskPoolMapOperator::new(ctx.clone(), dyn_op(&input), times_ten(), None);

    let result = StreamingExecutor::new(ctx, ExecutionOptions::default())
        .execute(dyn_op(&map))
        .unwrap();
    let report = result.explain_analyze();

    assert!(report.contains("Total Rows: 3"));
    assert!(report.contains("Input[0]"));
    assert!(report.contains("Map(times_ten)[1]"));
}

#[test]
fn test_resources_serialize_as_plain_fields() {
    let resources = ExecutionResources::new(2.0, 0.0, 1024.0);
    let json = serde_json::to_value(resources).unwrap();

    assert_eq!(json["cpu"], 2.0);
    assert_eq!(json["object_store_memory"], 1024.0);
}
