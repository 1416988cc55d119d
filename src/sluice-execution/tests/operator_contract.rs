//! Contract tests for physical operators driven by hand.
//!
//! Each test plays the role of the driver: it feeds inputs, polls tasks and
//! drains outputs directly, so the observable lifecycle of a single operator
//! can be checked without a scheduler in between.

use std::sync::Arc;

use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use arrow_array::{Array, Int64Array};

use common_config::{DataContext, ExecutionOptions};
use common_error::SluiceError;
use sluice_execution::{
    explain, post_order, ActorPoolMapOperator, BlockTransform, ExecutionContext,
    ExecutionSubstrate, FnTransform, InputDataBuffer, LocalSubstrate, OpTask, OperatorState,
    PhysicalOperator, RefBundle, SubmitMode, TaskPoolMapOperator, UnionOperator,
};

// ============================================================================
// Helpers
// ============================================================================

fn batch(values: &[i64]) -> RecordBatch {
    let schema = Arc::new(Schema::new(vec![Field::new("v", DataType::Int64, false)]));
    RecordBatch::try_new(schema, vec![Arc::new(Int64Array::from(values.to_vec()))]).unwrap()
}

fn setup(mode: SubmitMode) -> (Arc<LocalSubstrate>, ExecutionContext) {
    let substrate = Arc::new(LocalSubstrate::new(mode));
    let shared: Arc<dyn ExecutionSubstrate> = substrate.clone();
    (substrate, ExecutionContext::new(DataContext::default(), shared))
}

fn source(
    ctx: &ExecutionContext,
    substrate: &LocalSubstrate,
    rows: &[&[i64]],
    owns_blocks: bool,
) -> Arc<InputDataBuffer> {
    let bundles = rows
        .iter()
        .map(|values| substrate.put_bundle(vec![batch(values)], owns_blocks))
        .collect();
    InputDataBuffer::new(ctx.clone(), bundles)
}

fn dyn_op<T: PhysicalOperator + 'static>(op: &Arc<T>) -> Arc<dyn PhysicalOperator> {
    op.clone()
}

fn identity() -> Arc<dyn BlockTransform> {
    Arc::new(FnTransform::identity())
}

/// Emits every row of every input as its own single-row batch.
fn split_rows() -> Arc<dyn BlockTransform> {
    Arc::new(FnTransform::new("split", |inputs, emit| {
        for input in inputs {
            for row in 0..input.num_rows() {
                emit(input.slice(row, 1));
            }
        }
        Ok(())
    }))
}

fn failing() -> Arc<dyn BlockTransform> {
    Arc::new(FnTransform::new("fail", |_inputs, _emit| {
        Err(SluiceError::value_error("bad row"))
    }))
}

fn first_value(substrate: &LocalSubstrate, bundle: &RefBundle) -> i64 {
    let block = substrate.get_block(&bundle.block_refs()[0]).unwrap();
    let column = block
        .column(0)
        .as_any()
        .downcast_ref::<Int64Array>()
        .unwrap();
    assert!(!column.is_empty());
    column.value(0)
}

fn drain(substrate: &LocalSubstrate, op: &dyn PhysicalOperator) -> Vec<i64> {
    let mut values = Vec::new();
    while op.has_next() {
        let bundle = op.get_next().unwrap();
        values.push(first_value(substrate, &bundle));
    }
    values
}

/// Poll every active task of `op` once, ignoring task errors.
fn poll_all(op: &dyn PhysicalOperator) {
    for task in op.get_active_tasks() {
        match task.as_ref() {
            OpTask::Data(task) => {
                let _ = task.on_data_ready(None);
            }
            OpTask::Metadata(task) => {
                let _ = task.on_task_finished();
            }
        }
    }
}

// ============================================================================
// Ordering
// ============================================================================

#[test]
fn test_union_emits_in_arrival_order() {
    let (substrate, ctx) = setup(SubmitMode::Eager);
    let left = source(&ctx, &substrate, &[], true);
    let right = source(&ctx, &substrate, &[], true);
    let union = UnionOperator::new(ctx, vec![dyn_op(&left), dyn_op(&right)]).unwrap();
    union.start(&ExecutionOptions::default()).unwrap();

    union.add_input(substrate.put_bundle(vec![batch(&[1])], true), 0).unwrap();
    union.add_input(substrate.put_bundle(vec![batch(&[10])], true), 1).unwrap();
    union.add_input(substrate.put_bundle(vec![batch(&[2])], true), 0).unwrap();
    union.add_input(substrate.put_bundle(vec![batch(&[3])], true), 0).unwrap();

    assert_eq!(drain(&substrate, union.as_ref()), vec![1, 10, 2, 3]);
}

#[test]
fn test_union_preserve_order_buffers_later_inputs() {
    let (substrate, ctx) = setup(SubmitMode::Eager);
    let left = source(&ctx, &substrate, &[], true);
    let right = source(&ctx, &substrate, &[], true);
    let union = UnionOperator::new(ctx, vec![dyn_op(&left), dyn_op(&right)]).unwrap();
    union
        .start(&ExecutionOptions::default().with_preserve_order(true))
        .unwrap();

    union.add_input(substrate.put_bundle(vec![batch(&[10])], true), 1).unwrap();
    union.add_input(substrate.put_bundle(vec![batch(&[1])], true), 0).unwrap();
    union.add_input(substrate.put_bundle(vec![batch(&[2])], true), 0).unwrap();

    assert_eq!(union.internal_queue_size(), 1);
    assert_eq!(drain(&substrate, union.as_ref()), vec![1, 2]);

    union.input_done(0).unwrap();
    assert_eq!(union.internal_queue_size(), 0);
    union.add_input(substrate.put_bundle(vec![batch(&[11])], true), 1).unwrap();
    union.input_done(1).unwrap();

    assert_eq!(drain(&substrate, union.as_ref()), vec![10, 11]);
    assert!(union.completed());
}

#[test]
fn test_union_requires_two_inputs() {
    let (substrate, ctx) = setup(SubmitMode::Eager);
    let only = source(&ctx, &substrate, &[], true);

    let err = UnionOperator::new(ctx, vec![dyn_op(&only)]).unwrap_err();
    assert!(matches!(err, SluiceError::InvalidParameter(_)));
}

#[test]
fn test_map_outputs_follow_input_order() {
    let (substrate, ctx) = setup(SubmitMode::Eager);
    let input = source(&ctx, &substrate, &[], true);
    let map = TaskPoolMapOperator::new(ctx, dyn_op(&input), identity(), None);
    map.start(&ExecutionOptions::default()).unwrap();

    for value in [1, 2, 3] {
        map.add_input(substrate.put_bundle(vec![batch(&[value])], true), 0)
            .unwrap();
    }
    assert_eq!(map.num_active_tasks(), 3);
    poll_all(map.as_ref());

    assert_eq!(map.num_active_tasks(), 0);
    assert_eq!(drain(&substrate, map.as_ref()), vec![1, 2, 3]);
}

// ============================================================================
// Lifecycle
// ============================================================================

#[test]
fn test_completed_waits_for_outputs_to_be_taken() {
    let (substrate, ctx) = setup(SubmitMode::Eager);
    let input = source(&ctx, &substrate, &[&[1], &[2]], true);
    input.start(&ExecutionOptions::default()).unwrap();

    assert!(input.execution_finished());
    assert!(input.has_next());
    assert!(!input.completed());

    assert_eq!(drain(&substrate, input.as_ref()), vec![1, 2]);
    assert!(input.completed());
}

#[test]
fn test_map_finishes_after_inputs_done_and_tasks_drained() {
    let (substrate, ctx) = setup(SubmitMode::Manual);
    let input = source(&ctx, &substrate, &[], true);
    let map = TaskPoolMapOperator::new(ctx, dyn_op(&input), identity(), None);
    map.start(&ExecutionOptions::default()).unwrap();
    assert_eq!(map.base().state(), OperatorState::Started);

    map.add_input(substrate.put_bundle(vec![batch(&[7])], true), 0)
        .unwrap();
    map.input_done(0).unwrap();
    assert_eq!(map.base().state(), OperatorState::InputsComplete);
    assert!(!map.execution_finished());

    substrate.run_all();
    poll_all(map.as_ref());

    assert!(map.execution_finished());
    assert!(!map.completed());
    assert_eq!(drain(&substrate, map.as_ref()), vec![7]);
    assert!(map.completed());
}

#[test]
fn test_start_twice_is_rejected() {
    let (substrate, ctx) = setup(SubmitMode::Eager);
    let input = source(&ctx, &substrate, &[], true);
    input.start(&ExecutionOptions::default()).unwrap();

    let err = input.start(&ExecutionOptions::default()).unwrap_err();
    assert!(err.is_protocol_violation());
}

#[test]
fn test_shutdown_before_start_leaves_state_unchanged() {
    let (substrate, ctx) = setup(SubmitMode::Eager);
    let input = source(&ctx, &substrate, &[], true);
    let map = TaskPoolMapOperator::new(ctx, dyn_op(&input), identity(), None);

    let err = map.shutdown(false).unwrap_err();
    assert!(err.is_protocol_violation());
    assert!(!map.base().is_shut_down());
    assert_eq!(map.base().state(), OperatorState::Created);

    map.start(&ExecutionOptions::default()).unwrap();
    map.shutdown(false).unwrap();
    assert_eq!(map.base().state(), OperatorState::ShutDown);
}

#[test]
fn test_forced_shutdown_resolves_every_task() {
    let (substrate, ctx) = setup(SubmitMode::Manual);
    let input = source(&ctx, &substrate, &[], true);
    let map = TaskPoolMapOperator::new(ctx, dyn_op(&input), identity(), None);
    map.start(&ExecutionOptions::default()).unwrap();

    for value in [1, 2, 3] {
        map.add_input(substrate.put_bundle(vec![batch(&[value])], true), 0)
            .unwrap();
    }
    let waitables: Vec<_> = map
        .get_active_tasks()
        .iter()
        .map(|task| task.waitable())
        .collect();
    assert_eq!(waitables.len(), 3);
    assert!(waitables.iter().all(|w| substrate.is_pending(w)));

    map.shutdown(true).unwrap();

    assert!(map.get_active_tasks().is_empty());
    assert!(waitables.iter().all(|w| !substrate.is_pending(w)));
    assert_eq!(substrate.queued(), 0);
    assert_eq!(substrate.stats().forced_cancels, 3);
}

#[test]
fn test_second_shutdown_does_nothing() {
    let (substrate, ctx) = setup(SubmitMode::Manual);
    let input = source(&ctx, &substrate, &[], true);
    let map = TaskPoolMapOperator::new(ctx, dyn_op(&input), identity(), None);
    map.start(&ExecutionOptions::default()).unwrap();
    map.add_input(substrate.put_bundle(vec![batch(&[1])], true), 0)
        .unwrap();
    map.add_input(substrate.put_bundle(vec![batch(&[2])], true), 0)
        .unwrap();

    map.shutdown(false).unwrap();
    assert_eq!(substrate.stats().cancel_calls, 2);

    map.shutdown(true).unwrap();
    let stats = substrate.stats();
    assert_eq!(stats.cancel_calls, 2);
    assert_eq!(stats.forced_cancels, 0);
}

#[test]
fn test_forced_shutdown_frees_owned_task_inputs() {
    let (substrate, ctx) = setup(SubmitMode::Manual);
    let input = source(&ctx, &substrate, &[], true);
    let map = TaskPoolMapOperator::new(ctx, dyn_op(&input), identity(), None);
    map.start(&ExecutionOptions::default()).unwrap();

    let owned = substrate.put_bundle(vec![batch(&[1, 2])], true);
    let borrowed = substrate.put_bundle(vec![batch(&[3])], false);
    let owned_block = owned.block_refs()[0];
    let borrowed_block = borrowed.block_refs()[0];
    map.add_input(owned, 0).unwrap();
    map.add_input(borrowed, 0).unwrap();

    map.shutdown(true).unwrap();

    assert!(!substrate.contains_block(&owned_block));
    assert!(substrate.contains_block(&borrowed_block));
    assert_eq!(substrate.stats().free_calls, 1);
    assert!(map.metrics().obj_store_mem_freed > 0);
}

#[test]
fn test_graceful_shutdown_frees_buffered_outputs_only() {
    let (substrate, ctx) = setup(SubmitMode::Manual);
    let input = source(&ctx, &substrate, &[], true);
    let map = TaskPoolMapOperator::new(ctx, dyn_op(&input), identity(), None);
    map.start(&ExecutionOptions::default()).unwrap();

    map.add_input(substrate.put_bundle(vec![batch(&[1])], true), 0)
        .unwrap();
    substrate.run_all();
    poll_all(map.as_ref());
    assert!(map.has_next());
    assert_eq!(substrate.stats().freed_blocks, 1);

    let pending = substrate.put_bundle(vec![batch(&[2])], true);
    let pending_block = pending.block_refs()[0];
    map.add_input(pending, 0).unwrap();

    map.shutdown(false).unwrap();

    assert!(!map.has_next());
    assert_eq!(substrate.stats().freed_blocks, 2);
    assert!(substrate.contains_block(&pending_block));
}

// ============================================================================
// Protocol violations
// ============================================================================

#[test]
fn test_get_next_without_output_is_rejected() {
    let (substrate, ctx) = setup(SubmitMode::Eager);
    let input = source(&ctx, &substrate, &[&[1]], true);
    input.start(&ExecutionOptions::default()).unwrap();
    input.get_next().unwrap();

    let err = input.get_next().unwrap_err();
    assert!(err.is_protocol_violation());
}

#[test]
fn test_add_input_checks_index_and_lifecycle() {
    let (substrate, ctx) = setup(SubmitMode::Eager);
    let input = source(&ctx, &substrate, &[], true);
    let map = TaskPoolMapOperator::new(ctx, dyn_op(&input), identity(), None);
    let bundle = || substrate.put_bundle(vec![batch(&[1])], true);

    assert!(map.add_input(bundle(), 0).unwrap_err().is_protocol_violation());

    map.start(&ExecutionOptions::default()).unwrap();
    assert!(map.add_input(bundle(), 1).unwrap_err().is_protocol_violation());

    map.input_done(0).unwrap();
    assert!(map.add_input(bundle(), 0).unwrap_err().is_protocol_violation());
    assert_eq!(map.metrics().num_inputs_received, 0);
}

#[test]
fn test_add_input_rejected_after_all_inputs_done() {
    let (substrate, ctx) = setup(SubmitMode::Manual);
    let input = source(&ctx, &substrate, &[], true);
    let map = TaskPoolMapOperator::new(ctx, dyn_op(&input), identity(), None);
    map.start(&ExecutionOptions::default()).unwrap();
    map.all_inputs_done().unwrap();
    assert_eq!(map.base().state(), OperatorState::InputsComplete);

    let err = map
        .add_input(substrate.put_bundle(vec![batch(&[1])], true), 0)
        .unwrap_err();
    assert!(err.is_protocol_violation());
    let metrics = map.metrics();
    assert_eq!(metrics.num_inputs_received, 0);
    assert_eq!(metrics.num_tasks_submitted, 0);
    assert_eq!(substrate.stats().submitted, 0);
}

#[test]
fn test_get_next_requires_running_operator() {
    let (substrate, ctx) = setup(SubmitMode::Eager);
    let input = source(&ctx, &substrate, &[&[1], &[2]], true);
    assert!(input.has_next());
    assert!(input.get_next().unwrap_err().is_protocol_violation());

    input.start(&ExecutionOptions::default()).unwrap();
    input.get_next().unwrap();
    input.shutdown(false).unwrap();

    assert!(input.has_next());
    assert!(input.get_next().unwrap_err().is_protocol_violation());
    assert_eq!(input.metrics().num_outputs_taken, 1);
}

#[test]
fn test_input_done_rejected_after_shutdown() {
    let (substrate, ctx) = setup(SubmitMode::Eager);
    let input = source(&ctx, &substrate, &[], true);
    let map = TaskPoolMapOperator::new(ctx, dyn_op(&input), identity(), None);
    map.start(&ExecutionOptions::default()).unwrap();
    map.shutdown(false).unwrap();

    assert!(map.input_done(0).unwrap_err().is_protocol_violation());
    assert!(!map.base().is_input_done(0));
    assert_eq!(map.base().state(), OperatorState::ShutDown);
}

#[test]
fn test_source_rejects_input() {
    let (substrate, ctx) = setup(SubmitMode::Eager);
    let input = source(&ctx, &substrate, &[&[1]], true);
    input.start(&ExecutionOptions::default()).unwrap();

    let err = input
        .add_input(substrate.put_bundle(vec![batch(&[2])], true), 0)
        .unwrap_err();
    assert!(err.is_protocol_violation());
}

// ============================================================================
// Tasks, blocks and metrics
// ============================================================================

#[test]
fn test_borrowed_input_blocks_are_never_freed() {
    let (substrate, ctx) = setup(SubmitMode::Eager);
    let input = source(&ctx, &substrate, &[], false);
    let map = TaskPoolMapOperator::new(ctx, dyn_op(&input), identity(), None);
    map.start(&ExecutionOptions::default()).unwrap();

    let bundle = substrate.put_bundle(vec![batch(&[1, 2])], false);
    let block = bundle.block_refs()[0];
    map.add_input(bundle, 0).unwrap();
    poll_all(map.as_ref());

    assert_eq!(drain(&substrate, map.as_ref()), vec![1]);
    assert_eq!(substrate.stats().free_calls, 0);
    assert!(substrate.contains_block(&block));
    assert_eq!(map.metrics().obj_store_mem_freed, 0);
}

#[test]
fn test_owned_input_blocks_are_freed_after_task() {
    let (substrate, ctx) = setup(SubmitMode::Eager);
    let input = source(&ctx, &substrate, &[], true);
    let map = TaskPoolMapOperator::new(ctx, dyn_op(&input), identity(), None);
    map.start(&ExecutionOptions::default()).unwrap();

    let bundle = substrate.put_bundle(vec![batch(&[1, 2])], true);
    let block = bundle.block_refs()[0];
    map.add_input(bundle, 0).unwrap();
    assert!(substrate.contains_block(&block));
    poll_all(map.as_ref());

    assert_eq!(substrate.stats().free_calls, 1);
    assert!(!substrate.contains_block(&block));
    assert!(map.metrics().obj_store_mem_freed > 0);
}

#[test]
fn test_failed_task_is_reported_and_input_released() {
    let (substrate, ctx) = setup(SubmitMode::Eager);
    let input = source(&ctx, &substrate, &[], true);
    let map = TaskPoolMapOperator::new(ctx, dyn_op(&input), failing(), None);
    map.start(&ExecutionOptions::default()).unwrap();
    map.add_input(substrate.put_bundle(vec![batch(&[1])], true), 0)
        .unwrap();

    let tasks = map.get_active_tasks();
    let task = tasks[0].as_data().unwrap();
    let err = task.on_data_ready(None).unwrap_err();

    assert!(matches!(err, SluiceError::TaskFailed(_)));
    assert!(task.is_done());
    assert_eq!(map.num_active_tasks(), 0);
    let metrics = map.metrics();
    assert_eq!(metrics.num_tasks_failed, 1);
    assert_eq!(metrics.num_tasks_finished, 1);
    assert_eq!(substrate.stats().free_calls, 1);
}

#[test]
fn test_backpressure_toggle_counted_on_change_only() {
    let (substrate, ctx) = setup(SubmitMode::Eager);
    let input = source(&ctx, &substrate, &[], true);
    let map = TaskPoolMapOperator::new(ctx, dyn_op(&input), identity(), None);

    map.notify_in_task_submission_backpressure(true);
    map.notify_in_task_submission_backpressure(true);
    assert_eq!(map.metrics().num_task_submission_backpressure_toggles, 1);
    assert!(map.metrics().in_task_submission_backpressure());

    map.notify_in_task_submission_backpressure(false);
    assert_eq!(map.metrics().num_task_submission_backpressure_toggles, 2);
    assert!(!map.metrics().in_task_submission_backpressure());

    map.notify_in_task_output_backpressure(false);
    assert_eq!(map.metrics().num_task_output_backpressure_toggles, 0);
}

#[test]
fn test_map_estimates_outputs_from_finished_tasks() {
    let (substrate, ctx) = setup(SubmitMode::Eager);
    let input = source(&ctx, &substrate, &[&[1, 2], &[3, 4], &[5, 6], &[7, 8]], true);
    let map = TaskPoolMapOperator::new(ctx, dyn_op(&input), split_rows(), None);
    input.start(&ExecutionOptions::default()).unwrap();
    map.start(&ExecutionOptions::default()).unwrap();
    assert_eq!(map.upstream_op_num_outputs(), 4);
    assert_eq!(map.num_outputs_total(), None);

    for _ in 0..2 {
        map.add_input(input.get_next().unwrap(), 0).unwrap();
    }
    poll_all(map.as_ref());

    assert_eq!(map.num_outputs_total(), Some(8));
    assert_eq!(map.num_output_rows_total(), Some(8));

    while input.has_next() {
        map.add_input(input.get_next().unwrap(), 0).unwrap();
    }
    poll_all(map.as_ref());
    map.input_done(0).unwrap();

    assert!(map.execution_finished());
    assert_eq!(map.num_outputs_total(), Some(8));
    assert_eq!(drain(&substrate, map.as_ref()), vec![1, 2, 3, 4, 5, 6, 7, 8]);
}

// ============================================================================
// Resources
// ============================================================================

#[test]
fn test_task_pool_resource_queries() {
    let (substrate, ctx) = setup(SubmitMode::Manual);
    let input = source(&ctx, &substrate, &[], true);
    let map = TaskPoolMapOperator::new(ctx, dyn_op(&input), identity(), Some(2));
    map.start(&ExecutionOptions::default()).unwrap();

    let (min, max) = map.min_max_requirements();
    assert_eq!(min.cpu(), 1.0);
    assert_eq!(max.cpu(), 2.0);
    assert_eq!(map.incremental_usage().cpu(), 1.0);

    assert!(map.should_add_input());
    map.add_input(substrate.put_bundle(vec![batch(&[1])], true), 0)
        .unwrap();
    map.add_input(substrate.put_bundle(vec![batch(&[2])], true), 0)
        .unwrap();
    assert!(!map.should_add_input());

    assert_eq!(map.current_usage().cpu(), 2.0);
    assert!(map.pending_usage().is_zero());
    assert_eq!(map.running_usage().cpu(), 2.0);

    substrate.run_all();
    poll_all(map.as_ref());

    assert!(map.should_add_input());
    assert_eq!(map.current_usage().cpu(), 0.0);
}

#[test]
fn test_target_block_size_falls_back_to_context() {
    let (substrate, ctx) = setup(SubmitMode::Eager);
    let input = source(&ctx, &substrate, &[], true);

    assert_eq!(
        input.actual_target_max_block_size(),
        input.data_context().target_max_block_size
    );
    input.set_target_max_block_size(Some(1024));
    assert_eq!(input.actual_target_max_block_size(), Some(1024));

    input.set_logical_operators(vec!["Read".to_string()]);
    assert_eq!(input.logical_operators(), vec!["Read".to_string()]);
}

// ============================================================================
// Actor pool
// ============================================================================

#[test]
fn test_actor_pool_probes_polled_but_not_counted() {
    let (substrate, ctx) = setup(SubmitMode::Manual);
    let input = source(&ctx, &substrate, &[], true);
    let pool = ActorPoolMapOperator::new(ctx, dyn_op(&input), identity(), 2).unwrap();
    pool.start(&ExecutionOptions::default()).unwrap();

    assert_eq!(pool.get_active_tasks().len(), 2);
    assert_eq!(pool.num_active_tasks(), 0);
    assert_eq!(pool.get_actor_info().pending, 2);
    assert_eq!(pool.progress_str(), "0 actors, 2 pending");
    assert_eq!(pool.pending_usage().cpu(), 2.0);
    assert_eq!(pool.current_usage().cpu(), 2.0);
    assert_eq!(pool.running_usage().cpu(), 0.0);
    assert!(!pool.should_add_input());

    pool.add_input(substrate.put_bundle(vec![batch(&[5])], true), 0)
        .unwrap();
    assert_eq!(pool.internal_queue_size(), 1);

    // Actors come up, but stay pending until their probes are polled.
    substrate.run_all();
    pool.update_resource_usage();
    assert_eq!(pool.get_actor_info().pending, 2);

    poll_all(pool.as_ref());
    let info = pool.get_actor_info();
    assert_eq!(info.running, 2);
    assert_eq!(info.pending, 0);
    assert_eq!(pool.progress_str(), "2 actors");
    assert_eq!(pool.internal_queue_size(), 0);
    assert_eq!(pool.num_active_tasks(), 1);
    assert_eq!(pool.get_active_tasks().len(), 1);

    substrate.run_all();
    poll_all(pool.as_ref());
    assert_eq!(drain(&substrate, pool.as_ref()), vec![5]);
    assert_eq!(pool.num_active_tasks(), 0);
}

#[test]
fn test_actor_pool_reconciles_restarts() {
    let (substrate, ctx) = setup(SubmitMode::Manual);
    let input = source(&ctx, &substrate, &[], true);
    let pool = ActorPoolMapOperator::new(ctx, dyn_op(&input), identity(), 2).unwrap();
    pool.start(&ExecutionOptions::default()).unwrap();
    substrate.run_all();
    poll_all(pool.as_ref());

    let actors = pool.actor_ids();
    assert_eq!(actors.len(), 2);

    substrate.restart_actor(actors[0]);
    pool.update_resource_usage();
    let info = pool.get_actor_info();
    assert_eq!((info.running, info.restarting, info.pending), (1, 1, 0));
    assert_eq!(pool.progress_str(), "1 actors, 1 restarting");
    assert_eq!(info.to_string(), "running=1, restarting=1, pending=0");

    substrate.recover_actor(actors[0]);
    pool.update_resource_usage();
    assert_eq!(pool.get_actor_info().running, 2);
}

#[test]
fn test_actor_pool_shutdown_kills_actors_without_forcing() {
    let (substrate, ctx) = setup(SubmitMode::Manual);
    let input = source(&ctx, &substrate, &[], true);
    let pool = ActorPoolMapOperator::new(ctx, dyn_op(&input), identity(), 2).unwrap();
    pool.start(&ExecutionOptions::default()).unwrap();
    substrate.run_all();
    poll_all(pool.as_ref());
    let bundle = substrate.put_bundle(vec![batch(&[1])], true);
    let block = bundle.block_refs()[0];
    pool.add_input(bundle, 0).unwrap();
    assert_eq!(substrate.queued(), 1);

    pool.shutdown(true).unwrap();

    let stats = substrate.stats();
    assert_eq!(stats.actors_killed, 2);
    assert_eq!(stats.cancel_calls, 1);
    assert_eq!(stats.forced_cancels, 0);
    assert_eq!(stats.free_calls, 1);
    assert!(!substrate.contains_block(&block));
    assert!(pool.get_active_tasks().is_empty());
    assert_eq!(pool.get_actor_info().running, 0);
    assert_eq!(pool.current_usage().cpu(), 0.0);
}

#[test]
fn test_actor_pool_shutdown_frees_queued_inputs() {
    let (substrate, ctx) = setup(SubmitMode::Manual);
    let input = source(&ctx, &substrate, &[], true);
    let pool = ActorPoolMapOperator::new(ctx, dyn_op(&input), identity(), 2).unwrap();
    pool.start(&ExecutionOptions::default()).unwrap();

    let bundle = substrate.put_bundle(vec![batch(&[1])], true);
    let block = bundle.block_refs()[0];
    pool.add_input(bundle, 0).unwrap();
    assert_eq!(pool.internal_queue_size(), 1);

    pool.shutdown(false).unwrap();

    assert_eq!(pool.internal_queue_size(), 0);
    assert!(!substrate.contains_block(&block));
    assert_eq!(pool.metrics().obj_store_mem_internal_inqueue, 0);
}

#[test]
fn test_actor_pool_rejects_empty_pool() {
    let (substrate, ctx) = setup(SubmitMode::Eager);
    let input = source(&ctx, &substrate, &[], true);

    let err = ActorPoolMapOperator::new(ctx, dyn_op(&input), identity(), 0).unwrap_err();
    assert!(matches!(err, SluiceError::InvalidParameter(_)));
}

// ============================================================================
// Topology
// ============================================================================

#[test]
fn test_topology_and_explain() {
    let (substrate, ctx) = setup(SubmitMode::Eager);
    let left = source(&ctx, &substrate, &[&[1]], true);
    let right = source(&ctx, &substrate, &[&[2]], true);
    let map = TaskPoolMapOperator::new(ctx.clone(), dyn_op(&left), identity(), None);
    let union = UnionOperator::new(ctx, vec![dyn_op(&map), dyn_op(&right)]).unwrap();

    let downstream: Vec<String> = left
        .output_dependencies()
        .iter()
        .map(|op| op.id().to_string())
        .collect();
    assert_eq!(downstream, vec![map.id().to_string()]);
    assert!(union.output_dependencies().is_empty());
    assert_eq!(union.input_dependencies().len(), 2);

    let names: Vec<String> = post_order(&dyn_op(&union))
        .iter()
        .map(|op| op.name().to_string())
        .collect();
    assert_eq!(names, vec!["Input", "Map(identity)", "Input", "Union"]);

    let plan = explain(union.as_ref());
    assert!(plan.contains("Union[2 inputs]"));
    assert!(plan.contains("TaskPoolMap[identity]"));
    assert!(plan.contains("Input[1 bundles]"));
}
