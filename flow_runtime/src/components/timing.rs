// Copyright 2026 the Execution Tape Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Components that run across several executions: watch-variable, delay, counter, loop and
//! test-and-set.
//!
//! They keep their progress in an execution state and, while waiting on something outside the
//! flow, re-queue themselves as continuous entries.

use core::cmp::Ordering;

use flow_expr::ops::{compare_values, op};
use flow_expr::value::Value;

use crate::execution_state::ComponentExecutionState;
use crate::flow_state::FlowStateId;
use crate::host::Host;
use crate::runtime::{FlowError, Runtime};
use crate::template::property;

/// Emits the watched expression on output 0 the first time and whenever it changes.
pub(crate) fn execute_watch_variable<H: Host>(
    rt: &mut Runtime<H>,
    id: FlowStateId,
    component_index: usize,
) -> Result<(), FlowError> {
    let value = rt.eval_property(id, component_index, property::WATCH_VARIABLE_EXPRESSION)?;
    let changed = match rt.execution_state_mut(id, component_index) {
        Some(ComponentExecutionState::WatchVariable(previous)) => {
            let changed = *previous != value;
            if changed {
                *previous = value.clone();
            }
            changed
        }
        _ => {
            rt.set_execution_state(
                id,
                component_index,
                ComponentExecutionState::WatchVariable(value.clone()),
            )?;
            true
        }
    };
    if changed {
        rt.propagate_value(id, component_index, 0, value)?;
    }
    rt.add_to_queue(id, component_index, None, None, true)
}

pub(crate) fn execute_delay<H: Host>(
    rt: &mut Runtime<H>,
    id: FlowStateId,
    component_index: usize,
) -> Result<(), FlowError> {
    let now = rt.now_ms();
    let wake_at_ms = match rt.execution_state(id, component_index) {
        Some(ComponentExecutionState::Delay { wake_at_ms }) => *wake_at_ms,
        _ => {
            let ms = rt
                .eval_property(id, component_index, property::DELAY_MILLISECONDS)?
                .to_double()?;
            #[allow(
                clippy::cast_possible_truncation,
                clippy::cast_sign_loss,
                reason = "negative and NaN delays saturate to zero"
            )]
            let wake_at_ms = now.saturating_add(ms.max(0.0) as u64);
            rt.set_execution_state(
                id,
                component_index,
                ComponentExecutionState::Delay { wake_at_ms },
            )?;
            wake_at_ms
        }
    };
    if now >= wake_at_ms {
        rt.release_execution_state(id, component_index);
        rt.propagate_through_seqout(id, component_index)
    } else {
        rt.add_to_queue(id, component_index, None, None, true)
    }
}

/// Fires the sequence output `count` times, then the last output once.
pub(crate) fn execute_counter<H: Host>(
    rt: &mut Runtime<H>,
    id: FlowStateId,
    component_index: usize,
) -> Result<(), FlowError> {
    let remaining = match rt.execution_state(id, component_index) {
        Some(ComponentExecutionState::Counter { remaining }) => *remaining,
        _ => rt
            .eval_property(id, component_index, property::COUNTER_COUNT)?
            .to_int32()?,
    };
    if remaining > 0 {
        rt.set_execution_state(
            id,
            component_index,
            ComponentExecutionState::Counter {
                remaining: remaining - 1,
            },
        )?;
        rt.propagate_through_seqout(id, component_index)
    } else {
        rt.release_execution_state(id, component_index);
        let last = last_output(rt, id, component_index)?;
        rt.propagate_value(id, component_index, last, Value::Null)
    }
}

/// Assigns `from`, `from + step`, ... to the variable until it passes `to`.
///
/// Input 0 (re)starts the loop, any other sequence input advances it. Each iteration fires the
/// sequence output; the last output fires once the range is exhausted.
pub(crate) fn execute_loop<H: Host>(
    rt: &mut Runtime<H>,
    id: FlowStateId,
    component_index: usize,
) -> Result<(), FlowError> {
    let definition = rt.definition();
    let component = rt.component(&definition, id, component_index)?;
    let restart = component
        .inputs
        .first()
        .and_then(|&slot| rt.state(id).ok()?.value(usize::from(slot)).cloned())
        .is_some_and(|value| !value.is_undefined());
    if restart {
        rt.release_execution_state(id, component_index);
    } else if rt.execution_state(id, component_index).is_none() {
        return Ok(());
    }

    let step = rt.eval_property(id, component_index, property::LOOP_STEP)?;
    let (target, to, current) = match rt.take_execution_state(id, component_index) {
        Some(ComponentExecutionState::Loop {
            target,
            to,
            current,
        }) => {
            let next = rt.run_operation(op::ADD, &[current, step.clone()])?;
            (target, to, next)
        }
        _ => (
            rt.eval_assignable_property(id, component_index, property::LOOP_VARIABLE)?,
            rt.eval_property(id, component_index, property::LOOP_TO)?,
            rt.eval_property(id, component_index, property::LOOP_FROM)?,
        ),
    };

    let past_end = if step.to_int32()? > 0 {
        Ordering::Greater
    } else {
        Ordering::Less
    };
    if compare_values("loop", &current, &to)? == past_end {
        let last = component.outputs.len().saturating_sub(1);
        return rt.propagate_value(id, component_index, last, Value::Null);
    }

    rt.assign_value(id, component_index, &target, current.clone())?;
    rt.set_execution_state(
        id,
        component_index,
        ComponentExecutionState::Loop {
            target,
            to,
            current,
        },
    )?;
    rt.propagate_through_seqout(id, component_index)
}

/// Waits for a boolean variable to be `false`, then sets it and continues.
pub(crate) fn execute_test_and_set<H: Host>(
    rt: &mut Runtime<H>,
    id: FlowStateId,
    component_index: usize,
) -> Result<(), FlowError> {
    let Value::Bool(locked) =
        rt.eval_property(id, component_index, property::TEST_AND_SET_VARIABLE)?
    else {
        return Err(FlowError::message("Variable is not a boolean"));
    };
    if locked {
        return rt.add_to_queue(id, component_index, None, None, true);
    }
    let target = rt.eval_assignable_property(id, component_index, property::TEST_AND_SET_VARIABLE)?;
    rt.assign_value(id, component_index, &target, Value::Bool(true))?;
    rt.propagate_through_seqout(id, component_index)
}

fn last_output<H: Host>(
    rt: &Runtime<H>,
    id: FlowStateId,
    component_index: usize,
) -> Result<usize, FlowError> {
    let definition = rt.definition();
    let outputs = rt.component(&definition, id, component_index)?.outputs.len();
    Ok(outputs.saturating_sub(1))
}
