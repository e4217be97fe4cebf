// Copyright 2026 the Execution Tape Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Components that cross instance boundaries: call-action, user widgets and the start, end,
//! input and output components of the called flow.

use flow_expr::value::Value;

use crate::execution_state::ComponentExecutionState;
use crate::flow_state::FlowStateId;
use crate::host::Host;
use crate::runtime::{FlowError, Runtime};
use crate::template::{ComponentPayload, component_type};

/// Reads the calling component's input that feeds component `component_index` of `id`.
///
/// Input components read `inputs_start_index + input_index`; a start component reads the slot
/// just before the forwarded inputs, which is the caller's sequence input.
fn call_value<H: Host>(
    rt: &Runtime<H>,
    id: FlowStateId,
    component_index: usize,
) -> Result<Value, FlowError> {
    let definition = rt.definition();
    let state = rt.flow_state(id).ok_or_else(|| FlowError::message("No parentFlowState in Input"))?;
    let (Some(parent), Some(parent_component)) = (state.parent(), state.parent_component()) else {
        return Err(FlowError::message("No parentFlowState in Input"));
    };
    let caller = rt.component(&definition, parent, parent_component)?;
    let inputs_start = match caller.payload {
        ComponentPayload::Call {
            inputs_start_index, ..
        } => usize::from(inputs_start_index),
        _ => 0,
    };
    let position = match rt.component(&definition, id, component_index)?.payload {
        ComponentPayload::Input { input_index } => Some(inputs_start + usize::from(input_index)),
        _ => inputs_start.checked_sub(1),
    };
    let slot = position
        .and_then(|position| caller.inputs.get(position))
        .ok_or_else(|| FlowError::message("Invalid input index in Input"))?;
    Ok(rt
        .flow_state(parent)
        .and_then(|parent| parent.value(usize::from(*slot)))
        .cloned()
        .unwrap_or_default())
}

pub(crate) fn execute_input<H: Host>(
    rt: &mut Runtime<H>,
    id: FlowStateId,
    component_index: usize,
) -> Result<(), FlowError> {
    let value = call_value(rt, id, component_index)?;
    rt.set_execution_state(
        id,
        component_index,
        ComponentExecutionState::Input(value.clone()),
    )?;
    rt.propagate_value(id, component_index, 0, value)
}

/// Forwards the value on input 0 to an output of the calling component.
pub(crate) fn execute_output<H: Host>(
    rt: &mut Runtime<H>,
    id: FlowStateId,
    component_index: usize,
) -> Result<(), FlowError> {
    let definition = rt.definition();
    let state = rt.flow_state(id).ok_or_else(|| FlowError::message("No parentFlowState in Output"))?;
    let (Some(parent), Some(parent_component)) = (state.parent(), state.parent_component()) else {
        return Err(FlowError::message("No parentFlowState in Output"));
    };
    let component = rt.component(&definition, id, component_index)?;
    let value = component
        .inputs
        .first()
        .and_then(|&slot| state.value(usize::from(slot)))
        .cloned()
        .unwrap_or_default();
    let output_index = match component.payload {
        ComponentPayload::Output { output_index } => usize::from(output_index),
        _ => 0,
    };
    let outputs_start = match rt.component(&definition, parent, parent_component)?.payload {
        ComponentPayload::Call {
            outputs_start_index,
            ..
        } => usize::from(outputs_start_index),
        _ => 0,
    };
    rt.propagate_value(parent, parent_component, outputs_start + output_index, value)
}

/// Resumes the caller of a finished action.
pub(crate) fn execute_end<H: Host>(
    rt: &mut Runtime<H>,
    id: FlowStateId,
    _component_index: usize,
) -> Result<(), FlowError> {
    let state = rt.state(id)?;
    if state.is_action()
        && let (Some(parent), Some(parent_component)) = (state.parent(), state.parent_component())
    {
        rt.propagate_through_seqout(parent, parent_component)?;
    }
    Ok(())
}

/// Runs the target flow as a child action, or a host action function for indices past the
/// flow count.
///
/// A second trigger while the previous call is still running waits for it.
pub(crate) fn execute_call_action<H: Host>(
    rt: &mut Runtime<H>,
    id: FlowStateId,
    component_index: usize,
) -> Result<(), FlowError> {
    let definition = rt.definition();
    let ComponentPayload::Call { flow_index, .. } =
        rt.component(&definition, id, component_index)?.payload
    else {
        return Err(FlowError::message("Invalid action flow index in CallAction"));
    };

    let flow_count = definition.flows.len();
    if flow_index >= flow_count {
        rt.host_mut()
            .execute_action_function(flow_index - flow_count)?;
        return rt.propagate_through_seqout(id, component_index);
    }

    if let Some(child) = rt
        .execution_state(id, component_index)
        .and_then(ComponentExecutionState::child)
    {
        if rt.flow_state(child).is_some() && !rt.can_free(child) {
            return rt.add_to_queue(id, component_index, None, None, true);
        }
        rt.release_execution_state(id, component_index);
    }

    let child = rt.create_flow_state(flow_index, Some((id, component_index)), true)?;
    if rt.can_free(child) {
        rt.free_flow_state(child)?;
        rt.propagate_through_seqout(id, component_index)
    } else {
        rt.set_execution_state(
            id,
            component_index,
            ComponentExecutionState::CallAction { child },
        )?;
        Ok(())
    }
}

/// Creates the embedded page on first run; afterwards pushes changed input values into it.
pub(crate) fn execute_user_widget<H: Host>(
    rt: &mut Runtime<H>,
    id: FlowStateId,
    component_index: usize,
) -> Result<(), FlowError> {
    let definition = rt.definition();
    let ComponentPayload::Call { flow_index, .. } =
        rt.component(&definition, id, component_index)?.payload
    else {
        return Err(FlowError::message("Invalid flow index in UserWidget"));
    };

    let Some(child) = rt
        .execution_state(id, component_index)
        .and_then(ComponentExecutionState::child)
    else {
        let child = rt.create_flow_state(flow_index, Some((id, component_index)), false)?;
        rt.set_execution_state(
            id,
            component_index,
            ComponentExecutionState::UserWidget { child },
        )?;
        return Ok(());
    };

    let child_flow = rt.state(child)?.flow_index();
    let Some(flow) = definition.flow(child_flow) else {
        return Ok(());
    };
    for (index, component) in flow.components.iter().enumerate() {
        match component.type_tag {
            component_type::INPUT => {
                let Some(ComponentExecutionState::Input(previous)) = rt.execution_state(child, index)
                else {
                    continue;
                };
                let value = call_value(rt, child, index)?;
                if *previous != value {
                    rt.add_to_queue(child, index, None, None, false)?;
                    rt.set_execution_state(child, index, ComponentExecutionState::Input(value))?;
                }
            }
            component_type::START => {
                if !call_value(rt, child, index)?.is_undefined() {
                    rt.add_to_queue(child, index, None, None, false)?;
                }
            }
            _ => {}
        }
    }
    Ok(())
}
