// Copyright 2026 the Execution Tape Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Value propagation, readiness and assignment.

use alloc::format;
use alloc::rc::Rc;

use flow_expr::eval::EvalError;
use flow_expr::value::{ArrayValue, SlotRef, Value};

use crate::flow_state::FlowStateId;
use crate::host::Host;
use crate::queue::QueueEntry;
use crate::runtime::{FlowError, Runtime, RuntimeError};
use crate::template::component_type;

impl<H: Host> Runtime<H> {
    /// Whether a ping may enqueue the component.
    ///
    /// Catch-error and on-event components only run when an error or event enqueues them.
    /// Widgets always run. A start component runs in root instances, and in child instances
    /// once the calling component's first input is defined. Anything else needs one defined
    /// sequence input (when it has sequence inputs) and every required data input.
    #[must_use]
    pub fn is_component_ready_to_run(&self, id: FlowStateId, component_index: usize) -> bool {
        let Some(state) = self.flow_states.get(id) else {
            return false;
        };
        let Some(flow) = self.definition.flow(state.flow_index()) else {
            return false;
        };
        let Some(component) = flow.components.get(component_index) else {
            return false;
        };
        match component.type_tag {
            component_type::CATCH_ERROR | component_type::ON_EVENT => return false,
            component_type::START => {
                let (Some(parent), Some(parent_component)) =
                    (state.parent(), state.parent_component())
                else {
                    return true;
                };
                let Some(parent_state) = self.flow_states.get(parent) else {
                    return false;
                };
                let slot = self
                    .definition
                    .component(parent_state.flow_index(), parent_component)
                    .and_then(|c| c.inputs.first().copied());
                return match slot {
                    Some(slot) => parent_state
                        .value(usize::from(slot))
                        .is_some_and(|v| !v.is_undefined()),
                    None => true,
                };
            }
            tag if component_type::is_widget(tag) => return true,
            _ => {}
        }

        let mut has_seq_input = false;
        let mut seq_input_defined = false;
        for &slot in &component.inputs {
            let flags = flow.input_flags(slot);
            let defined = state
                .value(usize::from(slot))
                .is_some_and(|v| !v.is_undefined());
            if flags.is_seq() {
                has_seq_input = true;
                seq_input_defined |= defined;
            } else if !flags.is_optional() && !defined {
                return false;
            }
        }
        !has_seq_input || seq_input_defined
    }

    /// Appends an entry for the component.
    ///
    /// Non-continuous entries are reported to the debugger. A full queue is an error for the
    /// caller to raise.
    pub fn add_to_queue(
        &mut self,
        id: FlowStateId,
        component_index: usize,
        source: Option<(usize, usize)>,
        target_input: Option<usize>,
        continuous: bool,
    ) -> Result<(), FlowError> {
        self.enqueue(id, component_index, continuous, !continuous)?;
        if !continuous {
            self.debugger
                .on_add_to_queue(id, source, component_index, target_input);
        }
        Ok(())
    }

    /// Re-queues a component that is polling a collaborator.
    ///
    /// The entry is gated by the debugger like any other, but neither its addition nor its
    /// removal is reported, so a long wait does not flood the client.
    pub(crate) fn requeue_waiting(
        &mut self,
        id: FlowStateId,
        component_index: usize,
    ) -> Result<(), FlowError> {
        self.enqueue(id, component_index, false, false)
    }

    fn enqueue(
        &mut self,
        id: FlowStateId,
        component_index: usize,
        continuous: bool,
        announced: bool,
    ) -> Result<(), FlowError> {
        let state = self
            .flow_states
            .get_mut(id)
            .ok_or(RuntimeError::StaleFlowState(id))?;
        self.queue.push(QueueEntry {
            flow_state: id,
            component_index,
            continuous,
            announced,
        })?;
        state.queued += 1;
        tracing::trace!(flow_state = %id, component = component_index, continuous, "queued");
        Ok(())
    }

    /// Enqueues the component if it is ready to run.
    pub fn ping_component(
        &mut self,
        id: FlowStateId,
        component_index: usize,
        source: Option<(usize, usize)>,
        target_input: Option<usize>,
    ) -> Result<(), FlowError> {
        if self.is_component_ready_to_run(id, component_index) {
            self.add_to_queue(id, component_index, source, target_input, false)?;
        }
        Ok(())
    }

    /// Clears the sequence inputs of the component currently executing in `id`.
    ///
    /// Output components keep theirs. The executing marker is cleared either way.
    pub fn reset_sequence_inputs(&mut self, id: FlowStateId) {
        let Some(state) = self.flow_states.get_mut(id) else {
            return;
        };
        let Some(component_index) = state.executing_component.take() else {
            return;
        };
        let Some(flow) = self.definition.flow(state.flow_index()) else {
            return;
        };
        let Some(component) = flow.components.get(component_index) else {
            return;
        };
        if component.type_tag == component_type::OUTPUT {
            return;
        }
        for &slot in &component.inputs {
            if !flow.input_flags(slot).is_seq() {
                continue;
            }
            let slot = usize::from(slot);
            if let Some(value) = state.values.get_mut(slot)
                && !value.is_undefined()
            {
                *value = Value::Undefined;
                self.debugger
                    .on_value_changed(Some(id), slot, &Value::Undefined);
            }
        }
    }

    /// Sends `value` along every connection of output `output` and pings the targets.
    pub fn propagate_value(
        &mut self,
        id: FlowStateId,
        component_index: usize,
        output: usize,
        value: Value,
    ) -> Result<(), FlowError> {
        self.reset_sequence_inputs(id);
        let definition = Rc::clone(&self.definition);
        let component = self.component(&definition, id, component_index)?;
        let connections = &component
            .outputs
            .get(output)
            .ok_or(RuntimeError::InvalidOutput {
                component: component_index,
                output,
            })?
            .connections;
        for connection in connections {
            let slot = usize::from(connection.target_input);
            let state = self
                .flow_states
                .get_mut(id)
                .ok_or(RuntimeError::StaleFlowState(id))?;
            let target = state
                .values
                .get_mut(slot)
                .ok_or(RuntimeError::InvalidSlot(slot))?;
            if *target != value {
                *target = value.clone();
                self.debugger.on_value_changed(Some(id), slot, &value);
            }
            self.ping_component(
                id,
                usize::from(connection.target_component),
                Some((component_index, output)),
                Some(slot),
            )?;
        }
        Ok(())
    }

    /// Fires the component's sequence output with `null`. Does nothing without one.
    pub fn propagate_through_seqout(
        &mut self,
        id: FlowStateId,
        component_index: usize,
    ) -> Result<(), FlowError> {
        let definition = Rc::clone(&self.definition);
        let component = self.component(&definition, id, component_index)?;
        match component.seq_out() {
            Some(output) => self.propagate_value(id, component_index, output, Value::Null),
            None => Ok(()),
        }
    }

    /// Stores `value` through an assignment target produced by an assignable evaluation.
    pub fn assign_value(
        &mut self,
        id: FlowStateId,
        component_index: usize,
        target: &Value,
        value: Value,
    ) -> Result<(), FlowError> {
        match target {
            Value::FlowOutput(output) => {
                self.propagate_value(id, component_index, usize::from(*output), value)
            }
            Value::NativeVariable(native) => {
                self.host.set_native_variable(*native, value)?;
                Ok(())
            }
            Value::ArrayElement(element) => {
                let array = element.array();
                if value.references_array(array) {
                    return Err(FlowError::message(
                        "Can not assign an array into one of its own elements",
                    ));
                }
                let out_of_bounds =
                    || FlowError::message("Can not assign, array element index out of bounds");
                let current = array.get(element.index()).ok_or_else(out_of_bounds)?;
                let coerced = coerce(&current, &value)?;
                array.set(element.index(), coerced).ok_or_else(out_of_bounds)?;
                self.report_array_changed(id, array);
                Ok(())
            }
            Value::Slot(SlotRef::Local(slot)) => {
                let slot = usize::try_from(*slot).unwrap_or(usize::MAX);
                let state = self
                    .flow_states
                    .get_mut(id)
                    .ok_or(RuntimeError::StaleFlowState(id))?;
                let current = state
                    .values
                    .get_mut(slot)
                    .ok_or(RuntimeError::InvalidSlot(slot))?;
                *current = coerce(current, &value)?;
                self.debugger.on_value_changed(Some(id), slot, current);
                Ok(())
            }
            Value::Slot(SlotRef::Global(index)) => {
                let index = usize::try_from(*index).unwrap_or(usize::MAX);
                let current = self
                    .globals
                    .get_mut(index)
                    .ok_or(RuntimeError::InvalidSlot(index))?;
                *current = coerce(current, &value)?;
                self.debugger.on_value_changed(None, index, current);
                Ok(())
            }
            other => Err(EvalError::NotAssignable(other.kind()).into()),
        }
    }

    /// Reports the variable holding `array` as changed: the first local of `id` or global whose
    /// value is, or contains, the array.
    fn report_array_changed(&mut self, id: FlowStateId, array: &Rc<ArrayValue>) {
        let local = self.flow_states.get(id).and_then(|state| {
            state
                .values
                .iter()
                .enumerate()
                .find(|(_, v)| v.references_array(array))
        });
        if let Some((slot, value)) = local {
            self.debugger.on_value_changed(Some(id), slot, value);
            return;
        }
        let global = self
            .globals
            .iter()
            .enumerate()
            .find(|(_, v)| v.references_array(array));
        if let Some((index, value)) = global {
            self.debugger.on_value_changed(None, index, value);
        }
    }
}

fn coerce(current: &Value, value: &Value) -> Result<Value, FlowError> {
    current.coerce_for_assignment(value).map_err(|_| {
        FlowError::message(format!(
            "Can not assign {} to {}",
            value.kind(),
            current.kind()
        ))
    })
}
