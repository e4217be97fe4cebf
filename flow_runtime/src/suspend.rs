// Copyright 2026 the Execution Tape Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Async suspension and collaborator mailboxes.
//!
//! A component that waits on a collaborator brackets the wait with
//! [`Runtime::start_async_execution`] and [`Runtime::end_async_execution`] so its instance is not
//! freed underneath it. Collaborators report back through the mailbox methods here; none of them
//! touches component logic directly. The waiting component observes the result the next time the
//! scheduler runs it.

use alloc::rc::Rc;
use alloc::string::ToString;

use crate::components::mqtt::{MqttEvent, MqttHandle};
use crate::execution_state::{ComponentExecutionState, DialogPhase, DialogState};
use crate::flow_state::FlowStateId;
use crate::host::{DialogResult, DialogTicket, FlowEvent, Host};
use crate::runtime::{FlowError, Runtime, RuntimeError};
use crate::template::{ComponentPayload, component_type};

/// The single in-flight SCPI request.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub(crate) struct ScpiMailbox {
    /// Component that issued the request.
    pub(crate) waiter: Option<(FlowStateId, usize)>,
    /// The interpreter signalled completion.
    pub(crate) result_ready: bool,
}

impl<H: Host> Runtime<H> {
    /// Marks the component as waiting on a collaborator.
    pub fn start_async_execution(
        &mut self,
        id: FlowStateId,
        component_index: usize,
    ) -> Result<(), RuntimeError> {
        let state = self.state_mut(id)?;
        let flag = state
            .async_flags
            .get_mut(component_index)
            .ok_or(RuntimeError::InvalidComponent {
                flow_state: id,
                component: component_index,
            })?;
        if !*flag {
            *flag = true;
            state.num_async += 1;
        }
        Ok(())
    }

    /// Ends the component's wait and frees the instance if that finished it.
    pub fn end_async_execution(
        &mut self,
        id: FlowStateId,
        component_index: usize,
    ) -> Result<(), RuntimeError> {
        let state = self.state_mut(id)?;
        if let Some(flag) = state.async_flags.get_mut(component_index)
            && *flag
        {
            *flag = false;
            state.num_async = state.num_async.saturating_sub(1);
        }
        if self.can_free(id) {
            self.free_flow_state(id)?;
        }
        Ok(())
    }

    /// Signals that the pending SCPI request finished. The result is read with
    /// [`Host::latest_scpi_result`] when the waiting component runs again.
    pub fn scpi_result_is_ready(&mut self) {
        if self.scpi.waiter.is_some() {
            self.scpi.result_ready = true;
        }
    }

    /// Component waiting on the SCPI interpreter, if any.
    #[inline]
    #[must_use]
    pub fn scpi_waiter(&self) -> Option<(FlowStateId, usize)> {
        self.scpi.waiter
    }

    /// Allocates a dialog ticket for the component and starts its async bracket.
    pub(crate) fn open_dialog(
        &mut self,
        id: FlowStateId,
        component_index: usize,
    ) -> Result<DialogTicket, FlowError> {
        let ticket = DialogTicket(self.next_dialog_ticket);
        self.next_dialog_ticket = self.next_dialog_ticket.wrapping_add(1);
        self.set_execution_state(
            id,
            component_index,
            ComponentExecutionState::Dialog(DialogState {
                ticket,
                phase: DialogPhase::Awaiting,
            }),
        )?;
        self.start_async_execution(id, component_index)?;
        self.dialogs.insert(ticket, (id, component_index));
        Ok(ticket)
    }

    /// Delivers the outcome of a dialog opened through a `Host::show_*` hook.
    pub fn complete_dialog(
        &mut self,
        ticket: DialogTicket,
        result: DialogResult,
    ) -> Result<(), RuntimeError> {
        let (id, component_index) = self
            .dialogs
            .remove(&ticket)
            .ok_or(RuntimeError::UnknownDialog(ticket))?;
        match self.execution_state_mut(id, component_index) {
            Some(ComponentExecutionState::Dialog(dialog)) if dialog.ticket == ticket => {
                dialog.phase = DialogPhase::Completed(result);
            }
            _ => return Err(RuntimeError::UnknownDialog(ticket)),
        }
        if let Err(err) = self.add_to_queue(id, component_index, None, None, false) {
            self.throw_error(id, component_index, &err.to_string());
        }
        Ok(())
    }

    /// Enqueues every on-event component of `id` that listens for `event`.
    ///
    /// Returns how many components were enqueued.
    pub fn on_event(&mut self, id: FlowStateId, event: FlowEvent) -> Result<usize, RuntimeError> {
        let definition = Rc::clone(&self.definition);
        let flow_index = self.state(id)?.flow_index();
        let flow = definition
            .flow(flow_index)
            .ok_or(RuntimeError::InvalidFlowIndex(flow_index))?;
        let mut enqueued = 0;
        for (component_index, component) in flow.components.iter().enumerate() {
            let listens = component.type_tag == component_type::ON_EVENT
                && matches!(component.payload, ComponentPayload::OnEvent { event: kind } if kind == event.kind());
            if !listens {
                continue;
            }
            self.set_execution_state(
                id,
                component_index,
                ComponentExecutionState::Event(event.value()),
            )?;
            match self.add_to_queue(id, component_index, None, None, false) {
                Ok(()) => enqueued += 1,
                Err(err) => self.throw_error(id, component_index, &err.to_string()),
            }
        }
        Ok(enqueued)
    }

    /// Appends `event` to every MQTT event component listening on `handle`.
    ///
    /// Returns the number of listeners.
    pub fn deliver_mqtt_event(&mut self, handle: MqttHandle, event: &MqttEvent) -> usize {
        let mut listeners = 0;
        for state in self.flow_states.iter_mut() {
            for slot in state.execution_states.iter_mut().flatten() {
                if let ComponentExecutionState::MqttEvent(listener) = slot
                    && listener.handle == handle
                {
                    listener.events.push_back(event.clone());
                    listeners += 1;
                }
            }
        }
        tracing::trace!(handle = handle.0, listeners, "mqtt event delivered");
        listeners
    }
}
