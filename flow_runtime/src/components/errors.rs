// Copyright 2026 the Execution Tape Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Error and catch-error components.

use alloc::string::ToString;

use crate::execution_state::ComponentExecutionState;
use crate::flow_state::FlowStateId;
use crate::host::Host;
use crate::runtime::{FlowError, Runtime};
use crate::template::property;

/// Raises the evaluated message as a flow error.
pub(crate) fn execute_error<H: Host>(
    rt: &mut Runtime<H>,
    id: FlowStateId,
    component_index: usize,
) -> Result<(), FlowError> {
    let message = rt.eval_property(id, component_index, property::ERROR_MESSAGE)?;
    Err(FlowError::message(message.to_string()))
}

/// Forwards a caught error message on output 1, then fires the sequence output.
pub(crate) fn execute_catch_error<H: Host>(
    rt: &mut Runtime<H>,
    id: FlowStateId,
    component_index: usize,
) -> Result<(), FlowError> {
    let Some(ComponentExecutionState::CatchError { message }) =
        rt.take_execution_state(id, component_index)
    else {
        return Ok(());
    };
    rt.propagate_value(id, component_index, 1, message)?;
    rt.propagate_through_seqout(id, component_index)
}
