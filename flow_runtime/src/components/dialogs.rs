// Copyright 2026 the Execution Tape Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Dialog components: message box, keyboard and keypad.
//!
//! Each one opens its dialog through a `Host::show_*` hook and parks in
//! [`DialogPhase::Awaiting`] inside an async bracket. [`Runtime::complete_dialog`] stores the
//! outcome and re-queues the component, which then routes the result and closes the bracket.

use alloc::format;
use alloc::string::{String, ToString};
use alloc::vec::Vec;

use flow_expr::value::Value;

use crate::execution_state::{ComponentExecutionState, DialogPhase, DialogState};
use crate::flow_state::FlowStateId;
use crate::host::{DialogResult, Host, KeyboardRequest, KeypadRequest, MessageBoxRequest};
use crate::runtime::{FlowError, Runtime};
use crate::template::{ComponentPayload, MessageBoxKind, property};

/// Output carrying the confirmed keyboard or keypad value.
const OK_OUTPUT: usize = 0;
/// Output fired with `null` when the keyboard or keypad is cancelled.
const CANCEL_OUTPUT: usize = 1;

enum Step {
    Open,
    Waiting,
    Closed(DialogResult),
}

fn step<H: Host>(rt: &mut Runtime<H>, id: FlowStateId, component_index: usize) -> Step {
    match rt.execution_state(id, component_index) {
        Some(ComponentExecutionState::Dialog(DialogState {
            phase: DialogPhase::Awaiting,
            ..
        })) => return Step::Waiting,
        Some(ComponentExecutionState::Dialog(DialogState {
            phase: DialogPhase::Completed(_),
            ..
        })) => {}
        _ => return Step::Open,
    }
    match rt.take_execution_state(id, component_index) {
        Some(ComponentExecutionState::Dialog(DialogState {
            phase: DialogPhase::Completed(result),
            ..
        })) => Step::Closed(result),
        _ => Step::Open,
    }
}

/// Routes a dialog outcome, then ends the async bracket even when routing failed.
fn close<H: Host>(
    rt: &mut Runtime<H>,
    id: FlowStateId,
    component_index: usize,
    route: impl FnOnce(&mut Runtime<H>) -> Result<(), FlowError>,
) -> Result<(), FlowError> {
    let routed = route(rt);
    rt.end_async_execution(id, component_index)?;
    routed
}

pub(crate) fn execute_show_message_box<H: Host>(
    rt: &mut Runtime<H>,
    id: FlowStateId,
    component_index: usize,
) -> Result<(), FlowError> {
    let definition = rt.definition();
    let component = rt.component(&definition, id, component_index)?;
    let ComponentPayload::MessageBox { kind } = component.payload else {
        return Err(FlowError::message("ShowMessageBox: missing kind"));
    };

    match step(rt, id, component_index) {
        Step::Waiting => Ok(()),
        Step::Closed(result) => close(rt, id, component_index, |rt| match (kind, result) {
            (MessageBoxKind::Question, DialogResult::Button(button)) => {
                if button + 1 < component.outputs.len() {
                    rt.propagate_value(id, component_index, button, Value::Null)
                } else {
                    Ok(())
                }
            }
            (MessageBoxKind::Question, _) => Ok(()),
            _ => rt.propagate_through_seqout(id, component_index),
        }),
        Step::Open => {
            let message = rt
                .eval_property(id, component_index, property::SHOW_MESSAGE_BOX_MESSAGE)?
                .to_string();
            let request = match kind {
                MessageBoxKind::Info => MessageBoxRequest::Info { message },
                MessageBoxKind::Error => MessageBoxRequest::Error { message },
                MessageBoxKind::Question => {
                    let buttons =
                        rt.eval_property(id, component_index, property::SHOW_MESSAGE_BOX_BUTTONS)?;
                    MessageBoxRequest::Question {
                        message,
                        buttons: button_labels(&buttons)?,
                    }
                }
            };
            let ticket = rt.open_dialog(id, component_index)?;
            rt.host_mut().show_message_box(ticket, request);
            Ok(())
        }
    }
}

fn button_labels(buttons: &Value) -> Result<Vec<String>, FlowError> {
    let array = buttons
        .as_array()
        .ok_or_else(|| FlowError::message("Buttons in ShowMessageBox is not an array"))?;
    array
        .to_vec()
        .iter()
        .enumerate()
        .map(|(index, button)| {
            button.as_str().map(String::from).ok_or_else(|| {
                FlowError::message(format!(
                    "Element at index {index} is not a string in Buttons array in ShowMessageBox"
                ))
            })
        })
        .collect()
}

pub(crate) fn execute_show_keyboard<H: Host>(
    rt: &mut Runtime<H>,
    id: FlowStateId,
    component_index: usize,
) -> Result<(), FlowError> {
    match step(rt, id, component_index) {
        Step::Waiting => Ok(()),
        Step::Closed(result) => close(rt, id, component_index, |rt| match result {
            DialogResult::Value(text) => rt.propagate_value(id, component_index, OK_OUTPUT, text),
            _ => rt.propagate_value(id, component_index, CANCEL_OUTPUT, Value::Null),
        }),
        Step::Open => {
            let definition = rt.definition();
            let password = matches!(
                rt.component(&definition, id, component_index)?.payload,
                ComponentPayload::Keyboard { password: true }
            );
            let mut label = rt
                .eval_property(id, component_index, property::SHOW_KEYBOARD_LABEL)?
                .to_string();
            if !label.is_empty() {
                label.push_str(": ");
            }
            let request = KeyboardRequest {
                label,
                initial_text: rt
                    .eval_property(id, component_index, property::SHOW_KEYBOARD_INITIAL_TEXT)?
                    .to_string(),
                min_chars: rt
                    .eval_property(id, component_index, property::SHOW_KEYBOARD_MIN_CHARS)?
                    .to_int32()?,
                max_chars: rt
                    .eval_property(id, component_index, property::SHOW_KEYBOARD_MAX_CHARS)?
                    .to_int32()?,
                password,
            };
            let ticket = rt.open_dialog(id, component_index)?;
            rt.host_mut().show_keyboard(ticket, request);
            Ok(())
        }
    }
}

pub(crate) fn execute_show_keypad<H: Host>(
    rt: &mut Runtime<H>,
    id: FlowStateId,
    component_index: usize,
) -> Result<(), FlowError> {
    match step(rt, id, component_index) {
        Step::Waiting => Ok(()),
        Step::Closed(result) => close(rt, id, component_index, |rt| match result {
            DialogResult::Value(value) => {
                let value = Value::Float(value.to_float()?);
                rt.propagate_value(id, component_index, OK_OUTPUT, value)
            }
            _ => rt.propagate_value(id, component_index, CANCEL_OUTPUT, Value::Null),
        }),
        Step::Open => {
            let mut number = |index| -> Result<f32, FlowError> {
                Ok(rt.eval_property(id, component_index, index)?.to_float()?)
            };
            let initial = number(property::SHOW_KEYPAD_INITIAL_VALUE)?;
            let min = number(property::SHOW_KEYPAD_MIN)?;
            let max = number(property::SHOW_KEYPAD_MAX)?;
            let precision = number(property::SHOW_KEYPAD_PRECISION)?;
            let request = KeypadRequest {
                label: rt
                    .eval_property(id, component_index, property::SHOW_KEYPAD_LABEL)?
                    .to_string(),
                initial,
                min,
                max,
                precision,
                unit: rt
                    .eval_property(id, component_index, property::SHOW_KEYPAD_UNIT)?
                    .to_string(),
            };
            let ticket = rt.open_dialog(id, component_index)?;
            rt.host_mut().show_keypad(ticket, request);
            Ok(())
        }
    }
}
