// Copyright 2026 the Execution Tape Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Straight-line components: start, eval-expr, set-variable, constant, log, show-page, noop,
//! comment, on-event and sort-array.

use alloc::format;
use alloc::rc::Rc;
use alloc::string::ToString;
use core::cmp::Ordering;

use flow_expr::ops::compare_values;
use flow_expr::value::Value;

use crate::components::VALUE_OUTPUT;
use crate::execution_state::ComponentExecutionState;
use crate::flow_state::FlowStateId;
use crate::host::{Host, LogSeverity};
use crate::runtime::{FlowError, Runtime};
use crate::template::{ComponentPayload, SORT_ASCENDING, SORT_IGNORE_CASE, property};

pub(crate) fn execute_start<H: Host>(
    rt: &mut Runtime<H>,
    id: FlowStateId,
    component_index: usize,
) -> Result<(), FlowError> {
    rt.propagate_through_seqout(id, component_index)
}

pub(crate) fn execute_noop<H: Host>(
    rt: &mut Runtime<H>,
    id: FlowStateId,
    component_index: usize,
) -> Result<(), FlowError> {
    rt.propagate_through_seqout(id, component_index)
}

pub(crate) fn execute_comment<H: Host>(
    _rt: &mut Runtime<H>,
    _id: FlowStateId,
    _component_index: usize,
) -> Result<(), FlowError> {
    Ok(())
}

pub(crate) fn execute_eval_expr<H: Host>(
    rt: &mut Runtime<H>,
    id: FlowStateId,
    component_index: usize,
) -> Result<(), FlowError> {
    let value = rt.eval_property(id, component_index, property::EVAL_EXPR_EXPRESSION)?;
    rt.propagate_value(id, component_index, VALUE_OUTPUT, value)
}

pub(crate) fn execute_constant<H: Host>(
    rt: &mut Runtime<H>,
    id: FlowStateId,
    component_index: usize,
) -> Result<(), FlowError> {
    let value = rt.eval_property(id, component_index, property::CONSTANT_VALUE)?;
    rt.propagate_value(id, component_index, VALUE_OUTPUT, value)
}

/// Properties come in pairs: an assignable target followed by the value to store.
pub(crate) fn execute_set_variable<H: Host>(
    rt: &mut Runtime<H>,
    id: FlowStateId,
    component_index: usize,
) -> Result<(), FlowError> {
    let definition = rt.definition();
    let pairs = rt.component(&definition, id, component_index)?.properties.len() / 2;
    for pair in 0..pairs {
        let target = rt.eval_assignable_property(id, component_index, 2 * pair)?;
        let value = rt.eval_property(id, component_index, 2 * pair + 1)?;
        rt.assign_value(id, component_index, &target, value)?;
    }
    rt.propagate_through_seqout(id, component_index)
}

pub(crate) fn execute_log<H: Host>(
    rt: &mut Runtime<H>,
    id: FlowStateId,
    component_index: usize,
) -> Result<(), FlowError> {
    let value = rt.eval_property(id, component_index, property::LOG_VALUE)?;
    rt.log(id, component_index, LogSeverity::Info, &value.to_string());
    rt.propagate_through_seqout(id, component_index)
}

pub(crate) fn execute_show_page<H: Host>(
    rt: &mut Runtime<H>,
    id: FlowStateId,
    component_index: usize,
) -> Result<(), FlowError> {
    let page = rt
        .eval_property(id, component_index, property::SHOW_PAGE_PAGE)?
        .to_int32()?;
    rt.host_mut().replace_page(page);
    rt.debugger_mut().on_page_changed(page);
    rt.propagate_through_seqout(id, component_index)
}

/// Forwards the event stored by [`Runtime::on_event`]: sequence output first, then the event
/// value on output 1 when the component has one.
pub(crate) fn execute_on_event<H: Host>(
    rt: &mut Runtime<H>,
    id: FlowStateId,
    component_index: usize,
) -> Result<(), FlowError> {
    let Some(ComponentExecutionState::Event(value)) = rt.take_execution_state(id, component_index)
    else {
        return Ok(());
    };
    rt.propagate_through_seqout(id, component_index)?;
    let definition = rt.definition();
    if rt.component(&definition, id, component_index)?.outputs.len() > 1 {
        rt.propagate_value(id, component_index, 1, value)?;
    }
    Ok(())
}

/// Sorts a copy of the input array and emits it on the last output.
pub(crate) fn execute_sort_array<H: Host>(
    rt: &mut Runtime<H>,
    id: FlowStateId,
    component_index: usize,
) -> Result<(), FlowError> {
    let definition = rt.definition();
    let component = rt.component(&definition, id, component_index)?;
    let ComponentPayload::SortArray {
        array_type,
        struct_field_index,
        flags,
    } = component.payload
    else {
        return Err(FlowError::message("SortArray: missing sort options"));
    };
    let value = rt.eval_property(id, component_index, property::SORT_ARRAY_ARRAY)?;
    let Value::Array(array) = value else {
        return Err(FlowError::message(format!(
            "SortArray: {} is not an array",
            value.kind()
        )));
    };
    if array.array_type() != array_type {
        return Err(FlowError::message("SortArray: invalid array type"));
    }

    let field = usize::try_from(struct_field_index).ok();
    let ascending = flags & SORT_ASCENDING != 0;
    let ignore_case = flags & SORT_IGNORE_CASE != 0;
    let sorted = Rc::new(array.deep_clone());
    sorted.sort_by(|a, b| {
        let ordering = match field {
            Some(field) => compare_elements(&field_of(a, field), &field_of(b, field), ignore_case),
            None => compare_elements(a, b, ignore_case),
        };
        if ascending {
            ordering
        } else {
            ordering.reverse()
        }
    });

    let last = component.outputs.len().saturating_sub(1);
    rt.propagate_value(id, component_index, last, Value::Array(sorted))
}

fn field_of(element: &Value, field: usize) -> Value {
    element
        .as_array()
        .and_then(|fields| fields.get(field))
        .unwrap_or_default()
}

fn compare_elements(a: &Value, b: &Value, ignore_case: bool) -> Ordering {
    if ignore_case && let (Some(a), Some(b)) = (a.as_str(), b.as_str()) {
        return a
            .chars()
            .flat_map(char::to_lowercase)
            .cmp(b.chars().flat_map(char::to_lowercase));
    }
    compare_values("sort", a, b).unwrap_or(Ordering::Equal)
}

#[cfg(test)]
mod tests {
    extern crate std;

    use super::*;
    use crate::components::test_support::{RecordingHost, constant, data, expr, run_ticks, seq, start};
    use crate::template::{
        Component, ComponentOutput, Flow, FlowDefinition, InputFlags, component_type as t,
    };
    use alloc::vec;
    use alloc::vec::Vec;

    #[test]
    fn set_variable_assigns_pairs_then_continues() {
        // start -> set(l0 := 5, l1 := "a") -> log(l0)
        let def = FlowDefinition {
            flows: vec![Flow {
                components: vec![
                    Component::new(t::START).with_output(seq(1, 0)),
                    Component::new(t::SET_VARIABLE)
                        .with_inputs(vec![0])
                        .with_output(seq(2, 1))
                        .with_property(expr(|b| {
                            b.push_local(0);
                        }))
                        .with_property(constant(0))
                        .with_property(expr(|b| {
                            b.push_local(1);
                        }))
                        .with_property(constant(1)),
                    Component::new(t::LOG)
                        .with_inputs(vec![1])
                        .with_property(expr(|b| {
                            b.push_local(0);
                        })),
                ],
                component_inputs: vec![InputFlags::SEQUENCE, InputFlags::SEQUENCE],
                local_variables: vec![Value::Int32(0), Value::Undefined],
            }],
            constants: vec![Value::Int32(5), Value::string("a")],
            globals: vec![],
        };
        let (mut rt, root) = start(def, RecordingHost::default());
        run_ticks(&mut rt, 3);
        assert_eq!(rt.host().log_texts(), ["5"]);
        let state = rt.flow_state(root).unwrap();
        assert_eq!(state.value(3), Some(&Value::string("a")));
    }

    #[test]
    fn eval_expr_and_constant_emit_on_output_one() {
        let def = FlowDefinition {
            flows: vec![Flow {
                components: vec![
                    Component::new(t::CONSTANT)
                        .with_output(ComponentOutput::seq(vec![]))
                        .with_output(data(2, 0))
                        .with_property(constant(0)),
                    Component::new(t::EVAL_EXPR)
                        .with_output(ComponentOutput::seq(vec![]))
                        .with_output(data(2, 1))
                        .with_property(expr(|b| {
                            b.push_constant(0).push_constant(0).operation(flow_expr::ops::op::MUL);
                        })),
                    Component::new(t::COMMENT).with_inputs(vec![0, 1]),
                ],
                component_inputs: vec![InputFlags::DATA, InputFlags::DATA],
                local_variables: vec![],
            }],
            constants: vec![Value::Int32(6)],
            globals: vec![],
        };
        let (mut rt, root) = start(def, RecordingHost::default());
        run_ticks(&mut rt, 1);
        let state = rt.flow_state(root).unwrap();
        assert_eq!(state.value(0), Some(&Value::Int32(6)));
        assert_eq!(state.value(1), Some(&Value::Int32(36)));
    }

    #[test]
    fn show_page_replaces_the_page() {
        let def = FlowDefinition {
            flows: vec![Flow {
                components: vec![Component::new(t::SHOW_PAGE).with_property(constant(0))],
                ..Flow::default()
            }],
            constants: vec![Value::Int32(3)],
            globals: vec![],
        };
        let (mut rt, _) = start(def, RecordingHost::default());
        rt.tick();
        assert_eq!(rt.host().pages, [3]);
    }

    fn sorted(flags: u32, field: i32, input: Value) -> Vec<Value> {
        let def = FlowDefinition {
            flows: vec![Flow {
                components: vec![
                    Component::new(t::SORT_ARRAY)
                        .with_output(seq(1, 1))
                        .with_output(data(1, 0))
                        .with_property(constant(0))
                        .with_payload(ComponentPayload::SortArray {
                            array_type: 7,
                            struct_field_index: field,
                            flags,
                        }),
                    Component::new(t::COMMENT).with_inputs(vec![0, 1]),
                ],
                component_inputs: vec![InputFlags::DATA, InputFlags::SEQUENCE],
                local_variables: vec![],
            }],
            constants: vec![input],
            globals: vec![],
        };
        let (mut rt, root) = start(def, RecordingHost::default());
        rt.tick();
        assert!(rt.host().errors.is_empty(), "{:?}", rt.host().errors);
        rt.flow_state(root).unwrap().value(0).unwrap().as_array().unwrap().to_vec()
    }

    #[test]
    fn sort_array_sorts_a_copy() {
        let input = Value::array(7, vec![Value::Int32(3), Value::Int32(1), Value::Int32(2)]);
        let original = input.as_array().map(|a| a.to_vec());
        assert_eq!(
            sorted(SORT_ASCENDING, -1, input.clone()),
            [Value::Int32(1), Value::Int32(2), Value::Int32(3)]
        );
        assert_eq!(sorted(0, -1, input.clone()), [Value::Int32(3), Value::Int32(2), Value::Int32(1)]);
        assert_eq!(input.as_array().map(|a| a.to_vec()), original);
    }

    #[test]
    fn sort_array_by_struct_field_ignoring_case() {
        let row = |name: &str| Value::array(1, vec![Value::string(name)]);
        let input = Value::array(7, vec![row("b"), row("C"), row("a")]);
        let names: Vec<Value> = sorted(SORT_ASCENDING | SORT_IGNORE_CASE, 0, input)
            .iter()
            .map(|row| field_of(row, 0))
            .collect();
        assert_eq!(names, [Value::string("a"), Value::string("b"), Value::string("C")]);
    }
}
