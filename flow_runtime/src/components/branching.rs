// Copyright 2026 the Execution Tape Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Branching components: switch, compare and is-true.

use core::cmp::Ordering;

use flow_expr::ops::{compare_values, values_equal};
use flow_expr::value::Value;

use crate::components::{FALSE_OUTPUT, TRUE_OUTPUT};
use crate::flow_state::FlowStateId;
use crate::host::Host;
use crate::runtime::{FlowError, Runtime};
use crate::template::{CompareOperator, ComponentPayload, property};

/// Fires the output of the first case whose condition holds.
pub(crate) fn execute_switch<H: Host>(
    rt: &mut Runtime<H>,
    id: FlowStateId,
    component_index: usize,
) -> Result<(), FlowError> {
    let definition = rt.definition();
    let component = rt.component(&definition, id, component_index)?;
    let ComponentPayload::Switch { outputs } = &component.payload else {
        return Err(FlowError::message("Switch: missing cases"));
    };
    for (case, &output) in outputs.iter().enumerate() {
        if rt.eval_property(id, component_index, case)?.to_bool() {
            return rt.propagate_value(id, component_index, usize::from(output), Value::Bool(true));
        }
    }
    Ok(())
}

pub(crate) fn execute_compare<H: Host>(
    rt: &mut Runtime<H>,
    id: FlowStateId,
    component_index: usize,
) -> Result<(), FlowError> {
    let definition = rt.definition();
    let ComponentPayload::Compare { operator } = rt.component(&definition, id, component_index)?.payload
    else {
        return Err(FlowError::message("Compare: missing operator"));
    };
    let a = rt.eval_property(id, component_index, property::COMPARE_A)?;
    let b = rt.eval_property(id, component_index, property::COMPARE_B)?;
    let holds = match operator {
        CompareOperator::Equal => values_equal(&a, &b),
        CompareOperator::NotEqual => !values_equal(&a, &b),
        CompareOperator::Less => compare_values("<", &a, &b)? == Ordering::Less,
        CompareOperator::Greater => compare_values(">", &a, &b)? == Ordering::Greater,
        CompareOperator::LessOrEqual => compare_values("<=", &a, &b)? != Ordering::Greater,
        CompareOperator::GreaterOrEqual => compare_values(">=", &a, &b)? != Ordering::Less,
        CompareOperator::Between => {
            let c = rt.eval_property(id, component_index, property::COMPARE_C)?;
            compare_values("between", &a, &b)? != Ordering::Less
                && compare_values("between", &a, &c)? != Ordering::Greater
        }
    };
    branch(rt, id, component_index, holds)
}

pub(crate) fn execute_is_true<H: Host>(
    rt: &mut Runtime<H>,
    id: FlowStateId,
    component_index: usize,
) -> Result<(), FlowError> {
    let holds = rt
        .eval_property(id, component_index, property::IS_TRUE_VALUE)?
        .to_bool();
    branch(rt, id, component_index, holds)
}

fn branch<H: Host>(
    rt: &mut Runtime<H>,
    id: FlowStateId,
    component_index: usize,
    holds: bool,
) -> Result<(), FlowError> {
    if holds {
        rt.propagate_value(id, component_index, TRUE_OUTPUT, Value::Bool(true))
    } else {
        rt.propagate_value(id, component_index, FALSE_OUTPUT, Value::Bool(false))
    }
}
