// Copyright 2026 the Execution Tape Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Expression evaluation against a flow instance.

use alloc::rc::Rc;

use flow_expr::eval::{EvalContext, Evaluated};
use flow_expr::ops::OperationEnv;
use flow_expr::value::{SlotRef, Value};

use crate::flow_state::{FlowState, FlowStateId};
use crate::host::Host;
use crate::runtime::{FlowError, Runtime, RuntimeError};
use crate::template::FlowDefinition;

/// What an expression evaluated in one instance can see.
///
/// Built from disjoint borrows of the runtime so the evaluator can be borrowed mutably at the
/// same time.
pub(crate) struct InstanceContext<'a, H: Host> {
    host: &'a mut H,
    definition: &'a FlowDefinition,
    globals: &'a [Value],
    state: &'a FlowState,
    input_count: usize,
}

impl<H: Host> EvalContext for InstanceContext<'_, H> {
    fn constant(&self, index: u16) -> Option<Value> {
        self.definition.constants.get(usize::from(index)).cloned()
    }

    fn input(&self, index: u16) -> Option<Value> {
        let index = usize::from(index);
        if index < self.input_count {
            self.state.value(index).cloned()
        } else {
            None
        }
    }

    fn input_count(&self) -> u32 {
        u32::try_from(self.input_count).unwrap_or(u32::MAX)
    }

    fn global_count(&self) -> u32 {
        u32::try_from(self.globals.len()).unwrap_or(u32::MAX)
    }

    fn slot(&self, slot: SlotRef) -> Option<Value> {
        match slot {
            SlotRef::Local(i) => self.state.value(usize::try_from(i).ok()?).cloned(),
            SlotRef::Global(i) => self.globals.get(usize::try_from(i).ok()?).cloned(),
        }
    }

    fn native_variable(&mut self, id: u16) -> Value {
        self.host.native_variable(id)
    }
}

impl<H: Host> Runtime<H> {
    fn run_evaluator(
        &mut self,
        id: FlowStateId,
        instructions: &[u8],
        assignable: bool,
    ) -> Result<Evaluated, FlowError> {
        let Self {
            host,
            definition,
            globals,
            flow_states,
            operations,
            evaluator,
            ..
        } = self;
        let state = flow_states
            .get(id)
            .ok_or(RuntimeError::StaleFlowState(id))?;
        let input_count = definition
            .flow(state.flow_index())
            .map_or(0, |flow| flow.input_count());
        let mut ctx = InstanceContext {
            host,
            definition: &**definition,
            globals: globals.as_slice(),
            state,
            input_count,
        };
        let evaluated = if assignable {
            evaluator.evaluate_assignable(operations, &mut ctx, instructions)?
        } else {
            evaluator.evaluate(operations, &mut ctx, instructions)?
        };
        Ok(evaluated)
    }

    /// Evaluates an instruction stream in instance `id`.
    ///
    /// `consumed` in the result lets callers walk streams that embed several expressions.
    pub fn evaluate(&mut self, id: FlowStateId, instructions: &[u8]) -> Result<Evaluated, FlowError> {
        self.run_evaluator(id, instructions, false)
    }

    /// Evaluates an instruction stream that must produce an assignment target.
    pub fn evaluate_assignable(
        &mut self,
        id: FlowStateId,
        instructions: &[u8],
    ) -> Result<Evaluated, FlowError> {
        self.run_evaluator(id, instructions, true)
    }

    fn property(
        definition: &FlowDefinition,
        flow_index: usize,
        component_index: usize,
        property: usize,
    ) -> Result<&[u8], RuntimeError> {
        definition
            .component(flow_index, component_index)
            .and_then(|c| c.properties.get(property))
            .map(alloc::vec::Vec::as_slice)
            .ok_or(RuntimeError::MissingProperty {
                component: component_index,
                property,
            })
    }

    /// Evaluates property `property` of the component.
    pub fn eval_property(
        &mut self,
        id: FlowStateId,
        component_index: usize,
        property: usize,
    ) -> Result<Value, FlowError> {
        let definition = Rc::clone(&self.definition);
        let flow_index = self.state(id)?.flow_index();
        let instructions = Self::property(&definition, flow_index, component_index, property)?;
        Ok(self.evaluate(id, instructions)?.value)
    }

    /// Evaluates property `property` of the component as an assignment target.
    pub fn eval_assignable_property(
        &mut self,
        id: FlowStateId,
        component_index: usize,
        property: usize,
    ) -> Result<Value, FlowError> {
        let definition = Rc::clone(&self.definition);
        let flow_index = self.state(id)?.flow_index();
        let instructions = Self::property(&definition, flow_index, component_index, property)?;
        Ok(self.evaluate_assignable(id, instructions)?.value)
    }

    /// Calls entry `index` of the operation table directly.
    pub fn run_operation(&self, index: u16, args: &[Value]) -> Result<Value, FlowError> {
        let entry = self
            .operations
            .get(index)
            .ok_or(flow_expr::eval::EvalError::InvalidOperation(index))?;
        Ok((entry.func)(args, &OperationEnv::default())?)
    }
}
