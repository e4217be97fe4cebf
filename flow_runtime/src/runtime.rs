// Copyright 2026 the Execution Tape Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The runtime context.
//!
//! [`Runtime`] owns everything a running flow program needs: the template, the instance arena,
//! the execution queue, the component registry, the debugger session and the collaborator
//! mailboxes. It is driven from outside by calling [`Runtime::tick`] in the host's main loop.
//!
//! The methods here cover construction, instance lifecycle, the tick loop and error routing.
//! Value propagation, expression evaluation and the suspension mailboxes live in sibling modules
//! as further `impl Runtime` blocks.

use alloc::boxed::Box;
use alloc::format;
use alloc::rc::Rc;
use alloc::string::ToString;
use alloc::vec::Vec;
use core::fmt;

use flow_expr::eval::{EvalError, Evaluator};
use flow_expr::ops::Operations;
use flow_expr::value::{ConversionError, Value};
use hashbrown::HashMap;

use crate::components;
use crate::config::RuntimeConfig;
use crate::debugger::{Debugger, DebuggerTransport};
use crate::execution_state::{ComponentExecutionState, DialogPhase};
use crate::flow_state::{FlowState, FlowStateArena, FlowStateId};
use crate::host::{DialogTicket, Host, HostError, LogSeverity};
use crate::queue::{ExecutionQueue, QueueEntry, QueueError};
use crate::registry::{ComponentExecutor, ComponentRegistry};
use crate::suspend::ScpiMailbox;
use crate::template::{Component, FlowDefinition, TemplateError, component_type};
use crate::trace::{TraceScope, TraceSink};

/// Errors of runtime bookkeeping.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RuntimeError {
    /// The handle refers to a destroyed instance.
    StaleFlowState(FlowStateId),
    /// The instance arena is full.
    OutOfFlowStates,
    /// No flow has this index.
    InvalidFlowIndex(usize),
    /// The instance's flow has no such component.
    InvalidComponent {
        /// Instance.
        flow_state: FlowStateId,
        /// Component index.
        component: usize,
    },
    /// The component has no such property.
    MissingProperty {
        /// Component index.
        component: usize,
        /// Property index.
        property: usize,
    },
    /// The component has no such output.
    InvalidOutput {
        /// Component index.
        component: usize,
        /// Output index.
        output: usize,
    },
    /// The instance has no such value slot.
    InvalidSlot(usize),
    /// No dialog is open under this ticket.
    UnknownDialog(DialogTicket),
    /// The template failed validation.
    Template(TemplateError),
    /// The execution queue rejected an entry.
    Queue(QueueError),
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::StaleFlowState(id) => write!(f, "Flow state {id} no longer exists"),
            Self::OutOfFlowStates => write!(f, "Out of flow states"),
            Self::InvalidFlowIndex(index) => write!(f, "Invalid flow index {index}"),
            Self::InvalidComponent {
                flow_state,
                component,
            } => write!(f, "Invalid component {component} in flow state {flow_state}"),
            Self::MissingProperty {
                component,
                property,
            } => write!(f, "Component {component} has no property {property}"),
            Self::InvalidOutput { component, output } => {
                write!(f, "Component {component} has no output {output}")
            }
            Self::InvalidSlot(slot) => write!(f, "Invalid value slot {slot}"),
            Self::UnknownDialog(ticket) => write!(f, "No dialog is open for ticket {}", ticket.0),
            Self::Template(err) => write!(f, "Invalid flow definition: {err}"),
            Self::Queue(err) => fmt::Display::fmt(err, f),
        }
    }
}

impl core::error::Error for RuntimeError {
    fn source(&self) -> Option<&(dyn core::error::Error + 'static)> {
        match self {
            Self::Template(err) => Some(err),
            Self::Queue(err) => Some(err),
            _ => None,
        }
    }
}

impl From<TemplateError> for RuntimeError {
    fn from(err: TemplateError) -> Self {
        Self::Template(err)
    }
}

impl From<QueueError> for RuntimeError {
    fn from(err: QueueError) -> Self {
        Self::Queue(err)
    }
}

/// Error returned by a component executor.
///
/// The dispatch boundary routes it through [`Runtime::throw_error`] using its `Display` text.
#[derive(Clone, Debug, PartialEq)]
pub enum FlowError {
    /// Expression evaluation failed.
    Eval(EvalError),
    /// Runtime bookkeeping failed.
    Runtime(RuntimeError),
    /// A host collaborator failed.
    Host(HostError),
    /// Component-specific failure.
    Message(Box<str>),
}

impl FlowError {
    /// Creates a [`FlowError::Message`].
    #[must_use]
    pub fn message(text: impl Into<Box<str>>) -> Self {
        Self::Message(text.into())
    }
}

impl fmt::Display for FlowError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Eval(err) => fmt::Display::fmt(err, f),
            Self::Runtime(err) => fmt::Display::fmt(err, f),
            Self::Host(err) => fmt::Display::fmt(err, f),
            Self::Message(text) => f.write_str(text),
        }
    }
}

impl core::error::Error for FlowError {
    fn source(&self) -> Option<&(dyn core::error::Error + 'static)> {
        match self {
            Self::Eval(err) => Some(err),
            Self::Runtime(err) => Some(err),
            Self::Host(err) => Some(err),
            Self::Message(_) => None,
        }
    }
}

impl From<EvalError> for FlowError {
    fn from(err: EvalError) -> Self {
        Self::Eval(err)
    }
}

impl From<ConversionError> for FlowError {
    fn from(err: ConversionError) -> Self {
        Self::Eval(EvalError::Conversion(err))
    }
}

impl From<RuntimeError> for FlowError {
    fn from(err: RuntimeError) -> Self {
        Self::Runtime(err)
    }
}

impl From<QueueError> for FlowError {
    fn from(err: QueueError) -> Self {
        Self::Runtime(RuntimeError::Queue(err))
    }
}

impl From<HostError> for FlowError {
    fn from(err: HostError) -> Self {
        Self::Host(err)
    }
}

/// What one [`Runtime::tick`] did.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct TickSummary {
    /// Entries popped and dispatched (or released, for errored instances).
    pub executed: usize,
    /// Queue length after the tick.
    pub remaining: usize,
    /// The debugger refused the next entry.
    pub gated: bool,
}

/// A flow program and everything it runs against.
pub struct Runtime<H: Host> {
    pub(crate) host: H,
    pub(crate) definition: Rc<FlowDefinition>,
    config: RuntimeConfig,
    pub(crate) globals: Vec<Value>,
    pub(crate) flow_states: FlowStateArena,
    roots: Vec<FlowStateId>,
    pub(crate) queue: ExecutionQueue,
    registry: ComponentRegistry<H>,
    pub(crate) operations: Operations,
    pub(crate) evaluator: Evaluator,
    pub(crate) debugger: Debugger,
    trace: Option<Box<dyn TraceSink>>,
    pub(crate) scpi: ScpiMailbox,
    pub(crate) dialogs: HashMap<DialogTicket, (FlowStateId, usize)>,
    pub(crate) next_dialog_ticket: u32,
    running: bool,
    in_tick: bool,
    stop_requested: bool,
}

impl<H: Host> fmt::Debug for Runtime<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("config", &self.config)
            .field("flow_states", &self.flow_states.len())
            .field("queue", &self.queue.len())
            .field("registry", &self.registry)
            .field("debugger", &self.debugger)
            .field("running", &self.running)
            .finish_non_exhaustive()
    }
}

impl<H: Host + 'static> Runtime<H> {
    /// Creates a runtime for `definition` with the built-in components registered.
    pub fn new(
        host: H,
        definition: FlowDefinition,
        config: RuntimeConfig,
    ) -> Result<Self, RuntimeError> {
        definition.validate()?;
        let mut registry = ComponentRegistry::new();
        components::register_builtins(&mut registry);
        let globals = definition.globals.clone();
        Ok(Self {
            host,
            definition: Rc::new(definition),
            config,
            globals,
            flow_states: FlowStateArena::new(config.max_flow_states),
            roots: Vec::new(),
            queue: ExecutionQueue::new(config.queue_capacity),
            registry,
            operations: Operations::standard(),
            evaluator: Evaluator::new(config.eval_limits()),
            debugger: Debugger::new(config.debugger_input_capacity),
            trace: None,
            scpi: ScpiMailbox::default(),
            dialogs: HashMap::new(),
            next_dialog_ticket: 0,
            running: false,
            in_tick: false,
            stop_requested: false,
        })
    }

    /// Registers (or replaces) the executor of `type_tag`.
    pub fn register_component<E>(&mut self, type_tag: u16, executor: E)
    where
        E: ComponentExecutor<H> + 'static,
    {
        self.registry.register(type_tag, executor);
    }
}

impl<H: Host> Runtime<H> {
    /// The host.
    #[inline]
    #[must_use]
    pub fn host(&self) -> &H {
        &self.host
    }

    /// The host, mutably.
    #[inline]
    pub fn host_mut(&mut self) -> &mut H {
        &mut self.host
    }

    /// Consumes the runtime and returns its host. Live instances are dropped without
    /// notifications; call [`Runtime::shutdown`] first for an orderly teardown.
    pub fn into_host(self) -> H {
        self.host
    }

    /// Shared handle to the template.
    #[inline]
    #[must_use]
    pub fn definition(&self) -> Rc<FlowDefinition> {
        Rc::clone(&self.definition)
    }

    /// Configuration the runtime was created with.
    #[inline]
    #[must_use]
    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// The component registry.
    #[inline]
    #[must_use]
    pub fn registry(&self) -> &ComponentRegistry<H> {
        &self.registry
    }

    /// The component registry, mutably.
    #[inline]
    pub fn registry_mut(&mut self) -> &mut ComponentRegistry<H> {
        &mut self.registry
    }

    /// The operation table used by every evaluation.
    #[inline]
    #[must_use]
    pub fn operations(&self) -> &Operations {
        &self.operations
    }

    /// The operation table, mutably. Register additional operations before [`Runtime::start`].
    #[inline]
    pub fn operations_mut(&mut self) -> &mut Operations {
        &mut self.operations
    }

    /// The debugger session.
    #[inline]
    #[must_use]
    pub fn debugger(&self) -> &Debugger {
        &self.debugger
    }

    /// The debugger session, mutably.
    #[inline]
    pub fn debugger_mut(&mut self) -> &mut Debugger {
        &mut self.debugger
    }

    /// The execution queue.
    #[inline]
    #[must_use]
    pub fn queue(&self) -> &ExecutionQueue {
        &self.queue
    }

    /// Current global variable values.
    #[inline]
    #[must_use]
    pub fn globals(&self) -> &[Value] {
        &self.globals
    }

    /// Host clock.
    #[inline]
    pub fn now_ms(&mut self) -> u64 {
        self.host.now_ms()
    }

    /// Whether [`Runtime::start`] ran and no stop has completed since.
    #[inline]
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Installs a tracing sink, returning the previous one.
    pub fn set_trace_sink(&mut self, sink: Box<dyn TraceSink>) -> Option<Box<dyn TraceSink>> {
        self.trace.replace(sink)
    }

    /// Removes the tracing sink.
    pub fn take_trace_sink(&mut self) -> Option<Box<dyn TraceSink>> {
        self.trace.take()
    }

    /// Attaches a debugger client.
    ///
    /// The session starts paused. Globals and live instances are announced so the client sees
    /// the same picture it would have seen had it connected before [`Runtime::start`].
    pub fn connect_debugger(&mut self, transport: Box<dyn DebuggerTransport>) {
        self.debugger.connect(transport);
        for (index, value) in self.globals.iter().enumerate() {
            self.debugger.on_global_variable_init(index, value);
        }
        for state in self.flow_states.iter() {
            if let Some(flow) = self.definition.flow(state.flow_index()) {
                self.debugger.on_flow_state_created(state, flow);
            }
        }
    }

    /// Detaches the debugger client. Execution resumes.
    pub fn disconnect_debugger(&mut self) -> Option<Box<dyn DebuggerTransport>> {
        self.debugger.disconnect()
    }

    /// Feeds bytes received from the debugger client. A restart request stops and restarts
    /// the program.
    pub fn debugger_input(&mut self, bytes: &[u8]) -> Result<(), RuntimeError> {
        if self.debugger.process_input(bytes, &self.definition) {
            tracing::debug!("debugger requested restart");
            self.shutdown();
            self.start()?;
        }
        Ok(())
    }

    /// Starts the program: resets globals and creates the root instance of page 0.
    ///
    /// Returns `Ok(None)` for a template without flows.
    pub fn start(&mut self) -> Result<Option<FlowStateId>, RuntimeError> {
        if self.running {
            self.shutdown();
        }
        if self.definition.flows.is_empty() {
            return Ok(None);
        }
        self.running = true;
        self.stop_requested = false;
        self.scpi = ScpiMailbox::default();
        self.globals.clone_from(&self.definition.globals);
        for (index, value) in self.globals.iter().enumerate() {
            self.debugger.on_global_variable_init(index, value);
        }
        tracing::debug!(flows = self.definition.flows.len(), "runtime started");
        self.page_flow_state(0).map(Some)
    }

    /// Root instance of page `flow_index`, created on first use.
    pub fn page_flow_state(&mut self, flow_index: usize) -> Result<FlowStateId, RuntimeError> {
        if let Some(&id) = self
            .roots
            .iter()
            .find(|&&id| self.flow_states.get(id).map(FlowState::flow_index) == Some(flow_index))
        {
            return Ok(id);
        }
        let id = self.create_flow_state(flow_index, None, false)?;
        self.roots.push(id);
        Ok(id)
    }

    /// Root instances in creation order.
    #[inline]
    #[must_use]
    pub fn roots(&self) -> &[FlowStateId] {
        &self.roots
    }

    /// Stops the program.
    ///
    /// Called from inside a tick (by a component) the stop is deferred until the current entry
    /// finishes; otherwise it happens immediately.
    pub fn stop(&mut self) {
        if self.in_tick {
            self.stop_requested = true;
        } else {
            self.shutdown();
        }
    }

    /// Destroys every instance and clears the queue. The debugger session is kept.
    pub fn shutdown(&mut self) {
        self.stop_requested = false;
        while let Some(root) = self.roots.pop() {
            if let Err(err) = self.destroy_flow_state(root) {
                tracing::warn!(%err, "destroying root flow state");
            }
        }
        let leftovers: Vec<FlowStateId> = self.flow_states.iter().map(FlowState::id).collect();
        for id in leftovers {
            if self.flow_states.contains(id)
                && let Err(err) = self.destroy_flow_state(id)
            {
                tracing::warn!(%err, "destroying flow state");
            }
        }
        self.queue.clear();
        if self.scpi.waiter.take().is_some() {
            self.host.cancel_scpi();
        }
        self.scpi = ScpiMailbox::default();
        self.dialogs.clear();
        if self.running {
            tracing::debug!("runtime stopped");
        }
        self.running = false;
    }

    /// The live instance `id`.
    #[inline]
    #[must_use]
    pub fn flow_state(&self, id: FlowStateId) -> Option<&FlowState> {
        self.flow_states.get(id)
    }

    /// Number of live instances.
    #[inline]
    #[must_use]
    pub fn flow_state_count(&self) -> usize {
        self.flow_states.len()
    }

    /// Live instances in arena order.
    pub fn flow_states(&self) -> impl Iterator<Item = &FlowState> {
        self.flow_states.iter()
    }

    pub(crate) fn state(&self, id: FlowStateId) -> Result<&FlowState, RuntimeError> {
        self.flow_states
            .get(id)
            .ok_or(RuntimeError::StaleFlowState(id))
    }

    pub(crate) fn state_mut(&mut self, id: FlowStateId) -> Result<&mut FlowState, RuntimeError> {
        self.flow_states
            .get_mut(id)
            .ok_or(RuntimeError::StaleFlowState(id))
    }

    /// Component `component_index` of the flow `id` runs, borrowed from `definition`.
    ///
    /// Executors hold their own [`Runtime::definition`] handle so the component can stay
    /// borrowed while the runtime is mutated.
    pub fn component<'d>(
        &self,
        definition: &'d FlowDefinition,
        id: FlowStateId,
        component_index: usize,
    ) -> Result<&'d Component, RuntimeError> {
        let flow_index = self.state(id)?.flow_index();
        definition
            .component(flow_index, component_index)
            .ok_or(RuntimeError::InvalidComponent {
                flow_state: id,
                component: component_index,
            })
    }

    /// Creates an instance of flow `flow_index` and pings its components.
    ///
    /// `parent` is the owning instance and the component (call-action or user widget) that
    /// created this one.
    pub fn create_flow_state(
        &mut self,
        flow_index: usize,
        parent: Option<(FlowStateId, usize)>,
        is_action: bool,
    ) -> Result<FlowStateId, RuntimeError> {
        let definition = Rc::clone(&self.definition);
        let flow = definition
            .flow(flow_index)
            .ok_or(RuntimeError::InvalidFlowIndex(flow_index))?;
        if let Some((parent_id, _)) = parent {
            self.state(parent_id)?;
        }
        let id = self
            .flow_states
            .insert(|id| FlowState::new(id, flow_index, flow, parent, is_action))
            .ok_or(RuntimeError::OutOfFlowStates)?;
        if let Some((parent_id, _)) = parent {
            self.state_mut(parent_id)?.children.push(id);
        }
        if let Some(state) = self.flow_states.get(id) {
            self.debugger.on_flow_state_created(state, flow);
        }
        tracing::debug!(flow_state = %id, flow_index, is_action, "flow state created");

        for component_index in 0..flow.components.len() {
            if let Err(err) = self.ping_component(id, component_index, None, None) {
                self.throw_error(id, component_index, &err.to_string());
            }
            if !self.flow_states.contains(id) {
                break;
            }
        }
        Ok(id)
    }

    /// Destroys `id` and its descendants, releasing every execution state exactly once.
    pub fn destroy_flow_state(&mut self, id: FlowStateId) -> Result<(), RuntimeError> {
        let children = self.state(id)?.children.clone();
        for child in children {
            if self.flow_states.contains(child) {
                self.destroy_flow_state(child)?;
            }
        }
        let component_count = self.state(id)?.execution_states.len();
        for component_index in 0..component_count {
            self.release_execution_state(id, component_index);
        }
        self.queue.remove_flow_state(id);
        self.debugger.on_flow_state_destroyed(id);

        let state = self
            .flow_states
            .remove(id)
            .ok_or(RuntimeError::StaleFlowState(id))?;
        if let Some(parent) = state.parent()
            && let Some(parent_state) = self.flow_states.get_mut(parent)
        {
            parent_state.children.retain(|&c| c != id);
        }
        self.roots.retain(|&r| r != id);
        tracing::debug!(flow_state = %id, flow_index = state.flow_index(), "flow state destroyed");
        Ok(())
    }

    /// Whether `id` is a finished action instance: no async work, no queued work and only
    /// resumable execution states.
    #[must_use]
    pub fn can_free(&self, id: FlowStateId) -> bool {
        let Some(state) = self.flow_states.get(id) else {
            return false;
        };
        state.is_action()
            && state.num_async == 0
            && state.queued == 0
            && state
                .execution_states
                .iter()
                .flatten()
                .all(ComponentExecutionState::allows_free)
    }

    /// Frees `id`.
    ///
    /// If the parent still tracks this instance through a call-action or user-widget state, that
    /// state is released instead, which destroys `id` as part of the release.
    pub fn free_flow_state(&mut self, id: FlowStateId) -> Result<(), RuntimeError> {
        let state = self.state(id)?;
        if let (Some(parent), Some(parent_component)) = (state.parent(), state.parent_component())
            && self.execution_state(parent, parent_component).and_then(ComponentExecutionState::child)
                == Some(id)
        {
            self.release_execution_state(parent, parent_component);
            return Ok(());
        }
        self.destroy_flow_state(id)
    }

    /// Execution state of component `component_index` of `id`.
    #[must_use]
    pub fn execution_state(
        &self,
        id: FlowStateId,
        component_index: usize,
    ) -> Option<&ComponentExecutionState> {
        self.flow_states.get(id)?.execution_state(component_index)
    }

    /// Mutable execution state of component `component_index` of `id`.
    pub fn execution_state_mut(
        &mut self,
        id: FlowStateId,
        component_index: usize,
    ) -> Option<&mut ComponentExecutionState> {
        self.flow_states
            .get_mut(id)?
            .execution_states
            .get_mut(component_index)?
            .as_mut()
    }

    /// Stores `state` for the component, releasing whatever was there before.
    pub fn set_execution_state(
        &mut self,
        id: FlowStateId,
        component_index: usize,
        state: ComponentExecutionState,
    ) -> Result<(), RuntimeError> {
        if self.execution_state(id, component_index).is_some() {
            self.release_execution_state(id, component_index);
        }
        let slot = self
            .state_mut(id)?
            .execution_states
            .get_mut(component_index)
            .ok_or(RuntimeError::InvalidComponent {
                flow_state: id,
                component: component_index,
            })?;
        *slot = Some(state);
        Ok(())
    }

    /// Removes the component's state and hands it to the caller without release side effects.
    pub fn take_execution_state(
        &mut self,
        id: FlowStateId,
        component_index: usize,
    ) -> Option<ComponentExecutionState> {
        self.flow_states
            .get_mut(id)?
            .execution_states
            .get_mut(component_index)?
            .take()
    }

    /// Releases the component's state.
    ///
    /// Owned child instances are destroyed, an SCPI wait is cancelled and an open dialog is
    /// closed. An outstanding async bracket of the component is closed too.
    pub fn release_execution_state(&mut self, id: FlowStateId, component_index: usize) {
        let Some(state) = self.flow_states.get_mut(id) else {
            return;
        };
        if let Some(last_run) = state.last_run_ms.get_mut(component_index) {
            *last_run = None;
        }
        if let Some(flag) = state.async_flags.get_mut(component_index)
            && *flag
        {
            *flag = false;
            state.num_async = state.num_async.saturating_sub(1);
        }
        let Some(released) = state
            .execution_states
            .get_mut(component_index)
            .and_then(Option::take)
        else {
            return;
        };
        match released {
            ComponentExecutionState::CallAction { child }
            | ComponentExecutionState::UserWidget { child } => {
                if self.flow_states.contains(child)
                    && let Err(err) = self.destroy_flow_state(child)
                {
                    tracing::warn!(%err, "destroying child flow state");
                }
            }
            ComponentExecutionState::Scpi(_) => {
                if self.scpi.waiter == Some((id, component_index)) {
                    self.scpi.waiter = None;
                    self.scpi.result_ready = false;
                    self.host.cancel_scpi();
                }
            }
            ComponentExecutionState::Dialog(dialog) => {
                self.dialogs.remove(&dialog.ticket);
                if dialog.phase == DialogPhase::Awaiting {
                    self.host.cancel_dialog(dialog.ticket);
                }
            }
            _ => {}
        }
    }

    /// Runs at most the entries queued when the tick started, within the tick budget.
    pub fn tick(&mut self) -> TickSummary {
        if self.stop_requested {
            self.shutdown();
            return TickSummary::default();
        }
        let start_ms = self.host.now_ms();
        let pending = self.queue.len();
        let interval = self.config.budget_check_interval.max(1);
        let tick_scope = TraceScope::Tick { queue_len: pending };
        if let Some(sink) = self.trace.as_mut() {
            sink.scope_enter(&tick_scope);
        }
        self.in_tick = true;

        let mut summary = TickSummary::default();
        for step in 0..pending {
            let Some(&entry) = self.queue.peek() else {
                break;
            };
            if !entry.continuous
                && let Some(state) = self.flow_states.get(entry.flow_state)
                && !self
                    .debugger
                    .can_execute_step(state.flow_index(), entry.component_index)
            {
                summary.gated = true;
                break;
            }
            self.queue.pop();
            if let Some(state) = self.flow_states.get_mut(entry.flow_state) {
                state.queued = state.queued.saturating_sub(1);
            }
            if entry.announced {
                self.debugger.on_remove_from_queue();
            }
            tracing::trace!(
                flow_state = %entry.flow_state,
                component = entry.component_index,
                continuous = entry.continuous,
                "dequeued"
            );

            self.run_entry(entry, start_ms);
            summary.executed += 1;
            if self.stop_requested {
                break;
            }

            self.reset_sequence_inputs(entry.flow_state);
            if self.can_free(entry.flow_state)
                && let Err(err) = self.free_flow_state(entry.flow_state)
            {
                tracing::warn!(%err, "freeing finished action");
            }

            if (step + 1) % interval == 0
                && self.host.now_ms().saturating_sub(start_ms) >= self.config.tick_budget_ms
            {
                break;
            }
        }

        self.in_tick = false;
        if let Some(sink) = self.trace.as_mut() {
            sink.scope_exit(&tick_scope);
        }
        if self.stop_requested {
            self.shutdown();
        }
        summary.remaining = self.queue.len();
        summary
    }

    fn run_entry(&mut self, entry: QueueEntry, start_ms: u64) {
        let id = entry.flow_state;
        let component_index = entry.component_index;
        let Some(state) = self.flow_states.get_mut(id) else {
            return;
        };
        state.executing_component = Some(component_index);
        if state.error {
            self.release_execution_state(id, component_index);
            return;
        }
        if entry.continuous && state.execution_state(component_index).is_some() {
            let last_run = state.last_run_ms.get(component_index).copied().flatten();
            if let Some(last_run) = last_run
                && last_run.saturating_add(self.config.tick_budget_ms) > start_ms
            {
                if let Err(err) = self.add_to_queue(id, component_index, None, None, true) {
                    self.throw_error(id, component_index, &err.to_string());
                }
                return;
            }
        }
        if let Some(slot) = state.last_run_ms.get_mut(component_index) {
            *slot = Some(start_ms);
        }
        self.dispatch(id, component_index);
    }

    /// Executes one component, routing a failure through [`Runtime::throw_error`].
    pub(crate) fn dispatch(&mut self, id: FlowStateId, component_index: usize) {
        let definition = Rc::clone(&self.definition);
        let component = match self.component(&definition, id, component_index) {
            Ok(component) => component,
            Err(err) => {
                tracing::warn!(%err, "dispatching stale entry");
                return;
            }
        };
        let type_tag = component.type_tag;
        let scope = TraceScope::Component {
            flow_state: id,
            flow_index: self.flow_states.get(id).map_or(0, FlowState::flow_index),
            component_index,
            type_tag,
        };
        if let Some(sink) = self.trace.as_mut() {
            sink.scope_enter(&scope);
        }

        let result = if component_type::is_dashboard(type_tag) {
            self.host
                .execute_dashboard_component(type_tag, id, component_index)
                .map_err(FlowError::from)
        } else if let Some(executor) = self.registry.get(type_tag) {
            executor.execute(self, id, component_index)
        } else if component_type::is_widget(type_tag) {
            Ok(())
        } else {
            Err(FlowError::message(format!(
                "Unknown component at index = {component_index}, type = {type_tag}"
            )))
        };

        if let Some(sink) = self.trace.as_mut() {
            sink.scope_exit(&scope);
        }
        if let Err(err) = result {
            self.throw_error(id, component_index, &err.to_string());
        }
    }

    /// Routes a flow error.
    ///
    /// The component's error-catch output gets the message if it has one. Otherwise the nearest
    /// catch-error component of the instance or its ancestors receives it (starting at the parent
    /// for the error component), and the instances in between are marked errored. With no
    /// handler the instance is marked errored and the host and debugger are told.
    pub fn throw_error(&mut self, id: FlowStateId, component_index: usize, message: &str) {
        let definition = Rc::clone(&self.definition);
        let Ok(component) = self.component(&definition, id, component_index) else {
            return;
        };
        tracing::warn!(flow_state = %id, component = component_index, message, "flow error");

        if let Some(output) = component.error_catch_output {
            match self.propagate_value(id, component_index, usize::from(output), Value::string(message)) {
                Ok(()) => return,
                Err(err) => tracing::warn!(%err, "propagating to error catch output"),
            }
        }

        let mut search = if component.type_tag == component_type::ERROR {
            self.flow_states.get(id).and_then(FlowState::parent)
        } else {
            Some(id)
        };
        while let Some(candidate) = search {
            let Some(state) = self.flow_states.get(candidate) else {
                break;
            };
            let catch = definition.flow(state.flow_index()).and_then(|flow| {
                flow.components
                    .iter()
                    .position(|c| c.type_tag == component_type::CATCH_ERROR)
            });
            let Some(catch) = catch else {
                search = state.parent();
                continue;
            };

            let mut walk = Some(id);
            while let Some(errored) = walk
                && errored != candidate
            {
                let Some(state) = self.flow_states.get_mut(errored) else {
                    break;
                };
                state.error = true;
                walk = state.parent();
            }
            let caught = ComponentExecutionState::CatchError {
                message: Value::string(message),
            };
            if self.set_execution_state(candidate, catch, caught).is_ok()
                && self.add_to_queue(candidate, catch, None, None, false).is_ok()
            {
                return;
            }
            break;
        }

        tracing::error!(flow_state = %id, component = component_index, message, "unhandled flow error");
        self.host.on_flow_error(id, component_index, message);
        self.debugger.on_flow_error(id, component_index, message);
        if let Some(state) = self.flow_states.get_mut(id) {
            state.error = true;
        }
    }

    /// Sends a log line from a component to the host and the debugger.
    pub fn log(
        &mut self,
        id: FlowStateId,
        component_index: usize,
        severity: LogSeverity,
        text: &str,
    ) {
        tracing::debug!(flow_state = %id, component = component_index, ?severity, text, "flow log");
        self.host.log(severity, text);
        self.debugger.on_log(severity, id, component_index, text);
    }
}

#[cfg(test)]
mod tests {
    extern crate std;

    use super::*;
    use crate::template::{
        ComponentOutput, ComponentPayload, Connection, Flow, InputFlags, component_type as t,
    };
    use alloc::string::String;
    use alloc::vec;
    use flow_expr::asm::InstructionBuilder;
    use std::cell::RefCell;

    #[derive(Debug, Default)]
    struct TestHost {
        now: u64,
        logs: Vec<String>,
        errors: Vec<String>,
    }

    impl Host for TestHost {
        fn now_ms(&mut self) -> u64 {
            self.now
        }

        fn log(&mut self, _severity: LogSeverity, text: &str) {
            self.logs.push(text.into());
        }

        fn on_flow_error(&mut self, _fs: FlowStateId, _c: usize, message: &str) {
            self.errors.push(message.into());
        }
    }

    fn constant(index: u16) -> Vec<u8> {
        let mut b = InstructionBuilder::new();
        b.push_constant(index).end();
        b.finish().unwrap()
    }

    fn seq(target_component: u16, target_input: u16) -> ComponentOutput {
        ComponentOutput::seq(vec![Connection {
            target_component,
            target_input,
        }])
    }

    /// start -> log("hello")
    fn hello_flow() -> FlowDefinition {
        FlowDefinition {
            flows: vec![Flow {
                components: vec![
                    Component::new(t::START).with_output(seq(1, 0)),
                    Component::new(t::LOG)
                        .with_inputs(vec![0])
                        .with_property(constant(2)),
                ],
                component_inputs: vec![InputFlags::SEQUENCE],
                local_variables: vec![],
            }],
            constants: vec![Value::Undefined, Value::Null, Value::string("hello")],
            globals: vec![],
        }
    }

    fn run_until_idle<H: Host>(rt: &mut Runtime<H>) {
        for _ in 0..32 {
            if rt.queue().is_empty() {
                return;
            }
            rt.tick();
        }
    }

    #[test]
    fn start_without_flows_is_a_no_op() {
        let mut rt = Runtime::new(
            TestHost::default(),
            FlowDefinition::default(),
            RuntimeConfig::default(),
        )
        .unwrap();
        assert_eq!(rt.start(), Ok(None));
        assert_eq!(rt.flow_state_count(), 0);
    }

    #[test]
    fn start_runs_page_zero() {
        let mut rt =
            Runtime::new(TestHost::default(), hello_flow(), RuntimeConfig::default()).unwrap();
        let root = rt.start().unwrap().unwrap();
        assert_eq!(rt.roots(), &[root]);
        run_until_idle(&mut rt);
        assert_eq!(rt.host().logs, ["hello"]);
        assert_eq!(rt.page_flow_state(0), Ok(root));
    }

    #[test]
    fn entries_queued_during_a_tick_wait_for_the_next_one() {
        let mut rt =
            Runtime::new(TestHost::default(), hello_flow(), RuntimeConfig::default()).unwrap();
        rt.start().unwrap();
        assert_eq!(rt.queue().len(), 1);
        let first = rt.tick();
        assert_eq!(first.executed, 1);
        assert_eq!(first.remaining, 1);
        assert!(rt.host().logs.is_empty());
        rt.tick();
        assert_eq!(rt.host().logs, ["hello"]);
    }

    #[test]
    fn unknown_component_is_an_unhandled_error() {
        let def = FlowDefinition {
            flows: vec![Flow {
                components: vec![Component::new(4242)],
                ..Flow::default()
            }],
            ..FlowDefinition::default()
        };
        let mut rt = Runtime::new(TestHost::default(), def, RuntimeConfig::default()).unwrap();
        let root = rt.start().unwrap().unwrap();
        rt.tick();
        assert_eq!(
            rt.host().errors,
            ["Unknown component at index = 0, type = 4242"]
        );
        assert!(rt.flow_state(root).unwrap().has_error());
    }

    #[test]
    fn stop_destroys_instances_and_clears_the_queue() {
        let mut rt =
            Runtime::new(TestHost::default(), hello_flow(), RuntimeConfig::default()).unwrap();
        let root = rt.start().unwrap().unwrap();
        rt.stop();
        assert!(!rt.is_running());
        assert!(rt.queue().is_empty());
        assert!(rt.flow_state(root).is_none());
        assert_eq!(
            rt.destroy_flow_state(root),
            Err(RuntimeError::StaleFlowState(root))
        );
    }

    #[test]
    fn shutdown_also_destroys_instances_outside_the_root_list() {
        let mut rt =
            Runtime::new(TestHost::default(), hello_flow(), RuntimeConfig::default()).unwrap();
        let root = rt.start().unwrap().unwrap();
        let detached = rt.create_flow_state(0, None, false).unwrap();
        assert_eq!(rt.flow_state_count(), 2);
        rt.shutdown();
        assert_eq!(rt.flow_state_count(), 0);
        assert!(rt.flow_state(root).is_none());
        assert!(rt.flow_state(detached).is_none());
        assert!(rt.queue().is_empty());
    }

    #[test]
    fn stop_from_a_component_is_deferred_to_the_end_of_the_entry() {
        let mut rt =
            Runtime::new(TestHost::default(), hello_flow(), RuntimeConfig::default()).unwrap();
        rt.register_component(
            t::START,
            |rt: &mut Runtime<TestHost>, _: FlowStateId, _: usize| -> Result<(), FlowError> {
                rt.stop();
                Ok(())
            },
        );
        rt.start().unwrap();
        let summary = rt.tick();
        assert_eq!(summary.executed, 1);
        assert!(!rt.is_running());
        assert_eq!(rt.flow_state_count(), 0);
    }

    #[test]
    fn trace_sink_sees_nested_scopes() {
        #[derive(Default)]
        struct Recorder(Rc<RefCell<Vec<(bool, TraceScope)>>>);
        impl TraceSink for Recorder {
            fn scope_enter(&mut self, scope: &TraceScope) {
                self.0.borrow_mut().push((true, *scope));
            }
            fn scope_exit(&mut self, scope: &TraceScope) {
                self.0.borrow_mut().push((false, *scope));
            }
        }

        let events = Rc::new(RefCell::new(Vec::new()));
        let mut rt =
            Runtime::new(TestHost::default(), hello_flow(), RuntimeConfig::default()).unwrap();
        rt.set_trace_sink(Box::new(Recorder(Rc::clone(&events))));
        rt.start().unwrap();
        rt.tick();
        let events = events.borrow();
        assert_eq!(events.len(), 4);
        assert!(matches!(events[0], (true, TraceScope::Tick { queue_len: 1 })));
        assert!(matches!(
            events[1],
            (true, TraceScope::Component { component_index: 0, type_tag: t::START, .. })
        ));
        assert!(matches!(events[2], (false, TraceScope::Component { .. })));
        assert!(matches!(events[3], (false, TraceScope::Tick { .. })));
    }

    #[test]
    fn tick_budget_stops_early() {
        // Three independent log components, clock jumps past the budget on every read.
        #[derive(Debug, Default)]
        struct SlowHost(u64);
        impl Host for SlowHost {
            fn now_ms(&mut self) -> u64 {
                self.0 += 10;
                self.0
            }
        }
        let log = || Component::new(t::LOG).with_property(constant(1));
        let def = FlowDefinition {
            flows: vec![Flow {
                components: vec![log(), log(), log()],
                ..Flow::default()
            }],
            constants: vec![Value::Undefined, Value::Null],
            ..FlowDefinition::default()
        };
        let config = RuntimeConfig::default().with_budget_check_interval(1);
        let mut rt = Runtime::new(SlowHost::default(), def, config).unwrap();
        rt.start().unwrap();
        let summary = rt.tick();
        assert_eq!(summary.executed, 1);
        assert_eq!(summary.remaining, 2);
    }

    #[test]
    fn call_to_native_action_uses_the_host() {
        #[derive(Debug, Default)]
        struct ActionHost(Vec<usize>);
        impl Host for ActionHost {
            fn now_ms(&mut self) -> u64 {
                0
            }
            fn execute_action_function(&mut self, index: usize) -> Result<(), HostError> {
                self.0.push(index);
                Ok(())
            }
        }
        let def = FlowDefinition {
            flows: vec![Flow {
                components: vec![Component::new(t::CALL_ACTION).with_payload(
                    ComponentPayload::Call {
                        flow_index: 3,
                        inputs_start_index: 0,
                        outputs_start_index: 0,
                    },
                )],
                ..Flow::default()
            }],
            ..FlowDefinition::default()
        };
        let mut rt = Runtime::new(ActionHost::default(), def, RuntimeConfig::default()).unwrap();
        rt.start().unwrap();
        rt.tick();
        assert_eq!(rt.host().0, [2]);
    }
}
