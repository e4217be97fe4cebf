// Copyright 2026 the Execution Tape Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Remote debugger bridge.
//!
//! The bridge mirrors scheduler and instance lifecycle events to at most one connected client
//! and accepts run-control commands from it. Messages in both directions are newline-terminated
//! lines of tab-separated fields whose first field is the numeric message kind.
//!
//! The session state machine ([`DebuggerState`]) only gates which queue entries the scheduler
//! may dispatch; it never blocks the calling thread.

use alloc::boxed::Box;
use alloc::string::String;
use alloc::vec::Vec;
use core::fmt;
use core::fmt::Write as _;

use hashbrown::HashMap;

use flow_expr::value::Value;

use crate::flow_state::{FlowState, FlowStateId};
use crate::host::LogSeverity;
use crate::template::{Flow, FlowDefinition};

/// Kinds of messages sent to the client.
pub mod outbound {
    /// `0 state`
    pub const STATE_CHANGED: u8 = 0;
    /// `1 fs source_component source_output target_component target_input`
    pub const ADD_TO_QUEUE: u8 = 1;
    /// `2`
    pub const REMOVE_FROM_QUEUE: u8 = 2;
    /// `3 index value`
    pub const GLOBAL_VARIABLE_INIT: u8 = 3;
    /// `4 fs index value`
    pub const LOCAL_VARIABLE_INIT: u8 = 4;
    /// `5 fs index value`
    pub const COMPONENT_INPUT_INIT: u8 = 5;
    /// `6 fs slot value`
    pub const VALUE_CHANGED: u8 = 6;
    /// `7 fs flow parent_fs parent_component`
    pub const FLOW_STATE_CREATED: u8 = 7;
    /// `8 fs`
    pub const FLOW_STATE_DESTROYED: u8 = 8;
    /// `9 fs component "message"`
    pub const FLOW_STATE_ERROR: u8 = 9;
    /// `10 severity fs component "text"`
    pub const LOG: u8 = 10;
    /// `11 page`
    pub const PAGE_CHANGED: u8 = 11;
}

/// Byte sink for outbound debugger traffic.
pub trait DebuggerTransport {
    /// Writes one or more complete lines.
    fn write(&mut self, bytes: &[u8]);
}

/// Run state of a debugger session.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum DebuggerState {
    /// The scheduler runs freely, stopping at enabled breakpoints.
    Resumed = 0,
    /// The scheduler dispatches nothing that the debugger gates.
    Paused = 1,
    /// The scheduler may dispatch one entry, then pauses.
    SingleStep = 2,
}

/// A parsed inbound command.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum DebuggerCommand {
    /// Continue running.
    Resume,
    /// Stop dispatching.
    Pause,
    /// Dispatch one entry.
    SingleStep,
    /// Add an enabled breakpoint.
    AddBreakpoint {
        /// Flow index.
        flow: usize,
        /// Component index.
        component: usize,
    },
    /// Remove a breakpoint.
    RemoveBreakpoint {
        /// Flow index.
        flow: usize,
        /// Component index.
        component: usize,
    },
    /// Enable a breakpoint.
    EnableBreakpoint {
        /// Flow index.
        flow: usize,
        /// Component index.
        component: usize,
    },
    /// Disable a breakpoint without removing it.
    DisableBreakpoint {
        /// Flow index.
        flow: usize,
        /// Component index.
        component: usize,
    },
    /// Stop and start the program again.
    Restart,
}

/// Inbound protocol errors. These are logged and the line is dropped.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DebuggerError {
    /// The line was empty.
    EmptyLine,
    /// The first field is not a known message kind.
    UnknownMessage(u8),
    /// The breakpoint fields did not parse.
    MalformedBreakpoint,
    /// The breakpoint flow index is out of range.
    InvalidBreakpointFlow(usize),
    /// The breakpoint component index is out of range.
    InvalidBreakpointComponent(usize),
    /// A line exceeded the input buffer.
    InputOverflow,
}

impl fmt::Display for DebuggerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyLine => write!(f, "empty message from debugger"),
            Self::UnknownMessage(kind) => write!(f, "unknown message from debugger: {kind}"),
            Self::MalformedBreakpoint => write!(f, "malformed breakpoint message"),
            Self::InvalidBreakpointFlow(flow) => {
                write!(f, "invalid breakpoint flow index: {flow}")
            }
            Self::InvalidBreakpointComponent(component) => {
                write!(f, "invalid breakpoint component index: {component}")
            }
            Self::InputOverflow => write!(f, "input from debugger buffer overflow"),
        }
    }
}

impl core::error::Error for DebuggerError {}

/// Parses one inbound line, without its newline.
pub fn parse_command(line: &[u8]) -> Result<DebuggerCommand, DebuggerError> {
    let &first = line.first().ok_or(DebuggerError::EmptyLine)?;
    let kind = first.wrapping_sub(b'0');
    let breakpoint = || -> Result<(usize, usize), DebuggerError> {
        let fields = line
            .get(2..)
            .and_then(|rest| core::str::from_utf8(rest).ok())
            .ok_or(DebuggerError::MalformedBreakpoint)?;
        let (flow, component) = fields
            .split_once('\t')
            .ok_or(DebuggerError::MalformedBreakpoint)?;
        let flow = flow
            .trim()
            .parse()
            .map_err(|_| DebuggerError::MalformedBreakpoint)?;
        let component = component
            .trim()
            .parse()
            .map_err(|_| DebuggerError::MalformedBreakpoint)?;
        Ok((flow, component))
    };
    match kind {
        0 => Ok(DebuggerCommand::Resume),
        1 => Ok(DebuggerCommand::Pause),
        2 => Ok(DebuggerCommand::SingleStep),
        3 => breakpoint().map(|(flow, component)| DebuggerCommand::AddBreakpoint { flow, component }),
        4 => breakpoint()
            .map(|(flow, component)| DebuggerCommand::RemoveBreakpoint { flow, component }),
        5 => breakpoint()
            .map(|(flow, component)| DebuggerCommand::EnableBreakpoint { flow, component }),
        6 => breakpoint()
            .map(|(flow, component)| DebuggerCommand::DisableBreakpoint { flow, component }),
        7 => Ok(DebuggerCommand::Restart),
        other => Err(DebuggerError::UnknownMessage(other)),
    }
}

/// Debugger session.
///
/// The session outlives any flow instance; it is only reset by connect and disconnect.
pub struct Debugger {
    transport: Option<Box<dyn DebuggerTransport>>,
    state: DebuggerState,
    skip_next_breakpoint: bool,
    breakpoints: HashMap<(usize, usize), bool>,
    input: Vec<u8>,
    input_capacity: usize,
    input_overflowed: bool,
    out: String,
}

impl fmt::Debug for Debugger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Debugger")
            .field("connected", &self.transport.is_some())
            .field("state", &self.state)
            .field("skip_next_breakpoint", &self.skip_next_breakpoint)
            .field("breakpoints", &self.breakpoints.len())
            .finish_non_exhaustive()
    }
}

impl Debugger {
    /// Creates a disconnected session with an inbound buffer of `input_capacity` bytes.
    #[must_use]
    pub fn new(input_capacity: usize) -> Self {
        Self {
            transport: None,
            state: DebuggerState::Resumed,
            skip_next_breakpoint: false,
            breakpoints: HashMap::new(),
            input: Vec::with_capacity(input_capacity),
            input_capacity,
            input_overflowed: false,
            out: String::new(),
        }
    }

    /// Whether a client is connected.
    #[inline]
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.transport.is_some()
    }

    /// Current run state.
    #[inline]
    #[must_use]
    pub fn state(&self) -> DebuggerState {
        self.state
    }

    /// Attaches a client. The session starts paused.
    pub fn connect(&mut self, transport: Box<dyn DebuggerTransport>) {
        self.transport = Some(transport);
        self.skip_next_breakpoint = false;
        self.input.clear();
        self.input_overflowed = false;
        tracing::debug!("debugger connected");
        self.set_state(DebuggerState::Paused);
    }

    /// Detaches the client and resumes free running.
    pub fn disconnect(&mut self) -> Option<Box<dyn DebuggerTransport>> {
        let transport = self.transport.take();
        if transport.is_some() {
            tracing::debug!("debugger disconnected");
        }
        self.set_state(DebuggerState::Resumed);
        transport
    }

    /// Changes the run state, reporting the change to the client.
    pub fn set_state(&mut self, state: DebuggerState) {
        if state == self.state {
            return;
        }
        self.state = state;
        self.send(|out| {
            let _ = writeln!(out, "{}\t{}", outbound::STATE_CHANGED, state as u8);
        });
    }

    /// Decides whether the scheduler may dispatch `component_index` of flow `flow_index`.
    pub fn can_execute_step(&mut self, flow_index: usize, component_index: usize) -> bool {
        if !self.is_connected() {
            return true;
        }
        match self.state {
            DebuggerState::Paused => false,
            DebuggerState::SingleStep => {
                self.skip_next_breakpoint = false;
                self.set_state(DebuggerState::Paused);
                true
            }
            DebuggerState::Resumed => {
                if self.skip_next_breakpoint {
                    self.skip_next_breakpoint = false;
                } else if self.has_breakpoint(flow_index, component_index) {
                    self.skip_next_breakpoint = true;
                    self.set_state(DebuggerState::Paused);
                    return false;
                }
                true
            }
        }
    }

    /// Whether an enabled breakpoint is set on the component.
    #[must_use]
    pub fn has_breakpoint(&self, flow_index: usize, component_index: usize) -> bool {
        self.breakpoints
            .get(&(flow_index, component_index))
            .copied()
            .unwrap_or(false)
    }

    /// Feeds inbound bytes. Returns `true` if the client asked for a restart.
    ///
    /// Malformed lines are logged and dropped; a line longer than the input buffer is reported
    /// once and discarded at its newline.
    pub fn process_input(&mut self, bytes: &[u8], definition: &FlowDefinition) -> bool {
        let mut restart = false;
        for &byte in bytes {
            if byte == b'\n' {
                if self.input_overflowed {
                    self.input_overflowed = false;
                } else {
                    let line = core::mem::take(&mut self.input);
                    match parse_command(&line) {
                        Ok(command) => restart |= self.apply(command, definition),
                        Err(error) => tracing::warn!(%error, "dropping debugger message"),
                    }
                    self.input = line;
                }
                self.input.clear();
            } else if self.input.len() < self.input_capacity {
                self.input.push(byte);
            } else if !self.input_overflowed {
                self.input_overflowed = true;
                tracing::warn!(error = %DebuggerError::InputOverflow, "dropping debugger message");
            }
        }
        restart
    }

    /// Applies a command. Returns `true` for [`DebuggerCommand::Restart`].
    pub fn apply(&mut self, command: DebuggerCommand, definition: &FlowDefinition) -> bool {
        match command {
            DebuggerCommand::Resume => self.set_state(DebuggerState::Resumed),
            DebuggerCommand::Pause => self.set_state(DebuggerState::Paused),
            DebuggerCommand::SingleStep => self.set_state(DebuggerState::SingleStep),
            DebuggerCommand::AddBreakpoint { flow, component }
            | DebuggerCommand::EnableBreakpoint { flow, component } => {
                if let Err(error) = check_breakpoint(definition, flow, component) {
                    tracing::warn!(%error, "ignoring breakpoint");
                } else {
                    self.breakpoints.insert((flow, component), true);
                }
            }
            DebuggerCommand::RemoveBreakpoint { flow, component } => {
                self.breakpoints.remove(&(flow, component));
            }
            DebuggerCommand::DisableBreakpoint { flow, component } => {
                if let Err(error) = check_breakpoint(definition, flow, component) {
                    tracing::warn!(%error, "ignoring breakpoint");
                } else {
                    self.breakpoints.insert((flow, component), false);
                }
            }
            DebuggerCommand::Restart => return true,
        }
        false
    }

    fn send(&mut self, write: impl FnOnce(&mut String)) {
        let Some(transport) = self.transport.as_mut() else {
            return;
        };
        self.out.clear();
        write(&mut self.out);
        transport.write(self.out.as_bytes());
    }

    /// Reports a queued entry. Absent source or input fields are sent as `-1`.
    pub fn on_add_to_queue(
        &mut self,
        flow_state: FlowStateId,
        source: Option<(usize, usize)>,
        target_component: usize,
        target_input: Option<usize>,
    ) {
        self.send(|out| {
            let _ = write!(
                out,
                "{}\t{}\t",
                outbound::ADD_TO_QUEUE,
                flow_state.index()
            );
            match source {
                Some((component, output)) => {
                    let _ = write!(out, "{component}\t{output}\t");
                }
                None => out.push_str("-1\t-1\t"),
            }
            let _ = write!(out, "{target_component}\t");
            write_index(out, target_input);
            out.push('\n');
        });
    }

    /// Reports that the oldest entry left the queue.
    pub fn on_remove_from_queue(&mut self) {
        self.send(|out| {
            let _ = writeln!(out, "{}", outbound::REMOVE_FROM_QUEUE);
        });
    }

    /// Reports the initial value of global variable `index`.
    pub fn on_global_variable_init(&mut self, index: usize, value: &Value) {
        self.send(|out| {
            let _ = write!(out, "{}\t{index}\t", outbound::GLOBAL_VARIABLE_INIT);
            write_value(out, value);
            out.push('\n');
        });
    }

    /// Reports a new instance, its local variables and its data inputs.
    pub fn on_flow_state_created(&mut self, state: &FlowState, flow: &Flow) {
        if !self.is_connected() {
            return;
        }
        let fs = state.id().index();
        self.send(|out| {
            let _ = write!(
                out,
                "{}\t{fs}\t{}\t",
                outbound::FLOW_STATE_CREATED,
                state.flow_index()
            );
            write_index(out, state.parent().map(|p| p.index() as usize));
            out.push('\t');
            write_index(out, state.parent_component());
            out.push('\n');
        });
        let input_count = flow.input_count();
        for (i, value) in state.values().iter().skip(input_count).enumerate() {
            self.send(|out| {
                let _ = write!(out, "{}\t{fs}\t{i}\t", outbound::LOCAL_VARIABLE_INIT);
                write_value(out, value);
                out.push('\n');
            });
        }
        for (i, flags) in flow.component_inputs.iter().enumerate() {
            if flags.is_seq() {
                continue;
            }
            let value = state.values().get(i).cloned().unwrap_or_default();
            self.send(|out| {
                let _ = write!(out, "{}\t{fs}\t{i}\t", outbound::COMPONENT_INPUT_INIT);
                write_value(out, &value);
                out.push('\n');
            });
        }
    }

    /// Reports a destroyed instance.
    pub fn on_flow_state_destroyed(&mut self, flow_state: FlowStateId) {
        self.send(|out| {
            let _ = writeln!(
                out,
                "{}\t{}",
                outbound::FLOW_STATE_DESTROYED,
                flow_state.index()
            );
        });
    }

    /// Reports a changed slot. `flow_state` is `None` for global variables.
    pub fn on_value_changed(&mut self, flow_state: Option<FlowStateId>, slot: usize, value: &Value) {
        self.send(|out| {
            let _ = write!(out, "{}\t", outbound::VALUE_CHANGED);
            write_index(out, flow_state.map(|fs| fs.index() as usize));
            let _ = write!(out, "\t{slot}\t");
            write_value(out, value);
            out.push('\n');
        });
    }

    /// Reports an unhandled flow error.
    pub fn on_flow_error(&mut self, flow_state: FlowStateId, component_index: usize, message: &str) {
        self.send(|out| {
            let _ = write!(
                out,
                "{}\t{}\t{component_index}\t",
                outbound::FLOW_STATE_ERROR,
                flow_state.index()
            );
            write_quoted(out, message);
            out.push('\n');
        });
    }

    /// Forwards a log line.
    pub fn on_log(
        &mut self,
        severity: LogSeverity,
        flow_state: FlowStateId,
        component_index: usize,
        text: &str,
    ) {
        self.send(|out| {
            let _ = write!(
                out,
                "{}\t{}\t{}\t{component_index}\t",
                outbound::LOG,
                severity as u8,
                flow_state.index()
            );
            write_quoted(out, text);
            out.push('\n');
        });
    }

    /// Reports a page change. Pages are sent as `-page - 1`.
    pub fn on_page_changed(&mut self, page_id: i32) {
        self.send(|out| {
            let _ = writeln!(
                out,
                "{}\t{}",
                outbound::PAGE_CHANGED,
                page_id.saturating_neg().saturating_sub(1)
            );
        });
    }
}

fn check_breakpoint(
    definition: &FlowDefinition,
    flow: usize,
    component: usize,
) -> Result<(), DebuggerError> {
    let f = definition
        .flow(flow)
        .ok_or(DebuggerError::InvalidBreakpointFlow(flow))?;
    if component >= f.components.len() {
        return Err(DebuggerError::InvalidBreakpointComponent(component));
    }
    Ok(())
}

fn write_index(out: &mut String, index: Option<usize>) {
    match index {
        Some(index) => {
            let _ = write!(out, "{index}");
        }
        None => out.push_str("-1"),
    }
}

/// Writes `text` in double quotes, escaping quotes, tabs and newlines.
pub fn write_quoted(out: &mut String, text: &str) {
    out.push('"');
    for ch in text.chars() {
        match ch {
            '"' => out.push_str("\\\""),
            '\t' => out.push_str("\\t"),
            '\n' => out.push_str("\\n"),
            other => out.push(other),
        }
    }
    out.push('"');
}

/// Writes the wire form of `value`.
pub fn write_value(out: &mut String, value: &Value) {
    match value {
        Value::Undefined => out.push_str("undefined"),
        Value::Null => out.push_str("null"),
        Value::Str(s) => write_quoted(out, s),
        Value::Array(array) => {
            out.push('{');
            for (i, element) in array.to_vec().iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_value(out, element);
            }
            out.push('}');
        }
        Value::Bool(_)
        | Value::Int32(_)
        | Value::Int64(_)
        | Value::Float(_)
        | Value::Double(_) => {
            let _ = write!(out, "{value}");
        }
        Value::Slot(_) | Value::NativeVariable(_) | Value::FlowOutput(_) | Value::ArrayElement(_) => {
        }
    }
}
