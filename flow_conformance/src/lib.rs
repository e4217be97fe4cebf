// Copyright 2026 the Execution Tape Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Shared fixtures for the end-to-end flow tests in `tests/`.
//!
//! [`MockHost`] records everything the runtime tells its collaborators and serves scripted
//! SCPI results. [`RecordingTransport`] captures debugger traffic. The free functions assemble
//! property expressions and wires with less noise than the raw template types.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use flow_expr::asm::InstructionBuilder;
use flow_runtime::debugger::DebuggerTransport;
use flow_runtime::host::{
    DialogTicket, Host, HostError, LogSeverity, MessageBoxRequest, ScpiDispatch, ScpiError,
};
use flow_runtime::template::{ComponentOutput, Connection, scpi_part};
use flow_runtime::{FlowStateId, Runtime, RuntimeConfig};

/// A host that records calls and serves scripted SCPI results.
#[derive(Debug, Default)]
pub struct MockHost {
    /// Current time.
    pub now: u64,
    /// Added to `now` after every clock read.
    pub clock_step: u64,
    /// Log lines, in order.
    pub logs: Vec<(LogSeverity, String)>,
    /// Unhandled flow errors.
    pub errors: Vec<(FlowStateId, usize, String)>,
    /// Pages shown.
    pub pages: Vec<i32>,
    /// SCPI text issued.
    pub scpi_sent: Vec<String>,
    /// Report SCPI requests as pending instead of completed.
    pub scpi_pending: bool,
    /// Results returned by successive `latest_scpi_result` calls. Empty means `""`.
    pub scpi_results: VecDeque<Result<String, ScpiError>>,
    /// Number of SCPI cancellations.
    pub scpi_cancels: usize,
    /// Message boxes opened.
    pub message_boxes: Vec<(DialogTicket, MessageBoxRequest)>,
    /// Dialogs cancelled.
    pub cancelled_dialogs: Vec<DialogTicket>,
    /// Native action functions run.
    pub action_functions: Vec<usize>,
}

impl MockHost {
    /// Text of every log line of `severity`.
    #[must_use]
    pub fn logged(&self, severity: LogSeverity) -> Vec<&str> {
        self.logs
            .iter()
            .filter(|(s, _)| *s == severity)
            .map(|(_, text)| text.as_str())
            .collect()
    }

    /// Messages of the unhandled flow errors.
    #[must_use]
    pub fn error_messages(&self) -> Vec<&str> {
        self.errors.iter().map(|(_, _, m)| m.as_str()).collect()
    }
}

impl Host for MockHost {
    fn now_ms(&mut self) -> u64 {
        let now = self.now;
        self.now += self.clock_step;
        now
    }

    fn log(&mut self, severity: LogSeverity, text: &str) {
        self.logs.push((severity, text.into()));
    }

    fn on_flow_error(&mut self, flow_state: FlowStateId, component_index: usize, message: &str) {
        self.errors.push((flow_state, component_index, message.into()));
    }

    fn replace_page(&mut self, page_id: i32) {
        self.pages.push(page_id);
    }

    fn execute_action_function(&mut self, index: usize) -> Result<(), HostError> {
        self.action_functions.push(index);
        Ok(())
    }

    fn execute_scpi(&mut self, text: &str) -> ScpiDispatch {
        self.scpi_sent.push(text.into());
        if self.scpi_pending {
            ScpiDispatch::Pending
        } else {
            ScpiDispatch::Completed
        }
    }

    fn latest_scpi_result(&mut self) -> Result<String, ScpiError> {
        self.scpi_results
            .pop_front()
            .unwrap_or_else(|| Ok(String::new()))
    }

    fn cancel_scpi(&mut self) {
        self.scpi_cancels += 1;
    }

    fn show_message_box(&mut self, ticket: DialogTicket, request: MessageBoxRequest) {
        self.message_boxes.push((ticket, request));
    }

    fn cancel_dialog(&mut self, ticket: DialogTicket) {
        self.cancelled_dialogs.push(ticket);
    }
}

/// Debugger transport that keeps every byte written, shared with the test.
#[derive(Clone, Debug, Default)]
pub struct RecordingTransport {
    bytes: Rc<RefCell<Vec<u8>>>,
}

impl RecordingTransport {
    /// Lines written so far, without their newlines.
    #[must_use]
    pub fn lines(&self) -> Vec<String> {
        String::from_utf8_lossy(&self.bytes.borrow())
            .lines()
            .map(String::from)
            .collect()
    }

    /// Lines whose message kind is `kind`.
    #[must_use]
    pub fn lines_of_kind(&self, kind: u8) -> Vec<String> {
        let prefix = kind.to_string();
        self.lines()
            .into_iter()
            .filter(|line| line.split('\t').next() == Some(prefix.as_str()))
            .collect()
    }

    /// Forgets everything written so far.
    pub fn clear(&self) {
        self.bytes.borrow_mut().clear();
    }
}

impl DebuggerTransport for RecordingTransport {
    fn write(&mut self, bytes: &[u8]) {
        self.bytes.borrow_mut().extend_from_slice(bytes);
    }
}

/// Assembles an expression; `end` is appended.
///
/// # Panics
///
/// Panics if the builder rejects an operand.
#[must_use]
pub fn expr(build: impl FnOnce(&mut InstructionBuilder)) -> Vec<u8> {
    let mut b = InstructionBuilder::new();
    build(&mut b);
    b.end();
    b.finish().expect("valid test expression")
}

/// `constants[index]`.
#[must_use]
pub fn constant(index: u16) -> Vec<u8> {
    expr(|b| {
        b.push_constant(index);
    })
}

/// Local variable `index`.
#[must_use]
pub fn local(index: u16) -> Vec<u8> {
    expr(|b| {
        b.push_local(index);
    })
}

/// Input slot `index`.
#[must_use]
pub fn input(index: u16) -> Vec<u8> {
    expr(|b| {
        b.push_input(index);
    })
}

/// A sequence output wired to one input.
#[must_use]
pub fn seq(target_component: u16, target_input: u16) -> ComponentOutput {
    ComponentOutput::seq(vec![Connection {
        target_component,
        target_input,
    }])
}

/// A data output wired to one input.
#[must_use]
pub fn data(target_component: u16, target_input: u16) -> ComponentOutput {
    ComponentOutput::data(vec![Connection {
        target_component,
        target_input,
    }])
}

/// Encodes an SCPI literal part.
///
/// # Panics
///
/// Panics if `text` is longer than `u16::MAX` bytes.
#[must_use]
pub fn scpi_literal(text: &str) -> Vec<u8> {
    let mut bytes = vec![scpi_part::LITERAL];
    let len = u16::try_from(text.len()).expect("short literal");
    bytes.extend_from_slice(&len.to_le_bytes());
    bytes.extend_from_slice(text.as_bytes());
    bytes
}

/// Creates a runtime and starts it, returning the root instance.
///
/// # Panics
///
/// Panics if the definition is rejected or has no flows.
pub fn start(
    definition: flow_runtime::template::FlowDefinition,
    host: MockHost,
) -> (Runtime<MockHost>, FlowStateId) {
    let mut rt = Runtime::new(host, definition, RuntimeConfig::default()).expect("valid template");
    let root = rt.start().expect("start").expect("a root flow");
    (rt, root)
}

/// Ticks until the queue is empty or `max_ticks` ticks ran. Returns the ticks used.
pub fn run_until_idle(rt: &mut Runtime<MockHost>, max_ticks: usize) -> usize {
    for tick in 0..max_ticks {
        if rt.queue().is_empty() {
            return tick;
        }
        rt.tick();
    }
    max_ticks
}
