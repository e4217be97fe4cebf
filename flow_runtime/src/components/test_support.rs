// Copyright 2026 the Execution Tape Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Shared fixtures for component tests.

extern crate std;

use alloc::collections::VecDeque;
use alloc::rc::Rc;
use alloc::string::String;
use alloc::vec;
use alloc::vec::Vec;

use flow_expr::asm::InstructionBuilder;
use flow_expr::value::Value;

use core::cell::RefCell;

use crate::config::RuntimeConfig;
use crate::debugger::DebuggerTransport;
use crate::flow_state::FlowStateId;
use crate::host::{
    DialogTicket, Host, HostError, KeyboardRequest, KeypadRequest, LogSeverity, MessageBoxRequest,
    ScpiDispatch, ScpiError,
};
use crate::runtime::Runtime;
use crate::template::{ComponentOutput, Connection, FlowDefinition};

/// Debugger transport that keeps every written line for inspection.
#[derive(Clone, Default)]
pub(crate) struct Wire(Rc<RefCell<String>>);

impl DebuggerTransport for Wire {
    fn write(&mut self, bytes: &[u8]) {
        self.0
            .borrow_mut()
            .push_str(core::str::from_utf8(bytes).unwrap());
    }
}

impl Wire {
    /// Returns and clears everything written so far.
    pub(crate) fn take(&self) -> String {
        core::mem::take(&mut *self.0.borrow_mut())
    }
}

#[derive(Debug)]
pub(crate) enum Opened {
    Keypad(KeypadRequest),
    Keyboard(KeyboardRequest),
    MessageBox(MessageBoxRequest),
}

#[derive(Debug, Default)]
pub(crate) struct RecordingHost {
    pub(crate) now: u64,
    pub(crate) logs: Vec<(LogSeverity, String)>,
    pub(crate) errors: Vec<String>,
    pub(crate) pages: Vec<i32>,
    pub(crate) scpi_sent: Vec<String>,
    pub(crate) scpi_pending: bool,
    pub(crate) scpi_results: VecDeque<Result<String, ScpiError>>,
    pub(crate) scpi_cancels: usize,
    pub(crate) dialogs: Vec<(DialogTicket, Opened)>,
    pub(crate) cancelled_dialogs: Vec<DialogTicket>,
    pub(crate) native: Vec<Value>,
}

impl RecordingHost {
    pub(crate) fn log_texts(&self) -> Vec<&str> {
        self.logs.iter().map(|(_, text)| text.as_str()).collect()
    }
}

impl Host for RecordingHost {
    fn now_ms(&mut self) -> u64 {
        self.now
    }

    fn native_variable(&mut self, id: u16) -> Value {
        self.native
            .get(usize::from(id))
            .cloned()
            .unwrap_or_default()
    }

    fn set_native_variable(&mut self, id: u16, value: Value) -> Result<(), HostError> {
        let slot = self
            .native
            .get_mut(usize::from(id))
            .ok_or(HostError::UnknownNativeVariable(id))?;
        *slot = value;
        Ok(())
    }

    fn log(&mut self, severity: LogSeverity, text: &str) {
        self.logs.push((severity, text.into()));
    }

    fn on_flow_error(&mut self, _flow_state: FlowStateId, _component: usize, message: &str) {
        self.errors.push(message.into());
    }

    fn replace_page(&mut self, page_id: i32) {
        self.pages.push(page_id);
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
        self.scpi_results.pop_front().unwrap_or_else(|| Ok(String::new()))
    }

    fn cancel_scpi(&mut self) {
        self.scpi_cancels += 1;
    }

    fn show_keypad(&mut self, ticket: DialogTicket, request: KeypadRequest) {
        self.dialogs.push((ticket, Opened::Keypad(request)));
    }

    fn show_keyboard(&mut self, ticket: DialogTicket, request: KeyboardRequest) {
        self.dialogs.push((ticket, Opened::Keyboard(request)));
    }

    fn show_message_box(&mut self, ticket: DialogTicket, request: MessageBoxRequest) {
        self.dialogs.push((ticket, Opened::MessageBox(request)));
    }

    fn cancel_dialog(&mut self, ticket: DialogTicket) {
        self.cancelled_dialogs.push(ticket);
    }
}

pub(crate) fn expr(build: impl FnOnce(&mut InstructionBuilder)) -> Vec<u8> {
    let mut b = InstructionBuilder::new();
    build(&mut b);
    b.end();
    b.finish().unwrap()
}

pub(crate) fn constant(index: u16) -> Vec<u8> {
    expr(|b| {
        b.push_constant(index);
    })
}

pub(crate) fn local(index: u16) -> Vec<u8> {
    expr(|b| {
        b.push_local(index);
    })
}

pub(crate) fn seq(target_component: u16, target_input: u16) -> ComponentOutput {
    ComponentOutput::seq(vec![Connection {
        target_component,
        target_input,
    }])
}

pub(crate) fn data(target_component: u16, target_input: u16) -> ComponentOutput {
    ComponentOutput::data(vec![Connection {
        target_component,
        target_input,
    }])
}

pub(crate) fn start(
    definition: FlowDefinition,
    host: RecordingHost,
) -> (Runtime<RecordingHost>, FlowStateId) {
    let mut rt = Runtime::new(host, definition, RuntimeConfig::default()).unwrap();
    let root = rt.start().unwrap().unwrap();
    (rt, root)
}

pub(crate) fn run_ticks(rt: &mut Runtime<RecordingHost>, ticks: usize) {
    for _ in 0..ticks {
        rt.tick();
    }
}
