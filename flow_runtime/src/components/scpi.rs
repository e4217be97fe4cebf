// Copyright 2026 the Execution Tape Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The SCPI component.
//!
//! The component walks its part stream (see [`scpi_part`]), building command text until it
//! reaches a query or command boundary. There it issues the text to the host and suspends in
//! [`ScpiPhase::AwaitingResult`]; the runtime holds a single in-flight request, so a component
//! that finds another one waiting stays queued until the interpreter is free.

use alloc::format;

use flow_expr::value::Value;

use crate::execution_state::{ComponentExecutionState, ScpiPhase, ScpiState};
use crate::flow_state::FlowStateId;
use crate::host::{Host, LogSeverity, ScpiDispatch};
use crate::runtime::{FlowError, Runtime};
use crate::suspend::ScpiMailbox;
use crate::template::{ComponentPayload, scpi_part};

enum Progress {
    Waiting,
    Done,
}

pub(crate) fn execute_scpi<H: Host>(
    rt: &mut Runtime<H>,
    id: FlowStateId,
    component_index: usize,
) -> Result<(), FlowError> {
    let definition = rt.definition();
    let ComponentPayload::Scpi { instructions } =
        &rt.component(&definition, id, component_index)?.payload
    else {
        return Err(FlowError::message("SCPI: missing instructions"));
    };
    let mut scpi = match rt.take_execution_state(id, component_index) {
        Some(ComponentExecutionState::Scpi(scpi)) => scpi,
        _ => ScpiState::default(),
    };

    match run_parts(rt, id, component_index, instructions, &mut scpi) {
        Ok(Progress::Waiting) => {
            rt.set_execution_state(id, component_index, ComponentExecutionState::Scpi(scpi))?;
            rt.requeue_waiting(id, component_index)
        }
        Ok(Progress::Done) => rt.propagate_through_seqout(id, component_index),
        Err(err) => {
            if rt.scpi.waiter == Some((id, component_index)) {
                rt.scpi = ScpiMailbox::default();
                rt.host_mut().cancel_scpi();
            }
            Err(err)
        }
    }
}

fn run_parts<H: Host>(
    rt: &mut Runtime<H>,
    id: FlowStateId,
    component_index: usize,
    instructions: &[u8],
    scpi: &mut ScpiState,
) -> Result<Progress, FlowError> {
    loop {
        let cursor = scpi.cursor;
        let part = *instructions
            .get(cursor)
            .ok_or_else(|| FlowError::message("SCPI: unterminated instructions"))?;
        match part {
            scpi_part::LITERAL => {
                let text = literal(instructions, cursor + 1)?;
                scpi.text.push_str(text);
                scpi.cursor = cursor + 3 + text.len();
            }
            scpi_part::EXPRESSION => {
                let evaluated = rt.evaluate(id, rest(instructions, cursor + 1))?;
                evaluated.value.to_text(&mut scpi.text);
                scpi.cursor = cursor + 1 + evaluated.consumed;
            }
            scpi_part::QUERY_WITH_ASSIGNMENT | scpi_part::QUERY | scpi_part::COMMAND => {
                if !round_trip(rt, id, component_index, part, scpi) {
                    return Ok(Progress::Waiting);
                }
                let result = rt.host_mut().latest_scpi_result().map_err(|err| {
                    FlowError::message(format!("SCPI '{}': {err}", scpi.text.trim_end()))
                })?;
                scpi.cursor = cursor + 1;
                if part == scpi_part::QUERY_WITH_ASSIGNMENT {
                    rt.log(
                        id,
                        component_index,
                        LogSeverity::Scpi,
                        &format!("SCPI QUERY RESULT: {result}"),
                    );
                    let target = rt.evaluate_assignable(id, rest(instructions, scpi.cursor))?;
                    scpi.cursor += target.consumed;
                    rt.assign_value(id, component_index, &target.value, parse_result(&result))?;
                }
                scpi.text.clear();
                scpi.phase = ScpiPhase::Building;
            }
            scpi_part::END => return Ok(Progress::Done),
            other => {
                return Err(FlowError::message(format!("SCPI: unknown part {other}")));
            }
        }
    }
}

/// Issues the built text, or checks on a request already issued.
///
/// Returns `true` once the result can be read.
fn round_trip<H: Host>(
    rt: &mut Runtime<H>,
    id: FlowStateId,
    component_index: usize,
    part: u8,
    scpi: &mut ScpiState,
) -> bool {
    let me = Some((id, component_index));
    if scpi.phase == ScpiPhase::AwaitingResult {
        if rt.scpi.waiter == me && rt.scpi.result_ready {
            rt.scpi = ScpiMailbox::default();
            return true;
        }
        return false;
    }
    if rt.scpi.waiter.is_some() {
        return false;
    }

    let prefix = if part == scpi_part::COMMAND {
        "SCPI COMMAND: "
    } else {
        "SCPI QUERY: "
    };
    rt.log(
        id,
        component_index,
        LogSeverity::Scpi,
        &format!("{prefix}{}", scpi.text),
    );
    scpi.text.push('\n');
    scpi.phase = ScpiPhase::AwaitingResult;
    rt.scpi = ScpiMailbox {
        waiter: me,
        result_ready: false,
    };
    match rt.host_mut().execute_scpi(&scpi.text) {
        ScpiDispatch::Completed => {
            rt.scpi = ScpiMailbox::default();
            true
        }
        ScpiDispatch::Pending => false,
    }
}

fn rest(instructions: &[u8], offset: usize) -> &[u8] {
    instructions.get(offset..).unwrap_or_default()
}

fn literal(instructions: &[u8], offset: usize) -> Result<&str, FlowError> {
    let invalid = || FlowError::message("SCPI: invalid literal");
    let len = instructions
        .get(offset..offset + 2)
        .map(|b| usize::from(u16::from_le_bytes([b[0], b[1]])))
        .ok_or_else(invalid)?;
    let bytes = instructions
        .get(offset + 2..offset + 2 + len)
        .ok_or_else(invalid)?;
    core::str::from_utf8(bytes).map_err(|_| invalid())
}

/// Interprets a query result: quoted text, then integers, then floats, then raw text.
fn parse_result(result: &str) -> Value {
    let result = result.trim();
    if let Some(quoted) = result.strip_prefix('"').and_then(|r| r.strip_suffix('"')) {
        return Value::string(quoted);
    }
    if let Ok(value) = result.parse::<i32>() {
        return Value::Int32(value);
    }
    if let Ok(value) = result.parse::<f32>() {
        return Value::Float(value);
    }
    Value::string(result)
}

#[cfg(test)]
mod tests {
    extern crate std;

    use super::*;
    use crate::components::test_support::{
        RecordingHost, Wire, constant, local, run_ticks, seq, start,
    };
    use crate::host::ScpiError;
    use crate::template::{Component, Flow, FlowDefinition, InputFlags, component_type as t};
    use alloc::boxed::Box;
    use alloc::string::String;
    use alloc::vec;
    use alloc::vec::Vec;

    fn literal_part(text: &str) -> Vec<u8> {
        let mut bytes = vec![scpi_part::LITERAL];
        let len = u16::try_from(text.len()).unwrap();
        bytes.extend_from_slice(&len.to_le_bytes());
        bytes.extend_from_slice(text.as_bytes());
        bytes
    }

    /// start -> scpi(parts) -> log "done"
    fn scpi_flow(parts: Vec<u8>, locals: Vec<Value>) -> FlowDefinition {
        FlowDefinition {
            flows: vec![Flow {
                components: vec![
                    Component::new(t::START).with_output(seq(1, 0)),
                    Component::new(t::SCPI)
                        .with_inputs(vec![0])
                        .with_output(seq(2, 1))
                        .with_payload(ComponentPayload::Scpi {
                            instructions: parts,
                        }),
                    Component::new(t::LOG)
                        .with_inputs(vec![1])
                        .with_property(constant(0)),
                ],
                component_inputs: vec![InputFlags::SEQUENCE, InputFlags::SEQUENCE],
                local_variables: locals,
            }],
            constants: vec![Value::string("done")],
            globals: vec![],
        }
    }

    fn scpi_texts(host: &RecordingHost) -> Vec<&str> {
        host.logs
            .iter()
            .filter(|(severity, _)| *severity == LogSeverity::Scpi)
            .map(|(_, text)| text.as_str())
            .collect()
    }

    #[test]
    fn command_with_embedded_expression() {
        let mut parts = literal_part("OUTP1:STAT ");
        parts.push(scpi_part::EXPRESSION);
        parts.extend(local(0));
        parts.extend([scpi_part::COMMAND, scpi_part::END]);
        let (mut rt, _) = start(scpi_flow(parts, vec![Value::Int32(1)]), RecordingHost::default());
        run_ticks(&mut rt, 4);
        assert!(rt.host().errors.is_empty(), "{:?}", rt.host().errors);
        assert_eq!(rt.host().scpi_sent, ["OUTP1:STAT 1\n"]);
        assert_eq!(scpi_texts(rt.host()), ["SCPI COMMAND: OUTP1:STAT 1"]);
        assert_eq!(rt.host().log_texts().iter().filter(|t| **t == "done").count(), 1);
        assert_eq!(rt.scpi_waiter(), None);
    }

    #[test]
    fn pending_query_assigns_the_result_when_ready() {
        let mut parts = literal_part("MEAS:VOLT?");
        parts.push(scpi_part::QUERY_WITH_ASSIGNMENT);
        parts.extend(local(0));
        parts.push(scpi_part::END);
        let host = RecordingHost {
            scpi_pending: true,
            scpi_results: [Ok(String::from("42"))].into(),
            ..RecordingHost::default()
        };
        let (mut rt, root) = start(scpi_flow(parts, vec![Value::Undefined]), host);
        run_ticks(&mut rt, 4);
        assert_eq!(rt.host().scpi_sent, ["MEAS:VOLT?\n"]);
        assert_eq!(rt.scpi_waiter(), Some((root, 1)));
        assert!(matches!(
            rt.execution_state(root, 1),
            Some(ComponentExecutionState::Scpi(ScpiState {
                phase: ScpiPhase::AwaitingResult,
                ..
            }))
        ));

        rt.scpi_result_is_ready();
        run_ticks(&mut rt, 3);
        assert_eq!(rt.flow_state(root).unwrap().value(2), Some(&Value::Int32(42)));
        assert_eq!(
            scpi_texts(rt.host()),
            ["SCPI QUERY: MEAS:VOLT?", "SCPI QUERY RESULT: 42"]
        );
        assert!(rt.host().log_texts().contains(&"done"));
        assert_eq!(rt.host().scpi_sent.len(), 1);
    }

    #[test]
    fn waiting_on_the_interpreter_is_gated_but_not_reported() {
        let mut parts = literal_part("MEAS:VOLT?");
        parts.push(scpi_part::QUERY_WITH_ASSIGNMENT);
        parts.extend(local(0));
        parts.push(scpi_part::END);
        let host = RecordingHost {
            scpi_pending: true,
            scpi_results: [Ok(String::from("42"))].into(),
            ..RecordingHost::default()
        };
        let (mut rt, root) = start(scpi_flow(parts, vec![Value::Undefined]), host);
        let wire = Wire::default();
        rt.connect_debugger(Box::new(wire.clone()));
        rt.debugger_input(b"0\n").unwrap();
        run_ticks(&mut rt, 4);
        assert_eq!(rt.scpi_waiter(), Some((root, 1)));

        wire.take();
        run_ticks(&mut rt, 5);
        let traffic = wire.take();
        assert!(
            !traffic.lines().any(|line| line == "2" || line.starts_with("1\t")),
            "{traffic}"
        );

        rt.debugger_input(b"1\n").unwrap();
        rt.scpi_result_is_ready();
        run_ticks(&mut rt, 3);
        assert_eq!(rt.flow_state(root).unwrap().value(2), Some(&Value::Undefined));
        assert_eq!(rt.queue().len(), 1);

        rt.debugger_input(b"0\n").unwrap();
        run_ticks(&mut rt, 3);
        assert_eq!(rt.flow_state(root).unwrap().value(2), Some(&Value::Int32(42)));
    }

    #[test]
    fn interpreter_error_becomes_a_flow_error() {
        let mut parts = literal_part("FOO");
        parts.extend([scpi_part::COMMAND, scpi_part::END]);
        let host = RecordingHost {
            scpi_results: [Err(ScpiError {
                code: -113,
                message: "Undefined header".into(),
            })]
            .into(),
            ..RecordingHost::default()
        };
        let (mut rt, _) = start(scpi_flow(parts, vec![]), host);
        run_ticks(&mut rt, 3);
        assert_eq!(rt.host().errors, ["SCPI 'FOO': Undefined header"]);
        assert_eq!(rt.scpi_waiter(), None);
    }

    #[test]
    fn shutdown_cancels_an_in_flight_request_once() {
        let mut parts = literal_part("*OPC?");
        parts.extend([scpi_part::QUERY, scpi_part::END]);
        let host = RecordingHost {
            scpi_pending: true,
            ..RecordingHost::default()
        };
        let (mut rt, _) = start(scpi_flow(parts, vec![]), host);
        run_ticks(&mut rt, 2);
        assert!(rt.scpi_waiter().is_some());
        rt.shutdown();
        assert_eq!(rt.host().scpi_cancels, 1);
        assert_eq!(rt.scpi_waiter(), None);
    }

    #[test]
    fn query_results_are_typed() {
        assert_eq!(parse_result("\"Rigol\"\n"), Value::string("Rigol"));
        assert_eq!(parse_result(" 12 "), Value::Int32(12));
        assert_eq!(parse_result("1.5"), Value::Float(1.5));
        assert_eq!(parse_result("OFF"), Value::string("OFF"));
    }
}
