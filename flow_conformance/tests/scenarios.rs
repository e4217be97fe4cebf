// Copyright 2026 the Execution Tape Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! End-to-end programs run through the public runtime API.

use flow_conformance::{
    MockHost, RecordingTransport, constant, data, expr, local, run_until_idle, scpi_literal, seq,
    start,
};
use flow_expr::value::Value;
use flow_runtime::debugger::{DebuggerState, outbound};
use flow_runtime::{FlowStateId, Runtime};
use flow_runtime::host::LogSeverity;
use flow_runtime::template::{
    CompareOperator, Component, ComponentOutput, ComponentPayload, Flow, FlowDefinition,
    InputFlags, component_type as t, scpi_part,
};

/// `x := 5`, then `x > 3` logs `big` on true and `small` on false.
fn set_then_compare() -> FlowDefinition {
    FlowDefinition {
        flows: vec![Flow {
            components: vec![
                Component::new(t::START).with_output(seq(1, 0)),
                Component::new(t::SET_VARIABLE)
                    .with_inputs(vec![0])
                    .with_output(seq(2, 1))
                    .with_property(local(0))
                    .with_property(constant(0)),
                Component::new(t::COMPARE)
                    .with_inputs(vec![1])
                    .with_output(ComponentOutput::seq(vec![]))
                    .with_output(data(3, 2))
                    .with_output(data(4, 3))
                    .with_payload(ComponentPayload::Compare {
                        operator: CompareOperator::Greater,
                    })
                    .with_property(local(0))
                    .with_property(constant(1)),
                Component::new(t::LOG)
                    .with_inputs(vec![2])
                    .with_property(constant(2)),
                Component::new(t::LOG)
                    .with_inputs(vec![3])
                    .with_property(constant(3)),
            ],
            component_inputs: vec![
                InputFlags::SEQUENCE,
                InputFlags::SEQUENCE,
                InputFlags::DATA,
                InputFlags::DATA,
            ],
            local_variables: vec![Value::Undefined],
        }],
        constants: vec![
            Value::Int32(5),
            Value::Int32(3),
            Value::string("big"),
            Value::string("small"),
        ],
        globals: vec![],
    }
}

#[test]
fn assignment_then_comparison_logs_once() {
    let (mut rt, root) = start(set_then_compare(), MockHost::default());
    let ticks = run_until_idle(&mut rt, 10);
    assert!(ticks < 10, "queue drained");
    assert!(rt.host().errors.is_empty(), "{:?}", rt.host().errors);
    assert_eq!(rt.host().logged(LogSeverity::Info), ["big"]);
    assert_eq!(rt.flow_state(root).unwrap().value(4), Some(&Value::Int32(5)));
}

/// `l0[constants[index]] := constants[value]`, with `l0` a two-element integer array.
fn set_element(index: u16, value: u16) -> FlowDefinition {
    FlowDefinition {
        flows: vec![Flow {
            components: vec![
                Component::new(t::START).with_output(seq(1, 0)),
                Component::new(t::SET_VARIABLE)
                    .with_inputs(vec![0])
                    .with_output(ComponentOutput::seq(vec![]))
                    .with_property(expr(|b| {
                        b.push_local(0).push_constant(index).array_element();
                    }))
                    .with_property(constant(value)),
            ],
            component_inputs: vec![InputFlags::SEQUENCE],
            local_variables: vec![Value::array(0, vec![Value::Int32(0), Value::Int32(0)])],
        }],
        constants: vec![
            Value::Int32(1),
            Value::Int32(5),
            Value::Double(2.5),
            Value::string("x"),
        ],
        globals: vec![],
    }
}

fn element(rt: &Runtime<MockHost>, root: FlowStateId, i: usize) -> Value {
    match rt.flow_state(root).unwrap().value(1) {
        Some(Value::Array(array)) => array.get(i).unwrap(),
        other => panic!("expected an array, got {other:?}"),
    }
}

#[test]
fn set_variable_writes_a_coerced_array_element() {
    let (mut rt, root) = start(set_element(0, 2), MockHost::default());
    let transport = RecordingTransport::default();
    rt.connect_debugger(Box::new(transport.clone()));
    rt.debugger_input(b"0\n").unwrap();
    transport.clear();

    run_until_idle(&mut rt, 10);
    assert!(rt.host().errors.is_empty(), "{:?}", rt.host().errors);
    assert_eq!(element(&rt, root, 1), Value::Int32(2));
    assert_eq!(
        transport.lines_of_kind(outbound::VALUE_CHANGED),
        [format!("6\t{}\t1\t{{0,2}}", root.index())]
    );
}

#[test]
fn set_variable_past_the_array_end_is_a_flow_error() {
    let (mut rt, root) = start(set_element(1, 2), MockHost::default());
    run_until_idle(&mut rt, 10);
    assert_eq!(rt.host().errors.len(), 1);
    assert!(
        rt.host().error_messages()[0].contains("index out of bounds"),
        "{:?}",
        rt.host().errors
    );
    assert_eq!(element(&rt, root, 0), Value::Int32(0));
    assert_eq!(element(&rt, root, 1), Value::Int32(0));
}

#[test]
fn set_variable_rejects_a_wrong_kind_for_an_element() {
    let (mut rt, root) = start(set_element(0, 3), MockHost::default());
    run_until_idle(&mut rt, 10);
    assert_eq!(
        rt.host().error_messages(),
        ["Can not assign string to integer"]
    );
    assert_eq!(element(&rt, root, 1), Value::Int32(0));
}

#[test]
fn scpi_command_interpolates_a_local() {
    let mut parts = scpi_literal("OUTP1:STAT ");
    parts.push(scpi_part::EXPRESSION);
    parts.extend(local(0));
    parts.extend([scpi_part::COMMAND, scpi_part::END]);
    let def = FlowDefinition {
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
            local_variables: vec![Value::Int32(1)],
        }],
        constants: vec![Value::string("sent")],
        globals: vec![],
    };
    let (mut rt, _) = start(def, MockHost::default());
    run_until_idle(&mut rt, 10);
    assert!(rt.host().errors.is_empty(), "{:?}", rt.host().errors);
    assert_eq!(rt.host().scpi_sent, ["OUTP1:STAT 1\n"]);
    assert_eq!(rt.host().logged(LogSeverity::Info), ["sent"]);
}

#[test]
fn paused_debugger_holds_the_queue_until_resumed() {
    let (mut rt, _) = start(set_then_compare(), MockHost::default());
    let transport = RecordingTransport::default();
    rt.connect_debugger(Box::new(transport.clone()));
    assert_eq!(rt.debugger().state(), DebuggerState::Paused);

    let queued = rt.queue().len();
    let summary = rt.tick();
    assert!(summary.gated);
    assert_eq!(summary.executed, 0);
    assert_eq!(rt.queue().len(), queued);
    assert!(rt.host().logs.is_empty());

    rt.debugger_input(b"0\n").unwrap();
    assert_eq!(rt.debugger().state(), DebuggerState::Resumed);
    run_until_idle(&mut rt, 10);
    assert!(rt.queue().is_empty());
    assert_eq!(rt.host().logged(LogSeverity::Info), ["big"]);
    assert_eq!(
        transport.lines_of_kind(outbound::STATE_CHANGED),
        ["0\t1", "0\t0"]
    );
}

#[test]
fn single_step_runs_one_entry_then_pauses() {
    let (mut rt, _) = start(set_then_compare(), MockHost::default());
    rt.connect_debugger(Box::new(RecordingTransport::default()));

    rt.debugger_input(b"2\n").unwrap();
    let summary = rt.tick();
    assert_eq!(summary.executed, 1);
    assert_eq!(rt.debugger().state(), DebuggerState::Paused);
    assert_eq!(summary.remaining, 1, "start queued the assignment");

    assert!(rt.tick().gated);
    assert_eq!(rt.queue().len(), 1);
}

#[test]
fn breakpoint_pauses_before_its_component_and_resume_passes_it() {
    let (mut rt, _) = start(set_then_compare(), MockHost::default());
    let transport = RecordingTransport::default();
    rt.connect_debugger(Box::new(transport.clone()));
    rt.debugger_input(b"3\t0\t2\n0\n").unwrap();

    run_until_idle(&mut rt, 5);
    assert_eq!(rt.debugger().state(), DebuggerState::Paused);
    let front = rt.queue().peek().copied().unwrap();
    assert_eq!(front.component_index, 2);
    assert!(rt.host().logs.is_empty());

    rt.debugger_input(b"0\n").unwrap();
    run_until_idle(&mut rt, 5);
    assert_eq!(rt.host().logged(LogSeverity::Info), ["big"]);
}

#[test]
fn disabled_breakpoint_does_not_stop() {
    let (mut rt, _) = start(set_then_compare(), MockHost::default());
    rt.connect_debugger(Box::new(RecordingTransport::default()));
    rt.debugger_input(b"3\t0\t2\n6\t0\t2\n0\n").unwrap();
    run_until_idle(&mut rt, 10);
    assert_eq!(rt.debugger().state(), DebuggerState::Resumed);
    assert_eq!(rt.host().logged(LogSeverity::Info), ["big"]);
}

#[test]
fn restart_runs_the_program_again() {
    let (mut rt, _) = start(set_then_compare(), MockHost::default());
    let transport = RecordingTransport::default();
    rt.connect_debugger(Box::new(transport.clone()));
    rt.debugger_input(b"0\n").unwrap();
    run_until_idle(&mut rt, 10);

    transport.clear();
    rt.debugger_input(b"7\n").unwrap();
    assert_eq!(transport.lines_of_kind(outbound::FLOW_STATE_DESTROYED).len(), 1);
    assert_eq!(transport.lines_of_kind(outbound::FLOW_STATE_CREATED).len(), 1);
    assert!(rt.debugger().is_connected());

    run_until_idle(&mut rt, 10);
    assert_eq!(rt.host().logged(LogSeverity::Info), ["big", "big"]);
}

#[test]
fn connecting_late_replays_live_instances() {
    let (mut rt, root) = start(set_then_compare(), MockHost::default());
    run_until_idle(&mut rt, 10);
    let transport = RecordingTransport::default();
    rt.connect_debugger(Box::new(transport.clone()));
    let created = transport.lines_of_kind(outbound::FLOW_STATE_CREATED);
    assert_eq!(created, [format!("7\t{}\t0\t-1\t-1", root.index())]);
    assert_eq!(
        transport.lines_of_kind(outbound::LOCAL_VARIABLE_INIT),
        [format!("4\t{}\t0\t5", root.index())]
    );
}
