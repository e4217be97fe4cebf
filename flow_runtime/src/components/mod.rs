// Copyright 2026 the Execution Tape Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Built-in component executors.
//!
//! Output conventions: action components that have a sequence output keep it at index 0, and
//! data results start at index 1. Components that end a repetition (counter, loop) or hand back a
//! result (sort-array) use their last output for it.

pub(crate) mod actions;
pub(crate) mod branching;
pub(crate) mod call;
pub(crate) mod dialogs;
pub(crate) mod errors;
pub mod mqtt;
pub(crate) mod scpi;
pub(crate) mod timing;

#[cfg(test)]
pub(crate) mod test_support;

use crate::host::Host;
use crate::registry::ComponentRegistry;
use crate::template::component_type as t;

/// Output of single-result components (eval-expr, constant).
pub(crate) const VALUE_OUTPUT: usize = 1;
/// Output fired when a test holds.
pub(crate) const TRUE_OUTPUT: usize = 1;
/// Output fired when a test fails.
pub(crate) const FALSE_OUTPUT: usize = 2;

pub(crate) fn register_builtins<H: Host + 'static>(registry: &mut ComponentRegistry<H>) {
    registry.register(t::START, actions::execute_start::<H>);
    registry.register(t::END, call::execute_end::<H>);
    registry.register(t::INPUT, call::execute_input::<H>);
    registry.register(t::OUTPUT, call::execute_output::<H>);
    registry.register(t::WATCH_VARIABLE, timing::execute_watch_variable::<H>);
    registry.register(t::EVAL_EXPR, actions::execute_eval_expr::<H>);
    registry.register(t::SET_VARIABLE, actions::execute_set_variable::<H>);
    registry.register(t::SWITCH, branching::execute_switch::<H>);
    registry.register(t::COMPARE, branching::execute_compare::<H>);
    registry.register(t::IS_TRUE, branching::execute_is_true::<H>);
    registry.register(t::CONSTANT, actions::execute_constant::<H>);
    registry.register(t::LOG, actions::execute_log::<H>);
    registry.register(t::CALL_ACTION, call::execute_call_action::<H>);
    registry.register(t::DELAY, timing::execute_delay::<H>);
    registry.register(t::ERROR, errors::execute_error::<H>);
    registry.register(t::CATCH_ERROR, errors::execute_catch_error::<H>);
    registry.register(t::COUNTER, timing::execute_counter::<H>);
    registry.register(t::LOOP, timing::execute_loop::<H>);
    registry.register(t::SHOW_PAGE, actions::execute_show_page::<H>);
    registry.register(t::SCPI, scpi::execute_scpi::<H>);
    registry.register(t::SHOW_MESSAGE_BOX, dialogs::execute_show_message_box::<H>);
    registry.register(t::SHOW_KEYBOARD, dialogs::execute_show_keyboard::<H>);
    registry.register(t::SHOW_KEYPAD, dialogs::execute_show_keypad::<H>);
    registry.register(t::NOOP, actions::execute_noop::<H>);
    registry.register(t::COMMENT, actions::execute_comment::<H>);
    registry.register(t::ON_EVENT, actions::execute_on_event::<H>);
    registry.register(t::SORT_ARRAY, actions::execute_sort_array::<H>);
    registry.register(t::TEST_AND_SET, timing::execute_test_and_set::<H>);
    registry.register(t::USER_WIDGET, call::execute_user_widget::<H>);
}
