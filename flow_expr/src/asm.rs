// Copyright 2026 the Execution Tape Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Instruction stream assembler.
//!
//! Flow templates normally arrive precompiled. [`InstructionBuilder`] exists for hosts that build
//! templates in code, and for tests and benchmarks.

use alloc::vec::Vec;

use crate::instruction::{Instruction, InstructionError, Opcode};

/// Builds an instruction stream word by word.
///
/// Methods chain; the first out-of-range operand is remembered and reported by
/// [`InstructionBuilder::finish`].
#[derive(Clone, Debug, Default)]
pub struct InstructionBuilder {
    bytes: Vec<u8>,
    error: Option<InstructionError>,
}

impl InstructionBuilder {
    /// Creates an empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn emit(&mut self, opcode: Opcode, operand: u32) -> &mut Self {
        match Instruction::new(opcode, operand) {
            Ok(ins) => self.bytes.extend_from_slice(&ins.encode().to_le_bytes()),
            Err(err) => {
                self.error.get_or_insert(err);
            }
        }
        self
    }

    /// Pushes constant `index`.
    pub fn push_constant(&mut self, index: u16) -> &mut Self {
        self.emit(Opcode::PushConstant, u32::from(index))
    }

    /// Pushes the value of input slot `index`.
    pub fn push_input(&mut self, index: u16) -> &mut Self {
        self.emit(Opcode::PushInput, u32::from(index))
    }

    /// Pushes a reference to local variable `index`.
    pub fn push_local(&mut self, index: u16) -> &mut Self {
        self.emit(Opcode::PushLocalVariable, u32::from(index))
    }

    /// Pushes a reference to global variable `index`.
    pub fn push_global(&mut self, index: u16) -> &mut Self {
        self.emit(Opcode::PushGlobalVariable, u32::from(index))
    }

    /// Pushes a reference to output `index` of the evaluating component.
    pub fn push_output(&mut self, index: u16) -> &mut Self {
        self.emit(Opcode::PushOutput, u32::from(index))
    }

    /// Replaces the top two values (array, index) with an element reference.
    pub fn array_element(&mut self) -> &mut Self {
        self.emit(Opcode::ArrayElement, 0)
    }

    /// Runs operation `index`.
    pub fn operation(&mut self, index: u16) -> &mut Self {
        self.emit(Opcode::Operation, u32::from(index))
    }

    /// Terminates the expression.
    pub fn end(&mut self) -> &mut Self {
        self.emit(Opcode::End, 0)
    }

    /// Appends raw bytes, for streams that embed expressions among other data.
    pub fn raw(&mut self, bytes: &[u8]) -> &mut Self {
        self.bytes.extend_from_slice(bytes);
        self
    }

    /// Returns the assembled stream.
    pub fn finish(&mut self) -> Result<Vec<u8>, InstructionError> {
        if let Some(err) = self.error.take() {
            self.bytes.clear();
            return Err(err);
        }
        Ok(core::mem::take(&mut self.bytes))
    }
}
