//! Instruction programs: assembling byte streams and decoding them back.

use crate::error::{Result, TcuError};
use crate::layout::{Instruction, InstructionLayout, Op};
use bytes::{Bytes, BytesMut};
use tcu_arch::Register;

/// Incrementally assembled instruction stream.
#[derive(Debug)]
pub struct ProgramBuilder<'a> {
    layout: &'a InstructionLayout,
    buf: BytesMut,
}

impl<'a> ProgramBuilder<'a> {
    /// Empty program for `layout`.
    pub fn new(layout: &'a InstructionLayout) -> Self {
        Self {
            layout,
            buf: BytesMut::new(),
        }
    }

    /// Append one instruction.
    pub fn push(&mut self, instruction: Instruction) -> &mut Self {
        self.layout.put(instruction, &mut self.buf);
        self
    }

    /// Append a configuration register write.
    pub fn configure(&mut self, register: Register, value: u64) -> &mut Self {
        self.push(self.layout.configure(register, value))
    }

    /// Append `count` no-ops.
    pub fn no_ops(&mut self, count: usize) -> &mut Self {
        let no_op = self.layout.no_op();
        for _ in 0..count {
            self.push(no_op);
        }
        self
    }

    /// Append an already encoded program.
    ///
    /// # Errors
    ///
    /// Returns an error if `program` is not a whole number of instructions.
    pub fn append_program(&mut self, program: &[u8]) -> Result<&mut Self> {
        let n = self.layout.instruction_size_bytes();
        if program.len() % n != 0 {
            return Err(TcuError::invalid_argument(format!(
                "program of {} bytes is not a multiple of the {n}-byte instruction",
                program.len()
            )));
        }
        self.buf.extend_from_slice(program);
        Ok(self)
    }

    /// Append no-ops until the byte length is a multiple of `align`.
    pub fn pad_to_alignment(&mut self, align: usize) -> &mut Self {
        if align > 0 {
            while self.buf.len() % align != 0 {
                self.push(self.layout.no_op());
            }
        }
        self
    }

    /// Bytes assembled so far.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Whether nothing has been appended.
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Instructions assembled so far.
    pub fn instruction_count(&self) -> usize {
        self.buf.len() / self.layout.instruction_size_bytes()
    }

    /// Finish into an immutable byte stream.
    pub fn finish(self) -> Bytes {
        self.buf.freeze()
    }
}

/// Decode every instruction of a program binary.
///
/// # Errors
///
/// Returns an error if `program` is not a whole number of instructions.
pub fn disassemble(layout: &InstructionLayout, program: &[u8]) -> Result<Vec<Op>> {
    let n = layout.instruction_size_bytes();
    if program.len() % n != 0 {
        return Err(TcuError::invalid_argument(format!(
            "program of {} bytes is not a multiple of the {n}-byte instruction",
            program.len()
        )));
    }
    program
        .chunks_exact(n)
        .map(|chunk| layout.from_bytes(chunk).map(|instr| layout.decode(instr)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tcu_arch::opcode::DataMoveFlag;
    use tcu_arch::presets;

    #[test]
    fn test_builder_and_disassemble() {
        let layout = InstructionLayout::new(&presets::tiny()).unwrap();
        let mut builder = ProgramBuilder::new(&layout);
        builder
            .configure(Register::Timeout, 100)
            .push(layout.data_move(DataMoveFlag::Dram0ToMemory, 1, 2, 0))
            .no_ops(2);
        assert_eq!(builder.instruction_count(), 4);

        let program = builder.finish();
        let ops = disassemble(&layout, &program).unwrap();
        assert_eq!(
            ops,
            vec![
                Op::Configure {
                    register: Register::Timeout.id(),
                    value: 100
                },
                Op::DataMove {
                    flag: DataMoveFlag::Dram0ToMemory,
                    memory_address: 1,
                    remote_address: 2,
                    size: 0
                },
                Op::NoOp,
                Op::NoOp,
            ]
        );
    }

    #[test]
    fn test_pad_to_alignment() {
        let layout = InstructionLayout::new(&presets::tiny()).unwrap();
        assert_eq!(layout.instruction_size_bytes(), 7);
        let mut builder = ProgramBuilder::new(&layout);
        builder.no_ops(1).pad_to_alignment(8);
        assert_eq!(builder.len(), 56);
    }

    #[test]
    fn test_append_program_checks_length() {
        let layout = InstructionLayout::new(&presets::pynqz1()).unwrap();
        let mut builder = ProgramBuilder::new(&layout);
        assert!(builder.append_program(&[0u8; 12]).is_err());
        builder.append_program(&[0u8; 16]).unwrap();
        assert_eq!(builder.instruction_count(), 2);
        assert!(disassemble(&layout, &[0u8; 9]).is_err());
    }
}
