use crate::kernel::cpu::R0;
use crate::kernel::instruction::Instruction;
use crate::kernel::Word;

/// The instructions every program ends with: `SET R0 0; PUSH R0; TRAP`,
/// i.e. the EXIT system call.
pub fn exit_sequence() -> [Instruction; 3] {
    [
        Instruction::set(R0 as Word, 0),
        Instruction::push(R0 as Word),
        Instruction::trap(),
    ]
}

/// A loaded program: a flat stream of fixed-width instructions.
///
/// When registered with the kernel, `call_count` tracks how many processes
/// have been created from it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Program {
    pub name: String,
    pub instructions: Vec<Instruction>,
    pub default_alloc_size: Option<usize>,
    pub call_count: u64,
}

impl Program {
    pub fn new(name: impl Into<String>, instructions: Vec<Instruction>) -> Program {
        Program {
            name: name.into(),
            instructions,
            default_alloc_size: None,
            call_count: 0,
        }
    }

    pub fn with_default_alloc_size(mut self, alloc_size: usize) -> Program {
        self.default_alloc_size = Some(alloc_size);
        self
    }

    pub fn ends_with_exit(&self) -> bool {
        self.instructions.ends_with(&exit_sequence())
    }

    /// Appends the EXIT sequence unless the program already ends with it.
    pub fn ensure_exit(&mut self) {
        if !self.ends_with_exit() {
            self.instructions.extend(exit_sequence());
        }
    }

    /// The memory image of the program, EXIT sequence included.
    pub fn export(&self) -> Vec<Word> {
        let mut program = self.clone();
        program.ensure_exit();
        program
            .instructions
            .iter()
            .flat_map(|instruction| instruction.to_words())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::instruction::{Opcode, INSTRUCTION_SIZE};

    #[test]
    fn test_program_export_appends_exit() {
        let program = Program::new("five", vec![Instruction::set(0, 5)]);
        let image = program.export();

        assert_eq!(image.len(), 4 * INSTRUCTION_SIZE);
        assert_eq!(&image[..4], &[Opcode::Set as Word, 0, 5, 0]);
        assert_eq!(&image[12..], &[Opcode::Trap as Word, 0, 0, 0]);
    }

    #[test]
    fn test_program_export_keeps_existing_exit() {
        let mut instructions = vec![Instruction::set(1, 2)];
        instructions.extend(exit_sequence());
        let program = Program::new("exits", instructions);

        assert!(program.ends_with_exit());
        assert_eq!(program.export().len(), 4 * INSTRUCTION_SIZE);
    }
}
