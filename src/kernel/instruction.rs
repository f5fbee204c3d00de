use std::fmt;

use super::Word;

/// Number of words in one instruction: the opcode followed by three
/// arguments.
pub const INSTRUCTION_SIZE: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    Set = 0,
    Add = 1,
    Sub = 2,
    Mul = 3,
    Div = 4,
    Copy = 5,
    Branch = 6,
    Bne = 7,
    Blt = 8,
    Pop = 9,
    Push = 10,
    Load = 11,
    Save = 12,
    Trap = 15,
}

impl Opcode {
    pub const ALL: [Opcode; 14] = [
        Opcode::Set,
        Opcode::Add,
        Opcode::Sub,
        Opcode::Mul,
        Opcode::Div,
        Opcode::Copy,
        Opcode::Branch,
        Opcode::Bne,
        Opcode::Blt,
        Opcode::Pop,
        Opcode::Push,
        Opcode::Load,
        Opcode::Save,
        Opcode::Trap,
    ];

    pub fn mnemonic(self) -> &'static str {
        match self {
            Opcode::Set => "SET",
            Opcode::Add => "ADD",
            Opcode::Sub => "SUB",
            Opcode::Mul => "MUL",
            Opcode::Div => "DIV",
            Opcode::Copy => "COPY",
            Opcode::Branch => "BRANCH",
            Opcode::Bne => "BNE",
            Opcode::Blt => "BLT",
            Opcode::Pop => "POP",
            Opcode::Push => "PUSH",
            Opcode::Load => "LOAD",
            Opcode::Save => "SAVE",
            Opcode::Trap => "TRAP",
        }
    }

    pub fn from_mnemonic(mnemonic: &str) -> Option<Opcode> {
        Opcode::ALL
            .into_iter()
            .find(|opcode| opcode.mnemonic().eq_ignore_ascii_case(mnemonic))
    }
}

impl TryFrom<Word> for Opcode {
    type Error = Word;

    fn try_from(value: Word) -> Result<Self, Self::Error> {
        Opcode::ALL
            .into_iter()
            .find(|opcode| *opcode as Word == value)
            .ok_or(value)
    }
}

/// One decoded instruction. Argument meaning depends on the opcode:
/// register numbers, an immediate value, or a BASE-relative address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Instruction {
    pub opcode: Opcode,
    pub arg1: Word,
    pub arg2: Word,
    pub arg3: Word,
}

impl Instruction {
    pub fn new(opcode: Opcode, arg1: Word, arg2: Word, arg3: Word) -> Instruction {
        Instruction { opcode, arg1, arg2, arg3 }
    }

    /// Fails with the raw opcode when it is not part of the instruction set.
    pub fn decode(words: [Word; INSTRUCTION_SIZE]) -> Result<Instruction, Word> {
        let opcode = Opcode::try_from(words[0])?;
        Ok(Instruction::new(opcode, words[1], words[2], words[3]))
    }

    pub fn to_words(self) -> [Word; INSTRUCTION_SIZE] {
        [self.opcode as Word, self.arg1, self.arg2, self.arg3]
    }

    pub fn set(register: Word, value: Word) -> Instruction {
        Instruction::new(Opcode::Set, register, value, 0)
    }

    pub fn push(register: Word) -> Instruction {
        Instruction::new(Opcode::Push, register, 0, 0)
    }

    pub fn pop(register: Word) -> Instruction {
        Instruction::new(Opcode::Pop, register, 0, 0)
    }

    pub fn trap() -> Instruction {
        Instruction::new(Opcode::Trap, 0, 0, 0)
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Instruction { opcode, arg1, arg2, arg3 } = *self;
        match opcode {
            Opcode::Set => write!(f, "SET R{} = {}", arg1, arg2),
            Opcode::Add => write!(f, "ADD R{} = R{} + R{}", arg1, arg2, arg3),
            Opcode::Sub => write!(f, "SUB R{} = R{} - R{}", arg1, arg2, arg3),
            Opcode::Mul => write!(f, "MUL R{} = R{} * R{}", arg1, arg2, arg3),
            Opcode::Div => write!(f, "DIV R{} = R{} / R{}", arg1, arg2, arg3),
            Opcode::Copy => write!(f, "COPY R{} = R{}", arg1, arg2),
            Opcode::Branch => write!(f, "BRANCH @{}", arg1),
            Opcode::Bne => write!(f, "BNE (R{} != R{}) @{}", arg1, arg2, arg3),
            Opcode::Blt => write!(f, "BLT (R{} < R{}) @{}", arg1, arg2, arg3),
            Opcode::Pop => write!(f, "POP R{}", arg1),
            Opcode::Push => write!(f, "PUSH R{}", arg1),
            Opcode::Load => write!(f, "LOAD R{} <-- @R{}", arg1, arg2),
            Opcode::Save => write!(f, "SAVE R{} --> @R{}", arg1, arg2),
            Opcode::Trap => write!(f, "TRAP"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instruction_decode_known_opcode() {
        let instruction = Instruction::decode([1, 0, 1, 2]).unwrap();
        assert_eq!(instruction, Instruction::new(Opcode::Add, 0, 1, 2));
        assert_eq!(instruction.to_words(), [1, 0, 1, 2]);
    }

    #[test]
    fn test_instruction_decode_unknown_opcode() {
        assert_eq!(Instruction::decode([13, 0, 0, 0]), Err(13));
        assert_eq!(Instruction::decode([-1, 0, 0, 0]), Err(-1));
    }

    #[test]
    fn test_opcode_from_mnemonic_ignores_case() {
        assert_eq!(Opcode::from_mnemonic("branch"), Some(Opcode::Branch));
        assert_eq!(Opcode::from_mnemonic("TRAP"), Some(Opcode::Trap));
        assert_eq!(Opcode::from_mnemonic("JMP"), None);
    }

    #[test]
    fn test_instruction_display() {
        assert_eq!(Instruction::new(Opcode::Blt, 1, 2, 40).to_string(), "BLT (R1 < R2) @40");
        assert_eq!(Instruction::set(3, -7).to_string(), "SET R3 = -7");
    }
}
