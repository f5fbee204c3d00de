use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use super::Program;
use crate::error::{Result, SimError};
use crate::kernel::cpu::{BASE, LIM, PC, SP};
use crate::kernel::instruction::{Instruction, Opcode, INSTRUCTION_SIZE};
use crate::kernel::Word;

/// Loads a pidgin assembly program from disk. The program is named after
/// the file stem.
pub fn load_program(path: &Path) -> Result<Program> {
    let file = File::open(path).map_err(|source| SimError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let reader = BufReader::new(file);

    let mut source = String::new();
    for line in reader.lines() {
        let line = line.map_err(|source| SimError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        source.push_str(&line);
        source.push('\n');
    }

    let name = path
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default();
    parse_program(&name, &source)
}

/// Parses pidgin assembly.
///
/// One instruction per line (`OPCODE arg arg arg`, missing arguments are
/// zero), `:name` defines a label at the next instruction, `#` starts a
/// comment. Registers are written `R0`..`R4`, `PC`, `SP`, `BASE` or `LIM`;
/// any other non-numeric argument is a label reference, resolved to the
/// label's BASE-relative address once the whole file has been read. The
/// EXIT sequence is appended to the result.
pub fn parse_program(name: &str, source: &str) -> Result<Program> {
    let mut instructions = Vec::new();
    let mut labels: HashMap<String, Word> = HashMap::new();
    let mut orphans: Vec<(usize, usize, String, usize)> = Vec::new();

    for (line_idx, line) in source.lines().enumerate() {
        let line_num = line_idx + 1;
        let line = match line.find('#') {
            Some(comment_pos) => &line[..comment_pos],
            None => line,
        };
        let line = line.trim().to_uppercase();
        if line.is_empty() {
            continue;
        }

        if let Some(label) = line.strip_prefix(':') {
            let label = label.split_whitespace().next().unwrap_or_default();
            if label.is_empty() {
                return Err(parse_error(line_num, "empty label"));
            }
            let address = (instructions.len() * INSTRUCTION_SIZE) as Word;
            if labels.insert(label.to_string(), address).is_some() {
                return Err(parse_error(line_num, format!("duplicate label '{}'", label)));
            }
            continue;
        }

        let mut tokens = line.split_whitespace();
        let mnemonic = tokens.next().unwrap_or_default();
        let opcode = Opcode::from_mnemonic(mnemonic)
            .ok_or_else(|| parse_error(line_num, format!("unknown opcode ({})", mnemonic)))?;

        let mut args = [0; INSTRUCTION_SIZE - 1];
        for (arg_idx, token) in tokens.enumerate() {
            if arg_idx >= args.len() {
                return Err(parse_error(line_num, format!("too many arguments for {}", mnemonic)));
            }
            args[arg_idx] = match parse_arg(token) {
                Some(value) => value,
                None => {
                    orphans.push((instructions.len(), arg_idx, token.to_string(), line_num));
                    0
                }
            };
        }

        instructions.push(Instruction::new(opcode, args[0], args[1], args[2]));
    }

    if instructions.is_empty() {
        return Err(SimError::EmptyProgram);
    }

    for (instruction_idx, arg_idx, label, line_num) in orphans {
        let address = *labels
            .get(&label)
            .ok_or_else(|| parse_error(line_num, format!("undefined label '{}'", label)))?;
        let instruction = &mut instructions[instruction_idx];
        match arg_idx {
            0 => instruction.arg1 = address,
            1 => instruction.arg2 = address,
            _ => instruction.arg3 = address,
        }
    }

    let mut program = Program::new(name, instructions);
    program.ensure_exit();
    log::debug!("Parsed program '{}' ({} instructions)", program.name, program.instructions.len());
    Ok(program)
}

fn parse_arg(token: &str) -> Option<Word> {
    match token {
        "PC" => return Some(PC as Word),
        "SP" => return Some(SP as Word),
        "BASE" => return Some(BASE as Word),
        "LIM" => return Some(LIM as Word),
        _ => {}
    }

    let number = match token.strip_prefix('R') {
        Some(register) if register.starts_with(|c: char| c.is_ascii_digit()) => register,
        _ => token,
    };
    number.parse().ok()
}

fn parse_error(line: usize, message: impl Into<String>) -> SimError {
    SimError::Parse { line, message: message.into() }
}
