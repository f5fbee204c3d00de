use crate::io::Program;

/// Registry of programs that EXEC may start.
///
/// Selection keeps execution counts balanced: the program run the fewest
/// times wins, ties broken uniformly at random.
pub struct LongTermScheduler {
    programs: Vec<Program>,
    rng: fastrand::Rng,
}

impl LongTermScheduler {
    pub fn new() -> LongTermScheduler {
        LongTermScheduler {
            programs: Vec::new(),
            rng: fastrand::Rng::new(),
        }
    }

    pub fn with_seed(seed: u64) -> LongTermScheduler {
        LongTermScheduler {
            programs: Vec::new(),
            rng: fastrand::Rng::with_seed(seed),
        }
    }

    pub fn add_program(&mut self, program: Program) {
        log::debug!("Registered program '{}'", program.name);
        self.programs.push(program);
    }

    pub fn programs(&self) -> &[Program] {
        &self.programs
    }

    pub fn is_empty(&self) -> bool {
        self.programs.is_empty()
    }

    /// Chooses the next program to execute and counts the call.
    pub fn select_for_exec(&mut self) -> Option<Program> {
        let fewest = self.programs.iter().map(|program| program.call_count).min()?;
        let candidates: Vec<usize> = self
            .programs
            .iter()
            .enumerate()
            .filter(|(_, program)| program.call_count == fewest)
            .map(|(index, _)| index)
            .collect();

        let chosen = candidates[self.rng.usize(..candidates.len())];
        let program = &mut self.programs[chosen];
        program.call_count += 1;
        Some(program.clone())
    }
}

impl Default for LongTermScheduler {
    fn default() -> Self {
        LongTermScheduler::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::instruction::Instruction;

    fn program(name: &str) -> Program {
        Program::new(name, vec![Instruction::set(0, 1)])
    }

    #[test]
    fn test_long_term_scheduler_empty_registry() {
        let mut lts = LongTermScheduler::with_seed(1);
        assert!(lts.is_empty());
        assert_eq!(lts.select_for_exec(), None);
    }

    #[test]
    fn test_long_term_scheduler_counts_stay_balanced() {
        let mut lts = LongTermScheduler::with_seed(42);
        for name in ["a", "b", "c", "d"] {
            lts.add_program(program(name));
        }

        for k in 1..=50 {
            lts.select_for_exec().unwrap();

            let counts: Vec<u64> = lts.programs().iter().map(|program| program.call_count).collect();
            let min = *counts.iter().min().unwrap();
            let max = *counts.iter().max().unwrap();
            assert!(max - min <= 1);
            assert_eq!(counts.iter().sum::<u64>(), k);
        }
    }

    #[test]
    fn test_long_term_scheduler_returns_counted_copy() {
        let mut lts = LongTermScheduler::with_seed(7);
        lts.add_program(program("only"));

        let first = lts.select_for_exec().unwrap();
        let second = lts.select_for_exec().unwrap();
        assert_eq!(first.name, "only");
        assert_eq!(first.call_count, 1);
        assert_eq!(second.call_count, 2);
    }
}
