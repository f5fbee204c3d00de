use super::{ProcessControlBlock, ProcessId};

/// Picks the next process to run: the ready process that has waited the
/// least on average, so processes that were starved before get the CPU less
/// often and everyone's average drifts toward the mean. Ties go to the
/// lowest process id.
pub struct ShortTermScheduler;

impl ShortTermScheduler {
    /// `previous` is the process that was running when the decision was
    /// made. It only runs again when no other process is ready.
    pub fn select<'a, I>(processes: I, previous: Option<ProcessId>) -> Option<ProcessId>
    where
        I: IntoIterator<Item = &'a ProcessControlBlock>,
    {
        let mut previous_ready = false;
        let next = processes
            .into_iter()
            .filter(|pcb| !pcb.is_blocked())
            .filter(|pcb| {
                let is_previous = previous == Some(pcb.id());
                previous_ready |= is_previous;
                !is_previous
            })
            .min_by(|a, b| {
                a.avg_starve()
                    .total_cmp(&b.avg_starve())
                    .then_with(|| a.id().cmp(&b.id()))
            })
            .map(|pcb| pcb.id());

        next.or(if previous_ready { previous } else { None })
    }
}
