use super::ProcessId;

/// A contiguous free region of physical memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemBlock {
    pub address: usize,
    pub size: usize,
}

/// The physical range owned by a live process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segment {
    pub pid: ProcessId,
    pub base: usize,
    pub size: usize,
}

impl Segment {
    pub fn end(&self) -> usize {
        self.base + self.size
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Allocation {
    Placed { address: usize },
    /// Enough words are free in total but no single block is big enough.
    NeedsCompaction,
    Full { free: usize },
}

/// One step of a compaction: `len` words of process `pid` move from `from`
/// down to `to`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Move {
    pub pid: ProcessId,
    pub from: usize,
    pub to: usize,
    pub len: usize,
}

impl Move {
    pub fn delta(&self) -> isize {
        self.to as isize - self.from as isize
    }
}

/// First-fit allocator over `[start, end)`.
///
/// Holds no state about who owns what. The free list is recomputed from
/// the live segments on every call, so it can never drift from the
/// process table.
#[derive(Debug, Clone, Copy)]
pub struct Allocator {
    start: usize,
    end: usize,
}

impl Allocator {
    pub fn new(start: usize, end: usize) -> Allocator {
        Allocator { start, end: end.max(start) }
    }

    pub fn capacity(&self) -> usize {
        self.end - self.start
    }

    /// Free blocks in address order; they tile everything the segments do
    /// not cover.
    pub fn free_blocks(&self, segments: &[Segment]) -> Vec<MemBlock> {
        let mut occupied: Vec<Segment> = segments.to_vec();
        occupied.sort_by_key(|segment| segment.base);

        let mut blocks = Vec::new();
        let mut cursor = self.start;
        for segment in occupied {
            if segment.base > cursor {
                blocks.push(MemBlock { address: cursor, size: segment.base - cursor });
            }
            cursor = cursor.max(segment.end());
        }
        if cursor < self.end {
            blocks.push(MemBlock { address: cursor, size: self.end - cursor });
        }
        blocks
    }

    pub fn free_words(&self, segments: &[Segment]) -> usize {
        self.free_blocks(segments).iter().map(|block| block.size).sum()
    }

    pub fn allocate(&self, size: usize, segments: &[Segment]) -> Allocation {
        let blocks = self.free_blocks(segments);
        if let Some(block) = blocks.iter().find(|block| block.size >= size) {
            return Allocation::Placed { address: block.address };
        }

        let free = blocks.iter().map(|block| block.size).sum();
        if free >= size {
            Allocation::NeedsCompaction
        } else {
            Allocation::Full { free }
        }
    }

    /// Slides every segment, lowest first, down to the lowest free address.
    /// Segments already in place produce no move. Executing the moves in
    /// order never overwrites a segment that has yet to move.
    pub fn compaction_plan(&self, segments: &[Segment]) -> Vec<Move> {
        let mut ordered: Vec<Segment> = segments.to_vec();
        ordered.sort_by_key(|segment| segment.base);

        let mut moves = Vec::new();
        let mut cursor = self.start;
        for segment in ordered {
            if segment.base != cursor {
                moves.push(Move {
                    pid: segment.pid,
                    from: segment.base,
                    to: cursor,
                    len: segment.size,
                });
            }
            cursor += segment.size;
        }
        moves
    }
}
