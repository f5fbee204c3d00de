use super::cpu::Fault;
use super::{Memory, Word};

pub const DEFAULT_PAGE_SIZE: usize = 256;
pub const MINIMUM_PAGE_SIZE: usize = 64;

/// Low bits of a page table entry that hold the page's status.
pub const STATUS_MASK: Word = 0b111;
pub const PAGE_VALID: Word = 0b001;
pub const PAGE_DIRTY: Word = 0b010;
pub const PAGE_REFERENCED: Word = 0b100;

/// Bit layout of paged translation, derived once from the RAM size and the
/// requested page size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageGeometry {
    pub page_size: usize,
    pub offset_bits: u32,
    pub offset_mask: Word,
    pub page_mask: Word,
    pub num_pages: usize,
    pub num_frames: usize,
}

impl PageGeometry {
    /// Out of range page sizes fall back to `DEFAULT_PAGE_SIZE`; whatever
    /// remains is rounded down to a power of two.
    pub fn new(memory_size: usize, requested_page_size: usize) -> PageGeometry {
        let page_size = if requested_page_size < MINIMUM_PAGE_SIZE
            || requested_page_size > memory_size / 4
        {
            DEFAULT_PAGE_SIZE
        } else {
            requested_page_size
        };

        let offset_bits = page_size.ilog2();
        let page_size = 1usize << offset_bits;
        let offset_mask = (page_size - 1) as Word;

        PageGeometry {
            page_size,
            offset_bits,
            offset_mask,
            page_mask: !offset_mask,
            num_pages: memory_size / page_size,
            num_frames: memory_size / page_size,
        }
    }

    pub fn page_of(&self, address: Word) -> usize {
        ((address & self.page_mask) >> self.offset_bits) as usize
    }

    pub fn entry_for(&self, frame: usize, status: Word) -> Word {
        ((frame << self.offset_bits) as Word) | (status & STATUS_MASK)
    }
}

/// How a program touches a word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Read,
    Write,
}

#[derive(Debug, Clone, Copy)]
enum Translation {
    Segment,
    Paged(PageGeometry),
}

/// Address translator consulted by the CPU on every fetch, load, store and
/// branch.
///
/// Every access is first checked against the running process's segment
/// (`BASE <= BASE + offset <= LIM`). In paged mode the resulting linear
/// address is then mapped through the page table that the kernel keeps in
/// the lowest words of RAM: the entry for page `p` lives at physical
/// address `p`.
#[derive(Debug, Clone, Copy)]
pub struct Mmu {
    translation: Translation,
}

impl Mmu {
    pub fn segmented() -> Mmu {
        Mmu { translation: Translation::Segment }
    }

    pub fn paged(memory_size: usize, page_size: usize) -> Mmu {
        Mmu {
            translation: Translation::Paged(PageGeometry::new(memory_size, page_size)),
        }
    }

    pub fn geometry(&self) -> Option<&PageGeometry> {
        match &self.translation {
            Translation::Segment => None,
            Translation::Paged(geometry) => Some(geometry),
        }
    }

    /// Words at the bottom of RAM that belong to the page table.
    pub fn reserved_words(&self) -> usize {
        self.geometry().map_or(0, |geometry| geometry.num_pages)
    }

    /// Highest physical address (exclusive) that translation can reach.
    pub fn addressable_words(&self, memory_size: usize) -> usize {
        self.geometry()
            .map_or(memory_size, |geometry| geometry.num_frames * geometry.page_size)
    }

    /// Maps every page onto the frame with the same number.
    pub fn install_identity_page_table(&self, memory: &mut Memory) {
        if let Some(geometry) = self.geometry() {
            for page in 0..geometry.num_pages {
                memory.write_to(page, geometry.entry_for(page, PAGE_VALID));
            }
        }
    }

    /// Marks the page holding the linear address `linear` as referenced,
    /// and as dirty for a write. Segment translation keeps no page status.
    pub fn record_access(&self, memory: &mut Memory, linear: Word, access: Access) {
        let Some(geometry) = self.geometry() else {
            return;
        };
        let page = geometry.page_of(linear);
        if linear < 0 || page >= geometry.num_pages {
            return;
        }

        let status = match access {
            Access::Read => PAGE_REFERENCED,
            Access::Write => PAGE_REFERENCED | PAGE_DIRTY,
        };
        let entry = memory.read_from(page);
        if entry & status != status {
            memory.write_to(page, entry | status);
        }
    }

    /// Translates a BASE-relative `offset` to a physical address.
    pub fn translate(&self, memory: &Memory, base: Word, lim: Word, offset: Word) -> Result<usize, Fault> {
        let linear = match base.checked_add(offset) {
            Some(linear) if offset >= 0 && linear <= lim => linear,
            _ => return Err(Fault::IllegalMemoryAccess { addr: offset }),
        };
        if linear < 0 || linear as usize >= memory.size() {
            return Err(Fault::IllegalMemoryAccess { addr: offset });
        }

        match &self.translation {
            Translation::Segment => Ok(linear as usize),
            Translation::Paged(geometry) => {
                let page = geometry.page_of(linear);
                if page >= geometry.num_pages {
                    return Err(Fault::PageFault { addr: linear });
                }

                let entry = memory.read_from(page);
                if entry & PAGE_VALID == 0 {
                    return Err(Fault::PageFault { addr: linear });
                }

                let physical = ((entry & geometry.page_mask) | (linear & geometry.offset_mask)) as usize;
                if physical >= geometry.num_frames * geometry.page_size {
                    return Err(Fault::PageFault { addr: linear });
                }
                Ok(physical)
            }
        }
    }
}
