//! The open-directory table (spec §3, "Open-directory table").
//!
//! Generic over the handle payload so both transports can share one
//! implementation instead of UDP using an indexed table while serial
//! truncates a raw host pointer (the defect called out in DESIGN.md under
//! "Handle truncation defect").

/// Capacity of the table. The target's runtime rejects handle values below
/// 100, hence the `HANDLE_OFFSET` below.
pub const CAPACITY: usize = 16;

/// Added to a table index before handing a handle to the target.
pub const HANDLE_OFFSET: u32 = 1337;

/// A fixed-size table of open directory handles.
#[derive(Debug, Default)]
pub struct DirTable<T> {
    slots: [Option<T>; CAPACITY],
}

impl<T> DirTable<T> {
    pub fn new() -> Self {
        Self {
            slots: std::array::from_fn(|_| None),
        }
    }

    /// Insert `value` into the first free slot, returning the target-visible
    /// handle (always in `[HANDLE_OFFSET, HANDLE_OFFSET + CAPACITY)`), or
    /// `None` if the table is full.
    pub fn open(&mut self, value: T) -> Option<u32> {
        let idx = self.slots.iter().position(Option::is_none)?;
        self.slots[idx] = Some(value);
        Some(HANDLE_OFFSET + idx as u32)
    }

    fn index_of(handle: u32) -> Option<usize> {
        let idx = handle.checked_sub(HANDLE_OFFSET)? as usize;
        (idx < CAPACITY).then_some(idx)
    }

    pub fn get_mut(&mut self, handle: u32) -> Option<&mut T> {
        let idx = Self::index_of(handle)?;
        self.slots[idx].as_mut()
    }

    /// Remove and return the entry for `handle`, freeing its slot for reuse.
    pub fn close(&mut self, handle: u32) -> Option<T> {
        let idx = Self::index_of(handle)?;
        self.slots[idx].take()
    }
}
