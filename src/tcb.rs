//! The task control block: the VM's register file.
//!
//! The registers are ordinary 16-bit cells stored at fixed offsets from a
//! base address inside [`Memory`], so guest code can address them like any
//! other state. The [`Tcb`] type is a lens: it holds only the base address
//! and goes through `Memory` for every access.

use crate::{mem::Memory, Error};

/// The TCB registers, in storage order.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Reg {
    /// Address of the next free dictionary byte.
    Here,
    /// Head of the most recent dictionary entry; 0 means "no entries".
    Latest,
    /// The cell just fetched by `next()`.
    CurrentWord,
    /// The cell `next()` will fetch.
    NextWord,
    /// Parameter stack pointer.
    Psp,
    /// Return stack pointer.
    Rsp,
    /// Parameter stack base.
    P0,
    /// Return stack base.
    R0,
    /// 0 = interpreting, nonzero = compiling.
    State,
}

impl Reg {
    pub const fn offset(self) -> u16 {
        match self {
            Reg::Here => 0,
            Reg::Latest => 2,
            Reg::CurrentWord => 4,
            Reg::NextWord => 6,
            Reg::Psp => 8,
            Reg::Rsp => 10,
            Reg::P0 => 12,
            Reg::R0 => 14,
            Reg::State => 16,
        }
    }
}

#[derive(Debug, Copy, Clone)]
pub struct Tcb {
    base: u16,
}

impl Tcb {
    /// Register file footprint in bytes. HERE is initialized past this so
    /// a null LATEST can never alias live state.
    pub const SIZE: u16 = 18;

    pub fn new(base: u16) -> Self {
        Self { base }
    }

    #[inline]
    pub fn load(&self, mem: &Memory, reg: Reg) -> Result<u16, Error> {
        mem.read_u16(self.base + reg.offset())
    }

    #[inline]
    pub fn store(&self, mem: &mut Memory, reg: Reg, value: u16) -> Result<(), Error> {
        mem.write_u16(self.base + reg.offset(), value)
    }

    /// The pointer accessor from the data model: read a register and
    /// adjust it by a signed delta, returning the pre-adjustment value.
    pub fn bump(&self, mem: &mut Memory, reg: Reg, delta: i16) -> Result<u16, Error> {
        let old = self.load(mem, reg)?;
        let new = old
            .checked_add_signed(delta)
            .ok_or(Error::BadAddress(old))?;
        self.store(mem, reg, new)?;
        Ok(old)
    }

    /// `HERE++`: reserve `incr` dictionary bytes, returning the address of
    /// the reservation. Advancing past the end of Memory is
    /// [`Error::DictionaryOverflow`].
    pub fn here_pp(&self, mem: &mut Memory, incr: u16) -> Result<u16, Error> {
        let old = self.load(mem, Reg::Here)?;
        let new = old as usize + incr as usize;
        if new > mem.len() {
            return Err(Error::DictionaryOverflow);
        }
        self.store(mem, Reg::Here, new as u16)?;
        Ok(old)
    }
}
