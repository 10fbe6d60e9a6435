//! Push/pop views over a region of [`Memory`].
//!
//! A stack is identified by three TCB registers: its pointer, its base
//! (from which depth is measured), and a limit that bounds growth: for
//! the parameter stack the opposing stack's pointer, for the return stack
//! the dictionary high-water mark. Stacks grow toward lower addresses:
//! a push writes bytes most-significant-first at decreasing addresses, so
//! a pop reads them back in natural order.

use crate::{
    mem::Memory,
    tcb::{Reg, Tcb},
    Error,
};

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum StackError {
    /// A push would cross the growth limit. Guest-program bug.
    Overflow,
    /// A pop would cross the stack base. Guest-program bug.
    Underflow,
}

#[derive(Debug, Copy, Clone)]
pub struct Stack {
    tcb: Tcb,
    sp: Reg,
    base: Reg,
    limit: Reg,
}

impl Stack {
    pub fn new(tcb: Tcb, sp: Reg, base: Reg, limit: Reg) -> Self {
        Self {
            tcb,
            sp,
            base,
            limit,
        }
    }

    /// Bytes currently on the stack.
    pub fn depth(&self, mem: &Memory) -> Result<u16, Error> {
        let base = self.tcb.load(mem, self.base)?;
        let sp = self.tcb.load(mem, self.sp)?;
        Ok(base - sp)
    }

    pub fn is_empty(&self, mem: &Memory) -> Result<bool, Error> {
        Ok(self.depth(mem)? == 0)
    }

    pub fn push_bytes(&self, mem: &mut Memory, bytes: &[u8]) -> Result<(), Error> {
        let sp = self.tcb.load(mem, self.sp)?;
        let limit = self.tcb.load(mem, self.limit)?;
        let next_sp = sp
            .checked_sub(bytes.len() as u16)
            .ok_or(StackError::Overflow)?;
        if limit > next_sp {
            return Err(StackError::Overflow.into());
        }
        mem.write_bytes(next_sp, bytes)?;
        self.tcb.store(mem, self.sp, next_sp)?;
        Ok(())
    }

    pub fn pop_bytes<const N: usize>(&self, mem: &mut Memory) -> Result<[u8; N], Error> {
        let sp = self.tcb.load(mem, self.sp)?;
        let base = self.tcb.load(mem, self.base)?;
        let next_sp = sp.checked_add(N as u16).ok_or(StackError::Underflow)?;
        if next_sp > base {
            return Err(StackError::Underflow.into());
        }
        let mut out = [0u8; N];
        out.copy_from_slice(mem.read_bytes(sp, N)?);
        // Scrub the vacated bytes so stale values never look live.
        mem.fill(sp, N, 0)?;
        self.tcb.store(mem, self.sp, next_sp)?;
        Ok(out)
    }

    pub fn push_u8(&self, mem: &mut Memory, v: u8) -> Result<(), Error> {
        self.push_bytes(mem, &[v])
    }

    pub fn push_i8(&self, mem: &mut Memory, v: i8) -> Result<(), Error> {
        self.push_bytes(mem, &[v as u8])
    }

    pub fn push_u16(&self, mem: &mut Memory, v: u16) -> Result<(), Error> {
        self.push_bytes(mem, &v.to_be_bytes())
    }

    pub fn push_i16(&self, mem: &mut Memory, v: i16) -> Result<(), Error> {
        self.push_bytes(mem, &v.to_be_bytes())
    }

    pub fn pop_u8(&self, mem: &mut Memory) -> Result<u8, Error> {
        Ok(self.pop_bytes::<1>(mem)?[0])
    }

    pub fn pop_i8(&self, mem: &mut Memory) -> Result<i8, Error> {
        Ok(self.pop_bytes::<1>(mem)?[0] as i8)
    }

    pub fn pop_u16(&self, mem: &mut Memory) -> Result<u16, Error> {
        Ok(u16::from_be_bytes(self.pop_bytes::<2>(mem)?))
    }

    pub fn pop_i16(&self, mem: &mut Memory) -> Result<i16, Error> {
        Ok(i16::from_be_bytes(self.pop_bytes::<2>(mem)?))
    }

    /// Read the top cell without popping it.
    pub fn peek_i16(&self, mem: &Memory) -> Result<i16, Error> {
        let sp = self.tcb.load(mem, self.sp)?;
        let base = self.tcb.load(mem, self.base)?;
        if sp + 2 > base {
            return Err(StackError::Underflow.into());
        }
        mem.read_i16(sp)
    }
}
