//! The flat byte-addressable memory image.
//!
//! Every other component of the VM (task control block, dictionary, both
//! stacks) is a view over this one buffer. Cells are 16 bits, big-endian;
//! each width has a signed and an unsigned reading of the same bit
//! pattern. All accessors are bounds-checked: an out-of-range address is
//! a guest-program bug surfaced as [`Error::BadAddress`], never a host
//! panic.

use crate::Error;

/// Largest legal image. Code cells store call addresses as non-negative
/// `i16` values, so addresses must stay below `0x8000`.
pub const MAX_IMAGE: usize = 0x8000;

pub struct Memory {
    bytes: Box<[u8]>,
}

impl Memory {
    /// A zero-filled image of `size` bytes.
    ///
    /// Fails with [`Error::BadParams`] if `size` exceeds [`MAX_IMAGE`].
    pub fn new(size: usize) -> Result<Self, Error> {
        if size == 0 || size > MAX_IMAGE {
            return Err(Error::BadParams("memory size must be 1..=32768 bytes"));
        }
        Ok(Self {
            bytes: vec![0u8; size].into_boxed_slice(),
        })
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    #[inline]
    fn check(&self, addr: u16, width: usize) -> Result<usize, Error> {
        let start = addr as usize;
        if start + width > self.bytes.len() {
            Err(Error::BadAddress(addr))
        } else {
            Ok(start)
        }
    }

    pub fn read_u8(&self, addr: u16) -> Result<u8, Error> {
        let at = self.check(addr, 1)?;
        Ok(self.bytes[at])
    }

    pub fn read_i8(&self, addr: u16) -> Result<i8, Error> {
        Ok(self.read_u8(addr)? as i8)
    }

    pub fn write_u8(&mut self, addr: u16, value: u8) -> Result<(), Error> {
        let at = self.check(addr, 1)?;
        self.bytes[at] = value;
        Ok(())
    }

    pub fn write_i8(&mut self, addr: u16, value: i8) -> Result<(), Error> {
        self.write_u8(addr, value as u8)
    }

    pub fn read_u16(&self, addr: u16) -> Result<u16, Error> {
        let at = self.check(addr, 2)?;
        Ok(u16::from_be_bytes([self.bytes[at], self.bytes[at + 1]]))
    }

    pub fn read_i16(&self, addr: u16) -> Result<i16, Error> {
        Ok(self.read_u16(addr)? as i16)
    }

    pub fn write_u16(&mut self, addr: u16, value: u16) -> Result<(), Error> {
        let at = self.check(addr, 2)?;
        self.bytes[at..at + 2].copy_from_slice(&value.to_be_bytes());
        Ok(())
    }

    pub fn write_i16(&mut self, addr: u16, value: i16) -> Result<(), Error> {
        self.write_u16(addr, value as u16)
    }

    pub fn read_bytes(&self, addr: u16, len: usize) -> Result<&[u8], Error> {
        let at = self.check(addr, len)?;
        Ok(&self.bytes[at..at + len])
    }

    pub fn write_bytes(&mut self, addr: u16, src: &[u8]) -> Result<(), Error> {
        let at = self.check(addr, src.len())?;
        self.bytes[at..at + src.len()].copy_from_slice(src);
        Ok(())
    }

    pub fn fill(&mut self, addr: u16, len: usize, value: u8) -> Result<(), Error> {
        let at = self.check(addr, len)?;
        self.bytes[at..at + len].fill(value);
        Ok(())
    }

    /// Read a NUL-terminated string starting at `addr`. Dictionary names
    /// are stored this way.
    pub fn read_cstr(&self, mut addr: u16) -> Result<String, Error> {
        let mut out = String::new();
        loop {
            let b = self.read_u8(addr)?;
            if b == 0 {
                return Ok(out);
            }
            out.push(b as char);
            addr = addr.checked_add(1).ok_or(Error::BadAddress(addr))?;
        }
    }
}
