//! The dictionary: a linked chain of named, flagged, executable entries
//! stored directly inside [`Memory`].
//!
//! Entry layout (all multi-byte fields big-endian):
//!
//! ```text
//! [name bytes][NUL][pad][link: u16][flags|namelen: u8][codelen: u8][code cells…]
//!                       ^ entry head                               ^ CWA - 2
//! ```
//!
//! The *head* of an entry is the address of its link field; the name is
//! written first and NUL-padded so the link lands on the configured
//! alignment boundary. The code word address (CWA) is head + 4 and is the
//! entry point used by lookups and execution. `link` points at the
//! previous entry's head; 0 terminates the chain.

use core::fmt::Write;

use crate::{
    mem::Memory,
    tcb::{Reg, Tcb},
    Error,
};

pub mod flags {
    pub const IMMEDIATE: u8 = 0x80;
    pub const ALIAS: u8 = 0x40;
    pub const HIDDEN: u8 = 0x20;
    pub const LEN: u8 = 0x1F;
    /// Lookup compares lengths under this mask, which keeps the hidden
    /// bit: a hidden entry reports a length above the 31-byte maximum and
    /// can never match. Trick borrowed from jonesforth.
    pub const MATCH_LEN: u8 = 0x3F;
    pub const FLAG_MASK: u8 = 0xE0;
}

/// Longest matchable name, in bytes.
pub const MAX_NAME: usize = flags::LEN as usize;

// Field offsets from the entry head.
const OFF_LINK: u16 = 0;
const OFF_FLAGS: u16 = 2;
const OFF_CODELEN: u16 = 3;
const OFF_CWA: u16 = 4;

/// Decoded header snapshot. Diagnostics and tests only; execution always
/// works from the packed form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub head: u16,
    pub link: u16,
    pub flags: u8,
    pub namelen: u8,
    pub codelen: u8,
    pub cwa: u16,
    pub name: String,
}

#[derive(Debug, Copy, Clone)]
pub struct Dict {
    tcb: Tcb,
    align: u16,
}

impl Dict {
    pub fn new(tcb: Tcb, align: u16) -> Result<Self, Error> {
        if !align.is_power_of_two() || align < 2 {
            return Err(Error::BadParams("alignment must be a power of two >= 2"));
        }
        Ok(Self { tcb, align })
    }

    /// Bytes occupied by a name field: the name, its NUL, and padding up
    /// to the alignment boundary. Entries always begin on an aligned
    /// address, so this is recoverable from the namelen alone.
    fn name_field(&self, namelen: u16) -> u16 {
        let raw = namelen + 1;
        (raw + self.align - 1) & !(self.align - 1)
    }

    /// Write an entry header at HERE and make it LATEST. Returns the new
    /// entry's head. The codelen byte starts at zero; `write_tokens`
    /// back-patches it.
    pub fn header(
        &self,
        mem: &mut Memory,
        name: &str,
        immediate: bool,
        hidden: bool,
        alias: bool,
    ) -> Result<u16, Error> {
        if name.len() > MAX_NAME {
            return Err(Error::NameTooLong(name.len()));
        }

        // Entries begin on an alignment boundary.
        let here = self.tcb.load(mem, Reg::Here)?;
        let rem = here % self.align;
        if rem != 0 {
            let at = self.tcb.here_pp(mem, self.align - rem)?;
            mem.fill(at, (self.align - rem) as usize, 0)?;
        }

        let field = self.name_field(name.len() as u16);
        let nstart = self.tcb.here_pp(mem, field)?;
        mem.write_bytes(nstart, name.as_bytes())?;
        mem.fill(nstart + name.len() as u16, (field as usize) - name.len(), 0)?;

        let head = self.tcb.here_pp(mem, 4)?;
        let latest = self.tcb.load(mem, Reg::Latest)?;
        mem.write_u16(head + OFF_LINK, latest)?;
        self.tcb.store(mem, Reg::Latest, head)?;

        let mut fb = name.len() as u8 & flags::LEN;
        if immediate {
            fb |= flags::IMMEDIATE;
        }
        if hidden {
            fb |= flags::HIDDEN;
        }
        if alias {
            fb |= flags::ALIAS;
        }
        mem.write_u8(head + OFF_FLAGS, fb)?;
        mem.write_u8(head + OFF_CODELEN, 0)?;
        Ok(head)
    }

    /// Append one 16-bit code cell at HERE. Negative values encode native
    /// operations, non-negative values are call addresses.
    pub fn append_token(&self, mem: &mut Memory, token: i16) -> Result<(), Error> {
        let at = self.tcb.here_pp(mem, 2)?;
        mem.write_i16(at, token)
    }

    /// Append the code field of the entry most recently created by
    /// [`Dict::header`], back-patching its codelen. Returns the CWA.
    pub fn write_tokens(&self, mem: &mut Memory, tokens: &[i16]) -> Result<u16, Error> {
        let cwa = self.tcb.load(mem, Reg::Here)?;
        for token in tokens {
            self.append_token(mem, *token)?;
        }
        self.patch_codelen(mem, (2 * tokens.len()) as u16)?;
        Ok(cwa)
    }

    /// Set LATEST's codelen byte. Fails if the code field has outgrown
    /// the 8-bit length.
    pub fn patch_codelen(&self, mem: &mut Memory, bytes: u16) -> Result<(), Error> {
        if bytes > u8::MAX as u16 {
            return Err(Error::DefinitionTooLong(bytes));
        }
        let head = self.tcb.load(mem, Reg::Latest)?;
        mem.write_u8(head + OFF_CODELEN, bytes as u8)
    }

    pub fn define_code(
        &self,
        mem: &mut Memory,
        name: &str,
        tokens: &[i16],
        immediate: bool,
    ) -> Result<u16, Error> {
        self.header(mem, name, immediate, false, false)?;
        self.write_tokens(mem, tokens)
    }

    // Fixed-offset accessors.

    pub fn link(&self, mem: &Memory, head: u16) -> Result<u16, Error> {
        mem.read_u16(head + OFF_LINK)
    }

    pub fn flags(&self, mem: &Memory, head: u16) -> Result<u8, Error> {
        Ok(mem.read_u8(head + OFF_FLAGS)? & flags::FLAG_MASK)
    }

    pub fn namelen(&self, mem: &Memory, head: u16) -> Result<u8, Error> {
        Ok(mem.read_u8(head + OFF_FLAGS)? & flags::LEN)
    }

    pub fn codelen(&self, mem: &Memory, head: u16) -> Result<u8, Error> {
        mem.read_u8(head + OFF_CODELEN)
    }

    pub fn cwa(&self, head: u16) -> u16 {
        head + OFF_CWA
    }

    pub fn name_addr(&self, mem: &Memory, head: u16) -> Result<u16, Error> {
        let namelen = self.namelen(mem, head)? as u16;
        Ok(head - self.name_field(namelen))
    }

    pub fn name(&self, mem: &Memory, head: u16) -> Result<String, Error> {
        mem.read_cstr(self.name_addr(mem, head)?)
    }

    pub fn set_hidden(&self, mem: &mut Memory, head: u16, hidden: bool) -> Result<(), Error> {
        let fb = mem.read_u8(head + OFF_FLAGS)?;
        let fb = if hidden {
            fb | flags::HIDDEN
        } else {
            fb & !flags::HIDDEN
        };
        mem.write_u8(head + OFF_FLAGS, fb)
    }

    /// Walk the chain from LATEST toward the head, calling `f` per entry
    /// until it returns `false` or the chain ends. A self-linked entry
    /// terminates the walk instead of looping.
    fn visit(
        &self,
        mem: &Memory,
        mut f: impl FnMut(&Memory, u16) -> Result<bool, Error>,
    ) -> Result<(), Error> {
        let mut current = self.tcb.load(mem, Reg::Latest)?;
        let mut last = 0u16;
        while current != 0 && current != last {
            if !f(mem, current)? {
                return Ok(());
            }
            last = current;
            current = self.link(mem, current)?;
        }
        Ok(())
    }

    /// Most-recent-first name lookup, implementing FORTH shadowing: a
    /// later definition of a name hides earlier ones. Hidden entries
    /// never match unless `match_hidden` is set.
    pub fn find(
        &self,
        mem: &Memory,
        name: &str,
        match_hidden: bool,
    ) -> Result<Option<u16>, Error> {
        if name.len() > MAX_NAME {
            return Ok(None);
        }
        let want_len = name.len() as u8;
        let mut found = None;
        self.visit(mem, |mem, head| {
            let fb = mem.read_u8(head + OFF_FLAGS)?;
            if !match_hidden && (fb & flags::HIDDEN) != 0 {
                return Ok(true);
            }
            let mask = if match_hidden {
                flags::LEN
            } else {
                flags::MATCH_LEN
            };
            if want_len != fb & mask {
                return Ok(true);
            }
            let nstart = self.name_addr(mem, head)?;
            if mem.read_bytes(nstart, name.len())? != name.as_bytes() {
                return Ok(true);
            }
            found = Some(head);
            Ok(false)
        })?;
        Ok(found)
    }

    /// The last entry whose head is below `target`: maps an arbitrary
    /// code address back to the definition that owns it. Diagnostics
    /// only.
    pub fn nearest_header(&self, mem: &Memory, target: u16) -> Result<Option<u16>, Error> {
        let mut found = None;
        self.visit(mem, |_mem, head| {
            if head < target {
                found = Some(head);
                return Ok(false);
            }
            Ok(true)
        })?;
        Ok(found)
    }

    /// Give `old` a second name. The new entry carries the ALIAS flag and
    /// a single code cell holding `old`'s CWA, so execution chases
    /// through it without duplicating the body.
    pub fn alias(&self, mem: &mut Memory, old: &str, new: &str) -> Result<u16, Error> {
        let head = self
            .find(mem, old, false)?
            .ok_or_else(|| Error::UnknownWord(old.to_string()))?;
        let target = self.cwa(head);
        let immediate = self.flags(mem, head)? & flags::IMMEDIATE != 0;
        self.header(mem, new, immediate, false, true)?;
        self.write_tokens(mem, &[target as i16])
    }

    pub fn entry(&self, mem: &Memory, head: u16) -> Result<Entry, Error> {
        Ok(Entry {
            head,
            link: self.link(mem, head)?,
            flags: self.flags(mem, head)?,
            namelen: self.namelen(mem, head)?,
            codelen: self.codelen(mem, head)?,
            cwa: self.cwa(head),
            name: self.name(mem, head)?,
        })
    }

    /// Human-readable listing of every entry in chain order, one line per
    /// entry:
    ///
    /// ```text
    /// <link> <= <head> <flags> <namelen><name> (<codelen>)*[<cwa>]=<cells>
    /// ```
    pub fn dump(&self, mem: &Memory) -> Result<String, Error> {
        let mut out = String::new();
        self.visit(mem, |mem, head| {
            let e = self.entry(mem, head)?;
            let mut keys = String::new();
            for (bit, key) in [
                (flags::IMMEDIATE, 'I'),
                (flags::ALIAS, 'A'),
                (flags::HIDDEN, 'H'),
            ] {
                if e.flags & bit != 0 {
                    keys.push(key);
                }
            }
            let mut cells = String::new();
            for i in 0..(e.codelen as u16) / 2 {
                if i > 0 {
                    cells.push(' ');
                }
                let cell = mem.read_u16(e.cwa + 2 * i)?;
                let _ = write!(cells, "{cell:04x}");
            }
            let _ = writeln!(
                out,
                "{:04x} <= {:04x} {:>3} {:2}{:<10} ({:4})*[{:04x}]={}",
                e.link, e.head, keys, e.namelen, e.name, e.codelen, e.cwa, cells
            );
            Ok(true)
        })?;
        Ok(out)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn fixture(align: u16) -> (Memory, Tcb, Dict) {
        let mut mem = Memory::new(512).unwrap();
        let tcb = Tcb::new(0);
        tcb.store(&mut mem, Reg::Here, 32).unwrap();
        let dict = Dict::new(tcb, align).unwrap();
        (mem, tcb, dict)
    }

    #[test]
    fn header_write_tokens_find_round_trip() {
        let (mut mem, _tcb, dict) = fixture(2);
        let toks = [-3i16, 0x40, -1];
        dict.header(&mut mem, "doAll", false, false, false).unwrap();
        let cwa = dict.write_tokens(&mut mem, &toks).unwrap();

        let head = dict.find(&mem, "doAll", false).unwrap().unwrap();
        assert_eq!(dict.cwa(head), cwa);
        assert_eq!(dict.codelen(&mem, head).unwrap(), 6);
        for (i, tok) in toks.iter().enumerate() {
            assert_eq!(mem.read_i16(cwa + 2 * i as u16).unwrap(), *tok);
        }
        assert_eq!(dict.name(&mem, head).unwrap(), "doAll");
        assert_eq!(dict.namelen(&mem, head).unwrap(), 5);
        assert_eq!(dict.link(&mem, head).unwrap(), 0);
    }

    #[test]
    fn names_pad_to_alignment() {
        for align in [2u16, 4] {
            let (mut mem, _tcb, dict) = fixture(align);
            // Odd and even lengths both land the link field aligned.
            for name in ["A", "AB", "ABC", "ABCD"] {
                let head = dict.header(&mut mem, name, false, false, false).unwrap();
                assert_eq!(head % align, 0, "align {align} name {name}");
                dict.write_tokens(&mut mem, &[-1]).unwrap();
                assert_eq!(dict.name(&mem, head).unwrap(), name);
            }
        }
    }

    #[test]
    fn later_definition_shadows_earlier() {
        let (mut mem, _tcb, dict) = fixture(2);
        let first = dict.define_code(&mut mem, "X", &[-1], false).unwrap();
        let second = dict.define_code(&mut mem, "X", &[-2], false).unwrap();
        assert_ne!(first, second);
        let head = dict.find(&mem, "X", false).unwrap().unwrap();
        assert_eq!(dict.cwa(head), second);
    }

    #[test]
    fn hidden_entries_do_not_match() {
        let (mut mem, _tcb, dict) = fixture(2);
        dict.define_code(&mut mem, "SQ", &[-1], false).unwrap();
        let newer = {
            dict.define_code(&mut mem, "SQ", &[-2], false).unwrap();
            dict.find(&mem, "SQ", false).unwrap().unwrap()
        };
        dict.set_hidden(&mut mem, newer, true).unwrap();

        // The hidden entry no longer matches, but the older one does.
        let head = dict.find(&mem, "SQ", false).unwrap().unwrap();
        assert_ne!(head, newer);
        // match_hidden restores visibility of the newest.
        assert_eq!(dict.find(&mem, "SQ", true).unwrap(), Some(newer));

        dict.set_hidden(&mut mem, newer, false).unwrap();
        assert_eq!(dict.find(&mem, "SQ", false).unwrap(), Some(newer));
    }

    #[test]
    fn fully_hidden_name_finds_nothing() {
        let (mut mem, _tcb, dict) = fixture(2);
        dict.define_code(&mut mem, "GHOST", &[-1], false).unwrap();
        let head = dict.find(&mem, "GHOST", false).unwrap().unwrap();
        dict.set_hidden(&mut mem, head, true).unwrap();
        assert_eq!(dict.find(&mem, "GHOST", false).unwrap(), None);
    }

    #[test]
    fn alias_points_at_the_original_body() {
        let (mut mem, _tcb, dict) = fixture(2);
        let cwa_old = dict.define_code(&mut mem, "HALT", &[-7], false).unwrap();
        let cwa_alias = dict.alias(&mut mem, "HALT", "BYE").unwrap();
        let head = dict.find(&mem, "BYE", false).unwrap().unwrap();
        assert_ne!(dict.flags(&mem, head).unwrap() & flags::ALIAS, 0);
        assert_eq!(mem.read_u16(cwa_alias).unwrap(), cwa_old);
    }

    #[test]
    fn nearest_header_maps_code_addresses_to_owners() {
        let (mut mem, _tcb, dict) = fixture(2);
        dict.define_code(&mut mem, "ONE", &[-1, -2], false).unwrap();
        let h1 = dict.find(&mem, "ONE", false).unwrap().unwrap();
        let two = dict.define_code(&mut mem, "TWO", &[-3], false).unwrap();
        let h2 = dict.find(&mem, "TWO", false).unwrap().unwrap();

        assert_eq!(dict.nearest_header(&mem, two + 1).unwrap(), Some(h2));
        assert_eq!(dict.nearest_header(&mem, h2).unwrap(), Some(h1));
        assert_eq!(dict.nearest_header(&mem, h1 - 8).unwrap(), None);
    }

    #[test]
    fn name_length_is_capped() {
        let (mut mem, _tcb, dict) = fixture(2);
        let long = "X".repeat(MAX_NAME + 1);
        assert_eq!(
            dict.header(&mut mem, &long, false, false, false),
            Err(Error::NameTooLong(MAX_NAME + 1))
        );
        let ok = "X".repeat(MAX_NAME);
        assert!(dict.header(&mut mem, &ok, false, false, false).is_ok());
    }

    #[test]
    fn dump_lists_every_entry() {
        let (mut mem, _tcb, dict) = fixture(2);
        dict.define_code(&mut mem, "CR", &[-1], false).unwrap();
        dict.define_code(&mut mem, "semi", &[-2], true).unwrap();
        let listing = dict.dump(&mem).unwrap();
        let lines: Vec<&str> = listing.lines().collect();
        assert_eq!(lines.len(), 2);
        // Chain order is most-recent-first.
        assert!(lines[0].contains("semi"));
        assert!(lines[0].contains("  I "));
        assert!(lines[1].contains("CR"));
        assert!(lines[1].contains(" <= "));
    }
}
