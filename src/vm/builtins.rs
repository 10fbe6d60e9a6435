//! The core word set.
//!
//! Every native here follows the same contract: do its work, then either
//! call [`Forth::next`] to fall through to the following cell, rewrite
//! `CURRENT_WORD` to transfer control, or clear `alive` to end the run.
//! Forgetting all three re-dispatches the same cell forever.
//!
//! Binary operations pop the right operand first: `5 3 -` leaves 2.
//! Comparison words push FORTH truth, -1 for true and 0 for false.
//! Arithmetic wraps at 16 bits.

use tracing::trace;

use crate::{
    bootstrap::{ColonWord, NativeWord},
    dict::flags,
    tcb::Reg,
    Error, Forth,
};

/// The native words every stock image carries.
pub const CORE_BUILTINS: &[NativeWord] = &[
    // Threading primitives first; their tokens are the ones most worth
    // recognizing in a hex dump.
    NativeWord {
        name: "ENTER",
        func: Forth::enter,
        immediate: false,
        pad: 0,
        deps: &[],
        priority: 100,
    },
    NativeWord {
        name: "EXIT",
        func: Forth::exit,
        immediate: false,
        pad: 0,
        deps: &[],
        priority: 99,
    },
    NativeWord {
        name: "LIT",
        func: Forth::lit,
        immediate: false,
        pad: 0,
        deps: &[],
        priority: 98,
    },
    NativeWord {
        name: "BRANCH",
        func: Forth::branch,
        immediate: false,
        pad: 0,
        deps: &[],
        priority: 97,
    },
    NativeWord {
        name: "0BRANCH",
        func: Forth::zero_branch,
        immediate: false,
        pad: 0,
        deps: &[],
        priority: 96,
    },
    NativeWord {
        name: "HALT",
        func: Forth::halt,
        immediate: false,
        pad: 0,
        deps: &[],
        priority: 95,
    },
    NativeWord {
        name: "(stop)",
        func: Forth::halt,
        immediate: false,
        pad: 0,
        deps: &[],
        priority: 94,
    },
    NativeWord {
        name: "(interp)",
        func: Forth::interp,
        immediate: false,
        pad: 0,
        deps: &["LIT"],
        priority: 0,
    },
    // Compiler words.
    NativeWord {
        name: ":",
        func: Forth::colon,
        immediate: false,
        pad: 0,
        deps: &["ENTER"],
        priority: 0,
    },
    NativeWord {
        name: ";",
        func: Forth::semicolon,
        immediate: true,
        pad: 0,
        deps: &["EXIT"],
        priority: 0,
    },
    NativeWord {
        name: "[",
        func: Forth::start_compiling,
        immediate: false,
        pad: 0,
        deps: &[],
        priority: 0,
    },
    NativeWord {
        name: "]",
        func: Forth::start_interpreting,
        immediate: true,
        pad: 0,
        deps: &[],
        priority: 0,
    },
    NativeWord {
        name: ",",
        func: Forth::comma,
        immediate: false,
        pad: 0,
        deps: &[],
        priority: 0,
    },
    // Stack shufflers.
    NativeWord {
        name: "DUP",
        func: Forth::ds_dup,
        immediate: false,
        pad: 0,
        deps: &[],
        priority: 0,
    },
    NativeWord {
        name: "DROP",
        func: Forth::ds_drop,
        immediate: false,
        pad: 0,
        deps: &[],
        priority: 0,
    },
    NativeWord {
        name: "SWAP",
        func: Forth::ds_swap,
        immediate: false,
        pad: 0,
        deps: &[],
        priority: 0,
    },
    NativeWord {
        name: "OVER",
        func: Forth::ds_over,
        immediate: false,
        pad: 0,
        deps: &[],
        priority: 0,
    },
    NativeWord {
        name: "ROT",
        func: Forth::ds_rot,
        immediate: false,
        pad: 0,
        deps: &[],
        priority: 0,
    },
    // Arithmetic and comparison.
    NativeWord {
        name: "+",
        func: Forth::add,
        immediate: false,
        pad: 0,
        deps: &[],
        priority: 0,
    },
    NativeWord {
        name: "-",
        func: Forth::sub,
        immediate: false,
        pad: 0,
        deps: &[],
        priority: 0,
    },
    NativeWord {
        name: "*",
        func: Forth::mul,
        immediate: false,
        pad: 0,
        deps: &[],
        priority: 0,
    },
    NativeWord {
        name: "/",
        func: Forth::div,
        immediate: false,
        pad: 0,
        deps: &[],
        priority: 0,
    },
    NativeWord {
        name: "MOD",
        func: Forth::modulo,
        immediate: false,
        pad: 0,
        deps: &[],
        priority: 0,
    },
    NativeWord {
        name: "=",
        func: Forth::eq,
        immediate: false,
        pad: 0,
        deps: &[],
        priority: 0,
    },
    NativeWord {
        name: "<",
        func: Forth::lt,
        immediate: false,
        pad: 0,
        deps: &[],
        priority: 0,
    },
    NativeWord {
        name: ">",
        func: Forth::gt,
        immediate: false,
        pad: 0,
        deps: &[],
        priority: 0,
    },
    // Memory access.
    NativeWord {
        name: "@",
        func: Forth::fetch,
        immediate: false,
        pad: 0,
        deps: &[],
        priority: 0,
    },
    NativeWord {
        name: "!",
        func: Forth::store,
        immediate: false,
        pad: 0,
        deps: &[],
        priority: 0,
    },
    NativeWord {
        name: "C@",
        func: Forth::byte_fetch,
        immediate: false,
        pad: 0,
        deps: &[],
        priority: 0,
    },
    NativeWord {
        name: "C!",
        func: Forth::byte_store,
        immediate: false,
        pad: 0,
        deps: &[],
        priority: 0,
    },
    NativeWord {
        name: "HERE",
        func: Forth::here,
        immediate: false,
        pad: 0,
        deps: &[],
        priority: 0,
    },
    NativeWord {
        name: "LATEST",
        func: Forth::latest,
        immediate: false,
        pad: 0,
        deps: &[],
        priority: 0,
    },
    NativeWord {
        name: "PAD",
        func: Forth::pad,
        immediate: false,
        pad: 64,
        deps: &[],
        priority: 0,
    },
    // I/O.
    NativeWord {
        name: "KEY",
        func: Forth::key,
        immediate: false,
        pad: 0,
        deps: &[],
        priority: 0,
    },
    NativeWord {
        name: "EMIT",
        func: Forth::emit,
        immediate: false,
        pad: 0,
        deps: &[],
        priority: 0,
    },
    NativeWord {
        name: "CR",
        func: Forth::cr,
        immediate: false,
        pad: 0,
        deps: &[],
        priority: 0,
    },
    NativeWord {
        name: ".",
        func: Forth::pop_print,
        immediate: false,
        pad: 0,
        deps: &[],
        priority: 0,
    },
    NativeWord {
        name: "PRINT",
        func: Forth::print_cstr,
        immediate: false,
        pad: 0,
        deps: &[],
        priority: 0,
    },
    NativeWord {
        name: "WORDS",
        func: Forth::words_listing,
        immediate: false,
        pad: 0,
        deps: &[],
        priority: 0,
    },
];

/// Colon words compiled after the natives. `COREINT` is the outer
/// interpreter: one `(interp)` step, then an unconditional branch back
/// over itself.
pub const CORE_COLON_WORDS: &[ColonWord] = &[ColonWord {
    name: "COREINT",
    immediate: false,
    tokens: &["(interp)", "BRANCH", "-4"],
}];

impl Forth {
    // Threading primitives.

    /// Begin a colon word's body: save the continuation and point
    /// `NEXT_WORD` at the cell after our token.
    pub fn enter(&mut self) -> Result<(), Error> {
        let cont = self.tcb.load(&self.memory, Reg::NextWord)?;
        self.rstack.push_u16(&mut self.memory, cont)?;
        self.tcb.store(&mut self.memory, Reg::NextWord, self.w + 2)?;
        self.next()
    }

    /// Return to the continuation `ENTER` saved.
    pub fn exit(&mut self) -> Result<(), Error> {
        let cont = self.rstack.pop_u16(&mut self.memory)?;
        self.tcb.store(&mut self.memory, Reg::NextWord, cont)?;
        self.next()
    }

    /// Push the in-line operand cell.
    pub fn lit(&mut self) -> Result<(), Error> {
        let at = self.tcb.bump(&mut self.memory, Reg::NextWord, 2)?;
        let v = self.memory.read_i16(at)?;
        self.pstack.push_i16(&mut self.memory, v)?;
        self.next()
    }

    /// Unconditional jump by the in-line offset, relative to the operand
    /// cell's own address.
    pub fn branch(&mut self) -> Result<(), Error> {
        let at = self.tcb.load(&self.memory, Reg::NextWord)?;
        let off = self.memory.read_i16(at)?;
        let target = at.checked_add_signed(off).ok_or(Error::BadAddress(at))?;
        self.tcb.store(&mut self.memory, Reg::NextWord, target)?;
        self.next()
    }

    /// Jump if the popped flag is zero, else skip the operand.
    pub fn zero_branch(&mut self) -> Result<(), Error> {
        let flag = self.pstack.pop_i16(&mut self.memory)?;
        let at = self.tcb.load(&self.memory, Reg::NextWord)?;
        let target = if flag == 0 {
            let off = self.memory.read_i16(at)?;
            at.checked_add_signed(off).ok_or(Error::BadAddress(at))?
        } else {
            at + 2
        };
        self.tcb.store(&mut self.memory, Reg::NextWord, target)?;
        self.next()
    }

    /// End the run. Also serves as `(stop)`, the continuation
    /// [`Forth::execute`] plants under the executed word.
    pub fn halt(&mut self) -> Result<(), Error> {
        self.alive = false;
        Ok(())
    }

    // The text interpreter.

    /// One outer-interpreter step: read a token, then run it, compile
    /// it, or treat it as a number according to STATE and the IMMEDIATE
    /// flag. Runs a word by rewriting `CURRENT_WORD` and returning, so
    /// the word's own continuation is the interpreter loop.
    pub fn interp(&mut self) -> Result<(), Error> {
        let Some(word) = self.next_token()? else {
            self.alive = false;
            return Ok(());
        };
        let compiling = self.tcb.load(&self.memory, Reg::State)? != 0;
        match self.dict.find(&self.memory, &word, false)? {
            Some(head) => {
                let immediate = self.dict.flags(&self.memory, head)? & flags::IMMEDIATE != 0;
                let cwa = self.dict.cwa(head);
                if compiling && !immediate {
                    trace!(word = %word, cwa, "compile call");
                    self.dict.append_token(&mut self.memory, cwa as i16)?;
                    self.next()
                } else {
                    trace!(word = %word, cwa, "run");
                    self.tcb.store(&mut self.memory, Reg::CurrentWord, cwa)?;
                    Ok(())
                }
            }
            None => match word.parse::<i16>() {
                Ok(v) if compiling => {
                    trace!(v, "compile literal");
                    let lit = self.dep_cwa("LIT")?;
                    self.dict.append_token(&mut self.memory, lit as i16)?;
                    self.dict.append_token(&mut self.memory, v)?;
                    self.next()
                }
                Ok(v) => {
                    trace!(v, "push literal");
                    self.pstack.push_i16(&mut self.memory, v)?;
                    self.next()
                }
                Err(_) => Err(Error::UnknownWord(word)),
            },
        }
    }

    /// The next input token, refilling the buffer from the console when
    /// it drains. `None` means the console is exhausted too.
    fn next_token(&mut self) -> Result<Option<String>, Error> {
        loop {
            self.input.advance();
            if let Some(word) = self.input.cur_word() {
                return Ok(Some(word.to_string()));
            }
            let Some(line) = self.console.read_line() else {
                return Ok(None);
            };
            self.input.fill(&line);
        }
    }

    // Compiler words.

    /// `:`: read a name, open a hidden definition, start compiling. The
    /// name read refills from the console like any other token read.
    pub fn colon(&mut self) -> Result<(), Error> {
        let name = self.next_token()?.ok_or(Error::MissingName)?;
        self.dict.header(&mut self.memory, &name, false, true, false)?;
        let enter = self.body_token("ENTER")?;
        self.dict.append_token(&mut self.memory, enter)?;
        self.tcb.store(&mut self.memory, Reg::State, 1)?;
        self.next()
    }

    /// `;`: close the open definition: append EXIT, patch its length,
    /// reveal it, stop compiling.
    pub fn semicolon(&mut self) -> Result<(), Error> {
        let exit = self.body_token("EXIT")?;
        self.dict.append_token(&mut self.memory, exit)?;
        let head = self.tcb.load(&self.memory, Reg::Latest)?;
        let here = self.tcb.load(&self.memory, Reg::Here)?;
        self.dict
            .patch_codelen(&mut self.memory, here - self.dict.cwa(head))?;
        self.dict.set_hidden(&mut self.memory, head, false)?;
        self.tcb.store(&mut self.memory, Reg::State, 0)?;
        self.next()
    }

    /// `[`: switch to compiling.
    pub fn start_compiling(&mut self) -> Result<(), Error> {
        self.tcb.store(&mut self.memory, Reg::State, 1)?;
        self.next()
    }

    /// `]`: switch to interpreting. Immediate, so it takes effect while
    /// compiling.
    pub fn start_interpreting(&mut self) -> Result<(), Error> {
        self.tcb.store(&mut self.memory, Reg::State, 0)?;
        self.next()
    }

    /// `,`: pop a cell and append it at HERE.
    pub fn comma(&mut self) -> Result<(), Error> {
        let v = self.pstack.pop_i16(&mut self.memory)?;
        self.dict.append_token(&mut self.memory, v)?;
        self.next()
    }

    // Stack shufflers.

    pub fn ds_dup(&mut self) -> Result<(), Error> {
        let v = self.pstack.peek_i16(&self.memory)?;
        self.pstack.push_i16(&mut self.memory, v)?;
        self.next()
    }

    pub fn ds_drop(&mut self) -> Result<(), Error> {
        self.pstack.pop_i16(&mut self.memory)?;
        self.next()
    }

    pub fn ds_swap(&mut self) -> Result<(), Error> {
        let b = self.pstack.pop_i16(&mut self.memory)?;
        let a = self.pstack.pop_i16(&mut self.memory)?;
        self.pstack.push_i16(&mut self.memory, b)?;
        self.pstack.push_i16(&mut self.memory, a)?;
        self.next()
    }

    pub fn ds_over(&mut self) -> Result<(), Error> {
        let b = self.pstack.pop_i16(&mut self.memory)?;
        let a = self.pstack.pop_i16(&mut self.memory)?;
        self.pstack.push_i16(&mut self.memory, a)?;
        self.pstack.push_i16(&mut self.memory, b)?;
        self.pstack.push_i16(&mut self.memory, a)?;
        self.next()
    }

    /// `( a b c -- b c a )`
    pub fn ds_rot(&mut self) -> Result<(), Error> {
        let c = self.pstack.pop_i16(&mut self.memory)?;
        let b = self.pstack.pop_i16(&mut self.memory)?;
        let a = self.pstack.pop_i16(&mut self.memory)?;
        self.pstack.push_i16(&mut self.memory, b)?;
        self.pstack.push_i16(&mut self.memory, c)?;
        self.pstack.push_i16(&mut self.memory, a)?;
        self.next()
    }

    // Arithmetic and comparison.

    fn binary_op(&mut self, op: fn(i16, i16) -> i16) -> Result<(), Error> {
        let b = self.pstack.pop_i16(&mut self.memory)?;
        let a = self.pstack.pop_i16(&mut self.memory)?;
        self.pstack.push_i16(&mut self.memory, op(a, b))?;
        self.next()
    }

    pub fn add(&mut self) -> Result<(), Error> {
        self.binary_op(i16::wrapping_add)
    }

    pub fn sub(&mut self) -> Result<(), Error> {
        self.binary_op(i16::wrapping_sub)
    }

    pub fn mul(&mut self) -> Result<(), Error> {
        self.binary_op(i16::wrapping_mul)
    }

    pub fn div(&mut self) -> Result<(), Error> {
        let b = self.pstack.pop_i16(&mut self.memory)?;
        let a = self.pstack.pop_i16(&mut self.memory)?;
        if b == 0 {
            return Err(Error::DivideByZero);
        }
        self.pstack.push_i16(&mut self.memory, a.wrapping_div(b))?;
        self.next()
    }

    pub fn modulo(&mut self) -> Result<(), Error> {
        let b = self.pstack.pop_i16(&mut self.memory)?;
        let a = self.pstack.pop_i16(&mut self.memory)?;
        if b == 0 {
            return Err(Error::DivideByZero);
        }
        self.pstack.push_i16(&mut self.memory, a.wrapping_rem(b))?;
        self.next()
    }

    pub fn eq(&mut self) -> Result<(), Error> {
        self.binary_op(|a, b| if a == b { -1 } else { 0 })
    }

    pub fn lt(&mut self) -> Result<(), Error> {
        self.binary_op(|a, b| if a < b { -1 } else { 0 })
    }

    pub fn gt(&mut self) -> Result<(), Error> {
        self.binary_op(|a, b| if a > b { -1 } else { 0 })
    }

    // Memory access.

    /// `@`: `( addr -- cell )`
    pub fn fetch(&mut self) -> Result<(), Error> {
        let addr = self.pstack.pop_u16(&mut self.memory)?;
        let v = self.memory.read_i16(addr)?;
        self.pstack.push_i16(&mut self.memory, v)?;
        self.next()
    }

    /// `!`: `( cell addr -- )`
    pub fn store(&mut self) -> Result<(), Error> {
        let addr = self.pstack.pop_u16(&mut self.memory)?;
        let v = self.pstack.pop_i16(&mut self.memory)?;
        self.memory.write_i16(addr, v)?;
        self.next()
    }

    /// `C@`: `( addr -- byte )`, zero-extended.
    pub fn byte_fetch(&mut self) -> Result<(), Error> {
        let addr = self.pstack.pop_u16(&mut self.memory)?;
        let v = self.memory.read_u8(addr)?;
        self.pstack.push_i16(&mut self.memory, v as i16)?;
        self.next()
    }

    /// `C!`: `( byte addr -- )`, stores the low byte.
    pub fn byte_store(&mut self) -> Result<(), Error> {
        let addr = self.pstack.pop_u16(&mut self.memory)?;
        let v = self.pstack.pop_i16(&mut self.memory)?;
        self.memory.write_u8(addr, v as u8)?;
        self.next()
    }

    pub fn here(&mut self) -> Result<(), Error> {
        let here = self.tcb.load(&self.memory, Reg::Here)?;
        self.pstack.push_i16(&mut self.memory, here as i16)?;
        self.next()
    }

    pub fn latest(&mut self) -> Result<(), Error> {
        let latest = self.tcb.load(&self.memory, Reg::Latest)?;
        self.pstack.push_i16(&mut self.memory, latest as i16)?;
        self.next()
    }

    /// Push the address of the 64-byte scratch region reserved at
    /// bootstrap.
    pub fn pad(&mut self) -> Result<(), Error> {
        let addr = self.pad_addr("PAD")?;
        self.pstack.push_i16(&mut self.memory, addr as i16)?;
        self.next()
    }

    // I/O.

    /// `KEY`: one raw input character, -1 at end of input.
    pub fn key(&mut self) -> Result<(), Error> {
        let c = loop {
            if let Some(b) = self.input.next_char() {
                break b as i16;
            }
            let Some(line) = self.console.read_line() else {
                break -1;
            };
            self.input.fill(&line);
        };
        self.pstack.push_i16(&mut self.memory, c)?;
        self.next()
    }

    /// `EMIT`: write the popped cell's low byte as a character.
    pub fn emit(&mut self) -> Result<(), Error> {
        let v = self.pstack.pop_i16(&mut self.memory)?;
        let c = (v as u8) as char;
        self.console.write_str(&c.to_string());
        self.next()
    }

    pub fn cr(&mut self) -> Result<(), Error> {
        self.console.write_str("\n");
        self.next()
    }

    /// `.`: pop and print in decimal.
    pub fn pop_print(&mut self) -> Result<(), Error> {
        let v = self.pstack.pop_i16(&mut self.memory)?;
        self.console.write_str(&v.to_string());
        self.next()
    }

    /// `PRINT`: write the NUL-terminated string at the popped address.
    pub fn print_cstr(&mut self) -> Result<(), Error> {
        let addr = self.pstack.pop_u16(&mut self.memory)?;
        let s = self.memory.read_cstr(addr)?;
        self.console.write_str(&s);
        self.next()
    }

    /// `WORDS`: write the dictionary listing.
    pub fn words_listing(&mut self) -> Result<(), Error> {
        let listing = self.dict.dump(&self.memory)?;
        self.console.write_str(&listing);
        self.next()
    }
}
