//! # forth16
//!
//! forth16 is a FORTH-inspired virtual machine with a 16-bit address space.
//! Everything the guest program can touch lives inside one flat
//! byte-addressable [`Memory`] image: the task control block (the VM's
//! register file), the dictionary of named executable definitions, and the
//! parameter and return stacks are all views over that single buffer.
//!
//! Execution is subroutine-threaded: a dictionary code cell holding a
//! negative value names a host-provided native operation, a non-negative
//! value is the address of another word's first code cell. `ENTER`/`EXIT`
//! manage a software return-address stack so colon words behave like
//! procedure calls.
//!
//! The boot image is assembled at startup from declarative word
//! descriptors: native words may declare dependencies on each other, the
//! resulting graph is optionally pruned to a root set, topologically
//! sorted, and written into the dictionary. Colon words are compiled from
//! token lists afterwards. See [`bootstrap`].
//!
//! ```rust
//! use forth16::{Forth, VmParams, output::CaptureConsole};
//!
//! let (console, taken) = CaptureConsole::new();
//! let mut vm = Forth::new(VmParams::default(), Box::new(console)).unwrap();
//! vm.buffer_text(": SQUARE DUP * ; 5 SQUARE .");
//! vm.interpret().unwrap();
//! assert_eq!(taken.borrow().as_str(), "25");
//! ```

pub mod bootstrap;
pub mod dict;
pub mod input;
pub mod mem;
pub mod output;
pub mod stack;
pub mod tcb;
pub mod testutil;
pub mod vm;

pub use crate::{
    bootstrap::{BootstrapError, ColonWord, NativeWord},
    mem::Memory,
    output::Console,
    stack::StackError,
    vm::{Forth, VmParams, WordFunc},
};

/// All the ways a VM operation can fail.
///
/// Stack faults and [`Error::UnknownWord`] abort the current run but leave
/// the VM alive; a host may refill the input and resume.
/// [`Error::Bootstrap`] is fatal at image-build time: there is no partial
/// VM. Everything else signals a precondition violation (usually a guest
/// program writing somewhere it should not have).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    Stack(StackError),
    /// HERE advanced past the end of Memory.
    DictionaryOverflow,
    /// A typed accessor was asked to read or write outside the image.
    BadAddress(u16),
    /// Dictionary names are at most 31 bytes.
    NameTooLong(usize),
    /// A colon definition's code field no longer fits the codelen byte.
    DefinitionTooLong(u16),
    /// A token was neither a visible dictionary entry nor a decimal literal.
    UnknownWord(String),
    /// A code cell decoded to a native index outside the word table.
    UnknownToken(usize),
    /// Pointer chasing exceeded the hop cap; a cell points at itself.
    ChaseOverflow(u16),
    /// A native operation needed a word that is not in this image.
    WordNotInDict(&'static str),
    /// `:` reached the end of input before reading a name.
    MissingName,
    DivideByZero,
    BadParams(&'static str),
    Bootstrap(BootstrapError),
}

impl From<StackError> for Error {
    fn from(se: StackError) -> Self {
        Error::Stack(se)
    }
}

impl From<BootstrapError> for Error {
    fn from(be: BootstrapError) -> Self {
        Error::Bootstrap(be)
    }
}

impl core::fmt::Display for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Error::Stack(StackError::Overflow) => write!(f, "stack overflow"),
            Error::Stack(StackError::Underflow) => write!(f, "stack underflow"),
            Error::DictionaryOverflow => write!(f, "dictionary overflow"),
            Error::BadAddress(a) => write!(f, "address {a:#06x} outside the image"),
            Error::NameTooLong(n) => write!(f, "name of {n} bytes exceeds the 31 byte limit"),
            Error::DefinitionTooLong(n) => write!(f, "definition of {n} code bytes exceeds 255"),
            Error::UnknownWord(w) => write!(f, "unknown word {w:?}"),
            Error::UnknownToken(t) => write!(f, "native token {t} outside the word table"),
            Error::ChaseOverflow(a) => write!(f, "code cell cycle chasing from {a:#06x}"),
            Error::WordNotInDict(w) => write!(f, "required word {w:?} not in this image"),
            Error::MissingName => write!(f, "expected a name before end of input"),
            Error::DivideByZero => write!(f, "division by zero"),
            Error::BadParams(why) => write!(f, "bad VM parameters: {why}"),
            Error::Bootstrap(be) => write!(f, "bootstrap failed: {be}"),
        }
    }
}

impl std::error::Error for Error {}

pub(crate) trait ReplaceErr {
    type OK;
    fn replace_err<NE>(self, t: NE) -> Result<Self::OK, NE>;
}

impl<T, OE> ReplaceErr for Result<T, OE> {
    type OK = T;

    #[inline]
    fn replace_err<NE>(self, e: NE) -> Result<Self::OK, NE> {
        match self {
            Ok(t) => Ok(t),
            Err(_e) => Err(e),
        }
    }
}
