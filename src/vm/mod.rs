//! The threaded-code execution engine.
//!
//! A [`Forth`] owns one [`Memory`] image plus the host-side tables that
//! cannot live inside it: the native word callbacks, the bootstrap
//! resolution records, and the console. All guest-visible state (the TCB
//! registers, the dictionary, both stacks) is in Memory; the lens structs
//! held here are just typed views.
//!
//! The inner loop is subroutine-threaded. `CURRENT_WORD` holds the
//! address of the cell to execute; [`Forth::step`] chases non-negative
//! cells as call addresses until it lands on a negative cell naming a
//! native operation, then invokes it. Natives advance the machine
//! themselves, normally by calling [`Forth::next`], so a native that
//! wants to transfer control can simply rewrite `CURRENT_WORD` and
//! return.

use std::collections::BTreeMap;

use tracing::{debug, trace};

use crate::{
    bootstrap::{self, ColonWord, NativeWord},
    dict::Dict,
    input::TextSource,
    mem::Memory,
    output::Console,
    stack::Stack,
    tcb::{Reg, Tcb},
    Error,
};

pub mod builtins;

pub use builtins::{CORE_BUILTINS, CORE_COLON_WORDS};

/// A native word's host callback.
pub type WordFunc = fn(&mut Forth) -> Result<(), Error>;

/// Chasing more than this many call cells without reaching a native
/// token means the code field is cyclic.
const MAX_CHASE: u16 = 64;

/// Image geometry. The defaults give a 4 KiB image with 256 cells of
/// parameter stack and 256 cells of return stack headroom.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VmParams {
    /// Image size in bytes, at most [`crate::mem::MAX_IMAGE`].
    pub memory_size: u16,
    /// Parameter stack region, below the top of the image.
    pub pstack_bytes: u16,
    /// Return stack headroom guaranteed at boot. The return stack's real
    /// floor is HERE, so the dictionary and the return stack share the
    /// middle of the image.
    pub rstack_bytes: u16,
    /// Dictionary entry alignment; a power of two, at least 2.
    pub align: u16,
}

impl Default for VmParams {
    fn default() -> Self {
        Self {
            memory_size: 4096,
            pstack_bytes: 512,
            rstack_bytes: 512,
            align: 2,
        }
    }
}

/// The VM: one Memory image plus the host tables around it.
pub struct Forth {
    pub(crate) memory: Memory,
    pub(crate) tcb: Tcb,
    pub(crate) dict: Dict,
    pub(crate) pstack: Stack,
    pub(crate) rstack: Stack,
    /// Native dispatch table; a code cell of `-(i + 1)` invokes entry `i`.
    pub(crate) words: Vec<(&'static str, WordFunc)>,
    /// Entry head of every bootstrap-defined word, by name.
    pub(crate) resolved: BTreeMap<&'static str, u16>,
    /// Scratch regions reserved during bootstrap, by owning word.
    pub(crate) pads: BTreeMap<&'static str, u16>,
    pub(crate) console: Box<dyn Console>,
    pub(crate) input: TextSource,
    pub(crate) alive: bool,
    /// Address of the cell [`Forth::step`] dispatched on, after chasing:
    /// for a colon word this is its CWA, which is how `ENTER` finds the
    /// body.
    pub(crate) w: u16,
}

impl Forth {
    /// A VM with the core word set.
    pub fn new(params: VmParams, console: Box<dyn Console>) -> Result<Self, Error> {
        Self::with_words(params, console, CORE_BUILTINS, CORE_COLON_WORDS, None)
    }

    /// A VM bootstrapped from caller-supplied descriptor tables. With
    /// `roots`, the native set is pruned to the roots plus their
    /// transitive dependencies before the image is built.
    pub fn with_words(
        params: VmParams,
        console: Box<dyn Console>,
        natives: &[NativeWord],
        colons: &[ColonWord],
        roots: Option<&[&str]>,
    ) -> Result<Self, Error> {
        let fixed = Tcb::SIZE as usize + params.pstack_bytes as usize + params.rstack_bytes as usize;
        if fixed >= params.memory_size as usize {
            return Err(Error::BadParams(
                "memory_size must exceed the TCB and stack regions",
            ));
        }

        let mut memory = Memory::new(params.memory_size as usize)?;
        let tcb = Tcb::new(0);
        let dict = Dict::new(tcb, params.align)?;

        // Region map, top down: pstack, rstack, then dictionary growing
        // up from the TCB. Stacks grow toward lower addresses.
        let p0 = params.memory_size;
        let r0 = p0 - params.pstack_bytes;
        tcb.store(&mut memory, Reg::Here, Tcb::SIZE)?;
        tcb.store(&mut memory, Reg::Latest, 0)?;
        tcb.store(&mut memory, Reg::P0, p0)?;
        tcb.store(&mut memory, Reg::Psp, p0)?;
        tcb.store(&mut memory, Reg::R0, r0)?;
        tcb.store(&mut memory, Reg::Rsp, r0)?;
        tcb.store(&mut memory, Reg::State, 0)?;

        let pstack = Stack::new(tcb, Reg::Psp, Reg::P0, Reg::Rsp);
        let rstack = Stack::new(tcb, Reg::Rsp, Reg::R0, Reg::Here);

        let mut vm = Self {
            memory,
            tcb,
            dict,
            pstack,
            rstack,
            words: Vec::new(),
            resolved: BTreeMap::new(),
            pads: BTreeMap::new(),
            console,
            input: TextSource::new(),
            alive: false,
            w: 0,
        };
        bootstrap::build_image(&mut vm, natives, colons, roots)?;
        debug!(
            words = vm.words.len(),
            here = vm.tcb.load(&vm.memory, Reg::Here)?,
            "image built"
        );
        Ok(vm)
    }

    /// Supply a buffer of program text; any unconsumed previous text is
    /// discarded.
    pub fn buffer_text(&mut self, text: &str) {
        self.input.fill(text);
    }

    /// Run the interpreter over the buffered text, then over any further
    /// lines the console yields. Returns when input is exhausted or a
    /// guest program halts the VM.
    pub fn interpret(&mut self) -> Result<(), Error> {
        self.execute("COREINT")
    }

    /// Execute one named word to completion.
    pub fn execute(&mut self, name: &str) -> Result<(), Error> {
        let head = self
            .dict
            .find(&self.memory, name, false)?
            .ok_or_else(|| Error::UnknownWord(name.to_string()))?;
        let stop = self
            .dict
            .find(&self.memory, "(stop)", false)?
            .ok_or(Error::WordNotInDict("(stop)"))?;
        // A run starts with an empty return stack; a halted run leaves
        // its saved continuations behind, the trampoline's included.
        let r0 = self.tcb.load(&self.memory, Reg::R0)?;
        self.tcb.store(&mut self.memory, Reg::Rsp, r0)?;
        // The word's continuation is the trampoline that ends the run.
        self.tcb
            .store(&mut self.memory, Reg::CurrentWord, self.dict.cwa(head))?;
        self.tcb
            .store(&mut self.memory, Reg::NextWord, self.dict.cwa(stop))?;
        self.alive = true;
        self.run()
    }

    fn run(&mut self) -> Result<(), Error> {
        while self.alive {
            self.step()?;
        }
        Ok(())
    }

    /// One dispatch: chase `CURRENT_WORD` to a native token and invoke
    /// it.
    fn step(&mut self) -> Result<(), Error> {
        let at = self.tcb.load(&self.memory, Reg::CurrentWord)?;
        let (w, idx) = self.chase(at)?;
        self.w = w;
        let (name, func) = *self.words.get(idx).ok_or(Error::UnknownToken(idx))?;
        trace!(at, w, word = name, "dispatch");
        func(self)
    }

    /// Follow call cells from `at` until a negative cell names a native.
    /// Returns the address of that cell and the decoded native index.
    fn chase(&self, at: u16) -> Result<(u16, usize), Error> {
        let mut at = at;
        for _ in 0..MAX_CHASE {
            let cell = self.memory.read_i16(at)?;
            if cell < 0 {
                return Ok((at, (-(cell as i32) - 1) as usize));
            }
            at = cell as u16;
        }
        Err(Error::ChaseOverflow(at))
    }

    /// Advance to the following cell: the fetched address becomes
    /// `CURRENT_WORD` and `NEXT_WORD` moves past it.
    pub(crate) fn next(&mut self) -> Result<(), Error> {
        let nw = self.tcb.load(&self.memory, Reg::NextWord)?;
        self.tcb.store(&mut self.memory, Reg::CurrentWord, nw)?;
        let after = nw.checked_add(2).ok_or(Error::BadAddress(nw))?;
        self.tcb.store(&mut self.memory, Reg::NextWord, after)?;
        Ok(())
    }

    /// The first code cell of a bootstrap-defined word: for a native,
    /// its token. Aliasing and colon definitions built on a native need
    /// this.
    pub(crate) fn body_token(&self, name: &'static str) -> Result<i16, Error> {
        let head = self
            .dict
            .find(&self.memory, name, true)?
            .ok_or(Error::WordNotInDict(name))?;
        self.memory.read_i16(self.dict.cwa(head))
    }

    /// CWA of a word this image was bootstrapped with.
    pub(crate) fn dep_cwa(&self, name: &'static str) -> Result<u16, Error> {
        let head = self
            .resolved
            .get(name)
            .copied()
            .ok_or(Error::WordNotInDict(name))?;
        Ok(self.dict.cwa(head))
    }

    /// Address of the scratch region a native reserved at bootstrap.
    pub(crate) fn pad_addr(&self, name: &'static str) -> Result<u16, Error> {
        self.pads
            .get(name)
            .copied()
            .ok_or(Error::WordNotInDict(name))
    }

    /// Bytes currently on the parameter stack.
    pub fn stack_depth(&self) -> Result<u16, Error> {
        self.pstack.depth(&self.memory)
    }

    /// The dictionary listing, for diagnostics.
    pub fn dump_dict(&self) -> Result<String, Error> {
        self.dict.dump(&self.memory)
    }
}

#[cfg(test)]
pub mod test {
    use super::*;
    use crate::{bootstrap::BootstrapError, output::CaptureConsole};
    use std::{cell::RefCell, rc::Rc};

    pub(crate) fn vm() -> (Forth, Rc<RefCell<String>>) {
        let (console, taken) = CaptureConsole::new();
        let vm = Forth::new(VmParams::default(), Box::new(console)).unwrap();
        (vm, taken)
    }

    fn run(text: &str) -> (Forth, String) {
        let (mut vm, taken) = vm();
        vm.buffer_text(text);
        vm.interpret().unwrap();
        let out = taken.borrow().clone();
        (vm, out)
    }

    #[test]
    fn interprets_literals_and_arithmetic() {
        let (_vm, out) = run("1 2 + .");
        assert_eq!(out, "3");
    }

    #[test]
    fn compiles_and_runs_a_colon_word() {
        let (vm, out) = run(": SQUARE DUP * ; 5 SQUARE .");
        assert_eq!(out, "25");
        // The definition is unhidden and visible afterwards.
        assert!(vm.dict.find(&vm.memory, "SQUARE", false).unwrap().is_some());
    }

    #[test]
    fn colon_words_nest() {
        let (_vm, out) = run(": SQUARE DUP * ; : QUAD SQUARE SQUARE ; 3 QUAD .");
        assert_eq!(out, "81");
    }

    #[test]
    fn halt_stops_mid_buffer() {
        let (_vm, out) = run("1 . HALT 2 .");
        assert_eq!(out, "1");
    }

    #[test]
    fn unknown_word_is_an_error_and_leaves_state_alone() {
        let (mut vm, _taken) = vm();
        let here = vm.tcb.load(&vm.memory, Reg::Here).unwrap();
        vm.buffer_text("1 2 FOO");
        let err = vm.interpret().unwrap_err();
        assert_eq!(err, Error::UnknownWord("FOO".to_string()));
        // The literals made it on; FOO changed nothing.
        assert_eq!(vm.stack_depth().unwrap(), 4);
        assert_eq!(vm.tcb.load(&vm.memory, Reg::Here).unwrap(), here);
        // The VM is still usable.
        vm.buffer_text("+ .");
        vm.interpret().unwrap();
    }

    #[test]
    fn open_bracket_compiles_and_close_bracket_interprets() {
        let (mut vm, _taken) = vm();
        let here = vm.tcb.load(&vm.memory, Reg::Here).unwrap();
        // `[` flips to compiling, so the literals are laid down as
        // LIT pairs instead of pushed; `]` is immediate and flips back.
        vm.buffer_text("[ 1 2 ]");
        vm.interpret().unwrap();
        assert_eq!(vm.stack_depth().unwrap(), 0);
        assert_eq!(vm.tcb.load(&vm.memory, Reg::Here).unwrap(), here + 8);
        assert_eq!(vm.tcb.load(&vm.memory, Reg::State).unwrap(), 0);
    }

    #[test]
    fn console_lines_feed_the_interpreter_after_the_buffer() {
        let (mut console, taken) = CaptureConsole::new();
        console.push_line("3 4 * .");
        let mut vm = Forth::new(VmParams::default(), Box::new(console)).unwrap();
        vm.buffer_text("1 .");
        vm.interpret().unwrap();
        assert_eq!(taken.borrow().as_str(), "112");
    }

    #[test]
    fn interpret_does_not_leak_the_return_stack() {
        let (mut vm, _taken) = vm();
        vm.buffer_text("1 DROP");
        vm.interpret().unwrap();
        let rsp_after_one = vm.tcb.load(&vm.memory, Reg::Rsp).unwrap();
        // Far more runs than the return stack region holds cells for.
        for _ in 0..2000 {
            vm.buffer_text("1 DROP");
            vm.interpret().unwrap();
        }
        assert_eq!(vm.tcb.load(&vm.memory, Reg::Rsp).unwrap(), rsp_after_one);
    }

    #[test]
    fn executes_a_single_native() {
        let (mut vm, _taken) = vm();
        vm.pstack.push_i16(&mut vm.memory, 9).unwrap();
        vm.execute("DUP").unwrap();
        assert_eq!(vm.stack_depth().unwrap(), 4);
    }

    #[test]
    fn pruned_image_keeps_roots_and_dependencies_only() {
        let (console, _taken) = CaptureConsole::new();
        let vm = Forth::with_words(
            VmParams::default(),
            Box::new(console),
            CORE_BUILTINS,
            &[],
            Some(&["DUP", "(stop)"]),
        )
        .unwrap();
        assert!(vm.dict.find(&vm.memory, "DUP", false).unwrap().is_some());
        assert!(vm.dict.find(&vm.memory, "SWAP", false).unwrap().is_none());

        let (console, _taken) = CaptureConsole::new();
        let err = Forth::with_words(
            VmParams::default(),
            Box::new(console),
            CORE_BUILTINS,
            &[],
            Some(&["NOPE"]),
        )
        .err()
        .unwrap();
        assert_eq!(
            err,
            Error::Bootstrap(BootstrapError::UnknownRoot("NOPE".to_string()))
        );
    }

    #[test]
    fn bootstrapped_colon_word_runs() {
        let (console, taken) = CaptureConsole::new();
        let colons = &[ColonWord {
            name: "doAll",
            immediate: false,
            tokens: &["LIT", "1", "LIT", "2", "+", ".", "HALT"],
        }];
        let mut vm = Forth::with_words(
            VmParams::default(),
            Box::new(console),
            CORE_BUILTINS,
            colons,
            None,
        )
        .unwrap();
        vm.execute("doAll").unwrap();
        assert_eq!(taken.borrow().as_str(), "3");
    }

    #[test]
    fn unresolvable_colon_token_aborts_bootstrap() {
        let (console, _taken) = CaptureConsole::new();
        let colons = &[ColonWord {
            name: "BROKEN",
            immediate: false,
            tokens: &["NO-SUCH"],
        }];
        let err = Forth::with_words(
            VmParams::default(),
            Box::new(console),
            CORE_BUILTINS,
            colons,
            None,
        )
        .err()
        .unwrap();
        assert_eq!(
            err,
            Error::Bootstrap(BootstrapError::UnresolvedToken {
                word: "BROKEN".to_string(),
                token: "NO-SUCH".to_string(),
            })
        );
    }

    #[test]
    fn unknown_dependency_aborts_bootstrap() {
        let (console, _taken) = CaptureConsole::new();
        let natives = &[NativeWord {
            name: "X",
            func: Forth::halt,
            immediate: false,
            pad: 0,
            deps: &["MISSING"],
            priority: 0,
        }];
        let err = Forth::with_words(
            VmParams::default(),
            Box::new(console),
            natives,
            &[],
            None,
        )
        .err()
        .unwrap();
        assert_eq!(
            err,
            Error::Bootstrap(BootstrapError::UnknownDependency {
                word: "X".to_string(),
                dep: "MISSING".to_string(),
            })
        );
    }

    #[test]
    fn alias_shares_the_original_body() {
        let (mut vm, _taken) = vm();
        vm.dict.alias(&mut vm.memory, "DUP", "COPY").unwrap();
        vm.pstack.push_i16(&mut vm.memory, 9).unwrap();
        vm.execute("COPY").unwrap();
        assert_eq!(vm.stack_depth().unwrap(), 4);
    }

    #[test]
    fn self_referencing_cell_is_a_chase_overflow() {
        let (mut vm, _taken) = vm();
        let cwa = vm
            .dict
            .define_code(&mut vm.memory, "KNOT", &[0], false)
            .unwrap();
        vm.memory.write_u16(cwa, cwa).unwrap();
        assert_eq!(vm.execute("KNOT"), Err(Error::ChaseOverflow(cwa)));
    }

    #[test]
    fn unknown_token_is_rejected() {
        let (mut vm, _taken) = vm();
        vm.dict
            .define_code(&mut vm.memory, "BAD", &[-999], false)
            .unwrap();
        assert_eq!(vm.execute("BAD"), Err(Error::UnknownToken(998)));
    }

    #[test]
    fn params_must_leave_dictionary_room() {
        let (console, _taken) = CaptureConsole::new();
        let params = VmParams {
            memory_size: 1024,
            pstack_bytes: 512,
            rstack_bytes: 512,
            align: 2,
        };
        assert!(matches!(
            Forth::with_words(params, Box::new(console), CORE_BUILTINS, &[], None),
            Err(Error::BadParams(_))
        ));
    }
}
