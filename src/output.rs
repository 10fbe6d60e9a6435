//! The pluggable sink/source pair behind `KEY`, `EMIT`, `PRINT`, `.` and
//! friends.
//!
//! Every VM owns one [`Console`]; there is no process-wide default, so
//! multiple VM instances can coexist. [`StdConsole`] is the interactive
//! default (line-buffered stdin, direct stdout). [`VoidConsole`] discards
//! everything, for headless use. [`CaptureConsole`] records output for
//! tests.

use std::{
    cell::RefCell,
    collections::VecDeque,
    io::{BufRead, Write},
    rc::Rc,
};

pub trait Console {
    /// Pull one line of fallback input. `None` means the source is gone
    /// for good (EOF), which halts the interpreter loop.
    fn read_line(&mut self) -> Option<String>;

    fn write_str(&mut self, s: &str);
}

/// Line-buffered interactive console.
pub struct StdConsole;

impl Console for StdConsole {
    fn read_line(&mut self) -> Option<String> {
        let mut line = String::new();
        match std::io::stdin().lock().read_line(&mut line) {
            Ok(0) | Err(_) => None,
            Ok(_) => Some(line),
        }
    }

    fn write_str(&mut self, s: &str) {
        let stdout = std::io::stdout();
        let mut lock = stdout.lock();
        let _ = lock.write_all(s.as_bytes());
        let _ = lock.flush();
    }
}

/// Discards all output and never yields input.
pub struct VoidConsole;

impl Console for VoidConsole {
    fn read_line(&mut self) -> Option<String> {
        None
    }

    fn write_str(&mut self, _s: &str) {}
}

/// Records everything written, and serves a scripted queue of input
/// lines. The capture buffer is shared, so the test keeps a handle while
/// the VM owns the console.
pub struct CaptureConsole {
    out: Rc<RefCell<String>>,
    lines: VecDeque<String>,
}

impl CaptureConsole {
    pub fn new() -> (Self, Rc<RefCell<String>>) {
        let out = Rc::new(RefCell::new(String::new()));
        (
            Self {
                out: out.clone(),
                lines: VecDeque::new(),
            },
            out,
        )
    }

    /// Queue a line to be served by `read_line`.
    pub fn push_line(&mut self, line: &str) {
        self.lines.push_back(line.to_string());
    }
}

impl Console for CaptureConsole {
    fn read_line(&mut self) -> Option<String> {
        self.lines.pop_front()
    }

    fn write_str(&mut self, s: &str) {
        self.out.borrow_mut().push_str(s);
    }
}
