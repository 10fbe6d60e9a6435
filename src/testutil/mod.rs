//! # Test Utilities
//!
//! Helpers for running "ui tests": executing guest programs at test time
//! and checking their console output line by line.
//!
//! ## UI Tests
//!
//! Each line of a ui-test is one of the following:
//!
//! * Configuration values for the VM, specified as "frontmatter comments".
//!   These must appear before any other non-comment lines. Currently
//!   accepted:
//!     * `( memory_size U16 )`
//!     * `( pstack_bytes U16 )`
//!     * `( rstack_bytes U16 )`
//!     * `( align U16 )`
//! * Comment lines. Any line containing just a `( ... )` style comment.
//! * Successful input lines, starting with `> ...`.
//! * Expected output lines, starting with `< ...`.
//!     * Any successful input line can have zero or more output lines
//!     * If *no* output lines are given, ANY successful output is
//!       accepted/ignored.
//! * Unsuccessful input lines, starting with `x ...`.
//!     * This line is expected to fail - interpreting it returns an
//!       `Err()`.
//!     * There is no way to specify which error yet
//!     * Unsuccessful input lines may not have any expected output
//!
//! ### Example
//!
//! This is a ui-test doctest. It runs with `cargo test`.
//!
//! ```rust
//! # use forth16::testutil::runtest;
//! #
//! # runtest(r#"
//! ( specify VM settings with frontmatter )
//! ( memory_size 8192 )
//!
//! ( specify input with no output )
//! > : star 42 EMIT ;
//!
//! ( specify input and output )
//! > star
//! < *
//!
//! ( specify lines that cause errors )
//! x starb
//! # "#)
//! ```

use std::{cell::RefCell, rc::Rc};

use crate::{
    output::CaptureConsole,
    vm::{Forth, VmParams},
    Error,
};

/// Run the given ui test against a fresh VM.
///
/// Does accept any/all/none of the configuration frontmatter (see above
/// for the listing of frontmatter kinds).
pub fn runtest(contents: &str) {
    let tokd = tokenize(contents, true).unwrap();
    let (console, taken) = CaptureConsole::new();
    let mut forth = Forth::new(tokd.settings, Box::new(console)).unwrap();
    steps_with(tokd.steps.as_slice(), &mut forth, &taken);
}

/// Run the given ui-test against the given VM, with the given capture
/// handle.
///
/// Does not accept ui-tests with frontmatter configuration (will panic).
pub fn runtest_with(forth: &mut Forth, taken: &Rc<RefCell<String>>, contents: &str) {
    let tokd = tokenize(contents, false).unwrap();
    steps_with(tokd.steps.as_slice(), forth, taken);
}

// Runs the given steps against the given VM.
//
// Panics on any mismatch.
fn steps_with(steps: &[Step], forth: &mut Forth, taken: &Rc<RefCell<String>>) {
    for Step {
        input,
        output: outcome,
    } in steps
    {
        println!("> {input}");
        forth.buffer_text(input);
        let res = forth.interpret();
        check_output(res, outcome, taken.borrow().as_str());
        taken.borrow_mut().clear();
    }
}

fn check_output(res: Result<(), Error>, outcome: &Outcome, output: &str) {
    println!("< {output}");
    match (res, outcome) {
        (Ok(()), Outcome::OkAnyOutput) => {}
        (Ok(()), Outcome::OkWithOutput(exp)) => {
            let act_lines = output.lines().collect::<Vec<&str>>();
            assert_eq!(act_lines.len(), exp.len());
            act_lines.iter().zip(exp.iter()).for_each(|(a, e)| {
                assert_eq!(a.trim_end(), e.trim_end());
            })
        }
        (Err(_e), Outcome::FatalError) => {}
        (res, exp) => {
            eprintln!("Error!");
            eprintln!("Expected: {exp:?}");
            eprintln!("Got: {res:?}");
            if res.is_ok() {
                eprintln!("Output:\n{}", output);
            }
            panic!();
        }
    }
}

#[derive(Debug)]
enum Outcome {
    OkAnyOutput,
    OkWithOutput(Vec<String>),
    FatalError,
}

#[derive(Debug)]
struct Step {
    input: String,
    output: Outcome,
}

#[derive(Debug)]
struct Tokenized {
    settings: VmParams,
    steps: Vec<Step>,
}

impl Default for Tokenized {
    fn default() -> Self {
        Self {
            settings: VmParams::default(),
            steps: Vec::new(),
        }
    }
}

fn tokenize(contents: &str, allow_frontmatter: bool) -> Result<Tokenized, ()> {
    let mut output = Tokenized::default();
    let mut frontmatter_done = !allow_frontmatter;

    for line in contents.lines() {
        let (tok, remain) = if let Some(t) = line.trim_start().split_once(' ') {
            t
        } else {
            continue;
        };

        match tok {
            ">" => {
                frontmatter_done = true;
                output.steps.push(Step {
                    input: remain.to_string(),
                    output: Outcome::OkAnyOutput,
                });
            }
            "<" => {
                frontmatter_done = true;
                let cur_step = output.steps.last_mut().unwrap();
                let expected_out = remain.to_string();
                match &mut cur_step.output {
                    Outcome::OkAnyOutput => {
                        cur_step.output = Outcome::OkWithOutput(vec![expected_out]);
                    }
                    Outcome::OkWithOutput(o) => {
                        o.push(expected_out);
                    }
                    Outcome::FatalError => panic!("error lines can't expect output"),
                }
            }
            "x" => {
                frontmatter_done = true;
                output.steps.push(Step {
                    input: remain.to_string(),
                    output: Outcome::FatalError,
                });
            }
            "(" => {
                let mut split = remain.split_whitespace();
                let mut is_comment = false;
                match split.next() {
                    Some("memory_size") => {
                        output.settings.memory_size = split.next().unwrap().parse().unwrap();
                    }
                    Some("pstack_bytes") => {
                        output.settings.pstack_bytes = split.next().unwrap().parse().unwrap();
                    }
                    Some("rstack_bytes") => {
                        output.settings.rstack_bytes = split.next().unwrap().parse().unwrap();
                    }
                    Some("align") => {
                        output.settings.align = split.next().unwrap().parse().unwrap();
                    }
                    Some(_) => {
                        is_comment = true;
                    }
                    _ => panic!(),
                }
                if !is_comment {
                    assert!(!frontmatter_done, "Unexpected frontmatter settings!");
                    assert_eq!(Some(")"), split.next());
                }
            }
            _ => {}
        }
    }

    Ok(output)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn basic_arithmetic() {
        runtest(
            r#"
            > 1 2 + .
            < 3
            > 10 3 MOD .
            < 1
            "#,
        );
    }

    #[test]
    fn colon_definitions_across_steps() {
        runtest(
            r#"
            > : SQUARE DUP * ;
            > : CUBE DUP SQUARE * ;
            > 3 CUBE .
            < 27
            x NO-SUCH-WORD
            > 2 SQUARE .
            < 4
            "#,
        );
    }

    #[test]
    fn frontmatter_sizes_the_image() {
        runtest(
            r#"
            ( memory_size 2048 )
            ( pstack_bytes 128 )
            ( rstack_bytes 128 )
            > 1 2 + .
            < 3
            "#,
        );
    }

    #[test]
    fn multi_line_output() {
        runtest(
            r#"
            > 1 . CR 2 . CR
            < 1
            < 2
            "#,
        );
    }
}
