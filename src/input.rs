//! The buffered text source the interpreter pulls tokens from.
//!
//! The VM consumes one text buffer at a time; re-supplying a buffer
//! clears any unconsumed contents. Tokens are split on the blank
//! characters {space, CR, LF, TAB} with consecutive blanks collapsed.

/// Characters that separate tokens.
fn is_blank(b: u8) -> bool {
    matches!(b, b' ' | b'\r' | b'\n' | b'\t')
}

pub struct TextSource {
    buf: String,
    cur: usize,
    holding: Option<(usize, usize)>,
}

impl TextSource {
    pub fn new() -> Self {
        Self {
            buf: String::new(),
            cur: 0,
            holding: None,
        }
    }

    /// Replace the buffer. Anything unconsumed is discarded.
    pub fn fill(&mut self, input: &str) {
        self.buf.clear();
        self.buf.push_str(input);
        self.cur = 0;
        self.holding = None;
    }

    pub fn is_exhausted(&self) -> bool {
        self.buf.as_bytes()[self.cur..].iter().all(|b| is_blank(*b))
    }

    /// Move to the next token, if any. The token is read back with
    /// [`TextSource::cur_word`].
    pub fn advance(&mut self) {
        self.holding = None;
        let bytes = self.buf.as_bytes();
        while self.cur < bytes.len() && is_blank(bytes[self.cur]) {
            self.cur += 1;
        }
        if self.cur == bytes.len() {
            return;
        }
        let start = self.cur;
        while self.cur < bytes.len() && !is_blank(bytes[self.cur]) {
            self.cur += 1;
        }
        self.holding = Some((start, self.cur));
    }

    pub fn cur_word(&self) -> Option<&str> {
        self.holding.map(|(start, end)| &self.buf[start..end])
    }

    /// One raw character, for `KEY`. Blanks are significant here.
    pub fn next_char(&mut self) -> Option<u8> {
        self.holding = None;
        let bytes = self.buf.as_bytes();
        if self.cur < bytes.len() {
            let b = bytes[self.cur];
            self.cur += 1;
            Some(b)
        } else {
            None
        }
    }
}

impl Default for TextSource {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn blanks_collapse() {
        let mut src = TextSource::new();
        src.fill("  LIT 1\t\tLIT 2 \r\n + . HALT \n");
        let mut words = Vec::new();
        loop {
            src.advance();
            match src.cur_word() {
                Some(w) => words.push(w.to_string()),
                None => break,
            }
        }
        assert_eq!(words, ["LIT", "1", "LIT", "2", "+", ".", "HALT"]);
        assert!(src.is_exhausted());
    }

    #[test]
    fn refill_discards_unconsumed_text() {
        let mut src = TextSource::new();
        src.fill("ONE TWO THREE");
        src.advance();
        assert_eq!(src.cur_word(), Some("ONE"));
        src.fill("FOUR");
        src.advance();
        assert_eq!(src.cur_word(), Some("FOUR"));
        src.advance();
        assert_eq!(src.cur_word(), None);
    }

    #[test]
    fn next_char_is_raw() {
        let mut src = TextSource::new();
        src.fill("a b");
        assert_eq!(src.next_char(), Some(b'a'));
        assert_eq!(src.next_char(), Some(b' '));
        assert_eq!(src.next_char(), Some(b'b'));
        assert_eq!(src.next_char(), None);
    }
}
