//! The random-access reader. [`decode`] materializes a whole buffer;
//! [`get`] walks a path of keys and indices, skipping over sibling
//! subtrees instead of decoding them — via a container's offset index when
//! one is present, via length-prefix skips otherwise.
//!
//! The reader never mutates its input, so any number of decode/get calls
//! may share one buffer concurrently. Pointer tokens are resolved
//! transparently: the caller never sees a pointer, only the value it
//! designates.

use crate::digits::{digit_value, is_digit, unzigzag};
use crate::error::{DecodeError, Result};
use crate::value::Value;

/// One step of a [`get`] path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Key {
    /// An element position in an array or call.
    Index(usize),
    /// A bare-string object key.
    Name(String),
}

impl From<usize> for Key {
    fn from(index: usize) -> Self {
        Key::Index(index)
    }
}

impl From<&str> for Key {
    fn from(name: &str) -> Self {
        Key::Name(name.to_owned())
    }
}

/// Decodes a complete buffer into a [`Value`]. Trailing bytes after the
/// top-level value are an error.
pub fn decode(input: &str) -> Result<Value> {
    let mut cursor = Cursor::new(input.as_bytes());
    let value = cursor.read_value(true)?;
    if cursor.pos != cursor.buf.len() {
        return Err(DecodeError::TrailingBytes { offset: cursor.pos });
    }
    Ok(value)
}

/// Random access: decodes only the subvalue reached by `path`, without
/// materializing unrelated siblings.
pub fn get(input: &str, path: &[Key]) -> Result<Value> {
    let buf = input.as_bytes();
    let mut pos = 0;
    for (step, key) in path.iter().enumerate() {
        pos = step_into(buf, pos, key, step)?;
    }
    Cursor { buf, pos }.read_value(true)
}

struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn peek(&self) -> Option<u8> {
        self.buf.get(self.pos).copied()
    }

    /// Consumes the run of alphabet characters at the cursor and returns
    /// its span. May be empty.
    fn read_digit_run(&mut self) -> (usize, usize) {
        let start = self.pos;
        while self.peek().is_some_and(is_digit) {
            self.pos += 1;
        }
        (start, self.pos)
    }

    /// Folds a digit span into a `u64`. Leading zero digits are accepted
    /// (decoder leniency); overflow is not.
    fn run_value(&self, start: usize, end: usize) -> Result<u64> {
        let mut value: u64 = 0;
        for &byte in &self.buf[start..end] {
            let digit = digit_value(byte).ok_or(DecodeError::InvalidDigit { offset: start })?;
            value = value
                .checked_mul(64)
                .and_then(|v| v.checked_add(u64::from(digit)))
                .ok_or(DecodeError::IntegerOverflow { offset: start })?;
        }
        Ok(value)
    }

    fn run_u32(&self, start: usize, end: usize) -> Result<u32> {
        u32::try_from(self.run_value(start, end)?)
            .map_err(|_| DecodeError::IntegerOverflow { offset: start })
    }

    fn run_text(&self, start: usize, end: usize) -> Result<String> {
        std::str::from_utf8(&self.buf[start..end])
            .map(str::to_owned)
            .map_err(|_| DecodeError::InvalidUtf8 { offset: start })
    }

    /// Verifies a declared body length against the span actually consumed.
    /// An absent prefix (empty digit run) declares nothing.
    fn check_length(
        &self,
        dstart: usize,
        dend: usize,
        body_start: usize,
        body_end: usize,
        token_start: usize,
    ) -> Result<()> {
        if dend > dstart && self.run_value(dstart, dend)? as usize != body_end - body_start {
            return Err(DecodeError::TruncatedBuffer { offset: token_start });
        }
        Ok(())
    }

    /// Reads one value. `allow_pointer` is false exactly when this read is
    /// itself a pointer target: a pointer there is a chain, which the
    /// format forbids.
    fn read_value(&mut self, allow_pointer: bool) -> Result<Value> {
        let token_start = self.pos;
        let (dstart, dend) = self.read_digit_run();
        let Some(tag) = self.peek() else {
            return Err(DecodeError::TruncatedBuffer { offset: self.pos });
        };
        self.pos += 1;
        match tag {
            b'+' => Ok(Value::Integer(unzigzag(self.run_value(dstart, dend)?))),
            b'*' => {
                let power = i32::try_from(unzigzag(self.run_value(dstart, dend)?))
                    .map_err(|_| DecodeError::IntegerOverflow { offset: dstart })?;
                let significand_offset = self.pos;
                match self.read_value(true)? {
                    Value::Integer(significand) => Ok(Value::Decimal { power, significand }),
                    _ => Err(DecodeError::ExpectedInteger { offset: significand_offset }),
                }
            }
            b':' => Ok(Value::BareString(self.run_text(dstart, dend)?)),
            b'%' => Ok(Value::Opcode(self.run_u32(dstart, dend)?)),
            b'@' => Ok(Value::Reference(self.run_u32(dstart, dend)?)),
            b'$' => Ok(Value::Variable(self.run_text(dstart, dend)?)),
            b'^' => {
                if !allow_pointer {
                    return Err(DecodeError::PointerChain { offset: token_start });
                }
                let target = self.resolve_pointer(dstart, dend, token_start)?;
                Cursor { buf: self.buf, pos: target }.read_value(false)
            }
            b',' => {
                let len = self.run_value(dstart, dend)? as usize;
                let end = self
                    .pos
                    .checked_add(len)
                    .filter(|&end| end <= self.buf.len())
                    .ok_or(DecodeError::TruncatedBuffer { offset: token_start })?;
                let text = self.run_text(self.pos, end)?;
                self.pos = end;
                Ok(Value::RawString(text))
            }
            b'[' => {
                let body = self.pos;
                let values = self.read_seq(b']', token_start)?;
                self.check_length(dstart, dend, body, self.pos - 1, token_start)?;
                Ok(Value::Array(values))
            }
            b'{' => {
                let body = self.pos;
                let pairs = self.read_pairs(token_start)?;
                self.check_length(dstart, dend, body, self.pos - 1, token_start)?;
                Ok(Value::Object(pairs))
            }
            b'(' => {
                let body = self.pos;
                let values = self.read_seq(b')', token_start)?;
                self.check_length(dstart, dend, body, self.pos - 1, token_start)?;
                Ok(Value::Call(values))
            }
            b'=' => {
                let body = self.pos;
                let place = self.read_operand(token_start, "2", 0)?;
                let value = self.read_operand(token_start, "2", 1)?;
                self.check_length(dstart, dend, body, self.pos, token_start)?;
                Ok(Value::Set { place: Box::new(place), value: Box::new(value) })
            }
            b'~' => {
                let body = self.pos;
                let place = self.read_operand(token_start, "1", 0)?;
                self.check_length(dstart, dend, body, self.pos, token_start)?;
                Ok(Value::Delete { place: Box::new(place) })
            }
            b'?' | b'!' => {
                self.expect_paren(tag, dend)?;
                let body = self.pos;
                let mut children = self.read_seq(b')', token_start)?;
                self.check_length(dstart, dend, body, self.pos - 1, token_start)?;
                if !(2..=3).contains(&children.len()) {
                    return Err(DecodeError::ArityMismatch {
                        offset: token_start,
                        expected: "2..3",
                        found: children.len(),
                    });
                }
                let otherwise = (children.len() == 3).then(|| children.pop()).flatten().map(Box::new);
                let (Some(then), Some(cond)) = (children.pop(), children.pop()) else {
                    return Err(DecodeError::ArityMismatch {
                        offset: token_start,
                        expected: "2..3",
                        found: 0,
                    });
                };
                let (cond, then) = (Box::new(cond), Box::new(then));
                Ok(if tag == b'?' {
                    Value::When { cond, then, otherwise }
                } else {
                    Value::Unless { cond, then, otherwise }
                })
            }
            b'|' | b'&' => {
                self.expect_paren(tag, dend)?;
                let body = self.pos;
                let children = self.read_seq(b')', token_start)?;
                self.check_length(dstart, dend, body, self.pos - 1, token_start)?;
                if children.is_empty() {
                    return Err(DecodeError::ArityMismatch {
                        offset: token_start,
                        expected: "1 or more",
                        found: 0,
                    });
                }
                Ok(if tag == b'|' { Value::Alt(children) } else { Value::All(children) })
            }
            b'#' => self.read_indexed(dstart, dend, token_start),
            tag => Err(DecodeError::UnknownTag { tag: tag as char, offset: dend }),
        }
    }

    fn resolve_pointer(&self, dstart: usize, dend: usize, token_start: usize) -> Result<usize> {
        let offset = usize::try_from(self.run_value(dstart, dend)?)
            .map_err(|_| DecodeError::NonForwardPointer { offset: token_start })?;
        self.pos
            .checked_add(offset)
            .filter(|&target| target < self.buf.len())
            .ok_or(DecodeError::NonForwardPointer { offset: token_start })
    }

    fn expect_paren(&mut self, tag: u8, tag_offset: usize) -> Result<()> {
        match self.peek() {
            Some(b'(') => {
                self.pos += 1;
                Ok(())
            }
            _ => Err(DecodeError::UnknownTag { tag: tag as char, offset: tag_offset }),
        }
    }

    fn read_seq(&mut self, closer: u8, opener_offset: usize) -> Result<Vec<Value>> {
        let mut values = Vec::new();
        loop {
            match self.peek() {
                None => return Err(DecodeError::UnterminatedContainer { offset: opener_offset }),
                Some(c) if c == closer => {
                    self.pos += 1;
                    return Ok(values);
                }
                _ => values.push(self.read_value(true)?),
            }
        }
    }

    fn read_pairs(&mut self, opener_offset: usize) -> Result<Vec<(Value, Value)>> {
        let mut pairs = Vec::new();
        loop {
            match self.peek() {
                None => return Err(DecodeError::UnterminatedContainer { offset: opener_offset }),
                Some(b'}') => {
                    self.pos += 1;
                    return Ok(pairs);
                }
                _ => {
                    let key = self.read_value(true)?;
                    if matches!(self.peek(), None | Some(b'}')) {
                        return Err(DecodeError::ArityMismatch {
                            offset: opener_offset,
                            expected: "key/value pairs",
                            found: pairs.len() * 2 + 1,
                        });
                    }
                    let value = self.read_value(true)?;
                    pairs.push((key, value));
                }
            }
        }
    }

    /// A fixed-arity operand. Closers and end-of-buffer in operand position
    /// are arity violations, not separate parse errors.
    fn read_operand(&mut self, op_offset: usize, expected: &'static str, found: usize) -> Result<Value> {
        match self.peek() {
            None | Some(b']') | Some(b'}') | Some(b')') => {
                Err(DecodeError::ArityMismatch { offset: op_offset, expected, found })
            }
            _ => self.read_value(true),
        }
    }

    /// An indexed container: `#<count>[<w><entries><elements>]` (and `{`
    /// for objects). Sequential decoding walks the elements and ignores
    /// the entry table; [`get`] is the consumer that trusts it.
    fn read_indexed(&mut self, dstart: usize, dend: usize, token_start: usize) -> Result<Value> {
        let (cstart, cend) = self.read_digit_run();
        let count = self.run_value(cstart, cend)? as usize;
        let opener = self
            .peek()
            .ok_or(DecodeError::TruncatedBuffer { offset: self.pos })?;
        if opener != b'[' && opener != b'{' {
            return Err(DecodeError::UnknownTag { tag: opener as char, offset: self.pos });
        }
        self.pos += 1;
        let body = self.pos;
        self.skip_index_header(count, token_start)?;

        if opener == b'[' {
            let mut values = Vec::with_capacity(count);
            for _ in 0..count {
                if matches!(self.peek(), None | Some(b']')) {
                    return Err(DecodeError::TruncatedBuffer { offset: token_start });
                }
                values.push(self.read_value(true)?);
            }
            self.expect_closer(b']', token_start)?;
            self.check_length(dstart, dend, body, self.pos - 1, token_start)?;
            Ok(Value::Array(values))
        } else {
            let mut pairs = Vec::with_capacity(count);
            for _ in 0..count {
                if matches!(self.peek(), None | Some(b'}')) {
                    return Err(DecodeError::TruncatedBuffer { offset: token_start });
                }
                let key = self.read_value(true)?;
                if matches!(self.peek(), None | Some(b'}')) {
                    return Err(DecodeError::ArityMismatch {
                        offset: token_start,
                        expected: "key/value pairs",
                        found: pairs.len() * 2 + 1,
                    });
                }
                let value = self.read_value(true)?;
                pairs.push((key, value));
            }
            self.expect_closer(b'}', token_start)?;
            self.check_length(dstart, dend, body, self.pos - 1, token_start)?;
            Ok(Value::Object(pairs))
        }
    }

    /// Consumes the width digit and the entry table of an indexed
    /// container.
    fn skip_index_header(&mut self, count: usize, token_start: usize) -> Result<()> {
        let width = match self.peek().and_then(digit_value) {
            Some(w @ 0..=2) => w as usize + 1,
            Some(_) => return Err(DecodeError::InvalidDigit { offset: self.pos }),
            None => return Err(DecodeError::TruncatedBuffer { offset: self.pos }),
        };
        self.pos += 1;
        let entries_len = count
            .checked_mul(width)
            .filter(|&len| self.pos.checked_add(len).is_some_and(|end| end <= self.buf.len()))
            .ok_or(DecodeError::TruncatedBuffer { offset: token_start })?;
        self.pos += entries_len;
        Ok(())
    }

    fn expect_closer(&mut self, closer: u8, opener_offset: usize) -> Result<()> {
        match self.peek() {
            Some(c) if c == closer => {
                self.pos += 1;
                Ok(())
            }
            _ => Err(DecodeError::UnterminatedContainer { offset: opener_offset }),
        }
    }

    /// Advances past one value without building it. Uses the length prefix
    /// when one is present, a delimiter-matching scan when not.
    fn skip_value(&mut self) -> Result<()> {
        let token_start = self.pos;
        let (dstart, dend) = self.read_digit_run();
        let Some(tag) = self.peek() else {
            return Err(DecodeError::TruncatedBuffer { offset: self.pos });
        };
        self.pos += 1;
        match tag {
            b'+' | b':' | b'%' | b'@' | b'$' | b'^' => Ok(()),
            b'*' => self.skip_value(),
            b',' => {
                let len = self.run_value(dstart, dend)? as usize;
                self.pos = self
                    .pos
                    .checked_add(len)
                    .filter(|&end| end <= self.buf.len())
                    .ok_or(DecodeError::TruncatedBuffer { offset: token_start })?;
                Ok(())
            }
            b'[' => self.skip_body(dstart, dend, b']', token_start),
            b'{' => self.skip_body(dstart, dend, b'}', token_start),
            b'(' => self.skip_body(dstart, dend, b')', token_start),
            b'=' => self.skip_operands(dstart, dend, 2, token_start),
            b'~' => self.skip_operands(dstart, dend, 1, token_start),
            b'?' | b'!' | b'|' | b'&' => {
                self.expect_paren(tag, dend)?;
                self.skip_body(dstart, dend, b')', token_start)
            }
            b'#' => {
                let (cstart, cend) = self.read_digit_run();
                let count = self.run_value(cstart, cend)? as usize;
                let opener = self
                    .peek()
                    .ok_or(DecodeError::TruncatedBuffer { offset: self.pos })?;
                let closer = match opener {
                    b'[' => b']',
                    b'{' => b'}',
                    other => {
                        return Err(DecodeError::UnknownTag { tag: other as char, offset: self.pos })
                    }
                };
                self.pos += 1;
                if dend > dstart {
                    return self.skip_declared(dstart, dend, Some(closer), token_start);
                }
                self.skip_index_header(count, token_start)?;
                self.scan_to_closer(closer, token_start)
            }
            tag => Err(DecodeError::UnknownTag { tag: tag as char, offset: dend }),
        }
    }

    fn skip_body(&mut self, dstart: usize, dend: usize, closer: u8, token_start: usize) -> Result<()> {
        if dend > dstart {
            return self.skip_declared(dstart, dend, Some(closer), token_start);
        }
        self.scan_to_closer(closer, token_start)
    }

    fn skip_operands(&mut self, dstart: usize, dend: usize, count: usize, token_start: usize) -> Result<()> {
        if dend > dstart {
            return self.skip_declared(dstart, dend, None, token_start);
        }
        for _ in 0..count {
            self.skip_value()?;
        }
        Ok(())
    }

    /// The O(1) skip: jump a declared body length, landing on the closer
    /// when the container has one.
    fn skip_declared(
        &mut self,
        dstart: usize,
        dend: usize,
        closer: Option<u8>,
        token_start: usize,
    ) -> Result<()> {
        let len = self.run_value(dstart, dend)? as usize;
        let end = self
            .pos
            .checked_add(len)
            .filter(|&end| end <= self.buf.len())
            .ok_or(DecodeError::TruncatedBuffer { offset: token_start })?;
        self.pos = end;
        if let Some(closer) = closer {
            self.expect_closer(closer, token_start)?;
        }
        Ok(())
    }

    fn scan_to_closer(&mut self, closer: u8, token_start: usize) -> Result<()> {
        loop {
            match self.peek() {
                None => return Err(DecodeError::UnterminatedContainer { offset: token_start }),
                Some(c) if c == closer => {
                    self.pos += 1;
                    return Ok(());
                }
                _ => self.skip_value()?,
            }
        }
    }
}

/// Resolves one path step: returns the byte offset of the selected child's
/// token. Pointers at the container position are chased first.
fn step_into(buf: &[u8], pos: usize, key: &Key, step: usize) -> Result<usize> {
    let mut cur = Cursor { buf, pos };
    let token_start = cur.pos;
    let (dstart, dend) = cur.read_digit_run();
    let Some(tag) = cur.peek() else {
        return Err(DecodeError::TruncatedBuffer { offset: cur.pos });
    };
    cur.pos += 1;
    match tag {
        b'^' => {
            let target = cur.resolve_pointer(dstart, dend, token_start)?;
            let mut probe = Cursor { buf, pos: target };
            probe.read_digit_run();
            if probe.peek() == Some(b'^') {
                return Err(DecodeError::PointerChain { offset: target });
            }
            step_into(buf, target, key, step)
        }
        b'[' => step_seq(cur, b']', key, step, token_start),
        b'(' => step_seq(cur, b')', key, step, token_start),
        b'{' => match key {
            Key::Name(name) => {
                let mut found = 0;
                loop {
                    match cur.peek() {
                        None => {
                            return Err(DecodeError::UnterminatedContainer { offset: token_start })
                        }
                        Some(b'}') => return Err(DecodeError::KeyNotFound { step }),
                        _ => {}
                    }
                    let candidate = cur.read_value(true)?;
                    if matches!(cur.peek(), None | Some(b'}')) {
                        return Err(DecodeError::ArityMismatch {
                            offset: token_start,
                            expected: "key/value pairs",
                            found: found + 1,
                        });
                    }
                    if matches!(&candidate, Value::BareString(s) if s == name) {
                        return Ok(cur.pos);
                    }
                    cur.skip_value()?;
                    found += 2;
                }
            }
            Key::Index(_) => Err(DecodeError::KeyNotFound { step }),
        },
        b'#' => step_indexed(cur, key, step, token_start),
        _ => Err(DecodeError::KeyNotFound { step }),
    }
}

fn step_seq(mut cur: Cursor<'_>, closer: u8, key: &Key, step: usize, token_start: usize) -> Result<usize> {
    let Key::Index(want) = key else {
        return Err(DecodeError::KeyNotFound { step });
    };
    for _ in 0..*want {
        match cur.peek() {
            None => return Err(DecodeError::UnterminatedContainer { offset: token_start }),
            Some(c) if c == closer => return Err(DecodeError::KeyNotFound { step }),
            _ => cur.skip_value()?,
        }
    }
    match cur.peek() {
        None => Err(DecodeError::UnterminatedContainer { offset: token_start }),
        Some(c) if c == closer => Err(DecodeError::KeyNotFound { step }),
        _ => Ok(cur.pos),
    }
}

fn step_indexed(mut cur: Cursor<'_>, key: &Key, step: usize, token_start: usize) -> Result<usize> {
    let (cstart, cend) = cur.read_digit_run();
    let count = cur.run_value(cstart, cend)? as usize;
    let opener = cur
        .peek()
        .ok_or(DecodeError::TruncatedBuffer { offset: cur.pos })?;
    cur.pos += 1;
    let width = match cur.peek().and_then(digit_value) {
        Some(w @ 0..=2) => w as usize + 1,
        Some(_) => return Err(DecodeError::InvalidDigit { offset: cur.pos }),
        None => return Err(DecodeError::TruncatedBuffer { offset: cur.pos }),
    };
    cur.pos += 1;
    let entries = cur.pos;
    let elements = count
        .checked_mul(width)
        .and_then(|len| entries.checked_add(len))
        .filter(|&e| e <= cur.buf.len())
        .ok_or(DecodeError::TruncatedBuffer { offset: token_start })?;

    let entry = |i: usize| -> Result<usize> {
        let mut value = 0usize;
        for &byte in &cur.buf[entries + i * width..entries + (i + 1) * width] {
            let digit = digit_value(byte)
                .ok_or(DecodeError::InvalidDigit { offset: entries + i * width })?;
            value = value * 64 + digit as usize;
        }
        Ok(value)
    };

    match (opener, key) {
        (b'[', Key::Index(i)) => {
            if *i >= count {
                return Err(DecodeError::KeyNotFound { step });
            }
            let target = elements + entry(*i)?;
            if target >= cur.buf.len() {
                return Err(DecodeError::TruncatedBuffer { offset: token_start });
            }
            Ok(target)
        }
        (b'{', Key::Name(name)) => {
            // Entries sort by decoded key content, so the search compares
            // the queried name against each candidate's content. Keys of
            // other kinds can tie with a bare string on content; the run
            // scan below picks out the bare form.
            let needle = name.as_bytes();

            let key_span = |i: usize| -> Result<(usize, usize)> {
                let start = elements + entry(i)?;
                Ok((start, token_end(cur.buf, start)?))
            };

            let (mut lo, mut hi) = (0, count);
            while lo < hi {
                let mid = (lo + hi) / 2;
                let (start, end) = key_span(mid)?;
                match needle.cmp(token_content(cur.buf, start, end)) {
                    std::cmp::Ordering::Less => hi = mid,
                    std::cmp::Ordering::Greater => lo = mid + 1,
                    std::cmp::Ordering::Equal => {
                        let mut first = mid;
                        while first > 0 {
                            let (s, e) = key_span(first - 1)?;
                            if token_content(cur.buf, s, e) != needle {
                                break;
                            }
                            first -= 1;
                        }
                        let mut found = None;
                        let mut tokens: Vec<&[u8]> = Vec::new();
                        for i in first..count {
                            let (s, e) = key_span(i)?;
                            if token_content(cur.buf, s, e) != needle {
                                break;
                            }
                            let token = &cur.buf[s..e];
                            if tokens.contains(&token) {
                                return Err(DecodeError::DuplicateIndexKey { offset: token_start });
                            }
                            tokens.push(token);
                            // the bare form of the queried name
                            if e - s == needle.len() + 1 && cur.buf[e - 1] == b':' {
                                found = Some(e);
                            }
                        }
                        return found.ok_or(DecodeError::KeyNotFound { step });
                    }
                }
            }
            Err(DecodeError::KeyNotFound { step })
        }
        _ => Err(DecodeError::KeyNotFound { step }),
    }
}

fn token_end(buf: &[u8], start: usize) -> Result<usize> {
    let mut probe = Cursor { buf, pos: start };
    probe.skip_value()?;
    Ok(probe.pos)
}

/// The byte content an object index sorts by: a bare string's name, a raw
/// string's text, and the whole token for keys of any other kind.
fn token_content(buf: &[u8], start: usize, end: usize) -> &[u8] {
    let mut d = start;
    while d < end && is_digit(buf[d]) {
        d += 1;
    }
    if d >= end {
        return &buf[start..end];
    }
    match buf[d] {
        b':' => &buf[start..d],
        b',' => &buf[d + 1..end],
        _ => &buf[start..end],
    }
}
