//! The reader is responsible for parsing the debug literal notation into a
//! value. The main function is [read].
//!
//! The notation is a small s-expression flavour: `42`, `2.5`, `'name`,
//! `"text"`, `$x`, `%3`, `@7`, `[1 2 3]`, `{'key 42}`, `(%1 $x)`, and the
//! keyword forms `(set! p v)`, `(del! p)`, `(when c t e?)`,
//! `(unless c t e?)`, `(alt ...)`, `(all ...)`. It exists for the CLI and
//! the tests; it is not a source language.

use std::{iter::Peekable, str::Chars};

use rex_codec::Value;
use thiserror::Error;

pub type Result<T, E = ReadError> = std::result::Result<T, E>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReadError {
    #[error("unterminated string")]
    UnterminatedString,

    #[error("invalid escape \\{0}")]
    InvalidEscape(char),

    #[error("unclosed delimiter, expected {0:?}")]
    Unclosed(char),

    #[error("unexpected closer {0:?}")]
    UnexpectedCloser(char),

    #[error("closer {0:?} does not match the open delimiter")]
    MismatchedCloser(char),

    #[error("unknown word {0:?}")]
    UnknownWord(String),

    #[error("{form} takes {expected} arguments, found {found}")]
    BadArity {
        form: &'static str,
        expected: &'static str,
        found: usize,
    },

    #[error("object literal needs an even number of forms")]
    OddObjectLiteral,

    #[error("invalid number {0:?}")]
    InvalidNumber(String),

    #[error("empty input")]
    EmptyInput,

    #[error("more than one top-level form")]
    ExtraForms,
}

/// A stack slot: either a finished value or a word waiting to be resolved
/// as a keyword head when its parenthesis closes.
enum Item {
    Value(Value),
    Word(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Delim {
    Paren,
    Bracket,
    Brace,
}

impl Delim {
    fn closer(self) -> char {
        match self {
            Delim::Paren => ')',
            Delim::Bracket => ']',
            Delim::Brace => '}',
        }
    }
}

/// A state is a mutable object that is used to keep track of the current
/// state of the reader.
pub struct State<'a> {
    peekable: Peekable<Chars<'a>>,
    stack: Vec<Item>,
    indices: Vec<(Delim, usize)>,
}

impl<'a> State<'a> {
    fn new(input: &'a str) -> Self {
        Self {
            peekable: input.chars().peekable(),
            stack: Vec::new(),
            indices: Vec::new(),
        }
    }

    fn advance(&mut self) -> Option<char> {
        self.peekable.next()
    }

    fn push(&mut self, value: Value) {
        self.stack.push(Item::Value(value));
    }

    fn open(&mut self, delim: Delim) {
        self.indices.push((delim, self.stack.len()));
    }

    fn close(&mut self, closer: char) -> Result<()> {
        let Some((delim, index)) = self.indices.pop() else {
            return Err(ReadError::UnexpectedCloser(closer));
        };
        if delim.closer() != closer {
            return Err(ReadError::MismatchedCloser(closer));
        }
        let items = self.stack.split_off(index);
        let value = match delim {
            Delim::Bracket => Value::Array(values(items)?),
            Delim::Brace => {
                let forms = values(items)?;
                if forms.len() % 2 != 0 {
                    return Err(ReadError::OddObjectLiteral);
                }
                let mut pairs = Vec::with_capacity(forms.len() / 2);
                let mut forms = forms.into_iter();
                while let (Some(key), Some(value)) = (forms.next(), forms.next()) {
                    pairs.push((key, value));
                }
                Value::Object(pairs)
            }
            Delim::Paren => close_paren(items)?,
        };
        self.push(value);
        Ok(())
    }

    fn accumulate_word(&mut self, mut word: String) -> String {
        while let Some(&c) = self.peekable.peek() {
            if c.is_whitespace() || matches!(c, '(' | ')' | '[' | ']' | '{' | '}' | '"' | ';') {
                break;
            }
            word.push(c);
            self.advance();
        }
        word
    }

    fn read(&mut self) -> Result<Vec<Value>> {
        while let Some(chr) = self.advance() {
            match chr {
                c if c.is_whitespace() => continue,
                ';' => self.skip_comment(),
                '(' => self.open(Delim::Paren),
                '[' => self.open(Delim::Bracket),
                '{' => self.open(Delim::Brace),
                ')' | ']' | '}' => self.close(chr)?,
                '"' => self.parse_string()?,
                '\'' => {
                    let name = self.accumulate_word(String::new());
                    self.push(Value::BareString(name));
                }
                '$' => {
                    let name = self.accumulate_word(String::new());
                    self.push(Value::Variable(name));
                }
                '%' => {
                    let id = self.parse_id()?;
                    self.push(Value::Opcode(id));
                }
                '@' => {
                    let id = self.parse_id()?;
                    self.push(Value::Reference(id));
                }
                _ => self.parse_atom(chr),
            }
        }

        if let Some(&(delim, _)) = self.indices.last() {
            return Err(ReadError::Unclosed(delim.closer()));
        }

        values(std::mem::take(&mut self.stack))
    }

    fn skip_comment(&mut self) {
        while let Some(c) = self.advance() {
            if c == '\n' {
                break;
            }
        }
    }

    fn parse_string(&mut self) -> Result<()> {
        let mut text = String::new();
        loop {
            match self.advance() {
                None => return Err(ReadError::UnterminatedString),
                Some('"') => break,
                Some('\\') => match self.advance() {
                    Some('n') => text.push('\n'),
                    Some('t') => text.push('\t'),
                    Some('r') => text.push('\r'),
                    Some('\\') => text.push('\\'),
                    Some('"') => text.push('"'),
                    Some(c) => return Err(ReadError::InvalidEscape(c)),
                    None => return Err(ReadError::UnterminatedString),
                },
                Some(c) => text.push(c),
            }
        }
        self.push(Value::RawString(text));
        Ok(())
    }

    fn parse_id(&mut self) -> Result<u32> {
        let word = self.accumulate_word(String::new());
        word.parse().map_err(|_| ReadError::InvalidNumber(word))
    }

    fn parse_atom(&mut self, chr: char) {
        let word = self.accumulate_word(chr.into());
        match parse_number(&word) {
            Some(value) => self.push(value),
            None => self.stack.push(Item::Word(word)),
        }
    }
}

/// Integers parse as integers; anything with a `.` or an exponent becomes
/// an exact decimal (`2.5` is significand 25, power -1).
fn parse_number(word: &str) -> Option<Value> {
    if let Ok(n) = word.parse::<i64>() {
        return Some(Value::Integer(n));
    }
    let (mantissa, exponent) = match word.split_once(['e', 'E']) {
        Some((mantissa, exponent)) => (mantissa, Some(exponent.parse::<i32>().ok()?)),
        None => (word, None),
    };
    let (int_part, frac_part) = match mantissa.split_once('.') {
        Some((int_part, frac_part)) => (int_part, frac_part),
        None => (mantissa, ""),
    };
    if frac_part.is_empty() && exponent.is_none() {
        return None;
    }
    let significand = format!("{int_part}{frac_part}").parse::<i64>().ok()?;
    let power = exponent
        .unwrap_or(0)
        .checked_sub(i32::try_from(frac_part.len()).ok()?)?;
    Some(Value::Decimal { power, significand })
}

fn values(items: Vec<Item>) -> Result<Vec<Value>> {
    items
        .into_iter()
        .map(|item| match item {
            Item::Value(value) => Ok(value),
            Item::Word(word) => Err(ReadError::UnknownWord(word)),
        })
        .collect()
}

fn close_paren(items: Vec<Item>) -> Result<Value> {
    let mut items = items.into_iter();
    let head = match items.next() {
        None => return Ok(Value::Call(vec![])),
        Some(Item::Value(head)) => {
            let mut call = vec![head];
            call.extend(values(items.collect())?);
            return Ok(Value::Call(call));
        }
        Some(Item::Word(word)) => word,
    };
    let mut args = values(items.collect())?;
    let found = args.len();
    match head.as_str() {
        "set!" => match <[Value; 2]>::try_from(args) {
            Ok([place, value]) => Ok(Value::Set {
                place: Box::new(place),
                value: Box::new(value),
            }),
            Err(_) => Err(ReadError::BadArity { form: "set!", expected: "2", found }),
        },
        "del!" => match <[Value; 1]>::try_from(args) {
            Ok([place]) => Ok(Value::Delete { place: Box::new(place) }),
            Err(_) => Err(ReadError::BadArity { form: "del!", expected: "1", found }),
        },
        "when" | "unless" => {
            let form = if head == "when" { "when" } else { "unless" };
            if !(2..=3).contains(&found) {
                return Err(ReadError::BadArity { form, expected: "2..3", found });
            }
            let otherwise = (found == 3).then(|| args.pop()).flatten().map(Box::new);
            let (Some(then), Some(cond)) = (args.pop(), args.pop()) else {
                return Err(ReadError::BadArity { form, expected: "2..3", found });
            };
            let (cond, then) = (Box::new(cond), Box::new(then));
            Ok(if form == "when" {
                Value::When { cond, then, otherwise }
            } else {
                Value::Unless { cond, then, otherwise }
            })
        }
        "alt" | "all" => {
            if args.is_empty() {
                let form = if head == "alt" { "alt" } else { "all" };
                return Err(ReadError::BadArity { form, expected: "1 or more", found });
            }
            Ok(if head == "alt" { Value::Alt(args) } else { Value::All(args) })
        }
        _ => Err(ReadError::UnknownWord(head)),
    }
}

/// Reads a string holding exactly one literal form.
pub fn read(input: &str) -> Result<Value> {
    let mut forms = State::new(input).read()?;
    match forms.len() {
        0 => Err(ReadError::EmptyInput),
        1 => forms.pop().ok_or(ReadError::EmptyInput),
        _ => Err(ReadError::ExtraForms),
    }
}
