//! The in-memory value tree. A [`Value`] is built once by a producer (the
//! bytecode compiler, a reader, a decoder) and is immutable input to the
//! encoder; the decoder yields the same shape back. Pointers are an
//! encoding-only artifact and never appear here.

use std::fmt::Display;

/// One node of a bytecode tree. Exactly one variant is active; containers
/// own their children, so a tree is always finite and acyclic.
///
/// `Object` preserves insertion order and does not require unique keys at
/// the model level.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Value {
    /// A signed integer, zigzag-coded on the wire.
    Integer(i64),
    /// An exact decimal: `significand * 10^power`. No floating point at any
    /// layer.
    Decimal { power: i32, significand: i64 },
    /// An identifier; restricted to the digit alphabet.
    BareString(String),
    /// Arbitrary UTF-8 text, length-prefixed on the wire.
    RawString(String),
    /// An operation identifier.
    Opcode(u32),
    /// A pre-assigned or domain constant identifier.
    Reference(u32),
    /// A local binding name; restricted to the digit alphabet.
    Variable(String),

    Array(Vec<Value>),
    Object(Vec<(Value, Value)>),
    /// The first element determines interpretation: an opcode names an
    /// operation, a variable or reference roots a navigable place read.
    Call(Vec<Value>),

    /// Write `value` into `place`.
    Set { place: Box<Value>, value: Box<Value> },
    /// Remove `place`.
    Delete { place: Box<Value> },
    /// Evaluate `then` when `cond` holds, `otherwise` (if present) when not.
    When {
        cond: Box<Value>,
        then: Box<Value>,
        otherwise: Option<Box<Value>>,
    },
    /// [`Value::When`] with the condition inverted.
    Unless {
        cond: Box<Value>,
        then: Box<Value>,
        otherwise: Option<Box<Value>>,
    },
    /// First successful expression wins; at least one required.
    Alt(Vec<Value>),
    /// Every expression must succeed; at least one required.
    All(Vec<Value>),
}

impl Value {
    /// True for the variants that are not self-delimiting on the wire and
    /// therefore take a length prefix at skip positions. Scalars and raw
    /// strings are always self-delimiting.
    pub fn is_container(&self) -> bool {
        matches!(
            self,
            Value::Array(_)
                | Value::Object(_)
                | Value::Call(_)
                | Value::Set { .. }
                | Value::Delete { .. }
                | Value::When { .. }
                | Value::Unless { .. }
                | Value::Alt(_)
                | Value::All(_)
        )
    }
}

fn write_seq(f: &mut std::fmt::Formatter<'_>, values: &[Value]) -> std::fmt::Result {
    for (i, value) in values.iter().enumerate() {
        if i != 0 {
            write!(f, " ")?;
        }
        write!(f, "{}", value)?;
    }
    Ok(())
}

fn write_decimal(f: &mut std::fmt::Formatter<'_>, power: i32, significand: i64) -> std::fmt::Result {
    if power >= 0 {
        return write!(f, "{}e{}", significand, power);
    }
    if significand < 0 {
        write!(f, "-")?;
    }
    let mut body = significand.unsigned_abs().to_string();
    let frac = power.unsigned_abs() as usize;
    while body.len() <= frac {
        body.insert(0, '0');
    }
    body.insert(body.len() - frac, '.');
    write!(f, "{}", body)
}

impl Display for Value {
    /// Renders the debug literal notation that the `rexc` reader accepts
    /// back.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Integer(n) => write!(f, "{}", n),
            Value::Decimal { power, significand } => write_decimal(f, *power, *significand),
            Value::BareString(s) => write!(f, "'{}", s),
            Value::RawString(s) => {
                write!(f, "\"")?;
                for c in s.chars() {
                    match c {
                        '"' => write!(f, "\\\"")?,
                        '\\' => write!(f, "\\\\")?,
                        '\n' => write!(f, "\\n")?,
                        '\t' => write!(f, "\\t")?,
                        '\r' => write!(f, "\\r")?,
                        c => write!(f, "{}", c)?,
                    }
                }
                write!(f, "\"")
            }
            Value::Opcode(id) => write!(f, "%{}", id),
            Value::Reference(id) => write!(f, "@{}", id),
            Value::Variable(name) => write!(f, "${}", name),
            Value::Array(values) => {
                write!(f, "[")?;
                write_seq(f, values)?;
                write!(f, "]")
            }
            Value::Object(pairs) => {
                write!(f, "{{")?;
                for (i, (key, value)) in pairs.iter().enumerate() {
                    if i != 0 {
                        write!(f, " ")?;
                    }
                    write!(f, "{} {}", key, value)?;
                }
                write!(f, "}}")
            }
            Value::Call(values) => {
                write!(f, "(")?;
                write_seq(f, values)?;
                write!(f, ")")
            }
            Value::Set { place, value } => write!(f, "(set! {} {})", place, value),
            Value::Delete { place } => write!(f, "(del! {})", place),
            Value::When { cond, then, otherwise } => match otherwise {
                Some(otherwise) => write!(f, "(when {} {} {})", cond, then, otherwise),
                None => write!(f, "(when {} {})", cond, then),
            },
            Value::Unless { cond, then, otherwise } => match otherwise {
                Some(otherwise) => write!(f, "(unless {} {} {})", cond, then, otherwise),
                None => write!(f, "(unless {} {})", cond, then),
            },
            Value::Alt(values) => {
                write!(f, "(alt ")?;
                write_seq(f, values)?;
                write!(f, ")")
            }
            Value::All(values) => {
                write!(f, "(all ")?;
                write_seq(f, values)?;
                write!(f, ")")
            }
        }
    }
}
