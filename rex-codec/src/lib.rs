//! Rex-C: a compact serialization of bytecode expression trees into the
//! restricted alphabet that survives inside JSON strings unescaped.
//!
//! The format trades generality for three properties: any value can be
//! skipped without decoding it, array elements and object fields of
//! indexed containers are reachable in O(1)/O(log n), and repeated
//! subtrees are stored once behind forward-only pointers.
//!
//! ```
//! use rex_codec::{decode, encode, get, Value};
//!
//! let value = Value::Array(vec![Value::Integer(1), Value::Integer(1)]);
//! let blob = encode(&value).unwrap();
//! assert_eq!(blob, "[^2+]");
//! assert_eq!(decode(&blob).unwrap(), value);
//! assert_eq!(get(&blob, &[0usize.into()]).unwrap(), Value::Integer(1));
//! ```

pub mod decode;
pub mod digits;
pub mod encode;
pub mod error;
pub mod value;

pub use decode::{decode, get, Key};
pub use encode::{encode, encode_with, EncodeOptions};
pub use error::{DecodeError, EncodeError, Result};
pub use value::Value;
