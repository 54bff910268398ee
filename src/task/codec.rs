//! Argument marshalling between the coordinator and the workers.
//!
//! Values are written into the shared region as a sequence of 32-bit
//! words. The low byte of the first word is the tag; some tags carry a
//! small payload in the remaining bits.
//!
//! | tag      | tag word bits 8.. | payload words                         |
//! |----------|-------------------|---------------------------------------|
//! | `INT`    |                   | value                                 |
//! | `FLOAT`  |                   | pad to even index, low bits, high bits |
//! | `BUFFER` |                   | handle                                |
//! | `VIEW`   | element tag       | handle, byte offset, length           |
//! | `BOOL`   | 0 or 1            |                                       |
//! | `UNDEF`  |                   |                                       |
//! | `NULL`   |                   |                                       |
//! | `STRING` | length            | UTF-16 units, two per word, low first |
//!
//! Buffers travel as small integer handles. The coordinator's
//! [`BufferTable`] hands each buffer a handle the first time it is seen and
//! the worker's [`HandleTable`] maps it back once the buffer has been
//! transferred.

use crate::error::{Error, Result};
use crate::memory::{BufferId, ElementType, SharedBuffer, TypedView};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicI32, Ordering};

/// Wire tags.
pub mod tag {
    /// 32-bit integer.
    pub const INT: i32 = 1;
    /// 64-bit float.
    pub const FLOAT: i32 = 2;
    /// Whole shared buffer.
    pub const BUFFER: i32 = 3;
    /// Typed view.
    pub const VIEW: i32 = 4;
    /// Boolean.
    pub const BOOL: i32 = 5;
    /// Undefined.
    pub const UNDEF: i32 = 6;
    /// Null.
    pub const NULL: i32 = 7;
    /// UTF-16 string.
    pub const STRING: i32 = 8;
}

/// Longest string whose length fits in the tag word.
pub const MAX_STRING_UNITS: usize = (1 << 23) - 1;

/// An argument passed to a worker function.
#[derive(Clone)]
pub enum Value {
    /// No value.
    Undefined,
    /// Explicit null.
    Null,
    /// Boolean.
    Bool(bool),
    /// 32-bit integer.
    Int(i32),
    /// 64-bit float.
    Float(f64),
    /// String.
    Str(String),
    /// A whole shared buffer.
    Buffer(SharedBuffer),
    /// A typed window over a shared buffer.
    View(TypedView),
}

impl Value {
    /// Short name of the variant, for error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Undefined => "undefined",
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "string",
            Value::Buffer(_) => "buffer",
            Value::View(_) => "view",
        }
    }

    /// The integer, if this is an `Int`.
    pub fn as_int(&self) -> Option<i32> {
        match self {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// The number, if this is an `Int` or a `Float`.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(v) => Some(*v as f64),
            Value::Float(v) => Some(*v),
            _ => None,
        }
    }

    /// The boolean, if this is a `Bool`.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(v) => Some(*v),
            _ => None,
        }
    }

    /// The string, if this is a `Str`.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    /// The buffer, if this is a `Buffer`.
    pub fn as_buffer(&self) -> Option<&SharedBuffer> {
        match self {
            Value::Buffer(b) => Some(b),
            _ => None,
        }
    }

    /// The view, if this is a `View`.
    pub fn as_view(&self) -> Option<&TypedView> {
        match self {
            Value::View(v) => Some(v),
            _ => None,
        }
    }

    /// The buffer behind a `Buffer` or `View`.
    pub fn shared_buffer(&self) -> Option<&SharedBuffer> {
        match self {
            Value::Buffer(b) => Some(b),
            Value::View(v) => Some(v.buffer()),
            _ => None,
        }
    }
}

/// Floats compare by bit pattern and buffers by identity, so that
/// `decode(encode(v)) == v` is meaningful for every value.
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Undefined, Value::Undefined) | (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a.to_bits() == b.to_bits(),
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Buffer(a), Value::Buffer(b)) => a.same_buffer(b),
            (Value::View(a), Value::View(b)) => a.same_view(b),
            _ => false,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Undefined => f.write_str("Undefined"),
            Value::Null => f.write_str("Null"),
            Value::Bool(v) => write!(f, "Bool({v})"),
            Value::Int(v) => write!(f, "Int({v})"),
            Value::Float(v) => write!(f, "Float({v:?})"),
            Value::Str(s) => write!(f, "Str({s:?})"),
            Value::Buffer(b) => write!(f, "Buffer({})", b.id()),
            Value::View(v) => write!(f, "{v:?}"),
        }
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v)
    }
}

impl From<SharedBuffer> for Value {
    fn from(v: SharedBuffer) -> Self {
        Value::Buffer(v)
    }
}

impl From<TypedView> for Value {
    fn from(v: TypedView) -> Self {
        Value::View(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

/// Coordinator-side map from buffer identity to wire handle.
///
/// Handle 0 is always the runtime's control buffer.
pub struct BufferTable {
    known: Vec<SharedBuffer>,
    handles: HashMap<BufferId, u32>,
}

impl BufferTable {
    /// Create a table whose handle 0 is `control`.
    pub fn new(control: SharedBuffer) -> Self {
        let mut handles = HashMap::new();
        handles.insert(control.id(), 0);
        Self {
            known: vec![control],
            handles,
        }
    }

    /// Handle of an already registered buffer.
    pub fn handle(&self, buffer: &SharedBuffer) -> Option<u32> {
        self.handles.get(&buffer.id()).copied()
    }

    /// Number of registered buffers, including the control buffer.
    pub fn len(&self) -> usize {
        self.known.len()
    }

    /// Always false: the control buffer is registered at construction.
    pub fn is_empty(&self) -> bool {
        self.known.is_empty()
    }

    /// Register every buffer in `values` not seen before.
    ///
    /// Returns the new `(handle, buffer)` pairs, each buffer once, in
    /// first-seen order. These are what must be transferred to the workers.
    pub fn register_new(&mut self, values: &[Value]) -> Vec<(u32, SharedBuffer)> {
        let mut fresh = Vec::new();
        for buffer in values.iter().filter_map(Value::shared_buffer) {
            if self.handles.contains_key(&buffer.id()) {
                continue;
            }
            let handle = self.known.len() as u32;
            self.handles.insert(buffer.id(), handle);
            self.known.push(buffer.clone());
            fresh.push((handle, buffer.clone()));
        }
        fresh
    }

    /// Are there buffers in `values` the workers have not seen?
    pub fn has_new(&self, values: &[Value]) -> bool {
        values
            .iter()
            .filter_map(Value::shared_buffer)
            .any(|b| !self.handles.contains_key(&b.id()))
    }
}

/// Worker-side map from wire handle to buffer.
pub struct HandleTable {
    buffers: Vec<Option<SharedBuffer>>,
}

impl HandleTable {
    /// Create a table whose handle 0 is `control`.
    pub fn new(control: SharedBuffer) -> Self {
        Self {
            buffers: vec![Some(control)],
        }
    }

    /// Record a transferred buffer.
    pub fn insert(&mut self, handle: u32, buffer: SharedBuffer) {
        let index = handle as usize;
        if self.buffers.len() <= index {
            self.buffers.resize(index + 1, None);
        }
        self.buffers[index] = Some(buffer);
    }

    /// Look up a handle.
    pub fn get(&self, handle: u32) -> Result<&SharedBuffer> {
        self.buffers
            .get(handle as usize)
            .and_then(Option::as_ref)
            .ok_or(Error::UnknownBuffer(handle))
    }
}

fn string_words(units: usize) -> usize {
    units.div_ceil(2)
}

fn check_value(index: usize, value: &Value) -> Result<()> {
    let invalid = |reason: String| Error::InvalidArgument { index, reason };
    match value {
        Value::Str(s) => {
            let units = s.encode_utf16().count();
            if units > MAX_STRING_UNITS {
                return Err(invalid(format!(
                    "string of {units} UTF-16 units exceeds {MAX_STRING_UNITS}"
                )));
            }
        }
        Value::View(v) => {
            if v.byte_offset() > i32::MAX as usize || v.len() > i32::MAX as usize {
                return Err(invalid("view offset or length exceeds i32 range".into()));
            }
        }
        _ => {}
    }
    Ok(())
}

/// Number of words `values` encode to when written at word index `base`.
///
/// Validates every value the way [`encode`] does, without needing handles.
pub fn encoded_len(values: &[Value], base: usize) -> Result<usize> {
    let mut pos = base;
    for (index, value) in values.iter().enumerate() {
        check_value(index, value)?;
        pos += match value {
            Value::Undefined | Value::Null | Value::Bool(_) => 1,
            Value::Int(_) | Value::Buffer(_) => 2,
            Value::Float(_) => {
                // tag, optional pad, two payload words
                if (pos + 1) % 2 == 1 { 4 } else { 3 }
            }
            Value::View(_) => 4,
            Value::Str(s) => 1 + string_words(s.encode_utf16().count()),
        };
    }
    Ok(pos - base)
}

/// Encode `values` for writing at word index `base`.
///
/// Every buffer referenced must already be registered in `table`.
pub fn encode(values: &[Value], base: usize, table: &BufferTable) -> Result<Vec<i32>> {
    let mut words = Vec::new();
    let handle = |index: usize, buffer: &SharedBuffer| {
        table.handle(buffer).map(|h| h as i32).ok_or_else(|| {
            Error::Protocol(format!("argument #{index}: buffer {} not registered", buffer.id()))
        })
    };

    for (index, value) in values.iter().enumerate() {
        check_value(index, value)?;
        match value {
            Value::Int(v) => {
                words.push(tag::INT);
                words.push(*v);
            }
            Value::Float(v) => {
                words.push(tag::FLOAT);
                if (base + words.len()) % 2 == 1 {
                    words.push(0);
                }
                let bits = v.to_bits();
                words.push(bits as u32 as i32);
                words.push((bits >> 32) as u32 as i32);
            }
            Value::Buffer(b) => {
                words.push(tag::BUFFER);
                words.push(handle(index, b)?);
            }
            Value::View(v) => {
                words.push(tag::VIEW | (v.element_type().tag() << 8));
                words.push(handle(index, v.buffer())?);
                words.push(v.byte_offset() as i32);
                words.push(v.len() as i32);
            }
            Value::Bool(v) => words.push(tag::BOOL | ((*v as i32) << 8)),
            Value::Undefined => words.push(tag::UNDEF),
            Value::Null => words.push(tag::NULL),
            Value::Str(s) => {
                let units: Vec<u16> = s.encode_utf16().collect();
                words.push(tag::STRING | ((units.len() as i32) << 8));
                for pair in units.chunks(2) {
                    let low = pair[0] as u32;
                    let high = pair.get(1).copied().unwrap_or(0) as u32;
                    words.push((low | (high << 16)) as i32);
                }
            }
        }
    }
    Ok(words)
}

struct Reader<'a> {
    words: &'a [AtomicI32],
    pos: usize,
    end: usize,
}

impl Reader<'_> {
    fn next(&mut self) -> Result<i32> {
        if self.pos >= self.end {
            return Err(Error::Protocol("argument list truncated".into()));
        }
        let word = self.words[self.pos].load(Ordering::Relaxed);
        self.pos += 1;
        Ok(word)
    }

    fn skip_to_even(&mut self) -> Result<()> {
        if self.pos % 2 == 1 {
            self.next()?;
        }
        Ok(())
    }

    fn value(&mut self, table: &HandleTable) -> Result<Value> {
        let at = self.pos;
        let word = self.next()?;
        let value = match word & 0xff {
            tag::INT => Value::Int(self.next()?),
            tag::FLOAT => {
                self.skip_to_even()?;
                let low = self.next()? as u32 as u64;
                let high = self.next()? as u32 as u64;
                Value::Float(f64::from_bits(low | (high << 32)))
            }
            tag::BUFFER => Value::Buffer(table.get(self.next()? as u32)?.clone()),
            tag::VIEW => {
                let element_type = ElementType::from_tag(word >> 8).ok_or_else(|| {
                    Error::Protocol(format!("bad element tag {:#x} at word {at}", word >> 8))
                })?;
                let buffer = table.get(self.next()? as u32)?.clone();
                let byte_offset = self.next()? as usize;
                let len = self.next()? as usize;
                let view = TypedView::new(buffer, element_type, byte_offset, len)
                    .map_err(|e| Error::Protocol(e.to_string()))?;
                Value::View(view)
            }
            tag::BOOL => Value::Bool((word >> 8) != 0),
            tag::UNDEF => Value::Undefined,
            tag::NULL => Value::Null,
            tag::STRING => {
                let len = (word as u32 >> 8) as usize;
                let mut units = Vec::with_capacity(len);
                while units.len() < len {
                    let w = self.next()? as u32;
                    units.push((w & 0xffff) as u16);
                    if units.len() < len {
                        units.push((w >> 16) as u16);
                    }
                }
                Value::Str(String::from_utf16(&units).map_err(|e| Error::Protocol(e.to_string()))?)
            }
            other => {
                return Err(Error::Protocol(format!(
                    "unknown argument tag {other} at word {at}"
                )));
            }
        };
        Ok(value)
    }
}

/// Decode the values in words `start..end` of `words`.
pub fn decode(
    words: &[AtomicI32],
    start: usize,
    end: usize,
    table: &HandleTable,
) -> Result<Vec<Value>> {
    if start > end || end > words.len() {
        return Err(Error::Protocol(format!(
            "argument range {start}..{end} outside {} words",
            words.len()
        )));
    }

    let mut reader = Reader {
        words,
        pos: start,
        end,
    };
    let mut values = Vec::new();
    while reader.pos < reader.end {
        values.push(reader.value(table)?);
    }
    Ok(values)
}
