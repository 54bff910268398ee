//! Control-region layout shared by the coordinator and the workers.
//!
//! The runtime's control buffer starts with the bump allocator's own
//! metadata, then the barrier cells and six dispatch cells:
//!
//! ```text
//! +-----------+-------+----------+-----------+------+-------+-----------+---------+
//! | barrier.. | (2)   | function | item_size | next | limit | arg_start | arg_end |
//! +-----------+-------+----------+-----------+------+-------+-----------+---------+
//! ```
//!
//! Everything after that is working memory, rewritten on every dispatch:
//! the marshalled arguments, the dispatch header and the work items.

use crate::error::{Error, Result};
use crate::memory::SharedBuffer;
use crate::sync::BARRIER_CELLS;
use std::fmt;
use std::sync::atomic::{AtomicI32, Ordering};

/// Number of dispatch metadata cells after the barrier.
pub const META_CELLS: usize = 6;

/// Total cells in the control block.
pub const CONTROL_CELLS: usize = BARRIER_CELLS + META_CELLS;

/// Cursor value written to make every worker leave its dispatch loop.
pub const EXIT_CURSOR: i32 = -1_000_000;

/// Word offsets of the control cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlLayout {
    /// First barrier cell.
    pub barrier: usize,
    /// Word index of the dispatch header, or -1 for the exit signal.
    pub function: usize,
    /// Words per work item.
    pub item_size: usize,
    /// Next unclaimed work item (word index).
    pub next: usize,
    /// One past the last work item (word index).
    pub limit: usize,
    /// First argument word.
    pub arg_start: usize,
    /// One past the last argument word.
    pub arg_end: usize,
}

impl ControlLayout {
    /// Layout of a control block starting at word `base`.
    pub fn at(base: usize) -> Self {
        let meta = base + BARRIER_CELLS;
        Self {
            barrier: base,
            function: meta,
            item_size: meta + 1,
            next: meta + 2,
            limit: meta + 3,
            arg_start: meta + 4,
            arg_end: meta + 5,
        }
    }

    /// Write the signal that makes workers return to their inbox.
    pub fn write_exit_signal(&self, words: &[AtomicI32]) {
        words[self.function].store(-1, Ordering::SeqCst);
        words[self.item_size].store(0, Ordering::SeqCst);
        words[self.next].store(EXIT_CURSOR, Ordering::SeqCst);
    }
}

/// What the workers do with a dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum DispatchMode {
    /// Call the function on every work item, with the output first.
    Build = 1,
    /// Call the function once per worker, no output, no bounds.
    Broadcast = 2,
    /// Hand source text to each worker's evaluator.
    Eval = 3,
}

impl DispatchMode {
    fn from_word(word: i32) -> Option<Self> {
        match word {
            1 => Some(DispatchMode::Build),
            2 => Some(DispatchMode::Broadcast),
            3 => Some(DispatchMode::Eval),
            _ => None,
        }
    }

    /// Lowercase name.
    pub fn name(self) -> &'static str {
        match self {
            DispatchMode::Build => "build",
            DispatchMode::Broadcast => "broadcast",
            DispatchMode::Eval => "eval",
        }
    }
}

impl fmt::Display for DispatchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// How a worker function is looked up.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FunctionId {
    /// By registered name.
    Named(String),
    /// By registered number.
    Numbered(u32),
}

impl FunctionId {
    /// Check that the id fits the dispatch header.
    pub fn validate(&self) -> Result<()> {
        match self {
            FunctionId::Named(name) if name.encode_utf16().count() > i32::MAX as usize => Err(
                Error::InvalidArgument {
                    index: 0,
                    reason: "function name too long".into(),
                },
            ),
            FunctionId::Numbered(n) if *n > i32::MAX as u32 => Err(Error::InvalidArgument {
                index: 0,
                reason: format!("function number {n} exceeds {}", i32::MAX),
            }),
            _ => Ok(()),
        }
    }
}

impl fmt::Display for FunctionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FunctionId::Named(name) => f.write_str(name),
            FunctionId::Numbered(n) => write!(f, "#{n}"),
        }
    }
}

impl From<&str> for FunctionId {
    fn from(name: &str) -> Self {
        FunctionId::Named(name.to_string())
    }
}

impl From<String> for FunctionId {
    fn from(name: String) -> Self {
        FunctionId::Named(name)
    }
}

impl From<u32> for FunctionId {
    fn from(n: u32) -> Self {
        FunctionId::Numbered(n)
    }
}

/// Encode `[mode, id_word, name words...]`.
///
/// `id_word >= 0` is the name length in UTF-16 units, packed two per word;
/// `id_word < 0` is a numbered id `-(id_word) - 1`. Eval carries no id.
pub fn encode_header(mode: DispatchMode, function: Option<&FunctionId>) -> Vec<i32> {
    let mut words = vec![mode as i32];
    match function {
        None => words.push(0),
        Some(FunctionId::Numbered(n)) => words.push(-(*n as i32) - 1),
        Some(FunctionId::Named(name)) => {
            let units: Vec<u16> = name.encode_utf16().collect();
            words.push(units.len() as i32);
            for pair in units.chunks(2) {
                let low = pair[0] as u32;
                let high = pair.get(1).copied().unwrap_or(0) as u32;
                words.push((low | (high << 16)) as i32);
            }
        }
    }
    words
}

/// Words [`encode_header`] produces.
pub fn header_len(function: Option<&FunctionId>) -> usize {
    match function {
        Some(FunctionId::Named(name)) => 2 + name.encode_utf16().count().div_ceil(2),
        _ => 2,
    }
}

/// Decode the header at word `at`.
pub fn decode_header(
    words: &[AtomicI32],
    at: usize,
) -> Result<(DispatchMode, Option<FunctionId>)> {
    let load = |i: usize| {
        words
            .get(i)
            .map(|w| w.load(Ordering::Relaxed))
            .ok_or_else(|| Error::Protocol(format!("dispatch header at {i} out of bounds")))
    };

    let mode_word = load(at)?;
    let mode = DispatchMode::from_word(mode_word)
        .ok_or_else(|| Error::Protocol(format!("bad dispatch mode {mode_word}")))?;
    let id_word = load(at + 1)?;

    if mode == DispatchMode::Eval {
        return Ok((mode, None));
    }
    if id_word < 0 {
        return Ok((mode, Some(FunctionId::Numbered((-(id_word as i64) - 1) as u32))));
    }

    let len = id_word as usize;
    let mut units = Vec::with_capacity(len);
    let mut i = at + 2;
    while units.len() < len {
        let w = load(i)? as u32;
        i += 1;
        units.push((w & 0xffff) as u16);
        if units.len() < len {
            units.push((w >> 16) as u16);
        }
    }
    let name = String::from_utf16(&units).map_err(|e| Error::Protocol(e.to_string()))?;
    Ok((mode, Some(FunctionId::Named(name))))
}

/// Read a control cell.
#[inline]
pub(crate) fn load(buffer: &SharedBuffer, cell: usize) -> i32 {
    buffer.word(cell).load(Ordering::SeqCst)
}
