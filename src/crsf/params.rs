//! # Parameter Catalogue Protocol
//!
//! Devices expose their configuration as an indexed parameter catalogue,
//! delivered through 0x2B frames one chunk at a time. Chunks are labelled
//! with a descending "chunks remaining" counter rather than an ascending
//! index; the reassembled buffer carries a common header (parent folder,
//! type tag, name) followed by a type-specific body.
//!
//! [`ParameterAssembler`] owns the per-index chunk buffers and the
//! retry-missing-chunk decision; value decoding lives in
//! [`parse_parameter`].

use std::collections::HashMap;

use tracing::{debug, warn};

use crate::error::ParameterError;

/// Deprecated integer types: 0/1 u8/i8, 2/3 u16/i16, 4/5 u32/i32
pub const PARAM_TYPE_NUMERIC_MAX: u8 = 5;

/// Fixed-point float parameter
pub const PARAM_TYPE_FLOAT: u8 = 8;

/// Option-list selection parameter
pub const PARAM_TYPE_TEXT_SELECTION: u8 = 9;

/// Free-form string parameter
pub const PARAM_TYPE_STRING: u8 = 10;

/// Folder grouping node
pub const PARAM_TYPE_FOLDER: u8 = 11;

/// Read-only info line
pub const PARAM_TYPE_INFO: u8 = 12;

/// Executable command entry
pub const PARAM_TYPE_COMMAND: u8 = 13;

/// Sentinel: no parameter exists at the requested index
pub const PARAM_TYPE_OUT_OF_RANGE: u8 = 127;

/// Decoded parameter value, one variant per wire type tag.
#[derive(Debug, Clone, PartialEq)]
pub enum ParameterValue {
    /// Deprecated integer types (tags 0-5)
    Numeric {
        value: i64,
        min: i64,
        max: i64,
        unit: String,
    },

    /// Fixed-point float (tag 8); fields are pre-scaled by
    /// 10^decimals
    Float {
        value: f64,
        min: f64,
        max: f64,
        default: f64,
        step: f64,
        decimals: u8,
        unit: String,
    },

    /// Option-list selection (tag 9); value/min/max/default index into
    /// `options`
    TextSelection {
        options: Vec<String>,
        value: u8,
        min: u8,
        max: u8,
        default: u8,
        unit: String,
    },

    /// Free-form string (tag 10)
    Text { value: String, max_length: u8 },

    /// Folder node (tag 11)
    Folder { children: Vec<String> },

    /// Read-only info line (tag 12)
    Info { value: String },

    /// Command entry (tag 13)
    Command { status: u8, info: String },

    /// Sentinel for a request past the end of the catalogue (tag 127)
    OutOfRange,

    /// Fallback: reassembled bytes that failed typed decoding
    Raw(Vec<u8>),
}

/// A published catalogue entry. Persists in the parameter table until a
/// fresh request cycle supersedes it.
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterRecord {
    /// Catalogue index this record was requested under
    pub index: u8,

    /// Index of the folder containing this parameter (0 = root)
    pub parent_folder: u8,

    /// Wire type tag (low 7 bits of the type byte)
    pub type_tag: u8,

    /// High bit of the type byte
    pub hidden: bool,

    /// Parameter display name
    pub name: String,

    /// Decoded value
    pub value: ParameterValue,
}

/// Byte cursor over a reassembled parameter buffer.
struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    fn u8(&mut self) -> Result<u8, String> {
        let b = *self
            .data
            .get(self.pos)
            .ok_or_else(|| format!("unexpected end of buffer at {}", self.pos))?;
        self.pos += 1;
        Ok(b)
    }

    fn peek(&self) -> Option<u8> {
        self.data.get(self.pos).copied()
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], String> {
        if self.remaining() < n {
            return Err(format!(
                "need {} bytes at {}, have {}",
                n,
                self.pos,
                self.remaining()
            ));
        }
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    /// Read a null-terminated string, consuming the terminator.
    fn cstr(&mut self) -> Result<String, String> {
        let rest = &self.data[self.pos..];
        let nul = rest
            .iter()
            .position(|&b| b == 0)
            .ok_or_else(|| format!("missing string terminator at {}", self.pos))?;
        let s = String::from_utf8_lossy(&rest[..nul]).into_owned();
        self.pos += nul + 1;
        Ok(s)
    }

    /// Read a string up to a null terminator or the end of the buffer.
    /// Some firmware omits the final terminator.
    fn cstr_or_rest(&mut self) -> String {
        let rest = &self.data[self.pos..];
        if rest.is_empty() {
            return String::new();
        }
        let end = rest.iter().position(|&b| b == 0).unwrap_or(rest.len());
        let s = String::from_utf8_lossy(&rest[..end]).into_owned();
        self.pos = (self.pos + end + 1).min(self.data.len());
        s
    }
}

fn read_le_i32(cur: &mut Cursor<'_>) -> Result<i32, String> {
    let b = cur.take(4)?;
    Ok(i32::from_le_bytes([b[0], b[1], b[2], b[3]]))
}

/// Read a big-endian integer of 1, 2 or 4 bytes, sign-extending when
/// `signed`.
fn read_be_int(bytes: &[u8], signed: bool) -> i64 {
    let mut value: u64 = 0;
    for &b in bytes {
        value = (value << 8) | b as u64;
    }

    if signed {
        let bits = bytes.len() * 8;
        let sign_bit = 1u64 << (bits - 1);
        if value & sign_bit != 0 {
            return (value as i64) - ((sign_bit as i64) << 1);
        }
    }
    value as i64
}

/// Parse a fully reassembled parameter buffer into a typed record.
///
/// Buffer layout: `[parent_folder][type|hidden][name\0][type-specific
/// body]`. A stray tab byte in the parent field is a known device quirk
/// and reads as the root folder.
pub fn parse_parameter(index: u8, data: &[u8]) -> Result<ParameterRecord, ParameterError> {
    parse_parameter_inner(index, data).map_err(|reason| ParameterError::DecodeFailure {
        index,
        reason,
    })
}

fn parse_parameter_inner(index: u8, data: &[u8]) -> Result<ParameterRecord, String> {
    let mut cur = Cursor::new(data);

    let mut parent_folder = cur.u8()?;
    if parent_folder == b'\t' {
        // Some modules emit a tab here for root-level entries
        parent_folder = 0;
    }

    let type_byte = cur.u8()?;
    let type_tag = type_byte & 0x7F;
    let hidden = type_byte & 0x80 != 0;

    if type_tag == PARAM_TYPE_OUT_OF_RANGE {
        return Ok(ParameterRecord {
            index,
            parent_folder,
            type_tag,
            hidden,
            name: String::new(),
            value: ParameterValue::OutOfRange,
        });
    }

    let name = cur.cstr()?;

    let value = match type_tag {
        0..=PARAM_TYPE_NUMERIC_MAX => decode_numeric(&mut cur, type_tag)?,
        PARAM_TYPE_FLOAT => decode_float(&mut cur)?,
        PARAM_TYPE_TEXT_SELECTION => decode_text_selection(&mut cur)?,
        PARAM_TYPE_STRING => {
            let value = cur.cstr()?;
            let max_length = cur.u8().unwrap_or(0);
            ParameterValue::Text { value, max_length }
        }
        PARAM_TYPE_FOLDER => decode_folder(&mut cur),
        PARAM_TYPE_INFO => ParameterValue::Info {
            value: cur.cstr_or_rest(),
        },
        PARAM_TYPE_COMMAND => {
            let status = cur.u8().unwrap_or(0);
            ParameterValue::Command {
                status,
                info: cur.cstr_or_rest(),
            }
        }
        other => return Err(format!("unknown parameter type tag {}", other)),
    };

    Ok(ParameterRecord {
        index,
        parent_folder,
        type_tag,
        hidden,
        name,
        value,
    })
}

/// Deprecated numeric body: `current`, `min`, `max` as big-endian
/// integers (width by type, signed for odd tags), then a unit string.
fn decode_numeric(cur: &mut Cursor, type_tag: u8) -> Result<ParameterValue, String> {
    let width = match type_tag {
        0 | 1 => 1,
        2 | 3 => 2,
        4 | 5 => 4,
        _ => unreachable!("caller dispatches 0..=5"),
    };
    let signed = type_tag % 2 == 1;

    let value = read_be_int(cur.take(width)?, signed);
    let min = read_be_int(cur.take(width)?, signed);
    let max = read_be_int(cur.take(width)?, signed);
    let unit = cur.cstr_or_rest();

    Ok(ParameterValue::Numeric {
        value,
        min,
        max,
        unit,
    })
}

/// Float body: `value`, `min`, `max`, `default` as little-endian i32,
/// then one `decimal_point` byte, then `step` (i32), then a unit string.
/// The decimal point scales every numeric field.
fn decode_float(cur: &mut Cursor) -> Result<ParameterValue, String> {
    let value = read_le_i32(cur)?;
    let min = read_le_i32(cur)?;
    let max = read_le_i32(cur)?;
    let default = read_le_i32(cur)?;
    let decimals = cur.u8()?;
    let step = read_le_i32(cur)?;
    let unit = cur.cstr_or_rest();

    let scale = 10f64.powi(decimals as i32);
    Ok(ParameterValue::Float {
        value: value as f64 / scale,
        min: min as f64 / scale,
        max: max as f64 / scale,
        default: default as f64 / scale,
        step: step as f64 / scale,
        decimals,
        unit,
    })
}

/// Text-selection body: `;`-delimited options string, then `value`,
/// `min`, `max`, `default` index bytes, then the remainder is the unit.
/// A leading zero byte means the device sent no options at all.
fn decode_text_selection(cur: &mut Cursor) -> Result<ParameterValue, String> {
    if cur.peek() == Some(0) {
        return Ok(ParameterValue::TextSelection {
            options: Vec::new(),
            value: 0,
            min: 0,
            max: 0,
            default: 0,
            unit: String::new(),
        });
    }

    let options: Vec<String> = cur.cstr()?.split(';').map(str::to_owned).collect();
    let value = cur.u8()?;
    let min = cur.u8()?;
    let max = cur.u8()?;
    let default = cur.u8()?;
    let unit = if cur.remaining() > 0 {
        cur.cstr_or_rest()
    } else {
        String::new()
    };

    Ok(ParameterValue::TextSelection {
        options,
        value,
        min,
        max,
        default,
        unit,
    })
}

/// Folder body: `;`-delimited child list. Some folders omit the list
/// entirely and arrive with fewer than two bytes remaining.
fn decode_folder(cur: &mut Cursor) -> ParameterValue {
    if cur.remaining() < 2 {
        return ParameterValue::Folder {
            children: Vec::new(),
        };
    }

    let list = cur.cstr_or_rest();
    let children = list
        .split(';')
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
        .collect();

    ParameterValue::Folder { children }
}

/// Reassembly buffer for one parameter index.
///
/// Slot `i` holds the payload received when the device reported
/// `chunks_remaining == i`; the final buffer is the concatenation of
/// slots in descending index order.
#[derive(Debug)]
struct ChunkBuffer {
    slots: Vec<Option<Vec<u8>>>,
}

impl ChunkBuffer {
    fn new(total_chunks: usize) -> Self {
        Self {
            slots: vec![None; total_chunks],
        }
    }

    /// Position (counting from the highest slot down) of the first empty
    /// slot; this is the chunk index to re-request. `None` when the
    /// buffer is complete.
    fn first_missing(&self) -> Option<u8> {
        self.slots
            .iter()
            .rev()
            .position(Option::is_none)
            .map(|i| i as u8)
    }

    fn assemble(self) -> Vec<u8> {
        let mut combined = Vec::new();
        for slot in self.slots.into_iter().rev() {
            combined.extend_from_slice(&slot.unwrap_or_default());
        }
        combined
    }
}

/// Result of feeding one 0x2B chunk into the assembler.
#[derive(Debug, Clone, PartialEq)]
pub enum ChunkOutcome {
    /// Every slot is filled; the record is ready to publish. Decode
    /// failures degrade to a [`ParameterValue::Raw`] record rather than
    /// losing the slot.
    Complete(ParameterRecord),

    /// Chunks are still missing; exactly one re-request should go out.
    NeedChunk { index: u8, chunk: u8 },
}

/// Per-session chunk reassembly state, keyed by parameter index.
#[derive(Debug, Default)]
pub struct ParameterAssembler {
    buffers: HashMap<u8, ChunkBuffer>,
}

impl ParameterAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop all in-flight chunk buffers (fresh request cycle).
    pub fn clear(&mut self) {
        self.buffers.clear();
    }

    /// Feed the body of a 0x2B frame (after the extended addresses):
    /// `[param_idx][chunks_remaining][chunk payload...]`.
    ///
    /// # Errors
    ///
    /// * [`ParameterError::IndexOutOfRange`] - chunk counter does not fit
    ///   the buffer allocated at first chunk
    /// * [`ParameterError::DuplicateChunk`] - slot already filled; the
    ///   duplicate is ignored
    pub fn ingest(&mut self, body: &[u8]) -> Result<ChunkOutcome, ParameterError> {
        if body.len() < 2 {
            return Err(ParameterError::DecodeFailure {
                index: body.first().copied().unwrap_or(0),
                reason: format!("chunk body too short: {} bytes", body.len()),
            });
        }

        let index = body[0];
        let chunks_remaining = body[1];
        let payload = &body[2..];

        let buffer = self
            .buffers
            .entry(index)
            .or_insert_with(|| ChunkBuffer::new(chunks_remaining as usize + 1));

        let slot_count = buffer.slots.len();
        if chunks_remaining as usize >= slot_count {
            return Err(ParameterError::IndexOutOfRange {
                index,
                chunk: chunks_remaining,
                total: slot_count as u8,
            });
        }

        let slot = &mut buffer.slots[chunks_remaining as usize];
        if slot.is_some() {
            return Err(ParameterError::DuplicateChunk {
                index,
                chunk: chunks_remaining,
            });
        }
        *slot = Some(payload.to_vec());

        if let Some(chunk) = buffer.first_missing() {
            debug!(index, chunk, "parameter chunk missing, re-requesting");
            return Ok(ChunkOutcome::NeedChunk { index, chunk });
        }

        let combined = self
            .buffers
            .remove(&index)
            .map(ChunkBuffer::assemble)
            .unwrap_or_default();

        let record = match parse_parameter(index, &combined) {
            Ok(record) => record,
            Err(err) => {
                // Keep the bytes rather than losing the slot
                warn!(index, %err, "parameter decode failed, publishing raw bytes");
                ParameterRecord {
                    index,
                    parent_folder: 0,
                    type_tag: 0,
                    hidden: false,
                    name: String::new(),
                    value: ParameterValue::Raw(combined),
                }
            }
        };

        Ok(ChunkOutcome::Complete(record))
    }
}
