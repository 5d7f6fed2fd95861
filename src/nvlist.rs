//! Packed nvlist(9) attribute-list decoding
//!
//! The sndstat query interface hands userland a packed nvlist: a 19-byte
//! list header followed by a flat stream of name/value pairs. Nested lists
//! and arrays of lists are expressed in-stream with marker pairs
//! (`NVLIST_UP`, `NVLIST_ARRAY_NEXT`) rather than by recursive framing, so
//! the decoder walks the stream once with an explicit container stack.
//!
//! Format details:
//! - List header: magic byte 0x6c ('l'), version, flags, descriptor count,
//!   payload size (little-endian on all supported targets)
//! - Pair header: type byte, name size (u16), data size (u64), item count (u64)
//! - Names and string values are NUL-terminated
//!
//! Only the value types the sound subsystem emits are supported. A matching
//! encoder is included so the decode path can be exercised against
//! synthetic device blobs.

use std::mem;

use crate::{Result, XrunsError};

const NVLIST_HEADER_MAGIC: u8 = 0x6c;
const NVLIST_HEADER_VERSION: u8 = 0;
const NV_FLAG_BIG_ENDIAN: u8 = 0x80;

/// Packed size of a list header: magic + version + flags + descriptors + size
const NVLIST_HEADER_SIZE: usize = 19;
/// Packed size of a pair header: type + namesize + datasize + nitems
const NVPAIR_HEADER_SIZE: usize = 19;

const NV_TYPE_NULL: u8 = 1;
const NV_TYPE_BOOL: u8 = 2;
const NV_TYPE_NUMBER: u8 = 3;
const NV_TYPE_STRING: u8 = 4;
const NV_TYPE_NVLIST: u8 = 5;
const NV_TYPE_BINARY: u8 = 7;
const NV_TYPE_BOOL_ARRAY: u8 = 8;
const NV_TYPE_NUMBER_ARRAY: u8 = 9;
const NV_TYPE_STRING_ARRAY: u8 = 10;
const NV_TYPE_NVLIST_ARRAY: u8 = 11;
const NV_TYPE_NVLIST_ARRAY_NEXT: u8 = 254;
const NV_TYPE_NVLIST_UP: u8 = 255;

/// A single decoded attribute value.
#[derive(Debug, Clone, PartialEq)]
pub enum NvValue {
    /// Presence-only attribute with no payload
    Null,
    /// Boolean attribute
    Bool(bool),
    /// Unsigned 64-bit number attribute
    Number(u64),
    /// NUL-terminated string attribute
    String(String),
    /// Opaque binary attribute
    Binary(Vec<u8>),
    /// Array of booleans
    BoolArray(Vec<bool>),
    /// Array of unsigned 64-bit numbers
    NumberArray(Vec<u64>),
    /// Array of strings
    StringArray(Vec<String>),
    /// Nested attribute list
    Nvlist(Nvlist),
    /// Array of nested attribute lists
    NvlistArray(Vec<Nvlist>),
}

/// A decoded attribute list: an ordered sequence of name/value pairs.
///
/// Insertion order is preserved and duplicate names are representable; all
/// lookup accessors return the *first* pair with a matching name, mirroring
/// libnv lookup semantics.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Nvlist {
    pairs: Vec<(String, NvValue)>,
}

impl Nvlist {
    /// Create an empty attribute list.
    pub fn new() -> Self {
        Self::default()
    }

    /// True if the list holds no pairs.
    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// True if a pair with this name exists.
    pub fn exists(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Look up the first pair with this name.
    pub fn get(&self, name: &str) -> Option<&NvValue> {
        self.pairs.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    /// Look up a number attribute by name.
    pub fn number(&self, name: &str) -> Option<u64> {
        match self.get(name) {
            Some(NvValue::Number(n)) => Some(*n),
            _ => None,
        }
    }

    /// Look up a string attribute by name.
    pub fn string(&self, name: &str) -> Option<&str> {
        match self.get(name) {
            Some(NvValue::String(s)) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Look up a nested attribute list by name.
    pub fn nvlist(&self, name: &str) -> Option<&Nvlist> {
        match self.get(name) {
            Some(NvValue::Nvlist(l)) => Some(l),
            _ => None,
        }
    }

    /// Look up an array of nested attribute lists by name.
    pub fn nvlist_array(&self, name: &str) -> Option<&[Nvlist]> {
        match self.get(name) {
            Some(NvValue::NvlistArray(a)) => Some(a.as_slice()),
            _ => None,
        }
    }

    /// Append a pair. Duplicate names are kept as-is.
    pub fn insert(&mut self, name: impl Into<String>, value: NvValue) {
        self.pairs.push((name.into(), value));
    }

    /// Append a number pair.
    pub fn insert_number(&mut self, name: impl Into<String>, value: u64) {
        self.insert(name, NvValue::Number(value));
    }

    /// Append a string pair.
    pub fn insert_string(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.insert(name, NvValue::String(value.into()));
    }

    /// Append a nested-list pair.
    pub fn insert_nvlist(&mut self, name: impl Into<String>, value: Nvlist) {
        self.insert(name, NvValue::Nvlist(value));
    }

    /// Append an array-of-lists pair.
    pub fn insert_nvlist_array(&mut self, name: impl Into<String>, value: Vec<Nvlist>) {
        self.insert(name, NvValue::NvlistArray(value));
    }

    /// Decode a packed nvlist buffer.
    ///
    /// Fails with [`XrunsError::CorruptData`] on truncation, bad framing,
    /// unknown value types, or non-UTF-8 names/strings.
    pub fn unpack(buf: &[u8]) -> Result<Nvlist> {
        let mut r = Reader::new(buf);
        read_list_header(&mut r)?;

        let mut root = Nvlist::new();
        let mut stack: Vec<Frame> = Vec::new();

        while r.remaining() > 0 {
            let ty = r.u8()?;
            let namesize = r.u16_le()? as usize;
            let datasize = r.u64_le()? as usize;
            let nitems = r.u64_le()? as usize;
            let name = cstr_to_string(r.take(namesize)?)?;

            match ty {
                NV_TYPE_NULL => {
                    current(&mut root, &mut stack).insert(name, NvValue::Null);
                }
                NV_TYPE_BOOL => {
                    let data = r.take(datasize)?;
                    if data.len() != 1 {
                        return Err(corrupt(format!("bool pair with data size {datasize}")));
                    }
                    current(&mut root, &mut stack).insert(name, NvValue::Bool(data[0] != 0));
                }
                NV_TYPE_NUMBER => {
                    if datasize != 8 {
                        return Err(corrupt(format!("number pair with data size {datasize}")));
                    }
                    let value = r.u64_le()?;
                    current(&mut root, &mut stack).insert(name, NvValue::Number(value));
                }
                NV_TYPE_STRING => {
                    let value = cstr_to_string(r.take(datasize)?)?;
                    current(&mut root, &mut stack).insert(name, NvValue::String(value));
                }
                NV_TYPE_BINARY => {
                    let data = r.take(datasize)?.to_vec();
                    current(&mut root, &mut stack).insert(name, NvValue::Binary(data));
                }
                NV_TYPE_BOOL_ARRAY => {
                    if datasize != nitems {
                        return Err(corrupt("bool array size mismatch"));
                    }
                    let items = r.take(datasize)?.iter().map(|b| *b != 0).collect();
                    current(&mut root, &mut stack).insert(name, NvValue::BoolArray(items));
                }
                NV_TYPE_NUMBER_ARRAY => {
                    if nitems.checked_mul(8) != Some(datasize) {
                        return Err(corrupt("number array size mismatch"));
                    }
                    let mut items = Vec::with_capacity(nitems);
                    for _ in 0..nitems {
                        items.push(r.u64_le()?);
                    }
                    current(&mut root, &mut stack).insert(name, NvValue::NumberArray(items));
                }
                NV_TYPE_STRING_ARRAY => {
                    let block = r.take(datasize)?;
                    let items = split_cstrings(block, nitems)?;
                    current(&mut root, &mut stack).insert(name, NvValue::StringArray(items));
                }
                NV_TYPE_NVLIST => {
                    read_list_header(&mut r)?;
                    stack.push(Frame::List {
                        name,
                        list: Nvlist::new(),
                    });
                }
                NV_TYPE_NVLIST_ARRAY => {
                    if nitems == 0 {
                        current(&mut root, &mut stack).insert(name, NvValue::NvlistArray(Vec::new()));
                    } else {
                        read_list_header(&mut r)?;
                        stack.push(Frame::Array {
                            name,
                            expected: nitems,
                            done: Vec::new(),
                            current: Nvlist::new(),
                        });
                    }
                }
                NV_TYPE_NVLIST_ARRAY_NEXT => match stack.last_mut() {
                    Some(Frame::Array { done, current, .. }) => {
                        done.push(mem::take(current));
                        read_list_header(&mut r)?;
                    }
                    _ => return Err(corrupt("array-next marker outside an nvlist array")),
                },
                NV_TYPE_NVLIST_UP => match stack.pop() {
                    Some(Frame::List { name, list }) => {
                        current(&mut root, &mut stack).insert(name, NvValue::Nvlist(list));
                    }
                    Some(Frame::Array {
                        name,
                        expected,
                        mut done,
                        current: last,
                    }) => {
                        done.push(last);
                        if done.len() != expected {
                            return Err(corrupt(format!(
                                "nvlist array declared {expected} items, found {}",
                                done.len()
                            )));
                        }
                        current(&mut root, &mut stack).insert(name, NvValue::NvlistArray(done));
                    }
                    None => return Err(corrupt("unbalanced nvlist-up marker")),
                },
                other => return Err(corrupt(format!("unsupported nvlist value type {other}"))),
            }
        }

        if !stack.is_empty() {
            return Err(corrupt("unterminated nested nvlist"));
        }
        Ok(root)
    }

    /// Encode this list into the packed wire format.
    pub fn pack(&self) -> Vec<u8> {
        let body = self.pack_pairs();
        let mut out = Vec::with_capacity(NVLIST_HEADER_SIZE + body.len());
        push_list_header(&mut out, body.len());
        out.extend_from_slice(&body);
        out
    }

    fn pack_pairs(&self) -> Vec<u8> {
        let mut out = Vec::new();
        for (name, value) in &self.pairs {
            match value {
                NvValue::Null => push_pair_header(&mut out, NV_TYPE_NULL, name, 0, 0),
                NvValue::Bool(b) => {
                    push_pair_header(&mut out, NV_TYPE_BOOL, name, 1, 0);
                    out.push(*b as u8);
                }
                NvValue::Number(n) => {
                    push_pair_header(&mut out, NV_TYPE_NUMBER, name, 8, 0);
                    out.extend_from_slice(&n.to_le_bytes());
                }
                NvValue::String(s) => {
                    push_pair_header(&mut out, NV_TYPE_STRING, name, s.len() + 1, 0);
                    out.extend_from_slice(s.as_bytes());
                    out.push(0);
                }
                NvValue::Binary(data) => {
                    push_pair_header(&mut out, NV_TYPE_BINARY, name, data.len(), 0);
                    out.extend_from_slice(data);
                }
                NvValue::BoolArray(items) => {
                    push_pair_header(&mut out, NV_TYPE_BOOL_ARRAY, name, items.len(), items.len());
                    out.extend(items.iter().map(|b| *b as u8));
                }
                NvValue::NumberArray(items) => {
                    push_pair_header(
                        &mut out,
                        NV_TYPE_NUMBER_ARRAY,
                        name,
                        items.len() * 8,
                        items.len(),
                    );
                    for n in items {
                        out.extend_from_slice(&n.to_le_bytes());
                    }
                }
                NvValue::StringArray(items) => {
                    let datasize = items.iter().map(|s| s.len() + 1).sum();
                    push_pair_header(&mut out, NV_TYPE_STRING_ARRAY, name, datasize, items.len());
                    for s in items {
                        out.extend_from_slice(s.as_bytes());
                        out.push(0);
                    }
                }
                NvValue::Nvlist(child) => {
                    push_pair_header(&mut out, NV_TYPE_NVLIST, name, 0, 0);
                    push_nested(&mut out, child);
                    push_marker(&mut out, NV_TYPE_NVLIST_UP);
                }
                NvValue::NvlistArray(items) => {
                    push_pair_header(&mut out, NV_TYPE_NVLIST_ARRAY, name, 0, items.len());
                    for (i, child) in items.iter().enumerate() {
                        push_nested(&mut out, child);
                        if i + 1 < items.len() {
                            push_marker(&mut out, NV_TYPE_NVLIST_ARRAY_NEXT);
                        } else {
                            push_marker(&mut out, NV_TYPE_NVLIST_UP);
                        }
                    }
                }
            }
        }
        out
    }
}

/// Container being filled while the decoder is inside a nested scope.
enum Frame {
    List {
        name: String,
        list: Nvlist,
    },
    Array {
        name: String,
        expected: usize,
        done: Vec<Nvlist>,
        current: Nvlist,
    },
}

/// The list new pairs currently land in: innermost open container, else root.
fn current<'a>(root: &'a mut Nvlist, stack: &'a mut [Frame]) -> &'a mut Nvlist {
    match stack.last_mut() {
        Some(Frame::List { list, .. }) => list,
        Some(Frame::Array { current, .. }) => current,
        None => root,
    }
}

fn corrupt(msg: impl Into<String>) -> XrunsError {
    XrunsError::CorruptData(msg.into())
}

fn cstr_to_string(bytes: &[u8]) -> Result<String> {
    // libnv strings always carry their terminator, so empty payloads are
    // just as malformed as unterminated ones.
    let stripped = match bytes.split_last() {
        Some((0, rest)) => rest,
        _ => return Err(corrupt("string missing NUL terminator")),
    };
    String::from_utf8(stripped.to_vec()).map_err(|_| corrupt("non-UTF-8 string"))
}

fn split_cstrings(block: &[u8], expected: usize) -> Result<Vec<String>> {
    let mut items = Vec::with_capacity(expected);
    let mut rest = block;
    for _ in 0..expected {
        let nul = rest
            .iter()
            .position(|b| *b == 0)
            .ok_or_else(|| corrupt("string array missing NUL terminator"))?;
        items.push(cstr_to_string(&rest[..=nul])?);
        rest = &rest[nul + 1..];
    }
    if !rest.is_empty() {
        return Err(corrupt("trailing bytes in string array"));
    }
    Ok(items)
}

fn read_list_header(r: &mut Reader<'_>) -> Result<()> {
    let magic = r.u8()?;
    if magic != NVLIST_HEADER_MAGIC {
        return Err(corrupt(format!("bad nvlist magic 0x{magic:02x}")));
    }
    let version = r.u8()?;
    if version != NVLIST_HEADER_VERSION {
        return Err(corrupt(format!("unsupported nvlist version {version}")));
    }
    let flags = r.u8()?;
    if flags & NV_FLAG_BIG_ENDIAN != 0 {
        return Err(corrupt("big-endian nvlists are not supported"));
    }
    let _descriptors = r.u64_le()?;
    let size = r.u64_le()? as usize;
    if size > r.remaining() {
        return Err(corrupt("nvlist payload larger than buffer"));
    }
    Ok(())
}

fn push_list_header(out: &mut Vec<u8>, size: usize) {
    out.push(NVLIST_HEADER_MAGIC);
    out.push(NVLIST_HEADER_VERSION);
    out.push(0); // flags: native little-endian, no descriptors
    out.extend_from_slice(&0u64.to_le_bytes());
    out.extend_from_slice(&(size as u64).to_le_bytes());
}

fn push_pair_header(out: &mut Vec<u8>, ty: u8, name: &str, datasize: usize, nitems: usize) {
    out.push(ty);
    out.extend_from_slice(&((name.len() + 1) as u16).to_le_bytes());
    out.extend_from_slice(&(datasize as u64).to_le_bytes());
    out.extend_from_slice(&(nitems as u64).to_le_bytes());
    out.extend_from_slice(name.as_bytes());
    out.push(0);
}

fn push_nested(out: &mut Vec<u8>, child: &Nvlist) {
    let body = child.pack_pairs();
    // Declared size covers the child's pairs plus its closing marker
    push_list_header(out, body.len() + NVPAIR_HEADER_SIZE + 1);
    out.extend_from_slice(&body);
}

fn push_marker(out: &mut Vec<u8>, ty: u8) {
    push_pair_header(out, ty, "", 0, 0);
}

/// Bounds-checked little-endian cursor over a packed buffer.
struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if n > self.remaining() {
            return Err(corrupt("truncated nvlist buffer"));
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn u16_le(&mut self) -> Result<u16> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn u64_le(&mut self) -> Result<u64> {
        let b = self.take(8)?;
        Ok(u64::from_le_bytes([
            b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
        ]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_list() -> Nvlist {
        let mut info = Nvlist::new();
        info.insert_number("unit", 3);
        info.insert_string("driver", "hdaa");

        let mut chan_a = Nvlist::new();
        chan_a.insert_string("name", "dsp0.p0");
        chan_a.insert_number("xruns", 12);

        let mut chan_b = Nvlist::new();
        chan_b.insert_string("name", "dsp0.r0");
        chan_b.insert_number("xruns", 0);

        let mut root = Nvlist::new();
        root.insert_string("nameunit", "pcm3");
        root.insert(
            "rates",
            NvValue::NumberArray(vec![44_100, 48_000, 96_000]),
        );
        root.insert("from_user", NvValue::Bool(false));
        root.insert("bypass", NvValue::Null);
        root.insert("codec_id", NvValue::Binary(vec![0xde, 0xad, 0xbe, 0xef]));
        root.insert("muted", NvValue::BoolArray(vec![true, false]));
        root.insert(
            "labels",
            NvValue::StringArray(vec!["play".into(), "rec".into()]),
        );
        root.insert_nvlist("provider_info", info);
        root.insert_nvlist_array("channel_info", vec![chan_a, chan_b]);
        root
    }

    #[test]
    fn test_round_trip() {
        let original = sample_list();
        let packed = original.pack();
        let decoded = Nvlist::unpack(&packed).unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn test_round_trip_empty_list() {
        let decoded = Nvlist::unpack(&Nvlist::new().pack()).unwrap();
        assert!(decoded.is_empty());
    }

    #[test]
    fn test_round_trip_empty_nvlist_array() {
        let mut root = Nvlist::new();
        root.insert_nvlist_array("channel_info", Vec::new());
        let decoded = Nvlist::unpack(&root.pack()).unwrap();
        assert_eq!(decoded.nvlist_array("channel_info"), Some(&[][..]));
    }

    #[test]
    fn test_deeply_nested_lists() {
        let mut inner = Nvlist::new();
        inner.insert_number("depth", 2);
        let mut middle = Nvlist::new();
        middle.insert_nvlist("inner", inner);
        let mut root = Nvlist::new();
        root.insert_nvlist("middle", middle);

        let decoded = Nvlist::unpack(&root.pack()).unwrap();
        let depth = decoded
            .nvlist("middle")
            .and_then(|m| m.nvlist("inner"))
            .and_then(|i| i.number("depth"));
        assert_eq!(depth, Some(2));
    }

    #[test]
    fn test_first_match_wins_on_duplicate_names() {
        let mut root = Nvlist::new();
        root.insert_number("unit", 1);
        root.insert_number("unit", 2);
        assert_eq!(root.number("unit"), Some(1));

        let decoded = Nvlist::unpack(&root.pack()).unwrap();
        assert_eq!(decoded.number("unit"), Some(1));
    }

    #[test]
    fn test_accessor_type_mismatch_returns_none() {
        let mut root = Nvlist::new();
        root.insert_string("unit", "three");
        assert_eq!(root.number("unit"), None);
        assert_eq!(root.nvlist("unit"), None);
        assert!(root.exists("unit"));
    }

    #[test]
    fn test_bad_magic() {
        let mut packed = sample_list().pack();
        packed[0] = 0xFF;
        assert!(Nvlist::unpack(&packed).is_err());
    }

    #[test]
    fn test_big_endian_rejected() {
        let mut packed = sample_list().pack();
        packed[2] |= NV_FLAG_BIG_ENDIAN;
        assert!(Nvlist::unpack(&packed).is_err());
    }

    #[test]
    fn test_truncated_buffer() {
        let packed = sample_list().pack();
        for len in [5, NVLIST_HEADER_SIZE + 3, packed.len() - 7] {
            assert!(Nvlist::unpack(&packed[..len]).is_err(), "len {len}");
        }
    }

    #[test]
    fn test_declared_size_beyond_buffer() {
        let mut packed = Nvlist::new().pack();
        // Inflate the declared payload size past the end of the buffer
        packed[11..19].copy_from_slice(&1024u64.to_le_bytes());
        assert!(Nvlist::unpack(&packed).is_err());
    }

    #[test]
    fn test_zero_length_string_payload_rejected() {
        let mut body = Vec::new();
        push_pair_header(&mut body, NV_TYPE_STRING, "label", 0, 0);
        let mut out = Vec::new();
        push_list_header(&mut out, body.len());
        out.extend_from_slice(&body);
        assert!(Nvlist::unpack(&out).is_err());
    }

    #[test]
    fn test_unbalanced_up_marker() {
        let mut out = Vec::new();
        push_list_header(&mut out, NVPAIR_HEADER_SIZE + 1);
        push_marker(&mut out, NV_TYPE_NVLIST_UP);
        assert!(Nvlist::unpack(&out).is_err());
    }
}
