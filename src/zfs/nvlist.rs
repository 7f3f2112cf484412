//! XDR-encoded name/value list parsing.
//!
//! Each label carries a name/value description of the pool and its vdev
//! tree, serialized in the XDR encoding: a four-byte encoding header, then a
//! version/flags pair, then a sequence of (encoded size, decoded size, name,
//! type, element count, value) records terminated by a pair of zero sizes.
//! All integers are big-endian. Only the types the vdev description actually
//! uses are decoded; anything else is skipped over by its encoded size.

use super::ZfsError;
use byteorder::{BigEndian, ByteOrder};
use std::collections::HashMap;

const NV_ENCODE_XDR: u8 = 1;

const DATA_TYPE_BOOLEAN: u32 = 1;
const DATA_TYPE_UINT64: u32 = 8;
const DATA_TYPE_STRING: u32 = 9;
const DATA_TYPE_UINT64_ARRAY: u32 = 16;
const DATA_TYPE_NVLIST: u32 = 19;
const DATA_TYPE_NVLIST_ARRAY: u32 = 20;

/// A decoded name/value pair value.
#[derive(Debug, Clone, PartialEq)]
pub enum NvValue {
    Bool(bool),
    U64(u64),
    Str(String),
    U64Array(Vec<u64>),
    List(NvList),
    ListArray(Vec<NvList>),
}

/// A decoded name/value list.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NvList {
    pairs: HashMap<String, NvValue>,
}

impl NvList {
    /// Decodes an XDR-serialized list from the start of `data`.
    pub fn unpack(data: &[u8]) -> Result<NvList, ZfsError> {
        if data.len() < 4 {
            return Err(ZfsError::parse("name/value region too short"));
        }
        if data[0] != NV_ENCODE_XDR {
            return Err(ZfsError::parse(format!(
                "unsupported name/value encoding {}",
                data[0]
            )));
        }
        let mut decoder = Decoder {
            data,
            pos: 4, // encoding, endian, two reserved bytes
        };
        decode_list(&mut decoder)
    }

    pub fn get(&self, name: &str) -> Option<&NvValue> {
        self.pairs.get(name)
    }

    pub fn get_u64(&self, name: &str) -> Option<u64> {
        match self.pairs.get(name) {
            Some(NvValue::U64(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn get_str(&self, name: &str) -> Option<&str> {
        match self.pairs.get(name) {
            Some(NvValue::Str(s)) => Some(s),
            _ => None,
        }
    }

    pub fn get_list(&self, name: &str) -> Option<&NvList> {
        match self.pairs.get(name) {
            Some(NvValue::List(l)) => Some(l),
            _ => None,
        }
    }

    pub fn get_lists(&self, name: &str) -> Option<&[NvList]> {
        match self.pairs.get(name) {
            Some(NvValue::ListArray(l)) => Some(l),
            _ => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    fn insert(&mut self, name: String, value: NvValue) {
        self.pairs.insert(name, value);
    }
}

struct Decoder<'a> {
    data: &'a [u8],
    pos: usize,
}

impl Decoder<'_> {
    fn u32(&mut self) -> Result<u32, ZfsError> {
        let end = self.pos + 4;
        if end > self.data.len() {
            return Err(ZfsError::parse("truncated name/value data"));
        }
        let v = BigEndian::read_u32(&self.data[self.pos..end]);
        self.pos = end;
        Ok(v)
    }

    fn u64(&mut self) -> Result<u64, ZfsError> {
        let end = self.pos + 8;
        if end > self.data.len() {
            return Err(ZfsError::parse("truncated name/value data"));
        }
        let v = BigEndian::read_u64(&self.data[self.pos..end]);
        self.pos = end;
        Ok(v)
    }

    /// Length-prefixed string, padded to a four-byte boundary.
    fn string(&mut self) -> Result<String, ZfsError> {
        let len = self.u32()? as usize;
        let end = self.pos + len;
        if end > self.data.len() {
            return Err(ZfsError::parse("truncated name/value string"));
        }
        let s = std::str::from_utf8(&self.data[self.pos..end])
            .map_err(|_| ZfsError::parse("name/value string is not UTF-8"))?
            .to_string();
        self.pos = end + (4 - len % 4) % 4;
        Ok(s)
    }
}

fn decode_list(dec: &mut Decoder<'_>) -> Result<NvList, ZfsError> {
    let _version = dec.u32()?;
    let _flags = dec.u32()?;

    let mut list = NvList::default();
    loop {
        let pair_start = dec.pos;
        let encoded_sz = dec.u32()? as usize;
        let decoded_sz = dec.u32()?;
        if encoded_sz == 0 && decoded_sz == 0 {
            break;
        }

        let name = dec.string()?;
        let typ = dec.u32()?;
        let nelem = dec.u32()? as usize;

        match typ {
            DATA_TYPE_BOOLEAN => {
                // Flag pair, no value bytes.
                list.insert(name, NvValue::Bool(true));
            }
            DATA_TYPE_UINT64 => {
                list.insert(name, NvValue::U64(dec.u64()?));
            }
            DATA_TYPE_STRING => {
                let s = dec.string()?;
                list.insert(name, NvValue::Str(s));
            }
            DATA_TYPE_UINT64_ARRAY => {
                let mut values = Vec::with_capacity(nelem.min(1024));
                for _ in 0..nelem {
                    values.push(dec.u64()?);
                }
                list.insert(name, NvValue::U64Array(values));
            }
            DATA_TYPE_NVLIST => {
                let nested = decode_list(dec)?;
                list.insert(name, NvValue::List(nested));
            }
            DATA_TYPE_NVLIST_ARRAY => {
                let mut lists = Vec::with_capacity(nelem.min(256));
                for _ in 0..nelem {
                    lists.push(decode_list(dec)?);
                }
                list.insert(name, NvValue::ListArray(lists));
            }
            _ => {
                // Unknown type: the encoded size covers the whole pair, so
                // step over it. Embedded lists never take this path.
                let next = pair_start + encoded_sz;
                if encoded_sz < 8 || next > dec.data.len() {
                    return Err(ZfsError::parse(format!(
                        "cannot skip name/value pair of type {typ}"
                    )));
                }
                dec.pos = next;
            }
        }
    }
    Ok(list)
}
