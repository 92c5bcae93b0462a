//! HPACK header compression (RFC 7541).
//!
//! [`Encoder`] and [`Decoder`] each own one dynamic table. A connection keeps
//! exactly one of each, and every header block on the connection must pass
//! through them in wire order or the two endpoints' tables diverge.

use crate::error::HpackError;
use crate::huffman;
use crate::integer;
use crate::table::{self, DynamicTable, TableMatch, ENTRY_OVERHEAD, STATIC_TABLE_LEN};

/// Header names whose values must never enter a compression table.
const SENSITIVE: [&[u8]; 4] = [b"authorization", b"cookie", b"set-cookie", b"proxy-authorization"];

/// A single header name-value pair, as raw octets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderField {
    pub name: Vec<u8>,
    pub value: Vec<u8>,
}

impl HeaderField {
    pub fn new(name: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }

    /// Dynamic table accounting size (RFC 7541 Section 4.1).
    pub fn size(&self) -> usize {
        self.name.len() + self.value.len() + ENTRY_OVERHEAD
    }

    /// Whether this header is always sent as a never-indexed literal.
    pub fn is_sensitive(&self) -> bool {
        SENSITIVE.iter().any(|s| self.name.eq_ignore_ascii_case(s))
    }
}

/// Append a string literal, Huffman-coded only when strictly shorter.
fn encode_string(buf: &mut Vec<u8>, data: &[u8]) {
    let huffman_len = huffman::encoded_len(data);
    if huffman_len < data.len() {
        integer::encode(buf, huffman_len as u32, 7, 0x80);
        huffman::encode(data, buf);
    } else {
        integer::encode(buf, data.len() as u32, 7, 0x00);
        buf.extend_from_slice(data);
    }
}

/// Decode a string literal at the start of `buf`. Returns the octets and the
/// number of bytes consumed.
fn decode_string(buf: &[u8]) -> Result<(Vec<u8>, usize), HpackError> {
    let first = *buf.first().ok_or(HpackError::TruncatedString)?;
    let (len, n) = integer::decode(buf, 7)?;
    let end = n
        .checked_add(len as usize)
        .filter(|&end| end <= buf.len())
        .ok_or(HpackError::TruncatedString)?;
    let raw = &buf[n..end];
    let data = if first & 0x80 != 0 {
        huffman::decode(raw)?
    } else {
        raw.to_vec()
    };
    Ok((data, end))
}

// -- Encoder --

/// HPACK encoder.
#[derive(Debug)]
pub struct Encoder {
    table: DynamicTable,
    /// Smallest and latest size requested since the last block.
    pending_size_update: Option<(usize, usize)>,
}

impl Default for Encoder {
    fn default() -> Self {
        Self::new(table::DEFAULT_TABLE_SIZE)
    }
}

impl Encoder {
    pub fn new(max_table_size: usize) -> Self {
        Self {
            table: DynamicTable::new(max_table_size),
            pending_size_update: None,
        }
    }

    /// Change the table size. The update is emitted at the start of the next
    /// block passed to [`Encoder::encode`]. When several changes land between
    /// blocks and one of them dipped below the final size, the smallest is
    /// signalled first so the peer evicts what we evicted (RFC 7541 Section
    /// 4.2).
    pub fn set_max_table_size(&mut self, max_size: usize) {
        self.pending_size_update = match self.pending_size_update {
            None if max_size == self.table.max_size() => return,
            None => Some((max_size, max_size)),
            Some((smallest, _)) => Some((smallest.min(max_size), max_size)),
        };
    }

    /// Encode `headers` as one header block appended to `buf`.
    pub fn encode(&mut self, headers: &[HeaderField], buf: &mut Vec<u8>) {
        if let Some((smallest, size)) = self.pending_size_update.take() {
            if smallest < size {
                self.table.set_max_size(smallest);
                integer::encode(buf, smallest as u32, 5, 0x20);
            }
            self.table.set_max_size(size);
            integer::encode(buf, size as u32, 5, 0x20);
        }
        for header in headers {
            self.encode_field(header, buf);
        }
    }

    fn encode_field(&mut self, header: &HeaderField, buf: &mut Vec<u8>) {
        let found = self.find(&header.name, &header.value);

        if header.is_sensitive() {
            // Literal never indexed (Section 6.2.3): 0001xxxx.
            match found {
                Some(m) => integer::encode(buf, m.index() as u32, 4, 0x10),
                None => {
                    buf.push(0x10);
                    encode_string(buf, &header.name);
                }
            }
            encode_string(buf, &header.value);
            return;
        }

        match found {
            // Indexed field (Section 6.1): 1xxxxxxx.
            Some(TableMatch::Full(index)) => integer::encode(buf, index as u32, 7, 0x80),
            // Literal with incremental indexing (Section 6.2.1): 01xxxxxx.
            Some(TableMatch::Name(index)) => {
                integer::encode(buf, index as u32, 6, 0x40);
                encode_string(buf, &header.value);
                self.table.add(header.clone());
            }
            None => {
                buf.push(0x40);
                encode_string(buf, &header.name);
                encode_string(buf, &header.value);
                self.table.add(header.clone());
            }
        }
    }

    /// A full match anywhere beats any name-only match.
    fn find(&self, name: &[u8], value: &[u8]) -> Option<TableMatch> {
        let in_static = table::find_static(name, value);
        if let Some(m @ TableMatch::Full(_)) = in_static {
            return Some(m);
        }
        match self.table.find(name, value) {
            Some(m @ TableMatch::Full(_)) => Some(m),
            dynamic => in_static.or(dynamic),
        }
    }
}

// -- Decoder --

/// HPACK decoder.
#[derive(Debug)]
pub struct Decoder {
    table: DynamicTable,
    /// Largest table size the peer may select, as advertised in our SETTINGS.
    ceiling: usize,
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new(table::DEFAULT_TABLE_SIZE)
    }
}

impl Decoder {
    pub fn new(ceiling: usize) -> Self {
        Self {
            table: DynamicTable::new(ceiling),
            ceiling,
        }
    }

    /// Current dynamic table size, overhead included.
    pub fn table_size(&self) -> usize {
        self.table.size()
    }

    /// Decode a complete header block.
    pub fn decode(&mut self, buf: &[u8]) -> Result<Vec<HeaderField>, HpackError> {
        self.decode_range(buf, 0, buf.len())
    }

    /// Decode the header block stored in `buf[offset..end]`.
    pub fn decode_range(
        &mut self,
        buf: &[u8],
        offset: usize,
        end: usize,
    ) -> Result<Vec<HeaderField>, HpackError> {
        let block = buf.get(offset..end).ok_or(HpackError::TruncatedString)?;
        let mut headers = Vec::new();
        let mut pos = 0;

        while pos < block.len() {
            let rest = &block[pos..];
            let first = rest[0];

            if first & 0x80 != 0 {
                let (index, n) = integer::decode(rest, 7)?;
                pos += n;
                headers.push(self.entry(index as usize)?);
            } else if first & 0x40 != 0 {
                let (field, n) = self.literal(rest, 6)?;
                pos += n;
                self.table.add(field.clone());
                headers.push(field);
            } else if first & 0x20 != 0 {
                // Accepted anywhere in the block, bounded by the ceiling.
                let (size, n) = integer::decode(rest, 5)?;
                pos += n;
                let size = size as usize;
                if size > self.ceiling {
                    return Err(HpackError::TableSizeExceeded {
                        requested: size,
                        ceiling: self.ceiling,
                    });
                }
                self.table.set_max_size(size);
            } else {
                // 0001xxxx never indexed, 0000xxxx without indexing.
                let (field, n) = self.literal(rest, 4)?;
                pos += n;
                headers.push(field);
            }
        }

        Ok(headers)
    }

    /// Literal representation with an N-bit name index prefix.
    fn literal(&self, buf: &[u8], prefix_bits: u8) -> Result<(HeaderField, usize), HpackError> {
        let (index, mut pos) = integer::decode(buf, prefix_bits)?;
        let name = if index == 0 {
            let (name, n) = decode_string(&buf[pos..])?;
            pos += n;
            name
        } else {
            self.entry(index as usize)?.name
        };
        let (value, n) = decode_string(&buf[pos..])?;
        Ok((HeaderField { name, value }, pos + n))
    }

    fn entry(&self, index: usize) -> Result<HeaderField, HpackError> {
        if let Some((name, value)) = table::static_entry(index) {
            return Ok(HeaderField::new(name, value));
        }
        index
            .checked_sub(STATIC_TABLE_LEN + 1)
            .and_then(|position| self.table.get(position))
            .cloned()
            .ok_or(HpackError::InvalidIndex(index))
    }
}
