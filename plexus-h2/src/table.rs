//! HPACK header tables (RFC 7541 Section 2.3).
//!
//! The static table occupies indices `1..=61`; the dynamic table continues at
//! 62 with its most recently inserted entry first.

use std::collections::VecDeque;

use crate::hpack::HeaderField;

/// Per-entry accounting overhead (RFC 7541 Section 4.1).
pub const ENTRY_OVERHEAD: usize = 32;

/// Default dynamic table size (SETTINGS_HEADER_TABLE_SIZE initial value).
pub const DEFAULT_TABLE_SIZE: usize = 4096;

/// RFC 7541 Appendix A, 1-indexed.
static STATIC_TABLE: [(&str, &str); 61] = [
    (":authority", ""), // 1
    (":method", "GET"),
    (":method", "POST"),
    (":path", "/"),
    (":path", "/index.html"),
    (":scheme", "http"),
    (":scheme", "https"),
    (":status", "200"),
    (":status", "204"),
    (":status", "206"),
    (":status", "304"), // 11
    (":status", "400"),
    (":status", "404"),
    (":status", "500"),
    ("accept-charset", ""),
    ("accept-encoding", "gzip, deflate"),
    ("accept-language", ""),
    ("accept-ranges", ""),
    ("accept", ""),
    ("access-control-allow-origin", ""),
    ("age", ""), // 21
    ("allow", ""),
    ("authorization", ""),
    ("cache-control", ""),
    ("content-disposition", ""),
    ("content-encoding", ""),
    ("content-language", ""),
    ("content-length", ""),
    ("content-location", ""),
    ("content-range", ""),
    ("content-type", ""), // 31
    ("cookie", ""),
    ("date", ""),
    ("etag", ""),
    ("expect", ""),
    ("expires", ""),
    ("from", ""),
    ("host", ""),
    ("if-match", ""),
    ("if-modified-since", ""),
    ("if-none-match", ""), // 41
    ("if-range", ""),
    ("if-unmodified-since", ""),
    ("last-modified", ""),
    ("link", ""),
    ("location", ""),
    ("max-forwards", ""),
    ("proxy-authenticate", ""),
    ("proxy-authorization", ""),
    ("range", ""),
    ("referer", ""), // 51
    ("refresh", ""),
    ("retry-after", ""),
    ("server", ""),
    ("set-cookie", ""),
    ("strict-transport-security", ""),
    ("transfer-encoding", ""),
    ("user-agent", ""),
    ("vary", ""),
    ("via", ""),
    ("www-authenticate", ""), // 61
];

/// Number of static table entries; the first dynamic index is one past this.
pub const STATIC_TABLE_LEN: usize = STATIC_TABLE.len();

/// Result of looking a header up in a table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableMatch {
    /// Name and value both match the entry at this index.
    Full(usize),
    /// Only the name matches the entry at this index.
    Name(usize),
}

impl TableMatch {
    pub fn index(self) -> usize {
        match self {
            Self::Full(i) | Self::Name(i) => i,
        }
    }
}

/// Static table entry at a 1-based index.
pub fn static_entry(index: usize) -> Option<(&'static [u8], &'static [u8])> {
    let (name, value) = STATIC_TABLE.get(index.checked_sub(1)?)?;
    Some((name.as_bytes(), value.as_bytes()))
}

/// First full match in the static table, else the first name-only match.
///
/// The table is small and linear scans keep it allocation-free.
pub fn find_static(name: &[u8], value: &[u8]) -> Option<TableMatch> {
    let mut name_match = None;
    for (i, (n, v)) in STATIC_TABLE.iter().enumerate() {
        if n.as_bytes() != name {
            continue;
        }
        if v.as_bytes() == value {
            return Some(TableMatch::Full(i + 1));
        }
        name_match.get_or_insert(TableMatch::Name(i + 1));
    }
    name_match
}

/// HPACK dynamic table (RFC 7541 Section 2.3.2).
///
/// Entries are stored newest-first: position 0 is HPACK index
/// `STATIC_TABLE_LEN + 1`. Insertion evicts from the back.
#[derive(Debug)]
pub struct DynamicTable {
    entries: VecDeque<HeaderField>,
    size: usize,
    max_size: usize,
}

impl DynamicTable {
    pub fn new(max_size: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            size: 0,
            max_size,
        }
    }

    /// Entry at a 0-based dynamic position.
    pub fn get(&self, position: usize) -> Option<&HeaderField> {
        self.entries.get(position)
    }

    /// Insert at the front, evicting the oldest entries until it fits.
    ///
    /// Returns `false` when the entry alone exceeds the maximum size; the
    /// table is then left empty (RFC 7541 Section 4.4).
    pub fn add(&mut self, field: HeaderField) -> bool {
        let entry_size = field.size();
        if entry_size > self.max_size {
            self.entries.clear();
            self.size = 0;
            return false;
        }
        self.evict_to(self.max_size - entry_size);
        self.size += entry_size;
        self.entries.push_front(field);
        true
    }

    /// Change the maximum size, evicting as needed.
    pub fn set_max_size(&mut self, max_size: usize) {
        self.max_size = max_size;
        self.evict_to(max_size);
    }

    fn evict_to(&mut self, limit: usize) {
        while self.size > limit {
            match self.entries.pop_back() {
                Some(evicted) => self.size -= evicted.size(),
                None => break,
            }
        }
    }

    /// First full match among dynamic entries, else the first name-only
    /// match, as absolute HPACK indices.
    pub fn find(&self, name: &[u8], value: &[u8]) -> Option<TableMatch> {
        let mut name_match = None;
        for (i, h) in self.entries.iter().enumerate() {
            if h.name != name {
                continue;
            }
            let index = STATIC_TABLE_LEN + 1 + i;
            if h.value == value {
                return Some(TableMatch::Full(index));
            }
            name_match.get_or_insert(TableMatch::Name(index));
        }
        name_match
    }

    /// Cumulative size of all entries, overhead included.
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }
}
