use crate::format::MemberHeader;
use crate::{Error, Result};

/// Location of one chunk, both in the container and in the decoded stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkEntry {
    pub member: u32,
    pub chunk: u32,
    pub uncompressed_offset: u64,
    pub compressed_offset: u64,
    pub compressed_size: u32,
    pub uncompressed_size: u32,
}

impl ChunkEntry {
    pub fn uncompressed_end(&self) -> u64 {
        self.uncompressed_offset + u64::from(self.uncompressed_size)
    }
}

/// One indexed member.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberInfo {
    /// Container offset of the member's first header byte.
    pub start: u64,
    /// Container offset of the first deflate byte.
    pub data_offset: u64,
    /// Container offset just past the trailer.
    pub end: u64,
    pub uncompressed_offset: u64,
    pub uncompressed_size: u64,
    pub crc: u32,
    pub first_entry: usize,
    pub chunk_count: usize,
}

/// File-wide chunk table, grown one member at a time.
#[derive(Debug, Clone, Default)]
pub struct ChunkIndex {
    entries: Vec<ChunkEntry>,
    members: Vec<MemberInfo>,
    next_member: u64,
    complete: bool,
}

impl ChunkIndex {
    pub fn new(first_member: u64) -> Self {
        Self {
            entries: Vec::new(),
            members: Vec::new(),
            next_member: first_member,
            complete: false,
        }
    }

    /// Appends the member whose header starts at `next_member_offset()`.
    ///
    /// `payload_end` is where its deflate stream terminates and `size` the
    /// trailer's ISIZE. Chunk offsets are prefix sums of the header lengths.
    pub fn push_member(
        &mut self,
        header: &MemberHeader,
        payload_end: u64,
        crc: u32,
        size: u64,
    ) -> Result<&MemberInfo> {
        let chunk_length = u64::from(header.chunk_length);
        let count = header.zlengths.len();
        if size.div_ceil(chunk_length) != count as u64 {
            return Err(Error::Corrupt("chunk count disagrees with member size"));
        }

        let start = self.next_member;
        let data_offset = start + header.header_len;
        if data_offset + header.compressed_payload_len() > payload_end {
            return Err(Error::Corrupt("chunk lengths overrun deflate payload"));
        }
        let member = self.members.len() as u32;
        let uncompressed_start = self.indexed_size();
        let first_entry = self.entries.len();

        let mut compressed_offset = data_offset;
        let mut uncompressed_offset = uncompressed_start;
        for (chunk, &zlen) in header.zlengths.iter().enumerate() {
            let remaining = uncompressed_start + size - uncompressed_offset;
            let uncompressed_size = remaining.min(chunk_length);
            self.entries.push(ChunkEntry {
                member,
                chunk: chunk as u32,
                uncompressed_offset,
                compressed_offset,
                compressed_size: u32::from(zlen),
                uncompressed_size: uncompressed_size as u32,
            });
            compressed_offset += u64::from(zlen);
            uncompressed_offset += uncompressed_size;
        }

        let end = payload_end + crate::format::TRAILER_LEN as u64;
        self.next_member = end;
        self.members.push(MemberInfo {
            start,
            data_offset,
            end,
            uncompressed_offset: uncompressed_start,
            uncompressed_size: size,
            crc,
            first_entry,
            chunk_count: count,
        });
        Ok(&self.members[member as usize])
    }

    pub fn entry_for_offset(&self, offset: u64) -> Option<&ChunkEntry> {
        if self.entries.is_empty() {
            return None;
        }
        let mut lo = 0usize;
        let mut hi = self.entries.len();
        while lo < hi {
            let mid = (lo + hi) / 2;
            let entry = &self.entries[mid];
            if offset < entry.uncompressed_offset {
                hi = mid;
            } else if offset >= entry.uncompressed_end() {
                lo = mid + 1;
            } else {
                return Some(entry);
            }
        }
        None
    }

    /// Uncompressed bytes covered by the members indexed so far.
    pub fn indexed_size(&self) -> u64 {
        self.members
            .last()
            .map(|m| m.uncompressed_offset + m.uncompressed_size)
            .unwrap_or(0)
    }

    pub fn next_member_offset(&self) -> u64 {
        self.next_member
    }

    pub fn mark_complete(&mut self) {
        self.complete = true;
    }

    pub fn is_complete(&self) -> bool {
        self.complete
    }

    pub fn entries(&self) -> &[ChunkEntry] {
        &self.entries
    }

    pub fn members(&self) -> &[MemberInfo] {
        &self.members
    }

    pub fn member_entries(&self, member: usize) -> &[ChunkEntry] {
        match self.members.get(member) {
            Some(info) => &self.entries[info.first_entry..info.first_entry + info.chunk_count],
            None => &[],
        }
    }
}
