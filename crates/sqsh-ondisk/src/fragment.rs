use serde::{Deserialize, Serialize};
use sqsh_types::{read_le_u32, read_le_u64, BlockSizeWord, ParseError, FRAGMENT_ENTRY_SIZE};

/// One 16-byte fragment table entry: the absolute start of a shared
/// fragment block and its on-disk size word (4 trailing bytes unused).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FragmentEntry {
    pub start: u64,
    pub size: BlockSizeWord,
}

impl FragmentEntry {
    pub fn parse(raw: &[u8]) -> Result<Self, ParseError> {
        if raw.len() < FRAGMENT_ENTRY_SIZE {
            return Err(ParseError::InsufficientData {
                needed: FRAGMENT_ENTRY_SIZE,
                offset: 0,
                actual: raw.len(),
            });
        }
        Ok(Self {
            start: read_le_u64(raw, 0)?,
            size: BlockSizeWord(read_le_u32(raw, 8)?),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqsh_types::DATA_BLOCK_UNCOMPRESSED;

    #[test]
    fn parses_an_entry() {
        let mut raw = Vec::new();
        raw.extend_from_slice(&8192_u64.to_le_bytes());
        raw.extend_from_slice(&(DATA_BLOCK_UNCOMPRESSED | 300).to_le_bytes());
        raw.extend_from_slice(&0_u32.to_le_bytes());

        let entry = FragmentEntry::parse(&raw).unwrap();
        assert_eq!(entry.start, 8192);
        assert_eq!(entry.size.on_disk_size(), 300);
        assert!(entry.size.is_uncompressed());
    }

    #[test]
    fn rejects_short_input() {
        assert!(FragmentEntry::parse(&[0_u8; 12]).is_err());
    }
}
