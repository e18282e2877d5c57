use serde::Serialize;

/// End-of-run accounting, filled in by the traversal driver.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExtractReport {
    pub dirs: u64,
    pub files: u64,
    pub symlinks: u64,
    pub specials: u64,
    pub bytes_written: u64,
    pub files_nonempty: u64,
    /// Distinct fragment blocks referenced by extracted file tails.
    pub tail_fragments: u64,
    pub max_depth: u64,
    pub warnings: u64,
}

impl ExtractReport {
    #[must_use]
    pub fn entries(&self) -> u64 {
        self.dirs + self.files + self.symlinks + self.specials
    }
}
