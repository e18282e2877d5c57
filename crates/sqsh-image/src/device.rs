use sqsh_error::{Result, SqfsError};
use std::fs::File;
use std::os::unix::fs::FileExt;
use std::path::Path;
use std::sync::Arc;

/// Positioned reads over an immutable image. Implementations hold no
/// cursor state, so a shared reference is all any reader needs.
pub trait ByteDevice: Send + Sync {
    /// Total length in bytes.
    fn len_bytes(&self) -> u64;

    /// Read exactly `buf.len()` bytes from `offset` into `buf`.
    fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> Result<()>;
}

fn bounds_check(offset: u64, wanted: usize, len: u64) -> Result<()> {
    let end = offset
        .checked_add(wanted as u64)
        .ok_or_else(|| SqfsError::Truncated {
            offset,
            detail: "read range overflows u64".to_owned(),
        })?;
    if end > len {
        return Err(SqfsError::Truncated {
            offset,
            detail: format!("need {wanted} bytes, image ends at {len}"),
        });
    }
    Ok(())
}

/// File-backed device using `pread`-style I/O via
/// `std::os::unix::fs::FileExt`; no shared seek position, safe behind a
/// shared reference.
#[derive(Debug, Clone)]
pub struct FileByteDevice {
    file: Arc<File>,
    len: u64,
}

impl FileByteDevice {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path.as_ref())?;
        let len = file.metadata()?.len();
        Ok(Self {
            file: Arc::new(file),
            len,
        })
    }
}

impl ByteDevice for FileByteDevice {
    fn len_bytes(&self) -> u64 {
        self.len
    }

    fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        bounds_check(offset, buf.len(), self.len)?;
        self.file.read_exact_at(buf, offset)?;
        Ok(())
    }
}

/// In-memory device, used by tests and the harness image builder.
#[derive(Debug, Clone)]
pub struct MemoryByteDevice {
    bytes: Arc<Vec<u8>>,
}

impl MemoryByteDevice {
    #[must_use]
    pub fn new(bytes: Vec<u8>) -> Self {
        Self {
            bytes: Arc::new(bytes),
        }
    }
}

impl ByteDevice for MemoryByteDevice {
    fn len_bytes(&self) -> u64 {
        self.bytes.len() as u64
    }

    fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        bounds_check(offset, buf.len(), self.len_bytes())?;
        let start = offset as usize;
        buf.copy_from_slice(&self.bytes[start..start + buf.len()]);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_device_reads_in_bounds() {
        let dev = MemoryByteDevice::new((0..32_u8).collect());
        let mut buf = [0_u8; 4];
        dev.read_exact_at(10, &mut buf).unwrap();
        assert_eq!(buf, [10, 11, 12, 13]);
    }

    #[test]
    fn memory_device_rejects_out_of_bounds() {
        let dev = MemoryByteDevice::new(vec![0; 8]);
        let mut buf = [0_u8; 4];
        assert!(matches!(
            dev.read_exact_at(6, &mut buf),
            Err(SqfsError::Truncated { offset: 6, .. })
        ));
        assert!(dev.read_exact_at(u64::MAX, &mut buf).is_err());
    }
}
