//! Byte-addressable persistent storage backing a [`crate::Database`].
//!
//! Two implementations exist: a file-backed device memory-mapped with
//! `memmap2` and advisory-locked with `fs4` for the handle's lifetime, and
//! an in-memory device that can never be reopened (per the *in-memory*
//! flag contract). Neither buffers beyond what the OS/mmap already does;
//! `read`/`write` fail with `ShortRead`/`ShortWrite` if the requested range
//! falls outside the current extent.

use std::fs::{File, OpenOptions as FsOpenOptions};
use std::path::Path;

use fs4::fs_std::FileExt;
use memmap2::MmapMut;

use crate::error::{Error, Result};

/// A growable, byte-addressable store.
pub(crate) enum Device {
    File(FileDevice),
    Memory(MemoryDevice),
}

impl Device {
    pub fn open(path: &Path, read_only: bool) -> Result<Self> {
        Ok(Device::File(FileDevice::open(path, read_only)?))
    }

    pub fn create(path: &Path, mode: u32) -> Result<Self> {
        Ok(Device::File(FileDevice::create(path, mode)?))
    }

    pub fn create_in_memory() -> Self {
        Device::Memory(MemoryDevice::new())
    }

    pub fn len(&self) -> u64 {
        match self {
            Device::File(d) => d.len(),
            Device::Memory(d) => d.len(),
        }
    }

    pub fn read(&mut self, off: u64, buf: &mut [u8]) -> Result<()> {
        match self {
            Device::File(d) => d.read(off, buf),
            Device::Memory(d) => d.read(off, buf),
        }
    }

    pub fn write(&mut self, off: u64, buf: &[u8]) -> Result<()> {
        match self {
            Device::File(d) => d.write(off, buf),
            Device::Memory(d) => d.write(off, buf),
        }
    }

    /// Extend the device by `len` bytes, returning the byte offset the new
    /// region starts at (always the prior end-of-device).
    pub fn extend(&mut self, len: u64) -> Result<u64> {
        match self {
            Device::File(d) => d.extend(len),
            Device::Memory(d) => d.extend(len),
        }
    }

    pub fn flush(&mut self) -> Result<()> {
        match self {
            Device::File(d) => d.flush(),
            Device::Memory(_) => Ok(()),
        }
    }

    pub fn is_in_memory(&self) -> bool {
        matches!(self, Device::Memory(_))
    }
}

/// A file-backed device, memory-mapped for the lifetime of the handle.
pub(crate) struct FileDevice {
    file: File,
    map: Option<MmapMut>,
    len: u64,
}

impl FileDevice {
    pub fn open(path: &Path, read_only: bool) -> Result<Self> {
        let file = FsOpenOptions::new()
            .read(true)
            .write(!read_only)
            .open(path)?;
        if read_only {
            file.try_lock_shared().map_err(Error::Lock)?;
        } else {
            file.try_lock_exclusive().map_err(Error::Lock)?;
        }
        let len = file.metadata()?.len();
        let map = Self::remap(&file, len)?;
        Ok(Self { file, map, len })
    }

    pub fn create(path: &Path, mode: u32) -> Result<Self> {
        let file = FsOpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .mode_or_ignore(mode)
            .open(path)?;
        file.try_lock_exclusive().map_err(Error::Lock)?;
        Ok(Self {
            file,
            map: None,
            len: 0,
        })
    }

    fn remap(file: &File, len: u64) -> Result<Option<MmapMut>> {
        if len == 0 {
            return Ok(None);
        }
        // Safety: the file is exclusively locked (or shared for read-only)
        // for the lifetime of this `FileDevice`, and nothing else in this
        // process maps it.
        let map = unsafe { MmapMut::map_mut(file)? };
        Ok(Some(map))
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn read(&mut self, off: u64, buf: &mut [u8]) -> Result<()> {
        let end = off
            .checked_add(buf.len() as u64)
            .ok_or(Error::InvalidParameter("read range overflow"))?;
        if end > self.len {
            return Err(Error::ShortRead {
                expected: buf.len(),
                got: self.len.saturating_sub(off) as usize,
            });
        }
        let map = self.map.as_ref().expect("mapped file for non-empty len");
        buf.copy_from_slice(&map[off as usize..end as usize]);
        Ok(())
    }

    pub fn write(&mut self, off: u64, buf: &[u8]) -> Result<()> {
        let end = off
            .checked_add(buf.len() as u64)
            .ok_or(Error::InvalidParameter("write range overflow"))?;
        if end > self.len {
            return Err(Error::ShortWrite {
                expected: buf.len(),
                got: self.len.saturating_sub(off) as usize,
            });
        }
        let map = self.map.as_mut().expect("mapped file for non-empty len");
        map[off as usize..end as usize].copy_from_slice(buf);
        Ok(())
    }

    pub fn extend(&mut self, len: u64) -> Result<u64> {
        let start = self.len;
        let new_len = start + len;
        self.file.set_len(new_len)?;
        self.file.sync_all()?;
        self.map = Self::remap(&self.file, new_len)?;
        self.len = new_len;
        Ok(start)
    }

    pub fn flush(&mut self) -> Result<()> {
        if let Some(map) = self.map.as_ref() {
            map.flush()?;
        }
        Ok(())
    }
}

/// Anonymous, in-process backing store. Cannot be named by a path and so
/// can never be reopened.
pub(crate) struct MemoryDevice {
    buf: Vec<u8>,
}

impl MemoryDevice {
    pub fn new() -> Self {
        Self { buf: Vec::new() }
    }

    pub fn len(&self) -> u64 {
        self.buf.len() as u64
    }

    pub fn read(&mut self, off: u64, buf: &mut [u8]) -> Result<()> {
        let off = off as usize;
        let end = off
            .checked_add(buf.len())
            .ok_or(Error::InvalidParameter("read range overflow"))?;
        if end > self.buf.len() {
            return Err(Error::ShortRead {
                expected: buf.len(),
                got: self.buf.len().saturating_sub(off),
            });
        }
        buf.copy_from_slice(&self.buf[off..end]);
        Ok(())
    }

    pub fn write(&mut self, off: u64, buf: &[u8]) -> Result<()> {
        let off = off as usize;
        let end = off
            .checked_add(buf.len())
            .ok_or(Error::InvalidParameter("write range overflow"))?;
        if end > self.buf.len() {
            return Err(Error::ShortWrite {
                expected: buf.len(),
                got: self.buf.len().saturating_sub(off),
            });
        }
        self.buf[off..end].copy_from_slice(buf);
        Ok(())
    }

    pub fn extend(&mut self, len: u64) -> Result<u64> {
        let start = self.buf.len() as u64;
        self.buf.resize(self.buf.len() + len as usize, 0);
        Ok(start)
    }
}

/// Trait extension so `mode` only applies on unix; elsewhere it is ignored.
trait OpenOptionsModeExt {
    fn mode_or_ignore(&mut self, mode: u32) -> &mut Self;
}

impl OpenOptionsModeExt for FsOpenOptions {
    #[cfg(unix)]
    fn mode_or_ignore(&mut self, mode: u32) -> &mut Self {
        use std::os::unix::fs::OpenOptionsExt;
        self.mode(mode)
    }

    #[cfg(not(unix))]
    fn mode_or_ignore(&mut self, _mode: u32) -> &mut Self {
        self
    }
}
