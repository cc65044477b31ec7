use std::io::{self, Read, Seek, SeekFrom};

use log::warn;

/// Granularity of single-sector error recovery.
pub const SECTOR_SIZE: usize = 512;

/// Random-access reader over a (possibly >4 GiB) disk image.
///
/// With `single_sector` set, large reads are performed one 512-byte sector
/// at a time and a sector that fails at the OS level is replaced by zeros,
/// so that a scratched or dying source disk loses the minimal amount of
/// data. Recorders store video in huge extents, so one bad sector rarely
/// matters.
#[derive(Debug)]
pub struct ImageReader<R: Read + Seek> {
    reader: R,
    single_sector: bool,
}

impl<R: Read + Seek> ImageReader<R> {
    pub fn new(reader: R) -> Self {
        Self::with_recovery(reader, false)
    }

    pub fn with_recovery(reader: R, single_sector: bool) -> Self {
        Self {
            reader,
            single_sector,
        }
    }

    pub fn recovery_enabled(&self) -> bool {
        self.single_sector
    }

    pub fn seek_to(&mut self, pos: u64) -> io::Result<()> {
        self.reader.seek(SeekFrom::Start(pos))?;
        Ok(())
    }

    pub fn stream_position(&mut self) -> io::Result<u64> {
        self.reader.stream_position()
    }

    pub fn read_exact(&mut self, buf: &mut [u8]) -> io::Result<()> {
        self.reader.read_exact(buf)
    }

    /// Positioned convenience read.
    pub fn read_exact_at(&mut self, pos: u64, buf: &mut [u8]) -> io::Result<()> {
        self.seek_to(pos)?;
        self.read_exact(buf)
    }

    /// Like [`read_exact`], but when recovery mode is on, any failing
    /// 512-byte sector is zero-filled and skipped instead of aborting the
    /// read. The trailing partial sector (and any read shorter than one
    /// sector) is passed through unmodified. A failing re-seek past a bad
    /// sector is not recoverable.
    ///
    /// On return the cursor is one position past the bytes delivered,
    /// whether they came from the disk or from zero-fill.
    ///
    /// [`read_exact`]: ImageReader::read_exact
    pub fn read_recoverable(&mut self, buf: &mut [u8]) -> io::Result<()> {
        if !self.single_sector {
            return self.read_exact(buf);
        }

        let mut start = self.reader.stream_position()?;
        let mut remaining = buf.len();
        let mut filled = 0usize;
        while remaining > SECTOR_SIZE {
            let sector = &mut buf[filled..filled + SECTOR_SIZE];
            if let Err(err) = self.reader.read_exact(sector) {
                warn!(
                    "error reading physical block {}: {} - padding with zero",
                    start / SECTOR_SIZE as u64,
                    err
                );
                sector.fill(0);
                // move to next sector
                self.reader
                    .seek(SeekFrom::Start(start + SECTOR_SIZE as u64))?;
            }
            start += SECTOR_SIZE as u64;
            filled += SECTOR_SIZE;
            remaining -= SECTOR_SIZE;
        }

        self.reader.read_exact(&mut buf[filled..])
    }
}
