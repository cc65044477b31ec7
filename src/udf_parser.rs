use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;

use log::{debug, error, info, warn};
use thiserror::Error;

use crate::cache::BlockCache;
use crate::sink;
use crate::udf::{
    DescriptorTag, FileEntry, FileIdentifierDescriptor, FileSetDescriptor, UDF_BLOCKSIZE,
};
use crate::udf_crc::descriptor_crc;

#[derive(Error, Debug)]
pub enum UdfError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("no File Set Descriptor found (last probed offset {last_offset:#x})")]
    HeaderNotFound { last_offset: u64 },
    #[error("invalid descriptor tag @sector {sector}")]
    InvalidDescriptorTag { sector: u32 },
    #[error("entry has no data extent")]
    MissingExtent,
}

pub type Result<T> = std::result::Result<T, UdfError>;

/// Stride of the File Set Descriptor search.
const FSD_STRIDE: u64 = 0x10000;
/// Metadata cache size in blocks.
const CACHE_BLOCKS: usize = 64;

/// A directory entry resolved to its File Entry.
#[derive(Debug, Clone)]
pub struct UdfDirent {
    pub name: String,
    pub is_dir: bool,
    pub is_parent: bool,
    pub fe: FileEntry,
}

impl UdfDirent {
    pub fn file_length(&self) -> u64 {
        self.fe.information_length
    }

    pub fn modification_time(&self) -> Option<i64> {
        self.fe.modification_time.to_unix()
    }
}

/// Reader for the UDF variant found on Panasonic-authored discs and
/// recorder partitions. There is no usable anchor volume descriptor
/// chain on these; the File Set Descriptor is located by scanning.
#[derive(Debug)]
pub struct Udf<R: Read + Seek> {
    cache: BlockCache<R, UDF_BLOCKSIZE>,
    part_start: u32,
}

impl<R: Read + Seek> Udf<R> {
    /// Scan 64 KiB strides for a valid File Set Descriptor; the sector
    /// holding it is the partition start.
    pub fn open(mut reader: R) -> Result<Self> {
        let mut offset = 0u64;
        let mut tag = [0u8; DescriptorTag::LEN];
        loop {
            reader.seek(SeekFrom::Start(offset))?;
            match reader.read_exact(&mut tag) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                    return Err(UdfError::HeaderNotFound {
                        last_offset: offset,
                    });
                }
                Err(e) => return Err(e.into()),
            }
            debug!("searching UDF File Set Descriptor @{:#010x}", offset);
            if DescriptorTag::check(&tag, DescriptorTag::TAGID_FSD) {
                let part_start = (offset / UDF_BLOCKSIZE as u64) as u32;
                info!("File Set Descriptor @{:#x}, partition start sector {}", offset, part_start);
                return Ok(Self {
                    cache: BlockCache::new(reader, CACHE_BLOCKS),
                    part_start,
                });
            }
            offset += FSD_STRIDE;
        }
    }

    pub fn partition_start(&self) -> u32 {
        self.part_start
    }

    /// One metadata sector through the cache, absolute within the
    /// partition.
    fn read_metadata_sector(&mut self, lba: u32) -> Result<Vec<u8>> {
        let sector = self.part_start as u64 + lba as u64;
        Ok(self.cache.read_block(sector)?.to_vec())
    }

    /// Validate a metadata block's tag. The 8-bit checksum decides;
    /// the descriptor CRC only warns, since Panasonic-authored discs
    /// get it wrong in places.
    fn checked_sector(&mut self, lba: u32, tag_identifier: u16) -> Result<Vec<u8>> {
        let block = self.read_metadata_sector(lba)?;
        if !DescriptorTag::check(&block, tag_identifier) {
            return Err(UdfError::InvalidDescriptorTag {
                sector: self.part_start + lba,
            });
        }
        let tag = DescriptorTag::read(&block);
        let crc_end = DescriptorTag::LEN + tag.descriptor_crc_length as usize;
        if tag.descriptor_crc_length > 0 && crc_end <= block.len() {
            let crc = descriptor_crc(&block[DescriptorTag::LEN..crc_end]);
            if crc != tag.descriptor_crc {
                warn!(
                    "descriptor CRC mismatch @sector {} (recorded {:#06x}, computed {:#06x})",
                    self.part_start + lba,
                    tag.descriptor_crc,
                    crc
                );
            }
        }
        Ok(block)
    }

    /// The root directory from the File Set Descriptor.
    pub fn root(&mut self) -> Result<UdfDirent> {
        let fsd_block = self.checked_sector(0, DescriptorTag::TAGID_FSD)?;
        let fsd = FileSetDescriptor::read(&fsd_block);
        let root_lba = fsd.root_directory_icb.extent_location.logical_block_number;
        debug!("root directory ICB at lba {}", root_lba);
        let fe_block = self.checked_sector(root_lba, DescriptorTag::TAGID_FILE_ENTRY)?;
        Ok(UdfDirent {
            name: String::new(),
            is_dir: true,
            is_parent: false,
            fe: FileEntry::read(&fe_block),
        })
    }

    /// All entries of a directory, resolved through their File Entries.
    /// Entries whose File Entry carries no allocation descriptor are the
    /// empty stubs Panasonic writes and are skipped transparently.
    pub fn read_dir(&mut self, dir: &UdfDirent) -> Result<Vec<UdfDirent>> {
        let extent = dir.fe.first_extent().ok_or(UdfError::MissingExtent)?;
        let start_lba = extent.start_lba();
        let sectors = (extent.length_bytes().saturating_sub(1) as u64 / UDF_BLOCKSIZE as u64) + 1;
        let mut buf = vec![0u8; (sectors as usize) * UDF_BLOCKSIZE];
        for i in 0..sectors {
            let block = self.read_metadata_sector(start_lba + i as u32)?;
            buf[i as usize * UDF_BLOCKSIZE..(i as usize + 1) * UDF_BLOCKSIZE]
                .copy_from_slice(&block);
        }

        let mut entries = Vec::new();
        let mut pos = 0usize;
        let mut dir_left = dir.fe.information_length;
        while dir_left > 0 && pos + FileIdentifierDescriptor::FIXED_LEN <= buf.len() {
            if !DescriptorTag::check(&buf[pos..], DescriptorTag::TAGID_FID) {
                // an unrecorded block ends the directory; anything else
                // is a quirk worth knowing about
                if buf[pos..pos + 2] != [0, 0] {
                    warn!(
                        "directory at lba {} has a non-FID tag at byte {}, stopping",
                        start_lba, pos
                    );
                }
                break;
            }
            let fid = FileIdentifierDescriptor::read(&buf[pos..]);
            let advance = fid.aligned_len();
            pos += advance;
            dir_left = dir_left.saturating_sub(advance as u64);

            let fe_block =
                self.read_metadata_sector(fid.icb.extent_location.logical_block_number)?;
            let fe = FileEntry::read(&fe_block);
            if fe.i_alloc_descs == 0 {
                debug!("skipping zero-length stub entry {:?}", fid.name());
                continue;
            }
            entries.push(UdfDirent {
                name: fid.name(),
                is_dir: fid.is_directory(),
                is_parent: fid.is_parent(),
                fe,
            });
        }
        Ok(entries)
    }

    /// Stream a file's data, one 2048-byte block at a time, truncating
    /// the final block to the recorded length. Returns the bytes
    /// written.
    pub fn extract_file<W: Write>(&mut self, dirent: &UdfDirent, out: &mut W) -> Result<u64> {
        let extent = dirent.fe.first_extent().ok_or(UdfError::MissingExtent)?;
        let length = dirent.fe.information_length;
        let blocks = length.div_ceil(UDF_BLOCKSIZE as u64);
        let start = self.part_start as u64 + extent.start_lba() as u64;

        let reader = self.cache.get_mut();
        let mut block = [0u8; UDF_BLOCKSIZE];
        let mut remain = length;
        for i in 0..blocks {
            reader.seek(SeekFrom::Start((start + i) * UDF_BLOCKSIZE as u64))?;
            reader.read_exact(&mut block)?;
            let n = remain.min(UDF_BLOCKSIZE as u64) as usize;
            out.write_all(&block[..n])?;
            remain -= n as u64;
        }
        Ok(length - remain)
    }

    /// List every file to stdout without writing anything.
    pub fn list(&mut self) -> Result<()> {
        let root = self.root()?;
        self.walk(&root, Path::new("."), true)
    }

    /// Mirror the directory tree under `outdir`.
    pub fn extract_to(&mut self, outdir: &Path) -> Result<()> {
        let root = self.root()?;
        self.walk(&root, outdir, false)
    }

    fn walk(&mut self, dir: &UdfDirent, out: &Path, list: bool) -> Result<()> {
        for entry in self.read_dir(dir)? {
            if entry.is_parent {
                continue;
            }
            let path = out.join(&entry.name);
            if entry.is_dir {
                if !list {
                    sink::create_dir(&path)?;
                }
                if let Err(e) = self.walk(&entry, &path, list) {
                    error!("abandoning directory {}: {}", path.display(), e);
                }
                if !list {
                    if let Some(mtime) = entry.modification_time() {
                        if let Err(e) = sink::set_file_times(&path, mtime) {
                            warn!("cannot set times on {}: {}", path.display(), e);
                        }
                    }
                }
            } else {
                self.emit_file(&entry, &path, list);
            }
        }
        Ok(())
    }

    fn emit_file(&mut self, entry: &UdfDirent, path: &Path, list: bool) {
        let mtime = entry.modification_time();
        println!(
            "{}",
            sink::format_list_line(mtime.unwrap_or(0), entry.file_length(), path)
        );
        if list {
            return;
        }
        if let Some(mtime) = mtime {
            if sink::already_dumped(path, mtime, entry.file_length()) {
                info!("skipping previously dumped file {}", path.display());
                return;
            }
        }
        let result = (|| -> Result<()> {
            let mut file = sink::create_file(path)?;
            self.extract_file(entry, &mut file)?;
            Ok(())
        })();
        if let Err(e) = result {
            error!("error dumping {}: {}", path.display(), e);
            return;
        }
        if let Some(mtime) = mtime {
            if let Err(e) = sink::set_file_times(path, mtime) {
                warn!("cannot set times on {}: {}", path.display(), e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::udf::{IcbTag, LbAddr, LongAd, Timestamp};
    use std::fs;
    use std::io::Cursor;
    use std::path::PathBuf;

    const FSD_OFFSET: u64 = 0x30000;
    const PART_START: u32 = (FSD_OFFSET / UDF_BLOCKSIZE as u64) as u32;

    fn finish_tag(block: &mut [u8], tag_identifier: u16, crc_len: u16) {
        block[0..2].copy_from_slice(&tag_identifier.to_le_bytes());
        block[2..4].copy_from_slice(&2u16.to_le_bytes()); // version
        block[10..12].copy_from_slice(&crc_len.to_le_bytes());
        let crc = descriptor_crc(&block[16..16 + crc_len as usize]);
        block[8..10].copy_from_slice(&crc.to_le_bytes());
        block[4] = DescriptorTag::compute_checksum(&block[..16]);
    }

    fn build_fsd(root_lba: u32) -> Vec<u8> {
        let mut block = vec![0u8; UDF_BLOCKSIZE];
        let icb = LongAd {
            extent_length_and_type: UDF_BLOCKSIZE as u32,
            extent_location: LbAddr {
                logical_block_number: root_lba,
                partition_reference_number: 0,
            },
            implementation_use: [0; 6],
        };
        icb.write(&mut block[400..416]);
        finish_tag(&mut block, DescriptorTag::TAGID_FSD, 496);
        block
    }

    fn build_file_entry(
        file_type: u8,
        information_length: u64,
        data_lba: u32,
        extent_len: u32,
        mtime: Option<&Timestamp>,
    ) -> Vec<u8> {
        let mut block = vec![0u8; UDF_BLOCKSIZE];
        let icb_tag = IcbTag {
            strategy_type: 4,
            file_type,
            // short allocation descriptors
            flags: IcbTag::AD_SHORT,
            ..Default::default()
        };
        icb_tag.write(&mut block[16..36]);
        block[56..64].copy_from_slice(&information_length.to_le_bytes());
        if let Some(ts) = mtime {
            ts.write(&mut block[84..96]);
        }
        if extent_len > 0 {
            block[172..176].copy_from_slice(&8u32.to_le_bytes());
            block[176..180].copy_from_slice(&extent_len.to_le_bytes());
            block[180..184].copy_from_slice(&data_lba.to_le_bytes());
        }
        finish_tag(&mut block, DescriptorTag::TAGID_FILE_ENTRY, 496);
        block
    }

    fn put_fid(buf: &mut [u8], at: usize, name: &str, characteristics: u8, icb_lba: u32) -> usize {
        let id: Vec<u8> = if name.is_empty() {
            vec![]
        } else {
            let mut v = vec![8u8];
            v.extend_from_slice(name.as_bytes());
            v
        };
        let record = &mut buf[at..];
        record[16..18].copy_from_slice(&1u16.to_le_bytes());
        record[18] = characteristics;
        record[19] = id.len() as u8;
        let icb = LongAd {
            extent_length_and_type: UDF_BLOCKSIZE as u32,
            extent_location: LbAddr {
                logical_block_number: icb_lba,
                partition_reference_number: 0,
            },
            implementation_use: [0; 6],
        };
        icb.write(&mut record[20..36]);
        record[38..38 + id.len()].copy_from_slice(&id);
        let len = 38 + id.len();
        let crc_len = (len - 16) as u16;
        finish_tag(record, DescriptorTag::TAGID_FID, crc_len);
        (len + 3) & !3
    }

    fn sector(lba: u32) -> usize {
        (PART_START + lba) as usize * UDF_BLOCKSIZE
    }

    /// FSD at 0x30000; root listing file A (4096 bytes), directory B
    /// (with one empty subdir listing), and an alloc-less stub entry.
    fn build_image() -> Vec<u8> {
        let mut image = vec![0u8; sector(40) + UDF_BLOCKSIZE];

        image[sector(0)..sector(0) + UDF_BLOCKSIZE].copy_from_slice(&build_fsd(2));

        // root directory FIDs at lba 5
        let mut dir = vec![0u8; UDF_BLOCKSIZE];
        let mut at = 0;
        at += put_fid(&mut dir, at, "", FileIdentifierDescriptor::CHAR_PARENT
            | FileIdentifierDescriptor::CHAR_DIRECTORY, 2);
        at += put_fid(&mut dir, at, "A", 0, 10);
        at += put_fid(&mut dir, at, "STUB", 0, 12);
        at += put_fid(&mut dir, at, "B", FileIdentifierDescriptor::CHAR_DIRECTORY, 11);
        let root_dir_len = at as u64;
        image[sector(5)..sector(5) + UDF_BLOCKSIZE].copy_from_slice(&dir);

        // root FE at lba 2
        let root_fe = build_file_entry(IcbTag::FILE_TYPE_DIRECTORY, root_dir_len, 5, UDF_BLOCKSIZE as u32, None);
        image[sector(2)..sector(2) + UDF_BLOCKSIZE].copy_from_slice(&root_fe);

        // file A: 4096 bytes at lba 20
        let mtime = Timestamp {
            type_and_timezone: 0x1000,
            year: 2010,
            month: 3,
            day: 1,
            hour: 8,
            minute: 0,
            second: 0,
            ..Default::default()
        };
        let fe_a = build_file_entry(5, 4096, 20, 4096, Some(&mtime));
        image[sector(10)..sector(10) + UDF_BLOCKSIZE].copy_from_slice(&fe_a);
        for i in 0..4096usize {
            image[sector(20) + i] = (i % 199) as u8;
        }

        // stub: sized but no allocation descriptors
        let fe_stub = build_file_entry(5, 123, 0, 0, None);
        image[sector(12)..sector(12) + UDF_BLOCKSIZE].copy_from_slice(&fe_stub);

        // directory B: one parent FID at lba 30
        let mut b_dir = vec![0u8; UDF_BLOCKSIZE];
        let b_len = put_fid(&mut b_dir, 0, "", FileIdentifierDescriptor::CHAR_PARENT
            | FileIdentifierDescriptor::CHAR_DIRECTORY, 2) as u64;
        image[sector(30)..sector(30) + UDF_BLOCKSIZE].copy_from_slice(&b_dir);
        let fe_b = build_file_entry(IcbTag::FILE_TYPE_DIRECTORY, b_len, 30, UDF_BLOCKSIZE as u32, None);
        image[sector(11)..sector(11) + UDF_BLOCKSIZE].copy_from_slice(&fe_b);

        image
    }

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("panarec-udf-{}-{}", std::process::id(), name));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn fsd_scan_finds_partition_start() {
        let udf = Udf::open(Cursor::new(build_image())).unwrap();
        assert_eq!(udf.partition_start(), PART_START);
    }

    #[test]
    fn missing_fsd_reports_last_offset() {
        let err = Udf::open(Cursor::new(vec![0u8; 0x20000])).unwrap_err();
        assert!(matches!(
            err,
            UdfError::HeaderNotFound {
                last_offset: 0x20000
            }
        ));
    }

    #[test]
    fn read_dir_skips_stub_entries() {
        let mut udf = Udf::open(Cursor::new(build_image())).unwrap();
        let root = udf.root().unwrap();
        assert!(root.is_dir);
        let entries = udf.read_dir(&root).unwrap();
        let names: Vec<&str> = entries
            .iter()
            .filter(|e| !e.is_parent)
            .map(|e| e.name.as_str())
            .collect();
        assert_eq!(names, vec!["A", "B"]);
        assert!(!entries.iter().any(|e| e.name == "STUB"));
        let a = entries.iter().find(|e| e.name == "A").unwrap();
        assert!(!a.is_dir);
        assert_eq!(a.file_length(), 4096);
        assert!(entries.iter().find(|e| e.name == "B").unwrap().is_dir);
    }

    #[test]
    fn extract_file_truncates_to_length() {
        let mut udf = Udf::open(Cursor::new(build_image())).unwrap();
        let root = udf.root().unwrap();
        let entries = udf.read_dir(&root).unwrap();
        let a = entries.iter().find(|e| e.name == "A").unwrap();
        let mut out = Vec::new();
        let written = udf.extract_file(a, &mut out).unwrap();
        assert_eq!(written, 4096);
        assert!(out.iter().enumerate().all(|(i, &b)| b == (i % 199) as u8));
    }

    #[test]
    fn extract_to_mirrors_tree() {
        let out = scratch_dir("tree");
        let mut udf = Udf::open(Cursor::new(build_image())).unwrap();
        udf.extract_to(&out).unwrap();
        let a = fs::read(out.join("A")).unwrap();
        assert_eq!(a.len(), 4096);
        assert!(out.join("B").is_dir());
        assert!(!out.join("STUB").exists());
        // mtime applied from the File Entry
        let meta = fs::metadata(out.join("A")).unwrap();
        let expected = Timestamp {
            type_and_timezone: 0x1000,
            year: 2010,
            month: 3,
            day: 1,
            hour: 8,
            minute: 0,
            second: 0,
            ..Default::default()
        }
        .to_unix()
        .unwrap();
        assert_eq!(meta.modified().unwrap(), sink::unix_time(expected));
        fs::remove_dir_all(&out).unwrap();
    }

    #[test]
    fn fid_walk_is_total_over_the_record_length() {
        let mut dir = vec![0u8; UDF_BLOCKSIZE];
        let mut at = 0;
        for name in ["ONE", "TWO", "THREE"] {
            at += put_fid(&mut dir, at, name, 0, 10);
        }
        // walker must consume exactly the aligned record lengths
        let mut total = 0usize;
        let mut pos = 0usize;
        let mut seen = Vec::new();
        while pos < at {
            assert!(DescriptorTag::check(&dir[pos..], DescriptorTag::TAGID_FID));
            let fid = FileIdentifierDescriptor::read(&dir[pos..]);
            seen.push(fid.name());
            total += fid.aligned_len();
            pos += fid.aligned_len();
        }
        assert_eq!(total, at);
        assert_eq!(seen, vec!["ONE", "TWO", "THREE"]);
    }
}
