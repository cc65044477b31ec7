//! ECMA-167 structures in the profile Panasonic recorders actually
//! write. This is deliberately not a complete UDF implementation: the
//! discs skip or bend parts of the spec (no usable anchor chain, empty
//! file stubs in directories), so only the descriptors the extractor
//! needs are modelled.

use chrono::NaiveDate;
use static_assertions::assert_eq_size;

/// Logical block size of the medium.
pub const UDF_BLOCKSIZE: usize = 2048;

fn le16(bytes: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes(bytes[offset..offset + 2].try_into().unwrap())
}

fn le32(bytes: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes(bytes[offset..offset + 4].try_into().unwrap())
}

fn le64(bytes: &[u8], offset: usize) -> u64 {
    u64::from_le_bytes(bytes[offset..offset + 8].try_into().unwrap())
}

/// ECMA-167 3/7.2 Descriptor Tag, the 16-byte header of every
/// descriptor.
#[derive(Default, Debug, Clone, PartialEq)]
#[repr(C)]
pub struct DescriptorTag {
    pub tag_identifier: u16,
    pub descriptor_version: u16,
    pub tag_checksum: u8,
    pub reserved: u8,
    pub tag_serial_number: u16,
    pub descriptor_crc: u16,
    pub descriptor_crc_length: u16,
    pub tag_location: u32,
}
assert_eq_size!(DescriptorTag, [u8; 16]);

impl DescriptorTag {
    pub const LEN: usize = 16;

    /// File Set Descriptor.
    pub const TAGID_FSD: u16 = 256;
    /// File Identifier Descriptor.
    pub const TAGID_FID: u16 = 257;
    /// File Entry.
    pub const TAGID_FILE_ENTRY: u16 = 261;
    /// Terminating Descriptor.
    pub const TAGID_TERMINATING: u16 = 8;

    pub fn read(bytes: &[u8]) -> Self {
        Self {
            tag_identifier: le16(bytes, 0),
            descriptor_version: le16(bytes, 2),
            tag_checksum: bytes[4],
            reserved: bytes[5],
            tag_serial_number: le16(bytes, 6),
            descriptor_crc: le16(bytes, 8),
            descriptor_crc_length: le16(bytes, 10),
            tag_location: le32(bytes, 12),
        }
    }

    pub fn write(&self, bytes: &mut [u8]) {
        bytes[0..2].copy_from_slice(&self.tag_identifier.to_le_bytes());
        bytes[2..4].copy_from_slice(&self.descriptor_version.to_le_bytes());
        bytes[4] = self.tag_checksum;
        bytes[5] = self.reserved;
        bytes[6..8].copy_from_slice(&self.tag_serial_number.to_le_bytes());
        bytes[8..10].copy_from_slice(&self.descriptor_crc.to_le_bytes());
        bytes[10..12].copy_from_slice(&self.descriptor_crc_length.to_le_bytes());
        bytes[12..16].copy_from_slice(&self.tag_location.to_le_bytes());
    }

    /// ECMA-167 7.2.3: sum modulo 256 of tag bytes 0-3 and 5-15.
    pub fn compute_checksum(tag_bytes: &[u8]) -> u8 {
        tag_bytes[0..4]
            .iter()
            .chain(&tag_bytes[5..16])
            .fold(0u8, |acc, &b| acc.wrapping_add(b))
    }

    /// Id-and-checksum validation of a raw tag. Matches what the
    /// recorders themselves verify; the descriptor CRC is checked
    /// separately and leniently.
    pub fn check(tag_bytes: &[u8], tag_identifier: u16) -> bool {
        tag_bytes.len() >= Self::LEN
            && le16(tag_bytes, 0) == tag_identifier
            && Self::compute_checksum(tag_bytes) == tag_bytes[4]
    }
}

/// ECMA-167 1/7.3 timestamp.
#[derive(Default, Debug, Clone, PartialEq)]
#[repr(C)]
pub struct Timestamp {
    pub type_and_timezone: u16,
    pub year: u16,
    pub month: u8,
    pub day: u8,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
    pub centiseconds: u8,
    pub hundreds_of_microseconds: u8,
    pub microseconds: u8,
}
assert_eq_size!(Timestamp, [u8; 12]);

impl Timestamp {
    pub const LEN: usize = 12;

    pub fn read(bytes: &[u8]) -> Self {
        Self {
            type_and_timezone: le16(bytes, 0),
            year: le16(bytes, 2),
            month: bytes[4],
            day: bytes[5],
            hour: bytes[6],
            minute: bytes[7],
            second: bytes[8],
            centiseconds: bytes[9],
            hundreds_of_microseconds: bytes[10],
            microseconds: bytes[11],
        }
    }

    pub fn write(&self, bytes: &mut [u8]) {
        bytes[0..2].copy_from_slice(&self.type_and_timezone.to_le_bytes());
        bytes[2..4].copy_from_slice(&self.year.to_le_bytes());
        bytes[4] = self.month;
        bytes[5] = self.day;
        bytes[6] = self.hour;
        bytes[7] = self.minute;
        bytes[8] = self.second;
        bytes[9] = self.centiseconds;
        bytes[10] = self.hundreds_of_microseconds;
        bytes[11] = self.microseconds;
    }

    /// Seconds since the UNIX epoch, honouring the recorded timezone
    /// offset when one is present. `None` for nonsense dates.
    pub fn to_unix(&self) -> Option<i64> {
        let date = NaiveDate::from_ymd_opt(self.year as i32, self.month as u32, self.day as u32)?
            .and_hms_opt(self.hour as u32, self.minute as u32, self.second as u32)?;
        let mut secs = date.and_utc().timestamp();
        let tz_type = self.type_and_timezone >> 12;
        let mut offset_minutes = (self.type_and_timezone & 0x0FFF) as i32;
        if offset_minutes > 0x7FF {
            offset_minutes -= 0x1000;
        }
        // -2047 marks "no timezone recorded"
        if tz_type == 1 && offset_minutes != -2047 {
            secs -= offset_minutes as i64 * 60;
        }
        Some(secs)
    }
}

/// ECMA-167 4/7.1 recorded address.
#[derive(Default, Debug, Clone, Copy, PartialEq)]
pub struct LbAddr {
    pub logical_block_number: u32,
    pub partition_reference_number: u16,
}

impl LbAddr {
    pub const LEN: usize = 6;

    pub fn read(bytes: &[u8]) -> Self {
        Self {
            logical_block_number: le32(bytes, 0),
            partition_reference_number: le16(bytes, 4),
        }
    }

    pub fn write(&self, bytes: &mut [u8]) {
        bytes[0..4].copy_from_slice(&self.logical_block_number.to_le_bytes());
        bytes[4..6].copy_from_slice(&self.partition_reference_number.to_le_bytes());
    }
}

/// ECMA-167 4/14.14.2 long allocation descriptor.
#[derive(Default, Debug, Clone, Copy, PartialEq)]
pub struct LongAd {
    pub extent_length_and_type: u32,
    pub extent_location: LbAddr,
    pub implementation_use: [u8; 6],
}

impl LongAd {
    pub const LEN: usize = 16;

    pub fn read(bytes: &[u8]) -> Self {
        let mut implementation_use = [0u8; 6];
        implementation_use.copy_from_slice(&bytes[10..16]);
        Self {
            extent_length_and_type: le32(bytes, 0),
            extent_location: LbAddr::read(&bytes[4..10]),
            implementation_use,
        }
    }

    pub fn write(&self, bytes: &mut [u8]) {
        bytes[0..4].copy_from_slice(&self.extent_length_and_type.to_le_bytes());
        self.extent_location.write(&mut bytes[4..10]);
        bytes[10..16].copy_from_slice(&self.implementation_use);
    }

    pub fn extent_length_bytes(&self) -> u32 {
        self.extent_length_and_type & 0x3FFF_FFFF
    }
}

/// ECMA-167 4/14.14.1 short allocation descriptor.
#[derive(Default, Debug, Clone, Copy, PartialEq)]
pub struct ShortAd {
    pub extent_length_and_type: u32,
    pub extent_position: u32,
}

impl ShortAd {
    pub const LEN: usize = 8;

    pub fn read(bytes: &[u8]) -> Self {
        Self {
            extent_length_and_type: le32(bytes, 0),
            extent_position: le32(bytes, 4),
        }
    }

    pub fn extent_length_bytes(&self) -> u32 {
        self.extent_length_and_type & 0x3FFF_FFFF
    }
}

/// ECMA-167 4/14.14.3 extended allocation descriptor (only the fields
/// the extractor dereferences).
#[derive(Default, Debug, Clone, Copy, PartialEq)]
pub struct ExtAd {
    pub extent_length_and_type: u32,
    pub recorded_length: u32,
    pub information_length: u32,
    pub extent_location: LbAddr,
}

impl ExtAd {
    pub const LEN: usize = 20;

    pub fn read(bytes: &[u8]) -> Self {
        Self {
            extent_length_and_type: le32(bytes, 0),
            recorded_length: le32(bytes, 4),
            information_length: le32(bytes, 8),
            extent_location: LbAddr::read(&bytes[12..18]),
        }
    }

    pub fn extent_length_bytes(&self) -> u32 {
        self.extent_length_and_type & 0x3FFF_FFFF
    }
}

/// ECMA-167 4/14.6 ICB tag.
#[derive(Default, Debug, Clone, PartialEq)]
pub struct IcbTag {
    pub prior_recorded_number_of_direct_entries: u32,
    pub strategy_type: u16,
    pub strategy_parameter: [u8; 2],
    pub maximum_number_of_entries: u16,
    pub reserved: u8,
    pub file_type: u8,
    pub parent_icb_location: LbAddr,
    pub flags: u16,
}

impl IcbTag {
    pub const LEN: usize = 20;

    pub const FILE_TYPE_DIRECTORY: u8 = 4;

    /// `flags & 7` selects the allocation descriptor shape.
    pub const AD_MASK: u16 = 0x0007;
    pub const AD_SHORT: u16 = 0;
    pub const AD_LONG: u16 = 1;
    pub const AD_EXTENDED: u16 = 2;

    pub fn read(bytes: &[u8]) -> Self {
        let mut strategy_parameter = [0u8; 2];
        strategy_parameter.copy_from_slice(&bytes[6..8]);
        Self {
            prior_recorded_number_of_direct_entries: le32(bytes, 0),
            strategy_type: le16(bytes, 4),
            strategy_parameter,
            maximum_number_of_entries: le16(bytes, 8),
            reserved: bytes[10],
            file_type: bytes[11],
            parent_icb_location: LbAddr::read(&bytes[12..18]),
            flags: le16(bytes, 18),
        }
    }

    pub fn write(&self, bytes: &mut [u8]) {
        bytes[0..4].copy_from_slice(&self.prior_recorded_number_of_direct_entries.to_le_bytes());
        bytes[4..6].copy_from_slice(&self.strategy_type.to_le_bytes());
        bytes[6..8].copy_from_slice(&self.strategy_parameter);
        bytes[8..10].copy_from_slice(&self.maximum_number_of_entries.to_le_bytes());
        bytes[10] = self.reserved;
        bytes[11] = self.file_type;
        self.parent_icb_location.write(&mut bytes[12..18]);
        bytes[18..20].copy_from_slice(&self.flags.to_le_bytes());
    }
}

/// ECMA-167 4/14.1 File Set Descriptor; the extractor only needs the
/// way to the root directory.
#[derive(Default, Debug, Clone)]
pub struct FileSetDescriptor {
    pub tag: DescriptorTag,
    pub recording_date_and_time: Timestamp,
    pub root_directory_icb: LongAd,
}

impl FileSetDescriptor {
    pub fn read(bytes: &[u8]) -> Self {
        Self {
            tag: DescriptorTag::read(&bytes[0..16]),
            recording_date_and_time: Timestamp::read(&bytes[16..28]),
            root_directory_icb: LongAd::read(&bytes[400..416]),
        }
    }
}

/// A decoded allocation descriptor, shape selected by
/// `icb_tag.flags & 7`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AllocationDescriptor {
    Short(ShortAd),
    Long(LongAd),
    Extended(ExtAd),
}

impl AllocationDescriptor {
    /// Start LBA within the current partition. The partition number of
    /// long/extended descriptors is ignored; Panasonic discs have a
    /// single partition.
    pub fn start_lba(&self) -> u32 {
        match self {
            AllocationDescriptor::Short(ad) => ad.extent_position,
            AllocationDescriptor::Long(ad) => ad.extent_location.logical_block_number,
            AllocationDescriptor::Extended(ad) => ad.extent_location.logical_block_number,
        }
    }

    pub fn length_bytes(&self) -> u32 {
        match self {
            AllocationDescriptor::Short(ad) => ad.extent_length_bytes(),
            AllocationDescriptor::Long(ad) => ad.extent_length_bytes(),
            AllocationDescriptor::Extended(ad) => ad.extent_length_bytes(),
        }
    }
}

/// ECMA-167 4/14.9 File Entry: the per-file metadata record.
#[derive(Default, Debug, Clone)]
pub struct FileEntry {
    pub tag: DescriptorTag,
    pub icb_tag: IcbTag,
    pub information_length: u64,
    pub logical_blocks_recorded: u64,
    pub access_time: Timestamp,
    pub modification_time: Timestamp,
    pub i_extended_attr: u32,
    pub i_alloc_descs: u32,
    /// Raw allocation descriptor area (past the extended attributes).
    pub allocation_descriptors: Vec<u8>,
}

impl FileEntry {
    /// Fixed part preceding extended attributes.
    pub const FIXED_LEN: usize = 176;

    pub fn read(bytes: &[u8]) -> Self {
        let i_extended_attr = le32(bytes, 168);
        let i_alloc_descs = le32(bytes, 172);
        let ad_start = Self::FIXED_LEN + i_extended_attr as usize;
        let ad_end = (ad_start + i_alloc_descs as usize).min(bytes.len());
        Self {
            tag: DescriptorTag::read(&bytes[0..16]),
            icb_tag: IcbTag::read(&bytes[16..36]),
            information_length: le64(bytes, 56),
            logical_blocks_recorded: le64(bytes, 64),
            access_time: Timestamp::read(&bytes[72..84]),
            modification_time: Timestamp::read(&bytes[84..96]),
            i_extended_attr,
            i_alloc_descs,
            allocation_descriptors: bytes[ad_start.min(bytes.len())..ad_end].to_vec(),
        }
    }

    pub fn is_directory(&self) -> bool {
        self.icb_tag.file_type == IcbTag::FILE_TYPE_DIRECTORY
    }

    /// Decode the first allocation descriptor per the ICB flags, or
    /// `None` for the empty stub entries Panasonic writes.
    pub fn first_extent(&self) -> Option<AllocationDescriptor> {
        if self.i_alloc_descs == 0 {
            return None;
        }
        let ad = &self.allocation_descriptors;
        match self.icb_tag.flags & IcbTag::AD_MASK {
            IcbTag::AD_SHORT if ad.len() >= ShortAd::LEN => {
                Some(AllocationDescriptor::Short(ShortAd::read(ad)))
            }
            IcbTag::AD_LONG if ad.len() >= LongAd::LEN => {
                Some(AllocationDescriptor::Long(LongAd::read(ad)))
            }
            IcbTag::AD_EXTENDED if ad.len() >= ExtAd::LEN => {
                Some(AllocationDescriptor::Extended(ExtAd::read(ad)))
            }
            _ => None,
        }
    }
}

/// ECMA-167 4/14.4 File Identifier Descriptor: one directory entry.
#[derive(Default, Debug, Clone)]
pub struct FileIdentifierDescriptor {
    pub tag: DescriptorTag,
    pub file_version_number: u16,
    pub file_characteristics: u8,
    pub i_file_id: u8,
    pub icb: LongAd,
    pub i_imp_use: u16,
    pub file_id: Vec<u8>,
}

impl FileIdentifierDescriptor {
    /// Fixed part before implementation use and the identifier.
    pub const FIXED_LEN: usize = 38;

    pub const CHAR_DIRECTORY: u8 = 0x02;
    pub const CHAR_DELETED: u8 = 0x04;
    pub const CHAR_PARENT: u8 = 0x08;

    pub fn read(bytes: &[u8]) -> Self {
        let i_file_id = bytes[19];
        let i_imp_use = le16(bytes, 36);
        let id_start = Self::FIXED_LEN + i_imp_use as usize;
        let id_end = (id_start + i_file_id as usize).min(bytes.len());
        Self {
            tag: DescriptorTag::read(&bytes[0..16]),
            file_version_number: le16(bytes, 16),
            file_characteristics: bytes[18],
            i_file_id,
            icb: LongAd::read(&bytes[20..36]),
            i_imp_use,
            file_id: bytes[id_start.min(bytes.len())..id_end].to_vec(),
        }
    }

    /// Record length including padding to the next 4-byte boundary.
    pub fn aligned_len(&self) -> usize {
        (Self::FIXED_LEN + self.i_imp_use as usize + self.i_file_id as usize + 3) & !3
    }

    pub fn is_directory(&self) -> bool {
        self.file_characteristics & Self::CHAR_DIRECTORY != 0
    }

    pub fn is_parent(&self) -> bool {
        self.file_characteristics & Self::CHAR_PARENT != 0
    }

    /// Decode the identifier by dropping the high byte of 16-bit
    /// characters (compression id 8 or 16). The discs only carry
    /// identifiers this crude decoding handles.
    pub fn name(&self) -> String {
        let data = &self.file_id;
        if data.is_empty() || (data[0] != 8 && data[0] != 16) {
            return String::new();
        }
        let mut out = Vec::new();
        let mut p = 1;
        while p < data.len() {
            if data[0] == 16 {
                p += 1; // skip MSB
                if p >= data.len() {
                    break;
                }
            }
            out.push(data[p]);
            p += 1;
        }
        String::from_utf8_lossy(&out).into_owned()
    }
}
