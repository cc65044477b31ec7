//! Offline extraction of Panasonic DVD/HDD recorder media.
//!
//! Three read-only container parsers share this crate: the MEIHDFS
//! filesystem found on recorder hard disks, the DVD-VR IFO/VRO pair of
//! recordable DVDs, and the loosely-conforming UDF variant on
//! Panasonic-authored discs. Each exposes a virtual directory tree (or
//! program list) that the extraction code streams to the host
//! filesystem, preserving recorded modification times.

pub mod cache;
pub mod device;
pub mod ifo;
pub mod meihdfs;
pub mod meihdfs_parser;
pub mod mpeg2;
pub mod sink;
pub mod udf;
pub mod udf_crc;
pub mod udf_parser;
pub mod vro;
