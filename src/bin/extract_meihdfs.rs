use std::fs::File;
use std::path::PathBuf;

use clap::Parser;
use panarec::device::ImageReader;
use panarec::meihdfs_parser::{Meihdfs, Result};
use panarec::sink;

#[derive(Parser, Debug)]
#[command(version, about = "Extract files from a Panasonic MEIHDFS recorder hard-disk image")]
struct Args {
    /// Offset where to start searching for the header, e.g. 0xA4000000
    #[arg(short = 's', long = "start", value_parser = parse_offset, default_value = "0")]
    start: u64,

    /// Single sector recovery mode: zero-pad unreadable sectors and
    /// continue instead of aborting
    #[arg(short = 'r', long = "recover")]
    recover: bool,

    /// The disk image (or block device) to read
    image: PathBuf,

    /// Output directory; without it the filesystem is only listed
    output: Option<PathBuf>,
}

fn parse_offset(s: &str) -> std::result::Result<u64, String> {
    let parsed = if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u64::from_str_radix(hex, 16)
    } else {
        s.parse()
    };
    parsed.map_err(|e| format!("invalid offset {s:?}: {e}"))
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();
    let file = File::open(&args.image)?;
    let image = ImageReader::with_recovery(file, args.recover);
    let mut fs = Meihdfs::open(image, args.start)?;
    match &args.output {
        Some(dir) => {
            sink::create_dir(dir)?;
            fs.extract_to(dir)
        }
        None => fs.list(),
    }
}
