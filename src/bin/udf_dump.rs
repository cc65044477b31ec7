use std::fs::File;
use std::path::PathBuf;

use clap::Parser;
use panarec::sink;
use panarec::udf_parser::{Result, Udf};

#[derive(Parser, Debug)]
#[command(version, about = "List or extract the contents of a Panasonic-authored UDF image")]
struct Args {
    /// The UDF disc image to read
    image: PathBuf,

    /// Output directory; without it the filesystem is only listed
    output: Option<PathBuf>,
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();
    let file = File::open(&args.image)?;
    let mut udf = Udf::open(file)?;
    match &args.output {
        Some(dir) => {
            sink::create_dir(dir)?;
            udf.extract_to(dir)
        }
        None => udf.list(),
    }
}
