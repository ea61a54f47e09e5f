use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use simfs::storage::ImageFile;

#[derive(Parser)]
struct Args {
    /// Image file to check
    image: PathBuf,
}

fn main() -> Result<()> {
    env_logger::init();

    let args = Args::parse();

    let image = ImageFile::new(args.image);
    let fs = image.read()?;

    println!("{}: {}", image.path().display(), fs.usage());

    Ok(())
}
