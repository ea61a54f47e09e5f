use std::io::{self, BufRead, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;

use simfs::config::{
    Limits, DEFAULT_MAX_DESCRIPTORS, DEFAULT_MAX_LINKS, DEFAULT_MAX_NAME_LEN,
    DEFAULT_MAX_SYMLINK_HOPS, DEFAULT_NUM_BLOCKS,
};
use simfs::shell::{Command, Reply, Session};
use simfs::storage::ImageFile;

#[derive(Parser)]
struct Args {
    /// Image file holding the file system
    #[arg(default_value = "filesystem")]
    image: PathBuf,
    /// Number of blocks when a new image is formatted
    #[arg(long, default_value_t = DEFAULT_NUM_BLOCKS)]
    blocks: usize,
    /// Number of descriptors when a new image is formatted
    #[arg(long, default_value_t = DEFAULT_MAX_DESCRIPTORS)]
    descriptors: usize,
    /// Maximum length of a name when a new image is formatted
    #[arg(long, default_value_t = DEFAULT_MAX_NAME_LEN)]
    max_name_len: usize,
    /// Maximum number of names of a file when a new image is formatted
    #[arg(long, default_value_t = DEFAULT_MAX_LINKS)]
    max_links: u16,
    /// Symlinks followed while resolving a single path
    #[arg(long, default_value_t = DEFAULT_MAX_SYMLINK_HOPS)]
    symlink_hops: usize,
}

fn main() -> Result<()> {
    env_logger::init();

    let args = Args::parse();

    let limits = Limits {
        num_blocks: args.blocks,
        max_descriptors: args.descriptors,
        max_name_len: args.max_name_len,
        max_links: args.max_links,
        max_symlink_hops: args.symlink_hops,
    };
    let mut session = Session::new(ImageFile::new(args.image), limits);

    let stdin = io::stdin();
    let mut lines = stdin.lock().lines();
    let mut stdout = io::stdout();

    loop {
        write!(stdout, "> ")?;
        stdout.flush()?;

        let Some(line) = lines.next() else {
            // end of input, same as `exit`
            session.finish()?;
            break;
        };
        let line = line.context("reading command")?;

        if line.trim().is_empty() {
            continue;
        }

        let command = match line.parse::<Command>() {
            Ok(command) => command,
            Err(err) => {
                println!("error: {err}");
                continue;
            }
        };

        match session.execute(command) {
            Ok(Reply::Exit) => break,
            Ok(reply) => println!("{reply}"),
            Err(err) => println!("error: {err:#}"),
        }
    }

    Ok(())
}
