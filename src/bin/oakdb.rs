//! # oakdb CLI Entry Point
//!
//! ```bash
//! # Create a fresh store and open a shell on it
//! oakdb --create --blocks 256 --block-size 4096 ./index.oak
//!
//! # Reopen an existing store
//! oakdb --block-size 4096 ./index.oak
//! ```

use std::env;
use std::path::PathBuf;

use eyre::{bail, Result};
use oakdb::cli::Repl;
use oakdb::storage::{BlockCache, MmapStore};
use oakdb::BTreeIndex;

const DEFAULT_BLOCKS: u32 = 256;
const DEFAULT_BLOCK_SIZE: usize = 4096;
const DEFAULT_KEY_SIZE: u32 = 8;
const DEFAULT_VALUE_SIZE: u32 = 8;
const CACHE_CAPACITY: usize = 64;

fn main() {
    if let Err(e) = run() {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let args: Vec<String> = env::args().collect();

    let mut create_mode = false;
    let mut blocks = DEFAULT_BLOCKS;
    let mut block_size = DEFAULT_BLOCK_SIZE;
    let mut key_size = DEFAULT_KEY_SIZE;
    let mut value_size = DEFAULT_VALUE_SIZE;
    let mut path: Option<PathBuf> = None;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--help" | "-h" => {
                print_usage();
                return Ok(());
            }
            "--version" | "-v" => {
                println!("oakdb {}", env!("CARGO_PKG_VERSION"));
                return Ok(());
            }
            "--create" | "-c" => create_mode = true,
            "--blocks" => blocks = parse_number(&args, &mut i)?,
            "--block-size" => block_size = parse_number(&args, &mut i)?,
            "--key-size" => key_size = parse_number(&args, &mut i)?,
            "--value-size" => value_size = parse_number(&args, &mut i)?,
            arg if arg.starts_with('-') => bail!("unknown option: {arg}"),
            p => {
                if path.is_some() {
                    bail!("multiple store paths specified");
                }
                path = Some(PathBuf::from(p));
            }
        }
        i += 1;
    }

    let path = match path {
        Some(p) => p,
        None => {
            print_usage();
            return Ok(());
        }
    };

    let mut store = if create_mode {
        let mut store = MmapStore::create(&path, block_size, blocks)?;
        let mut index = BTreeIndex::create(&mut store, key_size, value_size)?;
        index.detach()?;
        store
    } else {
        MmapStore::open(&path, block_size)?
    };
    store.sync()?;

    Repl::new(BlockCache::new(store, CACHE_CAPACITY))?.run()
}

fn parse_number<T: std::str::FromStr>(args: &[String], i: &mut usize) -> Result<T> {
    let flag = &args[*i];
    *i += 1;
    let Some(value) = args.get(*i) else {
        bail!("{flag} requires a value");
    };
    match value.parse() {
        Ok(parsed) => Ok(parsed),
        Err(_) => bail!("invalid value '{value}' for {flag}"),
    }
}

fn print_usage() {
    println!("Usage: oakdb [OPTIONS] PATH");
    println!();
    println!("Options:");
    println!("  -c, --create          create a fresh store at PATH");
    println!("      --blocks N        blocks in a fresh store (default {DEFAULT_BLOCKS})");
    println!("      --block-size B    block size in bytes (default {DEFAULT_BLOCK_SIZE})");
    println!("      --key-size K      key width in bytes (default {DEFAULT_KEY_SIZE})");
    println!("      --value-size V    value width in bytes (default {DEFAULT_VALUE_SIZE})");
    println!("  -h, --help            show this help");
    println!("  -v, --version         show version");
}
