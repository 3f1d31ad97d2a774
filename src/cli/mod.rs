//! Interactive shell for poking at an index store: insert, look up, render,
//! and sanity-check a tree from the terminal. Dot commands only; keys and
//! values are right-padded with NUL to the tree's fixed widths.

use std::io::{self, Write};

use eyre::{bail, Result, WrapErr};
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;

use crate::btree::{BTreeIndex, DisplayMode};
use crate::storage::{BlockCache, MmapStore};

const PROMPT: &str = "oakdb> ";

pub struct Repl {
    store: BlockCache<MmapStore>,
    editor: DefaultEditor,
}

impl Repl {
    pub fn new(store: BlockCache<MmapStore>) -> Result<Self> {
        let editor = DefaultEditor::new().wrap_err("failed to initialize line editor")?;
        Ok(Self { store, editor })
    }

    pub fn run(&mut self) -> Result<()> {
        println!("oakdb {} - .help for commands", env!("CARGO_PKG_VERSION"));

        loop {
            match self.editor.readline(PROMPT) {
                Ok(line) => {
                    let line = line.trim().to_string();
                    if line.is_empty() {
                        continue;
                    }
                    let _ = self.editor.add_history_entry(&line);
                    match self.handle_line(&line) {
                        Ok(true) => {}
                        Ok(false) => break,
                        Err(err) => eprintln!("error: {err}"),
                    }
                }
                Err(ReadlineError::Interrupted) => println!("^C"),
                Err(ReadlineError::Eof) => {
                    println!("bye");
                    break;
                }
                Err(err) => {
                    eprintln!("error reading input: {err}");
                    break;
                }
            }
        }

        self.store.inner().sync()?;
        Ok(())
    }

    fn handle_line(&mut self, line: &str) -> Result<bool> {
        let mut parts = line.split_whitespace();
        let command = parts.next().unwrap_or("");
        let args: Vec<&str> = parts.collect();

        match command {
            ".help" => print_help(),
            ".insert" => {
                let (key, value) = self.pair_args(&args)?;
                let mut index = self.index()?;
                index.insert(&key, &value)?;
                println!("ok");
            }
            ".lookup" => {
                let key = self.key_arg(&args)?;
                let mut index = self.index()?;
                let value = index.lookup(&key)?;
                println!("{}", printable(&value));
            }
            ".update" => {
                let (key, value) = self.pair_args(&args)?;
                let mut index = self.index()?;
                index.update(&key, &value)?;
                println!("ok");
            }
            ".delete" => {
                let key = self.key_arg(&args)?;
                let mut index = self.index()?;
                index.delete(&key)?;
            }
            ".display" => {
                let mode = match args.first().copied() {
                    None | Some("depth") => DisplayMode::Depth,
                    Some("dot") => DisplayMode::DepthDot,
                    Some("sorted") => DisplayMode::SortedKeyval,
                    Some(other) => bail!("unknown display mode '{other}'"),
                };
                let mut index = self.index()?;
                let mut stdout = io::stdout().lock();
                index.display(&mut stdout, mode)?;
                stdout.flush()?;
            }
            ".sanity" => {
                let mut index = self.index()?;
                match index.sanity_check() {
                    Ok(()) => println!("tree is sane"),
                    Err(err) => println!("violation: {err}"),
                }
            }
            ".stats" => {
                let stats = self.store.stats();
                println!(
                    "reads {} (hits {}, misses {}), writes {}, allocated blocks {}",
                    stats.reads,
                    stats.hits,
                    stats.misses,
                    stats.writes,
                    self.store.allocated_blocks()
                );
            }
            ".quit" | ".exit" => return Ok(false),
            other => bail!("unknown command '{other}', try .help"),
        }

        Ok(true)
    }

    fn index(&mut self) -> Result<BTreeIndex<'_, BlockCache<MmapStore>>> {
        BTreeIndex::open(&mut self.store).wrap_err("failed to mount index")
    }

    fn widths(&mut self) -> Result<(usize, usize)> {
        let index = BTreeIndex::open(&mut self.store).wrap_err("failed to mount index")?;
        Ok((index.keysize(), index.valuesize()))
    }

    fn key_arg(&mut self, args: &[&str]) -> Result<Vec<u8>> {
        let (keysize, _) = self.widths()?;
        match args {
            [key] => pad_fixed("key", key, keysize),
            _ => bail!("expected exactly one key argument"),
        }
    }

    fn pair_args(&mut self, args: &[&str]) -> Result<(Vec<u8>, Vec<u8>)> {
        let (keysize, valuesize) = self.widths()?;
        match args {
            [key, value] => Ok((
                pad_fixed("key", key, keysize)?,
                pad_fixed("value", value, valuesize)?,
            )),
            _ => bail!("expected a key and a value argument"),
        }
    }
}

fn pad_fixed(what: &str, text: &str, width: usize) -> Result<Vec<u8>> {
    if text.len() > width {
        bail!("{what} '{text}' is longer than {width} bytes");
    }
    let mut buf = vec![0u8; width];
    buf[..text.len()].copy_from_slice(text.as_bytes());
    Ok(buf)
}

fn printable(bytes: &[u8]) -> String {
    let end = bytes.iter().rposition(|&b| b != 0).map_or(0, |p| p + 1);
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}

fn print_help() {
    println!(".insert KEY VALUE   insert a pair");
    println!(".lookup KEY         print the value stored under KEY");
    println!(".update KEY VALUE   overwrite the value stored under KEY");
    println!(".delete KEY         (unimplemented)");
    println!(".display [MODE]     render the tree: depth, dot, sorted");
    println!(".sanity             run the structural sanity checker");
    println!(".stats              block cache counters");
    println!(".quit               exit");
}
