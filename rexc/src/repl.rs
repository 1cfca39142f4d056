use std::path::PathBuf;

use rex_codec::{decode, encode, get};
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;

use crate::{parse_path, reader};

fn history_path() -> Option<PathBuf> {
    let home = std::env::var("HOME").ok()?;
    Some(PathBuf::from(format!("{home}/.rexc.history")))
}

pub fn run() {
    let mut rl = DefaultEditor::new().expect("cannot create a repl");
    let path = history_path();

    if let Some(path) = &path {
        let _ = rl.load_history(path);
    }

    loop {
        match rl.readline("rexc> ") {
            Ok(line) => {
                let _ = rl.add_history_entry(line.as_str());

                if let Err(err) = eval(line.trim()) {
                    println!("error: {err}");
                }
            }
            Err(ReadlineError::Interrupted) => {
                println!("Interrupted");
                break;
            }
            Err(ReadlineError::Eof) => break,
            Err(err) => {
                println!("Error: {err:?}");
                break;
            }
        }
    }

    if let Some(path) = path {
        let _ = rl.append_history(&path);
    }
}

/// `decode <blob>`, `get <blob> <path>`, or a literal form to encode.
fn eval(line: &str) -> eyre::Result<()> {
    if line.is_empty() {
        return Ok(());
    }

    if let Some(blob) = line.strip_prefix("decode ") {
        println!("{}", decode(blob.trim())?);
    } else if let Some(rest) = line.strip_prefix("get ") {
        let (blob, path) = rest
            .trim()
            .split_once(' ')
            .ok_or_else(|| eyre::eyre!("usage: get <blob> <path>"))?;
        println!("{}", get(blob, &parse_path(path.trim()))?);
    } else {
        let literal = line.strip_prefix("encode ").unwrap_or(line);
        println!("{}", encode(&reader::read(literal)?)?);
    }

    Ok(())
}
