use clap::{Parser, Subcommand};
use rex_codec::{decode, encode_with, get, EncodeOptions, Key};

pub mod reader;
pub mod repl;

/// Debug tooling for Rex-C strings.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Encodes a literal form into a Rex-C string.
    Encode {
        literal: String,

        /// Disables pointer deduplication.
        #[arg(long)]
        no_dedup: bool,

        /// Minimum encoded size for a repeated value to become a pointer.
        #[arg(long, default_value_t = 2)]
        dedup_min_size: usize,

        /// Minimum element count for a container to carry an offset index.
        #[arg(long, default_value_t = 8)]
        index_min_len: usize,
    },

    /// Decodes a Rex-C string and prints its literal form.
    Decode { blob: String },

    /// Resolves a dotted path against a Rex-C string without decoding the
    /// parts the path skips over.
    Get { blob: String, path: String },
}

fn main() -> eyre::Result<()> {
    match Args::parse().command {
        Some(Command::Encode { literal, no_dedup, dedup_min_size, index_min_len }) => {
            let value = reader::read(&literal)?;
            let options = EncodeOptions {
                dedup: !no_dedup,
                dedup_min_size,
                index_min_len,
            };
            println!("{}", encode_with(&value, &options)?);
        }
        Some(Command::Decode { blob }) => println!("{}", decode(&blob)?),
        Some(Command::Get { blob, path }) => println!("{}", get(&blob, &parse_path(&path))?),
        None => repl::run(),
    }

    Ok(())
}

/// Dotted paths: numeric segments are element indices, everything else is
/// an object key.
pub fn parse_path(path: &str) -> Vec<Key> {
    path.split('.')
        .filter(|segment| !segment.is_empty())
        .map(|segment| match segment.parse::<usize>() {
            Ok(index) => Key::Index(index),
            Err(_) => Key::Name(segment.to_owned()),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_split_on_dots() {
        assert_eq!(
            parse_path("rules.0.color"),
            vec![
                Key::Name("rules".into()),
                Key::Index(0),
                Key::Name("color".into()),
            ]
        );
        assert_eq!(parse_path(""), vec![]);
    }
}
