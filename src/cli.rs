//! Command-line arguments.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::domain::Field;

#[derive(Parser, Debug)]
#[command(name = "caatuu-verifier")]
#[command(about = "Verify and correct annotation fields of a Chinese corpus with an LLM oracle", long_about = None)]
pub struct Cli {
    /// TOML config (oracle command, prompt templates, validation, server paths)
    #[arg(long, global = true, env = "VERIFIER_CONFIG_PATH")]
    pub config: Option<PathBuf>,

    /// Oracle executable (overrides the config file)
    #[arg(long, global = true)]
    pub oracle: Option<String>,

    /// Seconds to wait for one oracle reply (overrides the config file)
    #[arg(long, global = true)]
    pub timeout_secs: Option<u64>,

    /// Require pinyin answers to contain a space
    #[arg(long, global = true)]
    pub strict_pinyin: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Walk a corpus file sequentially, verifying one field of every record
    Batch(BatchArgs),
    /// Serve the interactive verification form
    Serve(ServeArgs),
}

#[derive(Args, Debug)]
pub struct BatchArgs {
    /// Corpus JSON file to verify
    #[arg(long, short)]
    pub input: PathBuf,

    /// Write results here instead of back to the input file
    #[arg(long, short)]
    pub output: Option<PathBuf>,

    /// Field key to verify (sentence, pinyin, korean, english, japanese,
    /// japanese_romaji, translation, or a custom key with a configured prompt)
    #[arg(long, short, default_value = "pinyin", value_parser = Field::parse)]
    pub field: Field,

    /// Index of the first record to process (printed when a session halts)
    #[arg(long, short, default_value_t = 0)]
    pub start: usize,

    /// Stop after this many records
    #[arg(long)]
    pub limit: Option<usize>,

    /// Echo the first two prompts and the oracle's exit status
    #[arg(long)]
    pub debug: bool,
}

#[derive(Args, Debug)]
pub struct ServeArgs {
    #[arg(long, env = "PORT", default_value_t = 3000)]
    pub port: u16,

    /// Directory holding the corpus JSON files (overrides the config file)
    #[arg(long)]
    pub corpus_dir: Option<String>,

    /// Directory holding the form's static files (overrides the config file)
    #[arg(long)]
    pub static_dir: Option<String>,
}
