use clap::Parser;
use std::path::PathBuf;

use crate::normalize::NormalizeOptions;

#[derive(Parser, Debug)]
#[command(name = "jarfix")]
#[command(version)]
#[command(about = "Normalize a JAR so every entry is unambiguously a file or a directory")]
#[command(long_about = None)]
#[command(after_help = "Examples:\n  \
  jarfix broken.jar fixed.jar            rewrite broken.jar into fixed.jar\n  \
  jarfix -vv app.jar app-fixed.jar       log every entry while rewriting\n  \
  RUST_LOG=jarfix=debug jarfix a.jar b.jar")]
pub struct Cli {
    /// JAR file to read
    #[arg(value_name = "INPUT")]
    pub input: PathBuf,

    /// JAR file to write (created or truncated)
    #[arg(value_name = "OUTPUT")]
    pub output: PathBuf,

    /// Deflate level for file entries (0-9)
    #[arg(long = "level", value_name = "LEVEL", default_value_t = 6,
          value_parser = clap::value_parser!(u32).range(0..=9))]
    pub level: u32,

    /// Skip CRC-32 verification of input entries
    #[arg(long = "no-verify")]
    pub no_verify: bool,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short = 'v', action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Quiet mode: no confirmation message, errors only
    #[arg(short = 'q')]
    pub quiet: bool,
}

impl Cli {
    pub fn options(&self) -> NormalizeOptions {
        NormalizeOptions {
            compression_level: self.level,
            verify_crc: !self.no_verify,
        }
    }

    /// Default log filter when `RUST_LOG` is not set
    pub fn log_filter(&self) -> &'static str {
        if self.quiet {
            return "error";
        }
        match self.verbose {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        }
    }
}
