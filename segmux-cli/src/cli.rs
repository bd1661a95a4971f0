use clap::{Parser, Subcommand};
use segmux_engine::hls::{SchedulingMode, VariantSelection};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "segmux")]
#[command(about = "Download segmented (HLS) videos into a single file")]
#[command(version)]
pub struct Args {
    #[command(subcommand)]
    pub command: Commands,

    /// Configuration file (defaults to <config dir>/segmux/config.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Extra request header, repeatable: -H "Referer=https://example.com/"
    #[arg(short = 'H', long = "header", global = true, value_name = "KEY=VALUE")]
    pub headers: Vec<String>,

    /// User-Agent sent with every request
    #[arg(long, global = true)]
    pub user_agent: Option<String>,

    /// Proxy URL (http, https or socks5)
    #[arg(long, global = true)]
    pub proxy: Option<String>,

    /// Path to the ffmpeg binary
    #[arg(long, global = true, value_name = "PATH")]
    pub ffmpeg: Option<PathBuf>,

    /// Attempts per request before giving up
    #[arg(long, global = true)]
    pub retries: Option<u32>,

    /// Pause between attempts, in milliseconds
    #[arg(long, global = true, value_name = "MS")]
    pub retry_delay_ms: Option<u64>,

    /// Per-request timeout in seconds
    #[arg(long, global = true, value_name = "SECS")]
    pub timeout: Option<u64>,

    /// Which variant to follow when a master playlist lists several
    #[arg(long, global = true, value_enum)]
    pub variant: Option<VariantSelection>,

    /// How segment downloads are dispatched
    #[arg(long, global = true, value_enum)]
    pub scheduler: Option<SchedulingMode>,

    /// Print download reports as JSON on stdout
    #[arg(long, global = true)]
    pub json: bool,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Only log errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Download one video from its manifest URL
    Download {
        /// Manifest (.m3u8) URL
        url: String,

        /// Output directory
        #[arg(short, long)]
        output_dir: Option<PathBuf>,

        /// Output file name
        #[arg(short, long)]
        name: Option<String>,

        /// Segments downloaded at once
        #[arg(short, long)]
        concurrency: Option<usize>,
    },

    /// Download every job listed in a file, one "<url> [name]" per line
    Batch {
        /// Job file
        input: PathBuf,

        /// Output directory
        #[arg(short, long)]
        output_dir: Option<PathBuf>,

        /// Segments downloaded at once
        #[arg(short, long)]
        concurrency: Option<usize>,

        /// Skip jobs whose output file already exists
        #[arg(long)]
        skip_existing: bool,

        /// Put each job in a subdirectory named after the MD5 of its URL
        #[arg(long)]
        fingerprint_dirs: bool,
    },
}
