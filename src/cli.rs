// Command-line front end for Oxiflate.
//
// Explicit `compress` / `decompress` subcommands over files or stdio, with
// every session knob exposed as a long-form option.

use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::PathBuf;
use std::process;

use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum, ValueHint};
use log::info;

use crate::codec::{self, CodecBackend, Strategy, dictionary_id};
use crate::io::{DEFAULT_CHUNK_SIZE, Execution, TransformOptions, TransformStats, transform_stream};
use crate::session::Mode;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

const BUF_SIZE: usize = 64 * 1024;
const MAX_CHUNK_SIZE: u64 = 1 << 30; // 1 GiB

// ---------------------------------------------------------------------------
// Byte size parsing (supports K, M, G suffixes)
// ---------------------------------------------------------------------------

fn parse_byte_size(s: &str) -> Result<u64, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("empty size string".into());
    }
    let (num_part, multiplier) = match s.as_bytes().last() {
        Some(b'k' | b'K') => (&s[..s.len() - 1], 1024u64),
        Some(b'm' | b'M') => (&s[..s.len() - 1], 1024 * 1024),
        Some(b'g' | b'G') => (&s[..s.len() - 1], 1024 * 1024 * 1024),
        _ => (s, 1u64),
    };
    let num: u64 = num_part
        .trim()
        .parse()
        .map_err(|e| format!("invalid size '{s}': {e}"))?;
    num.checked_mul(multiplier)
        .ok_or_else(|| format!("size overflow: '{s}'"))
}

fn parse_chunk_size(s: &str) -> Result<u64, String> {
    match parse_byte_size(s)? {
        0 => Err("chunk size must be at least 1 byte".into()),
        n if n > MAX_CHUNK_SIZE => Err(format!("chunk size {n} exceeds max {MAX_CHUNK_SIZE}")),
        n => Ok(n),
    }
}

// ---------------------------------------------------------------------------
// Clap CLI definition
// ---------------------------------------------------------------------------

/// Streaming zlib / gzip / raw deflate compressor.
#[derive(Parser, Debug)]
#[command(
    name = "oxiflate",
    version,
    about = "Streaming zlib/gzip/deflate compressor",
    arg_required_else_help = true
)]
struct Cli {
    #[command(subcommand)]
    command: Cmd,

    /// Force overwrite existing output files.
    #[arg(short = 'f', long, global = true)]
    force: bool,

    /// Quiet mode (suppress non-error output).
    #[arg(short = 'q', long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    /// Verbose mode (use multiple times for more detail).
    #[arg(short = 'v', long, global = true, action = ArgAction::Count)]
    verbose: u8,

    /// Output stats as JSON to stderr.
    #[arg(long = "json", global = true)]
    json_output: bool,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Compress an input stream.
    Compress(CompressArgs),
    /// Decompress an input stream.
    Decompress(DecompressArgs),
    /// Print build/configuration details.
    Config,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum CompressFormat {
    Zlib,
    Gzip,
    Raw,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum DecompressFormat {
    Zlib,
    Gzip,
    Raw,
    /// gzip or zlib, decided from the first two bytes.
    Auto,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum StrategyArg {
    Default,
    Filtered,
    HuffmanOnly,
    Rle,
    Fixed,
}

impl From<StrategyArg> for Strategy {
    fn from(arg: StrategyArg) -> Self {
        match arg {
            StrategyArg::Default => Strategy::Default,
            StrategyArg::Filtered => Strategy::Filtered,
            StrategyArg::HuffmanOnly => Strategy::HuffmanOnly,
            StrategyArg::Rle => Strategy::Rle,
            StrategyArg::Fixed => Strategy::Fixed,
        }
    }
}

#[derive(Args, Debug)]
struct StreamArgs {
    /// Window size as log2 of the history buffer (8-15).
    #[arg(long, value_parser = clap::value_parser!(u32).range(8..=15), default_value_t = codec::DEFAULT_WINDOW_BITS)]
    window_bits: u32,

    /// Preset dictionary file.
    #[arg(long, short = 'D', value_hint = ValueHint::FilePath)]
    dictionary: Option<PathBuf>,

    /// Input block and output buffer size (accepts K/M/G suffixes).
    #[arg(long, value_parser = parse_chunk_size, default_value = "16K")]
    chunk_size: u64,

    /// Process chunks on a worker pool instead of inline.
    #[arg(long = "async")]
    use_async: bool,

    /// Worker threads for --async (0 = one per core).
    #[arg(long, default_value_t = 0, requires = "use_async")]
    threads: usize,
}

#[derive(Args, Debug)]
struct IoArgs {
    /// Input file (default: stdin).
    #[arg(long, value_hint = ValueHint::FilePath, conflicts_with = "input_pos")]
    input: Option<PathBuf>,

    /// Output file (default: stdout).
    #[arg(long, value_hint = ValueHint::FilePath, conflicts_with = "output_pos")]
    output: Option<PathBuf>,

    /// Write output to stdout.
    #[arg(short = 'c', long)]
    stdout: bool,

    /// Input file (positional form).
    #[arg(value_hint = ValueHint::FilePath)]
    input_pos: Option<PathBuf>,

    /// Output file (positional form).
    #[arg(value_hint = ValueHint::FilePath)]
    output_pos: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct CompressArgs {
    /// Container format.
    #[arg(long, value_enum, default_value_t = CompressFormat::Zlib)]
    format: CompressFormat,

    /// Compression level (-1 = codec default, 0-9).
    #[arg(long, short = 'l', allow_negative_numbers = true,
          value_parser = clap::value_parser!(i32).range(-1..=9), default_value_t = codec::DEFAULT_LEVEL)]
    level: i32,

    /// Memory level of the compressor state (1-9).
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..=9), default_value_t = codec::DEFAULT_MEM_LEVEL)]
    mem_level: u32,

    /// Compression strategy.
    #[arg(long, value_enum, default_value_t = StrategyArg::Default)]
    strategy: StrategyArg,

    #[command(flatten)]
    stream: StreamArgs,

    #[command(flatten)]
    io: IoArgs,
}

#[derive(Args, Debug)]
struct DecompressArgs {
    /// Container format.
    #[arg(long, value_enum, default_value_t = DecompressFormat::Auto)]
    format: DecompressFormat,

    #[command(flatten)]
    stream: StreamArgs,

    #[command(flatten)]
    io: IoArgs,
}

// ---------------------------------------------------------------------------
// Resolved command + options (flattened from Cli)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Compress,
    Decompress,
    Config,
}

struct Options {
    command: Command,
    use_stdout: bool,
    force: bool,
    quiet: bool,
    verbose: u8,
    mode: Mode,
    level: i32,
    mem_level: u32,
    strategy: Strategy,
    window_bits: u32,
    dictionary_file: Option<PathBuf>,
    chunk_size: usize,
    execution: Execution,
    input_file: Option<PathBuf>,
    output_file: Option<PathBuf>,
    json_output: bool,
}

impl Options {
    fn base(command: Command, cli_globals: (bool, bool, u8, bool)) -> Self {
        let (force, quiet, verbose, json_output) = cli_globals;
        Self {
            command,
            use_stdout: false,
            force,
            quiet,
            verbose,
            mode: Mode::Deflate,
            level: codec::DEFAULT_LEVEL,
            mem_level: codec::DEFAULT_MEM_LEVEL,
            strategy: Strategy::Default,
            window_bits: codec::DEFAULT_WINDOW_BITS,
            dictionary_file: None,
            chunk_size: DEFAULT_CHUNK_SIZE,
            execution: Execution::Sync,
            input_file: None,
            output_file: None,
            json_output,
        }
    }

    fn apply_stream(&mut self, stream: StreamArgs) {
        self.window_bits = stream.window_bits;
        self.dictionary_file = stream.dictionary;
        self.chunk_size = usize::try_from(stream.chunk_size).unwrap_or(DEFAULT_CHUNK_SIZE);
        self.execution = if stream.use_async {
            Execution::Async {
                threads: stream.threads,
            }
        } else {
            Execution::Sync
        };
    }

    fn apply_io(&mut self, io: IoArgs) {
        self.use_stdout = io.stdout;
        self.input_file = io.input.or(io.input_pos);
        self.output_file = io.output.or(io.output_pos);
    }
}

fn resolve_options(cli: Cli) -> Options {
    let globals = (cli.force, cli.quiet, cli.verbose.min(2), cli.json_output);

    match cli.command {
        Cmd::Compress(args) => {
            let mut opts = Options::base(Command::Compress, globals);
            opts.mode = match args.format {
                CompressFormat::Zlib => Mode::Deflate,
                CompressFormat::Gzip => Mode::Gzip,
                CompressFormat::Raw => Mode::DeflateRaw,
            };
            opts.level = args.level;
            opts.mem_level = args.mem_level;
            opts.strategy = args.strategy.into();
            opts.apply_stream(args.stream);
            opts.apply_io(args.io);
            opts
        }
        Cmd::Decompress(args) => {
            let mut opts = Options::base(Command::Decompress, globals);
            opts.mode = match args.format {
                DecompressFormat::Zlib => Mode::Inflate,
                DecompressFormat::Gzip => Mode::Gunzip,
                DecompressFormat::Raw => Mode::InflateRaw,
                DecompressFormat::Auto => Mode::AutoUnzip,
            };
            opts.apply_stream(args.stream);
            opts.apply_io(args.io);
            opts
        }
        Cmd::Config => Options::base(Command::Config, globals),
    }
}

#[cfg(any(test, feature = "fuzzing"))]
pub fn fuzz_try_parse_args(args: &[String]) {
    let argv: Vec<String> = std::iter::once("oxiflate".to_string())
        .chain(args.iter().cloned())
        .collect();
    if let Ok(cli) = Cli::try_parse_from(argv) {
        let _ = resolve_options(cli);
    }
}

// ---------------------------------------------------------------------------
// Config command
// ---------------------------------------------------------------------------

fn cmd_config() -> i32 {
    let version = env!("CARGO_PKG_VERSION");
    eprintln!("oxiflate version {version} (Rust), Copyright (C) oxiflate contributors");
    eprintln!("Licensed under the MIT License");

    let file_io = cfg!(feature = "file-io") as u8;
    let ptr_size = std::mem::size_of::<*const ()>();
    let threads = std::thread::available_parallelism().map_or(1, usize::from);

    eprintln!("CODEC_BACKEND={}", crate::codec::FlateBackend.name());
    eprintln!("FILE_IO={file_io}");
    eprintln!("DEFAULT_WINDOW_BITS={}", codec::DEFAULT_WINDOW_BITS);
    eprintln!("DEFAULT_LEVEL={}", codec::DEFAULT_LEVEL);
    eprintln!("DEFAULT_MEM_LEVEL={}", codec::DEFAULT_MEM_LEVEL);
    eprintln!("DEFAULT_CHUNK_SIZE={DEFAULT_CHUNK_SIZE}");
    eprintln!("MAX_CHUNK_SIZE={MAX_CHUNK_SIZE}");
    eprintln!("AVAILABLE_THREADS={threads}");
    eprintln!("sizeof(usize)={ptr_size}");

    0
}

// ---------------------------------------------------------------------------
// Build TransformOptions from CLI options
// ---------------------------------------------------------------------------

fn build_transform_options(opts: &Options) -> Result<TransformOptions, String> {
    let dictionary = match &opts.dictionary_file {
        Some(path) => Some(
            std::fs::read(path).map_err(|e| format!("dictionary file: {}: {e}", path.display()))?,
        ),
        None => None,
    };

    Ok(TransformOptions {
        mode: opts.mode,
        window_bits: opts.window_bits,
        level: opts.level,
        mem_level: opts.mem_level,
        strategy: opts.strategy,
        dictionary,
        chunk_size: opts.chunk_size,
        execution: opts.execution,
    })
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

// ---------------------------------------------------------------------------
// Compress / decompress commands
// ---------------------------------------------------------------------------

fn cmd_transform(opts: &Options) -> i32 {
    let transform_opts = match build_transform_options(opts) {
        Ok(t) => t,
        Err(e) => {
            eprintln!("oxiflate: {e}");
            return 1;
        }
    };

    // Open input: file or stdin.
    let mut reader: Box<dyn Read> = match &opts.input_file {
        Some(path) => match File::open(path) {
            Ok(f) => Box::new(BufReader::with_capacity(BUF_SIZE, f)),
            Err(e) => {
                eprintln!("oxiflate: input file: {}: {e}", path.display());
                return 1;
            }
        },
        None => Box::new(BufReader::new(io::stdin())),
    };

    // Open output: file or stdout.
    let mut writer: Box<dyn Write> = match (opts.use_stdout, &opts.output_file) {
        (true, _) | (_, None) => Box::new(BufWriter::with_capacity(BUF_SIZE, io::stdout().lock())),
        (false, Some(path)) => {
            if path.exists() && !opts.force {
                eprintln!(
                    "oxiflate: output file exists, use -f to overwrite: {}",
                    path.display()
                );
                return 1;
            }
            match File::create(path) {
                Ok(f) => Box::new(BufWriter::with_capacity(BUF_SIZE, f)),
                Err(e) => {
                    eprintln!("oxiflate: output file: {}: {e}", path.display());
                    return 1;
                }
            }
        }
    };

    let stats = match transform_stream(&mut reader, &mut writer, &transform_opts) {
        Ok(stats) => stats,
        Err(e) => {
            let verb = match opts.command {
                Command::Compress => "compress",
                _ => "decompress",
            };
            eprintln!("oxiflate: {verb} error: {e}");
            return 1;
        }
    };

    info!(
        "{:?}: {} -> {} bytes in {} chunks",
        stats.mode, stats.bytes_in, stats.bytes_out, stats.chunks
    );
    if opts.verbose > 0 && !opts.quiet {
        eprintln!(
            "oxiflate: {:?}: input size: {}, output size: {}, chunks: {}",
            stats.mode, stats.bytes_in, stats.bytes_out, stats.chunks
        );
    }

    if opts.json_output {
        print_json(opts, &transform_opts, &stats);
    }

    0
}

fn print_json(opts: &Options, transform_opts: &TransformOptions, stats: &TransformStats) {
    let command = match opts.command {
        Command::Compress => "compress",
        Command::Decompress => "decompress",
        Command::Config => "config",
    };
    let execution = match opts.execution {
        Execution::Sync => "sync",
        Execution::Async { .. } => "async",
    };
    let json = serde_json::json!({
        "command": command,
        "mode": format!("{:?}", stats.mode),
        "input_size": stats.bytes_in,
        "output_size": stats.bytes_out,
        "chunks": stats.chunks,
        "chunk_size": transform_opts.chunk_size,
        "window_bits": transform_opts.window_bits,
        "level": transform_opts.level,
        "execution": execution,
        "dictionary_id": transform_opts.dictionary.as_deref().map(dictionary_id),
        "output_sha256": stats.output_sha256.map(|d| hex(&d)),
    });
    eprintln!("{json:#}");
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

/// Main CLI entry point. Parses arguments via clap, dispatches commands.
pub fn run() -> ! {
    let cli = Cli::parse();
    let mut opts = resolve_options(cli);

    let default_filter = match (opts.quiet, opts.verbose) {
        (true, _) => "error",
        (false, 0) => "warn",
        (false, 1) => "info",
        (false, _) => "debug",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .format_timestamp(None)
        .format_target(false)
        .init();

    // Warn if -c overrides output filename.
    if opts.use_stdout && !opts.quiet {
        if let Some(path) = &opts.output_file {
            eprintln!(
                "oxiflate: warning: -c option overrides output filename: {}",
                path.display()
            );
        }
    }
    if opts.use_stdout {
        opts.output_file = None;
    }

    let exit_code = match opts.command {
        Command::Compress | Command::Decompress => cmd_transform(&opts),
        Command::Config => cmd_config(),
    };

    process::exit(exit_code);
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
