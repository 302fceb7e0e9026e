use anyhow::Context as _;
use clap::{ArgAction, Parser, ValueEnum};
use console::style;
use lazyseek::{Backing, ByteRange, ForwardSource, LazySeekError, LazySeekStream, Options};
use std::fs;
use std::io::{self, Read, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::process;

#[derive(Copy, Clone, Debug, ValueEnum, PartialEq, Eq)]
pub enum OutputFormat {
    /// Write the bytes as they are to stdout.
    Raw,

    /// Write one line per range, "start..end: hex".
    Hex,
}

/// Read ranges of a forward-only input, as if it was seekable.
///
/// The input is read once, front to back, and only as far as
/// necessary. Patches are applied first, in order, then ranges are
/// printed, in order.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about=None)]
struct Cli {
    /// Input file, or - for stdin.
    #[arg(long, default_value = "-")]
    input: String,

    /// Length of the input.
    ///
    /// Required when reading from stdin. Defaults to the size of the
    /// input file otherwise.
    #[arg(long, value_parser = |s: &str| parse_bytes(s))]
    length: Option<u64>,

    /// File to keep the data read from the input into.
    ///
    /// The file is created or truncated. Without this option, data is
    /// kept in memory, which limits the size of the input.
    #[arg(long)]
    backing_file: Option<PathBuf>,

    /// Path to a TOML file containing stream options.
    ///
    /// Options passed on the command line override those of the file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Refuse --patch.
    #[arg(long)]
    read_only: bool,

    /// Size of the buffer used to move input data around (e.g. "64K").
    #[arg(long, value_parser = |s: &str| parse_bytes(s))]
    chunk_size: Option<u64>,

    /// Largest input that can be kept in memory (e.g. "1G").
    #[arg(long, value_parser = |s: &str| parse_bytes(s))]
    memory_limit: Option<u64>,

    /// Overwrite data at OFFSET with hex-encoded bytes, OFFSET:HEX.
    #[arg(long = "patch", value_name = "OFFSET:HEX", value_parser = |s: &str| parse_patch(s))]
    patches: Vec<Patch>,

    /// Range to print, START..END. Defaults to everything.
    #[arg(long = "range", value_name = "START..END", value_parser = |s: &str| parse_range(s))]
    ranges: Vec<ByteRange>,

    /// Output format.
    #[arg(long, value_enum, default_value = "raw")]
    output: OutputFormat,

    /// Log more; repeat for even more (-vv, -vvv).
    ///
    /// RUST_LOG, if set, takes precedence.
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
}

#[derive(Clone, Debug, PartialEq, Eq)]
struct Patch {
    offset: u64,
    data: Vec<u8>,
}

fn main() {
    let cli = Cli::parse();
    lazyseek::logging::init_with_level(log_level(cli.verbose));

    let status = match execute(&cli) {
        Ok(()) => 0,
        Err(err) => {
            print_error(&format!("{err:#}"));

            exit_code(&err)
        }
    };
    process::exit(status);
}

fn log_level(verbose: u8) -> log::LevelFilter {
    match verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    }
}

/// Configuration errors exit with 2, everything else with 1.
fn exit_code(err: &anyhow::Error) -> i32 {
    match err.downcast_ref::<LazySeekError>() {
        Some(LazySeekError::Configuration { .. }) => 2,
        _ => 1,
    }
}

fn execute(cli: &Cli) -> anyhow::Result<()> {
    let options = build_options(cli)?;
    let (reader, len) = open_input(cli)?;
    let source = ForwardSource::new(reader, len);

    let stdout = io::stdout();
    let mut out = stdout.lock();
    match &cli.backing_file {
        Some(path) => {
            let file = fs::OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(true)
                .open(path)
                .with_context(|| format!("{}: failed to open backing file", path.display()))?;
            let mut stream = LazySeekStream::with_backing(source, file, options)?;
            run(cli, &mut stream, &mut out)?;
            stream.close()?;
        }
        None => {
            let mut stream = LazySeekStream::new(source, options)?;
            run(cli, &mut stream, &mut out)?;
            stream.close()?;
        }
    }
    out.flush()?;

    Ok(())
}

fn build_options(cli: &Cli) -> anyhow::Result<Options> {
    let mut options = match &cli.config {
        Some(path) => parse_config(path)
            .with_context(|| format!("{}: failed to read TOML config file", path.display()))?,
        None => Options::default(),
    };
    if cli.read_only {
        options.writable = false;
    }
    if let Some(chunk_size) = cli.chunk_size {
        options.chunk_size = lazyseek::ByteValue(chunk_size);
    }
    if let Some(limit) = cli.memory_limit {
        options.memory_limit = Some(lazyseek::ByteValue(limit));
    }
    log::debug!("options: {options:?}");

    Ok(options)
}

fn open_input(cli: &Cli) -> anyhow::Result<(Box<dyn Read>, u64)> {
    if cli.input == "-" {
        let len = cli
            .length
            .ok_or_else(|| anyhow::anyhow!("--length is required when reading from stdin"))?;

        return Ok((Box::new(io::stdin()), len));
    }

    let path = Path::new(&cli.input);
    let file = fs::File::open(path)
        .with_context(|| format!("{}: failed to open input", path.display()))?;
    let len = match cli.length {
        Some(len) => len,
        None => file.metadata()?.len(),
    };

    Ok((Box::new(file), len))
}

fn run<B: Backing>(
    cli: &Cli,
    stream: &mut LazySeekStream<Box<dyn Read>, B>,
    out: &mut impl Write,
) -> anyhow::Result<()> {
    for patch in &cli.patches {
        stream.seek(SeekFrom::Start(patch.offset))?;
        stream
            .write_all(&patch.data)
            .with_context(|| format!("failed to patch offset {}", patch.offset))?;
    }

    if cli.ranges.is_empty() {
        let all = ByteRange::new(0, stream.len());
        print_range(cli.output, stream, &all, out)?;
    }
    for range in &cli.ranges {
        print_range(cli.output, stream, range, out)?;
    }

    Ok(())
}

/// Print the bytes of `range`, or as much of it as is available.
fn print_range<B: Backing>(
    format: OutputFormat,
    stream: &mut LazySeekStream<Box<dyn Read>, B>,
    range: &ByteRange,
    out: &mut impl Write,
) -> anyhow::Result<()> {
    stream.seek(SeekFrom::Start(range.start))?;
    let mut data = vec![];
    let mut buf = vec![0; stream.options().chunk_size.0.clamp(1, 64 * 1024) as usize];
    let mut remaining = range.bytecount();
    while remaining > 0 {
        let len = remaining.min(buf.len() as u64) as usize;
        let count = stream.read(&mut buf[..len])?;
        if count == 0 {
            break;
        }
        match format {
            OutputFormat::Raw => out.write_all(&buf[..count])?,
            OutputFormat::Hex => data.extend_from_slice(&buf[..count]),
        }
        remaining -= count as u64;
    }
    if format == OutputFormat::Hex {
        writeln!(
            out,
            "{}..{}: {}",
            range.start,
            range.start + data.len() as u64,
            to_hex(&data)
        )?;
    }

    Ok(())
}

/// Parse byte arguments
fn parse_bytes(str: &str) -> Result<u64, parse_size::Error> {
    parse_size::Config::new().with_binary().parse_size(str)
}

fn parse_range(str: &str) -> anyhow::Result<ByteRange> {
    let (start, end) = str
        .split_once("..")
        .ok_or_else(|| anyhow::anyhow!("expected START..END, got {str:?}"))?;
    let start = parse_bytes(start)?;
    let end = parse_bytes(end)?;
    if end < start {
        anyhow::bail!("range end {end} is before start {start}");
    }

    Ok(ByteRange::new(start, end))
}

fn parse_patch(str: &str) -> anyhow::Result<Patch> {
    let (offset, hex) = str
        .split_once(':')
        .ok_or_else(|| anyhow::anyhow!("expected OFFSET:HEX, got {str:?}"))?;

    Ok(Patch {
        offset: parse_bytes(offset)?,
        data: from_hex(hex)?,
    })
}

fn from_hex(str: &str) -> anyhow::Result<Vec<u8>> {
    if str.len() % 2 != 0 || !str.is_ascii() {
        anyhow::bail!("invalid hex string {str:?}");
    }
    (0..str.len())
        .step_by(2)
        .map(|i| {
            u8::from_str_radix(&str[i..i + 2], 16)
                .with_context(|| format!("invalid hex string {str:?}"))
        })
        .collect()
}

fn to_hex(data: &[u8]) -> String {
    data.iter().map(|b| format!("{b:02x}")).collect()
}

/// Print an error message to stderr, with standard format.
fn print_error(msg: &str) {
    log::error!("{msg}");
    eprintln!("{}: {}", style("ERROR").for_stderr().red().bold(), msg);
}

fn parse_config(path: &Path) -> anyhow::Result<Options> {
    let content = fs::read_to_string(path)?;

    Ok(toml::from_str(&content)?)
}
