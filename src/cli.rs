use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "zipsift")]
#[command(version)]
#[command(about = "Inspect ZIP archives, local or over HTTP, without trusting their directory", long_about = None)]
#[command(after_help = "Examples:\n  \
  zipsift -q archive.zip                     list entries from the central directory\n  \
  zipsift -v suspicious.bin                  dump every record found by signature\n  \
  zipsift -o 0x4000 -c readme.txt setup.exe  cat an entry of an archive embedded at 0x4000\n  \
  zipsift --password secret -s '*' a.zip     decrypt and save everything\n  \
  zipsift -q https://example.com/big.zip     list a remote archive with two range requests")]
pub struct Cli {
    /// ZIP files, directories (with -r) or HTTP URLs; stdin when empty
    #[arg(value_name = "FILES")]
    pub files: Vec<String>,

    /// Quick scan: trust the central directory (default: scan for all signatures)
    #[arg(short = 'q', long)]
    pub quick: bool,

    /// Dump every structural record; repeat for debug logging
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Only print errors
    #[arg(long)]
    pub quiet: bool,

    /// Start of the archive window; negative counts from the end
    #[arg(short = 'o', long, value_name = "OFFSET", allow_hyphen_values = true, value_parser = parse_offset)]
    pub offset: Option<i64>,

    /// Length of the archive window
    #[arg(short = 'l', long, value_name = "LENGTH", value_parser = parse_length)]
    pub length: Option<u64>,

    /// Bytes read per step by a full scan
    #[arg(long, value_name = "BYTES", value_parser = parse_length)]
    pub chunksize: Option<u64>,

    /// Print entry contents to stdout ('*' or nothing: all)
    #[arg(short = 'c', long, value_name = "NAMES", num_args = 0..)]
    pub cat: Option<Vec<String>>,

    /// Print entry payloads decrypted but not decompressed
    #[arg(short = 'p', long, value_name = "NAMES", num_args = 0..)]
    pub raw: Option<Vec<String>>,

    /// Save entries under the output directory
    #[arg(short = 's', long, value_name = "NAMES", num_args = 0..)]
    pub save: Option<Vec<String>>,

    /// Directory for --save
    #[arg(short = 'd', long, value_name = "DIR", default_value = ".")]
    pub outputdir: String,

    /// Hex dump payloads, extra fields and comments
    #[arg(long)]
    pub dumpraw: bool,

    /// Password for encrypted entries
    #[arg(long, value_name = "PASSWORD")]
    pub password: Option<String>,

    /// Password as hex bytes
    #[arg(long, value_name = "HEX")]
    pub hexpassword: Option<String>,

    /// The three internal cipher keys, comma-separated hex
    #[arg(long, value_name = "K0,K1,K2")]
    pub keys: Option<String>,

    /// Descend into directories
    #[arg(short = 'r', long)]
    pub recurse: bool,

    /// Skip symbolic links
    #[arg(short = 'L', long)]
    pub skiplinks: bool,
}

impl Cli {
    pub fn is_http_url(path: &str) -> bool {
        path.starts_with("http://") || path.starts_with("https://")
    }

    /// True when any entry contents are requested.
    pub fn extracts(&self) -> bool {
        self.cat.is_some() || self.raw.is_some() || self.save.is_some()
    }

    /// True when listings should be printed.
    pub fn lists(&self) -> bool {
        !self.quiet && !self.extracts()
    }
}

/// Does `name` match one of the names given to -c/-p/-s?
///
/// An empty list and `*` both select everything.
pub fn selects(names: &[String], name: &str) -> bool {
    names.is_empty() || names.iter().any(|n| n == "*" || n == name)
}

fn parse_number(text: &str) -> Result<u64, String> {
    let parsed = match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        Some(digits) => u64::from_str_radix(digits, 16),
        None => text.parse(),
    };
    parsed.map_err(|e| format!("invalid number {text:?}: {e}"))
}

fn parse_offset(text: &str) -> Result<i64, String> {
    let (negative, digits) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text),
    };
    let value = i64::try_from(parse_number(digits)?).map_err(|e| e.to_string())?;
    Ok(if negative { -value } else { value })
}

fn parse_length(text: &str) -> Result<u64, String> {
    parse_number(text)
}
