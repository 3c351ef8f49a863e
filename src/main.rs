//! Main entry point for the zipsift CLI application.
//!
//! Listing, dumping and writing files happen here; everything that
//! understands ZIP structure lives in the library.

use anyhow::{Context, Result, bail};
use clap::Parser;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use zipsift::cli::selects;
use zipsift::zip::{Record, display_name};
use zipsift::{
    ByteSource, Cli, EntryDescriptor, HttpRangeReader, KeyMaterial, LocalFileReader, MemoryReader,
    ReadAt, ScanMode, ZipExtractor,
};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli);

    let key = KeyMaterial::from_options(
        cli.password.as_deref(),
        cli.hexpassword.as_deref(),
        cli.keys.as_deref(),
    )?;

    if cli.files.is_empty() {
        let mut data = Vec::new();
        tokio::io::stdin()
            .read_to_end(&mut data)
            .await
            .context("reading stdin")?;
        let reader = Arc::new(MemoryReader::new(data));
        return process_zip(reader, "<stdin>", &cli, &key).await;
    }

    let inputs = collect_inputs(&cli).await?;
    let mut failed = 0usize;
    for input in &inputs {
        if let Err(e) = process_input(input, &cli, &key).await {
            eprintln!("{input}: {e:#}");
            failed += 1;
        }
    }
    if failed > 0 {
        bail!("{failed} of {} inputs failed", inputs.len());
    }
    Ok(())
}

/// Default level `warn`; each -v raises it, `RUST_LOG` overrides.
fn init_logging(cli: &Cli) {
    let level = if cli.quiet {
        "error"
    } else {
        match cli.verbose {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        }
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp(None)
        .init();
}

/// Expand directories (with -r) into the files below them.
async fn collect_inputs(cli: &Cli) -> Result<Vec<String>> {
    let mut inputs = Vec::new();
    let mut pending: Vec<PathBuf> = Vec::new();

    for file in &cli.files {
        if Cli::is_http_url(file) {
            inputs.push(file.clone());
        } else {
            pending.push(PathBuf::from(file));
        }
    }
    pending.reverse();

    while let Some(path) = pending.pop() {
        let meta = tokio::fs::symlink_metadata(&path)
            .await
            .with_context(|| format!("{}", path.display()))?;
        if meta.file_type().is_symlink() && cli.skiplinks {
            log::info!("skipping link {}", path.display());
            continue;
        }
        if tokio::fs::metadata(&path).await?.is_dir() {
            if !cli.recurse {
                eprintln!("{}: is a directory (use -r)", path.display());
                continue;
            }
            let mut children = Vec::new();
            let mut dir = tokio::fs::read_dir(&path).await?;
            while let Some(child) = dir.next_entry().await? {
                children.push(child.path());
            }
            children.sort();
            pending.extend(children.into_iter().rev());
        } else {
            inputs.push(path.display().to_string());
        }
    }
    Ok(inputs)
}

async fn process_input(input: &str, cli: &Cli, key: &KeyMaterial) -> Result<()> {
    if Cli::is_http_url(input) {
        // Handle remote ZIP file via HTTP Range requests
        let reader = Arc::new(HttpRangeReader::new(input.to_string()).await?);
        let result = process_zip(reader.clone(), input, cli, key).await;

        if !cli.quiet {
            eprintln!(
                "{input}: {} transferred in {} requests",
                format_size(reader.transferred_bytes()),
                reader.fetch_count()
            );
        }
        result
    } else {
        let reader = Arc::new(LocalFileReader::new(Path::new(input))?);
        process_zip(reader, input, cli, key).await
    }
}

/// Resolve -o/-l against the resource size.
fn window<R: ReadAt>(reader: Arc<R>, cli: &Cli) -> Result<ByteSource<R>> {
    let size = reader.size();
    let start = match cli.offset {
        None => 0,
        Some(offset) if offset >= 0 => offset as u64,
        Some(offset) => {
            let back = offset.unsigned_abs();
            if back > size {
                bail!("offset {offset} reaches before the start of a {size}-byte file");
            }
            size - back
        }
    };
    Ok(ByteSource::with_window(reader, start, cli.length)?)
}

async fn process_zip<R: ReadAt + 'static>(
    reader: Arc<R>,
    label: &str,
    cli: &Cli,
    key: &KeyMaterial,
) -> Result<()> {
    let mut extractor = ZipExtractor::new(window(reader, cli)?);
    if let Some(chunk_size) = cli.chunksize {
        extractor = extractor.with_chunk_size(chunk_size);
    }

    let mode = if cli.quick { ScanMode::Quick } else { ScanMode::Full };
    let scan = extractor.scan(mode).await?;

    if cli.lists() {
        println!(
            "{label}: {} entries, {} records ({:?} scan)",
            scan.entries.len(),
            scan.records.len(),
            mode
        );
        for entry in &scan.entries {
            println!("{}", entry.summary());
        }
    }
    for issue in &scan.issues {
        eprintln!("{label}: {issue}");
    }

    if cli.verbose > 0 && !cli.quiet {
        for located in &scan.records {
            println!(
                "{:>10x} PK{} {}",
                located.offset,
                located.record.tag(),
                describe(&located.record)
            );
        }
    }

    if cli.dumpraw {
        dump_raw(&extractor, &scan.records, &scan.entries, key).await;
    }

    if let Some(names) = &cli.cat {
        for entry in selected(&scan.entries, names) {
            match extractor.read_plaintext(entry, key).await {
                Ok(text) => {
                    if let Some(warning) = &text.warning {
                        eprintln!("{}: {warning}", entry.display_name());
                    }
                    write_stdout(&text.data).await?;
                }
                Err(e) => eprintln!("{}: {e}", entry.display_name()),
            }
        }
    }

    if let Some(names) = &cli.raw {
        for entry in selected(&scan.entries, names) {
            match extractor.read_raw(entry, key).await {
                Ok(data) => write_stdout(&data).await?,
                Err(e) => eprintln!("{}: {e}", entry.display_name()),
            }
        }
    }

    if let Some(names) = &cli.save {
        let outputdir = Path::new(&cli.outputdir);
        for entry in selected(&scan.entries, names) {
            let text = match extractor.read_plaintext(entry, key).await {
                Ok(text) => text,
                Err(e) => {
                    eprintln!("{}: {e}", entry.display_name());
                    continue;
                }
            };
            if let Some(warning) = &text.warning {
                eprintln!("{}: {warning}", entry.display_name());
            }
            let path = unique_path(output_path(outputdir, entry)).await?;
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(&path, &text.data)
                .await
                .with_context(|| format!("writing {}", path.display()))?;
            if !cli.quiet {
                eprintln!("  saved: {}", path.display());
            }
        }
    }

    Ok(())
}

fn selected<'a>(
    entries: &'a [EntryDescriptor],
    names: &'a [String],
) -> impl Iterator<Item = &'a EntryDescriptor> {
    entries
        .iter()
        .filter(|e| !e.is_directory())
        .filter(move |e| selects(names, &e.display_name()))
}

async fn write_stdout(data: &[u8]) -> Result<()> {
    let mut stdout = tokio::io::stdout();
    stdout.write_all(data).await?;
    stdout.flush().await?;
    Ok(())
}

/// One line per record for the verbose dump.
fn describe(record: &Record) -> String {
    match record {
        Record::LocalFileHeader(h) => format!(
            "local header {:?} method {} flags {:#06x} sizes {}/{} crc {:08x}",
            display_name(&h.file_name),
            h.compression_method,
            h.flags,
            h.compressed_size,
            h.uncompressed_size,
            h.crc32
        ),
        Record::CentralDirectoryEntry(c) => format!(
            "directory entry {:?} method {} flags {:#06x} sizes {}/{} crc {:08x} header at {:#x}",
            display_name(&c.file_name),
            c.compression_method,
            c.flags,
            c.compressed_size,
            c.uncompressed_size,
            c.crc32,
            c.lfh_offset
        ),
        Record::EndOfCentralDirectory(e) => format!(
            "end of directory: {} entries, directory {:#x}+{}, comment {} bytes",
            e.total_entries, e.cd_offset, e.cd_size, e.comment_len
        ),
        Record::DataDescriptor(d) => format!(
            "data descriptor sizes {}/{} crc {:08x}",
            d.compressed_size, d.uncompressed_size, d.crc32
        ),
        Record::Zip64EndOfCentralDirectory(e) => format!(
            "zip64 end of directory: {} entries, directory {:#x}+{}",
            e.total_entries, e.cd_offset, e.cd_size
        ),
        Record::Zip64Locator(l) => {
            format!("zip64 locator -> {:#x}", l.eocd64_offset)
        }
    }
}

/// Hex dump payloads (decrypted when a key was given), extra fields and
/// comments.
async fn dump_raw<R: ReadAt + 'static>(
    extractor: &ZipExtractor<R>,
    records: &[zipsift::zip::LocatedRecord],
    entries: &[EntryDescriptor],
    key: &KeyMaterial,
) {
    for located in records {
        let (what, bytes) = match &located.record {
            Record::LocalFileHeader(h) => ("extra", &h.extra),
            Record::CentralDirectoryEntry(c) if !c.comment.is_empty() => {
                println!("{:x} comment:", located.offset);
                print!("{}", hexdump(&c.comment));
                ("extra", &c.extra)
            }
            Record::CentralDirectoryEntry(c) => ("extra", &c.extra),
            Record::EndOfCentralDirectory(e) => ("comment", &e.comment),
            _ => continue,
        };
        if !bytes.is_empty() {
            println!("{:x} {what}:", located.offset);
            print!("{}", hexdump(bytes));
        }
    }

    for entry in entries {
        let data = if key.is_none() {
            extractor.read_stored(entry).await
        } else {
            extractor.read_raw(entry, key).await
        };
        match data {
            Ok(data) => {
                println!("{} ({} bytes):", entry.display_name(), data.len());
                print!("{}", hexdump(&data));
            }
            Err(e) => eprintln!("{}: {e}", entry.display_name()),
        }
    }
}

fn hexdump(data: &[u8]) -> String {
    let mut out = String::new();
    for (i, row) in data.chunks(16).enumerate() {
        let ascii: String = row
            .iter()
            .map(|&b| if b.is_ascii_graphic() || b == b' ' { b as char } else { '.' })
            .collect();
        out.push_str(&format!("{:08x}  {:<32}  {}\n", i * 16, hex::encode(row), ascii));
    }
    out
}

/// Output path for an entry, with absolute and `..` components stripped.
fn output_path(outputdir: &Path, entry: &EntryDescriptor) -> PathBuf {
    let name = entry.display_name().replace('\\', "/");
    let mut path = outputdir.to_path_buf();
    for component in Path::new(&name).components() {
        if let Component::Normal(part) = component {
            path.push(part);
        }
    }
    if path == outputdir {
        path.push(format!("entry-{:x}", entry.lfh_offset));
    }
    path
}

/// `path`, or `name-N.ext` for the first free N.
async fn unique_path(path: PathBuf) -> Result<PathBuf> {
    if !tokio::fs::try_exists(&path).await? {
        return Ok(path);
    }
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let extension = path.extension().map(|e| e.to_string_lossy().into_owned());
    for n in 1.. {
        let name = match &extension {
            Some(ext) => format!("{stem}-{n}.{ext}"),
            None => format!("{stem}-{n}"),
        };
        let candidate = path.with_file_name(name);
        if !tokio::fs::try_exists(&candidate).await? {
            return Ok(candidate);
        }
    }
    bail!("no free file name for {}", path.display())
}

/// Format a byte size into a human-readable string.
fn format_size(size: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if size >= GB {
        format!("{:.2} GB", size as f64 / GB as f64)
    } else if size >= MB {
        format!("{:.2} MB", size as f64 / MB as f64)
    } else if size >= KB {
        format!("{:.2} KB", size as f64 / KB as f64)
    } else {
        format!("{} bytes", size)
    }
}
