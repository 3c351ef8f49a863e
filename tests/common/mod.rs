//! Archive builder and a tiny range-serving HTTP server for the
//! integration tests.

#![allow(dead_code)]

use std::io::Write;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use flate2::Compression;
use flate2::write::DeflateEncoder;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use async_trait::async_trait;
use zipsift::io::MemoryReader;
use zipsift::zip::ZipCrypto;
use zipsift::{ByteSource, ReadAt, ZipExtractor, ZipResult};

pub const MOD_TIME: u16 = 0x6000;
pub const MOD_DATE: u16 = 0x5d51;

pub fn fixture(name: &str) -> Vec<u8> {
    let path = format!("{}/tests/fixtures/{name}", env!("CARGO_MANIFEST_DIR"));
    std::fs::read(path).unwrap()
}

pub fn extractor(bytes: Vec<u8>) -> ZipExtractor<MemoryReader> {
    ZipExtractor::new(ByteSource::new(Arc::new(MemoryReader::new(bytes))))
}

/// Memory reader whose reads starting at `fail_at` fail like a dropped
/// connection.
pub struct FlakyReader {
    inner: MemoryReader,
    fail_at: u64,
}

impl FlakyReader {
    pub fn new(bytes: Vec<u8>, fail_at: u64) -> Self {
        Self {
            inner: MemoryReader::new(bytes),
            fail_at,
        }
    }
}

#[async_trait]
impl ReadAt for FlakyReader {
    async fn read_at(&self, offset: u64, buf: &mut [u8]) -> ZipResult<usize> {
        if offset == self.fail_at {
            return Err(std::io::Error::other("link dropped").into());
        }
        self.inner.read_at(offset, buf).await
    }

    fn size(&self) -> u64 {
        self.inner.size()
    }
}

pub fn fox(lines: usize) -> Vec<u8> {
    b"The quick brown fox jumps over the lazy dog.\n".repeat(lines)
}

pub struct TestEntry {
    pub name: Vec<u8>,
    pub data: Vec<u8>,
    pub deflate: bool,
    pub password: Option<Vec<u8>>,
    pub streamed: bool,
    pub zip64: bool,
    pub method: Option<u16>,
}

impl TestEntry {
    pub fn stored(name: &str, data: &[u8]) -> Self {
        Self {
            name: name.as_bytes().to_vec(),
            data: data.to_vec(),
            deflate: false,
            password: None,
            streamed: false,
            zip64: false,
            method: None,
        }
    }

    pub fn deflated(name: &str, data: &[u8]) -> Self {
        Self {
            deflate: true,
            ..Self::stored(name, data)
        }
    }

    pub fn encrypted(mut self, password: &str) -> Self {
        self.password = Some(password.as_bytes().to_vec());
        self
    }

    /// Sizes and CRC only in a trailing data descriptor (flag bit 3).
    pub fn streamed(mut self) -> Self {
        self.streamed = true;
        self
    }

    /// Local header sizes in a zip64 extra field; a streamed entry gets a
    /// 24-byte descriptor.
    pub fn zip64(mut self) -> Self {
        self.zip64 = true;
        self
    }

    /// Record a method number without changing how the data is stored.
    pub fn method(mut self, method: u16) -> Self {
        self.method = Some(method);
        self
    }
}

/// Where things ended up in a built archive; offsets are into `bytes`.
pub struct BuiltZip {
    pub bytes: Vec<u8>,
    pub local_headers: Vec<usize>,
    pub cd_offset: usize,
    pub eocd_offset: usize,
}

#[derive(Default)]
pub struct ZipBuilder {
    prefix: Vec<u8>,
    entries: Vec<TestEntry>,
    comment: Vec<u8>,
    zip64: bool,
}

fn put_u16(out: &mut Vec<u8>, v: u16) {
    out.extend_from_slice(&v.to_le_bytes());
}

fn put_u32(out: &mut Vec<u8>, v: u32) {
    out.extend_from_slice(&v.to_le_bytes());
}

fn put_u64(out: &mut Vec<u8>, v: u64) {
    out.extend_from_slice(&v.to_le_bytes());
}

impl ZipBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes in front of the archive; offsets stay relative to the
    /// archive, like a self-extractor stub.
    pub fn prefix(mut self, bytes: &[u8]) -> Self {
        self.prefix = bytes.to_vec();
        self
    }

    pub fn entry(mut self, entry: TestEntry) -> Self {
        self.entries.push(entry);
        self
    }

    pub fn comment(mut self, comment: &[u8]) -> Self {
        self.comment = comment.to_vec();
        self
    }

    /// End with a zip64 record and locator; the classic record only
    /// carries sentinels.
    pub fn zip64(mut self) -> Self {
        self.zip64 = true;
        self
    }

    pub fn build(&self) -> BuiltZip {
        let base = self.prefix.len();
        let mut out = self.prefix.clone();
        let mut central = Vec::new();
        let mut local_headers = Vec::new();

        for e in &self.entries {
            let crc = crc32fast::hash(&e.data);
            let mut payload = if e.deflate {
                let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
                encoder.write_all(&e.data).unwrap();
                encoder.finish().unwrap()
            } else {
                e.data.clone()
            };

            let mut flags = 0u16;
            if e.streamed {
                flags |= 0x08;
            }
            if let Some(password) = &e.password {
                flags |= 0x01;
                let check = if e.streamed {
                    (MOD_TIME >> 8) as u8
                } else {
                    (crc >> 24) as u8
                };
                let mut encrypted = vec![0xa5; 11];
                encrypted.push(check);
                encrypted.extend_from_slice(&payload);
                ZipCrypto::from_password(password).encrypt(&mut encrypted);
                payload = encrypted;
            }
            let method = e.method.unwrap_or(if e.deflate { 8 } else { 0 });
            let csize = payload.len() as u32;
            let usize_ = e.data.len() as u32;

            let lfh_offset = out.len();
            local_headers.push(lfh_offset);
            put_u32(&mut out, 0x04034b50);
            put_u16(&mut out, 20);
            put_u16(&mut out, flags);
            put_u16(&mut out, method);
            put_u16(&mut out, MOD_TIME);
            put_u16(&mut out, MOD_DATE);
            let mut extra = Vec::new();
            if e.zip64 {
                put_u16(&mut extra, 0x0001);
                put_u16(&mut extra, 16);
                put_u64(&mut extra, if e.streamed { 0 } else { usize_ as u64 });
                put_u64(&mut extra, if e.streamed { 0 } else { csize as u64 });
                put_u32(&mut out, if e.streamed { 0 } else { crc });
                put_u32(&mut out, 0xFFFFFFFF);
                put_u32(&mut out, 0xFFFFFFFF);
            } else if e.streamed {
                put_u32(&mut out, 0);
                put_u32(&mut out, 0);
                put_u32(&mut out, 0);
            } else {
                put_u32(&mut out, crc);
                put_u32(&mut out, csize);
                put_u32(&mut out, usize_);
            }
            put_u16(&mut out, e.name.len() as u16);
            put_u16(&mut out, extra.len() as u16);
            out.extend_from_slice(&e.name);
            out.extend_from_slice(&extra);
            out.extend_from_slice(&payload);
            if e.streamed {
                put_u32(&mut out, 0x08074b50);
                put_u32(&mut out, crc);
                if e.zip64 {
                    put_u64(&mut out, csize as u64);
                    put_u64(&mut out, usize_ as u64);
                } else {
                    put_u32(&mut out, csize);
                    put_u32(&mut out, usize_);
                }
            }

            put_u32(&mut central, 0x02014b50);
            put_u16(&mut central, 20);
            put_u16(&mut central, 20);
            put_u16(&mut central, flags);
            put_u16(&mut central, method);
            put_u16(&mut central, MOD_TIME);
            put_u16(&mut central, MOD_DATE);
            put_u32(&mut central, crc);
            put_u32(&mut central, csize);
            put_u32(&mut central, usize_);
            put_u16(&mut central, e.name.len() as u16);
            put_u16(&mut central, 0);
            put_u16(&mut central, 0);
            put_u16(&mut central, 0);
            put_u16(&mut central, 0);
            put_u32(&mut central, 0);
            put_u32(&mut central, (lfh_offset - base) as u32);
            central.extend_from_slice(&e.name);
        }

        let cd_offset = out.len();
        out.extend_from_slice(&central);
        let count = self.entries.len();
        if self.zip64 {
            let eocd64_offset = out.len();
            put_u32(&mut out, 0x06064b50);
            put_u64(&mut out, 44);
            put_u16(&mut out, 45);
            put_u16(&mut out, 45);
            put_u32(&mut out, 0);
            put_u32(&mut out, 0);
            put_u64(&mut out, count as u64);
            put_u64(&mut out, count as u64);
            put_u64(&mut out, central.len() as u64);
            put_u64(&mut out, (cd_offset - base) as u64);

            put_u32(&mut out, 0x07064b50);
            put_u32(&mut out, 0);
            put_u64(&mut out, (eocd64_offset - base) as u64);
            put_u32(&mut out, 1);
        }
        let eocd_offset = out.len();
        put_u32(&mut out, 0x06054b50);
        put_u16(&mut out, 0);
        put_u16(&mut out, 0);
        if self.zip64 {
            put_u16(&mut out, 0xFFFF);
            put_u16(&mut out, 0xFFFF);
            put_u32(&mut out, 0xFFFFFFFF);
            put_u32(&mut out, 0xFFFFFFFF);
        } else {
            put_u16(&mut out, count as u16);
            put_u16(&mut out, count as u16);
            put_u32(&mut out, central.len() as u32);
            put_u32(&mut out, (cd_offset - base) as u32);
        }
        put_u16(&mut out, self.comment.len() as u16);
        out.extend_from_slice(&self.comment);

        BuiltZip {
            bytes: out,
            local_headers,
            cd_offset,
            eocd_offset,
        }
    }
}

/// Serve `data` over HTTP with Range support on a local port.
///
/// Returns the URL and a counter of ranged GETs answered.
pub async fn serve(data: Vec<u8>) -> (String, Arc<AtomicUsize>) {
    serve_shifted(data, 0).await
}

/// Like [`serve`], but every range is answered from `shift` bytes later
/// than asked, with a matching `Content-Range`.
pub async fn serve_shifted(data: Vec<u8>, shift: usize) -> (String, Arc<AtomicUsize>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let gets = Arc::new(AtomicUsize::new(0));
    let data = Arc::new(data);

    let counter = Arc::clone(&gets);
    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let data = Arc::clone(&data);
            let counter = Arc::clone(&counter);
            tokio::spawn(async move {
                let _ = respond(&mut socket, &data, &counter, shift).await;
            });
        }
    });

    (format!("http://{addr}/archive.zip"), gets)
}

async fn respond(
    socket: &mut TcpStream,
    data: &[u8],
    gets: &AtomicUsize,
    shift: usize,
) -> std::io::Result<()> {
    let mut request = Vec::new();
    let mut buf = [0u8; 1024];
    while !request.windows(4).any(|w| w == b"\r\n\r\n") {
        let n = socket.read(&mut buf).await?;
        if n == 0 {
            return Ok(());
        }
        request.extend_from_slice(&buf[..n]);
    }
    let text = String::from_utf8_lossy(&request);
    let method = text.split_whitespace().next().unwrap_or("").to_string();
    let range = text.lines().find_map(|line| {
        let (name, value) = line.split_once(':')?;
        name.trim()
            .eq_ignore_ascii_case("range")
            .then(|| value.trim().to_string())
    });
    let len = data.len();

    let (head, body): (String, &[u8]) = if method == "HEAD" {
        (
            format!("HTTP/1.1 200 OK\r\nContent-Length: {len}\r\nAccept-Ranges: bytes\r\n"),
            &[],
        )
    } else if let Some(bounds) = range.as_deref().and_then(|r| r.strip_prefix("bytes=")) {
        gets.fetch_add(1, Ordering::SeqCst);
        let (from, to) = bounds.split_once('-').unwrap_or((bounds, ""));
        let from: usize = from.parse::<usize>().unwrap_or(0) + shift;
        let to: usize = (to.parse().unwrap_or(len - 1) + shift).min(len - 1);
        let from = from.min(to);
        let body = &data[from..=to];
        (
            format!(
                "HTTP/1.1 206 Partial Content\r\nContent-Range: bytes {from}-{to}/{len}\r\nContent-Length: {}\r\n",
                body.len()
            ),
            body,
        )
    } else {
        (format!("HTTP/1.1 200 OK\r\nContent-Length: {len}\r\n"), data)
    };

    socket.write_all(head.as_bytes()).await?;
    socket.write_all(b"Connection: close\r\n\r\n").await?;
    socket.write_all(body).await?;
    socket.shutdown().await
}
