//! Store and deflate.

use flate2::{Decompress, FlushDecompress, Status};

use crate::error::{IntegrityWarning, ZipError, ZipResult};

use super::structures::CompressionMethod;

const INFLATE_STEP: usize = 64 * 1024;

/// Initial output allocation is capped; a forged size must not reserve
/// gigabytes up front.
const MAX_PREALLOC: u64 = 16 * 1024 * 1024;

/// Output allowed past twice the declared size before inflating stops.
const INFLATE_SLACK: u64 = 1024 * 1024;

/// Decompressed bytes and whatever went wrong producing them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decompressed {
    pub data: Vec<u8>,
    pub warning: Option<IntegrityWarning>,
}

/// Decompress an entry's (already decrypted) data.
///
/// Inflate errors after some output keep that output and carry an
/// [`IntegrityWarning::Inflate`]; an error before any output is
/// [`ZipError::InvalidData`]. Output running well past the declared size
/// is cut off with an [`IntegrityWarning::SizeMismatch`].
pub fn decompress(
    method: CompressionMethod,
    data: &[u8],
    uncompressed_size: u64,
) -> ZipResult<Decompressed> {
    match method {
        CompressionMethod::Stored => Ok(unstore(data, uncompressed_size)),
        CompressionMethod::Deflate => inflate(data, uncompressed_size),
        other => Err(ZipError::UnsupportedMethod(other.as_u16())),
    }
}

fn unstore(data: &[u8], uncompressed_size: u64) -> Decompressed {
    if (data.len() as u64) < uncompressed_size {
        return Decompressed {
            data: data.to_vec(),
            warning: Some(IntegrityWarning::ShortData {
                expected: uncompressed_size,
                actual: data.len() as u64,
            }),
        };
    }
    Decompressed {
        data: data[..uncompressed_size as usize].to_vec(),
        warning: None,
    }
}

fn inflate(data: &[u8], uncompressed_size: u64) -> ZipResult<Decompressed> {
    // Raw deflate, no zlib header
    let mut inflater = Decompress::new(false);
    let mut out = Vec::with_capacity(uncompressed_size.min(MAX_PREALLOC) as usize);
    let mut step = vec![0u8; INFLATE_STEP];
    let limit = uncompressed_size.saturating_mul(2).saturating_add(INFLATE_SLACK);

    loop {
        let consumed = inflater.total_in() as usize;
        let before = inflater.total_out();
        let status = inflater.decompress(&data[consumed..], &mut step, FlushDecompress::None);
        let produced = (inflater.total_out() - before) as usize;
        // Bytes written before an error are kept
        out.extend_from_slice(&step[..produced]);

        match status {
            Ok(Status::StreamEnd) => break,
            Ok(_) if produced == 0 && inflater.total_in() as usize == consumed => {
                // Input exhausted before the final block
                break;
            }
            Ok(_) if out.len() as u64 > limit => {
                out.truncate(limit as usize);
                return Ok(Decompressed {
                    warning: Some(IntegrityWarning::SizeMismatch {
                        declared: uncompressed_size,
                        actual: out.len() as u64,
                    }),
                    data: out,
                });
            }
            Ok(_) => {}
            Err(e) if out.is_empty() => {
                return Err(ZipError::InvalidData(format!("inflate failed: {e}")));
            }
            Err(e) => {
                return Ok(Decompressed {
                    warning: Some(IntegrityWarning::Inflate {
                        produced: out.len() as u64,
                        reason: e.to_string(),
                    }),
                    data: out,
                });
            }
        }
    }

    Ok(Decompressed {
        data: out,
        warning: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::Compression;
    use flate2::write::DeflateEncoder;
    use std::io::Write;

    fn deflate(data: &[u8]) -> Vec<u8> {
        let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    #[test]
    fn stored_takes_declared_length() {
        let out = decompress(CompressionMethod::Stored, b"hello world", 5).unwrap();
        assert_eq!(out.data, b"hello");
        assert_eq!(out.warning, None);
    }

    #[test]
    fn stored_short_input_warns() {
        let out = decompress(CompressionMethod::Stored, b"abc", 10).unwrap();
        assert_eq!(out.data, b"abc");
        assert_eq!(
            out.warning,
            Some(IntegrityWarning::ShortData {
                expected: 10,
                actual: 3
            })
        );
    }

    #[test]
    fn inflates_raw_deflate() {
        let text = b"The quick brown fox jumps over the lazy dog.\n".repeat(200);
        let out = decompress(CompressionMethod::Deflate, &deflate(&text), text.len() as u64).unwrap();
        assert_eq!(out.data, text);
        assert_eq!(out.warning, None);
    }

    #[test]
    fn output_past_the_declared_size_is_cut_off() {
        // 8 MiB of zeros deflates to a few KiB
        let bomb = deflate(&vec![0u8; 8 * 1024 * 1024]);
        let out = decompress(CompressionMethod::Deflate, &bomb, 10).unwrap();
        let limit = 20 + INFLATE_SLACK;
        assert_eq!(out.data.len() as u64, limit);
        assert_eq!(
            out.warning,
            Some(IntegrityWarning::SizeMismatch {
                declared: 10,
                actual: limit
            })
        );
    }

    #[test]
    fn garbage_is_invalid_data() {
        // Block type 3 is reserved
        let result = decompress(CompressionMethod::Deflate, &[0xff; 32], 100);
        assert!(matches!(result, Err(ZipError::InvalidData(_))));
    }

    #[test]
    fn corruption_after_output_keeps_partial_data() {
        // A stored deflate block of 5 bytes, then a block with reserved type
        let mut data = vec![0x00, 0x05, 0x00, 0xfa, 0xff];
        data.extend_from_slice(b"hello");
        data.push(0x07);
        let out = decompress(CompressionMethod::Deflate, &data, 10).unwrap();
        assert_eq!(out.data, b"hello");
        assert!(matches!(
            out.warning,
            Some(IntegrityWarning::Inflate { produced: 5, .. })
        ));
    }

    #[test]
    fn other_methods_are_unsupported() {
        let result = decompress(CompressionMethod::Unknown(14), b"", 0);
        assert!(matches!(result, Err(ZipError::UnsupportedMethod(14))));
    }
}
