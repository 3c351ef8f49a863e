//! Traditional PKWARE ("ZipCrypto") encryption.
//!
//! Three 32-bit key words start at fixed constants and are stirred with
//! every password byte. During decryption each plaintext byte, not the
//! ciphertext byte, is fed back into the keys. Twelve random bytes precede
//! the entry data; the last one, once decrypted, is a check byte that
//! rejects most wrong keys before any plaintext is produced.

use crate::error::{ZipError, ZipResult};

use super::entry::{CheckByte, EntryDescriptor};

/// Length of the encryption header in front of every encrypted entry.
pub const ENCRYPTION_HEADER_LEN: usize = 12;

const INITIAL_KEYS: [u32; 3] = [0x12345678, 0x23456789, 0x34567890];

/// Standard CRC32 lookup table (polynomial 0xEDB88320).
const CRC32_TABLE: [u32; 256] = {
    let mut table = [0u32; 256];
    let mut i = 0u32;
    while i < 256 {
        let mut crc = i;
        let mut j = 0;
        while j < 8 {
            if crc & 1 != 0 {
                crc = (crc >> 1) ^ 0xEDB88320;
            } else {
                crc >>= 1;
            }
            j += 1;
        }
        table[i as usize] = crc;
        i += 1;
    }
    table
};

/// Key material as supplied by the user.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum KeyMaterial {
    #[default]
    None,
    Password(Vec<u8>),
    /// Password given as hex, for passwords that are not valid text
    HexPassword(Vec<u8>),
    /// The three internal key words, e.g. recovered by a known-plaintext attack
    Keys([u32; 3]),
}

impl KeyMaterial {
    /// Build key material from the three mutually exclusive options.
    ///
    /// Keys are three comma-separated hex words, `0x` prefix optional.
    pub fn from_options(
        password: Option<&str>,
        hex_password: Option<&str>,
        keys: Option<&str>,
    ) -> ZipResult<Self> {
        let given = [password.is_some(), hex_password.is_some(), keys.is_some()];
        if given.iter().filter(|&&g| g).count() > 1 {
            return Err(ZipError::Usage(
                "--password, --hexpassword and --keys are mutually exclusive".to_string(),
            ));
        }

        if let Some(password) = password {
            return Ok(KeyMaterial::Password(password.as_bytes().to_vec()));
        }
        if let Some(hex_password) = hex_password {
            let bytes = hex::decode(hex_password.trim())
                .map_err(|e| ZipError::Usage(format!("bad hex password: {e}")))?;
            return Ok(KeyMaterial::HexPassword(bytes));
        }
        if let Some(keys) = keys {
            return Ok(KeyMaterial::Keys(parse_keys(keys)?));
        }
        Ok(KeyMaterial::None)
    }

    pub fn is_none(&self) -> bool {
        matches!(self, KeyMaterial::None)
    }

    /// A fresh cipher state, or `None` without key material.
    pub fn cipher(&self) -> Option<ZipCrypto> {
        match self {
            KeyMaterial::None => None,
            KeyMaterial::Password(p) | KeyMaterial::HexPassword(p) => {
                Some(ZipCrypto::from_password(p))
            }
            KeyMaterial::Keys(keys) => Some(ZipCrypto::from_keys(*keys)),
        }
    }
}

fn parse_keys(text: &str) -> ZipResult<[u32; 3]> {
    let words: Vec<&str> = text.split(',').map(str::trim).collect();
    if words.len() != 3 {
        return Err(ZipError::Usage(format!(
            "expected three comma-separated key words, got {}",
            words.len()
        )));
    }
    let mut keys = [0u32; 3];
    for (key, word) in keys.iter_mut().zip(&words) {
        let digits = word
            .strip_prefix("0x")
            .or_else(|| word.strip_prefix("0X"))
            .unwrap_or(word);
        *key = u32::from_str_radix(digits, 16)
            .map_err(|e| ZipError::Usage(format!("bad key word {word:?}: {e}")))?;
    }
    Ok(keys)
}

/// Cipher state for one entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZipCrypto {
    keys: [u32; 3],
}

impl ZipCrypto {
    pub fn from_password(password: &[u8]) -> Self {
        let mut c = Self { keys: INITIAL_KEYS };
        for &b in password {
            c.update_keys(b);
        }
        c
    }

    pub fn from_keys(keys: [u32; 3]) -> Self {
        Self { keys }
    }

    pub fn keys(&self) -> [u32; 3] {
        self.keys
    }

    fn crc32_byte(crc: u32, b: u8) -> u32 {
        CRC32_TABLE[((crc ^ b as u32) & 0xff) as usize] ^ (crc >> 8)
    }

    fn update_keys(&mut self, c: u8) {
        self.keys[0] = Self::crc32_byte(self.keys[0], c);
        self.keys[1] = self.keys[1]
            .wrapping_add(self.keys[0] & 0xff)
            .wrapping_mul(134775813)
            .wrapping_add(1);
        self.keys[2] = Self::crc32_byte(self.keys[2], (self.keys[1] >> 24) as u8);
    }

    fn keystream_byte(&self) -> u8 {
        let temp = (self.keys[2] | 2) as u16;
        (temp.wrapping_mul(temp ^ 1) >> 8) as u8
    }

    pub fn decrypt_byte(&mut self, c: u8) -> u8 {
        let plain = c ^ self.keystream_byte();
        self.update_keys(plain);
        plain
    }

    /// Decrypt data in place.
    pub fn decrypt(&mut self, data: &mut [u8]) {
        for b in data.iter_mut() {
            *b = self.decrypt_byte(*b);
        }
    }

    /// Encrypt data in place.
    pub fn encrypt(&mut self, data: &mut [u8]) {
        for b in data.iter_mut() {
            let plain = *b;
            *b = plain ^ self.keystream_byte();
            self.update_keys(plain);
        }
    }

    /// Decrypt the 12-byte header and compare its last byte.
    pub fn check_header(
        &mut self,
        header: &[u8; ENCRYPTION_HEADER_LEN],
        check: CheckByte,
    ) -> ZipResult<()> {
        let mut last = 0u8;
        for &b in header {
            last = self.decrypt_byte(b);
        }
        if last != check.value() {
            return Err(ZipError::BadKey {
                expected: check.value(),
                actual: last,
            });
        }
        Ok(())
    }
}

/// Turn an entry's stored payload into its compressed stream.
///
/// Unencrypted payloads pass through. Encrypted ones need key material,
/// and the header check runs before any byte is decrypted past it; the
/// returned data excludes the 12-byte header.
pub fn decrypt_entry(
    entry: &EntryDescriptor,
    mut payload: Vec<u8>,
    key: &KeyMaterial,
) -> ZipResult<Vec<u8>> {
    if entry.uses_unsupported_encryption() {
        return Err(ZipError::UnsupportedEncryption(
            "AES and strong encryption are not supported",
        ));
    }
    if !entry.is_encrypted() {
        return Ok(payload);
    }

    let mut cipher = key.cipher().ok_or(ZipError::MissingKey)?;

    if payload.len() < ENCRYPTION_HEADER_LEN {
        return Err(ZipError::Truncated {
            offset: entry.lfh_offset,
            needed: ENCRYPTION_HEADER_LEN as u64,
            available: payload.len() as u64,
        });
    }
    let mut header = [0u8; ENCRYPTION_HEADER_LEN];
    header.copy_from_slice(&payload[..ENCRYPTION_HEADER_LEN]);
    cipher.check_header(&header, entry.check_byte())?;

    payload.drain(..ENCRYPTION_HEADER_LEN);
    cipher.decrypt(&mut payload);
    Ok(payload)
}
