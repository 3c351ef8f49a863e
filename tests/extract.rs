mod common;

use std::io::Write;
use std::sync::Arc;

use common::{TestEntry, ZipBuilder, extractor, fixture, fox};
use zipsift::zip::{CheckByte, decompress};
use zipsift::{
    ByteSource, EntrySelector, IntegrityWarning, KeyMaterial, LocalFileReader, ScanMode,
    ZipError, ZipExtractor,
};

const SECRET_KEYS: [u32; 3] = [0xdda9e469, 0x96212999, 0xf9fc9651];

#[tokio::test]
async fn encrypted_deflate_round_trip() {
    let zip = extractor(fixture("encrypted-deflate.zip"));
    let key = KeyMaterial::Password(b"secret".to_vec());

    for mode in [ScanMode::Quick, ScanMode::Full] {
        let scan = zip.scan(mode).await.unwrap();
        assert!(scan.is_consistent(), "{mode:?}: {:?}", scan.issues);
        let entry = zip.entry(&scan, &EntrySelector::name("secret.txt")).unwrap();
        assert!(entry.is_encrypted());
        assert_eq!(entry.check_byte(), CheckByte::ModTime(0x9d));
        assert_eq!(entry.crc32, Some(0x56d00dc5));

        let text = zip.read_plaintext(entry, &key).await.unwrap();
        assert_eq!(text.data, fox(20), "{mode:?}");
        assert_eq!(text.warning, None);
    }
}

#[tokio::test]
async fn every_key_form_decrypts() {
    let zip = extractor(fixture("encrypted-deflate.zip"));
    let scan = zip.scan(ScanMode::Quick).await.unwrap();
    let entry = &scan.entries[0];

    let keys = [
        KeyMaterial::Password(b"secret".to_vec()),
        KeyMaterial::from_options(None, Some("736563726574"), None).unwrap(),
        KeyMaterial::Keys(SECRET_KEYS),
        KeyMaterial::from_options(None, None, Some("dda9e469,96212999,f9fc9651")).unwrap(),
    ];
    for key in &keys {
        let text = zip.read_plaintext(entry, key).await.unwrap();
        assert_eq!(text.data, fox(20), "{key:?}");
    }
}

#[tokio::test]
async fn stored_raw_and_plain_layers() {
    let zip = extractor(fixture("encrypted-deflate.zip"));
    let scan = zip.scan(ScanMode::Quick).await.unwrap();
    let entry = &scan.entries[0];
    let key = KeyMaterial::Keys(SECRET_KEYS);

    assert_eq!(zip.data_offset(entry).await.unwrap(), 40);
    let stored = zip.read_stored(entry).await.unwrap();
    assert_eq!(stored.len(), 67);

    let raw = zip.read_raw(entry, &key).await.unwrap();
    assert_eq!(raw.len(), 55);
    let inflated = decompress(entry.compression_method, &raw, 900).unwrap();
    assert_eq!(inflated.data, fox(20));
}

#[tokio::test]
async fn wrong_password_fails_before_output() {
    let zip = extractor(fixture("encrypted-deflate.zip"));
    let scan = zip.scan(ScanMode::Quick).await.unwrap();
    let entry = &scan.entries[0];

    // The check byte decrypts to 0x96 under this password
    let wrong = KeyMaterial::Password(b"letmein".to_vec());
    match zip.read_plaintext(entry, &wrong).await {
        Err(ZipError::BadKey { expected, .. }) => assert_eq!(expected, 0x9d),
        other => panic!("expected BadKey, got {other:?}"),
    }
    assert!(matches!(
        zip.read_raw(entry, &wrong).await,
        Err(ZipError::BadKey { .. })
    ));
}

#[tokio::test]
async fn missing_key() {
    let zip = extractor(fixture("encrypted-deflate.zip"));
    let scan = zip.scan(ScanMode::Quick).await.unwrap();
    assert!(matches!(
        zip.read_plaintext(&scan.entries[0], &KeyMaterial::None).await,
        Err(ZipError::MissingKey)
    ));
    // The stored payload needs no key
    assert!(zip.read_stored(&scan.entries[0]).await.is_ok());
}

#[tokio::test]
async fn check_byte_from_crc_without_descriptor() {
    let data = fox(9);
    let built = ZipBuilder::new()
        .entry(TestEntry::deflated("crc-checked", &data).encrypted("hunter2"))
        .entry(TestEntry::stored("time-checked", &data).encrypted("hunter2").streamed())
        .build();
    let zip = extractor(built.bytes);
    let key = KeyMaterial::Password(b"hunter2".to_vec());

    for mode in [ScanMode::Quick, ScanMode::Full] {
        let scan = zip.scan(mode).await.unwrap();
        assert_eq!(
            scan.entries[0].check_byte(),
            CheckByte::Crc((crc32fast::hash(&data) >> 24) as u8)
        );
        assert_eq!(
            scan.entries[1].check_byte(),
            CheckByte::ModTime((common::MOD_TIME >> 8) as u8)
        );
        for entry in &scan.entries {
            let text = zip.read_plaintext(entry, &key).await.unwrap();
            assert_eq!(text.data, data, "{mode:?} {}", entry.display_name());
            assert_eq!(text.warning, None);
        }
    }
}

#[tokio::test]
async fn aes_entries_are_refused() {
    let built = ZipBuilder::new()
        .entry(TestEntry::stored("aes.bin", b"opaque").method(99))
        .build();
    let zip = extractor(built.bytes);
    let scan = zip.scan(ScanMode::Quick).await.unwrap();

    let key = KeyMaterial::Password(b"pw".to_vec());
    assert!(matches!(
        zip.read_plaintext(&scan.entries[0], &key).await,
        Err(ZipError::UnsupportedEncryption(_))
    ));
}

#[tokio::test]
async fn corrupted_payload_gives_crc_warning() {
    let built = ZipBuilder::new()
        .entry(TestEntry::stored("a.txt", b"hello"))
        .build();
    let mut bytes = built.bytes.clone();
    bytes[35] = b'j';
    let zip = extractor(bytes);
    let scan = zip.scan(ScanMode::Quick).await.unwrap();

    let text = zip
        .read_plaintext(&scan.entries[0], &KeyMaterial::None)
        .await
        .unwrap();
    assert_eq!(text.data, b"jello");
    assert!(matches!(
        text.warning,
        Some(IntegrityWarning::CrcMismatch { expected, .. }) if expected == crc32fast::hash(b"hello")
    ));
}

#[tokio::test]
async fn payload_past_the_window_is_truncated() {
    let built = ZipBuilder::new()
        .entry(TestEntry::stored("a.txt", b"hello"))
        .entry(TestEntry::stored("b.txt", &fox(2)))
        .build();
    let zip = extractor(built.bytes.clone());
    let scan = zip.scan(ScanMode::Quick).await.unwrap();

    // Same archive, window ending inside the second payload
    let cut = built.local_headers[1] as u64 + 30 + 5 + 10;
    let reader = Arc::new(zipsift::MemoryReader::new(built.bytes));
    let short = ZipExtractor::new(ByteSource::with_window(reader, 0, Some(cut)).unwrap());
    assert!(matches!(
        short.read_stored(&scan.entries[1]).await,
        Err(ZipError::Truncated { .. })
    ));
    assert_eq!(short.read_stored(&scan.entries[0]).await.unwrap(), b"hello");
}

#[tokio::test]
async fn extract_all_reports_each_entry() {
    let built = ZipBuilder::new()
        .entry(TestEntry::stored("locked", b"secret").encrypted("pw"))
        .entry(TestEntry::stored("dir/", b""))
        .entry(TestEntry::stored("bzip", b"not really").method(12))
        .entry(TestEntry::deflated("plain", &fox(3)))
        .build();
    let zip = extractor(built.bytes);
    let scan = zip.scan(ScanMode::Full).await.unwrap();

    let reports = zip.extract_all(&scan, &KeyMaterial::None).await;
    let names: Vec<String> = reports.iter().map(|r| r.entry.display_name()).collect();
    assert_eq!(names, ["locked", "bzip", "plain"]);
    assert!(matches!(reports[0].result, Err(ZipError::MissingKey)));
    assert!(matches!(reports[1].result, Err(ZipError::UnsupportedMethod(12))));
    assert_eq!(reports[2].result.as_ref().unwrap().data, fox(3));

    let key = KeyMaterial::Password(b"pw".to_vec());
    let reports = zip.extract_all(&scan, &key).await;
    assert_eq!(reports[0].result.as_ref().unwrap().data, b"secret");
}

#[tokio::test]
async fn local_file_backend() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(&fixture("three-stored.zip")).unwrap();
    file.flush().unwrap();

    let reader = Arc::new(LocalFileReader::new(file.path()).unwrap());
    let zip = ZipExtractor::new(ByteSource::new(reader));
    let scan = zip.scan(ScanMode::Quick).await.unwrap();

    let c = zip.entry(&scan, &EntrySelector::name("c.txt")).unwrap();
    let text = zip.read_plaintext(c, &KeyMaterial::None).await.unwrap();
    assert_eq!(text.data.len(), 1000);
    assert_eq!(crc32fast::hash(&text.data), 0x1beeb737);
    assert_eq!(text.warning, None);
}
