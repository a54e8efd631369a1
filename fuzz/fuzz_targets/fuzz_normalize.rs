#![no_main]

use docnum::numbering::{normalize, DocumentTypeCatalog, TypeKey};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Invalid UTF-8 becomes replacement chars
    let label = String::from_utf8_lossy(data);

    let key = normalize(&label);
    assert_eq!(normalize(&key), key, "normalize must be idempotent");
    assert!(key
        .bytes()
        .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'_'));

    // Anything TypeKey accepts must round-trip through parse
    if let Ok(type_key) = TypeKey::from_label(&label) {
        assert!(TypeKey::parse(type_key.as_str()).is_ok());
    }

    // Unknown labels are rejected, never panic
    let _ = DocumentTypeCatalog::default().resolve(&label);
});
