#![no_main]

use docnum::numbering::{parse_display_date, parse_iso_date, DocumentNumber};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let input = String::from_utf8_lossy(data);

    // Whatever parses must display back to the same text
    if let Ok(number) = input.parse::<DocumentNumber>() {
        assert_eq!(number.to_string().parse::<DocumentNumber>().ok(), Some(number));
    }

    let _ = parse_display_date(&input);
    let _ = parse_iso_date(&input);
});
