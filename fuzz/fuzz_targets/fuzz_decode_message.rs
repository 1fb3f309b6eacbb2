#![no_main]

use libfuzzer_sys::fuzz_target;
use pgconnector::protocol::decode_message;

fuzz_target!(|data: &[u8]| {
    // Several backend messages may arrive in one read
    let mut rest = data;
    while !rest.is_empty() {
        match decode_message(rest) {
            Ok(Some((_, consumed))) => {
                assert!(consumed > 0 && consumed <= rest.len());
                rest = &rest[consumed..];
            }
            Ok(None) | Err(_) => break,
        }
    }
});
