#![no_main]

use libfuzzer_sys::fuzz_target;
use pgconnector::ConnectionInfo;

fuzz_target!(|data: &str| {
    let _ = ConnectionInfo::parse(data);
});
