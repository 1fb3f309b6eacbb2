#![no_main]

use libfuzzer_sys::arbitrary::{self, Arbitrary};
use libfuzzer_sys::fuzz_target;
use pgconnector::auth::ScramSha256;

#[derive(Debug, Arbitrary)]
struct ScramInput {
    password: String,
    server_first: String,
    server_final: String,
}

fuzz_target!(|input: ScramInput| {
    let mut client = ScramSha256::new("", &input.password);
    let _first = client.client_first();

    if client.handle_server_first(&input.server_first).is_ok() {
        let _ = client.verify_server_final(&input.server_final);
    }
});
