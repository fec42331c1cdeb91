#![no_main]

use dbpool::ConnectOptions;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(s) = std::str::from_utf8(data) {
        if let Ok(options) = ConnectOptions::from_connection_string(s) {
            // Parsed options must always render an address and a redacted Debug.
            let _ = options.address();
            let _ = format!("{options:?}");
        }
    }
});
