#![no_main]

use libfuzzer_sys::fuzz_target;
use unwarp_core::{ServiceCommand, ServiceResponse};

fuzz_target!(|data: &[u8]| {
    let line = String::from_utf8_lossy(data);

    // Parsing arbitrary request lines must never panic
    if let Ok(command) = line.parse::<ServiceCommand>() {
        // Anything accepted is exactly a wire form, modulo the line ending
        assert_eq!(line.trim_end_matches(['\r', '\n']), command.as_str());
    }

    if let Ok(response) = line.parse::<ServiceResponse>() {
        assert_eq!(response.to_string().parse::<ServiceResponse>().ok(), Some(response));
    }
});
