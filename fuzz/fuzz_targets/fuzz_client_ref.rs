// SPDX-License-Identifier: PMPL-1.0-or-later
// Fuzz target for client reference parsing

#![no_main]

use libfuzzer_sys::fuzz_target;
use mosaic_consolidation::{CanonicalKey, ClientRef};

fuzz_target!(|data: &[u8]| {
    let Ok(s) = std::str::from_utf8(data) else {
        return;
    };
    let Ok(reference) = ClientRef::parse(s) else {
        return;
    };

    // Displaying and re-parsing yields the same reference.
    let reparsed = ClientRef::parse(&reference.to_string()).expect("displayed reference parses");
    assert_eq!(reference, reparsed);

    if let Some(key) = reference.known_key() {
        let back = CanonicalKey::from_stored(key.as_str()).to_ref().expect("known key resolves");
        assert_eq!(back, reference);
    }
});
