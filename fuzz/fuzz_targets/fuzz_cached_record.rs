// SPDX-License-Identifier: PMPL-1.0-or-later
// Fuzz target for decoding cached consolidated records

#![no_main]

use libfuzzer_sys::fuzz_target;
use mosaic_consolidation::ConsolidatedClient;

fuzz_target!(|data: &[u8]| {
    // Arbitrary cache payloads must decode or fail, never panic.
    if let Ok(record) = serde_json::from_slice::<ConsolidatedClient>(data) {
        let encoded = serde_json::to_vec(&record).expect("decoded record encodes");
        let again: ConsolidatedClient =
            serde_json::from_slice(&encoded).expect("encoded record decodes");
        assert_eq!(record.canonical_key(), again.canonical_key());
    }
});
