//! Inbound signed reports must never panic, whatever the bytes

#![no_main]

use libfuzzer_sys::fuzz_target;

use geomesh_core::{HazardData, ReviewData, Timestamp};
use geomesh_crypto::codec::{decode_report, decode_verified, verify};

fuzz_target!(|data: &[u8]| {
    let now = Timestamp(1_700_000_000_000);
    let _ = decode_verified::<HazardData>(data, now);
    let _ = decode_verified::<ReviewData>(data, now);

    // A report that decodes must also survive verification
    if let Ok(report) = decode_report::<HazardData>(data) {
        let _ = verify(&report);
    }
});
