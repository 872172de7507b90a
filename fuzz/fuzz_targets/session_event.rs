//! Relay frames are untrusted JSON

#![no_main]

use libfuzzer_sys::fuzz_target;

use geomesh_transport::{OutboundEvent, SessionEvent};

fuzz_target!(|data: &[u8]| {
    if let Ok(event) = serde_json::from_slice::<SessionEvent>(data) {
        let _ = event.name();
        let _ = serde_json::to_vec(&event);
    }
    let _ = serde_json::from_slice::<OutboundEvent>(data);
});
