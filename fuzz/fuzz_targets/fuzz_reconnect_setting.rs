#![no_main]

use libfuzzer_sys::fuzz_target;
use unwarp_core::{
    read_reconnect_base, KeyValueStore, MemoryStore, MAX_RECONNECT_BASE_SECS,
    MIN_RECONNECT_BASE_SECS, RECONNECT_BASE_KEY,
};

fuzz_target!(|data: &[u8]| {
    let raw = String::from_utf8_lossy(data);
    let store = MemoryStore::new();
    if store.set(RECONNECT_BASE_KEY, &raw).is_err() {
        return;
    }

    // Whatever an administrator wrote, the service uses a bounded base
    let base = read_reconnect_base(&store);
    assert!((MIN_RECONNECT_BASE_SECS..=MAX_RECONNECT_BASE_SECS).contains(&base));
});
