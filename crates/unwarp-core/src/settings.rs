//! Machine-wide settings shared by client and service

use tracing::warn;

use crate::error::{CoreError, Result};
use crate::store::KeyValueStore;
use crate::{
    DEFAULT_RECONNECT_BASE_SECS, MAX_RECONNECT_BASE_SECS, MIN_RECONNECT_BASE_SECS,
    RECONNECT_BASE_KEY,
};

/// Clamp a stored reconnect base into the accepted range
pub fn clamp_reconnect_base(seconds: i64) -> u32 {
    seconds.clamp(MIN_RECONNECT_BASE_SECS as i64, MAX_RECONNECT_BASE_SECS as i64) as u32
}

/// Validate an operator-supplied reconnect base without clamping
pub fn validate_reconnect_base(seconds: i64) -> Result<u32> {
    if seconds < MIN_RECONNECT_BASE_SECS as i64 || seconds > MAX_RECONNECT_BASE_SECS as i64 {
        return Err(CoreError::ReconnectOutOfRange {
            got: seconds,
            min: MIN_RECONNECT_BASE_SECS,
            max: MAX_RECONNECT_BASE_SECS,
        });
    }
    Ok(seconds as u32)
}

/// Read the reconnect base the service should use
///
/// Falls back to the default when the key is absent, unparsable, or the
/// store cannot be read.
pub fn read_reconnect_base(store: &dyn KeyValueStore) -> u32 {
    match store.get(RECONNECT_BASE_KEY) {
        Ok(Some(raw)) => match raw.trim().parse::<i64>() {
            Ok(seconds) => clamp_reconnect_base(seconds),
            Err(_) => {
                warn!("Ignoring unparsable {} value {:?}", RECONNECT_BASE_KEY, raw);
                DEFAULT_RECONNECT_BASE_SECS
            }
        },
        Ok(None) => DEFAULT_RECONNECT_BASE_SECS,
        Err(e) => {
            warn!("Failed to read {}: {}", RECONNECT_BASE_KEY, e);
            DEFAULT_RECONNECT_BASE_SECS
        }
    }
}

/// Persist an already validated reconnect base verbatim
pub fn write_reconnect_base(store: &dyn KeyValueStore, seconds: u32) -> Result<()> {
    store.set(RECONNECT_BASE_KEY, &seconds.to_string())
}
