//! Constants used throughout the bridge: well-known UUIDs, sentinel
//! strings and the documented maximum field lengths of boundary records.

use uuid::Uuid;

/// Standard GATT descriptor holding a characteristic's user description.
pub const UUID_USER_DESCRIPTION_DESCRIPTOR: Uuid =
    Uuid::from_u128(0x00002901_0000_1000_8000_00805f9b34fb);

/// Reported for characteristics that do not carry a user-description descriptor.
pub const NO_DESCRIPTION: &str = "no description available";

/// Maximum length of a device id, in characters.
pub const MAX_DEVICE_ID_LEN: usize = 256;

/// Maximum length of a device name, in characters.
pub const MAX_DEVICE_NAME_LEN: usize = 50;

/// Maximum length of a characteristic user description, in characters.
pub const MAX_DESCRIPTION_LEN: usize = 100;

/// Maximum notification/write payload size, in bytes.
pub const MAX_PAYLOAD_LEN: usize = 512;
