//! Vendor status codes
//!
//! The native library reports every failure as a negative integer. The codes
//! below are the ones this client reacts to; anything else is surfaced
//! verbatim inside [`crate::Error::Transport`].

pub const ER_NOT_INITIALIZED: i32 = -12;
pub const ER_TIMEOUT: i32 = -13;
pub const ER_INVALID_SESSION: i32 = -14;
pub const ER_EXCEED_MAX_SESSION: i32 = -18;
pub const ER_DEVICE_OFFLINE: i32 = -90;

pub const AV_ER_TIMEOUT: i32 = -20011;
/// No frame buffered yet; retry shortly, not an error
pub const AV_ER_DATA_NOREADY: i32 = -20012;
/// Frame arrived with missing packets
pub const AV_ER_INCOMPLETE_FRAME: i32 = -20013;
/// Frame was dropped by the transport
pub const AV_ER_LOST_FRAME: i32 = -20014;
pub const AV_ER_SESSION_CLOSED_BY_REMOTE: i32 = -20015;
pub const AV_ER_REMOTE_TIMEOUT: i32 = -20016;

/// Symbolic name for a vendor status code, for logs and error messages
pub fn name(code: i32) -> &'static str {
    match code {
        ER_NOT_INITIALIZED => "ER_NOT_INITIALIZED",
        ER_TIMEOUT => "ER_TIMEOUT",
        ER_INVALID_SESSION => "ER_INVALID_SESSION",
        ER_EXCEED_MAX_SESSION => "ER_EXCEED_MAX_SESSION",
        ER_DEVICE_OFFLINE => "ER_DEVICE_OFFLINE",
        AV_ER_TIMEOUT => "AV_ER_TIMEOUT",
        AV_ER_DATA_NOREADY => "AV_ER_DATA_NOREADY",
        AV_ER_INCOMPLETE_FRAME => "AV_ER_INCOMPLETE_FRAME",
        AV_ER_LOST_FRAME => "AV_ER_LOST_FRAME",
        AV_ER_SESSION_CLOSED_BY_REMOTE => "AV_ER_SESSION_CLOSED_BY_REMOTE",
        AV_ER_REMOTE_TIMEOUT => "AV_ER_REMOTE_TIMEOUT",
        _ => "UNKNOWN",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_codes_have_names() {
        assert_eq!(name(AV_ER_DATA_NOREADY), "AV_ER_DATA_NOREADY");
        assert_eq!(name(ER_TIMEOUT), "ER_TIMEOUT");
        assert_eq!(name(-424242), "UNKNOWN");
    }
}
