//! Close status codes as defined in [RFC 6455 Section 7.4](https://datatracker.ietf.org/doc/html/rfc6455#section-7.4).
//!
//! A [`CloseCode`] travels in the first two bytes of a close frame payload. Some codes are
//! reserved for local reporting and must never appear on the wire; [`CloseCode::is_allowed`]
//! tells them apart.

/// Status code carried by a close frame.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CloseCode {
    /// 1000: the purpose for which the connection was established has been fulfilled.
    Normal,
    /// 1001: the endpoint is going away (server shutdown, page navigation).
    Away,
    /// 1002: the endpoint is terminating the connection due to a protocol error.
    Protocol,
    /// 1003: the endpoint received a type of data it cannot accept.
    Unsupported,
    /// 1005: no status code was present. Local use only.
    Status,
    /// 1006: the connection was closed abnormally. Local use only.
    Abnormal,
    /// 1007: a message contained data inconsistent with its type (e.g. non UTF-8 text).
    Invalid,
    /// 1008: a message violates the endpoint's policy.
    Policy,
    /// 1009: a message is too big to process.
    Size,
    /// 1010: the client expected the server to negotiate an extension.
    Extension,
    /// 1011: the server hit an unexpected condition.
    Error,
    /// 1012: the service is restarting.
    Restart,
    /// 1013: try again later.
    Again,
    /// 1015: TLS handshake failure. Local use only.
    Tls,
    /// Codes in 1016..=2999 reserved for future revisions of the protocol.
    Reserved(u16),
    /// Codes in 3000..=3999 registered with IANA.
    Iana(u16),
    /// Codes in 4000..=4999 for private use by applications.
    Library(u16),
    /// Anything else, which is never valid.
    Bad(u16),
}

impl CloseCode {
    /// Returns `true` if the code may be sent in a close frame.
    ///
    /// Codes 1005, 1006 and 1015 exist only to report conditions locally, and the reserved
    /// or out-of-range values are rejected as protocol errors when received.
    pub fn is_allowed(self) -> bool {
        !matches!(
            self,
            CloseCode::Status
                | CloseCode::Abnormal
                | CloseCode::Tls
                | CloseCode::Reserved(_)
                | CloseCode::Bad(_)
        )
    }
}

impl From<u16> for CloseCode {
    fn from(code: u16) -> Self {
        match code {
            1000 => CloseCode::Normal,
            1001 => CloseCode::Away,
            1002 => CloseCode::Protocol,
            1003 => CloseCode::Unsupported,
            1005 => CloseCode::Status,
            1006 => CloseCode::Abnormal,
            1007 => CloseCode::Invalid,
            1008 => CloseCode::Policy,
            1009 => CloseCode::Size,
            1010 => CloseCode::Extension,
            1011 => CloseCode::Error,
            1012 => CloseCode::Restart,
            1013 => CloseCode::Again,
            1015 => CloseCode::Tls,
            1016..=2999 => CloseCode::Reserved(code),
            3000..=3999 => CloseCode::Iana(code),
            4000..=4999 => CloseCode::Library(code),
            _ => CloseCode::Bad(code),
        }
    }
}

impl From<CloseCode> for u16 {
    fn from(code: CloseCode) -> u16 {
        match code {
            CloseCode::Normal => 1000,
            CloseCode::Away => 1001,
            CloseCode::Protocol => 1002,
            CloseCode::Unsupported => 1003,
            CloseCode::Status => 1005,
            CloseCode::Abnormal => 1006,
            CloseCode::Invalid => 1007,
            CloseCode::Policy => 1008,
            CloseCode::Size => 1009,
            CloseCode::Extension => 1010,
            CloseCode::Error => 1011,
            CloseCode::Restart => 1012,
            CloseCode::Again => 1013,
            CloseCode::Tls => 1015,
            CloseCode::Reserved(code)
            | CloseCode::Iana(code)
            | CloseCode::Library(code)
            | CloseCode::Bad(code) => code,
        }
    }
}

impl std::fmt::Display for CloseCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", u16::from(*self))
    }
}

/// A close status received from the peer: the code and the UTF-8 reason that followed it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseFrame {
    /// Status code, [`CloseCode::Status`] when the peer sent an empty close payload.
    pub code: CloseCode,
    /// Human readable reason, possibly empty.
    pub reason: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_known_codes() {
        for code in [1000u16, 1001, 1002, 1003, 1007, 1008, 1009, 1010, 1011, 1012, 1013] {
            let close = CloseCode::from(code);
            assert!(close.is_allowed(), "{code} should be allowed");
            assert_eq!(u16::from(close), code);
        }
    }

    #[test]
    fn test_local_only_codes_not_allowed() {
        assert!(!CloseCode::from(1005).is_allowed());
        assert!(!CloseCode::from(1006).is_allowed());
        assert!(!CloseCode::from(1015).is_allowed());
        assert!(!CloseCode::from(1016).is_allowed());
        assert!(!CloseCode::from(2999).is_allowed());
        assert!(!CloseCode::from(999).is_allowed());
        assert!(!CloseCode::from(5000).is_allowed());
    }

    #[test]
    fn test_application_ranges() {
        assert_eq!(CloseCode::from(3000), CloseCode::Iana(3000));
        assert_eq!(CloseCode::from(4999), CloseCode::Library(4999));
        assert!(CloseCode::Iana(3001).is_allowed());
        assert!(CloseCode::Library(4000).is_allowed());
        assert_eq!(CloseCode::Size.to_string(), "1009");
    }
}
