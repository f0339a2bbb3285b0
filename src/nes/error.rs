use std::fmt;

/// Construction-time failures. Nothing past `Nes::new` returns one of these.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CartridgeError {
    /// The container itself is malformed (bad magic, truncated header).
    BadHeader(String),
    /// The declared sizes do not match the supplied images.
    InvalidImage(String),
    UnsupportedMapper(u16),
}

impl fmt::Display for CartridgeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BadHeader(reason) => write!(f, "bad cartridge header: {reason}"),
            Self::InvalidImage(reason) => write!(f, "invalid cartridge image: {reason}"),
            Self::UnsupportedMapper(id) => write!(f, "unsupported mapper {id}"),
        }
    }
}

impl std::error::Error for CartridgeError {}
