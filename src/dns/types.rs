use serde::{Deserialize, Serialize};

/// Closed set of record types this resolver understands end to end.
/// Anything else parses as `Other` and is answered with NOTIMP.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum QType {
    A,
    NS,
    CNAME,
    SOA,
    PTR,
    MX,
    TXT,
    AAAA,
    Other(u16),
}

impl From<u16> for QType {
    fn from(value: u16) -> Self {
        match value {
            1 => QType::A,
            2 => QType::NS,
            5 => QType::CNAME,
            6 => QType::SOA,
            12 => QType::PTR,
            15 => QType::MX,
            16 => QType::TXT,
            28 => QType::AAAA,
            other => QType::Other(other),
        }
    }
}

impl From<QType> for u16 {
    fn from(value: QType) -> Self {
        match value {
            QType::A => 1,
            QType::NS => 2,
            QType::CNAME => 5,
            QType::SOA => 6,
            QType::PTR => 12,
            QType::MX => 15,
            QType::TXT => 16,
            QType::AAAA => 28,
            QType::Other(v) => v,
        }
    }
}

impl std::fmt::Display for QType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QType::A => write!(f, "A"),
            QType::NS => write!(f, "NS"),
            QType::CNAME => write!(f, "CNAME"),
            QType::SOA => write!(f, "SOA"),
            QType::PTR => write!(f, "PTR"),
            QType::MX => write!(f, "MX"),
            QType::TXT => write!(f, "TXT"),
            QType::AAAA => write!(f, "AAAA"),
            QType::Other(v) => write!(f, "TYPE{v}"),
        }
    }
}

impl QType {
    pub fn is_supported(&self) -> bool {
        !matches!(self, QType::Other(_))
    }
}

/// DNS response codes used by this resolver. Only the subset the wire codec
/// and resolver actually emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RCode {
    NoError = 0,
    FormatError = 1,
    ServerFailure = 2,
    NameError = 3,
    NotImplemented = 4,
    Refused = 5,
}

impl From<RCode> for u8 {
    fn from(value: RCode) -> Self {
        value as u8
    }
}
