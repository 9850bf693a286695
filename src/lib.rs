//! A 64-bit time zone engine.
//!
//! `zone64` converts between absolute timestamps (seconds since
//! 1970-01-01T00:00:00 UTC) and broken-down civil time under a zone
//! described by an IANA TZif file (version 2+, RFC 8536) or a POSIX TZ
//! string. DST rules from either source are materialised into a cyclic
//! 400-year table at construction, so conversions at any date, however far
//! in the future, cost a bounded search rather than rule evaluation. Zones
//! built from `right/` TZif data observe leap seconds: second 60 exists.
//!
//! ```
//! use zone64::{CivilTime, TimeZone};
//!
//! let zone = TimeZone::from_posix_tz("EST5EDT,M3.2.0,M11.1.0")?;
//! let civil = zone.to_civil(1352007000)?;
//! assert_eq!((civil.year, civil.month, civil.day), (2012, 11, 4));
//! assert_eq!((civil.hour, civil.minute), (1, 30));
//! assert_eq!(civil.designation.as_str(), "EDT");
//!
//! // 01:30 that night happened twice; the dst flag picks the reading
//! let mut later = CivilTime::new(2012, 11, 4, 1, 30, 0).with_dst(false);
//! assert_eq!(zone.from_civil(&mut later)?, 1352010600);
//! # Ok::<(), zone64::Error>(())
//! ```
//!
//! Zone records are immutable after construction and freely shareable
//! across threads; conversions never allocate.
use std::fmt;

mod common;

pub mod civil;
pub mod tz;

pub use civil::CivilTime;
pub use common::scalar::{Designation, Weekday};
pub use tz::TimeZone;
pub use tz::store::ZoneStore;
pub use tz::tzif::ErrorCause;

/// All the ways the engine can fail, as ordinary values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// The TZif data is structurally invalid or internally inconsistent.
    InvalidFile(ErrorCause),
    /// The POSIX TZ string doesn't conform to the accepted grammar.
    InvalidTzString,
    /// The timestamp's year falls outside a signed 32-bit offset from 1900.
    OverflowYear,
    /// The civil record can't canonicalize to a representable year.
    Unrepresentable,
    /// No zone file with the given key was found (or it wasn't parseable).
    ZoneNotFound,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::InvalidFile(cause) => write!(f, "invalid TZif data: {cause}"),
            Error::InvalidTzString => write!(f, "invalid POSIX TZ string"),
            Error::OverflowYear => write!(f, "year outside the representable range"),
            Error::Unrepresentable => write!(f, "civil time outside the representable range"),
            Error::ZoneNotFound => write!(f, "no time zone found with that key"),
        }
    }
}

impl std::error::Error for Error {}
