//! Parsing of TZif files (RFC 8536, version 2 and later)
use crate::{
    civil,
    common::{
        parse::Cursor,
        scalar::{Designation, Offset},
    },
    tz::{LeapTable, TimeZone, TzOffset, cycle::CycleTable, posix},
};
use std::fmt;

/// Some writers terminate the transition table with a redundant row at this
/// instant; it carries no information and is dropped (see `parse_content`).
const REDUNDANT_TAIL_TS: i64 = i32::MAX as i64;

/// The footer line is bounded; a missing newline within this limit makes
/// the file invalid.
const MAX_TZ_STR_SIZE: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCause {
    /// Magic/version/count problems in either header
    Header,
    /// Truncated or inconsistent body data
    Body,
    /// The POSIX TZ footer doesn't parse
    TzString,
    /// The footer parses but contradicts the explicit transition table
    Footer,
}

impl fmt::Display for ErrorCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCause::Header => write!(f, "invalid header"),
            ErrorCause::Body => write!(f, "invalid or corrupted data"),
            ErrorCause::TzString => write!(f, "invalid POSIX TZ footer"),
            ErrorCause::Footer => write!(f, "POSIX TZ footer contradicts the transition table"),
        }
    }
}

type ParseResult<T> = Result<T, ErrorCause>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Header {
    version: u8,
    isutcnt: usize,
    isstdcnt: usize,
    leapcnt: usize,
    timecnt: usize,
    typecnt: usize,
    charcnt: usize,
}

impl Header {
    /// Size of the body following this header, given the transition-time
    /// width (4 bytes in the v1 block, 8 from v2 on). Computed in u64: the
    /// raw counts can individually approach 2^32.
    fn body_len(&self, time_size: u64) -> u64 {
        self.timecnt as u64 * (time_size + 1)
            + self.typecnt as u64 * 6
            + self.charcnt as u64
            + self.leapcnt as u64 * (time_size + 4)
            + self.isstdcnt as u64
            + self.isutcnt as u64
    }
}

fn parse_header(cur: &mut Cursor) -> Option<Header> {
    if cur.bytes(4)? != b"TZif" {
        return None;
    }
    let version = match cur.bump()? {
        0 => 1,
        b @ b'0'..=b'9' => b - b'0',
        _ => return None,
    };
    cur.skip(15)?; // reserved
    let counts = cur.bytes(24)?;
    let count = |i: usize| u32::from_be_bytes(counts[i * 4..(i + 1) * 4].try_into().unwrap());
    Some(Header {
        version,
        isutcnt: count(0) as usize,
        isstdcnt: count(1) as usize,
        leapcnt: count(2) as usize,
        timecnt: count(3) as usize,
        typecnt: count(4) as usize,
        charcnt: count(5) as usize,
    })
}

pub(crate) fn parse(data: &[u8]) -> ParseResult<TimeZone> {
    let mut cur = Cursor::new(data);

    // Version 1 files only carry 32-bit transitions; their post-1970 extent
    // is not enough here, so they're rejected outright.
    let v1 = parse_header(&mut cur).ok_or(ErrorCause::Header)?;
    if v1.version < 2 {
        return Err(ErrorCause::Header);
    }
    // Skip the v1 body exactly (length-checked in u64 first: the raw
    // counts can individually exceed a 32-bit usize)
    let v1_len = v1.body_len(4);
    if (cur.remaining().len() as u64) < v1_len {
        return Err(ErrorCause::Body);
    }
    cur.skip(v1_len as usize).ok_or(ErrorCause::Body)?;

    let header = parse_header(&mut cur).ok_or(ErrorCause::Header)?;
    if header.version < 2 {
        return Err(ErrorCause::Header);
    }
    // The engine caps zones at 256 distinct offset records; the pool must
    // at least hold a terminating NUL
    if header.typecnt == 0 || header.typecnt > 256 || header.charcnt == 0 {
        return Err(ErrorCause::Header);
    }
    // Reject truncated bodies before allocating anything for them
    if (cur.remaining().len() as u64) < header.body_len(8) {
        return Err(ErrorCause::Body);
    }

    parse_content(header, &mut cur)
}

fn parse_content(header: Header, cur: &mut Cursor) -> ParseResult<TimeZone> {
    // Transition instants, prefixed with the sentinel and strictly
    // increasing
    let mut transitions = Vec::with_capacity(header.timecnt + 1);
    transitions.push(i64::MIN);
    let raw = cur.bytes(header.timecnt * 8).ok_or(ErrorCause::Body)?;
    for chunk in raw.chunks_exact(8) {
        let ts = i64::from_be_bytes(chunk.try_into().unwrap());
        if ts <= *transitions.last().unwrap() {
            return Err(ErrorCause::Body);
        }
        transitions.push(ts);
    }

    // Offset indices, one per transition; the sentinel interval uses
    // record 0
    let mut offset_map = Vec::with_capacity(header.timecnt + 1);
    offset_map.push(0u8);
    for &idx in cur.bytes(header.timecnt).ok_or(ErrorCause::Body)? {
        if idx as usize >= header.typecnt {
            return Err(ErrorCause::Body);
        }
        offset_map.push(idx);
    }

    // Offset records; designations are resolved after the pool is read
    let raw = cur.bytes(header.typecnt * 6).ok_or(ErrorCause::Body)?;
    let mut raw_offsets = Vec::with_capacity(header.typecnt);
    for rec in raw.chunks_exact(6) {
        let utoff = Offset::new(i32::from_be_bytes(rec[..4].try_into().unwrap()))
            .ok_or(ErrorCause::Body)?;
        let dst = match rec[4] {
            0 => false,
            1 => true,
            _ => return Err(ErrorCause::Body),
        };
        if rec[5] as usize >= header.charcnt {
            return Err(ErrorCause::Body);
        }
        raw_offsets.push((utoff, dst, rec[5] as usize));
    }

    // The designation pool: NUL-separated, NUL-terminated
    let pool = cur.bytes(header.charcnt).ok_or(ErrorCause::Body)?;
    if pool[header.charcnt - 1] != 0 {
        return Err(ErrorCause::Body);
    }
    let mut offsets = Vec::with_capacity(header.typecnt);
    for (utoff, dst, idx) in raw_offsets {
        // Safe: the pool is NUL-terminated, so a NUL always follows idx
        let len = pool[idx..].iter().position(|&b| b == 0).unwrap();
        let desig = Designation::new(&pool[idx..idx + len]).ok_or(ErrorCause::Body)?;
        offsets.push(TzOffset { utoff, dst, desig });
    }

    // Leap second table: instants strictly increasing, corrections running
    // up by exactly one per event
    let mut leap = None;
    if header.leapcnt != 0 {
        let raw = cur.bytes(header.leapcnt * 12).ok_or(ErrorCause::Body)?;
        let mut ts = Vec::with_capacity(header.leapcnt + 1);
        let mut secs = Vec::with_capacity(header.leapcnt + 1);
        ts.push(i64::MIN);
        secs.push(0i32);
        for rec in raw.chunks_exact(12) {
            let instant = i64::from_be_bytes(rec[..8].try_into().unwrap());
            let corr = i32::from_be_bytes(rec[8..].try_into().unwrap());
            if instant <= *ts.last().unwrap() || corr != secs.last().unwrap() + 1 {
                return Err(ErrorCause::Body);
            }
            ts.push(instant);
            secs.push(corr);
        }
        leap = Some(LeapTable {
            rev: vec![i64::MIN; ts.len()].into(),
            ts: ts.into(),
            secs: secs.into(),
        });
    }

    // Standard/wall and UT/local indicators are not used
    cur.skip(header.isstdcnt + header.isutcnt)
        .ok_or(ErrorCause::Body)?;

    // Some writers append a transition at the 32-bit horizon that repeats
    // the previous offset; it would only distort the "after the last
    // transition" logic, so drop it.
    if header.timecnt >= 2
        && *transitions.last().unwrap() == REDUNDANT_TAIL_TS
        && offset_map[offset_map.len() - 1] == offset_map[offset_map.len() - 2]
    {
        transitions.pop();
        offset_map.pop();
    }

    // The footer, when present, is a newline-delimited POSIX TZ string
    let footer = parse_footer(cur)?;

    // Materialise the footer's DST rules into the cyclic table, and check
    // the footer against the tail of the explicit data
    let last = transitions.len() - 1;
    let last_offset = offsets[offset_map[last] as usize];
    let mut cycle = None;
    if let Some(tz) = &footer {
        match &tz.dst {
            Some(_) if tz.is_always_dst() => {
                if transitions[last] != i64::MIN && !last_offset.dst {
                    return Err(ErrorCause::Footer);
                }
            }
            Some(dst) => {
                let std_idx = find_or_add_offset(
                    &mut offsets,
                    TzOffset {
                        utoff: tz.std,
                        dst: false,
                        desig: tz.std_desig,
                    },
                )?;
                let dst_idx = find_or_add_offset(
                    &mut offsets,
                    TzOffset {
                        utoff: dst.offset,
                        dst: true,
                        desig: dst.desig,
                    },
                )?;
                let lsec = leap.as_ref().map_or(0, |l| *l.secs.last().unwrap() as i64);
                let table = CycleTable::materialize(tz.std, dst, std_idx, dst_idx, lsec)
                    .ok_or(ErrorCause::TzString)?;
                // The rules must assign the same offset the explicit table
                // assigns at its last transition
                if transitions[last] != i64::MIN {
                    let i = table.find_fwd(CycleTable::adjust(transitions[last]));
                    let ruled = offsets[table.offset_index_after(i - 1) as usize];
                    if ruled != last_offset {
                        return Err(ErrorCause::Footer);
                    }
                }
                cycle = Some(table);
            }
            None => {
                let ruled = TzOffset {
                    utoff: tz.std,
                    dst: false,
                    desig: tz.std_desig,
                };
                if transitions[last] != i64::MIN && ruled != last_offset {
                    return Err(ErrorCause::Footer);
                }
            }
        }
    } else if header.timecnt == 0 {
        // Neither transitions nor a footer: there's no data at all
        return Err(ErrorCause::Body);
    }

    let mut zone = TimeZone {
        transitions: transitions.into(),
        offset_map: offset_map.into(),
        offsets: offsets.into(),
        leap,
        cycle,
    };

    // Record the civil time of each leap event (the first instant after
    // it), so the inverse conversion can find corrections by civil key
    let mut rev = Vec::new();
    if let Some(leap) = &zone.leap {
        rev.reserve(leap.ts.len());
        rev.push(i64::MIN);
        for &instant in &leap.ts[1..] {
            let tm = instant
                .checked_add(1)
                .and_then(|t| zone.to_civil(t).ok())
                .ok_or(ErrorCause::Body)?;
            rev.push(civil::encode_ymdhm(&tm));
        }
    }
    if let Some(leap) = &mut zone.leap {
        leap.rev = rev.into();
    }

    Ok(zone)
}

fn parse_footer(cur: &mut Cursor) -> ParseResult<Option<posix::Tz>> {
    if cur.at_end() {
        return Ok(None);
    }
    if !cur.eat(b'\n') {
        return Err(ErrorCause::Body);
    }
    let bound = cur.remaining().len().min(MAX_TZ_STR_SIZE);
    let line_len = cur.remaining()[..bound]
        .iter()
        .position(|&b| b == b'\n')
        .ok_or(ErrorCause::Body)?;
    let line = cur.bytes(line_len).ok_or(ErrorCause::Body)?;
    cur.skip(1).ok_or(ErrorCause::Body)?; // the newline just located
    if line.is_empty() {
        return Ok(None);
    }
    posix::parse(line).map(Some).ok_or(ErrorCause::TzString)
}

/// Index of a matching offset record, adding one if the table lacks it.
fn find_or_add_offset(offsets: &mut Vec<TzOffset>, wanted: TzOffset) -> ParseResult<u8> {
    match offsets.iter().position(|&o| o == wanted) {
        Some(i) => Ok(i as u8),
        None if offsets.len() < 256 => {
            offsets.push(wanted);
            Ok((offsets.len() - 1) as u8)
        }
        None => Err(ErrorCause::Body),
    }
}

/// Check whether a TZ ID has a valid format (not whether it actually
/// exists). There's no standard limit on IANA tz IDs, but these are used
/// to traverse the filesystem, so the line has to be drawn somewhere.
pub(crate) fn is_valid_key(key: &str) -> bool {
    let Some(&first) = key.as_bytes().first() else {
        return false; // empty is invalid
    };
    let &last = key.as_bytes().last().unwrap(); // we know it's not empty

    key.len() < 100
        // Eliminate "nasty" characters like null bytes or invalid path
        // characters. This is more relaxed than what the TZDB itself uses.
        && key.as_bytes().iter().all(|&b| b.is_ascii_alphanumeric()
            || b == b'_'
            || b == b'-'
            || b == b'+'
            || b == b'/'
            || b == b'.')
        // Sequences that would mess with path traversal
        && !key.contains("..")
        && !key.contains("//")
        && !key.contains("/./")
        && first != b'-' && first != b'+' && first != b'/'
        && last != b'/'
}
