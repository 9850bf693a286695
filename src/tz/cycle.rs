//! Materialisation of POSIX DST rules into a cyclic 400-year table.
//!
//! Civil dates repeat exactly every 400 Gregorian years, and within a cycle
//! each year's calendar is fully determined by its leap status and the
//! weekday of January 1st. That yields 14 distinct year shapes, so a DST
//! rule pair only needs its two transitions computed for 14 representative
//! years; every other year of the cycle reuses one of those via a type
//! table. Far-future and far-past lookups then reduce to a modulo and a
//! short probe instead of re-evaluating the rules.
use crate::{
    civil::{self, AVG_SECS_PER_YEAR, REF_2001_TS, SECS_PER_400_YEARS, SECS_PER_DAY},
    common::scalar::Offset,
    tz::{TzOffset, posix},
};

/// One year per (weekday of Jan 1, is leap) pair, indexed by
/// `weekday + 7 * leap` with Sunday as 0. All fall inside 2001..2028,
/// the first years of the cycle to exhibit each shape.
pub(crate) const REPRESENTATIVE_YEARS: [u16; 14] = [
    2006, 2001, 2002, 2003, 2009, 2010, 2005, // common years, Sun..Sat
    2012, 2024, 2008, 2020, 2004, 2016, 2028, // leap years, Sun..Sat
];

/// Seconds from the start of the cycle (2001-01-01) to the start of each
/// of its years.
static YEAR_STARTS: [i64; 400] = build_year_starts();

/// The shape (index into the representative years) of each cycle year.
static YEAR_TYPES: [u8; 400] = build_year_types();

const fn build_year_starts() -> [i64; 400] {
    let mut out = [0i64; 400];
    let mut acc = 0i64;
    let mut i = 1;
    while i < 400 {
        let days = if civil::is_leap(2001 + i as i64 - 1) {
            366
        } else {
            365
        };
        acc += days * SECS_PER_DAY;
        out[i] = acc;
        i += 1;
    }
    out
}

const fn build_year_types() -> [u8; 400] {
    let mut out = [0u8; 400];
    let mut days = 0i64;
    let mut i = 0;
    while i < 400 {
        let year = 2001 + i as i64;
        // 2001-01-01 was a Monday; (days + 1) % 7 gives Sunday-is-0
        out[i] = ((days + 1) % 7) as u8 + 7 * civil::is_leap(year) as u8;
        days += if civil::is_leap(year) { 366 } else { 365 };
        i += 1;
    }
    out
}

/// The materialised cyclic extension of a zone: 14 years x 2 transitions,
/// stored as seconds relative to the year start (already shifted to UTC by
/// the offset in effect before each transition, plus any trailing
/// leap-second correction of the zone's explicit table).
///
/// `map` selects the offset in force after a boundary, by boundary parity:
/// `map[0]` after a year's first transition, `map[1]` after its second
/// (which is also the offset at the start of the following year).
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) struct CycleTable {
    extra: [i32; 28],
    map: [u8; 2],
}

impl CycleTable {
    /// Compute the two transitions of each representative year.
    /// Returns None for degenerate rule pairs whose expanded boundaries
    /// are not strictly increasing around the whole cycle.
    pub(crate) fn materialize(
        std: Offset,
        dst: &posix::Dst,
        std_idx: u8,
        dst_idx: u8,
        lsec: i64,
    ) -> Option<CycleTable> {
        let (start_rule, end_rule) = (dst.start.0, dst.end.0);
        let (start_time, end_time) = (dst.start.1 as i64, dst.end.1 as i64);

        // Southern-hemisphere zones leave DST (not enter it) first in the
        // year; that ordering decides which cycle slot holds which offset.
        let dst_first = {
            let start = start_rule.day_of_year(2001) * SECS_PER_DAY + start_time;
            let end = end_rule.day_of_year(2001) * SECS_PER_DAY + end_time;
            if start == end {
                return None;
            }
            start < end
        };

        let mut extra = [0i32; 28];
        for (t, &year) in REPRESENTATIVE_YEARS.iter().enumerate() {
            let y = year as i64;
            // The rule's time-of-day is local; subtracting the offset in
            // force before the transition yields UTC-relative-to-year-start.
            let start_secs =
                start_rule.day_of_year(y) * SECS_PER_DAY + start_time - std.get() as i64 + lsec;
            let end_secs =
                end_rule.day_of_year(y) * SECS_PER_DAY + end_time - dst.offset.get() as i64 + lsec;
            let (first, second) = if dst_first {
                (start_secs, end_secs)
            } else {
                (end_secs, start_secs)
            };
            extra[t * 2] = i32::try_from(first).ok()?;
            extra[t * 2 + 1] = i32::try_from(second).ok()?;
        }

        let table = CycleTable {
            extra,
            map: if dst_first {
                [dst_idx, std_idx]
            } else {
                [std_idx, dst_idx]
            },
        };
        // The expanded boundaries must be strictly increasing, including
        // across the wrap between consecutive cycles.
        (0..=800)
            .all(|i| table.expand(i - 1) < table.expand(i))
            .then_some(table)
    }

    /// A timestamp's position within the 400-year cycle. Widened so even
    /// instants near the i64 extremes (possible in hostile files) can't
    /// overflow.
    pub(crate) fn adjust(ts: i64) -> i64 {
        ((ts as i128 - REF_2001_TS as i128).rem_euclid(SECS_PER_400_YEARS as i128)) as i64
    }

    /// The instant of cycle boundary `i`, cycle-relative. Total over any
    /// index: out-of-range boundaries wrap by whole cycles, so probes at
    /// the cycle edges stay well-defined.
    pub(crate) fn expand(&self, i: i64) -> i64 {
        let cycles = i.div_euclid(800);
        let r = i.rem_euclid(800) as usize;
        let year = r / 2;
        cycles * SECS_PER_400_YEARS
            + YEAR_STARTS[year]
            + self.extra[YEAR_TYPES[year] as usize * 2 + (r & 1)] as i64
    }

    /// Index (into the zone's offset records) of the offset in force after
    /// the given boundary.
    pub(crate) fn offset_index_after(&self, boundary: i64) -> u8 {
        self.map[boundary.rem_euclid(2) as usize]
    }

    /// First boundary strictly after the adjusted timestamp. The year-based
    /// guess can overshoot by a fraction of a day, so start a couple of
    /// slots early and walk forward; the answer is never more than a few
    /// probes away.
    pub(crate) fn find_fwd(&self, adj: i64) -> i64 {
        let mut i = (adj / AVG_SECS_PER_YEAR * 2 - 2).max(0);
        while adj >= self.expand(i) {
            i += 1;
        }
        i
    }

    /// Last boundary whose local start (under the offset it switches to)
    /// is at or before the adjusted local timestamp. May return -1 when
    /// the moment precedes the cycle's first boundary.
    pub(crate) fn find_rev(&self, adj: i64, offsets: &[TzOffset]) -> i64 {
        let mut i = (adj / AVG_SECS_PER_YEAR * 2 - 2).max(0);
        loop {
            let utoff = offsets[self.offset_index_after(i) as usize].utoff.get() as i64;
            if adj - utoff < self.expand(i) {
                return i - 1;
            }
            i += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::scalar::Designation;

    fn new_york() -> (CycleTable, Vec<TzOffset>) {
        let tz = posix::parse(b"EST5EDT,M3.2.0,M11.1.0").unwrap();
        let dst = tz.dst.unwrap();
        let offsets = vec![
            TzOffset {
                utoff: Offset::new(-18_000).unwrap(),
                dst: false,
                desig: Designation::new(b"EST").unwrap(),
            },
            TzOffset {
                utoff: Offset::new(-14_400).unwrap(),
                dst: true,
                desig: Designation::new(b"EDT").unwrap(),
            },
        ];
        (
            CycleTable::materialize(tz.std, &dst, 0, 1, 0).unwrap(),
            offsets,
        )
    }

    #[test]
    fn representative_years_cover_all_shapes() {
        for (t, &year) in REPRESENTATIVE_YEARS.iter().enumerate() {
            let y = year as i64;
            assert_eq!(
                civil::jan1_weekday(y) + 7 * civil::is_leap(y) as u8,
                t as u8,
                "year {year}"
            );
            assert_eq!(YEAR_TYPES[(y - 2001) as usize], t as u8);
        }
    }

    #[test]
    fn year_tables() {
        assert_eq!(YEAR_STARTS[0], 0);
        assert_eq!(YEAR_STARTS[1], 365 * SECS_PER_DAY);
        // 2004 is the first leap year of the cycle
        assert_eq!(YEAR_STARTS[3], (3 * 365) * SECS_PER_DAY);
        assert_eq!(YEAR_STARTS[4], (3 * 365 + 366) * SECS_PER_DAY);
        // every type occurs somewhere
        for t in 0..14u8 {
            assert!(YEAR_TYPES.contains(&t), "type {t} unused");
        }
    }

    #[test]
    fn materialized_boundaries() {
        let (table, _) = new_york();
        // 2001 (cycle year 0): DST from Mar 11 07:00Z to Nov 4 06:00Z
        assert_eq!(table.expand(0), 5_986_800);
        assert_eq!(table.expand(1), 26_546_400);
        // 2012 (cycle year 11): Mar 11 07:00Z and Nov 4 06:00Z again
        assert_eq!(table.expand(22), 353_142_000);
        assert_eq!(table.expand(23), 373_701_600);
        // wrap: one cycle later is exactly one cycle of seconds away
        assert_eq!(table.expand(800), SECS_PER_400_YEARS + table.expand(0));
        assert_eq!(table.expand(-1), table.expand(799) - SECS_PER_400_YEARS);
    }

    #[test]
    fn offset_parity() {
        let (table, offsets) = new_york();
        // after a year's first (spring) boundary: DST
        assert_eq!(table.offset_index_after(0), 1);
        assert!(offsets[table.offset_index_after(0) as usize].dst);
        // after the second (autumn) boundary: standard time
        assert_eq!(table.offset_index_after(1), 0);
        assert_eq!(table.offset_index_after(-1), 0);

        // inverted ordering for a southern-hemisphere zone
        let tz = posix::parse(b"AEST-10AEDT,M10.1.0,M4.1.0/3").unwrap();
        let dst = tz.dst.unwrap();
        let table = CycleTable::materialize(tz.std, &dst, 0, 1, 0).unwrap();
        // the year's first transition leaves DST
        assert_eq!(table.offset_index_after(0), 0);
        assert_eq!(table.offset_index_after(1), 1);
        // 2008 (cycle year 7) left DST on Apr 6 03:00 AEDT = Apr 5 16:00Z
        assert_eq!(table.expand(14), 229_104_000);
        // and entered it again on Oct 5 02:00 AEST = Oct 4 16:00Z
        assert_eq!(table.expand(15), 244_828_800);
    }

    #[test]
    fn forward_probe() {
        let (table, _) = new_york();
        // start of the cycle: before the first boundary
        assert_eq!(table.find_fwd(0), 0);
        assert_eq!(table.find_fwd(5_986_799), 0);
        assert_eq!(table.find_fwd(5_986_800), 1);
        assert_eq!(table.find_fwd(26_546_399), 1);
        assert_eq!(table.find_fwd(26_546_400), 2);
        // end of the cycle walks into the wrapped next one
        assert_eq!(table.find_fwd(SECS_PER_400_YEARS - 1), 800);
    }

    #[test]
    fn reverse_probe() {
        let (table, offsets) = new_york();
        // local instants around the 2012 spring-forward gap
        // (boundary 22 switches to EDT at 353_142_000 UTC-relative)
        assert_eq!(table.find_rev(353_142_000 - 14_400 - 1, &offsets), 21);
        assert_eq!(table.find_rev(353_142_000 - 14_400, &offsets), 22);
        // the instant before the cycle's very first boundary
        assert_eq!(table.find_rev(0, &offsets), -1);
    }

    #[test]
    fn degenerate_rules_rejected() {
        // both transitions on the same instant
        let tz = posix::parse(b"FOO-1BAR,J100/2,J100/2").unwrap();
        let dst = tz.dst.unwrap();
        assert_eq!(CycleTable::materialize(tz.std, &dst, 0, 1, 0), None);
    }
}
