//! Time zone records and conversion between timestamps and civil time.
pub(crate) mod cycle;
pub mod posix;
pub mod store;
pub mod tzif;

use crate::{
    Error,
    civil::{self, CivilTime},
    common::scalar::{Designation, Offset},
    tz::cycle::CycleTable,
};

/// One offset record: the UTC offset, DST flag and abbreviation in force
/// over some interval of the zone's history.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) struct TzOffset {
    pub(crate) utoff: Offset,
    pub(crate) dst: bool,
    pub(crate) desig: Designation,
}

/// Leap second data for "right/" zones. Each series carries a sentinel
/// first row (the dawn of time, with no correction) so lookups always land.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct LeapTable {
    /// Instants of leap events, strictly increasing
    pub(crate) ts: Box<[i64]>,
    /// Running cumulative corrections, each one more than its predecessor
    pub(crate) secs: Box<[i32]>,
    /// Civil encodings (`encode_ymdhm`) of the first instant after each
    /// event, for the inverse lookup
    pub(crate) rev: Box<[i64]>,
}

/// An immutable time zone: transition table, offset records, optional leap
/// second data, and an optional cyclic extension materialised from the
/// zone's POSIX rules.
///
/// Construction parses everything up front; conversions afterwards never
/// allocate and never mutate the record, so a shared reference can be used
/// freely across threads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeZone {
    /// Transition instants, prefixed with an `i64::MIN` sentinel so the
    /// first entry covers all time before the first explicit transition
    pub(crate) transitions: Box<[i64]>,
    /// Offset record index per transition interval, parallel to
    /// `transitions`
    pub(crate) offset_map: Box<[u8]>,
    pub(crate) offsets: Box<[TzOffset]>,
    pub(crate) leap: Option<LeapTable>,
    pub(crate) cycle: Option<CycleTable>,
}

/// Greatest index `i` with `arr[i] <= x`. Arrays searched here start with
/// an `i64::MIN` sentinel, so an answer always exists.
pub(crate) fn bisect(arr: &[i64], x: i64) -> usize {
    let (mut lo, mut hi) = (0, arr.len() - 1);
    while lo < hi {
        let i = (lo + hi + 1) / 2;
        if arr[i] <= x {
            lo = i;
        } else {
            hi = i - 1;
        }
    }
    lo
}

impl TimeZone {
    /// The built-in UTC zone.
    pub fn utc() -> TimeZone {
        TimeZone {
            transitions: vec![i64::MIN].into(),
            offset_map: vec![0].into(),
            offsets: vec![TzOffset {
                utoff: Offset::ZERO,
                dst: false,
                // Safe: a valid designation
                desig: Designation::new(b"UTC").unwrap(),
            }]
            .into(),
            leap: None,
            cycle: None,
        }
    }

    /// Build a zone from the bytes of a TZif file (version 2 or later).
    pub fn from_tzif(data: &[u8]) -> Result<TimeZone, Error> {
        tzif::parse(data).map_err(Error::InvalidFile)
    }

    /// Build a zone from a POSIX TZ string like `"EST5EDT,M3.2.0,M11.1.0"`.
    pub fn from_posix_tz(s: &str) -> Result<TimeZone, Error> {
        let tz = posix::parse(s.as_bytes()).ok_or(Error::InvalidTzString)?;
        TimeZone::from_rules(&tz).ok_or(Error::InvalidTzString)
    }

    pub(crate) fn from_rules(tz: &posix::Tz) -> Option<TimeZone> {
        let std = TzOffset {
            utoff: tz.std,
            dst: false,
            desig: tz.std_desig,
        };
        let (offsets, cycle) = match &tz.dst {
            None => (vec![std], None),
            // A permanently-on-DST zone needs no cyclic table at all
            Some(dst) if tz.is_always_dst() => (
                vec![TzOffset {
                    utoff: dst.offset,
                    dst: true,
                    desig: dst.desig,
                }],
                None,
            ),
            Some(dst) => {
                let dst_record = TzOffset {
                    utoff: dst.offset,
                    dst: true,
                    desig: dst.desig,
                };
                let cycle = CycleTable::materialize(tz.std, dst, 0, 1, 0)?;
                (vec![std, dst_record], Some(cycle))
            }
        };
        Some(TimeZone {
            transitions: vec![i64::MIN].into(),
            offset_map: vec![0].into(),
            offsets: offsets.into(),
            leap: None,
            cycle,
        })
    }

    /// The offset record in force at the given instant.
    pub(crate) fn offset_at(&self, ts: i64) -> &TzOffset {
        let last = self.transitions.len() - 1;
        if ts < self.transitions[last] {
            &self.offsets[self.offset_map[bisect(&self.transitions, ts)] as usize]
        } else if let Some(cycle) = &self.cycle {
            let i = cycle.find_fwd(CycleTable::adjust(ts));
            &self.offsets[cycle.offset_index_after(i - 1) as usize]
        } else {
            // No rules for the future: the last explicit offset is the
            // best available answer
            &self.offsets[self.offset_map[last] as usize]
        }
    }

    /// Convert a timestamp to civil time in this zone.
    ///
    /// During a positive leap second the `second` field reads 60. Fails
    /// with [`Error::OverflowYear`] when the year can't be represented as
    /// a signed 32-bit offset from 1900.
    pub fn to_civil(&self, ts: i64) -> Result<CivilTime, Error> {
        // Don't even start if the year is sure to overflow
        if !(civil::MIN_TS..=civil::MAX_TS).contains(&ts) {
            return Err(Error::OverflowYear);
        }

        // The leap correction in effect, and whether ts lands on an
        // inserted second (observable as second 60)
        let (lsec, extra) = match &self.leap {
            None => (0, 0),
            Some(leap) => {
                let li = bisect(&leap.ts, ts);
                (leap.secs[li] as i64, (li > 0 && ts == leap.ts[li]) as i64)
            }
        };

        let offset = self.offset_at(ts);

        let mut tm = CivilTime::new(0, 1, 1, 0, 0, 0);
        let year = civil::ts_to_civil_utc(&mut tm, ts + offset.utoff.get() as i64 - lsec);
        tm.second += extra;
        tm.dst = Some(offset.dst);
        tm.utc_offset = offset.utoff.get();
        tm.designation = offset.desig;

        if i32::try_from(year - civil::BASE_YEAR).is_err() {
            return Err(Error::OverflowYear);
        }
        Ok(tm)
    }

    /// Convert civil time in this zone to a timestamp, rewriting the civil
    /// record in canonical form with all derived fields filled in.
    ///
    /// Out-of-range fields are carried into their neighbours first. For a
    /// time that occurs twice (clocks rolled back), the `dst` flag picks
    /// the occurrence; for a time that never occurred (clocks sprang
    /// forward), the record is rewritten into the neighbouring offset as
    /// if the stated time had been reached by ordinary arithmetic from a
    /// valid one.
    ///
    /// On [`Error::Unrepresentable`] the y/m/d/h/m fields may have been
    /// partially canonicalized; the `second` field holds the caller's
    /// original value.
    pub fn from_civil(&self, tm: &mut CivilTime) -> Result<i64, Error> {
        // Sequester the seconds when the zone tracks leap seconds: second
        // 60 must survive canonicalization
        let sec = tm.second;
        if self.leap.is_some() {
            tm.second = 0;
        }

        match civil::canonicalize(tm) {
            Some(year) if i32::try_from(year - civil::BASE_YEAR).is_ok() => {}
            _ => {
                tm.second = sec;
                return Err(Error::Unrepresentable);
            }
        }

        // Timestamp as if the civil fields were UTC
        let mut ts = civil::civil_utc_to_ts(tm);

        let mut recalc = false;
        let mut lsec = 0i64;
        let mut leap_end = i64::MAX;
        if let Some(leap) = &self.leap {
            tm.second = sec;
            ts += sec;
            recalc = !(0..=59).contains(&sec);

            // The applicable correction is keyed by civil time
            let li = bisect(&leap.rev, civil::encode_ymdhm(tm));
            lsec = leap.secs[li] as i64;
            ts += lsec;
            if li + 1 < leap.ts.len() {
                leap_end = leap.ts[li + 1];
            }
        }

        // Find the offset whose local-time range contains the civil
        // moment, along with its neighbours.
        let last = self.transitions.len() - 1;
        let last_off = &self.offsets[self.offset_map[last] as usize];
        let mut offset; // the containing interval's offset
        let prev; // the offset before it, if any
        let next; // (offset, local ts, transition instant) after it, if any
        let curr_ts; // the timestamp in the containing interval's frame
        let curr_trans; // instant the containing interval began

        if ts - (last_off.utoff.get() as i64) < self.transitions[last] {
            let i = self.bisect_rev(ts);
            offset = &self.offsets[self.offset_map[i] as usize];
            curr_ts = ts;
            curr_trans = self.transitions[i];
            prev = (i > 0).then(|| &self.offsets[self.offset_map[i - 1] as usize]);
            // The branch condition leaves at least one explicit
            // transition after interval i
            next = Some((
                &self.offsets[self.offset_map[i + 1] as usize],
                ts,
                self.transitions[i + 1],
            ));
        } else if let Some(cycle) = &self.cycle {
            let adj = CycleTable::adjust(ts);
            let j = cycle.find_rev(adj, &self.offsets);
            offset = &self.offsets[cycle.offset_index_after(j) as usize];
            curr_ts = adj;
            curr_trans = cycle.expand(j);
            next = Some((
                &self.offsets[cycle.offset_index_after(j + 1) as usize],
                adj,
                cycle.expand(j + 1),
            ));
            // The interval before this one may still be the explicit
            // table's last
            let diff = curr_trans - cycle.expand(j - 1);
            prev = if last >= 1 && ts - diff < self.transitions[last] {
                Some(&self.offsets[self.offset_map[last - 1] as usize])
            } else {
                Some(&self.offsets[cycle.offset_index_after(j + 1) as usize])
            };
        } else {
            offset = last_off;
            curr_ts = ts;
            curr_trans = self.transitions[last];
            prev = (last > 0).then(|| &self.offsets[self.offset_map[last - 1] as usize]);
            next = None;
        }

        // Cope with problematic civil times
        if let Some((next_off, next_ts, next_trans)) = next
            && next_ts - offset.utoff.get() as i64 >= next_trans
        {
            // The timestamp is after this offset's range yet before the
            // next one's: the civil time never occurred. A DST flag
            // matching this offset means something was added to a valid
            // time, pushing it into the next interval; otherwise assume
            // subtraction from the next.
            if tm.dst == Some(offset.dst) && tm.dst != Some(next_off.dst) {
                ts -= offset.utoff.get() as i64;
                // Rewrite the civil fields under the next offset
                civil::ts_to_civil_utc(tm, ts + next_off.utoff.get() as i64);
                offset = next_off;
            } else {
                ts -= next_off.utoff.get() as i64;
                // Rewrite under the current offset, below
                recalc = true;
            }
        } else {
            // The time may belong to this offset or the previous one.
            // Consult the DST flag and, failing that, the offset from UTC.
            if let (Some(dst), Some(prev_off)) = (tm.dst, prev)
                && curr_ts - (prev_off.utoff.get() as i64) < curr_trans
                && dst == prev_off.dst
                && (dst != offset.dst || tm.utc_offset == prev_off.utoff.get())
            {
                offset = prev_off;
            }
            ts -= offset.utoff.get() as i64;
        }

        if recalc {
            let extra = (tm.second == 60 && leap_end - 60 <= ts && ts <= leap_end) as i64;
            civil::ts_to_civil_utc(tm, ts + offset.utoff.get() as i64 - lsec - extra);
            tm.second += extra;
        }

        // The offset is chosen; fill in the remaining derived fields
        tm.dst = Some(offset.dst);
        tm.utc_offset = offset.utoff.get();
        tm.designation = offset.desig;
        Ok(ts)
    }

    /// Greatest `i` such that `transitions[i] <= ts - utoff(i)`: the
    /// interval whose local-time range the (UTC-interpreted) civil
    /// timestamp falls into.
    fn bisect_rev(&self, ts: i64) -> usize {
        let (mut lo, mut hi) = (0, self.transitions.len() - 1);
        while lo < hi {
            let i = (lo + hi + 1) / 2;
            let utoff = self.offsets[self.offset_map[i] as usize].utoff.get() as i64;
            if self.transitions[i] <= ts - utoff {
                lo = i;
            } else {
                hi = i - 1;
            }
        }
        lo
    }
}
