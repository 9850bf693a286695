//! Parsing and evaluation of POSIX TZ strings.
//!
//! The grammar accepted here is deliberately stricter than POSIX: when a DST
//! segment is present, both the start and end rules are required, and
//! designations must be 3 to 6 characters.
//!
//! Resources:
//! - [POSIX TZ strings](https://pubs.opengroup.org/onlinepubs/9699919799/basedefs/V1_chap08.html)
//! - [RFC 8536, section 3.3.1](https://www.rfc-editor.org/rfc8536)
use crate::{
    civil::{self, MONTH_STARTS, SECS_PER_DAY},
    common::{
        parse::Cursor,
        scalar::{Designation, Month, Offset, Weekday},
    },
};
use std::num::{NonZeroU8, NonZeroU16};

const DEFAULT_DST_SHIFT: i32 = 3_600;

// RFC 9636: a rule's transition time may range from -167 to 167 hours,
// not just 0-24.
const MAX_RULE_TIME: i32 = 167 * 3_600;
const DEFAULT_RULE_TIME: i32 = 2 * 3_600; // 2 AM

// A POSIX offset may not reach a full day plus change; anything parsed here
// also fits the wider TZif `Offset` range.
const MAX_OFFSET: i32 = 24 * 3_600 + 59 * 60 + 59;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tz {
    pub(crate) std_desig: Designation,
    pub(crate) std: Offset,
    pub(crate) dst: Option<Dst>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Dst {
    pub(crate) desig: Designation,
    pub(crate) offset: Offset,
    pub(crate) start: (Rule, i32),
    pub(crate) end: (Rule, i32),
}

/// A rule for the date when DST starts or ends
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Rule {
    LastWeekday(Weekday, Month),
    NthWeekday(NonZeroU8, Weekday, Month), // N is 1..=4
    DayOfYear(NonZeroU16),                 // 1..=366, accounts for leap days
    JulianDayOfYear(NonZeroU16),           // 1..=365, ignores leap days
}

impl Tz {
    /// Zones like Africa/Casablanca express "DST all year round" as a rule
    /// pair spanning from the first instant of the year to the last:
    /// start at day 0 time 0, end on J365 at 24:00 shifted by the DST
    /// offset difference.
    pub(crate) fn is_always_dst(&self) -> bool {
        let Some(dst) = &self.dst else { return false };
        let starts_at_year_open = matches!(
            dst.start.0,
            Rule::DayOfYear(d) | Rule::JulianDayOfYear(d) if d.get() == 1
        ) && dst.start.1 == 0;
        starts_at_year_open
            && matches!(dst.end.0, Rule::JulianDayOfYear(d) if d.get() == 365)
            && dst.end.1 as i64 == SECS_PER_DAY + (dst.offset.get() - self.std.get()) as i64
    }
}

impl Rule {
    /// The 0-based day of the year the rule selects in the given year.
    pub(crate) fn day_of_year(self, year: i64) -> i64 {
        let leap = civil::is_leap(year);
        match self {
            // The 366th day would not exist in a non-leap year; clamp to
            // the last day like the rest of the ecosystem does.
            Rule::DayOfYear(d) => i64::from(d.get() - 1).min(364 + leap as i64),
            Rule::JulianDayOfYear(d) => i64::from(d.get() - 1) + (leap && d.get() > 59) as i64,
            Rule::LastWeekday(w, m) => {
                let (first, len) = month_span(year, m, leap);
                let last_wday = (civil::jan1_weekday(year) as i64 + first + len - 1) % 7;
                first + len - 1 - (last_wday + 7 - w.sunday_is_0() as i64) % 7
            }
            Rule::NthWeekday(n, w, m) => {
                let (first, len) = month_span(year, m, leap);
                let first_wday = (civil::jan1_weekday(year) as i64 + first) % 7;
                let mut day = (w.sunday_is_0() as i64 + 7 - first_wday) % 7 + 7 * (n.get() - 1) as i64;
                // A 4th occurrence always exists, but guard anyway
                while day >= len {
                    day -= 7;
                }
                first + day
            }
        }
    }
}

/// (first day-of-year, length) of a month
fn month_span(year: i64, month: Month, leap: bool) -> (i64, i64) {
    debug_assert_eq!(civil::is_leap(year), leap);
    let starts = &MONTH_STARTS[leap as usize];
    let m = month.get() as usize;
    (starts[m - 1], starts[m] - starts[m - 1])
}

pub fn parse(s: &[u8]) -> Option<Tz> {
    let mut cur = Cursor::new(s);
    let std_desig = parse_desig(&mut cur)?;
    let std = parse_offset(&mut cur)?;

    // Nothing further means a fixed offset without DST
    if cur.at_end() {
        return Some(Tz {
            std_desig,
            std,
            dst: None,
        });
    }

    let dst_desig = parse_desig(&mut cur)?;
    let dst_offset = if cur.peek() == Some(b',') {
        // With the offset omitted, DST defaults to one hour ahead of
        // standard time
        std.shift(DEFAULT_DST_SHIFT)?
    } else {
        parse_offset(&mut cur)?
    };
    if !cur.eat(b',') {
        return None;
    }

    // Both rules are required, separated by a comma
    let start = parse_rule(&mut cur)?;
    if !cur.eat(b',') {
        return None;
    }
    let end = parse_rule(&mut cur)?;

    // No content may remain
    cur.at_end().then_some(Tz {
        std_desig,
        std,
        dst: Some(Dst {
            desig: dst_desig,
            offset: dst_offset,
            start,
            end,
        }),
    })
}

/// A designation: bare letters, or alphanumerics plus sign characters
/// between angle brackets. 3 to 6 characters either way.
fn parse_desig(cur: &mut Cursor) -> Option<Designation> {
    let name = if cur.eat(b'<') {
        let name = cur.take_while(|b| b.is_ascii_alphanumeric() || b == b'+' || b == b'-');
        // A disallowed character simply stops the scan, so requiring the
        // closing bracket here rejects it along with unterminated names
        if !cur.eat(b'>') {
            return None;
        }
        name
    } else {
        cur.take_while(|b| b.is_ascii_alphabetic())
    };
    if !(3..=6).contains(&name.len()) {
        return None;
    }
    Designation::new(name)
}

/// An offset like `[+|-]h[h][:mm[:ss]]`. The sign convention is inverted
/// on parse: POSIX "EST5" means five hours *behind* UTC.
fn parse_offset(cur: &mut Cursor) -> Option<Offset> {
    let secs = signed_hms(cur, 2, MAX_OFFSET)?;
    Some(Offset::new_unchecked(-secs))
}

/// An optionally signed `h...[:mm[:ss]]` duration in seconds, with at most
/// `hour_digits` digits of hours and a magnitude bounded by `limit`.
fn signed_hms(cur: &mut Cursor, hour_digits: usize, limit: i32) -> Option<i32> {
    let negative = match cur.peek() {
        Some(b'-') => {
            cur.bump();
            true
        }
        Some(b'+') => {
            cur.bump();
            false
        }
        _ => false,
    };
    let mut secs = cur.digits(hour_digits)? as i32 * 3_600;
    if cur.eat(b':') {
        secs += sexagesimal(cur)? * 60;
        if cur.eat(b':') {
            secs += sexagesimal(cur)?;
        }
    }
    if secs > limit {
        return None;
    }
    Some(if negative { -secs } else { secs })
}

/// A minutes or seconds component: exactly two digits, 00 through 59
fn sexagesimal(cur: &mut Cursor) -> Option<i32> {
    cur.fixed_digits(2).filter(|&n| n < 60).map(|n| n as i32)
}

/// A transition date, `Mm.w.d` / `Jn` / `n`, with its optional `/time`
fn parse_rule(cur: &mut Cursor) -> Option<(Rule, i32)> {
    let date = if cur.eat(b'M') {
        parse_month_rule(cur)?
    } else if cur.eat(b'J') {
        // 1-365, never counting Feb 29
        let n = cur.digits(3)?;
        if !(1..=365).contains(&n) {
            return None;
        }
        Rule::JulianDayOfYear(NonZeroU16::new(n as u16)?)
    } else {
        // 0-365, counting Feb 29; stored 1-based
        let n = cur.digits(3)?;
        if n > 365 {
            return None;
        }
        Rule::DayOfYear(NonZeroU16::new(n as u16 + 1)?)
    };

    let time = if cur.eat(b'/') {
        signed_hms(cur, 3, MAX_RULE_TIME)?
    } else {
        DEFAULT_RULE_TIME
    };
    Some((date, time))
}

/// The `m.w.d` tail of an `M` rule
fn parse_month_rule(cur: &mut Cursor) -> Option<Rule> {
    let month = Month::new(cur.digits(2)? as u8)?;
    if !cur.eat(b'.') {
        return None;
    }
    let week = cur.digits(1)? as u8;
    if !(1..=5).contains(&week) {
        return None;
    }
    if !cur.eat(b'.') {
        return None;
    }
    let day = cur.digits(1)? as u8;
    if day > 6 {
        return None;
    }
    let weekday = Weekday::from_sunday0_unchecked(day);

    // Week 5 asks for an occurrence that not every month has; the standard
    // reads it as "the last such weekday"
    Some(match NonZeroU8::new(week).filter(|w| w.get() < 5) {
        Some(w) => Rule::NthWeekday(w, weekday, month),
        None => Rule::LastWeekday(weekday, month),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn desig(s: &str) -> Designation {
        Designation::new(s.as_bytes()).unwrap()
    }

    fn offset(secs: i32) -> Offset {
        Offset::new(secs).unwrap()
    }

    #[test]
    fn invalid() {
        let cases: &[&[u8]] = &[
            // empty
            b"",
            // no offset
            b"FOO",
            // invalid designation (digit start, too short, unclosed)
            b"1T",
            b"AB1",
            b"<FOO>",
            b"<FOO>>-3",
            b"AB-3",
            b"ABCDEFG-3",
            b"<AB>-3",
            b"<A_B>-3",
            // Invalid components
            b"FOO+01:",
            b"FOO+01:9:03",
            b"FOO+01:60:03",
            b"FOO-01:59:60",
            b"FOO-01:59:",
            b"FOO-01:59:4",
            // offset too large
            b"FOO25",
            b"FOO+25",
            b"FOO-25",
            b"FOO-27:00",
            b"FOO+27:00",
            b"FOO-25:45:05",
            b"FOO+27:45:09",
            // invalid trailing data
            b"FOO+01:30M",
            // Unfinished rule
            b"FOO+01:30BAR,J",
            b"FOO+01:30BAR,",
            b"FOO+01:30BAR,M3.2.",
            // Missing end rule
            b"FOO+01:30BAR,M3.2.1",
            // Invalid month rule
            b"FOO+01:30BAR,M13.2.1,M1.1.1",
            b"FOO+01:30BAR,M12.6.1,M1.1.1",
            b"FOO+01:30BAR,M12.2.7,M1.1.1",
            b"FOO+01:30BAR,M12.0.2,M1.1.1",
            // Invalid day of year
            b"FOO+01:30BAR,J366,M1.1.1",
            b"FOO+01:30BAR,J0,M1.1.1",
            b"FOO+01:30BAR,-1,M1.1.1",
            b"FOO+01:30BAR,366,M1.1.1",
            // Trailing data
            b"FOO+01:30BAR,M3.2.1,M1.1.1,",
            b"FOO+01:30BAR,M3.2.1,M1.1.1/0/1",
            // std offset out of range
            b"FOO-25:30BAR,M3.2.1,M1.1.1",
        ];
        for &case in cases {
            assert_eq!(parse(case), None, "parse {:?}", unsafe {
                std::str::from_utf8_unchecked(case)
            });
        }
    }

    #[test]
    fn fixed_offset() {
        let cases: &[(&[u8], i32)] = &[
            (b"FOO1", -3600),
            (b"FOOS0", 0),
            (b"FOO+01", -3600),
            (b"FOO+01:30", -3600 - 30 * 60),
            (b"FOO+01:30:59", -3600 - 30 * 60 - 59),
            (b"FOOM+23:59:59", -86_399),
            (b"FOOS-23:59:59", 86_399),
            (b"FOOBLA-23:59", 23 * 3600 + 59 * 60),
            (b"HKT-8", 8 * 3600),
            (b"FOO-23", 23 * 3600),
            (b"FOO-01", 3600),
            (b"FOO+24:59:59", -89_999),
            (b"FOO-24:59:59", 89_999),
            (b"<FOO>-3", 3 * 3600),
            (b"<+0530>-5:30", 5 * 3600 + 30 * 60),
        ];

        for &(s, expected) in cases {
            let parsed = parse(s).unwrap();
            assert_eq!(parsed.std, offset(expected), "parse {:?}", unsafe {
                std::str::from_utf8_unchecked(s)
            });
            assert_eq!(parsed.dst, None);
        }
        // designations are retained
        assert_eq!(parse(b"HKT-8").unwrap().std_desig, desig("HKT"));
        assert_eq!(parse(b"<+0530>-5:30").unwrap().std_desig, desig("+0530"));
    }

    #[test]
    fn with_dst() {
        // Implicit DST offset
        assert_eq!(
            parse(b"AEST-10AEDT,M10.1.0,M4.1.0/3").unwrap(),
            Tz {
                std_desig: desig("AEST"),
                std: offset(36_000),
                dst: Some(Dst {
                    desig: desig("AEDT"),
                    offset: offset(39_600),
                    start: (
                        Rule::NthWeekday(
                            1.try_into().unwrap(),
                            Weekday::Sunday,
                            Month::October
                        ),
                        DEFAULT_RULE_TIME
                    ),
                    end: (
                        Rule::NthWeekday(1.try_into().unwrap(), Weekday::Sunday, Month::April),
                        3 * 3_600
                    ),
                })
            }
        );
        // Explicit DST offset, last-weekday rules
        assert_eq!(
            parse(b"GMT0BST1,M3.5.0/1,M10.5.0").unwrap(),
            Tz {
                std_desig: desig("GMT"),
                std: offset(0),
                dst: Some(Dst {
                    desig: desig("BST"),
                    offset: offset(-3_600),
                    start: (Rule::LastWeekday(Weekday::Sunday, Month::March), 3_600),
                    end: (
                        Rule::LastWeekday(Weekday::Sunday, Month::October),
                        DEFAULT_RULE_TIME
                    ),
                })
            }
        );
        // Julian and plain day-of-year rules, explicit times
        assert_eq!(
            parse(b"FOO+1FOOS2:30,J023/8:34:01,023/8").unwrap(),
            Tz {
                std_desig: desig("FOO"),
                std: offset(-3_600),
                dst: Some(Dst {
                    desig: desig("FOOS"),
                    offset: offset(-3_600 * 2 - 30 * 60),
                    start: (
                        Rule::JulianDayOfYear(23.try_into().unwrap()),
                        8 * 3_600 + 34 * 60 + 1
                    ),
                    end: (Rule::DayOfYear(24.try_into().unwrap()), 8 * 3_600),
                })
            }
        );
        // 24:00:00 is a valid rule time, as is anything within +/-167 hours
        let tz = parse(b"FOO+2FOOS+1,M3.5.0/24,M10.2.0/-89:02").unwrap();
        let dst = tz.dst.unwrap();
        assert_eq!(dst.start.1, 86_400);
        assert_eq!(dst.end.1, -89 * 3_600 - 2 * 60);
        // rule times beyond the RFC range are rejected
        assert_eq!(parse(b"FOO+2FOOS+1,M3.5.0/168,M10.2.0"), None);
    }

    #[test]
    fn always_dst() {
        // Africa/Casablanca-style: permanently one hour ahead
        let tz = parse(b"<+01>-1<+00>0,0/0,J365/23").unwrap();
        assert!(tz.is_always_dst());
        assert_eq!(tz.dst.unwrap().offset, offset(0));

        let tz = parse(b"<-03>3<-02>,M3.5.0/-2,M10.5.0/-1").unwrap();
        assert!(!tz.is_always_dst());
        // the rule pair must span the entire year, not merely start at J1
        let tz = parse(b"FOO-1BAR,J1/0,J300").unwrap();
        assert!(!tz.is_always_dst());
    }

    #[test]
    fn day_of_year_rules() {
        fn doy(rule: Rule, year: i64) -> i64 {
            rule.day_of_year(year)
        }
        let j = |n: u16| Rule::JulianDayOfYear(n.try_into().unwrap());
        let n = |n: u16| Rule::DayOfYear((n + 1).try_into().unwrap());

        // Julian days skip Feb 29
        assert_eq!(doy(j(1), 2021), 0);
        assert_eq!(doy(j(59), 2021), 58); // Feb 28
        assert_eq!(doy(j(60), 2021), 59); // Mar 1
        assert_eq!(doy(j(60), 2020), 60); // Mar 1 in a leap year
        assert_eq!(doy(j(365), 2021), 364);
        assert_eq!(doy(j(365), 2020), 365);

        // Plain days count Feb 29
        assert_eq!(doy(n(0), 2021), 0);
        assert_eq!(doy(n(59), 2020), 59); // Feb 29
        assert_eq!(doy(n(59), 2021), 59); // Mar 1
        assert_eq!(doy(n(365), 2020), 365);
        assert_eq!(doy(n(365), 2021), 364); // clamped
    }

    #[test]
    fn weekday_rules() {
        fn date_of(rule: Rule, year: i64) -> (i64, i64) {
            let doy = rule.day_of_year(year);
            let leap = civil::is_leap(year) as usize;
            let month = MONTH_STARTS[leap].iter().rposition(|&s| s <= doy).unwrap();
            (month as i64 + 1, doy - MONTH_STARTS[leap][month] + 1)
        }
        let nth = |n: u8, w, m| Rule::NthWeekday(NonZeroU8::new(n).unwrap(), w, m);

        // second Sunday of March (US DST start)
        assert_eq!(date_of(nth(2, Weekday::Sunday, Month::March), 2012), (3, 11));
        assert_eq!(date_of(nth(2, Weekday::Sunday, Month::March), 2001), (3, 11));
        assert_eq!(date_of(nth(2, Weekday::Sunday, Month::March), 2024), (3, 10));
        // first Sunday of November (US DST end)
        assert_eq!(
            date_of(nth(1, Weekday::Sunday, Month::November), 2012),
            (11, 4)
        );
        // first occurrence on the 1st itself
        assert_eq!(
            date_of(nth(1, Weekday::Sunday, Month::December), 2002),
            (12, 1)
        );
        // last weekday rules
        assert_eq!(
            date_of(Rule::LastWeekday(Weekday::Sunday, Month::March), 2024),
            (3, 31)
        );
        assert_eq!(
            date_of(Rule::LastWeekday(Weekday::Sunday, Month::October), 2000),
            (10, 29)
        );
        assert_eq!(
            date_of(Rule::LastWeekday(Weekday::Monday, Month::March), 2024),
            (3, 25)
        );
        assert_eq!(
            date_of(Rule::LastWeekday(Weekday::Saturday, Month::July), 1915),
            (7, 31)
        );
    }
}
