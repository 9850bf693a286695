use criterion::{Criterion, criterion_group, criterion_main};
use std::hint::black_box;
use zone64::{CivilTime, TimeZone};

/// A small America/New_York-shaped TZif: the 1970 and 2007 transitions
/// plus the current rules as a footer.
fn new_york_tzif() -> Vec<u8> {
    fn header(out: &mut Vec<u8>, counts: [u32; 6]) {
        out.extend_from_slice(b"TZif2");
        out.extend_from_slice(&[0; 15]);
        for c in counts {
            out.extend_from_slice(&c.to_be_bytes());
        }
    }
    let transitions: &[(i64, u8)] = &[
        (-5767200, 0),
        (9961200, 1),
        (25682400, 0),
        (1173596400, 1),
        (1194156000, 0),
    ];
    let mut out = Vec::new();
    header(&mut out, [0, 0, 0, 0, 1, 1]);
    out.extend_from_slice(&[0; 6]);
    out.push(0);
    header(&mut out, [0, 0, 0, transitions.len() as u32, 2, 8]);
    for &(ts, _) in transitions {
        out.extend_from_slice(&ts.to_be_bytes());
    }
    for &(_, idx) in transitions {
        out.push(idx);
    }
    for (utoff, dst, idx) in [(-18_000i32, 0u8, 0u8), (-14_400, 1, 4)] {
        out.extend_from_slice(&utoff.to_be_bytes());
        out.push(dst);
        out.push(idx);
    }
    out.extend_from_slice(b"EST\0EDT\0");
    out.extend_from_slice(b"\nEST5EDT,M3.2.0,M11.1.0\n");
    out
}

fn benchmarks(c: &mut Criterion) {
    let tzif = new_york_tzif();
    let ny = TimeZone::from_tzif(&tzif).unwrap();

    c.bench_function("parse_tzif", |b| {
        b.iter(|| TimeZone::from_tzif(black_box(&tzif)).unwrap())
    });

    c.bench_function("parse_posix_tz", |b| {
        b.iter(|| TimeZone::from_posix_tz(black_box("EST5EDT,M3.2.0,M11.1.0")).unwrap())
    });

    // within the explicit transition table
    c.bench_function("to_civil_explicit", |b| {
        b.iter(|| ny.to_civil(black_box(1000000000)).unwrap())
    });

    // resolved through the materialised 400-year cycle
    c.bench_function("to_civil_cyclic", |b| {
        b.iter(|| ny.to_civil(black_box(13601088000)).unwrap())
    });

    c.bench_function("from_civil", |b| {
        b.iter(|| {
            let mut tm = CivilTime::new(
                black_box(2050),
                black_box(6),
                black_box(15),
                12,
                30,
                45,
            );
            ny.from_civil(&mut tm).unwrap()
        })
    });

    c.bench_function("from_civil_fold", |b| {
        b.iter(|| {
            let mut tm = CivilTime::new(2012, 11, 4, 1, 30, 0).with_dst(black_box(true));
            ny.from_civil(&mut tm).unwrap()
        })
    });
}

criterion_group!(benches, benchmarks);
criterion_main!(benches);
