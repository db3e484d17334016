//! End-to-end contract tests for the error-log pattern pipeline.

use dbdoctor::core::logs::patterns::{extract, Severity};

const SAMPLE_LOG: &str = "\
2025-12-17T20:41:23.711701291Z stdout F 2025-12-17 20:41:23 0 [Note] Starting MariaDB
2025-12-17 20:41:25 [4412] [ERROR] InnoDB: Unable to lock ./ibdata1 error: 11
2025-12-17 20:42:25 [4413] [ERROR] InnoDB: Unable to lock ./ibdata1 error: 11
2025-12-17 20:43:00 [4413] [Warning] Aborted connection (123456) to db: 'shop'
2025-12-17 20:43:10 [4413] [Warning] Aborted connection (654321) to db: 'shop'
2025-12-17 20:43:11 [4413] [Warning] Aborted connection (777777) to db: 'shop'
2025-12-17 20:44:00 [4414] [ERROR] Table 'shop.orders' is marked as crashed
continuation line without a timestamp
";

#[test]
fn patterns_are_pairwise_distinct_and_time_ordered() {
    let patterns = extract(SAMPLE_LOG, 20);
    for (i, a) in patterns.iter().enumerate() {
        for b in patterns.iter().skip(i + 1) {
            assert_ne!(a.pattern, b.pattern, "fingerprints must be pairwise distinct");
        }
    }
    for p in &patterns {
        if let (Some(first), Some(last)) = (&p.first_seen, &p.last_seen) {
            assert!(first <= last, "first_seen must not exceed last_seen in {p:?}");
        }
        assert!(p.count >= 1);
    }
}

#[test]
fn extraction_twice_yields_identical_fingerprints_and_counts() {
    let one = extract(SAMPLE_LOG, 20);
    let two = extract(SAMPLE_LOG, 20);
    let key = |ps: &[dbdoctor::core::logs::patterns::ErrorPattern]| {
        ps.iter()
            .map(|p| (p.pattern.clone(), p.count))
            .collect::<Vec<_>>()
    };
    assert_eq!(key(&one), key(&two));
}

#[test]
fn grouping_collapses_the_id_variance() {
    let patterns = extract(SAMPLE_LOG, 20);
    let aborted = patterns
        .iter()
        .find(|p| p.pattern.contains("Aborted connection"))
        .expect("aborted-connection pattern");
    assert_eq!(aborted.count, 3, "conn-id variance must fold into one group");
    assert_eq!(aborted.severity, Severity::Warning);

    let lock = patterns
        .iter()
        .find(|p| p.pattern.contains("Unable to lock"))
        .expect("lock pattern");
    assert_eq!(lock.count, 2);
    assert_eq!(lock.first_seen.as_deref(), Some("2025-12-17 20:41:25"));
    assert_eq!(lock.last_seen.as_deref(), Some("2025-12-17 20:42:25"));
}

#[test]
fn errors_outrank_warnings_regardless_of_count() {
    let patterns = extract(SAMPLE_LOG, 20);
    assert_eq!(patterns[0].severity, Severity::Error);
    let first_warning = patterns
        .iter()
        .position(|p| p.severity == Severity::Warning)
        .unwrap();
    let last_error = patterns
        .iter()
        .rposition(|p| p.severity == Severity::Error)
        .unwrap();
    assert!(last_error < first_warning, "all errors sort before warnings");
}

#[test]
fn the_returned_slice_honors_the_cap() {
    let mut log = String::new();
    for i in 0..100 {
        log.push_str(&format!("[ERROR] distinct failure kind {i} happened here\n"));
    }
    assert_eq!(extract(&log, 20).len(), 20);
    assert_eq!(extract(&log, 1).len(), 1);
}
