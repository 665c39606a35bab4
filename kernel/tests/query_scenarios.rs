//! `traced` end to end: records go in through `TraceLog`, pages come out as
//! text.


use ktrace::tracing::{EntryCursor, EntryFlags, QueryOutcome, TraceLog};
use shared_log::{empty_log, entry_lines, messages, query, PaddedMessage, TestPlatform};

fn fill(log: &TraceLog<'_>, texts: impl IntoIterator<Item = String>) {
    for text in texts {
        assert!(log.message(format_args!("{}", text)).is_some(), "dropped {}", text);
    }
}

fn numbered(count: usize) -> impl Iterator<Item = String> {
    (1..=count).map(|i| format!("m{}", i))
}

fn summary_line(page: &str) -> &str {
    page.lines()
        .find(|line| line.starts_with("printed "))
        .expect("page has a summary line")
}

#[test]
fn test_thread_filter_selects_matching_entries() {
    let platform = TestPlatform::new();
    let mut storage = vec![0u8; 4096];
    let log = empty_log(&mut storage, &platform);

    for (thread, text) in [(5, "a"), (7, "b"), (7, "c"), (9, "d")] {
        platform.set_thread(thread);
        fill(&log, [text.to_string()]);
    }

    let (outcome, page) = query(&log, &["thread", "7"]);
    let QueryOutcome::Page(summary) = outcome else {
        panic!("expected a page, got {:?}", outcome);
    };
    assert_eq!(summary.printed, 2);
    assert_eq!(messages(&page), ["b", "c"]);

    let lines = entry_lines(&page);
    assert!(lines[0].starts_with("    2. [     7]"), "{}", lines[0]);
    assert!(lines[1].starts_with("    3. [     7]"), "{}", lines[1]);
    println!("✅ thread filter test passed");
}

#[test]
fn test_eviction_drops_only_the_oldest() {
    let platform = TestPlatform::new();
    // 301 granules: three 100-granule entries plus the sentinel.
    let mut storage = vec![0u8; 301 * 4];
    let log = empty_log(&mut storage, &platform);

    for label in ["e1", "e2", "e3", "e4"] {
        let record = PaddedMessage { text: label, granules: 100 };
        assert!(log.record(&record).is_some(), "dropped {}", label);
    }
    assert_eq!(log.entries(), 3);
    assert_eq!(log.entries_ever(), 4);

    let (_, page) = query(&log, &["1", "10"]);
    assert_eq!(messages(&page), ["e2", "e3", "e4"]);

    let walked = log.inspect(|ring| {
        assert_eq!(ring.verify_links(), Some(2));
        let mut cursor = EntryCursor::new();
        cursor.seek_to(ring, ring.entries() + 1);
        let mut labels = Vec::new();
        while let Some(handle) = cursor.previous(ring) {
            let payload = ring.view(handle).payload;
            let body = &payload[ktrace::tracing::record::RECORD_HEADER_SIZE..];
            let len = u16::from_le_bytes([body[0], body[1]]) as usize;
            labels.push(String::from_utf8(body[2..2 + len].to_vec()).unwrap());
        }
        labels
    });
    assert_eq!(walked, ["e4", "e3", "e2"]);
    println!("✅ eviction test passed");
}

#[test]
fn test_forward_continuation_matches_single_page() {
    let platform = TestPlatform::new();
    let mut storage = vec![0u8; 4096];
    let log = empty_log(&mut storage, &platform);
    fill(&log, numbered(6));

    let (_, first) = query(&log, &["1", "3"]);
    let (outcome, second) = query(&log, &["forward"]);
    let QueryOutcome::Page(summary) = outcome else {
        panic!("expected a page, got {:?}", outcome);
    };
    assert!(summary.continued);
    assert_eq!((summary.first_checked, summary.last_checked), (4, 6));

    let (_, whole) = query(&log, &["1", "6"]);
    let mut paged = entry_lines(&first);
    paged.extend(entry_lines(&second));
    assert_eq!(paged, entry_lines(&whole));
    println!("✅ forward continuation test passed");
}

#[test]
fn test_backward_continuation_walks_toward_older_entries() {
    let platform = TestPlatform::new();
    let mut storage = vec![0u8; 4096];
    let log = empty_log(&mut storage, &platform);
    fill(&log, numbered(9));

    let (_, newest) = query(&log, &["0", "3"]);
    assert_eq!(messages(&newest), ["m7", "m8", "m9"]);

    let (_, older) = query(&log, &["backward"]);
    assert_eq!(messages(&older), ["m4", "m5", "m6"]);

    // Empty command line keeps going the same way.
    let (_, oldest) = query(&log, &[]);
    assert_eq!(messages(&oldest), ["m1", "m2", "m3"]);
    println!("✅ backward continuation test passed");
}

#[test]
fn test_stale_continuation_is_refused() {
    let platform = TestPlatform::new();
    let mut storage = vec![0u8; 4096];
    let log = empty_log(&mut storage, &platform);
    fill(&log, numbered(4));

    let (outcome, _) = query(&log, &["forward"]);
    assert_eq!(outcome, QueryOutcome::CannotContinue);

    let _ = query(&log, &["1", "2"]);
    fill(&log, ["late".to_string()]);

    let (outcome, page) = query(&log, &["forward"]);
    assert_eq!(outcome, QueryOutcome::CannotContinue);
    assert!(page.starts_with("Can't continue iteration."), "{}", page);

    // An empty command line starts over from the end instead.
    let (outcome, page) = query(&log, &[]);
    let QueryOutcome::Page(summary) = outcome else {
        panic!("expected a page, got {:?}", outcome);
    };
    assert!(!summary.continued);
    assert_eq!(summary.printed, 5);
    assert_eq!(messages(&page).last().map(String::as_str), Some("late"));
    println!("✅ stale continuation test passed");
}

#[test]
fn test_uncommitted_entry_is_shown_unfiltered_only() {
    let platform = TestPlatform::new();
    let mut storage = vec![0u8; 4096];
    let log = empty_log(&mut storage, &platform);
    fill(&log, numbered(2));
    let reservation = log.allocate(8, EntryFlags::empty()).unwrap();

    let (_, page) = query(&log, &["1", "10"]);
    let lines = entry_lines(&page);
    assert_eq!(lines.len(), 3);
    assert_eq!(lines[2], "    3. ** uninitialized entry **");

    let (outcome, page) = query(&log, &["1", "10", "#m"]);
    let QueryOutcome::Page(summary) = outcome else {
        panic!("expected a page, got {:?}", outcome);
    };
    assert_eq!(summary.printed, 2);
    assert!(!page.contains("uninitialized"));

    assert!(log.commit(reservation));
    assert_eq!(log.entries_ever(), 3);
    println!("✅ uncommitted entry test passed");
}

#[test]
fn test_query_reports_busy_while_ring_is_locked() {
    let platform = TestPlatform::new();
    let mut storage = vec![0u8; 4096];
    let log = empty_log(&mut storage, &platform);
    fill(&log, numbered(2));

    let (outcome, page) = log.inspect(|_| query(&log, &["1"]));
    assert_eq!(outcome, QueryOutcome::Busy);
    assert!(!page.contains("printed"));

    // Nothing was saved, so there is nothing to continue.
    let (outcome, _) = query(&log, &["forward"]);
    assert_eq!(outcome, QueryOutcome::CannotContinue);
    println!("✅ busy test passed");
}

#[test]
fn test_malformed_commands_print_usage() {
    let platform = TestPlatform::new();
    let mut storage = vec![0u8; 4096];
    let log = empty_log(&mut storage, &platform);
    fill(&log, numbered(3));

    for argv in [&["1", "and", "#x"][..], &["forward", "1"][..], &["1", "filter"][..], &["1", "unknownop"][..]] {
        let (outcome, page) = query(&log, argv);
        assert_eq!(outcome, QueryOutcome::Usage, "{:?}", argv);
        assert!(page.starts_with("usage: traced"), "{:?}: {}", argv, page);
    }
    println!("✅ usage test passed");
}

#[test]
fn test_failed_filter_resets_continuation() {
    let platform = TestPlatform::new();
    let mut storage = vec![0u8; 4096];
    let log = empty_log(&mut storage, &platform);
    fill(&log, numbered(5));

    let _ = query(&log, &["1", "2", "#m"]);
    let (outcome, _) = query(&log, &["1", "or", "#m"]);
    assert_eq!(outcome, QueryOutcome::Usage);

    let (outcome, _) = query(&log, &["forward"]);
    assert_eq!(outcome, QueryOutcome::CannotContinue);
    println!("✅ filter reset test passed");
}

#[test]
fn test_backward_filtered_scan_marks_then_replays() {
    let platform = TestPlatform::new();
    let mut storage = vec![0u8; 4096];
    let log = empty_log(&mut storage, &platform);
    fill(
        &log,
        (1..=10).map(|i| format!("{} {}", if i % 2 == 1 { "odd" } else { "even" }, i)),
    );

    let (outcome, page) = query(&log, &["0", "3", "-1", "#odd"]);
    let QueryOutcome::Page(summary) = outcome else {
        panic!("expected a page, got {:?}", outcome);
    };
    assert_eq!(messages(&page), ["odd 5", "odd 7", "odd 9"]);
    assert_eq!((summary.first_checked, summary.last_checked), (5, 10));
    assert_eq!(
        summary_line(&page),
        "printed 3 entries within range 5 to 10 (6 of 10 total, 10 ever)"
    );

    let (outcome, page) = query(&log, &["backward"]);
    let QueryOutcome::Page(summary) = outcome else {
        panic!("expected a page, got {:?}", outcome);
    };
    assert_eq!(messages(&page), ["odd 1", "odd 3"]);
    assert_eq!((summary.first_checked, summary.last_checked), (1, 4));
    println!("✅ backward filtered scan test passed");
}

#[test]
fn test_forward_filtered_scan_stops_after_count() {
    let platform = TestPlatform::new();
    let mut storage = vec![0u8; 4096];
    let log = empty_log(&mut storage, &platform);
    fill(
        &log,
        (1..=10).map(|i| format!("{} {}", if i % 2 == 1 { "odd" } else { "even" }, i)),
    );

    let (outcome, page) = query(&log, &["2", "2", "-1", "#odd"]);
    let QueryOutcome::Page(summary) = outcome else {
        panic!("expected a page, got {:?}", outcome);
    };
    assert_eq!(messages(&page), ["odd 3", "odd 5"]);
    assert_eq!((summary.first_checked, summary.last_checked), (2, 5));

    let (_, page) = query(&log, &["forward"]);
    assert_eq!(messages(&page), ["odd 7", "odd 9"]);
    println!("✅ forward filtered scan test passed");
}

#[test]
fn test_start_past_the_end_prints_nothing() {
    let platform = TestPlatform::new();
    let mut storage = vec![0u8; 4096];
    let log = empty_log(&mut storage, &platform);
    fill(&log, numbered(4));

    let (outcome, page) = query(&log, &["500"]);
    let QueryOutcome::Page(summary) = outcome else {
        panic!("expected a page, got {:?}", outcome);
    };
    assert_eq!(summary.printed, 0);
    assert_eq!(summary.checked(), 0);
    assert_eq!(page, "printed 0 entries within range 500 to 4 (0 of 4 total, 4 ever)\n");
    println!("✅ out of range test passed");
}

#[test]
fn test_summary_line_counts_window() {
    let platform = TestPlatform::new();
    let mut storage = vec![0u8; 4096];
    let log = empty_log(&mut storage, &platform);
    fill(&log, numbered(8));

    let (_, page) = query(&log, &["3", "4"]);
    assert_eq!(
        summary_line(&page),
        "printed 4 entries within range 3 to 6 (4 of 8 total, 8 ever)"
    );
    assert!(entry_lines(&page)[0].starts_with("    3. "));
    println!("✅ summary line test passed");
}

#[test]
fn test_output_flags_change_prefix() {
    let platform = TestPlatform::new();
    let mut storage = vec![0u8; 4096];
    let log = empty_log(&mut storage, &platform);
    platform.set_thread(7);
    platform.set_team(3);
    fill(&log, ["a".to_string(), "b".to_string()]);

    let (_, page) = query(&log, &["--printteam", "1", "2"]);
    let lines = entry_lines(&page);
    assert!(lines[0].starts_with("    1. [     7:     3] "), "{}", lines[0]);

    // The test clock advances by 10 per record.
    let (_, page) = query(&log, &["--difftime", "1", "2"]);
    let lines = entry_lines(&page);
    assert!(lines[1].ends_with(&format!("{:10}: kern: b", 10)), "{}", lines[1]);
    assert!(!lines[0].ends_with(&format!("{:10}: kern: a", 10)), "{}", lines[0]);
    println!("✅ output flags test passed");
}

#[test]
fn test_rejected_allocations_leave_ring_untouched() {
    let platform = TestPlatform::new();
    let mut storage = vec![0u8; 4096];
    let log = empty_log(&mut storage, &platform);
    fill(&log, numbered(3));

    assert!(log.allocate(0, EntryFlags::empty()).is_none());
    assert!(log.allocate(1 << 20, EntryFlags::empty()).is_none());
    assert_eq!(log.entries(), 3);
    assert_eq!(log.entries_ever(), 3);
    assert_eq!(log.inspect(|ring| ring.verify_links()), Some(2));

    log.set_enabled(false);
    assert!(log.message(format_args!("ignored")).is_none());
    assert_eq!(log.entries(), 3);
    println!("✅ rejected allocation test passed");
}

#[test]
fn test_blobs_are_invisible_to_queries() {
    let platform = TestPlatform::new();
    let mut storage = vec![0u8; 4096];
    let log = empty_log(&mut storage, &platform);
    fill(&log, ["before".to_string()]);
    let blob = log.store_str("side data", 64).unwrap();
    fill(&log, ["after".to_string()]);

    assert_eq!(log.entries(), 2);
    let (_, page) = query(&log, &["1", "5"]);
    assert_eq!(messages(&page), ["before", "after"]);

    let mut copy = [0u8; 16];
    assert_eq!(log.copy_payload(blob, &mut copy), Some(12));
    assert_eq!(&copy[..10], b"side data\0");
    println!("✅ blob test passed");
}
