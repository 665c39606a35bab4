//! The global trace log: startup, `ktrace!`, the log bridge and `traced`.
//!
//! Everything shares one process-wide log, so the steps run in a single
//! test in a fixed order.


use ktrace::ktrace;
use ktrace::tracing::{self, QueryOutcome, TraceConfig};
use shared_log::{messages, TestPlatform};

static PLATFORM: TestPlatform = TestPlatform::new();

fn leaked_storage(bytes: usize) -> &'static mut [u8] {
    Box::leak(vec![0u8; bytes].into_boxed_slice())
}

fn traced(argv: &[&str]) -> (QueryOutcome, String) {
    let mut out = String::new();
    let outcome = tracing::traced(argv, &mut out).expect("trace log is running");
    (outcome, out)
}

#[test]
fn test_global_log_lifecycle() {
    // Nothing is recorded before startup.
    assert!(tracing::log_handle().is_none());
    assert!(ktrace!("too early").is_none());
    assert!(tracing::traced(&["1"], &mut String::new()).is_none());

    let log = tracing::startup(leaked_storage(1 << 16), &PLATFORM, TraceConfig::default())
        .expect("first startup succeeds");
    assert_eq!(log.entries(), 1, "start record");

    // A second startup hands back the same log and ignores its storage.
    let again = tracing::startup(leaked_storage(64), &PLATFORM, TraceConfig::default())
        .expect("second startup succeeds");
    assert!(std::ptr::eq(log, again));
    assert!(std::ptr::eq(log, tracing::log_handle().unwrap()));

    PLATFORM.set_thread(42);
    assert!(ktrace!("boot cpu {} online", 0).is_some());
    PLATFORM.set_thread(-1);

    tracing::install_logger(log::LevelFilter::Info).expect("no other logger installed");
    log::info!(target: "vm", "mapped {} pages", 16);
    log::debug!(target: "vm", "filtered out");

    let (outcome, page) = traced(&["1", "10"]);
    let QueryOutcome::Page(summary) = outcome else {
        panic!("expected a page, got {:?}", outcome);
    };
    assert_eq!(summary.printed, 3);
    assert!(page.contains("ktrace start"), "{}", page);
    assert_eq!(
        messages(&page),
        ["boot cpu 0 online", "[ INFO] vm: mapped 16 pages"]
    );

    let (_, page) = traced(&["thread", "42"]);
    assert_eq!(messages(&page), ["boot cpu 0 online"]);

    // Installing a second logger is refused by the facade.
    assert!(tracing::install_logger(log::LevelFilter::Trace).is_err());
    println!("✅ global log lifecycle test passed");
}
