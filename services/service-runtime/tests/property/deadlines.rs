//! Deadline Property Tests
//!
//! Validates `grpc-timeout` parsing and the choice between the header and
//! the default timeout.

use http::{HeaderMap, HeaderValue};
use proptest::prelude::*;
use service_runtime::CallContext;
use service_runtime::middleware::context::{GRPC_TIMEOUT_HEADER, parse_grpc_timeout};
use std::time::Duration;

fn arb_unit() -> impl Strategy<Value = (char, fn(u64) -> Duration)> {
    prop_oneof![
        Just(('H', (|n: u64| Duration::from_secs(n * 3600)) as fn(u64) -> Duration)),
        Just(('M', (|n: u64| Duration::from_secs(n * 60)) as fn(u64) -> Duration)),
        Just(('S', Duration::from_secs as fn(u64) -> Duration)),
        Just(('m', Duration::from_millis as fn(u64) -> Duration)),
        Just(('u', Duration::from_micros as fn(u64) -> Duration)),
        Just(('n', Duration::from_nanos as fn(u64) -> Duration)),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    /// Property: every well-formed header parses to its duration
    #[test]
    fn prop_well_formed_timeouts_parse(value in 0u64..100_000_000, (unit, to_duration) in arb_unit()) {
        let header = format!("{value}{unit}");
        prop_assert_eq!(parse_grpc_timeout(&header), Some(to_duration(value)));
    }

    /// Property: parsing never panics on arbitrary input
    #[test]
    fn prop_parse_never_panics(value in "\\PC{0,16}") {
        let _ = parse_grpc_timeout(&value);
    }

    /// Property: the deadline is the shorter of the header and the default
    #[test]
    fn prop_shorter_timeout_wins(header_ms in 1u64..60_000, default_ms in 1u64..60_000) {
        let mut headers = HeaderMap::new();
        headers.insert(
            GRPC_TIMEOUT_HEADER,
            HeaderValue::from_str(&format!("{header_ms}m")).unwrap(),
        );
        let ctx = CallContext::new(
            "/svc/Method",
            headers,
            Some(Duration::from_millis(default_ms)),
        );

        let remaining = ctx.remaining().unwrap();
        let expected = Duration::from_millis(header_ms.min(default_ms));
        prop_assert!(remaining <= expected);
        prop_assert!(expected - remaining < Duration::from_secs(1));
    }
}
