//! Per-request size accounting.
//!
//! [`SizeGuardFilter`] is driven by the hosting pipeline one callback at a time
//! (headers, zero or more data chunks, optional trailers, then teardown). It
//! never sees or rewrites content, only byte counts, and it never blocks.

use std::sync::Arc;

use http::HeaderMap;
use tracing::{debug, warn};

use super::config::{GlobalSizeConfig, SizeLimitSettings};
use super::error::{SizeGuardError, Stage};
use super::route::RouteLookup;

/// `": "` plus the trailing CRLF of each field.
const FIELD_FRAMING_BYTES: u64 = 4;
/// CRLF closing a header block.
const BLOCK_TERMINATOR_BYTES: u64 = 2;

/// Size of a header or trailer block in its HTTP/1.1 wire form.
pub fn header_block_size(headers: &HeaderMap) -> u64 {
    let fields: u64 = headers
        .iter()
        .map(|(name, value)| name.as_str().len() as u64 + value.len() as u64 + FIELD_FRAMING_BYTES)
        .sum();
    fields + BLOCK_TERMINATOR_BYTES
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterState {
    Uninitialized,
    Resolved,
    Accumulating,
    Forwarded,
    Rejected,
    /// Torn down before reaching `Forwarded` or `Rejected`.
    Abandoned,
}

/// What the pipeline should do after a callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterStatus {
    Continue,
    /// The limit was crossed by this callback: answer with the error.
    StopAndRespond(SizeGuardError),
    /// The request was already rejected or torn down.
    Stop,
}

pub struct SizeGuardFilter<L> {
    config: Arc<GlobalSizeConfig>,
    route: L,
    settings: Option<SizeLimitSettings>,
    running_total: u64,
    state: FilterState,
}

impl<L: RouteLookup> SizeGuardFilter<L> {
    pub fn new(config: Arc<GlobalSizeConfig>, route: L) -> Self {
        Self {
            config,
            route,
            settings: None,
            running_total: 0,
            state: FilterState::Uninitialized,
        }
    }

    pub fn on_headers(&mut self, headers: &HeaderMap, end_stream: bool) -> FilterStatus {
        self.observe(Stage::Headers, || header_block_size(headers), end_stream)
    }

    pub fn on_data(&mut self, len: u64, end_stream: bool) -> FilterStatus {
        self.observe(Stage::Body, || len, end_stream)
    }

    /// Trailers end the request, so this is the last point a rejection can happen.
    pub fn on_trailers(&mut self, trailers: &HeaderMap) -> FilterStatus {
        self.observe(Stage::Trailers, || header_block_size(trailers), true)
    }

    /// Teardown notification. Safe to deliver in any state and more than once.
    pub fn on_request_complete(&mut self) {
        match self.state {
            FilterState::Forwarded | FilterState::Rejected | FilterState::Abandoned => {}
            state => {
                debug!(?state, running_total = self.running_total, "Request torn down before completion");
                self.state = FilterState::Abandoned;
            }
        }
    }

    pub fn state(&self) -> FilterState {
        self.state
    }

    pub fn running_total(&self) -> u64 {
        self.running_total
    }

    /// Settings in effect, once the first callback has resolved them.
    pub fn settings(&self) -> Option<SizeLimitSettings> {
        self.settings
    }

    /// True once no more frames should be forwarded.
    pub fn is_stopped(&self) -> bool {
        matches!(self.state, FilterState::Rejected | FilterState::Abandoned)
    }

    fn resolve(&mut self) -> SizeLimitSettings {
        if let Some(settings) = self.settings {
            return settings;
        }

        let size_override = self.route.size_override();
        let settings = match size_override {
            Some(size_override) => size_override.settings(),
            None => self.config.settings(),
        };
        debug!(
            route_override = size_override.is_some(),
            disabled = settings.disabled,
            max_bytes = settings.max_bytes,
            "Resolved size limit"
        );

        self.settings = Some(settings);
        self.state = FilterState::Resolved;
        settings
    }

    fn observe(&mut self, stage: Stage, measure: impl FnOnce() -> u64, end_stream: bool) -> FilterStatus {
        match self.state {
            FilterState::Rejected | FilterState::Abandoned => return FilterStatus::Stop,
            FilterState::Forwarded => return FilterStatus::Continue,
            FilterState::Uninitialized | FilterState::Resolved | FilterState::Accumulating => {}
        }

        let settings = self.resolve();
        if settings.disabled {
            self.state = FilterState::Forwarded;
            return FilterStatus::Continue;
        }

        // Saturates rather than wraps.
        self.running_total = self.running_total.saturating_add(measure());

        if self.running_total > settings.max_bytes {
            self.state = FilterState::Rejected;
            self.config.stats().rq_timeout.increment();
            warn!(
                ?stage,
                max_bytes = settings.max_bytes,
                running_total = self.running_total,
                "Request exceeded size limit"
            );
            return FilterStatus::StopAndRespond(SizeGuardError::limit_exceeded(
                stage,
                settings.max_bytes,
                self.running_total,
            ));
        }

        self.state = if end_stream {
            FilterState::Forwarded
        } else {
            FilterState::Accumulating
        };
        FilterStatus::Continue
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::size_limit::config::RouteSizeOverride;
    use http::HeaderValue;
    use std::cell::Cell;
    use std::rc::Rc;

    fn global(max_bytes: u64) -> Arc<GlobalSizeConfig> {
        Arc::new(GlobalSizeConfig::new(SizeLimitSettings::new(max_bytes), "test.").unwrap())
    }

    /// Header block whose wire size is exactly `size` bytes.
    fn headers_of_size(size: u64) -> HeaderMap {
        let name = "x-pad";
        let value_len = size - BLOCK_TERMINATOR_BYTES - FIELD_FRAMING_BYTES - name.len() as u64;
        let mut headers = HeaderMap::new();
        headers.insert(name, HeaderValue::from_str(&"a".repeat(value_len as usize)).unwrap());
        assert_eq!(header_block_size(&headers), size);
        headers
    }

    fn filter(config: &Arc<GlobalSizeConfig>) -> SizeGuardFilter<Option<RouteSizeOverride>> {
        SizeGuardFilter::new(config.clone(), None)
    }

    #[derive(Default)]
    struct CountingLookup {
        calls: Cell<u32>,
        size_override: Option<RouteSizeOverride>,
    }

    impl RouteLookup for Rc<CountingLookup> {
        fn size_override(&self) -> Option<RouteSizeOverride> {
            self.calls.set(self.calls.get() + 1);
            self.size_override
        }
    }

    #[test]
    fn test_header_block_size() {
        let mut headers = HeaderMap::new();
        assert_eq!(header_block_size(&headers), 2);

        headers.insert("host", HeaderValue::from_static("example.com"));
        // "host: example.com\r\n\r\n"
        assert_eq!(header_block_size(&headers), 21);

        headers.append("accept", HeaderValue::from_static("a"));
        headers.append("accept", HeaderValue::from_static("bb"));
        assert_eq!(header_block_size(&headers), 21 + (6 + 1 + 4) + (6 + 2 + 4));
    }

    #[test]
    fn test_request_within_limit_is_forwarded() {
        let config = global(8192);
        let mut filter = filter(&config);

        assert_eq!(filter.on_headers(&headers_of_size(6000), false), FilterStatus::Continue);
        assert_eq!(filter.on_data(1000, false), FilterStatus::Continue);
        assert_eq!(filter.on_data(500, true), FilterStatus::Continue);
        filter.on_request_complete();

        assert_eq!(filter.running_total(), 7500);
        assert_eq!(filter.state(), FilterState::Forwarded);
        assert_eq!(config.stats().rq_timeout.value(), 0);
    }

    #[test]
    fn test_rejected_after_crossing_data_chunk() {
        let config = global(8192);
        let mut filter = filter(&config);

        assert_eq!(filter.on_headers(&headers_of_size(6000), false), FilterStatus::Continue);
        assert_eq!(
            filter.on_data(3000, false),
            FilterStatus::StopAndRespond(SizeGuardError::BodyTooLarge {
                max_size: 8192,
                actual_size: 9000,
            })
        );
        assert_eq!(filter.state(), FilterState::Rejected);
        assert_eq!(config.stats().rq_timeout.value(), 1);
    }

    #[test]
    fn test_exactly_at_limit_is_allowed() {
        let config = global(100);
        let mut filter = filter(&config);

        assert_eq!(filter.on_headers(&headers_of_size(40), false), FilterStatus::Continue);
        assert_eq!(filter.on_data(60, true), FilterStatus::Continue);
        assert_eq!(filter.state(), FilterState::Forwarded);

        let mut filter = self::filter(&config);
        filter.on_headers(&headers_of_size(40), false);
        assert!(matches!(filter.on_data(61, true), FilterStatus::StopAndRespond(_)));
    }

    #[test]
    fn test_header_breach_rejects_before_body() {
        let config = global(100);
        let mut filter = filter(&config);

        let status = filter.on_headers(&headers_of_size(101), false);
        assert_eq!(
            status,
            FilterStatus::StopAndRespond(SizeGuardError::HeadersTooLarge {
                max_size: 100,
                actual_size: 101,
            })
        );
        assert_eq!(config.stats().rq_timeout.value(), 1);
    }

    #[test]
    fn test_trailer_breach() {
        let config = global(100);
        let mut filter = filter(&config);

        filter.on_headers(&headers_of_size(50), false);
        filter.on_data(40, false);
        let status = filter.on_trailers(&headers_of_size(20));
        assert_eq!(
            status,
            FilterStatus::StopAndRespond(SizeGuardError::TrailersTooLarge {
                max_size: 100,
                actual_size: 110,
            })
        );
    }

    #[test]
    fn test_trailers_within_limit_forward() {
        let config = global(100);
        let mut filter = filter(&config);

        filter.on_headers(&headers_of_size(50), false);
        filter.on_data(20, false);
        assert_eq!(filter.on_trailers(&headers_of_size(30)), FilterStatus::Continue);
        assert_eq!(filter.state(), FilterState::Forwarded);
        assert_eq!(filter.running_total(), 100);
    }

    #[test]
    fn test_no_accounting_after_rejection() {
        let config = global(10);
        let mut filter = filter(&config);

        assert!(matches!(filter.on_headers(&headers_of_size(11), false), FilterStatus::StopAndRespond(_)));
        let total = filter.running_total();

        assert_eq!(filter.on_data(1_000, false), FilterStatus::Stop);
        assert_eq!(filter.on_trailers(&headers_of_size(20)), FilterStatus::Stop);
        assert_eq!(filter.running_total(), total);
        assert_eq!(config.stats().rq_timeout.value(), 1);
    }

    #[test]
    fn test_disabled_skips_measurement() {
        let config = Arc::new(GlobalSizeConfig::new(SizeLimitSettings::disabled(), "").unwrap());
        let mut filter = filter(&config);

        assert_eq!(filter.on_headers(&headers_of_size(10_000), false), FilterStatus::Continue);
        assert_eq!(filter.on_data(u64::MAX, false), FilterStatus::Continue);
        assert_eq!(filter.on_trailers(&headers_of_size(10_000)), FilterStatus::Continue);

        assert_eq!(filter.running_total(), 0);
        assert_eq!(filter.state(), FilterState::Forwarded);
        assert_eq!(config.stats().rq_timeout.value(), 0);
    }

    #[test]
    fn test_route_override_disables_guard() {
        let config = global(10);
        let mut filter = SizeGuardFilter::new(config.clone(), Some(RouteSizeOverride::disabled()));

        assert_eq!(filter.on_headers(&headers_of_size(500), true), FilterStatus::Continue);
        assert_eq!(config.stats().rq_timeout.value(), 0);
    }

    #[test]
    fn test_route_override_replaces_global() {
        let config = global(100);
        let mut filter = SizeGuardFilter::new(config.clone(), Some(RouteSizeOverride::new(1000)));

        assert_eq!(filter.on_headers(&headers_of_size(100), false), FilterStatus::Continue);
        assert_eq!(filter.on_data(400, true), FilterStatus::Continue);
        assert_eq!(filter.settings(), Some(SizeLimitSettings::new(1000)));
        assert_eq!(filter.state(), FilterState::Forwarded);
    }

    #[test]
    fn test_route_looked_up_once() {
        let lookup = Rc::new(CountingLookup {
            size_override: Some(RouteSizeOverride::new(1_000)),
            ..Default::default()
        });
        let mut filter = SizeGuardFilter::new(global(10), lookup.clone());
        assert_eq!(filter.state(), FilterState::Uninitialized);
        assert_eq!(lookup.calls.get(), 0);

        filter.on_headers(&headers_of_size(100), false);
        for _ in 0..10 {
            filter.on_data(10, false);
        }
        filter.on_trailers(&HeaderMap::new());

        assert_eq!(lookup.calls.get(), 1);
        assert_eq!(filter.state(), FilterState::Forwarded);
    }

    #[test]
    fn test_chunking_does_not_change_outcome() {
        let config = global(1_000);
        let headers = headers_of_size(200);

        for body_len in [0u64, 799, 800, 801, 1_500] {
            let mut whole = filter(&config);
            whole.on_headers(&headers, false);
            let whole_rejected = matches!(whole.on_data(body_len, true), FilterStatus::StopAndRespond(_));
            assert_eq!(whole_rejected, body_len > 800);

            for chunk in [1u64, 7, 64, 333] {
                let mut split = filter(&config);
                split.on_headers(&headers, false);

                let mut remaining = body_len;
                let mut rejections = 0;
                while remaining > 0 {
                    let len = chunk.min(remaining);
                    remaining -= len;
                    if let FilterStatus::StopAndRespond(_) = split.on_data(len, remaining == 0) {
                        rejections += 1;
                    }
                }
                if body_len == 0 {
                    split.on_data(0, true);
                }

                assert_eq!(rejections, u32::from(whole_rejected), "body {body_len}, chunk {chunk}");
                assert_eq!(split.state(), whole.state(), "body {body_len}, chunk {chunk}");
            }
        }
    }

    #[test]
    fn test_teardown_is_idempotent() {
        let config = global(10);

        let mut filter = self::filter(&config);
        filter.on_headers(&headers_of_size(20), false);
        filter.on_request_complete();
        filter.on_request_complete();
        assert_eq!(filter.state(), FilterState::Rejected);
        assert_eq!(config.stats().rq_timeout.value(), 1);
    }

    #[test]
    fn test_teardown_before_resolution() {
        let config = global(10);
        let lookup = Rc::new(CountingLookup::default());
        let mut filter = SizeGuardFilter::new(config.clone(), lookup.clone());

        filter.on_request_complete();
        assert_eq!(filter.state(), FilterState::Abandoned);
        assert_eq!(filter.on_headers(&headers_of_size(20), false), FilterStatus::Stop);

        assert_eq!(lookup.calls.get(), 0);
        assert_eq!(filter.settings(), None);
        assert_eq!(config.stats().rq_timeout.value(), 0);
    }

    #[test]
    fn test_teardown_mid_body_counts_nothing() {
        let config = global(100);
        let mut filter = filter(&config);

        filter.on_headers(&headers_of_size(50), false);
        filter.on_data(10, false);
        filter.on_request_complete();

        assert_eq!(filter.state(), FilterState::Abandoned);
        assert_eq!(filter.on_data(1_000, true), FilterStatus::Stop);
        assert_eq!(config.stats().rq_timeout.value(), 0);
    }

    #[test]
    fn test_concurrent_requests_share_counter() {
        let config = global(10);

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let config = config.clone();
                std::thread::spawn(move || {
                    let mut filter = SizeGuardFilter::new(config, None::<RouteSizeOverride>);
                    filter.on_headers(&HeaderMap::new(), false);
                    filter.on_data(100, true);
                    filter.on_request_complete();
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(config.stats().rq_timeout.value(), 16);
    }
}
