//! BidScout Core - Domain Types
//!
//! Pure data structures shared by the proxy server and the client:
//! search parameters and their cache keys, canonical opportunity records,
//! date-range tokens, the clock abstraction and the error taxonomy.
//! No I/O lives here.

pub mod clock;
pub mod dates;
pub mod error;
pub mod notice;
pub mod opportunity;
pub mod params;

use chrono::{DateTime, Utc};

/// Timestamp type using UTC timezone.
pub type Timestamp = DateTime<Utc>;

pub use clock::{system_clock, Clock, SharedClock, SystemClock};
pub use dates::{format_upstream_date, parse_input_date, DateRangeToken};
pub use error::{
    BidScoutError, BidScoutResult, CacheError, ConfigError, UpstreamError, UpstreamErrorKind, ValidationError,
};
pub use notice::{notice_type_description, notice_type_label, summarize_by_notice_type, NoticeTypeCount};
pub use opportunity::{
    transform_search_body, AgencyHierarchy, Importance, Location, Opportunity, OpportunityPage,
    SetAside,
};
pub use params::{sanitize_keyword, CacheKey, SearchParams, DEFAULT_LIMIT, MAX_LIMIT};
