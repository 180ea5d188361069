//! Search issuing core: cancellation plumbing, the polling engine, request
//! fingerprinting, the response cache, and the interceptors that tie them
//! together.

pub mod cache;
pub mod cancel;
pub mod errors;
pub mod hash;
pub mod interceptor;
pub mod notify;
pub mod poll;
pub mod stream;
pub mod types;

pub use cache::ResponseCache;
pub use errors::{SearchError, TimeoutMode};
pub use hash::create_request_hash;
pub use interceptor::{
    BaseSearchInterceptor, SearchConfig, SearchInterceptor, SessionSearchInterceptor,
};
pub use notify::{LogSink, NotificationSink};
pub use poll::{poll_search, CancelOnce, PollConfig};
pub use stream::SearchStream;
pub use types::{
    SearchOptions, SearchRequest, SearchResponse, ASYNC_SEARCH_STRATEGY, SYNC_SEARCH_STRATEGY,
};
