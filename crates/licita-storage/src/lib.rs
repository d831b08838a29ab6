//! Feed transport with bounded retries and durable watermark state.

pub mod http;
pub mod watermark;

pub use http::{
    is_transient_error, is_transient_status, BackoffPolicy, FetchError, HttpClientConfig,
    HttpFetcher, PageSource,
};
pub use watermark::{WatermarkError, WatermarkStore, WATERMARK_KEY};

pub const CRATE_NAME: &str = "licita-storage";
