mod fetcher;
mod parser;

pub use fetcher::{fetch_feed, FetchError, DEFAULT_FETCH_TIMEOUT};
pub use parser::{parse_feed, NormalizedPost, ParseError, ParseOutcome};
