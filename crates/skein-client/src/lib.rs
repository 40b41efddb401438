pub mod fetcher;
pub mod links;
pub mod page;

pub use fetcher::ReqwestFetcher;
pub use links::{discover_links, page_title};
pub use page::{DEFAULT_SKIP_TAGS, DEPTH_KEY, PageParser, content_hash};
