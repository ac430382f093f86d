mod text;

pub use text::{collapse_whitespace, strip_tags, truncate_chars};
