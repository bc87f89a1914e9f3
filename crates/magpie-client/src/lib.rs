pub mod source;

pub use source::HttpContentSource;
