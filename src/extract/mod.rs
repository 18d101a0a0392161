mod extractor;

pub use extractor::*;
