// Decode engine: path access, header matching, flags, codecs, and the tuple driver.
pub mod chunked;
pub mod codec;
pub mod error;
pub mod flags;
pub mod header;
pub mod path;
pub mod tuple;
