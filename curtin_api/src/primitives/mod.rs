pub mod bytes;

pub use bytes::ByteCount;
