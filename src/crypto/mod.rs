pub mod digest;

pub use digest::{Hash256, digest, digest_hex};
