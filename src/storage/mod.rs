//! Object-Store Adapter (OSA) abstraction and its S3-compatible
//! implementation (spec.md §4.1).

mod retry;
mod s3;
mod traits;

/// In-memory fake exercised by unit and integration tests; not part of the
/// public production surface but left unguarded so `tests/*.rs` (a separate
/// compilation unit) can reach it too.
pub mod fake;

pub use s3::{MultipartStrategy, S3Backend};
pub use traits::{CompletedPart, MultipartHandle, PartOutcome, PutOutcome, StorageBackend, StoreError};
