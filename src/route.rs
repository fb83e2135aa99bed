//! Size-Aware Router (ROUTE) — a pure decision function with no I/O
//! (spec.md §4.3).

use crate::types::MIN_CHUNK_BYTES;

/// Which upload path a given request should take.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteDecision {
    /// `declared_size <= CDN_SAFE_LIMIT` and a public endpoint is
    /// configured: issue a presigned PUT against the public endpoint.
    PresignedPublic,
    /// `declared_size` fits in a single PUT but either exceeds
    /// CDN_SAFE_LIMIT or no public endpoint is configured: issue a
    /// presigned PUT against the direct/internal endpoint.
    DirectInternal,
    /// `declared_size` exceeds the single-part request policy cap: a
    /// multipart session is required regardless of endpoint reachability.
    Multipart,
}

/// Chooses a route for an upload of `declared_size` bytes.
///
/// `declared_size > max_upload_bytes` is rejected by the caller before this
/// function is ever consulted (spec.md §4.3: ROUTE assumes a pre-validated
/// size). The single-part cap (`single_part_max_bytes`) takes priority over
/// `large_file_threshold_bytes` (CDN_SAFE_LIMIT): a file can be larger than
/// the CDN-safe limit and still go out as one direct presigned PUT, but
/// nothing above the single-part cap can go out as a single PUT at all.
pub fn choose(
    declared_size: u64,
    large_file_threshold_bytes: u64,
    single_part_max_bytes: u64,
    has_public_endpoint: bool,
) -> RouteDecision {
    if declared_size > single_part_max_bytes {
        RouteDecision::Multipart
    } else if declared_size <= large_file_threshold_bytes && has_public_endpoint {
        RouteDecision::PresignedPublic
    } else {
        RouteDecision::DirectInternal
    }
}

/// Minimum multipart chunk size a client may request, applied when a
/// `Multipart` decision is acted on by MSM (spec.md §3: `chunk_size >=
/// MIN_CHUNK_BYTES`).
pub fn clamp_chunk_size(requested: Option<u64>) -> u64 {
    requested.map(|v| v.max(MIN_CHUNK_BYTES)).unwrap_or(MIN_CHUNK_BYTES)
}
