//! Streaming request size guard for axum.
//!
//! Enforces an upper bound on the cumulative size of an inbound request
//! (header block, body chunks and trailers) as the pipeline delivers it, and
//! rejects the request as soon as the bound is crossed without buffering it.
//! See [`size_limit::SizeGuardLayer`].

pub mod size_limit;
