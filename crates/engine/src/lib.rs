//! The contextloom engine — retrieval and context assembly.
//!
//! A build request flows through four stages:
//!
//! 1. **Collect** — embed the query once (through the cache), then fan out
//!    to the memory store and the vector index concurrently
//! 2. **Fuse** — normalize, merge, floor, and deduplicate evidence from
//!    both sources into one ranked candidate list
//! 3. **Allocate** — spend the token budget in priority order: system
//!    instructions, recent conversation turns, then evidence; optionally
//!    compress what would otherwise be dropped
//! 4. **Assemble** — render the surviving segments in fixed section order
//!
//! The [`ContextEngine`] facade owns the wired components and exposes the
//! build, memory, and knowledge operations. It is explicitly constructed
//! and passed by reference — there are no global registries.

pub mod context;
pub mod engine;

pub use context::{
    ContextBuilder, FusedEvidence, HeuristicEstimator, TokenEstimator, fuse,
};
pub use engine::{ContextEngine, ParagraphSplitter};
