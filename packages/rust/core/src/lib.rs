//! Core pipeline orchestration for RepoSearch.
//!
//! This crate ties together cloning, walking, and indexing into the
//! end-to-end `index_repositories` workflow.

pub mod pipeline;

pub use pipeline::{
    IndexRunConfig, IndexRunResult, ProgressReporter, RepoOutcome, RepoStatus, SilentProgress,
    index_repositories,
};
