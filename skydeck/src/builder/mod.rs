//! Build executor
//!
//! Runs once per deployment inside the build container: fetch sources, build,
//! rewrite asset URLs in the entry page, upload the output and report every
//! step on the deployment's log topic.

pub mod command;
pub mod executor;
pub mod git;
pub mod progress;
pub mod rewrite;
pub mod upload;
