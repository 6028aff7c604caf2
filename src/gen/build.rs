//! Compile-time build information.
//
// Placeholder checked in so the crate builds before `build.rs` has ever
// run (e.g. fresh checkout under `cargo doc` without a build pass); the
// build script overwrites this file on every compilation.

pub const COMPILATION_DATE: &str = "unknown";
pub const COMPILATION_TIME: &str = "unknown";
pub const NAME: &str = "dmg-core";
pub const VERSION: &str = "0.1.0";
pub const PROFILE: &str = "unknown";
