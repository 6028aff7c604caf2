//! Constants that define the current build environment.

#[rustfmt::skip]
pub mod build;
pub use self::build::{COMPILATION_DATE, COMPILATION_TIME, NAME, PROFILE, VERSION};
