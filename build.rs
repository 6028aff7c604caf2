//! Build script (https://doc.rust-lang.org/cargo/reference/build-scripts.html)
//! Executed as the first step in the compilation process. Stamps a handful
//! of compile-time constants into `src/gen/build.rs`, which the `info`
//! module re-exports.

use chrono::Utc;
use std::{
    env,
    fs::OpenOptions,
    io::Write,
    path::Path,
};

const BUILD_OUT_FILE: &str = "build.rs";
const GEN_DIR: &str = "./src/gen";

fn main() {
    if std::env::var("DOCS_RS").is_ok() {
        return;
    }

    let dest_path = Path::new(GEN_DIR).join(Path::new(BUILD_OUT_FILE));
    let mut file = OpenOptions::new()
        .truncate(true)
        .write(true)
        .create(true)
        .open(dest_path)
        .unwrap_or_else(|_| panic!("Can't open '{}'", BUILD_OUT_FILE));

    writeln!(file, "//! Compile-time build information.\n").unwrap();
    writeln!(file, "// @generated\n").unwrap();

    let now_utc = Utc::now();
    write_str_constant(
        &mut file,
        "COMPILATION_DATE",
        &format!("{}", now_utc.format("%b %d %Y")),
    );
    write_str_constant(
        &mut file,
        "COMPILATION_TIME",
        &format!("{}", now_utc.format("%H:%M:%S")),
    );
    write_str_constant(
        &mut file,
        "NAME",
        option_env!("CARGO_PKG_NAME").unwrap_or("UNKNOWN"),
    );
    write_str_constant(
        &mut file,
        "VERSION",
        option_env!("CARGO_PKG_VERSION").unwrap_or("UNKNOWN"),
    );
    write_str_constant(
        &mut file,
        "PROFILE",
        &env::var("PROFILE").unwrap_or_else(|_| String::from("UNKNOWN")),
    );
}

fn write_str_constant(file: &mut std::fs::File, key: &str, val: &str) {
    writeln!(file, "pub const {}: &str = \"{}\";", key, val)
        .unwrap_or_else(|_| panic!("Failed to write '{}' to 'build.rs'", key));
}
