// build.rs

use std::env;

fn main() {
    let version = env::var("SPINELQ_VERSION")
        .unwrap_or_else(|_| env::var("CARGO_PKG_VERSION").unwrap_or_else(|_| "dev".to_string()));

    println!("cargo:rustc-env=SPINELQ_BUILD_VERSION={version}");
    println!("cargo:rerun-if-env-changed=SPINELQ_VERSION");
}
