//! Puts `memory.x` on the linker search path for the firmware binary.
//!
//! The linker scripts themselves are selected in `.cargo/config.toml` for the
//! Cortex-M target only, so host test builds are unaffected.

use std::env;
use std::fs;
use std::path::PathBuf;

fn main() {
    let out = PathBuf::from(env::var_os("OUT_DIR").expect("cargo sets OUT_DIR"));
    fs::write(out.join("memory.x"), include_bytes!("memory.x")).expect("memory.x is writable");
    println!("cargo:rustc-link-search={}", out.display());
    println!("cargo:rerun-if-changed=memory.x");
}
