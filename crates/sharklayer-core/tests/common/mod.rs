use std::fs;
use std::path::{Path, PathBuf};

pub fn fixture_path(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("..")
        .join("..")
        .join("tests")
        .join("fixtures")
        .join(name)
}

#[allow(dead_code)]
pub fn fixture(name: &str) -> Vec<u8> {
    fs::read(fixture_path(name)).expect("read fixture")
}
