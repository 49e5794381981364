use assert_cmd::{Command, cargo::cargo_bin_cmd};
use std::fs;
use std::path::Path;

pub fn treesame_cmd(left: &Path, right: &Path) -> Command {
    let mut cmd = cargo_bin_cmd!("treesame");
    cmd.arg(left).arg(right);
    cmd
}

// Each integration test file is compiled as its own crate. Some crates only
// use a subset of these helpers.
#[allow(dead_code)]
pub fn write_tree(root: &Path, files: &[(&str, &str)]) {
    for (relative, content) in files {
        let path = root.join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, content).unwrap();
    }
}

#[allow(dead_code)]
pub fn extract_fingerprint(stdout: &[u8]) -> String {
    let output = std::str::from_utf8(stdout).expect("stdout should be UTF-8");
    output
        .lines()
        .find_map(|line| line.strip_prefix("Fingerprint: "))
        .expect("fingerprint not found in output")
        .to_string()
}
