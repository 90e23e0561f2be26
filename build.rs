use std::process::Command;
fn main() {
    // stamps the binary with `git describe --always --dirty`
    let revision = Command::new("git")
        .args(["describe", "--always", "--dirty"])
        .output()
        .ok()
        .filter(|output| output.status.success())
        .and_then(|output| String::from_utf8(output.stdout).ok())
        .map(|hash| hash.trim().to_string())
        .filter(|hash| !hash.is_empty())
        .unwrap_or_else(|| "UNKNOWN".to_string());
    println!("cargo:rustc-env=GIT_HASH={revision}");
}
