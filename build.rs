use std::env;
use std::process::Command;

// Short commit hash from git, or GIT_SHA when building outside a checkout
fn commit_hash() -> Option<String> {
    let from_git = Command::new("git")
        .args(["rev-parse", "--short=8", "HEAD"])
        .output()
        .ok()
        .filter(|out| out.status.success())
        .map(|out| String::from_utf8_lossy(&out.stdout).trim().to_owned());

    from_git
        .or_else(|| env::var("GIT_SHA").ok())
        .filter(|sha| !sha.is_empty())
}

fn main() {
    let mut version = env!("CARGO_PKG_VERSION").to_owned();

    // Snapshot builds carry the commit so field logs can be matched to a tree
    let snapshot = env::var("THERMIA_SNAPSHOT").is_ok_and(|v| matches!(v.as_str(), "1" | "true" | "yes"));
    if snapshot {
        version.push_str("-snapshot");
        if let Some(sha) = commit_hash() {
            version.push('+');
            version.push_str(&sha);
        }
    }

    println!("cargo:rustc-env=APP_VERSION={version}");
    for var in ["THERMIA_SNAPSHOT", "GIT_SHA"] {
        println!("cargo:rerun-if-env-changed={var}");
    }
    println!("cargo:rerun-if-changed=.git/HEAD");
}
