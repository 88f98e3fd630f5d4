// SPDX-License-Identifier: MPL-2.0

use std::process::Command;

fn main() {
    println!("cargo::rerun-if-changed=.git/HEAD");
    println!("cargo::rerun-if-changed=.git/refs/tags");
    println!("cargo::rerun-if-env-changed=CAMREC_VERSION");

    // Packagers may pin the version string (e.g. distro builds without .git)
    let version = std::env::var("CAMREC_VERSION").unwrap_or_else(|_| describe_version());

    println!("cargo::rustc-env=GIT_VERSION={}", version);
}

/// Produce "<crate version>-<short hash>" or "<tag>-dirty-<hash>" when HEAD is past a tag
fn describe_version() -> String {
    let pkg_version = std::env::var("CARGO_PKG_VERSION").unwrap_or_else(|_| "0.0.0".to_string());
    let hash = git(&["rev-parse", "--short", "HEAD"]);

    match git(&["describe", "--tags", "--match", "v*"]) {
        Some(describe) => {
            let describe = describe.strip_prefix('v').unwrap_or(&describe).to_string();
            let parts: Vec<&str> = describe.rsplitn(3, '-').collect();
            if parts.len() == 3 {
                let commit = parts[0].strip_prefix('g').unwrap_or(parts[0]);
                format!("{}-dirty-{}", parts[2], commit)
            } else {
                format!("{}-{}", describe, hash.unwrap_or_else(|| "unknown".to_string()))
            }
        }
        None => match hash {
            Some(hash) => format!("{}-{}", pkg_version, hash),
            None => pkg_version,
        },
    }
}

fn git(args: &[&str]) -> Option<String> {
    let output = Command::new("git").args(args).output().ok()?;
    if !output.status.success() {
        return None;
    }
    let text = String::from_utf8_lossy(&output.stdout).trim().to_string();
    (!text.is_empty()).then_some(text)
}
