use std::process::Command;

/// Run git with `args`, returning trimmed stdout on success
fn git(args: &[&str]) -> Option<String> {
    let output = Command::new("git").args(args).output().ok()?;
    if !output.status.success() {
        return None;
    }
    String::from_utf8(output.stdout)
        .ok()
        .map(|s| s.trim().to_string())
}

fn main() {
    println!("cargo:rerun-if-changed=build.rs");

    let version = env!("CARGO_PKG_VERSION");
    let is_release = std::env::var("PROFILE").is_ok_and(|profile| profile == "release");

    // Dev builds carry the commit instead of the crate version
    let version_string = if is_release {
        version.to_string()
    } else {
        let hash = git(&["rev-parse", "--short", "HEAD"]).unwrap_or_else(|| "unknown".to_string());
        let dirty = Command::new("git")
            .args(["diff-index", "--quiet", "HEAD"])
            .status()
            .is_ok_and(|status| !status.success());

        if dirty {
            format!("{}+{}-dirty", version, hash)
        } else {
            format!("{}+{}", version, hash)
        }
    };

    println!("cargo:rustc-env=VERSION_STRING={}", version_string);
}
