use std::process::Command;

/// Run a git subcommand and return its trimmed stdout, if it produced any.
fn git(args: &[&str]) -> Option<String> {
    let output = Command::new("git").args(args).output().ok()?;
    if !output.status.success() {
        return None;
    }
    let text = String::from_utf8(output.stdout).ok()?;
    let text = text.trim();
    (!text.is_empty()).then(|| text.to_string())
}

fn main() {
    let commit = git(&["rev-parse", "--short", "HEAD"]).unwrap_or_else(|| "unknown".into());
    let branch = git(&["branch", "--show-current"]).unwrap_or_else(|| "unknown".into());

    println!("cargo:rustc-env=REQLOADER_GIT_COMMIT={commit}");
    println!("cargo:rustc-env=REQLOADER_GIT_BRANCH={branch}");
    // Release builds are cut from a tagged HEAD
    if let Some(tag) = git(&["describe", "--tags", "--exact-match", "HEAD"]) {
        println!("cargo:rustc-env=REQLOADER_GIT_TAG={tag}");
    }

    println!("cargo:rerun-if-changed=.git/HEAD");
    println!("cargo:rerun-if-changed=.git/refs/");
}
