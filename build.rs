use std::process::Command;

/// Run a command and keep its trimmed stdout, or nothing if the tool
/// is absent or failed. Build metadata is best-effort: a tarball build
/// without git still compiles.
fn capture(program: &str, args: &[&str]) -> Option<String> {
    let output = Command::new(program).args(args).output().ok()?;
    if !output.status.success() {
        return None;
    }
    let text = String::from_utf8(output.stdout).ok()?;
    let text = text.trim();
    if text.is_empty() {
        None
    } else {
        Some(text.to_string())
    }
}

fn emit(key: &str, value: Option<String>) {
    println!(
        "cargo:rustc-env={}={}",
        key,
        value.unwrap_or_else(|| "unknown".to_string())
    );
}

fn main() {
    // Surfaced by `turtles --version` and the status command.
    emit(
        "TURTLES_COMMIT_SHA",
        capture("git", &["rev-parse", "--short", "HEAD"]),
    );
    emit("TURTLES_BUILD_DATE", capture("date", &["-u", "+%Y-%m-%d"]));
    // "rustc 1.92.0 (hash date)" -> "1.92.0"
    emit(
        "TURTLES_RUSTC_VERSION",
        capture("rustc", &["--version"])
            .and_then(|line| line.split_whitespace().nth(1).map(str::to_string)),
    );

    println!("cargo:rerun-if-changed=.git/HEAD");
}
