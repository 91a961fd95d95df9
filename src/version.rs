//! Build identity
//!
//! Trace databases outlive the binaries that wrote them, so the
//! `status` command stamps its output with enough build metadata to
//! tell which turtles produced a report. Values come from `build.rs`
//! and degrade to "unknown" outside a git checkout.

/// One-line build identity:
/// `turtles <version>+<commit> (<date>, rustc <toolchain>)`.
pub fn version() -> String {
    format!(
        "turtles {}+{} ({}, rustc {})",
        env!("CARGO_PKG_VERSION"),
        build_commit(),
        build_date(),
        rustc_version(),
    )
}

/// Short commit SHA of the checkout this binary was built from.
pub fn build_commit() -> &'static str {
    option_env!("TURTLES_COMMIT_SHA").unwrap_or("unknown")
}

/// UTC date of the build.
pub fn build_date() -> &'static str {
    option_env!("TURTLES_BUILD_DATE").unwrap_or("unknown")
}

/// Toolchain version the binary was compiled with.
pub fn rustc_version() -> &'static str {
    option_env!("TURTLES_RUSTC_VERSION").unwrap_or("unknown")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_line_carries_package_version() {
        let line = version();
        assert!(line.starts_with("turtles "));
        assert!(line.contains(env!("CARGO_PKG_VERSION")));
    }
}
