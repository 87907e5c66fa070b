//! ---
//! twin_section: "01-core-functionality"
//! twin_subsection: "module"
//! twin_type: "source"
//! twin_scope: "code"
//! twin_description: "Build and version metadata."
//! twin_version: "v0.1.0"
//! twin_owner: "tbd"
//! ---
use serde::Serialize;

/// Version metadata captured at build time.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct VersionInfo {
    pub semver: String,
    pub build_timestamp: String,
    pub target_triple: String,
    pub profile: String,
}

impl VersionInfo {
    pub fn current() -> Self {
        let debug = option_env!("VERGEN_CARGO_DEBUG").unwrap_or("false");
        Self {
            semver: env!("CARGO_PKG_VERSION").to_owned(),
            build_timestamp: option_env!("VERGEN_BUILD_TIMESTAMP")
                .unwrap_or("unknown")
                .to_owned(),
            target_triple: option_env!("VERGEN_CARGO_TARGET_TRIPLE")
                .unwrap_or("unknown")
                .to_owned(),
            profile: if debug == "true" { "debug" } else { "release" }.to_owned(),
        }
    }

    /// Short form used in log lines.
    pub fn cli_string(&self) -> String {
        format!("{} ({})", self.semver, self.profile)
    }

    /// Multi-line form printed by `--version`.
    pub fn extended(&self) -> String {
        format!(
            "twin-run {}\nbuilt:   {}\ntarget:  {}\nprofile: {}",
            self.semver, self.build_timestamp, self.target_triple, self.profile
        )
    }
}
