/// Application-level constants
pub const APP_NAME: &str = "signage-takeoff";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Environment variable prefix for runtime overrides (see `EngineConfig::apply_env`).
pub const ENV_PREFIX: &str = "SIGNAGE_";

/// Default tracing filter when `RUST_LOG` is unset.
/// Engine internals at info, HTTP plumbing quieter.
pub fn default_log_filter() -> &'static str {
    "signage_takeoff_lib=info,signage_takeoff=info,reqwest=warn"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn app_name_is_stable() {
        assert_eq!(APP_NAME, "signage-takeoff");
    }

    #[test]
    fn app_version_matches_cargo() {
        assert_eq!(APP_VERSION, env!("CARGO_PKG_VERSION"));
    }

    #[test]
    fn log_filter_targets_library() {
        assert!(default_log_filter().contains("signage_takeoff_lib"));
    }
}
