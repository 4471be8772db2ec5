/// Set by the build system through the `CODE_VERSION` environment variable at compile
/// time; falls back to the crate version.
pub const CODE_VERSION: &str = match option_env!("CODE_VERSION") {
    Some(version) => version,
    None => env!("CARGO_PKG_VERSION"),
};

/// Build number and generator, from `CODE_BUILD` at compile time.
pub const CODE_BUILD: &str = match option_env!("CODE_BUILD") {
    Some(build) => build,
    None => "unknown",
};
