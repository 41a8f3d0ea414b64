const fn version_or_cargo(opt: Option<&'static str>) -> &'static str {
    match opt {
        Some(val) => val,
        None => env!("CARGO_PKG_VERSION"),
    }
}

/// Build version, overridable at compile time with `DISKWATCH_VERSION`.
pub const VERSION: &str = version_or_cargo(option_env!("DISKWATCH_VERSION"));
