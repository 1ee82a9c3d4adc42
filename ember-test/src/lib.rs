//! Shared test infrastructure.
//!
//! Every test calls [`init`] first, so panics and errors are reported
//! through `tracing` and `color-eyre` with full span context.

pub mod vectors;

use std::sync::Once;

use tracing_error::ErrorLayer;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

static INIT: Once = Once::new();

/// Initialize a tracing subscriber and error report hooks for a test.
///
/// Idempotent: only the first call in a process installs anything.
/// The filter defaults to `info` and can be overridden with `RUST_LOG`.
pub fn init() {
    INIT.call_once(|| {
        let fmt_layer = fmt::layer().with_target(false).with_test_writer();
        let filter_layer = EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new("info"))
            .expect("the fallback filter directive parses");

        tracing_subscriber::registry()
            .with(filter_layer)
            .with(fmt_layer)
            .with(ErrorLayer::default())
            .init();

        color_eyre::install().expect("color-eyre installs once");
    })
}

#[cfg(test)]
mod tests {
    #[test]
    fn init_is_idempotent() {
        super::init();
        super::init();
    }
}
