// SPDX-License-Identifier: MIT OR Apache-2.0
//! Logging setup for hosts embedding the editor.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Build the filter: `RUST_LOG` if set, otherwise `directives`
pub fn env_filter(directives: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directives))
}

/// Install a global subscriber with an env filter and a fmt layer.
/// Returns false if a subscriber was already installed.
pub fn init_tracing(directives: &str) -> bool {
    let installed = tracing_subscriber::registry()
        .with(env_filter(directives))
        .with(tracing_subscriber::fmt::layer())
        .try_init()
        .is_ok();
    if installed {
        tracing::info!("AVFX editor core v{}", env!("CARGO_PKG_VERSION"));
    }
    installed
}
