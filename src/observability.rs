// src/observability.rs
//! Tracing and logging bootstrap
//!
//! Initializes the global `tracing` subscriber from `RUST_LOG` (falling back
//! to `LOG_LEVEL`, then `info`) and installs a panic hook that routes panics
//! through the subscriber so they carry timestamps in stderr.

use once_cell::sync::OnceCell;

use tracing_subscriber::EnvFilter;

static INIT: OnceCell<()> = OnceCell::new();

/// Initialize the global tracing subscriber. Safe to call more than once.
pub fn init_tracing() {
    INIT.get_or_init(|| {
        let filter = std::env::var("RUST_LOG")
            .or_else(|_| std::env::var("LOG_LEVEL"))
            .unwrap_or_else(|_| "info".to_string());

        let json_output = std::env::var("LOG_FORMAT")
            .map(|v| v.eq_ignore_ascii_case("json"))
            .unwrap_or(false);

        let builder = tracing_subscriber::fmt().with_env_filter(EnvFilter::new(filter));

        let installed = if json_output {
            builder.json().try_init()
        } else {
            builder.try_init()
        };

        if installed.is_ok() {
            install_panic_hook();
        }
    });
}

fn install_panic_hook() {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        tracing::error!("panic: {info}");
        default_hook(info);
    }));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_is_idempotent() {
        init_tracing();
        init_tracing();
    }
}
