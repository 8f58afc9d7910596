//! Tracing setup for hosting processes.

use tracing_subscriber::EnvFilter;

/// Installs the global tracing subscriber.
///
/// Filtering follows `RUST_LOG` when set, defaulting to `info`. With
/// `json_output` the subscriber emits structured JSON lines for log
/// shippers. Installing twice is harmless; the second call is ignored.
pub fn init_tracing(json_output: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let result = if json_output {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .try_init()
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).try_init()
    };

    if result.is_err() {
        tracing::debug!("tracing subscriber already installed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_is_idempotent() {
        init_tracing(false);
        init_tracing(true);
        init_tracing(false);
    }
}
