//! Log output for `otp-builds` runs.
//!
//! Human-readable lines by default. `--json` switches to one JSON object per
//! line that carries the `version` span, so a CI log can be split per tag.

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Crates whose events follow the requested level. Everything else,
/// including the HTTP stack, is held at `warn`.
const OWN_TARGETS: &[&str] = &["otp_builds", "otp_builds_core", "otp_builds_registry"];

/// Filter directives used when `RUST_LOG` is unset.
fn default_directives(level: Level) -> String {
    let level = level.as_str().to_ascii_lowercase();
    let mut directives = String::from("warn");
    for target in OWN_TARGETS {
        directives.push_str(&format!(",{target}={level}"));
    }
    directives
}

/// Install the global subscriber, writing to stderr. `RUST_LOG` wins over
/// `level`. A second call leaves the first subscriber in place.
pub fn init_tracing(json: bool, level: Level) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(level)));

    let registry = tracing_subscriber::registry().with(env_filter);
    if json {
        registry
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_writer(std::io::stderr)
                    .json()
                    .with_current_span(true),
            )
            .try_init()
            .ok();
    } else {
        registry
            .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
            .try_init()
            .ok();
    }
}
