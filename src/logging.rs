use tracing::warn;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, reload, EnvFilter, Registry};

/// Changes the log level of the installed subscriber.
pub struct LogHandle {
    reload: Option<reload::Handle<EnvFilter, Registry>>,
    from_env: bool,
}

impl LogHandle {
    /// Applies the verbosity from the loaded config. `RUST_LOG` still wins.
    pub fn set_verbose(&self, verbose: bool) {
        if self.from_env {
            return;
        }
        if let Some(handle) = &self.reload {
            if let Err(e) = handle.reload(level_filter(verbose)) {
                warn!(error = %e, "Failed to change log level");
            }
        }
    }
}

fn level_filter(verbose: bool) -> EnvFilter {
    EnvFilter::new(if verbose { "laendlehunter=debug,info" } else { "info" })
}

/// Installs the global subscriber. Call it before loading the config so that
/// config messages are logged too.
pub fn init(verbose: bool) -> LogHandle {
    let env = EnvFilter::try_from_default_env().ok();
    let from_env = env.is_some();
    let (filter, handle) = reload::Layer::new(env.unwrap_or_else(|| level_filter(verbose)));

    // A second init (tests, repeated calls) keeps the first subscriber.
    let installed = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false))
        .try_init()
        .is_ok();
    LogHandle {
        reload: installed.then_some(handle),
        from_env,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing::Level;

    #[test]
    fn verbose_enables_crate_debug_output() {
        assert!(!level_filter(false).to_string().contains("debug"));
        assert!(level_filter(true).to_string().contains("laendlehunter=debug"));
    }

    #[test]
    fn config_verbosity_applies_after_init() {
        let log = init(false);
        if log.reload.is_none() || log.from_env {
            return;
        }
        assert!(!tracing::enabled!(Level::DEBUG));
        log.set_verbose(true);
        assert!(tracing::enabled!(Level::DEBUG));
        log.set_verbose(false);
        assert!(!tracing::enabled!(Level::DEBUG));
    }
}
