pub mod compare;
pub mod run;

use std::time::Duration;

use clap::Args;
use fanout_dispatch::{CancellationToken, DispatcherConfig, PausePolicy, RateLimit};
use tokio::task::JoinHandle;
use tracing::warn;

/// Dispatcher settings shared by `run` and `compare`
#[derive(Debug, Clone, Args)]
pub struct DispatchArgs {
    /// Maximum number of units in flight
    #[arg(long, short = 'c', env = "FANOUT_MAX_CONCURRENCY", default_value = "4")]
    pub concurrency: usize,

    /// Per-unit timeout in milliseconds
    #[arg(long, env = "FANOUT_UNIT_TIMEOUT_MS")]
    pub timeout_ms: Option<u64>,

    /// Run in chunks of `concurrency` units with this pause between chunks
    #[arg(long, env = "FANOUT_BATCH_DELAY_MS")]
    pub batch_delay_ms: Option<u64>,

    /// Skip the pause after a chunk that had a failure
    #[arg(long, requires = "batch_delay_ms")]
    pub skip_pause_after_failure: bool,

    /// On Ctrl-C, drop in-flight units instead of letting them finish
    #[arg(long)]
    pub abort_in_flight: bool,
}

impl DispatchArgs {
    pub fn config(&self) -> DispatcherConfig {
        let mut config = DispatcherConfig::new(self.concurrency)
            .with_abort_in_flight_on_cancel(self.abort_in_flight);
        if let Some(ms) = self.timeout_ms {
            config = config.with_unit_timeout(Duration::from_millis(ms));
        }
        if let Some(ms) = self.batch_delay_ms {
            let pause = if self.skip_pause_after_failure {
                PausePolicy::SkipAfterFailure
            } else {
                PausePolicy::Always
            };
            config = config
                .with_rate_limit(RateLimit::new(Duration::from_millis(ms)).with_pause_policy(pause));
        }
        config
    }
}

/// Cancel `token` on the first Ctrl-C; abort the returned handle once done
pub fn cancel_on_ctrl_c(token: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling batch");
            token.cancel();
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args() -> DispatchArgs {
        DispatchArgs {
            concurrency: 3,
            timeout_ms: None,
            batch_delay_ms: None,
            skip_pause_after_failure: false,
            abort_in_flight: false,
        }
    }

    #[test]
    fn test_plain_config() {
        let config = args().config();
        assert_eq!(config, DispatcherConfig::new(3));
    }

    #[test]
    fn test_rate_limited_config() {
        let mut args = args();
        args.timeout_ms = Some(250);
        args.batch_delay_ms = Some(1000);
        args.skip_pause_after_failure = true;

        let config = args.config();
        assert_eq!(config.unit_timeout, Some(Duration::from_millis(250)));
        assert_eq!(
            config.rate_limit,
            Some(
                RateLimit::new(Duration::from_secs(1))
                    .with_pause_policy(PausePolicy::SkipAfterFailure)
            )
        );
    }
}
