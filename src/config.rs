use std::time::Duration;
use anyhow::bail;

#[derive(Debug, Clone)]
pub struct Dnscat2Config {
    /// Log the raw content of MSG payloads at TRACE level. This is useful for debugging, but the
    ///  payload is application data (e.g. a remote shell's content), so it is off by default.
    pub trace_payloads: bool,

    /// Sessions without any traffic for this long are destroyed by the registry's idle sweeper.
    ///
    /// `None` means sessions live until they are closed by a FIN, however long they are idle.
    pub idle_timeout: Option<Duration>,
    pub idle_sweep_interval: Duration,
}

impl Default for Dnscat2Config {
    fn default() -> Self {
        Dnscat2Config {
            trace_payloads: false,
            idle_timeout: None,
            idle_sweep_interval: Duration::from_secs(10),
        }
    }
}

impl Dnscat2Config {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.idle_sweep_interval.is_zero() {
            bail!("idle sweep interval must not be zero");
        }
        if self.idle_timeout == Some(Duration::ZERO) {
            bail!("idle timeout must not be zero - use None to disable idle eviction");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::default(Dnscat2Config::default(), true)]
    #[case::idle_timeout(Dnscat2Config { idle_timeout: Some(Duration::from_secs(60)), ..Default::default() }, true)]
    #[case::zero_idle_timeout(Dnscat2Config { idle_timeout: Some(Duration::ZERO), ..Default::default() }, false)]
    #[case::zero_sweep_interval(Dnscat2Config { idle_sweep_interval: Duration::ZERO, ..Default::default() }, false)]
    fn test_validate(#[case] config: Dnscat2Config, #[case] expected_valid: bool) {
        assert_eq!(config.validate().is_ok(), expected_valid);
    }
}
