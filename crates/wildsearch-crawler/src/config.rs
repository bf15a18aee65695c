use std::cmp;
use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrawlerConfig {
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    #[serde(default = "default_page_buffer")]
    pub page_buffer: usize,

    #[serde(default = "default_concurrent_downloads")]
    pub concurrent_downloads: usize,

    #[serde(default = "default_num_workers")]
    pub num_workers: usize,

    /// Delay in seconds between two request starts
    #[serde(default)]
    pub download_delay: Option<f32>,

    /// Per request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout: u64,

    #[serde(default = "default_on_dl_error")]
    pub on_dl_error: OnError,

    #[serde(default = "default_on_scrap_error")]
    pub on_scrap_error: OnError,

    #[serde(default = "default_handle_sigint")]
    pub handle_sigint: bool,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            user_agent: default_user_agent(),
            page_buffer: default_page_buffer(),
            concurrent_downloads: default_concurrent_downloads(),
            num_workers: default_num_workers(),
            download_delay: None,
            request_timeout: default_request_timeout(),
            on_dl_error: default_on_dl_error(),
            on_scrap_error: default_on_scrap_error(),
            handle_sigint: default_handle_sigint(),
        }
    }
}

impl CrawlerConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.num_workers == 0 {
            anyhow::bail!("Invalid crawler config, `numWorkers` must be at least 1");
        }
        if self.concurrent_downloads == 0 {
            anyhow::bail!("Invalid crawler config, `concurrentDownloads` must be at least 1");
        }
        if self.page_buffer == 0 {
            anyhow::bail!("Invalid crawler config, `pageBuffer` must be at least 1");
        }
        match self.download_delay {
            Some(delay) if !delay.is_finite() || delay < 0. => {
                anyhow::bail!("Invalid crawler config, `downloadDelay` must be a positive number")
            }
            _ => Ok(()),
        }
    }

    pub fn delay(&self) -> Option<Duration> {
        self.download_delay
            .filter(|d| *d > 0.)
            .map(Duration::from_secs_f32)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout)
    }
}

fn default_user_agent() -> String {
    String::from("wildsearch-bot")
}

fn default_page_buffer() -> usize {
    10_000
}

fn default_concurrent_downloads() -> usize {
    16
}

fn default_num_workers() -> usize {
    cmp::max(1, num_cpus::get().saturating_sub(2))
}

fn default_request_timeout() -> u64 {
    30
}

fn default_on_dl_error() -> OnError {
    OnError::SkipAndLog
}

fn default_on_scrap_error() -> OnError {
    OnError::SkipAndLog
}

fn default_handle_sigint() -> bool {
    true
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "clap", derive(clap::ValueEnum))]
pub enum OnError {
    Fail,
    SkipAndLog,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let conf = CrawlerConfig::default();
        assert!(conf.validate().is_ok());
        assert!(conf.num_workers >= 1);
        assert_eq!(conf.delay(), None);
    }

    #[test]
    fn rejects_zero_downloads() {
        let conf = CrawlerConfig {
            concurrent_downloads: 0,
            ..Default::default()
        };
        assert!(conf.validate().is_err());
    }

    #[test]
    fn rejects_negative_delay() {
        let conf = CrawlerConfig {
            download_delay: Some(-1.),
            ..Default::default()
        };
        assert!(conf.validate().is_err());
    }

    #[test]
    fn zero_delay_means_none() {
        let conf = CrawlerConfig {
            download_delay: Some(0.),
            ..Default::default()
        };
        assert_eq!(conf.delay(), None);

        let conf = CrawlerConfig {
            download_delay: Some(0.5),
            ..Default::default()
        };
        assert_eq!(conf.delay(), Some(Duration::from_millis(500)));
    }
}
