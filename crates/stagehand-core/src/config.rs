//! Config - 実行時設定
//!
//! ここの値が変えるのはタイミングだけ。`validate()` を通った設定なら
//! ライフサイクルの不変条件は保たれる。
//!
//! # 時間の関係
//! - `grace` > `download_timeout`（ステージから登録までの最悪時間）
//! - `max_age` > `grace`
//! - レコード削除 = `reclaim_delay` + `record_removal_margin`

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// `grace` の既定値がダウンロード上限に上乗せする余裕
pub const GRACE_MARGIN: Duration = Duration::from_secs(60);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {key}: {message}")]
    InvalidValue { key: &'static str, message: String },
}

#[derive(Debug, Clone)]
pub struct Config {
    /// ステージ済み入力と `temp` 結果ディレクトリを置くローカルディレクトリ
    pub storage_dir: PathBuf,

    /// エンジン側から見た `storage_dir`（エンジンは独自のマウントで動く）
    pub engine_data_dir: String,

    /// 合成エンジンのベース URL
    pub engine_url: String,

    pub engine_timeout: Duration,
    pub download_timeout: Duration,

    /// 結果の fetch からジョブのファイル削除までの遅延
    pub reclaim_delay: Duration,

    /// fetch 後、レコードがファイルより長生きする時間
    pub record_removal_margin: Duration,

    pub sweep_interval: Duration,
    pub sweep_error_backoff: Duration,

    /// 追跡外のファイルを sweep してよい最小 age
    pub grace: Duration,

    /// これを超えたレコードとファイルは無条件に回収する
    pub max_age: Duration,
}

impl Default for Config {
    fn default() -> Self {
        let reclaim_delay = Duration::from_secs(60);
        let download_timeout = Duration::from_secs(120);
        Self {
            storage_dir: PathBuf::from("/code/data"),
            engine_data_dir: "/code/data".to_string(),
            engine_url: "http://localhost:8383".to_string(),
            engine_timeout: Duration::from_secs(30),
            download_timeout,
            reclaim_delay,
            record_removal_margin: Duration::from_secs(10),
            sweep_interval: Duration::from_secs(300),
            sweep_error_backoff: Duration::from_secs(60),
            grace: Config::default_grace(reclaim_delay, download_timeout),
            max_age: Duration::from_secs(7200),
        }
    }
}

impl Config {
    /// `grace` の既定値
    ///
    /// 音声をステージしてからレコード登録までの間に、動画のダウンロードが丸ごと入る。
    /// その間に sweep が走っても音声を消さないよう、`download_timeout` より長くする。
    pub fn default_grace(reclaim_delay: Duration, download_timeout: Duration) -> Duration {
        reclaim_delay.max(download_timeout + GRACE_MARGIN)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sweep_interval.is_zero() {
            return Err(ConfigError::InvalidValue {
                key: "sweep_interval",
                message: "must be greater than zero".to_string(),
            });
        }
        if self.sweep_error_backoff.is_zero() {
            return Err(ConfigError::InvalidValue {
                key: "sweep_error_backoff",
                message: "must be greater than zero".to_string(),
            });
        }
        if self.grace <= self.download_timeout {
            return Err(ConfigError::InvalidValue {
                key: "grace",
                message: format!(
                    "must exceed the download timeout ({}s)",
                    self.download_timeout.as_secs()
                ),
            });
        }
        if self.max_age <= self.grace {
            return Err(ConfigError::InvalidValue {
                key: "max_age",
                message: format!(
                    "must exceed the grace threshold ({}s)",
                    self.grace.as_secs()
                ),
            });
        }
        Ok(())
    }

    /// fetch 済みジョブのレコードを削除するまでの遅延
    pub fn record_removal_delay(&self) -> Duration {
        self.reclaim_delay + self.record_removal_margin
    }

    /// エンジンが結果を書き込むディレクトリ
    pub fn results_dir(&self) -> PathBuf {
        self.storage_dir.join(crate::RESULTS_SUBDIR)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn defaults_are_valid() {
        let config = Config::default();
        config.validate().unwrap();
        assert_eq!(config.grace, Duration::from_secs(180));
        assert!(config.grace > config.download_timeout);
        assert_eq!(config.record_removal_delay(), Duration::from_secs(70));
    }

    #[rstest]
    #[case::download_dominates(60, 120, 180)]
    #[case::reclaim_dominates(600, 120, 600)]
    #[case::short_download(60, 0, 60)]
    fn default_grace_covers_the_download_window(
        #[case] reclaim_secs: u64,
        #[case] download_secs: u64,
        #[case] expected_secs: u64,
    ) {
        let grace = Config::default_grace(
            Duration::from_secs(reclaim_secs),
            Duration::from_secs(download_secs),
        );
        assert_eq!(grace, Duration::from_secs(expected_secs));
    }

    #[rstest]
    #[case::zero_interval(Config { sweep_interval: Duration::ZERO, ..Config::default() }, "sweep_interval")]
    #[case::zero_backoff(Config { sweep_error_backoff: Duration::ZERO, ..Config::default() }, "sweep_error_backoff")]
    #[case::grace_within_download_timeout(Config { grace: Duration::from_secs(60), ..Config::default() }, "grace")]
    #[case::grace_equal_to_download_timeout(Config { grace: Duration::from_secs(120), ..Config::default() }, "grace")]
    #[case::max_age_below_grace(Config { max_age: Duration::from_secs(30), ..Config::default() }, "max_age")]
    fn invalid_configs_are_rejected(#[case] config: Config, #[case] expected_key: &str) {
        let ConfigError::InvalidValue { key, .. } = config.validate().unwrap_err();
        assert_eq!(key, expected_key);
    }
}
