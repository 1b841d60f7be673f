use std::{path::{Component, Path, PathBuf}, time::Duration};

use clap::{ArgAction, Parser, ValueEnum};
use serde::Serialize;

use crate::{camera::CameraUrl, http::FetchOptions};

/// Periodically grab a still image from a network camera and file it under
/// camera_name/YYYY-MM-DD/<unix_timestamp>.jpg
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Snapshot url of the camera, may carry user:pass@
    #[arg(value_parser = CameraUrl::parse)]
    pub url: CameraUrl,
    /// Name of the camera, used as the top level directory
    #[arg(value_parser = parse_camera_name)]
    pub camera_name: String,
    /// Seconds to sleep between captures
    #[arg(long, default_value_t = 5)]
    pub interval: u64,
    /// Seconds before a fetch is abandoned
    #[arg(long, default_value_t = 30)]
    pub timeout: u64,
    /// Accept self-signed or otherwise invalid TLS certificates
    #[arg(long, default_value_t = true, action = ArgAction::Set)]
    pub insecure_tls: bool,
    /// What to do with non-2xx responses
    #[arg(long, value_enum, default_value_t = StatusPolicy::Lenient)]
    pub status_policy: StatusPolicy,
    /// How credentials in the url are sent to the camera
    #[arg(long, value_enum, default_value_t = AuthScheme::Digest)]
    pub auth: AuthScheme,
    /// Directory the camera folder is created in
    #[arg(long, default_value = ".")]
    pub output_dir: PathBuf,
    /// Stop after this many cycles instead of running until killed
    #[arg(long)]
    pub max_cycles: Option<u64>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusPolicy {
    /// Non-2xx responses are fetch failures
    Strict,
    /// Any response body is written to disk
    Lenient,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthScheme {
    Digest,
    Basic,
    None,
}

#[derive(Debug, thiserror::Error)]
#[error("camera name '{0}' must be a single non-empty path component")]
pub struct CameraNameError(String);

fn parse_camera_name(name: &str) -> Result<String, CameraNameError> {
    if is_plain_name(name) {
        Ok(name.to_string())
    } else {
        Err(CameraNameError(name.to_string()))
    }
}

/// Resolved runtime settings. Serializes with the url redacted, for the
/// startup log line.
#[derive(Debug, Clone, Serialize)]
pub struct Settings {
    pub url: CameraUrl,
    pub camera_name: String,
    pub output_dir: PathBuf,
    pub interval: Duration,
    pub timeout: Duration,
    pub insecure_tls: bool,
    pub status_policy: StatusPolicy,
    pub auth: AuthScheme,
    pub max_cycles: Option<u64>,
}

impl Settings {
    pub fn from_cli(cli: Cli) -> Self {
        Settings {
            url: cli.url,
            camera_name: cli.camera_name,
            output_dir: cli.output_dir,
            interval: Duration::from_secs(cli.interval),
            timeout: Duration::from_secs(cli.timeout),
            insecure_tls: cli.insecure_tls,
            status_policy: cli.status_policy,
            auth: cli.auth,
            max_cycles: cli.max_cycles,
        }
    }

    pub fn fetch_options(&self) -> FetchOptions {
        FetchOptions {
            timeout: self.timeout,
            insecure_tls: self.insecure_tls,
            status_policy: self.status_policy,
            auth: self.auth,
        }
    }
}

fn is_plain_name(name: &str) -> bool {
    let mut parts = Path::new(name).components();
    matches!((parts.next(), parts.next()), (Some(Component::Normal(_)), None))
}
