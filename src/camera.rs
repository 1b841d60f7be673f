use std::fmt;

use percent_encoding::percent_decode_str;
use reqwest::Url;
use serde::{Serialize, Serializer};
use thiserror::Error;

const REDACTED: &str = "***";

#[derive(Debug, Error)]
pub enum CameraUrlError {
    #[error("invalid camera url: {0}")]
    Parse(String),
    #[error("unsupported camera url scheme '{0}', expected http or https")]
    Scheme(String),
    #[error("camera url has no host")]
    NoHost,
}

#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &REDACTED)
            .finish()
    }
}

/// Pulls `user:pass` out of a camera url. Unparseable urls and urls without
/// userinfo both give `None`.
pub fn get_credentials(url: &str) -> Option<Credentials> {
    Url::parse(url).ok().and_then(|u| credentials_of(&u))
}

fn credentials_of(url: &Url) -> Option<Credentials> {
    if url.username().is_empty() && url.password().is_none() {
        return None;
    }
    let decode = |s: &str| percent_decode_str(s).decode_utf8_lossy().into_owned();
    Some(Credentials {
        username: decode(url.username()),
        password: url.password().map(decode).unwrap_or_default(),
    })
}

/// The camera endpoint, parsed once at startup. Never printed with its
/// credentials: `Display` and `Serialize` both go through the redacted form.
#[derive(Clone)]
pub struct CameraUrl {
    url: Url,
    credentials: Option<Credentials>,
}

impl CameraUrl {
    pub fn parse(raw: &str) -> Result<Self, CameraUrlError> {
        let url = Url::parse(raw).map_err(|e| CameraUrlError::Parse(e.to_string()))?;
        match url.scheme() {
            "http" | "https" => {}
            other => return Err(CameraUrlError::Scheme(other.to_string())),
        }
        if url.host_str().map_or(true, str::is_empty) {
            return Err(CameraUrlError::NoHost);
        }
        let credentials = get_credentials(raw);
        Ok(CameraUrl { url, credentials })
    }

    pub fn credentials(&self) -> Option<&Credentials> {
        self.credentials.as_ref()
    }

    pub fn scheme(&self) -> &str {
        self.url.scheme()
    }

    pub fn host(&self) -> &str {
        self.url.host_str().unwrap_or_default()
    }

    pub fn port(&self) -> Option<u16> {
        self.url.port_or_known_default()
    }

    /// Path plus query, the form digest auth signs.
    pub fn request_uri(&self) -> String {
        match self.url.query() {
            Some(q) => format!("{}?{}", self.url.path(), q),
            None => self.url.path().to_string(),
        }
    }

    /// The url to put on the wire. Userinfo is stripped so reqwest does not
    /// turn it into a basic auth header on its own.
    pub fn request_url(&self) -> Url {
        let mut url = self.url.clone();
        let _ = url.set_username("");
        let _ = url.set_password(None);
        url
    }

    pub fn redacted(&self) -> String {
        let mut url = self.url.clone();
        if !url.username().is_empty() {
            let _ = url.set_username(REDACTED);
        }
        if url.password().is_some() {
            let _ = url.set_password(Some(REDACTED));
        }
        url.to_string()
    }
}

impl fmt::Display for CameraUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.redacted())
    }
}

impl fmt::Debug for CameraUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CameraUrl({})", self.redacted())
    }
}

impl Serialize for CameraUrl {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.redacted())
    }
}
