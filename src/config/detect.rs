use std::time::Duration;

use serde::{Deserialize, Deserializer, de};

use crate::detect_session::DEFAULT_DETECT_TIMEOUT;

#[derive(Debug, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct Detect {
    /// Time a new connection gets to reveal whether it speaks TLS.
    #[serde(rename = "timeout_secs", default = "default_timeout", deserialize_with = "deserialize_secs")]
    pub timeout: Duration,
}

impl Default for Detect {
    fn default() -> Self {
        Self {
            timeout: default_timeout(),
        }
    }
}

fn default_timeout() -> Duration {
    DEFAULT_DETECT_TIMEOUT
}

fn deserialize_secs<'de, D>(de: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let secs = u64::deserialize(de)?;

    if secs == 0 {
        return Err(de::Error::custom("timeout_secs must be greater than zero"));
    }

    Ok(Duration::from_secs(secs))
}
