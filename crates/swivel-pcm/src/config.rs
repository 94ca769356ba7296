//! Device configuration parsing.
//!
//! The device is configured with a flat set of key/value fields. `slavepcm`
//! names the slave device to relay into; `comment` and `type` are structural
//! fields carried by the host configuration format and are ignored. Any other
//! field is rejected so that a typo fails loudly instead of silently playing
//! through the wrong device.

use crate::error::{RelayError, Result};

/// Slave device name used when the configuration does not name one.
pub const DEFAULT_SLAVE_NAME: &str = "default";

/// Raw value of a configuration field before validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigValue<'a> {
    Str(&'a str),
    Int(i64),
}

/// Parsed virtual-device configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayConfig {
    slave_pcm: String,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            slave_pcm: DEFAULT_SLAVE_NAME.to_owned(),
        }
    }
}

impl RelayConfig {
    /// Parse raw key/value fields.
    ///
    /// An absent or empty `slavepcm` resolves to [`DEFAULT_SLAVE_NAME`].
    pub fn from_pairs<'a, I>(pairs: I) -> Result<Self>
    where
        I: IntoIterator<Item = (&'a str, ConfigValue<'a>)>,
    {
        let mut slave_pcm: Option<&str> = None;

        for (key, value) in pairs {
            match key {
                "comment" | "type" => continue,
                "slavepcm" => match value {
                    ConfigValue::Str(name) => slave_pcm = Some(name),
                    ConfigValue::Int(_) => {
                        return Err(RelayError::InvalidConfigValue {
                            field: "slavepcm",
                            expected: "a string",
                        })
                    }
                },
                other => return Err(RelayError::UnknownConfigKey(other.to_owned())),
            }
        }

        let slave_pcm = match slave_pcm {
            Some("") | None => DEFAULT_SLAVE_NAME,
            Some(name) => name,
        };

        Ok(Self {
            slave_pcm: slave_pcm.to_owned(),
        })
    }

    /// Name of the slave device to open.
    pub fn slave_pcm(&self) -> &str {
        &self.slave_pcm
    }
}
