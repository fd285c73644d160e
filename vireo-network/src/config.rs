//! Node configuration: typed defaults deep-merged with user overrides.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::Error;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Local endpoint to accept inbound peers on; `None` disables
    /// listening.
    pub listen: Option<Listen>,

    /// Peers to connect to explicitly, as `host:port` strings.
    pub connect: Vec<String>,

    /// Seed the address book from DNS when it runs dry.
    pub dns: bool,

    /// Request headers instead of full blocks.
    pub headers_only: bool,

    pub max: Limits,

    pub intervals: Intervals,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Listen {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Limits {
    pub connections: usize,
    pub addr: usize,
    pub queue: usize,
    pub inv: usize,
    pub inv_cache: usize,
}

/// Worker cadence, in seconds.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Intervals {
    pub queue: u64,
    pub inv_queue: u64,
    pub addrs: u64,
    pub connect: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen: None,
            connect: Vec::new(),
            dns: true,
            headers_only: false,
            max: Limits::default(),
            intervals: Intervals::default(),
        }
    }
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            connections: 8,
            addr: 256,
            queue: 64,
            inv: 128,
            inv_cache: 1024,
        }
    }
}

impl Default for Intervals {
    fn default() -> Self {
        Self {
            queue: 5,
            inv_queue: 5,
            addrs: 15,
            connect: 15,
        }
    }
}

impl Config {
    /// Deep-merge user overrides over the defaults.
    ///
    /// Keys the defaults don't know are warned about and dropped rather
    /// than rejected.
    pub fn from_value(overrides: Value) -> Result<Self, Error> {
        let mut base = serde_json::to_value(Config::default())
            .map_err(|e| Error::Config(e.to_string()))?;

        deep_merge(&mut base, overrides, "");

        serde_json::from_value(base).map_err(|e| Error::Config(e.to_string()))
    }
}

fn deep_merge(base: &mut Value, overrides: Value, path: &str) {
    let Value::Object(overrides) = overrides else {
        *base = overrides;
        return;
    };

    let Value::Object(map) = base else {
        *base = Value::Object(overrides);
        return;
    };

    for (key, value) in overrides {
        let child_path = if path.is_empty() {
            key.clone()
        } else {
            format!("{path}.{key}")
        };

        match map.get_mut(&key) {
            Some(slot) => deep_merge(slot, value, &child_path),
            None => {
                warn!(key = %child_path, "ignoring unrecognized configuration key");
            }
        }
    }
}
