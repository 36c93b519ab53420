// Copyright 2025 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

//! Tunables for ranged reads.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::{str::FromStr, time::Duration};
use tracing::warn;

/// Default size of a single stripe when a part is fetched over several connections: 1MB.
pub const DEFAULT_STRIPE_SIZE: u64 = 1024 * 1024;
/// Default lifetime of a cached part location: one hour.
pub const DEFAULT_LOCATION_TTL: Duration = Duration::from_secs(60 * 60);

/// Environment variable overriding [`StreamConfig::concurrency`].
pub const CONCURRENCY_ENV: &str = "PART_READER_CONCURRENCY";
/// Environment variable overriding [`StreamConfig::stripe_size`].
pub const STRIPE_SIZE_ENV: &str = "PART_READER_STRIPE_SIZE";
/// Environment variable overriding [`StreamConfig::location_ttl`], in seconds.
pub const LOCATION_TTL_ENV: &str = "PART_READER_LOCATION_TTL_SECS";

/// Configuration shared by every part opened during a read session.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Number of connections used to fetch a single part.  Below 2, each part is fetched over a
    /// single stream; from 2 upwards it is split into stripes fetched in parallel.
    ///
    /// Use the environment variable `PART_READER_CONCURRENCY` to set this value.
    pub concurrency: usize,
    /// Size of each stripe for parallel fetches.
    ///
    /// Use the environment variable `PART_READER_STRIPE_SIZE` to set this value.
    pub stripe_size: u64,
    /// How long a resolved part location stays in the cache.
    ///
    /// Use the environment variable `PART_READER_LOCATION_TTL_SECS` to set this value.
    pub location_ttl: Duration,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            concurrency: 1,
            stripe_size: DEFAULT_STRIPE_SIZE,
            location_ttl: DEFAULT_LOCATION_TTL,
        }
    }
}

impl StreamConfig {
    /// Defaults with any environment overrides applied.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env_overrides();
        config
    }

    /// Sets the concurrency level.
    pub fn with_concurrency(self, concurrency: usize) -> Self {
        Self {
            concurrency,
            ..self
        }
    }

    /// Sets the stripe size.
    pub fn with_stripe_size(self, stripe_size: u64) -> Self {
        Self {
            stripe_size,
            ..self
        }
    }

    /// Apply environment variable overrides to this configuration.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|name| std::env::var(name).ok())
    }

    /// Apply overrides from an arbitrary lookup.  Values which fail to parse leave the current
    /// value in place.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        self.concurrency = parse_override(CONCURRENCY_ENV, lookup(CONCURRENCY_ENV), self.concurrency);
        self.stripe_size = parse_override(STRIPE_SIZE_ENV, lookup(STRIPE_SIZE_ENV), self.stripe_size);
        let ttl = parse_override(
            LOCATION_TTL_ENV,
            lookup(LOCATION_TTL_ENV),
            self.location_ttl.as_secs(),
        );
        self.location_ttl = Duration::from_secs(ttl);
    }

    /// Concurrency actually used: zero is treated as one.
    pub fn effective_concurrency(&self) -> usize {
        self.concurrency.max(1)
    }

    /// Rejects configurations no read could make progress with.
    pub fn validate(&self) -> Result<()> {
        if self.stripe_size == 0 {
            return Err(Error::Config("stripe size must be greater than zero".to_string()));
        }
        Ok(())
    }
}

fn parse_override<T: FromStr + Copy>(name: &str, raw: Option<String>, current: T) -> T {
    let Some(raw) = raw else {
        return current;
    };
    match raw.trim().parse() {
        Ok(value) => value,
        Err(_) => {
            warn!(env_var = name, value = %raw, "ignoring unparsable configuration override");
            current
        }
    }
}
