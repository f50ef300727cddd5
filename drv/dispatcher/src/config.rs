// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use anyhow::{anyhow, ensure, Result};
use drv_buffer_banks::{Geometry, MAX_BANKS, MAX_CAPACITY};
use serde::Deserialize;
use std::env;

use crate::SelectionPolicy;

/// Instrument configuration, read from TOML. Every key is optional.
///
/// ```toml
/// bank-count = 4
/// bank-capacity = 1024
/// selection-policy = "priority"
/// zero-on-ready = true
/// ```
#[derive(Copy, Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "kebab-case", default)]
pub struct DeviceConfig {
    pub bank_count: usize,
    /// Words per bank.
    pub bank_capacity: usize,
    pub selection_policy: SelectionPolicy,
    /// Clear the banks every time the RUN gate comes up.
    pub zero_on_ready: bool,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            bank_count: MAX_BANKS,
            bank_capacity: 1024,
            selection_policy: SelectionPolicy::Priority,
            zero_on_ready: true,
        }
    }
}

impl DeviceConfig {
    pub fn from_toml(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text)?;
        config.geometry()?;
        Ok(config)
    }

    /// Parses TOML from the environment variable `var`, or returns the
    /// defaults if it isn't set. A variable that is set but doesn't parse is
    /// still an error.
    pub fn from_env_or_default(var: &str) -> Result<Self> {
        match env::var(var) {
            Ok(text) => Self::from_toml(&text),
            Err(env::VarError::NotPresent) => Ok(Self::default()),
            Err(e) => Err(anyhow!("reading ${var}: {e}")),
        }
    }

    pub fn geometry(&self) -> Result<Geometry> {
        ensure!(
            (1..=MAX_BANKS).contains(&self.bank_count),
            "bank-count must be 1..={MAX_BANKS}, got {}",
            self.bank_count
        );
        ensure!(
            (1..=MAX_CAPACITY).contains(&self.bank_capacity),
            "bank-capacity must be 1..={MAX_CAPACITY}, got {}",
            self.bank_capacity
        );
        Geometry::new(self.bank_count, self.bank_capacity)
            .map_err(|e| anyhow!("bad geometry: {e:?}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_is_default() {
        assert_eq!(DeviceConfig::from_toml("").unwrap(), Default::default());
    }

    #[test]
    fn full() {
        let c = DeviceConfig::from_toml(
            r#"
            bank-count = 2
            bank-capacity = 64
            selection-policy = "strict"
            zero-on-ready = false
            "#,
        )
        .unwrap();
        assert_eq!(
            c,
            DeviceConfig {
                bank_count: 2,
                bank_capacity: 64,
                selection_policy: SelectionPolicy::Strict,
                zero_on_ready: false,
            }
        );
        let g = c.geometry().unwrap();
        assert_eq!((g.banks(), g.capacity()), (2, 64));
    }

    #[test]
    fn rejects_unknown_keys() {
        assert!(DeviceConfig::from_toml("bank-size = 3").is_err());
        assert!(DeviceConfig::from_toml("selection-policy = \"any\"").is_err());
    }

    #[test]
    fn rejects_bad_geometry() {
        for text in [
            "bank-count = 0",
            "bank-count = 5",
            "bank-capacity = 0",
            "bank-capacity = 65537",
        ] {
            let e = DeviceConfig::from_toml(text).unwrap_err();
            assert!(e.to_string().contains("must be"), "{text}: {e}");
        }
    }

    #[test]
    fn env_fallback() {
        let var = "DRV_DISPATCHER_TEST_CONFIG_UNSET";
        assert_eq!(
            DeviceConfig::from_env_or_default(var).unwrap(),
            DeviceConfig::default()
        );
    }
}
