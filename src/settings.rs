// Copyright (c) 2022 Octavian Oncescu
// Copyright (c) 2022 The Purplecoin Core developers
// Licensed under the Apache License, Version 2.0 see LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0 or the MIT license, see
// LICENSE-MIT or http://opensource.org/licenses/MIT

use crate::chain::CheckpointPolicy;
use config::{Config, ConfigError, File};
use lazy_static::*;
use log::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{create_dir_all, metadata, File as FsFile};
use std::io::Write;
use std::path::PathBuf;
use struct_field_names_as_array::FieldNamesAsArray;

lazy_static! {
    pub static ref SETTINGS: Settings = Settings::new().expect("invalid configuration");
}

#[derive(Debug, Serialize, Deserialize, Default, FieldNamesAsArray)]
pub struct Settings {
    /// Network settings.
    pub network: Network,

    /// Node settings.
    pub node: Node,

    /// Synchronized checkpoint settings.
    pub checkpoints: Checkpoints,
}

/// `<config_dir>/Stakecoin`
fn default_dir() -> Option<PathBuf> {
    let mut path = dirs::config_dir()?;
    path.push("Stakecoin");
    Some(path)
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        let default_settings = Settings::default();
        let prefix = "stakecoin";
        let env_source: Vec<_> = std::env::vars().collect();
        let mut s = Config::builder();

        if let Some(mut config_path) = default_dir() {
            config_path.push("config.toml");

            // Create default configuration
            if metadata(&config_path).is_err() {
                write_default_config(&config_path, &default_settings);
            }

            s = s.add_source(File::from(config_path).required(false));
        }

        // Set defaults
        let defaults: HashMap<String, HashMap<String, DynamicConfVal>> =
            serde_yaml::from_value(
                serde_yaml::to_value(&default_settings)
                    .map_err(|err| ConfigError::Message(err.to_string()))?,
            )
            .map_err(|err| ConfigError::Message(err.to_string()))?;

        for (k1, inner) in &defaults {
            for (k2, v) in inner {
                match v {
                    DynamicConfVal::String(v) => {
                        s = s.set_default(format!("{k1}.{k2}"), v.as_str())?;
                    }

                    DynamicConfVal::Bool(v) => {
                        s = s.set_default(format!("{k1}.{k2}"), v.to_string())?;
                    }

                    DynamicConfVal::U16(v) => {
                        s = s.set_default(format!("{k1}.{k2}"), v.to_string())?;
                    }

                    DynamicConfVal::Sequence(v) => {
                        s = s.set_default(format!("{k1}.{k2}"), v.clone())?;
                    }

                    DynamicConfVal::Option(v) => {
                        if let Some(v) = v {
                            s = s.set_default(format!("{k1}.{k2}"), v.as_str())?;
                        }
                    }
                }
            }
        }

        // Make sure to list these in order
        let settings_modules: Vec<_> = vec![
            Network::FIELD_NAMES_AS_ARRAY,
            Node::FIELD_NAMES_AS_ARRAY,
            Checkpoints::FIELD_NAMES_AS_ARRAY,
        ];

        // Gather all possible settings keys
        let possible_keys: HashMap<String, (&str, &str)> = Settings::FIELD_NAMES_AS_ARRAY
            .iter()
            .enumerate()
            .flat_map(|(i, field)| {
                settings_modules[i].iter().map(move |nested| {
                    (
                        format!("{}_{}_{}", prefix, field, nested.replace('_', "")),
                        (*field, *nested),
                    )
                })
            })
            .collect();

        // Parse env vars manually and set overrides if they exist as the
        // config package `Environment` module behaves poorly with nested
        // snake case keys.
        for (k, v) in &env_source {
            if let Some((section, key)) = possible_keys.get(&k.to_lowercase()) {
                // Filter empty values
                if v.is_empty() {
                    continue;
                }

                s = s.set_override(format!("{section}.{key}"), v.as_str())?;
            }
        }

        s.build()?.try_deserialize()
    }

    /// Checks values the type system can't
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.node.network_name.is_empty() {
            return Err("node.network_name cannot be empty");
        }

        if self.network.listen_port_mainnet == self.network.listen_port_testnet {
            return Err("network listen ports must differ between networks");
        }

        if !self.node.memory_only && self.node.data_dir.is_empty() {
            return Err("node.data_dir is required unless running in memory only mode");
        }

        self.checkpoints.policy()?;

        if let Some(key) = &self.checkpoints.master_priv_key {
            if key.len() != 64 || hex::decode(key).is_err() {
                return Err("checkpoints.master_priv_key must be 32 hex encoded bytes");
            }
        }

        Ok(())
    }
}

fn write_default_config(config_path: &PathBuf, default_settings: &Settings) {
    let settings_str = match toml::ser::to_string_pretty(default_settings) {
        Ok(settings_str) => settings_str,
        Err(err) => {
            error!("Failed to serialize default configuration! Reason: {:#?}", err);
            return;
        }
    };

    if let Some(parent) = config_path.parent() {
        create_dir_all(parent).unwrap_or(());
    }

    match FsFile::create(config_path) {
        Ok(mut file) => {
            file.write_all(settings_str.as_bytes()).unwrap_or(());
        }
        Err(err) => {
            // If this fails, do nothing and fall back to environment variables
            error!("Failed to create configuration! Reason: {:#?}", err);
        }
    }
}

#[derive(Debug, Serialize, Deserialize, FieldNamesAsArray)]
pub struct Network {
    /// Node listen address.
    #[serde(alias = "listenaddr")]
    pub listen_addr: String,

    /// Node listen port on mainnet.
    #[serde(alias = "listenportmainnet")]
    pub listen_port_mainnet: u16,

    /// Node listen port on testnet.
    #[serde(alias = "listenporttestnet")]
    pub listen_port_testnet: u16,

    /// DNS seeds for mainnet.
    #[serde(alias = "seedsmainnet")]
    pub seeds_mainnet: Vec<String>,

    /// DNS seeds for testnet.
    #[serde(alias = "seedstestnet")]
    pub seeds_testnet: Vec<String>,
}

impl Default for Network {
    fn default() -> Self {
        Self {
            listen_addr: "*".to_owned(),
            listen_port_mainnet: 9901,
            listen_port_testnet: 9903,
            seeds_mainnet: vec!["seed.mainnet.stakecoin.org".to_owned()],
            seeds_testnet: vec!["seed.testnet.stakecoin.org".to_owned()],
        }
    }
}

#[derive(Debug, Serialize, Deserialize, FieldNamesAsArray)]
pub struct Node {
    /// The network name the node is listening on.
    #[serde(alias = "networkname")]
    pub network_name: String,

    /// Node data directory
    #[serde(alias = "datadir")]
    pub data_dir: String,

    /// If specified, we won't be storing anything to disk.
    #[serde(alias = "memoryonly")]
    pub memory_only: bool,
}

impl Default for Node {
    fn default() -> Self {
        let data_dir = default_dir()
            .and_then(|path| path.into_os_string().into_string().ok())
            .unwrap_or_default();

        Self {
            network_name: "testnet".to_owned(), // Use testnet as default for now
            data_dir,
            memory_only: false,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, FieldNamesAsArray)]
pub struct Checkpoints {
    /// What to do with blocks that conflict with the synchronized checkpoint.
    ///
    /// Can be `strict`, `advisory` or `permissive`. Default is `strict`.
    pub policy: String,

    /// Hex encoded checkpoint master private key. Only set on the node that
    /// signs and broadcasts synchronized checkpoints.
    #[serde(alias = "masterprivkey")]
    pub master_priv_key: Option<String>,
}

impl Default for Checkpoints {
    fn default() -> Self {
        Self {
            policy: "strict".to_owned(),
            master_priv_key: None,
        }
    }
}

impl Checkpoints {
    pub fn policy(&self) -> Result<CheckpointPolicy, &'static str> {
        self.policy.parse()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum DynamicConfVal {
    String(String),
    Sequence(Vec<String>),
    Option(Option<String>),
    Bool(bool),
    U16(u16),
}
