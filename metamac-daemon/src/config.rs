//! The protocol suite document.
//!
//! A YAML file describing the candidate protocols, their compiled FSMs and
//! their emulator parameters:
//!
//! ```yaml
//! eta: 0.25
//! initial_protocol: 2      # optional, a protocol id
//! protocols:
//!   - id: 1
//!     name: "TDMA (slot 1)"
//!     fsm:
//!       path: tdma.txt
//!       params:
//!         - { num: 12, value: 1 }
//!     emulator:
//!       tdma: { frame_offset: 0, frame_length: 4, slot_assignment: 1 }
//!   - id: 2
//!     name: "Aloha (0.25)"
//!     fsm: { path: aloha.txt }
//!     emulator:
//!       aloha: { persistence: 0.25 }
//! ```
//!
//! Relative FSM paths resolve against the document's directory and are
//! canonicalised, so two protocols naming the same file in different ways
//! still count as sharing an FSM.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use metamac_core::{AlohaParams, Emulator, FsmParam, Protocol, TdmaParams};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unable to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid configuration file: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("invalid configuration file: {0}")]
    Invalid(String),
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct SuiteDocument {
    #[serde(default)]
    eta: Option<f64>,
    #[serde(default)]
    initial_protocol: Option<i32>,
    protocols: Vec<ProtocolEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ProtocolEntry {
    id: i32,
    name: String,
    fsm: FsmEntry,
    emulator: EmulatorEntry,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct FsmEntry {
    path: PathBuf,
    #[serde(default)]
    params: Vec<FsmParamEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct FsmParamEntry {
    num: u8,
    value: u16,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "lowercase", deny_unknown_fields)]
enum EmulatorEntry {
    Tdma {
        frame_offset: u32,
        frame_length: u32,
        slot_assignment: u32,
    },
    Aloha {
        persistence: f64,
    },
}

/// A fully validated suite configuration.
pub struct LoadedSuite {
    pub protocols: Vec<Protocol>,
    pub eta: f64,
    /// Index (not id) of the initially active protocol, if configured.
    pub initial: Option<usize>,
}

/// Load and validate the suite document at `path`. A `--eta` override
/// replaces the document's learning rate and makes it optional.
pub fn load_suite(path: &Path, eta_override: Option<f64>) -> Result<LoadedSuite, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let document: SuiteDocument = serde_yaml::from_str(&text)?;

    let eta = match eta_override.or(document.eta) {
        Some(eta) if eta > 0.0 => eta,
        Some(eta) => {
            return Err(ConfigError::Invalid(format!("eta must be > 0, got {eta}")));
        }
        None => {
            return Err(ConfigError::Invalid(
                "missing required learning rate \"eta\"".into(),
            ));
        }
    };

    if document.protocols.is_empty() {
        return Err(ConfigError::Invalid(
            "there must be at least one component protocol".into(),
        ));
    }

    let base = path.parent().unwrap_or_else(|| Path::new("."));
    let mut protocols = Vec::with_capacity(document.protocols.len());
    for entry in document.protocols {
        protocols.push(build_protocol(entry, base)?);
    }

    for (index, protocol) in protocols.iter().enumerate() {
        if protocols[..index].iter().any(|p| p.id == protocol.id) {
            return Err(ConfigError::Invalid(format!(
                "duplicate protocol id {}",
                protocol.id
            )));
        }
    }

    let initial = match document.initial_protocol {
        None => None,
        Some(id) => match protocols.iter().position(|p| p.id == id) {
            Some(index) => Some(index),
            None => {
                return Err(ConfigError::Invalid(format!(
                    "initial_protocol {id} does not name a configured protocol"
                )));
            }
        },
    };

    Ok(LoadedSuite {
        protocols,
        eta,
        initial,
    })
}

fn build_protocol(entry: ProtocolEntry, base: &Path) -> Result<Protocol, ConfigError> {
    let emulator = match entry.emulator {
        EmulatorEntry::Tdma {
            frame_offset,
            frame_length,
            slot_assignment,
        } => {
            if frame_length == 0 {
                return Err(ConfigError::Invalid(format!(
                    "protocol {}: frame_length must be > 0",
                    entry.id
                )));
            }
            if slot_assignment >= frame_length {
                return Err(ConfigError::Invalid(format!(
                    "protocol {}: slot_assignment {slot_assignment} must be < frame_length {frame_length}",
                    entry.id
                )));
            }
            Emulator::Tdma(TdmaParams {
                frame_offset,
                frame_length,
                slot_assignment,
            })
        }
        EmulatorEntry::Aloha { persistence } => {
            if !(persistence > 0.0 && persistence <= 1.0) {
                return Err(ConfigError::Invalid(format!(
                    "protocol {}: persistence must be in (0, 1], got {persistence}",
                    entry.id
                )));
            }
            Emulator::Aloha(AlohaParams { persistence })
        }
    };

    let mut fsm_params = Vec::with_capacity(entry.fsm.params.len());
    for param in entry.fsm.params {
        if !(10..=17).contains(&param.num) {
            return Err(ConfigError::Invalid(format!(
                "protocol {}: only FSM parameters 10-17 are valid, got {}",
                entry.id, param.num
            )));
        }
        fsm_params.push(FsmParam {
            num: param.num,
            value: param.value,
        });
    }

    let fsm_path = base.join(&entry.fsm.path);
    let fsm_path = fsm_path.canonicalize().map_err(|source| ConfigError::Read {
        path: fsm_path,
        source,
    })?;

    Ok(Protocol {
        id: entry.id,
        name: entry.name,
        fsm_path,
        fsm_params,
        emulator,
    })
}
