//! JSON trace format.
//!
//! Addresses may be written either as JSON numbers or as hexadecimal
//! strings such as `"0x80003000"`.

use jitcache::{CacheConfig, ModeBits};
use serde::Deserialize;

/// A guest address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(try_from = "RawAddress")]
pub struct Address(pub u32);

#[derive(Deserialize)]
#[serde(untagged)]
enum RawAddress {
    Number(u32),
    Text(String),
}

impl TryFrom<RawAddress> for Address {
    type Error = String;

    fn try_from(raw: RawAddress) -> Result<Self, Self::Error> {
        match raw {
            RawAddress::Number(address) => Ok(Self(address)),
            RawAddress::Text(text) => {
                let digits = text
                    .strip_prefix("0x")
                    .or_else(|| text.strip_prefix("0X"))
                    .unwrap_or(&text);
                u32::from_str_radix(digits, 16)
                    .map(Self)
                    .map_err(|err| format!("Invalid address {text:?}: {err}"))
            }
        }
    }
}

/// Guest code resident at a physical address
#[derive(Debug, Clone, Deserialize)]
pub struct GuestProgram {
    /// Physical address of the first instruction
    pub address: Address,
    /// Number of instructions
    pub size: u32,
    /// Effective addresses the block can jump to
    #[serde(default)]
    pub exits: Vec<Address>,
    /// Whether the block's exits may be linked
    #[serde(default = "default_link")]
    pub link: bool,
}

fn default_link() -> bool {
    true
}

/// A single guest event
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TraceEvent {
    /// Switch the guest to new mode bits
    SetMode(ModeBits),
    /// Run the block at `pc` under the current mode
    Dispatch { pc: Address },
    /// Guest store or cache-block instruction at an effective address
    Write {
        address: Address,
        length: u32,
        #[serde(default)]
        forced: bool,
    },
    /// DMA of new code into physical memory
    Load(GuestProgram),
    /// Clear the cache directly on the guest thread
    Clear,
    /// Ask for a clear from another thread
    RequestClear,
    /// Drop leaked range map buckets
    Compact,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Trace {
    #[serde(default)]
    pub config: CacheConfig,
    #[serde(default)]
    pub programs: Vec<GuestProgram>,
    pub events: Vec<TraceEvent>,
}
