//! Platform registry.
//!
//! Enumerates the blockchains this service bridges. The workers only need a
//! coin handle from a platform; node RPC clients live elsewhere.

pub mod coin;

pub use coin::Coin;

use crate::error::PlatformError;

/// One supported blockchain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Platform {
    coin: Coin,
}

impl Platform {
    pub fn new(coin: Coin) -> Self {
        Self { coin }
    }

    pub fn coin(&self) -> &Coin {
        &self.coin
    }
}

/// Ordered, duplicate-free set of platforms.
#[derive(Debug, Clone, Default)]
pub struct PlatformRegistry {
    platforms: Vec<Platform>,
}

impl PlatformRegistry {
    /// Every registered coin.
    pub fn all() -> Self {
        Self {
            platforms: coin::ALL.iter().copied().map(Platform::new).collect(),
        }
    }

    /// The coins named by `handles`, in order. An empty list selects all.
    pub fn from_handles<S: AsRef<str>>(handles: &[S]) -> Result<Self, PlatformError> {
        if handles.is_empty() {
            return Ok(Self::all());
        }

        let mut platforms: Vec<Platform> = Vec::with_capacity(handles.len());
        for handle in handles {
            let handle = handle.as_ref().trim();
            let coin = coin::by_handle(handle)
                .ok_or_else(|| PlatformError::UnknownCoin(handle.to_string()))?;

            if !platforms.iter().any(|p| p.coin == coin) {
                platforms.push(Platform::new(coin));
            }
        }

        Ok(Self { platforms })
    }

    pub fn platforms(&self) -> &[Platform] {
        &self.platforms
    }

    pub fn len(&self) -> usize {
        self.platforms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.platforms.is_empty()
    }
}
