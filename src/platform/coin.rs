//! Supported coins.

use std::fmt;

/// A supported blockchain, identified by its short handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Coin {
    /// SLIP-44 coin type.
    pub id: u32,
    /// Short identifier used for topics, consumer groups and routing keys.
    pub handle: &'static str,
    pub symbol: &'static str,
    pub name: &'static str,
}

impl fmt::Display for Coin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.handle)
    }
}

pub const BITCOIN: Coin = Coin {
    id: 0,
    handle: "btc",
    symbol: "BTC",
    name: "Bitcoin",
};

pub const LITECOIN: Coin = Coin {
    id: 2,
    handle: "ltc",
    symbol: "LTC",
    name: "Litecoin",
};

pub const DOGECOIN: Coin = Coin {
    id: 3,
    handle: "doge",
    symbol: "DOGE",
    name: "Dogecoin",
};

pub const ETHEREUM: Coin = Coin {
    id: 60,
    handle: "eth",
    symbol: "ETH",
    name: "Ethereum",
};

pub const POLYGON: Coin = Coin {
    id: 966,
    handle: "polygon",
    symbol: "MATIC",
    name: "Polygon",
};

pub const SMART_CHAIN: Coin = Coin {
    id: 20000714,
    handle: "bsc",
    symbol: "BNB",
    name: "Smart Chain",
};

/// Every coin the service can run a worker for.
pub const ALL: [Coin; 6] = [BITCOIN, LITECOIN, DOGECOIN, ETHEREUM, POLYGON, SMART_CHAIN];

/// Look a coin up by handle.
pub fn by_handle(handle: &str) -> Option<Coin> {
    ALL.iter().copied().find(|coin| coin.handle == handle)
}
