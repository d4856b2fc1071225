use serde::{Deserialize, Serialize};

/// Identity of a brokerage back-end.
///
/// `Paper` tags orders and positions produced by the simulation engine so
/// they flow through the same unified collections as live ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BrokerId {
    Zerodha,
    Upstox,
    AngelOne,
    Fyers,
    Paper,
}

impl BrokerId {
    /// All real brokers, in configuration order. Excludes `Paper`.
    pub fn all() -> [BrokerId; 4] {
        [
            BrokerId::Zerodha,
            BrokerId::Upstox,
            BrokerId::AngelOne,
            BrokerId::Fyers,
        ]
    }

    /// Short identifier used for env var names and wire keys.
    pub fn key(&self) -> &'static str {
        match self {
            BrokerId::Zerodha => "zerodha",
            BrokerId::Upstox => "upstox",
            BrokerId::AngelOne => "angelone",
            BrokerId::Fyers => "fyers",
            BrokerId::Paper => "paper",
        }
    }
}

impl std::fmt::Display for BrokerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BrokerId::Zerodha => write!(f, "Zerodha"),
            BrokerId::Upstox => write!(f, "Upstox"),
            BrokerId::AngelOne => write!(f, "Angel One"),
            BrokerId::Fyers => write!(f, "Fyers"),
            BrokerId::Paper => write!(f, "Paper"),
        }
    }
}

impl std::str::FromStr for BrokerId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "zerodha" => Ok(BrokerId::Zerodha),
            "upstox" => Ok(BrokerId::Upstox),
            "angelone" | "angel_one" | "angel-one" => Ok(BrokerId::AngelOne),
            "fyers" => Ok(BrokerId::Fyers),
            "paper" => Ok(BrokerId::Paper),
            other => Err(format!("Unknown broker: {}", other)),
        }
    }
}
