use serde::{Deserialize, Serialize};

/// Trading venues the brokers route to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Exchange {
    Nse,
    Bse,
    Nfo,
    Mcx,
}

impl Exchange {
    pub fn all() -> [Exchange; 4] {
        [Exchange::Nse, Exchange::Bse, Exchange::Nfo, Exchange::Mcx]
    }
}

impl std::fmt::Display for Exchange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Exchange::Nse => write!(f, "NSE"),
            Exchange::Bse => write!(f, "BSE"),
            Exchange::Nfo => write!(f, "NFO"),
            Exchange::Mcx => write!(f, "MCX"),
        }
    }
}

impl std::str::FromStr for Exchange {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "NSE" => Ok(Exchange::Nse),
            "BSE" => Ok(Exchange::Bse),
            "NFO" => Ok(Exchange::Nfo),
            "MCX" => Ok(Exchange::Mcx),
            other => Err(format!("Unknown exchange: {}", other)),
        }
    }
}
