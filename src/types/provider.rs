//! Provider and service-type identifiers.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::FetchError;

/// A cloud provider the core can fetch from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Aws,
    Azure,
    Gcp,
    Ibm,
    Alibaba,
}

impl Provider {
    /// All known providers, in declaration order.
    pub const ALL: [Provider; 5] = [
        Provider::Aws,
        Provider::Azure,
        Provider::Gcp,
        Provider::Ibm,
        Provider::Alibaba,
    ];

    /// Lowercase identifier used in keys, config tables and metric labels.
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Aws => "aws",
            Provider::Azure => "azure",
            Provider::Gcp => "gcp",
            Provider::Ibm => "ibm",
            Provider::Alibaba => "alibaba",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Provider {
    type Err = FetchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        Provider::ALL
            .into_iter()
            .find(|p| p.as_str() == lower)
            .ok_or_else(|| FetchError::Configuration(format!("unknown provider: {s}")))
    }
}

/// Logical kind of data being fetched. Drives TTL selection and rate-limit
/// bucketing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceType {
    Pricing,
    Compute,
    Storage,
    Database,
    AiMl,
    CostEstimation,
    Networking,
    Budget,
}

impl ServiceType {
    pub const ALL: [ServiceType; 8] = [
        ServiceType::Pricing,
        ServiceType::Compute,
        ServiceType::Storage,
        ServiceType::Database,
        ServiceType::AiMl,
        ServiceType::CostEstimation,
        ServiceType::Networking,
        ServiceType::Budget,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceType::Pricing => "pricing",
            ServiceType::Compute => "compute",
            ServiceType::Storage => "storage",
            ServiceType::Database => "database",
            ServiceType::AiMl => "ai_ml",
            ServiceType::CostEstimation => "cost_estimation",
            ServiceType::Networking => "networking",
            ServiceType::Budget => "budget",
        }
    }
}

impl fmt::Display for ServiceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ServiceType {
    type Err = FetchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        ServiceType::ALL
            .into_iter()
            .find(|t| t.as_str() == lower)
            .ok_or_else(|| FetchError::Configuration(format!("unknown service type: {s}")))
    }
}
