use serde::{Deserialize, Serialize};

/// The kind of aggregate an event belongs to.
///
/// Every event's `aggregate_id` resolves to exactly one of these; the pair
/// `(aggregate_type, aggregate_id)` names a stream.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AggregateType {
    Party,
    Agreement,
    Asset,
    Container,
    ApiKey,
    Role,
    Workflow,
    /// Audit decisions and other infrastructure-emitted facts.
    System,
}

impl AggregateType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AggregateType::Party => "party",
            AggregateType::Agreement => "agreement",
            AggregateType::Asset => "asset",
            AggregateType::Container => "container",
            AggregateType::ApiKey => "api_key",
            AggregateType::Role => "role",
            AggregateType::Workflow => "workflow",
            AggregateType::System => "system",
        }
    }
}

impl core::fmt::Display for AggregateType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for AggregateType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "party" => Ok(AggregateType::Party),
            "agreement" => Ok(AggregateType::Agreement),
            "asset" => Ok(AggregateType::Asset),
            "container" => Ok(AggregateType::Container),
            "api_key" => Ok(AggregateType::ApiKey),
            "role" => Ok(AggregateType::Role),
            "workflow" => Ok(AggregateType::Workflow),
            "system" => Ok(AggregateType::System),
            other => Err(format!("unknown aggregate type '{other}'")),
        }
    }
}
