use serde::{Deserialize, Serialize};

/// Search parameters accepted by every listing adapter
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchFilters {
    /// Minimum price (RUB)
    pub min_price: Option<i64>,
    /// Maximum price (RUB)
    pub max_price: Option<i64>,
    /// Room counts to include (1, 2, 3, ...)
    pub rooms: Option<Vec<u8>>,
}
