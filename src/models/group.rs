use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Fallback owner for destinations without an explicit group.
pub const UNCATEGORIZED: &str = "Uncategorized";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Group {
    pub id: String,
    pub name: String,
    pub order_index: i64,
}

impl Group {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            order_index: 0,
        }
    }

    pub fn is_uncategorized(&self) -> bool {
        self.name == UNCATEGORIZED
    }
}
