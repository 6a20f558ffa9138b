use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Durable project record, owned by the record store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectRecord {
    pub id: String,
    pub owner_id: String,
    pub name: String,
    pub template_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ProjectRecord {
    pub fn new(
        owner_id: impl Into<String>,
        name: impl Into<String>,
        template_id: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            owner_id: owner_id.into(),
            name: name.into(),
            template_id: template_id.into(),
            created_at: now,
            updated_at: now,
        }
    }
}
