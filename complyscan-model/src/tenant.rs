use serde::{Deserialize, Serialize};

use crate::ids::TenantId;

/// The slice of a tenant record the scan engine depends on. Tenant CRUD lives
/// in a separate service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tenant {
    pub id: TenantId,
    pub name: String,
    #[serde(default = "Tenant::default_active")]
    pub active: bool,
    #[serde(default)]
    pub default_account_id: Option<String>,
    #[serde(default)]
    pub default_regions: Vec<String>,
}

impl Tenant {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: TenantId::new(id),
            name: name.into(),
            active: true,
            default_account_id: None,
            default_regions: Vec::new(),
        }
    }

    pub fn with_account(mut self, account_id: impl Into<String>) -> Self {
        self.default_account_id = Some(account_id.into());
        self
    }

    pub fn with_regions<I, S>(mut self, regions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.default_regions = regions.into_iter().map(Into::into).collect();
        self
    }

    const fn default_active() -> bool {
        true
    }
}
