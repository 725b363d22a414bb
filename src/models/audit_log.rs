use serde::{Deserialize, Serialize};
use strum::{AsRefStr, EnumString};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ActorType {
    Admin,
    Creator,
    Viewer,
    System,
}

impl From<super::UserRole> for ActorType {
    fn from(role: super::UserRole) -> Self {
        match role {
            super::UserRole::Admin => ActorType::Admin,
            super::UserRole::Creator => ActorType::Creator,
            super::UserRole::Viewer => ActorType::Viewer,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, AsRefStr, EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum AuditAction {
    BootstrapAdmin,
    CreateUser,
    CreateApiKey,
    RevokeApiKey,
    CreateCatalogItem,
    UpdateCatalogItem,
    AddInclusion,
    RemoveInclusion,
    SetShareRatio,
    ClearShareRatio,
    ReverseTransaction,
    RunReconciliation,
    RedriveEvent,
    SubmitPayout,
    WithdrawPayout,
    ResolvePayout,
    CancelEntitlement,
    UpgradeEntitlement,
    StartProcessing,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditLog {
    pub id: String,
    pub timestamp: i64,
    pub actor_type: ActorType,
    pub actor_id: Option<String>,
    pub action: String,
    pub resource_type: String,
    pub resource_id: String,
    pub details: Option<serde_json::Value>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuditLogQuery {
    pub actor_id: Option<String>,
    pub action: Option<String>,
    pub resource_type: Option<String>,
    pub resource_id: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl AuditLogQuery {
    pub fn limit(&self) -> i64 {
        self.limit.unwrap_or(50).clamp(1, 100)
    }

    pub fn offset(&self) -> i64 {
        self.offset.unwrap_or(0).max(0)
    }
}
