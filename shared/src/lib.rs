use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Error returned when a persisted status/kind string is not recognised.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

impl fmt::Display for UnknownVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown {} '{}'", self.kind, self.value)
    }
}

impl std::error::Error for UnknownVariant {}

macro_rules! string_enum {
    ($name:ident, $kind:literal, { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $text,)+
                }
            }

            pub fn all() -> &'static [$name] {
                &[$(Self::$variant),+]
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = UnknownVariant;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok(Self::$variant),)+
                    other => Err(UnknownVariant { kind: $kind, value: other.to_string() }),
                }
            }
        }
    };
}

// ===== Approvals =====

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
    TimedOut,
    Expired,
}

string_enum!(ApprovalStatus, "approval status", {
    Pending => "pending",
    Approved => "approved",
    Rejected => "rejected",
    TimedOut => "timed_out",
    Expired => "expired",
});

impl ApprovalStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

/// How many approvers have to agree. Recorded with the request and handed to
/// the durable engine; a single human decision resolves the request.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalType {
    #[default]
    Any,
    All,
    Majority,
}

string_enum!(ApprovalType, "approval type", {
    Any => "any",
    All => "all",
    Majority => "majority",
});

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ApprovalRequest {
    pub id: Uuid,
    pub execution_id: Uuid,
    pub rule_id: Option<Uuid>,
    pub action_name: String,
    pub approvers: Vec<Uuid>,
    pub approval_type: ApprovalType,
    pub status: ApprovalStatus,
    pub timeout_hours: Option<i32>,
    /// Opaque capability issued by the durable engine. Never parsed here.
    #[serde(skip_serializing)]
    pub resume_token: Option<String>,
    pub message: Option<String>,
    pub resolved_by: Option<Uuid>,
    pub resolution_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl ApprovalRequest {
    pub fn is_pending(&self) -> bool {
        self.status == ApprovalStatus::Pending
    }

    pub fn has_approver(&self, user_id: Uuid) -> bool {
        self.approvers.contains(&user_id)
    }
}

// ===== Alerts =====

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum AlertSeverity {
    Info,
    Warning,
    Error,
    Critical,
}

string_enum!(AlertSeverity, "alert severity", {
    Info => "info",
    Warning => "warning",
    Error => "error",
    Critical => "critical",
});

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AlertStatus {
    Active,
    Acknowledged,
    Dismissed,
    Resolved,
}

string_enum!(AlertStatus, "alert status", {
    Active => "active",
    Acknowledged => "acknowledged",
    Dismissed => "dismissed",
    Resolved => "resolved",
});

impl AlertStatus {
    /// Active or acknowledged alerts are still open for supersession.
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Active | Self::Acknowledged)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Alert {
    pub id: Uuid,
    pub alert_type: String,
    pub severity: AlertSeverity,
    pub title: String,
    pub message: String,
    pub context: serde_json::Value,
    pub source_entity_name: Option<String>,
    pub source_entity_id: Option<String>,
    pub source_rule_id: Option<Uuid>,
    pub status: AlertStatus,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Alert {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RecipientKind {
    User,
    Role,
}

string_enum!(RecipientKind, "recipient kind", {
    User => "user",
    Role => "role",
});

/// A user id (as text) or a role name entitled to see an alert.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AlertRecipient {
    pub id: Uuid,
    pub alert_id: Uuid,
    pub recipient_kind: RecipientKind,
    pub recipient_id: String,
}

impl AlertRecipient {
    pub fn user(alert_id: Uuid, user_id: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            alert_id,
            recipient_kind: RecipientKind::User,
            recipient_id: user_id.to_string(),
        }
    }

    pub fn role(alert_id: Uuid, role: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            alert_id,
            recipient_kind: RecipientKind::Role,
            recipient_id: role.into(),
        }
    }

    pub fn matches(&self, user_id: Uuid, roles: &[String]) -> bool {
        match self.recipient_kind {
            RecipientKind::User => self.recipient_id == user_id.to_string(),
            RecipientKind::Role => roles.iter().any(|r| r == &self.recipient_id),
        }
    }
}

#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AlertAcknowledgment {
    pub id: Uuid,
    pub alert_id: Uuid,
    pub acknowledged_by: Uuid,
    pub acknowledged_at: DateTime<Utc>,
    pub notes: Option<String>,
}

// ===== Notifications =====

#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub id: Uuid,
    pub user_id: Uuid,
    pub title: String,
    pub message: String,
    pub notification_type: String, // info, warning, error, success
    pub entity_type: Option<String>,
    pub entity_id: Option<String>,
    pub read: bool,
    pub created_at: DateTime<Utc>,
}
