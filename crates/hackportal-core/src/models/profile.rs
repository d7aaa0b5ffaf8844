use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Profile of the signed-in hacker, as returned by `/api/action/profile`
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
pub struct UserProfile {
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub status: UserStatus,
    /// Saved application as the server stores it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[cfg_attr(feature = "ts", ts(type = "unknown"))]
    pub hacker_application: Option<Value>,
    #[serde(flatten)]
    #[cfg_attr(feature = "ts", ts(skip))]
    pub extra: Map<String, Value>,
}

impl UserProfile {
    /// Full name for display, falling back to the email address
    pub fn display_name(&self) -> String {
        let name = [self.first_name.as_deref(), self.last_name.as_deref()]
            .into_iter()
            .flatten()
            .filter(|part| !part.trim().is_empty())
            .collect::<Vec<_>>()
            .join(" ");
        if name.is_empty() {
            self.email.clone().unwrap_or_else(|| "unknown".to_string())
        } else {
            name
        }
    }

    /// Whether the hacker has confirmed their attendance
    pub fn is_confirmed(&self) -> bool {
        self.status.confirmed
    }
}

/// Application progress flags
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
pub struct UserStatus {
    pub applied: bool,
    pub accepted: bool,
    pub rejected: bool,
    pub waitlisted: bool,
    pub confirmed: bool,
    pub declined: bool,
}

impl UserStatus {
    /// One-word summary of where the application stands
    pub fn label(&self) -> &'static str {
        if self.confirmed {
            "confirmed"
        } else if self.declined {
            "declined"
        } else if self.accepted {
            "accepted"
        } else if self.waitlisted {
            "waitlisted"
        } else if self.rejected {
            "rejected"
        } else if self.applied {
            "applied"
        } else {
            "not applied"
        }
    }
}
