//! Typed mutations that can be queued while offline.
//!
//! Every queued record carries exactly one `Action`; the variant decides which
//! dispatch handler performs the network call. Payload fields are only read by
//! that handler.

use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Closed set of action kinds known to this client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ActionKind {
    QuestComplete,
    HealthSync,
    ProfileUpdate,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::QuestComplete => "QuestComplete",
            ActionKind::HealthSync => "HealthSync",
            ActionKind::ProfileUpdate => "ProfileUpdate",
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A quest marked done on the device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestCompletion {
    pub quest_id: String,
    /// Progress value recorded with the completion (reps, minutes, glasses...).
    pub value: f64,
    pub completed_at: DateTime<Utc>,
}

/// One day of aggregated health data as handed over by the platform provider.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct HealthSnapshot {
    pub date: NaiveDate,
    pub steps: u64,
    pub active_minutes: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sleep_hours: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub water_ml: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub calories: Option<u32>,
}

/// Partial profile update; unset fields are left untouched server side.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ProfilePatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub daily_goal: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
}

impl ProfilePatch {
    pub fn is_empty(&self) -> bool {
        self.display_name.is_none()
            && self.timezone.is_none()
            && self.daily_goal.is_none()
            && self.avatar_url.is_none()
    }
}

/// A mutation awaiting delivery, tagged by kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum Action {
    QuestComplete(QuestCompletion),
    HealthSync(HealthSnapshot),
    ProfileUpdate(ProfilePatch),
}

impl Action {
    pub fn kind(&self) -> ActionKind {
        match self {
            Action::QuestComplete(_) => ActionKind::QuestComplete,
            Action::HealthSync(_) => ActionKind::HealthSync,
            Action::ProfileUpdate(_) => ActionKind::ProfileUpdate,
        }
    }

    pub fn complete_quest(quest_id: impl Into<String>, value: f64) -> Self {
        Action::QuestComplete(QuestCompletion {
            quest_id: quest_id.into(),
            value,
            completed_at: Utc::now(),
        })
    }
}
