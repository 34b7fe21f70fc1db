//! Plan dependency graph
//!
//! A plan's milestone dependencies come from an external agent in two
//! phases. Creating a plan-style asks the agent for them ([`agent`]); some
//! time later the agent posts the graph back ([`delivery`]), which is stored
//! with its START/END bookends and matched by name onto every style's
//! timeline rows. Nothing is held in memory between the two phases; the plan
//! id correlates them.

pub mod agent;
pub mod delivery;

pub use agent::{DependencyAgent, DependencyRequest, DependencyRequester, HttpDependencyAgent};
pub use delivery::{DeliveryOutcome, DependencyDelivery, DependencyPopulator};

use crate::payload::{lenient_i64, lenient_string};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// One row of a plan's dependency template
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct DependencyRow {
    #[serde(deserialize_with = "lenient_i64")]
    pub row_number: Option<i64>,
    #[serde(deserialize_with = "lenient_string")]
    pub department: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub action_description: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub short_description: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub share_with: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub page: Option<String>,
    pub days: Option<Value>,
    #[serde(deserialize_with = "lenient_string")]
    pub depends_on: Option<String>,
    pub duration: Option<Value>,
    #[serde(deserialize_with = "lenient_string")]
    pub duration_unit: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub relationship: Option<String>,
}

/// Synthetic first and last milestone of every plan
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bookend {
    pub name: &'static str,
    pub row_number: i64,
}

pub const START_DATE: Bookend = Bookend {
    name: "START DATE",
    row_number: 0,
};

pub const END_DATE: Bookend = Bookend {
    name: "END DATE",
    row_number: 99,
};

pub const BOOKEND_DEPARTMENT: &str = "PLAN";

impl Bookend {
    pub fn is_bookend_row(row_number: Option<i64>) -> bool {
        row_number == Some(START_DATE.row_number) || row_number == Some(END_DATE.row_number)
    }

    /// A delivered row carrying a bookend's name but not its ordinal
    pub fn shadows(&self, row: &DependencyRow) -> bool {
        row.row_number != Some(self.row_number)
            && row
                .action_description
                .as_deref()
                .is_some_and(|name| name.trim().eq_ignore_ascii_case(self.name))
    }

    pub fn dependency(&self) -> DependencyRow {
        DependencyRow {
            row_number: Some(self.row_number),
            department: Some(BOOKEND_DEPARTMENT.to_string()),
            action_description: Some(self.name.to_string()),
            short_description: Some(self.name.to_string()),
            days: Some(Value::from(0)),
            duration: Some(Value::from(0)),
            ..DependencyRow::default()
        }
    }

    /// Stable timeline id of this bookend on one plan-style
    pub fn timeline_id(&self, plan_style_id: &str) -> String {
        Uuid::new_v5(&Uuid::NAMESPACE_OID, format!("{plan_style_id}:{}", self.name).as_bytes()).to_string()
    }
}
