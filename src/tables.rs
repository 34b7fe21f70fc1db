//! Tables written outside the header descriptors

use crate::store::TableRef;

pub const TRACKING_FOLDER: TableRef = TableRef::new("ops", "tracking_folder");
pub const TRACKING_PLAN: TableRef = TableRef::new("ops", "tracking_plan");
pub const TRACKING_PLAN_STYLE: TableRef = TableRef::new("ops", "tracking_plan_style");
pub const TIMELINE: TableRef = TableRef::new("ops", "tracking_plan_style_timeline");
pub const TIMELINE_ASSIGNMENT: TableRef = TableRef::new("ops", "tracking_timeline_assignment");
pub const PLAN_DEPENDENCIES: TableRef = TableRef::new("ops", "tracking_plan_dependencies");
pub const APP_CONFIG: TableRef = TableRef::new("config", "app_config");
