//! Detection decisions for the live display: box deduplication, restricted
//! area classification, frame alert state and its debounce.

mod alert;
mod dedup;
mod result;
mod zone;

pub use alert::{AlertDecision, AlertMonitor, Banner, SubmitThrottle};
pub use dedup::{decide_class, gather_unique_boxes};
pub use result::{detections_from_rows, BoundingBox, ClassScore, Detection, UniqueBox};
pub use zone::{aggregate_alert_state, zone_state, AlertState, ZoneState};
