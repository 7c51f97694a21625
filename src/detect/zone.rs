use super::result::UniqueBox;

/// Where one box sits relative to the restricted right half.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ZoneState {
    /// Box centre lies left of the centre line.
    pub safe: bool,
    pub class_id: usize,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum AlertState {
    #[default]
    Normal,
    Warning,
    Clear,
}

impl AlertState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Normal => "NORMAL",
            Self::Warning => "WARNING",
            Self::Clear => "CLEAR",
        }
    }
}

pub fn zone_state(unique: &UniqueBox, center_x: f32) -> ZoneState {
    ZoneState {
        safe: unique.bbox.center_x() < center_x,
        class_id: unique.class_id,
    }
}

/// Frame-level state: WARNING on the first restricted box of the trigger
/// class, CLEAR if any box is restricted, NORMAL otherwise.
pub fn aggregate_alert_state(states: &[ZoneState], trigger_class_id: usize) -> AlertState {
    let mut restricted = false;
    for state in states.iter().filter(|s| !s.safe) {
        if state.class_id == trigger_class_id {
            return AlertState::Warning;
        }
        restricted = true;
    }
    if restricted {
        AlertState::Clear
    } else {
        AlertState::Normal
    }
}
