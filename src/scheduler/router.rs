//! Priority routing.
//!
//! Pure mapping from job priorities onto the three dispatch tiers. No state,
//! no failure modes.

use std::collections::HashMap;

use crate::models::PriorityInfoResponse;

/// The three dispatch tiers. Workers drain higher tiers preferentially.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tier {
    High,
    Normal,
    Low,
}

impl Tier {
    /// Map a job priority onto its tier: 4-5 high, 2-3 normal, 1 low.
    pub fn route(priority: i32) -> Self {
        if priority >= 4 {
            Self::High
        } else if priority >= 2 {
            Self::Normal
        } else {
            Self::Low
        }
    }

    /// Named queue the tier dispatches through.
    pub fn queue_name(&self) -> &'static str {
        match self {
            Self::High => "high_priority",
            Self::Normal => "normal_priority",
            Self::Low => "low_priority",
        }
    }

    /// Human-readable description for introspection endpoints.
    pub fn description(&self) -> &'static str {
        match self {
            Self::High => "Urgent jobs (priority 4-5) - processed first",
            Self::Normal => "Standard jobs (priority 2-3) - default processing",
            Self::Low => "Background jobs (priority 1) - processed when idle",
        }
    }

    /// All tiers in drain order, highest first.
    pub fn all() -> [Tier; 3] {
        [Self::High, Self::Normal, Self::Low]
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.queue_name())
    }
}

/// Build the full priority-queue configuration view.
pub fn priority_info() -> PriorityInfoResponse {
    let mut priority_mapping = HashMap::new();
    for priority in 1..=5 {
        priority_mapping.insert(
            priority.to_string(),
            Tier::route(priority).queue_name().to_string(),
        );
    }

    let mut description = HashMap::new();
    for tier in Tier::all() {
        description.insert(tier.queue_name().to_string(), tier.description().to_string());
    }

    PriorityInfoResponse {
        priority_mapping,
        queue_order: Tier::all()
            .iter()
            .map(|t| t.queue_name().to_string())
            .collect(),
        description,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_mapping() {
        assert_eq!(Tier::route(5), Tier::High);
        assert_eq!(Tier::route(4), Tier::High);
        assert_eq!(Tier::route(3), Tier::Normal);
        assert_eq!(Tier::route(2), Tier::Normal);
        assert_eq!(Tier::route(1), Tier::Low);
    }

    #[test]
    fn test_queue_names() {
        assert_eq!(Tier::route(5).queue_name(), "high_priority");
        assert_eq!(Tier::route(3).queue_name(), "normal_priority");
        assert_eq!(Tier::route(1).queue_name(), "low_priority");
    }

    #[test]
    fn test_priority_info_covers_all_levels() {
        let info = priority_info();
        assert_eq!(info.priority_mapping.len(), 5);
        assert_eq!(info.priority_mapping["5"], "high_priority");
        assert_eq!(info.priority_mapping["1"], "low_priority");
        assert_eq!(
            info.queue_order,
            vec!["high_priority", "normal_priority", "low_priority"]
        );
        assert_eq!(info.description.len(), 3);
    }
}
