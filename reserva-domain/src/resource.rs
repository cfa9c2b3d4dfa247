use chrono::{NaiveTime, Weekday};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A bookable entity: a room, a piece of equipment, a service.
///
/// Resources are read-only from the engine's perspective; management
/// operations live elsewhere.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Resource {
    pub id: Uuid,
    pub name: String,
    pub capacity: i32,
    pub hourly_rate_cents: i64,
    pub rules: Vec<AvailabilityRule>,
    pub min_duration_minutes: i64,
    pub max_duration_minutes: i64,
    pub min_lead_time_minutes: i64,
}

/// Weekly opening window. A resource's effective open hours for a weekday
/// are the union of its `available` rules for that weekday.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AvailabilityRule {
    pub weekday: Weekday,
    pub opens_at: NaiveTime,
    pub closes_at: NaiveTime,
    pub available: bool,
}

impl AvailabilityRule {
    /// A window must lie fully inside `[opens_at, closes_at)` of one rule.
    pub fn contains(&self, start: NaiveTime, end: NaiveTime) -> bool {
        start >= self.opens_at && end <= self.closes_at
    }
}

impl Resource {
    pub fn open_rules(&self, weekday: Weekday) -> impl Iterator<Item = &AvailabilityRule> {
        self.rules
            .iter()
            .filter(move |rule| rule.available && rule.weekday == weekday)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(weekday: Weekday, opens: (u32, u32), closes: (u32, u32)) -> AvailabilityRule {
        AvailabilityRule {
            weekday,
            opens_at: NaiveTime::from_hms_opt(opens.0, opens.1, 0).unwrap(),
            closes_at: NaiveTime::from_hms_opt(closes.0, closes.1, 0).unwrap(),
            available: true,
        }
    }

    #[test]
    fn open_rules_filters_weekday_and_flag() {
        let mut closed = rule(Weekday::Tue, (9, 0), (17, 0));
        closed.available = false;

        let resource = Resource {
            id: Uuid::new_v4(),
            name: "Studio A".to_string(),
            capacity: 1,
            hourly_rate_cents: 5000,
            rules: vec![rule(Weekday::Mon, (9, 0), (17, 0)), closed],
            min_duration_minutes: 30,
            max_duration_minutes: 480,
            min_lead_time_minutes: 0,
        };

        assert_eq!(resource.open_rules(Weekday::Mon).count(), 1);
        assert_eq!(resource.open_rules(Weekday::Tue).count(), 0);
    }

    #[test]
    fn rule_containment_is_half_open() {
        let rule = rule(Weekday::Mon, (9, 0), (17, 0));
        let t = |h, m| NaiveTime::from_hms_opt(h, m, 0).unwrap();

        assert!(rule.contains(t(9, 0), t(17, 0)));
        assert!(rule.contains(t(10, 30), t(12, 0)));
        assert!(!rule.contains(t(8, 30), t(10, 0)));
        assert!(!rule.contains(t(16, 0), t(17, 30)));
    }
}
