use chrono::{DateTime, Duration, TimeZone, Utc};
use proptest::prelude::*;
use std::sync::Arc;
use stratus::solar::{clear_sky, ephemeris};
use stratus::{AlarmConfig, AlarmKind, AlarmState, ClearSkyModel, Direction};

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
}

fn state(persistence: u32, latch_hours: f64) -> AlarmState {
    let config = AlarmConfig::new("prop", "metric", AlarmKind::AboveThreshold, 0.0)
        .with_persistence(persistence)
        .with_latch_hours(latch_hours);
    AlarmState::new(Arc::new(config))
}

/// A model with a factor in its physical range: turbidity for Bras,
/// transmission coefficient for Ryan-Stolz.
fn model_strategy() -> impl Strategy<Value = (ClearSkyModel, f64)> {
    prop_oneof![
        (Just(ClearSkyModel::Bras), 0.5f64..8.0),
        (Just(ClearSkyModel::RyanStolz), 0.3f64..1.0),
    ]
}

proptest! {
    #[test]
    fn test_rising_exactly_at_persistence_count(
        persistence in 1u32..6,
        readings in prop::collection::vec(any::<bool>(), 1..200)
    ) {
        let mut alarm = state(persistence, 0.0);
        let mut consecutive = 0u32;
        let mut triggered = false;

        for (i, qualifies) in readings.into_iter().enumerate() {
            let value = if qualifies { 1.0 } else { -1.0 };
            let events = alarm.evaluate(value, t0() + Duration::seconds(i as i64));

            let expected = if qualifies {
                consecutive += 1;
                if !triggered && consecutive == persistence {
                    triggered = true;
                    Some(Direction::Rising)
                } else {
                    None
                }
            } else {
                consecutive = 0;
                if triggered {
                    triggered = false;
                    Some(Direction::Falling)
                } else {
                    None
                }
            };

            let directions: Vec<Direction> = events.iter().map(|e| e.direction).collect();
            prop_assert_eq!(directions, expected.into_iter().collect::<Vec<_>>());
            prop_assert_eq!(alarm.is_triggered(), triggered);
        }
    }

    #[test]
    fn test_latched_edges_alternate_and_respect_window(
        persistence in 1u32..4,
        latch_minutes in 1i64..180,
        steps in prop::collection::vec((any::<bool>(), 1i64..90, any::<bool>()), 1..150)
    ) {
        let latch = Duration::minutes(latch_minutes);
        let mut alarm = state(persistence, latch_minutes as f64 / 60.0);
        let mut now = t0();
        let mut last_direction = Direction::Falling;
        let mut last_qualifying = None;

        for (qualifies, gap_minutes, sweep) in steps {
            now += Duration::minutes(gap_minutes);
            let events = if sweep {
                alarm.clear(now)
            } else {
                let value = if qualifies { 5.0 } else { f64::NAN };
                let events = alarm.evaluate(value, now);
                if qualifies {
                    last_qualifying = Some(now);
                }
                events
            };

            prop_assert!(events.len() <= 1);
            for event in events {
                prop_assert_ne!(event.direction, last_direction);
                if event.direction == Direction::Falling {
                    let held_until = last_qualifying.map(|at| at + latch);
                    prop_assert!(held_until.map_or(true, |deadline| now > deadline));
                }
                last_direction = event.direction;
            }
        }
    }

    #[test]
    fn test_estimate_zero_below_horizon(
        elevation in -90.0f64..-0.0001,
        distance in 0.98f64..1.02,
        altitude in 0.0f64..4000.0,
        (model, factor) in model_strategy()
    ) {
        prop_assert_eq!(clear_sky::estimate(elevation, distance, factor, altitude, model), 0);
    }

    #[test]
    fn test_estimate_never_negative(
        elevation in -90.0f64..90.0,
        distance in 0.98f64..1.02,
        altitude in -100.0f64..6000.0,
        (model, factor) in model_strategy()
    ) {
        let value = clear_sky::estimate(elevation, distance, factor, altitude, model);
        prop_assert!(value >= 0);
        prop_assert!(value < 1500);
    }

    #[test]
    fn test_earth_sun_distance_bounded(seconds in 0i64..(150 * 365 * 86_400)) {
        let timestamp = Utc.with_ymd_and_hms(1950, 1, 1, 0, 0, 0).unwrap() + Duration::seconds(seconds);
        let distance = ephemeris::earth_sun_distance(timestamp);
        prop_assert!((0.98..=1.02).contains(&distance), "distance {} at {}", distance, timestamp);
    }

    #[test]
    fn test_position_is_finite(
        seconds in 0i64..(50 * 365 * 86_400),
        latitude in -90.0f64..90.0,
        longitude in -180.0f64..180.0
    ) {
        let timestamp = Utc.with_ymd_and_hms(2000, 1, 1, 0, 0, 0).unwrap() + Duration::seconds(seconds);
        let position = ephemeris::compute(timestamp, latitude, longitude);
        prop_assert!(position.elevation_deg.is_finite());
        prop_assert!((-91.0..=91.0).contains(&position.elevation_deg));
        prop_assert!((0.0..=360.0).contains(&position.azimuth_deg));
    }
}
