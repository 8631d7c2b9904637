use chrono::{TimeZone, Utc};
use geoalarm::alarm::{AlarmDefinition, AlarmId, GeoPoint};
use geoalarm::constants::EARTH_RADIUS_METERS;
use geoalarm::testing::TestRig;
use geoalarm::tracker::{eta_minutes, format_distance, format_eta, haversine_meters};
use proptest::prelude::*;

const LAT: f64 = 13.7563;
const LON: f64 = 100.5018;

/// Generate valid latitude values
fn latitude_strategy() -> impl Strategy<Value = f64> {
    -90.0..=90.0
}

/// Generate valid longitude values
fn longitude_strategy() -> impl Strategy<Value = f64> {
    -180.0..=180.0
}

fn point_strategy() -> impl Strategy<Value = GeoPoint> {
    (latitude_strategy(), longitude_strategy()).prop_map(|(lat, lon)| GeoPoint::new(lat, lon))
}

/// A point `meters` due north of the test destination.
fn north_of_destination(meters: f64) -> GeoPoint {
    let degrees = (meters / EARTH_RADIUS_METERS).to_degrees();
    GeoPoint::new(LAT + degrees, LON)
}

#[cfg(test)]
mod haversine_tests {
    use super::*;

    proptest! {
        #[test]
        fn test_distance_to_self_is_zero(p in point_strategy()) {
            prop_assert!(haversine_meters(p, p).abs() < 1e-6);
        }

        #[test]
        fn test_distance_is_symmetric(a in point_strategy(), b in point_strategy()) {
            let ab = haversine_meters(a, b);
            let ba = haversine_meters(b, a);
            prop_assert!((ab - ba).abs() < 1e-6, "{ab} != {ba}");
        }

        #[test]
        fn test_distance_is_bounded_by_half_circumference(
            a in point_strategy(),
            b in point_strategy()
        ) {
            let d = haversine_meters(a, b);
            prop_assert!(d >= 0.0);
            prop_assert!(d <= std::f64::consts::PI * EARTH_RADIUS_METERS + 1e-3);
        }

        #[test]
        fn test_triangle_inequality(
            a in point_strategy(),
            b in point_strategy(),
            c in point_strategy()
        ) {
            let direct = haversine_meters(a, c);
            let via = haversine_meters(a, b) + haversine_meters(b, c);
            prop_assert!(direct <= via + 1e-3, "{direct} > {via}");
        }

        /// Along a meridian the distance is the arc length
        #[test]
        fn test_meridian_offsets_round_trip(meters in 0.0..50_000.0f64) {
            let d = haversine_meters(GeoPoint::new(LAT, LON), north_of_destination(meters));
            prop_assert!((d - meters).abs() < 0.01, "{d} vs {meters}");
        }
    }
}

#[cfg(test)]
mod formatting_tests {
    use super::*;

    proptest! {
        #[test]
        fn test_short_distances_render_in_meters(meters in 0.0..999.0f64) {
            let text = format_distance(meters);
            prop_assert!(text.ends_with(" m"), "{text}");
        }

        #[test]
        fn test_long_distances_render_in_kilometers(meters in 1_000.0..20_000_000.0f64) {
            let text = format_distance(meters);
            prop_assert!(text.ends_with(" km"), "{text}");
        }

        #[test]
        fn test_eta_is_monotonic(
            a in 0.0..100_000.0f64,
            b in 0.0..100_000.0f64,
            speed in 0.5..200.0f64
        ) {
            let (near, far) = if a <= b { (a, b) } else { (b, a) };
            prop_assert!(eta_minutes(near, speed) <= eta_minutes(far, speed));
        }

        #[test]
        fn test_eta_text_is_never_empty(minutes in 0u64..10_000) {
            prop_assert!(!format_eta(minutes).is_empty());
        }
    }
}

#[test]
fn test_live_card_rerenders_only_past_threshold() {
    let rig = TestRig::new(Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap());
    rig.engine
        .register_alarm(AlarmDefinition {
            id: AlarmId::from("A1"),
            label: "Office".to_string(),
            location: GeoPoint::new(LAT, LON),
            radius_meters: 150.0,
            recurring: false,
        })
        .unwrap();

    let first = rig.engine.on_location(north_of_destination(650.0));
    assert_eq!(first.len(), 1);

    // 50 m of movement is below the 200 m threshold
    assert!(rig.engine.on_location(north_of_destination(700.0)).is_empty());

    let moved = rig.engine.on_location(north_of_destination(400.0));
    assert_eq!(moved.len(), 1);
    assert_eq!(moved[0].label, "Office");
    assert_eq!(moved[0].distance_text, "400 m");
    assert_eq!(moved[0].eta, "5 min");

    assert_eq!(eta_minutes(416.0, 5.0), 5);
    assert_eq!(format_eta(eta_minutes(416.0, 5.0)), "5 min");
}
