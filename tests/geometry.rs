//! Tests for geometry and sliding-fit modules

use deltaray::geometry::*;
use deltaray::{DetectorGeometry, Position, ReconstructionError, SlidingFit, View, WireGeometry};

#[test]
fn test_closest_queries() {
    let points = vec![Position::new(0.0, 0.0), Position::new(3.0, 4.0), Position::new(10.0, 0.0)];

    let p = Position::new(2.5, 4.0);
    assert_eq!(closest_position(&p, &points), Some(Position::new(3.0, 4.0)));
    assert!((closest_distance(&p, &points).unwrap() - 0.5).abs() < 1e-12);
    assert!(closest_distance(&p, &[]).is_none());

    let other = vec![Position::new(10.0, 2.0), Position::new(20.0, 0.0)];
    let (a, b) = closest_positions(&points, &other).unwrap();
    assert_eq!(a, Position::new(10.0, 0.0));
    assert_eq!(b, Position::new(10.0, 2.0));
    assert!((closest_distance_between(&points, &other).unwrap() - 2.0).abs() < 1e-12);
}

#[test]
fn test_line_segment_is_a_slab() {
    let lower = Position::new(0.0, 0.0);
    let upper = Position::new(10.0, 0.0);

    assert!(is_in_line_segment(&lower, &upper, &Position::new(5.0, 100.0)));
    assert!(is_in_line_segment(&lower, &upper, &Position::new(0.0, 0.0)));
    assert!(is_in_line_segment(&lower, &upper, &Position::new(10.0, -3.0)));
    assert!(!is_in_line_segment(&lower, &upper, &Position::new(10.1, 0.0)));
    assert!(!is_in_line_segment(&lower, &upper, &Position::new(-0.1, 0.0)));
}

#[test]
fn test_distance_to_line() {
    let start = Position::new(0.0, 0.0);
    let direction = Position::new(1.0, 1.0);
    let d = distance_to_line(&Position::new(1.0, 0.0), &start, &direction);
    assert!((d - std::f64::consts::FRAC_1_SQRT_2).abs() < 1e-12);

    assert!(is_close_to_line(&Position::new(5.0, 0.2), &start, &Position::new(1.0, 0.0), 0.3));
    assert!(!is_close_to_line(&Position::new(5.0, 0.4), &start, &Position::new(1.0, 0.0), 0.3));
}

#[test]
fn test_span_queries() {
    let points = vec![
        Position::new(0.0, 5.0),
        Position::new(1.0, 2.0),
        Position::new(2.0, 8.0),
        Position::new(3.0, 1.0),
    ];
    assert_eq!(span_x(&points), Some((0.0, 3.0)));
    assert_eq!(span_z(&points, 0.5, 2.5).unwrap(), Some((2.0, 8.0)));
    assert_eq!(span_z(&points, 10.0, 20.0).unwrap(), None);
    assert_eq!(average_z(&points, 0.0, 1.0).unwrap(), Some(3.5));
    assert!(span_x(&[]).is_none());
}

#[test]
fn test_span_with_inverted_bounds_is_invalid() {
    let points = vec![Position::new(0.0, 0.0)];
    assert!(matches!(
        span_z(&points, 2.0, 1.0),
        Err(ReconstructionError::InvalidParameter { .. })
    ));
    assert!(matches!(
        average_z(&points, 2.0, 1.0),
        Err(ReconstructionError::InvalidParameter { .. })
    ));
}

#[test]
fn test_profile_z_interpolates() {
    let points = vec![Position::new(0.0, 0.0), Position::new(1.0, 2.0)];
    assert!((profile_z(&points, 0.25, 1.0).unwrap() - 0.5).abs() < 1e-12);
    // One side only: mean of the window
    assert!((profile_z(&points, 1.5, 1.0).unwrap() - 2.0).abs() < 1e-12);
    assert!(profile_z(&points, 5.0, 1.0).is_none());
}

#[test]
fn test_wire_projection() {
    let geometry = WireGeometry::default();
    assert_eq!(geometry.project(View::U, 2.0, View::V, 3.0), Some(5.0));
    assert_eq!(geometry.project(View::W, 5.0, View::V, 3.0), Some(2.0));
    assert_eq!(geometry.project(View::W, 5.0, View::U, 2.0), Some(3.0));
    assert_eq!(geometry.project(View::U, 2.0, View::U, 3.0), None);

    assert!(geometry.merge_three_positions(2.0, 3.0, 5.0).abs() < 1e-12);
    let chi2 = geometry.merge_three_positions(2.0, 3.0, 6.0);
    assert!((chi2 - 1.0 / 3.0).abs() < 1e-12);

    let projected = geometry
        .project_position(View::U, &Position::new(1.0, 2.0), View::V, &Position::new(3.0, 3.0))
        .unwrap();
    assert_eq!(projected, Position::new(2.0, 5.0));
}

#[test]
fn test_view_helpers() {
    assert_eq!(View::U.others(), [View::V, View::W]);
    assert_eq!(View::W.others(), [View::U, View::V]);
    assert_eq!(View::U.third(View::W), Some(View::V));
    assert_eq!(View::V.third(View::V), None);
    assert_eq!(View::W.to_string(), "W");
}

#[test]
fn test_position_opening_angle() {
    let x_axis = Position::new(1.0, 0.0);
    let angle = Position::new(1.0, 1.0).opening_angle(&x_axis).to_degrees();
    assert!((angle - 45.0).abs() < 1e-9);
    let reversed = Position::new(-1.0, 0.0).opening_angle(&x_axis).to_degrees();
    assert!((reversed - 180.0).abs() < 1e-9);
    assert!(Position::ZERO.unit().is_none());
}

// ============================================================================
// Sliding fit
// ============================================================================

fn straight_line(n: usize, slope: f64) -> Vec<Position> {
    (0..n).map(|i| Position::new(i as f64 * 0.5, 3.0 + slope * i as f64 * 0.5)).collect()
}

#[test]
fn test_sliding_fit_straight_line() {
    let points = straight_line(41, 0.5);
    let fit = SlidingFit::new(&points, 5, 0.3).unwrap();

    let expected_length = (20.0f64.powi(2) + 10.0f64.powi(2)).sqrt();
    assert!((fit.length() - expected_length).abs() < 1e-6);

    for p in &points {
        assert!(fit.distance_to_fit(p) < 1e-6);
    }

    let direction = fit.fit_direction(fit.min_l());
    let expected = Position::new(2.0, 1.0).unit().unwrap();
    assert!(direction.dot(&expected).abs() > 1.0 - 1e-9);
}

#[test]
fn test_sliding_fit_endpoints() {
    let points = straight_line(21, 0.0);
    let fit = SlidingFit::new(&points, 3, 0.3).unwrap();

    let (min_end, max_end) = (fit.global_min_layer_position(), fit.global_max_layer_position());
    let xs = [min_end.x, max_end.x];
    assert!(xs.iter().any(|x| x.abs() < 1e-9));
    assert!(xs.iter().any(|x| (x - 10.0).abs() < 1e-9));
    assert!((min_end.z - 3.0).abs() < 1e-9 && (max_end.z - 3.0).abs() < 1e-9);

    // Directions point towards increasing l, from the min end to the max end
    let along = max_end - min_end;
    assert!(fit.global_min_layer_direction().dot(&along) > 0.0);
    assert!(fit.global_max_layer_direction().dot(&along) > 0.0);
}

#[test]
fn test_sliding_fit_rejects_bad_input() {
    assert!(SlidingFit::new(&[], 5, 0.3).is_none());
    assert!(SlidingFit::new(&straight_line(5, 1.0), 5, 0.0).is_none());
    assert!(SlidingFit::new(&straight_line(5, 1.0), 5, f64::NAN).is_none());
}

#[test]
fn test_sliding_fit_single_point() {
    let fit = SlidingFit::new(&[Position::new(1.0, 2.0)], 5, 0.3).unwrap();
    assert_eq!(fit.length(), 0.0);
    let p = fit.global_min_layer_position();
    assert!(p.distance(&Position::new(1.0, 2.0)) < 1e-9);
}
