//! Tests for lib.rs core types

use deltaray::{ClusterId, EventStore, HitId, ObjectStore, PfoId, Position, Span, View};

#[test]
fn test_position_arithmetic() {
    let a = Position::new(1.0, 2.0);
    let b = Position::new(4.0, 6.0);

    assert_eq!(a + b, Position::new(5.0, 8.0));
    assert_eq!(b - a, Position::new(3.0, 4.0));
    assert_eq!(a * 2.0, Position::new(2.0, 4.0));
    assert_eq!(-a, Position::new(-1.0, -2.0));
    assert_eq!(a.distance(&b), 5.0);
    assert_eq!(a.dot(&b), 16.0);
    assert_eq!(a.cross(&b), -2.0);

    let mut c = a;
    c += b;
    assert_eq!(c, Position::new(5.0, 8.0));
    assert!(!Position::new(f64::NAN, 0.0).is_finite());
}

#[test]
fn test_unit_vector() {
    let unit = Position::new(3.0, 4.0).unit().unwrap();
    assert!((unit.magnitude() - 1.0).abs() < 1e-12);
    assert!((unit.x - 0.6).abs() < 1e-12);
}

#[test]
fn test_span_from_positions() {
    let points = [Position::new(1.0, -2.0), Position::new(-3.0, 5.0), Position::new(0.0, 0.0)];
    let span = Span::from_positions(&points).unwrap();
    assert_eq!(span.min_x, -3.0);
    assert_eq!(span.max_z, 5.0);
    assert_eq!(span.width_x(), 4.0);
    assert_eq!(span.width_z(), 7.0);
    assert!(Span::from_positions(&Vec::<Position>::new()).is_none());
}

#[test]
fn test_handles_display_and_order() {
    assert_eq!(HitId(3).to_string(), "h3");
    assert_eq!(ClusterId(12).to_string(), "c12");
    assert_eq!(PfoId(0).to_string(), "p0");
    assert!(ClusterId(1) < ClusterId(2));
    assert_eq!(serde_json::to_string(&ClusterId(4)).unwrap(), "4");
}

#[test]
fn test_view_serialization() {
    assert_eq!(serde_json::to_string(&View::U).unwrap(), "\"U\"");
    let view: View = serde_json::from_str("\"W\"").unwrap();
    assert_eq!(view, View::W);
    assert_eq!(View::ALL.map(View::index), [0, 1, 2]);
}

#[test]
fn test_cluster_span_from_store() {
    let mut store = EventStore::new();
    let hits: Vec<_> = [(0.0, 1.0), (2.0, -1.0), (1.0, 4.0)]
        .iter()
        .map(|&(x, z)| store.add_hit(View::V, Position::new(x, z), 1.0, 0.5))
        .collect();
    let cluster = store.create_cluster(View::V, &hits).unwrap();

    let span = store.cluster_span(cluster).unwrap();
    assert_eq!((span.min_x, span.max_x, span.min_z, span.max_z), (0.0, 2.0, -1.0, 4.0));
    assert!(store.cluster_span(ClusterId(99)).is_none());
}
