mod common;

use common::{seed_embedding, seed_enrolled_user, seed_event, seed_media, setup_test_db, unit_at_similarity};
use gather_face_backend::db::{query, writer};
use gather_face_backend::notify::{self, MemorySink};
use gather_face_backend::pipeline::identity::{match_clusters_to_users, record_face_matches};
use gather_face_backend::utils::config::ClusterParams;

#[test]
fn cluster_is_matched_when_mean_angle_similarity_clears_the_bar() {
    let (_tmp, _path, conn) = setup_test_db();
    let fx = seed_event(&conn);
    let params = ClusterParams::default();
    let sink = MemorySink::new();

    let user = writer::insert_user(&conn, "dana").unwrap();
    writer::insert_reference_embedding(&conn, user, "center", &[1.0, 0.0, 0.0]).unwrap();
    writer::insert_reference_embedding(&conn, user, "left", &unit_at_similarity(0.95)).unwrap();
    writer::insert_reference_embedding(&conn, user, "right", &unit_at_similarity(0.93)).unwrap();

    let cluster = writer::insert_cluster(&conn, Some(fx.event_id), &[1.0, 0.0, 0.0]).unwrap();

    let matched =
        match_clusters_to_users(&conn, fx.event_id, &[cluster], &params, &sink).unwrap();
    assert_eq!(matched, 1);
    assert_eq!(query::get_cluster(&conn, cluster).unwrap().unwrap().user_id, Some(user));

    let events = sink.events();
    assert!(events
        .iter()
        .any(|n| n.event == notify::CLUSTER_MATCHED_TO_USER && n.user_id == user));
    assert!(events
        .iter()
        .any(|n| n.event == notify::CLUSTER_USER_IDENTIFIED && n.user_id == fx.owner_id));
}

#[test]
fn one_outlier_angle_cannot_force_a_match() {
    let (_tmp, _path, conn) = setup_test_db();
    let fx = seed_event(&conn);
    let params = ClusterParams::default();
    let sink = MemorySink::new();

    // One perfect angle, one orthogonal: mean similarity 0.5, below 0.72.
    let user = writer::insert_user(&conn, "eli").unwrap();
    writer::insert_reference_embedding(&conn, user, "center", &[1.0, 0.0, 0.0]).unwrap();
    writer::insert_reference_embedding(&conn, user, "left", &[0.0, 1.0, 0.0]).unwrap();

    let cluster = writer::insert_cluster(&conn, Some(fx.event_id), &[1.0, 0.0, 0.0]).unwrap();

    let matched =
        match_clusters_to_users(&conn, fx.event_id, &[cluster], &params, &sink).unwrap();
    assert_eq!(matched, 0);
    assert_eq!(query::get_cluster(&conn, cluster).unwrap().unwrap().user_id, None);
    assert!(sink.events().is_empty());
}

#[test]
fn matching_without_enrolled_users_is_a_no_op() {
    let (_tmp, _path, conn) = setup_test_db();
    let fx = seed_event(&conn);
    let sink = MemorySink::new();

    let cluster = writer::insert_cluster(&conn, Some(fx.event_id), &[1.0, 0.0, 0.0]).unwrap();
    let matched = match_clusters_to_users(
        &conn,
        fx.event_id,
        &[cluster],
        &ClusterParams::default(),
        &sink,
    )
    .unwrap();
    assert_eq!(matched, 0);
    assert!(sink.events().is_empty());
}

#[test]
fn every_face_gets_a_ledger_row_matched_or_not() {
    let (_tmp, _path, conn) = setup_test_db();
    let fx = seed_event(&conn);
    let params = ClusterParams::default();
    let sink = MemorySink::new();

    let user = seed_enrolled_user(&conn, "farah", &[1.0, 0.0, 0.0]);
    writer::add_event_participant(&conn, fx.event_id, user, "approved").unwrap();

    let media = seed_media(&conn, fx.event_id, None);
    // distance 0.2 to the reference: matched
    seed_embedding(&conn, media, 0, &unit_at_similarity(0.8));
    // orthogonal, distance 1.0: unmatched, but still recorded
    seed_embedding(&conn, media, 1, &[0.0, 1.0, 0.0]);

    let outcome = record_face_matches(&conn, fx.event_id, media, &params, &sink).unwrap();
    assert_eq!(outcome.total, 2);
    assert_eq!(outcome.matched, 1);

    let rows = query::get_media_face_matches(&conn, media).unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].matched_user_id, Some(user));
    assert!(rows[0].is_participant);
    assert!((rows[0].distance.unwrap() - 0.2).abs() < 1e-3);
    assert_eq!(rows[1].matched_user_id, None);
    assert!(!rows[1].is_participant);

    let events = sink.events();
    assert!(events
        .iter()
        .any(|n| n.event == notify::FACE_MATCH_BATCH && n.user_id == user));
    assert!(events
        .iter()
        .any(|n| n.event == notify::FACE_MATCHING_COMPLETED && n.user_id == fx.owner_id));
}

#[test]
fn non_participant_match_is_flagged_as_such() {
    let (_tmp, _path, conn) = setup_test_db();
    let fx = seed_event(&conn);
    let sink = MemorySink::new();

    // Enrolled, but never approved for this event.
    let user = seed_enrolled_user(&conn, "gus", &[1.0, 0.0, 0.0]);

    let media = seed_media(&conn, fx.event_id, None);
    seed_embedding(&conn, media, 0, &unit_at_similarity(0.85));

    record_face_matches(&conn, fx.event_id, media, &ClusterParams::default(), &sink).unwrap();
    let rows = query::get_media_face_matches(&conn, media).unwrap();
    assert_eq!(rows[0].matched_user_id, Some(user));
    assert!(!rows[0].is_participant);
}

#[test]
fn ledger_rows_are_written_even_with_no_enrolled_users() {
    let (_tmp, _path, conn) = setup_test_db();
    let fx = seed_event(&conn);
    let sink = MemorySink::new();

    let media = seed_media(&conn, fx.event_id, None);
    seed_embedding(&conn, media, 0, &[0.3, 0.4, 0.5]);

    let outcome =
        record_face_matches(&conn, fx.event_id, media, &ClusterParams::default(), &sink).unwrap();
    assert_eq!(outcome.total, 1);
    assert_eq!(outcome.matched, 0);

    let rows = query::get_media_face_matches(&conn, media).unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].matched_user_id, None);
    assert!(rows[0].distance.is_none());
}
