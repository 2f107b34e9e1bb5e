//! End-to-end allocation scenarios

use super::strip;
use crate::batch::{BatchError, BatchedMesh, DrawOptions, GeometryId, InstanceId, ResourceKind};
use crate::config::BatchConfig;
use crate::foundation::math::{Mat4, Vec3};

#[test]
fn test_delete_then_optimize_keeps_leading_range() {
    let mut batch = BatchedMesh::new(BatchConfig::default());
    let a = batch.add_geometry(&strip(100), Some(150), None).expect("geometry A");
    let b = batch.add_geometry(&strip(200), None, None).expect("geometry B");
    for _ in 0..3 {
        batch.add_instance(a).expect("instance of A");
    }
    let before = batch.get_geometry_range_at(a).expect("A is live");

    batch.delete_geometry(b).expect("delete B");
    assert_eq!(batch.hole_count(), 1);
    batch.optimize();

    let after = batch.get_geometry_range_at(a).expect("A is live");
    assert_eq!(after.vertex_start, before.vertex_start);
    assert_eq!(after.reserved_vertex_count, 150);
    assert_eq!(batch.hole_count(), 0);
    assert_eq!(batch.instance_count(), 3);
    assert_eq!(batch.get_geometry_range_at(b), None);
}

#[test]
fn test_replacement_larger_than_reservation_fails_cleanly() {
    let mut batch = BatchedMesh::new(BatchConfig::default());
    let a = batch.add_geometry(&strip(80), Some(100), Some(100)).expect("geometry A");
    let before = batch.get_geometry_range_at(a);
    let position_before = batch.store().position(10);

    let err = batch.set_geometry_at(a, &strip(150)).unwrap_err();
    assert_eq!(
        err,
        BatchError::RangeTooSmall { geometry_id: a.0, resource: ResourceKind::Vertices, requested: 150, reserved: 100 }
    );
    assert_eq!(batch.get_geometry_range_at(a), before);
    assert_eq!(batch.store().position(10), position_before);
}

#[test]
fn test_shrinking_below_live_data_fails() {
    let mut batch = BatchedMesh::new(BatchConfig::with_capacity(4, 64, 64));
    batch.add_geometry(&strip(64), None, None).expect("fills storage exactly");
    assert_eq!(batch.unused_vertex_count(), 0);

    let err = batch.set_geometry_size(32, 64).unwrap_err();
    assert_eq!(
        err,
        BatchError::InsufficientUnusedSpace { resource: ResourceKind::Vertices, requested: 32, in_use: 64 }
    );
    assert_eq!(batch.max_vertex_count(), 64);
}

#[test]
fn test_hidden_instances_skipped_but_counted() {
    let mut batch = BatchedMesh::new(BatchConfig::default());
    let a = batch.add_geometry(&strip(3), None, None).expect("geometry A");
    let ids: Vec<InstanceId> = (0..5).map(|_| batch.add_instance(a).expect("instance")).collect();
    batch.set_visible_at(ids[1], false).expect("hide");
    batch.set_visible_at(ids[3], false).expect("hide");

    let list = batch.build_draw_list(&DrawOptions::default());
    assert_eq!(list.descriptors().len(), 1);
    assert_eq!(list.descriptors()[0].instance_count, 3);
    assert_eq!(list.instance_ids(), &[ids[0], ids[2], ids[4]]);
    assert_eq!(list.hidden_count(), 2);
    assert_eq!(batch.instance_count(), 5);
}

#[test]
fn test_deleted_instance_id_is_reused() {
    let mut batch = BatchedMesh::new(BatchConfig::default());
    let a = batch.add_geometry(&strip(3), None, None).expect("geometry A");
    let ids: Vec<InstanceId> = (0..5).map(|_| batch.add_instance(a).expect("instance")).collect();
    for (i, &id) in ids.iter().enumerate() {
        let offset = i as f32;
        batch.set_matrix_at(id, &Mat4::new_translation(&Vec3::new(offset, 2.0 * offset, 0.5))).expect("matrix");
        batch.set_color_at(id, Vec3::new(0.1 * offset, 0.5, 1.0 - 0.1 * offset)).expect("color");
    }
    let snapshot: Vec<_> = ids
        .iter()
        .map(|&id| (batch.get_matrix_at(id).expect("matrix"), batch.get_color_at(id).expect("color")))
        .collect();

    batch.delete_instance(ids[2]).expect("delete");
    let reused = batch.add_instance(a).expect("instance");
    assert_eq!(reused, InstanceId(2));

    for i in [0, 1, 3, 4] {
        assert_eq!(batch.get_matrix_at(ids[i]), Ok(snapshot[i].0));
        assert_eq!(batch.get_color_at(ids[i]), Ok(snapshot[i].1));
    }
    assert_eq!(batch.get_matrix_at(reused), Ok(Mat4::identity()));
    assert_eq!(batch.get_color_at(reused), Ok(Vec3::new(1.0, 1.0, 1.0)));
}

#[test]
fn test_deleted_geometry_id_is_reused_after_older_ones_in_draw_order() {
    let mut batch = BatchedMesh::new(BatchConfig::default());
    let first = batch.add_geometry(&strip(3), None, None).expect("first");
    let second = batch.add_geometry(&strip(3), None, None).expect("second");
    batch.delete_geometry(first).expect("delete");
    let third = batch.add_geometry(&strip(4), None, None).expect("third");
    assert_eq!(third, GeometryId(0));

    let on_third = batch.add_instance(third).expect("instance");
    let on_second = batch.add_instance(second).expect("instance");
    let list = batch.build_draw_list(&DrawOptions::default());
    assert_eq!(list.instance_ids(), &[on_second, on_third]);
}
