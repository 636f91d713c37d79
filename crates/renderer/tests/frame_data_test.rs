//! Integration tests for the GPU-free helpers behind a frame's uploads.

use ash::vk;
use glam::{Mat4, Vec3};

use lumen_core::{RendererConfig, TlasRebuildPolicy};
use lumen_renderer::acceleration::{INSTANCE_MASK, needs_rebuild, tlas_instances};
use lumen_renderer::descriptors::descriptor_set_count;
use lumen_renderer::frame_ring::{StorageKind, clamp_to_capacity, slot_index};
use lumen_renderer::passes::ui_load_op;
use lumen_renderer::targets::player_target_extents;
use lumen_scene::RenderItem3D;

#[test]
fn test_slots_cycle_for_every_frame_count() {
    for n in 1..=4 {
        for frame in 0..32u64 {
            assert_eq!(slot_index(frame, n), (frame % n as u64) as usize);
        }
    }
}

#[test]
fn test_serial_ring_always_uses_slot_zero() {
    assert!((0..10).all(|frame| slot_index(frame, 1) == 0));
}

#[test]
fn test_capacities_follow_config() {
    let config = RendererConfig {
        max_lights: 8,
        max_render_items_3d: 3,
        ..Default::default()
    };
    assert_eq!(StorageKind::Lights.capacity(&config), 8);
    assert_eq!(StorageKind::InstanceData.capacity(&config), 3);
    assert_eq!(StorageKind::Camera.capacity(&config), 1);

    let items = [1u32, 2, 3, 4, 5];
    assert_eq!(clamp_to_capacity("test", &items, 3), &[1, 2, 3]);
    assert!(clamp_to_capacity::<u32>("test", &[], 3).is_empty());
}

#[test]
fn test_descriptor_pool_grows_with_slots() {
    assert!(descriptor_set_count(1) < descriptor_set_count(3));
    assert_eq!(descriptor_set_count(3) - descriptor_set_count(2), 2);
}

#[test]
fn test_empty_then_full_draw_list_instances() {
    let empty = tlas_instances(&[], &[0xA0, 0xB0]).expect("empty list is valid");
    assert!(empty.is_empty());

    let items: Vec<RenderItem3D> = (0..4)
        .map(|i| RenderItem3D::new(Mat4::from_translation(Vec3::X * i as f32), i % 2))
        .collect();
    let full = tlas_instances(&items, &[0xA0, 0xB0]).expect("meshes exist");
    assert_eq!(full.len(), 4);
    assert!(full.iter().enumerate().all(|(i, inst)| inst.custom_index() == i as u32));
    assert!(full.iter().all(|inst| inst.mask() == INSTANCE_MASK));
    assert_eq!(full[3].blas_address, 0xB0);
    assert_eq!(full[3].transform[3], 3.0);

    assert!(needs_rebuild(TlasRebuildPolicy::OnChange, Some(&empty), &full));
    assert!(!needs_rebuild(TlasRebuildPolicy::OnChange, Some(&full), &full));
}

#[test]
fn test_ui_clear_flag_selects_load_op() {
    assert_eq!(ui_load_op(true), vk::AttachmentLoadOp::CLEAR);
    assert_eq!(ui_load_op(false), vk::AttachmentLoadOp::LOAD);
}

#[test]
fn test_resize_extents_for_any_size() {
    for (w, h) in [(1, 1), (640, 360), (1280, 720), (3840, 2160)] {
        let extents = player_target_extents(w, h, 2);
        assert_eq!((extents.present.width, extents.present.height), (w, h));
        assert_eq!(
            (extents.supersampled.width, extents.supersampled.height),
            (2 * w, 2 * h)
        );
    }
}

#[test]
fn test_invalid_config_is_rejected() {
    let config = RendererConfig {
        supersample_factor: 0,
        ..Default::default()
    };
    assert!(config.validate().is_err());
    assert!(RendererConfig::default().validate().is_ok());
}
