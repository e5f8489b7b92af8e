//! Integration tests for the three-context frame pipeline
//!
//! Drives `HmdDevice` against `MockCompositor` and checks:
//! - Frame lifecycle across game, render and submission contexts
//! - Frame numbering and duplicate-dispatch guards
//! - Layer merge, ordering and copy-on-write descriptors
//! - Compositor failures, device loss and shutdown

use std::sync::Arc;

use glam::{Quat, Vec2, Vec3};
use xrpipe_core::{
    CompositorCall, DeviceDescription, DeviceStatus, Extent, FramePipeline, HmdDevice, LayerDesc,
    LayerShape, MockCompositor, PipelineConfig, ShowFlags, StatusCell, VrError,
};

fn setup_with(config: PipelineConfig, description: DeviceDescription) -> (Arc<MockCompositor>, HmdDevice) {
    let mock = Arc::new(MockCompositor::new());
    let mut device = HmdDevice::new(mock.clone(), description, config);
    device.init().expect("device init");
    (mock, device)
}

fn setup() -> (Arc<MockCompositor>, HmdDevice) {
    setup_with(PipelineConfig::default(), DeviceDescription::default())
}

fn quad() -> LayerDesc {
    LayerDesc::quad(Vec2::new(100.0, 50.0), Extent::new(256, 128))
}

#[test]
fn test_single_frame_end_to_end() {
    let (mock, mut device) = setup();

    assert!(device.on_game_tick().unwrap());
    assert!(device.on_render_dispatch().unwrap());
    assert!(device.on_submission_complete().unwrap());
    assert!(device.on_render_complete().unwrap());
    assert!(device.on_game_tick_end().unwrap());

    let active = device.active_frames().unwrap();
    assert!(active.is_idle(), "frames still active: {active:?}");
    assert_eq!(device.next_frame_number().unwrap(), 2);

    let calls = mock.calls();
    assert!(calls.contains(&CompositorCall::WaitForFrame(1)));
    assert!(calls.contains(&CompositorCall::AdvanceSimulation(1)));
    assert!(calls.contains(&CompositorCall::BeginFrame(1)));
    assert!(calls.contains(&CompositorCall::EndFrame {
        frame: 1,
        layers: vec![0]
    }));

    let stats = device.stats().unwrap();
    assert_eq!(stats.frames_started, 1);
    assert_eq!(stats.frames_rendered, 1);
    assert_eq!(stats.frames_submitted, 1);
    assert_eq!(stats.invariant_violations, 0);
}

#[test]
fn test_begin_precedes_end_for_each_frame() {
    let (mock, mut device) = setup();
    for _ in 0..5 {
        device.run_frame().unwrap();
    }
    device.wait_idle().unwrap();

    let order: Vec<CompositorCall> = mock
        .calls()
        .into_iter()
        .filter(|c| {
            matches!(
                c,
                CompositorCall::BeginFrame(_) | CompositorCall::EndFrame { .. }
            )
        })
        .collect();
    assert_eq!(order.len(), 10);
    for (i, pair) in order.chunks(2).enumerate() {
        let n = i as u64 + 1;
        assert_eq!(pair[0], CompositorCall::BeginFrame(n));
        assert!(matches!(pair[1], CompositorCall::EndFrame { frame, .. } if frame == n));
    }
}

#[test]
fn test_game_tick_is_idempotent() {
    let (_mock, mut device) = setup();
    assert!(device.on_game_tick().unwrap());
    assert!(!device.on_game_tick().unwrap());
    assert_eq!(device.active_frames().unwrap().game, Some(1));
    assert!(device.on_game_tick_end().unwrap());
    assert!(!device.on_game_tick_end().unwrap());
}

#[test]
fn test_frame_numbers_strictly_increase() {
    let (_mock, mut device) = setup();
    let mut last = 0;
    for i in 0..20 {
        device.on_game_tick().unwrap();
        let current = device.active_frames().unwrap().game.unwrap();
        assert!(current > last);
        last = current;
        // Render every other tick.
        if i % 2 == 0 {
            device.on_render_dispatch().unwrap();
            device.on_submission_complete().unwrap();
            device.on_render_complete().unwrap();
        }
        device.on_game_tick_end().unwrap();
    }
}

#[test]
fn test_same_frame_not_dispatched_twice() {
    let (mock, mut device) = setup();
    device.on_game_tick().unwrap();
    device.on_game_tick_end().unwrap();
    device.on_game_tick().unwrap();
    device.on_game_tick_end().unwrap();

    assert!(device.on_render_dispatch().unwrap());
    device.on_submission_complete().unwrap();
    device.on_render_complete().unwrap();
    assert!(!device.on_render_dispatch().unwrap());
    device.wait_idle().unwrap();

    assert_eq!(mock.submitted_frames(), vec![2]);
}

#[test]
fn test_stages_pipeline_across_frames() {
    let (_mock, mut device) = setup();
    device.on_game_tick().unwrap();
    device.on_render_dispatch().unwrap();
    device.on_render_complete().unwrap();
    device.on_game_tick_end().unwrap();

    // Frame 2 starts while frame 1 is still with the submission context.
    device.on_game_tick().unwrap();
    let active = device.active_frames().unwrap();
    assert_eq!(active.game, Some(2));
    assert_eq!(active.render, None);
    assert_eq!(active.submission, Some(1));

    device.on_submission_complete().unwrap();
    assert!(device.on_render_dispatch().unwrap());
    device.on_submission_complete().unwrap();
    device.on_render_complete().unwrap();
    device.on_game_tick_end().unwrap();
    assert!(device.active_frames().unwrap().is_idle());
}

#[test]
fn test_render_dispatch_while_submission_busy() {
    let (mock, mut device) = setup();
    device.on_game_tick().unwrap();
    device.on_render_dispatch().unwrap();
    device.on_render_complete().unwrap();
    device.on_game_tick_end().unwrap();

    // Frame 2 is dispatched and fully rendered before frame 1 is submitted.
    device.on_game_tick().unwrap();
    assert!(device.on_render_dispatch().unwrap());
    let active = device.active_frames().unwrap();
    assert_eq!(active.render, Some(2));
    assert_eq!(active.submission, Some(1));
    device.on_render_complete().unwrap();

    device.on_submission_complete().unwrap();
    assert_eq!(device.active_frames().unwrap().submission, Some(2));
    device.on_submission_complete().unwrap();
    device.on_game_tick_end().unwrap();

    assert!(device.active_frames().unwrap().is_idle());
    assert_eq!(mock.submitted_frames(), vec![1, 2]);
    let order: Vec<CompositorCall> = mock
        .calls()
        .into_iter()
        .filter(|c| {
            matches!(
                c,
                CompositorCall::BeginFrame(_) | CompositorCall::EndFrame { .. }
            )
        })
        .collect();
    assert_eq!(
        order,
        vec![
            CompositorCall::BeginFrame(1),
            CompositorCall::EndFrame {
                frame: 1,
                layers: vec![0]
            },
            CompositorCall::BeginFrame(2),
            CompositorCall::EndFrame {
                frame: 2,
                layers: vec![0]
            },
        ]
    );
    assert_eq!(device.stats().unwrap().invariant_violations, 0);
}

#[test]
fn test_pipelined_frames_stay_one_behind() {
    let (mock, mut device) = setup();
    device.on_game_tick().unwrap();
    device.on_render_dispatch().unwrap();
    device.on_render_complete().unwrap();
    device.on_game_tick_end().unwrap();

    device.on_game_tick().unwrap();
    device.on_render_dispatch().unwrap();
    device.on_submission_complete().unwrap();
    device.on_render_complete().unwrap();
    device.on_game_tick_end().unwrap();

    // Frame 3 is staged behind frame 2 and released by its completion.
    device.run_frame().unwrap();
    assert_eq!(device.active_frames().unwrap().submission, Some(3));
    device.on_submission_complete().unwrap();
    device.wait_idle().unwrap();
    assert_eq!(mock.submitted_frames(), vec![1, 2, 3]);
    assert!(device.active_frames().unwrap().is_idle());
}

fn pipeline_with_render_frame() -> (Arc<MockCompositor>, FramePipeline) {
    let mock = Arc::new(MockCompositor::new());
    let mut pipeline = FramePipeline::new(
        mock.clone(),
        DeviceDescription::default(),
        &PipelineConfig::default(),
        StatusCell::default(),
    )
    .unwrap();
    assert!(pipeline.start_game_frame());
    assert!(pipeline.start_render_frame().unwrap());
    (mock, pipeline)
}

#[cfg(debug_assertions)]
#[test]
#[should_panic(expected = "pipeline invariant violated")]
fn test_second_submission_frame_is_fatal_in_debug() {
    let (_mock, mut pipeline) = pipeline_with_render_frame();
    assert!(pipeline.start_rhi_frame().unwrap());
    let _ = pipeline.start_rhi_frame();
}

#[cfg(not(debug_assertions))]
#[test]
fn test_second_submission_frame_is_skipped_in_release() {
    let (mock, mut pipeline) = pipeline_with_render_frame();
    assert!(pipeline.start_rhi_frame().unwrap());
    assert!(!pipeline.start_rhi_frame().unwrap());
    assert_eq!(pipeline.stats().invariant_violations, 1);

    assert!(pipeline.finish_rhi_frame().unwrap());
    assert!(pipeline.finish_render_frame().unwrap());
    pipeline.wait_idle().unwrap();
    assert_eq!(mock.submitted_frames(), vec![1]);
}

#[test]
fn test_unvalidated_config_is_normalized_at_init() {
    let config = PipelineConfig {
        pixel_density: 1.2,
        pixel_density_min: 1.5,
        pixel_density_max: 1.0,
        ..PipelineConfig::default()
    };
    let (_mock, mut device) = setup_with(config, DeviceDescription::default());
    let settings = device.settings().unwrap();
    assert_eq!(
        (settings.pixel_density_min, settings.pixel_density_max),
        (1.0, 1.5)
    );
    assert_eq!(settings.pixel_density, 1.2);
    device.run_frame().unwrap();

    let invalid = PipelineConfig {
        pixel_density_max: f32::NAN,
        ..PipelineConfig::default()
    };
    let mut device = HmdDevice::new(
        Arc::new(MockCompositor::new()),
        DeviceDescription::default(),
        invalid,
    );
    assert!(matches!(device.init(), Err(VrError::Config(_))));
    assert!(!device.is_initialized());
}

#[test]
fn test_non_finite_density_is_ignored() {
    let (_mock, mut device) = setup();
    let before = device.settings().unwrap();
    device.set_pixel_density(f32::NAN).unwrap();
    device.run_frame().unwrap();

    let after = device.settings().unwrap();
    assert_eq!(after.pixel_density, before.pixel_density);
    assert_eq!(after.render_target_size, before.render_target_size);
}

#[test]
fn test_begin_failure_does_not_stall_pipeline() {
    let (mock, mut device) = setup();
    mock.fail_begin_on(1);

    device.run_frame().unwrap();
    assert!(device.on_game_tick().unwrap());
    assert_eq!(device.active_frames().unwrap().game, Some(2));
    device.on_render_dispatch().unwrap();
    device.on_submission_complete().unwrap();
    device.on_render_complete().unwrap();
    device.on_game_tick_end().unwrap();
    device.wait_idle().unwrap();

    assert_eq!(mock.submitted_frames(), vec![2]);
    let stats = device.stats().unwrap();
    assert_eq!(stats.begin_failures, 1);
    assert_eq!(stats.frames_submitted, 1);
    assert!(device.active_frames().unwrap().is_idle());
}

#[test]
fn test_end_failure_still_releases_frame() {
    let (mock, mut device) = setup();
    mock.fail_end_on(1);
    device.run_frame().unwrap();
    device.run_frame().unwrap();
    device.wait_idle().unwrap();

    assert_eq!(device.stats().unwrap().end_failures, 1);
    assert_eq!(mock.submitted_frames(), vec![2]);
    assert!(device.active_frames().unwrap().is_idle());
}

#[test]
fn test_submission_order_by_priority_then_id() {
    let (mock, mut device) = setup();
    let ids: Vec<u32> = (0..7).map(|_| device.create_layer(quad()).unwrap()).collect();
    assert_eq!(ids, vec![1, 2, 3, 4, 5, 6, 7]);
    for id in [2, 4, 5, 6] {
        assert!(device.destroy_layer(id).unwrap());
    }

    let eye = device.layer_desc(0).unwrap().with_priority(-10);
    device.set_layer_desc(0, eye).unwrap();
    device.set_layer_desc(3, quad().with_priority(5)).unwrap();
    device.set_layer_desc(7, quad().with_priority(5)).unwrap();
    device.set_layer_desc(1, quad().with_priority(0)).unwrap();

    device.run_frame().unwrap();
    device.wait_idle().unwrap();

    let submissions = mock.submissions();
    let order: Vec<u32> = submissions[0].1.iter().map(|l| l.layer_id).collect();
    assert_eq!(order, vec![0, 1, 3, 7]);
}

#[test]
fn test_unchanged_layers_are_not_reinitialized() {
    let (mock, mut device) = setup();
    device.create_layer(quad()).unwrap();

    device.run_frame().unwrap();
    device.wait_idle().unwrap();
    let first = device.stats().unwrap();
    assert_eq!(first.layers_fresh, 2);

    device.run_frame().unwrap();
    device.wait_idle().unwrap();
    let second = device.stats().unwrap();
    assert_eq!(second.layers_fresh, first.layers_fresh);
    assert_eq!(second.layers_reused, 2);
    assert_eq!(mock.created_swapchains(), 2);
    assert_eq!(device.render_layer_ids().unwrap(), vec![0, 1]);
}

#[test]
fn test_in_flight_frame_keeps_old_descriptor() {
    let (mock, mut device) = setup();
    let id = device.create_layer(quad()).unwrap();

    device.on_game_tick().unwrap();
    device.on_render_dispatch().unwrap();
    device
        .set_layer_desc(id, LayerDesc::quad(Vec2::new(400.0, 50.0), Extent::new(256, 128)))
        .unwrap();
    device.on_submission_complete().unwrap();
    device.on_render_complete().unwrap();
    device.on_game_tick_end().unwrap();
    device.run_frame().unwrap();
    device.wait_idle().unwrap();

    let submissions = mock.submissions();
    let size_of = |frame: usize| {
        submissions[frame]
            .1
            .iter()
            .find(|l| l.layer_id == id)
            .map(|l| l.shape)
    };
    assert_eq!(
        size_of(0),
        Some(LayerShape::Quad {
            size: Vec2::new(1.0, 0.5)
        })
    );
    assert_eq!(
        size_of(1),
        Some(LayerShape::Quad {
            size: Vec2::new(4.0, 0.5)
        })
    );
}

#[test]
fn test_invalid_desc_keeps_previous() {
    let (_mock, mut device) = setup();
    let id = device.create_layer(quad()).unwrap();
    let bad = LayerDesc::cylinder(-1.0, 1.0, 1.0, Extent::new(8, 8));
    assert!(matches!(
        device.set_layer_desc(id, bad),
        Err(VrError::InvalidLayer(_))
    ));
    assert_eq!(device.layer_desc(id).unwrap(), quad());
    assert!(matches!(
        device.set_layer_desc(42, quad()),
        Err(VrError::UnknownLayer(42))
    ));
}

#[test]
fn test_destroyed_layer_releases_swapchain() {
    let (mock, mut device) = setup();
    let id = device.create_layer(quad()).unwrap();
    device.run_frame().unwrap();
    device.wait_idle().unwrap();
    assert_eq!(mock.live_swapchains(), 2);

    device.destroy_layer(id).unwrap();
    device.run_frame().unwrap();
    device.wait_idle().unwrap();
    assert_eq!(mock.live_swapchains(), 1);
    assert_eq!(device.render_layer_ids().unwrap(), vec![0]);
}

#[test]
fn test_cubemap_rejected_when_unsupported() {
    let description = DeviceDescription {
        supports_cubemap_layers: false,
        ..DeviceDescription::default()
    };
    let (_mock, mut device) = setup_with(PipelineConfig::default(), description);
    assert!(matches!(
        device.create_layer(LayerDesc::cubemap(512)),
        Err(VrError::InvalidLayer(_))
    ));
}

#[test]
fn test_splash_suppresses_compositor_calls() {
    let (mock, mut device) = setup();
    device.set_splash_visible(true).unwrap();
    device.run_frame().unwrap();
    device.wait_idle().unwrap();

    assert!(mock.calls().iter().all(|c| matches!(
        c,
        CompositorCall::CreateSwapchain(_) | CompositorCall::DestroySwapchain(_)
    )));
    assert_eq!(device.stats().unwrap().frames_rendered, 1);

    device.set_splash_visible(false).unwrap();
    device.run_frame().unwrap();
    device.wait_idle().unwrap();
    assert_eq!(mock.submitted_frames(), vec![2]);
}

#[test]
fn test_rendering_disabled_skips_submission() {
    let (mock, mut device) = setup();
    device.set_show_flags(ShowFlags::empty()).unwrap();
    device.run_frame().unwrap();
    device.wait_idle().unwrap();
    assert!(mock.submitted_frames().is_empty());
    assert!(device.active_frames().unwrap().is_idle());
}

#[test]
fn test_device_lost_reported_once() {
    let (mock, mut device) = setup();
    mock.lose_device_on_end(1);
    device.run_frame().unwrap();
    device.wait_idle().unwrap();

    assert!(matches!(device.status(), DeviceStatus::Lost(_)));
    assert!(device.take_device_lost().is_some());
    assert!(device.take_device_lost().is_none());

    // The pipeline keeps running until the host reinitializes.
    device.run_frame().unwrap();
    device.release();
    device.init().unwrap();
    assert_eq!(device.status(), DeviceStatus::Running);
}

#[test]
fn test_adaptive_density_keeps_render_target() {
    let config = PipelineConfig {
        pixel_density_adaptive: true,
        ..PipelineConfig::default()
    };
    let (mock, mut device) = setup_with(config, DeviceDescription::default());
    let initial = device.settings().unwrap();
    mock.set_gpu_time(initial_budget() * 0.95);

    device.run_frame().unwrap();
    device.on_game_tick().unwrap();
    let settings = device.settings().unwrap();
    assert!((settings.pixel_density - 0.9).abs() < 1e-5);
    assert_eq!(settings.render_target_size, initial.render_target_size);
    assert!(settings.eye_viewports[0].width < initial.eye_viewports[0].width);
    assert_eq!(device.adaptive_rung().unwrap().0, 6);

    device.on_render_dispatch().unwrap();
    device.on_submission_complete().unwrap();
    device.on_render_complete().unwrap();
    device.on_game_tick_end().unwrap();
    device.wait_idle().unwrap();
    assert_eq!(device.stats().unwrap().layers_reallocated, 0);
}

fn initial_budget() -> f32 {
    PipelineConfig::default().adaptive.gpu_budget_ms
}

#[test]
fn test_fixed_density_resizes_eye_layer() {
    let (mock, mut device) = setup();
    device.run_frame().unwrap();
    device.set_pixel_density(0.5).unwrap();
    device.run_frame().unwrap();
    device.wait_idle().unwrap();

    let eye = device.layer_desc(0).unwrap();
    let description = DeviceDescription::default();
    assert_eq!(
        eye.texture_size,
        Extent::new(description.eye_resolution.width, description.eye_resolution.height / 2)
    );
    assert_eq!(device.stats().unwrap().layers_reallocated, 1);
    assert_eq!(mock.live_swapchains(), 1);
}

#[test]
fn test_release_mid_frame_drains() {
    let (mock, mut device) = setup();
    device.create_layer(quad()).unwrap();
    device.on_game_tick().unwrap();
    device.on_render_dispatch().unwrap();

    device.release();
    assert_eq!(device.status(), DeviceStatus::Idle);
    assert_eq!(mock.live_swapchains(), 0);
    assert!(matches!(device.on_game_tick(), Err(VrError::NotInitialized)));
}

#[test]
fn test_calibration_applies_to_poses() {
    let (_mock, mut device) = setup();
    device.set_base_offset(Vec3::new(0.0, 0.0, 1.0)).unwrap();
    device
        .set_base_orientation(Quat::from_rotation_z(std::f32::consts::PI))
        .unwrap();
    let pose = device
        .current_pose(xrpipe_core::TrackedNode::Head)
        .unwrap()
        .unwrap();
    assert!((pose.position - Vec3::new(0.0, 0.0, -100.0)).length() < 1e-3);
}
