//! Integration tests for the cloud pipeline over the dummy backend.
//!
//! The dummy backend tracks a content stamp per texture, so these tests check data
//! flow between passes (copies, history, pass-through) as well as pass order and
//! render target lifetimes.
//!
//! ```bash
//! cargo test --test pipeline_tests
//! ```

mod common;

use rstest::rstest;

use common::{Fixture, HEIGHT, SCENE_CONTENT, WIDTH};
use volumetric_clouds::backend::{
    Command, GraphicsBackend, TextureDescriptor, TextureFormat, TextureHandle,
};
use volumetric_clouds::config::{CloudParameters, RendererSettings};
use volumetric_clouds::error::CloudError;
use volumetric_clouds::height_map::{level_size, HEIGHT_MAP_LEVELS};
use volumetric_clouds::jitter::HaltonSequence;
use volumetric_clouds::params::ShaderFeatures;
use volumetric_clouds::pool::{RenderTargetPool, TargetTag};
use volumetric_clouds::shaders::{CloudPass, ShadowPass};
use volumetric_clouds::shadow::{ShadowQuality, SHADOW_MAP_SIZE};
use volumetric_clouds::{FrameInput, FrameOutcome, HeightMapStatus, PassThroughReason};

fn hierarchical() -> RendererSettings {
    RendererSettings {
        use_hierarchical_height_map: true,
        ..Default::default()
    }
}

fn shadows(quality: ShadowQuality) -> CloudParameters {
    CloudParameters {
        shadow_quality: quality,
        ..Default::default()
    }
}

// ============================================================================
// Jitter
// ============================================================================

#[test]
fn test_halton_base_three_prefix() {
    let values: Vec<f32> = HaltonSequence::new(3).take(5).collect();
    let expected = [1.0 / 3.0, 2.0 / 3.0, 1.0 / 9.0, 4.0 / 9.0, 7.0 / 9.0];
    for (value, expected) in values.iter().zip(expected) {
        assert!((value - expected).abs() < 1e-6, "{value} != {expected}");
    }
}

#[rstest]
#[case::base_two(2, 16)]
#[case::base_three(3, 27)]
#[case::base_five(5, 25)]
fn test_halton_has_no_repeats_within_cycle(#[case] base: u32, #[case] count: usize) {
    let mut values: Vec<f32> = HaltonSequence::new(base).take(count).collect();
    assert!(values.iter().all(|v| (0.0..1.0).contains(v)));
    values.sort_by(|a, b| a.total_cmp(b));
    values.dedup();
    assert_eq!(values.len(), count);
}

#[test]
fn test_renderer_draws_one_jitter_value_per_frame() {
    let mut f = Fixture::new();
    for _ in 0..3 {
        f.rendered();
    }
    assert_eq!(f.renderer.jitter().calls(), 3);
}

// ============================================================================
// Render target pool
// ============================================================================

#[test]
fn test_pool_ensure_is_idempotent() {
    let mut f = Fixture::new();
    let mut pool = RenderTargetPool::new();
    let desc = TextureDescriptor::render_target("acc", 32, 16, TextureFormat::Rgba32Float);

    let first = pool
        .ensure(&mut f.backend, TargetTag::Accumulation(0), &desc)
        .unwrap();
    f.backend.set_content(first.handle, 7);
    let creations = f.creations();

    let second = pool
        .ensure(&mut f.backend, TargetTag::Accumulation(0), &desc)
        .unwrap();
    assert_eq!(first.handle, second.handle);
    assert!(!second.allocated);
    assert_eq!(f.creations(), creations);
    assert_eq!(f.backend.content(second.handle), Some(7));
}

#[test]
fn test_pool_resize_releases_old_target_first() {
    let mut f = Fixture::new();
    let mut pool = RenderTargetPool::new();
    let small = TextureDescriptor::render_target("acc", 32, 16, TextureFormat::Rgba32Float);
    let large = TextureDescriptor::render_target("acc", 64, 32, TextureFormat::Rgba32Float);

    let old = pool
        .ensure(&mut f.backend, TargetTag::Undersample, &small)
        .unwrap()
        .handle;
    f.backend.clear_commands();
    let new = pool
        .ensure(&mut f.backend, TargetTag::Undersample, &large)
        .unwrap()
        .handle;

    assert_ne!(old, new);
    assert!(!f.backend.is_resident(old));
    let commands = f.backend.commands();
    assert_eq!(commands[0], Command::ReleaseTexture(old));
    assert!(matches!(commands[1], Command::CreateTexture { texture, .. } if texture == new));
}

#[test]
fn test_release_all_is_idempotent() {
    let mut f = Fixture::new();
    f.rendered();
    f.renderer.disable(&mut f.backend);
    let resident = f.backend.resident_count();
    f.renderer.disable(&mut f.backend);
    assert_eq!(f.backend.resident_count(), resident);
    assert!(f.renderer.pool().is_empty());
}

// ============================================================================
// Temporal accumulation
// ============================================================================

#[test]
fn test_first_frame_copies_undersample_into_accumulation() {
    let mut f = Fixture::new();
    let report = f.rendered();
    assert!(!report.history_blended);

    let pool = f.renderer.pool();
    let current = pool.get(report.buffers.current_tag()).unwrap();
    let undersample = pool.get(TargetTag::Undersample).unwrap();
    assert_eq!(f.backend.content(current), f.backend.content(undersample));
    assert_ne!(f.backend.content(current), Some(0));
    assert!(!f.renderer.temporal().first_frame());
}

#[rstest]
#[case::two_frames(2)]
#[case::five_frames(5)]
fn test_previous_slot_holds_prior_frame_result(#[case] frames: usize) {
    let mut f = Fixture::new();
    let mut prior = f.rendered();
    let mut prior_content = f
        .backend
        .content(f.renderer.pool().get(prior.buffers.current_tag()).unwrap());

    for _ in 1..frames {
        let report = f.rendered();
        assert!(report.history_blended);
        assert_eq!(report.buffers.previous(), report.buffers.current() ^ 1);
        assert_eq!(report.buffers.previous(), prior.buffers.current());

        let pool = f.renderer.pool();
        let previous = pool.get(report.buffers.previous_tag()).unwrap();
        let current = pool.get(report.buffers.current_tag()).unwrap();
        assert_eq!(f.backend.content(previous), prior_content);
        assert_ne!(f.backend.content(current), prior_content);

        prior_content = f.backend.content(current);
        prior = report;
    }
}

#[test]
fn test_accumulation_reads_previous_and_writes_current() {
    let mut f = Fixture::new();
    f.rendered();
    f.backend.clear_commands();
    let report = f.rendered();

    let cloud = f.shaders.cloud.unwrap();
    let current = f.renderer.pool().get(report.buffers.current_tag()).unwrap();
    let accumulate: Vec<&Command> = f
        .backend
        .blits()
        .filter(|c| {
            matches!(c, Command::Blit { material: Some(m), .. }
                if m.program == cloud && m.pass == CloudPass::Accumulate.index())
        })
        .collect();
    assert_eq!(accumulate.len(), 1);
    assert!(matches!(accumulate[0], Command::Blit { destination, .. } if *destination == current));
}

#[test]
fn test_resolution_change_drops_history_without_resetting() {
    let mut f = Fixture::new();
    f.rendered();
    f.rendered();

    f.camera.set_resolution(WIDTH * 2, HEIGHT * 2);
    let report = f.rendered();
    assert!(!report.history_blended);
    assert_eq!(report.resolution.x, WIDTH);
    assert_eq!(f.renderer.temporal().frames(), 3);

    let report = f.rendered();
    assert!(report.history_blended);
}

#[test]
fn test_enable_resets_history() {
    let mut f = Fixture::new();
    f.rendered();
    f.rendered();
    f.renderer.enable();
    assert!(f.renderer.temporal().first_frame());
    assert!(!f.rendered().history_blended);
}

// ============================================================================
// Hierarchical height map
// ============================================================================

#[test]
fn test_height_map_chain_halves_each_level() {
    let mut f = Fixture::with_settings(hierarchical());
    let report = f.rendered();
    assert_eq!(report.height_map, HeightMapStatus::Built);

    let pool = f.renderer.pool();
    for level in 0..HEIGHT_MAP_LEVELS {
        let desc = pool.descriptor(TargetTag::HiHeightLevel(level)).unwrap();
        assert_eq!(desc.width, 512 >> level);
        assert_eq!(desc.height, level_size(level));
    }
    let output = pool.descriptor(TargetTag::HiHeight).unwrap();
    assert_eq!(output.mip_levels, HEIGHT_MAP_LEVELS);
    assert_eq!(output.wrap_mode, f.weather.wrap_mode);
}

#[test]
fn test_height_map_runs_before_cloud_passes() {
    let mut f = Fixture::with_settings(hierarchical());
    f.backend.clear_commands();
    f.rendered();

    let cloud = f.shaders.cloud.unwrap();
    let commands = f.backend.commands();
    let dispatch = commands
        .iter()
        .position(|c| matches!(c, Command::Dispatch { .. }))
        .unwrap();
    let last_mip = commands
        .iter()
        .rposition(|c| matches!(c, Command::CopyToMip { .. }))
        .unwrap();
    let first_cloud = commands
        .iter()
        .position(|c| matches!(c, Command::Blit { material: Some(m), .. } if m.program == cloud))
        .unwrap();
    assert!(dispatch < last_mip);
    assert!(last_mip < first_cloud);

    let hi_height_passes = f.count(|c| {
        matches!(c, Command::Blit { material: Some(m), features, .. }
            if m.program == cloud && features.contains(ShaderFeatures::USE_HI_HEIGHT))
    });
    // depth, undersample and composite; the first accumulation is a plain copy
    assert_eq!(hi_height_passes, 3);
}

#[test]
fn test_invalid_weather_texture_is_reported_without_dispatch() {
    let mut f = Fixture::with(hierarchical(), CloudParameters::default(), 256);
    let report = f.rendered();

    assert_eq!(
        report.height_map,
        HeightMapStatus::Failed(CloudError::InvalidWeatherTexture {
            width: 256,
            height: 256
        })
    );
    assert_eq!(f.count(|c| matches!(c, Command::Dispatch { .. })), 0);
    assert!(f.backend.blits().all(|c| !matches!(c,
        Command::Blit { features, .. }
            if features.contains(ShaderFeatures::USE_HI_HEIGHT))));
}

#[test]
fn test_missing_height_program_disables_feature() {
    let mut f = Fixture::with_settings(hierarchical());
    let mut shaders = f.shaders;
    shaders.height_preprocess = None;
    f.renderer.set_shaders(shaders);

    let report = f.rendered();
    assert!(matches!(
        report.height_map,
        HeightMapStatus::Failed(CloudError::MissingProgram(_))
    ));
}

// ============================================================================
// Cloud shadows
// ============================================================================

#[test]
fn test_shadow_quality_transitions() {
    let mut f = Fixture::new();
    f.rendered();
    assert_eq!(f.renderer.shadow_texture(), None);
    assert!(!f.light.is_set());

    f.set_parameters(shadows(ShadowQuality::Low));
    let report = f.rendered();
    assert!(report.shadow_rendered);
    let shadow = f.renderer.shadow_texture().unwrap();
    assert!(f.backend.is_resident(shadow));
    let cookie = f.light.get().unwrap();
    assert_eq!(cookie.texture, shadow);
    assert_eq!(cookie.size, CloudParameters::default().weather_tex_size);
    let desc = f.backend.texture_descriptor(shadow).unwrap();
    assert_eq!((desc.width, desc.height), (SHADOW_MAP_SIZE, SHADOW_MAP_SIZE));

    f.set_parameters(shadows(ShadowQuality::Off));
    let report = f.rendered();
    assert!(!report.shadow_rendered);
    assert!(!f.backend.is_resident(shadow));
    assert!(!f.light.is_set());
    assert_eq!(f.renderer.shadow_texture(), None);

    f.set_parameters(shadows(ShadowQuality::Low));
    f.rendered();
    let recreated = f.renderer.shadow_texture().unwrap();
    assert!(f.backend.is_resident(recreated));
    assert!(f.light.is_set());
}

#[test]
fn test_low_high_switch_does_not_reallocate() {
    let mut f = Fixture::with(
        RendererSettings::default(),
        shadows(ShadowQuality::Low),
        512,
    );
    f.rendered();
    let shadow = f.renderer.shadow_texture();
    let creations = f.creations();

    f.set_parameters(shadows(ShadowQuality::High));
    f.rendered();
    assert_eq!(f.renderer.shadow_texture(), shadow);
    // High acquires a second scratch buffer, nothing else is created
    assert!(f.creations() <= creations + 1);
}

#[rstest]
#[case::low(ShadowQuality::Low, 1)]
#[case::high(ShadowQuality::High, 2)]
fn test_blur_passes_per_quality(#[case] quality: ShadowQuality, #[case] passes: usize) {
    let mut f = Fixture::with(RendererSettings::default(), shadows(quality), 512);
    f.rendered();
    let program = f.shaders.shadow.unwrap();
    let blurs = f.count(|c| {
        matches!(c, Command::Blit { material: Some(m), .. }
            if m.program == program && m.pass == ShadowPass::Blur.index())
    });
    assert_eq!(blurs, passes);
    assert_eq!(f.backend.temporaries_in_use(), 0);
}

#[test]
fn test_missing_light_skips_cookie() {
    let mut f = Fixture::with(
        RendererSettings::default(),
        shadows(ShadowQuality::High),
        512,
    );
    f.renderer.set_light(None);
    let report = f.rendered();
    assert!(report.shadow_rendered);
    assert!(!f.light.is_set());
}

#[test]
fn test_missing_shadow_program_skips_shadows() {
    let mut f = Fixture::with(
        RendererSettings::default(),
        shadows(ShadowQuality::Low),
        512,
    );
    let mut shaders = f.shaders;
    shaders.shadow = None;
    f.renderer.set_shaders(shaders);

    let report = f.rendered();
    assert!(!report.shadow_rendered);
    assert!(!f.light.is_set());
    assert_eq!(f.renderer.shadow_texture(), None);
    assert_eq!(f.renderer.pool().get(TargetTag::Shadow), None);
    let shadow_sized = f.count(|c| {
        matches!(c, Command::CreateTexture { width, .. } if *width == SHADOW_MAP_SIZE)
    });
    assert_eq!(shadow_sized, 0);
}

#[test]
fn test_disable_frees_scratch_textures() {
    let mut f = Fixture::with(
        RendererSettings::default(),
        shadows(ShadowQuality::High),
        512,
    );
    let baseline = f.backend.resident_count();

    for _ in 0..2 {
        assert!(f.frame_in_place().is_rendered());
    }
    assert!(f.backend.resident_count() > baseline);

    f.renderer.disable(&mut f.backend);
    assert_eq!(f.backend.resident_count(), baseline);
    assert_eq!(f.backend.temporaries_in_use(), 0);
}

#[test]
fn test_disable_clears_cookie_and_releases_targets() {
    let mut f = Fixture::with(
        RendererSettings::default(),
        shadows(ShadowQuality::High),
        512,
    );
    f.rendered();
    let targets: Vec<TextureHandle> = [
        TargetTag::Accumulation(0),
        TargetTag::Accumulation(1),
        TargetTag::Undersample,
        TargetTag::DownsampledDepth,
        TargetTag::Shadow,
    ]
    .iter()
    .filter_map(|tag| f.renderer.pool().get(*tag))
    .collect();
    assert_eq!(targets.len(), 5);

    f.renderer.disable(&mut f.backend);
    assert!(!f.light.is_set());
    assert!(targets.iter().all(|t| !f.backend.is_resident(*t)));
}

// ============================================================================
// Frame orchestration
// ============================================================================

#[test]
fn test_missing_configuration_passes_through_untouched() {
    let mut f = Fixture::new();
    f.renderer.set_configuration(None);
    f.backend.clear_commands();

    let outcome = f.frame();
    assert_eq!(
        outcome,
        FrameOutcome::PassThrough(PassThroughReason::MissingConfiguration)
    );
    assert_eq!(f.backend.content(f.output), Some(SCENE_CONTENT));
    assert!(f.renderer.pool().is_empty());
    assert_eq!(f.creations(), 0);
    assert_eq!(f.backend.commands().len(), 1);
    assert!(f.renderer.temporal().first_frame());
}

#[rstest]
#[case::no_cloud_shader(PassThroughReason::MissingCloudShader)]
#[case::no_camera(PassThroughReason::MissingCamera)]
#[case::empty_resolution(PassThroughReason::EmptyResolution)]
fn test_missing_dependencies_pass_through(#[case] reason: PassThroughReason) {
    let mut f = Fixture::new();
    let outcome = match reason {
        PassThroughReason::MissingCloudShader => {
            let mut shaders = f.shaders;
            shaders.cloud = None;
            f.renderer.set_shaders(shaders);
            f.frame()
        }
        PassThroughReason::MissingCamera => {
            let input = volumetric_clouds::FrameInput::new(f.scene, f.output, &f.camera)
                .without_camera();
            f.renderer.render(&mut f.backend, &input)
        }
        _ => {
            f.camera.set_resolution(1, 1);
            f.frame()
        }
    };

    assert_eq!(outcome.pass_through_reason(), Some(&reason));
    assert_eq!(f.backend.content(f.output), Some(SCENE_CONTENT));
    assert!(f.renderer.pool().is_empty());
    assert!(f.renderer.temporal().first_frame());
}

#[test]
fn test_allocation_failure_passes_through_and_retries() {
    let mut f = Fixture::new();
    f.backend.fail_allocations(1);

    let outcome = f.frame();
    assert_eq!(
        outcome,
        FrameOutcome::PassThrough(PassThroughReason::AllocationFailed)
    );
    assert_eq!(f.backend.content(f.output), Some(SCENE_CONTENT));
    assert!(f.renderer.temporal().first_frame());

    let report = f.rendered();
    assert!(!report.history_blended);
    assert!(!f.renderer.temporal().first_frame());
}

#[test]
fn test_in_place_composite_uses_one_temporary() {
    let mut f = Fixture::with(
        RendererSettings::default(),
        shadows(ShadowQuality::High),
        512,
    );
    f.backend.clear_commands();

    let report = match f.frame_in_place() {
        FrameOutcome::Rendered(report) => report,
        other => panic!("unexpected {:?}", other),
    };
    assert!(report.used_temporary);
    assert!(report.shadow_rendered);
    assert!(f.light.is_set());

    let frame_sized = |handle: &TextureHandle| {
        f.backend
            .texture_descriptor(*handle)
            .map(|d| (d.width, d.height) == (WIDTH, HEIGHT))
            .unwrap_or(false)
    };
    let acquired: Vec<TextureHandle> = f
        .backend
        .commands()
        .iter()
        .filter_map(|c| match c {
            Command::AcquireTemporary(t) => Some(*t),
            _ => None,
        })
        .filter(|t| frame_sized(t))
        .collect();
    let released: Vec<TextureHandle> = f
        .backend
        .commands()
        .iter()
        .filter_map(|c| match c {
            Command::ReleaseTemporary(t) => Some(*t),
            _ => None,
        })
        .filter(|t| frame_sized(t))
        .collect();
    assert_eq!(acquired.len(), 1);
    assert_eq!(released, acquired);
    assert_eq!(f.backend.temporaries_in_use(), 0);

    let temp = acquired[0];
    let last = f.backend.blits().last().unwrap();
    assert_eq!(
        last,
        &Command::Blit {
            source: Some(temp),
            destination: f.scene,
            material: None,
            features: ShaderFeatures::empty(),
        }
    );
    assert_eq!(f.backend.content(f.scene), f.backend.content(temp));
}

#[test]
fn test_resized_in_place_destination_replaces_its_temporary() {
    let mut f = Fixture::new();
    let scenes: Vec<TextureHandle> = [64, 80, 96, 112, 128]
        .iter()
        .map(|width| {
            f.backend
                .create_texture(&TextureDescriptor::render_target(
                    "scene",
                    *width,
                    HEIGHT,
                    TextureFormat::Rgba8Unorm,
                ))
                .unwrap()
        })
        .collect();

    let mut resident = Vec::new();
    for scene in &scenes {
        let input = FrameInput::in_place(*scene, &f.camera);
        assert!(f.renderer.render(&mut f.backend, &input).is_rendered());
        resident.push(f.backend.resident_count());
    }
    assert!(resident.windows(2).all(|w| w[0] == w[1]), "{:?}", resident);
}

#[test]
fn test_separate_destination_composites_directly() {
    let mut f = Fixture::new();
    f.backend.clear_commands();
    let report = f.rendered();
    assert!(!report.used_temporary);
    assert_eq!(f.count(|c| matches!(c, Command::AcquireTemporary(_))), 0);
    assert_ne!(f.backend.content(f.output), Some(SCENE_CONTENT));
    assert_eq!(f.backend.content(f.scene), Some(SCENE_CONTENT));
}

#[rstest]
#[case::native(0, CloudPass::DepthDownsampleNative, WIDTH)]
#[case::half(1, CloudPass::DepthDownsampleReduced, WIDTH / 2)]
#[case::quarter(2, CloudPass::DepthDownsampleReduced, WIDTH / 4)]
fn test_downsample_selects_depth_pass(
    #[case] downsample: u32,
    #[case] pass: CloudPass,
    #[case] width: u32,
) {
    let mut f = Fixture::with_settings(RendererSettings {
        downsample,
        ..Default::default()
    });
    let report = f.rendered();
    assert_eq!(report.resolution.x, width);

    let cloud = f.shaders.cloud.unwrap();
    let depth = f.renderer.pool().get(TargetTag::DownsampledDepth).unwrap();
    let depth_passes: Vec<u32> = f
        .backend
        .blits()
        .filter_map(|c| match c {
            Command::Blit {
                destination,
                material: Some(m),
                ..
            } if *destination == depth && m.program == cloud => Some(m.pass),
            _ => None,
        })
        .collect();
    assert_eq!(depth_passes, vec![pass.index()]);
}

#[test]
fn test_feature_flags_follow_settings() {
    let mut f = Fixture::with_settings(RendererSettings {
        allow_cloud_front_object: true,
        show_sample_count: true,
        ..Default::default()
    });
    f.rendered();
    let cloud = f.shaders.cloud.unwrap();
    let expected = ShaderFeatures::ALLOW_CLOUD_FRONT_OBJECT | ShaderFeatures::SHOW_SAMPLE_COUNT;
    assert!(f.backend.blits().all(|c| match c {
        Command::Blit {
            material: Some(m),
            features,
            ..
        } if m.program == cloud => *features == expected,
        _ => true,
    }));
}
