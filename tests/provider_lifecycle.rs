use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use spectator_capture::provider::elgato::{GRABBER_STAGE, NULL_STAGE, SOURCE_STAGE};
use spectator_capture::{
    resolve_format, BlackMagicFrameProvider, CaptureError, ColorTarget, CopyMode, DeviceHandle,
    ElgatoFrameProvider, EncodingProfile, FrameProvider, FrameSample, GraphBackend, GraphProbe,
    InitStatus, PinDirection, PipelineBuilder, ProviderState, ProviderType, SampleBridge,
    StageSpec, SyntheticGraph, SyntheticPlan, FRAME_DURATION_HNS, NO_TIMESTAMP,
};

type SlotWrites = Arc<Mutex<Vec<(usize, i64)>>>;

struct TestSurface {
    writes: SlotWrites,
}

impl ColorTarget for TestSurface {
    fn device(&self) -> Option<DeviceHandle> {
        Some(DeviceHandle(7))
    }

    fn write_frame(
        &mut self,
        slot: usize,
        sample: &FrameSample,
        _mode: CopyMode,
    ) -> Result<(), CaptureError> {
        self.writes.lock().unwrap().push((slot, sample.timestamp));
        Ok(())
    }
}

fn elgato(plan: SyntheticPlan) -> (ElgatoFrameProvider, Arc<GraphProbe>) {
    let probe = Arc::new(GraphProbe::default());
    let provider = ElgatoFrameProvider::synthetic_with_probe(
        resolve_format(240),
        false,
        plan,
        Arc::clone(&probe),
    );
    (provider, probe)
}

fn poll_until_ready(provider: &mut dyn FrameProvider) -> InitStatus {
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        let status = provider.initialize(None, None).expect("initialize");
        if status == InitStatus::Ready || Instant::now() >= deadline {
            return status;
        }
        thread::sleep(Duration::from_millis(5));
    }
}

#[test]
fn three_stage_pipeline_initializes_and_enables() {
    let (mut provider, probe) = elgato(SyntheticPlan::streaming(120));
    let writes: SlotWrites = Arc::default();
    let surface = TestSurface {
        writes: Arc::clone(&writes),
    };

    let first = provider
        .initialize(Some(Box::new(surface)), None)
        .expect("initialize");
    assert!(matches!(first, InitStatus::Ready | InitStatus::Pending));
    assert_eq!(poll_until_ready(&mut provider), InitStatus::Ready);

    assert!(provider.is_enabled());
    assert_eq!(provider.duration_hns(), FRAME_DURATION_HNS);
    assert_eq!(provider.duration_hns(), 333_333);
    assert_eq!(provider.provider_type(), ProviderType::Elgato);
    assert!(provider.output_yuv());
    assert!(!provider.supports_output());
    assert_eq!(
        probe.connections(),
        vec![
            (SOURCE_STAGE.to_string(), 0, GRABBER_STAGE.to_string(), 0),
            (GRABBER_STAGE.to_string(), 1, NULL_STAGE.to_string(), 0),
        ]
    );

    provider.update(5);
    let recorded = writes.lock().unwrap().clone();
    assert_eq!(recorded.len(), 1);
    assert_eq!(recorded[0].0, 1);
    assert!(recorded[0].1 >= 0);
}

#[test]
fn source_creation_failure_is_latched() {
    let (mut provider, probe) = elgato(SyntheticPlan::idle().failing_stage(SOURCE_STAGE));

    let first = provider.initialize(None, None).unwrap_err();
    assert!(matches!(first, CaptureError::StageCreation { ref stage, .. } if stage == SOURCE_STAGE));
    let attempts = probe.stages_created();
    assert_eq!(attempts, 1);

    for _ in 0..3 {
        let again = provider.initialize(None, None).unwrap_err();
        assert_eq!(again, first);
        assert_eq!(again.code(), first.code());
    }
    assert_eq!(probe.stages_created(), attempts);
    assert_eq!(provider.build_attempts(), 1);
    assert_eq!(provider.state(), ProviderState::ErrorLatched(first));
}

#[test]
fn latch_survives_dispose() {
    let (mut provider, probe) = elgato(SyntheticPlan::idle().failing_run());
    let err = provider.initialize(None, None).unwrap_err();
    provider.dispose();
    assert_eq!(provider.state(), ProviderState::Disposed);

    assert_eq!(provider.initialize(None, None), Err(err));
    assert_eq!(probe.graphs_created(), 1);
}

#[test]
fn converter_to_sink_backtracks_to_third_endpoint() {
    let plan = SyntheticPlan::streaming(120)
        .with_pins(
            NULL_STAGE,
            vec![PinDirection::Input, PinDirection::Input, PinDirection::Input],
        )
        .rejecting_input(NULL_STAGE, 0)
        .rejecting_input(NULL_STAGE, 1);
    let (mut provider, probe) = elgato(plan);

    assert_eq!(poll_until_ready(&mut provider), InitStatus::Ready);
    assert_eq!(
        probe.connections().last().cloned(),
        Some((GRABBER_STAGE.to_string(), 1, NULL_STAGE.to_string(), 2))
    );
    // One attempt for source → grabber, three for grabber → sink.
    assert_eq!(probe.connect_attempts(), 4);
}

#[test]
fn timestamp_reports_sentinel_until_first_callback() {
    let bridge = Arc::new(SampleBridge::new());
    let probe = Arc::new(GraphProbe::default());
    let format = resolve_format(240);
    let backend: Box<dyn GraphBackend> =
        Box::new(SyntheticGraph::new(SyntheticPlan::idle(), Arc::clone(&probe)));
    let _pipeline = PipelineBuilder::new()
        .stage(StageSpec::source(SOURCE_STAGE).with_format(format))
        .stage(
            StageSpec::converter(GRABBER_STAGE)
                .with_format(format)
                .grabbing_samples(),
        )
        .stage(StageSpec::sink(NULL_STAGE))
        .sample_sink(bridge.clone())
        .build(backend)
        .expect("build");

    assert_eq!(bridge.timestamp(), NO_TIMESTAMP);
    bridge.publish(123_456, &vec![0u8; format.sample_size()]);
    assert_eq!(bridge.timestamp(), 123_456);
}

#[test]
fn timestamp_reports_device_tick_through_provider() {
    const DEVICE_TICK: i64 = 987_654_321;
    let (mut provider, _probe) = elgato(
        SyntheticPlan::streaming(120)
            .stamping_from(DEVICE_TICK)
            .limited_to(1),
    );
    let writes: SlotWrites = Arc::default();
    let surface = TestSurface {
        writes: Arc::clone(&writes),
    };
    assert_eq!(provider.timestamp(0), NO_TIMESTAMP);

    provider
        .initialize(Some(Box::new(surface)), None)
        .expect("initialize");
    assert_eq!(poll_until_ready(&mut provider), InitStatus::Ready);
    assert_eq!(provider.timestamp(0), DEVICE_TICK);
    assert_eq!(provider.timestamp(3), DEVICE_TICK);

    provider.update(0);
    assert_eq!(writes.lock().unwrap().clone(), vec![(0, DEVICE_TICK)]);
}

#[test]
fn blackmagic_reports_device_tick() {
    const DEVICE_TICK: i64 = 42 * FRAME_DURATION_HNS;
    let mut provider = BlackMagicFrameProvider::synthetic(
        resolve_format(480),
        false,
        SyntheticPlan::streaming(120)
            .stamping_from(DEVICE_TICK)
            .limited_to(1),
    );
    assert_eq!(poll_until_ready(&mut provider), InitStatus::Ready);
    assert_eq!(provider.timestamp(0), DEVICE_TICK);
    assert_eq!(provider.capture_frame_index(), 1);
}

#[test]
fn graph_without_size_report_still_enables() {
    let (mut provider, probe) = elgato(SyntheticPlan::streaming(120).hiding_sample_size());
    assert_eq!(poll_until_ready(&mut provider), InitStatus::Ready);
    assert_eq!(provider.build_attempts(), 1);
    assert_eq!(probe.runs(), 1);
    assert!(provider.timestamp(0) >= 0);
}

#[test]
fn provider_timestamp_is_sentinel_without_samples() {
    let (mut provider, _probe) = elgato(SyntheticPlan::idle());
    assert_eq!(provider.timestamp(0), NO_TIMESTAMP);

    let started = Instant::now();
    assert_eq!(provider.initialize(None, None), Ok(InitStatus::Pending));
    assert_eq!(provider.timestamp(0), NO_TIMESTAMP);
    provider.update(0);
    assert!(started.elapsed() < Duration::from_secs(1));

    provider.dispose();
    assert_eq!(provider.timestamp(0), NO_TIMESTAMP);
}

#[test]
fn pending_build_is_never_duplicated() {
    let (mut provider, probe) = elgato(SyntheticPlan::idle());
    for _ in 0..5 {
        assert_eq!(provider.initialize(None, None), Ok(InitStatus::Pending));
    }
    assert_eq!(probe.graphs_created(), 1);
    assert_eq!(provider.build_attempts(), 1);
}

#[test]
fn enabled_provider_initialize_is_a_no_op() {
    let (mut provider, probe) = elgato(SyntheticPlan::streaming(120));
    assert_eq!(poll_until_ready(&mut provider), InitStatus::Ready);
    assert_eq!(provider.initialize(None, None), Ok(InitStatus::Ready));
    assert_eq!(probe.graphs_created(), 1);
}

#[test]
fn dispose_before_initialize_is_safe() {
    let (mut provider, probe) = elgato(SyntheticPlan::idle());
    provider.dispose();
    provider.dispose();
    assert_eq!(provider.state(), ProviderState::Disposed);
    assert_eq!(probe.graphs_created(), 0);

    let mut blackmagic =
        BlackMagicFrameProvider::synthetic(resolve_format(720), false, SyntheticPlan::idle());
    blackmagic.dispose();
    assert_eq!(blackmagic.state(), ProviderState::Disposed);
}

#[test]
fn dispose_in_every_state_releases_everything() {
    let plans = [
        SyntheticPlan::idle(),
        SyntheticPlan::streaming(120),
        SyntheticPlan::idle().failing_stage(NULL_STAGE),
    ];
    for plan in plans {
        let (mut provider, probe) = elgato(plan);
        let _ = provider.initialize(None, None);
        for _ in 0..3 {
            provider.dispose();
            assert_eq!(provider.state(), ProviderState::Disposed);
            assert!(!provider.is_enabled());
            assert_eq!(probe.live_stages(), 0);
        }
    }
}

#[test]
fn failed_link_after_successful_link_leaks_nothing() {
    let plan = SyntheticPlan::idle().with_pins(NULL_STAGE, vec![PinDirection::Output]);
    let (mut provider, probe) = elgato(plan);
    assert_eq!(probe.live_stages(), 0);

    let err = provider.initialize(None, None).unwrap_err();
    assert_eq!(
        err,
        CaptureError::NoCompatibleEndpoint {
            upstream: GRABBER_STAGE.to_string(),
            downstream: NULL_STAGE.to_string(),
        }
    );
    assert_eq!(probe.connections().len(), 1);
    assert_eq!(probe.stages_created(), 3);
    assert_eq!(probe.live_stages(), 0);
}

#[test]
fn unmatched_height_uses_1080_profile() {
    let format = resolve_format(500);
    assert_eq!(format.profile, EncodingProfile::P1080);
    assert_eq!((format.width, format.height), (1920, 1080));
}

#[test]
fn optional_hooks_default_to_zero() {
    let (provider, _probe) = elgato(SyntheticPlan::idle());
    assert_eq!(provider.capture_frame_index(), 0);
    assert_eq!(provider.pixel_change(2), 0);
    assert_eq!(provider.num_queued_output_frames(), 0);
}

#[test]
fn blackmagic_streams_and_counts_frames() {
    let probe = Arc::new(GraphProbe::default());
    let mut provider = BlackMagicFrameProvider::synthetic_with_probe(
        resolve_format(360),
        true,
        SyntheticPlan::streaming(120),
        Arc::clone(&probe),
    );
    assert_eq!(poll_until_ready(&mut provider), InitStatus::Ready);
    assert_eq!(provider.provider_type(), ProviderType::BlackMagic);
    assert!(provider.capture_frame_index() > 0);
    assert!(provider.timestamp(3) >= 0);

    provider.dispose();
    assert_eq!(probe.live_stages(), 0);
    assert_eq!(provider.timestamp(3), NO_TIMESTAMP);
}
