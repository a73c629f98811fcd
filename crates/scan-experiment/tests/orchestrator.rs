//! End-to-end scans against the mock devices.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use scan_core::{InferenceService, Prediction, ScanError, Spectrum, XyStage};
use scan_driver_mock::{ErrorConfig, ErrorScenario, MockInference, MockSpectrometer, MockStage};
use scan_experiment::{
    OrchestratorConfig, PointOutcome, ScanGrid, ScanOrchestrator, ScanParameters, ScanStatus,
    StatusSnapshot,
};

struct Rig {
    stage: MockStage,
    spectrometer: MockSpectrometer,
    inference: MockInference,
    settle: Duration,
}

impl Rig {
    fn new() -> Self {
        Self {
            stage: MockStage::builder().connected().build(),
            spectrometer: MockSpectrometer::builder().connected().seed(Some(7)).build(),
            inference: MockInference::fixed(90.0, 0.8),
            settle: Duration::ZERO,
        }
    }

    fn settle(mut self, settle: Duration) -> Self {
        self.settle = settle;
        self
    }

    fn build(self) -> Arc<ScanOrchestrator> {
        self.build_with(OrchestratorConfig::default())
    }

    fn build_with(self, config: OrchestratorConfig) -> Arc<ScanOrchestrator> {
        Arc::new(ScanOrchestrator::with_config(
            Arc::new(self.stage),
            Arc::new(self.spectrometer),
            Arc::new(self.inference),
            config.with_settle_delay(self.settle),
        ))
    }
}

fn unit_square() -> ScanParameters {
    ScanParameters::rect((0.0, 0.0), (1.0, 1.0), (1.0, 1.0))
}

fn coords(points: impl Iterator<Item = (f64, f64)>) -> Vec<(f64, f64)> {
    points.collect()
}

async fn wait_for_completed(orchestrator: &ScanOrchestrator, at_least: usize) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while orchestrator.scan_status().completed_points < at_least {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    })
    .await
    .expect("scan did not progress");
}

// =============================================================================
// Traversal
// =============================================================================

#[tokio::test]
async fn test_two_by_two_serpentine_scan() {
    let orchestrator = Rig::new().build();
    let result = orchestrator.start_scan(unit_square()).await.unwrap();

    assert_eq!(result.status, ScanStatus::Completed);
    assert_eq!(result.grid.shape(), (2, 2));
    assert_eq!(result.total_points, 4);
    assert_eq!(result.completed_points, 4);
    assert_eq!(
        coords(result.points.iter().map(|p| (p.x, p.y))),
        vec![(0.0, 0.0), (1.0, 0.0), (1.0, 1.0), (0.0, 1.0)]
    );
    assert!(result.points.iter().all(|p| p.purity_score() == Some(90.0)));
    assert!(result.end_time.is_some());
    assert!(result.scan_id.starts_with("scan_"));
    assert_eq!(orchestrator.status(), ScanStatus::Idle);
}

#[tokio::test]
async fn test_two_by_two_raster_scan() {
    let orchestrator = Rig::new().build();
    let result = orchestrator
        .start_scan(unit_square().with_serpentine(false))
        .await
        .unwrap();

    assert_eq!(
        coords(result.points.iter().map(|p| (p.x, p.y))),
        vec![(0.0, 0.0), (1.0, 0.0), (0.0, 1.0), (1.0, 1.0)]
    );
}

#[tokio::test]
async fn test_serpentine_writes_true_columns() {
    let orchestrator = Rig::new().build();
    let params = ScanParameters::rect((0.0, 0.0), (3.0, 2.0), (1.0, 1.0));
    let result = orchestrator.start_scan(params).await.unwrap();

    assert_eq!(result.grid.shape(), (3, 4));
    for point in &result.points {
        assert_eq!(point.x, result.x_positions[point.col]);
        assert_eq!(point.y, result.y_positions[point.row]);
        assert_eq!(result.grid.get(point.row, point.col), point.purity_score());
    }
    let row_one: Vec<usize> = result
        .points
        .iter()
        .filter(|p| p.row == 1)
        .map(|p| p.col)
        .collect();
    assert_eq!(row_one, vec![3, 2, 1, 0]);
}

#[tokio::test]
async fn test_point_count_matches_inclusive_axes() {
    let orchestrator = Rig::new().build();
    let params = ScanParameters::rect((1.0, 2.0), (3.0, 3.0), (0.5, 0.25)).with_batch_size(4);
    let result = orchestrator.start_scan(params).await.unwrap();

    assert_eq!(result.x_positions.len(), 5);
    assert_eq!(result.y_positions.len(), 5);
    assert_eq!(result.total_points, 25);
    assert_eq!(result.points.len(), 25);
    assert_eq!(result.completed_points, result.points.len());
}

#[tokio::test]
async fn test_homes_stage_before_scanning() {
    let stage = MockStage::builder().connected().build();
    assert!(!stage.is_homed());
    let rig = Rig {
        stage: stage.clone(),
        ..Rig::new()
    };
    let orchestrator = rig.build();

    orchestrator.start_scan(unit_square()).await.unwrap();
    assert!(stage.is_homed());
}

// =============================================================================
// Rejections and fatal errors
// =============================================================================

#[tokio::test]
async fn test_reversed_range_is_rejected() {
    let orchestrator = Rig::new().build();
    let params = ScanParameters::rect((5.0, 0.0), (2.0, 1.0), (1.0, 1.0));

    let err = orchestrator.start_scan(params).await.unwrap_err();
    assert!(matches!(err, ScanError::Validation(_)));
    assert!(err.to_string().contains("x_start must be less than x_end"));
    assert!(orchestrator.current_result().is_none());
    assert_eq!(orchestrator.status(), ScanStatus::Idle);
}

#[tokio::test]
async fn test_range_outside_stage_travel_is_rejected() {
    let orchestrator = Rig::new().build();
    let params = ScanParameters::rect((0.0, 0.0), (80.0, 1.0), (10.0, 1.0));

    let err = orchestrator.start_scan(params).await.unwrap_err();
    assert!(err.to_string().contains("X range [0, 80] outside stage limits [0, 50]"));
}

#[tokio::test]
async fn test_disconnected_stage_ends_in_error() {
    let rig = Rig {
        stage: MockStage::new(),
        ..Rig::new()
    };
    let orchestrator = rig.build();

    let err = orchestrator.start_scan(unit_square()).await.unwrap_err();
    assert!(matches!(err, ScanError::Preparation(_)));

    let result = orchestrator.current_result().unwrap();
    assert_eq!(result.status, ScanStatus::Error);
    assert!(result.error_message.unwrap().contains("Stage not connected"));
    assert!(result.points.is_empty());
    assert_eq!(orchestrator.status(), ScanStatus::Idle);
}

#[tokio::test]
async fn test_homing_failure_ends_in_error() {
    let rig = Rig {
        stage: MockStage::builder()
            .connected()
            .error_config(ErrorConfig::scenario(ErrorScenario::Timeout { operation: "home" }))
            .build(),
        ..Rig::new()
    };
    let orchestrator = rig.build();

    let err = orchestrator.start_scan(unit_square()).await.unwrap_err();
    assert!(err.to_string().contains("Homing failed"));
    assert_eq!(orchestrator.scan_status().status, ScanStatus::Error);
}

// =============================================================================
// Failure isolation
// =============================================================================

#[tokio::test]
async fn test_acquisition_failure_on_third_point() {
    let rig = Rig {
        spectrometer: MockSpectrometer::builder()
            .connected()
            .error_config(ErrorConfig::scenario(ErrorScenario::FailNth {
                operation: "read_spectrum",
                n: 3,
            }))
            .build(),
        ..Rig::new()
    };
    let orchestrator = rig.build();

    let result = orchestrator.start_scan(unit_square()).await.unwrap();
    assert_eq!(result.status, ScanStatus::Completed);
    assert_eq!(result.completed_points, 4);

    let failed: Vec<usize> = result
        .points
        .iter()
        .enumerate()
        .filter(|(_, p)| p.error().is_some())
        .map(|(i, _)| i)
        .collect();
    assert_eq!(failed, vec![2]);

    let third = &result.points[2];
    assert!(third.error().unwrap().contains("Injected failure"));
    assert_eq!(result.grid.get(third.row, third.col), None);
    assert_eq!(result.statistics().unwrap().valid_points, 3);
}

#[tokio::test]
async fn test_motion_failure_is_per_point() {
    let rig = Rig {
        stage: MockStage::builder()
            .connected()
            .error_config(ErrorConfig::scenario(ErrorScenario::FailNth {
                operation: "move",
                n: 5,
            }))
            .build(),
        ..Rig::new()
    };
    let orchestrator = rig.build();
    let params = ScanParameters::rect((0.0, 0.0), (2.0, 2.0), (1.0, 1.0));

    let result = orchestrator.start_scan(params).await.unwrap();
    assert_eq!(result.completed_points, result.total_points);
    assert_eq!(result.failed_points(), 1);
    assert!(result.points[4].error().is_some());
}

#[tokio::test]
async fn test_per_point_inference_failure() {
    let rig = Rig {
        inference: MockInference::fixed(80.0, 0.9).error_config(ErrorConfig::scenario(
            ErrorScenario::FailNth {
                operation: "predict",
                n: 2,
            },
        )),
        ..Rig::new()
    };
    let orchestrator = rig.build();

    let result = orchestrator
        .start_scan(unit_square().with_batch_size(4))
        .await
        .unwrap();
    let outcomes: Vec<bool> = result.points.iter().map(|p| p.is_success()).collect();
    assert_eq!(outcomes, vec![true, false, true, true]);
}

#[tokio::test]
async fn test_batch_failure_marks_whole_batch() {
    let rig = Rig {
        inference: MockInference::fixed(80.0, 0.9).error_config(ErrorConfig::scenario(
            ErrorScenario::FailNth {
                operation: "predict_batch",
                n: 2,
            },
        )),
        ..Rig::new()
    };
    let orchestrator = rig.build();

    let result = orchestrator
        .start_scan(unit_square().with_batch_size(2))
        .await
        .unwrap();
    assert_eq!(result.status, ScanStatus::Completed);
    assert_eq!(result.completed_points, 4);
    assert!(result.points[0].is_success());
    assert!(result.points[1].is_success());

    let first_error = result.points[2].error().unwrap();
    assert_eq!(result.points[3].error(), Some(first_error));
    assert_eq!(result.grid.get(1, 0), None);
    assert_eq!(result.grid.get(1, 1), None);
}

#[tokio::test]
async fn test_out_of_range_prediction_fails_point() {
    let rig = Rig {
        inference: MockInference::fixed(150.0, 0.9),
        ..Rig::new()
    };
    let orchestrator = rig.build();

    let result = orchestrator.start_scan(unit_square()).await.unwrap();
    assert_eq!(result.status, ScanStatus::Completed);
    assert!(result.points.iter().all(|p| matches!(
        &p.outcome,
        PointOutcome::Failure { error } if error.contains("Purity percentage (150)")
    )));
    assert!(result.statistics().is_none());
}

struct ShortBatchInference;

#[async_trait]
impl InferenceService for ShortBatchInference {
    async fn predict(&self, _spectrum: &Spectrum) -> anyhow::Result<Prediction> {
        Ok(Prediction::new(50.0, 0.5))
    }

    async fn predict_batch(
        &self,
        _spectra: &[Spectrum],
    ) -> anyhow::Result<Vec<anyhow::Result<Prediction>>> {
        Ok(Vec::new())
    }
}

#[tokio::test]
async fn test_short_batch_response_is_batch_failure() {
    let orchestrator = Arc::new(ScanOrchestrator::with_config(
        Arc::new(MockStage::builder().connected().build()),
        Arc::new(MockSpectrometer::builder().connected().build()),
        Arc::new(ShortBatchInference),
        OrchestratorConfig::default().with_settle_delay(Duration::ZERO),
    ));

    let result = orchestrator.start_scan(unit_square()).await.unwrap();
    assert_eq!(result.failed_points(), 4);
    assert!(result.points[0]
        .error()
        .unwrap()
        .contains("Inference returned 0 predictions for 1 spectra"));
}

#[tokio::test]
async fn test_acquire_timeout_is_per_point() {
    let rig = Rig {
        spectrometer: MockSpectrometer::builder()
            .connected()
            .mode(scan_driver_mock::MockMode::Realistic)
            .build(),
        ..Rig::new()
    };
    let orchestrator =
        rig.build_with(OrchestratorConfig::default().with_acquire_timeout(Duration::from_millis(5)));

    let result = orchestrator
        .start_scan(unit_square().with_integration_time(0.5))
        .await
        .unwrap();
    assert_eq!(result.status, ScanStatus::Completed);
    assert_eq!(result.failed_points(), 4);
    assert!(result.points[0]
        .error()
        .unwrap()
        .starts_with("Spectrum acquisition timed out"));
}

#[tokio::test]
async fn test_move_timeout_stops_stage_and_ends_scan() {
    let stage = MockStage::builder()
        .mode(scan_driver_mock::MockMode::Realistic)
        .max_speed(10.0)
        .ready()
        .build();
    let rig = Rig {
        stage: stage.clone(),
        ..Rig::new()
    };
    let orchestrator =
        rig.build_with(OrchestratorConfig::default().with_move_timeout(Duration::from_millis(30)));
    let params = ScanParameters::rect((0.0, 0.0), (10.0, 10.0), (10.0, 10.0));

    let err = orchestrator.start_scan(params).await.unwrap_err();
    assert!(matches!(err, ScanError::Device(ref msg) if msg.contains("timed out")));

    // No second target was sent while the first move could still be running.
    assert!(!stage.is_moving());
    assert!(stage.emergency_stop_active());
    assert_eq!(stage.position().await.unwrap().x, 0.0);

    let result = orchestrator.current_result().unwrap();
    assert_eq!(result.status, ScanStatus::Error);
    assert_eq!(result.points.len(), 1);
    assert_eq!(result.points[0].purity_score(), Some(90.0));
    assert!(result.error_message.unwrap().contains("stage stopped"));
    assert_eq!(orchestrator.status(), ScanStatus::Idle);
}

#[tokio::test]
async fn test_edge_aligned_scan_stays_inside_travel() {
    let orchestrator = Rig::new().build();
    // 0.1 steps accumulate past 50.0 without clamping.
    let params = ScanParameters::rect((0.1, 0.0), (50.0, 1.0), (0.1, 1.0));

    let result = orchestrator.start_scan(params).await.unwrap();
    assert_eq!(result.status, ScanStatus::Completed);
    assert_eq!(result.x_positions.last().copied(), Some(50.0));
    assert_eq!(result.failed_points(), 0);
}

// =============================================================================
// Concurrency: busy, pause, cancel
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_start_while_running_is_rejected() {
    let orchestrator = Rig::new().settle(Duration::from_millis(20)).build();
    let params = ScanParameters::rect((0.0, 0.0), (3.0, 3.0), (1.0, 1.0));

    let runner = orchestrator.clone();
    let first = tokio::spawn(async move { runner.start_scan(params).await });
    wait_for_completed(&orchestrator, 1).await;

    let before = orchestrator.current_result().unwrap();
    let err = orchestrator.start_scan(unit_square()).await.unwrap_err();
    assert!(matches!(err, ScanError::Busy { ref status } if status == "running"));
    assert!(err.is_rejection());

    let after = orchestrator.current_result().unwrap();
    assert_eq!(after.scan_id, before.scan_id);
    assert_eq!(after.parameters, before.parameters);
    assert_eq!(after.total_points, 16);

    let result = first.await.unwrap().unwrap();
    assert_eq!(result.status, ScanStatus::Completed);
    assert_eq!(result.completed_points, 16);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_pause_holds_progress_until_resume() {
    let orchestrator = Rig::new().settle(Duration::from_millis(15)).build();
    let params = ScanParameters::rect((0.0, 0.0), (3.0, 3.0), (1.0, 1.0));

    let runner = orchestrator.clone();
    let scan = tokio::spawn(async move { runner.start_scan(params).await });
    wait_for_completed(&orchestrator, 2).await;

    assert!(orchestrator.pause_scan());
    assert!(!orchestrator.pause_scan());
    assert_eq!(orchestrator.scan_status().status, ScanStatus::Paused);
    assert!(orchestrator.home_stage().await.is_err());

    // Let the in-flight cell finish.
    tokio::time::sleep(Duration::from_millis(60)).await;
    let held = orchestrator.scan_status().completed_points;
    tokio::time::sleep(Duration::from_millis(120)).await;
    assert_eq!(orchestrator.scan_status().completed_points, held);
    assert!(held < 16);

    assert!(orchestrator.resume_scan());
    assert_eq!(orchestrator.scan_status().status, ScanStatus::Running);

    let result = scan.await.unwrap().unwrap();
    assert_eq!(result.status, ScanStatus::Completed);
    assert_eq!(result.completed_points, 16);
    assert_eq!(result.points.len(), 16);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_cancel_keeps_traversal_prefix() {
    let orchestrator = Rig::new().settle(Duration::from_millis(10)).build();
    let params = ScanParameters::rect((0.0, 0.0), (4.0, 4.0), (1.0, 1.0)).with_batch_size(3);
    let expected: Vec<(f64, f64)> = ScanGrid::new(&params)
        .traversal()
        .map(|c| (c.x, c.y))
        .collect();

    let runner = orchestrator.clone();
    let scan = tokio::spawn(async move { runner.start_scan(params).await });
    wait_for_completed(&orchestrator, 4).await;
    assert!(orchestrator.cancel_scan());

    let result = scan.await.unwrap().unwrap();
    assert_eq!(result.status, ScanStatus::Cancelled);
    assert!(result.completed_points < result.total_points);
    assert_eq!(result.completed_points, result.points.len());

    let visited = coords(result.points.iter().map(|p| (p.x, p.y)));
    assert_eq!(visited[..], expected[..visited.len()]);
    assert_eq!(orchestrator.status(), ScanStatus::Idle);
    assert!(!orchestrator.cancel_scan());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_cancel_while_paused() {
    let orchestrator = Rig::new().settle(Duration::from_millis(10)).build();
    let params = ScanParameters::rect((0.0, 0.0), (3.0, 3.0), (1.0, 1.0));

    let runner = orchestrator.clone();
    let scan = tokio::spawn(async move { runner.start_scan(params).await });
    wait_for_completed(&orchestrator, 1).await;

    assert!(orchestrator.pause_scan());
    assert!(orchestrator.cancel_scan());

    let result = tokio::time::timeout(Duration::from_secs(2), scan)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(result.status, ScanStatus::Cancelled);
    assert_eq!(orchestrator.status(), ScanStatus::Idle);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_emergency_stop_cancels_scan() {
    let stage = MockStage::builder().connected().build();
    let rig = Rig {
        stage: stage.clone(),
        ..Rig::new()
    }
    .settle(Duration::from_millis(10));
    let orchestrator = rig.build();
    let params = ScanParameters::rect((0.0, 0.0), (3.0, 3.0), (1.0, 1.0));

    let runner = orchestrator.clone();
    let scan = tokio::spawn(async move { runner.start_scan(params).await });
    wait_for_completed(&orchestrator, 2).await;

    orchestrator.emergency_stop().await.unwrap();
    let result = scan.await.unwrap().unwrap();
    assert_eq!(result.status, ScanStatus::Cancelled);
    assert!(stage.emergency_stop_active());

    orchestrator.reset_emergency_stop().await.unwrap();
    assert!(!stage.emergency_stop_active());
}

#[tokio::test]
async fn test_dropped_scan_returns_to_idle() {
    let orchestrator = Rig::new().settle(Duration::from_millis(50)).build();
    let params = ScanParameters::rect((0.0, 0.0), (3.0, 3.0), (1.0, 1.0));

    let outcome =
        tokio::time::timeout(Duration::from_millis(80), orchestrator.start_scan(params)).await;
    assert!(outcome.is_err());

    assert_eq!(orchestrator.status(), ScanStatus::Idle);
    let result = orchestrator.current_result().unwrap();
    assert_eq!(result.status, ScanStatus::Cancelled);
    assert!(result.error_message.is_none());
    assert!(orchestrator.start_scan(unit_square()).await.is_ok());
}

// =============================================================================
// Progress
// =============================================================================

#[tokio::test]
async fn test_progress_notifications_are_throttled() {
    let orchestrator = Rig::new().build();
    let seen = Arc::new(AtomicUsize::new(0));
    let last: Arc<Mutex<Option<StatusSnapshot>>> = Arc::new(Mutex::new(None));

    let counter = seen.clone();
    let sink = last.clone();
    orchestrator.add_progress_observer(Arc::new(move |s: &StatusSnapshot| -> anyhow::Result<()> {
        counter.fetch_add(1, Ordering::SeqCst);
        *sink.lock() = Some(s.clone());
        Ok(())
    }));
    orchestrator.add_progress_observer(Arc::new(|_: &StatusSnapshot| -> anyhow::Result<()> {
        anyhow::bail!("observer offline")
    }));

    // 10 x 10 grid: one notification every 5 points, plus the final one.
    let params = ScanParameters::rect((0.0, 0.0), (9.0, 9.0), (1.0, 1.0));
    orchestrator.start_scan(params).await.unwrap();

    assert_eq!(seen.load(Ordering::SeqCst), 21);
    let final_snapshot = last.lock().take().unwrap();
    assert_eq!(final_snapshot.status, ScanStatus::Completed);
    assert_eq!(final_snapshot.progress, 1.0);
}

#[tokio::test]
async fn test_progress_throttle_with_uneven_total() {
    let orchestrator = Rig::new().build();
    let seen = Arc::new(AtomicUsize::new(0));
    let counter = seen.clone();
    orchestrator.add_progress_observer(Arc::new(move |_: &StatusSnapshot| -> anyhow::Result<()> {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }));

    // 13 x 3 = 39 points: one notification every 2 points, plus the final one.
    let params = ScanParameters::rect((0.0, 0.0), (12.0, 2.0), (1.0, 1.0));
    let result = orchestrator.start_scan(params).await.unwrap();

    assert_eq!(result.total_points, 39);
    let notifications = seen.load(Ordering::SeqCst);
    assert!(notifications <= 21, "{} notifications", notifications);
    assert_eq!(notifications, 20);
}

#[tokio::test]
async fn test_removed_observer_is_not_called() {
    let orchestrator = Rig::new().build();
    let seen = Arc::new(AtomicUsize::new(0));
    let counter = seen.clone();
    let handle =
        orchestrator.add_progress_observer(Arc::new(move |_: &StatusSnapshot| -> anyhow::Result<()> {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }));

    assert!(orchestrator.remove_progress_observer(handle));
    orchestrator.start_scan(unit_square()).await.unwrap();
    assert_eq!(seen.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_subscribe_receives_terminal_snapshot() {
    let orchestrator = Rig::new().build();
    let mut rx = orchestrator.subscribe();

    orchestrator.start_scan(unit_square()).await.unwrap();

    let mut last = None;
    while let Ok(snapshot) = rx.try_recv() {
        last = Some(snapshot);
    }
    let last = last.unwrap();
    assert_eq!(last.status, ScanStatus::Completed);
    assert_eq!(last.completed_points, 4);
    assert!(last.scan_id.is_some());
}
