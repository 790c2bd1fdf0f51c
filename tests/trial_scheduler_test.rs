//! Integration tests for the trial scheduler.
//!
//! Covers sequence generation, pause/resume bookkeeping and complete runs
//! driven through the async command loop against the mock stream. Runs use a
//! paused tokio clock, so phase timers elapse instantly.

use imagery_daq::acquisition::mock::{MockSignalSource, MockStreamConfig};
use imagery_daq::acquisition::source::{AcquisitionClock, MonotonicClock, StreamInfo};
use imagery_daq::acquisition::{SignalSource, StreamInlet};
use imagery_daq::classifier::{Classifier, FeedbackPipeline};
use imagery_daq::config::{ClassifierConfig, PreprocessingConfig, StreamConfig, TrialConfig};
use imagery_daq::data::chunk::SignalChunk;
use imagery_daq::data::storage::MemorySink;
use imagery_daq::error::AppResult;
use imagery_daq::experiment::{
    generate_sequence, RunOutcome, SessionCommand, SessionEvent, SessionState, TrialScheduler,
};
use imagery_daq::processing::SignalPreprocessor;
use ndarray::Array2;
use imagery_daq::task::{MarkerScheme, TaskType};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};

fn session_config(feedback: bool) -> TrialConfig {
    TrialConfig {
        repetitions: 1,
        recording_duration_s: 1.0,
        preparation_duration_s: 0.5,
        feedback_duration_s: 0.5,
        min_relax_duration_s: 1.0,
        max_relax_duration_s: 1.0,
        feedback_enabled: feedback,
        ..Default::default()
    }
}

fn feedback_pipeline(accuracy: f64) -> FeedbackPipeline {
    let preprocessor =
        SignalPreprocessor::new(PreprocessingConfig::default(), 250.0, 17).unwrap();
    let config = ClassifierConfig {
        accuracy,
        ..Default::default()
    };
    let classifier =
        Classifier::from_config(&config, preprocessor.output_geometry(), Some(5)).unwrap();
    FeedbackPipeline::new(preprocessor, classifier).unwrap()
}

/// Inlet that delivers four seconds of history on its first pull, then idles.
struct PrefilledInlet {
    info: StreamInfo,
    clock: Arc<MonotonicClock>,
    delivered: bool,
}

impl PrefilledInlet {
    const SAMPLES: usize = 1_000;

    fn new() -> Self {
        Self {
            info: StreamInfo {
                name: "Prefilled".into(),
                channel_labels: (0..17).map(|k| format!("EEG_{k:03}")).collect(),
                sampling_rate: 250.0,
                clock_offset: 0.0,
            },
            clock: Arc::new(MonotonicClock::with_origin(10.0)),
            delivered: false,
        }
    }
}

impl StreamInlet for PrefilledInlet {
    fn info(&self) -> &StreamInfo {
        &self.info
    }

    fn clock(&self) -> Arc<dyn AcquisitionClock> {
        self.clock.clone()
    }

    fn pull(&mut self, timeout: Duration) -> AppResult<Option<SignalChunk>> {
        if self.delivered {
            std::thread::sleep(timeout.min(Duration::from_millis(5)));
            return Ok(None);
        }
        self.delivered = true;
        let start = self.clock.now() - 4.0;
        let data = Array2::from_shape_fn((17, Self::SAMPLES), |(c, i)| {
            (2.0 * std::f64::consts::PI * 10.0 * i as f64 / 250.0 + c as f64).sin() * 20.0
        });
        let timestamps = (0..Self::SAMPLES).map(|i| start + i as f64 / 250.0).collect();
        SignalChunk::new(data, timestamps).map(Some)
    }
}

fn scheduler(config: TrialConfig, seed: u64) -> TrialScheduler {
    let source = MockSignalSource::new(MockStreamConfig::default());
    let stream = source.discover().unwrap().remove(0);
    let inlet = source.connect(&stream).unwrap();
    scheduler_with(config, inlet, 0.5, seed)
}

fn scheduler_with(
    config: TrialConfig,
    inlet: Box<dyn StreamInlet>,
    accuracy: f64,
    seed: u64,
) -> TrialScheduler {
    let pipeline = config.feedback_enabled.then(|| feedback_pipeline(accuracy));
    TrialScheduler::new(
        config,
        &StreamConfig::default(),
        inlet,
        Arc::new(MemorySink::default()),
        pipeline,
        Some(seed),
    )
    .unwrap()
}

fn drain(events: &mut broadcast::Receiver<SessionEvent>) -> Vec<SessionEvent> {
    let mut out = Vec::new();
    while let Ok(event) = events.try_recv() {
        out.push(event);
    }
    out
}

fn states(events: &[SessionEvent]) -> Vec<SessionState> {
    events
        .iter()
        .filter_map(|e| match e {
            SessionEvent::StateChanged { state } => Some(*state),
            _ => None,
        })
        .collect()
}

#[test]
fn sequence_blocks_are_permutations_of_the_task_set() {
    let tasks = vec![TaskType::Left, TaskType::Right, TaskType::Feet];
    for repetitions in [1, 2, 7] {
        let mut rng = StdRng::seed_from_u64(repetitions as u64);
        let sequence = generate_sequence(&tasks, repetitions, &mut rng);
        assert_eq!(sequence.len(), repetitions * tasks.len());
        for block in sequence.chunks(tasks.len()) {
            let block: HashSet<_> = block.iter().collect();
            assert_eq!(block, tasks.iter().collect::<HashSet<_>>());
        }
    }
}

#[test]
fn start_regenerates_sequence_of_full_length() {
    let config = TrialConfig {
        repetitions: 3,
        ..session_config(false)
    };
    let mut s = scheduler(config, 1);
    assert!(s.sequence().is_empty());
    s.start().unwrap();
    assert_eq!(s.sequence().len(), 15);
    s.stop();
}

#[test]
fn pausing_in_cue_recording_or_feedback_retracts_exactly_one_event() {
    // (timeouts after start, expected phase)
    let phases = [
        (1, SessionState::Cue),
        (2, SessionState::Recording),
        (3, SessionState::Feedback),
    ];
    for (timeouts, phase) in phases {
        let mut s = scheduler(session_config(true), 3);
        s.start().unwrap();
        for _ in 0..timeouts {
            s.on_phase_timeout();
        }
        assert_eq!(s.state(), phase);

        let before = s.event_log().event_count();
        assert!(s.pause());
        assert_eq!(s.event_log().event_count(), before - 1, "pause in {phase}");
        assert_eq!(s.state(), SessionState::Paused);
        s.stop();
    }
}

#[test]
fn pausing_in_relax_keeps_events() {
    let mut s = scheduler(session_config(false), 4);
    s.start().unwrap();
    // Complete trial 1, land in trial 2's relax
    s.on_phase_timeout();
    s.on_phase_timeout();
    s.on_phase_timeout();
    assert_eq!(s.state(), SessionState::Relax);
    assert_eq!(s.current_index(), 1);

    let before = s.event_log().event_count();
    assert_eq!(before, 1);
    assert!(s.pause());
    assert_eq!(s.event_log().event_count(), before);
    s.stop();
}

#[test]
fn resume_retries_the_same_trial() {
    let mut s = scheduler(session_config(false), 5);
    s.start().unwrap();
    for _ in 0..4 {
        s.on_phase_timeout();
    }
    assert_eq!(s.state(), SessionState::Cue);
    let index = s.current_index();
    let task = s.current_task();

    assert!(s.pause());
    assert!(s.resume());
    assert_eq!(s.state(), SessionState::Relax);
    assert_eq!(s.current_index(), index);
    assert_eq!(s.current_task(), task);

    // Retried cue logs the same task marker again
    s.on_phase_timeout();
    let events = s.event_log().events();
    assert_eq!(events.len(), 2);
    let scheme = MarkerScheme::default();
    assert_eq!(events[1].marker, scheme.task_marker(task.unwrap()));
    s.stop();
}

#[test]
fn paused_session_keeps_acquiring() {
    let mut s = scheduler(session_config(false), 6);
    s.start().unwrap();
    s.pause();
    assert!(s.is_acquiring());
    std::thread::sleep(Duration::from_millis(300));
    s.poll();
    assert!(s.event_log().sample_count() > 0);
    s.stop();
    assert!(!s.is_acquiring());
}

#[tokio::test(start_paused = true)]
async fn run_without_feedback_logs_one_marker_per_trial() {
    let mut s = scheduler(session_config(false), 7);
    let mut notifications = s.subscribe();
    let (tx, mut commands) = mpsc::channel(4);
    tx.send(SessionCommand::Start).await.unwrap();

    let outcome = s.drive(&mut commands).await.unwrap();
    assert_eq!(outcome, RunOutcome::Finished);
    assert_eq!(s.state(), SessionState::Finished);
    assert!(!s.is_acquiring());

    let notifications = drain(&mut notifications);
    let mut expected = Vec::new();
    for _ in 0..5 {
        expected.extend([SessionState::Relax, SessionState::Cue, SessionState::Recording]);
    }
    expected.push(SessionState::Finished);
    assert_eq!(states(&notifications), expected);
    assert_eq!(notifications.last(), Some(&SessionEvent::Finished));

    let progress: Vec<_> = notifications
        .iter()
        .filter_map(|e| match e {
            SessionEvent::Progress { current, total } => Some((*current, *total)),
            _ => None,
        })
        .collect();
    assert_eq!(progress, vec![(1, 5), (2, 5), (3, 5), (4, 5), (5, 5)]);

    let scheme = MarkerScheme::default();
    let events = s.event_log().events();
    assert_eq!(events.len(), 5);
    for (event, task) in events.iter().zip(s.sequence()) {
        assert_eq!(event.marker, scheme.task_marker(*task));
    }
    assert!(events.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
}

#[tokio::test(start_paused = true)]
async fn run_with_short_history_marks_every_trial_incorrect() {
    let mut s = scheduler(session_config(true), 8);
    let mut notifications = s.subscribe();
    let (tx, mut commands) = mpsc::channel(4);
    tx.send(SessionCommand::Start).await.unwrap();

    let outcome = s.drive(&mut commands).await.unwrap();
    assert_eq!(outcome, RunOutcome::Finished);
    // Paused time runs the session far faster than the mock stream fills
    assert!(s.event_log().sample_count() < 750);

    let scheme = MarkerScheme::default();
    let events = s.event_log().events();
    assert_eq!(events.len(), 15);
    for (trial, task) in events.chunks(3).zip(s.sequence()) {
        let (cue, feedback, quality) = (trial[0], trial[1], trial[2]);
        assert_eq!(cue.marker, scheme.task_marker(*task));
        assert_eq!(feedback.marker, scheme.feedback_marker(TaskType::Error));
        assert_eq!(feedback.marker, 10);
        assert_eq!(quality.marker, 101);
        assert_eq!(feedback.timestamp, quality.timestamp);
        assert!(cue.timestamp <= feedback.timestamp);
    }

    let feedback: Vec<_> = drain(&mut notifications)
        .into_iter()
        .filter(|e| matches!(e, SessionEvent::Feedback { .. }))
        .collect();
    assert_eq!(feedback.len(), 5);
    assert!(feedback.iter().all(|e| *e
        == SessionEvent::Feedback {
            predicted: TaskType::Error,
            correct: false
        }));
}

#[tokio::test(start_paused = true)]
async fn run_with_full_history_logs_correct_feedback() {
    let mut s = scheduler_with(
        session_config(true),
        Box::new(PrefilledInlet::new()),
        1.0,
        12,
    );
    let mut notifications = s.subscribe();
    assert!(s.start().unwrap());
    for _ in 0..200 {
        s.poll();
        if s.event_log().sample_count() >= PrefilledInlet::SAMPLES {
            break;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    assert_eq!(s.event_log().sample_count(), PrefilledInlet::SAMPLES);

    let (_tx, mut commands) = mpsc::channel::<SessionCommand>(4);
    let outcome = s.drive(&mut commands).await.unwrap();
    assert_eq!(outcome, RunOutcome::Finished);

    let scheme = MarkerScheme::default();
    let events = s.event_log().events();
    assert_eq!(events.len(), 15);
    for (trial, task) in events.chunks(3).zip(s.sequence()) {
        let (cue, feedback, quality) = (trial[0], trial[1], trial[2]);
        assert_eq!(cue.marker, scheme.task_marker(*task));
        assert_eq!(feedback.marker, scheme.task_marker(*task) + 10);
        assert_eq!(quality.marker, 100);
        assert_eq!(feedback.timestamp, quality.timestamp);
    }

    let feedback: Vec<_> = drain(&mut notifications)
        .into_iter()
        .filter_map(|e| match e {
            SessionEvent::Feedback { predicted, correct } => Some((predicted, correct)),
            _ => None,
        })
        .collect();
    let expected: Vec<_> = s.sequence().iter().map(|task| (*task, true)).collect();
    assert_eq!(feedback, expected);
}

#[tokio::test(start_paused = true)]
async fn stop_command_ends_run_early() {
    let mut s = scheduler(session_config(false), 9);
    let (tx, mut commands) = mpsc::channel(4);
    tx.send(SessionCommand::Start).await.unwrap();
    tokio::spawn(async move {
        // Trial 2 relaxes from 2.5 s to 3.5 s
        tokio::time::sleep(Duration::from_millis(3_200)).await;
        tx.send(SessionCommand::Stop).await.unwrap();
    });

    let outcome = s.drive(&mut commands).await.unwrap();
    assert_eq!(outcome, RunOutcome::Stopped);
    assert_eq!(s.state(), SessionState::Idle);
    assert!(!s.is_acquiring());
    assert_eq!(s.current_index(), 1);
    assert_eq!(s.event_log().event_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn pause_and_resume_through_commands() {
    let mut s = scheduler(session_config(false), 10);
    let mut notifications = s.subscribe();
    let (tx, mut commands) = mpsc::channel(4);
    tx.send(SessionCommand::Start).await.unwrap();
    tokio::spawn(async move {
        // Trial 1 is in its recording phase at 1.8 s
        tokio::time::sleep(Duration::from_millis(1_800)).await;
        tx.send(SessionCommand::Pause).await.unwrap();
        tokio::time::sleep(Duration::from_secs(10)).await;
        tx.send(SessionCommand::Resume).await.unwrap();
    });

    let outcome = s.drive(&mut commands).await.unwrap();
    assert_eq!(outcome, RunOutcome::Finished);
    assert_eq!(s.event_log().event_count(), 5);

    let states = states(&drain(&mut notifications));
    let paused_at = states
        .iter()
        .position(|s| *s == SessionState::Paused)
        .unwrap();
    assert_eq!(states[paused_at - 1], SessionState::Recording);
    assert_eq!(states[paused_at + 1], SessionState::Relax);
}

#[tokio::test(start_paused = true)]
async fn closing_commands_before_start_stops() {
    let mut s = scheduler(session_config(false), 11);
    let (tx, mut commands) = mpsc::channel::<SessionCommand>(1);
    drop(tx);
    assert_eq!(s.drive(&mut commands).await.unwrap(), RunOutcome::Stopped);
    assert_eq!(s.state(), SessionState::Idle);
}
