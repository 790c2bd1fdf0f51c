//! Trial scheduler.
//!
//! [`TrialScheduler`] owns the phase timer, the event log and the acquisition
//! thread of one session. Transitions are plain synchronous methods; the async
//! [`TrialScheduler::drive`] loop only decides *when* to call them, multiplexing
//! commands, the phase deadline and the poll tick on a single task so event-log
//! mutation is never concurrent.
//!
//! Markers are stamped on the stream's clock (`clock.now() - clock_offset`),
//! not on the timer's clock, so they line up with sample timestamps at save time.

use crate::acquisition::{Acquisition, AcquisitionClock, StreamBuffer, StreamInlet};
use crate::classifier::FeedbackPipeline;
use crate::config::{StreamConfig, TrialConfig};
use crate::data::event_log::EventLog;
use crate::data::storage::RecordingSink;
use crate::error::{AppResult, ExperimentError};
use crate::experiment::events::{SessionCommand, SessionEvent};
use crate::experiment::sequence::generate_sequence;
use crate::experiment::state::{SessionState, SessionStatus};
use crate::task::TaskType;
use chrono::Utc;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};
use uuid::Uuid;

const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// How [`TrialScheduler::drive`] ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// Every trial in the sequence completed.
    Finished,
    /// Stopped early, or the command channel closed before a run started.
    Stopped,
}

/// Runs one session: phase timers, marker logging, acquisition and feedback.
pub struct TrialScheduler {
    config: TrialConfig,
    poll_interval: Duration,
    acquisition: Acquisition,
    clock: Arc<dyn AcquisitionClock>,
    clock_offset: f64,
    event_log: EventLog,
    pipeline: Option<FeedbackPipeline>,
    rng: StdRng,
    sequence: Vec<TaskType>,
    index: usize,
    state: SessionState,
    deadline: Option<Instant>,
    events: broadcast::Sender<SessionEvent>,
    run_id: Uuid,
    started_at: Option<chrono::DateTime<Utc>>,
}

impl TrialScheduler {
    /// Bind a scheduler to a connected inlet.
    ///
    /// Without a `pipeline` the feedback phase is skipped even when enabled in
    /// `config`.
    pub fn new(
        config: TrialConfig,
        stream: &StreamConfig,
        inlet: Box<dyn StreamInlet>,
        sink: Arc<dyn RecordingSink>,
        pipeline: Option<FeedbackPipeline>,
        seed: Option<u64>,
    ) -> AppResult<Self> {
        config.validate().map_err(ExperimentError::Configuration)?;

        let info = inlet.info().clone();
        if let Some(pipeline) = &pipeline {
            let preprocessor = pipeline.preprocessor();
            let rate = preprocessor.device_rate();
            let channels = preprocessor.device_channels();
            if (rate - info.sampling_rate).abs() > 1e-6 || channels != info.channel_count() {
                return Err(ExperimentError::GeometryMismatch {
                    expected: format!("stream with {channels} channels at {rate} Hz"),
                    actual: format!(
                        "{} with {} channels at {} Hz",
                        info.name,
                        info.channel_count(),
                        info.sampling_rate
                    ),
                });
            }
        }

        let clock = inlet.clock();
        let buffer = Arc::new(StreamBuffer::bind(&info));
        let clock_offset = buffer.clock_offset();
        let acquisition = Acquisition::new(inlet, buffer, stream.pull_timeout());
        let event_log = EventLog::new(info.channel_labels.clone(), info.sampling_rate, sink);
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        Ok(Self {
            config,
            poll_interval: stream.poll_interval(),
            acquisition,
            clock,
            clock_offset,
            event_log,
            pipeline,
            rng,
            sequence: Vec::new(),
            index: 0,
            state: SessionState::Idle,
            deadline: None,
            events,
            run_id: Uuid::new_v4(),
            started_at: None,
        })
    }

    /// Receive notifications published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Current state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Zero-based index of the current trial.
    pub fn current_index(&self) -> usize {
        self.index
    }

    /// Trial labels of the current run; empty before the first `start`.
    pub fn sequence(&self) -> &[TaskType] {
        &self.sequence
    }

    /// Label of the current trial.
    pub fn current_task(&self) -> Option<TaskType> {
        self.sequence.get(self.index).copied()
    }

    /// Signal and markers recorded so far.
    pub fn event_log(&self) -> &EventLog {
        &self.event_log
    }

    /// When the current phase ends, if a phase timer is armed.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Whether the acquisition thread is running.
    pub fn is_acquiring(&self) -> bool {
        self.acquisition.is_running()
    }

    /// Snapshot for status reporting.
    pub fn status(&self) -> SessionStatus {
        SessionStatus {
            run_id: self.run_id,
            state: self.state,
            trial_index: self.index,
            total_trials: self.sequence.len(),
            events_logged: self.event_log.event_count(),
            started_at: self.started_at,
        }
    }

    /// Begin a new run. Returns `Ok(false)` when not idle.
    pub fn start(&mut self) -> AppResult<bool> {
        if !self.state.can_start() {
            debug!(state = %self.state, "Ignoring start");
            return Ok(false);
        }
        self.sequence = generate_sequence(
            &self.config.tasks,
            self.config.repetitions,
            &mut self.rng,
        );
        self.index = 0;
        self.event_log.clear();
        self.acquisition.start()?;

        self.run_id = Uuid::new_v4();
        self.started_at = Some(Utc::now());
        info!(
            run_id = %self.run_id,
            trials = self.sequence.len(),
            "Starting run"
        );
        self.enter_relax();
        Ok(true)
    }

    /// Cancel the phase timer and retract the uncommitted marker of the
    /// current trial. Acquisition and polling continue.
    pub fn pause(&mut self) -> bool {
        if !self.state.can_pause() {
            debug!(state = %self.state, "Ignoring pause");
            return false;
        }
        self.deadline = None;
        if self.state.has_uncommitted_event() {
            if let Some(event) = self.event_log.remove_last_event() {
                debug!(marker = event.marker, "Retracted event");
            }
        }
        info!(trial = self.index + 1, phase = %self.state, "Paused");
        self.set_state(SessionState::Paused);
        true
    }

    /// Retry the current trial from its relax phase.
    pub fn resume(&mut self) -> bool {
        if !self.state.can_resume() {
            debug!(state = %self.state, "Ignoring resume");
            return false;
        }
        info!(trial = self.index + 1, "Resuming");
        self.enter_relax();
        true
    }

    /// Cancel timers, stop acquisition and return to idle. Does not save.
    pub fn stop(&mut self) -> bool {
        if !self.state.can_stop() {
            debug!(state = %self.state, "Ignoring stop");
            return false;
        }
        self.shutdown();
        info!(trial = self.index + 1, events = self.event_log.event_count(), "Stopped");
        self.set_state(SessionState::Idle);
        true
    }

    /// Apply one command; `Ok(false)` when it was not valid in this state.
    pub fn handle(&mut self, command: SessionCommand) -> AppResult<bool> {
        match command {
            SessionCommand::Start => self.start(),
            SessionCommand::Pause => Ok(self.pause()),
            SessionCommand::Resume => Ok(self.resume()),
            SessionCommand::Stop => Ok(self.stop()),
        }
    }

    /// Advance out of the current timed phase.
    pub fn on_phase_timeout(&mut self) {
        self.deadline = None;
        match self.state {
            SessionState::Relax => self.enter_cue(),
            SessionState::Cue => self.enter_recording(),
            SessionState::Recording => {
                if self.config.feedback_enabled && self.pipeline.is_some() {
                    self.enter_feedback();
                } else {
                    self.advance();
                }
            }
            SessionState::Feedback => self.advance(),
            state => debug!(%state, "Phase timeout with no timed phase"),
        }
    }

    /// Move everything acquired since the last poll into the event log.
    pub fn poll(&mut self) {
        let chunks = self.acquisition.buffer().drain();
        if !chunks.is_empty() {
            self.event_log.extend(chunks);
        }
    }

    /// Persist the current run.
    pub fn save(&self, subject_id: &str, run_label: &str) -> AppResult<Option<PathBuf>> {
        self.event_log.save(subject_id, run_label)
    }

    /// Run the session until it finishes or is stopped.
    ///
    /// Commands, phase deadlines and the poll tick are handled one at a time.
    /// If `commands` closes before a run was started, returns
    /// [`RunOutcome::Stopped`].
    pub async fn drive(
        &mut self,
        commands: &mut mpsc::Receiver<SessionCommand>,
    ) -> AppResult<RunOutcome> {
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut commands_open = true;

        loop {
            match self.state {
                SessionState::Finished => return Ok(RunOutcome::Finished),
                SessionState::Idle if self.started_at.is_some() => {
                    return Ok(RunOutcome::Stopped)
                }
                SessionState::Idle if !commands_open => return Ok(RunOutcome::Stopped),
                SessionState::Paused if !commands_open => {
                    warn!("Command channel closed while paused");
                    self.stop();
                    return Ok(RunOutcome::Stopped);
                }
                _ => {}
            }

            let deadline = self.deadline;
            tokio::select! {
                command = commands.recv(), if commands_open => match command {
                    Some(command) => {
                        self.handle(command)?;
                    }
                    None => {
                        debug!("Command channel closed");
                        commands_open = false;
                    }
                },
                _ = phase_timer(deadline) => self.on_phase_timeout(),
                _ = ticker.tick() => {
                    if self.state.can_stop() {
                        self.poll();
                    }
                }
            }
        }
    }

    fn enter_relax(&mut self) {
        let total = self.sequence.len();
        self.publish(SessionEvent::Progress {
            current: self.index + 1,
            total,
        });
        self.set_state(SessionState::Relax);
        self.publish(SessionEvent::TaskChanged {
            label: TaskType::Rest.label().to_string(),
        });

        let duration = self
            .rng
            .gen_range(self.config.min_relax_duration_s..=self.config.max_relax_duration_s);
        debug!(trial = self.index + 1, duration, "Relax");
        self.arm(Duration::from_secs_f64(duration));
    }

    fn enter_cue(&mut self) {
        let Some(task) = self.current_task() else {
            self.finish();
            return;
        };
        let timestamp = self.marker_time();
        let marker = self.config.markers.task_marker(task);
        self.event_log.add_event(timestamp, marker);
        info!(trial = self.index + 1, %task, marker, "Cue");

        self.set_state(SessionState::Cue);
        self.publish(SessionEvent::TaskChanged {
            label: task.label().to_string(),
        });
        self.arm(self.config.preparation());
    }

    fn enter_recording(&mut self) {
        self.set_state(SessionState::Recording);
        self.arm(self.config.recording());
    }

    fn enter_feedback(&mut self) {
        let Some(task) = self.current_task() else {
            self.advance();
            return;
        };
        self.poll();
        let Some(pipeline) = self.pipeline.as_ref() else {
            self.advance();
            return;
        };
        let window = self.event_log.latest_window(pipeline.required_samples());
        let prediction = pipeline.classify(window.view(), task);
        let correct = prediction.is_correct(task);

        let timestamp = self.marker_time();
        let markers = &self.config.markers;
        let feedback_marker = markers.feedback_marker(prediction.label);
        let quality_marker = markers.quality_marker(correct);
        self.event_log.add_event(timestamp, feedback_marker);
        self.event_log.add_event(timestamp, quality_marker);
        if prediction.is_error() {
            warn!(trial = self.index + 1, "No prediction for this trial");
        }
        info!(
            trial = self.index + 1,
            %task,
            predicted = %prediction.label,
            correct,
            "Feedback"
        );

        self.set_state(SessionState::Feedback);
        self.publish(SessionEvent::Feedback {
            predicted: prediction.label,
            correct,
        });
        self.arm(self.config.feedback());
    }

    fn advance(&mut self) {
        self.index += 1;
        if self.index >= self.sequence.len() {
            self.finish();
        } else {
            self.enter_relax();
        }
    }

    fn finish(&mut self) {
        self.shutdown();
        info!(
            run_id = %self.run_id,
            trials = self.sequence.len(),
            events = self.event_log.event_count(),
            samples = self.event_log.sample_count(),
            "Run finished"
        );
        self.set_state(SessionState::Finished);
        self.publish(SessionEvent::Finished);
    }

    fn shutdown(&mut self) {
        self.deadline = None;
        self.acquisition.stop();
        self.poll();
    }

    fn arm(&mut self, duration: Duration) {
        self.deadline = Some(Instant::now() + duration);
    }

    fn marker_time(&self) -> f64 {
        self.clock.now() - self.clock_offset
    }

    fn set_state(&mut self, state: SessionState) {
        self.state = state;
        self.publish(SessionEvent::StateChanged { state });
    }

    fn publish(&self, event: SessionEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }
}

async fn phase_timer(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acquisition::mock::{MockSignalSource, MockStreamConfig};
    use crate::acquisition::SignalSource;
    use crate::classifier::Classifier;
    use crate::config::{ClassifierConfig, PreprocessingConfig};
    use crate::data::storage::MemorySink;
    use crate::processing::SignalPreprocessor;

    fn scheduler(config: TrialConfig) -> TrialScheduler {
        let source = MockSignalSource::new(MockStreamConfig::default());
        let stream = source.discover().unwrap().remove(0);
        let inlet = source.connect(&stream).unwrap();
        TrialScheduler::new(
            config,
            &StreamConfig::default(),
            inlet,
            Arc::new(MemorySink::default()),
            None,
            Some(11),
        )
        .unwrap()
    }

    fn quick() -> TrialConfig {
        TrialConfig {
            repetitions: 1,
            feedback_enabled: false,
            min_relax_duration_s: 0.1,
            max_relax_duration_s: 0.2,
            ..Default::default()
        }
    }

    #[test]
    fn start_only_from_idle() {
        let mut s = scheduler(quick());
        assert!(s.start().unwrap());
        assert_eq!(s.state(), SessionState::Relax);
        assert!(s.deadline().is_some());
        assert!(s.is_acquiring());
        assert!(!s.start().unwrap());
        assert_eq!(s.sequence().len(), 5);
        s.stop();
        assert!(!s.is_acquiring());
    }

    #[test]
    fn invalid_commands_are_ignored() {
        let mut s = scheduler(quick());
        assert!(!s.pause());
        assert!(!s.resume());
        assert!(!s.stop());
        assert_eq!(s.state(), SessionState::Idle);

        s.start().unwrap();
        assert!(!s.resume());
        assert!(s.pause());
        assert!(!s.pause());
        assert_eq!(s.state(), SessionState::Paused);
        s.stop();
    }

    #[test]
    fn phases_follow_timeouts() {
        let mut s = scheduler(quick());
        s.start().unwrap();
        s.on_phase_timeout();
        assert_eq!(s.state(), SessionState::Cue);
        assert_eq!(s.event_log().event_count(), 1);
        let task = s.current_task().unwrap();
        assert_eq!(
            s.event_log().events()[0].marker,
            s.config.markers.task_marker(task)
        );
        s.on_phase_timeout();
        assert_eq!(s.state(), SessionState::Recording);
        assert_eq!(s.event_log().event_count(), 1);
        s.on_phase_timeout();
        assert_eq!(s.state(), SessionState::Relax);
        assert_eq!(s.current_index(), 1);
        s.stop();
    }

    #[test]
    fn pause_in_recording_retracts_cue_marker_and_keeps_index() {
        let mut s = scheduler(quick());
        s.start().unwrap();
        s.on_phase_timeout();
        s.on_phase_timeout();
        assert_eq!(s.state(), SessionState::Recording);
        let index = s.current_index();

        assert!(s.pause());
        assert_eq!(s.event_log().event_count(), 0);
        assert!(s.deadline().is_none());
        assert!(s.is_acquiring());

        assert!(s.resume());
        assert_eq!(s.state(), SessionState::Relax);
        assert_eq!(s.current_index(), index);
        s.stop();
    }

    #[test]
    fn stop_returns_to_idle_and_allows_restart() {
        let mut s = scheduler(quick());
        s.start().unwrap();
        s.on_phase_timeout();
        assert!(s.stop());
        assert_eq!(s.state(), SessionState::Idle);
        assert_eq!(s.event_log().event_count(), 1);

        assert!(s.start().unwrap());
        assert_eq!(s.event_log().event_count(), 0);
        assert_eq!(s.current_index(), 0);
        s.stop();
    }

    #[test]
    fn last_trial_finishes_run() {
        let mut s = scheduler(quick());
        let mut events = s.subscribe();
        s.start().unwrap();
        for _ in 0..5 {
            s.on_phase_timeout();
            s.on_phase_timeout();
            s.on_phase_timeout();
        }
        assert_eq!(s.state(), SessionState::Finished);
        assert!(!s.is_acquiring());
        assert!(s.deadline().is_none());
        assert!(!s.stop());

        let mut saw_finished = false;
        while let Ok(event) = events.try_recv() {
            saw_finished |= event == SessionEvent::Finished;
        }
        assert!(saw_finished);
    }

    #[test]
    fn status_tracks_run_progress() {
        let mut s = scheduler(quick());
        let idle = s.status();
        assert_eq!(idle.state, SessionState::Idle);
        assert_eq!(idle.total_trials, 0);
        assert!(idle.started_at.is_none());

        s.start().unwrap();
        s.on_phase_timeout();
        let running = s.status();
        assert_eq!(running.state, SessionState::Cue);
        assert_eq!(running.trial_index, 0);
        assert_eq!(running.total_trials, 5);
        assert_eq!(running.events_logged, 1);
        assert!(running.started_at.is_some());
        assert_ne!(running.run_id, idle.run_id);

        let json = serde_json::to_value(&running).unwrap();
        assert_eq!(json["state"], "Cue");
        s.stop();
    }

    #[test]
    fn pipeline_for_other_channel_count_rejected() {
        let preprocessor =
            SignalPreprocessor::new(PreprocessingConfig::default(), 250.0, 17).unwrap();
        let classifier = Classifier::from_config(
            &ClassifierConfig::default(),
            preprocessor.output_geometry(),
            Some(1),
        )
        .unwrap();
        let pipeline = FeedbackPipeline::new(preprocessor, classifier).unwrap();

        let source = MockSignalSource::new(MockStreamConfig {
            channel_count: 16,
            ..Default::default()
        });
        let stream = source.discover().unwrap().remove(0);
        let inlet = source.connect(&stream).unwrap();
        let result = TrialScheduler::new(
            TrialConfig::default(),
            &StreamConfig::default(),
            inlet,
            Arc::new(MemorySink::default()),
            Some(pipeline),
            Some(1),
        );
        assert!(matches!(result, Err(ExperimentError::GeometryMismatch { .. })));
    }
}
