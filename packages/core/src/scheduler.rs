//! Real-time sub-event scheduler
//!
//! A single actor task owns the attached analysis, the latest player state
//! and one timer per category. Everything reaches it as a [`Command`] over
//! an unbounded channel, including the timers' own ticks, so its state is
//! never shared.
//!
//! On every run a category looks up the interval matching the estimated
//! position, emits it and arms a timer for the moment it ends. Bars look
//! for the next bar starting at or after the position; every other
//! category takes the latest one that has started. Close to the start of
//! the track the first interval is used whatever the rule says.

use std::sync::Arc;
use std::time::Duration;

use beatsync_shared_config::SyncConfig;
use beatsync_spotify_client::{AnalysisResult, Interval, TimeInterval};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::events::{PlaybackEvent, SegmentEvent};
use crate::lifecycle::Lifecycle;
use crate::model::PlayerState;
use crate::position::{position_secs, Clock};

/// Receives every event the scheduler emits
pub type EventSink = Arc<dyn Fn(PlaybackEvent) + Send + Sync>;

// =============================================================================
// Interval lookup
// =============================================================================

/// Sub-event category, in emission order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    Tatum,
    Segment,
    Section,
    Beat,
    Bar,
}

impl Category {
    pub const ALL: [Category; 5] = [
        Category::Tatum,
        Category::Segment,
        Category::Section,
        Category::Beat,
        Category::Bar,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Category::Tatum => "tatum",
            Category::Segment => "segment",
            Category::Section => "section",
            Category::Beat => "beat",
            Category::Bar => "bar",
        }
    }

    pub fn rule(self) -> Rule {
        match self {
            Category::Bar => Rule::NextUpcoming,
            _ => Rule::MostRecent,
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

/// How an interval is picked for a position
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rule {
    /// Latest interval with `start <= position`
    MostRecent,
    /// Earliest interval with `start >= position`
    NextUpcoming,
}

/// Index of the interval to fire at `position` (seconds)
///
/// `items` must be sorted by start. With `close_to_start`, a position the
/// rule finds nothing for falls back to the first interval unless it has
/// already ended.
pub fn find_interval<I: Interval>(
    items: &[I],
    position: f64,
    rule: Rule,
    close_to_start: bool,
) -> Option<usize> {
    let first = items.first()?;

    let found = match rule {
        Rule::MostRecent => {
            let after = items.partition_point(|item| item.interval().start <= position);
            after.checked_sub(1)
        }
        Rule::NextUpcoming => {
            let index = items.partition_point(|item| item.interval().start < position);
            (index < items.len()).then_some(index)
        }
    };

    found.or_else(|| (close_to_start && first.interval().end() > position).then_some(0))
}

/// Sorted by start with finite, non-negative spans
pub fn is_schedulable<I: Interval>(items: &[I]) -> bool {
    items.iter().all(|item| item.interval().is_well_formed())
        && items
            .windows(2)
            .all(|pair| pair[0].interval().start <= pair[1].interval().start)
}

struct Attached {
    analysis: Arc<AnalysisResult>,
    track_uri: String,
    schedulable: [bool; 5],
}

impl Attached {
    fn new(analysis: Arc<AnalysisResult>, track_uri: String) -> Self {
        let schedulable = Category::ALL.map(|category| match category {
            Category::Tatum => is_schedulable(&analysis.tatums),
            Category::Segment => is_schedulable(&analysis.segments),
            Category::Section => is_schedulable(&analysis.sections),
            Category::Beat => is_schedulable(&analysis.beats),
            Category::Bar => is_schedulable(&analysis.bars),
        });
        Self {
            analysis,
            track_uri,
            schedulable,
        }
    }

    fn locate(&self, category: Category, position: f64, close_to_start: bool) -> Option<usize> {
        let analysis = &self.analysis;
        let rule = category.rule();
        match category {
            Category::Tatum => find_interval(&analysis.tatums, position, rule, close_to_start),
            Category::Segment => find_interval(&analysis.segments, position, rule, close_to_start),
            Category::Section => find_interval(&analysis.sections, position, rule, close_to_start),
            Category::Beat => find_interval(&analysis.beats, position, rule, close_to_start),
            Category::Bar => find_interval(&analysis.bars, position, rule, close_to_start),
        }
    }

    fn interval(&self, category: Category, index: usize) -> Option<TimeInterval> {
        let analysis = &self.analysis;
        match category {
            Category::Tatum => analysis.tatums.get(index).copied(),
            Category::Segment => analysis.segments.get(index).map(|s| s.interval),
            Category::Section => analysis.sections.get(index).map(|s| s.interval),
            Category::Beat => analysis.beats.get(index).copied(),
            Category::Bar => analysis.bars.get(index).copied(),
        }
    }

    fn event(&self, category: Category, index: usize) -> Option<PlaybackEvent> {
        let analysis = &self.analysis;
        let event = match category {
            Category::Tatum => PlaybackEvent::Tatum(*analysis.tatums.get(index)?),
            Category::Beat => PlaybackEvent::Beat(*analysis.beats.get(index)?),
            Category::Bar => PlaybackEvent::Bar(*analysis.bars.get(index)?),
            Category::Section => PlaybackEvent::Section(analysis.sections.get(index)?.clone()),
            Category::Segment => PlaybackEvent::Segment(SegmentEvent {
                current: analysis.segments.get(index)?.clone(),
                next: analysis.segments.get(index + 1).cloned(),
                second_next: analysis.segments.get(index + 2).cloned(),
            }),
        };
        Some(event)
    }
}

// =============================================================================
// Actor
// =============================================================================

/// Scheduler timing parameters
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Delay before re-evaluating after play state changes
    pub update_debounce: Duration,
    /// Retry delay when a category has nothing to fire
    pub defer: Duration,
    /// Positions below this (seconds) use each category's first interval
    pub close_to_start_secs: f64,
}

impl SchedulerConfig {
    pub fn from_sync(config: &SyncConfig) -> Self {
        Self {
            update_debounce: config.update_debounce(),
            defer: config.defer(),
            close_to_start_secs: config.close_to_start_secs,
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self::from_sync(&SyncConfig::default())
    }
}

/// What the scheduler is currently doing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// No analysis attached
    Idle,
    /// Timers running
    Armed,
    /// Analysis attached but playback is paused or stopped
    Suspended,
}

enum Command {
    Attach {
        analysis: Arc<AnalysisResult>,
        state: Arc<PlayerState>,
    },
    Lifecycle {
        event: Lifecycle,
        state: Arc<PlayerState>,
    },
    Tick {
        category: Category,
        generation: u64,
    },
    Update {
        generation: u64,
    },
    Shutdown,
}

struct Scheduler {
    config: SchedulerConfig,
    clock: Arc<dyn Clock>,
    sink: EventSink,
    commands: mpsc::UnboundedSender<Command>,
    phase: watch::Sender<Phase>,
    attached: Option<Attached>,
    state: Option<Arc<PlayerState>>,
    timers: [Option<JoinHandle<()>>; 5],
    generations: [u64; 5],
    update_timer: Option<JoinHandle<()>>,
    update_generation: u64,
}

impl Scheduler {
    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        while let Some(command) = commands.recv().await {
            match command {
                Command::Attach { analysis, state } => self.attach(analysis, state),
                Command::Lifecycle { event, state } => self.lifecycle(event, state),
                Command::Tick {
                    category,
                    generation,
                } => {
                    if self.generations[category.index()] == generation {
                        self.run_category(category);
                    } else {
                        trace!(category = category.name(), "Ignoring stale tick");
                    }
                }
                Command::Update { generation } => {
                    if self.update_generation == generation {
                        self.update();
                    }
                }
                Command::Shutdown => break,
            }
        }
        debug!("Scheduler stopped");
    }

    fn attach(&mut self, analysis: Arc<AnalysisResult>, state: Arc<PlayerState>) {
        let keep_current = match &self.state {
            Some(current) if current.track.uri != state.track.uri => {
                debug!(
                    attached = %state.track.uri,
                    current = %current.track.uri,
                    "Ignoring analysis for a track that is no longer playing"
                );
                return;
            }
            Some(current) => current.timestamp > state.timestamp,
            None => false,
        };
        if !keep_current {
            self.state = Some(state);
        }

        let track_uri = self
            .state
            .as_ref()
            .map(|state| state.track.uri.clone())
            .unwrap_or_default();
        let attached = Attached::new(analysis.clone(), track_uri);
        for category in Category::ALL {
            if !attached.schedulable[category.index()] {
                warn!(category = category.name(), "Analysis intervals are not schedulable");
            }
        }
        self.attached = Some(attached);

        self.cancel_update();
        (self.sink)(PlaybackEvent::Change(analysis));
        self.update();
    }

    fn lifecycle(&mut self, event: Lifecycle, state: Arc<PlayerState>) {
        self.state = Some(state.clone());

        match event {
            Lifecycle::Track => {
                let stale = self
                    .attached
                    .as_ref()
                    .map_or(false, |attached| attached.track_uri != state.track.uri);
                if stale {
                    debug!(track = %state.track.uri, "Track changed, dropping analysis");
                    self.attached = None;
                    self.cancel_update();
                    self.cancel_all();
                }
                if self.attached.is_none() {
                    self.set_phase(Phase::Idle);
                }
            }
            Lifecycle::Paused | Lifecycle::Stopped => {
                self.cancel_all();
                self.set_phase(if self.attached.is_some() {
                    Phase::Suspended
                } else {
                    Phase::Idle
                });
                self.schedule_update();
            }
            Lifecycle::Resumed | Lifecycle::Started | Lifecycle::Position => {
                self.schedule_update();
            }
            Lifecycle::Duration | Lifecycle::Options => {}
        }
    }

    /// Cancel everything and re-arm or suspend from the current state
    fn update(&mut self) {
        self.cancel_all();

        let active = self.state.as_ref().map_or(false, |state| state.is_active());
        match (&self.attached, active) {
            (None, _) => self.set_phase(Phase::Idle),
            (Some(_), false) => self.set_phase(Phase::Suspended),
            (Some(_), true) => {
                self.set_phase(Phase::Armed);
                for category in Category::ALL {
                    self.run_category(category);
                }
            }
        }
    }

    fn run_category(&mut self, category: Category) {
        self.cancel_timer(category);

        let (Some(attached), Some(state)) = (&self.attached, &self.state) else {
            return;
        };
        let position = position_secs(state, self.clock.as_ref());
        let close_to_start = position < self.config.close_to_start_secs;

        let found = attached.schedulable[category.index()]
            .then(|| attached.locate(category, position, close_to_start))
            .flatten()
            .and_then(|index| {
                let remaining = attached.interval(category, index)?.end() - position;
                (remaining > 0.0).then_some((index, remaining))
            });

        let delay = match found {
            Some((index, remaining)) => {
                if let Some(event) = attached.event(category, index) {
                    (self.sink)(event);
                }
                // Whole milliseconds, rounded up so the tick lands past the end
                Duration::from_millis((remaining * 1000.0).ceil() as u64)
            }
            None => {
                trace!(category = category.name(), position, "Nothing to fire, deferring");
                self.config.defer
            }
        };

        self.arm_timer(category, delay);
    }

    fn arm_timer(&mut self, category: Category, delay: Duration) {
        let slot = category.index();
        self.generations[slot] += 1;
        let command = Command::Tick {
            category,
            generation: self.generations[slot],
        };
        self.timers[slot] = Some(self.send_after(delay, command));
    }

    fn cancel_timer(&mut self, category: Category) {
        let slot = category.index();
        self.generations[slot] += 1;
        if let Some(timer) = self.timers[slot].take() {
            timer.abort();
        }
    }

    fn cancel_all(&mut self) {
        for category in Category::ALL {
            self.cancel_timer(category);
        }
    }

    fn schedule_update(&mut self) {
        self.cancel_update();
        let command = Command::Update {
            generation: self.update_generation,
        };
        self.update_timer = Some(self.send_after(self.config.update_debounce, command));
    }

    fn cancel_update(&mut self) {
        self.update_generation += 1;
        if let Some(timer) = self.update_timer.take() {
            timer.abort();
        }
    }

    fn send_after(&self, delay: Duration, command: Command) -> JoinHandle<()> {
        let commands = self.commands.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = commands.send(command);
        })
    }

    fn set_phase(&self, phase: Phase) {
        self.phase.send_if_modified(|current| {
            if *current == phase {
                return false;
            }
            debug!(from = ?*current, to = ?phase, "Scheduler phase changed");
            *current = phase;
            true
        });
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.cancel_update();
        self.cancel_all();
    }
}

// =============================================================================
// Handle
// =============================================================================

/// Owner of a running scheduler; dropping it stops the task and its timers
pub struct SchedulerHandle {
    commands: mpsc::UnboundedSender<Command>,
    phase: watch::Receiver<Phase>,
    task: JoinHandle<()>,
}

impl std::fmt::Debug for SchedulerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchedulerHandle")
            .field("phase", &self.phase())
            .finish()
    }
}

impl SchedulerHandle {
    /// Start the scheduler task; must be called inside a tokio runtime
    pub fn spawn(config: SchedulerConfig, clock: Arc<dyn Clock>, sink: EventSink) -> Self {
        let (commands, receiver) = mpsc::unbounded_channel();
        let (phase_tx, phase) = watch::channel(Phase::Idle);

        let scheduler = Scheduler {
            config,
            clock,
            sink,
            commands: commands.clone(),
            phase: phase_tx,
            attached: None,
            state: None,
            timers: Default::default(),
            generations: [0; 5],
            update_timer: None,
            update_generation: 0,
        };
        let task = tokio::spawn(scheduler.run(receiver));

        Self {
            commands,
            phase,
            task,
        }
    }

    /// Attach an analysis resolved for `state`
    pub fn attach(&self, analysis: Arc<AnalysisResult>, state: Arc<PlayerState>) {
        self.send(Command::Attach { analysis, state });
    }

    /// Forward a lifecycle transition
    pub fn lifecycle(&self, event: Lifecycle, state: Arc<PlayerState>) {
        self.send(Command::Lifecycle { event, state });
    }

    pub fn phase(&self) -> Phase {
        *self.phase.borrow()
    }

    /// Receiver notified on every phase change
    pub fn watch_phase(&self) -> watch::Receiver<Phase> {
        self.phase.clone()
    }

    /// Stop the task after the commands already queued
    pub fn shutdown(&self) {
        self.send(Command::Shutdown);
    }

    fn send(&self, command: Command) {
        if self.commands.send(command).is_err() {
            debug!("Scheduler already stopped");
        }
    }
}

impl Drop for SchedulerHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}
