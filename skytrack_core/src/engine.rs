//! Simulation Engine - autonomous flight toward a destination.
//!
//! The engine owns zero or more active per-(session, tracker) tasks. Each
//! task is one spawned loop that sleeps for the tick period, reads the
//! latest persisted location, plans the next step ([`crate::flight`]) and
//! appends the result to the [`crate::store::LocationStore`]. Pollers
//! observe progress exclusively through the store - there is no push
//! channel.
//!
//! Task lifecycle: CREATED -> RUNNING -> {ARRIVED, STOPPED, FAILED}, all
//! terminal. A fresh start after termination is a brand-new task with no
//! memory of prior obstacle history.
//!
//! Ticks for one key are serialized by construction (a single loop awaits
//! each tick to completion). Stopping invalidates the task synchronously;
//! a tick already past its cancellation check completes its write.

use crate::flight::{self, EngineConfig, ObstacleState, TickPlan};
use crate::location::{
    validate_coordinates, validate_tracker_id, DeliveryStatus, LocationRecord, ObstacleType,
    TrackerKey, ValidationError,
};
use crate::store::{LocationStore, StoreError};
use skytrack_env::Environment;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::sync::watch;
use tracing::{error, info};

/// Errors surfaced by [`SimulationEngine::start`].
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Registry entry for one running task.
///
/// The watch sender doubles as the cancellation signal: sending `true`
/// invalidates the task's timer before `stop` returns. The id guards
/// against a finished task deregistering its replacement.
struct TaskHandle {
    task_id: u64,
    cancel: watch::Sender<bool>,
}

/// Owns the active simulation tasks for one deployment.
///
/// The registry is an explicit collection bound to the engine value, not a
/// process-wide singleton; dropping the engine drops every handle.
pub struct SimulationEngine<C: Environment> {
    ctx: Arc<C>,
    store: Arc<dyn LocationStore>,
    config: EngineConfig,
    tasks: Arc<Mutex<HashMap<TrackerKey, TaskHandle>>>,
    next_task_id: AtomicU64,
}

impl<C: Environment> SimulationEngine<C> {
    pub fn new(ctx: Arc<C>, store: Arc<dyn LocationStore>, config: EngineConfig) -> Self {
        Self {
            ctx,
            store,
            config,
            tasks: Arc::new(Mutex::new(HashMap::new())),
            next_task_id: AtomicU64::new(1),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Starts (or takes over) the simulation for a key.
    ///
    /// Any existing task for the key is fully cancelled first; obstacle
    /// memory never carries over. The starting point is the latest stored
    /// location, or the configured fallback origin for an unseen tracker.
    /// A seed "moving" record is appended before the first tick is
    /// scheduled, so a poller observes a position immediately. Returns once
    /// the task is registered; never waits for a tick.
    pub async fn start(
        &self,
        tracker_id: &str,
        destination: [f64; 2],
        session_id: &str,
    ) -> Result<(), EngineError> {
        validate_tracker_id(tracker_id)?;
        validate_coordinates(destination[0], destination[1])?;
        let destination = (destination[0], destination[1]);
        let key = TrackerKey::new(tracker_id, session_id);

        if self.cancel_task(&key) {
            info!(
                tracker = %key.tracker_id,
                session = %key.session_id,
                "taking over existing simulation"
            );
        }

        let (start_point, seed_altitude, seed_heading) =
            match self.store.latest(tracker_id, session_id).await? {
                Some(record) => ((record.latitude, record.longitude), record.altitude, record.heading),
                None => (self.config.fallback_origin, 0.0, 0.0),
            };

        // Seed record: a poller sees a position before the first tick elapses.
        // A store failure here leaves no task registered.
        self.store
            .append(LocationRecord {
                tracker_id: key.tracker_id.clone(),
                session_id: key.session_id.clone(),
                latitude: start_point.0,
                longitude: start_point.1,
                altitude: seed_altitude,
                heading: seed_heading,
                status: DeliveryStatus::Moving,
                obstacle_type: ObstacleType::None,
                created_at: 0,
            })
            .await?;

        let task_id = self.next_task_id.fetch_add(1, Ordering::Relaxed);
        let (cancel_tx, cancel_rx) = watch::channel(false);
        self.tasks.lock().unwrap().insert(
            key.clone(),
            TaskHandle {
                task_id,
                cancel: cancel_tx,
            },
        );

        info!(
            tracker = %key.tracker_id,
            session = %key.session_id,
            dest_lat = destination.0,
            dest_lng = destination.1,
            "simulation started"
        );

        let ctx = Arc::clone(&self.ctx);
        let store = Arc::clone(&self.store);
        let config = self.config.clone();
        let tasks = Arc::clone(&self.tasks);
        let loop_key = key.clone();
        self.ctx.spawn(&format!("sim:{}", key), async move {
            run_flight(
                ctx, store, config, tasks, loop_key, task_id, destination, start_point, cancel_rx,
            )
            .await;
        });

        Ok(())
    }

    /// Stops the simulation for a key, if one is running.
    ///
    /// Idempotent: stopping an absent key is a no-op. Returns whether a
    /// task was cancelled. The timer is invalidated before this returns; a
    /// tick already in flight may still complete its write.
    pub fn stop(&self, tracker_id: &str, session_id: &str) -> bool {
        let key = TrackerKey::new(tracker_id, session_id);
        let stopped = self.cancel_task(&key);
        if stopped {
            info!(
                tracker = %key.tracker_id,
                session = %key.session_id,
                "simulation stopped"
            );
        }
        stopped
    }

    /// Number of currently active tasks.
    pub fn active_count(&self) -> usize {
        self.tasks.lock().unwrap().len()
    }

    /// Whether a task is currently running for the key.
    pub fn is_active(&self, tracker_id: &str, session_id: &str) -> bool {
        let key = TrackerKey::new(tracker_id, session_id);
        self.tasks.lock().unwrap().contains_key(&key)
    }

    /// Removes the handle and signals cancellation. The send happens while
    /// the handle is still owned here, so the loop always observes `true`
    /// rather than a dropped channel.
    fn cancel_task(&self, key: &TrackerKey) -> bool {
        let handle = self.tasks.lock().unwrap().remove(key);
        match handle {
            Some(handle) => {
                let _ = handle.cancel.send(true);
                true
            }
            None => false,
        }
    }
}

enum TickResult {
    EnRoute,
    Arrived,
}

/// The per-task tick loop. Exits on arrival, cancellation or store failure.
#[allow(clippy::too_many_arguments)]
async fn run_flight<C: Environment>(
    ctx: Arc<C>,
    store: Arc<dyn LocationStore>,
    config: EngineConfig,
    tasks: Arc<Mutex<HashMap<TrackerKey, TaskHandle>>>,
    key: TrackerKey,
    task_id: u64,
    destination: (f64, f64),
    start_point: (f64, f64),
    mut cancel: watch::Receiver<bool>,
) {
    let mut obstacle = ObstacleState::new();
    loop {
        tokio::select! {
            _ = ctx.sleep(config.tick_period) => {}
            _ = cancel.changed() => {}
        }
        if *cancel.borrow() {
            // Stopped or replaced; the handle is already gone.
            break;
        }

        match run_tick(
            ctx.as_ref(),
            store.as_ref(),
            &config,
            &key,
            destination,
            start_point,
            &mut obstacle,
        )
        .await
        {
            Ok(TickResult::EnRoute) => {}
            Ok(TickResult::Arrived) => {
                info!(
                    tracker = %key.tracker_id,
                    session = %key.session_id,
                    "destination reached"
                );
                remove_if_current(&tasks, &key, task_id);
                break;
            }
            Err(err) => {
                // Fatal to this task only; the caller must reissue start.
                error!(
                    tracker = %key.tracker_id,
                    session = %key.session_id,
                    error = %err,
                    "tick failed, terminating simulation"
                );
                remove_if_current(&tasks, &key, task_id);
                break;
            }
        }
    }
}

/// One tick: read latest, plan, append. Either the append fully succeeds
/// and becomes visible, or the tick has no effect.
async fn run_tick<C: Environment>(
    ctx: &C,
    store: &dyn LocationStore,
    config: &EngineConfig,
    key: &TrackerKey,
    destination: (f64, f64),
    start_point: (f64, f64),
    obstacle: &mut ObstacleState,
) -> Result<TickResult, StoreError> {
    let current = match store.latest(&key.tracker_id, &key.session_id).await? {
        Some(record) => (record.latitude, record.longitude),
        None => start_point,
    };

    let mut draw = || ctx.rand_unit();
    match flight::plan_tick(current, destination, obstacle, &mut draw, config) {
        TickPlan::Arrived => {
            store
                .append(LocationRecord {
                    tracker_id: key.tracker_id.clone(),
                    session_id: key.session_id.clone(),
                    latitude: destination.0,
                    longitude: destination.1,
                    altitude: 0.0,
                    heading: 0.0,
                    status: DeliveryStatus::Delivered,
                    obstacle_type: ObstacleType::None,
                    created_at: 0,
                })
                .await?;
            Ok(TickResult::Arrived)
        }
        TickPlan::Step {
            latitude,
            longitude,
            altitude,
            heading,
            obstacle: kind,
        } => {
            store
                .append(LocationRecord {
                    tracker_id: key.tracker_id.clone(),
                    session_id: key.session_id.clone(),
                    latitude,
                    longitude,
                    altitude,
                    heading,
                    status: DeliveryStatus::Moving,
                    obstacle_type: kind,
                    created_at: 0,
                })
                .await?;
            Ok(TickResult::EnRoute)
        }
    }
}

/// Deregisters a finished task, but only if the registry still points at
/// this task - a replacement started in the meantime must stay registered.
fn remove_if_current(
    tasks: &Mutex<HashMap<TrackerKey, TaskHandle>>,
    key: &TrackerKey,
    task_id: u64,
) {
    let mut tasks = tasks.lock().unwrap();
    if tasks.get(key).map(|handle| handle.task_id) == Some(task_id) {
        tasks.remove(key);
    }
}
