//! Worker hatchery: a small M/M/c-heuristic autoscaler and supervisor
//! for the out-of-scope worker roles (fact extraction, drift checking,
//! action planning, status summarization) that feed proposals into the
//! governance pipeline.
//!
//! A pure sizing calculation is kept separate from the stateful pool that
//! actually holds live handles, the way an allocation strategy stays
//! decoupled from the resource-pool bookkeeping it feeds.

use crate::error::HatcheryError;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

/// Static sizing and supervision policy for one worker role.
#[derive(Debug, Clone)]
pub struct RoleConfig {
    pub role: String,
    pub min_instances: u32,
    pub max_instances: u32,
    /// Target utilization ρ fed into the M/M/c sizing formula.
    pub target_utilization: f64,
    /// Service rate μ: jobs this role can process per second, per instance.
    pub service_rate_per_instance: f64,
    /// Window over which arrivals are counted to estimate λ.
    pub arrival_window: Duration,
    pub max_restarts: u32,
    pub restart_window: Duration,
    pub shutdown_grace: Duration,
    /// The convergence dimension this role's output most directly advances,
    /// used only to break scale-up ties under capacity pressure.
    pub dimension: Option<String>,
    /// Consumer lag above which `c*` is bumped regardless of the M/M/c
    /// figure, and the floor lag must also clear before that bump applies.
    pub lag_threshold: u64,
    pub activation_lag_threshold: u64,
    /// An instance silent longer than this is presumed dead and drained.
    pub heartbeat_timeout: Duration,
    /// Minimum time between scale-down ticks for a role.
    pub scale_down_cooldown: Duration,
}

impl RoleConfig {
    pub fn new(role: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            min_instances: 1,
            max_instances: 8,
            target_utilization: 0.7,
            service_rate_per_instance: 1.0,
            arrival_window: Duration::from_secs(60),
            max_restarts: 5,
            restart_window: Duration::from_secs(60),
            shutdown_grace: Duration::from_secs(10),
            dimension: None,
            lag_threshold: 100,
            activation_lag_threshold: 50,
            heartbeat_timeout: Duration::from_secs(60),
            scale_down_cooldown: Duration::from_secs(30),
        }
    }
}

/// Tracks arrival timestamps in a sliding window and reports λ (arrivals
/// per second).
#[derive(Debug, Default)]
pub struct ArrivalRateEstimator {
    timestamps: VecDeque<Instant>,
    window: Duration,
}

impl ArrivalRateEstimator {
    pub fn new(window: Duration) -> Self {
        Self {
            timestamps: VecDeque::new(),
            window,
        }
    }

    pub fn record_arrival(&mut self, now: Instant) {
        self.timestamps.push_back(now);
        self.evict_stale(now);
    }

    fn evict_stale(&mut self, now: Instant) {
        while let Some(front) = self.timestamps.front() {
            if now.duration_since(*front) > self.window {
                self.timestamps.pop_front();
            } else {
                break;
            }
        }
    }

    /// λ over the retained window; `0.0` once the window has no arrivals.
    pub fn arrival_rate(&mut self, now: Instant) -> f64 {
        self.evict_stale(now);
        if self.timestamps.is_empty() {
            return 0.0;
        }
        self.timestamps.len() as f64 / self.window.as_secs_f64().max(1.0)
    }
}

/// Little's Law readout (`L = λ / μ`), reported on [`HatcheryEvent::ScaledUp`]
/// and friends but never used to gate scaling — only `desired_instances`
/// governs that.
pub fn little_law_l(lambda: f64, mu: f64) -> f64 {
    if mu <= 0.0 {
        0.0
    } else {
        lambda / mu
    }
}

/// M/M/c sizing heuristic: the smallest instance count `c` such that the
/// per-instance utilization `λ / (c·μ)` does not exceed `target_utilization`,
/// clamped to `[min_instances, max_instances]`.
pub fn desired_instances(lambda: f64, mu: f64, config: &RoleConfig) -> u32 {
    if lambda <= 0.0 || mu <= 0.0 {
        return config.min_instances;
    }
    let raw = lambda / (mu * config.target_utilization.max(f64::EPSILON));
    let c = raw.ceil().max(1.0) as u32;
    c.clamp(config.min_instances, config.max_instances.max(config.min_instances))
}

/// Bumps a base `c*` when consumer lag clears both the per-role lag
/// threshold and the activation floor: `min(ceil(lag/lag_threshold) +
/// current, max_instances)`. Below the activation floor, lag is ignored —
/// a role that is merely a little behind should not be scaled off of lag
/// alone while the arrival-rate estimate still has headroom to say so.
pub fn apply_lag_pressure(
    base: u32,
    lag: u64,
    current: u32,
    config: &RoleConfig,
) -> u32 {
    if config.lag_threshold == 0 || lag <= config.lag_threshold || lag <= config.activation_lag_threshold {
        return base;
    }
    let bumped = (lag as f64 / config.lag_threshold as f64).ceil() as u32 + current;
    base.max(bumped.min(config.max_instances.max(config.min_instances)))
}

/// A live worker task, identified for supervision and targeted shutdown.
pub struct InstanceHandle {
    pub instance_id: Uuid,
    pub spawned_at: Instant,
    pub shutdown: CancellationToken,
    pub join: JoinHandle<()>,
}

/// Events the hatchery emits for logging/metrics consumers.
#[derive(Debug, Clone)]
pub enum HatcheryEvent {
    ScaledUp { role: String, count: u32, little_l: f64 },
    ScaledDown { role: String, count: u32 },
    InstanceCrashed { role: String, instance_id: Uuid },
    RestartBudgetExhausted { role: String },
    Heartbeat { role: String, alive_count: u32 },
    HeartbeatTimeout { role: String, instance_id: Uuid },
}

/// Spawns worker tasks for a role. Spawning itself is synchronous — it's
/// the spawned task that's async — so this is a plain trait, not
/// `#[async_trait]`; callers invoke `tokio::spawn` from an otherwise
/// synchronous method.
pub trait WorkerFactory: Send + Sync {
    fn spawn(&self, role: &str, shutdown: CancellationToken) -> JoinHandle<()>;
}

struct RoleState {
    config: RoleConfig,
    instances: Vec<InstanceHandle>,
    arrivals: ArrivalRateEstimator,
    restart_timestamps: VecDeque<Instant>,
    exhausted: bool,
    /// In-flight job count; a scale-down tick is a no-op while this is
    /// nonzero, so a busy instance is never yanked mid-work.
    in_flight: u32,
    consumer_lag: u64,
    last_scaled_down: Option<Instant>,
    heartbeats: HashMap<Uuid, Instant>,
}

impl RoleState {
    fn new(config: RoleConfig) -> Self {
        let arrivals = ArrivalRateEstimator::new(config.arrival_window);
        Self {
            config,
            instances: Vec::new(),
            arrivals,
            restart_timestamps: VecDeque::new(),
            exhausted: false,
            in_flight: 0,
            consumer_lag: 0,
            last_scaled_down: None,
            heartbeats: HashMap::new(),
        }
    }
}

/// Supervises a set of worker roles: sizes each against its own estimated
/// arrival rate, restarts crashed instances up to a bounded intensity, and
/// tears roles down gracefully within their configured grace window.
pub struct Hatchery {
    factory: Arc<dyn WorkerFactory>,
    roles: Mutex<HashMap<String, RoleState>>,
}

impl Hatchery {
    pub fn new(factory: Arc<dyn WorkerFactory>) -> Self {
        Self {
            factory,
            roles: Mutex::new(HashMap::new()),
        }
    }

    pub fn register_role(&self, config: RoleConfig) {
        let role = config.role.clone();
        self.roles.lock().insert(role, RoleState::new(config));
    }

    pub fn record_arrival(&self, role: &str) {
        if let Some(state) = self.roles.lock().get_mut(role) {
            state.arrivals.record_arrival(Instant::now());
        }
    }

    /// Records the observed consumer lag (in messages) for a role, fed into
    /// [`apply_lag_pressure`] on the next tick.
    pub fn record_lag(&self, role: &str, lag: u64) {
        if let Some(state) = self.roles.lock().get_mut(role) {
            state.consumer_lag = lag;
        }
    }

    /// Marks a job as started/finished against a role's in-flight counter;
    /// a scale-down tick only drains instances while this is zero.
    pub fn job_started(&self, role: &str) {
        if let Some(state) = self.roles.lock().get_mut(role) {
            state.in_flight += 1;
        }
    }

    pub fn job_finished(&self, role: &str) {
        if let Some(state) = self.roles.lock().get_mut(role) {
            state.in_flight = state.in_flight.saturating_sub(1);
        }
    }

    /// Records a liveness signal from a running instance.
    pub fn heartbeat(&self, role: &str, instance_id: Uuid) {
        if let Some(state) = self.roles.lock().get_mut(role) {
            state.heartbeats.insert(instance_id, Instant::now());
        }
    }

    /// Picks which of several under-provisioned roles should get the next
    /// instance when only one slot of headroom is available, by favoring
    /// the role whose dimension carries the highest convergence pressure.
    /// Ties (including roles with no associated dimension) favor role name
    /// order, for determinism.
    pub fn pick_scale_target(
        candidates: &[String],
        pressure: &HashMap<String, f64>,
        dimension_of: &HashMap<String, String>,
    ) -> Option<String> {
        candidates
            .iter()
            .max_by(|a, b| {
                let pa = dimension_of.get(*a).and_then(|d| pressure.get(d)).copied().unwrap_or(0.0);
                let pb = dimension_of.get(*b).and_then(|d| pressure.get(d)).copied().unwrap_or(0.0);
                pa.partial_cmp(&pb)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| b.cmp(a))
            })
            .cloned()
    }

    /// Reconciles a single role's live instance count against
    /// [`desired_instances`], spawning or cancelling instances as needed.
    /// Returns the events generated so the caller can log/publish them.
    pub fn tick(&self, role: &str) -> Result<Vec<HatcheryEvent>, HatcheryError> {
        let mut events = Vec::new();
        let mut roles = self.roles.lock();
        let state = roles
            .get_mut(role)
            .ok_or_else(|| HatcheryError::UnknownRole(role.to_string()))?;

        if state.exhausted {
            return Ok(events);
        }

        self.reap_finished(state, &mut events);
        self.drain_stale_heartbeats(state, &mut events);

        let now = Instant::now();
        let lambda = state.arrivals.arrival_rate(now);
        let mu = state.config.service_rate_per_instance;
        let current = state.instances.len() as u32;
        let base = desired_instances(lambda, mu, &state.config);
        let desired = apply_lag_pressure(base, state.consumer_lag, current, &state.config);

        if desired > current {
            let to_spawn = desired - current;
            for _ in 0..to_spawn {
                self.spawn_one(state);
            }
            events.push(HatcheryEvent::ScaledUp {
                role: role.to_string(),
                count: to_spawn,
                little_l: little_law_l(lambda, mu),
            });
        } else if desired < current {
            let cooldown_elapsed = state
                .last_scaled_down
                .map(|t| now.duration_since(t) >= state.config.scale_down_cooldown)
                .unwrap_or(true);
            if state.in_flight == 0 && cooldown_elapsed {
                let to_stop = current - desired;
                for _ in 0..to_stop {
                    // `Vec::pop` removes the most recently pushed (newest)
                    // instance first, so scale-down drains newest-first.
                    if let Some(instance) = state.instances.pop() {
                        state.heartbeats.remove(&instance.instance_id);
                        instance.shutdown.cancel();
                    }
                }
                state.last_scaled_down = Some(now);
                events.push(HatcheryEvent::ScaledDown {
                    role: role.to_string(),
                    count: to_stop,
                });
            }
        }

        events.push(HatcheryEvent::Heartbeat {
            role: role.to_string(),
            alive_count: state.instances.len() as u32,
        });
        Ok(events)
    }

    /// Drains any instance that hasn't reported a heartbeat within its
    /// role's `heartbeat_timeout`, treating silence as death.
    fn drain_stale_heartbeats(&self, state: &mut RoleState, events: &mut Vec<HatcheryEvent>) {
        let now = Instant::now();
        let timeout = state.config.heartbeat_timeout;
        let stale: Vec<Uuid> = state
            .instances
            .iter()
            .filter(|inst| {
                state
                    .heartbeats
                    .get(&inst.instance_id)
                    .map(|last| now.duration_since(*last) > timeout)
                    .unwrap_or(now.duration_since(inst.spawned_at) > timeout)
            })
            .map(|inst| inst.instance_id)
            .collect();
        if stale.is_empty() {
            return;
        }
        let stale_set: std::collections::HashSet<Uuid> = stale.into_iter().collect();
        state.instances.retain(|inst| {
            if stale_set.contains(&inst.instance_id) {
                inst.shutdown.cancel();
                false
            } else {
                true
            }
        });
        for id in &stale_set {
            state.heartbeats.remove(id);
            events.push(HatcheryEvent::HeartbeatTimeout {
                role: state.config.role.clone(),
                instance_id: *id,
            });
        }
    }

    fn spawn_one(&self, state: &mut RoleState) {
        let shutdown = CancellationToken::new();
        let join = self.factory.spawn(&state.config.role, shutdown.clone());
        let instance_id = Uuid::new_v4();
        let now = Instant::now();
        state.heartbeats.insert(instance_id, now);
        state.instances.push(InstanceHandle {
            instance_id,
            spawned_at: now,
            shutdown,
            join,
        });
    }

    /// Drops finished instance handles and, for any that finished without
    /// being asked to (a crash), attempts a bounded restart.
    fn reap_finished(&self, state: &mut RoleState, events: &mut Vec<HatcheryEvent>) {
        let mut crashed_ids = Vec::new();
        state.instances.retain(|instance| {
            if instance.join.is_finished() && !instance.shutdown.is_cancelled() {
                crashed_ids.push(instance.instance_id);
                false
            } else {
                true
            }
        });
        for id in &crashed_ids {
            state.heartbeats.remove(id);
        }

        for instance_id in crashed_ids {
            events.push(HatcheryEvent::InstanceCrashed {
                role: state.config.role.clone(),
                instance_id,
            });
            if !self.record_restart_and_check_budget(state) {
                state.exhausted = true;
                events.push(HatcheryEvent::RestartBudgetExhausted {
                    role: state.config.role.clone(),
                });
                warn!(role = state.config.role.as_str(), "restart budget exhausted");
                return;
            }
            self.spawn_one(state);
        }
    }

    /// Records a restart attempt in the sliding window and reports whether
    /// the role is still within its bounded restart-intensity budget.
    fn record_restart_and_check_budget(&self, state: &mut RoleState) -> bool {
        let now = Instant::now();
        while let Some(front) = state.restart_timestamps.front() {
            if now.duration_since(*front) > state.config.restart_window {
                state.restart_timestamps.pop_front();
            } else {
                break;
            }
        }
        state.restart_timestamps.push_back(now);
        state.restart_timestamps.len() as u32 <= state.config.max_restarts
    }

    /// Cancels every instance of `role` and waits up to its configured
    /// grace window for them to finish before returning — instances still
    /// running past the grace window are left to finish on their own, the
    /// join handles simply dropped.
    pub async fn shutdown_role(&self, role: &str) {
        let (instances, grace) = {
            let mut roles = self.roles.lock();
            match roles.get_mut(role) {
                Some(state) => (std::mem::take(&mut state.instances), state.config.shutdown_grace),
                None => return,
            }
        };
        for instance in &instances {
            instance.shutdown.cancel();
        }
        let deadline = tokio::time::sleep(grace);
        tokio::pin!(deadline);
        let mut joins: Vec<std::pin::Pin<Box<JoinHandle<()>>>> =
            instances.into_iter().map(|i| Box::pin(i.join)).collect();
        while !joins.is_empty() {
            tokio::select! {
                _ = &mut deadline => {
                    info!(role, remaining = joins.len(), "shutdown grace window elapsed");
                    break;
                }
                (_result, _index, remaining) = futures::future::select_all(joins) => {
                    joins = remaining;
                }
            }
        }
    }

    /// Runs [`Self::tick`] for every registered role on a fixed cadence
    /// until `shutdown` is cancelled, then gracefully tears every role
    /// down.
    pub async fn run(&self, interval: Duration, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    let roles: Vec<String> = self.roles.lock().keys().cloned().collect();
                    for role in roles {
                        self.shutdown_role(&role).await;
                    }
                    return;
                }
                _ = ticker.tick() => {
                    let roles: Vec<String> = self.roles.lock().keys().cloned().collect();
                    for role in roles {
                        if let Err(err) = self.tick(&role) {
                            warn!(role = role.as_str(), error = %err, "hatchery tick failed");
                        }
                    }
                }
            }
        }
    }
}
