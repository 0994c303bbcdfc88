//! Runtime and tick loop.
//!
//! One frame runs every enabled schedule in the configured order:
//!
//! 1. Run `ModStartup` once if mods added systems to it since the last frame.
//! 2. At the first fixed schedule, run every fixed schedule zero or more
//!    times, as the fixed-timestep accumulator allows.
//! 3. Run the remaining schedules.
//!
//! Each schedule runs its batches one after another. Systems of a batch run
//! in parallel on the blocking pool against a shared world; once the last
//! batch finishes, the runtime takes the world back and applies every command
//! buffer exclusively, in plan order.
//!
//! The world stays owned by the runtime while workers hold clones of it. If a
//! stage future is dropped mid-stage, its workers keep running in the
//! runtime's worker set and the stage's commands are discarded;
//! [`Runtime::settle`] waits for them and returns the runtime to `Idle`.
//!
//! A mod runs in one or more entity scopes: the world, and any sandbox the
//! host grants it. Its systems are registered once per scope, limited to the
//! schedules that scope enables.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use modecs_component::{Entity, EntityScope, World};
use modecs_system::{ApplyReport, SystemOutcome, SystemRunner};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::config::RuntimeConfig;
use crate::error::{ConfigError, RuntimeError};
use crate::registry::{ScheduleSystems, SystemRegistry};
use crate::schedule::{ModSchedules, Schedule};
use crate::scheduler::{RegisteredSystem, SchedulePlan};
use crate::setup::{Mod, ModId, ModSetup};

/// What the runtime is doing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeState {
    /// Between stages.
    Idle,
    /// Systems of this schedule are running.
    RunningStage(Schedule),
    /// Command buffers of this schedule are being applied.
    ApplyingCommands(Schedule),
    /// Shut down; no further stages run.
    Terminated,
}

/// Summary of one schedule execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageReport {
    /// The schedule that ran.
    pub schedule: Schedule,
    /// Systems invoked.
    pub systems: usize,
    /// Batches executed.
    pub batches: usize,
    /// Invocations that trapped.
    pub trapped: usize,
    /// Command application totals.
    pub commands: ApplyReport,
}

impl StageReport {
    fn empty(schedule: Schedule) -> Self {
        Self {
            schedule,
            systems: 0,
            batches: 0,
            trapped: 0,
            commands: ApplyReport::default(),
        }
    }
}

/// Summary of one frame.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FrameReport {
    /// The frame's tick id.
    pub tick_id: u64,
    /// Fixed steps taken this frame.
    pub fixed_steps: u32,
    /// Every schedule that had systems to run, in execution order.
    pub stages: Vec<StageReport>,
}

impl FrameReport {
    /// Total trapped invocations in the frame.
    #[must_use]
    pub fn trapped(&self) -> usize {
        self.stages.iter().map(|stage| stage.trapped).sum()
    }
}

#[derive(Debug)]
struct LoadedMod {
    name: Arc<str>,
    systems: Vec<(Schedule, SystemRunner)>,
    access: BTreeSet<EntityScope>,
    entities: HashSet<Entity>,
}

impl LoadedMod {
    fn additions(
        &self,
        mod_id: ModId,
        scope: EntityScope,
        schedules: &ModSchedules,
    ) -> Vec<(Schedule, Vec<RegisteredSystem>)> {
        let mut additions: Vec<(Schedule, Vec<RegisteredSystem>)> = Vec::new();
        for (schedule, runner) in &self.systems {
            if !schedules.contains(schedule) {
                continue;
            }
            let registered =
                RegisteredSystem::new(mod_id, Arc::clone(&self.name), scope, runner.clone());
            match additions.iter_mut().find(|(existing, _)| existing == schedule) {
                Some((_, systems)) => systems.push(registered),
                None => additions.push((schedule.clone(), vec![registered])),
            }
        }
        additions
    }
}

/// The host runtime: owns the world, the loaded mods and their systems.
#[derive(Debug)]
pub struct Runtime {
    config: RuntimeConfig,
    world: Arc<World>,
    workers: JoinSet<(usize, SystemOutcome)>,
    registry: SystemRegistry,
    mods: HashMap<ModId, LoadedMod>,
    sandboxes: HashMap<Entity, ModSchedules>,
    state: RuntimeState,
    tick_id: u64,
    fixed_accumulator: f64,
}

impl Default for Runtime {
    fn default() -> Self {
        Self::from_valid_config(RuntimeConfig::default())
    }
}

impl Runtime {
    /// Create a runtime with an empty world.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if the config fails
    /// [`RuntimeConfig::validate`].
    pub fn new(config: RuntimeConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self::from_valid_config(config))
    }

    fn from_valid_config(config: RuntimeConfig) -> Self {
        Self {
            config,
            world: Arc::new(World::new()),
            workers: JoinSet::new(),
            registry: SystemRegistry::new(),
            mods: HashMap::new(),
            sandboxes: HashMap::new(),
            state: RuntimeState::Idle,
            tick_id: 0,
            fixed_accumulator: 0.0,
        }
    }

    /// The runtime configuration.
    #[must_use]
    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Returns a reference to the world.
    #[must_use]
    pub fn world(&self) -> &World {
        &self.world
    }

    /// Returns a mutable reference to the world.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::WorldBusy`] while workers of an interrupted
    /// stage still run.
    pub fn world_mut(&mut self) -> Result<&mut World, RuntimeError> {
        Arc::get_mut(&mut self.world).ok_or(RuntimeError::WorldBusy)
    }

    /// Returns a reference to the system registry.
    #[must_use]
    pub fn registry(&self) -> &SystemRegistry {
        &self.registry
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> &RuntimeState {
        &self.state
    }

    /// Returns the current tick counter.
    #[must_use]
    pub fn tick_id(&self) -> u64 {
        self.tick_id
    }

    /// Number of loaded mods.
    #[must_use]
    pub fn mod_count(&self) -> usize {
        self.mods.len()
    }

    /// Name of a loaded mod.
    #[must_use]
    pub fn mod_name(&self, mod_id: ModId) -> Option<&str> {
        self.mods.get(&mod_id).map(|loaded| &*loaded.name)
    }

    /// Live entities spawned by a mod's commands.
    #[must_use]
    pub fn mod_entity_count(&self, mod_id: ModId) -> Option<usize> {
        self.mods.get(&mod_id).map(|loaded| loaded.entities.len())
    }

    /// The scopes a mod currently runs in.
    #[must_use]
    pub fn mod_access(&self, mod_id: ModId) -> Option<Vec<EntityScope>> {
        self.mods
            .get(&mod_id)
            .map(|loaded| loaded.access.iter().copied().collect())
    }

    // -- Mods --

    /// Load a mod: run its setup and register its systems in the world scope.
    ///
    /// # Errors
    ///
    /// Returns the [`ConfigError`] raised by setup or by planning the mod's
    /// schedules. On error nothing is registered.
    pub fn load_mod(&mut self, m: &dyn Mod) -> Result<ModId, ConfigError> {
        if self.state == RuntimeState::Terminated {
            return Err(ConfigError::Terminated);
        }

        let mod_id = ModId::new();
        let mod_name: Arc<str> = Arc::from(m.name());
        let mut setup = ModSetup::new(mod_id, &mod_name);
        if let Err(err) = m.setup(&mut setup) {
            error!(mod_name = &*mod_name, error = %err, "mod setup failed");
            return Err(err);
        }

        let mut systems = Vec::new();
        for (schedule, system) in setup.into_systems() {
            if !self.config.schedules.contains(&schedule) {
                warn!(
                    mod_name = &*mod_name,
                    system = system.name(),
                    %schedule,
                    "schedule not enabled, system ignored"
                );
                continue;
            }
            systems.push((schedule, SystemRunner::new(system)));
        }

        let loaded = LoadedMod {
            name: Arc::clone(&mod_name),
            systems,
            access: BTreeSet::from([EntityScope::World]),
            entities: HashSet::new(),
        };
        let additions = loaded.additions(mod_id, EntityScope::World, &self.config.schedules);
        if let Err(err) = self.registry.register(additions) {
            error!(mod_name = &*mod_name, error = %err, "mod rejected");
            return Err(err);
        }

        let count = loaded.systems.len();
        self.mods.insert(mod_id, loaded);
        info!(mod_name = &*mod_name, %mod_id, systems = count, "mod loaded");
        Ok(mod_id)
    }

    /// Unload a mod: remove its systems in every scope and, if configured,
    /// despawn the entities its commands spawned.
    ///
    /// Returns the number of systems removed.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::UnknownMod`] if the mod is not loaded and
    /// [`RuntimeError::WorldBusy`] while an interrupted stage still runs.
    pub fn unload_mod(&mut self, mod_id: ModId) -> Result<usize, RuntimeError> {
        if !self.mods.contains_key(&mod_id) {
            return Err(ConfigError::UnknownMod(mod_id).into());
        }
        let world = Arc::get_mut(&mut self.world).ok_or(RuntimeError::WorldBusy)?;
        let removed = self.registry.remove_mod(mod_id)?;
        let Some(loaded) = self.mods.remove(&mod_id) else {
            return Err(ConfigError::UnknownMod(mod_id).into());
        };

        let mut despawned = 0;
        if self.config.despawn_mod_entities {
            for entity in loaded.entities {
                if world.despawn(entity).is_ok() {
                    despawned += 1;
                }
            }
        }
        info!(
            mod_name = &*loaded.name,
            %mod_id,
            systems = removed,
            despawned,
            "mod unloaded"
        );
        Ok(removed)
    }

    // -- Sandboxes --

    /// Create a sandbox that runs the given schedules.
    ///
    /// Schedules the host has not enabled are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::Terminated`] after shutdown and
    /// [`RuntimeError::WorldBusy`] while an interrupted stage still runs.
    pub fn create_sandbox(&mut self, schedules: ModSchedules) -> Result<Entity, RuntimeError> {
        if self.state == RuntimeState::Terminated {
            return Err(RuntimeError::Terminated);
        }
        let mut enabled = Vec::with_capacity(schedules.len());
        for schedule in &schedules {
            if self.config.schedules.contains(schedule) {
                enabled.push(schedule.clone());
            } else {
                warn!(%schedule, "schedule not enabled, ignored for sandbox");
            }
        }
        let enabled = ModSchedules::new(enabled)?;

        let root = self.world_mut()?.spawn_sandbox();
        info!(%root, schedules = enabled.len(), "sandbox created");
        self.sandboxes.insert(root, enabled);
        Ok(root)
    }

    /// The schedules a sandbox runs.
    #[must_use]
    pub fn sandbox_schedules(&self, root: Entity) -> Option<&ModSchedules> {
        self.sandboxes.get(&root)
    }

    /// Number of live sandboxes created by the runtime.
    #[must_use]
    pub fn sandbox_count(&self) -> usize {
        self.sandboxes.len()
    }

    /// Despawn a sandbox with everything inside it, and drop every system
    /// running in it.
    ///
    /// Returns the number of entities despawned, the root included.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::UnknownSandbox`] for entities that are not a
    /// runtime sandbox and [`RuntimeError::WorldBusy`] while an interrupted
    /// stage still runs.
    pub fn remove_sandbox(&mut self, root: Entity) -> Result<usize, RuntimeError> {
        if !self.sandboxes.contains_key(&root) {
            return Err(ConfigError::UnknownSandbox(root).into());
        }
        let world = self.world_mut()?;
        let before = world.entity_count();
        // Already gone if the sandbox was despawned this frame.
        let _ = world.despawn(root);
        let despawned = before - world.entity_count();

        let removed = self.forget_sandbox(root);
        info!(%root, systems = removed, despawned, "sandbox removed");
        Ok(despawned)
    }

    /// Let a mod run in `scope` as well. Its systems are registered for the
    /// schedules that scope enables; `ModStartup` systems run again there.
    ///
    /// Returns `false` if the mod already had this access.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::UnknownMod`], [`ConfigError::UnknownSandbox`] or
    /// the error raised by planning the affected schedules.
    pub fn enable_access(&mut self, mod_id: ModId, scope: EntityScope) -> Result<bool, ConfigError> {
        if self.state == RuntimeState::Terminated {
            return Err(ConfigError::Terminated);
        }
        let Some(loaded) = self.mods.get(&mod_id) else {
            return Err(ConfigError::UnknownMod(mod_id));
        };
        let schedules = match scope {
            EntityScope::World => &self.config.schedules,
            EntityScope::Sandbox(root) => self
                .sandboxes
                .get(&root)
                .ok_or(ConfigError::UnknownSandbox(root))?,
        };
        if loaded.access.contains(&scope) {
            return Ok(false);
        }

        let additions = loaded.additions(mod_id, scope, schedules);
        let count: usize = additions.iter().map(|(_, systems)| systems.len()).sum();
        self.registry.register(additions)?;
        if let Some(loaded) = self.mods.get_mut(&mod_id) {
            loaded.access.insert(scope);
            info!(mod_name = &*loaded.name, %mod_id, %scope, systems = count, "access enabled");
        }
        Ok(true)
    }

    /// Stop a mod from running in `scope`.
    ///
    /// Returns `false` if the mod did not have this access.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::UnknownMod`] if the mod is not loaded.
    pub fn disable_access(&mut self, mod_id: ModId, scope: EntityScope) -> Result<bool, ConfigError> {
        let Some(loaded) = self.mods.get(&mod_id) else {
            return Err(ConfigError::UnknownMod(mod_id));
        };
        if !loaded.access.contains(&scope) {
            return Ok(false);
        }
        let removed = self.registry.remove_access(mod_id, scope)?;
        if let Some(loaded) = self.mods.get_mut(&mod_id) {
            loaded.access.remove(&scope);
            info!(mod_name = &*loaded.name, %mod_id, %scope, systems = removed, "access disabled");
        }
        Ok(true)
    }

    fn forget_sandbox(&mut self, root: Entity) -> usize {
        self.sandboxes.remove(&root);
        let scope = EntityScope::Sandbox(root);
        for loaded in self.mods.values_mut() {
            loaded.access.remove(&scope);
        }
        match self.registry.remove_scope(scope) {
            Ok(removed) => removed,
            Err(err) => {
                error!(%root, error = %err, "failed to drop sandbox systems");
                0
            }
        }
    }

    // -- Execution --

    /// Wait for workers left behind by an interrupted stage, then return to
    /// `Idle`.
    ///
    /// Every stage settles first, so hosts only need this to regain
    /// [`Runtime::world_mut`] after dropping a stage future.
    pub async fn settle(&mut self) {
        let mut abandoned = 0usize;
        while self.workers.join_next().await.is_some() {
            abandoned += 1;
        }
        if matches!(
            self.state,
            RuntimeState::RunningStage(_) | RuntimeState::ApplyingCommands(_)
        ) {
            let orphaned = Arc::get_mut(&mut self.world).map_or(0, World::discard_reserved);
            warn!(
                tick_id = self.tick_id,
                state = ?self.state,
                abandoned,
                orphaned,
                "recovered from an interrupted stage, its commands were discarded"
            );
            self.state = RuntimeState::Idle;
        }
    }

    /// Run every system of one schedule, then apply their commands.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::Terminated`] after [`Runtime::shutdown`].
    pub async fn run_schedule(&mut self, schedule: &Schedule) -> Result<StageReport, RuntimeError> {
        if self.state == RuntimeState::Terminated {
            return Err(RuntimeError::Terminated);
        }
        let Some(entry) = self.registry.get(schedule) else {
            return Ok(StageReport::empty(schedule.clone()));
        };
        let systems = entry.systems.clone();
        let plan = entry.plan.clone();
        self.execute(schedule, systems, plan).await
    }

    /// Run one frame.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::Terminated`] after [`Runtime::shutdown`].
    pub async fn update(&mut self, dt: f64) -> Result<FrameReport, RuntimeError> {
        if self.state == RuntimeState::Terminated {
            return Err(RuntimeError::Terminated);
        }
        self.settle().await;
        self.tick_id += 1;
        let mut report = FrameReport {
            tick_id: self.tick_id,
            ..FrameReport::default()
        };

        let schedules: Vec<Schedule> = self.config.schedules.iter().cloned().collect();
        let fixed: Vec<Schedule> = schedules.iter().filter(|s| s.is_fixed()).cloned().collect();
        let mut fixed_done = false;

        debug!(tick_id = self.tick_id, dt, "frame start");

        for schedule in &schedules {
            if schedule.is_fixed() {
                if fixed_done {
                    continue;
                }
                fixed_done = true;
                report.fixed_steps = self.fixed_steps(dt);
                for _ in 0..report.fixed_steps {
                    for fixed_schedule in &fixed {
                        if self.registry.has_systems(fixed_schedule) {
                            report.stages.push(self.run_schedule(fixed_schedule).await?);
                        }
                    }
                }
            } else if *schedule == Schedule::ModStartup {
                if let Some(ScheduleSystems { systems, plan }) = self.registry.take(schedule) {
                    report.stages.push(self.execute(schedule, systems, plan).await?);
                }
            } else if self.registry.has_systems(schedule) {
                report.stages.push(self.run_schedule(schedule).await?);
            }
        }

        Ok(report)
    }

    /// Run frames at the configured tick rate until `max_ticks` frames have
    /// run (0 = until shutdown).
    ///
    /// Returns the number of frames run.
    ///
    /// # Errors
    ///
    /// Returns the first [`RuntimeError`] raised by a frame.
    pub async fn run(&mut self) -> Result<u64, RuntimeError> {
        let tick_duration = self.config.tick_duration()?;
        let mut tick_count = 0u64;

        info!(
            tick_rate = self.config.tick_rate,
            max_ticks = self.config.max_ticks,
            mods = self.mods.len(),
            sandboxes = self.sandboxes.len(),
            "starting tick loop"
        );

        while self.state != RuntimeState::Terminated {
            let start = Instant::now();

            let frame = self.update(tick_duration.as_secs_f64()).await?;
            if frame.trapped() > 0 {
                warn!(
                    tick_id = frame.tick_id,
                    trapped = frame.trapped(),
                    "systems trapped this frame"
                );
            }

            tick_count += 1;
            if self.config.max_ticks > 0 && tick_count >= self.config.max_ticks {
                info!(ticks = tick_count, "tick loop complete");
                break;
            }

            let elapsed = start.elapsed();
            if elapsed < tick_duration {
                tokio::time::sleep(tick_duration - elapsed).await;
            } else {
                warn!(
                    tick_id = self.tick_id,
                    elapsed_ms = elapsed.as_millis() as u64,
                    budget_ms = tick_duration.as_millis() as u64,
                    "tick exceeded time budget"
                );
            }
        }

        Ok(tick_count)
    }

    /// Stop the runtime. Later stage runs and mod loads fail.
    pub fn shutdown(&mut self) {
        if self.state != RuntimeState::Terminated {
            info!(tick_id = self.tick_id, "runtime shut down");
            self.state = RuntimeState::Terminated;
        }
    }

    fn fixed_steps(&mut self, dt: f64) -> u32 {
        let step = self.config.fixed_timestep();
        self.fixed_accumulator += dt.max(0.0);
        let mut steps = 0;
        while self.fixed_accumulator >= step && steps < self.config.max_fixed_steps_per_frame {
            self.fixed_accumulator -= step;
            steps += 1;
        }
        if self.fixed_accumulator >= step {
            warn!(
                tick_id = self.tick_id,
                backlog_steps = (self.fixed_accumulator / step) as u64,
                "fixed timestep backlog dropped"
            );
            self.fixed_accumulator %= step;
        }
        steps
    }

    async fn execute(
        &mut self,
        schedule: &Schedule,
        systems: Vec<RegisteredSystem>,
        plan: SchedulePlan,
    ) -> Result<StageReport, RuntimeError> {
        self.settle().await;
        self.state = RuntimeState::RunningStage(schedule.clone());
        debug!(
            tick_id = self.tick_id,
            %schedule,
            systems = systems.len(),
            batches = plan.batches.len(),
            "running stage"
        );

        let tick_id = self.tick_id;
        let mut outcomes: Vec<Option<SystemOutcome>> = (0..systems.len()).map(|_| None).collect();
        let mut trapped = 0;

        for (batch_idx, batch) in plan.batches.iter().enumerate() {
            debug!(
                %schedule,
                batch = batch_idx,
                systems = batch.system_indices.len(),
                "executing batch"
            );
            for &idx in &batch.system_indices {
                let runner = systems[idx].runner.clone();
                let scope = systems[idx].scope;
                let world = Arc::clone(&self.world);
                self.workers
                    .spawn_blocking(move || (idx, runner.run_in(&world, scope, tick_id)));
            }
            while let Some(joined) = self.workers.join_next().await {
                match joined {
                    Ok((idx, outcome)) => outcomes[idx] = Some(outcome),
                    Err(err) => {
                        error!(%schedule, error = %err, "system worker failed");
                        trapped += 1;
                    }
                }
            }
        }

        let Some(world) = Arc::get_mut(&mut self.world) else {
            error!(%schedule, "world still shared after stage");
            self.state = RuntimeState::Idle;
            return Err(RuntimeError::WorldShared(schedule.clone()));
        };

        self.state = RuntimeState::ApplyingCommands(schedule.clone());
        world.flush_reserved();
        let mut commands = ApplyReport::default();
        for &idx in &plan.order {
            let Some(outcome) = outcomes[idx].take() else {
                continue;
            };
            if let Err(trap) = &outcome.result {
                error!(%schedule, system = %outcome.system, error = %trap, "system trapped");
                trapped += 1;
            }
            let applied = outcome.commands.apply(world);
            if let Some(loaded) = self.mods.get_mut(&systems[idx].mod_id) {
                loaded.entities.extend(applied.spawned.iter().copied());
            }
            commands.merge(applied);
        }
        for loaded in self.mods.values_mut() {
            loaded.entities.retain(|&entity| world.is_alive(entity));
        }

        let vanished: Vec<Entity> = self
            .sandboxes
            .keys()
            .copied()
            .filter(|&root| !self.world.is_sandbox(root))
            .collect();
        for root in vanished {
            let removed = self.forget_sandbox(root);
            info!(%schedule, %root, systems = removed, "sandbox despawned, its systems dropped");
        }
        self.state = RuntimeState::Idle;

        debug!(
            %schedule,
            applied = commands.applied,
            dropped = commands.dropped,
            trapped,
            "stage complete"
        );

        Ok(StageReport {
            schedule: schedule.clone(),
            systems: systems.len(),
            batches: plan.batches.len(),
            trapped,
            commands,
        })
    }
}
