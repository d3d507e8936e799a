//! The simulation driver.
//!
//! Owns the root area, the event queue, the collectors, and the clock.
//! `run` advances the stepper to the event horizon, executes due events,
//! dispatches root triggers, and polls collectors, recording state
//! transitions and capturing errors into an error code rather than
//! unwinding through the solver.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use grid_base::{
    Alert, ChangeCode, ObjectError, PrintLevel, SolverMode, StateData, Time, Unit,
};
use thiserror::Error;
use tracing::{debug, error, info, trace, warn};

use crate::area::Area;
use crate::bus::CheckLevel;
use crate::collector::Collector;
use crate::component::ComponentKind;
use crate::events::{Event, EventQueue};
use crate::network::Network;
use crate::object::ObjectId;
use crate::stepper::{BasicStepper, StepOutcome, Stepper};

/// Driver state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum SimState {
    #[default]
    Startup,
    Initialized,
    PowerflowComplete,
    DynamicInitialized,
    DynamicPartial,
    DynamicComplete,
    Error,
    Halted,
}

/// Observer handle for reading the simulation clock from another thread.
#[derive(Debug, Clone)]
pub struct SimClock(Arc<AtomicU64>);

impl SimClock {
    pub fn now(&self) -> Time {
        Time::seconds(f64::from_bits(self.0.load(Ordering::Acquire)))
    }
}

#[derive(Debug, Error)]
pub enum SimError {
    #[error("power flow failed to converge: {0}")]
    PowerFlowFailed(String),

    #[error("simulation is in state {0:?}, expected at least {1:?}")]
    InvalidState(SimState, SimState),

    #[error("simulation halted")]
    Halted,

    #[error(transparent)]
    Object(#[from] ObjectError),
}

pub struct Simulation {
    pub net: Network,
    pub root: ObjectId,
    queue: EventQueue,
    collectors: Vec<Collector>,
    clock: Arc<AtomicU64>,
    pub start_time: Time,
    pub stop_time: Time,
    pub step_time: Time,
    pub record_stop: Time,
    pub max_update_time: Time,
    state: SimState,
    error_code: i32,
    console_level: PrintLevel,
    log_level: PrintLevel,
    record_directory: Option<PathBuf>,
    alert_count: u64,
    warn_count: u64,
    error_count: u64,
    seq: u64,
    state_vec: Vec<f64>,
    dstate_vec: Vec<f64>,
    layout_stale: bool,
}

impl Default for Simulation {
    fn default() -> Self {
        Simulation::new()
    }
}

impl Simulation {
    pub fn new() -> Simulation {
        let mut net = Network::new();
        let root = net.insert(ComponentKind::Area(Area::new()), Some("root".to_string()));
        Simulation {
            net,
            root,
            queue: EventQueue::new(),
            collectors: Vec::new(),
            clock: Arc::new(AtomicU64::new(0f64.to_bits())),
            start_time: Time::ZERO,
            stop_time: Time::seconds(30.0),
            step_time: Time::seconds(0.05),
            record_stop: Time::MAX,
            max_update_time: Time::seconds(10.0),
            state: SimState::Startup,
            error_code: 0,
            console_level: PrintLevel::Summary,
            log_level: PrintLevel::Summary,
            record_directory: None,
            alert_count: 0,
            warn_count: 0,
            error_count: 0,
            seq: 0,
            state_vec: Vec::new(),
            dstate_vec: Vec::new(),
            layout_stale: true,
        }
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn sim_state(&self) -> SimState {
        self.state
    }

    pub fn error_code(&self) -> i32 {
        self.error_code
    }

    pub fn alert_count(&self) -> u64 {
        self.alert_count
    }

    pub fn clock(&self) -> SimClock {
        SimClock(self.clock.clone())
    }

    pub fn current_time(&self) -> Time {
        Time::seconds(f64::from_bits(self.clock.load(Ordering::Acquire)))
    }

    fn set_time(&mut self, t: Time) {
        // monotonic non-decreasing
        let t = t.max(self.current_time());
        self.clock.store(t.as_secs().to_bits(), Ordering::Release);
    }

    pub fn event_count(&self) -> usize {
        self.queue.len()
    }

    pub fn next_event_time(&self) -> Time {
        self.queue.next_time(&self.net)
    }

    // ========================================================================
    // Configuration
    // ========================================================================

    pub fn add_event(&mut self, event: Event) {
        self.queue.insert(event);
    }

    pub fn add_collector(&mut self, mut collector: Collector) {
        if let Some(dir) = &self.record_directory {
            collector.set_directory(dir);
        }
        self.collectors.push(collector);
    }

    pub fn find_collector(&mut self, name: &str) -> Option<&mut Collector> {
        self.collectors
            .iter_mut()
            .find(|c| c.name() == name || c.sink_name() == name)
    }

    pub fn set_record_directory(&mut self, directory: PathBuf) {
        for collector in &mut self.collectors {
            collector.set_directory(&directory);
        }
        self.record_directory = Some(directory);
    }

    pub fn set_print_level(&mut self, level: PrintLevel) {
        self.console_level = level;
        self.log_level = level;
    }

    /// Simulation-level scalar parameters, sharing the case-insensitive
    /// convention of the object tree.
    pub fn set(&mut self, param: &str, value: f64) -> Result<(), ObjectError> {
        match param.to_ascii_lowercase().as_str() {
            "starttime" | "start" | "timestart" => self.start_time = Time::seconds(value),
            "stoptime" | "stop" | "timestop" => self.stop_time = Time::seconds(value),
            "steptime" | "step" | "timestep" => {
                if value <= 0.0 {
                    return Err(ObjectError::InvalidParameterValue(
                        param.to_string(),
                        "step must be positive".to_string(),
                    ));
                }
                self.step_time = Time::seconds(value);
            }
            "maxupdatetime" => self.max_update_time = Time::seconds(value),
            "recordstop" => self.record_stop = Time::seconds(value),
            "basepower" => self.net.set_base_power(value),
            "printlevel" => {
                let level = match value as i64 {
                    0 => PrintLevel::NoPrint,
                    1 => PrintLevel::Error,
                    2 => PrintLevel::Warning,
                    3 => PrintLevel::Summary,
                    4 => PrintLevel::Normal,
                    5 => PrintLevel::Debug,
                    6 => PrintLevel::Trace,
                    _ => {
                        return Err(ObjectError::InvalidParameterValue(
                            param.to_string(),
                            "print level out of range".to_string(),
                        ))
                    }
                };
                self.set_print_level(level);
            }
            _ => return Err(ObjectError::UnknownParameter(param.to_string())),
        }
        Ok(())
    }

    pub fn get(&self, param: &str) -> f64 {
        match param.to_ascii_lowercase().as_str() {
            "currenttime" | "time" => self.current_time().as_secs(),
            "starttime" => self.start_time.as_secs(),
            "stoptime" | "stop" => self.stop_time.as_secs(),
            "steptime" | "stepsize" => self.step_time.as_secs(),
            "eventtime" => self.next_event_time().as_secs(),
            "eventcount" => self.queue.len() as f64,
            "collectorcount" | "recordercount" => self.collectors.len() as f64,
            "alertcount" => self.alert_count as f64,
            "warncount" => self.warn_count as f64,
            "errorcount" => self.error_count as f64,
            "state" => self.state as i32 as f64,
            _ => self.net.get_value(self.root, param, Unit::Def),
        }
    }

    // ========================================================================
    // Logging
    // ========================================================================

    /// Print-level-filtered log with the fixed
    /// `(<time>)[<name>(<uid>)]:: <body>` prefix.
    pub fn log(&mut self, source: Option<ObjectId>, level: PrintLevel, message: &str) {
        if level > self.console_level && level > self.log_level {
            return;
        }
        let time = self.current_time();
        let who = match source {
            Some(id) if id != self.root => {
                let uid = self
                    .net
                    .get(id)
                    .map(|c| c.info.user_id)
                    .unwrap_or_default();
                format!("{}({})", self.net.full_name(id), uid)
            }
            _ => "sim".to_string(),
        };
        let key = match level {
            PrintLevel::Warning => {
                self.warn_count += 1;
                "||WARNING||"
            }
            PrintLevel::Error => {
                self.error_count += 1;
                "||ERROR||"
            }
            _ => "",
        };
        let line = format!("({time})[{who}]::{key}{message}");
        match level {
            PrintLevel::Error => error!("{line}"),
            PrintLevel::Warning => warn!("{line}"),
            PrintLevel::Summary | PrintLevel::Normal => info!("{line}"),
            PrintLevel::Debug => debug!("{line}"),
            _ => trace!("{line}"),
        }
    }

    fn enter_error(&mut self, code: i32, message: &str) {
        self.error_code = code;
        self.state = SimState::Error;
        self.log(None, PrintLevel::Error, message);
        self.flush_collectors();
    }

    // ========================================================================
    // Alert routing
    // ========================================================================

    /// Drain pending component alerts: scheduling alerts adjust the event
    /// queue, structural alerts mark the layout stale, fault codes are
    /// logged at summary level.
    pub fn process_alerts(&mut self) {
        let pending = self.net.drain_alerts();
        for (source, alert) in pending {
            match alert {
                Alert::UpdateTimeChange => self.queue.recheck(&self.net),
                Alert::UpdateRequired => self.queue.insert_object(source),
                Alert::UpdateNotRequired => {}
                a if a.is_structural() => {
                    self.layout_stale = true;
                }
                Alert::AlarmTrigger(code) => {
                    self.alert_count += 1;
                    self.log(
                        Some(source),
                        PrintLevel::Summary,
                        &format!("alarm trigger ({code})"),
                    );
                }
                other => {
                    self.alert_count += 1;
                    let text = other
                        .description()
                        .unwrap_or("unrecognized alert code");
                    self.log(Some(source), PrintLevel::Summary, text);
                }
            }
        }
    }

    // ========================================================================
    // Layout management
    // ========================================================================

    fn reload_layout(&mut self, mode: SolverMode) {
        let sizes = self.net.allocate_states(self.root, mode);
        let total = sizes.total();
        self.state_vec = vec![0.0; total];
        self.dstate_vec = vec![0.0; total];
        self.net
            .guess_state(self.root, &mut self.state_vec, &mut self.dstate_vec, mode);
        self.layout_stale = false;
        trace!(states = total, roots = sizes.alg_roots, "state layout reloaded");
    }

    // ========================================================================
    // Power flow
    // ========================================================================

    /// Solve the steady-state power flow with the local-convergence
    /// stepper, then apply bus limit adjustments until quiescent.
    pub fn power_flow(&mut self) -> Result<(), SimError> {
        let mode = SolverMode::POWER_FLOW;
        self.state = SimState::Initialized;
        self.net.pflow_init_tree(self.root);
        self.process_alerts();
        let tol = 1e-8;

        for round in 0..10 {
            self.reload_layout(mode);
            let mut converged = false;
            for _ in 0..50 {
                self.seq += 1;
                {
                    let sd = StateData::new(
                        self.current_time(),
                        &self.state_vec,
                        &self.dstate_vec,
                        self.seq,
                    );
                    self.net.update_caches(self.root, &sd, mode);
                }
                self.net.converge_tree(
                    self.root,
                    self.current_time(),
                    &mut self.state_vec,
                    &self.dstate_vec,
                    mode,
                    crate::bus::ConvergeMode::LocalIteration,
                    tol,
                );
                self.seq += 1;
                let sd = StateData::new(
                    self.current_time(),
                    &self.state_vec,
                    &self.dstate_vec,
                    self.seq,
                );
                let mut resid = vec![0.0; self.state_vec.len()];
                self.net.residual_tree(self.root, &sd, &mut resid, mode);
                let norm: f64 = resid.iter().map(|r| r.abs()).fold(0.0, f64::max);
                if norm < 1e-6 {
                    converged = true;
                    break;
                }
            }
            if !converged {
                self.enter_error(12, "power flow failed to converge");
                return Err(SimError::PowerFlowFailed(
                    "residual norm did not settle".to_string(),
                ));
            }
            let time = self.current_time();
            let state = std::mem::take(&mut self.state_vec);
            self.net.set_state(self.root, time, &state, mode);
            self.state_vec = state;

            let code =
                self.net
                    .power_flow_adjust_tree(self.root, false, CheckLevel::FullCheck);
            self.process_alerts();
            if code <= ChangeCode::NoChange {
                break;
            }
            debug!(round, code = ?code, "power flow adjustment changed the system, resolving");
        }

        self.state = SimState::PowerflowComplete;
        self.log(None, PrintLevel::Summary, "power flow complete");
        Ok(())
    }

    // ========================================================================
    // Dynamic simulation
    // ========================================================================

    /// Build relay conditions/actions, initialize blocks, and lay out the
    /// dynamic state.
    pub fn dynamic_init(&mut self) -> Result<(), SimError> {
        if self.state == SimState::Error {
            return Err(SimError::Halted);
        }
        if self.state < SimState::PowerflowComplete {
            self.power_flow()?;
        }
        let time = self.start_time.max(self.current_time());
        self.net.dyn_init_tree(self.root, time);
        self.process_alerts();
        self.reload_layout(SolverMode::DAE);
        self.state = SimState::DynamicInitialized;
        self.log(None, PrintLevel::Summary, "dynamic initialization complete");
        Ok(())
    }

    /// Run the dynamic simulation to `stop`.
    pub fn run(&mut self, stop: Time) -> Result<(), SimError> {
        if self.state == SimState::Error || self.state == SimState::Halted {
            return Err(SimError::Halted);
        }
        if self.state < SimState::DynamicInitialized {
            self.dynamic_init()?;
        }
        let mode = SolverMode::DAE;
        let stop = stop.min(self.record_stop);
        let mut stepper = BasicStepper::new(self.step_time);

        while self.current_time() < stop {
            if self.layout_stale {
                self.reload_layout(mode);
            }
            let now = self.current_time();
            let next_event = self.queue.next_time(&self.net);
            let target = next_event.min(now + self.max_update_time).min(stop);

            let (reached, outcome) = stepper.advance(
                &mut self.net,
                self.root,
                &mut self.state_vec,
                &mut self.dstate_vec,
                now,
                target,
                &mut self.seq,
            );
            self.set_time(reached);

            // persist solved state so re-layouts can reseed from members
            {
                let state = std::mem::take(&mut self.state_vec);
                self.net.set_state(self.root, reached, &state, mode);
                self.state_vec = state;
            }

            if outcome == StepOutcome::RootInterrupt {
                self.dispatch_roots(reached, mode);
            }

            // discrete root checks catch sampled relays and anything the
            // continuous scan missed
            {
                self.seq += 1;
                let sd = StateData::new(reached, &self.state_vec, &self.dstate_vec, self.seq);
                let net = &mut self.net;
                let root = self.root;
                let _ = net.root_check_tree(root, &sd, mode);
            }
            self.process_alerts();

            // execute due events
            let code = self.queue.execute_events(&mut self.net, reached);
            if code >= ChangeCode::JacobianChange {
                self.layout_stale = true;
            }
            if code == ChangeCode::ExecutionFailure {
                self.log(None, PrintLevel::Warning, "event execution failure");
            }
            self.process_alerts();

            for collector in &mut self.collectors {
                collector.poll(&self.net, reached);
            }

            if reached >= stop {
                break;
            }
        }

        self.state = if self.current_time() >= stop {
            SimState::DynamicComplete
        } else {
            SimState::DynamicPartial
        };
        Ok(())
    }

    /// Advance exactly one step interval.
    pub fn step(&mut self) -> Result<Time, SimError> {
        let target = self.current_time() + self.step_time;
        self.run(target)?;
        Ok(self.current_time())
    }

    fn dispatch_roots(&mut self, time: Time, mode: SolverMode) {
        let root_count = self.net.root_size(self.root, mode);
        if root_count == 0 {
            return;
        }
        let mut roots = vec![0.0; root_count];
        {
            self.seq += 1;
            let sd = StateData::new(time, &self.state_vec, &self.dstate_vec, self.seq);
            self.net.root_test_tree(self.root, &sd, &mut roots, mode);
        }
        let mask = self.net.root_crossings(self.root, &roots, mode);
        if mask.iter().any(|m| *m) {
            self.net.root_trigger_tree(self.root, time, &mask, mode);
            self.process_alerts();
        }
    }

    /// Halt the run loop and flush collectors.
    pub fn halt(&mut self) {
        self.state = SimState::Halted;
        self.flush_collectors();
    }

    pub fn flush_collectors(&mut self) {
        let mut failures = Vec::new();
        for collector in &mut self.collectors {
            if let Err(e) = collector.flush() {
                failures.push(format!("{}: {e}", collector.name()));
            }
        }
        for failure in failures {
            self.log(
                None,
                PrintLevel::Error,
                &format!("unable to flush collector {failure}"),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::Bus;

    #[test]
    fn clock_is_monotonic_and_observable() {
        let mut sim = Simulation::new();
        let observer = sim.clock();
        sim.set_time(Time::seconds(2.0));
        assert_eq!(observer.now(), Time::seconds(2.0));
        // attempts to move backward are ignored
        sim.set_time(Time::seconds(1.0));
        assert_eq!(observer.now(), Time::seconds(2.0));
    }

    #[test]
    fn sim_parameters() {
        let mut sim = Simulation::new();
        sim.set("stoptime", 12.0).unwrap();
        assert_eq!(sim.get("stoptime"), 12.0);
        assert!(sim.set("steptime", -1.0).is_err());
        assert!(matches!(
            sim.set("warpfactor", 9.0),
            Err(ObjectError::UnknownParameter(_))
        ));
    }

    #[test]
    fn state_transition_order() {
        assert!(SimState::Startup < SimState::Initialized);
        assert!(SimState::Initialized < SimState::PowerflowComplete);
        assert!(SimState::PowerflowComplete < SimState::DynamicInitialized);
        assert!(SimState::DynamicInitialized < SimState::DynamicComplete);
    }

    #[test]
    fn trivial_power_flow() {
        let mut sim = Simulation::new();
        let root = sim.root;
        let bus = sim
            .net
            .add_child(root, ComponentKind::Bus(Bus::new()), None)
            .unwrap();
        sim.net.bus_mut(bus).unwrap().bus_type = crate::bus::BusType::Slk;
        sim.net.bus_mut(bus).unwrap().prev_type = crate::bus::BusType::Slk;
        sim.power_flow().unwrap();
        assert_eq!(sim.sim_state(), SimState::PowerflowComplete);
        assert_eq!(sim.net.bus(bus).unwrap().voltage, 1.0);
    }
}
