//! Shared runtime state of one run
//!
//! [`Status`] owns the registries of machine controls and automata, the slot
//! scheduler, the domain state and the controller's inbound queue. Registry
//! reads take the shared side of one reader/writer lock; adding or removing a
//! control or an automaton takes the exclusive side.

use crate::automaton::{Automaton, HandlerOutcome};
use crate::control::{machine_main, MachineControl};
use crate::machine::{run_states, LocalVars, Machine, MachineContext, MachineHandle, StartMode};
use crate::policy;
use crate::session::Session;
use crate::view::{MachineView, StatusView};
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use parking_lot::{Mutex, RwLock};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rondo_core::{
    ConfigValidation, EngineConfig, EngineError, MachineKey, MetaContext, Result, Scheduler,
    Signal, SignalKind, Slot, SlotContext, SlotKind, SlotPayload, SlotProcessor,
};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Counters collected over one run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunStats {
    /// Critical-section entries
    pub entries: u64,
    /// Machines that deregistered themselves
    pub terminated: u64,
    /// Controller decisions taken
    pub decisions: u64,
    /// Choice points recorded
    pub choice_points: u64,
    /// Highest number of simultaneous holders observed
    pub max_holders: usize,
    /// Machines admitted, in admission order
    pub admissions: Vec<MachineKey>,
    holders: usize,
}

#[derive(Default)]
struct Registry {
    controls: BTreeMap<MachineKey, Arc<MachineControl>>,
    automata: BTreeMap<String, Arc<Automaton>>,
    holder: Option<MachineKey>,
    live: bool,
    stopping: bool,
}

/// Shared runtime state
pub struct Status {
    config: EngineConfig,
    session: Arc<Session>,
    registry: RwLock<Registry>,
    scheduler: Mutex<Scheduler>,
    meta: Mutex<Box<dyn MetaContext>>,
    slot_processor: Arc<dyn SlotProcessor>,
    inbound_tx: Sender<Signal>,
    inbound_rx: Receiver<Signal>,
    stats: Mutex<RunStats>,
    fatal: Mutex<Option<EngineError>>,
    mutations: AtomicU64,
    next_id: AtomicU64,
    rng: Mutex<ChaCha8Rng>,
    threads: Mutex<Vec<JoinHandle<()>>>,
    terminations_seen: AtomicUsize,
}

impl Status {
    /// Create the state of a fresh run. The scheduler starts with the
    /// end-of-simulation sentinel at `config.ttl`.
    pub fn new(
        config: EngineConfig,
        session: Arc<Session>,
        meta: Box<dyn MetaContext>,
        slot_processor: Arc<dyn SlotProcessor>,
    ) -> Result<Arc<Self>> {
        config.validate()?;
        let (inbound_tx, inbound_rx) = bounded(config.queue_capacity);
        Ok(Arc::new(Self {
            scheduler: Mutex::new(Scheduler::new(config.ttl)),
            rng: Mutex::new(ChaCha8Rng::seed_from_u64(config.seed)),
            config,
            session,
            registry: RwLock::new(Registry::default()),
            meta: Mutex::new(meta),
            slot_processor,
            inbound_tx,
            inbound_rx,
            stats: Mutex::new(RunStats::default()),
            fatal: Mutex::new(None),
            mutations: AtomicU64::new(0),
            next_id: AtomicU64::new(0),
            threads: Mutex::new(Vec::new()),
            terminations_seen: AtomicUsize::new(0),
        }))
    }

    /// Engine configuration
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Session this run belongs to
    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    /// Current virtual time
    pub fn now(&self) -> u64 {
        self.session.clocks().now()
    }

    // Registries

    /// Register an automaton; names are unique within a run
    pub fn register_automaton(&self, automaton: Arc<Automaton>) -> Result<()> {
        let mut registry = self.registry.write();
        if registry.automata.contains_key(automaton.name()) {
            return Err(EngineError::configuration(format!(
                "automaton '{}' is already registered",
                automaton.name()
            )));
        }
        tracing::debug!(automaton = automaton.name(), "registered automaton");
        registry
            .automata
            .insert(automaton.name().to_string(), automaton);
        Ok(())
    }

    /// Registered automaton called `name`
    pub fn automaton(&self, name: &str) -> Option<Arc<Automaton>> {
        self.registry.read().automata.get(name).cloned()
    }

    /// Start an independently scheduled machine running `automaton`.
    ///
    /// The machine joins selection immediately. Before the run goes live it
    /// is only registered; its thread starts with the run.
    pub fn start_machine(
        self: &Arc<Self>,
        name: &str,
        automaton: &str,
        locals: LocalVars,
        context: MachineContext,
    ) -> Result<MachineKey> {
        let automaton = self
            .automaton(automaton)
            .ok_or_else(|| EngineError::not_found(format!("automaton '{automaton}'")))?;
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let machine = Arc::new(Machine::new(
            name,
            id,
            automaton,
            StartMode::Scheduled,
            self.now(),
            locals,
            context,
        ));
        let control = Arc::new(MachineControl::new(
            machine,
            self.session.clocks().tick_event(),
        ));
        let key = control.key().clone();

        let (live, stopping) = {
            let mut registry = self.registry.write();
            if registry.controls.contains_key(&key) {
                return Err(EngineError::protocol(&key, "machine key is already registered"));
            }
            registry.controls.insert(key.clone(), Arc::clone(&control));
            (registry.live, registry.stopping)
        };
        self.note_mutation();
        tracing::debug!(machine = %key, "machine started");

        if live {
            self.launch(&control)?;
            if stopping {
                control.cancel("status");
            }
        }
        Ok(key)
    }

    /// Run `automaton` inline on the caller's thread. The machine has no
    /// control record, so any wait from its handlers is a protocol violation.
    pub fn call_machine(
        self: &Arc<Self>,
        name: &str,
        automaton: &str,
        locals: LocalVars,
        context: MachineContext,
    ) -> Result<(HandlerOutcome, LocalVars)> {
        let automaton = self
            .automaton(automaton)
            .ok_or_else(|| EngineError::not_found(format!("automaton '{automaton}'")))?;
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let machine = Arc::new(Machine::new(
            name,
            id,
            automaton,
            StartMode::Synchronous,
            self.now(),
            locals,
            context,
        ));
        let handle = MachineHandle::synchronous(Arc::clone(&machine));
        tracing::trace!(machine = %machine.key(), "calling synchronous machine");
        let outcome = run_states(self, &handle)?;
        Ok((outcome, machine.locals()))
    }

    /// Control record of `key`
    pub fn control(&self, key: &MachineKey) -> Option<Arc<MachineControl>> {
        self.registry.read().controls.get(key).cloned()
    }

    /// Registered controls in key order
    pub fn controls(&self) -> Vec<Arc<MachineControl>> {
        self.registry.read().controls.values().cloned().collect()
    }

    /// Registered machine keys in order
    pub fn machine_keys(&self) -> Vec<MachineKey> {
        self.registry.read().controls.keys().cloned().collect()
    }

    /// Number of registered controls
    pub fn live_count(&self) -> usize {
        self.registry.read().controls.len()
    }

    pub(crate) fn deregister(&self, key: &MachineKey) {
        let removed = self.registry.write().controls.remove(key);
        if removed.is_some() {
            self.note_mutation();
            tracing::debug!(machine = %key, "machine deregistered");
        }
    }

    /// Machine currently holding the critical section
    pub fn holder(&self) -> Option<MachineKey> {
        self.registry.read().holder.clone()
    }

    pub(crate) fn clear_holder(&self) {
        self.registry.write().holder = None;
    }

    pub(crate) fn record_entry(&self, key: &MachineKey) {
        self.registry.write().holder = Some(key.clone());
        let mut stats = self.stats.lock();
        stats.entries += 1;
        stats.holders += 1;
        stats.max_holders = stats.max_holders.max(stats.holders);
    }

    pub(crate) fn record_exit(&self, key: &MachineKey) {
        tracing::trace!(machine = %key, "left critical section");
        let mut stats = self.stats.lock();
        stats.holders = stats.holders.saturating_sub(1);
    }

    // Lifecycle

    pub(crate) fn go_live(self: &Arc<Self>) -> Result<()> {
        let pending = {
            let mut registry = self.registry.write();
            registry.live = true;
            registry.controls.values().cloned().collect::<Vec<_>>()
        };
        for control in &pending {
            self.launch(control)?;
        }
        Ok(())
    }

    fn launch(self: &Arc<Self>, control: &Arc<MachineControl>) -> Result<()> {
        if !control.mark_launched() {
            return Ok(());
        }
        let status = Arc::clone(self);
        let thread_control = Arc::clone(control);
        let handle = thread::Builder::new()
            .name(format!("rondo-{}", control.key()))
            .spawn(move || machine_main(status, thread_control))
            .map_err(|e| {
                EngineError::internal(format!("failed to spawn {}: {e}", control.key()))
            })?;
        self.threads.lock().push(handle);
        Ok(())
    }

    /// Enter the stopping phase and return every live control to cancel
    pub(crate) fn begin_stopping(&self) -> Vec<Arc<MachineControl>> {
        let mut registry = self.registry.write();
        registry.stopping = true;
        registry.controls.values().cloned().collect()
    }

    /// Whether the run is shutting down
    pub fn is_stopping(&self) -> bool {
        self.registry.read().stopping
    }

    /// Count a TERMINATED signal taken off the inbound queue
    pub(crate) fn acknowledge_termination(&self) {
        self.terminations_seen.fetch_add(1, Ordering::SeqCst);
    }

    /// Serve the inbound queue until every launched machine has reported
    /// TERMINATED, then join their threads
    pub(crate) fn wind_down(&self) {
        while self.terminations_seen.load(Ordering::SeqCst) < self.threads.lock().len() {
            match self.inbound_rx.recv() {
                Ok(Signal { kind: SignalKind::Terminated, .. }) => self.acknowledge_termination(),
                Ok(signal) => tracing::trace!(%signal, "discarded during wind-down"),
                Err(_) => break,
            }
        }
        let threads: Vec<_> = self.threads.lock().drain(..).collect();
        for handle in threads {
            if handle.join().is_err() {
                tracing::warn!("machine thread panicked outside its handlers");
            }
        }
        while let Ok(signal) = self.inbound_rx.try_recv() {
            tracing::trace!(%signal, "discarded after wind-down");
        }
    }

    // Signals

    /// Post `signal` to the controller, blocking while the queue is full
    pub fn send(&self, signal: Signal) -> Result<()> {
        tracing::trace!(%signal, "posting to controller");
        self.inbound_tx
            .send(signal)
            .map_err(|_| EngineError::internal("controller inbound queue is closed"))
    }

    /// Wake the controller without blocking; a full queue already guarantees a wake-up
    pub(crate) fn kick(&self, origin: &str) {
        match self
            .inbound_tx
            .try_send(Signal::system(SignalKind::Kick, origin))
        {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                tracing::warn!(origin, "inbound queue full, dropping KICK");
            }
            Err(TrySendError::Disconnected(_)) => {
                tracing::warn!(origin, "inbound queue closed, dropping KICK");
            }
        }
    }

    pub(crate) fn recv(&self) -> Result<Signal> {
        self.inbound_rx
            .recv()
            .map_err(|_| EngineError::internal("controller inbound queue disconnected"))
    }

    #[cfg(test)]
    pub(crate) fn inbound_is_empty(&self) -> bool {
        self.inbound_rx.is_empty()
    }

    /// Ask the controller to stop the run
    pub fn request_stop(&self, origin: &str) -> Result<()> {
        tracing::info!(origin, "stop requested");
        self.send(Signal::system(SignalKind::Stop, origin))
    }

    /// Record a fatal error and stop the run; the first error wins
    pub(crate) fn abort(&self, err: EngineError) {
        self.record_fatal(err);
        if let Err(send_err) = self.send(Signal::system(SignalKind::Stop, "fatal")) {
            tracing::error!(error = %send_err, "could not post STOP after fatal error");
        }
    }

    pub(crate) fn record_fatal(&self, err: EngineError) {
        let mut fatal = self.fatal.lock();
        if fatal.is_none() {
            *fatal = Some(err);
        }
    }

    /// Fatal error recorded for this run, if any
    pub fn fatal(&self) -> Option<EngineError> {
        self.fatal.lock().clone()
    }

    pub(crate) fn note_terminated(&self) {
        self.stats.lock().terminated += 1;
    }

    pub(crate) fn record_admission(&self, key: &MachineKey) {
        self.stats.lock().admissions.push(key.clone());
    }

    pub(crate) fn note_decision(&self) {
        self.stats.lock().decisions += 1;
    }

    pub(crate) fn note_choice_point(&self) {
        self.stats.lock().choice_points += 1;
    }

    /// Counters of this run so far
    pub fn stats(&self) -> RunStats {
        self.stats.lock().clone()
    }

    // Domain state

    /// Read the domain state
    pub fn with_meta<R>(&self, f: impl FnOnce(&dyn MetaContext) -> R) -> R {
        f(self.meta.lock().as_ref())
    }

    /// Mutate the domain state; counts as one mutation
    pub fn with_meta_mut<R>(&self, f: impl FnOnce(&mut dyn MetaContext) -> R) -> R {
        let result = f(self.meta.lock().as_mut());
        self.note_mutation();
        result
    }

    /// Read the domain state as its concrete type
    pub fn with_domain<T: 'static, R>(&self, f: impl FnOnce(&T) -> R) -> Result<R> {
        let meta = self.meta.lock();
        meta.as_any()
            .downcast_ref::<T>()
            .map(f)
            .ok_or_else(|| EngineError::domain("domain state has an unexpected type"))
    }

    /// Mutate the domain state as its concrete type; counts as one mutation
    pub fn with_domain_mut<T: 'static, R>(&self, f: impl FnOnce(&mut T) -> R) -> Result<R> {
        let result = {
            let mut meta = self.meta.lock();
            meta.as_any_mut()
                .downcast_mut::<T>()
                .map(f)
                .ok_or_else(|| EngineError::domain("domain state has an unexpected type"))?
        };
        self.note_mutation();
        Ok(result)
    }

    /// Count a shared-state change not made through the domain state
    pub fn note_mutation(&self) {
        self.mutations.fetch_add(1, Ordering::SeqCst);
    }

    /// Shared-state changes so far
    pub fn mutations(&self) -> u64 {
        self.mutations.load(Ordering::SeqCst)
    }

    // Scheduler

    /// Schedule work at virtual time `time`
    pub fn schedule(&self, time: u64, payload: SlotPayload) -> u64 {
        self.scheduler.lock().insert(time, payload)
    }

    /// Run `f` against the scheduler
    pub fn with_scheduler<R>(&self, f: impl FnOnce(&mut Scheduler) -> R) -> R {
        f(&mut *self.scheduler.lock())
    }

    pub(crate) fn process_slot(&self, slot: &Slot, now: u64) -> Result<()> {
        let SlotKind::Work(payload) = &slot.kind else {
            return Err(EngineError::internal("sentinel slot handed to the slot processor"));
        };
        tracing::debug!(tag = %payload.tag, time = slot.time, now, "processing slot");
        {
            let mut scheduler = self.scheduler.lock();
            let mut meta = self.meta.lock();
            let mut ctx = SlotContext {
                now,
                scheduler: &mut *scheduler,
                meta: meta.as_mut(),
            };
            self.slot_processor.process(payload, &mut ctx)?;
        }
        self.note_mutation();
        Ok(())
    }

    // Selection support

    pub(crate) fn select(&self, clock: u64) -> Option<MachineKey> {
        let controls = self.controls();
        let meta = self.meta.lock();
        let mut rng = self.rng.lock();
        policy::select(
            self.config.policy,
            &controls,
            clock,
            meta.as_ref(),
            self.config.selection_tie_break(),
            &mut *rng,
        )
    }

    pub(crate) fn choice_candidates(&self, selected: &MachineKey, clock: u64) -> Vec<MachineKey> {
        let controls = self.controls();
        let meta = self.meta.lock();
        controls
            .iter()
            .filter(|control| control.key() != selected)
            .filter(|control| {
                control.with_condition(|condition| condition.is_choice_candidate(clock, meta.as_ref()))
            })
            .map(|control| control.key().clone())
            .collect()
    }

    pub(crate) fn earliest_wakeup(&self, clock: u64) -> Option<u64> {
        self.controls()
            .iter()
            .filter_map(|control| control.with_condition(|condition| condition.pending_wakeup(clock)))
            .min()
    }

    // Cloning

    /// Independent copy of this run for replay.
    ///
    /// Controls get fresh queues and deep copies of their condition and
    /// machine; the domain state goes through [`MetaContext::copy`]; the
    /// scheduler is copied; automata are shared. Thread identities, the
    /// holder marker and run statistics are not carried over.
    pub fn clone_for_new_run(&self) -> Arc<Status> {
        let meta = self.meta.lock().copy();
        let (controls, automata) = {
            let registry = self.registry.read();
            let controls = registry
                .controls
                .iter()
                .map(|(key, control)| {
                    let copy = control.clone_for_new_run(meta.as_ref(), self.config.resume_bypass);
                    (key.clone(), Arc::new(copy))
                })
                .collect();
            (controls, registry.automata.clone())
        };
        let (inbound_tx, inbound_rx) = bounded(self.config.queue_capacity);

        Arc::new(Status {
            config: self.config.clone(),
            session: Arc::clone(&self.session),
            registry: RwLock::new(Registry {
                controls,
                automata,
                ..Registry::default()
            }),
            scheduler: Mutex::new(self.scheduler.lock().clone()),
            meta: Mutex::new(meta),
            slot_processor: Arc::clone(&self.slot_processor),
            inbound_tx,
            inbound_rx,
            stats: Mutex::new(RunStats::default()),
            fatal: Mutex::new(None),
            mutations: AtomicU64::new(self.mutations()),
            next_id: AtomicU64::new(self.next_id.load(Ordering::SeqCst)),
            rng: Mutex::new(self.rng.lock().clone()),
            threads: Mutex::new(Vec::new()),
            terminations_seen: AtomicUsize::new(0),
        })
    }

    /// Queue-free view of this run
    pub fn view(&self) -> StatusView {
        let (machines, automata, holder) = {
            let registry = self.registry.read();
            let machines = registry
                .controls
                .values()
                .map(|control| MachineView::of(control))
                .collect();
            let automata = registry.automata.keys().cloned().collect();
            (machines, automata, registry.holder.clone())
        };
        StatusView {
            clock: self.session.clocks().now(),
            event_clock: self.session.clocks().event_now(),
            holder,
            machines,
            automata,
            slots: self.scheduler.lock().iter().cloned().collect(),
            meta: self.meta.lock().describe(),
            mutations: self.mutations(),
        }
    }
}

impl std::fmt::Debug for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Status")
            .field("machines", &self.machine_keys())
            .field("holder", &self.holder())
            .field("mutations", &self.mutations())
            .finish_non_exhaustive()
    }
}
