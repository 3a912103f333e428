//! The witness calculator.
//!
//! A `Calculator` wraps one [`Circuit`] and owns all mutable run state: the
//! single-assignment signal store, the per-component trigger counters, and
//! the synchronization bank that publishes component completion across
//! threads. Component functions receive the shared calculator and drive
//! everything through the methods here; threaded components keep it alive
//! through an `Arc` handle cloned at spawn time.

use std::cell::UnsafeCell;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicI64, AtomicU8, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, Weak};
use std::thread;

use field::{Field, FieldElement};

use crate::circuit::Circuit;
use crate::error::RuntimeError;
use crate::symbols::{SymbolEntry, SymbolKind};

/// Mutex/condvar pairs in the synchronization bank.
///
/// Circuits carry tens of thousands of components; a lock per component
/// would bloat memory for negligible contention gain. Components share slots
/// modulo this count, so a waiter may wake for an unrelated component on the
/// same slot; the wait loops re-check their predicate, which makes those
/// wakeups harmless.
pub const NMUTEXES: usize = 64;

/// `pending` value of a component whose function has returned.
const FINISHED: i64 = -1;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|err| err.into_inner())
}

// ============================================================================
// SignalCell
// ============================================================================

const EMPTY: u8 = 0;
const CLAIMED: u8 = 1;
const SET: u8 = 2;

/// One-shot publish slot for a signal value.
///
/// The writer claims the slot with a compare-exchange, stores the value,
/// then flips the state to `SET` with release ordering; readers acquire-load
/// the state before copying the value out. A second writer fails the claim,
/// which is how double assignments are detected in every build.
struct SignalCell {
    state: AtomicU8,
    value: UnsafeCell<FieldElement>,
}

// SAFETY: `value` is written only by the thread that wins the EMPTY ->
// CLAIMED exchange, and read only after an acquire load observes SET, which
// synchronizes with the writer's release store. `reopen` requires external
// quiescence (see `Calculator::reset`).
unsafe impl Sync for SignalCell {}

impl SignalCell {
    fn new() -> Self {
        Self {
            state: AtomicU8::new(EMPTY),
            value: UnsafeCell::new(FieldElement::ZERO),
        }
    }

    /// Store a value exactly once. Returns false if the cell was taken.
    fn publish(&self, value: FieldElement) -> bool {
        if self
            .state
            .compare_exchange(EMPTY, CLAIMED, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            return false;
        }
        // SAFETY: the exchange above grants exclusive access to `value`.
        unsafe { *self.value.get() = value };
        self.state.store(SET, Ordering::Release);
        true
    }

    fn read(&self) -> Option<FieldElement> {
        if self.state.load(Ordering::Acquire) != SET {
            return None;
        }
        // SAFETY: SET was stored with release ordering after the value
        // write; the acquire load above makes that write visible, and no
        // further writes happen while the cell stays SET.
        Some(unsafe { *self.value.get() })
    }

    /// Reopen the slot for the next run. The previous value stays in place
    /// but is unreadable until a new publish. Callers must guarantee that no
    /// component execution is in flight.
    fn reopen(&self) {
        self.state.store(EMPTY, Ordering::Release);
    }
}

struct SyncSlot {
    lock: Mutex<()>,
    ready: Condvar,
}

// ============================================================================
// Calculator
// ============================================================================

/// Runtime state for one witness computation.
pub struct Calculator {
    circuit: Circuit,
    field: Field,
    signals: Vec<SignalCell>,
    /// Remaining-input counters; `-1` marks a finished component.
    pending: Vec<AtomicI64>,
    slots: Vec<SyncSlot>,
    /// First error recorded during the run; surfaced by `join` and waiters.
    failure: Mutex<Option<RuntimeError>>,
    print_lock: Mutex<()>,
    check_constraints: bool,
    /// Handle to the owning `Arc`, cloned into spawned component threads.
    weak_self: Weak<Calculator>,
}

impl Calculator {
    /// Build a calculator and fire the circuit's zero-input components.
    /// Constraint checking is enabled.
    pub fn new(circuit: Circuit) -> Result<Arc<Self>, RuntimeError> {
        Self::with_constraint_checks(circuit, true)
    }

    /// Build a calculator with constraint checking switched as given.
    /// The checks impose measurable overhead on large circuits; production
    /// drivers run with them off once a circuit is trusted.
    pub fn with_constraint_checks(
        circuit: Circuit,
        check_constraints: bool,
    ) -> Result<Arc<Self>, RuntimeError> {
        if circuit.n_signals == 0 {
            return Err(RuntimeError::InvalidCircuit(
                "a circuit needs at least the constant-one signal".to_string(),
            ));
        }
        if circuit.map_is_input.len() != circuit.n_signals {
            return Err(RuntimeError::InvalidCircuit(
                "input bitmap size does not match the signal count".to_string(),
            ));
        }

        let field = Field::new(&circuit.prime)?;
        let signals = (0..circuit.n_signals).map(|_| SignalCell::new()).collect();
        let pending = circuit
            .components
            .iter()
            .map(|_| AtomicI64::new(0))
            .collect();
        let slots = (0..NMUTEXES)
            .map(|_| SyncSlot {
                lock: Mutex::new(()),
                ready: Condvar::new(),
            })
            .collect();

        let calculator = Arc::new_cyclic(|weak| Self {
            circuit,
            field,
            signals,
            pending,
            slots,
            failure: Mutex::new(None),
            print_lock: Mutex::new(()),
            check_constraints,
            weak_self: weak.clone(),
        });
        calculator.reset()?;
        Ok(calculator)
    }

    #[inline]
    pub fn field(&self) -> &Field {
        &self.field
    }

    #[inline]
    pub fn circuit(&self) -> &Circuit {
        &self.circuit
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Rearm the calculator for a fresh run: reopen every signal slot,
    /// restore every trigger counter, then fire the zero-input components.
    ///
    /// The counters are all restored before any component fires, so an
    /// early component writing a later component's input finds a live
    /// counter rather than the previous run's finished marker. Must not be
    /// called while component executions are in flight.
    pub fn reset(&self) -> Result<(), RuntimeError> {
        *lock(&self.failure) = None;

        for cell in &self.signals[1..] {
            cell.reopen();
        }
        // Index 0 holds 1 for the calculator's whole lifetime.
        if self.signals[0].read().is_none() {
            self.signals[0].publish(self.field.one());
        }

        for (c, component) in self.circuit.components.iter().enumerate() {
            self.pending[c].store(component.input_signals as i64, Ordering::Release);
        }
        for (c, component) in self.circuit.components.iter().enumerate() {
            if component.input_signals == 0 {
                self.trigger_component(c)?;
            }
        }
        Ok(())
    }

    /// Invoke a component's function, inline or on a fresh thread.
    ///
    /// Threaded components are detached; completion is observed through the
    /// `pending` sentinel, not a thread handle. A function that returns an
    /// error or panics is recorded and marked finished so that nothing
    /// blocks on it forever.
    pub fn trigger_component(&self, c_idx: usize) -> Result<(), RuntimeError> {
        let component = &self.circuit.components[c_idx];
        let run = component.run;
        if component.new_thread {
            let calculator = self
                .weak_self
                .upgrade()
                .expect("calculator is alive while components run");
            let spawned = thread::Builder::new()
                .name(format!("component-{c_idx}"))
                .spawn(move || {
                    match panic::catch_unwind(AssertUnwindSafe(|| run(&calculator, c_idx))) {
                        Ok(Ok(())) => {}
                        Ok(Err(err)) => calculator.abort(c_idx, err),
                        Err(_) => {
                            calculator.abort(
                                c_idx,
                                RuntimeError::ComponentPanicked { component: c_idx },
                            );
                        }
                    }
                });
            if let Err(err) = spawned {
                let err = RuntimeError::ThreadSpawn {
                    component: c_idx,
                    reason: err.to_string(),
                };
                self.abort(c_idx, err.clone());
                return Err(err);
            }
            Ok(())
        } else {
            match run(self, c_idx) {
                Ok(()) => Ok(()),
                Err(err) => {
                    self.abort(c_idx, err.clone());
                    Err(err)
                }
            }
        }
    }

    /// Mark a component finished and wake its waiters. Called by each
    /// component function as its final act, once its outputs are written.
    pub fn finished(&self, c_idx: usize) {
        let slot = &self.slots[c_idx % NMUTEXES];
        {
            let _guard = lock(&slot.lock);
            self.pending[c_idx].store(FINISHED, Ordering::Release);
        }
        slot.ready.notify_all();
    }

    /// Whether a component's function has returned.
    pub fn component_finished(&self, c_idx: usize) -> bool {
        self.pending[c_idx].load(Ordering::Acquire) == FINISHED
    }

    /// Wait for every component, in index order. Returns the first error
    /// recorded during the run, if any.
    pub fn join(&self) -> Result<(), RuntimeError> {
        for c_idx in 0..self.circuit.n_components() {
            self.wait_finished(c_idx)?;
        }
        if let Some(err) = lock(&self.failure).clone() {
            return Err(err);
        }
        Ok(())
    }

    /// Record the first failure, mark the component finished, and wake every
    /// waiter in the bank so blocked readers and `join` observe the error.
    fn abort(&self, c_idx: usize, err: RuntimeError) {
        {
            let mut failure = lock(&self.failure);
            if failure.is_none() {
                *failure = Some(err);
            }
        }
        self.finished(c_idx);
        for slot in &self.slots {
            drop(lock(&slot.lock));
            slot.ready.notify_all();
        }
    }

    /// Block until `pending[c_idx]` reaches the finished sentinel or a
    /// failure is recorded.
    ///
    /// The failure check runs after the sentinel load: `abort` records the
    /// error before it marks the component finished, so a component finished
    /// by way of `abort` can never be mistaken for a healthy one here.
    fn wait_finished(&self, c_idx: usize) -> Result<(), RuntimeError> {
        let slot = &self.slots[c_idx % NMUTEXES];
        let mut guard = lock(&slot.lock);
        loop {
            let done = self.pending[c_idx].load(Ordering::Acquire) == FINISHED;
            if let Some(err) = lock(&self.failure).clone() {
                return Err(err);
            }
            if done {
                return Ok(());
            }
            guard = slot.ready.wait(guard).unwrap_or_else(|err| err.into_inner());
        }
    }

    // ========================================================================
    // Signal store
    // ========================================================================

    /// Assign a signal, then run the trigger bookkeeping for its owning
    /// component: if the signal is an input, decrement the owner's counter
    /// and fire the owner when it reaches zero.
    pub fn set_signal(
        &self,
        current: usize,
        owning: usize,
        s_idx: usize,
        value: FieldElement,
    ) -> Result<(), RuntimeError> {
        if !self.signals[s_idx].publish(value) {
            return Err(RuntimeError::DoubleAssignment {
                component: current,
                signal: s_idx,
            });
        }
        if self.circuit.map_is_input.is_set(s_idx) {
            let decremented = self.pending[owning].fetch_update(
                Ordering::AcqRel,
                Ordering::Acquire,
                |p| if p > 0 { Some(p - 1) } else { None },
            );
            if decremented == Ok(1) {
                self.trigger_component(owning)?;
            }
        }
        Ok(())
    }

    /// Read a signal produced by `producing`.
    ///
    /// When the producer runs on its own thread and is not the caller, the
    /// read blocks until the producer has finished; the mutex handoff in
    /// `finished` orders the producer's writes before the copy-out here.
    /// Same-thread reads see their own writes by program order.
    pub fn get_signal(
        &self,
        current: usize,
        producing: usize,
        s_idx: usize,
    ) -> Result<FieldElement, RuntimeError> {
        if self.circuit.components[producing].new_thread && producing != current {
            self.wait_finished(producing)?;
        }
        self.signals[s_idx]
            .read()
            .ok_or(RuntimeError::ReadUnassigned { signal: s_idx })
    }

    /// Sanity-mode equality assertion between a computed value and the value
    /// a constraint demands. A no-op when constraint checking is off.
    pub fn check_constraint(
        &self,
        current: usize,
        value1: &FieldElement,
        value2: &FieldElement,
        tag: &str,
    ) -> Result<(), RuntimeError> {
        if self.check_constraints && value1 != value2 {
            return Err(RuntimeError::ConstraintViolation {
                component: current,
                tag: tag.to_string(),
            });
        }
        Ok(())
    }

    /// The full signal vector. Valid once `join` has returned `Ok`.
    pub fn witness(&self) -> Result<Vec<FieldElement>, RuntimeError> {
        (0..self.circuit.n_signals)
            .map(|s_idx| {
                self.signals[s_idx]
                    .read()
                    .ok_or(RuntimeError::ReadUnassigned { signal: s_idx })
            })
            .collect()
    }

    /// Bulk scratch for generated component code; freeing is `Drop`.
    pub fn alloc_elements(&self, n: usize) -> Vec<FieldElement> {
        vec![FieldElement::ZERO; n]
    }

    // ========================================================================
    // Symbol lookup
    // ========================================================================

    fn find_entry(
        &self,
        c_idx: usize,
        hash: u64,
        kind: SymbolKind,
    ) -> Result<&SymbolEntry, RuntimeError> {
        self.circuit.components[c_idx]
            .symbols
            .find(hash, kind)
            .map_err(|source| RuntimeError::Symbol {
                component: c_idx,
                source,
            })
    }

    /// Base signal index of a named signal of component `c_idx`.
    pub fn get_signal_offset(&self, c_idx: usize, hash: u64) -> Result<usize, RuntimeError> {
        self.find_entry(c_idx, hash, SymbolKind::Signal)
            .map(|entry| entry.offset)
    }

    /// Shape descriptor of a named signal of component `c_idx`.
    pub fn get_signal_sizes(&self, c_idx: usize, hash: u64) -> Result<&[usize], RuntimeError> {
        self.find_entry(c_idx, hash, SymbolKind::Signal)
            .map(|entry| entry.sizes.as_slice())
    }

    /// Base component index of a named child of component `c_idx`.
    pub fn get_sub_component_offset(
        &self,
        c_idx: usize,
        hash: u64,
    ) -> Result<usize, RuntimeError> {
        self.find_entry(c_idx, hash, SymbolKind::Component)
            .map(|entry| entry.offset)
    }

    /// Shape descriptor of a named child of component `c_idx`.
    pub fn get_sub_component_sizes(
        &self,
        c_idx: usize,
        hash: u64,
    ) -> Result<&[usize], RuntimeError> {
        self.find_entry(c_idx, hash, SymbolKind::Component)
            .map(|entry| entry.sizes.as_slice())
    }

    // ========================================================================
    // Diagnostics
    // ========================================================================

    /// Print a field element in decimal, serialized with other diagnostics.
    pub fn log_value(&self, value: &FieldElement) {
        let _guard = lock(&self.print_lock);
        println!("Log: {}", value.to_decimal_string());
    }

    /// Print arbitrary diagnostic text, serialized across threads.
    pub fn sync_print(&self, message: &str) {
        let _guard = lock(&self.print_lock);
        print!("{message}");
    }
}
