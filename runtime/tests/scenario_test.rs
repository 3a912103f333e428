//! End-to-end witness computation over small hand-built circuits.

use std::sync::atomic::{AtomicUsize, Ordering};

use runtime::{
    hash_name, Calculator, Circuit, Component, FieldElement, InputBitmap, RuntimeError,
    SymbolEntry, SymbolError, SymbolKind, SymbolTable,
};

fn fe(calc: &Calculator, value: u64) -> FieldElement {
    calc.field().element_from_u64(value)
}

fn assert_witness(calc: &Calculator, expected: &[u64]) {
    let witness = calc.witness().expect("witness read-out");
    let want: Vec<FieldElement> = expected.iter().map(|&v| fe(calc, v)).collect();
    assert_eq!(witness, want);
}

// ============================================================================
// Identity circuit: one component forwarding the driver's input
// ============================================================================

fn pass_through(calc: &Calculator, idx: usize) -> Result<(), RuntimeError> {
    let value = calc.get_signal(idx, idx, 1)?;
    let again = calc.get_signal(idx, idx, 1)?;
    assert_eq!(value, again, "repeated reads must return the same bytes");
    calc.finished(idx);
    Ok(())
}

fn identity_circuit() -> Circuit {
    Circuit {
        prime: "7".to_string(),
        n_signals: 2,
        components: vec![Component {
            input_signals: 1,
            new_thread: false,
            run: pass_through,
            symbols: SymbolTable::new(),
        }],
        map_is_input: InputBitmap::from_indices(2, &[1]),
    }
}

#[test]
fn identity_circuit_records_driver_input() {
    let calc = Calculator::new(identity_circuit()).expect("calculator");
    let three = fe(&calc, 3);
    calc.set_signal(0, 0, 1, three).expect("set input");
    calc.join().expect("join");
    assert_witness(&calc, &[1, 3]);
}

// ============================================================================
// Addition chain: signal 3 = signal 1 + signal 2 (mod 101)
// ============================================================================

fn adder(calc: &Calculator, idx: usize) -> Result<(), RuntimeError> {
    let a = calc.get_signal(idx, idx, 1)?;
    let b = calc.get_signal(idx, idx, 2)?;
    let mut scratch = calc.alloc_elements(1);
    scratch[0] = calc.field().add(&a, &b);
    calc.set_signal(idx, idx, 3, scratch[0])?;
    calc.finished(idx);
    Ok(())
}

fn adder_circuit() -> Circuit {
    Circuit {
        prime: "101".to_string(),
        n_signals: 4,
        components: vec![Component {
            input_signals: 2,
            new_thread: false,
            run: adder,
            symbols: SymbolTable::new(),
        }],
        map_is_input: InputBitmap::from_indices(4, &[1, 2]),
    }
}

#[test]
fn addition_chain_reduces_mod_p() {
    let calc = Calculator::new(adder_circuit()).expect("calculator");
    calc.set_signal(0, 0, 1, fe(&calc, 50)).unwrap();
    calc.set_signal(0, 0, 2, fe(&calc, 60)).unwrap();
    calc.join().unwrap();
    assert_witness(&calc, &[1, 50, 60, 9]);
}

#[test]
fn reset_and_replay_is_deterministic() {
    let calc = Calculator::new(adder_circuit()).expect("calculator");
    calc.set_signal(0, 0, 1, fe(&calc, 50)).unwrap();
    calc.set_signal(0, 0, 2, fe(&calc, 60)).unwrap();
    calc.join().unwrap();
    let first = calc.witness().unwrap();

    calc.reset().expect("reset");
    calc.set_signal(0, 0, 1, fe(&calc, 50)).unwrap();
    calc.set_signal(0, 0, 2, fe(&calc, 60)).unwrap();
    calc.join().unwrap();
    let second = calc.witness().unwrap();

    assert_eq!(first, second);
    assert_eq!(first[0], calc.field().one());
    assert_eq!(second[0], calc.field().one());
}

#[test]
fn double_assignment_is_rejected_without_corrupting_state() {
    let calc = Calculator::new(adder_circuit()).expect("calculator");
    calc.set_signal(0, 0, 1, fe(&calc, 50)).unwrap();

    let err = calc.set_signal(0, 0, 1, fe(&calc, 99)).unwrap_err();
    assert_eq!(
        err,
        RuntimeError::DoubleAssignment {
            component: 0,
            signal: 1
        }
    );

    // The rejected write left the first value and the counters intact.
    calc.set_signal(0, 0, 2, fe(&calc, 60)).unwrap();
    calc.join().unwrap();
    assert_witness(&calc, &[1, 50, 60, 9]);
}

#[test]
fn witness_is_unavailable_before_all_inputs_arrive() {
    let calc = Calculator::new(adder_circuit()).expect("calculator");
    calc.set_signal(0, 0, 1, fe(&calc, 50)).unwrap();
    assert_eq!(
        calc.witness().unwrap_err(),
        RuntimeError::ReadUnassigned { signal: 2 }
    );
}

// ============================================================================
// Trigger counting
// ============================================================================

static COUNTING_ADDER_RUNS: AtomicUsize = AtomicUsize::new(0);

fn counting_adder(calc: &Calculator, idx: usize) -> Result<(), RuntimeError> {
    COUNTING_ADDER_RUNS.fetch_add(1, Ordering::SeqCst);
    adder(calc, idx)
}

#[test]
fn last_input_triggers_exactly_once() {
    let mut circuit = adder_circuit();
    circuit.components[0].run = counting_adder;

    let calc = Calculator::new(circuit).expect("calculator");
    assert_eq!(COUNTING_ADDER_RUNS.load(Ordering::SeqCst), 0);

    calc.set_signal(0, 0, 1, fe(&calc, 10)).unwrap();
    assert_eq!(COUNTING_ADDER_RUNS.load(Ordering::SeqCst), 0);

    calc.set_signal(0, 0, 2, fe(&calc, 20)).unwrap();
    calc.join().unwrap();
    assert_eq!(COUNTING_ADDER_RUNS.load(Ordering::SeqCst), 1);
    assert_witness(&calc, &[1, 10, 20, 30]);
}

fn constant_writer(calc: &Calculator, idx: usize) -> Result<(), RuntimeError> {
    calc.set_signal(idx, idx, 1, fe(calc, 5))?;
    calc.finished(idx);
    Ok(())
}

#[test]
fn zero_input_component_fires_at_construction_and_reset() {
    let circuit = Circuit {
        prime: "7".to_string(),
        n_signals: 2,
        components: vec![Component {
            input_signals: 0,
            new_thread: false,
            run: constant_writer,
            symbols: SymbolTable::new(),
        }],
        map_is_input: InputBitmap::new(2),
    };

    let calc = Calculator::new(circuit).expect("calculator");
    calc.join().unwrap();
    assert_witness(&calc, &[1, 5]);

    calc.reset().expect("reset");
    calc.join().unwrap();
    assert_witness(&calc, &[1, 5]);
}

// ============================================================================
// Symbol resolution from generated code
// ============================================================================

const H_IN: u64 = 0x1111_1111_1111_11aa;
const H_OUT: u64 = 0x2222_2222_2222_22aa; // collides with H_IN on the low byte
const H_MISSING: u64 = 0x3333_3333_3333_33aa;

fn symbolic_doubler(calc: &Calculator, idx: usize) -> Result<(), RuntimeError> {
    let in_offset = calc.get_signal_offset(idx, H_IN)?;
    let out_offset = calc.get_signal_offset(idx, H_OUT)?;
    let value = calc.get_signal(idx, idx, in_offset)?;
    let two = fe(calc, 2);
    calc.set_signal(idx, idx, out_offset, calc.field().mul(&value, &two))?;
    calc.finished(idx);
    Ok(())
}

fn symbolic_circuit() -> Circuit {
    let mut symbols = SymbolTable::new();
    symbols
        .insert(
            H_IN,
            SymbolEntry {
                kind: SymbolKind::Signal,
                offset: 1,
                sizes: vec![1],
            },
        )
        .unwrap();
    symbols
        .insert(
            H_OUT,
            SymbolEntry {
                kind: SymbolKind::Signal,
                offset: 2,
                sizes: vec![1],
            },
        )
        .unwrap();
    symbols
        .insert(
            hash_name("child"),
            SymbolEntry {
                kind: SymbolKind::Component,
                offset: 0,
                sizes: vec![1],
            },
        )
        .unwrap();

    Circuit {
        prime: "17".to_string(),
        n_signals: 3,
        components: vec![Component {
            input_signals: 1,
            new_thread: false,
            run: symbolic_doubler,
            symbols,
        }],
        map_is_input: InputBitmap::from_indices(3, &[1]),
    }
}

#[test]
fn colliding_names_resolve_through_the_probe_chain() {
    let calc = Calculator::new(symbolic_circuit()).expect("calculator");
    calc.set_signal(0, 0, 1, fe(&calc, 6)).unwrap();
    calc.join().unwrap();
    assert_witness(&calc, &[1, 6, 12]);
}

#[test]
fn absent_name_with_colliding_low_byte_is_not_found() {
    let calc = Calculator::new(symbolic_circuit()).expect("calculator");
    assert_eq!(
        calc.get_signal_offset(0, H_MISSING).unwrap_err(),
        RuntimeError::Symbol {
            component: 0,
            source: SymbolError::NotFound(H_MISSING)
        }
    );
}

#[test]
fn symbol_accessors_project_offsets_and_sizes() {
    let calc = Calculator::new(symbolic_circuit()).expect("calculator");

    assert_eq!(calc.get_signal_offset(0, H_IN).unwrap(), 1);
    assert_eq!(calc.get_signal_sizes(0, H_OUT).unwrap(), &[1]);
    assert_eq!(calc.get_sub_component_offset(0, hash_name("child")).unwrap(), 0);
    assert_eq!(
        calc.get_sub_component_sizes(0, hash_name("child")).unwrap(),
        &[1]
    );

    // A component name queried as a signal is a kind mismatch.
    assert_eq!(
        calc.get_signal_offset(0, hash_name("child")).unwrap_err(),
        RuntimeError::Symbol {
            component: 0,
            source: SymbolError::TypeMismatch(hash_name("child"))
        }
    );

    // Lookup is pure: asking again yields the same answer.
    assert_eq!(calc.get_signal_offset(0, H_IN).unwrap(), 1);
}

// ============================================================================
// Constraint checking
// ============================================================================

fn equality_checker(calc: &Calculator, idx: usize) -> Result<(), RuntimeError> {
    let a = calc.get_signal(idx, idx, 1)?;
    let b = calc.get_signal(idx, idx, 2)?;
    calc.check_constraint(idx, &a, &b, "s1 == s2")?;
    calc.set_signal(idx, idx, 3, a)?;
    calc.finished(idx);
    Ok(())
}

fn checker_circuit() -> Circuit {
    Circuit {
        prime: "101".to_string(),
        n_signals: 4,
        components: vec![Component {
            input_signals: 2,
            new_thread: false,
            run: equality_checker,
            symbols: SymbolTable::new(),
        }],
        map_is_input: InputBitmap::from_indices(4, &[1, 2]),
    }
}

#[test]
fn mismatched_constraint_fails_when_checks_are_on() {
    let calc = Calculator::new(checker_circuit()).expect("calculator");
    calc.set_signal(0, 0, 1, fe(&calc, 5)).unwrap();
    // The last input fires the component inline, so the violation surfaces
    // right here and again from join.
    let err = calc.set_signal(0, 0, 2, fe(&calc, 6)).unwrap_err();
    let expected = RuntimeError::ConstraintViolation {
        component: 0,
        tag: "s1 == s2".to_string(),
    };
    assert_eq!(err, expected);
    assert_eq!(calc.join().unwrap_err(), expected);
}

#[test]
fn mismatched_constraint_passes_when_checks_are_off() {
    let calc = Calculator::with_constraint_checks(checker_circuit(), false).expect("calculator");
    calc.set_signal(0, 0, 1, fe(&calc, 5)).unwrap();
    calc.set_signal(0, 0, 2, fe(&calc, 6)).unwrap();
    calc.join().unwrap();
    assert_witness(&calc, &[1, 5, 6, 5]);
}

#[test]
fn matching_constraint_passes_when_checks_are_on() {
    let calc = Calculator::new(checker_circuit()).expect("calculator");
    calc.set_signal(0, 0, 1, fe(&calc, 5)).unwrap();
    calc.set_signal(0, 0, 2, fe(&calc, 5)).unwrap();
    calc.join().unwrap();
    assert_witness(&calc, &[1, 5, 5, 5]);
}

// ============================================================================
// Diagnostics
// ============================================================================

#[test]
fn diagnostics_are_callable_from_the_driver() {
    let calc = Calculator::new(identity_circuit()).expect("calculator");
    calc.sync_print("driver attached\n");
    calc.log_value(&fe(&calc, 3));
    calc.set_signal(0, 0, 1, fe(&calc, 3)).unwrap();
    calc.join().unwrap();
}
