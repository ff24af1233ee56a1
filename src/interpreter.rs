pub mod machine;
pub mod ops;

pub use machine::{Machine, STEP_BUDGET, Status};

use crate::ast::Program;
use crate::error::ProgramError;
use crate::lexer::tokenize;
use crate::parser::parse;
use crate::runtime::registry::Registry;

/// A resumable in-flight program. The host calls `resume` once per tick
/// until a terminal status; dropping the handle at any pause point cancels
/// the program without running further user code.
pub struct Execution {
    machine: Machine,
}

impl Execution {
    pub fn new(program: Program, registry: Registry) -> Self {
        Self {
            machine: Machine::new(program, registry),
        }
    }

    pub fn resume(&mut self) -> Status {
        self.machine.resume()
    }
}

pub fn start(program: Program, registry: Registry) -> Execution {
    Execution::new(program, registry)
}

/// Compiles and runs a program to completion, treating budget pauses and
/// waits as immediately satisfied. Suits hosts without a tick loop.
pub fn run_program(source: &str, registry: Registry) -> Result<(), ProgramError> {
    let tokens = tokenize(source)?;
    let program = parse(tokens)?;
    let mut execution = Execution::new(program, registry);
    loop {
        match execution.resume() {
            Status::Running | Status::Paused(_) => {}
            Status::Completed => return Ok(()),
            Status::Failed(error) => return Err(error.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::registry::{Arity, Outcome, OutputSink, Wait};
    use crate::runtime::value::Value;
    use indoc::indoc;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn capture() -> (OutputSink, Rc<RefCell<Vec<String>>>) {
        let lines = Rc::new(RefCell::new(Vec::new()));
        let captured = Rc::clone(&lines);
        let sink: OutputSink = Rc::new(RefCell::new(move |line| {
            captured.borrow_mut().push(line);
        }));
        (sink, lines)
    }

    fn prepare(source: &str, registry: Registry) -> Execution {
        let tokens = tokenize(source).expect("tokenize should succeed");
        let program = parse(tokens).expect("parse should succeed");
        Execution::new(program, registry)
    }

    #[test]
    fn long_loop_pauses_on_budget_and_finishes_across_resumes() {
        let (sink, lines) = capture();
        let source = indoc! {"
            total = 0
            for i in range(1000):
                total += i
            print(total)
        "};
        let mut execution = prepare(source, Registry::with_core(sink));
        let mut running_pauses = 0;
        loop {
            match execution.resume() {
                Status::Running => running_pauses += 1,
                Status::Completed => break,
                other => panic!("unexpected status {other:?}"),
            }
            assert!(running_pauses < 100_000, "execution never completed");
        }
        assert!(running_pauses > 10, "a 1000-iteration loop must pause");
        assert_eq!(lines.borrow().as_slice(), ["499500"]);
    }

    #[test]
    fn suspending_builtin_pauses_with_its_wait_descriptor() {
        let (sink, lines) = capture();
        let mut registry = Registry::with_core(sink);
        registry.register_native("wait", Arity::Exact(1), true, |args| {
            let Value::Number(seconds) = &args[0] else {
                return Err("wait() expected a number".to_string());
            };
            Ok(Outcome::Wait {
                wait: Wait::Time(*seconds),
                result: Value::Null,
            })
        });
        let source = indoc! {"
            print('before')
            wait(2.5)
            print('after')
        "};
        let mut execution = prepare(source, registry);
        assert_eq!(execution.resume(), Status::Paused(Wait::Time(2.5)));
        assert_eq!(lines.borrow().as_slice(), ["before"]);
        assert_eq!(execution.resume(), Status::Completed);
        assert_eq!(lines.borrow().as_slice(), ["before", "after"]);
    }

    #[test]
    fn suspension_result_value_reaches_the_call_site() {
        let (sink, lines) = capture();
        let mut registry = Registry::with_core(sink);
        registry.register_native("harvest", Arity::Exact(0), true, |_| {
            Ok(Outcome::Wait {
                wait: Wait::Action("harvest".to_string()),
                result: Value::Number(3.0),
            })
        });
        let source = indoc! {"
            got = harvest() + 1
            print(got)
        "};
        let mut execution = prepare(source, registry);
        assert_eq!(
            execution.resume(),
            Status::Paused(Wait::Action("harvest".to_string()))
        );
        assert_eq!(execution.resume(), Status::Completed);
        assert_eq!(lines.borrow().as_slice(), ["4"]);
    }

    #[test]
    fn suspension_propagates_out_of_nested_calls_and_loops() {
        let (sink, lines) = capture();
        let mut registry = Registry::with_core(sink);
        registry.register_native("pause_once", Arity::Exact(0), true, |_| {
            Ok(Outcome::Wait {
                wait: Wait::Time(1.0),
                result: Value::Null,
            })
        });
        let source = indoc! {"
            def worker(n):
                for i in range(n):
                    pause_once()
                return n

            total = 0
            while total < 2:
                total += worker(1)
            print(total)
        "};
        let mut execution = prepare(source, registry);
        let mut waits = 0;
        loop {
            match execution.resume() {
                Status::Paused(Wait::Time(_)) => waits += 1,
                Status::Running => {}
                Status::Completed => break,
                other => panic!("unexpected status {other:?}"),
            }
        }
        assert_eq!(waits, 2);
        assert_eq!(lines.borrow().as_slice(), ["2"]);
    }

    #[test]
    fn terminal_states_are_sticky() {
        let (sink, _) = capture();
        let mut execution = prepare("x = missing\n", Registry::with_core(sink));
        let Status::Failed(error) = execution.resume() else {
            panic!("expected failure");
        };
        assert_eq!(error.line, 1);
        assert_eq!(execution.resume(), Status::Failed(error));

        let (sink, _) = capture();
        let mut execution = prepare("x = 1\n", Registry::with_core(sink));
        assert_eq!(execution.resume(), Status::Completed);
        assert_eq!(execution.resume(), Status::Completed);
    }

    #[test]
    fn run_program_surfaces_each_error_kind() {
        let (sink, _) = capture();
        let err = run_program("x = $\n", Registry::with_core(sink)).unwrap_err();
        assert_eq!(err.kind_name(), "lex");

        let (sink, _) = capture();
        let err = run_program("if x\n", Registry::with_core(sink)).unwrap_err();
        assert_eq!(err.kind_name(), "parse");

        let (sink, _) = capture();
        let err = run_program("1 / 0\n", Registry::with_core(sink)).unwrap_err();
        assert_eq!(err.kind_name(), "runtime");
        assert_eq!(err.line(), 1);
    }

    #[test]
    fn sorted_key_calls_survive_budget_pauses() {
        let (sink, lines) = capture();
        let source = indoc! {"
            def negate(n):
                return -n

            values = range(50)
            ordered = sorted(values, negate)
            print(ordered[0], ordered[49])
        "};
        let mut execution = prepare(source, Registry::with_core(sink));
        let mut paused = false;
        loop {
            match execution.resume() {
                Status::Running => paused = true,
                Status::Completed => break,
                other => panic!("unexpected status {other:?}"),
            }
        }
        assert!(paused, "50 key calls must exceed one budget");
        assert_eq!(lines.borrow().as_slice(), ["49 0"]);
    }
}
