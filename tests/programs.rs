use std::cell::RefCell;
use std::rc::Rc;

use indoc::indoc;

use looplang::error::ProgramError;
use looplang::interpreter::run_program;
use looplang::runtime::registry::{OutputSink, Registry, namespace_dict};
use looplang::runtime::value::Value;

fn run_with(source: &str, configure: impl FnOnce(&mut Registry)) -> Vec<String> {
    let lines = Rc::new(RefCell::new(Vec::new()));
    let captured = Rc::clone(&lines);
    let sink: OutputSink = Rc::new(RefCell::new(move |line| {
        captured.borrow_mut().push(line);
    }));
    let mut registry = Registry::with_core(sink);
    configure(&mut registry);
    run_program(source, registry).expect("program should succeed");
    let out = lines.borrow().clone();
    out
}

fn run(source: &str) -> Vec<String> {
    run_with(source, |_| {})
}

fn fail(source: &str) -> ProgramError {
    let sink: OutputSink = Rc::new(RefCell::new(|_| {}));
    run_program(source, Registry::with_core(sink)).expect_err("program should fail")
}

#[test]
fn arithmetic_floors_division_and_keeps_divisor_sign_on_modulo() {
    let out = run(indoc! {"
        print(7 / 2)
        print(-7 / 2)
        print(-7 % 3)
        print(7 % -3)
        print(2 ** 3 ** 2)
        print(-2 ** 2)
    "});
    assert_eq!(out, ["3", "-4", "2", "-2", "512", "4"]);
}

#[test]
fn compound_division_floors_like_plain_division() {
    let out = run(indoc! {"
        x = 7
        x /= 2
        print(x)
        y = 10
        y += 5
        y -= 3
        y *= 2
        print(y)
    "});
    assert_eq!(out, ["3", "24"]);
}

#[test]
fn strings_support_concat_index_slice_and_iteration() {
    let out = run(indoc! {"
        s = 'hello' + ' ' + \"world\"
        print(s)
        print(s[0], s[-1])
        print(s[6:])
        print(len(s))
        for c in 'abc':
            print(c)
    "});
    assert_eq!(out, ["hello world", "h d", "world", "11", "a", "b", "c"]);
}

#[test]
fn negative_indices_wrap_and_slices_clamp() {
    let out = run(indoc! {"
        xs = [10, 20, 30, 40, 50]
        print(xs[-1], xs[-5])
        print(xs[1:3])
        print(xs[:2])
        print(xs[-2:])
        print(xs[1:100])
        print(xs[::2])
    "});
    assert_eq!(
        out,
        ["50 10", "[20, 30]", "[10, 20]", "[40, 50]", "[20, 30, 40, 50]", "[10, 30, 50]"]
    );
}

#[test]
fn lists_alias_on_assignment_and_compare_by_value() {
    let out = run(indoc! {"
        a = [1, 2]
        b = a
        append(b, 3)
        print(a)
        print(a is b)
        print(a == [1, 2, 3])
        print(a is [1, 2, 3])
    "});
    assert_eq!(out, ["[1, 2, 3]", "True", "True", "False"]);
}

#[test]
fn dict_reads_writes_and_preserves_insertion_order() {
    let out = run(indoc! {"
        d = {'b': 1, 'a': 2}
        d['c'] = 3
        d['b'] = 10
        print(d['b'])
        print(keys(d))
        print('a' in d)
        print('z' in d)
        print(len(d))
    "});
    assert_eq!(out, ["10", "['b', 'a', 'c']", "True", "False", "3"]);
}

#[test]
fn missing_dict_key_fails_with_the_access_line() {
    let source = indoc! {"
        d = {'a': 1}
        x = 1
        y = d['missing']
    "};
    let err = fail(source);
    assert_eq!(err.kind_name(), "runtime");
    assert_eq!(err.line(), 3);
}

#[test]
fn short_circuit_yields_the_deciding_operand_itself() {
    let out = run(indoc! {"
        print(0 or 'fallback')
        print(1 and 2)
        print('' and never_evaluated)
        print('x' or never_evaluated)
        print(not 0)
        print(not [])
    "});
    assert_eq!(out, ["fallback", "2", "", "x", "True", "True"]);
}

#[test]
fn break_and_continue_bind_to_the_innermost_loop() {
    let out = run(indoc! {"
        for i in range(3):
            for j in range(3):
                if j == 1:
                    break
                print(i, j)
        n = 0
        while n < 5:
            n += 1
            if n % 2 == 0:
                continue
            print(n)
    "});
    assert_eq!(out, ["0 0", "1 0", "2 0", "1", "3", "5"]);
}

#[test]
fn return_unwinds_nested_loops_inside_a_function() {
    let out = run(indoc! {"
        def find(grid, wanted):
            for row in grid:
                for cell in row:
                    if cell == wanted:
                        return 'found'
            return 'missing'

        print(find([[1, 2], [3, 4]], 3))
        print(find([[1, 2], [3, 4]], 9))
    "});
    assert_eq!(out, ["found", "missing"]);
}

#[test]
fn functions_without_return_yield_none() {
    let out = run(indoc! {"
        def noop():
            pass
        print(noop())
    "});
    assert_eq!(out, ["None"]);
}

#[test]
fn closures_capture_their_defining_scope() {
    let out = run(indoc! {"
        def make_adder(n):
            return lambda x: x + n

        add2 = make_adder(2)
        add10 = make_adder(10)
        print(add2(5), add10(5))

        def make_counter():
            cell = [0]
            def bump():
                cell[0] = cell[0] + 1
                return cell[0]
            return bump

        tick = make_counter()
        tick()
        tick()
        print(tick())
    "});
    assert_eq!(out, ["7 15", "3"]);
}

#[test]
fn comprehension_variable_does_not_leak() {
    let out = run(indoc! {"
        x = 99
        squares = [x * x for x in range(4)]
        print(squares)
        print(x)
        evens = [n for n in range(10) if n % 2 == 0]
        print(evens)
    "});
    assert_eq!(out, ["[0, 1, 4, 9]", "99", "[0, 2, 4, 6, 8]"]);
}

#[test]
fn global_statement_forces_module_scope_writes() {
    let out = run(indoc! {"
        counter = 0

        def bump():
            global counter
            counter += 1

        def shadow():
            counter = 100

        bump()
        bump()
        shadow()
        print(counter)
    "});
    assert_eq!(out, ["2"]);
}

#[test]
fn classes_bind_fields_methods_and_init() {
    let out = run(indoc! {"
        class Counter:
            def __init__(self, start):
                self.count = start

            def bump(self, by):
                self.count = self.count + by
                return self.count

        c = Counter(10)
        print(c.bump(5))
        print(c.count)
        c.count = 0
        print(c.bump(1))
    "});
    assert_eq!(out, ["15", "15", "1"]);
}

#[test]
fn instance_fields_shadow_methods() {
    let out = run(indoc! {"
        class Box:
            def label(self):
                return 'method'

        b = Box()
        print(b.label())
        b.label = 'field'
        print(b.label)
    "});
    assert_eq!(out, ["method", "field"]);
}

#[test]
fn constructor_arity_is_checked_against_init() {
    let err = fail(indoc! {"
        class Point:
            def __init__(self, x, y):
                self.x = x
                self.y = y

        p = Point(1)
    "});
    assert_eq!(err.kind_name(), "runtime");
    assert_eq!(err.line(), 6);
}

#[test]
fn sorted_is_stable_and_honors_key_and_reverse() {
    let out = run(indoc! {"
        items = [[1, 'b'], [0, 'a'], [1, 'a'], [0, 'b']]
        first = lambda pair: pair[0]
        print(sorted(items, first))
        print(sorted(items, first, True))
        print(sorted([3, 1, 2]))
        print(sorted(['b', 'a', 'c'], None, True))
        print(items)
    "});
    assert_eq!(
        out,
        [
            "[[0, 'a'], [0, 'b'], [1, 'b'], [1, 'a']]",
            "[[1, 'b'], [1, 'a'], [0, 'a'], [0, 'b']]",
            "[1, 2, 3]",
            "['c', 'b', 'a']",
            "[[1, 'b'], [0, 'a'], [1, 'a'], [0, 'b']]",
        ]
    );
}

#[test]
fn sorting_incomparable_elements_fails() {
    let err = fail("x = sorted([1, 'a'])\n");
    assert_eq!(err.kind_name(), "runtime");
    assert_eq!(err.line(), 1);
}

#[test]
fn core_builtins_cover_conversions_and_extremes() {
    let out = run(indoc! {"
        print(str(12) + str(3.5))
        print(num('42') + 1)
        print(abs(-3), abs(2.5))
        print(min(3, 1, 2), max([4, 9, 7]))
        xs = [1, 2, 3]
        print(pop(xs), xs)
    "});
    assert_eq!(out, ["123.5", "43", "3 2.5", "1 9", "3 [1, 2]"]);
}

#[test]
fn chained_comparisons_associate_left() {
    let out = run(indoc! {"
        print(1 < 2 == True)
        print(1 < 2 == False)
    "});
    assert_eq!(out, ["True", "False"]);
}

#[test]
fn tuples_share_list_semantics() {
    let out = run(indoc! {"
        t = (1, 2, 3)
        print(t[0], len(t))
        single = (4,)
        print(single)
        empty = ()
        print(len(empty))
        grouped = (1 + 2) * 3
        print(grouped)
    "});
    assert_eq!(out, ["1 3", "[4]", "0", "9"]);
}

#[test]
fn recursion_works_through_the_frame_machinery() {
    let out = run(indoc! {"
        def fib(n):
            if n < 2:
                return n
            return fib(n - 1) + fib(n - 2)

        print(fib(12))
    "});
    assert_eq!(out, ["144"]);
}

#[test]
fn imported_namespaces_resolve_members() {
    let out = run_with(
        indoc! {"
            import Items
            import Items.stone
            import Unregistered
            print(Items.wood)
            print(stone)
        "},
        |registry| {
            registry.register_namespace(
                "Items",
                namespace_dict(&[
                    ("wood", Value::Number(1.0)),
                    ("stone", Value::Number(2.0)),
                ]),
            );
        },
    );
    assert_eq!(out, ["1", "2"]);
}

#[test]
fn runtime_failures_carry_their_source_line() {
    let err = fail(indoc! {"
        x = 1
        y = 2
        z = x / 0
    "});
    assert_eq!(err.kind_name(), "runtime");
    assert_eq!(err.line(), 3);
    assert!(err.to_string().contains("[line 3]"));

    let err = fail("print(undefined_name)\n");
    assert!(err.to_string().contains("undefined_name"));

    let err = fail("x = 'a' + 1\n");
    assert!(err.to_string().contains("'+'"));
}

#[test]
fn control_flow_keywords_outside_their_context_fail() {
    let err = fail("break\n");
    assert_eq!(err.kind_name(), "runtime");

    let err = fail("return 1\n");
    assert_eq!(err.kind_name(), "runtime");

    let err = fail(indoc! {"
        def f():
            break
        f()
    "});
    assert_eq!(err.kind_name(), "runtime");
    assert_eq!(err.line(), 2);
}

#[test]
fn calling_a_non_callable_and_bad_arity_fail() {
    let err = fail("x = 5\nx()\n");
    assert_eq!(err.line(), 2);

    let err = fail(indoc! {"
        def two(a, b):
            return a
        two(1)
    "});
    assert_eq!(err.line(), 3);
    assert!(err.to_string().contains("two"));

    let err = fail("len()\n");
    assert!(err.to_string().contains("len"));
}

#[test]
fn while_else_free_loop_runs_to_condition_failure() {
    let out = run(indoc! {"
        total = 0
        n = 10
        while n > 0:
            total += n
            n -= 1
        print(total)
    "});
    assert_eq!(out, ["55"]);
}

#[test]
fn inline_suites_and_elif_chains_evaluate_in_order() {
    let out = run(indoc! {"
        def grade(score):
            if score >= 90: return 'A'
            elif score >= 80: return 'B'
            elif score >= 70: return 'C'
            else: return 'F'

        print(grade(95), grade(85), grade(72), grade(10))
    "});
    assert_eq!(out, ["A B C F"]);
}

#[test]
fn membership_operator_covers_all_containers() {
    let out = run(indoc! {"
        print('ell' in 'hello')
        print(2 in [1, 2, 3])
        print(5 in [1, 2, 3])
        print('k' in {'k': 1})
    "});
    assert_eq!(out, ["True", "True", "False", "True"]);
}
