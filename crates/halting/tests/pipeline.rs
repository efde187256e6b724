use common::{AnalyzerConfig, Outcome};
use halting::{Analyzer, CANDIDATE_PATH};

const COLLATZ: &str = include_str!("programs/collatz_conjecture.py");
const ACKERMANN: &str = include_str!("programs/ackermann.py");
const PARADOX: &str = include_str!("programs/paradox.py");
const OBFUSCATED: &str = include_str!("programs/obfuscated_paradox.py");
const TRULY_OBFUSCATED: &str = include_str!("programs/truly_obfuscated_paradox.py");
const FINAL: &str = include_str!("programs/final_paradox.py");
const MUTATING: &str = include_str!("programs/mutating_paradox_A.py");
const POLYMORPHIC: &str = include_str!("programs/polymorphic_termination_paradox.py");

fn analyze(src: &str) -> common::Verdict {
    Analyzer::default().analyze(src).unwrap()
}

#[test]
fn straight_line_program_halts_statically() {
    let verdict = analyze("x = 1\ny = x + 2\nprint(y)\n");
    assert_eq!(verdict.outcome, Outcome::Halts);
    assert!(verdict.reason.starts_with("Static analysis"), "{}", verdict.reason);
}

#[test]
fn literal_infinite_loop_does_not_halt() {
    let verdict = analyze("while True:\n    pass\n");
    assert_eq!(verdict.outcome, Outcome::DoesNotHalt);
}

#[test]
fn counted_loop_halts() {
    let verdict = analyze("for i in range(10):\n    print(i)\n");
    assert_eq!(verdict.outcome, Outcome::Halts);
}

#[test]
fn bounded_while_is_proved() {
    let verdict = analyze("x = 0\nwhile x < 10:\n    x = x + 1\n");
    assert_eq!(verdict.outcome, Outcome::Halts);
    assert!(verdict.reason.starts_with("Symbolic prover"), "{}", verdict.reason);
}

#[test]
fn unparseable_self_reference_reaches_the_fallback() {
    let verdict = analyze("analyze_halting(:\n");
    assert_eq!(verdict.outcome, Outcome::DoesNotHalt);
    assert!(verdict.reason.contains("`analyze_halting`"), "{}", verdict.reason);
}

#[test]
fn known_hard_programs_are_undecided() {
    for src in [COLLATZ, ACKERMANN] {
        let verdict = analyze(src);
        assert_eq!(verdict.outcome, Outcome::ImpossibleToDetermine, "{}", verdict.reason);
        assert!(verdict.reason.starts_with("Heuristic classification"), "{}", verdict.reason);
    }
}

#[test]
fn analysis_is_repeatable() {
    let analyzer = Analyzer::default();
    let mut session = analyzer.session();
    assert!(session.chain().is_empty());
    let first = session.analyze(COLLATZ).unwrap();
    let second = session.analyze(COLLATZ).unwrap();
    assert_eq!(first, second);
    assert!(session.chain().is_empty());
    assert_eq!(analyzer.analyze(COLLATZ).unwrap(), first);
}

#[test]
fn paradox_family_never_halts() {
    for (name, src) in [
        ("paradox", PARADOX),
        ("obfuscated", OBFUSCATED),
        ("truly_obfuscated", TRULY_OBFUSCATED),
        ("final", FINAL),
        ("mutating", MUTATING),
        ("polymorphic", POLYMORPHIC),
    ] {
        let verdict = analyze(src);
        assert_ne!(verdict.outcome, Outcome::Halts, "{name}: {}", verdict.reason);
    }
}

#[test]
fn classic_paradox_is_recognized() {
    let verdict = analyze(PARADOX);
    assert_eq!(verdict.outcome, Outcome::ImpossibleToDetermine);
    assert!(verdict.reason.starts_with("Paradox detection"), "{}", verdict.reason);
}

#[test]
fn self_analysis_through_getattr_closes_a_cycle() {
    for src in [OBFUSCATED, FINAL] {
        let verdict = analyze(src);
        assert_eq!(verdict.outcome, Outcome::DoesNotHalt);
        assert!(
            verdict.reason.contains("Mutual recursion detected in analysis chain"),
            "{}",
            verdict.reason
        );
    }
}

/// A writes B, B analyzes A, A analyzes B. The inner re-entry of A is cut
/// off, B is judged non-halting and A sees that answer.
const PART_A: &str = r#"
import os
entry = getattr(__import__('main'), 'analyze_halting')

def spin(n):
    if n > 0:
        spin(n - 1)

code_b = """
import os
entry = getattr(__import__('main'), 'analyze_halting')

def idle(n):
    if n > 0:
        idle(n - 1)

with open('/sandbox/candidate.py', 'r') as f:
    source_a = f.read()
answer = entry(source_a)
print(answer)
"""

with open('/sandbox/b.py', 'w') as f:
    f.write(code_b)
with open('/sandbox/b.py') as f:
    source_b = f.read()
answer = entry(source_b)
with open('/sandbox/result.txt', 'w') as f:
    f.write(answer)
spin(3)
"#;

#[test]
fn mutual_analysis_is_cut_at_the_repeat() {
    let analyzer = Analyzer::default();
    let mut session = analyzer.session();
    let verdict = session.analyze(PART_A).unwrap();
    assert_eq!(verdict.outcome, Outcome::Halts, "{}", verdict.reason);
    assert_eq!(session.fs().read("/sandbox/result.txt").unwrap(), "does not halt");
    assert_eq!(session.fs().read(CANDIDATE_PATH).unwrap(), PART_A);
    assert!(session.chain().is_empty());
}

#[test]
fn nested_depth_limit_stops_the_candidate() {
    let mut config = AnalyzerConfig::default();
    config.tracer.max_nested_analyses = 1;
    let analyzer = Analyzer::new(config);
    let src = "entry = getattr(__import__('main'), 'analyze_halting')\n\
               def spin(n):\n    if n > 0:\n        spin(n - 1)\n\
               print(entry('x = 1'))\n";
    let verdict = analyzer.analyze(src).unwrap();
    assert_eq!(verdict.outcome, Outcome::DoesNotHalt);
    assert!(verdict.reason.contains("depth limit"), "{}", verdict.reason);
}

#[test]
fn nested_analysis_answers_the_candidate() {
    let src = "entry = getattr(__import__('main'), 'analyze_halting')\n\
               def spin(n):\n    if n > 0:\n        spin(n - 1)\n\
               answer = entry('while True:\\n    pass\\n')\n\
               if answer != 'does not halt':\n    raise ValueError(answer)\n";
    let verdict = analyze(src);
    assert_eq!(verdict.outcome, Outcome::Halts);
    assert!(verdict.reason.contains("completed normally"), "{}", verdict.reason);
}

#[test]
fn nested_runs_share_one_time_budget() {
    let mut config = AnalyzerConfig::default();
    config.tracer.max_execution_ms = 400;
    config.tracer.max_trace_len = 50_000_000;
    let analyzer = Analyzer::new(config);
    let src = "entry = getattr(__import__('main'), 'analyze_halting')\n\
               def spin(n):\n    if n > 0:\n        spin(n - 1)\n\
               slow = 'n = 0\\nwhile n * n != -1:\\n    n += 1\\n'\n\
               for i in range(5):\n    entry(slow)\n";
    let started = std::time::Instant::now();
    let verdict = analyzer.analyze(src).unwrap();
    assert_eq!(verdict.outcome, Outcome::DoesNotHalt);
    assert!(verdict.reason.contains("Execution exceeded"), "{}", verdict.reason);
    assert!(started.elapsed() < std::time::Duration::from_millis(1_500));
}
