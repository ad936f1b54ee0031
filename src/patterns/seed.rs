//! Built-in catalogue of common Python test failure signatures

use super::KnownPattern;

struct Seed {
    id: &'static str,
    pattern: &'static str,
    failure_type: &'static str,
    base_message: &'static str,
    suggested_fix: &'static str,
    impact: f64,
}

const SEEDS: &[Seed] = &[
    Seed {
        id: "none-attribute",
        pattern: "'NoneType' object has no attribute",
        failure_type: "AttributeError",
        base_message: "'NoneType' object has no attribute",
        suggested_fix: "A value expected to be an object is None. Check the return value of the call that produced it, or guard the access with an explicit None check.",
        impact: 0.8,
    },
    Seed {
        id: "missing-attribute",
        pattern: "object has no attribute",
        failure_type: "AttributeError",
        base_message: "object has no attribute",
        suggested_fix: "The attribute does not exist on this object. Check for a renamed field or method, a typo, or a mock missing the attribute.",
        impact: 0.6,
    },
    Seed {
        id: "module-not-found",
        pattern: "No module named",
        failure_type: "ModuleNotFoundError",
        base_message: "No module named",
        suggested_fix: "Install the missing package in the test environment or fix the import path. Add it to the project's test dependencies.",
        impact: 0.9,
    },
    Seed {
        id: "cannot-import-name",
        pattern: "cannot import name",
        failure_type: "ImportError",
        base_message: "cannot import name",
        suggested_fix: "The imported symbol no longer exists in the target module. Update the import to the new name or location, and check for circular imports.",
        impact: 0.9,
    },
    Seed {
        id: "missing-positional-argument",
        pattern: "missing 1 required positional argument",
        failure_type: "TypeError",
        base_message: "missing 1 required positional argument",
        suggested_fix: "A call site does not pass a required argument. Update the caller to match the current function signature or give the parameter a default.",
        impact: 0.7,
    },
    Seed {
        id: "unexpected-keyword-argument",
        pattern: "got an unexpected keyword argument",
        failure_type: "TypeError",
        base_message: "got an unexpected keyword argument",
        suggested_fix: "A keyword argument is passed that the callee does not accept. Rename the keyword or update the function signature.",
        impact: 0.7,
    },
    Seed {
        id: "unsupported-operand",
        pattern: "unsupported operand type(s)",
        failure_type: "TypeError",
        base_message: "unsupported operand type(s) for",
        suggested_fix: "Operands have incompatible types. Convert one side explicitly or check where an unexpected type (often None or str) enters.",
        impact: 0.6,
    },
    Seed {
        id: "not-subscriptable",
        pattern: "object is not subscriptable",
        failure_type: "TypeError",
        base_message: "object is not subscriptable",
        suggested_fix: "Indexing is applied to a value that does not support it. Check that the value is a list or dict and not None or a scalar.",
        impact: 0.6,
    },
    Seed {
        id: "index-out-of-range",
        pattern: "index out of range",
        failure_type: "IndexError",
        base_message: "list index out of range",
        suggested_fix: "An index exceeds the sequence length. Check empty inputs and off-by-one loop bounds.",
        impact: 0.6,
    },
    Seed {
        id: "division-by-zero",
        pattern: "division by zero",
        failure_type: "ZeroDivisionError",
        base_message: "division by zero",
        suggested_fix: "Guard the division against a zero denominator, typically an empty collection or a zero count.",
        impact: 0.5,
    },
    Seed {
        id: "file-not-found",
        pattern: "No such file or directory",
        failure_type: "FileNotFoundError",
        base_message: "[Errno 2] No such file or directory",
        suggested_fix: "The test reads a path that does not exist. Resolve fixture paths relative to the test file or create the file in a temporary directory.",
        impact: 0.7,
    },
    Seed {
        id: "invalid-int-literal",
        pattern: "invalid literal for int()",
        failure_type: "ValueError",
        base_message: "invalid literal for int() with base 10",
        suggested_fix: "A non-numeric string is parsed as an integer. Validate or strip the input before converting.",
        impact: 0.5,
    },
    Seed {
        id: "name-not-defined",
        pattern: "is not defined",
        failure_type: "NameError",
        base_message: "name is not defined",
        suggested_fix: "A name is used before it is defined or imported. Add the missing import or fix the typo.",
        impact: 0.8,
    },
    Seed {
        id: "recursion-depth",
        pattern: "maximum recursion depth exceeded",
        failure_type: "RecursionError",
        base_message: "maximum recursion depth exceeded",
        suggested_fix: "A recursive call never reaches its base case. Check the termination condition or convert the recursion into a loop.",
        impact: 0.7,
    },
    Seed {
        id: "fixture-not-found",
        pattern: "fixture '",
        failure_type: "FixtureLookupError",
        base_message: "fixture not found",
        suggested_fix: "The test requests a fixture that is not defined. Add it to conftest.py or fix the fixture name.",
        impact: 0.8,
    },
    Seed {
        id: "connection-refused",
        pattern: "Connection refused",
        failure_type: "ConnectionRefusedError",
        base_message: "[Errno 111] Connection refused",
        suggested_fix: "The test talks to a service that is not running. Mock the network call or start the service in a fixture.",
        impact: 0.6,
    },
    Seed {
        id: "timeout",
        pattern: "timed out",
        failure_type: "TimeoutError",
        base_message: "timed out",
        suggested_fix: "An operation exceeded its time limit. Mock the slow dependency or raise the timeout for this test.",
        impact: 0.5,
    },
    Seed {
        id: "assert-none",
        pattern: "assert None",
        failure_type: "AssertionError",
        base_message: "assert None ==",
        suggested_fix: "A function returned None where a value was expected. Check for a missing return statement.",
        impact: 0.6,
    },
    Seed {
        id: "key-error",
        pattern: "KeyError",
        failure_type: "KeyError",
        base_message: "KeyError",
        suggested_fix: "A dictionary key is missing. Use .get() with a default or make sure the key is populated before access.",
        impact: 0.5,
    },
];

/// The built-in catalogue
pub fn seed_patterns() -> Vec<KnownPattern> {
    SEEDS
        .iter()
        .map(|seed| KnownPattern {
            id: seed.id.to_string(),
            pattern: seed.pattern.to_string(),
            failure_type: seed.failure_type.to_string(),
            base_message: seed.base_message.to_string(),
            suggested_fix: seed.suggested_fix.to_string(),
            impact_score: seed.impact,
        })
        .collect()
}
