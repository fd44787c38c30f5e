#![no_main]

//! Console command parser fuzzer.
//!
//! Any text either parses into a command whose canonical form parses back to
//! the same command, or is rejected with an error. Nothing panics.

use libfuzzer_sys::fuzz_target;
use tickboot::OperatorCommand;

fuzz_target!(|text: &str| {
    if let Ok(command) = text.parse::<OperatorCommand>() {
        let canonical = command.to_string();
        let reparsed: OperatorCommand = canonical
            .parse()
            .unwrap_or_else(|e| panic!("canonical form `{canonical}` rejected: {e}"));
        assert_eq!(reparsed, command, "round trip through `{canonical}`");
    }
});
