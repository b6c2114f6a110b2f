#![no_main]
use std::collections::BTreeMap;

use libfuzzer_sys::fuzz_target;
use pausegate_engine::formula::Formula;

fuzz_target!(|data: &[u8]| {
    let Ok(src) = std::str::from_utf8(data) else {
        return;
    };
    let Ok(formula) = Formula::parse(src) else {
        return;
    };
    // Every variable bound: evaluation must succeed for any vote pattern.
    for seed in 0u32..4 {
        let votes: BTreeMap<String, bool> = formula
            .variables()
            .iter()
            .enumerate()
            .map(|(i, name)| (name.clone(), (seed >> (i % 2)) & 1 == 1))
            .collect();
        assert!(formula.evaluate(&votes).is_ok());
    }
});
