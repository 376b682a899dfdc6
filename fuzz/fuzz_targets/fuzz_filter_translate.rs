#![no_main]
use libfuzzer_sys::fuzz_target;
use snacktrack::query::translate::{self, TranslateOptions};
use snacktrack::query::{DuplicateKeys, Filters};

fuzz_target!(|data: &[u8]| {
    if data.len() > 8192 { return; }
    let Ok(s) = std::str::from_utf8(data) else { return };
    // Arbitrary (even ill-typed) filters must translate or fail, never panic
    if let Ok(filters) = serde_json::from_str::<Filters>(s) {
        let conjoin = TranslateOptions { duplicate_keys: DuplicateKeys::Conjoin, ..TranslateOptions::default() };
        for opts in [TranslateOptions::default(), TranslateOptions::strict(), conjoin] {
            let _ = translate::filters_to_document(&filters, &opts);
            let _ = translate::upsert_filter(&filters, &opts);
            let _ = translate::replace_filter(&filters, &opts);
        }
    }
});
