#![no_main]
use libfuzzer_sys::fuzz_target;
use snacktrack::query::translate::{self, TranslateOptions};
use snacktrack::query::Updates;

fuzz_target!(|data: &[u8]| {
    if data.len() > 8192 { return; }
    let Ok(s) = std::str::from_utf8(data) else { return };
    if let Ok(updates) = serde_json::from_str::<Updates>(s) {
        for opts in [TranslateOptions::default(), TranslateOptions::strict()] {
            let _ = translate::updates_to_document(&updates, &opts);
            let _ = translate::upsert_update(&updates, &opts);
        }
    }
});
