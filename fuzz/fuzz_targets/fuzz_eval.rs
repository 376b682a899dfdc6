#![no_main]
use libfuzzer_sys::fuzz_target;
use snacktrack::query::translate::{self, TranslateOptions};
use snacktrack::query::{eval, Filters};

fuzz_target!(|data: &[u8]| {
    if data.len() > 8192 { return; }
    let Ok(s) = std::str::from_utf8(data) else { return };
    let Ok(filters) = serde_json::from_str::<Filters>(s) else { return };
    let Ok(filter) = translate::filters_to_document(&filters, &TranslateOptions::default()) else { return };
    // A tiny set of docs to exercise eval paths
    let docs = [
        bson::doc! { "user_id": "U1", "n": 1, "address_ids": ["A1", "A2"] },
        bson::doc! { "user_id": "U2", "n": 10.5, "schedule": [ { "from": "09:00", "to": "17:00" } ] },
        bson::doc! { "active": true, "nested": { "z": 3 } },
    ];
    for d in &docs {
        let _ = eval::matches(d, &filter);
    }
});
