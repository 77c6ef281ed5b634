use std::path::PathBuf;

use stt_adapters::parse_lenient_json;

fn fixture_path(source: &str, name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("../../fixtures")
        .join(source)
        .join(name)
}

fn load(source: &str, name: &str) -> serde_json::Value {
    let path = fixture_path(source, name);
    let raw = std::fs::read_to_string(&path)
        .unwrap_or_else(|err| panic!("reading {}: {err}", path.display()));
    parse_lenient_json(&raw).unwrap_or_else(|err| panic!("parsing {}: {err}", path.display()))
}

#[test]
fn yandex_fixtures_carry_the_crm_envelope() {
    for name in ["event_list.json", "report_event.json"] {
        let body = load("yandex", name);
        assert_eq!(body["status"], "0", "{name}");
        assert!(body["result"].is_array(), "{name}");
    }
}

#[test]
fn gostandup_fixture_lists_events() {
    let body = load("gostandup", "events.json");
    assert!(body["events"].as_array().is_some_and(|e| !e.is_empty()));
}

#[test]
fn timepad_pages_agree_on_the_reported_total() {
    let first = load("timepad", "events_page1.json");
    let second = load("timepad", "events_page2.json");
    assert_eq!(first["total"], second["total"]);

    let listed = first["values"].as_array().map_or(0, Vec::len)
        + second["values"].as_array().map_or(0, Vec::len);
    assert_eq!(Some(listed as u64), first["total"].as_u64());

    let registration = load("timepad", "registration_7002.json");
    assert!(registration["registration"]["places"].is_array());
}
