//! Transition-selection semantics: descriptor hierarchies, parallel done
//! events, conflict preemption, internal vs external self entries, the
//! microstep bound, and error-event handling.

mod common;
use common::*;

use std::sync::Arc;

use serde_json::json;
use statechart::{ChartDoc, ExecutorConfig, FunctionDispatcher, StateMachineFactory};

fn chart(value: serde_json::Value) -> ChartDoc {
    serde_json::from_value(value).expect("chart parses")
}

fn machine_for(doc: ChartDoc) -> statechart::StateMachine {
    let name = doc.name.clone();
    StateMachineFactory::from_docs(vec![doc])
        .expect("chart compiles")
        .create_machine(&name, Arc::new(FunctionDispatcher::new()))
        .expect("machine created")
}

#[test]
fn event_descriptors_match_as_dotted_prefixes() {
    let doc = chart(json!({
        "name": "descriptors",
        "states": [
            {"state": {
                "id": "A",
                "transitions": [
                    {"event": ["event1"], "target": ["B"]},
                    {"event": ["event1.sub"], "target": ["C"]},
                    {"event": ["*"], "target": ["D"]}
                ]
            }},
            {"state": {"id": "B"}},
            {"state": {"id": "C"}},
            {"state": {"id": "D"}}
        ]
    }));

    // The first declared transition wins on a hierarchical-prefix match.
    let mut machine = machine_for(doc.clone());
    machine.start();
    machine.send_event("event1.sub.anything", "");
    assert_active(&machine, &["B"]);

    // Nothing but the wildcard matches an unrelated name.
    let mut machine = machine_for(doc);
    machine.start();
    machine.send_event("totally_unrelated", "");
    assert_active(&machine, &["D"]);
}

#[test]
fn parallel_done_event_fires_once_after_all_regions_finish() {
    let region = |name: &str, event: &str| {
        json!({"state": {
            "id": name,
            "states": [
                {"state": {
                    "id": format!("{name}_run"),
                    "transitions": [
                        {"event": [event], "target": [format!("{name}_done")]}
                    ]
                }},
                {"final": {"id": format!("{name}_done")}}
            ]
        }})
    };
    let doc = chart(json!({
        "name": "regions",
        "datamodel": [{"id": "done_count", "expr": "0"}],
        "states": [
            {"parallel": {
                "id": "P",
                "transitions": [
                    {
                        "event": ["done.state.P"],
                        "target": ["finished"],
                        "executable": [
                            {"assign": {"location": "done_count", "expr": "done_count + 1"}}
                        ]
                    }
                ],
                "states": [
                    region("B", "b.go"),
                    region("C", "c.go"),
                    region("D", "d.go")
                ]
            }},
            {"state": {"id": "finished"}}
        ]
    }));

    let mut machine = machine_for(doc);
    machine.start();
    assert_active(&machine, &["P", "B", "B_run", "C", "C_run", "D", "D_run"]);

    machine.send_event("b.go", "");
    assert!(active_ids(&machine).contains(&"B_done".to_string()));
    assert_active(&machine, &["P", "B", "B_done", "C", "C_run", "D", "D_run"]);

    machine.send_event("c.go", "");
    assert_active(&machine, &["P", "B", "B_done", "C", "C_done", "D", "D_run"]);

    // The third final completes every region: done.state.P fires the
    // configured handler exactly once.
    machine.send_event("d.go", "");
    assert_active(&machine, &["finished"]);
    let count: i64 = machine.extract_from_datamodel("done_count").unwrap();
    assert_eq!(count, 1);
}

#[test]
fn conflicting_cross_region_transitions_prefer_document_order() {
    let doc = chart(json!({
        "name": "conflict",
        "states": [
            {"parallel": {
                "id": "P",
                "states": [
                    {"state": {
                        "id": "R1",
                        "states": [{"state": {
                            "id": "a",
                            "transitions": [{"event": ["go"], "target": ["X"]}]
                        }}]
                    }},
                    {"state": {
                        "id": "R2",
                        "states": [{"state": {
                            "id": "b",
                            "transitions": [{"event": ["go"], "target": ["Y"]}]
                        }}]
                    }}
                ]
            }},
            {"state": {"id": "X"}},
            {"state": {"id": "Y"}}
        ]
    }));

    let mut machine = machine_for(doc);
    machine.start();
    machine.send_event("go", "");
    // Both regions select a transition; the exit sets intersect and the
    // earlier (document-order) candidate preempts the later one.
    assert_active(&machine, &["X"]);
}

#[test]
fn internal_transitions_do_not_exit_their_source() {
    let doc = chart(json!({
        "name": "internal",
        "datamodel": [{"id": "exits", "expr": "0"}],
        "states": [
            {"state": {
                "id": "parent",
                "onexit": [{"assign": {"location": "exits", "expr": "exits + 1"}}],
                "states": [{"state": {"id": "child"}}],
                "transitions": [
                    {"event": ["int"], "target": ["child"], "kind": "internal"},
                    {"event": ["ext"], "target": ["child"]}
                ]
            }}
        ]
    }));

    let mut machine = machine_for(doc);
    machine.start();

    machine.send_event("int", "");
    let exits: i64 = machine.extract_from_datamodel("exits").unwrap();
    assert_eq!(exits, 0);

    machine.send_event("ext", "");
    let exits: i64 = machine.extract_from_datamodel("exits").unwrap();
    assert_eq!(exits, 1);
    assert_active(&machine, &["parent", "child"]);
}

#[test]
fn targetless_transitions_run_effects_without_exiting() {
    let doc = chart(json!({
        "name": "targetless",
        "datamodel": [{"id": "hits", "expr": "0"}],
        "states": [
            {"state": {
                "id": "only",
                "transitions": [
                    {
                        "event": ["poke"],
                        "executable": [
                            {"assign": {"location": "hits", "expr": "hits + 1"}}
                        ]
                    }
                ]
            }}
        ]
    }));

    let listener = Arc::new(RecordingListener::default());
    let mut machine = machine_for(doc);
    machine.add_listener(listener.clone());
    machine.start();
    listener.take();

    machine.send_event("poke", "");
    machine.send_event("poke", "");
    let hits: i64 = machine.extract_from_datamodel("hits").unwrap();
    assert_eq!(hits, 2);
    assert_active(&machine, &["only"]);
    // The implicit self-loop neither exits nor re-enters the source.
    assert_eq!(
        listener.take(),
        ["transition:only->", "transition:only->"]
    );
}

#[test]
fn explicit_self_transition_exits_and_reenters() {
    let doc = chart(json!({
        "name": "selfloop",
        "datamodel": [{"id": "entries", "expr": "0"}],
        "states": [
            {"state": {
                "id": "s",
                "onentry": [{"assign": {"location": "entries", "expr": "entries + 1"}}],
                "transitions": [{"event": ["again"], "target": ["s"]}]
            }}
        ]
    }));

    let mut machine = machine_for(doc);
    machine.start();
    machine.send_event("again", "");
    let entries: i64 = machine.extract_from_datamodel("entries").unwrap();
    assert_eq!(entries, 2);
}

#[test]
fn macrostep_honors_the_microstep_bound() {
    let doc = chart(json!({
        "name": "runaway",
        "datamodel": [{"id": "n", "expr": "0"}],
        "states": [
            {"state": {
                "id": "loop",
                "onentry": [{"assign": {"location": "n", "expr": "n + 1"}}],
                "transitions": [{"target": ["loop"]}]
            }}
        ]
    }));

    let name = doc.name.clone();
    let mut machine = StateMachineFactory::from_docs(vec![doc])
        .unwrap()
        .with_executor_config(ExecutorConfig { max_microsteps: 5 })
        .create_machine(&name, Arc::new(FunctionDispatcher::new()))
        .unwrap();
    machine.start();

    // One initial entry plus exactly max_microsteps re-entries.
    let n: i64 = machine.extract_from_datamodel("n").unwrap();
    assert_eq!(n, 6);
    // The machine stays in its last reached configuration, still running.
    assert!(machine.runtime().is_running());
    assert_active(&machine, &["loop"]);

    // The next external event runs another bounded macrostep.
    machine.send_event("anything", "");
    let n: i64 = machine.extract_from_datamodel("n").unwrap();
    assert_eq!(n, 11);
}

#[test]
fn unhandled_error_event_halts_the_macrostep() {
    let doc = chart(json!({
        "name": "erroring",
        "states": [
            {"state": {
                "id": "A",
                "transitions": [
                    {"cond": "ghost > 1", "target": ["B"]}
                ]
            }},
            {"state": {"id": "B"}}
        ]
    }));

    let mut machine = machine_for(doc);
    machine.start();
    // The failing condition disabled the transition and raised
    // error.execution; with no handler the macrostep halted in place.
    assert_active(&machine, &["A"]);
    assert!(machine.runtime().is_running());
    // Quiescent despite the halt: snapshots are allowed.
    assert!(machine.serialize_to_context().is_ok());
}

#[test]
fn handled_error_event_takes_its_transition() {
    let doc = chart(json!({
        "name": "recovering",
        "states": [
            {"state": {
                "id": "A",
                "transitions": [
                    {"cond": "ghost > 1", "target": ["B"]},
                    {"event": ["error.execution"], "target": ["E"]}
                ]
            }},
            {"state": {"id": "B"}},
            {"state": {"id": "E"}}
        ]
    }));

    let mut machine = machine_for(doc);
    machine.start();
    assert_active(&machine, &["E"]);
}

#[test]
fn top_level_final_state_stops_the_session() {
    let doc = chart(json!({
        "name": "stopping",
        "datamodel": [{"id": "cleanups", "expr": "0"}],
        "states": [
            {"state": {
                "id": "work",
                "onexit": [{"assign": {"location": "cleanups", "expr": "cleanups + 1"}}],
                "transitions": [{"event": ["quit"], "target": ["end"]}]
            }},
            {"final": {"id": "end"}}
        ]
    }));

    let mut machine = machine_for(doc);
    machine.start();
    machine.send_event("quit", "");

    assert!(!machine.runtime().is_running());
    // Shutdown ran the exit actions and emptied the configuration.
    assert_active(&machine, &[]);
    // Events after shutdown are ignored.
    machine.send_event("quit", "");
    assert!(!machine.runtime().is_running());
}

#[test]
fn event_data_is_retained_when_the_next_event_has_no_payload() {
    let doc = chart(json!({
        "name": "retention",
        "states": [{"state": {"id": "only"}}]
    }));

    let mut machine = machine_for(doc);
    machine.start();
    machine.send_event("set", r#"{"x": 1}"#);
    machine.send_event("noop", "");

    let name: String = machine.extract_from_datamodel("_event.name").unwrap();
    assert_eq!(name, "noop");
    // _event.data simply keeps its previous value.
    let x: i64 = machine.extract_from_datamodel("_event.data.x").unwrap();
    assert_eq!(x, 1);
}

#[test]
fn send_reports_namelist_locations_to_listeners() {
    let doc = chart(json!({
        "name": "sender",
        "datamodel": [{"id": "order_id", "expr": "42"}],
        "states": [{"state": {
            "id": "s",
            "transitions": [{
                "event": ["ship"],
                "executable": [{"send": {
                    "event": "order.shipped",
                    "target": "warehouse",
                    "namelist": ["order_id"]
                }}]
            }]
        }}]
    }));

    let listener = Arc::new(RecordingListener::default());
    let mut machine = machine_for(doc);
    machine.add_listener(listener.clone());
    machine.start();
    listener.take();

    machine.send_event("ship", "");
    // The send fires inside the transition body, before the followed
    // notification; the interpreter itself delivers nothing.
    assert_eq!(
        listener.take(),
        [
            "send:order.shipped@warehouse:{\"order_id\":42}",
            "transition:s->"
        ]
    );
    assert_active(&machine, &["s"]);
}

#[test]
fn done_events_for_nested_compound_states() {
    let doc = chart(json!({
        "name": "nested_done",
        "states": [
            {"state": {
                "id": "outer",
                "states": [
                    {"state": {
                        "id": "inner",
                        "states": [
                            {"state": {
                                "id": "step",
                                "transitions": [{"event": ["finish"], "target": ["inner_done"]}]
                            }},
                            {"final": {"id": "inner_done"}}
                        ]
                    }}
                ],
                "transitions": [
                    {"event": ["done.state.inner"], "target": ["after"]}
                ]
            }},
            {"state": {"id": "after"}}
        ]
    }));

    let mut machine = machine_for(doc);
    machine.start();
    machine.send_event("finish", "");
    assert_active(&machine, &["after"]);
}
