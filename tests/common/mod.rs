#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use serde_json::json;
use statechart::{ChartDoc, FunctionDispatcher, Listener, StateMachine, StateMachineFactory};

/// Call at the top of a test to see interpreter traces with
/// `RUST_LOG=statechart=debug cargo test -- --nocapture`.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// The microwave demo chart: three parallel regions coupling the door, the
/// light, and the oven power/cooking logic through `In()` conditions.
pub fn microwave_chart() -> ChartDoc {
    serde_json::from_value(json!({
        "name": "microwave",
        "datamodel": [
            {"id": "state", "expr": "{ \"light\" : \"OFF\" }"}
        ],
        "states": [
            {"parallel": {
                "id": "appliance",
                "states": [
                    {"state": {
                        "id": "door",
                        "initial_id": ["door_is_closed"],
                        "states": [
                            {"state": {
                                "id": "door_is_open",
                                "onentry": [
                                    {"log": {"label": "DoorState", "expr": "'Door is Open.'"}}
                                ],
                                "transitions": [
                                    {"event": ["event.CloseDoor"], "target": ["door_is_closed"]}
                                ]
                            }},
                            {"state": {
                                "id": "door_is_closed",
                                "onentry": [
                                    {"log": {"label": "DoorState", "expr": "'Door is Closed.'"}}
                                ],
                                "transitions": [
                                    {"event": ["event.OpenDoor"], "target": ["door_is_open"]}
                                ]
                            }}
                        ]
                    }},
                    {"state": {
                        "id": "light_controller",
                        "initial_id": ["light_off"],
                        "states": [
                            {"state": {
                                "id": "light_off",
                                "onentry": [
                                    {"assign": {"location": "state.light", "expr": "'OFF'"}}
                                ],
                                "transitions": [
                                    {
                                        "cond": "In('power_on') && (In('door_is_open') || In('cooking'))",
                                        "target": ["light_on"]
                                    }
                                ]
                            }},
                            {"state": {
                                "id": "light_on",
                                "onentry": [
                                    {"assign": {"location": "state.light", "expr": "'ON'"}}
                                ],
                                "transitions": [
                                    {
                                        "cond": "!(In('power_on') && (In('door_is_open') || In('cooking')))",
                                        "target": ["light_off"]
                                    }
                                ]
                            }}
                        ]
                    }},
                    {"state": {
                        "id": "oven",
                        "initial_id": ["power_off"],
                        "states": [
                            {"state": {
                                "id": "power_on",
                                "onentry": [
                                    {"assign": {
                                        "location": "state.cooking_duration_sec",
                                        "expr": "0"
                                    }}
                                ],
                                "transitions": [
                                    {"event": ["event.PowerOff"], "target": ["power_off"]}
                                ],
                                "states": [
                                    {"state": {
                                        "id": "idle",
                                        "transitions": [
                                            {
                                                "event": ["event.StartCooking"],
                                                "target": ["cooking"],
                                                "executable": [
                                                    {"log": {"label": "Payload", "expr": "_event"}},
                                                    {"assign": {
                                                        "location": "state.cooking_duration_sec",
                                                        "expr": "_event.data.duration_sec"
                                                    }}
                                                ]
                                            },
                                            {"event": ["event.Resume"], "target": ["cooking"]}
                                        ]
                                    }},
                                    {"state": {
                                        "id": "cooking",
                                        "transitions": [
                                            {"event": ["event.Pause"], "target": ["idle"]},
                                            {
                                                "event": ["event.TimeTick"],
                                                "target": ["cooking"],
                                                "executable": [
                                                    {"assign": {
                                                        "location": "state.cooking_duration_sec",
                                                        "expr": "Decrement(state.cooking_duration_sec)"
                                                    }}
                                                ]
                                            },
                                            {
                                                "cond": "state.cooking_duration_sec <= 0",
                                                "target": ["idle"]
                                            },
                                            {"cond": "In('door_is_open')", "target": ["idle"]}
                                        ]
                                    }}
                                ]
                            }},
                            {"state": {
                                "id": "power_off",
                                "transitions": [
                                    {"event": ["event.PowerOn"], "target": ["power_on"]}
                                ]
                            }}
                        ]
                    }}
                ]
            }}
        ]
    }))
    .expect("microwave chart parses")
}

/// A dispatcher with the host functions the microwave chart calls.
pub fn microwave_dispatcher() -> Arc<FunctionDispatcher> {
    let mut dispatcher = FunctionDispatcher::new();
    assert!(dispatcher.register("Decrement", |i: i64| i - 1));
    Arc::new(dispatcher)
}

pub fn microwave_factory() -> StateMachineFactory {
    StateMachineFactory::from_docs(vec![microwave_chart()]).expect("microwave chart compiles")
}

/// Records every listener callback as a flat string log.
#[derive(Default)]
pub struct RecordingListener {
    log: Mutex<Vec<String>>,
}

impl RecordingListener {
    pub fn take(&self) -> Vec<String> {
        std::mem::take(&mut *self.log.lock().unwrap())
    }

    pub fn snapshot(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }
}

impl Listener for RecordingListener {
    fn on_state_entered(&self, state_id: &str) {
        self.log.lock().unwrap().push(format!("enter:{state_id}"));
    }

    fn on_state_exited(&self, state_id: &str) {
        self.log.lock().unwrap().push(format!("exit:{state_id}"));
    }

    fn on_transition_followed(&self, source: Option<&str>, targets: &[&str]) {
        self.log.lock().unwrap().push(format!(
            "transition:{}->{}",
            source.unwrap_or("<root>"),
            targets.join(",")
        ));
    }

    fn on_send_event(&self, event: &str, target: &str, _event_type: &str, _id: &str, data: &str) {
        self.log
            .lock()
            .unwrap()
            .push(format!("send:{event}@{target}:{data}"));
    }
}

/// The ids of the currently active states, sorted for stable assertions.
pub fn active_ids(machine: &StateMachine) -> Vec<String> {
    let model = machine.model();
    let mut ids: Vec<String> = machine
        .runtime()
        .active_states()
        .iter()
        .map(|&sid| model.state(sid).id().to_string())
        .collect();
    ids.sort();
    ids
}

pub fn assert_active(machine: &StateMachine, expected: &[&str]) {
    let mut expected: Vec<String> = expected.iter().map(|s| s.to_string()).collect();
    expected.sort();
    assert_eq!(active_ids(machine), expected);
}

pub fn light(machine: &StateMachine) -> String {
    machine
        .extract_from_datamodel::<String>("state.light")
        .expect("state.light is defined")
}

pub fn cooking_duration(machine: &StateMachine) -> i64 {
    machine
        .extract_from_datamodel::<i64>("state.cooking_duration_sec")
        .expect("state.cooking_duration_sec is defined")
}
