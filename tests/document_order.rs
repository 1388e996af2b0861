//! Property tests for the document-order comparison: it must be a strict
//! total order that agrees with the pre-order walk of the chart tree.

use proptest::prelude::*;
use serde_json::json;
use statechart::model::{Model, StateId};
use statechart::ChartDoc;

/// An anonymous tree shape; ids are assigned in pre-order when the shape is
/// turned into a chart document.
#[derive(Debug, Clone)]
struct Shape(Vec<Shape>);

fn shape_strategy() -> impl Strategy<Value = Shape> {
    let leaf = Just(Shape(vec![]));
    leaf.prop_recursive(4, 24, 4, |inner| {
        prop::collection::vec(inner, 0..4).prop_map(Shape)
    })
}

fn to_state_doc(shape: &Shape, counter: &mut usize) -> serde_json::Value {
    let id = format!("s{}", *counter);
    *counter += 1;
    let children: Vec<serde_json::Value> = shape
        .0
        .iter()
        .map(|child| to_state_doc(child, counter))
        .collect();
    json!({"state": {"id": id, "states": children}})
}

fn build_model(tops: &[Shape]) -> Model {
    let mut counter = 0;
    let states: Vec<serde_json::Value> = tops
        .iter()
        .map(|shape| to_state_doc(shape, &mut counter))
        .collect();
    let doc: ChartDoc =
        serde_json::from_value(json!({"name": "generated", "states": states})).unwrap();
    doc.compile().unwrap()
}

fn preorder_walk(model: &Model) -> Vec<StateId> {
    fn visit(model: &Model, sid: StateId, out: &mut Vec<StateId>) {
        out.push(sid);
        for &child in model.state(sid).children() {
            visit(model, child, out);
        }
    }
    let mut out = Vec::new();
    for &top in model.top_level_states() {
        visit(model, top, &mut out);
    }
    out
}

proptest! {
    #[test]
    fn document_order_is_a_strict_total_order_agreeing_with_preorder(
        tops in prop::collection::vec(shape_strategy(), 1..4)
    ) {
        let model = build_model(&tops);
        let walk = preorder_walk(&model);

        for (i, &a) in walk.iter().enumerate() {
            // Irreflexive.
            prop_assert!(!model.document_order_less(a, a));
            for &b in walk.iter().skip(i + 1) {
                // Total and antisymmetric, agreeing with the walk.
                prop_assert!(model.document_order_less(a, b));
                prop_assert!(!model.document_order_less(b, a));
            }
        }
    }

    #[test]
    fn sorting_recovers_the_preorder_walk(
        tops in prop::collection::vec(shape_strategy(), 1..4)
    ) {
        let model = build_model(&tops);
        let walk = preorder_walk(&model);

        let mut shuffled: Vec<StateId> = walk.iter().rev().copied().collect();
        model.sort_states_by_document_order(false, &mut shuffled);
        prop_assert_eq!(&shuffled, &walk);

        let mut reversed: Vec<StateId> = walk.clone();
        model.sort_states_by_document_order(true, &mut reversed);
        let expected: Vec<StateId> = walk.iter().rev().copied().collect();
        prop_assert_eq!(reversed, expected);
    }
}
