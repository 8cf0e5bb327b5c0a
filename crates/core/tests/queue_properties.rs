//! Interleavings of queue mutations never lose an unacknowledged operation.

use std::collections::BTreeMap;

use proptest::prelude::*;
use serde_json::json;
use tallysync_core::{InMemoryOperationQueue, OperationQueue};
use tallysync_domain::{NewOperation, OperationId, OperationKind};

#[derive(Debug, Clone)]
enum Step {
    Enqueue(OperationKind),
    MarkSynced(usize),
    MarkFailed { target: usize, terminal: bool },
    Evict(usize),
    Requeue(usize),
}

fn kind() -> impl Strategy<Value = OperationKind> {
    prop_oneof![
        Just(OperationKind::VehicleTransaction),
        Just(OperationKind::ScrapTransaction),
        Just(OperationKind::Expense),
        Just(OperationKind::Payment),
    ]
}

fn step() -> impl Strategy<Value = Step> {
    prop_oneof![
        3 => kind().prop_map(Step::Enqueue),
        2 => any::<usize>().prop_map(Step::MarkSynced),
        2 => (any::<usize>(), any::<bool>())
            .prop_map(|(target, terminal)| Step::MarkFailed { target, terminal }),
        1 => any::<usize>().prop_map(Step::Evict),
        1 => any::<usize>().prop_map(Step::Requeue),
    ]
}

/// Expected contents: id -> terminal.
type Model = BTreeMap<OperationId, bool>;

fn pick(model: &Model, index: usize) -> Option<OperationId> {
    if model.is_empty() {
        return None;
    }
    model.keys().nth(index % model.len()).copied()
}

async fn run(steps: Vec<Step>) -> Result<(), TestCaseError> {
    let queue = InMemoryOperationQueue::new();
    let mut model = Model::new();
    let mut last_id = 0;

    for step in steps {
        match step {
            Step::Enqueue(kind) => {
                let id = queue.enqueue(NewOperation::new(kind, json!({"amount": 1}))).await.unwrap();
                prop_assert!(id.get() > last_id, "ids must strictly increase");
                last_id = id.get();
                model.insert(id, false);
            }
            Step::MarkSynced(index) => {
                if let Some(id) = pick(&model, index) {
                    queue.mark_synced(id).await.unwrap();
                    model.remove(&id);
                }
            }
            Step::MarkFailed { target, terminal } => {
                if let Some(id) = pick(&model, target) {
                    // dead-lettering is sticky until requeue
                    let expected = model[&id] || terminal;
                    let updated = queue.mark_failed(id, "boom", terminal).await.unwrap();
                    prop_assert_eq!(updated.terminal, expected);
                    model.insert(id, expected);
                }
            }
            Step::Evict(index) => {
                if let Some(id) = pick(&model, index) {
                    let result = queue.evict(id).await;
                    if model[&id] {
                        prop_assert!(result.is_ok());
                        model.remove(&id);
                    } else {
                        prop_assert!(result.is_err(), "live operations cannot be evicted");
                    }
                }
            }
            Step::Requeue(index) => {
                if let Some(id) = pick(&model, index) {
                    let result = queue.requeue(id).await;
                    if model[&id] {
                        let op = result.unwrap();
                        prop_assert!(!op.terminal);
                        prop_assert_eq!(op.attempt_count, 0);
                        model.insert(id, false);
                    } else {
                        prop_assert!(result.is_err());
                    }
                }
            }
        }
    }

    let remaining: Vec<OperationId> =
        queue.peek_batch(usize::MAX).await.unwrap().iter().map(|op| op.id).collect();
    let expected: Vec<OperationId> = model.keys().copied().collect();
    prop_assert_eq!(remaining, expected);

    let live = model.values().filter(|terminal| !**terminal).count();
    prop_assert_eq!(queue.pending_count().await.unwrap(), live);
    prop_assert_eq!(queue.dead_letters().await.unwrap().len(), model.len() - live);
    Ok(())
}

proptest! {
    #[test]
    fn unacknowledged_operations_are_never_lost(steps in prop::collection::vec(step(), 1..64)) {
        let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
        runtime.block_on(run(steps))?;
    }
}
