use std::collections::BTreeSet;

use dashmap::DashMap;
use tracing::debug;

use folio_core::types::{ContextTuple, ExecutionPlan};
use folio_core::PromptSchemaKey;

#[derive(Debug, Clone)]
struct CachedPlan {
    plan: ExecutionPlan,
    hits: u64,
}

/// Validated plans keyed by prompt schema key hash and requested operations.
///
/// Intents that differ only in parameter values share a key, so their plan
/// can be reused without calling the model. The schema key ignores the
/// operation allow-lists, so those are folded into the cache key: an intent
/// asking for `Order/[List]` never receives a plan made for `Order/[Retrieve]`.
#[derive(Debug, Default)]
pub struct PlanCache {
    plans: DashMap<String, CachedPlan>,
}

impl PlanCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, psk: &PromptSchemaKey, entities: &[ContextTuple]) -> Option<ExecutionPlan> {
        self.plans.get_mut(&cache_key(psk, entities)).map(|mut entry| {
            entry.hits += 1;
            debug!(psk = %psk, hits = entry.hits, "Plan cache hit");
            entry.plan.clone()
        })
    }

    pub fn insert(&self, psk: &PromptSchemaKey, entities: &[ContextTuple], plan: ExecutionPlan) {
        self.plans
            .insert(cache_key(psk, entities), CachedPlan { plan, hits: 0 });
    }

    pub fn len(&self) -> usize {
        self.plans.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plans.is_empty()
    }
}

/// `<psk hash>|Entity=op1,op2;Other=*` with entities and operation ids
/// sorted, operation ids lowercased, and `*` for an empty allow-list.
fn cache_key(psk: &PromptSchemaKey, entities: &[ContextTuple]) -> String {
    let mut scopes: BTreeSet<String> = BTreeSet::new();
    for tuple in entities {
        let ops: BTreeSet<String> = tuple
            .operations
            .iter()
            .map(|op| op.trim().to_lowercase())
            .filter(|op| !op.is_empty())
            .collect();
        let ops = if ops.is_empty() {
            "*".to_string()
        } else {
            ops.into_iter().collect::<Vec<_>>().join(",")
        };
        scopes.insert(format!("{}={}", tuple.entity, ops));
    }
    format!(
        "{}|{}",
        psk.hash,
        scopes.into_iter().collect::<Vec<_>>().join(";")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use folio_core::types::{Service, Step};

    fn plan(op: &str) -> ExecutionPlan {
        ExecutionPlan {
            steps: vec![Step {
                title: "call".into(),
                description: String::new(),
                services: vec![Service {
                    service_name: "orders".into(),
                    operations: vec![op.into()],
                }],
            }],
        }
    }

    fn order(ops: &[&str]) -> Vec<ContextTuple> {
        vec![ContextTuple::new(
            "Order",
            ops.iter().map(|op| op.to_string()).collect(),
        )]
    }

    #[test]
    fn test_hit_and_replacement() {
        let cache = PlanCache::new();
        let psk = PromptSchemaKey::derive("retrieve", &["Order"], &[], &[]);
        let entities = order(&["Retrieve"]);
        assert!(cache.get(&psk, &entities).is_none());

        cache.insert(&psk, &entities, plan("Retrieve"));
        assert_eq!(cache.get(&psk, &entities), Some(plan("Retrieve")));
        assert_eq!(cache.get(&psk, &entities), Some(plan("Retrieve")));

        cache.insert(&psk, &entities, plan("List"));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get(&psk, &entities), Some(plan("List")));
    }

    #[test]
    fn test_distinct_structures_do_not_collide() {
        let cache = PlanCache::new();
        let a = PromptSchemaKey::derive("list", &["Order"], &[], &["status", "region"]);
        let b = PromptSchemaKey::derive("list", &["Order"], &[], &["region", "status"]);
        cache.insert(&a, &order(&[]), plan("List"));
        assert!(cache.get(&b, &order(&[])).is_none());
    }

    #[test]
    fn test_requested_operations_are_part_of_the_key() {
        let cache = PlanCache::new();
        let psk = PromptSchemaKey::derive("retrieve", &["Order"], &[], &[]);
        cache.insert(&psk, &order(&["Retrieve"]), plan("Retrieve"));

        assert!(cache.get(&psk, &order(&["List"])).is_none());
        assert!(cache.get(&psk, &order(&[])).is_none());
        assert!(cache.get(&psk, &order(&["Retrieve", "List"])).is_none());

        // Allow-list order and case do not matter.
        cache.insert(&psk, &order(&["List", "Retrieve"]), plan("List"));
        assert_eq!(cache.get(&psk, &order(&["retrieve", "LIST"])), Some(plan("List")));
        assert_eq!(cache.len(), 2);
    }
}
