use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
};

use mercurio_core::qos::QoS;

/// A client subscribed to a filter that matched a published topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscriber {
    pub client_id: String,
    pub qos: QoS,
}

#[derive(Debug, Default)]
struct Node {
    /// clientId -> requested QoS for filters terminating at this node.
    subscribers: HashMap<String, QoS>,
    children: HashMap<String, Node>,
}

/// The subscription index: a trie over topic levels mapping filter to the
/// set of (clientId, requestedQos) pairs subscribed to it.
///
/// Corresponds to spec component 4.2. Readers (`matches`) may run
/// concurrently with writers; writers serialize among themselves via the
/// single `RwLock`.
#[derive(Debug, Clone)]
pub(crate) struct TopicTree {
    shared: Arc<RwLock<Node>>,
}

impl TopicTree {
    pub fn new() -> TopicTree {
        TopicTree {
            shared: Arc::new(RwLock::new(Node::default())),
        }
    }

    /// Idempotent w.r.t. (clientId, filter); updates QoS if already present.
    pub fn add(&self, client_id: &str, filter: &str, qos: QoS) {
        let mut root = self.shared.write().unwrap_or_else(|e| e.into_inner());
        let mut node = &mut *root;
        for level in filter.split('/') {
            node = node.children.entry(level.to_string()).or_default();
        }
        node.subscribers.insert(client_id.to_string(), qos);
    }

    /// No error if absent.
    pub fn remove(&self, client_id: &str, filter: &str) {
        let mut root = self.shared.write().unwrap_or_else(|e| e.into_inner());
        let mut node = &mut *root;
        for level in filter.split('/') {
            match node.children.get_mut(level) {
                Some(child) => node = child,
                None => return,
            }
        }
        node.subscribers.remove(client_id);
    }

    /// Remove every filter registered for `client_id`, e.g. on clean-session
    /// disconnect. Walks the whole tree; acceptable since subscription
    /// churn is far rarer than publishes.
    pub fn remove_client(&self, client_id: &str) {
        let mut root = self.shared.write().unwrap_or_else(|e| e.into_inner());
        fn walk(node: &mut Node, client_id: &str) {
            node.subscribers.remove(client_id);
            for child in node.children.values_mut() {
                walk(child, client_id);
            }
        }
        walk(&mut root, client_id);
    }

    /// Traverses the trie, branching into the `+` child at every level and
    /// into the `#` child (which terminates a branch and yields its
    /// subscribers) at every level reached. Each client appears at most
    /// once in the result; if a client's subscriptions across distinct
    /// matching filters request different QoS, the highest requested QoS
    /// wins (see DESIGN.md).
    pub fn matches(&self, topic: &str) -> Vec<Subscriber> {
        let root = self.shared.read().unwrap_or_else(|e| e.into_inner());
        let levels: Vec<&str> = topic.split('/').collect();

        let mut found: HashMap<String, QoS> = HashMap::new();
        collect(&root, &levels, 0, &mut found);

        found
            .into_iter()
            .map(|(client_id, qos)| Subscriber { client_id, qos })
            .collect()
    }
}

fn collect(node: &Node, levels: &[&str], depth: usize, found: &mut HashMap<String, QoS>) {
    if let Some(hash) = node.children.get("#") {
        merge(found, hash);
    }

    if depth == levels.len() {
        merge(found, node);
        return;
    }

    let level = levels[depth];

    if let Some(child) = node.children.get(level) {
        collect(child, levels, depth + 1, found);
    }

    if level != "#" {
        if let Some(plus) = node.children.get("+") {
            collect(plus, levels, depth + 1, found);
        }
    }
}

fn merge(found: &mut HashMap<String, QoS>, node: &Node) {
    for (client_id, qos) in &node.subscribers {
        found
            .entry(client_id.clone())
            .and_modify(|existing| {
                if *qos > *existing {
                    *existing = *qos;
                }
            })
            .or_insert(*qos);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(subs: &[Subscriber]) -> Vec<&str> {
        let mut v: Vec<&str> = subs.iter().map(|s| s.client_id.as_str()).collect();
        v.sort_unstable();
        v
    }

    #[test]
    fn exact_match() {
        let tree = TopicTree::new();
        tree.add("c1", "a/b/c", QoS::AtMostOnce);
        assert_eq!(names(&tree.matches("a/b/c")), vec!["c1"]);
        assert!(tree.matches("a/b/d").is_empty());
    }

    #[test]
    fn single_level_wildcard() {
        let tree = TopicTree::new();
        tree.add("c1", "sport/tennis/+", QoS::AtMostOnce);
        assert_eq!(names(&tree.matches("sport/tennis/player1")), vec!["c1"]);
        assert!(tree.matches("sport/tennis/player1/ranking").is_empty());
    }

    #[test]
    fn multi_level_wildcard() {
        let tree = TopicTree::new();
        tree.add("c1", "sport/#", QoS::AtMostOnce);
        assert_eq!(names(&tree.matches("sport")), vec!["c1"]);
        assert_eq!(names(&tree.matches("sport/tennis/player1")), vec!["c1"]);
    }

    #[test]
    fn add_is_idempotent_and_updates_qos() {
        let tree = TopicTree::new();
        tree.add("c1", "x", QoS::AtMostOnce);
        tree.add("c1", "x", QoS::ExactlyOnce);

        let subs = tree.matches("x");
        assert_eq!(subs.len(), 1);
        assert_eq!(subs[0].qos, QoS::ExactlyOnce);
    }

    #[test]
    fn remove_absent_does_not_error() {
        let tree = TopicTree::new();
        tree.remove("c1", "no/such/filter");
    }

    #[test]
    fn same_client_counted_once_across_matching_filters() {
        let tree = TopicTree::new();
        tree.add("c1", "a/+", QoS::AtMostOnce);
        tree.add("c1", "a/b", QoS::ExactlyOnce);

        let subs = tree.matches("a/b");
        assert_eq!(subs.len(), 1);
        assert_eq!(subs[0].qos, QoS::ExactlyOnce);
    }

    #[test]
    fn remove_client_clears_all_filters() {
        let tree = TopicTree::new();
        tree.add("c1", "a/b", QoS::AtMostOnce);
        tree.add("c1", "c/d", QoS::AtMostOnce);
        tree.remove_client("c1");
        assert!(tree.matches("a/b").is_empty());
        assert!(tree.matches("c/d").is_empty());
    }
}
