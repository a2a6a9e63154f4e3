//! Reference cleaning and dependency ordering over a scenario graph.

use std::collections::{HashMap, HashSet, VecDeque};

use log::{debug, warn};

use crate::model::Scenario;

/// Canonical form of a node or data-source reference.
///
/// Strips `#//`, `#/` and `#` markers and numeric segment indexes (`0/`) until
/// nothing changes, so applying it twice gives the same result as once.
pub fn clean_ref(reference: &str) -> String {
    let mut current = reference.trim();
    loop {
        let before = current;
        for marker in ["#//", "#/", "#"] {
            if let Some(rest) = current.strip_prefix(marker) {
                current = rest;
                break;
            }
        }
        current = strip_segment_index(current);
        current = current.trim_start();
        if current == before {
            return current.to_string();
        }
    }
}

fn strip_segment_index(text: &str) -> &str {
    let digits = text.bytes().take_while(|b| b.is_ascii_digit()).count();
    if digits > 0 && text.as_bytes().get(digits) == Some(&b'/') {
        &text[digits + 1..]
    } else {
        text
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SortedGraph {
    /// Data-source and node ids, dependencies first.
    pub order: Vec<String>,
    /// Ids that could not be ordered because of a cycle, in declaration order.
    pub cyclic: Vec<String>,
}

impl SortedGraph {
    pub fn has_cycle(&self) -> bool {
        !self.cyclic.is_empty()
    }
}

/// Kahn's algorithm over data sources and nodes.
///
/// Ties are broken by declaration order (data sources first, then nodes).
/// Vertices left over by a cycle are appended in declaration order.
pub fn topological_sort(scenario: &Scenario) -> SortedGraph {
    let mut ids: Vec<&str> = Vec::with_capacity(scenario.data_sources.len() + scenario.nodes.len());
    for ds in &scenario.data_sources {
        ids.push(ds.id.as_str());
    }
    for node in &scenario.nodes {
        if !ids.contains(&node.id.as_str()) {
            ids.push(node.id.as_str());
        }
    }
    let position: HashMap<&str, usize> = ids.iter().enumerate().map(|(i, id)| (*id, i)).collect();

    let mut in_degree: Vec<usize> = vec![0; ids.len()];
    let mut forward: Vec<Vec<usize>> = vec![Vec::new(); ids.len()];
    for node in &scenario.nodes {
        let target = match position.get(node.id.as_str()) {
            Some(&i) => i,
            None => continue,
        };
        let mut seen = HashSet::new();
        for input in &node.inputs {
            let cleaned = clean_ref(input);
            match position.get(cleaned.as_str()) {
                Some(&source) if source != target && seen.insert(source) => {
                    forward[source].push(target);
                    in_degree[target] += 1;
                }
                Some(_) => {}
                None => debug!("Input {} of node {} does not resolve", input, node.id),
            }
        }
    }
    for dependents in forward.iter_mut() {
        dependents.sort_unstable();
    }

    let mut queue: VecDeque<usize> = (0..ids.len()).filter(|&i| in_degree[i] == 0).collect();
    let mut visited = vec![false; ids.len()];
    let mut order = Vec::with_capacity(ids.len());

    while let Some(current) = queue.pop_front() {
        visited[current] = true;
        order.push(ids[current].to_string());
        for &dependent in &forward[current] {
            in_degree[dependent] -= 1;
            if in_degree[dependent] == 0 {
                queue.push_back(dependent);
            }
        }
    }

    let cyclic: Vec<String> = (0..ids.len())
        .filter(|&i| !visited[i])
        .map(|i| ids[i].to_string())
        .collect();
    if !cyclic.is_empty() {
        warn!("Circular dependency detected involving: {}", cyclic.join(", "));
        order.extend(cyclic.iter().cloned());
    }

    SortedGraph { order, cyclic }
}

/// The node whose output the view exposes.
pub fn find_terminal_node(scenario: &Scenario, order: &[String]) -> Option<String> {
    if order.is_empty() {
        return None;
    }
    if let Some(base) = scenario
        .logical_model
        .as_ref()
        .and_then(|m| m.base_node_id.as_deref())
        .map(clean_ref)
        .filter(|b| !b.is_empty())
    {
        return Some(base);
    }

    let referenced: HashSet<String> = scenario
        .nodes
        .iter()
        .flat_map(|n| n.inputs.iter().map(|i| clean_ref(i)))
        .collect();
    order
        .iter()
        .rev()
        .find(|id| scenario.node(id).is_some() && !referenced.contains(id.as_str()))
        .or_else(|| order.last())
        .cloned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{DataSource, LogicalModel, Node, NodeKind, SourceType};

    #[test]
    fn test_clean_ref_forms() {
        assert_eq!(clean_ref("#/0/prj_visits"), "prj_visits");
        assert_eq!(clean_ref("#//prj_visits"), "prj_visits");
        assert_eq!(clean_ref("#prj_visits"), "prj_visits");
        assert_eq!(clean_ref("  prj_visits "), "prj_visits");
        assert_eq!(clean_ref("#/12/#/3/Join_1"), "Join_1");
        assert_eq!(clean_ref("2024_sales"), "2024_sales");
    }

    #[test]
    fn test_clean_ref_idempotent() {
        for input in ["#/0/a", "#//b", "#c", "#/#//1/d", "0/e", "f", "", "#"] {
            let once = clean_ref(input);
            assert_eq!(clean_ref(&once), once, "input {input}");
        }
    }

    fn chain() -> Scenario {
        let mut scenario = Scenario::new("CV");
        scenario.add_data_source(DataSource::new("T", SourceType::Table, "S", "T"));
        scenario
            .add_node(Node::new("Agg", NodeKind::aggregation()).with_input("#/0/Proj"))
            .unwrap();
        scenario
            .add_node(Node::new("Proj", NodeKind::Projection).with_input("#T"))
            .unwrap();
        scenario
    }

    #[test]
    fn test_dependencies_come_first() {
        let sorted = topological_sort(&chain());
        assert_eq!(sorted.order, vec!["T", "Proj", "Agg"]);
        assert!(!sorted.has_cycle());
    }

    #[test]
    fn test_cycle_remainder_appended() {
        let mut scenario = chain();
        scenario
            .add_node(Node::new("A", NodeKind::Projection).with_input("B"))
            .unwrap();
        scenario
            .add_node(Node::new("B", NodeKind::Projection).with_input("A"))
            .unwrap();
        let sorted = topological_sort(&scenario);
        assert_eq!(sorted.cyclic, vec!["A", "B"]);
        assert_eq!(sorted.order, vec!["T", "Proj", "Agg", "A", "B"]);
    }

    #[test]
    fn test_terminal_prefers_logical_model() {
        let mut scenario = chain();
        let sorted = topological_sort(&scenario);
        assert_eq!(find_terminal_node(&scenario, &sorted.order).as_deref(), Some("Agg"));

        scenario.logical_model = Some(LogicalModel {
            base_node_id: Some("#Proj".to_string()),
            ..Default::default()
        });
        assert_eq!(find_terminal_node(&scenario, &sorted.order).as_deref(), Some("Proj"));
        assert_eq!(find_terminal_node(&scenario, &[]), None);
    }

    #[test]
    fn test_terminal_falls_back_to_last_entry() {
        let mut scenario = Scenario::new("CV");
        scenario.add_data_source(DataSource::new("T", SourceType::Table, "S", "T"));
        let sorted = topological_sort(&scenario);
        assert_eq!(find_terminal_node(&scenario, &sorted.order).as_deref(), Some("T"));
    }
}
