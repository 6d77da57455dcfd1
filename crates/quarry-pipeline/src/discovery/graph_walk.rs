//! Foreign-key distance scoring.
//!
//! Builds an undirected adjacency over the input tables, seeds it with the
//! tables the query names, and walks breadth-first to [`MAX_DEPTH`].
//!
//! | Distance | Score |
//! |----------|-------|
//! | 0 (seed) | 1.0   |
//! | 1        | 0.5   |
//! | 2        | 0.25  |

use std::collections::{HashMap, HashSet, VecDeque};

use quarry_types::Table;

pub const MAX_DEPTH: usize = 2;

/// Undirected FK adjacency. Targets outside `tables` get no node.
pub fn build_graph(tables: &[Table]) -> HashMap<&str, HashSet<&str>> {
    let mut graph: HashMap<&str, HashSet<&str>> = tables
        .iter()
        .map(|t| (t.name.as_str(), HashSet::new()))
        .collect();

    for table in tables {
        for target in table.referenced_tables() {
            if target == table.name || !graph.contains_key(target) {
                continue;
            }
            if let Some(edges) = graph.get_mut(table.name.as_str()) {
                edges.insert(target);
            }
            if let Some(edges) = graph.get_mut(target) {
                edges.insert(table.name.as_str());
            }
        }
    }
    graph
}

/// Tables with a name part (split on non-alphanumerics, longer than two
/// characters) appearing verbatim in the lowercased query. A plural part also
/// matches through its singular form, so `customers` is seeded by "customer".
pub fn find_seeds<'a>(tables: &'a [Table], query: &str) -> Vec<&'a str> {
    let query = query.to_lowercase();
    tables
        .iter()
        .filter(|t| {
            t.name
                .to_lowercase()
                .split(|c: char| !c.is_alphanumeric())
                .filter(|part| part.len() > 2)
                .any(|part| part_forms(part).iter().any(|f| query.contains(f.as_str())))
        })
        .map(|t| t.name.as_str())
        .collect()
}

fn part_forms(part: &str) -> Vec<String> {
    let mut forms = vec![part.to_string()];
    if let Some(stem) = part.strip_suffix("ies") {
        forms.push(format!("{stem}y"));
    } else if let Some(stem) = part.strip_suffix('s') {
        if !stem.ends_with('s') {
            forms.push(stem.to_string());
        }
    }
    forms.retain(|f| f.len() > 2);
    forms
}

/// Multi-source BFS. Each table keeps the best score over all seeds.
pub fn score(tables: &[Table], query: &str) -> HashMap<String, f64> {
    let graph = build_graph(tables);
    let seeds = find_seeds(tables, query);
    tracing::debug!(?seeds, "FK graph seeds");

    let mut scores: HashMap<String, f64> = HashMap::new();
    for seed in seeds {
        let mut visited: HashSet<&str> = HashSet::from([seed]);
        let mut queue: VecDeque<(&str, usize)> = VecDeque::from([(seed, 0)]);

        while let Some((node, depth)) = queue.pop_front() {
            let s = 1.0 / f64::from(1u32 << depth);
            let entry = scores.entry(node.to_string()).or_insert(0.0);
            if s > *entry {
                *entry = s;
            }
            if depth == MAX_DEPTH {
                continue;
            }
            if let Some(neighbors) = graph.get(node) {
                for &next in neighbors {
                    if visited.insert(next) {
                        queue.push_back((next, depth + 1));
                    }
                }
            }
        }
    }
    scores
}

#[cfg(test)]
mod tests {
    use super::*;
    use quarry_types::Column;

    fn shop() -> Vec<Table> {
        vec![
            Table::new("customers", "main").with_column(Column::new("id", "INTEGER").primary_key()),
            Table::new("orders", "main")
                .with_column(Column::new("id", "INTEGER").primary_key())
                .with_column(Column::new("customer_id", "INTEGER").references("customers", "id")),
            Table::new("products", "main").with_column(Column::new("id", "INTEGER").primary_key()),
        ]
    }

    #[test]
    fn total_sales_by_customer() {
        let scores = score(&shop(), "show total sales by customer");
        assert_eq!(scores.get("customers"), Some(&1.0));
        assert_eq!(scores.get("orders"), Some(&0.5));
        assert!(!scores.contains_key("products"));
    }

    #[test]
    fn depth_is_capped_at_two() {
        let tables = vec![
            Table::new("alpha", "main"),
            Table::new("beta", "main").with_column(Column::new("a", "INT").references("alpha", "id")),
            Table::new("gamma", "main").with_column(Column::new("b", "INT").references("beta", "id")),
            Table::new("delta", "main").with_column(Column::new("g", "INT").references("gamma", "id")),
        ];
        let scores = score(&tables, "alpha");
        assert_eq!(scores.get("alpha"), Some(&1.0));
        assert_eq!(scores.get("beta"), Some(&0.5));
        assert_eq!(scores.get("gamma"), Some(&0.25));
        assert!(!scores.contains_key("delta"));
    }

    #[test]
    fn closest_seed_wins() {
        let tables = vec![
            Table::new("alpha", "main"),
            Table::new("beta", "main").with_column(Column::new("a", "INT").references("alpha", "id")),
            Table::new("gamma", "main").with_column(Column::new("b", "INT").references("beta", "id")),
        ];
        // gamma is a seed itself and two hops from alpha.
        let scores = score(&tables, "alpha and gamma");
        assert_eq!(scores.get("gamma"), Some(&1.0));
        assert_eq!(scores.get("beta"), Some(&0.5));
    }

    #[test]
    fn unknown_fk_targets_never_appear() {
        let tables = vec![Table::new("orders", "main")
            .with_column(Column::new("warehouse_id", "INT").references("warehouses", "id"))];
        let scores = score(&tables, "orders per warehouses");
        assert_eq!(scores.len(), 1);
        assert!(!scores.contains_key("warehouses"));
    }

    #[test]
    fn plural_table_names_match_singular_mentions() {
        let tables = vec![Table::new("categories", "main"), Table::new("address", "main")];
        assert_eq!(find_seeds(&tables, "sales per category"), vec!["categories"]);
        // "address" must not shrink to "addres".
        assert!(find_seeds(&tables, "addres").is_empty());
    }

    #[test]
    fn short_name_parts_are_not_seeds() {
        let tables = vec![Table::new("tx_log", "main")];
        assert!(find_seeds(&tables, "show tx").is_empty());
        assert_eq!(find_seeds(&tables, "recent log entries"), vec!["tx_log"]);
    }
}
