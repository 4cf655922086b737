//! Foreign key dependency ordering between tables.

use crate::schema::Table;
use std::collections::HashMap;

/// Table metadata for dependency ordering
#[derive(Debug, Clone)]
pub struct TableInfo {
    pub name: String,
    /// Tables this table references
    pub dependencies: Vec<String>,
}

impl From<&Table> for TableInfo {
    fn from(table: &Table) -> Self {
        Self {
            name: table.name.clone(),
            dependencies: table.dependencies(),
        }
    }
}

/// Result of [`topological_sort`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ordering {
    /// Referenced tables first, dependents last
    pub sorted: Vec<String>,
    /// Tables caught in a reference cycle, in input order
    pub cyclic: Vec<String>,
}

impl Ordering {
    pub fn has_cycle(&self) -> bool {
        !self.cyclic.is_empty()
    }

    /// Every table: the sorted ones, then the cyclic ones.
    pub fn into_names(self) -> Vec<String> {
        let mut names = self.sorted;
        names.extend(self.cyclic);
        names
    }
}

/// Topologically sort tables by their dependencies (Kahn's algorithm).
///
/// Dependencies naming tables outside `tables` are ignored. Among tables
/// that are ready at the same time, the one listed first in `tables` goes
/// first, so the result depends only on the input order.
pub fn topological_sort(tables: &[TableInfo]) -> Ordering {
    let position: HashMap<&str, usize> = tables
        .iter()
        .enumerate()
        .map(|(i, t)| (t.name.as_str(), i))
        .collect();

    let mut in_degree = vec![0usize; tables.len()];
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); tables.len()];
    for (i, table) in tables.iter().enumerate() {
        let mut seen = Vec::new();
        for dep in &table.dependencies {
            if let Some(&j) = position.get(dep.as_str()) {
                if j != i && !seen.contains(&j) {
                    seen.push(j);
                    in_degree[i] += 1;
                    dependents[j].push(i);
                }
            }
        }
    }

    let mut ready: Vec<usize> = (0..tables.len()).filter(|&i| in_degree[i] == 0).collect();
    let mut done = vec![false; tables.len()];
    let mut sorted = Vec::with_capacity(tables.len());

    while !ready.is_empty() {
        // Lowest declaration index first
        ready.sort_unstable_by(|a, b| b.cmp(a));
        let Some(current) = ready.pop() else { break };
        done[current] = true;
        sorted.push(tables[current].name.clone());
        for &dependent in &dependents[current] {
            in_degree[dependent] -= 1;
            if in_degree[dependent] == 0 {
                ready.push(dependent);
            }
        }
    }

    let cyclic = tables
        .iter()
        .enumerate()
        .filter(|(i, _)| !done[*i])
        .map(|(_, t)| t.name.clone())
        .collect();

    Ordering { sorted, cyclic }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(name: &str, deps: &[&str]) -> TableInfo {
        TableInfo {
            name: name.to_string(),
            dependencies: deps.iter().map(|d| d.to_string()).collect(),
        }
    }

    #[test]
    fn test_simple_dependency() {
        let tables = vec![info("book", &["author"]), info("author", &[])];
        let order = topological_sort(&tables);
        assert_eq!(order.sorted, vec!["author", "book"]);
        assert!(!order.has_cycle());
    }

    #[test]
    fn test_ties_follow_input_order() {
        let tables = vec![
            info("zeta", &[]),
            info("review", &["book", "reader"]),
            info("alpha", &[]),
            info("book", &["zeta"]),
            info("reader", &[]),
        ];
        let order = topological_sort(&tables);
        assert_eq!(order.sorted, vec!["zeta", "alpha", "book", "reader", "review"]);
    }

    #[test]
    fn test_external_and_self_dependencies_ignored() {
        let tables = vec![info("employee", &["employee", "company"])];
        assert_eq!(topological_sort(&tables).sorted, vec!["employee"]);
    }

    #[test]
    fn test_cycle_reported() {
        let tables = vec![
            info("a", &["b"]),
            info("b", &["a"]),
            info("c", &[]),
            info("d", &["a"]),
        ];
        let order = topological_sort(&tables);
        assert_eq!(order.sorted, vec!["c"]);
        assert_eq!(order.cyclic, vec!["a", "b", "d"]);
        assert_eq!(order.into_names(), vec!["c", "a", "b", "d"]);
    }
}
