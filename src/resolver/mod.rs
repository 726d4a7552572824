//! Dependency resolution
//!
//! Computes the run list for a set of desired jobs:
//! 1. Collect the closure of the desired jobs over `depends` and `requires`
//!    edges, recording edges to unknown jobs
//! 2. Detect cycles (DFS with an explicit recursion stack); every member of a
//!    cycle is excluded
//! 3. Exclude every job that (transitively) needs an excluded job
//! 4. Order the remainder with Kahn's algorithm, breaking ties by catalog
//!    position so the same catalog always yields the same run list
//!
//! Resolution is pure and never fails as a whole. Problems are reported for
//! the jobs they concern and the rest of the closure is still ordered.

use std::cmp::Reverse;
use std::collections::{BTreeSet, BinaryHeap, HashMap};

use certlane_model::JobDefinition;
use tracing::debug;

use crate::problem::{EdgeKind, Problem};

/// Outcome of a resolver pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Resolution {
    /// Job names, dependencies first.
    pub run_list: Vec<String>,
    pub problems: Vec<Problem>,
}

/// Resolve `desired` against `jobs`. Catalog order is the order of `jobs`.
pub fn resolve(jobs: &[JobDefinition], desired: &[String]) -> Resolution {
    let graph = Graph::new(jobs);
    let mut problems = Vec::new();

    let mut roots = Vec::new();
    for name in desired {
        match graph.index.get(name.as_str()) {
            Some(&idx) => {
                if !roots.contains(&idx) {
                    roots.push(idx);
                }
            }
            None => problems.push(Problem::UnknownDesiredJob { name: name.clone() }),
        }
    }

    let closure = graph.closure(&roots);
    let mut excluded: BTreeSet<usize> = BTreeSet::new();

    for &idx in &closure {
        for (missing, kind) in &graph.missing[idx] {
            problems.push(Problem::UnknownJob {
                job: jobs[idx].name().to_string(),
                missing: missing.clone(),
                kind: *kind,
            });
            excluded.insert(idx);
        }
    }

    for cycle in graph.cycles(&closure) {
        excluded.extend(cycle.iter().copied());
        let mut names: Vec<String> = cycle.iter().map(|&i| jobs[i].name().to_string()).collect();
        names.push(jobs[cycle[0]].name().to_string());
        problems.push(Problem::DependencyCycle { cycle: names });
    }

    // Exclusion spreads to dependents until nothing changes.
    loop {
        let mut changed = false;
        for &idx in &closure {
            if excluded.contains(&idx) {
                continue;
            }
            if let Some(&dep) = graph.edges[idx].iter().find(|d| excluded.contains(d)) {
                problems.push(Problem::DependencyExcluded {
                    job: jobs[idx].name().to_string(),
                    dependency: jobs[dep].name().to_string(),
                });
                excluded.insert(idx);
                changed = true;
            }
        }
        if !changed {
            break;
        }
    }

    let remaining: Vec<usize> = closure
        .iter()
        .copied()
        .filter(|idx| !excluded.contains(idx))
        .collect();
    let order = graph.kahn(&remaining);

    debug!(
        desired = desired.len(),
        closure = closure.len(),
        run_list = order.len(),
        problems = problems.len(),
        "resolved run list"
    );

    Resolution {
        run_list: order.into_iter().map(|i| jobs[i].name().to_string()).collect(),
        problems,
    }
}

/// Index-based view of the catalog. Edges point from a job to the jobs it
/// needs; edges to unknown names are kept apart in `missing`.
struct Graph {
    index: HashMap<String, usize>,
    edges: Vec<Vec<usize>>,
    missing: Vec<Vec<(String, EdgeKind)>>,
}

impl Graph {
    fn new(jobs: &[JobDefinition]) -> Self {
        let mut index = HashMap::with_capacity(jobs.len());
        for (i, job) in jobs.iter().enumerate() {
            index.entry(job.name().to_string()).or_insert(i);
        }

        let mut edges = Vec::with_capacity(jobs.len());
        let mut missing = Vec::with_capacity(jobs.len());
        for job in jobs {
            let mut out = Vec::new();
            let mut unknown = Vec::new();
            let requires = job.resource_names();
            let named = job
                .depends()
                .iter()
                .map(|n| (n, EdgeKind::Depends))
                .chain(requires.iter().map(|n| (n, EdgeKind::Requires)));
            for (name, kind) in named {
                match index.get(name.as_str()) {
                    Some(&target) => {
                        if !out.contains(&target) {
                            out.push(target);
                        }
                    }
                    None => {
                        let entry = (name.clone(), kind);
                        if !unknown.contains(&entry) {
                            unknown.push(entry);
                        }
                    }
                }
            }
            edges.push(out);
            missing.push(unknown);
        }

        Self {
            index,
            edges,
            missing,
        }
    }

    /// Every job reachable from `roots`, in catalog order.
    fn closure(&self, roots: &[usize]) -> BTreeSet<usize> {
        let mut seen = BTreeSet::new();
        let mut stack: Vec<usize> = roots.to_vec();
        while let Some(idx) = stack.pop() {
            if seen.insert(idx) {
                stack.extend(self.edges[idx].iter().copied());
            }
        }
        seen
    }

    /// Elementary cycles found by a depth-first walk of `nodes`, each listed
    /// from the first member reached.
    fn cycles(&self, nodes: &BTreeSet<usize>) -> Vec<Vec<usize>> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            White,
            Gray,
            Black,
        }

        let mut marks = vec![Mark::White; self.edges.len()];
        let mut found = Vec::new();

        for &start in nodes {
            if marks[start] != Mark::White {
                continue;
            }
            // (node, next edge to follow)
            let mut stack: Vec<(usize, usize)> = vec![(start, 0)];
            marks[start] = Mark::Gray;
            while let Some(frame) = stack.last_mut() {
                let (node, next) = *frame;
                frame.1 += 1;
                if let Some(&target) = self.edges[node].get(next) {
                    match marks[target] {
                        Mark::White => {
                            marks[target] = Mark::Gray;
                            stack.push((target, 0));
                        }
                        Mark::Gray => {
                            let from = stack
                                .iter()
                                .position(|&(n, _)| n == target)
                                .unwrap_or(0);
                            found.push(stack[from..].iter().map(|&(n, _)| n).collect());
                        }
                        Mark::Black => {}
                    }
                } else {
                    marks[node] = Mark::Black;
                    stack.pop();
                }
            }
        }
        found
    }

    /// Topological order of `nodes`, dependencies first. `nodes` must be
    /// closed under `edges` and acyclic.
    fn kahn(&self, nodes: &[usize]) -> Vec<usize> {
        let mut pending: HashMap<usize, usize> = HashMap::with_capacity(nodes.len());
        let mut dependents: HashMap<usize, Vec<usize>> = HashMap::new();
        for &idx in nodes {
            pending.insert(idx, self.edges[idx].len());
            for &dep in &self.edges[idx] {
                dependents.entry(dep).or_default().push(idx);
            }
        }

        let mut ready: BinaryHeap<Reverse<usize>> = pending
            .iter()
            .filter(|&(_, &count)| count == 0)
            .map(|(&idx, _)| Reverse(idx))
            .collect();
        let mut order = Vec::with_capacity(nodes.len());

        while let Some(Reverse(idx)) = ready.pop() {
            order.push(idx);
            for &dependent in dependents.get(&idx).map(Vec::as_slice).unwrap_or(&[]) {
                if let Some(count) = pending.get_mut(&dependent) {
                    *count -= 1;
                    if *count == 0 {
                        ready.push(Reverse(dependent));
                    }
                }
            }
        }
        order
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use certlane_model::Plugin;

    fn job(name: &str, depends: &[&str]) -> JobDefinition {
        JobDefinition::builder(name)
            .command("true")
            .depends(depends.iter().copied())
            .build()
            .unwrap()
    }

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn position(run_list: &[String], name: &str) -> usize {
        run_list.iter().position(|n| n == name).unwrap()
    }

    #[test]
    fn test_dependencies_come_first() {
        let jobs = vec![
            job("report", &["disk", "cpu"]),
            job("disk", &["probe"]),
            job("cpu", &["probe"]),
            job("probe", &[]),
        ];
        let res = resolve(&jobs, &names(&["report"]));
        assert!(res.problems.is_empty());
        assert_eq!(res.run_list, names(&["probe", "disk", "cpu", "report"]));

        for job in &jobs {
            for dep in job.depends() {
                assert!(position(&res.run_list, dep) < position(&res.run_list, job.name()));
            }
        }
    }

    #[test]
    fn test_catalog_order_breaks_ties() {
        let jobs = vec![job("c", &[]), job("a", &[]), job("b", &[])];
        let res = resolve(&jobs, &names(&["b", "a", "c"]));
        assert_eq!(res.run_list, names(&["c", "a", "b"]));
    }

    #[test]
    fn test_requires_adds_edge() {
        let jobs = vec![
            JobDefinition::builder("usb/storage")
                .command("true")
                .requires("device.category == 'USB'")
                .build()
                .unwrap(),
            JobDefinition::builder("device")
                .plugin(Plugin::Resource)
                .command("true")
                .build()
                .unwrap(),
        ];
        let res = resolve(&jobs, &names(&["usb/storage"]));
        assert_eq!(res.run_list, names(&["device", "usb/storage"]));
    }

    #[test]
    fn test_only_closure_is_scheduled() {
        let jobs = vec![job("a", &[]), job("b", &["a"]), job("c", &[])];
        let res = resolve(&jobs, &names(&["b"]));
        assert_eq!(res.run_list, names(&["a", "b"]));
    }

    #[test]
    fn test_cycle_excludes_members_and_dependents() {
        let jobs = vec![
            job("a", &["b"]),
            job("b", &["a"]),
            job("c", &["a"]),
            job("d", &[]),
        ];
        let res = resolve(&jobs, &names(&["a", "b", "c", "d"]));
        assert_eq!(res.run_list, names(&["d"]));
        assert!(res
            .problems
            .iter()
            .any(|p| matches!(p, Problem::DependencyCycle { cycle } if cycle.len() == 3)));
        assert!(res.problems.contains(&Problem::DependencyExcluded {
            job: "c".into(),
            dependency: "a".into(),
        }));
    }

    #[test]
    fn test_self_dependency_is_a_cycle() {
        let jobs = vec![job("a", &["a"])];
        let res = resolve(&jobs, &names(&["a"]));
        assert!(res.run_list.is_empty());
        assert_eq!(
            res.problems,
            vec![Problem::DependencyCycle {
                cycle: names(&["a", "a"]),
            }]
        );
    }

    #[test]
    fn test_unknown_dependency_is_local() {
        let jobs = vec![job("a", &["ghost"]), job("b", &["a"]), job("c", &[])];
        let res = resolve(&jobs, &names(&["b", "c"]));
        assert_eq!(res.run_list, names(&["c"]));
        assert_eq!(
            res.problems,
            vec![
                Problem::UnknownJob {
                    job: "a".into(),
                    missing: "ghost".into(),
                    kind: EdgeKind::Depends,
                },
                Problem::DependencyExcluded {
                    job: "b".into(),
                    dependency: "a".into(),
                },
            ]
        );
    }

    #[test]
    fn test_unknown_desired_name() {
        let jobs = vec![job("a", &[])];
        let res = resolve(&jobs, &names(&["a", "nope"]));
        assert_eq!(res.run_list, names(&["a"]));
        assert_eq!(
            res.problems,
            vec![Problem::UnknownDesiredJob { name: "nope".into() }]
        );
    }

    #[test]
    fn test_empty_desired() {
        let jobs = vec![job("a", &[])];
        let res = resolve(&jobs, &[]);
        assert!(res.run_list.is_empty());
        assert!(res.problems.is_empty());
    }

    #[test]
    fn test_deterministic() {
        let jobs = vec![
            job("x", &["y", "z"]),
            job("z", &[]),
            job("y", &["z"]),
            job("w", &[]),
        ];
        let desired = names(&["x", "w"]);
        let first = resolve(&jobs, &desired);
        for _ in 0..10 {
            assert_eq!(resolve(&jobs, &desired), first);
        }
        assert_eq!(first.run_list, names(&["z", "y", "x", "w"]));
    }
}
