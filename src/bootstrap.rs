//! Word descriptors and the image-building walk.
//!
//! A VM image is declared, not hand-assembled: native words carry their
//! host callback plus dependency names, colon words carry token lists.
//! Bootstrap builds a dependency graph over the natives, optionally
//! prunes it to the subgraph reachable from a root set, orders it
//! topologically (priority breaks ties), and writes the dictionary. Any
//! unresolvable name is fatal; there is no partial VM.

use std::collections::{BTreeMap, BTreeSet};

use tracing::debug;

use crate::{
    vm::{Forth, WordFunc},
    Error, ReplaceErr,
};

/// Bootstrap-time description of a native word. Not stored in Memory.
#[derive(Clone, Copy)]
pub struct NativeWord {
    pub name: &'static str,
    pub func: WordFunc,
    pub immediate: bool,
    /// Scratch bytes reserved right after the entry; the address is
    /// recorded for the operation's own later use. 0 reserves nothing.
    pub pad: u16,
    /// Native words that must exist before this one. Resolved to entry
    /// addresses once the whole set is defined.
    pub deps: &'static [&'static str],
    /// Tie-break when no dependency forces an order; higher defines
    /// earlier.
    pub priority: i16,
}

/// Bootstrap-time description of a colon word: each token is the name of
/// an already-resolvable word or a signed decimal literal.
#[derive(Clone, Copy)]
pub struct ColonWord {
    pub name: &'static str,
    pub immediate: bool,
    pub tokens: &'static [&'static str],
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BootstrapError {
    UnknownDependency { word: String, dep: String },
    UnknownRoot(String),
    DependencyCycle,
    UnresolvedToken { word: String, token: String },
}

impl core::fmt::Display for BootstrapError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            BootstrapError::UnknownDependency { word, dep } => {
                write!(f, "word {word:?} depends on unknown word {dep:?}")
            }
            BootstrapError::UnknownRoot(root) => write!(f, "root {root:?} names no native word"),
            BootstrapError::DependencyCycle => write!(f, "dependency cycle among native words"),
            BootstrapError::UnresolvedToken { word, token } => {
                write!(f, "token {token:?} in {word:?} is neither a word nor a literal")
            }
        }
    }
}

/// Adjacency-map dependency graph: an edge `a -> b` means `a` depends on
/// `b`, so `b` must be defined first.
#[derive(Debug, Default, Clone)]
pub struct DepGraph {
    edges: BTreeMap<&'static str, BTreeSet<&'static str>>,
}

impl DepGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&mut self, node: &'static str) {
        self.edges.entry(node).or_default();
    }

    pub fn add_edge(&mut self, from: &'static str, to: &'static str) {
        self.edges.entry(from).or_default().insert(to);
        self.edges.entry(to).or_default();
    }

    pub fn contains(&self, node: &str) -> bool {
        self.edges.contains_key(node)
    }

    pub fn len(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    /// The set reachable from `roots` by directed edges: a deployment
    /// keeps only the words a program needs plus their transitive
    /// dependencies.
    pub fn prune(&self, roots: &[&str]) -> BTreeSet<&'static str> {
        let mut kept = BTreeSet::new();
        let mut work: Vec<&str> = roots.to_vec();
        while let Some(node) = work.pop() {
            let Some((key, deps)) = self.edges.get_key_value(node) else {
                continue;
            };
            if kept.insert(*key) {
                work.extend(deps.iter().copied());
            }
        }
        kept
    }

    /// Iterative Kahn ordering of `keep` such that every word follows all
    /// of its dependencies. `key` supplies (priority, declaration index)
    /// for tie-breaking: among the ready words, highest priority first,
    /// then declaration order.
    pub fn topo_order(
        &self,
        keep: &BTreeSet<&'static str>,
        key: impl Fn(&str) -> (i16, usize),
    ) -> Result<Vec<&'static str>, BootstrapError> {
        let mut indegree: BTreeMap<&'static str, usize> = BTreeMap::new();
        let mut dependents: BTreeMap<&'static str, Vec<&'static str>> = BTreeMap::new();
        for (&node, deps) in &self.edges {
            if !keep.contains(node) {
                continue;
            }
            let in_deps = deps.iter().filter(|d| keep.contains(**d)).count();
            indegree.insert(node, in_deps);
            for &dep in deps.iter().filter(|d| keep.contains(**d)) {
                dependents.entry(dep).or_default().push(node);
            }
        }

        let mut ready: Vec<&'static str> = indegree
            .iter()
            .filter(|(_, d)| **d == 0)
            .map(|(&n, _)| n)
            .collect();
        let mut out = Vec::with_capacity(indegree.len());

        // Highest priority first; declaration order settles the rest.
        while !ready.is_empty() {
            let Some(best) = ready
                .iter()
                .enumerate()
                .min_by_key(|(_, n)| {
                    let (prio, decl) = key(n);
                    (core::cmp::Reverse(prio), decl)
                })
                .map(|(i, _)| i)
            else {
                break;
            };
            let node = ready.swap_remove(best);
            out.push(node);
            if let Some(deps) = dependents.get(node) {
                for &dependent in deps {
                    if let Some(d) = indegree.get_mut(dependent) {
                        *d -= 1;
                        if *d == 0 {
                            ready.push(dependent);
                        }
                    }
                }
            }
        }

        if out.len() != indegree.len() {
            return Err(BootstrapError::DependencyCycle);
        }
        Ok(out)
    }
}

/// Populate `vm`'s dictionary from the descriptor sets. Called once from
/// [`Forth::with_words`]; the dictionary is append-only afterwards.
pub(crate) fn build_image(
    vm: &mut Forth,
    natives: &[NativeWord],
    colons: &[ColonWord],
    roots: Option<&[&str]>,
) -> Result<(), Error> {
    let by_name: BTreeMap<&str, &NativeWord> =
        natives.iter().map(|w| (w.name, w)).collect();
    let decl: BTreeMap<&str, usize> = natives
        .iter()
        .enumerate()
        .map(|(i, w)| (w.name, i))
        .collect();

    let mut graph = DepGraph::new();
    for word in natives {
        graph.add_node(word.name);
        for dep in word.deps {
            if !by_name.contains_key(dep) {
                return Err(BootstrapError::UnknownDependency {
                    word: word.name.to_string(),
                    dep: dep.to_string(),
                }
                .into());
            }
            graph.add_edge(word.name, dep);
        }
    }

    let keep = match roots {
        Some(roots) => {
            for root in roots {
                if !graph.contains(root) {
                    return Err(BootstrapError::UnknownRoot(root.to_string()).into());
                }
            }
            graph.prune(roots)
        }
        None => graph.prune(&natives.iter().map(|w| w.name).collect::<Vec<_>>()),
    };

    let order = graph.topo_order(&keep, |name| {
        (by_name[name].priority, decl[name])
    })?;

    for name in order {
        let word = by_name[name];
        let token = -(vm.words.len() as i16) - 1;
        vm.words.push((word.name, word.func));
        vm.dict
            .header(&mut vm.memory, word.name, word.immediate, false, false)?;
        vm.dict.write_tokens(&mut vm.memory, &[token])?;
        let head = vm.tcb.load(&vm.memory, crate::tcb::Reg::Latest)?;
        vm.resolved.insert(word.name, head);
        if word.pad > 0 {
            let at = vm.tcb.here_pp(&mut vm.memory, word.pad)?;
            vm.pads.insert(word.name, at);
        }
        debug!(word = word.name, head, token, "defined native word");
    }

    for word in colons {
        let enter = vm.body_token("ENTER").replace_err(Error::Bootstrap(
            BootstrapError::UnresolvedToken {
                word: word.name.to_string(),
                token: "ENTER".to_string(),
            },
        ))?;
        let exit = vm.body_token("EXIT").replace_err(Error::Bootstrap(
            BootstrapError::UnresolvedToken {
                word: word.name.to_string(),
                token: "EXIT".to_string(),
            },
        ))?;

        let mut cells = Vec::with_capacity(word.tokens.len() + 2);
        cells.push(enter);
        for token in word.tokens {
            match vm.dict.find(&vm.memory, token, false)? {
                Some(head) => cells.push(vm.dict.cwa(head) as i16),
                None => match token.parse::<i16>() {
                    Ok(lit) => cells.push(lit),
                    Err(_) => {
                        return Err(BootstrapError::UnresolvedToken {
                            word: word.name.to_string(),
                            token: token.to_string(),
                        }
                        .into())
                    }
                },
            }
        }
        cells.push(exit);

        vm.dict
            .define_code(&mut vm.memory, word.name, &cells, word.immediate)?;
        let head = vm.tcb.load(&vm.memory, crate::tcb::Reg::Latest)?;
        vm.resolved.insert(word.name, head);
        debug!(word = word.name, head, cells = cells.len(), "compiled colon word");
    }

    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    fn chain() -> DepGraph {
        // a -> b -> c
        let mut g = DepGraph::new();
        g.add_edge("a", "b");
        g.add_edge("b", "c");
        g
    }

    #[test]
    fn prune_keeps_exactly_the_reachable_set() {
        let g = chain();
        let kept = g.prune(&["a"]);
        assert_eq!(kept, BTreeSet::from(["a", "b", "c"]));

        let kept = g.prune(&["b"]);
        assert_eq!(kept, BTreeSet::from(["b", "c"]));

        let kept = g.prune(&["c"]);
        assert_eq!(kept, BTreeSet::from(["c"]));

        assert!(g.prune(&[]).is_empty());
    }

    #[test]
    fn topo_order_respects_dependencies() {
        let g = chain();
        let keep = g.prune(&["a"]);
        let order = g.topo_order(&keep, |_| (0, 0)).unwrap();
        assert_eq!(order, ["c", "b", "a"]);
    }

    #[test]
    fn priority_breaks_ties_only() {
        let mut g = DepGraph::new();
        g.add_node("low");
        g.add_node("high");
        g.add_edge("low", "high");
        // "low" depends on "high": priority cannot override that.
        let keep = g.prune(&["low"]);
        let prio = |n: &str| if n == "low" { (100, 0) } else { (-5, 1) };
        assert_eq!(g.topo_order(&keep, prio).unwrap(), ["high", "low"]);

        let mut free = DepGraph::new();
        free.add_node("first");
        free.add_node("second");
        free.add_node("third");
        let keep = free.prune(&["first", "second", "third"]);
        let prio = |n: &str| match n {
            "first" => (0, 0),
            "second" => (7, 1),
            _ => (0, 2),
        };
        assert_eq!(
            free.topo_order(&keep, prio).unwrap(),
            ["second", "first", "third"]
        );
    }

    #[test]
    fn dictionary_chain_mirrors_the_computed_order() {
        use crate::{output::CaptureConsole, tcb::Reg, vm::VmParams, Forth};

        let natives: &[NativeWord] = &[
            NativeWord {
                name: "GAMMA",
                func: Forth::halt,
                immediate: false,
                pad: 0,
                deps: &["BETA"],
                priority: 0,
            },
            NativeWord {
                name: "ALPHA",
                func: Forth::halt,
                immediate: false,
                pad: 0,
                deps: &[],
                priority: 0,
            },
            NativeWord {
                name: "BETA",
                func: Forth::halt,
                immediate: false,
                pad: 0,
                deps: &["ALPHA"],
                priority: 0,
            },
        ];

        // The order the builder must have used, computed independently.
        let mut g = DepGraph::new();
        for w in natives {
            g.add_node(w.name);
            for dep in w.deps {
                g.add_edge(w.name, dep);
            }
        }
        let names: Vec<&str> = natives.iter().map(|w| w.name).collect();
        let keep = g.prune(&names);
        let order = g
            .topo_order(&keep, |n| {
                (0, names.iter().position(|m| *m == n).unwrap())
            })
            .unwrap();
        assert_eq!(order, ["ALPHA", "BETA", "GAMMA"]);

        let (console, _taken) = CaptureConsole::new();
        let vm = Forth::with_words(
            VmParams::default(),
            Box::new(console),
            natives,
            &[],
            None,
        )
        .unwrap();

        // Walking link from LATEST yields most-recent-first, so the
        // reversed chain is the definition order.
        let mut chain = Vec::new();
        let mut head = vm.tcb.load(&vm.memory, Reg::Latest).unwrap();
        while head != 0 {
            chain.push(vm.dict.name(&vm.memory, head).unwrap());
            head = vm.dict.link(&vm.memory, head).unwrap();
        }
        chain.reverse();
        assert_eq!(chain, order);
    }

    #[test]
    fn cycles_are_detected() {
        let mut g = DepGraph::new();
        g.add_edge("x", "y");
        g.add_edge("y", "x");
        let keep = g.prune(&["x"]);
        assert_eq!(
            g.topo_order(&keep, |_| (0, 0)),
            Err(BootstrapError::DependencyCycle)
        );
    }
}
