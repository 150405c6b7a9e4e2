//! Static `{% include %}` graph of compiled templates.
//!
//! tera follows includes without a depth limit, so a template that reaches
//! itself overflows the stack at render time. The graph is walked while the
//! registry is built and cycles fail the build.
//!
//! ```text
//! shared layouts + partials ──► find_cycle()             (once per build)
//! view body `main`          ──► find_cycle_through(main)  (once per view)
//! ```
//!
//! Every include inside the template counts, including ones behind an `if`.

use super::registry::MAIN_BLOCK;
use rustc_hash::{FxHashMap, FxHashSet};
use tera::{Template, Tera, ast::Node};

#[derive(Debug, Clone, Default)]
pub(crate) struct IncludeGraph {
    edges: FxHashMap<String, Vec<String>>,
}

impl IncludeGraph {
    /// Include edges of every template registered on `engine`.
    ///
    /// `main` always counts as a known target: layouts include the body of
    /// whichever view they end up wrapping.
    pub(crate) fn from_engine(engine: &Tera) -> Self {
        let known = |name: &str| name == MAIN_BLOCK || engine.get_template(name).is_ok();
        let edges = engine
            .get_template_names()
            .filter_map(|name| {
                let template = engine.get_template(name).ok()?;
                Some((name.to_owned(), include_targets(template, known)))
            })
            .collect();
        Self { edges }
    }

    /// First cycle among the graph's own templates, as a path that starts and
    /// ends on the same name.
    pub(crate) fn find_cycle(&self) -> Option<Vec<String>> {
        let mut names: Vec<&str> = self.edges.keys().map(String::as_str).collect();
        names.sort_unstable();

        let mut done = FxHashSet::default();
        names
            .into_iter()
            .find_map(|start| self.walk(start, &[], &mut Vec::new(), &mut done))
    }

    /// Cycle through a view body whose includes are `main`.
    ///
    /// Only meaningful once [`IncludeGraph::find_cycle`] came back empty: any
    /// remaining cycle has to pass through the body.
    pub(crate) fn find_cycle_through(&self, main: &[String]) -> Option<Vec<String>> {
        self.walk(MAIN_BLOCK, main, &mut Vec::new(), &mut FxHashSet::default())
    }

    fn targets<'a>(&'a self, name: &str, main: &'a [String]) -> &'a [String] {
        if name == MAIN_BLOCK {
            main
        } else {
            self.edges.get(name).map_or(&[], Vec::as_slice)
        }
    }

    fn walk<'a>(
        &'a self,
        name: &'a str,
        main: &'a [String],
        stack: &mut Vec<&'a str>,
        done: &mut FxHashSet<&'a str>,
    ) -> Option<Vec<String>> {
        if let Some(pos) = stack.iter().position(|n| *n == name) {
            let mut cycle: Vec<String> = stack[pos..].iter().map(|n| (*n).to_owned()).collect();
            cycle.push(name.to_owned());
            return Some(cycle);
        }
        if done.contains(name) {
            return None;
        }

        stack.push(name);
        for next in self.targets(name, main) {
            if let Some(cycle) = self.walk(next, main, stack, done) {
                return Some(cycle);
            }
        }
        stack.pop();
        done.insert(name);
        None
    }
}

/// Names `template` includes, in order, without duplicates.
///
/// `{% include ["a", "b"] %}` renders the first existing name, so only that
/// one is an edge.
pub(crate) fn include_targets(template: &Template, known: impl Fn(&str) -> bool) -> Vec<String> {
    let mut out = Vec::new();
    collect(&template.ast, &known, &mut out);
    out
}

fn collect(nodes: &[Node], known: &impl Fn(&str) -> bool, out: &mut Vec<String>) {
    for node in nodes {
        match node {
            Node::Include(_, names, _) => {
                if let Some(name) = names.iter().find(|n| known(n))
                    && !out.contains(name)
                {
                    out.push(name.clone());
                }
            }
            Node::Block(_, block, _) => collect(&block.body, known, out),
            Node::Forloop(_, forloop, _) => {
                collect(&forloop.body, known, out);
                if let Some(body) = &forloop.empty_body {
                    collect(body, known, out);
                }
            }
            Node::If(branches, _) => {
                for (_, _, body) in &branches.conditions {
                    collect(body, known, out);
                }
                if let Some((_, body)) = &branches.otherwise {
                    collect(body, known, out);
                }
            }
            Node::FilterSection(_, section, _) => collect(&section.body, known, out),
            Node::MacroDefinition(_, definition, _) => collect(&definition.body, known, out),
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine(templates: &[(&str, &str)]) -> Tera {
        let mut tera = Tera::default();
        tera.add_raw_templates(templates.iter().copied()).unwrap();
        tera
    }

    #[test]
    fn test_include_targets_nested_nodes() {
        let tera = engine(&[
            ("a", r#"{% if x %}{% include "b" %}{% else %}{% for i in xs %}{% include "c" %}{% endfor %}{% endif %}{% include "b" %}"#),
            ("b", ""),
            ("c", ""),
        ]);
        let template = tera.get_template("a").unwrap();
        assert_eq!(include_targets(template, |_| true), vec!["b", "c"]);
    }

    #[test]
    fn test_include_list_takes_first_known() {
        let tera = engine(&[("a", r#"{% include ["gone", "b"] ignore missing %}"#), ("b", "")]);
        let template = tera.get_template("a").unwrap();
        assert_eq!(include_targets(template, |n| n == "b"), vec!["b"]);
    }

    #[test]
    fn test_find_cycle_self_include() {
        let graph = IncludeGraph::from_engine(&engine(&[("nav", r#"<nav>{% include "nav" %}</nav>"#)]));
        assert_eq!(graph.find_cycle(), Some(vec!["nav".to_owned(), "nav".to_owned()]));
    }

    #[test]
    fn test_find_cycle_indirect() {
        let graph = IncludeGraph::from_engine(&engine(&[
            ("a", r#"{% include "b" %}"#),
            ("b", r#"{% include "c" %}"#),
            ("c", r#"{% include "a" %}"#),
        ]));
        assert_eq!(
            graph.find_cycle(),
            Some(vec!["a".to_owned(), "b".to_owned(), "c".to_owned(), "a".to_owned()])
        );
    }

    #[test]
    fn test_layout_including_main_is_not_a_cycle() {
        let graph = IncludeGraph::from_engine(&engine(&[
            ("layouts/base", r#"<body>{% include "nav" %}{% include "main" %}</body>"#),
            ("nav", "<nav></nav>"),
        ]));
        assert_eq!(graph.find_cycle(), None);
        assert_eq!(graph.find_cycle_through(&["nav".to_owned()]), None);
    }

    #[test]
    fn test_cycle_through_main() {
        let graph = IncludeGraph::from_engine(&engine(&[(
            "layouts/base",
            r#"<body>{% include "main" %}</body>"#,
        )]));
        assert_eq!(
            graph.find_cycle_through(&["layouts/base".to_owned()]),
            Some(vec!["main".to_owned(), "layouts/base".to_owned(), "main".to_owned()])
        );
    }
}
