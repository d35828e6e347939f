//! Named task registry and the standard asset pipeline.
//!
//! Tasks are registered once under unique names and can then be run on
//! their own or referenced from orchestrations with [`Node::named`].
//! [`Registry::validate`] builds a reference graph with `petgraph` and
//! rejects dangling references and cycles before anything runs.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;

use crate::config::Config;
use crate::core::Mode;
use crate::error::{ConfigError, TaskError};
use crate::graph::{Node, Task, parallel, sequence};
use crate::step::{
    Autoprefix, CompileSass, Concat, GroupMedia, MinifyCss, MinifySvg, OptimizeImages, Rename,
    SvgStore, TransformStep, Transpile, WriteSourceMaps,
};

/// Names of the transform steps of the standard pipeline, in build order.
pub const STEPS: [&str; 6] = ["styles", "scripts", "vendors", "markup", "images", "sprite"];

#[derive(Debug, Default)]
pub struct Registry {
    nodes: BTreeMap<String, Node>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `node` under `name`, replacing any previous entry.
    pub fn register(&mut self, name: impl Into<String>, node: Node) -> &mut Self {
        self.nodes.insert(name.into(), node);
        self
    }

    pub fn get(&self, name: &str) -> Option<&Node> {
        self.nodes.get(name)
    }

    /// Registered names with an outline of what each one runs.
    pub fn list(&self) -> impl Iterator<Item = (&str, String)> {
        self.nodes
            .iter()
            .map(|(name, node)| (name.as_str(), node.outline()))
    }

    /// Rejects references to unregistered names and reference cycles.
    pub fn validate(&self) -> Result<(), TaskError> {
        let mut graph = DiGraphMap::<&str, ()>::new();

        for (name, node) in &self.nodes {
            graph.add_node(name.as_str());

            for target in node.references() {
                if !self.nodes.contains_key(target) {
                    return Err(TaskError::Unknown(target.to_owned()));
                }
                graph.add_edge(name.as_str(), target, ());
            }
        }

        toposort(&graph, None).map_err(|cycle| TaskError::Cycle(cycle.node_id().to_owned()))?;

        Ok(())
    }

    /// Returns the tree registered under `name` with every reference
    /// replaced by the node it names.
    pub fn resolve(&self, name: &str) -> Result<Node, TaskError> {
        self.resolve_with(name, &mut Vec::new())
    }

    fn resolve_with<'a>(&'a self, name: &'a str, stack: &mut Vec<&'a str>) -> Result<Node, TaskError> {
        if stack.contains(&name) {
            return Err(TaskError::Cycle(name.to_owned()));
        }

        let node = self
            .nodes
            .get(name)
            .ok_or_else(|| TaskError::Unknown(name.to_owned()))?;

        stack.push(name);
        let resolved = self.inline(node, stack);
        stack.pop();

        resolved
    }

    fn inline<'a>(&'a self, node: &'a Node, stack: &mut Vec<&'a str>) -> Result<Node, TaskError> {
        Ok(match node {
            Node::Task(task) => Node::Task(task.clone()),
            Node::Named(name) => self.resolve_with(name, stack)?,
            Node::Sequence(nodes) => Node::Sequence(
                nodes
                    .iter()
                    .map(|n| self.inline(n, stack))
                    .collect::<Result<_, _>>()?,
            ),
            Node::Parallel(nodes) => Node::Parallel(
                nodes
                    .iter()
                    .map(|n| self.inline(n, stack))
                    .collect::<Result<_, _>>()?,
            ),
        })
    }

    /// Runs the named task to completion.
    pub async fn run(&self, name: &str) -> Result<(), TaskError> {
        let node = self.resolve(name)?;

        tokio::spawn(node.run())
            .await
            .unwrap_or_else(|e| Err(crate::graph::panicked(name.to_owned(), e)))
    }

    /// Registers the standard pipeline described by `config`:
    ///
    /// * one task per transform step (see [`STEPS`]),
    /// * `clean`, which removes the output directory,
    /// * `build`: `clean`, then every step in parallel,
    /// * `watch` and `serve` (with the `live` / `server` features),
    /// * `dev`: `build`, then `watch` and `serve` in parallel.
    ///
    /// In [`Mode::Dev`] step failures are logged instead of propagated.
    pub fn standard(config: &Config, mode: Mode) -> Result<Self, ConfigError> {
        let mut registry = Self::new();
        let steps = standard_steps(config)?;

        let tasks: HashMap<String, Task> = steps
            .into_iter()
            .map(|step| {
                let name = step.name().to_owned();
                (name, step_task(Arc::new(step), mode))
            })
            .collect();

        for binding in &config.watch {
            if !tasks.contains_key(&binding.step) {
                return Err(ConfigError::UnknownStep(
                    binding.glob.clone(),
                    binding.step.clone(),
                ));
            }
        }

        for name in STEPS {
            if let Some(task) = tasks.get(name) {
                registry.register(name, Node::Task(task.clone()));
            }
        }

        let dist = config.dist.clone();
        registry.register(
            "clean",
            Node::task("clean", move || {
                let dist = dist.clone();
                async move {
                    crate::io::clean(&dist)
                        .await
                        .map_err(|e| TaskError::failed("clean", e))
                }
            }),
        );

        let build = sequence([
            Node::named("clean"),
            parallel(STEPS.map(Node::named)),
        ]);
        registry.register("build", build);

        #[cfg(feature = "live")]
        {
            let root = config.root.clone();
            let bindings: Vec<(String, Task)> = config
                .watch
                .iter()
                .map(|b| (b.glob.clone(), tasks[&b.step].clone()))
                .collect();

            registry.register(
                "watch",
                Node::task("watch", move || {
                    let root = root.clone();
                    let bindings = bindings.clone();
                    async move {
                        crate::watch::watch(&root, bindings)
                            .await
                            .map_err(|e| TaskError::failed("watch", e))
                    }
                }),
            );
        }

        #[cfg(feature = "server")]
        {
            let dist = config.dist.clone();
            let port = config.port;

            registry.register(
                "serve",
                Node::task("serve", move || {
                    let dist = dist.clone();
                    async move {
                        crate::serve::serve(dist, port)
                            .await
                            .map_err(|e| TaskError::failed("serve", e))
                    }
                }),
            );

            registry.register(
                "dev",
                sequence([
                    Node::named("build"),
                    parallel([Node::named("watch"), Node::named("serve")]),
                ]),
            );
        }

        Ok(registry)
    }
}

/// Wraps a transform step into a task. In [`Mode::Dev`] a failed run is
/// logged and reported as success.
fn step_task(step: Arc<TransformStep>, mode: Mode) -> Task {
    let name = step.name().to_owned();

    Task::new(name.clone(), move || {
        let step = step.clone();
        let name = name.clone();
        async move {
            match step.run().await {
                Ok(_) => Ok(()),
                Err(e) if mode == Mode::Dev => {
                    tracing::error!("{name} failed:\n{e}");
                    Ok(())
                }
                Err(e) => Err(TaskError::failed(name, e)),
            }
        }
    })
}

/// Builds the six transform steps of the standard pipeline.
pub fn standard_steps(config: &Config) -> Result<Vec<TransformStep>, ConfigError> {
    let root = &config.root;
    let tools = &config.tools;
    let out = &config.outputs;

    let styles = TransformStep::new("styles", root, config.css_dir())
        .sources(&config.sources.styles)
        .pipe(CompileSass::new(root))
        .pipe(GroupMedia)
        .pipe(Autoprefix::new(&config.browsers)?)
        .pipe(MinifyCss::new(&config.browsers)?)
        .pipe(Concat::new(&out.css_file))
        .pipe(WriteSourceMaps::default());

    let scripts = TransformStep::new("scripts", root, config.js_dir())
        .sources(&config.sources.scripts)
        .pipe_opt(
            tools
                .esbuild()
                .map(|program| {
                    Transpile::new(program, &config.js_target).minify(config.js_minify)
                }),
        )
        .pipe(Concat::new(&out.js_file))
        .pipe(WriteSourceMaps::default());

    let vendors = TransformStep::new("vendors", root, config.js_dir())
        .sources(&config.sources.vendors)
        .pipe(Concat::new(&out.vendors_file))
        .pipe(WriteSourceMaps::default());

    let markup = TransformStep::new("markup", root, &config.dist).sources(&config.sources.markup);

    let images = TransformStep::new("images", root, config.img_dir())
        .sources(&config.sources.images)
        .pipe(OptimizeImages)
        .pipe_opt(tools.svgo().map(MinifySvg::new));

    let sprite = TransformStep::new("sprite", root, config.img_dir())
        .sources(&config.sources.sprite)
        .pipe_opt(tools.svgo().map(MinifySvg::new))
        .pipe(SvgStore::new())
        .pipe(Rename::new(&out.sprite_file));

    Ok(vec![styles, scripts, vendors, markup, images, sprite])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Tools, WatchBinding};

    fn noop(name: &'static str) -> Node {
        Node::task(name, || async { Ok(()) })
    }

    #[test]
    fn test_rejects_unknown_reference() {
        let mut registry = Registry::new();
        registry
            .register("a", noop("a"))
            .register("all", sequence([Node::named("a"), Node::named("b")]));

        let err = registry.validate().unwrap_err();
        assert!(matches!(err, TaskError::Unknown(name) if name == "b"));
        assert!(matches!(registry.resolve("all"), Err(TaskError::Unknown(_))));
    }

    #[test]
    fn test_rejects_cycles() {
        let mut registry = Registry::new();
        registry
            .register("a", sequence([noop("x"), Node::named("b")]))
            .register("b", parallel([Node::named("a")]));

        assert!(matches!(registry.validate(), Err(TaskError::Cycle(_))));
        assert!(matches!(registry.resolve("a"), Err(TaskError::Cycle(_))));
    }

    #[test]
    fn test_resolve_inlines_references() {
        let mut registry = Registry::new();
        registry
            .register("a", noop("a"))
            .register("b", noop("b"))
            .register("ab", parallel([Node::named("a"), Node::named("b")]))
            .register("all", sequence([Node::named("ab"), Node::named("a")]));

        registry.validate().unwrap();
        let tree = registry.resolve("all").unwrap();
        assert!(tree.references().is_empty());
        assert_eq!(tree.outline(), "series(parallel(a, b), a)");
    }

    #[tokio::test]
    async fn test_run_by_name() {
        let mut registry = Registry::new();
        registry.register("ok", noop("ok")).register(
            "bad",
            Node::task("bad", || async {
                Err(TaskError::failed("bad", anyhow::anyhow!("nope")))
            }),
        );

        registry.run("ok").await.unwrap();
        assert_eq!(registry.run("bad").await.unwrap_err().task(), "bad");
        assert!(matches!(registry.run("missing").await, Err(TaskError::Unknown(_))));
    }

    #[test]
    fn test_standard_registry() {
        let config = Config {
            tools: Tools::none(),
            ..Config::default()
        };
        let registry = Registry::standard(&config, Mode::Build).unwrap();
        registry.validate().unwrap();

        let names: Vec<_> = registry.list().map(|(name, _)| name).collect();
        for name in STEPS.iter().chain(&["clean", "build"]) {
            assert!(names.contains(name), "{name} is missing");
        }
        assert_eq!(
            registry.get("build").unwrap().outline(),
            "series(clean, parallel(styles, scripts, vendors, markup, images, sprite))"
        );
    }

    #[test]
    fn test_standard_rejects_unknown_watch_target() {
        let mut config = Config::default();
        config.watch.push(WatchBinding::new("fonts/*", "fonts"));

        let err = Registry::standard(&config, Mode::Dev).unwrap_err();
        assert!(matches!(err, ConfigError::UnknownStep(_, step) if step == "fonts"));
    }

    #[test]
    fn test_disabled_tools_drop_operations() {
        let config = Config {
            tools: Tools::none(),
            ..Config::default()
        };
        let steps = standard_steps(&config).unwrap();
        let names: Vec<_> = steps.iter().map(|s| s.name()).collect();
        assert_eq!(names, STEPS);

        let scripts = format!("{:?}", steps[1]);
        assert!(!scripts.contains("transpile"));
        assert!(scripts.contains("concat"));
    }
}
