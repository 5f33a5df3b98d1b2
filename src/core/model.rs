//! Application model assembly.
//!
//! Walks the manifest (and nested assemblies), parses every stack template,
//! projects it, and merges the results with the assets into one `AppModel`.

use super::error::LdkError;
use super::types::*;
use crate::assembly::assets::{load_asset_manifest, metadata_assets};
use crate::assembly::manifest::{load_manifest, Manifest};
use crate::assembly::projection::{project_stack, DetachedRule, DEFAULT_BUS};
use crate::assembly::template::{build_context, load_template};
use crate::assembly::tree::{construct_path_for, load_tree};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Nested assemblies deeper than this are ignored.
const MAX_NESTING: usize = 8;

/// Fields shared by every top-level model entry.
pub trait ModelEntry {
    fn id(&self) -> &str;
    fn stack(&self) -> &str;
    fn logical_id(&self) -> &str;
    fn depends_on(&self) -> &[String];
    fn construct_path_mut(&mut self) -> &mut Option<String>;
}

macro_rules! impl_model_entry {
    ($($ty:ty),* $(,)?) => {
        $(
            impl ModelEntry for $ty {
                fn id(&self) -> &str {
                    &self.id
                }
                fn stack(&self) -> &str {
                    &self.stack
                }
                fn logical_id(&self) -> &str {
                    &self.logical_id
                }
                fn depends_on(&self) -> &[String] {
                    &self.depends_on
                }
                fn construct_path_mut(&mut self) -> &mut Option<String> {
                    &mut self.construct_path
                }
            }
        )*
    };
}

impl_model_entry!(
    TableDef,
    FunctionDef,
    ApiDef,
    EventBusDef,
    StateMachineDef,
    QueueDef,
    TopicDef,
);

impl AppModel {
    /// Append every entry and asset of `other`. Existing asset hashes win.
    pub fn merge(&mut self, other: AppModel) {
        self.tables.extend(other.tables);
        self.functions.extend(other.functions);
        self.apis.extend(other.apis);
        self.buses.extend(other.buses);
        self.state_machines.extend(other.state_machines);
        self.queues.extend(other.queues);
        self.topics.extend(other.topics);
        for (hash, path) in other.assets {
            self.assets.entry(hash).or_insert(path);
        }
    }
}

/// Build the application model of the assembly in `dir`.
///
/// No manifest, or a manifest without artifacts, yields an empty model.
pub fn assemble(dir: &Path) -> Result<AppModel, LdkError> {
    let Some(root) = load_manifest(dir)? else {
        warn!("no manifest in {}; application is empty", dir.display());
        return Ok(AppModel::default());
    };

    let mut model = AppModel::default();
    let mut detached = Vec::new();
    let mut visited = HashSet::new();
    let mut pending: Vec<(Manifest, usize)> = vec![(root, 0)];

    while let Some((manifest, depth)) = pending.pop() {
        if !visited.insert(manifest.dir.clone()) {
            continue;
        }
        for nested in &manifest.nested {
            if depth + 1 > MAX_NESTING {
                warn!("nested assembly {} exceeds depth {}; skipping", nested.display(), MAX_NESTING);
                continue;
            }
            match load_manifest(nested)? {
                Some(m) => pending.push((m, depth + 1)),
                None => warn!("nested assembly {} has no manifest; skipping", nested.display()),
            }
        }
        assemble_manifest(&manifest, &mut model, &mut detached)?;
    }

    attach_detached_rules(&mut model, detached);
    link_function_assets(&mut model);

    info!(
        "assembled {} resource(s) and {} asset(s) from {}",
        model.resource_count(),
        model.assets.len(),
        dir.display()
    );
    Ok(model)
}

fn assemble_manifest(
    manifest: &Manifest,
    model: &mut AppModel,
    detached: &mut Vec<DetachedRule>,
) -> Result<(), LdkError> {
    let tree = match &manifest.tree_path {
        Some(path) => load_tree(path)?,
        None => None,
    };

    for stack in &manifest.stacks {
        debug!("loading stack {} from {}", stack.name, stack.template_path.display());
        let template = load_template(&stack.template_path, &stack.name)?;
        let ctx = build_context(&template);
        let mut projection = project_stack(&template, &ctx);

        if let Some(tree) = &tree {
            let part = &mut projection.model;
            fill_construct_paths(&mut part.tables, tree);
            fill_construct_paths(&mut part.functions, tree);
            fill_construct_paths(&mut part.apis, tree);
            fill_construct_paths(&mut part.buses, tree);
            fill_construct_paths(&mut part.state_machines, tree);
            fill_construct_paths(&mut part.queues, tree);
            fill_construct_paths(&mut part.topics, tree);
        }

        projection.model.assets = metadata_assets(&template, &manifest.dir);
        model.merge(projection.model);
        detached.extend(projection.detached_rules);
    }

    for asset_manifest in &manifest.asset_manifests {
        let assets = load_asset_manifest(&asset_manifest.path, &manifest.dir)?;
        debug!(
            "{} asset(s) from {} (stack {:?})",
            assets.len(),
            asset_manifest.name,
            asset_manifest.stack
        );
        for (hash, path) in assets {
            model.assets.entry(hash).or_insert(path);
        }
    }
    Ok(())
}

fn fill_construct_paths<T: ModelEntry>(entries: &mut [T], tree: &ConstructNode) {
    for entry in entries {
        if entry.construct_path_mut().is_some() {
            continue;
        }
        let found = construct_path_for(tree, entry.stack(), entry.logical_id());
        *entry.construct_path_mut() = found;
    }
}

fn attach_detached_rules(model: &mut AppModel, detached: Vec<DetachedRule>) {
    for DetachedRule {
        stack,
        bus_name,
        rule,
    } in detached
    {
        if let Some(bus) = model.buses.iter_mut().find(|b| b.name == bus_name) {
            bus.rules.push(rule);
            continue;
        }
        if bus_name != DEFAULT_BUS {
            warn!(
                "rule {}/{} targets unknown bus '{}'; ignoring",
                stack, rule.logical_id, bus_name
            );
            continue;
        }
        debug!("creating implicit '{}' event bus", DEFAULT_BUS);
        model.buses.push(EventBusDef {
            id: DEFAULT_BUS.to_string(),
            stack: String::new(),
            logical_id: DEFAULT_BUS.to_string(),
            name: DEFAULT_BUS.to_string(),
            rules: vec![rule],
            construct_path: None,
            depends_on: Vec::new(),
        });
    }
}

fn link_function_assets(model: &mut AppModel) {
    for function in &mut model.functions {
        if let FunctionCode::Asset { hash, path } = &mut function.code {
            match model.assets.get(hash.as_str()) {
                Some(local) => *path = Some(local.clone()),
                None => debug!("asset {} of {} has no local path", hash, function.id),
            }
        }
    }
}

/// Local path of a function's code bundle, when known.
pub fn function_code_path(function: &FunctionDef) -> Option<&PathBuf> {
    match &function.code {
        FunctionCode::Asset { path, .. } => path.as_ref(),
        _ => None,
    }
}
