//! Ordered, keyed task collection and dependency resolution

use crate::config::types::TaskDefinition;
use crate::error::{ConfigError, ConfigResult};
use std::collections::{HashMap, HashSet};
use std::ops::Index;

/// Something stored in a [`DependencyCollection`]
pub trait Dependent {
    /// Primary key, unique within a collection
    fn key(&self) -> &str;

    /// Secondary lookup key, if any
    fn alias(&self) -> Option<&str> {
        None
    }

    /// Keys of the entries that must come first, in declared order
    fn dependencies(&self) -> &[String];
}

impl Dependent for TaskDefinition {
    fn key(&self) -> &str {
        &self.id
    }

    fn alias(&self) -> Option<&str> {
        (self.name != self.id).then_some(self.name.as_str())
    }

    fn dependencies(&self) -> &[String] {
        &self.dependencies
    }
}

/// An insertion-ordered collection indexed by key and alias
#[derive(Debug, Clone)]
pub struct DependencyCollection<T> {
    items: Vec<T>,
    keys: HashMap<String, usize>,
    aliases: HashMap<String, usize>,
}

/// The collection produced by the workflow parser
pub type TaskCollection = DependencyCollection<TaskDefinition>;

impl<T: Dependent> DependencyCollection<T> {
    pub fn new() -> Self {
        DependencyCollection {
            items: Vec::new(),
            keys: HashMap::new(),
            aliases: HashMap::new(),
        }
    }

    /// Add an item
    ///
    /// Keys and aliases share one namespace: an item whose key or alias is
    /// already a key or alias of another item is rejected.
    pub fn add(&mut self, item: T) -> ConfigResult<()> {
        let key = item.key().to_string();
        if self.is_taken(&key) {
            return Err(ConfigError::DuplicateTask(key));
        }

        let alias = item.alias().map(str::to_string);
        if let Some(alias) = &alias {
            if self.is_taken(alias) {
                return Err(ConfigError::DuplicateTask(alias.clone()));
            }
        }

        let index = self.items.len();
        if let Some(alias) = alias {
            self.aliases.insert(alias, index);
        }
        self.keys.insert(key, index);
        self.items.push(item);
        Ok(())
    }

    fn is_taken(&self, key: &str) -> bool {
        self.keys.contains_key(key) || self.aliases.contains_key(key)
    }

    /// Look up by primary key first, then by alias
    pub fn get(&self, key: &str) -> Option<&T> {
        self.keys
            .get(key)
            .or_else(|| self.aliases.get(key))
            .map(|&index| &self.items[index])
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.items.iter()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Order `targets` and their transitive dependencies for execution
    ///
    /// Dependencies are visited depth-first in declared order and each entry
    /// is placed once, after everything it depends on. With
    /// `skip_dependencies` the targets are returned as given, deduplicated.
    pub fn resolve(&self, targets: &[String], skip_dependencies: bool) -> ConfigResult<Vec<&T>> {
        let mut order: Vec<&T> = Vec::new();
        let mut placed: HashSet<&str> = HashSet::new();

        for target in targets {
            let root = self
                .get(target)
                .ok_or_else(|| ConfigError::TaskNotFound(target.clone()))?;

            if placed.contains(root.key()) {
                continue;
            }

            if skip_dependencies {
                placed.insert(root.key());
                order.push(root);
                continue;
            }

            // (entry, index of the next dependency to visit)
            let mut stack: Vec<(&T, usize)> = vec![(root, 0)];

            while let Some(&(node, next)) = stack.last() {
                let deps = node.dependencies();

                if next >= deps.len() {
                    stack.pop();
                    if placed.insert(node.key()) {
                        order.push(node);
                    }
                    continue;
                }

                if let Some(top) = stack.last_mut() {
                    top.1 += 1;
                }

                let dep_key = &deps[next];
                let dep = self.get(dep_key).ok_or_else(|| ConfigError::MissingDependency {
                    task: node.key().to_string(),
                    dependency: dep_key.clone(),
                })?;

                if placed.contains(dep.key()) {
                    continue;
                }

                if stack.iter().any(|(entry, _)| entry.key() == dep.key()) {
                    let mut path: Vec<&str> = stack.iter().map(|(entry, _)| entry.key()).collect();
                    path.push(dep.key());
                    return Err(ConfigError::CircularDependency(path.join(" -> ")));
                }

                stack.push((dep, 0));
            }
        }

        Ok(order)
    }
}

impl<T: Dependent> Default for DependencyCollection<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Dependent> Index<&str> for DependencyCollection<T> {
    type Output = T;

    fn index(&self, key: &str) -> &T {
        match self.get(key) {
            Some(item) => item,
            None => panic!("no entry for key '{}'", key),
        }
    }
}

impl<'a, T> IntoIterator for &'a DependencyCollection<T> {
    type Item = &'a T;
    type IntoIter = std::slice::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}
