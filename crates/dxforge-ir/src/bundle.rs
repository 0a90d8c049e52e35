//! The IR container for one compilation: every callable, the primary entry
//! point, and a stable dependency ordering over them.

use indexmap::IndexMap;

use crate::callable::Callable;
use crate::types::Type;

/// Possible errors when assembling a bundle.
#[derive(Debug, PartialEq, thiserror::Error)]
pub enum BundleError {
    /// Two callables share a name.
    #[error("duplicate callable name `{0}`")]
    DuplicateCallable(String),
    /// The primary callable is not among the bundle's callables.
    #[error("primary callable `{0}` is not in the bundle")]
    MissingPrimary(String),
    /// A callable (transitively) launches itself.
    #[error("cyclic dependency through `{0}`")]
    CyclicDependency(String),
    /// A callee name has no corresponding callable.
    #[error("`{caller}` launches unknown callable `{callee}`")]
    UnknownCallee {
        /// The referencing callable.
        caller: String,
        /// The missing callee name.
        callee: String,
    },
}

/// The language-neutral output of translation.
///
/// `dependencies` lists every callable exactly once, each after all of its
/// transitive callees, so the build planner can walk it front to back and
/// always find its callees already compiled.
#[derive(Clone, Debug, PartialEq)]
pub struct Bundle {
    primary: Option<String>,
    callables: IndexMap<String, Callable>,
    dependencies: Vec<String>,
    type_aliases: IndexMap<String, Type>,
}

impl Bundle {
    /// Assembles a bundle from translated callables.
    ///
    /// Checks name uniqueness, resolvability of every callee, presence of
    /// the primary, and acyclicity; computes the post-order dependency
    /// list (primary's subtree first, then any remaining callables in
    /// insertion order).
    pub fn new(
        callables: Vec<Callable>,
        primary: Option<String>,
        type_aliases: IndexMap<String, Type>,
    ) -> Result<Self, BundleError> {
        let mut map = IndexMap::with_capacity(callables.len());
        for callable in callables {
            let name = callable.name().to_string();
            if map.insert(name.clone(), callable).is_some() {
                return Err(BundleError::DuplicateCallable(name));
            }
        }

        if let Some(primary) = &primary
            && !map.contains_key(primary)
        {
            return Err(BundleError::MissingPrimary(primary.clone()));
        }

        let dependencies = Self::post_order(&map, primary.as_deref())?;

        Ok(Bundle {
            primary,
            callables: map,
            dependencies,
            type_aliases,
        })
    }

    fn post_order(
        callables: &IndexMap<String, Callable>,
        primary: Option<&str>,
    ) -> Result<Vec<String>, BundleError> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            Visiting,
            Done,
        }

        fn visit(
            name: &str,
            callables: &IndexMap<String, Callable>,
            marks: &mut IndexMap<String, Mark>,
            order: &mut Vec<String>,
        ) -> Result<(), BundleError> {
            match marks.get(name) {
                Some(Mark::Done) => return Ok(()),
                Some(Mark::Visiting) => {
                    return Err(BundleError::CyclicDependency(name.to_string()));
                }
                None => (),
            }
            marks.insert(name.to_string(), Mark::Visiting);

            let callable = callables.get(name).ok_or_else(|| {
                // The caller is whichever entry is currently `Visiting`
                // beneath us; the nearest one is good enough for the report.
                let caller = marks
                    .iter()
                    .rev()
                    .skip(1)
                    .find(|(_, mark)| **mark == Mark::Visiting)
                    .map(|(caller, _)| caller.clone())
                    .unwrap_or_default();
                BundleError::UnknownCallee {
                    caller,
                    callee: name.to_string(),
                }
            })?;

            for callee in callable.callees() {
                visit(callee, callables, marks, order)?;
            }

            marks.insert(name.to_string(), Mark::Done);
            order.push(name.to_string());
            Ok(())
        }

        let mut marks = IndexMap::new();
        let mut order = Vec::with_capacity(callables.len());

        if let Some(primary) = primary {
            visit(primary, callables, &mut marks, &mut order)?;
        }
        for name in callables.keys() {
            visit(name, callables, &mut marks, &mut order)?;
        }

        Ok(order)
    }

    /// The name of the primary callable, if one was designated.
    pub fn primary_name(&self) -> Option<&str> {
        self.primary.as_deref()
    }

    /// The primary callable itself.
    pub fn primary(&self) -> Option<&Callable> {
        self.primary.as_deref().and_then(|name| self.callables.get(name))
    }

    /// Looks up a callable by name.
    pub fn get(&self, name: &str) -> Option<&Callable> {
        self.callables.get(name)
    }

    /// All callables, keyed by name, in translation order.
    pub fn callables(&self) -> &IndexMap<String, Callable> {
        &self.callables
    }

    /// The dependency-ordered callable names.
    pub fn dependencies(&self) -> &[String] {
        &self.dependencies
    }

    /// The named schema types used across the bundle.
    pub fn type_aliases(&self) -> &IndexMap<String, Type> {
        &self.type_aliases
    }
}
