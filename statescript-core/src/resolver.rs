//! Variable resolution.
//!
//! String leaves in conditions and action operands are references into the
//! session context, the machine constants, or the element currently bound by
//! an `$any`/`$all`/`$inarray` loop. How a reference string maps onto those
//! values is a pluggable [`VariableResolver`]; [`PathResolver`] is the
//! default.
//!
//! Default reference syntax:
//!
//! - `$Player.hp` - context path
//! - `#Limits.max` - constants path
//! - `@` / `@.score` - the innermost iterated element
//! - `@1.score` - the element bound at loop depth 1 (outermost)
//! - `Player.hp` - context first, then constants; a literal string when
//!   neither has it
//!
//! Path segments are separated by dots. Numeric segments index arrays.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// The values a reference can see during one evaluation.
#[derive(Debug)]
pub struct Scope<'a> {
    /// Mutable session state (read-only while evaluating).
    pub context: &'a Value,
    /// Read-only machine constants.
    pub constants: &'a Value,
    /// Elements bound by enclosing array operators, outermost first.
    items: Vec<Value>,
}

impl<'a> Scope<'a> {
    /// Creates a scope over a context and constants.
    pub fn new(context: &'a Value, constants: &'a Value) -> Self {
        Self {
            context,
            constants,
            items: Vec::new(),
        }
    }

    /// Returns the element bound at the given loop depth (1-based).
    pub fn item(&self, depth: usize) -> Option<&Value> {
        depth.checked_sub(1).and_then(|i| self.items.get(i))
    }

    /// Returns all bound elements, outermost first.
    pub fn items(&self) -> &[Value] {
        &self.items
    }

    pub(crate) fn push_item(&mut self, item: Value) {
        self.items.push(item);
    }

    pub(crate) fn pop_item(&mut self) {
        self.items.pop();
    }
}

/// Resolves reference strings to values and commits values back.
pub trait VariableResolver {
    /// Resolves `reference` in `scope`.
    ///
    /// `loop_depth` is the number of enclosing array operators. When
    /// `for_write` is true the caller wants the current value of a mutation
    /// target, so literal fallbacks must not be produced. `None` means the
    /// reference is unbound.
    fn resolve(
        &self,
        reference: &str,
        scope: &Scope<'_>,
        loop_depth: usize,
        for_write: bool,
    ) -> Option<Value>;

    /// Writes `value` at `reference` inside `context`.
    ///
    /// Returns false when the reference cannot be written.
    fn write_back(&self, context: &mut Value, reference: &str, value: Value) -> bool;
}

/// Options for [`PathResolver`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverOptions {
    /// Prefix selecting the context explicitly.
    pub context_marker: char,
    /// Prefix selecting the constants.
    pub constants_marker: char,
    /// Prefix selecting an iterated element.
    pub item_marker: char,
    /// Whether unbound bare references evaluate to themselves as strings.
    pub literal_fallback: bool,
}

impl Default for ResolverOptions {
    fn default() -> Self {
        Self {
            context_marker: '$',
            constants_marker: '#',
            item_marker: '@',
            literal_fallback: true,
        }
    }
}

/// Dotted-path resolver over context, constants and loop elements.
#[derive(Debug, Clone, Default)]
pub struct PathResolver {
    options: ResolverOptions,
}

impl PathResolver {
    pub fn new(options: ResolverOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &ResolverOptions {
        &self.options
    }

    fn lookup<'s>(
        &self,
        reference: &str,
        scope: &'s Scope<'_>,
        loop_depth: usize,
    ) -> Option<&'s Value> {
        if reference.is_empty() {
            return None;
        }

        if let Some(rest) = reference.strip_prefix(self.options.item_marker) {
            let (depth, path) = split_item_reference(rest, loop_depth)?;
            return walk(scope.item(depth)?, path);
        }

        if let Some(path) = reference.strip_prefix(self.options.context_marker) {
            return walk(scope.context, path);
        }

        if let Some(path) = reference.strip_prefix(self.options.constants_marker) {
            return walk(scope.constants, path);
        }

        walk(scope.context, reference).or_else(|| walk(scope.constants, reference))
    }
}

impl VariableResolver for PathResolver {
    fn resolve(
        &self,
        reference: &str,
        scope: &Scope<'_>,
        loop_depth: usize,
        for_write: bool,
    ) -> Option<Value> {
        match self.lookup(reference, scope, loop_depth) {
            Some(value) => Some(value.clone()),
            None if !for_write && self.options.literal_fallback => {
                Some(Value::String(reference.to_string()))
            }
            None => None,
        }
    }

    fn write_back(&self, context: &mut Value, reference: &str, value: Value) -> bool {
        if reference.starts_with(self.options.constants_marker)
            || reference.starts_with(self.options.item_marker)
        {
            return false;
        }

        let path = reference
            .strip_prefix(self.options.context_marker)
            .unwrap_or(reference);
        if path.is_empty() {
            return false;
        }

        let segments: Vec<&str> = path.split('.').collect();
        write_path(context, &segments, value)
    }
}

/// Splits `2.score` into (2, "score"); a missing depth means the innermost.
fn split_item_reference(rest: &str, loop_depth: usize) -> Option<(usize, &str)> {
    let digits = rest.chars().take_while(|c| c.is_ascii_digit()).count();
    let depth = if digits == 0 {
        loop_depth
    } else {
        rest[..digits].parse().ok()?
    };

    let tail = &rest[digits..];
    let path = if tail.is_empty() {
        tail
    } else {
        tail.strip_prefix('.')?
    };
    Some((depth, path))
}

fn walk<'v>(root: &'v Value, path: &str) -> Option<&'v Value> {
    if path.is_empty() {
        return Some(root);
    }

    let mut current = root;
    for segment in path.split('.') {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

fn write_path(target: &mut Value, segments: &[&str], value: Value) -> bool {
    let Some((head, rest)) = segments.split_first() else {
        *target = value;
        return true;
    };
    if head.is_empty() {
        return false;
    }

    match target {
        Value::Object(map) => {
            let next = map.entry(head.to_string()).or_insert(Value::Null);
            if next.is_null() && !rest.is_empty() {
                *next = Value::Object(Map::new());
            }
            write_path(next, rest, value)
        }
        Value::Array(items) => {
            let Ok(index) = head.parse::<usize>() else {
                return false;
            };
            if rest.is_empty() && index == items.len() {
                items.push(value);
                return true;
            }
            match items.get_mut(index) {
                Some(next) => write_path(next, rest, value),
                None => false,
            }
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn resolver() -> PathResolver {
        PathResolver::default()
    }

    #[test]
    fn test_context_and_constants() {
        let ctx = json!({"Player": {"hp": 10}, "Shared": 1});
        let constants = json!({"MaxHp": 20, "Shared": 2});
        let scope = Scope::new(&ctx, &constants);
        let r = resolver();

        assert_eq!(r.resolve("Player.hp", &scope, 0, false), Some(json!(10)));
        assert_eq!(r.resolve("$Player.hp", &scope, 0, false), Some(json!(10)));
        assert_eq!(r.resolve("MaxHp", &scope, 0, false), Some(json!(20)));
        assert_eq!(r.resolve("#MaxHp", &scope, 0, false), Some(json!(20)));
        // Context shadows constants for bare references.
        assert_eq!(r.resolve("Shared", &scope, 0, false), Some(json!(1)));
        assert_eq!(r.resolve("#Shared", &scope, 0, false), Some(json!(2)));
    }

    #[test]
    fn test_literal_fallback() {
        let ctx = json!({});
        let constants = json!({});
        let scope = Scope::new(&ctx, &constants);
        let r = resolver();

        assert_eq!(r.resolve("Idle", &scope, 0, false), Some(json!("Idle")));
        assert_eq!(r.resolve("Idle", &scope, 0, true), None);

        let strict = PathResolver::new(ResolverOptions {
            literal_fallback: false,
            ..Default::default()
        });
        assert_eq!(strict.resolve("Idle", &scope, 0, false), None);
    }

    #[test]
    fn test_array_index_segments() {
        let ctx = json!({"Team": [{"name": "a"}, {"name": "b"}]});
        let constants = json!({});
        let scope = Scope::new(&ctx, &constants);

        assert_eq!(
            resolver().resolve("Team.1.name", &scope, 0, true),
            Some(json!("b"))
        );
        assert_eq!(resolver().resolve("Team.5.name", &scope, 0, true), None);
    }

    #[test]
    fn test_item_references() {
        let ctx = json!({});
        let constants = json!({});
        let mut scope = Scope::new(&ctx, &constants);
        scope.push_item(json!({"id": 1}));
        scope.push_item(json!({"id": 2}));
        let r = resolver();

        assert_eq!(r.resolve("@.id", &scope, 2, true), Some(json!(2)));
        assert_eq!(r.resolve("@1.id", &scope, 2, true), Some(json!(1)));
        assert_eq!(r.resolve("@", &scope, 2, true), Some(json!({"id": 2})));
        assert_eq!(r.resolve("@3", &scope, 2, true), None);

        scope.pop_item();
        assert_eq!(r.resolve("@.id", &scope, 1, true), Some(json!(1)));
    }

    #[test]
    fn test_write_back() {
        let r = resolver();
        let mut ctx = json!({"Player": {"hp": 10}, "List": [1, 2]});

        assert!(r.write_back(&mut ctx, "Player.hp", json!(7)));
        assert!(r.write_back(&mut ctx, "$Score", json!(3)));
        assert!(r.write_back(&mut ctx, "Deep.nested.value", json!(true)));
        assert!(r.write_back(&mut ctx, "List.2", json!(3)));
        assert!(!r.write_back(&mut ctx, "List.9", json!(3)));
        assert!(!r.write_back(&mut ctx, "#MaxHp", json!(1)));
        assert!(!r.write_back(&mut ctx, "@.id", json!(1)));
        assert!(!r.write_back(&mut ctx, "Player.hp.inner", json!(1)));

        assert_eq!(
            ctx,
            json!({
                "Player": {"hp": 7},
                "List": [1, 2, 3],
                "Score": 3,
                "Deep": {"nested": {"value": true}}
            })
        );
    }
}
