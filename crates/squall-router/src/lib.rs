//! squall-router: Zero-dependency prefix trie HTTP router
//!
//! Single trie shared by every HTTP method: each terminal node carries a
//! method -> value map, so one lookup can answer both "which route handles
//! GET /users/42" and "which routes exist on /users/42 at all".
//!
//! ## Path Syntax
//! - `:name` - Named parameter (captures one segment)
//! - `*` - Wildcard (matches the remainder of the path, captures nothing)
//!
//! ## Priority
//! 1. Exact static match (highest)
//! 2. Parameter match
//! 3. Wildcard match (lowest)
//!
//! Matching backtracks: a static branch whose shape fits the path but whose
//! leaf lacks the requested method falls through to a parameter or wildcard
//! sibling that has it.
//!
//! ## Example
//! ```
//! use squall_router::Router;
//!
//! let mut router = Router::new();
//! router.insert("GET", "/users", 0);
//! router.insert("GET", "/users/:id", 1);
//! router.insert("GET", "/files/*", 2);
//!
//! let m = router.find("GET", "/users/123").unwrap();
//! assert_eq!(*m.value, 1);
//! assert_eq!(m.params, vec![("id".to_string(), "123".to_string())]);
//! ```

use std::collections::{BTreeMap, HashMap};

/// Route match result
#[derive(Debug, Clone, PartialEq)]
pub struct Match<'a, T> {
    /// The matched route value
    pub value: &'a T,
    /// Captured path parameters as (name, value) pairs, in binding order
    pub params: Vec<(String, String)>,
}

impl<T> Match<'_, T> {
    /// Get params as HashMap for convenient access
    ///
    /// Later bindings shadow earlier ones when two positions share a name.
    pub fn params_map(&self) -> HashMap<String, String> {
        self.params.iter().cloned().collect()
    }
}

/// Trie node for path segment matching
#[derive(Debug)]
struct Node<T> {
    /// Static children (key = path segment)
    children: HashMap<String, Node<T>>,
    /// Parameter child (:id)
    param_child: Option<Box<ParamNode<T>>>,
    /// Wildcard child (*)
    wildcard_child: Option<Box<Node<T>>>,
    /// Routes terminating at this node, keyed by HTTP method.
    /// BTreeMap so method enumeration is deterministic.
    routes: BTreeMap<String, T>,
}

impl<T> Default for Node<T> {
    fn default() -> Self {
        Self {
            children: HashMap::new(),
            param_child: None,
            wildcard_child: None,
            routes: BTreeMap::new(),
        }
    }
}

#[derive(Debug)]
struct ParamNode<T> {
    name: String,
    node: Node<T>,
}

/// Prefix trie HTTP router
///
/// One trie for all methods; terminal nodes map method -> value. Inserting
/// the same (method, pattern) twice replaces the stored value.
#[derive(Debug)]
pub struct Router<T> {
    root: Node<T>,
}

impl<T> Default for Router<T> {
    fn default() -> Self {
        Self {
            root: Node::default(),
        }
    }
}

impl<T> Router<T> {
    /// Create a new router
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a route
    ///
    /// # Arguments
    /// * `method` - HTTP method (GET, POST, etc.), case-insensitive
    /// * `path` - URL path with optional params (:id) and a trailing wildcard (*)
    /// * `value` - Route value stored at the terminal node
    ///
    /// Empty segments are dropped, so `/users//` and `/users` register the
    /// same routing key. Segments after a `*` are unreachable and ignored.
    ///
    /// # Example
    /// ```
    /// use squall_router::Router;
    ///
    /// let mut router = Router::new();
    /// router.insert("GET", "/users/:id", 0);
    /// router.insert("POST", "/users", 1);
    /// ```
    pub fn insert(&mut self, method: &str, path: &str, value: T) {
        let method = method.to_uppercase();
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        Self::insert_node(&mut self.root, &segments, method, value);
    }

    fn insert_node(node: &mut Node<T>, segments: &[&str], method: String, value: T) {
        if segments.is_empty() {
            node.routes.insert(method, value);
            return;
        }

        let segment = segments[0];
        let rest = &segments[1..];

        if let Some(name) = segment.strip_prefix(':') {
            // Parameter segment (:id, :userId, etc.)
            // One param slot per node; a later registration with a different
            // name renames the slot (last registration wins).
            match node.param_child {
                Some(ref mut param) => {
                    if param.name != name {
                        param.name = name.to_string();
                    }
                }
                None => {
                    node.param_child = Some(Box::new(ParamNode {
                        name: name.to_string(),
                        node: Node::default(),
                    }));
                }
            }
            let param = node.param_child.as_mut().unwrap();
            Self::insert_node(&mut param.node, rest, method, value);
        } else if segment == "*" {
            // Wildcard segment: terminal, descent stops here
            let wildcard = node
                .wildcard_child
                .get_or_insert_with(|| Box::new(Node::default()));
            wildcard.routes.insert(method, value);
        } else {
            // Static segment
            let child = node.children.entry(segment.to_string()).or_default();
            Self::insert_node(child, rest, method, value);
        }
    }

    /// Find a matching route
    ///
    /// # Arguments
    /// * `method` - HTTP method, case-insensitive
    /// * `path` - URL path to match
    ///
    /// # Returns
    /// `Some(Match)` with the route value and captured params, or `None`.
    /// At most one route is returned for a given (method, path).
    ///
    /// # Example
    /// ```
    /// use squall_router::Router;
    ///
    /// let mut router = Router::new();
    /// router.insert("GET", "/users/:id", 0);
    ///
    /// let m = router.find("GET", "/users/42").unwrap();
    /// assert_eq!(m.params[0], ("id".to_string(), "42".to_string()));
    /// ```
    pub fn find(&self, method: &str, path: &str) -> Option<Match<'_, T>> {
        let method = method.to_uppercase();
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        let mut params = Vec::new();
        Self::find_node(&self.root, &segments, &method, &mut params)
            .map(|value| Match { value, params })
    }

    fn find_node<'a>(
        node: &'a Node<T>,
        segments: &[&str],
        method: &str,
        params: &mut Vec<(String, String)>,
    ) -> Option<&'a T> {
        if segments.is_empty() {
            // May be absent even though the path shape matched; the caller
            // then falls through to lower-precedence siblings.
            return node.routes.get(method);
        }

        let segment = segments[0];
        let rest = &segments[1..];

        // Priority 1: exact static match
        if let Some(child) = node.children.get(segment) {
            if let Some(found) = Self::find_node(child, rest, method, params) {
                return Some(found);
            }
        }

        // Priority 2: parameter match, binding undone on backtrack
        if let Some(ref param) = node.param_child {
            params.push((param.name.clone(), segment.to_string()));
            if let Some(found) = Self::find_node(&param.node, rest, method, params) {
                return Some(found);
            }
            params.pop();
        }

        // Priority 3: wildcard, consumes the remainder unconditionally
        if let Some(ref wildcard) = node.wildcard_child {
            return wildcard.routes.get(method);
        }

        None
    }

    /// Collect every route reachable for a path, across all methods
    ///
    /// Walks every branch whose shape fits the path (static, then param,
    /// then wildcard) and accumulates the stored values in discovery order;
    /// methods at one terminal node come out in sorted method order.
    ///
    /// Used to synthesize OPTIONS responses and to tell "path exists under
    /// another method" apart from "path unknown". Intentionally permissive;
    /// overlapping dynamic branches are all visited.
    pub fn routes_on_path(&self, path: &str) -> Vec<&T> {
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        let mut found = Vec::new();
        Self::collect_node(&self.root, &segments, &mut found);
        found
    }

    fn collect_node<'a>(node: &'a Node<T>, segments: &[&str], found: &mut Vec<&'a T>) {
        if segments.is_empty() {
            found.extend(node.routes.values());
            return;
        }

        let segment = segments[0];
        let rest = &segments[1..];

        if let Some(child) = node.children.get(segment) {
            Self::collect_node(child, rest, found);
        }
        if let Some(ref param) = node.param_child {
            Self::collect_node(&param.node, rest, found);
        }
        if let Some(ref wildcard) = node.wildcard_child {
            found.extend(wildcard.routes.values());
        }
    }
}
