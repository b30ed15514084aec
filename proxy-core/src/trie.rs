//! Host-label trie used to resolve a `Host` header to a backend.
//!
//! Keys are DNS labels inserted TLD-first (i.e. `reverse(split(host, '.'))`),
//! so that the root's children are top-level domains. A single-label
//! wildcard (`*`) may appear as a child; it matches any one label at that
//! depth and, once entered, keeps matching every remaining label if no more
//! literal children exist (tail-extension).

use std::collections::HashMap;
use std::sync::Arc;

const WILDCARD: &str = "*";

struct Node<T> {
	backend: Option<Arc<T>>,
	children: HashMap<String, Node<T>>,
}

impl<T> Node<T> {
	fn new() -> Self {
		Node {
			backend: None,
			children: HashMap::new(),
		}
	}
}

/// Longest-specific-match trie over reversed DNS labels.
pub struct Matcher<T> {
	root: Node<T>,
}

impl<T> Default for Matcher<T> {
	fn default() -> Self {
		Matcher { root: Node::new() }
	}
}

fn labels(host: &str) -> Vec<&str> {
	let mut parts: Vec<&str> = host.split('.').filter(|s| !s.is_empty()).collect();
	parts.reverse();
	parts
}

impl<T> Matcher<T> {
	pub fn new() -> Self {
		Self::default()
	}

	/// Inserts (or overwrites) the backend reachable via `host`. `host` may
	/// contain a single `*` label, which may appear anywhere but is most
	/// useful as the left-most (most specific) label.
	pub fn insert(&mut self, host: &str, backend: Arc<T>) {
		let mut cur = &mut self.root;
		for label in labels(host) {
			cur = cur
				.children
				.entry(label.to_string())
				.or_insert_with(Node::new);
		}
		if cur.backend.is_some() {
			tracing::warn!(host, "overwriting existing site attached to this host");
		}
		cur.backend = Some(backend);
	}

	/// Resolves `host` (already stripped of any port) to a backend, or
	/// `None` if no site matches.
	pub fn lookup(&self, host: &str) -> Option<Arc<T>> {
		let mut cur = &self.root;
		let mut was_wildcard = false;
		for label in labels(host) {
			if let Some(next) = cur.children.get(label) {
				cur = next;
				was_wildcard = false;
			} else if let Some(next) = cur.children.get(WILDCARD) {
				cur = next;
				was_wildcard = true;
			} else if was_wildcard {
				continue;
			} else {
				break;
			}
		}
		cur.backend.clone()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn build(hosts: &[&str]) -> Matcher<&'static str> {
		let mut m = Matcher::new();
		for (i, h) in hosts.iter().enumerate() {
			// leak so the &'static str lives long enough for the test
			let label: &'static str = Box::leak(format!("backend-{i}").into_boxed_str());
			m.insert(h, Arc::new(label));
		}
		m
	}

	#[test]
	fn exact_beats_wildcard() {
		let m = build(&["a.b.c", "*.b.c"]);
		assert_eq!(m.lookup("a.b.c").as_deref(), Some(&"backend-0"));
		assert_eq!(m.lookup("x.b.c").as_deref(), Some(&"backend-1"));
	}

	#[test]
	fn wildcard_tail_absorbs() {
		let m = build(&["*.example.com"]);
		assert!(m.lookup("x.y.example.com").is_some());
		assert!(m.lookup("example.com").is_none());
	}

	#[test]
	fn no_cross_branch() {
		let m = build(&["a.example.com"]);
		assert!(m.lookup("a.example.com").is_some());
		assert!(m.lookup("b.example.com").is_none());
	}

	#[test]
	fn unknown_host_is_none() {
		let m: Matcher<&'static str> = Matcher::new();
		assert!(m.lookup("anything.test").is_none());
	}

	#[test]
	fn overwrite_keeps_latest() {
		let mut m = Matcher::new();
		m.insert("dup.test", Arc::new("first"));
		m.insert("dup.test", Arc::new("second"));
		assert_eq!(m.lookup("dup.test").as_deref(), Some(&"second"));
	}
}
