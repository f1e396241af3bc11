use std::fmt;

/// Address of a node in the remote tree, as an ordered list of segments.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct TreePath {
    segments: Vec<String>,
}

impl TreePath {
    pub fn root() -> Self {
        Self::default()
    }

    pub fn child(mut self, segment: impl Into<String>) -> Self {
        self.push(segment);
        self
    }

    pub fn push(&mut self, segment: impl Into<String>) {
        let segment = segment.into();
        debug_assert!(!segment.is_empty(), "tree path segments must be non-empty");
        self.segments.push(segment);
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn starts_with(&self, prefix: &TreePath) -> bool {
        self.segments.len() >= prefix.segments.len()
            && self.segments[..prefix.segments.len()] == prefix.segments[..]
    }

    /// True when one path is an ancestor of the other (or they are equal).
    /// A mutation at `self` changes the subtree visible from `other` iff they intersect.
    pub fn intersects(&self, other: &TreePath) -> bool {
        self.starts_with(other) || other.starts_with(self)
    }
}

impl fmt::Display for TreePath {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "{}", self.segments.join("/"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_joins_segments_with_slashes() {
        let path = TreePath::root().child("accounts").child("u1").child("tickets");
        assert_eq!(path.to_string(), "accounts/u1/tickets");
        assert_eq!(TreePath::root().to_string(), "");
    }

    #[test]
    fn intersection_covers_ancestors_and_descendants() {
        let accounts = TreePath::root().child("accounts");
        let ticket = TreePath::root().child("accounts").child("u1").child("tickets").child("t1");
        let other_root = TreePath::root().child("roles");

        assert!(accounts.intersects(&ticket));
        assert!(ticket.intersects(&accounts));
        assert!(ticket.intersects(&ticket));
        assert!(!ticket.intersects(&other_root));
    }
}
