use std::collections::BTreeSet;

/// Chooses which child the main branch descends into at a node.
///
/// The child on the path to the current node wins; otherwise the last child
/// in insertion order, which is the one the app shows after an edit or
/// regeneration.
#[must_use]
pub fn select_branch_child<'a>(
    children: &'a [String],
    current_path: &BTreeSet<&str>,
) -> Option<&'a str> {
    children
        .iter()
        .find(|child| current_path.contains(child.as_str()))
        .or_else(|| children.last())
        .map(String::as_str)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn children() -> Vec<String> {
        vec!["A".to_string(), "B".to_string(), "C".to_string()]
    }

    #[test]
    fn follows_the_child_on_the_current_path() {
        let children = children();
        let path = BTreeSet::from(["root", "B", "leaf"]);
        assert_eq!(select_branch_child(&children, &path), Some("B"));
    }

    #[test]
    fn falls_back_to_the_last_child() {
        let children = children();
        assert_eq!(select_branch_child(&children, &BTreeSet::new()), Some("C"));
    }

    #[test]
    fn leaf_has_no_branch() {
        assert_eq!(select_branch_child(&[], &BTreeSet::from(["A"])), None);
    }
}
