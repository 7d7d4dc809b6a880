//! Style accumulation for one serialization pass.

use std::collections::HashMap;

/// Collects the style rules used while serializing a page and hands out
/// class names.
///
/// Class names carry a counter that advances in visit order, so the same
/// traversal always yields the same names. A fresh accumulator is created for
/// every serialization; the client rebuilds the same sequence on hydration.
#[derive(Debug, Default)]
pub struct StyleAccumulator {
    next_id: u32,
    classes: HashMap<String, String>,
    rules: Vec<String>,
}

impl StyleAccumulator {
    /// Create an empty accumulator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Class name for the style sheet `name`, registering `declarations` on
    /// first use.
    pub fn class_for(&mut self, name: &str, declarations: &str) -> String {
        if let Some(class) = self.classes.get(name) {
            return class.clone();
        }

        self.next_id += 1;
        let class = format!("{}-{}", name, self.next_id);
        self.rules.push(format!(".{} {{ {} }}", class, declarations.trim()));
        self.classes.insert(name.to_string(), class.clone());
        class
    }

    /// Number of registered style sheets.
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// Check if no styles were registered.
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Collected CSS in registration order.
    pub fn to_css(&self) -> String {
        self.rules.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_follow_visit_order() {
        let mut styles = StyleAccumulator::new();
        assert_eq!(styles.class_for("Header", "color: red;"), "Header-1");
        assert_eq!(styles.class_for("PostBody", "margin: 0;"), "PostBody-2");
        assert_eq!(styles.class_for("Header", "ignored"), "Header-1");

        assert_eq!(styles.len(), 2);
        assert_eq!(
            styles.to_css(),
            ".Header-1 { color: red; }\n.PostBody-2 { margin: 0; }"
        );
    }

    #[test]
    fn test_fresh_accumulators_agree() {
        let visit = |styles: &mut StyleAccumulator| {
            vec![
                styles.class_for("A", "x: 1;"),
                styles.class_for("B", "y: 2;"),
            ]
        };

        let mut first = StyleAccumulator::new();
        let mut second = StyleAccumulator::new();
        assert_eq!(visit(&mut first), visit(&mut second));
        assert_eq!(first.to_css(), second.to_css());
    }
}
