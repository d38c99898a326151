//! Mapping semantics over attribute sets.
//!
//! Keys are formatted attrpath segments (a quoted segment keeps its
//! quotes). Single-key operations replace in place, append at the end,
//! and error on attrpath-root conflicts. Dotted walks preserve the
//! existing layout: an attrpath binding is extended with attrpath
//! bindings, a brace-nested set with brace nesting, and neither form is
//! ever converted into the other.

use crate::expr::{AttributeSet, Binding, Expr, SetItem};
use crate::render::set_is_multiline;
use crate::trivia::Trivia;
use crate::ManipulatorError;

impl AttributeSet {
    /// Bindings in source order.
    pub fn bindings(&self) -> impl Iterator<Item = &Binding> {
        self.values.iter().filter_map(SetItem::as_binding)
    }

    /// Index of the binding whose full path equals `segments`.
    fn find_exact(&self, segments: &[String]) -> Option<usize> {
        self.values
            .iter()
            .position(|item| matches!(item, SetItem::Binding(b) if b.path == segments))
    }

    /// True when an attrpath-form binding starts with `key`.
    pub(crate) fn has_attrpath_root(&self, key: &str) -> bool {
        self.bindings().any(|b| b.nested() && b.name() == key)
    }

    /// Value of the binding for `key`, which may be a dotted path. Returns
    /// a detached expression: the bound value is cloned, and a path that
    /// names an attrpath root (`foo` in `foo.bar = 1;`) yields the merged
    /// nested-set view of its bindings.
    pub fn get(&self, key: &str) -> Result<Expr, ManipulatorError> {
        let segments = crate::lower::bindings::split_attrpath(key)
            .map_err(ManipulatorError::InvalidSegment)?;
        self.get_path(&segments)
    }

    pub(crate) fn get_path(&self, segments: &[String]) -> Result<Expr, ManipulatorError> {
        if let Some(index) = self.find_exact(segments) {
            match &self.values[index] {
                SetItem::Binding(binding) => return Ok(binding.value.clone()),
                SetItem::Inherit(_) => unreachable!("find_exact only matches bindings"),
            }
        }
        for prefix_len in (1..segments.len()).rev() {
            if let Some(index) = self.find_exact(&segments[..prefix_len]) {
                let binding = self.values[index]
                    .as_binding()
                    .expect("find_exact only matches bindings");
                let inner = binding.value.as_attr_set().ok_or_else(|| {
                    ManipulatorError::AttrPathConflict(format!(
                        "{} does not point to an attribute set",
                        segments[..prefix_len].join(".")
                    ))
                })?;
                return inner.get_path(&segments[prefix_len..]);
            }
        }

        // Attrpath bindings extending the requested path are semantically a
        // nested set bound to it; merge them into that view.
        let extensions: Vec<&Binding> = self
            .bindings()
            .filter(|binding| {
                binding.path.len() > segments.len() && binding.path[..segments.len()] == *segments
            })
            .collect();
        if !extensions.is_empty() {
            let values = extensions
                .into_iter()
                .map(|binding| {
                    SetItem::Binding(Binding::with_path(
                        binding.path[segments.len()..].to_vec(),
                        binding.value.clone(),
                    ))
                })
                .collect();
            return Ok(Expr::new(crate::expr::ExprKind::AttrSet(AttributeSet::new(
                values,
            ))));
        }

        Err(ManipulatorError::KeyMissing(segments.join(".")))
    }

    /// True when the path resolves to a concrete binding, by exact match or
    /// brace-nested descent. Attrpath roots do not count: they only exist
    /// as a merged view.
    pub(crate) fn has_concrete_path(&self, segments: &[String]) -> bool {
        if self.find_exact(segments).is_some() {
            return true;
        }
        for prefix_len in (1..segments.len()).rev() {
            if let Some(index) = self.find_exact(&segments[..prefix_len]) {
                let binding = self.values[index]
                    .as_binding()
                    .expect("find_exact only matches bindings");
                return match binding.value.as_attr_set() {
                    Some(inner) => inner.has_concrete_path(&segments[prefix_len..]),
                    None => false,
                };
            }
        }
        false
    }

    /// Replace the value bound to `key`, or append a new binding. Trivia
    /// on an existing binding is preserved; trivia on the old value goes
    /// with it.
    pub fn set(&mut self, key: &str, value: impl Into<Expr>) -> Result<(), ManipulatorError> {
        let value = value.into();
        let segments = vec![key.to_string()];
        if let Some(index) = self.find_exact(&segments) {
            let binding = self.values[index]
                .as_binding_mut()
                .expect("find_exact only matches bindings");
            binding.value = value;
            return Ok(());
        }
        if self.has_attrpath_root(key) {
            return Err(ManipulatorError::AttrPathConflict(format!(
                "cannot overwrite attrpath-derived binding: {key}"
            )));
        }
        self.append_binding(Binding::new(key, value));
        Ok(())
    }

    /// Detach the binding for `key`.
    pub fn remove(&mut self, key: &str) -> Result<(), ManipulatorError> {
        let segments = vec![key.to_string()];
        match self.find_exact(&segments) {
            Some(index) => {
                self.values.remove(index);
                Ok(())
            }
            None => Err(ManipulatorError::KeyMissing(key.to_string())),
        }
    }

    pub(crate) fn append_binding(&mut self, mut binding: Binding) {
        // New bindings in a multiline container start on their own line.
        if set_is_multiline(self) && binding.before.is_empty() {
            binding.before.push(Trivia::LineBreak);
        }
        self.values.push(SetItem::Binding(binding));
    }

    /// Dotted-path assignment. Walks existing structure, keeping attrpath
    /// form for attrpath roots and brace nesting for brace sets, creating
    /// whatever is missing in the style of its surroundings.
    pub(crate) fn set_path(
        &mut self,
        segments: &[String],
        value: Expr,
    ) -> Result<(), ManipulatorError> {
        if segments.is_empty() {
            return Err(ManipulatorError::InvalidSegment("empty path".to_string()));
        }

        if let Some(index) = self.find_exact(segments) {
            let binding = self.values[index]
                .as_binding_mut()
                .expect("find_exact only matches bindings");
            binding.value = value;
            return Ok(());
        }

        if segments.len() == 1 {
            return self.set(&segments[0], value);
        }

        // Assigning onto the interior of a longer attrpath binding would
        // clobber it.
        let shadowed = self.bindings().any(|binding| {
            binding.path.len() > segments.len() && binding.path[..segments.len()] == *segments
        });
        if shadowed {
            return Err(ManipulatorError::AttrPathConflict(format!(
                "a longer attrpath extends {}",
                segments.join(".")
            )));
        }

        // Longest existing prefix wins: descend into its value.
        for prefix_len in (1..segments.len()).rev() {
            if let Some(index) = self.find_exact(&segments[..prefix_len]) {
                let binding = self.values[index]
                    .as_binding_mut()
                    .expect("find_exact only matches bindings");
                let inner = binding.value.as_attr_set_mut().ok_or_else(|| {
                    ManipulatorError::AttrPathConflict(format!(
                        "{} does not point to an attribute set",
                        segments[..prefix_len].join(".")
                    ))
                })?;
                return inner.set_path(&segments[prefix_len..], value);
            }
        }

        if self.has_attrpath_root(&segments[0]) {
            // Extend the existing attrpath family in the same style.
            self.append_binding(Binding::with_path(segments.to_vec(), value));
            return Ok(());
        }

        // No structure yet: create brace-nested intermediates.
        let multiline = self.multiline;
        let mut intermediate = AttributeSet::new(Vec::new());
        intermediate.multiline = multiline;
        intermediate.set_path(&segments[1..], value)?;
        self.append_binding(Binding::new(
            segments[0].clone(),
            Expr::new(crate::expr::ExprKind::AttrSet(intermediate)),
        ));
        Ok(())
    }

    /// Dotted-path removal.
    pub(crate) fn remove_path(&mut self, segments: &[String]) -> Result<(), ManipulatorError> {
        if segments.is_empty() {
            return Err(ManipulatorError::InvalidSegment("empty path".to_string()));
        }

        if let Some(index) = self.find_exact(segments) {
            self.values.remove(index);
            return Ok(());
        }

        if segments.len() == 1 {
            return Err(ManipulatorError::KeyMissing(segments[0].clone()));
        }

        for prefix_len in (1..segments.len()).rev() {
            if let Some(index) = self.find_exact(&segments[..prefix_len]) {
                let binding = self.values[index]
                    .as_binding_mut()
                    .expect("find_exact only matches bindings");
                let inner = binding.value.as_attr_set_mut().ok_or_else(|| {
                    ManipulatorError::AttrPathConflict(format!(
                        "{} does not point to an attribute set",
                        segments[..prefix_len].join(".")
                    ))
                })?;
                return inner.remove_path(&segments[prefix_len..]);
            }
        }

        Err(ManipulatorError::KeyMissing(segments.join(".")))
    }
}

#[cfg(test)]
mod tests {
    use crate::parse;

    #[test]
    fn get_reads_nested_and_attrpath_bindings() {
        let source = parse("{ foo = { bar = 1; }; baz.qux = 2; }").unwrap();
        let expr = source.expr.as_ref().unwrap();
        let set = expr.as_attr_set().unwrap();
        assert_eq!(set.get("foo.bar").unwrap().rebuild(), "1");
        assert_eq!(set.get("baz.qux").unwrap().rebuild(), "2");
        assert!(set.get("missing").is_err());
    }

    #[test]
    fn get_merges_attrpath_roots_into_a_nested_view() {
        let source = parse("{ foo.bar = 1; foo.baz = 2; }").unwrap();
        let expr = source.expr.as_ref().unwrap();
        let set = expr.as_attr_set().unwrap();
        assert_eq!(
            set.get("foo").unwrap().rebuild(),
            "{\n  bar = 1;\n  baz = 2;\n}"
        );
    }

    #[test]
    fn get_merges_partial_attrpath_prefixes() {
        let source = parse("{ foo.bar.baz = 1; }").unwrap();
        let expr = source.expr.as_ref().unwrap();
        let set = expr.as_attr_set().unwrap();
        assert_eq!(set.get("foo.bar").unwrap().rebuild(), "{ baz = 1; }");
    }

    #[test]
    fn set_appends_in_source_order() {
        let mut source = parse("{ a = 1; }").unwrap();
        let set = source.expr.as_mut().unwrap().as_attr_set_mut().unwrap();
        set.set("b", 2).unwrap();
        let names: Vec<&str> = set.bindings().map(|b| b.name()).collect();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[test]
    fn overwriting_an_attrpath_root_is_rejected() {
        let mut source = parse("{ foo.bar = 1; }").unwrap();
        let set = source.expr.as_mut().unwrap().as_attr_set_mut().unwrap();
        assert!(set.set("foo", 2).is_err());
    }
}
