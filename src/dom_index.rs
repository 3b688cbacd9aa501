use scraper::{ElementRef, Html};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Absolute, tag-indexed element address such as `/html/body/div[2]/span`.
///
/// A step carries a 1-based `[n]` only when its parent has more than one
/// child element with the same tag name, so structurally equivalent
/// documents produce identical paths.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StructuralPath(String);

impl StructuralPath {
    pub fn new(path: impl Into<String>) -> Self {
        Self(path.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn child(&self, tag: &str, position: Option<usize>) -> Self {
        match position {
            Some(n) => Self(format!("{}/{}[{}]", self.0, tag, n)),
            None => Self(format!("{}/{}", self.0, tag)),
        }
    }
}

impl fmt::Display for StructuralPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Class tokens of one element in attribute order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClassSet(Vec<String>);

impl ClassSet {
    /// Splits a raw `class` attribute on whitespace. Returns `None` when the
    /// attribute holds no tokens.
    pub fn parse(raw: &str) -> Option<Self> {
        let tokens: Vec<String> = raw.split_whitespace().map(str::to_string).collect();
        if tokens.is_empty() {
            None
        } else {
            Some(Self(tokens))
        }
    }

    pub fn tokens(&self) -> &[String] {
        &self.0
    }

    /// The single-space-joined form that selector rules store and drift
    /// detection compares.
    pub fn joined(&self) -> String {
        self.0.join(" ")
    }
}

impl fmt::Display for ClassSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.joined())
    }
}

/// Map from structural path to class list for every classed element of a
/// document, iterable in document order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DomIndex {
    order: Vec<StructuralPath>,
    classes: HashMap<StructuralPath, ClassSet>,
}

impl DomIndex {
    pub fn from_html(html: &str) -> Self {
        Self::build(&Html::parse_document(html))
    }

    pub fn build(document: &Html) -> Self {
        let mut index = DomIndex::default();

        let root = document.root_element();
        let root_path = StructuralPath(format!("/{}", root.value().name()));
        let mut stack: Vec<(ElementRef, StructuralPath)> = vec![(root, root_path)];

        while let Some((element, path)) = stack.pop() {
            let children: Vec<ElementRef> = element.children().filter_map(ElementRef::wrap).collect();

            let mut totals: HashMap<&str, usize> = HashMap::new();
            for child in &children {
                *totals.entry(child.value().name()).or_default() += 1;
            }

            let mut seen: HashMap<&str, usize> = HashMap::new();
            let mut child_paths = Vec::with_capacity(children.len());
            for child in &children {
                let name = child.value().name();
                let position = seen.entry(name).or_default();
                *position += 1;
                let index_in_parent = (totals[name] > 1).then_some(*position);
                child_paths.push((*child, path.child(name, index_in_parent)));
            }

            if let Some(class_set) = element.value().attr("class").and_then(ClassSet::parse) {
                index.order.push(path.clone());
                index.classes.insert(path, class_set);
            }

            // Reverse so the first child is popped next, keeping document order.
            stack.extend(child_paths.into_iter().rev());
        }

        index
    }

    pub fn get(&self, path: &StructuralPath) -> Option<&ClassSet> {
        self.classes.get(path)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&StructuralPath, &ClassSet)> {
        self.order.iter().map(move |path| (path, &self.classes[path]))
    }
}
