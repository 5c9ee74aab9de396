//! Label handling for the generated workspace.
//!
//! Labels authored against the primary source tree (`//pkg:name`) are not
//! valid as-is inside the synthetic workspace the bridge generates; they must
//! be qualified with the external-repository alias under which the source tree
//! is linked. [`canonicalize_label`] performs that rewrite, and every piece of
//! generated text goes through it.

/// Repository alias under which the primary source tree is linked into the
/// generated workspace (via `local_repository`).
pub const SOURCE_REPO: &str = "@srctree";

/// Rewrite a source-tree label into its cross-repository form.
///
/// `//foo/bar:baz` becomes `@srctree//foo/bar:baz`, and a bare name such as
/// `baz` becomes `@srctree//baz`. Labels already qualified with a repository
/// are passed through unchanged.
pub fn canonicalize_label(label: &str) -> String {
    if label.starts_with('@') {
        label.to_string()
    } else if label.starts_with("//") {
        format!("{}{}", SOURCE_REPO, label)
    } else {
        format!("{}//{}", SOURCE_REPO, label)
    }
}

/// A single target label.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Label {
    pub label: String,
}

impl Label {
    pub fn new(label: impl Into<String>) -> Self {
        Label {
            label: label.into(),
        }
    }
}

/// A label-list attribute value: labels to include plus labels carving out an
/// excluded scope.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelList {
    pub includes: Vec<Label>,
    pub excludes: Vec<Label>,
}

impl LabelList {
    /// Append both fields of `other` onto the corresponding fields of `self`.
    pub fn append(&mut self, other: LabelList) {
        self.includes.extend(other.includes);
        self.excludes.extend(other.excludes);
    }

    /// Return a copy with each field sorted and deduplicated.
    pub fn uniqued(&self) -> LabelList {
        LabelList {
            includes: unique_sorted(&self.includes),
            excludes: unique_sorted(&self.excludes),
        }
    }
}

fn unique_sorted(labels: &[Label]) -> Vec<Label> {
    let mut out = labels.to_vec();
    out.sort();
    out.dedup();
    out
}
