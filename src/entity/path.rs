use std::fmt;

/// Location of a property inside an entity, resolved once when metadata is
/// built. Embedded columns have one segment per nesting level.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PropertyPath(Vec<String>);

impl PropertyPath {
    pub fn new(name: impl Into<String>) -> Self {
        Self(vec![name.into()])
    }

    pub fn parse(dotted: &str) -> Self {
        Self(dotted.split('.').map(str::to_string).collect())
    }

    /// This path nested under the embedded property `prefix`.
    pub fn prefixed(&self, prefix: &PropertyPath) -> Self {
        let mut segments = prefix.0.clone();
        segments.extend(self.0.iter().cloned());
        Self(segments)
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }

    pub fn is_embedded(&self) -> bool {
        self.0.len() > 1
    }
}

impl fmt::Display for PropertyPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.join("."))
    }
}
