use std::borrow::Borrow;
use std::fmt::{Display, Formatter};
use std::sync::Arc;

/// Identifier of catalog objects, e.g. table names.
///
/// Names are compared by value, so a deep copy or a name assembled from pieces equals the
/// directly constructed one.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Name(Arc<str>);

impl Name {
    pub fn new<S: AsRef<str>>(name: S) -> Self {
        Self(Arc::from(name.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Copies the underlying buffer instead of sharing it.
    pub fn deep_copy(&self) -> Self {
        Self(Arc::from(String::from(&*self.0)))
    }

    pub fn concat(&self, other: &Name) -> Self {
        let mut buf = String::with_capacity(self.0.len() + other.0.len());
        buf.push_str(&self.0);
        buf.push_str(&other.0);
        Self::new(buf)
    }

    pub(crate) fn shares_buffer_with(&self, other: &Name) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Display for Name {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Name {
    fn from(s: &str) -> Self {
        Name::new(s)
    }
}

impl From<String> for Name {
    fn from(s: String) -> Self {
        Self(Arc::from(s))
    }
}

impl AsRef<str> for Name {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for Name {
    fn borrow(&self) -> &str {
        &self.0
    }
}
