//! Header map with case-insensitive name lookup.

/// An order-preserving, case-insensitive, multi-value header map.
///
/// Carriage returns and line feeds are dropped from names and values on
/// insertion, so a stored header always serializes to a single line.
///
/// # Examples
///
/// ```
/// use lithe::http::Headers;
///
/// let mut headers = Headers::new();
/// headers.append("Set-Cookie", "a=1");
/// headers.append("Set-Cookie", "b=2");
/// headers.set("content-type", "application/json");
///
/// assert_eq!(headers.get("Content-Type"), Some("application/json"));
/// assert_eq!(headers.get_all("set-cookie").count(), 2);
/// ```
#[derive(Debug, Clone, Default)]
pub struct Headers {
    inner: Vec<(String, String)>,
}

impl Headers {
    /// Creates an empty header map.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Vec::with_capacity(capacity),
        }
    }

    /// Appends an entry, keeping any existing values for the same name.
    pub fn append(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.inner.push((single_line(name.into()), single_line(value.into())));
    }

    /// Replaces every entry for `name` with a single value.
    ///
    /// The first existing entry keeps its position so serialized header order
    /// stays stable.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = single_line(name.into());
        let value = single_line(value.into());
        match self
            .inner
            .iter()
            .position(|(k, _)| k.eq_ignore_ascii_case(&name))
        {
            Some(index) => {
                self.inner[index].1 = value;
                let mut seen = 0usize;
                self.inner.retain(|(k, _)| {
                    if k.eq_ignore_ascii_case(&name) {
                        seen += 1;
                        seen == 1
                    } else {
                        true
                    }
                });
            }
            None => self.inner.push((name, value)),
        }
    }

    /// Returns the first value for `name`, if any.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.inner
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Returns every value stored under `name`, in insertion order.
    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.inner
            .iter()
            .filter(move |(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Removes all entries for `name`. Returns `true` if anything was removed.
    pub fn remove(&mut self, name: &str) -> bool {
        let before = self.inner.len();
        self.inner.retain(|(k, _)| !k.eq_ignore_ascii_case(name));
        self.inner.len() < before
    }

    pub fn contains(&self, name: &str) -> bool {
        self.inner.iter().any(|(k, _)| k.eq_ignore_ascii_case(name))
    }

    /// Number of entries (not unique names).
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.inner.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

fn single_line(mut text: String) -> String {
    if text.contains(['\r', '\n']) {
        text.retain(|c| c != '\r' && c != '\n');
    }
    text
}
