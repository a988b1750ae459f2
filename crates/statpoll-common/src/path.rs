/// Replaces every character that is not ASCII alphanumeric or `_` with `_`.
///
/// Applied to free-text components such as interface descriptions.
///
/// # Examples
///
/// ```
/// use statpoll_common::path::sanitize_component;
///
/// assert_eq!(sanitize_component("Gi0/1.100"), "Gi0_1_100");
/// assert_eq!(sanitize_component("eth0"), "eth0");
/// ```
pub fn sanitize_component(raw: &str) -> String {
    raw.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect()
}

/// Builds dot-delimited output paths: `prefix.source.sub_path.name`.
///
/// Empty components are skipped, so a collector without a sub-path does not
/// produce `..` in its output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricPath {
    prefix: String,
    source: String,
    sub_path: String,
}

impl MetricPath {
    pub fn new(
        prefix: impl Into<String>,
        source: impl Into<String>,
        sub_path: impl Into<String>,
    ) -> Self {
        Self {
            prefix: prefix.into(),
            source: source.into(),
            sub_path: sub_path.into(),
        }
    }

    /// The fixed `prefix.source.sub_path` part shared by all samples.
    pub fn base(&self) -> String {
        join_non_empty([
            self.prefix.as_str(),
            self.source.as_str(),
            self.sub_path.as_str(),
        ])
    }

    pub fn join(&self, name: &str) -> String {
        join_non_empty([
            self.prefix.as_str(),
            self.source.as_str(),
            self.sub_path.as_str(),
            name,
        ])
    }
}

fn join_non_empty<'a>(parts: impl IntoIterator<Item = &'a str>) -> String {
    parts
        .into_iter()
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join(".")
}
