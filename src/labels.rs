use tracing::debug;

use crate::{error::AppError, fetch::RemoteFetcher};

/// Class names index-aligned with the model's output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelSet(Vec<String>);

impl LabelSet {
    /// Parses a newline-delimited class list, keeping non-blank trimmed lines in
    /// order. Returns `None` when nothing is left.
    pub fn parse(text: &str) -> Option<Self> {
        let labels: Vec<String> = text
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(String::from)
            .collect();

        if labels.is_empty() {
            None
        } else {
            Some(LabelSet(labels))
        }
    }

    pub fn get(&self, index: usize) -> Option<&str> {
        self.0.get(index).map(String::as_str)
    }

    // `parse` never builds an empty set.
    #[allow(clippy::len_without_is_empty)]
    pub fn len(&self) -> usize {
        self.0.len()
    }
}

/// Downloads and parses the label file at `url`, if one was given.
pub async fn resolve_labels(
    fetcher: &RemoteFetcher,
    url: Option<&str>,
) -> Result<Option<LabelSet>, AppError> {
    let Some(url) = url else {
        return Ok(None);
    };

    let fetched = fetcher.fetch(url).await?;
    let bytes = tokio::fs::read(fetched.path()).await?;
    let labels = LabelSet::parse(&String::from_utf8_lossy(&bytes));
    debug!(
        "Resolved {} labels from {}",
        labels.as_ref().map_or(0, LabelSet::len),
        url
    );
    Ok(labels)
}

/// Picks the display label for a predicted class index.
///
/// An in-range entry of `labels` wins. Otherwise, when `binary_names` is set
/// and the model name mentions both "cat" and "dog", index 0 is "Cat" and any
/// other index is "Dog". Everything else becomes `class_{index}`.
pub fn label_for(
    index: usize,
    labels: Option<&LabelSet>,
    model_name: &str,
    binary_names: bool,
) -> String {
    if let Some(label) = labels.and_then(|labels| labels.get(index)) {
        return label.to_string();
    }

    let name = model_name.to_lowercase();
    if binary_names && name.contains("cat") && name.contains("dog") {
        return if index == 0 { "Cat" } else { "Dog" }.to_string();
    }

    format!("class_{}", index)
}
