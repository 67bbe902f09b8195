use std::fs;
use std::path::Path;

use anyhow::{anyhow, Context, Result};

/// Label used when a class index cannot be resolved or classification fails.
pub const UNKNOWN_LABEL: &str = "Unknown";

/// Ordered class names. Index `i` is the classifier's output `i`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LabelTable {
    labels: Vec<String>,
}

impl LabelTable {
    pub fn from_categories<I, S>(categories: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            labels: categories.into_iter().map(Into::into).collect(),
        }
    }

    /// One label per line. Blank lines and `#` comments are skipped.
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read label file {}", path.display()))?;
        let labels: Vec<String> = raw
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .map(str::to_string)
            .collect();
        if labels.is_empty() {
            return Err(anyhow!("label file {} has no labels", path.display()));
        }
        Ok(Self { labels })
    }

    /// Class order of a training set laid out as one sub-directory per class:
    /// directory names, sorted.
    pub fn from_dataset_dir(path: &Path) -> Result<Self> {
        let mut labels = Vec::new();
        let entries = fs::read_dir(path)
            .with_context(|| format!("failed to list dataset dir {}", path.display()))?;
        for entry in entries {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                labels.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        if labels.is_empty() {
            return Err(anyhow!("dataset dir {} has no class folders", path.display()));
        }
        labels.sort();
        Ok(Self { labels })
    }

    /// Load from a label file or a dataset directory.
    pub fn load(path: &Path) -> Result<Self> {
        if path.is_dir() {
            Self::from_dataset_dir(path)
        } else {
            Self::from_file(path)
        }
    }

    pub fn resolve(&self, index: usize) -> Option<&str> {
        self.labels.get(index).map(String::as_str)
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn out_of_range_index_has_no_label() {
        let table = LabelTable::from_categories(["Recyclable", "Organic"]);
        assert_eq!(table.resolve(1), Some("Organic"));
        assert_eq!(table.resolve(2), None);
    }

    #[test]
    fn label_file_skips_comments() -> Result<()> {
        let mut file = tempfile::NamedTempFile::new()?;
        writeln!(file, "# waste streams")?;
        writeln!(file, "Recyclable")?;
        writeln!(file)?;
        writeln!(file, "  Organic  ")?;
        let table = LabelTable::from_file(file.path())?;
        assert_eq!(table.labels(), ["Recyclable", "Organic"]);
        Ok(())
    }

    #[test]
    fn dataset_dir_orders_class_folders() -> Result<()> {
        let dir = tempfile::tempdir()?;
        for name in ["plastic", "cardboard", "trash"] {
            fs::create_dir(dir.path().join(name))?;
        }
        fs::write(dir.path().join("README"), "not a class")?;
        let table = LabelTable::load(dir.path())?;
        assert_eq!(table.labels(), ["cardboard", "plastic", "trash"]);
        Ok(())
    }
}
