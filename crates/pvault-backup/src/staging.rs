//! In-memory staging of collected files, keyed by resource

use std::collections::BTreeMap;

/// A named blob. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedFile {
    name: String,
    content: Vec<u8>,
}

impl StagedFile {
    pub fn new(name: impl Into<String>, content: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            content,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn content(&self) -> &[u8] {
        &self.content
    }
}

/// `resource id -> ordered files`. Resources iterate in id order; files in
/// insertion order.
///
/// Not synchronized; concurrent writers wrap it in a `tokio::sync::Mutex`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StagingArchive {
    resources: BTreeMap<String, Vec<StagedFile>>,
}

impl StagingArchive {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, resource_id: &str, file_name: &str, content: Vec<u8>) {
        self.resources
            .entry(resource_id.to_string())
            .or_default()
            .push(StagedFile::new(file_name, content));
    }

    /// Append a resource's files in one step.
    pub fn put_resource(&mut self, resource_id: &str, files: Vec<StagedFile>) {
        self.resources
            .entry(resource_id.to_string())
            .or_default()
            .extend(files);
    }

    pub fn snapshot(&self) -> &BTreeMap<String, Vec<StagedFile>> {
        &self.resources
    }

    pub fn resource_ids(&self) -> impl Iterator<Item = &str> {
        self.resources.keys().map(String::as_str)
    }

    pub fn files(&self, resource_id: &str) -> Option<&[StagedFile]> {
        self.resources.get(resource_id).map(Vec::as_slice)
    }

    /// The first file named `file_name` staged for `resource_id`.
    pub fn file(&self, resource_id: &str, file_name: &str) -> Option<&StagedFile> {
        self.files(resource_id)?
            .iter()
            .find(|f| f.name() == file_name)
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    pub fn file_count(&self) -> usize {
        self.resources.values().map(Vec::len).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insertion_order_within_resource() {
        let mut archive = StagingArchive::new();
        archive.put("pool-b", "z.json", b"1".to_vec());
        archive.put("pool-a", "x.json", b"2".to_vec());
        archive.put("pool-b", "a.json", b"3".to_vec());

        let names: Vec<&str> = archive
            .files("pool-b")
            .unwrap()
            .iter()
            .map(StagedFile::name)
            .collect();
        assert_eq!(names, vec!["z.json", "a.json"]);
        assert_eq!(archive.resource_ids().collect::<Vec<_>>(), vec!["pool-a", "pool-b"]);
        assert_eq!(archive.file_count(), 3);
    }

    #[test]
    fn test_put_resource_and_lookup() {
        let mut archive = StagingArchive::new();
        archive.put_resource(
            "pool-a",
            vec![
                StagedFile::new("metadata.json", b"{}".to_vec()),
                StagedFile::new("members.json", b"[]".to_vec()),
            ],
        );
        assert_eq!(archive.len(), 1);
        assert_eq!(
            archive.file("pool-a", "members.json").unwrap().content(),
            b"[]"
        );
        assert!(archive.file("pool-a", "missing.json").is_none());
        assert!(archive.files("pool-z").is_none());
    }
}
