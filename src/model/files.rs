//! Content files and the file-set
//!
//! Content files describe the page images (or other carriers) of a
//! digitized work. The file-set owns them; physical structure nodes only
//! reference them by id.

/// Handle for a content file inside a [`FileSet`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FileId(pub u32);

/// One content file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentFile {
    /// File identifier as written into the file section, e.g. `FILE_0001`.
    pub id: String,
    /// Location (href) of the file.
    pub location: String,
    /// MIME type, e.g. `image/tiff`.
    pub mime_type: String,
    /// Technical-metadata section references (ADMID tokens).
    pub tech_md_ids: Vec<String>,
    /// Marks the representative image of the work.
    pub representative: bool,
}

impl ContentFile {
    /// Create a new content file.
    pub fn new(
        id: impl Into<String>,
        location: impl Into<String>,
        mime_type: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            location: location.into(),
            mime_type: mime_type.into(),
            tech_md_ids: Vec::new(),
            representative: false,
        }
    }
}

/// The set of all content files of a document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileSet {
    files: Vec<ContentFile>,
}

impl FileSet {
    /// Create an empty file-set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a file and return its handle.
    pub fn add(&mut self, file: ContentFile) -> FileId {
        let id = FileId(self.files.len() as u32);
        self.files.push(file);
        id
    }

    /// Look up a file by handle.
    pub fn get(&self, id: FileId) -> Option<&ContentFile> {
        self.files.get(id.0 as usize)
    }

    /// Look up a file handle by its declared identifier.
    pub fn find_by_id(&self, file_id: &str) -> Option<FileId> {
        self.files
            .iter()
            .position(|f| f.id == file_id)
            .map(|i| FileId(i as u32))
    }

    /// All files in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = (FileId, &ContentFile)> {
        self.files
            .iter()
            .enumerate()
            .map(|(i, f)| (FileId(i as u32), f))
    }

    /// Number of files.
    pub fn len(&self) -> usize {
        self.files.len()
    }

    /// Check if the set is empty.
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}
