use camino::Utf8PathBuf;

/// A 32-byte BLAKE3 hash used for change detection.
///
/// The script compiler keys its module cache by this fingerprint, so an
/// invalidated entry whose content did not actually change (a `touch`, an
/// editor re-save) is reused without being parsed again.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub(crate) struct Hash32([u8; 32]);

impl<T> From<T> for Hash32
where
    T: Into<[u8; 32]>,
{
    fn from(value: T) -> Self {
        Hash32(value.into())
    }
}

impl Hash32 {
    pub(crate) fn hash(buffer: impl AsRef<[u8]>) -> Self {
        blake3::Hasher::new()
            .update(buffer.as_ref())
            .finalize()
            .into()
    }

    pub(crate) fn to_hex(self) -> String {
        const HEX: &[u8; 16] = b"0123456789abcdef";
        let mut acc = String::with_capacity(64);

        for &byte in &self.0 {
            acc.push(HEX[(byte >> 4) as usize] as char);
            acc.push(HEX[(byte & 0xF) as usize] as char);
        }

        acc
    }
}

impl std::fmt::Debug for Hash32 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Hash32({})", self.to_hex())
    }
}

/// Selects between the two fixed pipelines. Chosen once per process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BuildMode {
    /// Source maps, incremental script cache, live reload.
    #[default]
    Development,
    /// Minified output, no source maps.
    Production,
}

impl BuildMode {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "development" => Some(BuildMode::Development),
            "production" => Some(BuildMode::Production),
            _ => None,
        }
    }
}

impl std::fmt::Display for BuildMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BuildMode::Development => write!(f, "development"),
            BuildMode::Production => write!(f, "production"),
        }
    }
}

/// The output of one compile call.
///
/// Produced fresh every time; the only identity that survives a rebuild is
/// `name`, the file name inside the output directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    /// File name relative to the output directory, e.g. `app.js`.
    pub name: Utf8PathBuf,
    /// The bundle, stylesheet or page.
    pub data: Vec<u8>,
    /// Source map, written next to the bundle under the source map directory.
    pub map: Option<Vec<u8>>,
}

impl Artifact {
    pub fn new(name: impl Into<Utf8PathBuf>, data: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            data: data.into(),
            map: None,
        }
    }

    pub fn with_map(mut self, map: impl Into<Vec<u8>>) -> Self {
        self.map = Some(map.into());
        self
    }
}
