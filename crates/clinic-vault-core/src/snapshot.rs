use crate::error::FormatError;

/// Header every SQLite database file starts with.
pub const SNAPSHOT_SIGNATURE: &[u8; 16] = b"SQLite format 3\0";

/// Full-state export of the relational store.
///
/// The only way to obtain a `Snapshot` is [`Snapshot::from_bytes`], so holding one means the
/// signature check already passed. Anything structurally wrong past the header is left for
/// the engine to reject on load.
#[derive(Clone, PartialEq, Eq)]
pub struct Snapshot(Vec<u8>);

impl Snapshot {
    /// Validate the 16-byte signature and wrap the bytes.
    ///
    /// # Errors
    /// Returns [`FormatError::Empty`], [`FormatError::TooShort`], or
    /// [`FormatError::SignatureMismatch`].
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self, FormatError> {
        check_signature(&bytes)?;
        Ok(Self(bytes))
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Debug for Snapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Snapshot").field("len", &self.0.len()).finish()
    }
}

/// Signature-only gate for untrusted input.
///
/// # Errors
/// Returns a [`FormatError`] describing why the header does not match.
pub fn check_signature(bytes: &[u8]) -> Result<(), FormatError> {
    if bytes.is_empty() {
        return Err(FormatError::Empty);
    }
    if bytes.len() < SNAPSHOT_SIGNATURE.len() {
        return Err(FormatError::TooShort { len: bytes.len() });
    }
    if &bytes[..SNAPSHOT_SIGNATURE.len()] != SNAPSHOT_SIGNATURE {
        return Err(FormatError::SignatureMismatch);
    }
    Ok(())
}
